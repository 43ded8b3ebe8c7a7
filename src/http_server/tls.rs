//! TLS configuration for the HTTPS listener.
//!
//! Client certificates are verified against the configured client CA bundle.
//! Depending on configuration a client without a certificate is either turned
//! away during the handshake or admitted without an identity.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

use crate::http_server::config::HttpServerConfig;

/// Errors that can occur while building the TLS configuration.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("cannot read certificates from {path:?}: {source}")]
    Cert { path: PathBuf, source: io::Error },
    #[error("cannot read private key from {path:?}: {source}")]
    Key { path: PathBuf, source: io::Error },
    #[error("{path:?} does not contain a usable private key")]
    NoKey { path: PathBuf },
    #[error("{path:?} contains more than one private key")]
    MultipleKeys { path: PathBuf },
    #[error("{path:?} does not contain any certificates")]
    NoCerts { path: PathBuf },
    #[error("invalid client CA certificate in {path:?}: {reason}")]
    ClientCa { path: PathBuf, reason: String },
    #[error("failed to build client verifier: {0}")]
    Verifier(String),
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

/// Creates the rustls server config for the HTTPS listener.
pub fn create_server_config(config: &HttpServerConfig) -> Result<ServerConfig, TlsConfigError> {
    let mut root_store = RootCertStore::empty();
    for cert in read_certs(&config.client_ca)? {
        root_store.add(cert).map_err(|e| TlsConfigError::ClientCa {
            path: config.client_ca.clone(),
            reason: e.to_string(),
        })?;
    }

    let provider = Arc::new(ring::default_provider());
    let mut verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider.clone());
    if !config.require_client_cert {
        verifier = verifier.allow_unauthenticated();
    }
    let verifier = verifier
        .build()
        .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;

    let server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(read_certs(&config.tls_cert)?, read_key(&config.tls_key)?)?;
    Ok(server_config)
}

/// Reads all certificates from the given PEM file.
fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let cert_error = |source| TlsConfigError::Cert {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = io::BufReader::new(File::open(path).map_err(cert_error)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(cert_error)?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCerts {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Reads a private key from the given PEM file.
///
/// The key may be a PKCS#1 RSA private key, a PKCS#8 private key, or a
/// SEC1 encoded EC private key. All other PEM items are ignored.
fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    use rustls_pemfile::Item::*;

    let key_error = |source| TlsConfigError::Key {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = io::BufReader::new(File::open(path).map_err(key_error)?);

    let mut key = None;
    while let Some(item) = rustls_pemfile::read_one(&mut reader).transpose() {
        let bits: PrivateKeyDer<'static> = match item.map_err(key_error)? {
            Pkcs1Key(bits) => bits.into(),
            Pkcs8Key(bits) => bits.into(),
            Sec1Key(bits) => bits.into(),
            _ => continue,
        };
        if key.is_some() {
            return Err(TlsConfigError::MultipleKeys {
                path: path.to_path_buf(),
            });
        }
        key = Some(bits);
    }

    key.ok_or_else(|| TlsConfigError::NoKey {
        path: path.to_path_buf(),
    })
}
