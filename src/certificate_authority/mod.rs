//! # Certificate Authority
//!
//! This module mints SSH host certificates. The serial of every certificate is
//! the registry id of the enrolled host, the key id is the hostname, and the
//! principals are derived from the hostname and the configured strip suffix.
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, info};
use ssh_key::rand_core::{OsRng, RngCore};
use ssh_key::{
    PublicKey,
    certificate::{Builder as CertBuilder, CertType, Certificate},
    private::PrivateKey,
};
use thiserror::Error;
use zeroize::Zeroizing;

/// Configuration types for the Certificate Authority.
pub mod config;

/// Length of the random nonce embedded in every certificate.
pub const NONCE_SIZE: usize = 32;

/// Errors that can occur while minting a host certificate.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to read signing key {path:?}: {source}")]
    ReadKey {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse signing key {path:?}: {source}")]
    ParseKey {
        path: PathBuf,
        source: ssh_key::Error,
    },
    #[error("signing key {0:?} is encrypted")]
    EncryptedKey(PathBuf),
    #[error("invalid certificate duration {value:?}: {reason}")]
    Duration { value: String, reason: String },
    #[error("failed to draw certificate nonce: {0}")]
    Nonce(String),
    #[error("system clock is set before the unix epoch")]
    Clock,
    #[error("signing task failed: {0}")]
    Aborted(String),
    #[error("failed to sign certificate: {0}")]
    Sign(#[from] ssh_key::Error),
}

/// Computes the principals of a host certificate.
///
/// The full hostname always comes first. When `strip_suffix` is non-empty and
/// the hostname ends with it, the hostname without the suffix follows.
pub fn host_principals(host_name: &str, strip_suffix: &str) -> Vec<String> {
    let mut principals = vec![host_name.to_string()];
    if strip_suffix.is_empty() {
        return principals;
    }
    if let Some(short_name) = host_name.strip_suffix(strip_suffix) {
        // a hostname equal to the suffix would produce an empty principal
        if !short_name.is_empty() {
            principals.push(short_name.to_string());
        }
    }
    principals
}

/// Encodes a certificate as the single line handed back to enrolling hosts:
/// `<key-type>-cert-v01@openssh.com <base64 certificate>`.
pub fn encode_certificate(cert: &Certificate) -> Result<String, CaError> {
    let cert_bytes = cert.to_bytes()?;
    Ok(format!(
        "{}-cert-v01@openssh.com {}",
        cert.public_key().algorithm().as_str(),
        STANDARD.encode(cert_bytes)
    ))
}

/// The host Certificate Authority.
///
/// The signing key is read from disk on every signing call, so replacing the
/// key file takes effect without a restart. The type holds no mutable state
/// and can be shared between concurrent requests.
pub struct HostCertificateAuthority {
    config: config::Ca,
}

impl HostCertificateAuthority {
    /// Creates a new `HostCertificateAuthority` instance.
    ///
    /// # Arguments
    ///
    /// * `ca_config` - The configuration for the CA.
    pub fn new(ca_config: config::Ca) -> Self {
        HostCertificateAuthority { config: ca_config }
    }

    /// Reads and parses the signing key.
    fn load_signing_key(&self) -> Result<PrivateKey, CaError> {
        let path = &self.config.signing_key;
        let read_error = |source| CaError::ReadKey {
            path: path.clone(),
            source,
        };
        let mut key_file = File::open(path).map_err(read_error)?;
        let mut key_buffer = Zeroizing::new(Vec::new());
        key_file.read_to_end(&mut key_buffer).map_err(read_error)?;

        let private_key =
            PrivateKey::from_openssh(&key_buffer[..]).map_err(|source| CaError::ParseKey {
                path: path.clone(),
                source,
            })?;
        if private_key.is_encrypted() {
            return Err(CaError::EncryptedKey(path.clone()));
        }
        Ok(private_key)
    }

    /// Loads the signing key once and returns the matching CA public key.
    ///
    /// Used at startup so a broken key is reported before the server accepts
    /// requests.
    pub fn check_signing_key(&self) -> Result<PublicKey, CaError> {
        let private_key = self.load_signing_key()?;
        Ok(private_key.public_key().clone())
    }

    /// Signs an SSH public key and returns a host certificate.
    ///
    /// # Arguments
    ///
    /// * `host_name` - The hostname the key was enrolled for; used as key id.
    /// * `serial` - The registry id of the host record.
    /// * `public_key` - The public key to be signed.
    ///
    /// # Returns
    ///
    /// A `Result` containing the signed `Certificate` or an error.
    pub fn sign_host_certificate(
        &self,
        host_name: &str,
        serial: u64,
        public_key: &PublicKey,
    ) -> Result<Certificate, CaError> {
        let private_key = self.load_signing_key()?;

        let mut nonce = vec![0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CaError::Nonce(e.to_string()))?;

        let duration = self.config.cert_duration()?;
        let valid_after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| CaError::Clock)?
            .as_secs();
        let valid_before = valid_after.saturating_add(duration.as_secs());

        let mut cert_builder = CertBuilder::new(nonce, public_key, valid_after, valid_before)?;
        cert_builder.serial(serial)?;
        cert_builder.key_id(host_name)?;
        cert_builder.cert_type(CertType::Host)?;
        let principals = host_principals(host_name, &self.config.strip_suffix);
        for principal in &principals {
            debug!("adding principal: {}", principal);
            cert_builder.valid_principal(principal.as_str())?;
        }
        cert_builder.comment(public_key.comment())?;

        let cert = match cert_builder.sign(&private_key) {
            Ok(cert) => cert,
            Err(e) => {
                error!("signing failed for {}: {}", host_name, e);
                return Err(e.into());
            }
        };
        info!(
            "issued host certificate for {} (serial {}, principals {:?}, valid {}..{})",
            host_name, serial, principals, valid_after, valid_before
        );
        Ok(cert)
    }
}
