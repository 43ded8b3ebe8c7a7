#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HOST;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use ssh_host_ca::build_server;
use ssh_host_ca::config::read_config;

/// An X.509 certificate authority minting server and client certificates.
pub struct TestPki {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = params.self_signed(&ca_key).unwrap();
        TestPki { ca_cert, ca_key }
    }

    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    fn issue(&self, names: &[&str], usage: ExtendedKeyUsagePurpose) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|name| name.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.is_ca = IsCa::NoCa;
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        (cert, key)
    }

    /// Returns PEM certificate and key for the HTTPS listener.
    pub fn server_pem(&self) -> (String, String) {
        let (cert, key) = self.issue(&["localhost"], ExtendedKeyUsagePurpose::ServerAuth);
        (cert.pem(), key.serialize_pem())
    }

    /// Returns a client certificate chain and key attesting `names`.
    pub fn client_identity(
        &self,
        names: &[&str],
    ) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let (cert, key) = self.issue(names, ExtendedKeyUsagePurpose::ClientAuth);
        (
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )
    }
}

/// A running server together with its scratch directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub pki: TestPki,
    pub ca_key: PrivateKey,
    _temp_dir: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

/// Scratch directory holding a complete configuration.
pub struct TestConfig {
    pub dir: TempDir,
    pub pki: TestPki,
    pub ca_key: PrivateKey,
}

impl TestConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }
}

/// Writes keys, certificates and a configuration using relative paths.
pub fn write_config(strip_suffix: &str, require_client_cert: bool) -> TestConfig {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let pki = TestPki::new();
    let (server_cert, server_key) = pki.server_pem();
    write(dir, "server.pem", &server_cert);
    write(dir, "server-key.pem", &server_key);
    write(dir, "client-ca.pem", &pki.ca_pem());

    let ca_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    write(dir, "ca_key", &ca_key.to_openssh(LineEnding::LF).unwrap());

    let config = format!(
        r#"
[server]
bind = "127.0.0.1"
port = 0
tls_cert = "server.pem"
tls_key = "server-key.pem"
client_ca = "client-ca.pem"
require_client_cert = {require_client_cert}

[ca]
signing_key = "ca_key"
cert_duration = "24h"
strip_suffix = "{strip_suffix}"

[registry]
database = "hostkeys.db"
"#
    );
    write(dir, "config.toml", &config);

    TestConfig {
        dir: temp_dir,
        pki,
        ca_key,
    }
}

/// Starts the server on an ephemeral port.
pub async fn start_server(strip_suffix: &str, require_client_cert: bool) -> TestServer {
    let TestConfig { dir, pki, ca_key } = write_config(strip_suffix, require_client_cert);

    let config = read_config(dir.path().join("config.toml").to_str().unwrap()).unwrap();
    let server = build_server(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        pki,
        ca_key,
        _temp_dir: dir,
        shutdown: Some(shutdown),
    }
}

/// A response reduced to status and body text.
#[derive(Debug)]
pub struct TextResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Sends one request over a fresh TLS connection.
pub async fn send(
    server: &TestServer,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    method: Method,
    path: &str,
    body: &str,
) -> anyhow::Result<TextResponse> {
    let mut roots = RootCertStore::empty();
    roots.add(server.pki.ca_der())?;
    let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);
    let client_config = match identity {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
        None => builder.with_no_client_auth(),
    };

    let tcp = TcpStream::connect(server.addr).await?;
    let tls = TlsConnector::from(Arc::new(client_config))
        .connect(ServerName::try_from("localhost")?.to_owned(), tcp)
        .await?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
    tokio::spawn(connection);

    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, "localhost")
        .body(Full::new(Bytes::from(body.to_string())))?;
    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok(TextResponse {
        status,
        body: String::from_utf8(body.to_vec())?,
    })
}

/// Generates a fresh host key in authorized-keys form.
pub fn host_key_line(comment: &str) -> String {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    key.set_comment(comment);
    key.public_key().to_openssh().unwrap()
}
