//! # Enrollment
//!
//! Ties the identity check, the host registry and the certificate authority
//! together. An enrollment runs strictly in order: authorize the peer, parse
//! the submitted key, upsert it and read back the record id, sign a host
//! certificate with that id as serial, and encode the result. The first
//! failing step aborts the request.
use std::sync::Arc;

use log::{error, info, warn};
use ssh_key::{AuthorizedKeys, PublicKey};
use thiserror::Error;

use crate::certificate_authority::{CaError, HostCertificateAuthority, encode_certificate};
use crate::identity::{self, PeerIdentity};
use crate::known_hosts;
use crate::registry::{HostRegistry, RegistryError};

/// Errors surfaced to enrolling clients.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// No verified client certificate, or one that does not attest the hostname.
    #[error("invalid client auth")]
    InvalidClientAuth,
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    #[error("storage error: {0}")]
    Storage(#[from] RegistryError),
    #[error("signing error: {0}")]
    Signing(#[from] CaError),
}

/// Parses the first key of an authorized-keys formatted request body.
///
/// Blank lines and `#` comments are skipped and key options are ignored.
pub fn parse_public_key(body: &[u8]) -> Result<PublicKey, EnrollError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| EnrollError::MalformedKey(format!("request body is not UTF-8: {}", e)))?;
    match AuthorizedKeys::new(text).next() {
        Some(Ok(entry)) => Ok(entry.public_key().clone()),
        Some(Err(e)) => Err(EnrollError::MalformedKey(e.to_string())),
        None => Err(EnrollError::MalformedKey("no public key in request".to_string())),
    }
}

/// Handles enrollment and `known_hosts` requests.
#[derive(Clone)]
pub struct EnrollmentService {
    registry: Arc<dyn HostRegistry>,
    ca: Arc<HostCertificateAuthority>,
}

impl EnrollmentService {
    /// Creates a service over the given registry and certificate authority.
    pub fn new(registry: Arc<dyn HostRegistry>, ca: Arc<HostCertificateAuthority>) -> Self {
        EnrollmentService { registry, ca }
    }

    /// Enrolls `hostname` with the public key in `body` and returns the
    /// encoded host certificate line.
    ///
    /// # Arguments
    ///
    /// * `hostname` - The hostname taken from the request path.
    /// * `peer` - The verified client certificate chain of the connection.
    /// * `body` - The request body holding an authorized-keys line.
    pub async fn enroll(
        &self,
        hostname: &str,
        peer: Option<&PeerIdentity>,
        body: &[u8],
    ) -> Result<String, EnrollError> {
        if !identity::authorize(hostname, peer) {
            return Err(EnrollError::InvalidClientAuth);
        }

        let public_key = parse_public_key(body).inspect_err(|e| {
            warn!("rejecting enrollment for {}: {}", hostname, e);
        })?;
        let encoded_key = public_key
            .to_openssh()
            .map_err(|e| EnrollError::MalformedKey(e.to_string()))?;
        info!("host {} requested signing of key: {}", hostname, encoded_key);

        let id = self.registry.upsert(hostname, &encoded_key).await.inspect_err(|e| {
            error!("failed to store key for {}: {}", hostname, e);
        })?;

        let ca = self.ca.clone();
        let host_name = hostname.to_string();
        let cert = tokio::task::spawn_blocking(move || {
            ca.sign_host_certificate(&host_name, id, &public_key)
        })
        .await
        .map_err(|e| CaError::Aborted(e.to_string()))?
        .inspect_err(|e| {
            error!("failed to sign certificate for {}: {}", hostname, e);
        })?;

        Ok(encode_certificate(&cert)?)
    }

    /// Renders every enrolled host as a `known_hosts` line.
    pub async fn known_hosts(&self) -> Result<String, EnrollError> {
        Ok(known_hosts::render_known_hosts(self.registry.as_ref()).await?)
    }
}
