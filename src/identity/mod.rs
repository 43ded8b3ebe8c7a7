//! # Identity Binder
//!
//! Decides whether the client certificate a host presented over mutual TLS
//! attests the hostname it asks to enroll.
use log::{debug, warn};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};

/// The verified client certificate chain of a TLS connection.
///
/// Only constructed from chains that passed the server's client certificate
/// verification, so holding one means the peer proved possession of the
/// leaf's private key and the leaf chains to a configured trust anchor.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    chain: Vec<CertificateDer<'static>>,
}

impl PeerIdentity {
    /// Wraps a verified chain, leaf first. Returns `None` for an empty chain.
    pub fn from_verified_chain(chain: &[CertificateDer<'_>]) -> Option<Self> {
        if chain.is_empty() {
            return None;
        }
        Some(PeerIdentity {
            chain: chain.iter().map(|cert| cert.clone().into_owned()).collect(),
        })
    }

    /// The end-entity certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }
}

/// Returns `true` when `peer` attests `claimed_hostname`.
///
/// Matching follows RFC 6125 on the leaf's subjectAltName entries, wildcards
/// included; IP-literal hostnames are matched against IP address SANs. Any
/// of a missing TLS identity, an unparseable leaf, an invalid hostname or a
/// name mismatch denies.
pub fn authorize(claimed_hostname: &str, peer: Option<&PeerIdentity>) -> bool {
    let Some(peer) = peer else {
        warn!("enrollment for {} without verified client certificate", claimed_hostname);
        return false;
    };
    let server_name = match ServerName::try_from(claimed_hostname) {
        Ok(name) => name,
        Err(e) => {
            warn!("claimed hostname {:?} is not a valid name: {}", claimed_hostname, e);
            return false;
        }
    };
    let leaf = match webpki::EndEntityCert::try_from(peer.leaf()) {
        Ok(leaf) => leaf,
        Err(e) => {
            warn!("failed to parse client certificate: {:?}", e);
            return false;
        }
    };
    match leaf.verify_is_valid_for_subject_name(&server_name) {
        Ok(()) => {
            debug!("client certificate attests {}", claimed_hostname);
            true
        }
        Err(e) => {
            warn!(
                "client certificate does not attest {}: {:?}",
                claimed_hostname, e
            );
            false
        }
    }
}
