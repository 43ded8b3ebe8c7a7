//! # HTTPS Server Configuration
//!
//! This module defines the configuration for the HTTPS listener.
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::config::{InsertConfigRoot, ensure_exists, resolve_path};

/// Configuration for the HTTPS server.
#[derive(Deserialize, Debug, Clone)]
pub struct HttpServerConfig {
    /// The address to bind the server to.
    pub bind: String,
    /// The port to bind the server to.
    pub port: u16,
    /// PEM file with the server certificate chain.
    pub tls_cert: PathBuf,
    /// PEM file with the server private key.
    pub tls_key: PathBuf,
    /// PEM bundle of trust anchors for client certificates.
    pub client_ca: PathBuf,
    /// Fail the TLS handshake of clients that present no certificate.
    #[serde(default)]
    pub require_client_cert: bool,
}

impl InsertConfigRoot for HttpServerConfig {
    /// Resolves the relative TLS file paths against the configuration root.
    fn insert_config_path(&mut self, config_root: &Path) {
        resolve_path(config_root, &mut self.tls_cert);
        resolve_path(config_root, &mut self.tls_key);
        resolve_path(config_root, &mut self.client_ca);
    }

    /// Checks that the TLS files exist.
    fn check_paths(&self) -> Result<()> {
        ensure_exists("TLS certificate", &self.tls_cert)?;
        ensure_exists("TLS key", &self.tls_key)?;
        ensure_exists("client CA bundle", &self.client_ca)
    }
}
