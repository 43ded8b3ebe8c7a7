//! # CA Configuration
//!
//! This module defines the configuration structures for the Certificate Authority (CA).
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::certificate_authority::CaError;
use crate::config::{InsertConfigRoot, ensure_exists, resolve_path};

/// Configuration for the Certificate Authority.
#[derive(Deserialize, Debug, Clone)]
pub struct Ca {
    /// The path to the CA's OpenSSH private key.
    pub signing_key: PathBuf,
    /// Lifetime of issued certificates, e.g. `168h`.
    pub cert_duration: String,
    /// Hostname suffix that is additionally stripped to form a short-name principal.
    #[serde(default)]
    pub strip_suffix: String,
}

impl Ca {
    /// Parses the configured certificate lifetime.
    pub fn cert_duration(&self) -> Result<Duration, CaError> {
        parse_cert_duration(&self.cert_duration)
    }

    /// Checks the values that are not paths.
    pub(crate) fn validate(&self) -> Result<()> {
        self.cert_duration()?;
        Ok(())
    }
}

/// Parses a human readable duration such as `24h` or `1h30m`.
///
/// Zero-length durations are rejected since they would yield a certificate
/// that is never valid.
pub fn parse_cert_duration(value: &str) -> Result<Duration, CaError> {
    let duration = duration_str::parse(value).map_err(|e| CaError::Duration {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if duration.as_secs() == 0 {
        return Err(CaError::Duration {
            value: value.to_string(),
            reason: "duration must be at least one second".to_string(),
        });
    }
    Ok(duration)
}

impl InsertConfigRoot for Ca {
    /// Resolves a relative signing key path against the configuration root.
    fn insert_config_path(&mut self, config_root: &Path) {
        resolve_path(config_root, &mut self.signing_key);
    }

    /// Checks that the signing key exists.
    fn check_paths(&self) -> Result<()> {
        ensure_exists("CA signing key", &self.signing_key)
    }
}
