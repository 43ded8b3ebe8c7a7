//! # Registry Configuration
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::config::{InsertConfigRoot, ensure_exists, resolve_path};

/// Configuration for the host registry database.
#[derive(Deserialize, Debug, Clone)]
pub struct RegistryConfig {
    /// Path to the SQLite database file; created if missing.
    pub database: PathBuf,
    /// Size of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

impl InsertConfigRoot for RegistryConfig {
    fn insert_config_path(&mut self, config_root: &Path) {
        resolve_path(config_root, &mut self.database);
    }

    /// The database file may be created later, but its directory must exist.
    fn check_paths(&self) -> Result<()> {
        match self.database.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                ensure_exists("registry directory", parent)
            }
            _ => Ok(()),
        }
    }
}
