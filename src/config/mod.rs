//! # Configuration
//!
//! This module handles the reading and parsing of the main configuration file.
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::certificate_authority::config::Ca;
use crate::http_server::config::HttpServerConfig;
use crate::registry::config::RegistryConfig;

/// The main configuration for the host CA server.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// The HTTPS listener configuration.
    pub server: HttpServerConfig,
    /// The Certificate Authority (CA) configuration.
    pub ca: Ca,
    /// The host registry configuration.
    pub registry: RegistryConfig,
}

/// A trait for inserting the configuration root path into a configuration struct.
///
/// This is used to resolve relative paths in the configuration.
pub(crate) trait InsertConfigRoot {
    /// Inserts the configuration root path into the configuration struct.
    ///
    /// # Arguments
    ///
    /// * `config_root` - The root path of the configuration file.
    fn insert_config_path(&mut self, config_root: &Path);
    /// Checks if the paths in the configuration are valid.
    fn check_paths(&self) -> Result<()>;
}

/// Joins `path` onto `config_root` unless it is already absolute.
pub(crate) fn resolve_path(config_root: &Path, path: &mut PathBuf) {
    if !path.has_root() {
        *path = config_root.join(&*path);
    }
}

/// Returns an error naming `what` if `path` does not exist.
pub(crate) fn ensure_exists(what: &str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} {:?} not found", what, path),
        )
        .into())
    }
}

/// Reads and parses the main configuration file.
///
/// Relative paths are resolved against the directory holding the file, and
/// every referenced key or certificate file must exist.
///
/// # Arguments
///
/// * `file_path` - The path to the configuration file.
///
/// # Returns
///
/// A `Result` containing the parsed `Config` or an error.
pub fn read_config(file_path: &str) -> Result<Config> {
    let config_path: PathBuf = PathBuf::from(file_path);
    if !config_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Config file {} not found", file_path),
        )
        .into());
    }
    let config_root = match config_path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };

    let mut config_file = File::open(&config_path)?;
    let mut config = String::new();
    config_file.read_to_string(&mut config)?;

    let mut config: Config =
        toml::from_str(&config).with_context(|| format!("failed to parse {}", file_path))?;
    config.server.insert_config_path(&config_root);
    config.ca.insert_config_path(&config_root);
    config.registry.insert_config_path(&config_root);
    config.server.check_paths()?;
    config.ca.check_paths()?;
    config.registry.check_paths()?;
    config.ca.validate()?;

    Ok(config)
}
