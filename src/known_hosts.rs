//! # Known Hosts
//!
//! Renders the registry as an OpenSSH `known_hosts` file: one unhashed
//! `<hostname> <public key>` line per enrolled host.
use crate::registry::{HostRecord, HostRegistry, RegistryError};

/// Formats records as newline terminated `known_hosts` lines.
pub fn format_known_hosts(records: &[HostRecord]) -> String {
    records
        .iter()
        .map(|record| format!("{} {}\n", record.hostname, record.pubkey))
        .collect()
}

/// Scans the registry and renders every record.
pub async fn render_known_hosts(registry: &dyn HostRegistry) -> Result<String, RegistryError> {
    let records = registry.list().await?;
    Ok(format_known_hosts(&records))
}
