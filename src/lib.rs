use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use ssh_key::HashAlg;

pub mod certificate_authority;
pub mod config;
pub mod enrollment;
pub mod http_server;
pub mod identity;
pub mod known_hosts;
pub mod registry;

use crate::certificate_authority::HostCertificateAuthority;
use crate::config::Config;
use crate::enrollment::EnrollmentService;
use crate::http_server::HttpsServer;
use crate::registry::SqliteRegistry;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// config file path
    #[arg(short = 'c', long)]
    pub config_file: String,
    /// validate the configuration, print the CA public key and exit
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}

/// Loads the CA key and opens the registry, then binds the HTTPS listener.
pub async fn build_server(config: &Config) -> Result<HttpsServer> {
    let ca = HostCertificateAuthority::new(config.ca.clone());
    let ca_public_key = ca.check_signing_key()?;
    info!(
        "issuing host certificates valid for {} signed by {}",
        humantime::format_duration(config.ca.cert_duration()?),
        ca_public_key.fingerprint(HashAlg::Sha256)
    );

    let registry = SqliteRegistry::open(&config.registry).await?;
    info!("host registry at {:?}", config.registry.database);

    let service = EnrollmentService::new(Arc::new(registry), Arc::new(ca));
    HttpsServer::bind(&config.server, service).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c, shutting down");
}

pub async fn run_server(args: CliArgs) -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = config::read_config(&args.config_file)?;

    if args.check_config {
        let ca = HostCertificateAuthority::new(config.ca.clone());
        let ca_public_key = ca.check_signing_key()?;
        tls_check(&config)?;
        println!("@cert-authority * {}", ca_public_key.to_openssh()?);
        return Ok(());
    }

    let server = build_server(&config).await?;
    server.run_until(shutdown_signal()).await
}

fn tls_check(config: &Config) -> Result<()> {
    http_server::tls::create_server_config(&config.server)?;
    info!("TLS configuration is valid");
    Ok(())
}
