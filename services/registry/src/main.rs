//! Registry server binary.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use distribution::{RegistryConfig, UploadPolicy, UploadSessions};
use storage::StorageConfig;
use tracing_subscriber::EnvFilter;

/// Serve an OCI distribution registry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Store repositories in this directory instead of the configured backend.
    #[arg(long)]
    root: Option<Utf8PathBuf>,
}

impl Args {
    fn config(&self) -> Result<RegistryConfig, distribution::ConfigError> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::from_path(path)?,
            None => RegistryConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(root) = &self.root {
            config.storage = StorageConfig::Local { path: root.clone() };
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = args.config()?;
    tracing::debug!(?config, "loaded configuration");

    let registry = config.registry().await?;
    tokio::spawn(sweep(registry.uploads().clone(), config.uploads));

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("OCI registry listening on http://{}", listener.local_addr()?);

    axum::serve(listener, registry.router())
        .with_graceful_shutdown(shutdown())
        .await?;

    tracing::info!("registry stopped");
    Ok(())
}

/// Periodically delete abandoned upload sessions.
async fn sweep(uploads: UploadSessions, policy: UploadPolicy) {
    let mut interval = tokio::time::interval(policy.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(error) = uploads.sweep(policy.max_age()).await {
            tracing::error!(%error, "upload sweep failed");
        }
    }
}

async fn shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
