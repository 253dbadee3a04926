//! Basic OCI registry server example
//!
//! Run with: cargo run -p distribution --example basic_server
//!
//! Then push with any OCI client, e.g.
//! `curl -X PUT --data '{"schemaVersion":2}' http://127.0.0.1:5000/v2/hello/manifests/latest`

use std::time::Duration;

use distribution::RegistryBuilder;
use storage::MemoryStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Create an in-memory storage backend
    let storage = MemoryStorage::with_buckets(&["registry"]);

    let registry = RegistryBuilder::new()
        .storage(storage.into())
        .bucket("registry")
        .registry();

    // Drop upload sessions abandoned for more than ten minutes
    let uploads = registry.uploads().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(error) = uploads.sweep(Duration::from_secs(600)).await {
                tracing::error!(%error, "sweep failed");
            }
        }
    });

    // Bind to address
    let addr = "127.0.0.1:5000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("OCI Registry listening on http://{}", addr);
    tracing::info!("Try: curl -i http://{}/v2/", addr);

    // Serve the registry
    axum::serve(listener, registry.router()).await?;

    Ok(())
}
