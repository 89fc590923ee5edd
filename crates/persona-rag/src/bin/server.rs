//! Ingestion server binary
//!
//! Run with: cargo run -p persona-rag --bin persona-rag-server [config.toml]

use persona_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persona_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional config file path as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            RagConfig::from_file(&path)?
        }
        None => RagConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Storage backend: {:?}", config.storage.backend);
    tracing::info!("  - Chunk target: {} tokens", config.chunking.target_tokens);
    tracing::info!("  - Known personas: {}", config.personas.known.join(", "));
    tracing::info!("  - Workers: {}", config.jobs.effective_workers());

    let server = RagServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/ingest          - Upload documents");
    println!("  POST /api/jobs            - Submit typed jobs");
    println!("  GET  /api/jobs/:id/events - Stream job progress");
    println!("  GET  /api/graph/entities  - Browse the knowledge graph");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
