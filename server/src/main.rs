use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use replygen_retrieval::{ReplyConfig, ReplyEngine};
use replygen_server::{ReplyHandler, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "replygen-server",
    about = "Drafts customer-support replies from the most similar past exchanges"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "REPLYGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "REPLYGEN_BIND", default_value = "127.0.0.1:5000")]
    bind: String,

    /// Ignore the persisted embedding cache and embed the dataset again.
    #[arg(long)]
    rebuild_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ReplyConfig::load(path)
            .await
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ReplyConfig::default(),
    };

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    let engine = ReplyEngine::builder()
        .with_config(config)
        .rebuild_cache(cli.rebuild_cache)
        .build()
        .await
        .context("failed to initialize reply engine")?;
    let stats = engine.stats();
    info!(
        "Reply engine ready: {} records, {} via {}, replies via {}",
        stats.records, stats.embedding_model, stats.embedding_provider, stats.completion_model
    );

    let app = router(Arc::new(ReplyHandler::new(Arc::new(engine))));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
