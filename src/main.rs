mod config;
mod gemini;
mod models;
mod normalize;
mod pipeline;
mod routes;
mod store;
mod validation;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    config::Config,
    gemini::GeminiClient,
    pipeline::Pipeline,
    routes::{router, AppState},
    store::DiskStore,
    validation::ImagePolicy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.gemini_configured() {
        tracing::info!("🔑 Gemini API: Configured ({})", config.masked_key());
    } else {
        tracing::warn!("🔑 Gemini API: Not Configured, /api/analyze will fail until GEMINI_API_KEY is set");
    }

    let store = DiskStore::open(&config.upload_dir)
        .await
        .with_context(|| format!("preparing upload directory {}", config.upload_dir.display()))?;
    tracing::info!("📁 Uploads directory: {}", store.root().display());

    let gemini = GeminiClient::new(&config).context("building Gemini client")?;
    let pipeline = Pipeline::new(ImagePolicy::default(), Arc::new(store), Arc::new(gemini));
    let state = AppState {
        pipeline: Arc::new(pipeline),
        gemini_configured: config.gemini_configured(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "🌱 Plant Disease Detection API running");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
