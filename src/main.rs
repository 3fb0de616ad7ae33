//! Café Virtuel server binary.

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cafe_virtuel::api::cafe_routes;
use cafe_virtuel::config::{OrchestratorConfig, ServerConfig};
use cafe_virtuel::export::{Exporter, SmtpConfig};
use cafe_virtuel::orchestration::Orchestrator;
use cafe_virtuel::session::service::SessionService;
use cafe_virtuel::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = LibSqlBackend::new_local(&config.db_path)
        .await
        .context("Failed to open database")?;

    let service = SessionService::new(Arc::new(db));
    let orchestrator = Arc::new(Orchestrator::new(&OrchestratorConfig::default()));
    let exporter = Arc::new(
        Exporter::new(&config.export_dir)
            .with_github_repo(config.github_repo.clone())
            .with_smtp(SmtpConfig::from_env()),
    );

    let app = cafe_routes(service, orchestrator, exporter, config.rules_path.clone())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, db = %config.db_path.display(), "Café Virtuel server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
