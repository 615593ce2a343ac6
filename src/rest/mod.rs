// rest/mod.rs — Public REST API server.
//
// Thin marshaling layer over the generation pipeline:
//   POST /api/v1/generate          — single-shot generation
//   POST /api/v1/generate/stream   — NDJSON event stream
//   POST /api/v1/questions         — followup questions only
//   GET  /api/v1/health

pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.server.bind_address, ctx.config.server.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/generate", post(routes::generate::generate))
        .route(
            "/api/v1/generate/stream",
            post(routes::generate::generate_stream),
        )
        .route("/api/v1/questions", post(routes::generate::questions))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
