//! HTTP surface: mounts the authorization API under /api/v1 and serves it
//! until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::authz::engine::Service;
use crate::settings::Settings;

pub async fn serve(settings: Settings, service: Arc<Service>) -> miette::Result<()> {
    let router = Router::new()
        .route("/healthz", get(health))
        .nest("/api/v1", crate::authz::web::router(service))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "Authorization API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
