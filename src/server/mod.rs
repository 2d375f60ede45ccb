//! HTTP binding: REST endpoints for the run lifecycle plus a per-run
//! WebSocket event stream.

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::config::ServerSettings;
use crate::events::{EventBus, spawn_log_sink};
use crate::orchestrator::Orchestrator;
use crate::provider::CompletionProvider;
use api::AppState;

/// Build the full application router with the REST API and WebSocket stream.
pub fn build_router(orchestrator: Orchestrator) -> Router {
    api::api_router()
        .route("/api/ws/{id}", get(ws::ws_handler))
        .with_state(Arc::new(AppState { orchestrator }))
}

/// Assemble an orchestrator from `settings`.
pub fn build_orchestrator(
    settings: &ServerSettings,
    provider: Arc<dyn CompletionProvider>,
) -> Result<Orchestrator> {
    let checkpoints: Arc<dyn CheckpointStore> = match &settings.checkpoint_dir {
        Some(dir) => Arc::new(
            FileCheckpointStore::new(dir)
                .with_context(|| format!("Failed to open checkpoint dir {}", dir.display()))?,
        ),
        None => Arc::new(MemoryCheckpointStore::new()),
    };
    Ok(Orchestrator::builder(provider)
        .bus(EventBus::with_capacity(settings.event_capacity))
        .checkpoints(checkpoints)
        .build())
}

/// Start the server and block until Ctrl+C.
pub async fn start_server(
    settings: ServerSettings,
    provider: Arc<dyn CompletionProvider>,
) -> Result<()> {
    let orchestrator = build_orchestrator(&settings, provider)?;
    let sink = spawn_log_sink(orchestrator.bus(), settings.event_log.clone());

    let mut app = build_router(orchestrator);
    if settings.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = settings.addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        checkpoints = ?settings.checkpoint_dir,
        event_log = ?settings.event_log,
        "retrai server listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    sink.abort();
    info!("Server shut down gracefully");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let orchestrator = build_orchestrator(
            &ServerSettings::default(),
            Arc::new(ScriptedProvider::new()),
        )
        .unwrap();
        build_router(orchestrator)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/goals")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let goals: Vec<String> = serde_json::from_slice(&bytes).unwrap();
        assert!(goals.contains(&"pytest".to_string()));
        assert!(goals.contains(&"sql-benchmark".to_string()));
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/ws/some-run")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = test_router();
        let req = Request::builder()
            .uri("/nothing/here")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_file_checkpoints_selected_by_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServerSettings {
            checkpoint_dir: Some(dir.path().join("checkpoints")),
            ..ServerSettings::default()
        };
        build_orchestrator(&settings, Arc::new(ScriptedProvider::new())).unwrap();
        assert!(dir.path().join("checkpoints").is_dir());
    }
}
