//! HTTP surface: the voice WebSocket endpoint and a health check.

pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::TokenVerifier;
use crate::config::ParleyConfig;
use crate::error::Result;
use crate::pipeline::Collaborators;
use crate::pipeline::run::Pipeline;
use crate::session::{SessionRegistry, SessionStore};
use crate::stt::Transcriber;

/// State shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ParleyConfig>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub transcriber: Arc<dyn Transcriber>,
    pub collaborators: Collaborators,
    pub pipeline: Pipeline,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        config: ParleyConfig,
        verifier: Arc<dyn TokenVerifier>,
        transcriber: Arc<dyn Transcriber>,
        collaborators: Collaborators,
    ) -> Self {
        let pipeline = Pipeline::new(&collaborators, &config.pipeline);
        let sessions = Arc::new(SessionStore::new(config.pipeline.history_limit));
        Self {
            config: Arc::new(config),
            verifier,
            transcriber,
            collaborators,
            pipeline,
            sessions,
            registry: SessionRegistry::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let path = state.config.server.path.clone();
    Router::new()
        .route("/health", get(health))
        .route(&path, get(ws::voice_socket))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let local_addr = listener.local_addr()?;
    let path = state.config.server.path.clone();
    info!("voice endpoint listening on ws://{local_addr}{path}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}
