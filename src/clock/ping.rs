//! Externally driven clock: each authenticated HTTP ping is one tick.
//!
//! ## Endpoints
//!
//! - `POST /clock/tick`: requires `Authorization: Bearer <token>`
//! - `GET /health`: liveness check, unauthenticated

use super::{EmitError, TimePassed, emit};
use crate::config::ClockConfig;
use crate::error::{Result, SyncError};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct PingState {
    ticks: mpsc::Sender<TimePassed>,
    token: Arc<str>,
}

/// HTTP server turning pings into ticks.
pub struct PingClock {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl PingClock {
    /// Bind `{listen_host}:{listen_port}` and serve in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] when no ping token is configured and
    /// [`SyncError::Clock`] when the listener cannot bind.
    pub async fn start(config: &ClockConfig, ticks: mpsc::Sender<TimePassed>) -> Result<Self> {
        let token = config.resolved_ping_token().ok_or_else(|| {
            SyncError::Config("ping clock refuses to start without a token".to_owned())
        })?;

        let state = PingState {
            ticks,
            token: Arc::from(token),
        };
        let app = Router::new()
            .route("/health", get(health))
            .route("/clock/tick", post(tick))
            .with_state(state);

        let bind_addr = format!("{}:{}", config.listen_host, config.listen_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::Clock(format!("ping clock bind to {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SyncError::Clock(format!("failed to get local addr: {e}")))?;

        info!("ping clock listening on http://{addr}");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("ping clock server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    /// Returns the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for PingClock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn bearer_is_valid(headers: &HeaderMap, expected: &str) -> bool {
    let candidate = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .trim();
    if expected.is_empty() || candidate.len() != expected.len() {
        return false;
    }
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn tick(State(state): State<PingState>, headers: HeaderMap) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.token) {
        warn!("rejected clock ping with missing or invalid token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        );
    }

    let tick = TimePassed { time: Utc::now() };
    match emit(&state.ticks, tick) {
        Ok(()) => {
            debug!(time = %tick.time, "clock ping accepted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "time": tick.time })),
            )
        }
        Err(EmitError::Full) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "tick dropped, consumer is behind" })),
        ),
        Err(EmitError::Closed) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "clock consumer stopped" })),
        ),
    }
}
