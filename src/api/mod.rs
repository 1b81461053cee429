/// Control Surface (§10.6): the HTTP/WebSocket boundary through which an
/// operator drives the engine. Mounted as one `axum` router; everything
/// mutating goes through the Run Controller / Session State, never around
/// them.
pub mod auth;
pub mod rest;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::broker::BrokerClient;
use crate::eligibility::EligibilityEngine;
use crate::error::{EngineError, Result};
use crate::notify::NotificationSink;
use crate::run_controller::RunController;
use crate::state::SessionState;
use crate::telemetry::Telemetry;
use crate::tick_session::FeedCredentials;
use crate::types::ProcessConfig;
use crate::watchlist::WatchlistStore;

/// Every mutating endpoint returns `{success, ...}` or `{success:false,
/// error, code}` (§6, §7) — implemented once here so every handler gets it
/// for free via `?`.
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.error_code(),
        }));
        (status, body).into_response()
    }
}

pub use rest::router;

/// A single operator account, loaded once at startup from
/// `user_credentials_file`. Login compares the submitted password against
/// this value; there is exactly one account per deployment (§1 scope).
#[derive(Debug, Clone, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl UserCredentials {
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub struct AppState {
    pub session_state: Arc<SessionState>,
    pub watchlist: Arc<WatchlistStore>,
    pub run_controller: Arc<RunController>,
    pub eligibility: Arc<EligibilityEngine>,
    pub broker: Arc<dyn BrokerClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub telemetry: Arc<Telemetry>,
    pub feed_credentials: FeedCredentials,
    pub credentials: UserCredentials,
    /// Minted at login, cleared at logout; the bearer token every
    /// authenticated request is checked against (§10.6).
    pub session_token: RwLock<Option<String>>,
    pub log_path: PathBuf,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    pub fn new(
        session_state: Arc<SessionState>,
        watchlist: Arc<WatchlistStore>,
        run_controller: Arc<RunController>,
        eligibility: Arc<EligibilityEngine>,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<dyn NotificationSink>,
        telemetry: Arc<Telemetry>,
        feed_credentials: FeedCredentials,
        credentials: UserCredentials,
        log_path: PathBuf,
    ) -> Self {
        AppState {
            session_state,
            watchlist,
            run_controller,
            eligibility,
            broker,
            notifier,
            telemetry,
            feed_credentials,
            credentials,
            session_token: RwLock::new(None),
            log_path,
        }
    }
}

/// CORS allow-list source; kept separate from `AppState` since it's consumed
/// once at router-build time, not per-request.
pub struct CorsConfig {
    pub frontend_origins: Vec<String>,
}

impl From<&ProcessConfig> for CorsConfig {
    fn from(config: &ProcessConfig) -> Self {
        CorsConfig {
            frontend_origins: config.frontend_origins.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_maps_to_http_401() {
        let response = EngineError::NotAuthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn invalid_request_maps_to_http_400() {
        let response = EngineError::InvalidRequest("bad field".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_maps_to_http_500() {
        let response = EngineError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
