/// REST endpoints (§6): login/session, eligibility check, start/stop
/// trading, trading-config, diagnostic state, account details, watchlist
/// CRUD, and log access. Mounted under one versioned prefix with a
/// permissive-by-allow-list CORS layer.
use std::sync::Arc;

use axum::extract::{Json, Query, State};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::api::{AppState, CorsConfig};
use crate::error::{EngineError, Result};
use crate::types::WatchlistRow;

const PREFIX: &str = "/api/v1";

pub fn router(state: Arc<AppState>, cors: CorsConfig) -> Router {
    let origins: Vec<HeaderValue> = cors
        .frontend_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors_layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route(&format!("{PREFIX}/login"), post(login))
        .route(&format!("{PREFIX}/logout"), post(logout))
        .route(&format!("{PREFIX}/session"), get(check_session))
        .route(&format!("{PREFIX}/eligibility/check"), post(check_eligibility))
        .route(&format!("{PREFIX}/trading/start"), post(start_trading))
        .route(&format!("{PREFIX}/trading/stop"), post(stop_trading))
        .route(&format!("{PREFIX}/state/reset"), post(reset_state))
        .route(
            &format!("{PREFIX}/trading-config"),
            get(get_trading_config).put(put_trading_config),
        )
        .route(&format!("{PREFIX}/state"), get(state_snapshot))
        .route(&format!("{PREFIX}/account"), get(account_details))
        .route(
            &format!("{PREFIX}/watchlist"),
            get(list_watchlist)
                .post(add_watchlist_row)
                .put(update_watchlist_row)
                .delete(delete_watchlist_row),
        )
        .route(&format!("{PREFIX}/logs"), get(logs_tail).delete(logs_clear))
        .route(&format!("{PREFIX}/logs/download"), get(logs_download))
        .route(&format!("{PREFIX}/logs/stats"), get(logs_stats))
        .route(&format!("{PREFIX}/price"), get(crate::api::ws::price_handler))
        .route(&format!("{PREFIX}/status"), get(crate::api::ws::status_handler))
        .layer(cors_layer)
        .with_state(state)
}

fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Result<Json<serde_json::Value>> {
    if req.username != state.credentials.username || req.password != state.credentials.password {
        warn!(username = %req.username, "login failed: bad credentials");
        return Err(EngineError::NotAuthenticated);
    }

    state.broker.ensure_session().await?;

    let token = uuid::Uuid::new_v4().to_string();
    *state.session_token.write().await = Some(token.clone());
    *state.session_state.logged_in.write().await = true;
    *state.session_state.user_name.write().await = Some(req.username.clone());

    info!(username = %req.username, "login succeeded");
    Ok(ok(serde_json::json!({ "token": token, "user_name": req.username })))
}

async fn logout(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    state.run_controller.stop().await.ok();
    state.session_state.reset_state().await;
    *state.session_token.write().await = None;
    *state.session_state.logged_in.write().await = false;
    *state.session_state.user_name.write().await = None;
    Ok(ok(serde_json::json!({})))
}

async fn check_session(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let logged_in = *state.session_state.logged_in.read().await;
    let user_name = state.session_state.user_name.read().await.clone();
    ok(serde_json::json!({ "logged_in": logged_in, "user_name": user_name }))
}

#[derive(Debug, Deserialize, Default)]
struct EligibilityCheckRequest {
    #[serde(default)]
    force: bool,
}

async fn check_eligibility(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<EligibilityCheckRequest>,
) -> Result<Json<serde_json::Value>> {
    let force = query.force;

    if state.session_state.eligibility_cache_valid(force).await {
        if let Some(cached) = state.session_state.classification.read().await.clone() {
            return Ok(ok(cached));
        }
    }

    let today = chrono::Utc::now().with_timezone(&chrono_tz::Asia::Kolkata).date_naive();
    let result = state.eligibility.run_once(today, state.feed_credentials.clone()).await?;
    let result = Arc::new(result);
    state.session_state.set_classification(result.clone()).await;
    Ok(ok(result))
}

async fn start_trading(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    Arc::clone(&state.run_controller).start().await?;
    Ok(ok(serde_json::json!({})))
}

async fn stop_trading(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    state.run_controller.stop().await?;
    Ok(ok(serde_json::json!({})))
}

async fn reset_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    state.session_state.reset_state().await;
    Ok(ok(serde_json::json!({})))
}

async fn get_trading_config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.session_state.config.read().await.clone();
    ok(config)
}

#[derive(Debug, Deserialize)]
struct TradingConfigUpdate {
    target_percent: f64,
    max_margin: f64,
    candle_interval_minutes: i64,
    squareoff_time: NaiveTime,
}

async fn put_trading_config(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<TradingConfigUpdate>,
) -> Result<Json<serde_json::Value>> {
    if update.target_percent <= 0.0 || update.target_percent > 1.0 {
        return Err(EngineError::InvalidRequest("target_percent must be in (0, 1]".to_string()));
    }
    if update.max_margin <= 0.0 {
        return Err(EngineError::InvalidRequest("max_margin must be positive".to_string()));
    }
    if update.candle_interval_minutes < 1 {
        return Err(EngineError::InvalidRequest("candle_interval_minutes must be >= 1".to_string()));
    }

    let mut config = state.session_state.config.write().await;
    config.target_percent = update.target_percent;
    config.max_margin = update.max_margin;
    config.candle_interval_minutes = update.candle_interval_minutes;
    config.squareoff_time = update.squareoff_time;
    let snapshot = config.clone();
    drop(config);

    Ok(ok(snapshot))
}

async fn state_snapshot(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    ok(state.session_state.snapshot().await)
}

async fn account_details(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let orders = state.broker.orders().await?;
    let positions = state.broker.positions().await?;
    let holdings = state.broker.holdings().await?;
    Ok(ok(serde_json::json!({ "orders": orders, "positions": positions, "holdings": holdings })))
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<NaiveDate>,
}

async fn list_watchlist(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> Result<Json<serde_json::Value>> {
    let rows = state.watchlist.list(query.date).await?;
    Ok(ok(rows))
}

async fn add_watchlist_row(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(row): Json<WatchlistRow>,
) -> Result<Json<serde_json::Value>> {
    state.watchlist.add(row).await?;
    state.session_state.mark_watchlist_changed().await;
    Ok(ok(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
struct WatchlistUpdateRequest {
    original_symbol: String,
    original_date: NaiveDate,
    row: WatchlistRow,
}

async fn update_watchlist_row(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<WatchlistUpdateRequest>,
) -> Result<Json<serde_json::Value>> {
    let updated = state
        .watchlist
        .update(&req.original_symbol, req.original_date, req.row)
        .await?;
    state.session_state.mark_watchlist_changed().await;
    Ok(ok(serde_json::json!({ "updated": updated })))
}

#[derive(Debug, Deserialize)]
struct WatchlistDeleteRequest {
    symbol: String,
    date: NaiveDate,
}

async fn delete_watchlist_row(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<WatchlistDeleteRequest>,
) -> Result<Json<serde_json::Value>> {
    let removed = state.watchlist.delete(&req.symbol, req.date).await?;
    state.session_state.mark_watchlist_changed().await;
    Ok(ok(serde_json::json!({ "removed": removed })))
}

async fn logs_tail(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let text = std::fs::read_to_string(&state.log_path).unwrap_or_default();
    let tail: Vec<&str> = text.lines().rev().take(200).collect();
    Ok(ok(serde_json::json!({ "lines": tail })))
}

async fn logs_download(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Vec<u8>> {
    Ok(std::fs::read(&state.log_path).unwrap_or_default())
}

async fn logs_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let text = std::fs::read_to_string(&state.log_path).unwrap_or_default();
    let size_bytes = text.len();
    let line_count = text.lines().count();
    Ok(ok(serde_json::json!({ "size_bytes": size_bytes, "line_count": line_count })))
}

async fn logs_clear(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    std::fs::write(&state.log_path, "")?;
    Ok(ok(serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_wraps_payload_under_success_true() {
        let Json(body) = ok(serde_json::json!({ "answer": 42 }));
        assert_eq!(body["success"], serde_json::json!(true));
        assert_eq!(body["data"]["answer"], serde_json::json!(42));
    }

    #[test]
    fn watchlist_update_request_round_trips_through_json() {
        let payload = serde_json::json!({
            "original_symbol": "TCS",
            "original_date": "2026-07-28",
            "row": { "symbol": "TCS", "instrument_token": 123, "high": 10.0, "low": 5.0, "date": "2026-07-28" },
        });
        let req: WatchlistUpdateRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(req.original_symbol, "TCS");
        assert_eq!(req.row.token, 123);
    }
}
