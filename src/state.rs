/// Session State: the single process-wide typed record every engine reads
/// and mutates through. Write ownership is handed to exactly one background
/// task per phase (Entry Monitor, then Position Monitor); Telemetry reads
/// tolerate torn reads since every field here is lock-guarded individually.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::eligibility::EligibilityResult;
use crate::types::{CurrentStep, EngineStatus, PositionTracker, RunId, TradingConfig};

pub struct SessionState {
    pub config: RwLock<TradingConfig>,
    pub engine_status: RwLock<EngineStatus>,
    pub current_step: RwLock<Option<CurrentStep>>,
    pub run_id: RwLock<Option<RunId>>,
    pub is_running: RwLock<bool>,
    pub session_start_time: RwLock<Option<DateTime<Utc>>>,
    pub classification: RwLock<Option<Arc<EligibilityResult>>>,
    pub watchlist_last_updated: RwLock<Option<DateTime<Utc>>>,
    pub last_eligibility_check: RwLock<Option<DateTime<Utc>>>,
    pub position: RwLock<Option<PositionTracker>>,
    pub order_placed: RwLock<bool>,
    pub logged_in: RwLock<bool>,
    pub user_name: RwLock<Option<String>>,
}

/// The `/status` telemetry feed shape (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub logged_in: bool,
    pub user_name: Option<String>,
    pub is_running: bool,
    pub engine_status: EngineStatus,
    pub current_step: Option<CurrentStep>,
    pub order_placed: bool,
    pub positions: Option<PositionTracker>,
    pub run_id: Option<RunId>,
    pub eligible_stocks_count: usize,
    pub remaining_seconds: Option<i64>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            config: RwLock::new(TradingConfig::default()),
            engine_status: RwLock::new(EngineStatus::Idle),
            current_step: RwLock::new(None),
            run_id: RwLock::new(None),
            is_running: RwLock::new(false),
            session_start_time: RwLock::new(None),
            classification: RwLock::new(None),
            watchlist_last_updated: RwLock::new(None),
            last_eligibility_check: RwLock::new(None),
            position: RwLock::new(None),
            order_placed: RwLock::new(false),
            logged_in: RwLock::new(false),
            user_name: RwLock::new(None),
        }
    }

    /// Clears every run-scoped field back to its process-start default.
    /// Idempotent (R2): calling this twice in a row is equivalent to once.
    /// `config`, `logged_in`, and `user_name` are session-scoped, not
    /// run-scoped, and survive a reset.
    pub async fn reset_state(&self) {
        *self.engine_status.write().await = EngineStatus::Idle;
        *self.current_step.write().await = None;
        *self.run_id.write().await = None;
        *self.is_running.write().await = false;
        *self.session_start_time.write().await = None;
        *self.position.write().await = None;
        *self.order_placed.write().await = false;
    }

    pub async fn mark_watchlist_changed(&self) {
        *self.watchlist_last_updated.write().await = Some(Utc::now());
    }

    /// `true` if the cached classification should be reused: not forced, and
    /// the watchlist has not been touched since the cached run completed.
    pub async fn eligibility_cache_valid(&self, force: bool) -> bool {
        if force {
            return false;
        }
        let Some(checked_at) = *self.last_eligibility_check.read().await else {
            return false;
        };
        match *self.watchlist_last_updated.read().await {
            Some(changed_at) => changed_at <= checked_at,
            None => true,
        }
    }

    pub async fn set_classification(&self, result: Arc<EligibilityResult>) {
        *self.classification.write().await = Some(result);
        *self.last_eligibility_check.write().await = Some(Utc::now());
    }

    pub async fn eligible_count(&self) -> usize {
        match self.classification.read().await.as_ref() {
            Some(result) => result.eligible.len(),
            None => 0,
        }
    }

    /// `true` only if `run_id` still equals `captured`, matching I3: a
    /// background task must stop mutating state the moment this goes false.
    pub async fn run_id_matches(&self, captured: RunId) -> bool {
        *self.run_id.read().await == Some(captured)
    }

    pub async fn is_active(&self, captured: RunId) -> bool {
        *self.is_running.read().await && self.run_id_matches(captured).await
    }

    pub async fn begin_run(&self) -> RunId {
        let run_id = uuid::Uuid::new_v4();
        *self.run_id.write().await = Some(run_id);
        *self.is_running.write().await = true;
        *self.session_start_time.write().await = Some(Utc::now());
        *self.engine_status.write().await = EngineStatus::Starting;
        run_id
    }

    pub async fn remaining_seconds(&self, session_max_seconds: i64) -> Option<i64> {
        let start = (*self.session_start_time.read().await)?;
        let elapsed = (Utc::now() - start).num_seconds();
        Some((session_max_seconds - elapsed).max(0))
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let config = self.config.read().await.clone();
        StatusSnapshot {
            logged_in: *self.logged_in.read().await,
            user_name: self.user_name.read().await.clone(),
            is_running: *self.is_running.read().await,
            engine_status: *self.engine_status.read().await,
            current_step: *self.current_step.read().await,
            order_placed: *self.order_placed.read().await,
            positions: self.position.read().await.clone(),
            run_id: *self.run_id.read().await,
            eligible_stocks_count: self.eligible_count().await,
            remaining_seconds: self.remaining_seconds(config.session_max_seconds).await,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_state_twice_is_equivalent_to_once() {
        let state = SessionState::new();
        state.begin_run().await;
        *state.order_placed.write().await = true;

        state.reset_state().await;
        let after_first = state.snapshot().await;

        state.reset_state().await;
        let after_second = state.snapshot().await;

        assert_eq!(after_first.is_running, after_second.is_running);
        assert_eq!(after_first.run_id, after_second.run_id);
        assert_eq!(after_first.order_placed, after_second.order_placed);
        assert!(!after_second.is_running);
        assert!(after_second.run_id.is_none());
    }

    #[tokio::test]
    async fn stale_run_id_no_longer_matches_after_new_run() {
        let state = SessionState::new();
        let first = state.begin_run().await;
        let second = state.begin_run().await;

        assert!(!state.run_id_matches(first).await);
        assert!(state.run_id_matches(second).await);
    }
}
