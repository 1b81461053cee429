/// Run Controller: owns the start/stop lifecycle for the whole engine and
/// the hand-off between the Entry Monitor and Position Monitor background
/// tasks, generating a fresh run identity at every start (I3).
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::broker::BrokerClient;
use crate::candle::CandleAggregator;
use crate::eligibility::EligibilityEngine;
use crate::entry_monitor::{EntryMonitor, MonitorOutcome};
use crate::error::{EngineError, Result};
use crate::notify::NotificationSink;
use crate::position_monitor::{ExitReason, PositionMonitor};
use crate::state::SessionState;
use crate::tick_session::{FeedCredentials, TickSession};
use crate::time::get_market_timings;
use crate::types::{EngineStatus, PositionTracker, RunId, Side};

pub struct RunController {
    state: Arc<SessionState>,
    tick_session: Arc<TickSession>,
    eligibility: Arc<EligibilityEngine>,
    broker: Arc<dyn BrokerClient>,
    notifier: Arc<dyn NotificationSink>,
    feed_credentials: FeedCredentials,
}

impl RunController {
    pub fn new(
        state: Arc<SessionState>,
        tick_session: Arc<TickSession>,
        eligibility: Arc<EligibilityEngine>,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<dyn NotificationSink>,
        feed_credentials: FeedCredentials,
    ) -> Self {
        RunController {
            state,
            tick_session,
            eligibility,
            broker,
            notifier,
            feed_credentials,
        }
    }

    /// Starts a new run (§4.8). Rejects if a run is already in progress. If
    /// the broker reports an open position, resumes straight into the
    /// Position Monitor without re-running eligibility; otherwise runs
    /// eligibility and hands off to the Entry Monitor.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if *self.state.is_running.read().await {
            return Err(EngineError::EngineAlreadyRunning);
        }
        let status = *self.state.engine_status.read().await;
        if matches!(status, EngineStatus::Starting | EngineStatus::Running) {
            return Err(EngineError::EngineAlreadyRunning);
        }

        self.broker.ensure_session().await?;

        let open_positions = self.broker.positions().await?;
        let existing = open_positions.into_iter().find(|p| p.quantity != 0);

        if let Some(broker_position) = existing {
            info!(symbol = %broker_position.tradingsymbol, "resuming into an already-open broker position");
            let config = self.state.config.read().await.clone();
            let side = if broker_position.quantity < 0 { Side::Sell } else { Side::Buy };
            let quantity = broker_position.quantity.unsigned_abs() as i64;
            let target = broker_position.average_price * (1.0 + side.sign() * config.target_percent);

            // The watchlist reference high isn't recoverable for a resumed
            // position; best-effort fall back to the entry price itself
            // (recorded as an open design decision).
            let position = PositionTracker {
                symbol: broker_position.tradingsymbol,
                token: broker_position.instrument_token,
                side,
                quantity,
                average_price: broker_position.average_price,
                target,
                stop_loss: broker_position.average_price,
                qty_remaining: quantity,
                closed: false,
            };

            self.tick_session.reset(self.feed_credentials.clone()).await?;
            let run_id = self.state.begin_run().await;
            *self.state.position.write().await = Some(position.clone());
            *self.state.order_placed.write().await = true;

            self.spawn_position_monitor(position, run_id);
            return Ok(());
        }

        let today = Utc::now().with_timezone(&chrono_tz::Asia::Kolkata).date_naive();
        let result = self.eligibility.run_once(today, self.feed_credentials.clone()).await?;

        if result.eligible.is_empty() {
            return Err(EngineError::NoEligibleStocks);
        }

        let result = Arc::new(result);
        self.state.set_classification(result.clone()).await;

        self.tick_session.reset(self.feed_credentials.clone()).await?;
        let run_id = self.state.begin_run().await;

        self.spawn_entry_monitor(result.eligible.clone(), run_id);
        Ok(())
    }

    /// Stops the current run (§4.8). Background tasks notice via
    /// `run_id`/`is_running` and exit on their next poll (I3); this method
    /// itself tears the feed down immediately rather than waiting for them.
    pub async fn stop(&self) -> Result<()> {
        *self.state.engine_status.write().await = EngineStatus::Stopping;
        *self.state.is_running.write().await = false;
        self.tick_session.stop().await?;
        *self.state.run_id.write().await = None;
        *self.state.session_start_time.write().await = None;
        *self.state.engine_status.write().await = EngineStatus::Idle;
        Ok(())
    }

    fn spawn_entry_monitor(self: &Arc<Self>, eligible: Vec<crate::eligibility::ClassifiedRow>, run_id: RunId) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let monitor = EntryMonitor::new(
                Arc::clone(&controller.state),
                Arc::clone(&controller.tick_session),
                Arc::clone(&controller.broker),
                Arc::clone(&controller.notifier),
            );

            match monitor.run(eligible, run_id).await {
                Ok(MonitorOutcome::OrderPlaced(position)) => {
                    controller.spawn_position_monitor(position, run_id);
                }
                Ok(MonitorOutcome::Timeout) => {
                    warn!("entry monitor timed out with no order placed");
                    *controller.state.engine_status.write().await = EngineStatus::Timeout;
                    *controller.state.is_running.write().await = false;
                }
                Ok(MonitorOutcome::ManualStop) | Ok(MonitorOutcome::Zombie) => {}
                Err(e) => {
                    error!(error = %e, "entry monitor exited with error");
                    controller.state.reset_state().await;
                }
            }
        });
    }

    fn spawn_position_monitor(self: &Arc<Self>, position: PositionTracker, run_id: RunId) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let config = controller.state.config.read().await.clone();
            let market_open = get_market_timings(Utc::now()).0;
            let candles = CandleAggregator::new(market_open, config.candle_interval_minutes);

            let monitor = PositionMonitor::new(
                Arc::clone(&controller.state),
                Arc::clone(&controller.tick_session),
                candles,
                Arc::clone(&controller.broker),
                Arc::clone(&controller.notifier),
            );

            match monitor.run(position, run_id).await {
                Ok(ExitReason::Zombie) => {}
                Ok(reason) => {
                    info!(?reason, "position monitor exited");
                }
                Err(e) => {
                    error!(error = %e, "position monitor exited with error");
                    controller.state.reset_state().await;
                    let _ = controller.tick_session.stop().await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTradingBroker;
    use crate::notify::NoopSink;
    use crate::watchlist::WatchlistStore;

    fn credentials() -> FeedCredentials {
        FeedCredentials {
            api_key: "key".to_string(),
            session_token: "token".to_string(),
            user_id: "user".to_string(),
        }
    }

    struct ScratchDir(std::path::PathBuf);

    impl ScratchDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("run-controller-test-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            ScratchDir(path)
        }

        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[tokio::test]
    async fn start_rejects_when_already_running() {
        let dir = ScratchDir::new();
        let state = Arc::new(SessionState::new());
        state.begin_run().await;

        let tick_session = Arc::new(TickSession::new());
        let watchlist = Arc::new(WatchlistStore::new(dir.path().join("watchlist.csv")));
        let eligibility = Arc::new(EligibilityEngine::new(
            watchlist,
            Arc::clone(&tick_session),
            dir.path().join("snapshot.json"),
        ));
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperTradingBroker::new(100_000.0, 0.0));
        let notifier: Arc<dyn NotificationSink> = Arc::new(NoopSink);

        let controller = Arc::new(RunController::new(
            state,
            tick_session,
            eligibility,
            broker,
            notifier,
            credentials(),
        ));

        let result = controller.start().await;
        assert!(matches!(result, Err(EngineError::EngineAlreadyRunning)));
    }

    #[tokio::test]
    async fn stop_clears_run_identity_and_status() {
        let dir = ScratchDir::new();
        let state = Arc::new(SessionState::new());
        state.begin_run().await;

        let tick_session = Arc::new(TickSession::new());
        let watchlist = Arc::new(WatchlistStore::new(dir.path().join("watchlist.csv")));
        let eligibility = Arc::new(EligibilityEngine::new(
            watchlist,
            Arc::clone(&tick_session),
            dir.path().join("snapshot.json"),
        ));
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperTradingBroker::new(100_000.0, 0.0));
        let notifier: Arc<dyn NotificationSink> = Arc::new(NoopSink);

        let controller = RunController::new(state.clone(), tick_session, eligibility, broker, notifier, credentials());

        controller.stop().await.unwrap();

        assert!(!*state.is_running.read().await);
        assert!(state.run_id.read().await.is_none());
        assert_eq!(*state.engine_status.read().await, EngineStatus::Idle);
    }
}
