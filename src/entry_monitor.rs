/// Entry Monitor: long-running loop that tracks eligible symbols against
/// their reference highs and fires exactly one entry order.
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::eligibility::ClassifiedRow;
use crate::error::Result;
use crate::notify::NotificationSink;
use crate::state::SessionState;
use crate::tick_session::TickSession;
use crate::types::{CurrentStep, EngineStatus, PositionTracker, RunId, Side, TradingConfig};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Clamp applied after the 5x leverage factor and before the odd-round-up.
const MARGIN_RESERVE: f64 = 500.0;
const LEVERAGE_FACTOR: f64 = 5.0;

/// Quantity rule (§4.5): clamp available cash to `max_margin`, subtract a
/// fixed reserve, apply the leverage factor, floor-divide by price, floor at
/// 1, then force odd by bitwise-or with 1. Shared with the telemetry feed's
/// `quantity_if_ordered` preview.
pub fn compute_quantity(available_cash: f64, max_margin: f64, last_price: f64) -> i64 {
    let capital = (available_cash.min(max_margin) - MARGIN_RESERVE).max(0.0);
    let raw_qty = ((capital * LEVERAGE_FACTOR) / last_price).floor() as i64;
    raw_qty.max(1) | 1
}

#[derive(Debug)]
pub enum MonitorOutcome {
    OrderPlaced(PositionTracker),
    Timeout,
    ManualStop,
    /// `run_id` no longer matches: a stale task from a superseded run.
    /// Per I3, it must exit without touching state further.
    Zombie,
}

pub struct EntryMonitor {
    state: Arc<SessionState>,
    tick_session: Arc<TickSession>,
    broker: Arc<dyn BrokerClient>,
    notifier: Arc<dyn NotificationSink>,
}

impl EntryMonitor {
    pub fn new(
        state: Arc<SessionState>,
        tick_session: Arc<TickSession>,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        EntryMonitor {
            state,
            tick_session,
            broker,
            notifier,
        }
    }

    /// Subscribes eligible tokens and polls at 1 Hz until an order fires or
    /// a terminal condition (§4.5 Termination) is reached. Eligible rows are
    /// scanned in insertion order each tick; first trigger wins.
    pub async fn run(&self, eligible: Vec<ClassifiedRow>, run_id: RunId) -> Result<MonitorOutcome> {
        let tokens: Vec<i64> = eligible.iter().map(|r| r.instrument_token).collect();
        self.tick_session.subscribe(&tokens).await?;

        *self.state.current_step.write().await = Some(CurrentStep::OrderMonitoringStarted);
        *self.state.engine_status.write().await = EngineStatus::Running;

        loop {
            if !self.state.run_id_matches(run_id).await {
                return Ok(MonitorOutcome::Zombie);
            }
            if !*self.state.is_running.read().await {
                return Ok(MonitorOutcome::ManualStop);
            }

            let config = self.config_snapshot().await;
            if let Some(remaining) = self.state.remaining_seconds(config.session_max_seconds).await {
                if remaining <= 0 {
                    return Ok(MonitorOutcome::Timeout);
                }
            }

            for row in &eligible {
                let Some(tick) = self.tick_session.get(row.instrument_token).await else {
                    continue;
                };
                let Some(last_price) = tick.last_price else {
                    continue;
                };

                if last_price >= row.high {
                    return self.fire_entry(row, last_price, &config).await.map(MonitorOutcome::OrderPlaced);
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn config_snapshot(&self) -> TradingConfig {
        self.state.config.read().await.clone()
    }

    async fn fire_entry(
        &self,
        row: &ClassifiedRow,
        last_price: f64,
        config: &TradingConfig,
    ) -> Result<PositionTracker> {
        let margins = self.broker.margins().await?;
        let quantity = compute_quantity(margins.available_cash, config.max_margin, last_price);

        let order_result = self
            .broker
            .place_order(
                "NORMAL",
                "NSE",
                &row.symbol,
                row.instrument_token,
                Side::Sell,
                quantity,
                "INTRADAY",
                "MARKET",
                "DAY",
                "entry",
            )
            .await;

        let order_id = match order_result {
            Ok(id) => id,
            Err(e) => {
                warn!(symbol = %row.symbol, error = %e, "entry order submission failed");
                self.notifier
                    .send_text(&format!("entry order failed for {}: {}", row.symbol, e))
                    .await;
                return Err(e);
            }
        };

        info!(order_id = %order_id, symbol = %row.symbol, quantity, last_price, "entry order placed");

        let target = last_price * (1.0 + Side::Sell.sign() * config.target_percent);
        let position = PositionTracker {
            symbol: row.symbol.clone(),
            token: row.instrument_token,
            side: Side::Sell,
            quantity,
            average_price: last_price,
            target,
            stop_loss: row.high,
            qty_remaining: quantity,
            closed: false,
        };

        *self.state.position.write().await = Some(position.clone());
        *self.state.order_placed.write().await = true;
        *self.state.current_step.write().await = Some(CurrentStep::OrderPlaced);

        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTradingBroker;
    use crate::notify::NoopSink;

    fn row() -> ClassifiedRow {
        ClassifiedRow {
            symbol: "RELI".to_string(),
            instrument_token: 100,
            high: 100.0,
            low: 90.0,
            open: 85.0,
            last: 95.0,
            percent: Some(5.26),
            reason: None,
        }
    }

    #[tokio::test]
    async fn fire_entry_places_sell_order_with_odd_quantity() {
        let state = Arc::new(SessionState::new());
        let tick_session = Arc::new(TickSession::new());
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperTradingBroker::new(100_000.0, 0.0));
        let notifier: Arc<dyn NotificationSink> = Arc::new(NoopSink);

        let monitor = EntryMonitor::new(state.clone(), tick_session, broker, notifier);
        let config = TradingConfig::default();

        let position = monitor.fire_entry(&row(), 101.0, &config).await.unwrap();

        assert_eq!(position.side, Side::Sell);
        assert_eq!(position.quantity % 2, 1, "quantity must be forced odd");
        assert!(*state.order_placed.read().await);
        assert!(position.target < position.average_price, "SELL target sits below entry");
    }
}
