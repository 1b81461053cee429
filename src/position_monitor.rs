/// Position Monitor: post-entry loop that aggregates ticks into fixed-period
/// candles, evaluates candle-close stop-loss, live-price target-take, and
/// the end-of-day square-off cutoff.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Asia::Kolkata;
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::candle::CandleAggregator;
use crate::error::Result;
use crate::notify::NotificationSink;
use crate::state::SessionState;
use crate::tick_session::TickSession;
use crate::types::{CurrentStep, EngineStatus, PositionTracker, RunId, Side, TradingConfig};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq)]
pub enum ExitReason {
    TargetHit,
    StopLossTriggered,
    AutoSquareOff,
    ManualStop,
    Zombie,
}

pub struct PositionMonitor {
    state: Arc<SessionState>,
    tick_session: Arc<TickSession>,
    candles: CandleAggregator,
    broker: Arc<dyn BrokerClient>,
    notifier: Arc<dyn NotificationSink>,
}

impl PositionMonitor {
    pub fn new(
        state: Arc<SessionState>,
        tick_session: Arc<TickSession>,
        candles: CandleAggregator,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        PositionMonitor {
            state,
            tick_session,
            candles,
            broker,
            notifier,
        }
    }

    pub async fn run(&self, mut position: PositionTracker, run_id: RunId) -> Result<ExitReason> {
        self.tick_session.subscribe(&[position.token]).await?;
        *self.state.current_step.write().await = Some(CurrentStep::PositionMonitoringStarted);
        *self.state.engine_status.write().await = EngineStatus::Running;

        loop {
            if !self.state.run_id_matches(run_id).await {
                return Ok(ExitReason::Zombie);
            }
            if !*self.state.is_running.read().await {
                return self.teardown(ExitReason::ManualStop).await;
            }

            let config = self.state.config.read().await.clone();
            let now = Utc::now();

            let Some(tick) = self.tick_session.get(position.token).await else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };
            let Some(last_price) = tick.last_price else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };

            self.candles.add_tick(position.token, last_price, now).await;
            let closed_candle = self.candles.tick_and_maybe_emit(position.token, now).await;

            // (c) stop-loss strictly precedes (d) target, per iteration.
            if let Some(candle) = &closed_candle {
                if self.stop_loss_tripped(&position, candle.close) {
                    if let Err(e) = self.close_position(&mut position).await {
                        self.teardown(ExitReason::StopLossTriggered).await?;
                        return Err(e);
                    }
                    return self.teardown(ExitReason::StopLossTriggered).await;
                }
            }

            if self.target_tripped(&position, last_price) {
                if let Err(e) = self.close_position(&mut position).await {
                    self.teardown(ExitReason::TargetHit).await?;
                    return Err(e);
                }
                return self.teardown(ExitReason::TargetHit).await;
            }

            if self.past_squareoff(now, &config) {
                if let Err(e) = self.close_position(&mut position).await {
                    self.teardown(ExitReason::AutoSquareOff).await?;
                    return Err(e);
                }
                return self.teardown(ExitReason::AutoSquareOff).await;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn stop_loss_tripped(&self, position: &PositionTracker, close: f64) -> bool {
        match position.side {
            Side::Sell => close > position.stop_loss,
            Side::Buy => close < position.stop_loss,
        }
    }

    fn target_tripped(&self, position: &PositionTracker, last_price: f64) -> bool {
        match position.side {
            Side::Buy => last_price >= position.target,
            Side::Sell => last_price <= position.target,
        }
    }

    fn past_squareoff(&self, now: chrono::DateTime<Utc>, config: &TradingConfig) -> bool {
        now.with_timezone(&Kolkata).time() >= config.squareoff_time
    }

    /// Re-queries remaining quantity from the broker (source of truth) and
    /// submits an opposite-side market order to flatten.
    async fn close_position(&self, position: &mut PositionTracker) -> Result<()> {
        let remaining = self
            .broker
            .positions()
            .await?
            .into_iter()
            .find(|p| p.instrument_token == position.token)
            .map(|p| p.quantity.unsigned_abs() as i64)
            .unwrap_or(position.qty_remaining);

        if remaining == 0 {
            position.closed = true;
            return Ok(());
        }

        let exit_result = self
            .broker
            .place_order(
                "NORMAL",
                "NSE",
                &position.symbol,
                position.token,
                position.side.opposite(),
                remaining,
                "INTRADAY",
                "MARKET",
                "DAY",
                "exit",
            )
            .await;

        match exit_result {
            Ok(order_id) => {
                info!(order_id = %order_id, symbol = %position.symbol, remaining, "exit order placed");
            }
            Err(e) => {
                // Per the error-handling design: a failed exit does not
                // close the position — it must be reconciled by an operator.
                warn!(symbol = %position.symbol, error = %e, "exit order submission failed");
                self.notifier
                    .send_text(&format!("EXIT ORDER FAILED for {}: {} — manual reconciliation required", position.symbol, e))
                    .await;
                return Err(e);
            }
        }

        position.qty_remaining = 0;
        position.closed = true;
        Ok(())
    }

    async fn teardown(&self, reason: ExitReason) -> Result<ExitReason> {
        let step = match reason {
            ExitReason::TargetHit => CurrentStep::TargetHit,
            ExitReason::StopLossTriggered => CurrentStep::StopLossTriggered,
            ExitReason::AutoSquareOff => CurrentStep::AutoSquareOff,
            ExitReason::ManualStop => CurrentStep::ManualStop,
            ExitReason::Zombie => return Ok(reason),
        };
        *self.state.current_step.write().await = Some(step);
        if let Some(position) = self.state.position.write().await.as_mut() {
            position.closed = true;
        }
        *self.state.is_running.write().await = false;
        *self.state.engine_status.write().await = EngineStatus::Idle;
        self.tick_session.stop().await?;
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTradingBroker;
    use crate::notify::NoopSink;

    fn position() -> PositionTracker {
        PositionTracker {
            symbol: "RELI".to_string(),
            token: 100,
            side: Side::Sell,
            quantity: 10,
            average_price: 100.0,
            target: 99.0,
            stop_loss: 100.0,
            qty_remaining: 10,
            closed: false,
        }
    }

    fn monitor() -> PositionMonitor {
        let state = Arc::new(SessionState::new());
        let tick_session = Arc::new(TickSession::new());
        let candles = CandleAggregator::new(Utc::now(), 15);
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperTradingBroker::new(100_000.0, 0.0));
        let notifier: Arc<dyn NotificationSink> = Arc::new(NoopSink);
        PositionMonitor::new(state, tick_session, candles, broker, notifier)
    }

    #[test]
    fn sell_stop_loss_trips_on_close_above_reference_high() {
        let m = monitor();
        assert!(m.stop_loss_tripped(&position(), 100.5));
        assert!(!m.stop_loss_tripped(&position(), 99.9));
    }

    #[test]
    fn sell_target_trips_when_price_falls_to_or_below_target() {
        let m = monitor();
        assert!(m.target_tripped(&position(), 99.0));
        assert!(m.target_tripped(&position(), 98.5));
        assert!(!m.target_tripped(&position(), 99.5));
    }

    #[tokio::test]
    async fn close_position_marks_closed_and_zeroes_remaining() {
        let m = monitor();
        let mut pos = position();
        m.close_position(&mut pos).await.unwrap();
        assert!(pos.closed);
        assert_eq!(pos.qty_remaining, 0);
    }
}
