/// Telemetry Emitter: two periodic feeds pushed on separate logical
/// channels. Emission continues while at least one consumer is subscribed;
/// consumers join/leave via `subscribe_price`/`subscribe_status`.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::broker::BrokerClient;
use crate::eligibility::ClassifiedRow;
use crate::entry_monitor::compute_quantity;
use crate::state::{SessionState, StatusSnapshot};
use crate::tick_session::TickSession;
use crate::types::Side;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
    pub last_price: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub target_percent_remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibleSnapshot {
    pub symbol: String,
    pub last: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub change_percent: f64,
    pub quantity_if_ordered: i64,
    pub points_to_trigger: f64,
    pub percent_to_trigger: f64,
    pub time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum PriceFeedPayload {
    Position(PositionSnapshot),
    Eligible(Vec<EligibleSnapshot>),
}

pub struct Telemetry {
    state: Arc<SessionState>,
    tick_session: Arc<TickSession>,
    broker: Arc<dyn BrokerClient>,
    price_tx: broadcast::Sender<PriceFeedPayload>,
    status_tx: broadcast::Sender<StatusSnapshot>,
}

impl Telemetry {
    pub fn new(state: Arc<SessionState>, tick_session: Arc<TickSession>, broker: Arc<dyn BrokerClient>) -> Self {
        let (price_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Telemetry {
            state,
            tick_session,
            broker,
            price_tx,
            status_tx,
        }
    }

    pub fn subscribe_price(&self) -> broadcast::Receiver<PriceFeedPayload> {
        self.price_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Runs both 1 Hz feeds for the lifetime of the process, spawned once at
    /// startup regardless of whether a run is active. The eligible list is
    /// re-read from session state on every tick rather than fixed at spawn
    /// time, since classification only exists once a run has started.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;

            if self.price_tx.receiver_count() > 0 {
                let eligible = self
                    .state
                    .classification
                    .read()
                    .await
                    .as_ref()
                    .map(|c| c.eligible.clone())
                    .unwrap_or_default();
                let payload = self.build_price_payload(&eligible).await;
                let _ = self.price_tx.send(payload);
            }

            if self.status_tx.receiver_count() > 0 {
                let snapshot = self.state.snapshot().await;
                let _ = self.status_tx.send(snapshot);
            }
        }
    }

    async fn build_price_payload(&self, eligible: &[ClassifiedRow]) -> PriceFeedPayload {
        if let Some(position) = self.state.position.read().await.clone() {
            if position.side == Side::Sell && !position.closed {
                let last_price = self
                    .tick_session
                    .get(position.token)
                    .await
                    .and_then(|t| t.last_price)
                    .unwrap_or(position.average_price);

                let pnl = (position.average_price - last_price) * position.quantity as f64;
                let pnl_percent = (position.average_price - last_price) / position.average_price * 100.0;
                let target_percent_remaining =
                    ((last_price - position.target) / position.average_price * 100.0).max(0.0);

                return PriceFeedPayload::Position(PositionSnapshot {
                    symbol: position.symbol,
                    quantity: position.quantity,
                    average_price: position.average_price,
                    last_price,
                    pnl,
                    pnl_percent,
                    target_percent_remaining,
                });
            }
        }

        let config = self.state.config.read().await.clone();
        let available_cash = self.broker.margins().await.map(|m| m.available_cash).unwrap_or(0.0);

        let mut rows = Vec::with_capacity(eligible.len());
        for row in eligible {
            let Some(tick) = self.tick_session.get(row.instrument_token).await else {
                continue;
            };
            let (Some(open), Some(last)) = (tick.ohlc.open, tick.last_price) else {
                continue;
            };

            rows.push(EligibleSnapshot {
                symbol: row.symbol.clone(),
                last,
                open,
                high: row.high,
                low: row.low,
                change_percent: (last - open) / open * 100.0,
                quantity_if_ordered: compute_quantity(available_cash, config.max_margin, last),
                points_to_trigger: row.high - last,
                percent_to_trigger: (row.high - last) / last * 100.0,
                time: chrono::Utc::now(),
            });
        }

        PriceFeedPayload::Eligible(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTradingBroker;
    use crate::tick_session::TickSession;
    use crate::types::PositionTracker;

    fn telemetry() -> Telemetry {
        let state = Arc::new(SessionState::new());
        let tick_session = Arc::new(TickSession::new());
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperTradingBroker::new(100_000.0, 0.0));
        Telemetry::new(state, tick_session, broker)
    }

    #[tokio::test]
    async fn open_sell_position_yields_a_position_payload() {
        let telemetry = telemetry();
        *telemetry.state.position.write().await = Some(PositionTracker {
            symbol: "TCS".to_string(),
            token: 1,
            side: Side::Sell,
            quantity: 10,
            average_price: 100.0,
            target: 95.0,
            stop_loss: 105.0,
            qty_remaining: 10,
            closed: false,
        });

        match telemetry.build_price_payload(&[]).await {
            PriceFeedPayload::Position(snapshot) => {
                assert_eq!(snapshot.symbol, "TCS");
                assert_eq!(snapshot.average_price, 100.0);
                // No tick received yet; falls back to the average price.
                assert_eq!(snapshot.last_price, 100.0);
            }
            PriceFeedPayload::Eligible(_) => panic!("expected a position payload"),
        }
    }

    #[tokio::test]
    async fn closed_sell_position_falls_through_to_eligible_payload() {
        let telemetry = telemetry();
        *telemetry.state.position.write().await = Some(PositionTracker {
            symbol: "TCS".to_string(),
            token: 1,
            side: Side::Sell,
            quantity: 10,
            average_price: 100.0,
            target: 95.0,
            stop_loss: 105.0,
            qty_remaining: 0,
            closed: true,
        });

        match telemetry.build_price_payload(&[]).await {
            PriceFeedPayload::Eligible(rows) => assert!(rows.is_empty()),
            PriceFeedPayload::Position(_) => panic!("expected an eligible payload"),
        }
    }

    #[tokio::test]
    async fn eligible_row_without_a_tick_is_skipped_rather_than_defaulted() {
        let telemetry = telemetry();
        let row = ClassifiedRow {
            symbol: "INFY".to_string(),
            instrument_token: 2,
            high: 120.0,
            low: 110.0,
            open: 0.0,
            last: 0.0,
            percent: None,
            reason: None,
        };

        match telemetry.build_price_payload(&[row]).await {
            PriceFeedPayload::Eligible(rows) => assert!(rows.is_empty()),
            PriceFeedPayload::Position(_) => panic!("expected an eligible payload"),
        }
    }
}
