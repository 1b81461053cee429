/// Paper-trading broker: an in-memory simulator implementing the same
/// [`BrokerClient`] contract as the live REST client, for the
/// `enable_paper_trading` config switch and for tests.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::broker::{BrokerClient, Holding, Margins, Order, Position, Profile};
use crate::error::Result;
use crate::types::Side;

#[derive(Debug, Clone)]
struct SimulatedOrder {
    tradingsymbol: String,
    side: Side,
    quantity: i64,
    fill_price: f64,
}

pub struct PaperTradingBroker {
    orders: RwLock<HashMap<String, SimulatedOrder>>,
    positions: RwLock<HashMap<String, Position>>,
    cash: f64,
    slippage_bps: f64,
    last_price: f64,
}

impl PaperTradingBroker {
    pub fn new(cash: f64, slippage_bps: f64) -> Self {
        PaperTradingBroker {
            orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            cash,
            slippage_bps,
            last_price: 100.0,
        }
    }

    fn fill_price(&self, reference_price: f64, side: Side) -> f64 {
        let slippage = reference_price * (self.slippage_bps / 10_000.0);
        match side {
            Side::Buy => reference_price + slippage,
            Side::Sell => reference_price - slippage,
        }
    }

    pub async fn total_orders(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn get_fill_price(&self, order_id: &str) -> Option<f64> {
        self.orders.read().await.get(order_id).map(|o| o.fill_price)
    }
}

#[async_trait]
impl BrokerClient for PaperTradingBroker {
    async fn profile(&self) -> Result<Profile> {
        Ok(Profile {
            user_id: "PAPER".to_string(),
            user_name: "Paper Trading Account".to_string(),
        })
    }

    async fn margins(&self) -> Result<Margins> {
        Ok(Margins {
            available_cash: self.cash,
            net: self.cash,
        })
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .map(|(order_id, o)| Order {
                order_id: order_id.clone(),
                tradingsymbol: o.tradingsymbol.clone(),
                status: "COMPLETE".to_string(),
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        Ok(Vec::new())
    }

    async fn place_order(
        &self,
        _variety: &str,
        _exchange: &str,
        tradingsymbol: &str,
        instrument_token: i64,
        transaction_type: Side,
        quantity: i64,
        _product: &str,
        _order_type: &str,
        _validity: &str,
        _tag: &str,
    ) -> Result<String> {
        let order_id = format!("PAPER-{}", uuid::Uuid::new_v4());
        let fill_price = self.fill_price(self.last_price, transaction_type);

        let mut positions = self.positions.write().await;
        let signed_qty = quantity * transaction_type.sign() as i64;
        positions
            .entry(tradingsymbol.to_string())
            .and_modify(|p| p.quantity += signed_qty)
            .or_insert(Position {
                instrument_token,
                tradingsymbol: tradingsymbol.to_string(),
                quantity: signed_qty,
                average_price: fill_price,
            });

        self.orders.write().await.insert(
            order_id.clone(),
            SimulatedOrder {
                tradingsymbol: tradingsymbol.to_string(),
                side: transaction_type,
                quantity,
                fill_price,
            },
        );

        warn!(
            side = transaction_type.as_str(),
            quantity, tradingsymbol, fill_price, "paper order filled"
        );
        info!(order_id = %order_id, "paper order placed");

        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_order_fills_with_slippage_against_side() {
        let broker = PaperTradingBroker::new(100_000.0, 5.0);

        let order_id = broker
            .place_order("NORMAL", "NSE", "RELI", 100, Side::Sell, 10, "INTRADAY", "MARKET", "DAY", "entry")
            .await
            .unwrap();

        let fill = broker.get_fill_price(&order_id).await.unwrap();
        assert!(fill < 100.0, "sell fill should be below reference price");
        assert_eq!(broker.total_orders().await, 1);

        let positions = broker.positions().await.unwrap();
        assert_eq!(positions[0].quantity, -10);
        assert_eq!(positions[0].instrument_token, 100);
    }
}
