/// Brokerage capability binding: the set of operations the rest of the
/// engine needs from the account's broker, behind one trait so a live REST
/// client and a paper-trading simulator are interchangeable.
pub mod client;
pub mod paper_trading;
pub mod tokens;

pub use client::LiveBrokerClient;
pub use paper_trading::PaperTradingBroker;
pub use tokens::TokenManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Margins {
    pub available_cash: f64,
    pub net: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub tradingsymbol: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument_token: i64,
    pub tradingsymbol: String,
    /// Signed: positive for a net long, negative for a net short.
    pub quantity: i64,
    pub average_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub tradingsymbol: String,
    pub quantity: i64,
    pub average_price: f64,
}

/// Brokerage capability required by the engine (§6). Implemented once
/// against the live REST API and once as an in-memory paper-trading
/// simulator; both sit behind `Arc<dyn BrokerClient>`.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Makes sure a usable session exists, deriving one (e.g. via TOTP
    /// login) if absent or expired. A no-op for brokers with no session
    /// concept, such as the paper-trading simulator.
    async fn ensure_session(&self) -> Result<()> {
        Ok(())
    }

    async fn profile(&self) -> Result<Profile>;
    async fn margins(&self) -> Result<Margins>;
    async fn orders(&self) -> Result<Vec<Order>>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn holdings(&self) -> Result<Vec<Holding>>;

    #[allow(clippy::too_many_arguments)]
    async fn place_order(
        &self,
        variety: &str,
        exchange: &str,
        tradingsymbol: &str,
        instrument_token: i64,
        transaction_type: Side,
        quantity: i64,
        product: &str,
        order_type: &str,
        validity: &str,
        tag: &str,
    ) -> Result<String>;
}
