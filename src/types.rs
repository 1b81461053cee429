/// Core type definitions for the breakout engine
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One candidate symbol for today, as returned by the watchlist loader.
///
/// Invariant: `low < high`. Rows are immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistRow {
    pub symbol: String,
    #[serde(rename = "instrument_token")]
    pub token: i64,
    pub high: f64,
    pub low: f64,
    pub date: NaiveDate,
}

impl WatchlistRow {
    pub fn is_valid(&self) -> bool {
        self.high > 0.0 && self.low > 0.0 && self.low < self.high
    }
}

/// Side of a market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign used in target-price calculation: -1 for SELL, +1 for BUY.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// OHLC portion of a tick. Each field is independently settable so a partial
/// packet can carry only the fields the feed chose to include.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// A single price/quantity rung of the order-book ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthLevel {
    pub quantity: i64,
    pub price: f64,
    pub orders: i32,
}

/// Order-book depth. `buy` and `sell` merge independently as inner keys: a
/// packet carrying only `sell` leaves a previously-set `buy` ladder alone.
/// Not required by the core trading logic; carried for feed fidelity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Depth {
    pub buy: Option<Vec<DepthLevel>>,
    pub sell: Option<Vec<DepthLevel>>,
}

/// The coalesced market snapshot for one instrument token.
///
/// Invariant after merge (I2): every field once set remains set and equal
/// to the most recently received non-null value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tick {
    pub last_price: Option<f64>,
    pub ohlc: Ohlc,
    pub volume: Option<i64>,
    pub depth: Option<Depth>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// For each watchlist row after the eligibility pass, exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Classification {
    Eligible { open: f64, last: f64, percent: f64 },
    NotEligible { open: f64, last: f64, reason: String },
    Doji { open: f64, last: f64 },
    Error { symbol: String, reason: String },
}

impl Classification {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Classification::Eligible { .. })
    }
}

/// Fresh opaque identifier generated at every start. Only a background task
/// whose captured identifier still matches the current session identity may
/// mutate engine state (I3).
pub type RunId = uuid::Uuid;

/// Engine lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Timeout,
}

/// Free-form human-readable breadcrumb for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentStep {
    PreCheck,
    OrderMonitoringStarted,
    PositionMonitoringStarted,
    OrderPlaced,
    StopLossTriggered,
    TargetHit,
    AutoSquareOff,
    ManualStop,
    PositionClosed,
}

/// Created when the Position Monitor starts; closed on the first of
/// {target hit, stop-loss confirmed on candle close, square-off, manual stop}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTracker {
    pub symbol: String,
    pub token: i64,
    pub side: Side,
    pub quantity: i64,
    pub average_price: f64,
    pub target: f64,
    /// Watchlist row's `high` for this token; tripped by a closed candle
    /// beyond it, on the opposite side from the breakout direction.
    pub stop_loss: f64,
    pub qty_remaining: i64,
    pub closed: bool,
}

/// Per-token transient candle aggregator. Period length is
/// `candle_interval_minutes`; alignment rule in the Candle Aggregator module.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub ticks: Vec<(DateTime<Utc>, f64)>,
}

/// A single closed fixed-interval OHLC candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_count: usize,
}

/// Trading-relevant configuration, mutable via the trading-config API and
/// persisted in session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub target_percent: f64,
    pub max_margin: f64,
    pub candle_interval_minutes: i64,
    pub squareoff_time: NaiveTime,
    pub session_max_seconds: i64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            target_percent: 0.01,
            max_margin: 100_000.0,
            candle_interval_minutes: 15,
            squareoff_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            session_max_seconds: 14_400,
        }
    }
}

/// Process-level configuration: the ambient concerns of §10.4 that the
/// trading-config endpoint must never touch (credentials, bind address,
/// CORS allow-list, notification channel).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub port: u16,
    pub frontend_origins: Vec<String>,
    pub secret_key: String,
    pub user_credentials_file: String,
    pub stocks_database_file: String,

    pub broker_client_code: String,
    pub broker_password: String,
    pub broker_totp_secret: String,
    pub broker_api_key: String,

    pub telegram_bot_token: Option<String>,
    pub telegram_channel_id: Option<String>,

    pub enable_paper_trading: bool,

    /// No `#[serde(default)]`: an omitted `[trading]` section must fail to
    /// deserialize rather than silently adopt `TradingConfig::default()`'s
    /// `max_margin` — per §9, no `max_margin` default is safe to assume.
    pub trading: TradingConfig,
}
