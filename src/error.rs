/// Centralized error types for the trading engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Watchlist / Eligibility
    #[error("no stocks configured for today")]
    NoStocksForToday,

    #[error("no eligible stocks after classification")]
    NoEligibleStocks,

    // Tick Session / feed
    #[error("feed setup failed: {0}")]
    FeedSetupFailed(String),

    #[error("timed out waiting for feed to connect")]
    FeedConnectTimeout,

    #[error("timed out waiting for first tick")]
    FirstTickTimeout,

    #[error("websocket error: {0}")]
    WebSocketError(String),

    // Broker / session
    #[error("broker session unavailable: {0}")]
    BrokerSessionUnavailable(String),

    #[error("broker API error: {code} - {message}")]
    BrokerApiError { code: String, message: String },

    #[error("order submission failed: {0}")]
    OrderSubmissionFailed(String),

    #[error("no open position")]
    NoOpenPosition,

    // Run Controller
    #[error("engine already running")]
    EngineAlreadyRunning,

    // HTTP control surface
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not authenticated")]
    NotAuthenticated,

    // Infrastructure (ambient stack)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Errors a background monitor may treat as transient and retry rather
    /// than tearing the whole run down immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::FeedConnectTimeout
                | EngineError::FirstTickTimeout
                | EngineError::WebSocketError(_)
                | EngineError::Http(_)
        )
    }

    /// Errors that mean the broker session itself is unusable and must be
    /// re-derived before any further trading action is attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::BrokerSessionUnavailable(_))
    }

    /// Errors that, if raised while a position is open, must force an exit
    /// attempt rather than leave the position unmanaged.
    pub fn requires_exit(&self) -> bool {
        matches!(self, EngineError::FeedConnectTimeout | EngineError::WebSocketError(_))
    }

    /// Stable string code for logs and `{success:false, error}` responses.
    pub fn error_code(&self) -> &str {
        match self {
            EngineError::NoStocksForToday => "WATCHLIST_001",
            EngineError::NoEligibleStocks => "ELIGIBILITY_001",
            EngineError::FeedSetupFailed(_) => "FEED_001",
            EngineError::FeedConnectTimeout => "FEED_002",
            EngineError::FirstTickTimeout => "FEED_003",
            EngineError::WebSocketError(_) => "FEED_004",
            EngineError::BrokerSessionUnavailable(_) => "BROKER_001",
            EngineError::BrokerApiError { .. } => "BROKER_002",
            EngineError::OrderSubmissionFailed(_) => "ORDER_001",
            EngineError::NoOpenPosition => "POSITION_001",
            EngineError::EngineAlreadyRunning => "RUN_001",
            EngineError::InvalidRequest(_) => "REQ_001",
            EngineError::NotAuthenticated => "AUTH_001",
            EngineError::Http(_) => "NET_001",
            EngineError::Io(_) => "FILE_001",
            EngineError::Json(_) => "DATA_001",
            EngineError::Csv(_) => "DATA_002",
            EngineError::ConfigError(_) => "CFG_001",
            EngineError::Internal(_) => "INT_001",
        }
    }

    /// HTTP status for the control surface, per the mapping in the error
    /// handling design: 400 validation, 401 unauthenticated, 500 internal.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidRequest(_) | EngineError::NoStocksForToday
                | EngineError::NoEligibleStocks | EngineError::NoOpenPosition
                | EngineError::EngineAlreadyRunning => 400,
            EngineError::NotAuthenticated => 401,
            _ => 500,
        }
    }
}
