pub mod session;

pub use session::{get_market_timings, is_trading_day};
