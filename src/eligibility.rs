/// Eligibility Classifier: one-shot scan that partitions today's watchlist
/// into eligible / not-eligible / doji by comparing the session-open tick to
/// each row's reference high/low.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::tick_session::{FeedCredentials, TickSession};
use crate::types::{Tick, WatchlistRow};
use crate::watchlist::WatchlistStore;

const FEED_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_TICK_TIMEOUT: Duration = Duration::from_secs(10);

/// One watchlist row after classification, in the on-disk snapshot shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedRow {
    pub symbol: String,
    pub instrument_token: i64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub last: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRow {
    pub symbol: String,
    pub reason: String,
}

/// Persisted to Session State and to an on-disk snapshot at the end of each
/// classification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub success: bool,
    pub eligible: Vec<ClassifiedRow>,
    pub not_eligible: Vec<ClassifiedRow>,
    pub doji_eligible: Vec<ClassifiedRow>,
    pub errors: Vec<ErrorRow>,
    pub total_checked: usize,
    pub websocket_status: bool,
}

/// Classifies one row against its tick. Pure, synchronous, no I/O.
///
/// Boundary convention: `open_p == high` is not separately called out by the
/// source; treated as `NotEligible` alongside `open_p > high` (open question,
/// recorded in the design ledger).
pub fn classify(row: &WatchlistRow, tick: Option<&Tick>) -> Classified {
    let Some(tick) = tick else {
        return Classified::Error("No tick".to_string());
    };
    let (Some(open_p), Some(last)) = (tick.ohlc.open, tick.last_price) else {
        return Classified::Error("No tick".to_string());
    };

    if open_p >= row.high {
        return Classified::NotEligible {
            open: open_p,
            last,
            reason: "open > high".to_string(),
        };
    }
    if open_p == row.low {
        return Classified::NotEligible {
            open: open_p,
            last,
            reason: "open == low".to_string(),
        };
    }
    if open_p < row.low {
        let percent = round2((row.high - last) / last * 100.0);
        return Classified::Eligible {
            open: open_p,
            last,
            percent,
        };
    }
    // row.low < open_p < row.high
    Classified::Doji { open: open_p, last }
}

/// Internal classification outcome for one row; distinct from
/// [`crate::types::Classification`] only in that it carries no `symbol`
/// field, since the caller already holds the row it came from.
#[derive(Debug, Clone)]
pub enum Classified {
    Eligible { open: f64, last: f64, percent: f64 },
    NotEligible { open: f64, last: f64, reason: String },
    Doji { open: f64, last: f64 },
    Error(String),
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct EligibilityEngine {
    watchlist: Arc<WatchlistStore>,
    tick_session: Arc<TickSession>,
    snapshot_path: PathBuf,
}

impl EligibilityEngine {
    pub fn new(
        watchlist: Arc<WatchlistStore>,
        tick_session: Arc<TickSession>,
        snapshot_path: impl AsRef<Path>,
    ) -> Self {
        EligibilityEngine {
            watchlist,
            tick_session,
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Steps (a)-(h). Caller (Run Controller / Session State) is responsible
    /// for the `force`/watchlist-changed cache decision; this always
    /// executes the full procedure.
    pub async fn run_once(&self, date: NaiveDate, credentials: FeedCredentials) -> Result<EligibilityResult> {
        let rows = self.watchlist.load_for_date(date).await?;
        if rows.is_empty() {
            return Err(EngineError::NoStocksForToday);
        }

        self.tick_session.stop().await?;
        self.tick_session.setup(credentials).await?;
        self.tick_session.start().await?;

        if !self.tick_session.wait_connected(FEED_CONNECT_TIMEOUT).await {
            return Err(EngineError::FeedSetupFailed("feed did not connect in time".to_string()));
        }

        let tokens: Vec<i64> = rows.iter().map(|r| r.token).collect();
        self.tick_session.subscribe(&tokens).await?;

        if !self.tick_session.wait_for_any_tick(FIRST_TICK_TIMEOUT).await {
            return Err(EngineError::FirstTickTimeout);
        }

        let mut eligible = Vec::new();
        let mut not_eligible = Vec::new();
        let mut doji_eligible = Vec::new();
        let mut errors = Vec::new();

        for row in &rows {
            let tick = self.tick_session.get(row.token).await;
            match classify(row, tick.as_deref()) {
                Classified::Eligible { open, last, percent } => eligible.push(ClassifiedRow {
                    symbol: row.symbol.clone(),
                    instrument_token: row.token,
                    high: row.high,
                    low: row.low,
                    open,
                    last,
                    percent: Some(percent),
                    reason: None,
                }),
                Classified::NotEligible { open, last, reason } => not_eligible.push(ClassifiedRow {
                    symbol: row.symbol.clone(),
                    instrument_token: row.token,
                    high: row.high,
                    low: row.low,
                    open,
                    last,
                    percent: None,
                    reason: Some(reason),
                }),
                Classified::Doji { open, last } => doji_eligible.push(ClassifiedRow {
                    symbol: row.symbol.clone(),
                    instrument_token: row.token,
                    high: row.high,
                    low: row.low,
                    open,
                    last,
                    percent: None,
                    reason: None,
                }),
                Classified::Error(reason) => {
                    warn!(symbol = %row.symbol, reason = %reason, "classification error");
                    errors.push(ErrorRow {
                        symbol: row.symbol.clone(),
                        reason,
                    });
                }
            }
        }

        let result = EligibilityResult {
            success: true,
            total_checked: rows.len(),
            eligible,
            not_eligible,
            doji_eligible,
            errors,
            websocket_status: self.tick_session.is_connected().await,
        };

        self.write_snapshot(&result)?;

        self.tick_session.stop().await?;

        info!(
            eligible = result.eligible.len(),
            not_eligible = result.not_eligible.len(),
            doji = result.doji_eligible.len(),
            errors = result.errors.len(),
            "eligibility run complete"
        );

        Ok(result)
    }

    fn write_snapshot(&self, result: &EligibilityResult) -> Result<()> {
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&self.snapshot_path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ohlc;
    use chrono::NaiveDate;

    fn row() -> WatchlistRow {
        WatchlistRow {
            symbol: "RELI".to_string(),
            token: 100,
            high: 100.0,
            low: 90.0,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        }
    }

    fn tick(open: f64, last: f64) -> Tick {
        Tick {
            last_price: Some(last),
            ohlc: Ohlc { open: Some(open), high: None, low: None, close: None },
            volume: None,
            depth: None,
            timestamp: None,
        }
    }

    #[test]
    fn scenario_1_eligible() {
        let t = tick(85.0, 95.0);
        match classify(&row(), Some(&t)) {
            Classified::Eligible { percent, .. } => assert_eq!(percent, 5.26),
            other => panic!("expected Eligible, got {:?}", other),
        }
    }

    #[test]
    fn scenario_2_doji() {
        let t = tick(95.0, 94.0);
        match classify(&row(), Some(&t)) {
            Classified::Doji { .. } => {}
            other => panic!("expected Doji, got {:?}", other),
        }
    }

    #[test]
    fn scenario_3_not_eligible_upper() {
        let t = tick(101.0, 101.0);
        match classify(&row(), Some(&t)) {
            Classified::NotEligible { reason, .. } => assert_eq!(reason, "open > high"),
            other => panic!("expected NotEligible, got {:?}", other),
        }
    }

    #[test]
    fn open_equals_high_is_not_eligible() {
        let t = tick(100.0, 100.0);
        match classify(&row(), Some(&t)) {
            Classified::NotEligible { reason, .. } => assert_eq!(reason, "open > high"),
            other => panic!("expected NotEligible, got {:?}", other),
        }
    }

    #[test]
    fn open_equals_low_is_not_eligible() {
        let t = tick(90.0, 92.0);
        match classify(&row(), Some(&t)) {
            Classified::NotEligible { reason, .. } => assert_eq!(reason, "open == low"),
            other => panic!("expected NotEligible, got {:?}", other),
        }
    }

    #[test]
    fn missing_tick_is_error() {
        match classify(&row(), None) {
            Classified::Error(reason) => assert_eq!(reason, "No tick"),
            other => panic!("expected Error, got {:?}", other),
        }
    }
}
