/// Watchlist store: a date-keyed CSV table of candidate symbols with their
/// reference high/low levels for the session.
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::types::WatchlistRow;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct WatchlistCsvRow {
    symbol: String,
    instrument_token: String,
    high: String,
    low: String,
    date: String,
}

/// Tabular store, columns `{symbol, instrument_token, high, low, date}`.
/// Single file, serialized writes.
pub struct WatchlistStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl WatchlistStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        WatchlistStore {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all_raw(&self) -> Result<Vec<WatchlistCsvRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| EngineError::Csv(e.to_string()))?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: WatchlistCsvRow = record.map_err(|e| EngineError::Csv(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn write_all_raw(&self, rows: &[WatchlistCsvRow]) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)
            .map_err(|e| EngineError::Csv(e.to_string()))?;
        for row in rows {
            writer.serialize(row).map_err(|e| EngineError::Csv(e.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Parses a raw CSV row into a validated `WatchlistRow`. Returns `None`
    /// (and logs a warning) if any numeric column fails to parse, or if the
    /// `low < high` invariant doesn't hold — such rows are dropped, not
    /// failed, so one bad row doesn't fail the whole batch.
    fn parse_row(raw: &WatchlistCsvRow) -> Option<WatchlistRow> {
        let token: i64 = raw.instrument_token.parse().ok()?;
        let high: f64 = raw.high.parse().ok()?;
        let low: f64 = raw.low.parse().ok()?;
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d").ok()?;

        let row = WatchlistRow {
            symbol: raw.symbol.clone(),
            token,
            high,
            low,
            date,
        };

        if !row.is_valid() {
            warn!(symbol = %row.symbol, "watchlist row failed low < high invariant, dropping");
            return None;
        }

        Some(row)
    }

    /// Reads the store, normalises and validates, returns rows for `date`.
    /// Rows that fail parsing or validation are dropped with a warning.
    pub async fn load_for_date(&self, date: NaiveDate) -> Result<Vec<WatchlistRow>> {
        let raw_rows = self.read_all_raw()?;
        let wanted = date.format("%Y-%m-%d").to_string();

        let rows = raw_rows
            .iter()
            .filter(|r| r.date == wanted)
            .filter_map(Self::parse_row)
            .collect();

        Ok(rows)
    }

    /// Optional date filter; `None` lists every row in the store.
    pub async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<WatchlistRow>> {
        let raw_rows = self.read_all_raw()?;
        let rows = raw_rows
            .iter()
            .filter(|r| match date {
                Some(d) => r.date == d.format("%Y-%m-%d").to_string(),
                None => true,
            })
            .filter_map(Self::parse_row)
            .collect();
        Ok(rows)
    }

    /// Upsert by `(symbol, date)`.
    pub async fn add(&self, row: WatchlistRow) -> Result<()> {
        if !row.is_valid() {
            return Err(EngineError::InvalidRequest("low must be < high".to_string()));
        }
        let _guard = self.write_lock.lock().await;

        let mut raw_rows = self.read_all_raw()?;
        let date_str = row.date.format("%Y-%m-%d").to_string();

        let new_raw = WatchlistCsvRow {
            symbol: row.symbol.clone(),
            instrument_token: row.token.to_string(),
            high: row.high.to_string(),
            low: row.low.to_string(),
            date: date_str.clone(),
        };

        if let Some(existing) = raw_rows
            .iter_mut()
            .find(|r| r.symbol == row.symbol && r.date == date_str)
        {
            *existing = new_raw;
        } else {
            raw_rows.push(new_raw);
        }

        self.write_all_raw(&raw_rows)
    }

    /// Identify by the original `(symbol, date)`, allow any field to change.
    pub async fn update(
        &self,
        original_symbol: &str,
        original_date: NaiveDate,
        updated: WatchlistRow,
    ) -> Result<bool> {
        if !updated.is_valid() {
            return Err(EngineError::InvalidRequest("low must be < high".to_string()));
        }
        let _guard = self.write_lock.lock().await;

        let mut raw_rows = self.read_all_raw()?;
        let original_date_str = original_date.format("%Y-%m-%d").to_string();

        let Some(existing) = raw_rows
            .iter_mut()
            .find(|r| r.symbol == original_symbol && r.date == original_date_str)
        else {
            return Ok(false);
        };

        *existing = WatchlistCsvRow {
            symbol: updated.symbol,
            instrument_token: updated.token.to_string(),
            high: updated.high.to_string(),
            low: updated.low.to_string(),
            date: updated.date.format("%Y-%m-%d").to_string(),
        };

        self.write_all_raw(&raw_rows)?;
        Ok(true)
    }

    pub async fn delete(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut raw_rows = self.read_all_raw()?;
        let date_str = date.format("%Y-%m-%d").to_string();
        let before = raw_rows.len();
        raw_rows.retain(|r| !(r.symbol == symbol && r.date == date_str));
        let removed = raw_rows.len() != before;

        if removed {
            self.write_all_raw(&raw_rows)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("breakout_engine_test_{}_{}.csv", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn add_then_get_for_date_contains_row() {
        let path = tmp_path("roundtrip");
        let store = WatchlistStore::new(&path);
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let row = WatchlistRow {
            symbol: "RELI".to_string(),
            token: 100,
            high: 100.0,
            low: 90.0,
            date,
        };

        store.add(row.clone()).await.unwrap();
        let loaded = store.load_for_date(date).await.unwrap();
        assert_eq!(loaded, vec![row.clone()]);

        // second add with same (symbol, date) updates in place, count unchanged
        let mut updated = row.clone();
        updated.high = 105.0;
        store.add(updated.clone()).await.unwrap();
        let loaded_again = store.load_for_date(date).await.unwrap();
        assert_eq!(loaded_again.len(), 1);
        assert_eq!(loaded_again[0].high, 105.0);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn invalid_rows_are_dropped_not_fatal() {
        let path = tmp_path("invalid");
        std::fs::write(
            &path,
            "symbol,instrument_token,high,low,date\n\
             GOOD,1,100,90,2026-01-15\n\
             BAD,notanumber,100,90,2026-01-15\n\
             INVERTED,2,50,60,2026-01-15\n",
        )
        .unwrap();

        let store = WatchlistStore::new(&path);
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let rows = store.load_for_date(date).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "GOOD");

        std::fs::remove_file(&path).ok();
    }
}
