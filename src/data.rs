//! Market data access
//!
//! The engine consumes candles and ticks through the [`MarketData`] trait;
//! the live implementation is [`crate::exchange::SpotClient`]. CSV
//! load/save covers offline optimization and backtests.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::{Candle, Symbol};

/// Recoverable data-layer failures.
///
/// Every variant means "skip this instrument this cycle and retry next
/// cycle"; retry/backoff policy belongs to the caller, not here.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned status {0}")]
    BadStatus(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no data returned for {0}")]
    NoData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Abstract market-data source.
///
/// Implementations must return candles in ascending timestamp order.
#[allow(async_fn_in_trait)]
pub trait MarketData {
    /// Fetch up to `limit` most recent candles for `symbol` at `interval`
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, DataError>;

    /// Fetch the latest traded price for `symbol`
    async fn fetch_last_price(&self, symbol: &Symbol) -> Result<f64, DataError>;
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from a CSV file with columns
/// `datetime,open,high,low,close,volume`
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>, DataError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    fn field<'r>(
        record: &'r csv::StringRecord,
        row: usize,
        idx: usize,
        name: &str,
    ) -> Result<&'r str, DataError> {
        record
            .get(idx)
            .ok_or_else(|| DataError::Malformed(format!("row {row}: missing {name} column")))
    }

    fn number(
        record: &csv::StringRecord,
        row: usize,
        idx: usize,
        name: &str,
    ) -> Result<f64, DataError> {
        field(record, row, idx, name)?
            .parse::<f64>()
            .map_err(|_| DataError::Malformed(format!("row {row}: failed to parse {name}")))
    }

    let mut candles = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let row = row_idx + 1;

        let dt_str = field(&record, row, 0, "datetime")?;
        let datetime = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .map_err(|_| {
                DataError::Malformed(format!("row {row}: failed to parse datetime {dt_str}"))
            })?;

        candles.push(Candle {
            datetime,
            open: number(&record, row, 1, "open")?,
            high: number(&record, row, 2, "high")?,
            low: number(&record, row, 3, "low")?,
            close: number(&record, row, 4, "close")?,
            volume: number(&record, row, 5, "volume")?,
        });
    }

    Ok(candles)
}

/// Save candles to a CSV file in the same column layout [`load_csv`] reads
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;

    for candle in candles {
        writer.write_record([
            candle.datetime.to_rfc3339(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Load data for multiple symbols from `{data_dir}/{SYMBOL}_{interval}.csv`
/// files; missing files are skipped with a warning.
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    interval: &str,
) -> Result<HashMap<Symbol, Vec<Candle>>, DataError> {
    let mut data = HashMap::new();

    for symbol in symbols {
        let filename = format!("{}_{}.csv", symbol.as_str(), interval);
        let path = data_dir.as_ref().join(&filename);

        if !path.exists() {
            warn!("data file not found: {}", path.display());
            continue;
        }

        let candles = load_csv(&path)?;
        info!("loaded {} candles for {}", candles.len(), symbol);
        data.insert(symbol.clone(), candles);
    }

    if data.is_empty() {
        return Err(DataError::NoData("any configured symbol".to_string()));
    }

    Ok(data)
}
