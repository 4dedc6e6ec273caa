//! Exchange API client
//!
//! Thin HTTP client over a Binance-style public spot API. Only public
//! market-data endpoints are used; a paper trader has nothing to sign.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::config::ExchangeConfig;
use crate::data::{DataError, MarketData};
use crate::{Candle, Symbol};

/// Valid kline intervals
pub const INTERVALS: &[&str] = &[
    "1m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
];

/// Maximum candles per klines request
const KLINES_LIMIT: u32 = 1000;

/// Kline array entry: open time, OHLCV as strings, close time, quote
/// volume, trade count, taker volumes, ignored field
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    String,
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// Public spot market-data client
#[derive(Debug, Clone)]
pub struct SpotClient {
    client: reqwest::Client,
    base_url: String,
    request_delay: Duration,
}

impl SpotClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, DataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(SpotClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    fn parse_kline(raw: &RawKline) -> Result<Candle, DataError> {
        let datetime = chrono::DateTime::from_timestamp_millis(raw.0)
            .ok_or_else(|| DataError::Malformed(format!("bad kline timestamp {}", raw.0)))?;

        let price = |s: &str, name: &str| -> Result<f64, DataError> {
            s.parse::<f64>()
                .map_err(|_| DataError::Malformed(format!("bad kline {name}: {s}")))
        };

        Ok(Candle {
            datetime,
            open: price(&raw.1, "open")?,
            high: price(&raw.2, "high")?,
            low: price(&raw.3, "low")?,
            close: price(&raw.4, "close")?,
            volume: price(&raw.5, "volume")?,
        })
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, DataError> {
        if !INTERVALS.contains(&interval) {
            return Err(DataError::Malformed(format!(
                "unsupported interval: {interval}"
            )));
        }

        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.min(KLINES_LIMIT)
        );
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={end}"));
        }

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DataError::BadStatus(response.status().as_u16()));
        }

        let raw: Vec<RawKline> = response.json().await?;
        raw.iter().map(Self::parse_kline).collect()
    }

    /// Fetch an extended history window by paging backwards from now.
    ///
    /// Returns candles ascending, deduplicated on timestamp.
    pub async fn fetch_history(
        &self,
        symbol: &Symbol,
        interval: &str,
        total: u32,
    ) -> Result<Vec<Candle>, DataError> {
        let mut all: Vec<Candle> = Vec::with_capacity(total as usize);
        let mut end_time: Option<i64> = None;

        while (all.len() as u32) < total {
            let remaining = total - all.len() as u32;
            let batch = self
                .klines(symbol, interval, remaining.min(KLINES_LIMIT), end_time)
                .await?;
            if batch.is_empty() {
                break;
            }

            end_time = Some(batch[0].datetime.timestamp_millis() - 1);
            // Batches page backwards; prepend the older chunk
            let mut merged = batch;
            merged.extend(all);
            all = merged;

            if (all.len() as u32) < total {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        all.sort_by_key(|c| c.datetime);
        all.dedup_by_key(|c| c.datetime);

        if all.is_empty() {
            return Err(DataError::NoData(symbol.to_string()));
        }

        info!(
            %symbol,
            interval,
            candles = all.len(),
            "fetched history window"
        );
        Ok(all)
    }
}

impl MarketData for SpotClient {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, DataError> {
        let candles = self.klines(symbol, interval, limit, None).await?;
        if candles.is_empty() {
            return Err(DataError::NoData(symbol.to_string()));
        }
        Ok(candles)
    }

    async fn fetch_last_price(&self, symbol: &Symbol) -> Result<f64, DataError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DataError::BadStatus(response.status().as_u16()));
        }

        let ticker: TickerPrice = response.json().await?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|_| DataError::Malformed(format!("bad ticker price: {}", ticker.price)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kline() {
        let raw: RawKline = (
            1_700_000_000_000,
            "100.5".into(),
            "101.2".into(),
            "99.8".into(),
            "100.9".into(),
            "1234.5".into(),
            1_700_000_059_999,
            "124000.0".into(),
            42,
            "600.0".into(),
            "60000.0".into(),
            "0".into(),
        );

        let candle = SpotClient::parse_kline(&raw).unwrap();
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.high, 101.2);
        assert_eq!(candle.volume, 1234.5);
        assert_eq!(candle.datetime.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_unsupported_interval_rejected_before_any_request() {
        let client = SpotClient::new(&ExchangeConfig::default()).unwrap();
        let result = client
            .fetch_candles(&Symbol::new("BTCUSDT"), "7m", 10)
            .await;
        assert!(matches!(result, Err(DataError::Malformed(_))));
    }

    #[test]
    fn test_parse_kline_rejects_garbage() {
        let raw: RawKline = (
            1_700_000_000_000,
            "not-a-price".into(),
            "101.2".into(),
            "99.8".into(),
            "100.9".into(),
            "1234.5".into(),
            1_700_000_059_999,
            "0".into(),
            0,
            "0".into(),
            "0".into(),
            "0".into(),
        );

        assert!(matches!(
            SpotClient::parse_kline(&raw),
            Err(DataError::Malformed(_))
        ));
    }
}
