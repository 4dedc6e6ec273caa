//! Configuration management
//!
//! Typed JSON configuration with documented defaults. A missing or
//! malformed config file is fatal at startup; everything downstream works
//! from the loaded, validated structs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::detect::DetectorConfig;
use crate::risk::RiskConfig;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }
}

/// Exchange connectivity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL of the public spot API (default: Binance)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between paginated history requests in ms (default: 500)
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    500
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// Instrument universe and cycle cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols to evaluate each cycle
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Working timeframe (default: 1h)
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Confirmation timeframe for multi-timeframe detectors (default: 4h)
    #[serde(default = "default_confirmation_interval")]
    pub confirmation_interval: String,

    /// Candles fetched per evaluation (default: 200)
    #[serde(default = "default_history_candles")]
    pub history_candles: u32,

    /// Starting virtual balance in quote currency (default: 10000)
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,

    /// ATR period for sizing and exit levels (default: 14)
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Seconds between evaluation cycles (default: 300)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_confirmation_interval() -> String {
    "4h".to_string()
}
fn default_history_candles() -> u32 {
    200
}
fn default_initial_balance() -> f64 {
    10_000.0
}
fn default_atr_period() -> usize {
    14
}
fn default_poll_interval_secs() -> u64 {
    300
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: default_symbols(),
            interval: default_interval(),
            confirmation_interval: default_confirmation_interval(),
            history_candles: default_history_candles(),
            initial_balance: default_initial_balance(),
            atr_period: default_atr_period(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// TP/SL grid-search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Take-profit multiplier grid
    #[serde(default = "default_tp_multipliers")]
    pub tp_multipliers: Vec<f64>,

    /// Stop-loss multiplier grid
    #[serde(default = "default_sl_multipliers")]
    pub sl_multipliers: Vec<f64>,

    /// Historical window length in candles (default: 1000)
    #[serde(default = "default_optimizer_history")]
    pub history_candles: u32,
}

fn default_tp_multipliers() -> Vec<f64> {
    vec![1.0, 1.5, 2.0, 2.5, 3.0]
}
fn default_sl_multipliers() -> Vec<f64> {
    vec![0.5, 1.0, 1.5, 2.0]
}
fn default_optimizer_history() -> u32 {
    1000
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            tp_multipliers: default_tp_multipliers(),
            sl_multipliers: default_sl_multipliers(),
            history_candles: default_optimizer_history(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.trading.interval, "1h");
        assert_eq!(config.risk.risk_per_trade, 0.01);
        assert_eq!(config.optimizer.tp_multipliers.len(), 5);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let json = r#"{"risk": {"leverage": 10.0}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk.leverage, 10.0);
        assert_eq!(config.risk.commission_rate, 0.0009);
    }

    #[test]
    fn test_detector_section_selects_strategy() {
        let json = r#"{"detector": {"name": "impulse_breakout", "lookback": 30}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let detector = crate::detect::create(&config.detector);
        assert_eq!(detector.name(), "impulse_breakout");
        assert_eq!(detector.min_candles(), 30);
    }
}
