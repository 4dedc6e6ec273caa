//! Signal detection
//!
//! Detectors classify market state into entry signals; they never touch the
//! ledger. Each strategy is an interchangeable [`Detector`] selected by a
//! tagged [`DetectorConfig`] section in the config file.

mod ema_cross;
mod impulse_breakout;
mod mtf_confirm;
mod rsi_cross;

pub use ema_cross::{EmaCrossConfig, EmaCrossDetector};
pub use impulse_breakout::{ImpulseBreakoutConfig, ImpulseBreakoutDetector};
pub use mtf_confirm::{MtfConfirmConfig, MtfConfirmDetector};
pub use rsi_cross::{RsiCrossConfig, RsiCrossDetector};

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorError;
use crate::{Candle, Side};

/// Classified detection outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// No entry conditions met
    Flat,
    /// Entry candidate with a 0-1 strength score
    Enter { side: Side, strength: f64 },
}

impl Signal {
    pub fn is_flat(&self) -> bool {
        matches!(self, Signal::Flat)
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Flat => None,
            Signal::Enter { side, .. } => Some(*side),
        }
    }
}

/// Candle data handed to a detector for one evaluation.
///
/// `confirmation` carries higher-timeframe candles and is populated only
/// when the active detector asks for it.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    pub candles: &'a [Candle],
    pub confirmation: Option<&'a [Candle]>,
}

impl<'a> MarketView<'a> {
    pub fn new(candles: &'a [Candle]) -> Self {
        Self {
            candles,
            confirmation: None,
        }
    }

    pub fn with_confirmation(candles: &'a [Candle], confirmation: &'a [Candle]) -> Self {
        Self {
            candles,
            confirmation: Some(confirmation),
        }
    }
}

/// Entry signal detector
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum number of working-timeframe candles required
    fn min_candles(&self) -> usize;

    /// Whether the engine should fetch confirmation-timeframe candles
    fn needs_confirmation_timeframe(&self) -> bool {
        false
    }

    /// Classify the current market view
    fn detect(&self, view: &MarketView<'_>) -> Result<Signal, IndicatorError>;
}

/// Detector selection, one section per strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum DetectorConfig {
    EmaCross(EmaCrossConfig),
    RsiCross(RsiCrossConfig),
    ImpulseBreakout(ImpulseBreakoutConfig),
    MtfConfirm(MtfConfirmConfig),
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig::EmaCross(EmaCrossConfig::default())
    }
}

/// Build the configured detector
pub fn create(config: &DetectorConfig) -> Box<dyn Detector> {
    match config {
        DetectorConfig::EmaCross(c) => Box::new(EmaCrossDetector::new(c.clone())),
        DetectorConfig::RsiCross(c) => Box::new(RsiCrossDetector::new(c.clone())),
        DetectorConfig::ImpulseBreakout(c) => Box::new(ImpulseBreakoutDetector::new(c.clone())),
        DetectorConfig::MtfConfirm(c) => Box::new(MtfConfirmDetector::new(c.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_config_roundtrip() {
        let json = r#"{"name":"rsi_cross","period":7,"min_rsi":25.0,"max_rsi":75.0}"#;
        let config: DetectorConfig = serde_json::from_str(json).unwrap();
        let detector = create(&config);
        assert_eq!(detector.name(), "rsi_cross");
    }

    #[test]
    fn test_default_detector_is_ema_cross() {
        let detector = create(&DetectorConfig::default());
        assert_eq!(detector.name(), "ema_cross");
    }
}
