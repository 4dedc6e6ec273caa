//! RSI threshold-cross detector
//!
//! Long when the RSI recovers up through the oversold threshold, short when
//! it breaks down through the overbought threshold.

use serde::{Deserialize, Serialize};

use super::{Detector, MarketView, Signal};
use crate::indicators::{rsi, IndicatorError};
use crate::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiCrossConfig {
    /// RSI period (default: 14)
    #[serde(default = "default_period")]
    pub period: usize,

    /// Oversold threshold crossed upward for longs (default: 30)
    #[serde(default = "default_min_rsi")]
    pub min_rsi: f64,

    /// Overbought threshold crossed downward for shorts (default: 70)
    #[serde(default = "default_max_rsi")]
    pub max_rsi: f64,
}

fn default_period() -> usize {
    14
}
fn default_min_rsi() -> f64 {
    30.0
}
fn default_max_rsi() -> f64 {
    70.0
}

impl Default for RsiCrossConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            min_rsi: default_min_rsi(),
            max_rsi: default_max_rsi(),
        }
    }
}

pub struct RsiCrossDetector {
    config: RsiCrossConfig,
}

impl RsiCrossDetector {
    pub fn new(config: RsiCrossConfig) -> Self {
        RsiCrossDetector { config }
    }
}

impl Detector for RsiCrossDetector {
    fn name(&self) -> &'static str {
        "rsi_cross"
    }

    fn min_candles(&self) -> usize {
        // Two RSI values: previous and current
        self.config.period + 2
    }

    fn detect(&self, view: &MarketView<'_>) -> Result<Signal, IndicatorError> {
        let candles = view.candles;
        if candles.len() < self.min_candles() {
            return Err(IndicatorError::InsufficientData {
                needed: self.min_candles(),
                got: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let values = rsi(&closes, self.config.period)?;

        let current = values[values.len() - 1];
        let previous = values[values.len() - 2];

        if previous < self.config.min_rsi && current >= self.config.min_rsi {
            return Ok(Signal::Enter {
                side: Side::Long,
                strength: 1.0,
            });
        }
        if previous > self.config.max_rsi && current <= self.config.max_rsi {
            return Ok(Signal::Enter {
                side: Side::Short,
                strength: 1.0,
            });
        }

        Ok(Signal::Flat)
    }
}
