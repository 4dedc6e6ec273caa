//! EMA crossover detector
//!
//! Fast EMA crossing the slow EMA between the last two bars, optionally
//! gated by the slow-EMA slope over a short lookback and by an RSI band
//! filter that rejects stretched entries.

use serde::{Deserialize, Serialize};

use super::{Detector, MarketView, Signal};
use crate::indicators::{ema, rsi, IndicatorError};
use crate::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaCrossConfig {
    /// Fast EMA period (default: 9)
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,

    /// Slow EMA period (default: 21)
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,

    /// Slow-EMA slope lookback in bars; 0 disables the trend filter
    /// (default: 6)
    #[serde(default = "default_slope_lookback")]
    pub slope_lookback: usize,

    /// Apply the RSI band filter (default: false)
    #[serde(default)]
    pub use_rsi_filter: bool,

    /// RSI period for the band filter (default: 14)
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Reject longs at or above this RSI (default: 70)
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,

    /// Reject shorts at or below this RSI (default: 30)
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
}

fn default_fast_period() -> usize {
    9
}
fn default_slow_period() -> usize {
    21
}
fn default_slope_lookback() -> usize {
    6
}
fn default_rsi_period() -> usize {
    14
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_rsi_oversold() -> f64 {
    30.0
}

impl Default for EmaCrossConfig {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            slope_lookback: default_slope_lookback(),
            use_rsi_filter: false,
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
        }
    }
}

pub struct EmaCrossDetector {
    config: EmaCrossConfig,
}

impl EmaCrossDetector {
    pub fn new(config: EmaCrossConfig) -> Self {
        EmaCrossDetector { config }
    }
}

impl Detector for EmaCrossDetector {
    fn name(&self) -> &'static str {
        "ema_cross"
    }

    fn min_candles(&self) -> usize {
        let ema_bars = self.config.slow_period + self.config.slope_lookback + 1;
        let rsi_bars = if self.config.use_rsi_filter {
            self.config.rsi_period + 2
        } else {
            0
        };
        ema_bars.max(rsi_bars)
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
        let fast = ema(&closes, self.config.fast_period)?;
        let slow = ema(&closes, self.config.slow_period)?;

        let i = closes.len() - 1;
        let (Some(fast_now), Some(fast_prev), Some(slow_now), Some(slow_prev)) =
            (fast[i], fast[i - 1], slow[i], slow[i - 1])
        else {
            return Err(IndicatorError::InsufficientData {
                needed: self.min_candles(),
                got: candles.len(),
            });
        };

        let side = if fast_prev <= slow_prev && fast_now > slow_now {
            Side::Long
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Side::Short
        } else {
            return Ok(Signal::Flat);
        };

        // Trend filter: slow EMA must slope in the trade direction
        if self.config.slope_lookback > 0 {
            let Some(slow_back) = slow[i - self.config.slope_lookback] else {
                return Err(IndicatorError::InsufficientData {
                    needed: self.min_candles(),
                    got: candles.len(),
                });
            };
            let sloping = match side {
                Side::Long => slow_now > slow_back,
                Side::Short => slow_now < slow_back,
            };
            if !sloping {
                return Ok(Signal::Flat);
            }
        }

        if self.config.use_rsi_filter {
            let rsi_values = rsi(&closes, self.config.rsi_period)?;
            let current = rsi_values[rsi_values.len() - 1];
            let stretched = match side {
                Side::Long => current >= self.config.rsi_overbought,
                Side::Short => current <= self.config.rsi_oversold,
            };
            if stretched {
                return Ok(Signal::Flat);
            }
        }

        Ok(Signal::Enter {
            side,
            strength: 1.0,
        })
    }
}
