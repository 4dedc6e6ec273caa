//! Impulse / pullback / breakout detector
//!
//! Looks for a volume-backed impulse move over the lookback window, a
//! partial retracement of that move, and a fresh breakout past the window
//! extreme on renewed volume. All four gates (impulse, pullback band,
//! breakout price, breakout volume) must hold; partial matches are
//! non-signals.

use serde::{Deserialize, Serialize};

use super::{Detector, MarketView, Signal};
use crate::indicators::IndicatorError;
use crate::{Candle, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpulseBreakoutConfig {
    /// Window length in bars (default: 20)
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Minimum absolute percent move from window start (default: 3.0)
    #[serde(default = "default_impulse_pct")]
    pub impulse_pct: f64,

    /// Latest volume vs window average for the impulse gate (default: 1.5)
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    /// Minimum retracement of the impulse, percent (default: 20)
    #[serde(default = "default_pullback_min_pct")]
    pub pullback_min_pct: f64,

    /// Maximum retracement of the impulse, percent (default: 60)
    #[serde(default = "default_pullback_max_pct")]
    pub pullback_max_pct: f64,

    /// Relative buffer past the extreme for breakout confirmation
    /// (default: 0.002 = 0.2%)
    #[serde(default = "default_breakout_buffer")]
    pub breakout_buffer: f64,

    /// Latest volume vs window average for the breakout gate (default: 1.2)
    #[serde(default = "default_breakout_volume_multiplier")]
    pub breakout_volume_multiplier: f64,
}

fn default_lookback() -> usize {
    20
}
fn default_impulse_pct() -> f64 {
    3.0
}
fn default_volume_multiplier() -> f64 {
    1.5
}
fn default_pullback_min_pct() -> f64 {
    20.0
}
fn default_pullback_max_pct() -> f64 {
    60.0
}
fn default_breakout_buffer() -> f64 {
    0.002
}
fn default_breakout_volume_multiplier() -> f64 {
    1.2
}

impl Default for ImpulseBreakoutConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            impulse_pct: default_impulse_pct(),
            volume_multiplier: default_volume_multiplier(),
            pullback_min_pct: default_pullback_min_pct(),
            pullback_max_pct: default_pullback_max_pct(),
            breakout_buffer: default_breakout_buffer(),
            breakout_volume_multiplier: default_breakout_volume_multiplier(),
        }
    }
}

pub struct ImpulseBreakoutDetector {
    config: ImpulseBreakoutConfig,
}

impl ImpulseBreakoutDetector {
    pub fn new(config: ImpulseBreakoutConfig) -> Self {
        ImpulseBreakoutDetector { config }
    }

    /// Retracement of the impulse move, in percent of its range.
    ///
    /// `prior` is the window without its latest bar; `extreme_idx` indexes
    /// into `prior`. Returns `None` when no bar exists after the extreme or
    /// the impulse has zero range.
    fn retracement_pct(
        &self,
        prior: &[Candle],
        extreme_idx: usize,
        extreme: f64,
        start_close: f64,
        side: Side,
    ) -> Option<f64> {
        let after = &prior[extreme_idx + 1..];
        if after.is_empty() {
            return None;
        }

        match side {
            Side::Long => {
                let range = extreme - start_close;
                if range <= 0.0 {
                    return None;
                }
                let pull_low = after.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                Some((extreme - pull_low) / range * 100.0)
            }
            Side::Short => {
                let range = start_close - extreme;
                if range <= 0.0 {
                    return None;
                }
                let pull_high = after.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                Some((pull_high - extreme) / range * 100.0)
            }
        }
    }
}

impl Detector for ImpulseBreakoutDetector {
    fn name(&self) -> &'static str {
        "impulse_breakout"
    }

    fn min_candles(&self) -> usize {
        self.config.lookback
    }

    fn detect(&self, view: &MarketView<'_>) -> Result<Signal, IndicatorError> {
        let candles = view.candles;
        if candles.len() < self.config.lookback {
            return Err(IndicatorError::InsufficientData {
                needed: self.config.lookback,
                got: candles.len(),
            });
        }

        let window = &candles[candles.len() - self.config.lookback..];
        let start_close = window[0].close;
        let latest = &window[window.len() - 1];
        let prior = &window[..window.len() - 1];
        if prior.is_empty() {
            return Ok(Signal::Flat);
        }

        let avg_volume: f64 =
            window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;

        // Gate 1: impulse magnitude + volume
        let delta_pct = (latest.close - start_close) / start_close * 100.0;
        if delta_pct.abs() < self.config.impulse_pct
            || latest.volume < avg_volume * self.config.volume_multiplier
        {
            return Ok(Signal::Flat);
        }

        let side = if delta_pct > 0.0 {
            Side::Long
        } else {
            Side::Short
        };

        // Window extreme, excluding the breakout bar itself
        let (extreme_idx, extreme) = match side {
            Side::Long => prior
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.high))
                .fold((0, f64::MIN), |acc, x| if x.1 > acc.1 { x } else { acc }),
            Side::Short => prior
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.low))
                .fold((0, f64::MAX), |acc, x| if x.1 < acc.1 { x } else { acc }),
        };

        // Gate 2: pullback depth inside the configured band
        let Some(retrace) =
            self.retracement_pct(prior, extreme_idx, extreme, start_close, side)
        else {
            return Ok(Signal::Flat);
        };
        if retrace < self.config.pullback_min_pct || retrace > self.config.pullback_max_pct {
            return Ok(Signal::Flat);
        }

        // Gates 3 + 4: breakout past the extreme on renewed volume
        let broke_out = match side {
            Side::Long => latest.close > extreme * (1.0 + self.config.breakout_buffer),
            Side::Short => latest.close < extreme * (1.0 - self.config.breakout_buffer),
        };
        if !broke_out
            || latest.volume < avg_volume * self.config.breakout_volume_multiplier
        {
            return Ok(Signal::Flat);
        }

        Ok(Signal::Enter {
            side,
            strength: 1.0,
        })
    }
}
