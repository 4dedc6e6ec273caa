//! Multi-timeframe confirmation detector
//!
//! Wraps an inner detector that proposes the candidate side, then scores
//! agreement across (a) the confirmation timeframe's EMA trend, (b) the
//! working timeframe's EMA trend, and (c) the last candle body. The
//! candidate is accepted when the score reaches the configured minimum.

use serde::{Deserialize, Serialize};

use super::{create, Detector, DetectorConfig, MarketView, Signal};
use crate::indicators::{ema, IndicatorError};
use crate::{Candle, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfConfirmConfig {
    /// Fast trend EMA period (default: 20)
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,

    /// Slow trend EMA period (default: 50)
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,

    /// Minimum confirmation score out of 3 (default: 2)
    #[serde(default = "default_min_score")]
    pub min_score: u32,

    /// Detector producing the candidate side
    pub inner: Box<DetectorConfig>,
}

fn default_ema_fast() -> usize {
    20
}
fn default_ema_slow() -> usize {
    50
}
fn default_min_score() -> u32 {
    2
}

pub struct MtfConfirmDetector {
    config: MtfConfirmConfig,
    inner: Box<dyn Detector>,
}

impl MtfConfirmDetector {
    pub fn new(config: MtfConfirmConfig) -> Self {
        let inner = create(&config.inner);
        MtfConfirmDetector { config, inner }
    }

    /// EMA trend agreement on one candle series; `None` when the series is
    /// too short to score.
    fn trend_agrees(&self, candles: &[Candle], side: Side) -> Option<bool> {
        if candles.len() < self.config.ema_slow {
            return None;
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = ema(&closes, self.config.ema_fast).ok()?.last().copied()??;
        let slow = ema(&closes, self.config.ema_slow).ok()?.last().copied()??;
        Some(match side {
            Side::Long => fast > slow,
            Side::Short => fast < slow,
        })
    }
}

impl Detector for MtfConfirmDetector {
    fn name(&self) -> &'static str {
        "mtf_confirm"
    }

    fn min_candles(&self) -> usize {
        self.inner.min_candles().max(self.config.ema_slow + 1)
    }

    fn needs_confirmation_timeframe(&self) -> bool {
        true
    }

    fn detect(&self, view: &MarketView<'_>) -> Result<Signal, IndicatorError> {
        let candidate = self.inner.detect(view)?;
        let Signal::Enter { side, .. } = candidate else {
            return Ok(Signal::Flat);
        };

        let mut score = 0u32;

        // (a) confirmation timeframe trend
        if let Some(candles) = view.confirmation {
            if self.trend_agrees(candles, side) == Some(true) {
                score += 1;
            }
        }

        // (b) working timeframe trend
        if self.trend_agrees(view.candles, side) == Some(true) {
            score += 1;
        }

        // (c) last candle body direction
        if let Some(last) = view.candles.last() {
            let body_agrees = match side {
                Side::Long => last.is_bullish(),
                Side::Short => last.close < last.open,
            };
            if body_agrees {
                score += 1;
            }
        }

        if score >= self.config.min_score {
            Ok(Signal::Enter {
                side,
                strength: score as f64 / 3.0,
            })
        } else {
            Ok(Signal::Flat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RsiCrossConfig;
    use chrono::{Duration, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Candle::new_unchecked(
                    start + Duration::hours(i as i64),
                    open,
                    open.max(close) + 0.5,
                    open.min(close) - 0.5,
                    close,
                    1000.0,
                )
            })
            .collect()
    }

    fn config() -> MtfConfirmConfig {
        MtfConfirmConfig {
            ema_fast: 5,
            ema_slow: 10,
            min_score: 2,
            inner: Box::new(DetectorConfig::RsiCross(RsiCrossConfig {
                period: 3,
                min_rsi: 30.0,
                max_rsi: 70.0,
            })),
        }
    }

    /// Downtrend ending in a bullish bounce: the inner RSI cross fires Long,
    /// the working-timeframe EMAs still point down, the candle body is
    /// bullish.
    fn working_candles() -> Vec<Candle> {
        candles_from_closes(&[
            112.0, 110.0, 108.0, 106.0, 104.0, 102.0, 100.0, 98.0, 96.0, 94.0, 97.0,
        ])
    }

    #[test]
    fn test_confirmation_trend_plus_body_accepts() {
        let working = working_candles();
        let confirmation: Vec<Candle> =
            candles_from_closes(&(0..15).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let detector = MtfConfirmDetector::new(config());

        // (a) uptrend confirmation + (c) bullish body = score 2
        let view = MarketView::with_confirmation(&working, &confirmation);
        let signal = detector.detect(&view).unwrap();
        assert_eq!(signal.side(), Some(Side::Long));
        if let Signal::Enter { strength, .. } = signal {
            assert!((strength - 2.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_missing_confirmation_drops_below_min_score() {
        let working = working_candles();
        let detector = MtfConfirmDetector::new(config());

        // Only the candle body agrees: score 1 < 2
        let signal = detector.detect(&MarketView::new(&working)).unwrap();
        assert!(signal.is_flat());
    }

    #[test]
    fn test_flat_inner_stays_flat() {
        let working =
            candles_from_closes(&[112.0, 110.0, 108.0, 106.0, 104.0, 102.0, 100.0, 98.0, 96.0, 94.0, 92.0]);
        let confirmation: Vec<Candle> =
            candles_from_closes(&(0..15).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let detector = MtfConfirmDetector::new(config());

        let view = MarketView::with_confirmation(&working, &confirmation);
        assert!(detector.detect(&view).unwrap().is_flat());
    }

    #[test]
    fn test_needs_confirmation_timeframe() {
        let detector = MtfConfirmDetector::new(config());
        assert!(detector.needs_confirmation_timeframe());
        assert_eq!(detector.min_candles(), 11);
    }
}
