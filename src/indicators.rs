//! Technical indicators
//!
//! Pure functions over price and candle series. Every function either
//! returns a series aligned to its input (alignment documented per
//! function) or fails with [`IndicatorError::InsufficientData`].
//!
//! Two EMA seeding conventions exist in the wild and disagree on output
//! length; both are exported here ([`ema`] and [`ema_from_first`]), but all
//! internal consumers use the SMA-of-first-period convention exclusively.

use thiserror::Error;

use crate::Candle;

/// Indicator computation errors
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("insufficient data: needed {needed} values, got {got}")]
    InsufficientData { needed: usize, got: usize },
}

/// Calculate Simple Moving Average
///
/// Entries before index `period - 1` are `None`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate Exponential Moving Average, seeded with the SMA of the first
/// `period` values.
///
/// Output has the same length as `values`; entries before index
/// `period - 1` are `None`. Smoothing constant k = 2/(period+1).
pub fn ema(values: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    if values.is_empty() {
        return Err(IndicatorError::InsufficientData { needed: 1, got: 0 });
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        match ema_value {
            None if i + 1 < period => result.push(None),
            None => {
                let sum: f64 = values[0..period].iter().sum();
                ema_value = Some(sum / period as f64);
                result.push(ema_value);
            }
            Some(prev) => {
                let next = (value - prev) * multiplier + prev;
                ema_value = Some(next);
                result.push(ema_value);
            }
        }
    }

    Ok(result)
}

/// Calculate Exponential Moving Average, seeded with the first value.
///
/// Defined at every index, so the output length always equals
/// `values.len()`. Smoothing constant k = 2/(period+1).
pub fn ema_from_first(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    if values.is_empty() {
        return Err(IndicatorError::InsufficientData { needed: 1, got: 0 });
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    let mut ema_value = values[0];
    result.push(ema_value);

    for &value in &values[1..] {
        ema_value = (value - ema_value) * multiplier + ema_value;
        result.push(ema_value);
    }

    Ok(result)
}

/// Calculate RSI (Relative Strength Index) with Wilder smoothing.
///
/// Seed average gain/loss are simple means of the first `period`
/// per-step gains/losses; afterwards `avg = (avg*(period-1) + new) / period`.
/// When the average loss is zero the RSI is 100 (maximal strength, not a
/// division fault). Output index 0 corresponds to input index `period`, so
/// the output length is `values.len() - period`.
pub fn rsi(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    if values.len() <= period {
        return Err(IndicatorError::InsufficientData {
            needed: period + 1,
            got: values.len(),
        });
    }

    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for w in values.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(values.len() - period);
    result.push(rsi_point(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        result.push(rsi_point(avg_gain, avg_loss));
    }

    Ok(result)
}

fn rsi_point(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Signed consecutive up/down streak lengths.
///
/// Resets to +1/-1 on a direction change, increments/decrements while the
/// direction persists, and is 0 when the close is unchanged. Index 0 is 0.
pub fn streaks(closes: &[f64]) -> Vec<f64> {
    let mut result = Vec::with_capacity(closes.len());
    let mut streak = 0.0_f64;

    for (i, &close) in closes.iter().enumerate() {
        if i == 0 {
            result.push(0.0);
            continue;
        }
        let prev = closes[i - 1];
        streak = if close > prev {
            if streak > 0.0 {
                streak + 1.0
            } else {
                1.0
            }
        } else if close < prev {
            if streak < 0.0 {
                streak - 1.0
            } else {
                -1.0
            }
        } else {
            0.0
        };
        result.push(streak);
    }

    result
}

/// Connors RSI: mean of price RSI, streak RSI, and percent rank.
///
/// Components, each normalized to 0-100:
/// 1. RSI of closes over `rsi_period`;
/// 2. RSI of the absolute streak-length series over `streak_period`;
/// 3. percent rank of the latest percent change within the trailing
///    `rank_period` prior changes (strictly-less count / window size).
///
/// Requires at least `rank_period + 2` closes.
pub fn connors_rsi(
    closes: &[f64],
    rsi_period: usize,
    streak_period: usize,
    rank_period: usize,
) -> Result<f64, IndicatorError> {
    if closes.len() < rank_period + 2 {
        return Err(IndicatorError::InsufficientData {
            needed: rank_period + 2,
            got: closes.len(),
        });
    }

    let price_rsi = last_value(&rsi(closes, rsi_period)?);

    let streak_abs: Vec<f64> = streaks(closes).iter().map(|s| s.abs()).collect();
    let streak_rsi = last_value(&rsi(&streak_abs, streak_period)?);

    let changes: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    let current = changes[changes.len() - 1];
    let window = &changes[changes.len() - 1 - rank_period..changes.len() - 1];
    let below = window.iter().filter(|&&c| c < current).count();
    let rank = below as f64 / rank_period as f64 * 100.0;

    Ok((price_rsi + streak_rsi + rank) / 3.0)
}

fn last_value(series: &[f64]) -> f64 {
    series[series.len() - 1]
}

/// True range per candle.
///
/// For candle `i >= 1`: `max(high-low, |high-prev_close|, |low-prev_close|)`.
/// Output length is `candles.len() - 1`; entry `j` corresponds to candle
/// `j + 1`.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let hl = w[1].high - w[1].low;
            let hc = (w[1].high - w[0].close).abs();
            let lc = (w[1].low - w[0].close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Wilder-smoothed Average True Range, indexed by candle.
///
/// The first value is the simple mean of the first `period` true ranges and
/// corresponds to candle index `period`; later values follow the EMA
/// recursion with k = 2/(period+1). [`AtrSeries::value_at`] takes candle
/// indices directly so callers never handle the offset themselves.
pub fn atr(candles: &[Candle], period: usize) -> Result<AtrSeries, IndicatorError> {
    if candles.len() <= period {
        return Err(IndicatorError::InsufficientData {
            needed: period + 1,
            got: candles.len(),
        });
    }

    let tr = true_range(candles);
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut values = Vec::with_capacity(tr.len() - period + 1);
    let mut current: f64 = tr[..period].iter().sum::<f64>() / period as f64;
    values.push(current);

    for &range in &tr[period..] {
        current = (range - current) * multiplier + current;
        values.push(current);
    }

    Ok(AtrSeries { period, values })
}

/// ATR series addressed by candle index.
#[derive(Debug, Clone)]
pub struct AtrSeries {
    period: usize,
    values: Vec<f64>,
}

impl AtrSeries {
    /// ATR at the given candle index; `None` before index `period`.
    pub fn value_at(&self, candle_idx: usize) -> Option<f64> {
        candle_idx
            .checked_sub(self.period)
            .and_then(|i| self.values.get(i))
            .copied()
    }

    /// ATR at the last candle of the source series.
    pub fn latest(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Number of candles the series needs before producing a value.
    pub fn period(&self) -> usize {
        self.period
    }
}
