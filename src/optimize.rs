//! TP/SL parameter optimization
//!
//! Offline grid search over take-profit/stop-loss multipliers. Each grid
//! point replays the configured detector and the exit rules sequentially
//! over a historical window (one position at a time, entries at candle
//! close, exits evaluated from the following bar) and the combinations
//! are ranked by net profit. Grid points run in parallel with Rayon.

use indicatif::ProgressBar;
use itertools::iproduct;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::Config;
use crate::detect::{self, Detector, DetectorConfig, MarketView, Signal};
use crate::exits;
use crate::indicators;
use crate::ledger::{ClosedTrade, CloseReason, Ledger, NullSink};
use crate::risk::{RiskConfig, RiskEngine, TpSl};
use crate::{Candle, Symbol};

/// Outcome of replaying one multiplier pair over one symbol's history
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub trades: Vec<ClosedTrade>,
    pub net_profit: f64,
    pub win_rate: f64,
    pub final_balance: f64,
}

/// Best multiplier pair found for one symbol
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub symbol: Symbol,
    pub multipliers: TpSl,
    pub net_profit: f64,
    pub win_rate: f64,
    pub trades: usize,
    /// True when the grid produced nothing usable and the static config
    /// pair was substituted
    pub fallback: bool,
}

/// Grid-search optimizer reusing the live detection and exit rules
pub struct Optimizer {
    detector_config: DetectorConfig,
    risk_config: RiskConfig,
    initial_balance: f64,
    atr_period: usize,
}

impl Optimizer {
    pub fn new(config: &Config) -> Self {
        Optimizer {
            detector_config: config.detector.clone(),
            risk_config: config.risk.clone(),
            initial_balance: config.trading.initial_balance,
            atr_period: config.trading.atr_period,
        }
    }

    /// Replay one multiplier pair over the candle window.
    ///
    /// Signals are taken at candle close; the opened position is then
    /// checked against each following candle, take-profit side first, until
    /// it resolves. Whatever is left open at the end of the window closes
    /// at the final close.
    pub fn replay(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
        detector: &dyn Detector,
        multipliers: TpSl,
    ) -> ReplayOutcome {
        let risk = RiskEngine::new(self.risk_config.clone());
        let mut ledger = Ledger::with_sink(
            self.initial_balance,
            self.risk_config.commission_rate,
            1,
            Box::new(NullSink),
        );
        let mut trades = Vec::new();

        let warmup = detector.min_candles().max(self.atr_period + 1);

        for i in warmup..candles.len() {
            let candle = &candles[i];

            if let Some(position) = ledger.position(symbol) {
                if let Some((price, reason)) = exits::check_candle(
                    position.side,
                    position.take_profit,
                    position.stop_loss,
                    candle,
                ) {
                    if let Some(trade) = ledger.close(symbol, price, reason, candle.datetime) {
                        trades.push(trade);
                    }
                }
                continue;
            }

            let view = MarketView::new(&candles[..=i]);
            let signal = match detector.detect(&view) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let Signal::Enter { side, .. } = signal else {
                continue;
            };

            let Ok(atr_series) = indicators::atr(&candles[..=i], self.atr_period) else {
                continue;
            };
            let Some(atr) = atr_series.latest() else {
                continue;
            };

            let exposure = ledger.exposure(self.risk_config.exposure_mode);
            if let Ok(plan) = risk.plan_entry(
                side,
                ledger.balance().to_f64(),
                candle.close,
                atr,
                exposure,
                multipliers,
            ) {
                let _ = ledger.open(symbol.clone(), &plan, candle.datetime);
            }
        }

        if ledger.position(symbol).is_some() {
            if let Some(last) = candles.last() {
                if let Some(trade) =
                    ledger.close(symbol, last.close, CloseReason::EndOfData, last.datetime)
                {
                    trades.push(trade);
                }
            }
        }

        ReplayOutcome {
            net_profit: ledger.total_pnl().to_f64(),
            win_rate: ledger.win_rate(),
            final_balance: ledger.balance().to_f64(),
            trades,
        }
    }

    /// Grid-search one symbol's history for the best multiplier pair.
    ///
    /// Ranking: net profit, then win rate, then the tighter stop. A best
    /// result with non-positive profit or zero win rate falls back to the
    /// static config multipliers instead of propagating a degenerate pair.
    pub fn optimize_symbol(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
        tp_multipliers: &[f64],
        sl_multipliers: &[f64],
        progress: Option<&ProgressBar>,
    ) -> OptimizationResult {
        let detector = detect::create(&self.detector_config);
        let grid: Vec<TpSl> = iproduct!(tp_multipliers, sl_multipliers)
            .map(|(&tp, &sl)| TpSl {
                tp_multiplier: tp,
                sl_multiplier: sl,
            })
            .collect();

        let outcomes: Vec<(TpSl, ReplayOutcome)> = grid
            .par_iter()
            .map(|&multipliers| {
                let outcome = self.replay(symbol, candles, detector.as_ref(), multipliers);
                if let Some(bar) = progress {
                    bar.inc(1);
                }
                (multipliers, outcome)
            })
            .collect();

        let best = outcomes.iter().max_by(|a, b| {
            a.1.net_profit
                .partial_cmp(&b.1.net_profit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.1.win_rate
                        .partial_cmp(&b.1.win_rate)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    b.0.sl_multiplier
                        .partial_cmp(&a.0.sl_multiplier)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        match best {
            Some((multipliers, outcome)) if outcome.net_profit > 0.0 && outcome.win_rate > 0.0 => {
                info!(
                    %symbol,
                    tp = multipliers.tp_multiplier,
                    sl = multipliers.sl_multiplier,
                    net_profit = %format!("{:.2}", outcome.net_profit),
                    win_rate = %format!("{:.1}%", outcome.win_rate * 100.0),
                    trades = outcome.trades.len(),
                    "optimizer fitted multipliers"
                );
                OptimizationResult {
                    symbol: symbol.clone(),
                    multipliers: *multipliers,
                    net_profit: outcome.net_profit,
                    win_rate: outcome.win_rate,
                    trades: outcome.trades.len(),
                    fallback: false,
                }
            }
            _ => {
                let fallback = self.risk_config.multipliers();
                warn!(
                    %symbol,
                    tp = fallback.tp_multiplier,
                    sl = fallback.sl_multiplier,
                    "no profitable grid point; using static multipliers"
                );
                let outcome = self.replay(symbol, candles, detector.as_ref(), fallback);
                OptimizationResult {
                    symbol: symbol.clone(),
                    multipliers: fallback,
                    net_profit: outcome.net_profit,
                    win_rate: outcome.win_rate,
                    trades: outcome.trades.len(),
                    fallback: true,
                }
            }
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

    /// Repeating sell-off / recovery waves so the RSI cross fires several
    /// long entries that subsequently resolve
    fn wave_closes() -> Vec<f64> {
        let mut closes = Vec::new();
        let mut price = 150.0;
        for _ in 0..6 {
            for _ in 0..8 {
                price -= 2.0;
                closes.push(price);
            }
            for _ in 0..10 {
                price += 3.0;
                closes.push(price);
            }
        }
        closes
    }

    fn optimizer() -> Optimizer {
        let config = Config {
            detector: DetectorConfig::RsiCross(RsiCrossConfig {
                period: 3,
                min_rsi: 30.0,
                max_rsi: 70.0,
            }),
            ..Config::default()
        };
        Optimizer::new(&config)
    }

    #[test]
    fn test_replay_produces_resolved_trades() {
        let opt = optimizer();
        let symbol = Symbol::new("BTCUSDT");
        let candles = candles_from_closes(&wave_closes());
        let detector = detect::create(&DetectorConfig::RsiCross(RsiCrossConfig {
            period: 3,
            min_rsi: 30.0,
            max_rsi: 70.0,
        }));

        let outcome = opt.replay(
            &symbol,
            &candles,
            detector.as_ref(),
            TpSl {
                tp_multiplier: 1.0,
                sl_multiplier: 1.0,
            },
        );

        assert!(!outcome.trades.is_empty());
        // Single-position replay: trades never overlap
        for pair in outcome.trades.windows(2) {
            assert!(pair[1].opened_at >= pair[0].closed_at);
        }
    }

    #[test]
    fn test_optimize_symbol_searches_full_grid() {
        let opt = optimizer();
        let symbol = Symbol::new("BTCUSDT");
        let candles = candles_from_closes(&wave_closes());

        let result = opt.optimize_symbol(
            &symbol,
            &candles,
            &[1.0, 2.0, 3.0],
            &[0.5, 1.0, 1.5],
            None,
        );

        assert_eq!(result.symbol, symbol);
        assert!(result.multipliers.tp_multiplier >= 1.0);
        assert!(result.trades > 0 || result.fallback);
    }

    #[test]
    fn test_degenerate_grid_falls_back_to_static() {
        let opt = optimizer();
        let symbol = Symbol::new("BTCUSDT");
        // Monotone decline: every long entry loses, if any fire at all
        let closes: Vec<f64> = (0..120).map(|i| 300.0 - 2.0 * i as f64).collect();
        let candles = candles_from_closes(&closes);

        let result = opt.optimize_symbol(&symbol, &candles, &[1.0, 2.0], &[1.0, 2.0], None);

        assert!(result.fallback);
        assert_eq!(
            result.multipliers,
            RiskConfig::default().multipliers()
        );
    }
}
