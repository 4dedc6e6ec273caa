//! Integration tests for the paper trading engine
//!
//! These tests verify that the components work together correctly: sizing
//! feeds the ledger, exits resolve against candle history, and the account
//! invariants hold across full open/close sequences.

use std::collections::HashMap;
use std::sync::Mutex;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};

use paper_trader::data::{DataError, MarketData};
use paper_trader::detect::{self, DetectorConfig, EmaCrossConfig, RsiCrossConfig};
use paper_trader::engine::Engine;
use paper_trader::exits;
use paper_trader::indicators;
use paper_trader::ledger::{CloseReason, Ledger, NullSink};
use paper_trader::optimize::Optimizer;
use paper_trader::risk::{EntryPlan, RiskConfig, RiskEngine, TpSl};
use paper_trader::{Candle, Config, Money, Side, Symbol};

// =============================================================================
// Test Utilities
// =============================================================================

/// Generate mock candle data for testing
fn generate_mock_candles(count: usize, base_price: f64, volatility: f64) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(count);
    let mut price = base_price;
    let start_time = Utc::now() - Duration::hours(count as i64);

    for i in 0..count {
        // Simple deterministic walk
        let change = if i % 3 == 0 {
            volatility
        } else if i % 3 == 1 {
            -volatility * 0.5
        } else {
            volatility * 0.3
        };

        price += change;
        let high = price + volatility * 0.5;
        let low = price - volatility * 0.5;
        let open = price - change * 0.3;
        let close = price;

        candles.push(Candle {
            datetime: start_time + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000.0 + (i as f64 * 10.0),
        });
    }

    candles
}

fn candles_from_closes(closes: &[f64], start: DateTime<Utc>) -> Vec<Candle> {
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

fn quiet_ledger(balance: f64) -> Ledger {
    Ledger::with_sink(balance, 0.0009, 5, Box::new(NullSink))
}

/// The account invariant: balance + held margin == initial + total PnL,
/// exactly, at any point in time.
fn conservation_holds(ledger: &Ledger) -> bool {
    let margin: Money = ledger
        .open_positions()
        .map(|p| Money::from_f64(p.reserved_margin))
        .sum();
    ledger.balance() + margin == ledger.initial_balance() + ledger.total_pnl()
}

// =============================================================================
// Ledger + Risk Engine
// =============================================================================

#[test]
fn test_balance_conservation_across_sequence() {
    let risk = RiskEngine::new(RiskConfig::default());
    let mut ledger = quiet_ledger(10_000.0);
    let mults = RiskConfig::default().multipliers();
    let now = Utc::now();

    let instruments = [
        (Symbol::new("BTCUSDT"), 100.0, 2.0),
        (Symbol::new("ETHUSDT"), 50.0, 1.2),
        (Symbol::new("SOLUSDT"), 20.0, 0.8),
    ];

    // Open all three
    for (symbol, price, atr) in &instruments {
        let exposure = ledger.exposure(risk.config().exposure_mode);
        let plan = risk
            .plan_entry(
                Side::Long,
                ledger.balance().to_f64(),
                *price,
                *atr,
                exposure,
                mults,
            )
            .unwrap();
        ledger.open(symbol.clone(), &plan, now).unwrap();
        assert!(conservation_holds(&ledger));
    }
    assert_eq!(ledger.open_count(), 3);

    // Close one at TP, one at SL, leave one open
    let btc = &instruments[0].0;
    let tp = ledger.position(btc).unwrap().take_profit;
    ledger.close(btc, tp, CloseReason::TakeProfit, now).unwrap();
    assert!(conservation_holds(&ledger));

    let eth = &instruments[1].0;
    let sl = ledger.position(eth).unwrap().stop_loss;
    ledger.close(eth, sl, CloseReason::StopLoss, now).unwrap();
    assert!(conservation_holds(&ledger));

    assert_eq!(ledger.open_count(), 1);
    assert_eq!(ledger.total_closed(), 2);
    assert_eq!(ledger.wins(), 1);

    // Reopen a closed symbol
    let exposure = ledger.exposure(risk.config().exposure_mode);
    let plan = risk
        .plan_entry(
            Side::Short,
            ledger.balance().to_f64(),
            101.0,
            2.0,
            exposure,
            mults,
        )
        .unwrap();
    ledger.open(btc.clone(), &plan, now).unwrap();
    assert!(conservation_holds(&ledger));
    assert_eq!(ledger.open_count(), 2);
}

#[test]
fn test_second_open_for_symbol_is_noop() {
    let risk = RiskEngine::new(RiskConfig::default());
    let mut ledger = quiet_ledger(10_000.0);
    let symbol = Symbol::new("BTCUSDT");
    let now = Utc::now();

    let plan = risk
        .plan_entry(
            Side::Long,
            10_000.0,
            100.0,
            2.0,
            0.0,
            RiskConfig::default().multipliers(),
        )
        .unwrap();

    ledger.open(symbol.clone(), &plan, now).unwrap();
    let balance_after_first = ledger.balance();

    assert!(ledger.open(symbol.clone(), &plan, now).is_err());
    assert_eq!(ledger.open_count(), 1);
    assert_eq!(ledger.balance(), balance_after_first);
    assert!(conservation_holds(&ledger));
}

/// The documented sizing walk-through: balance 1000, 1% risk, leverage 5,
/// price 100, ATR 2, 0.2% stop floor.
#[test]
fn test_reference_sizing_scenario() {
    let risk = RiskEngine::new(RiskConfig::default());
    let plan = risk
        .plan_entry(
            Side::Long,
            1000.0,
            100.0,
            2.0,
            0.0,
            TpSl {
                tp_multiplier: 2.0,
                sl_multiplier: 1.5,
            },
        )
        .unwrap();

    assert_relative_eq!(plan.stop_distance, 2.0);
    assert_relative_eq!(plan.size, 5.0);
    assert_relative_eq!(plan.notional, 500.0);
    assert_relative_eq!(plan.reserved_margin, 100.0);
    assert_relative_eq!(plan.commission_open, 0.45, epsilon = 1e-12);
    assert!(plan.take_profit > plan.entry_price && plan.entry_price > plan.stop_loss);
}

/// Open long entry 100, size 1, tp 110, sl 95; a candle with high 112
/// resolves at TP 110 and nets 10 minus both commission legs, exactly.
#[test]
fn test_tp_close_with_exact_commission_accounting() {
    let rate = 0.0009;
    let mut ledger = quiet_ledger(1000.0);
    let symbol = Symbol::new("BTCUSDT");
    let opened_at = Utc::now();

    let plan = EntryPlan {
        side: Side::Long,
        entry_price: 100.0,
        size: 1.0,
        notional: 100.0,
        reserved_margin: 20.0,
        commission_open: 0.09, // entry notional 100 * rate
        stop_distance: 5.0,
        take_profit: 110.0,
        stop_loss: 95.0,
    };
    ledger.open(symbol.clone(), &plan, opened_at).unwrap();

    let candles = vec![
        Candle::new_unchecked(opened_at + Duration::hours(1), 102.0, 106.0, 101.0, 105.0, 1.0),
        Candle::new_unchecked(opened_at + Duration::hours(2), 105.0, 112.0, 104.0, 111.0, 1.0),
    ];

    let position = ledger.position(&symbol).unwrap().clone();
    let fill = exits::resolve_exit(&position, &candles).unwrap();
    assert_eq!(fill.reason, CloseReason::TakeProfit);
    assert_relative_eq!(fill.price, 110.0);

    let trade = ledger.close(&symbol, fill.price, fill.reason, fill.at).unwrap();

    // net = raw - (entry_notional + exit_notional) * rate
    let expected_commission =
        (Money::from_f64(100.0) + Money::from_f64(110.0)) * Money::from_f64(rate);
    assert_eq!(trade.pnl, Money::from_f64(10.0));
    assert_eq!(trade.commission, expected_commission);
    assert_eq!(trade.net_pnl, Money::from_f64(10.0) - expected_commission);

    assert_eq!(
        ledger.balance(),
        Money::from_f64(1000.0) + trade.net_pnl
    );
    assert!(conservation_holds(&ledger));
}

#[test]
fn test_tie_break_candle_resolves_to_tp_both_sides() {
    let opened_at = Utc::now();
    // One candle spanning both bounds of both positions
    let candle = Candle::new_unchecked(
        opened_at + Duration::hours(1),
        100.0,
        115.0,
        85.0,
        100.0,
        1.0,
    );

    assert_eq!(
        exits::check_candle(Side::Long, 110.0, 95.0, &candle),
        Some((110.0, CloseReason::TakeProfit))
    );
    assert_eq!(
        exits::check_candle(Side::Short, 90.0, 105.0, &candle),
        Some((90.0, CloseReason::TakeProfit))
    );
}

// =============================================================================
// Indicator properties over generated data
// =============================================================================

#[test]
fn test_indicator_bounds_on_mock_data() {
    let candles = generate_mock_candles(120, 100.0, 2.0);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let rsi = indicators::rsi(&closes, 14).unwrap();
    assert_eq!(rsi.len(), closes.len() - 14);
    assert!(rsi.iter().all(|&v| (0.0..=100.0).contains(&v)));

    let crsi = indicators::connors_rsi(&closes, 3, 2, 100).unwrap();
    assert!((0.0..=100.0).contains(&crsi));

    let atr = indicators::atr(&candles, 14).unwrap();
    for idx in 14..candles.len() {
        assert!(atr.value_at(idx).unwrap() >= 0.0);
    }

    let ema_full = indicators::ema_from_first(&closes, 9).unwrap();
    assert_eq!(ema_full.len(), closes.len());
}

/// EMA9 crossing above EMA21 with a rising slow-EMA slope must classify as
/// a long entry through the public registry path.
#[test]
fn test_ema_cross_long_scenario() {
    let mut closes = vec![100.0; 25];
    closes.extend(std::iter::repeat(90.0).take(10));
    closes.extend([93.0, 96.0, 99.0, 102.0]);
    let candles = candles_from_closes(&closes, Utc::now() - Duration::hours(48));

    let detector = detect::create(&DetectorConfig::EmaCross(EmaCrossConfig::default()));
    let signal = detector
        .detect(&detect::MarketView::new(&candles))
        .unwrap();

    assert_eq!(signal.side(), Some(Side::Long));
    assert!(!signal.is_flat());
}

// =============================================================================
// Optimizer replay
// =============================================================================

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

#[test]
fn test_replay_conserves_account() {
    let config = Config {
        detector: DetectorConfig::RsiCross(RsiCrossConfig {
            period: 3,
            min_rsi: 30.0,
            max_rsi: 70.0,
        }),
        ..Config::default()
    };
    let optimizer = Optimizer::new(&config);
    let symbol = Symbol::new("BTCUSDT");
    let candles = candles_from_closes(&wave_closes(), Utc::now() - Duration::days(10));
    let detector = detect::create(&config.detector);

    let outcome = optimizer.replay(
        &symbol,
        &candles,
        detector.as_ref(),
        TpSl {
            tp_multiplier: 1.0,
            sl_multiplier: 1.0,
        },
    );

    assert!(!outcome.trades.is_empty());
    // Nothing left open, so final balance must equal initial + net profit
    assert_relative_eq!(
        outcome.final_balance,
        config.trading.initial_balance + outcome.net_profit,
        epsilon = 1e-9
    );

    // Single-position replay never overlaps trades
    for pair in outcome.trades.windows(2) {
        assert!(pair[1].opened_at >= pair[0].closed_at);
    }
}

// =============================================================================
// Engine cycle over a mock market
// =============================================================================

/// Mutable canned market: candles swapped between cycles
struct ScriptedMarket {
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    last_price: f64,
}

impl MarketData for ScriptedMarket {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        _interval: &str,
        _limit: u32,
    ) -> Result<Vec<Candle>, DataError> {
        self.candles
            .lock()
            .expect("candles lock")
            .get(symbol.as_str())
            .cloned()
            .ok_or_else(|| DataError::NoData(symbol.to_string()))
    }

    async fn fetch_last_price(&self, _symbol: &Symbol) -> Result<f64, DataError> {
        Ok(self.last_price)
    }
}

/// Falling closes ending in a bounce through the RSI threshold
fn bounce_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..20).map(|i| 130.0 - 2.0 * i as f64).collect();
    closes.push(95.0);
    closes
}

#[tokio::test]
async fn test_engine_full_lifecycle_open_then_tp() {
    let start = Utc::now() - Duration::hours(48);
    let symbol = Symbol::new("BTCUSDT");
    let candles = candles_from_closes(&bounce_closes(), start);
    let last_candle_time = candles[candles.len() - 1].datetime;

    let market = ScriptedMarket {
        candles: Mutex::new(HashMap::from([("BTCUSDT".to_string(), candles.clone())])),
        last_price: 95.0,
    };

    let config = Config::default();
    let mut trading = config.trading.clone();
    trading.symbols = vec!["BTCUSDT".to_string()];
    trading.history_candles = 50;

    let detector = detect::create(&DetectorConfig::RsiCross(RsiCrossConfig {
        period: 3,
        min_rsi: 30.0,
        max_rsi: 70.0,
    }));
    let ledger = Ledger::with_sink(10_000.0, 0.0009, 5, Box::new(NullSink));
    let mut engine = Engine::new(
        market,
        detector,
        RiskEngine::new(RiskConfig::default()),
        ledger,
        &trading,
    );

    // Cycle 1: the bounce bar fires the signal and opens a long
    let open_time = last_candle_time + Duration::minutes(5);
    engine.run_cycle(open_time).await;
    let position = engine
        .ledger()
        .position(&symbol)
        .expect("position opened")
        .clone();
    assert_eq!(position.side, Side::Long);
    assert!(position.take_profit > position.entry_price);
    assert!(position.stop_loss < position.entry_price);

    // Cycle 2: a fresh candle after the open touches the take-profit
    {
        let tp_candle = Candle::new_unchecked(
            open_time + Duration::hours(1),
            position.entry_price,
            position.take_profit + 1.0,
            position.entry_price - 0.5,
            position.take_profit + 0.5,
            1500.0,
        );
        let mut data = engine_market_candles(&engine);
        data.push(tp_candle);
        // Reinstall the extended series
        set_engine_market_candles(&engine, data);
    }

    engine.run_cycle(open_time + Duration::hours(2)).await;

    let ledger = engine.ledger();
    assert!(ledger.position(&symbol).is_none());
    assert_eq!(ledger.total_closed(), 1);
    assert_eq!(ledger.wins(), 1);
    assert!(ledger.total_pnl().is_positive());
    assert!(conservation_holds(ledger));
}

fn engine_market_candles(engine: &Engine<ScriptedMarket>) -> Vec<Candle> {
    engine
        .market()
        .candles
        .lock()
        .expect("candles lock")
        .get("BTCUSDT")
        .cloned()
        .unwrap_or_default()
}

fn set_engine_market_candles(engine: &Engine<ScriptedMarket>, candles: Vec<Candle>) {
    engine
        .market()
        .candles
        .lock()
        .expect("candles lock")
        .insert("BTCUSDT".to_string(), candles);
}

#[tokio::test]
async fn test_signal_never_opens_past_concurrency_cap() {
    let start = Utc::now() - Duration::hours(48);
    let closes = bounce_closes();

    let market = ScriptedMarket {
        candles: Mutex::new(HashMap::from([
            ("BTCUSDT".to_string(), candles_from_closes(&closes, start)),
            ("ETHUSDT".to_string(), candles_from_closes(&closes, start)),
        ])),
        last_price: 95.0,
    };

    let config = Config::default();
    let mut trading = config.trading.clone();
    trading.symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    trading.history_candles = 50;

    let detector = detect::create(&DetectorConfig::RsiCross(RsiCrossConfig {
        period: 3,
        min_rsi: 30.0,
        max_rsi: 70.0,
    }));
    // Cap of one concurrent position
    let ledger = Ledger::with_sink(10_000.0, 0.0009, 1, Box::new(NullSink));
    let mut engine = Engine::new(
        market,
        detector,
        RiskEngine::new(RiskConfig::default()),
        ledger,
        &trading,
    );

    engine.run_cycle(Utc::now()).await;

    // Both symbols signal, only one may open
    assert_eq!(engine.ledger().open_count(), 1);
    assert!(conservation_holds(engine.ledger()));
}
