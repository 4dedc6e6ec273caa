//! Paper trading command
//!
//! The outer polling loop: build the engine, optionally seed TP/SL
//! multipliers from the optimizer, then evaluate all instruments on a
//! fixed cadence until interrupted.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use paper_trader::detect;
use paper_trader::engine::Engine;
use paper_trader::exchange::SpotClient;
use paper_trader::ledger::Ledger;
use paper_trader::optimize::Optimizer;
use paper_trader::risk::{RiskEngine, TpSl};
use paper_trader::{Config, Symbol};

pub fn run(
    config_path: String,
    optimize_first: bool,
    cycles: Option<u64>,
    interval_override: Option<u64>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    runtime.block_on(run_loop(config, optimize_first, cycles, interval_override))
}

async fn run_loop(
    config: Config,
    optimize_first: bool,
    cycles: Option<u64>,
    interval_override: Option<u64>,
) -> Result<()> {
    let client = SpotClient::new(&config.exchange)?;
    let detector = detect::create(&config.detector);
    let risk = RiskEngine::new(config.risk.clone());
    let ledger = Ledger::new(
        config.trading.initial_balance,
        config.risk.commission_rate,
        config.risk.max_concurrent_positions,
    );

    info!(
        detector = detector.name(),
        symbols = config.trading.symbols.len(),
        interval = %config.trading.interval,
        balance = config.trading.initial_balance,
        "paper trading starting"
    );

    let mut engine = Engine::new(client.clone(), detector, risk, ledger, &config.trading);

    if optimize_first {
        engine.set_multiplier_overrides(seed_multipliers(&config, &client).await);
    }

    let poll = Duration::from_secs(
        interval_override.unwrap_or(config.trading.poll_interval_secs),
    );
    let mut completed: u64 = 0;

    loop {
        let clean = engine.run_cycle(Utc::now()).await;
        completed += 1;

        let ledger = engine.ledger();
        info!(
            cycle = completed,
            clean,
            balance = %ledger.balance(),
            total_pnl = %ledger.total_pnl(),
            open = ledger.open_count(),
            closed = ledger.total_closed(),
            win_rate = %format!("{:.1}%", ledger.win_rate() * 100.0),
            "cycle complete"
        );

        if let Some(limit) = cycles {
            if completed >= limit {
                info!("cycle limit reached");
                break;
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = tokio::time::sleep(poll) => {}
        }
    }

    let ledger = engine.ledger();
    println!("\n{}", "=".repeat(60));
    println!("PAPER TRADING SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Cycles:             {completed}");
    println!("Final balance:      {}", ledger.balance());
    println!("Total PnL:          {}", ledger.total_pnl());
    println!("Closed trades:      {}", ledger.total_closed());
    println!("Win rate:           {:.1}%", ledger.win_rate() * 100.0);
    println!("Open positions:     {}", ledger.open_count());

    Ok(())
}

/// Fit per-symbol multipliers over an extended history window before the
/// loop starts; symbols that fail to fetch fall back to the static pair.
async fn seed_multipliers(config: &Config, client: &SpotClient) -> HashMap<Symbol, TpSl> {
    let optimizer = Optimizer::new(config);
    let mut overrides = HashMap::new();

    for symbol in config.trading.symbols() {
        let candles = match client
            .fetch_history(
                &symbol,
                &config.trading.interval,
                config.optimizer.history_candles,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(%symbol, error = %e, "optimizer seed skipped");
                continue;
            }
        };

        let result = optimizer.optimize_symbol(
            &symbol,
            &candles,
            &config.optimizer.tp_multipliers,
            &config.optimizer.sl_multipliers,
            None,
        );
        overrides.insert(symbol, result.multipliers);
    }

    overrides
}
