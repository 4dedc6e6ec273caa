//! Optimize command
//!
//! Grid-searches TP/SL multipliers per symbol over a historical window,
//! prints a ranked table, and optionally exports the results to CSV.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use paper_trader::data;
use paper_trader::exchange::SpotClient;
use paper_trader::optimize::{OptimizationResult, Optimizer};
use paper_trader::{Candle, Config, Symbol};

use super::parse_symbols;

pub fn run(
    config_path: String,
    symbols_override: Option<String>,
    data_dir: Option<String>,
    out: Option<String>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let symbols = symbols_override
        .as_deref()
        .map(parse_symbols)
        .unwrap_or_else(|| config.trading.symbols());

    let datasets = load_datasets(&config, &symbols, data_dir.as_deref())?;

    let grid_size = config.optimizer.tp_multipliers.len() * config.optimizer.sl_multipliers.len();
    let bar = ProgressBar::new((grid_size * datasets.len()) as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );

    let optimizer = Optimizer::new(&config);
    let mut results = Vec::new();

    for (symbol, candles) in &datasets {
        bar.set_message(symbol.to_string());
        let result = optimizer.optimize_symbol(
            symbol,
            candles,
            &config.optimizer.tp_multipliers,
            &config.optimizer.sl_multipliers,
            Some(&bar),
        );
        results.push(result);
    }
    bar.finish_and_clear();

    results.sort_by(|a, b| {
        b.net_profit
            .partial_cmp(&a.net_profit)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    println!("\n{}", "=".repeat(72));
    println!("OPTIMIZATION RESULTS");
    println!("{}", "=".repeat(72));
    println!(
        "{:<12} {:>6} {:>6} {:>12} {:>10} {:>8} {:>9}",
        "Symbol", "TP", "SL", "Net Profit", "Win Rate", "Trades", "Fallback"
    );
    for r in &results {
        println!(
            "{:<12} {:>6.2} {:>6.2} {:>12.2} {:>9.1}% {:>8} {:>9}",
            r.symbol,
            r.multipliers.tp_multiplier,
            r.multipliers.sl_multiplier,
            r.net_profit,
            r.win_rate * 100.0,
            r.trades,
            if r.fallback { "yes" } else { "no" }
        );
    }

    if let Some(path) = out {
        export_csv(&path, &results)?;
        println!("\nResults written to {path}");
    }

    Ok(())
}

fn load_datasets(
    config: &Config,
    symbols: &[Symbol],
    data_dir: Option<&str>,
) -> Result<Vec<(Symbol, Vec<Candle>)>> {
    if let Some(dir) = data_dir {
        let mut data = data::load_multi_symbol(dir, symbols, &config.trading.interval)?;
        return Ok(symbols
            .iter()
            .filter_map(|s| data.remove(s).map(|c| (s.clone(), c)))
            .collect());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    runtime.block_on(async {
        let client = SpotClient::new(&config.exchange)?;
        let mut datasets = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let candles = client
                .fetch_history(
                    symbol,
                    &config.trading.interval,
                    config.optimizer.history_candles,
                )
                .await?;
            datasets.push((symbol.clone(), candles));
        }
        Ok(datasets)
    })
}

fn export_csv(path: &str, results: &[OptimizationResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("Failed to create results CSV")?;
    writer.write_record([
        "symbol",
        "tp_multiplier",
        "sl_multiplier",
        "net_profit",
        "win_rate",
        "trades",
        "fallback",
    ])?;

    for r in results {
        writer.write_record([
            r.symbol.to_string(),
            r.multipliers.tp_multiplier.to_string(),
            r.multipliers.sl_multiplier.to_string(),
            format!("{:.4}", r.net_profit),
            format!("{:.4}", r.win_rate),
            r.trades.to_string(),
            r.fallback.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
