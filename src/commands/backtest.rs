//! Backtest command
//!
//! Replays a single TP/SL multiplier pair over one symbol's history and
//! prints the trade tape plus summary statistics.

use anyhow::{Context, Result};
use tracing::info;

use paper_trader::data;
use paper_trader::detect;
use paper_trader::exchange::SpotClient;
use paper_trader::optimize::Optimizer;
use paper_trader::risk::TpSl;
use paper_trader::{Config, Symbol};

pub fn run(
    config_path: String,
    symbol_override: Option<String>,
    data_dir: Option<String>,
    tp_override: Option<f64>,
    sl_override: Option<f64>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let symbol = symbol_override
        .map(Symbol::new)
        .or_else(|| config.trading.symbols().into_iter().next())
        .context("No symbol configured")?;

    let candles = if let Some(dir) = data_dir {
        let path = format!("{dir}/{}_{}.csv", symbol.as_str(), config.trading.interval);
        data::load_csv(&path).with_context(|| format!("Failed to load {path}"))?
    } else {
        let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
        runtime.block_on(async {
            let client = SpotClient::new(&config.exchange)?;
            let candles = client
                .fetch_history(
                    &symbol,
                    &config.trading.interval,
                    config.optimizer.history_candles,
                )
                .await?;
            anyhow::Ok(candles)
        })?
    };

    info!("Replaying {} candles for {}", candles.len(), symbol);

    let multipliers = TpSl {
        tp_multiplier: tp_override.unwrap_or(config.risk.tp_multiplier),
        sl_multiplier: sl_override.unwrap_or(config.risk.sl_multiplier),
    };

    let optimizer = Optimizer::new(&config);
    let detector = detect::create(&config.detector);
    let outcome = optimizer.replay(&symbol, &candles, detector.as_ref(), multipliers);

    println!("\n{}", "=".repeat(78));
    println!("TRADE TAPE - {symbol}");
    println!("{}", "=".repeat(78));
    println!(
        "{:<22} {:<6} {:>10} {:>10} {:>8} {:>12}",
        "Closed", "Side", "Entry", "Exit", "Reason", "Net PnL"
    );
    for trade in &outcome.trades {
        println!(
            "{:<22} {:<6} {:>10.4} {:>10.4} {:>8} {:>12.4}",
            trade.closed_at.format("%Y-%m-%d %H:%M"),
            trade.side.to_string(),
            trade.entry_price,
            trade.exit_price,
            trade.reason.to_string(),
            trade.net_pnl.to_f64()
        );
    }

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("TP/SL multipliers:  {:.2} / {:.2}", multipliers.tp_multiplier, multipliers.sl_multiplier);
    println!("Initial balance:    {:.2}", config.trading.initial_balance);
    println!("Final balance:      {:.2}", outcome.final_balance);
    println!("Net profit:         {:.2}", outcome.net_profit);
    println!("Trades:             {}", outcome.trades.len());
    println!("Win rate:           {:.1}%", outcome.win_rate * 100.0);

    Ok(())
}
