//! Download command
//!
//! Fetches historical candles for the configured symbols and saves them as
//! `{SYMBOL}_{interval}.csv` files readable by the offline commands.

use anyhow::{Context, Result};
use tracing::info;

use paper_trader::data;
use paper_trader::exchange::SpotClient;
use paper_trader::Config;

use super::parse_symbols;

pub fn run(
    config_path: String,
    symbols_override: Option<String>,
    candles: u32,
    output: String,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let symbols = symbols_override
        .as_deref()
        .map(parse_symbols)
        .unwrap_or_else(|| config.trading.symbols());

    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output dir {output}"))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    runtime.block_on(async {
        let client = SpotClient::new(&config.exchange)?;

        for symbol in &symbols {
            let history = client
                .fetch_history(symbol, &config.trading.interval, candles)
                .await?;

            let path = format!(
                "{output}/{}_{}.csv",
                symbol.as_str(),
                config.trading.interval
            );
            data::save_csv(&path, &history)?;
            info!(
                "Saved {} candles for {} to {}",
                history.len(),
                symbol,
                path
            );
        }

        anyhow::Ok(())
    })?;

    println!("Downloaded {} symbols to {output}/", symbols.len());
    Ok(())
}
