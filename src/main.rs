//! Paper trader - main entry point
//!
//! This binary provides four subcommands:
//! - paper: run the live paper-trading loop against exchange data
//! - optimize: grid-search TP/SL multipliers over historical candles
//! - backtest: replay one multiplier pair and print the trade tape
//! - download: download historical candles to CSV

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "paper-trader")]
#[command(about = "Signal-driven paper trading with TP/SL simulation and optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the paper-trading loop
    Paper {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/paper.json")]
        config: String,

        /// Seed per-symbol TP/SL multipliers from the optimizer first
        #[arg(long)]
        optimize_first: bool,

        /// Stop after this many cycles (default: run until interrupted)
        #[arg(long)]
        cycles: Option<u64>,

        /// Cycle interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Grid-search TP/SL multipliers per symbol
    Optimize {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/paper.json")]
        config: String,

        /// Symbols to optimize (comma-separated, overrides config)
        #[arg(short, long)]
        symbols: Option<String>,

        /// Load candles from CSV files in this directory instead of fetching
        #[arg(long)]
        data_dir: Option<String>,

        /// Write results to this CSV file
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Replay one TP/SL pair over history and print the trade tape
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/paper.json")]
        config: String,

        /// Symbol to replay (defaults to the first configured symbol)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Load candles from CSV files in this directory instead of fetching
        #[arg(long)]
        data_dir: Option<String>,

        /// Take-profit multiplier (overrides config)
        #[arg(long)]
        tp: Option<f64>,

        /// Stop-loss multiplier (overrides config)
        #[arg(long)]
        sl: Option<f64>,
    },

    /// Download historical candles to CSV
    Download {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/paper.json")]
        config: String,

        /// Symbols to download (comma-separated, overrides config)
        #[arg(short, long)]
        symbols: Option<String>,

        /// Number of candles per symbol
        #[arg(long, default_value = "1000")]
        candles: u32,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        output: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP-stack crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // For the optimizer: log only to file, keep the console clean for
        // the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Paper { .. } => ("paper", false),
        Commands::Optimize { .. } => ("optimize", true), // File-only for clean progress bar
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Download { .. } => ("download", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Paper {
            config,
            optimize_first,
            cycles,
            interval,
        } => commands::paper::run(config, optimize_first, cycles, interval),

        Commands::Optimize {
            config,
            symbols,
            data_dir,
            out,
        } => commands::optimize::run(config, symbols, data_dir, out),

        Commands::Backtest {
            config,
            symbol,
            data_dir,
            tp,
            sl,
        } => commands::backtest::run(config, symbol, data_dir, tp, sl),

        Commands::Download {
            config,
            symbols,
            candles,
            output,
        } => commands::download::run(config, symbols, candles, output),
    }
}
