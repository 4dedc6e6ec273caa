//! CLI command implementations

pub mod backtest;
pub mod download;
pub mod optimize;
pub mod paper;

use paper_trader::Symbol;

/// Parse a comma-separated symbol list
pub fn parse_symbols(s: &str) -> Vec<Symbol> {
    s.split(',')
        .map(|sym| sym.trim().to_uppercase())
        .filter(|sym| !sym.is_empty())
        .map(Symbol::new)
        .collect()
}
