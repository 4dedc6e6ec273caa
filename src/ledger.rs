//! Position ledger
//!
//! Owns the virtual account: balance, the map of open positions (one per
//! symbol), cumulative PnL, and win/loss counters. All monetary mutation
//! happens here and only here, in [`Money`], so the conservation invariant
//! `balance + reserved margin of open positions == initial balance + total
//! PnL` holds exactly at every point in time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::risk::{EntryPlan, ExposureMode};
use crate::{Money, Side, Symbol};

/// Why a position left the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    EndOfData,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "TP"),
            CloseReason::StopLoss => write!(f, "SL"),
            CloseReason::EndOfData => write!(f, "end_of_data"),
        }
    }
}

/// An open simulated position.
///
/// Created by [`Ledger::open`], owned exclusively by the ledger, and
/// removed on close. Only open positions live in the book; terminal state
/// is carried by the [`ClosedTrade`] archive record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
    pub notional: f64,
    pub reserved_margin: f64,
    pub commission_open: f64,
}

impl Position {
    /// Mark-to-market PnL before commissions
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - current_price) * self.size,
        }
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
    pub pnl: Money,
    pub commission: Money,
    pub net_pnl: Money,
}

/// Structured events emitted by the ledger
#[derive(Debug, Clone)]
pub enum TradeEvent {
    Opened {
        symbol: Symbol,
        side: Side,
        entry_price: f64,
        size: f64,
        take_profit: f64,
        stop_loss: f64,
        reserved_margin: f64,
    },
    Closed(ClosedTrade),
    Monitor {
        symbol: Symbol,
        side: Side,
        last_price: f64,
        unrealized_pnl: f64,
    },
}

/// Sink for trade events; formatting and transport live outside the core
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TradeEvent);
}

/// Default sink: structured log lines
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &TradeEvent) {
        match event {
            TradeEvent::Opened {
                symbol,
                side,
                entry_price,
                size,
                take_profit,
                stop_loss,
                reserved_margin,
            } => info!(
                %symbol,
                %side,
                entry = %format!("{entry_price:.4}"),
                size = %format!("{size:.6}"),
                tp = %format!("{take_profit:.4}"),
                sl = %format!("{stop_loss:.4}"),
                margin = %format!("{reserved_margin:.2}"),
                "position opened"
            ),
            TradeEvent::Closed(trade) => info!(
                symbol = %trade.symbol,
                side = %trade.side,
                reason = %trade.reason,
                entry = %format!("{:.4}", trade.entry_price),
                exit = %format!("{:.4}", trade.exit_price),
                net_pnl = %trade.net_pnl,
                "position closed"
            ),
            TradeEvent::Monitor {
                symbol,
                side,
                last_price,
                unrealized_pnl,
            } => info!(
                %symbol,
                %side,
                last = %format!("{last_price:.4}"),
                unrealized = %format!("{unrealized_pnl:.2}"),
                "position monitored"
            ),
        }
    }
}

/// Sink that drops everything; used by the optimizer replay
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &TradeEvent) {}
}

/// Ledger operation failures; callers log and carry on
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("position already open for {0}")]
    AlreadyOpen(Symbol),

    #[error("insufficient balance: have {balance:.2}, need {required:.2}")]
    InsufficientBalance { balance: f64, required: f64 },
}

/// Per-symbol close counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SymbolStats {
    pub closed: u32,
    pub wins: u32,
}

/// The virtual account and open-position book
pub struct Ledger {
    initial_balance: Money,
    balance: Money,
    total_pnl: Money,
    total_closed: u32,
    wins: u32,
    per_symbol: HashMap<Symbol, SymbolStats>,
    positions: HashMap<Symbol, Position>,
    commission_rate: f64,
    max_positions: usize,
    sink: Box<dyn EventSink>,
}

impl Ledger {
    pub fn new(initial_balance: f64, commission_rate: f64, max_positions: usize) -> Self {
        Self::with_sink(
            initial_balance,
            commission_rate,
            max_positions,
            Box::new(LogSink),
        )
    }

    pub fn with_sink(
        initial_balance: f64,
        commission_rate: f64,
        max_positions: usize,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let initial = Money::from_f64(initial_balance);
        Ledger {
            initial_balance: initial,
            balance: initial,
            total_pnl: Money::ZERO,
            total_closed: 0,
            wins: 0,
            per_symbol: HashMap::new(),
            positions: HashMap::new(),
            commission_rate,
            max_positions,
            sink,
        }
    }

    pub fn initial_balance(&self) -> Money {
        self.initial_balance
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn total_pnl(&self) -> Money {
        self.total_pnl
    }

    pub fn total_closed(&self) -> u32 {
        self.total_closed
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    /// Fraction of closed trades that hit take-profit
    pub fn win_rate(&self) -> f64 {
        if self.total_closed == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_closed as f64
        }
    }

    pub fn per_symbol(&self) -> &HashMap<Symbol, SymbolStats> {
        &self.per_symbol
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Aggregate exposure over open positions in the given mode
    pub fn exposure(&self, mode: ExposureMode) -> f64 {
        self.positions
            .values()
            .map(|p| match mode {
                ExposureMode::Margin => p.reserved_margin,
                ExposureMode::Notional => p.notional,
            })
            .sum()
    }

    /// Whether a new position may be opened for `symbol`: no existing
    /// position, below the concurrency cap, and at least one unit of quote
    /// currency left.
    pub fn can_open_new(&self, symbol: &Symbol) -> bool {
        !self.positions.contains_key(symbol)
            && self.positions.len() < self.max_positions
            && self.balance >= Money::ONE
    }

    /// Open a position from an accepted sizing plan.
    ///
    /// Re-checks balance even though the risk engine already did; the
    /// ledger is the last line of defense for its own invariant.
    pub fn open(
        &mut self,
        symbol: Symbol,
        plan: &EntryPlan,
        opened_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.positions.contains_key(&symbol) {
            return Err(LedgerError::AlreadyOpen(symbol));
        }

        let required = plan.reserved_margin + plan.commission_open;
        if self.balance.to_f64() < required {
            return Err(LedgerError::InsufficientBalance {
                balance: self.balance.to_f64(),
                required,
            });
        }

        self.balance -= Money::from_f64(plan.reserved_margin);

        let position = Position {
            symbol: symbol.clone(),
            side: plan.side,
            entry_price: plan.entry_price,
            size: plan.size,
            take_profit: plan.take_profit,
            stop_loss: plan.stop_loss,
            opened_at,
            notional: plan.notional,
            reserved_margin: plan.reserved_margin,
            commission_open: plan.commission_open,
        };

        self.sink.emit(&TradeEvent::Opened {
            symbol: symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            size: position.size,
            take_profit: position.take_profit,
            stop_loss: position.stop_loss,
            reserved_margin: position.reserved_margin,
        });

        self.positions.insert(symbol, position);
        Ok(())
    }

    /// Close the position for `symbol`, if any.
    ///
    /// Net PnL is the raw price move minus both commission legs; the
    /// reserved margin plus net PnL returns to the balance. A close for a
    /// symbol without a position is a silent no-op.
    pub fn close(
        &mut self,
        symbol: &Symbol,
        exit_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let position = self.positions.remove(symbol)?;

        let entry = Money::from_f64(position.entry_price);
        let exit = Money::from_f64(exit_price);
        let size = Money::from_f64(position.size);

        let pnl = match position.side {
            Side::Long => (exit - entry) * size,
            Side::Short => (entry - exit) * size,
        };

        let commission_open = Money::from_f64(position.commission_open);
        let commission_close = exit * size * Money::from_f64(self.commission_rate);
        let commission = commission_open + commission_close;
        let net_pnl = pnl - commission;

        self.balance += Money::from_f64(position.reserved_margin) + net_pnl;
        self.total_pnl += net_pnl;
        self.total_closed += 1;

        let won = reason == CloseReason::TakeProfit;
        if won {
            self.wins += 1;
        }
        let stats = self.per_symbol.entry(symbol.clone()).or_default();
        stats.closed += 1;
        if won {
            stats.wins += 1;
        }

        let trade = ClosedTrade {
            symbol: symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            opened_at: position.opened_at,
            closed_at,
            reason,
            pnl,
            commission,
            net_pnl,
        };

        self.sink.emit(&TradeEvent::Closed(trade.clone()));
        Some(trade)
    }

    /// Emit a monitor event for a still-open position; no state change
    pub fn monitor(&self, symbol: &Symbol, last_price: f64) {
        if let Some(position) = self.positions.get(symbol) {
            self.sink.emit(&TradeEvent::Monitor {
                symbol: symbol.clone(),
                side: position.side,
                last_price,
                unrealized_pnl: position.unrealized_pnl(last_price),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskConfig, RiskEngine};

    fn plan(side: Side, price: f64) -> EntryPlan {
        RiskEngine::new(RiskConfig::default())
            .plan_entry(
                side,
                1000.0,
                price,
                2.0,
                0.0,
                RiskConfig::default().multipliers(),
            )
            .unwrap()
    }

    fn conservation_holds(ledger: &Ledger) -> bool {
        let margin: Money = ledger
            .open_positions()
            .map(|p| Money::from_f64(p.reserved_margin))
            .sum();
        ledger.balance() + margin == ledger.initial_balance() + ledger.total_pnl()
    }

    #[test]
    fn test_open_deducts_margin() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");

        ledger.open(symbol.clone(), &plan(Side::Long, 100.0), Utc::now()).unwrap();

        assert_eq!(ledger.balance(), Money::from_f64(900.0));
        assert_eq!(ledger.open_count(), 1);
        assert!(conservation_holds(&ledger));
    }

    #[test]
    fn test_second_open_same_symbol_rejected() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");

        ledger.open(symbol.clone(), &plan(Side::Long, 100.0), Utc::now()).unwrap();
        let balance_before = ledger.balance();

        let result = ledger.open(symbol.clone(), &plan(Side::Long, 100.0), Utc::now());
        assert_eq!(result, Err(LedgerError::AlreadyOpen(symbol)));
        assert_eq!(ledger.balance(), balance_before);
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_close_tp_counts_win_and_restores_margin() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");

        ledger.open(symbol.clone(), &plan(Side::Long, 100.0), Utc::now()).unwrap();
        let trade = ledger
            .close(&symbol, 104.0, CloseReason::TakeProfit, Utc::now())
            .unwrap();

        // Raw: (104 - 100) * 5 = 20
        assert_eq!(trade.pnl, Money::from_f64(20.0));
        assert_eq!(ledger.total_closed(), 1);
        assert_eq!(ledger.wins(), 1);
        assert!(ledger.position(&symbol).is_none());
        assert!(conservation_holds(&ledger));
    }

    #[test]
    fn test_close_sl_is_not_a_win() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("ETHUSDT");

        ledger.open(symbol.clone(), &plan(Side::Short, 100.0), Utc::now()).unwrap();
        ledger.close(&symbol, 103.0, CloseReason::StopLoss, Utc::now()).unwrap();

        assert_eq!(ledger.wins(), 0);
        assert_eq!(ledger.total_closed(), 1);
        assert!(ledger.total_pnl().is_negative());
        assert!(conservation_holds(&ledger));
    }

    #[test]
    fn test_close_without_position_is_noop() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");

        assert!(ledger.close(&symbol, 100.0, CloseReason::TakeProfit, Utc::now()).is_none());
        assert_eq!(ledger.balance(), Money::from_f64(1000.0));
        assert_eq!(ledger.total_closed(), 0);
    }

    #[test]
    fn test_can_open_new_respects_caps() {
        let mut ledger = Ledger::with_sink(1000.0, 0.0009, 1, Box::new(NullSink));
        let btc = Symbol::new("BTCUSDT");
        let eth = Symbol::new("ETHUSDT");

        assert!(ledger.can_open_new(&btc));
        ledger.open(btc.clone(), &plan(Side::Long, 100.0), Utc::now()).unwrap();

        assert!(!ledger.can_open_new(&btc)); // already open
        assert!(!ledger.can_open_new(&eth)); // concurrency cap
    }

    #[test]
    fn test_can_open_new_requires_balance_floor() {
        let ledger = Ledger::with_sink(0.5, 0.0009, 5, Box::new(NullSink));
        assert!(!ledger.can_open_new(&Symbol::new("BTCUSDT")));
    }

    #[test]
    fn test_exposure_modes() {
        let mut ledger = Ledger::with_sink(10_000.0, 0.0009, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");
        let entry = RiskEngine::new(RiskConfig::default())
            .plan_entry(
                Side::Long,
                10_000.0,
                100.0,
                2.0,
                0.0,
                RiskConfig::default().multipliers(),
            )
            .unwrap();
        ledger.open(symbol, &entry, Utc::now()).unwrap();

        assert!((ledger.exposure(ExposureMode::Margin) - entry.reserved_margin).abs() < 1e-9);
        assert!((ledger.exposure(ExposureMode::Notional) - entry.notional).abs() < 1e-9);
    }

    #[test]
    fn test_commission_on_both_legs() {
        let rate = 0.0009;
        let mut ledger = Ledger::with_sink(1000.0, rate, 5, Box::new(NullSink));
        let symbol = Symbol::new("BTCUSDT");

        ledger.open(symbol.clone(), &plan(Side::Long, 100.0), Utc::now()).unwrap();
        let trade = ledger
            .close(&symbol, 104.0, CloseReason::TakeProfit, Utc::now())
            .unwrap();

        // Entry notional 500, exit notional 520
        let expected = (Money::from_f64(500.0) + Money::from_f64(520.0)) * Money::from_f64(rate);
        assert_eq!(trade.commission, expected);
        assert_eq!(trade.net_pnl, trade.pnl - expected);
    }
}
