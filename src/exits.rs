//! Take-profit / stop-loss exit resolution
//!
//! Scans candles after a position's open time and decides which bound was
//! touched first. When both bounds fall inside the same candle the
//! take-profit side is checked first. This is a deterministic tie-break
//! policy, not an attempt to infer true intrabar sequencing.

use chrono::{DateTime, Utc};

use crate::ledger::{CloseReason, Position};
use crate::{Candle, Side};

/// A resolved exit: fill price, reason, and the candle that triggered it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub price: f64,
    pub reason: CloseReason,
    pub at: DateTime<Utc>,
}

/// Test a single candle against the TP/SL bounds.
///
/// Long: `high >= tp` fills at TP, else `low <= sl` fills at SL.
/// Short: `low <= tp` fills at TP, else `high >= sl` fills at SL.
pub fn check_candle(
    side: Side,
    take_profit: f64,
    stop_loss: f64,
    candle: &Candle,
) -> Option<(f64, CloseReason)> {
    match side {
        Side::Long => {
            if candle.high >= take_profit {
                Some((take_profit, CloseReason::TakeProfit))
            } else if candle.low <= stop_loss {
                Some((stop_loss, CloseReason::StopLoss))
            } else {
                None
            }
        }
        Side::Short => {
            if candle.low <= take_profit {
                Some((take_profit, CloseReason::TakeProfit))
            } else if candle.high >= stop_loss {
                Some((stop_loss, CloseReason::StopLoss))
            } else {
                None
            }
        }
    }
}

/// Resolve a position against candle history.
///
/// Candles are scanned in chronological order, skipping any that predate
/// the open; the first candle whose range touches a bound decides the
/// exit. Returns `None` while the position is still unresolved.
pub fn resolve_exit(position: &Position, candles: &[Candle]) -> Option<ExitFill> {
    candles
        .iter()
        .filter(|c| c.datetime >= position.opened_at)
        .find_map(|c| {
            check_candle(position.side, position.take_profit, position.stop_loss, c).map(
                |(price, reason)| ExitFill {
                    price,
                    reason,
                    at: c.datetime,
                },
            )
        })
}
