//! Risk and position sizing
//!
//! Turns an entry signal into a concrete sizing decision: risk-based size
//! from the stop distance, notional and exposure caps, margin and open
//! commission, and the TP/SL price levels. The engine is pure: it never
//! mutates shared state, and rejections are values rather than faults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Side;

/// How aggregate exposure is measured against `max_exposure_usd`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// Sum of reserved margin across open positions
    #[default]
    Margin,
    /// Sum of notional value across open positions
    Notional,
}

/// Risk parameters, read-only after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade (default: 0.01)
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,

    /// Leverage applied to notional for margin reservation (default: 5)
    #[serde(default = "default_leverage")]
    pub leverage: f64,

    /// Maximum simultaneously open positions (default: 5)
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// Portfolio-level exposure cap in quote currency (default: 5000)
    #[serde(default = "default_max_exposure_usd")]
    pub max_exposure_usd: f64,

    /// Per-trade notional cap in quote currency (default: 10000)
    #[serde(default = "default_max_notional_per_trade")]
    pub max_notional_per_trade: f64,

    /// Stop-distance floor as a fraction of price (default: 0.002)
    #[serde(default = "default_min_stop_pct")]
    pub min_stop_pct: f64,

    /// Commission per leg as a fraction of notional (default: 0.0009)
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,

    /// Take-profit distance in stop-distance multiples (default: 2.0)
    #[serde(default = "default_tp_multiplier")]
    pub tp_multiplier: f64,

    /// Stop-loss distance in stop-distance multiples (default: 1.5)
    #[serde(default = "default_sl_multiplier")]
    pub sl_multiplier: f64,

    /// Exposure accounting mode (default: margin)
    #[serde(default)]
    pub exposure_mode: ExposureMode,
}

fn default_risk_per_trade() -> f64 {
    0.01
}
fn default_leverage() -> f64 {
    5.0
}
fn default_max_concurrent_positions() -> usize {
    5
}
fn default_max_exposure_usd() -> f64 {
    5_000.0
}
fn default_max_notional_per_trade() -> f64 {
    10_000.0
}
fn default_min_stop_pct() -> f64 {
    0.002
}
fn default_commission_rate() -> f64 {
    0.0009
}
fn default_tp_multiplier() -> f64 {
    2.0
}
fn default_sl_multiplier() -> f64 {
    1.5
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            leverage: default_leverage(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_exposure_usd: default_max_exposure_usd(),
            max_notional_per_trade: default_max_notional_per_trade(),
            min_stop_pct: default_min_stop_pct(),
            commission_rate: default_commission_rate(),
            tp_multiplier: default_tp_multiplier(),
            sl_multiplier: default_sl_multiplier(),
            exposure_mode: ExposureMode::default(),
        }
    }
}

impl RiskConfig {
    /// Static TP/SL multipliers from the config file
    pub fn multipliers(&self) -> TpSl {
        TpSl {
            tp_multiplier: self.tp_multiplier,
            sl_multiplier: self.sl_multiplier,
        }
    }
}

/// A TP/SL multiplier pair, either static or optimizer-fitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpSl {
    pub tp_multiplier: f64,
    pub sl_multiplier: f64,
}

/// Sizing rejection reasons; logged as warnings, never fatal
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum EntryReject {
    #[error("computed position size is not positive")]
    ZeroSize,

    #[error("exposure cap exceeded: {current:.2} held + {required:.2} required > {cap:.2}")]
    ExposureExceeded {
        current: f64,
        required: f64,
        cap: f64,
    },

    #[error("insufficient balance: have {balance:.2}, need {required:.2}")]
    InsufficientBalance { balance: f64, required: f64 },
}

/// Accepted sizing decision, consumed by the ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPlan {
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub notional: f64,
    pub reserved_margin: f64,
    pub commission_open: f64,
    pub stop_distance: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Pure sizing engine over a [`RiskConfig`]
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        RiskEngine { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Size a candidate entry.
    ///
    /// `open_exposure` is the aggregate over currently open positions,
    /// measured in the configured [`ExposureMode`].
    pub fn plan_entry(
        &self,
        side: Side,
        balance: f64,
        price: f64,
        atr: f64,
        open_exposure: f64,
        multipliers: TpSl,
    ) -> Result<EntryPlan, EntryReject> {
        let risk_amount = balance * self.config.risk_per_trade;

        // Near-zero ATR would otherwise size an absurd position
        let stop_distance = atr.max(price * self.config.min_stop_pct);
        if stop_distance <= 0.0 {
            return Err(EntryReject::ZeroSize);
        }

        let mut size = risk_amount / stop_distance;
        if size <= 0.0 {
            return Err(EntryReject::ZeroSize);
        }

        let mut notional = price * size;
        if notional > self.config.max_notional_per_trade {
            size = self.config.max_notional_per_trade / price;
            notional = price * size;
        }

        let reserved_margin = notional / self.config.leverage;
        let commission_open = notional * self.config.commission_rate;

        let exposure_required = match self.config.exposure_mode {
            ExposureMode::Margin => reserved_margin,
            ExposureMode::Notional => notional,
        };
        if open_exposure + exposure_required > self.config.max_exposure_usd {
            return Err(EntryReject::ExposureExceeded {
                current: open_exposure,
                required: exposure_required,
                cap: self.config.max_exposure_usd,
            });
        }

        let required = reserved_margin + commission_open;
        if balance < required {
            return Err(EntryReject::InsufficientBalance { balance, required });
        }

        // Levels use the floored stop distance so TP/SL ordering holds even
        // at zero volatility
        let (take_profit, stop_loss) = match side {
            Side::Long => (
                price + stop_distance * multipliers.tp_multiplier,
                price - stop_distance * multipliers.sl_multiplier,
            ),
            Side::Short => (
                price - stop_distance * multipliers.tp_multiplier,
                price + stop_distance * multipliers.sl_multiplier,
            ),
        };

        Ok(EntryPlan {
            side,
            entry_price: price,
            size,
            notional,
            reserved_margin,
            commission_open,
            stop_distance,
            take_profit,
            stop_loss,
        })
    }
}
