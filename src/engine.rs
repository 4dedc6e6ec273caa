//! Evaluation engine
//!
//! One cycle walks the configured instruments in order: resolve exits for
//! open positions first, then consider a new entry. The ledger is the only
//! shared mutable state and is owned here, so all mutation is serialized by
//! construction. A failing instrument is logged and skipped; it never
//! aborts the cycle for the others.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TradingConfig;
use crate::data::{DataError, MarketData};
use crate::detect::{Detector, MarketView, Signal};
use crate::exits;
use crate::indicators::{self, IndicatorError};
use crate::ledger::Ledger;
use crate::risk::{RiskEngine, TpSl};
use crate::Symbol;

/// Per-instrument evaluation failure; recoverable by design
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

/// The signal-to-execution pipeline for one detector over one ledger
pub struct Engine<M: MarketData> {
    market: M,
    detector: Box<dyn Detector>,
    risk: RiskEngine,
    ledger: Ledger,
    symbols: Vec<Symbol>,
    interval: String,
    confirmation_interval: String,
    history_candles: u32,
    atr_period: usize,
    multiplier_overrides: HashMap<Symbol, TpSl>,
}

impl<M: MarketData> Engine<M> {
    pub fn new(
        market: M,
        detector: Box<dyn Detector>,
        risk: RiskEngine,
        ledger: Ledger,
        trading: &TradingConfig,
    ) -> Self {
        Engine {
            market,
            detector,
            risk,
            ledger,
            symbols: trading.symbols(),
            interval: trading.interval.clone(),
            confirmation_interval: trading.confirmation_interval.clone(),
            history_candles: trading.history_candles,
            atr_period: trading.atr_period,
            multiplier_overrides: HashMap::new(),
        }
    }

    /// Install per-symbol TP/SL multipliers fitted by the optimizer
    pub fn set_multiplier_overrides(&mut self, overrides: HashMap<Symbol, TpSl>) {
        self.multiplier_overrides = overrides;
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    /// Evaluate every configured instrument once.
    ///
    /// Returns the number of instruments that evaluated cleanly.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> usize {
        let symbols = self.symbols.clone();
        let mut clean = 0;

        for symbol in &symbols {
            match self.evaluate_symbol(symbol, now).await {
                Ok(()) => clean += 1,
                Err(e) => warn!(%symbol, error = %e, "instrument skipped this cycle"),
            }
        }

        clean
    }

    /// Evaluate one instrument: exit check before entry consideration.
    async fn evaluate_symbol(
        &mut self,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Result<(), EvalError> {
        let candles = self
            .market
            .fetch_candles(symbol, &self.interval, self.history_candles)
            .await?;

        // An open position is resolved before any new entry is considered
        if let Some(position) = self.ledger.position(symbol).cloned() {
            if let Some(fill) = exits::resolve_exit(&position, &candles) {
                self.ledger.close(symbol, fill.price, fill.reason, fill.at);
            } else {
                match self.market.fetch_last_price(symbol).await {
                    Ok(price) => self.ledger.monitor(symbol, price),
                    Err(e) => warn!(%symbol, error = %e, "monitor tick unavailable"),
                }
            }
            return Ok(());
        }

        let confirmation = if self.detector.needs_confirmation_timeframe() {
            Some(
                self.market
                    .fetch_candles(symbol, &self.confirmation_interval, self.history_candles)
                    .await?,
            )
        } else {
            None
        };

        let view = match &confirmation {
            Some(higher) => MarketView::with_confirmation(&candles, higher),
            None => MarketView::new(&candles),
        };

        let signal = self.detector.detect(&view)?;
        let Signal::Enter { side, strength } = signal else {
            return Ok(());
        };

        if !self.ledger.can_open_new(symbol) {
            debug!(%symbol, "signal ignored: cannot open new position");
            return Ok(());
        }

        let atr_series = indicators::atr(&candles, self.atr_period)?;
        let Some(atr) = atr_series.latest() else {
            return Ok(());
        };
        let Some(last) = candles.last() else {
            return Err(DataError::NoData(symbol.to_string()).into());
        };

        let multipliers = self
            .multiplier_overrides
            .get(symbol)
            .copied()
            .unwrap_or_else(|| self.risk.config().multipliers());

        debug!(%symbol, %side, strength, "entry signal");

        let exposure = self.ledger.exposure(self.risk.config().exposure_mode);
        match self.risk.plan_entry(
            side,
            self.ledger.balance().to_f64(),
            last.close,
            atr,
            exposure,
            multipliers,
        ) {
            Ok(plan) => {
                if let Err(e) = self.ledger.open(symbol.clone(), &plan, now) {
                    warn!(%symbol, error = %e, "open rejected by ledger");
                }
            }
            Err(reject) => warn!(%symbol, reason = %reject, "entry rejected"),
        }

        Ok(())
    }
}
