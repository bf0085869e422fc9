//! Common strategy interface.
//!
//! Strategies are synchronous state machines driven by the engine once per
//! tick. They hold only client-id references into the ledger and re-read
//! order state through a [`LedgerView`] every tick.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::StrategyError;
use crate::models::{MarketAccountSnapshot, OrderStatus};

use super::action::Action;
use super::config::{StrategyConfig, StrategyParams};
use super::dca::DcaStrategy;
use super::grid::GridStrategy;
use super::ledger::{FillRecord, LedgerView};
use super::risk::RiskDecision;

/// Notable strategy transitions, forwarded to the event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StrategyEvent {
    CycleComplete {
        symbol: String,
        profit: Decimal,
        safety_orders_used: u32,
    },
    StopLossTriggered {
        symbol: String,
        price: Decimal,
        average_entry: Decimal,
        quantity: Decimal,
    },
    GridRebalanced {
        symbol: String,
        old_center: Decimal,
        new_center: Decimal,
    },
}

/// Point-in-time summary for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub tag: String,
    pub symbol: String,
    pub kind: &'static str,
    pub phase: String,
    pub active: bool,
    pub open_orders: usize,
    /// Grid ladder size
    pub levels: Option<usize>,
    /// DCA safety orders filled this cycle
    pub safety_orders_used: Option<u32>,
    pub entry_price: Option<Decimal>,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] open_orders={}",
            self.tag, self.phase, self.open_orders
        )?;
        if let Some(levels) = self.levels {
            write!(f, " levels={}", levels)?;
        }
        if let Some(used) = self.safety_orders_used {
            write!(f, " safety_orders={}", used)?;
        }
        if let Some(entry) = self.entry_price {
            write!(f, " entry={}", entry)?;
        }
        Ok(())
    }
}

pub trait Strategy: Send {
    /// Owner tag stamped on this strategy's orders.
    fn tag(&self) -> &str;

    fn symbol(&self) -> &str;

    /// A fill on one of this strategy's orders, delivered before `decide`.
    fn on_fill(&mut self, fill: &FillRecord, view: &LedgerView<'_>);

    /// Propose actions for this tick.
    fn decide(
        &mut self,
        snapshot: &MarketAccountSnapshot,
        view: &LedgerView<'_>,
    ) -> Result<Vec<Action>, StrategyError>;

    /// The risk gate changed or dropped one of this strategy's actions.
    fn on_risk_decision(&mut self, decision: &RiskDecision);

    /// Cancels for every open order this strategy owns. Deactivates it.
    fn shutdown_actions(&mut self, view: &LedgerView<'_>) -> Vec<Action>;

    fn take_events(&mut self) -> Vec<StrategyEvent>;

    fn status(&self, view: &LedgerView<'_>) -> StrategyStatus;
}

/// Instantiate the strategy a config entry describes.
pub fn build_strategy(config: &StrategyConfig) -> Box<dyn Strategy> {
    let tag = config.tag();
    match &config.params {
        StrategyParams::Grid(grid) => {
            Box::new(GridStrategy::new(tag, config.symbol.clone(), grid.clone()))
        }
        StrategyParams::Dca(dca) => {
            Box::new(DcaStrategy::new(tag, config.symbol.clone(), dca.clone()))
        }
    }
}

/// Lifecycle of a referenced order as far as a strategy can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefState {
    /// Proposed but not yet in the ledger
    InFlight,
    Live,
    Filled,
    /// Cancelled or rejected
    Dead,
}

pub(crate) fn ref_state(view: &LedgerView<'_>, client_id: &str) -> RefState {
    match view.order(client_id).map(|o| o.status) {
        None => RefState::InFlight,
        Some(OrderStatus::Filled) => RefState::Filled,
        Some(OrderStatus::Cancelled | OrderStatus::Rejected) => RefState::Dead,
        Some(_) => RefState::Live,
    }
}

/// Cancels for every open order owned by `tag`.
pub(crate) fn cancel_owned(view: &LedgerView<'_>, tag: &str, reason: &str) -> Vec<Action> {
    view.open_orders()
        .into_iter()
        .filter(|o| o.owner == tag)
        .map(|o| Action::cancel(&o.client_id, &o.symbol, tag, reason))
        .collect()
}
