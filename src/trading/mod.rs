//! Trading logic: ledger, risk gate, and the grid/DCA strategies.

mod action;
mod config;
mod dca;
mod grid;
mod ledger;
mod risk;
mod strategy;

pub use action::Action;
pub use config::{EngineConfig, StrategyParams};
pub use ledger::{FillRecord, Ledger, Submission};
pub use risk::{RiskDecision, RiskGate};
pub use strategy::{build_strategy, Strategy, StrategyEvent, StrategyStatus};

#[cfg(test)]
pub use config::{DcaConfig, GridConfig, RiskConfig, SpacingMode, StrategyConfig};
