//! Error taxonomy for the trading core.
//!
//! Risk violations are deliberately absent: they are gate decisions
//! (see `trading::risk`), not errors.

use rust_decimal::Decimal;
use thiserror::Error;

/// Invalid or contradictory strategy/risk parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("duplicate strategy for symbol {0}")]
    DuplicateSymbol(String),

    #[error("symbol {0} is not in BASE/QUOTE form")]
    BadSymbol(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure talking to the exchange adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl AdapterError {
    /// Whether a read operation may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Network(_) | AdapterError::Timeout { .. })
    }
}

/// Ledger and exchange-reported state disagree beyond the retry window.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconciliationError {
    #[error("{symbol}: order {client_id} missing from exchange for {ticks} syncs")]
    OrderMissing {
        symbol: String,
        client_id: String,
        ticks: u32,
    },

    #[error("{symbol}: order {client_id} is {local} locally but open on exchange")]
    TerminalOrderOpen {
        symbol: String,
        client_id: String,
        local: String,
    },

    #[error("{asset}: locked balance {reported} differs from reserved {expected}")]
    LockedMismatch {
        asset: String,
        expected: Decimal,
        reported: Decimal,
    },

    #[error("{asset}: total balance {reported} differs from expected {expected}")]
    TotalMismatch {
        asset: String,
        expected: Decimal,
        reported: Decimal,
    },

    #[error("{asset}: negative balance reported (free {free}, locked {locked})")]
    NegativeBalance {
        asset: String,
        free: Decimal,
        locked: Decimal,
    },

    #[error("fill for unknown order {order_id} unresolved after {ticks} ticks")]
    OrphanFill { order_id: String, ticks: u32 },
}

impl ReconciliationError {
    /// The symbol this failure is scoped to, if it names one directly.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::OrderMissing { symbol, .. } | Self::TerminalOrderOpen { symbol, .. } => {
                Some(symbol)
            }
            _ => None,
        }
    }

    /// The asset this failure is scoped to, if any.
    pub fn asset(&self) -> Option<&str> {
        match self {
            Self::LockedMismatch { asset, .. }
            | Self::TotalMismatch { asset, .. }
            | Self::NegativeBalance { asset, .. } => Some(asset),
            _ => None,
        }
    }
}

/// Ledger rejected a mutation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("unknown order {0}")]
    UnknownOrder(String),

    #[error("order {client_id} is {status} and cannot change")]
    TerminalOrder { client_id: String, status: String },

    #[error("fill of {fill} exceeds remaining {remaining} on {client_id}")]
    Overfill {
        client_id: String,
        fill: Decimal,
        remaining: Decimal,
    },

    #[error("non-positive fill quantity {qty} or price {price}")]
    BadFill { qty: Decimal, price: Decimal },

    #[error("stale epoch {got}, ledger is at {current}")]
    StaleEpoch { got: u64, current: u64 },

    #[error("duplicate client id {0}")]
    DuplicateClientId(String),
}

/// Unrecoverable strategy failure; the engine disables the strategy.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("{symbol}: {reason}")]
    Invariant { symbol: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
