//! Order actions proposed by strategies and the risk gate.

use serde::Serialize;

use crate::models::OrderRequest;

/// Owner tag for orders the risk gate creates itself.
pub const RISK_OWNER: &str = "risk-gate";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Submit a new order
    Place(OrderRequest),

    /// Cancel one order by client id
    Cancel {
        client_id: String,
        symbol: String,
        owner: String,
        reason: String,
    },

    /// Cancel every open order, for one symbol or all of them
    CancelAll {
        symbol: Option<String>,
        reason: String,
    },
}

impl Action {
    pub fn cancel(
        client_id: impl Into<String>,
        symbol: impl Into<String>,
        owner: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Action::Cancel {
            client_id: client_id.into(),
            symbol: symbol.into(),
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Action::Place(req) => Some(&req.symbol),
            Action::Cancel { symbol, .. } => Some(symbol),
            Action::CancelAll { symbol, .. } => symbol.as_deref(),
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Action::Place(req) => &req.owner,
            Action::Cancel { owner, .. } => owner,
            Action::CancelAll { .. } => RISK_OWNER,
        }
    }

    pub fn as_place(&self) -> Option<&OrderRequest> {
        match self {
            Action::Place(req) => Some(req),
            _ => None,
        }
    }
}
