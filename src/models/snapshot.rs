//! Immutable per-tick view of market and account state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Balance, OrderSide, OrderStatus};

/// An open order as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub exchange_id: String,
    /// Echoed client id; `None` for orders placed outside this process
    pub client_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
}

/// Market and account state captured by one adapter fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketAccountSnapshot {
    pub taken_at: DateTime<Utc>,

    /// Last price per symbol
    pub prices: HashMap<String, Decimal>,

    /// Balances keyed by asset
    pub balances: HashMap<String, Balance>,

    /// Orders the exchange considers open
    pub open_orders: Vec<ExchangeOrder>,
}

impl MarketAccountSnapshot {
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }
}
