//! Position model: net holding in one symbol built up from fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// The order side that grows a position on this side.
    pub fn opening_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

/// Current position in a symbol.
///
/// Retained after it closes so realized P&L stays queryable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    pub side: PositionSide,

    /// Always >= 0; direction lives in `side`
    pub size: Decimal,

    /// Quantity-weighted average of the opening fills
    pub entry_price: Decimal,

    /// Latest snapshot price
    pub mark_price: Decimal,

    /// Cumulative P&L realized by closing fills
    pub realized_pnl: Decimal,

    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// An empty (flat) position.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: PositionSide::Long,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.size.is_zero()
    }

    /// size * (mark - entry) * sign
    pub fn unrealized_pnl(&self) -> Decimal {
        if self.is_closed() {
            return Decimal::ZERO;
        }
        self.size * (self.mark_price - self.entry_price) * self.side.sign()
    }

    /// Absolute quote value at the mark price.
    pub fn notional(&self) -> Decimal {
        self.size * self.mark_price
    }

    pub fn update_price(&mut self, mark: Decimal) {
        self.mark_price = mark;
        self.last_updated = Utc::now();
    }

    /// Apply a fill and return the P&L it realized.
    ///
    /// Opening fills re-average the entry; closing fills realize P&L at the
    /// current entry. A fill larger than the position closes it and opens
    /// the remainder on the other side at the fill price.
    pub fn apply_fill(&mut self, side: OrderSide, qty: Decimal, price: Decimal) -> Decimal {
        self.last_updated = Utc::now();

        if self.is_closed() {
            self.side = PositionSide::from_order_side(side);
            self.size = qty;
            self.entry_price = price;
            return Decimal::ZERO;
        }

        if self.side.opening_side() == side {
            let total = self.size + qty;
            self.entry_price = (self.entry_price * self.size + price * qty) / total;
            self.size = total;
            return Decimal::ZERO;
        }

        let closed = qty.min(self.size);
        let realized = closed * (price - self.entry_price) * self.side.sign();
        self.realized_pnl += realized;
        self.size -= closed;

        let remainder = qty - closed;
        if self.size.is_zero() {
            self.entry_price = Decimal::ZERO;
            if remainder > Decimal::ZERO {
                self.side = PositionSide::from_order_side(side);
                self.size = remainder;
                self.entry_price = price;
            }
        }

        realized
    }
}
