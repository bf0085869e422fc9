//! Order model: requests sent to the exchange and the ledger's record of them.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

/// Lifecycle of an order.
///
/// `Filled`, `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether moving from `self` to `next` respects the status ordering.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Filled | Cancelled | Rejected, _) => false,
            (Pending, _) => true,
            (Open, Pending) => false,
            (Open, _) => true,
            (PartiallyFilled, Pending | Open) => false,
            (PartiallyFilled, _) => true,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order intent, before the exchange has seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-generated id, unique and immutable
    pub client_id: String,

    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,

    /// Limit price; `None` for market orders
    pub price: Option<Decimal>,

    /// Tag of the strategy (or the risk gate) that owns this order
    pub owner: String,

    /// Order may only shrink an existing position
    #[serde(default)]
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn limit(
        owner: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_id: new_client_id(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            quantity,
            price: Some(price),
            owner: owner.into(),
            reduce_only: false,
        }
    }

    pub fn market(
        owner: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_id: new_client_id(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            quantity,
            price: None,
            owner: owner.into(),
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Decimal places kept on submitted quantities.
pub const QUANTITY_SCALE: u32 = 8;

/// Truncate a quantity toward zero to [`QUANTITY_SCALE`] places.
pub fn truncate_quantity(qty: Decimal) -> Decimal {
    qty.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero)
}

/// Generate a fresh client order id.
pub fn new_client_id() -> String {
    format!("gb-{}", uuid::Uuid::new_v4().simple())
}

/// The ledger's record of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Id assigned by the exchange, once acknowledged
    pub exchange_id: Option<String>,
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub owner: String,
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: &OrderRequest, exchange_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            exchange_id,
            client_id: request.client_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            owner: request.owner.clone(),
            reduce_only: request.reduce_only,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Fold a fill into the order's quantity and average price.
    ///
    /// Callers check the remaining quantity first.
    pub(crate) fn absorb_fill(&mut self, qty: Decimal, price: Decimal) {
        let prev = self.filled_quantity;
        let prev_avg = self.average_fill_price.unwrap_or(Decimal::ZERO);
        self.filled_quantity = prev + qty;
        self.average_fill_price = Some((prev_avg * prev + price * qty) / self.filled_quantity);
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }
}

/// Execution report delivered by the adapter's fill stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    /// Exchange order id (or client id when the exchange echoes it)
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Open));
        assert!(Open.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(PartiallyFilled.can_transition_to(Cancelled));
        assert!(!PartiallyFilled.can_transition_to(Open));
        assert!(!Open.can_transition_to(Pending));

        for terminal in [Filled, Cancelled, Rejected] {
            assert!(terminal.is_terminal());
            for next in [Pending, Open, PartiallyFilled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_absorb_fill_tracks_average() {
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(2), dec!(100));
        let mut order = Order::from_request(&req, Some("x1".to_string()));

        order.absorb_fill(dec!(1), dec!(100));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_quantity(), dec!(1));

        order.absorb_fill(dec!(1), dec!(98));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_fill_price, Some(dec!(99)));
    }

    #[test]
    fn test_truncate_quantity() {
        assert_eq!(truncate_quantity(dec!(0.123456789)), dec!(0.12345678));
        assert_eq!(truncate_quantity(dec!(0.000000009)), Decimal::ZERO);
        assert_eq!(truncate_quantity(dec!(-1.999999999)), dec!(-1.99999999));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        let b = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        assert_ne!(a.client_id, b.client_id);
        assert!(a.price.is_none());
    }
}
