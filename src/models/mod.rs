//! Data models for orders, positions, balances, and snapshots.

mod balance;
mod order;
mod position;
mod snapshot;

pub use balance::{split_symbol, Balance};
pub use order::{truncate_quantity, FillEvent, Order, OrderKind, OrderRequest, OrderSide, OrderStatus};
pub use position::{Position, PositionSide};
pub use snapshot::{ExchangeOrder, MarketAccountSnapshot};
