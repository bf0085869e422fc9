//! Exchange adapter interface and the implementations shipped with the bot.
//!
//! The trading core only talks to [`ExchangeAdapter`]. Signing, rate
//! limiting and reconnection belong to concrete adapters.

mod paper;
mod ticker_client;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AdapterError;
use crate::models::{FillEvent, MarketAccountSnapshot, OrderRequest};

pub use paper::{PaperConfig, PaperExchange};
pub use ticker_client::TickerClient;

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    pub exchange_id: String,
    pub client_id: String,
}

/// Exchange acknowledgement of a cancel.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelAck {
    pub exchange_id: String,
    pub client_id: Option<String>,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Prices, balances and open orders for `symbols`.
    async fn fetch_snapshot(&self, symbols: &[String]) -> Result<MarketAccountSnapshot, AdapterError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, AdapterError>;

    /// Cancel by exchange id (or client id where the exchange accepts it).
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<CancelAck, AdapterError>;

    /// Fills in execution order. The stream ends on disconnect; call again
    /// to resubscribe.
    fn stream_fills(&self) -> BoxStream<'static, FillEvent>;

    /// Release connections.
    async fn close(&self) -> Result<(), AdapterError>;
}
