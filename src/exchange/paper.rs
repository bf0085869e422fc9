//! In-process simulated spot exchange.
//!
//! Limit orders reserve balance and rest until the mark crosses their price,
//! then fill in full at the limit price. Market orders fill immediately at
//! mark ± slippage. Fees are charged in the quote asset.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::{CancelAck, ExchangeAdapter, OrderHandle, TickerClient};
use crate::error::AdapterError;
use crate::models::{
    split_symbol, Balance, ExchangeOrder, FillEvent, MarketAccountSnapshot, OrderKind,
    OrderRequest, OrderSide, OrderStatus,
};

const FILL_CHANNEL_CAPACITY: usize = 1024;
const TICKER_TIMEOUT: Duration = Duration::from_secs(5);

fn default_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_slippage() -> Decimal {
    dec!(0.001)
}

/// Paper trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting free balance per asset
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,

    /// Initial marks; refreshed from the ticker when `ticker_url` is set
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,

    /// Fee per fill as a fraction of notional (0.001 = 0.1%)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Market order slippage as a fraction of mark
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,

    #[serde(default)]
    pub ticker_url: Option<String>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            balances: HashMap::from([("USDT".to_string(), dec!(10000))]),
            prices: HashMap::new(),
            fee_rate: default_fee_rate(),
            slippage: default_slippage(),
            ticker_url: None,
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    exchange_id: String,
    client_id: String,
    symbol: String,
    side: OrderSide,
    kind: OrderKind,
    quantity: Decimal,
    price: Decimal,
}

impl RestingOrder {
    /// Limit and take-profit orders fill when the mark trades through their
    /// price in their favor; stop orders when it moves against them.
    fn triggers_at(&self, mark: Decimal) -> bool {
        match (self.kind, self.side) {
            (OrderKind::StopLoss, OrderSide::Buy) => mark >= self.price,
            (OrderKind::StopLoss, OrderSide::Sell) => mark <= self.price,
            (_, OrderSide::Buy) => mark <= self.price,
            (_, OrderSide::Sell) => mark >= self.price,
        }
    }

    fn to_exchange_order(&self) -> ExchangeOrder {
        ExchangeOrder {
            exchange_id: self.exchange_id.clone(),
            client_id: Some(self.client_id.clone()),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            price: Some(self.price),
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    balances: HashMap<String, Balance>,
    prices: HashMap<String, Decimal>,
    resting: Vec<RestingOrder>,
    next_id: u64,
    fees_paid: Decimal,
    fill_count: u64,
}

impl PaperState {
    fn balance_mut(&mut self, asset: &str) -> &mut Balance {
        self.balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance::new(asset, Decimal::ZERO, Decimal::ZERO))
    }

    fn free(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    fn next_exchange_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }
}

/// Simulated exchange used for paper trading and engine tests.
pub struct PaperExchange {
    config: PaperConfig,
    state: Mutex<PaperState>,
    fills: broadcast::Sender<FillEvent>,
    ticker: Option<TickerClient>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Result<Self> {
        let ticker = match &config.ticker_url {
            Some(url) => Some(TickerClient::with_base_url(url.clone(), TICKER_TIMEOUT)?),
            None => None,
        };

        let balances = config
            .balances
            .iter()
            .map(|(asset, amount)| (asset.clone(), Balance::new(asset.clone(), *amount, Decimal::ZERO)))
            .collect();

        let state = PaperState {
            balances,
            prices: config.prices.clone(),
            ..PaperState::default()
        };

        let (fills, _) = broadcast::channel(FILL_CHANNEL_CAPACITY);

        info!(
            fee_rate = %config.fee_rate,
            slippage = %config.slippage,
            ticker = ticker.as_ref().map(TickerClient::base_url).unwrap_or("off"),
            "Paper exchange ready"
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
            fills,
            ticker,
        })
    }

    /// Move the mark for `symbol`, filling any resting orders it crosses.
    /// Returns the number of fills produced.
    pub async fn set_price(&self, symbol: &str, price: Decimal) -> usize {
        let mut state = self.state.lock().await;
        state.prices.insert(symbol.to_string(), price);
        self.match_resting(&mut state, symbol, price)
    }

    pub async fn balance(&self, asset: &str) -> Balance {
        let state = self.state.lock().await;
        state
            .balances
            .get(asset)
            .cloned()
            .unwrap_or_else(|| Balance::new(asset, Decimal::ZERO, Decimal::ZERO))
    }

    pub async fn open_order_count(&self) -> usize {
        self.state.lock().await.resting.len()
    }

    pub async fn fees_paid(&self) -> Decimal {
        self.state.lock().await.fees_paid
    }

    pub async fn fill_count(&self) -> u64 {
        self.state.lock().await.fill_count
    }

    fn match_resting(&self, state: &mut PaperState, symbol: &str, mark: Decimal) -> usize {
        let (crossed, resting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.resting)
            .into_iter()
            .partition(|o| o.symbol == symbol && o.triggers_at(mark));
        state.resting = resting;

        for order in &crossed {
            self.settle_resting(state, order);
        }
        crossed.len()
    }

    /// Reserve balance for a resting order.
    fn reserve(
        &self,
        state: &mut PaperState,
        request: &OrderRequest,
        price: Decimal,
    ) -> Result<(), AdapterError> {
        let (base, quote) = split_symbol(&request.symbol)
            .ok_or_else(|| AdapterError::UnknownSymbol(request.symbol.clone()))?;

        let (asset, amount) = match request.side {
            OrderSide::Buy => (quote, request.quantity * price),
            OrderSide::Sell => (base, request.quantity),
        };

        let balance = state.balance_mut(asset);
        if balance.free < amount {
            return Err(AdapterError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount,
                available: balance.free,
            });
        }
        balance.free -= amount;
        balance.locked += amount;
        Ok(())
    }

    fn release(&self, state: &mut PaperState, order: &RestingOrder) {
        let Some((base, quote)) = split_symbol(&order.symbol) else {
            return;
        };
        let (asset, amount) = match order.side {
            OrderSide::Buy => (quote, order.quantity * order.price),
            OrderSide::Sell => (base, order.quantity),
        };
        let balance = state.balance_mut(asset);
        balance.locked -= amount;
        balance.free += amount;
    }

    /// Fill a resting order in full at its price, consuming its reservation.
    fn settle_resting(&self, state: &mut PaperState, order: &RestingOrder) {
        let Some((base, quote)) = split_symbol(&order.symbol) else {
            return;
        };
        let notional = order.quantity * order.price;
        let fee = notional * self.config.fee_rate;

        match order.side {
            OrderSide::Buy => {
                let q = state.balance_mut(quote);
                q.locked -= notional;
                q.free = (q.free - fee).max(Decimal::ZERO);
                state.balance_mut(base).free += order.quantity;
            }
            OrderSide::Sell => {
                state.balance_mut(base).locked -= order.quantity;
                state.balance_mut(quote).free += notional - fee;
            }
        }

        self.publish(
            state,
            FillEvent {
                order_id: order.exchange_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity,
                price: order.price,
                fee,
                timestamp: Utc::now(),
            },
        );
    }

    fn fill_market(
        &self,
        state: &mut PaperState,
        request: &OrderRequest,
        exchange_id: &str,
        mark: Decimal,
    ) -> Result<(), AdapterError> {
        let (base, quote) = split_symbol(&request.symbol)
            .ok_or_else(|| AdapterError::UnknownSymbol(request.symbol.clone()))?;

        let price = match request.side {
            OrderSide::Buy => mark * (Decimal::ONE + self.config.slippage),
            OrderSide::Sell => mark * (Decimal::ONE - self.config.slippage),
        };
        let notional = request.quantity * price;
        let fee = notional * self.config.fee_rate;

        match request.side {
            OrderSide::Buy => {
                let required = notional + fee;
                let available = state.free(quote);
                if available < required {
                    return Err(AdapterError::InsufficientBalance {
                        asset: quote.to_string(),
                        required,
                        available,
                    });
                }
                state.balance_mut(quote).free -= required;
                state.balance_mut(base).free += request.quantity;
            }
            OrderSide::Sell => {
                let available = state.free(base);
                if available < request.quantity {
                    return Err(AdapterError::InsufficientBalance {
                        asset: base.to_string(),
                        required: request.quantity,
                        available,
                    });
                }
                state.balance_mut(base).free -= request.quantity;
                state.balance_mut(quote).free += notional - fee;
            }
        }

        self.publish(
            state,
            FillEvent {
                order_id: exchange_id.to_string(),
                symbol: request.symbol.clone(),
                side: request.side,
                quantity: request.quantity,
                price,
                fee,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    fn publish(&self, state: &mut PaperState, fill: FillEvent) {
        state.fees_paid += fill.fee;
        state.fill_count += 1;
        debug!(
            order_id = %fill.order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            "Paper fill"
        );
        if self.fills.send(fill).is_err() {
            debug!("No fill subscribers");
        }
    }

    async fn refresh_prices(&self, symbols: &[String]) -> Result<(), AdapterError> {
        let Some(ticker) = &self.ticker else {
            return Ok(());
        };

        let results = join_all(symbols.iter().map(|s| ticker.get_price(s))).await;
        for (symbol, result) in symbols.iter().zip(results) {
            let price = result.map_err(|e| AdapterError::Network(format!("{:#}", e)))?;
            self.set_price(symbol, price).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn fetch_snapshot(&self, symbols: &[String]) -> Result<MarketAccountSnapshot, AdapterError> {
        self.refresh_prices(symbols).await?;

        let state = self.state.lock().await;
        let prices = symbols
            .iter()
            .filter_map(|s| state.prices.get(s).map(|p| (s.clone(), *p)))
            .collect();
        let open_orders = state
            .resting
            .iter()
            .filter(|o| symbols.contains(&o.symbol))
            .map(RestingOrder::to_exchange_order)
            .collect();

        Ok(MarketAccountSnapshot {
            taken_at: Utc::now(),
            prices,
            balances: state.balances.clone(),
            open_orders,
        })
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, AdapterError> {
        if split_symbol(&request.symbol).is_none() {
            return Err(AdapterError::UnknownSymbol(request.symbol.clone()));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(AdapterError::Rejected(format!(
                "non-positive quantity {}",
                request.quantity
            )));
        }

        let mut state = self.state.lock().await;
        let mark = state.prices.get(&request.symbol).copied();

        match request.kind {
            OrderKind::Market => {
                let mark = mark.ok_or_else(|| {
                    AdapterError::Rejected(format!("no price for {}", request.symbol))
                })?;
                let exchange_id = state.next_exchange_id();
                self.fill_market(&mut state, request, &exchange_id, mark)?;
                Ok(OrderHandle {
                    exchange_id,
                    client_id: request.client_id.clone(),
                })
            }
            OrderKind::Limit | OrderKind::StopLoss | OrderKind::TakeProfit => {
                let price = request
                    .price
                    .filter(|p| *p > Decimal::ZERO)
                    .ok_or_else(|| AdapterError::Rejected("order requires a positive price".to_string()))?;

                self.reserve(&mut state, request, price)?;
                let order = RestingOrder {
                    exchange_id: state.next_exchange_id(),
                    client_id: request.client_id.clone(),
                    symbol: request.symbol.clone(),
                    side: request.side,
                    kind: request.kind,
                    quantity: request.quantity,
                    price,
                };
                let handle = OrderHandle {
                    exchange_id: order.exchange_id.clone(),
                    client_id: order.client_id.clone(),
                };

                if mark.is_some_and(|m| order.triggers_at(m)) {
                    self.settle_resting(&mut state, &order);
                } else {
                    state.resting.push(order);
                }
                Ok(handle)
            }
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<CancelAck, AdapterError> {
        let mut state = self.state.lock().await;
        let index = state
            .resting
            .iter()
            .position(|o| o.symbol == symbol && (o.exchange_id == order_id || o.client_id == order_id))
            .ok_or_else(|| AdapterError::OrderNotFound(order_id.to_string()))?;

        let order = state.resting.remove(index);
        self.release(&mut state, &order);

        Ok(CancelAck {
            exchange_id: order.exchange_id,
            client_id: Some(order.client_id),
        })
    }

    fn stream_fills(&self) -> BoxStream<'static, FillEvent> {
        let rx = self.fills.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(fill) => return Some((fill, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fill stream lagged, fills dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let state = self.state.lock().await;
        info!(
            open_orders = state.resting.len(),
            fills = state.fill_count,
            fees = %state.fees_paid,
            "Paper exchange closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn exchange() -> PaperExchange {
        let config = PaperConfig {
            balances: HashMap::from([
                ("USDT".to_string(), dec!(10000)),
                ("BTC".to_string(), dec!(1)),
            ]),
            prices: HashMap::from([("BTC/USDT".to_string(), dec!(50000))]),
            fee_rate: dec!(0.001),
            slippage: Decimal::ZERO,
            ticker_url: None,
        };
        PaperExchange::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_market_buy_fills_immediately() {
        let ex = exchange();
        let mut fills = ex.stream_fills();

        let req = OrderRequest::market("dca:BTC/USDT", "BTC/USDT", OrderSide::Buy, dec!(0.1));
        let handle = assert_ok!(ex.submit_order(&req).await);
        assert_eq!(handle.client_id, req.client_id);

        let fill = fills.next().await.unwrap();
        assert_eq!(fill.order_id, handle.exchange_id);
        assert_eq!(fill.price, dec!(50000));
        assert_eq!(fill.fee, dec!(5));

        assert_eq!(ex.balance("USDT").await.free, dec!(4995));
        assert_eq!(ex.balance("BTC").await.free, dec!(1.1));
    }

    #[tokio::test]
    async fn test_market_slippage() {
        let mut config = PaperConfig::default();
        config.prices.insert("BTC/USDT".to_string(), dec!(100));
        config.fee_rate = Decimal::ZERO;
        let ex = PaperExchange::new(config).unwrap();
        let mut fills = ex.stream_fills();

        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        assert_ok!(ex.submit_order(&req).await);
        assert_eq!(fills.next().await.unwrap().price, dec!(100.1));
    }

    #[tokio::test]
    async fn test_limit_rests_then_fills_on_cross() {
        let ex = exchange();
        let mut fills = ex.stream_fills();

        let req = OrderRequest::limit("grid:BTC/USDT", "BTC/USDT", OrderSide::Buy, dec!(0.1), dec!(49000));
        assert_ok!(ex.submit_order(&req).await);

        let usdt = ex.balance("USDT").await;
        assert_eq!(usdt.locked, dec!(4900));
        assert_eq!(usdt.free, dec!(5100));

        let snapshot = ex.fetch_snapshot(&["BTC/USDT".to_string()]).await.unwrap();
        assert_eq!(snapshot.open_orders.len(), 1);
        assert_eq!(snapshot.open_orders[0].client_id.as_deref(), Some(req.client_id.as_str()));

        assert_eq!(ex.set_price("BTC/USDT", dec!(49500)).await, 0);
        assert_eq!(ex.set_price("BTC/USDT", dec!(48900)).await, 1);

        let fill = fills.next().await.unwrap();
        assert_eq!(fill.price, dec!(49000));
        assert_eq!(ex.open_order_count().await, 0);

        let usdt = ex.balance("USDT").await;
        assert_eq!(usdt.locked, Decimal::ZERO);
        assert_eq!(usdt.free, dec!(5095.1));
        assert_eq!(ex.balance("BTC").await.free, dec!(1.1));
    }

    #[tokio::test]
    async fn test_crossing_limit_fills_on_submit() {
        let ex = exchange();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Sell, dec!(0.5), dec!(49000));
        assert_ok!(ex.submit_order(&req).await);

        assert_eq!(ex.open_order_count().await, 0);
        assert_eq!(ex.fill_count().await, 1);
        assert_eq!(ex.balance("BTC").await.total(), dec!(0.5));
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let ex = exchange();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(1), dec!(40000));
        let err = assert_err!(ex.submit_order(&req).await);
        assert!(matches!(err, AdapterError::InsufficientBalance { ref asset, .. } if asset == "USDT"));

        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Sell, dec!(2));
        assert!(matches!(
            ex.submit_order(&req).await,
            Err(AdapterError::InsufficientBalance { .. })
        ));
        assert_eq!(ex.fill_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_reservation() {
        let ex = exchange();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Sell, dec!(0.4), dec!(55000));
        let handle = ex.submit_order(&req).await.unwrap();
        assert_eq!(ex.balance("BTC").await.locked, dec!(0.4));

        let ack = assert_ok!(ex.cancel_order("BTC/USDT", &handle.exchange_id).await);
        assert_eq!(ack.client_id.as_deref(), Some(req.client_id.as_str()));
        assert_eq!(ex.balance("BTC").await, Balance::new("BTC", dec!(1), Decimal::ZERO));

        assert!(matches!(
            ex.cancel_order("BTC/USDT", &handle.exchange_id).await,
            Err(AdapterError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let ex = exchange();
        let req = OrderRequest::market("t", "BTCUSDT", OrderSide::Buy, dec!(1));
        assert!(matches!(ex.submit_order(&req).await, Err(AdapterError::UnknownSymbol(_))));

        let req = OrderRequest::market("t", "ETH/USDT", OrderSide::Buy, dec!(1));
        assert!(matches!(ex.submit_order(&req).await, Err(AdapterError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_stop_sell_triggers_below() {
        let ex = exchange();
        let mut req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Sell, dec!(0.1), dec!(45000));
        req.kind = OrderKind::StopLoss;
        assert_ok!(ex.submit_order(&req).await);

        assert_eq!(ex.set_price("BTC/USDT", dec!(60000)).await, 0);
        assert_eq!(ex.set_price("BTC/USDT", dec!(44000)).await, 1);
    }
}
