//! Order & position ledger: the in-process source of truth.
//!
//! The ledger never talks to the exchange. It ingests snapshots and fills,
//! reconciles them against locally pending submissions, and hands strategies
//! read-only views.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LedgerError, ReconciliationError};
use crate::models::{
    split_symbol, Balance, ExchangeOrder, FillEvent, MarketAccountSnapshot, Order, OrderKind,
    OrderRequest, OrderSide, OrderStatus, Position,
};

use super::risk::{OpenOrderRef, PortfolioState, PositionExposure};

/// Result of dispatching one placement.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Accepted { exchange_id: String },
    Rejected { reason: String },
}

/// A fill applied to the ledger, queued for the owning strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillRecord {
    pub client_id: String,
    pub symbol: String,
    pub owner: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub realized_pnl: Decimal,
    /// The order is now fully filled
    pub order_complete: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct Ledger {
    orders: HashMap<String, Order>,
    exchange_index: HashMap<String, String>,
    positions: HashMap<String, Position>,
    balances: HashMap<String, Balance>,
    marks: HashMap<String, Decimal>,
    foreign_orders: Vec<ExchangeOrder>,
    realized_total: Decimal,
    epoch: u64,

    retry_window: u32,
    balance_tolerance: Decimal,
    missing_counts: HashMap<String, u32>,
    terminal_open_counts: HashMap<String, u32>,
    locked_mismatch_counts: HashMap<String, u32>,
    /// Last synced total per asset, moved by the fills applied since.
    expected_totals: HashMap<String, Decimal>,
    total_mismatch_counts: HashMap<String, u32>,
    orphan_fills: Vec<(FillEvent, u32)>,

    fill_records: VecDeque<FillRecord>,
}

impl Ledger {
    pub fn new(retry_window: u32, balance_tolerance: Decimal) -> Self {
        Self {
            orders: HashMap::new(),
            exchange_index: HashMap::new(),
            positions: HashMap::new(),
            balances: HashMap::new(),
            marks: HashMap::new(),
            foreign_orders: Vec::new(),
            realized_total: Decimal::ZERO,
            epoch: 0,
            retry_window,
            balance_tolerance,
            missing_counts: HashMap::new(),
            terminal_open_counts: HashMap::new(),
            locked_mismatch_counts: HashMap::new(),
            expected_totals: HashMap::new(),
            total_mismatch_counts: HashMap::new(),
            orphan_fills: Vec::new(),
            fill_records: VecDeque::new(),
        }
    }

    /// Start a new tick; dispatch results from older ticks become stale.
    pub fn begin_tick(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), LedgerError> {
        if epoch != self.epoch {
            return Err(LedgerError::StaleEpoch {
                got: epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    // ==================== Dispatch results ====================

    /// Record a placement that was sent (or refused) this tick.
    pub fn record_submission(
        &mut self,
        epoch: u64,
        request: &OrderRequest,
        submission: Submission,
    ) -> Result<(), LedgerError> {
        self.check_epoch(epoch)?;
        if self.orders.contains_key(&request.client_id) {
            return Err(LedgerError::DuplicateClientId(request.client_id.clone()));
        }

        let mut order = match submission {
            Submission::Accepted { exchange_id } => {
                self.exchange_index
                    .insert(exchange_id.clone(), request.client_id.clone());
                Order::from_request(request, Some(exchange_id))
            }
            Submission::Rejected { reason } => {
                debug!(client_id = %request.client_id, reason = %reason, "Recording rejected order");
                let mut order = Order::from_request(request, None);
                order.status = OrderStatus::Rejected;
                order
            }
        };
        order.updated_at = Utc::now();
        self.orders.insert(order.client_id.clone(), order);
        Ok(())
    }

    /// Record a cancel acknowledgement. Returns whether the order changed.
    pub fn record_cancel(&mut self, epoch: u64, client_id: &str) -> Result<bool, LedgerError> {
        self.check_epoch(epoch)?;
        let order = self
            .orders
            .get_mut(client_id)
            .ok_or_else(|| LedgerError::UnknownOrder(client_id.to_string()))?;

        if order.status.is_terminal() {
            debug!(client_id = %client_id, status = %order.status, "Cancel ack for terminal order");
            return Ok(false);
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        self.missing_counts.remove(client_id);
        Ok(true)
    }

    // ==================== Fills ====================

    fn resolve(&self, order_id: &str) -> Option<String> {
        if self.orders.contains_key(order_id) {
            return Some(order_id.to_string());
        }
        self.exchange_index.get(order_id).cloned()
    }

    /// Apply a fill to an order and its symbol's position.
    pub fn record_fill(
        &mut self,
        order_id: &str,
        fill_qty: Decimal,
        fill_price: Decimal,
    ) -> Result<FillRecord, LedgerError> {
        self.apply_fill(order_id, fill_qty, fill_price, Decimal::ZERO, Utc::now())
    }

    fn apply_fill(
        &mut self,
        order_id: &str,
        fill_qty: Decimal,
        fill_price: Decimal,
        fee: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<FillRecord, LedgerError> {
        if fill_qty <= Decimal::ZERO || fill_price <= Decimal::ZERO {
            return Err(LedgerError::BadFill {
                qty: fill_qty,
                price: fill_price,
            });
        }
        let client_id = self
            .resolve(order_id)
            .ok_or_else(|| LedgerError::UnknownOrder(order_id.to_string()))?;
        let order = self
            .orders
            .get_mut(&client_id)
            .ok_or_else(|| LedgerError::UnknownOrder(client_id.clone()))?;

        if order.status.is_terminal() {
            return Err(LedgerError::TerminalOrder {
                client_id,
                status: order.status.to_string(),
            });
        }
        if fill_qty > order.remaining_quantity() {
            return Err(LedgerError::Overfill {
                client_id,
                fill: fill_qty,
                remaining: order.remaining_quantity(),
            });
        }

        order.absorb_fill(fill_qty, fill_price);
        let (symbol, side, owner, complete) = (
            order.symbol.clone(),
            order.side,
            order.owner.clone(),
            order.status == OrderStatus::Filled,
        );
        self.missing_counts.remove(&client_id);

        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(symbol.clone()));
        let realized = position.apply_fill(side, fill_qty, fill_price);
        if let Some(mark) = self.marks.get(&symbol) {
            position.update_price(*mark);
        } else {
            position.update_price(fill_price);
        }
        self.realized_total += realized;
        self.carry_totals(&symbol, side, fill_qty, fill_price, fee);

        let record = FillRecord {
            client_id,
            symbol,
            owner,
            side,
            quantity: fill_qty,
            price: fill_price,
            realized_pnl: realized,
            order_complete: complete,
            timestamp,
        };
        self.fill_records.push_back(record.clone());
        Ok(record)
    }

    /// Move the expected asset totals by a fill. Fees are paid in quote.
    fn carry_totals(&mut self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal, fee: Decimal) {
        let Some((base, quote)) = split_symbol(symbol) else {
            return;
        };
        let (base_delta, quote_delta) = match side {
            OrderSide::Buy => (qty, -(qty * price)),
            OrderSide::Sell => (-qty, qty * price),
        };
        *self.expected_totals.entry(base.to_string()).or_default() += base_delta;
        *self.expected_totals.entry(quote.to_string()).or_default() += quote_delta - fee;
    }

    /// Apply fills from the adapter stream in arrival order.
    ///
    /// Fills for orders the ledger has not recorded yet are parked and
    /// retried on later calls; `sync` ages them out.
    pub fn ingest_fills(&mut self, fills: Vec<FillEvent>) -> Vec<LedgerError> {
        let mut errors = Vec::new();
        let parked = std::mem::take(&mut self.orphan_fills);

        for (fill, age) in parked
            .into_iter()
            .chain(fills.into_iter().map(|f| (f, 0)))
        {
            if self.resolve(&fill.order_id).is_none() {
                if age == 0 {
                    debug!(order_id = %fill.order_id, symbol = %fill.symbol, side = %fill.side, "Parking fill for unknown order");
                }
                self.orphan_fills.push((fill, age));
                continue;
            }
            if let Err(e) =
                self.apply_fill(&fill.order_id, fill.quantity, fill.price, fill.fee, fill.timestamp)
            {
                warn!(order_id = %fill.order_id, error = %e, "Fill rejected by ledger");
                errors.push(e);
            }
        }
        errors
    }

    /// Fill records not yet handed to strategies, oldest first.
    pub fn drain_fill_records(&mut self) -> Vec<FillRecord> {
        self.fill_records.drain(..).collect()
    }

    // ==================== Sync ====================

    /// Ingest authoritative exchange state and reconcile it with local orders.
    ///
    /// Transient disagreements are tolerated for `retry_window` syncs; a
    /// disagreement that outlives the window is returned as an error.
    pub fn sync(&mut self, snapshot: &MarketAccountSnapshot) -> Vec<ReconciliationError> {
        let mut errors = Vec::new();

        for (symbol, price) in &snapshot.prices {
            self.marks.insert(symbol.clone(), *price);
            if let Some(position) = self.positions.get_mut(symbol) {
                position.update_price(*price);
            }
        }

        self.sync_orders(snapshot, &mut errors);
        self.sync_balances(snapshot, &mut errors);
        self.age_orphans(&mut errors);

        errors
    }

    fn sync_orders(&mut self, snapshot: &MarketAccountSnapshot, errors: &mut Vec<ReconciliationError>) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut foreign = Vec::new();

        for remote in &snapshot.open_orders {
            let local_id = self.resolve(&remote.exchange_id).or_else(|| {
                remote
                    .client_id
                    .as_deref()
                    .and_then(|id| self.resolve(id))
            });
            let Some(client_id) = local_id else {
                foreign.push(remote.clone());
                continue;
            };
            let Some(order) = self.orders.get_mut(&client_id) else {
                continue;
            };

            if order.status.is_terminal() {
                let count = self.terminal_open_counts.entry(client_id.clone()).or_insert(0);
                *count += 1;
                if *count > self.retry_window {
                    errors.push(ReconciliationError::TerminalOrderOpen {
                        symbol: order.symbol.clone(),
                        client_id: client_id.clone(),
                        local: order.status.to_string(),
                    });
                    self.terminal_open_counts.remove(&client_id);
                }
                continue;
            }

            if order.exchange_id.is_none() {
                order.exchange_id = Some(remote.exchange_id.clone());
                self.exchange_index
                    .insert(remote.exchange_id.clone(), client_id.clone());
            }
            if order.status != OrderStatus::Open && order.status.can_transition_to(OrderStatus::Open) {
                order.status = OrderStatus::Open;
                order.updated_at = Utc::now();
            }
            self.terminal_open_counts.remove(&client_id);
            seen.insert(client_id);
        }
        self.foreign_orders = foreign;

        let missing: Vec<(String, String)> = self
            .orders
            .values()
            .filter(|o| o.is_open() && !seen.contains(&o.client_id))
            .map(|o| (o.client_id.clone(), o.symbol.clone()))
            .collect();
        for client_id in seen {
            self.missing_counts.remove(&client_id);
        }
        for (client_id, symbol) in missing {
            let count = self.missing_counts.entry(client_id.clone()).or_insert(0);
            *count += 1;
            if *count > self.retry_window {
                let ticks = *count;
                self.missing_counts.remove(&client_id);
                errors.push(ReconciliationError::OrderMissing {
                    symbol,
                    client_id,
                    ticks,
                });
            }
        }
    }

    fn sync_balances(&mut self, snapshot: &MarketAccountSnapshot, errors: &mut Vec<ReconciliationError>) {
        let reserved = self.reserved_by_open_orders();

        for (asset, balance) in &snapshot.balances {
            if !balance.is_valid() {
                errors.push(ReconciliationError::NegativeBalance {
                    asset: asset.clone(),
                    free: balance.free,
                    locked: balance.locked,
                });
                continue;
            }

            let expected = reserved.get(asset).copied().unwrap_or(Decimal::ZERO);
            let scale = expected.max(balance.locked);
            let diff = (balance.locked - expected).abs();
            if diff > self.balance_tolerance * scale {
                let count = self.locked_mismatch_counts.entry(asset.clone()).or_insert(0);
                *count += 1;
                debug!(asset = %asset, expected = %expected, reported = %balance.locked, syncs = *count, "Locked balance mismatch");
                if *count > self.retry_window {
                    errors.push(ReconciliationError::LockedMismatch {
                        asset: asset.clone(),
                        expected,
                        reported: balance.locked,
                    });
                    self.locked_mismatch_counts.remove(asset);
                }
            } else {
                self.locked_mismatch_counts.remove(asset);
            }

            self.check_total(asset, balance.total(), errors);
            self.balances.insert(asset.clone(), balance.clone());
        }
    }

    /// Compare an exchange total with the last synced total plus the fills
    /// applied since. A match re-baselines; a mismatch keeps the expectation
    /// so late fills can still close the gap.
    fn check_total(&mut self, asset: &str, reported: Decimal, errors: &mut Vec<ReconciliationError>) {
        let Some(expected) = self.expected_totals.get(asset).copied() else {
            self.expected_totals.insert(asset.to_string(), reported);
            return;
        };

        let scale = expected.abs().max(reported);
        if (reported - expected).abs() <= self.balance_tolerance * scale {
            self.total_mismatch_counts.remove(asset);
            self.expected_totals.insert(asset.to_string(), reported);
            return;
        }

        let count = self.total_mismatch_counts.entry(asset.to_string()).or_insert(0);
        *count += 1;
        debug!(asset = %asset, expected = %expected, reported = %reported, syncs = *count, "Total balance mismatch");
        if *count > self.retry_window {
            errors.push(ReconciliationError::TotalMismatch {
                asset: asset.to_string(),
                expected,
                reported,
            });
            self.total_mismatch_counts.remove(asset);
            self.expected_totals.insert(asset.to_string(), reported);
        }
    }

    /// Amount each asset should have locked by resting limit orders.
    fn reserved_by_open_orders(&self) -> HashMap<String, Decimal> {
        let mut reserved: HashMap<String, Decimal> = HashMap::new();

        let local = self
            .orders
            .values()
            .filter(|o| o.is_open() && o.kind != OrderKind::Market)
            .map(|o| (o.symbol.as_str(), o.side, o.remaining_quantity(), o.price));
        let foreign = self.foreign_orders.iter().map(|o| {
            (
                o.symbol.as_str(),
                o.side,
                o.quantity - o.filled_quantity,
                o.price,
            )
        });

        for (symbol, side, remaining, price) in local.chain(foreign) {
            let Some((base, quote)) = split_symbol(symbol) else {
                continue;
            };
            match (side, price) {
                (OrderSide::Buy, Some(price)) => {
                    *reserved.entry(quote.to_string()).or_default() += remaining * price;
                }
                (OrderSide::Sell, _) => {
                    *reserved.entry(base.to_string()).or_default() += remaining;
                }
                (OrderSide::Buy, None) => {}
            }
        }
        reserved
    }

    fn age_orphans(&mut self, errors: &mut Vec<ReconciliationError>) {
        let window = self.retry_window;
        let mut kept = Vec::new();
        for (fill, age) in std::mem::take(&mut self.orphan_fills) {
            let age = age + 1;
            if age > window {
                errors.push(ReconciliationError::OrphanFill {
                    order_id: fill.order_id.clone(),
                    ticks: age,
                });
            } else {
                kept.push((fill, age));
            }
        }
        self.orphan_fills = kept;
    }

    // ==================== Queries ====================

    pub fn order(&self, client_id: &str) -> Option<&Order> {
        self.orders.get(client_id)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }


    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.get(asset)
    }

    pub fn realized_total(&self) -> Decimal {
        self.realized_total
    }

    /// Unrealized P&L of all open positions at their last marks.
    pub fn unrealized_total(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl()).sum()
    }

    /// Open orders for a symbol, oldest first.
    pub fn open_orders(&self, symbol: &str) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.is_open())
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// All open orders across symbols.
    pub fn all_open_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.is_open()).collect()
    }

    /// Read-only view for one symbol.
    pub fn view<'a>(&'a self, symbol: &'a str) -> LedgerView<'a> {
        LedgerView {
            ledger: self,
            symbol,
        }
    }

    /// Portfolio value of all balances in `quote_asset`.
    ///
    /// Assets without a `ASSET/QUOTE` mark are left out.
    pub fn portfolio_value(&self, quote_asset: &str) -> Decimal {
        self.balances
            .values()
            .map(|b| {
                if b.asset == quote_asset {
                    return b.total();
                }
                let symbol = format!("{}/{}", b.asset, quote_asset);
                match self.marks.get(&symbol) {
                    Some(mark) => b.total() * *mark,
                    None => {
                        debug!(asset = %b.asset, "No mark to value balance");
                        Decimal::ZERO
                    }
                }
            })
            .sum()
    }

    /// State handed to the risk gate.
    pub fn portfolio_state(&self, quote_asset: &str) -> PortfolioState {
        let positions = self
            .positions
            .values()
            .filter(|p| !p.is_closed())
            .map(|p| PositionExposure {
                symbol: p.symbol.clone(),
                side: p.side,
                size: p.size,
                mark: p.mark_price,
                notional: p.notional(),
            })
            .collect();

        let mut open_orders: HashMap<String, Vec<OpenOrderRef>> = HashMap::new();
        for order in self.orders.values().filter(|o| o.is_open()) {
            open_orders
                .entry(order.symbol.clone())
                .or_default()
                .push(OpenOrderRef {
                    client_id: order.client_id.clone(),
                    owner: order.owner.clone(),
                    side: order.side,
                    reduce_only: order.reduce_only,
                    created_at: order.created_at,
                });
        }
        for orders in open_orders.values_mut() {
            orders.sort_by_key(|o| o.created_at);
        }

        PortfolioState {
            total_value: self.portfolio_value(quote_asset),
            positions,
            open_orders,
            marks: self.marks.clone(),
        }
    }
}

/// Read-only slice of the ledger for one symbol.
#[derive(Clone, Copy)]
pub struct LedgerView<'a> {
    ledger: &'a Ledger,
    symbol: &'a str,
}

impl<'a> LedgerView<'a> {
    pub fn order(&self, client_id: &str) -> Option<&'a Order> {
        self.ledger.orders.get(client_id)
    }

    pub fn open_orders(&self) -> Vec<&'a Order> {
        self.ledger.open_orders(self.symbol)
    }

    /// Exchange orders for this symbol not placed by this process.
    pub fn foreign_orders(&self) -> impl Iterator<Item = &'a ExchangeOrder> + '_ {
        self.ledger
            .foreign_orders
            .iter()
            .filter(move |o| o.symbol == self.symbol)
    }

    pub fn position(&self) -> Option<&'a Position> {
        self.ledger.positions.get(self.symbol)
    }

    /// Free quote balance.
    pub fn available_quote(&self) -> Decimal {
        split_symbol(self.symbol)
            .and_then(|(_, quote)| self.ledger.balance(quote))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    /// Free base balance.
    pub fn available_base(&self) -> Decimal {
        split_symbol(self.symbol)
            .and_then(|(base, _)| self.ledger.balance(base))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(2, dec!(0.0001))
    }

    fn submit(ledger: &mut Ledger, req: &OrderRequest, exchange_id: &str) {
        let epoch = ledger.epoch();
        ledger
            .record_submission(
                epoch,
                req,
                Submission::Accepted {
                    exchange_id: exchange_id.to_string(),
                },
            )
            .unwrap();
    }

    fn snapshot(price: Decimal, open: Vec<ExchangeOrder>) -> MarketAccountSnapshot {
        MarketAccountSnapshot {
            taken_at: Utc::now(),
            prices: HashMap::from([("BTC/USDT".to_string(), price)]),
            balances: HashMap::new(),
            open_orders: open,
        }
    }

    fn remote(req: &OrderRequest, exchange_id: &str) -> ExchangeOrder {
        ExchangeOrder {
            exchange_id: exchange_id.to_string(),
            client_id: Some(req.client_id.clone()),
            symbol: req.symbol.clone(),
            side: req.side,
            quantity: req.quantity,
            price: req.price,
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
        }
    }

    #[test]
    fn test_fill_replay_matches_signed_sum_and_weighted_entry() {
        let mut l = ledger();
        l.begin_tick();
        let fills = [
            (OrderSide::Buy, dec!(1), dec!(100)),
            (OrderSide::Buy, dec!(3), dec!(90)),
            (OrderSide::Sell, dec!(2), dec!(95)),
            (OrderSide::Buy, dec!(2), dec!(80)),
        ];
        for (i, (side, qty, price)) in fills.iter().enumerate() {
            let req = OrderRequest::limit("t", "BTC/USDT", *side, *qty, *price);
            submit(&mut l, &req, &format!("x{i}"));
            l.record_fill(&format!("x{i}"), *qty, *price).unwrap();
        }

        let pos = l.position("BTC/USDT").unwrap();
        // +1 +3 -2 +2
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.size, dec!(4));
        // opening fills: (100 + 270) / 4 = 92.5, then (92.5*2 + 160) / 4
        assert_eq!(pos.entry_price, dec!(86.25));
        // closing 2 @ 95 against 92.5
        assert_eq!(l.realized_total(), dec!(5));
        assert_eq!(l.drain_fill_records().len(), 4);
    }

    #[test]
    fn test_reopen_after_full_close_resets_average() {
        let mut l = ledger();
        l.begin_tick();
        let a = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        let b = OrderRequest::market("t", "BTC/USDT", OrderSide::Sell, dec!(1));
        let c = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        submit(&mut l, &a, "a");
        submit(&mut l, &b, "b");
        submit(&mut l, &c, "c");

        l.record_fill("a", dec!(1), dec!(100)).unwrap();
        l.record_fill("b", dec!(1), dec!(120)).unwrap();
        assert!(l.position("BTC/USDT").unwrap().is_closed());
        l.record_fill("c", dec!(1), dec!(50)).unwrap();

        let pos = l.position("BTC/USDT").unwrap();
        assert_eq!(pos.entry_price, dec!(50));
        assert_eq!(pos.realized_pnl, dec!(20));
    }

    #[test]
    fn test_overfill_and_terminal_rejected() {
        let mut l = ledger();
        let epoch = l.begin_tick();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(1), dec!(100));
        submit(&mut l, &req, "x1");

        assert!(matches!(
            l.record_fill("x1", dec!(2), dec!(100)),
            Err(LedgerError::Overfill { .. })
        ));

        l.record_fill("x1", dec!(0.4), dec!(100)).unwrap();
        assert_eq!(l.order(&req.client_id).unwrap().status, OrderStatus::PartiallyFilled);

        assert!(l.record_cancel(epoch, &req.client_id).unwrap());
        assert!(matches!(
            l.record_fill("x1", dec!(0.1), dec!(100)),
            Err(LedgerError::TerminalOrder { .. })
        ));
        assert_eq!(l.order(&req.client_id).unwrap().filled_quantity, dec!(0.4));
    }

    #[test]
    fn test_stale_epoch_rejected() {
        let mut l = ledger();
        let old = l.begin_tick();
        l.begin_tick();
        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        let result = l.record_submission(
            old,
            &req,
            Submission::Accepted {
                exchange_id: "x".to_string(),
            },
        );
        assert_eq!(result, Err(LedgerError::StaleEpoch { got: 1, current: 2 }));
        assert!(l.order(&req.client_id).is_none());
    }

    #[test]
    fn test_sync_opens_pending_and_flags_missing_after_window() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(1), dec!(90));
        submit(&mut l, &req, "x1");

        let errors = l.sync(&snapshot(dec!(100), vec![remote(&req, "x1")]));
        assert!(errors.is_empty());
        assert_eq!(l.order(&req.client_id).unwrap().status, OrderStatus::Open);

        // Exchange stops reporting the order; tolerated for two syncs.
        assert!(l.sync(&snapshot(dec!(100), vec![])).is_empty());
        assert!(l.sync(&snapshot(dec!(100), vec![])).is_empty());
        let errors = l.sync(&snapshot(dec!(100), vec![]));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ReconciliationError::OrderMissing { ref symbol, .. } if symbol == "BTC/USDT"));
    }

    #[test]
    fn test_late_fill_clears_missing_count() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(1), dec!(90));
        submit(&mut l, &req, "x1");

        assert!(l.sync(&snapshot(dec!(89), vec![])).is_empty());
        assert!(l.sync(&snapshot(dec!(89), vec![])).is_empty());
        l.record_fill("x1", dec!(1), dec!(90)).unwrap();
        assert!(l.sync(&snapshot(dec!(89), vec![])).is_empty());
        assert_eq!(l.position("BTC/USDT").unwrap().mark_price, dec!(89));
    }

    #[test]
    fn test_orphan_fill_applied_once_order_is_known() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        let fill = FillEvent {
            order_id: "x1".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            price: dec!(100),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        };

        assert!(l.ingest_fills(vec![fill.clone()]).is_empty());
        assert!(l.position("BTC/USDT").is_none());

        submit(&mut l, &req, "x1");
        assert!(l.ingest_fills(vec![]).is_empty());
        assert_eq!(l.position("BTC/USDT").unwrap().size, dec!(1));

        // An orphan that never resolves ages out.
        let mut stray = fill;
        stray.order_id = "ghost".to_string();
        l.ingest_fills(vec![stray]);
        assert!(l.sync(&snapshot(dec!(100), vec![])).is_empty());
        assert!(l.sync(&snapshot(dec!(100), vec![])).is_empty());
        let errors = l.sync(&snapshot(dec!(100), vec![]));
        assert!(matches!(errors[..], [ReconciliationError::OrphanFill { .. }]));
    }

    #[test]
    fn test_locked_balance_reconciliation() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::limit("t", "BTC/USDT", OrderSide::Buy, dec!(2), dec!(50));
        submit(&mut l, &req, "x1");

        let mut snap = snapshot(dec!(60), vec![remote(&req, "x1")]);
        snap.balances
            .insert("USDT".to_string(), Balance::new("USDT", dec!(900), dec!(100)));
        assert!(l.sync(&snap).is_empty());
        assert_eq!(l.view("BTC/USDT").available_quote(), dec!(900));

        snap.balances
            .insert("USDT".to_string(), Balance::new("USDT", dec!(950), dec!(50)));
        assert!(l.sync(&snap).is_empty());
        assert!(l.sync(&snap).is_empty());
        let errors = l.sync(&snap);
        assert!(matches!(errors[..], [ReconciliationError::LockedMismatch { .. }]));

        snap.balances
            .insert("USDT".to_string(), Balance::new("USDT", dec!(-1), dec!(0)));
        let errors = l.sync(&snap);
        assert!(matches!(errors[..], [ReconciliationError::NegativeBalance { .. }]));
    }

    fn with_balances(mut snap: MarketAccountSnapshot, usdt: Decimal, btc: Decimal) -> MarketAccountSnapshot {
        snap.balances
            .insert("USDT".to_string(), Balance::new("USDT", usdt, dec!(0)));
        snap.balances
            .insert("BTC".to_string(), Balance::new("BTC", btc, dec!(0)));
        snap
    }

    fn buy_fill(order_id: &str, qty: Decimal, price: Decimal, fee: Decimal) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            quantity: qty,
            price,
            fee,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_total_balance_follows_fills_and_flags_drift() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(0.1));
        submit(&mut l, &req, "x1");

        assert!(l
            .sync(&with_balances(snapshot(dec!(50000), vec![]), dec!(10000), dec!(0)))
            .is_empty());

        // 0.1 @ 50000 with a 5 USDT fee
        assert!(l
            .ingest_fills(vec![buy_fill("x1", dec!(0.1), dec!(50000), dec!(5))])
            .is_empty());
        let after_fill = with_balances(snapshot(dec!(50000), vec![]), dec!(4995), dec!(0.1));
        assert!(l.sync(&after_fill).is_empty());

        // Quote leaves the account with no fill to explain it.
        let drifted = with_balances(snapshot(dec!(50000), vec![]), dec!(4000), dec!(0.1));
        assert!(l.sync(&drifted).is_empty());
        assert!(l.sync(&drifted).is_empty());
        let errors = l.sync(&drifted);
        assert_eq!(
            errors,
            vec![ReconciliationError::TotalMismatch {
                asset: "USDT".to_string(),
                expected: dec!(4995),
                reported: dec!(4000),
            }]
        );

        // Re-baselined on the reported total.
        assert!(l.sync(&drifted).is_empty());
    }

    #[test]
    fn test_late_fill_closes_total_gap() {
        let mut l = ledger();
        l.begin_tick();
        let req = OrderRequest::market("t", "BTC/USDT", OrderSide::Buy, dec!(1));
        submit(&mut l, &req, "x1");

        assert!(l
            .sync(&with_balances(snapshot(dec!(100), vec![]), dec!(1000), dec!(0)))
            .is_empty());

        // The snapshot already shows the fill the stream has not delivered.
        let filled = with_balances(snapshot(dec!(100), vec![]), dec!(899.9), dec!(1));
        assert!(l.sync(&filled).is_empty());
        assert!(l.sync(&filled).is_empty());

        l.ingest_fills(vec![buy_fill("x1", dec!(1), dec!(100), dec!(0.1))]);
        assert!(l.sync(&filled).is_empty());
        assert!(l.sync(&filled).is_empty());
        assert!(l.sync(&filled).is_empty());
    }

    #[test]
    fn test_portfolio_value_uses_marks() {
        let mut l = ledger();
        let mut snap = snapshot(dec!(100), vec![]);
        snap.balances
            .insert("USDT".to_string(), Balance::new("USDT", dec!(1000), dec!(0)));
        snap.balances
            .insert("BTC".to_string(), Balance::new("BTC", dec!(1), dec!(1)));
        snap.balances
            .insert("DOGE".to_string(), Balance::new("DOGE", dec!(5), dec!(0)));
        l.sync(&snap);

        assert_eq!(l.portfolio_value("USDT"), dec!(1200));
    }
}
