//! Grid strategy: a ladder of resting limit orders around a center price.
//!
//! Levels below the center buy and levels above sell. The level nearest the
//! center starts empty (the gap). When a buy fills, its level becomes the gap
//! and the level above gets a sell; sells mirror this. Fills routed in one
//! tick flip together on the next decision, so neighbours that filled in the
//! same move do not block each other. Coverage runs every tick and re-places
//! any level that lost its order.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::StrategyError;
use crate::models::{truncate_quantity, MarketAccountSnapshot, OrderRequest, OrderSide};

use super::action::Action;
use super::config::{pow, GridConfig, SpacingMode};
use super::ledger::{FillRecord, LedgerView};
use super::risk::RiskDecision;
use super::strategy::{cancel_owned, ref_state, RefState, Strategy, StrategyEvent, StrategyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridPhase {
    Uninitialized,
    Active,
    /// Waiting for old grid orders to die before re-centering
    Rebalancing,
    Cancelled,
}

impl GridPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridPhase::Uninitialized => "uninitialized",
            GridPhase::Active => "active",
            GridPhase::Rebalancing => "rebalancing",
            GridPhase::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridLevel {
    pub price: Decimal,
    /// `None` for the gap
    pub side: Option<OrderSide>,
    pub quantity: Decimal,
    /// Client id of the order resting here
    pub order: Option<String>,
}

/// Ladder prices around `center`, ascending, including `center` itself.
pub fn compute_levels(center: Decimal, config: &GridConfig) -> Vec<Decimal> {
    let half = (config.num_levels / 2) as u32;
    let s = config.spacing_pct;
    let mut levels = vec![center];

    for i in 1..=half {
        let (below, above) = match config.spacing_mode {
            SpacingMode::Linear => {
                let offset = s * Decimal::from(i);
                (center * (Decimal::ONE - offset), center * (Decimal::ONE + offset))
            }
            SpacingMode::Geometric => (
                (center * pow(Decimal::ONE - s, i)).round_dp(8),
                (center * pow(Decimal::ONE + s, i)).round_dp(8),
            ),
        };
        if below > Decimal::ZERO && config.lower_price.map_or(true, |lo| below >= lo) {
            levels.push(below);
        }
        if config.upper_price.map_or(true, |hi| above <= hi) {
            levels.push(above);
        }
    }

    levels.sort();
    levels
}

pub struct GridStrategy {
    tag: String,
    symbol: String,
    config: GridConfig,
    phase: GridPhase,
    levels: Vec<GridLevel>,
    center: Decimal,
    quote_allocation: Decimal,
    base_allocation: Decimal,
    /// Levels completed since the last decision: (index, filled side, quantity)
    pending_flips: Vec<(usize, OrderSide, Decimal)>,
    pending_cancel: HashSet<String>,
    warned_collisions: HashSet<Decimal>,
    events: Vec<StrategyEvent>,
}

impl GridStrategy {
    pub fn new(tag: String, symbol: String, config: GridConfig) -> Self {
        Self {
            tag,
            symbol,
            config,
            phase: GridPhase::Uninitialized,
            levels: Vec::new(),
            center: Decimal::ZERO,
            quote_allocation: Decimal::ZERO,
            base_allocation: Decimal::ZERO,
            pending_flips: Vec::new(),
            pending_cancel: HashSet::new(),
            warned_collisions: HashSet::new(),
            events: Vec::new(),
        }
    }

    fn buy_quantity(&self, price: Decimal) -> Decimal {
        truncate_quantity(self.quote_allocation * self.config.quantity_pct / price)
    }

    fn sell_quantity(&self) -> Decimal {
        truncate_quantity(self.base_allocation * self.config.quantity_pct)
    }

    /// Build the ladder around `price`, sizing from balances captured now.
    fn initialize(&mut self, price: Decimal, view: &LedgerView<'_>) {
        self.center = price;
        self.quote_allocation = view.available_quote();
        self.base_allocation = view.available_base();
        self.pending_flips.clear();
        self.pending_cancel.clear();
        self.warned_collisions.clear();

        let prices = compute_levels(price, &self.config);
        self.levels = prices
            .into_iter()
            .map(|level| {
                let (side, quantity) = if level < price {
                    (Some(OrderSide::Buy), self.buy_quantity(level))
                } else if level > price {
                    (Some(OrderSide::Sell), self.sell_quantity())
                } else {
                    (None, Decimal::ZERO)
                };
                GridLevel {
                    price: level,
                    side,
                    quantity,
                    order: None,
                }
            })
            .collect();

        let unfunded = self
            .levels
            .iter()
            .filter(|l| l.side.is_some() && l.quantity <= Decimal::ZERO)
            .count();
        if unfunded > 0 {
            warn!(
                strategy = %self.tag,
                symbol = %self.symbol,
                unfunded,
                "Grid levels with zero quantity will not be placed"
            );
        }

        info!(
            strategy = %self.tag,
            symbol = %self.symbol,
            center = %price,
            levels = self.levels.len(),
            low = %self.levels.first().map_or(price, |l| l.price),
            high = %self.levels.last().map_or(price, |l| l.price),
            quote_allocation = %self.quote_allocation,
            "Grid initialized"
        );
        self.phase = GridPhase::Active;
    }

    /// Empty a level whose order filled and queue its flip.
    fn complete_level(&mut self, idx: usize, side: OrderSide, quantity: Decimal) {
        self.levels[idx].order = None;
        self.levels[idx].side = None;
        self.pending_flips.push((idx, side, quantity));
    }

    /// Flip every level completed since the last decision.
    ///
    /// All filled levels are already empty here, so a level freed in this
    /// batch can take its neighbour's opposite order.
    fn apply_flips(&mut self) {
        let mut flipped = HashSet::new();
        for (idx, side, quantity) in std::mem::take(&mut self.pending_flips) {
            if let Some(target) = self.flip_level(idx, side, quantity, &flipped) {
                flipped.insert(target);
            }
        }
    }

    /// Set the opposite order on the level adjacent to `idx`.
    fn flip_level(
        &mut self,
        idx: usize,
        side: OrderSide,
        quantity: Decimal,
        flipped: &HashSet<usize>,
    ) -> Option<usize> {
        let target = match side {
            OrderSide::Buy => idx.checked_add(1).filter(|i| *i < self.levels.len()),
            OrderSide::Sell => idx.checked_sub(1),
        };
        let Some(target) = target else {
            warn!(strategy = %self.tag, level = %self.levels[idx].price, "No adjacent level for opposite order");
            return None;
        };

        if self.levels[target].order.is_some() || flipped.contains(&target) {
            warn!(
                strategy = %self.tag,
                level = %self.levels[target].price,
                "Adjacent level already has an order, skipping"
            );
            return None;
        }

        let opposite = side.opposite();
        let quantity = match opposite {
            OrderSide::Sell => quantity,
            OrderSide::Buy => self.buy_quantity(self.levels[target].price),
        };
        let level = &mut self.levels[target];
        level.side = Some(opposite);
        level.quantity = quantity;
        debug!(strategy = %self.tag, level = %level.price, side = %opposite, "Level flipped");
        Some(target)
    }

    /// Drop references to orders that died without filling.
    fn refresh_refs(&mut self, view: &LedgerView<'_>) {
        self.pending_cancel
            .retain(|id| matches!(ref_state(view, id), RefState::Live | RefState::InFlight));

        for idx in 0..self.levels.len() {
            let Some(id) = self.levels[idx].order.clone() else {
                continue;
            };
            match ref_state(view, &id) {
                RefState::Dead => self.levels[idx].order = None,
                RefState::Filled => {
                    // Normally handled by on_fill.
                    let (side, qty) = match view.order(&id) {
                        Some(o) => (o.side, o.filled_quantity),
                        None => continue,
                    };
                    self.complete_level(idx, side, qty);
                }
                RefState::Live | RefState::InFlight => {}
            }
        }
    }

    fn start_rebalance(&mut self, price: Decimal, view: &LedgerView<'_>) -> Vec<Action> {
        let deviation = (price - self.center).abs() / self.center;
        info!(
            strategy = %self.tag,
            symbol = %self.symbol,
            center = %self.center,
            price = %price,
            deviation = %deviation.round_dp(4),
            "Grid drifted past threshold, rebalancing"
        );

        let actions = cancel_owned(view, &self.tag, "grid rebalance");
        for action in &actions {
            if let Action::Cancel { client_id, .. } = action {
                self.pending_cancel.insert(client_id.clone());
            }
        }
        self.phase = GridPhase::Rebalancing;
        actions
    }

    /// Orders for every level that should have one and does not.
    fn coverage(&mut self, view: &LedgerView<'_>) -> Vec<Action> {
        let mut quote_budget = view.available_quote();
        let mut base_budget = view.available_base();
        let mut actions = Vec::new();

        for idx in 0..self.levels.len() {
            let level = &self.levels[idx];
            let Some(side) = level.side else { continue };
            if level.order.is_some() || level.quantity <= Decimal::ZERO {
                continue;
            }

            let price = level.price;
            let collides = view.foreign_orders().any(|o| o.price == Some(price))
                || view
                    .open_orders()
                    .iter()
                    .any(|o| o.owner != self.tag && o.price == Some(price));
            if collides {
                if self.warned_collisions.insert(price) {
                    warn!(
                        strategy = %self.tag,
                        symbol = %self.symbol,
                        level = %price,
                        "Level collides with a non-grid order, skipping"
                    );
                }
                continue;
            }

            let quantity = level.quantity;
            let affordable = match side {
                OrderSide::Buy => quantity * price <= quote_budget,
                OrderSide::Sell => quantity <= base_budget,
            };
            if !affordable {
                debug!(strategy = %self.tag, level = %price, side = %side, "Insufficient balance for level");
                continue;
            }
            match side {
                OrderSide::Buy => quote_budget -= quantity * price,
                OrderSide::Sell => base_budget -= quantity,
            }

            let req = OrderRequest::limit(&self.tag, &self.symbol, side, quantity, price);
            self.levels[idx].order = Some(req.client_id.clone());
            actions.push(Action::Place(req));
        }
        actions
    }

    fn live_level_count(&self, view: &LedgerView<'_>) -> usize {
        self.levels
            .iter()
            .filter_map(|l| l.order.as_deref())
            .filter(|id| matches!(ref_state(view, id), RefState::Live | RefState::InFlight))
            .count()
    }
}

impl Strategy for GridStrategy {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn on_fill(&mut self, fill: &FillRecord, view: &LedgerView<'_>) {
        if !fill.order_complete {
            return;
        }
        let Some(idx) = self
            .levels
            .iter()
            .position(|l| l.order.as_deref() == Some(fill.client_id.as_str()))
        else {
            debug!(strategy = %self.tag, client_id = %fill.client_id, "Fill for order not on the ladder");
            return;
        };

        info!(
            strategy = %self.tag,
            symbol = %self.symbol,
            side = %fill.side,
            level = %self.levels[idx].price,
            quantity = %fill.quantity,
            "Grid level filled"
        );
        let filled = view
            .order(&fill.client_id)
            .map_or(fill.quantity, |o| o.filled_quantity);
        self.complete_level(idx, fill.side, filled);
    }

    fn decide(
        &mut self,
        snapshot: &MarketAccountSnapshot,
        view: &LedgerView<'_>,
    ) -> Result<Vec<Action>, StrategyError> {
        let Some(price) = snapshot.price(&self.symbol) else {
            debug!(strategy = %self.tag, "No price in snapshot");
            return Ok(Vec::new());
        };
        if price <= Decimal::ZERO {
            return Err(StrategyError::Invariant {
                symbol: self.symbol.clone(),
                reason: format!("non-positive price {}", price),
            });
        }

        match self.phase {
            GridPhase::Cancelled => Ok(Vec::new()),
            GridPhase::Uninitialized => {
                self.initialize(price, view);
                Ok(self.coverage(view))
            }
            GridPhase::Rebalancing => {
                self.refresh_refs(view);
                let waiting = self.live_level_count(view) > 0 || !self.pending_cancel.is_empty();
                if waiting {
                    return Ok(Vec::new());
                }
                let old_center = self.center;
                self.initialize(price, view);
                self.events.push(StrategyEvent::GridRebalanced {
                    symbol: self.symbol.clone(),
                    old_center,
                    new_center: price,
                });
                Ok(self.coverage(view))
            }
            GridPhase::Active => {
                self.refresh_refs(view);
                self.apply_flips();
                let deviation = (price - self.center).abs() / self.center;
                if deviation > self.config.rebalance_threshold {
                    return Ok(self.start_rebalance(price, view));
                }
                Ok(self.coverage(view))
            }
        }
    }

    fn on_risk_decision(&mut self, decision: &RiskDecision) {
        let Some(dropped) = decision.dropped_order() else {
            return;
        };
        for level in &mut self.levels {
            if level.order.as_deref() == Some(dropped) {
                level.order = None;
            }
        }
    }

    fn shutdown_actions(&mut self, view: &LedgerView<'_>) -> Vec<Action> {
        self.phase = GridPhase::Cancelled;
        let actions = cancel_owned(view, &self.tag, "strategy stopped");
        for level in &mut self.levels {
            level.order = None;
        }
        self.pending_flips.clear();
        actions
    }

    fn take_events(&mut self) -> Vec<StrategyEvent> {
        std::mem::take(&mut self.events)
    }

    fn status(&self, view: &LedgerView<'_>) -> StrategyStatus {
        StrategyStatus {
            tag: self.tag.clone(),
            symbol: self.symbol.clone(),
            kind: "grid",
            phase: self.phase.as_str().to_string(),
            active: self.phase != GridPhase::Cancelled,
            open_orders: self.live_level_count(view),
            levels: Some(self.levels.len()),
            safety_orders_used: None,
            entry_price: (self.center > Decimal::ZERO).then_some(self.center),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Balance, ExchangeOrder, OrderStatus};
    use crate::trading::ledger::{Ledger, Submission};
    use crate::trading::risk::{RiskCheck, Verdict};
    use rust_decimal_macros::dec;
    use chrono::Utc;
    use std::collections::HashMap;

    const SYMBOL: &str = "BTC/USDT";

    fn config() -> GridConfig {
        GridConfig {
            num_levels: 10,
            spacing_pct: dec!(0.005),
            quantity_pct: dec!(0.1),
            upper_price: None,
            lower_price: None,
            rebalance_threshold: dec!(0.05),
            spacing_mode: SpacingMode::Linear,
        }
    }

    fn grid() -> GridStrategy {
        GridStrategy::new(format!("grid:{SYMBOL}"), SYMBOL.to_string(), config())
    }

    fn snapshot(price: Decimal, open_orders: Vec<ExchangeOrder>) -> MarketAccountSnapshot {
        MarketAccountSnapshot {
            taken_at: Utc::now(),
            prices: HashMap::from([(SYMBOL.to_string(), price)]),
            balances: HashMap::from([
                ("USDT".to_string(), Balance::new("USDT", dec!(10000), dec!(0))),
                ("BTC".to_string(), Balance::new("BTC", dec!(0), dec!(0))),
            ]),
            open_orders,
        }
    }

    /// Record placements as accepted and return the exchange's view of them.
    fn accept(ledger: &mut Ledger, actions: &[Action]) -> Vec<ExchangeOrder> {
        let epoch = ledger.epoch();
        actions
            .iter()
            .filter_map(|a| a.as_place())
            .enumerate()
            .map(|(i, req)| {
                let exchange_id = format!("x-{}-{}", epoch, i);
                ledger
                    .record_submission(epoch, req, Submission::Accepted { exchange_id: exchange_id.clone() })
                    .unwrap();
                ExchangeOrder {
                    exchange_id,
                    client_id: Some(req.client_id.clone()),
                    symbol: req.symbol.clone(),
                    side: req.side,
                    quantity: req.quantity,
                    price: req.price,
                    status: OrderStatus::Open,
                    filled_quantity: Decimal::ZERO,
                }
            })
            .collect()
    }

    #[test]
    fn test_linear_levels_around_center() {
        let levels = compute_levels(dec!(100), &config());
        let expected: Vec<Decimal> = [
            "97.5", "98.0", "98.5", "99.0", "99.5", "100", "100.5", "101.0", "101.5", "102.0", "102.5",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        assert_eq!(levels, expected);
    }

    #[test]
    fn test_levels_clipped_to_bounds_and_geometric() {
        let mut cfg = config();
        cfg.lower_price = Some(dec!(98.5));
        cfg.upper_price = Some(dec!(101));
        let levels = compute_levels(dec!(100), &cfg);
        assert_eq!(levels.first(), Some(&dec!(98.5)));
        assert_eq!(levels.last(), Some(&dec!(101.0)));
        assert_eq!(levels.len(), 6);

        let mut cfg = config();
        cfg.num_levels = 4;
        cfg.spacing_mode = SpacingMode::Geometric;
        let levels = compute_levels(dec!(100), &cfg);
        assert_eq!(levels, vec![dec!(99.0025), dec!(99.5), dec!(100), dec!(100.5), dec!(101.0025)]);
    }

    #[test]
    fn test_initial_orders_and_idempotent_coverage() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();

        // No base balance: only the five buys below center are funded.
        assert_eq!(actions.len(), 5);
        let first = actions[0].as_place().unwrap();
        assert_eq!(first.side, OrderSide::Buy);
        assert_eq!(first.price, Some(dec!(97.5)));
        assert_eq!(first.quantity, truncate_quantity(dec!(1000) / dec!(97.5)));

        let open = accept(&mut ledger, &actions);
        ledger.begin_tick();
        let snap = snapshot(dec!(100), open);
        ledger.sync(&snap);
        let again = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        assert!(again.is_empty());
        assert_eq!(strategy.status(&ledger.view(SYMBOL)).open_orders, 5);
    }

    #[test]
    fn test_buy_fill_places_one_sell_above() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();
        let open = accept(&mut ledger, &actions);

        // The 99.5 buy fills.
        let filled = actions[4].as_place().unwrap().clone();
        assert_eq!(filled.price, Some(dec!(99.5)));
        ledger.begin_tick();
        let exchange_id = open[4].exchange_id.clone();
        let record = ledger.record_fill(&exchange_id, filled.quantity, dec!(99.5)).unwrap();
        let remaining: Vec<ExchangeOrder> = open.into_iter().take(4).collect();
        let mut snap = snapshot(dec!(99.4), remaining);
        snap.balances
            .insert("BTC".to_string(), Balance::new("BTC", filled.quantity, dec!(0)));
        ledger.sync(&snap);

        strategy.on_fill(&record, &ledger.view(SYMBOL));
        let actions = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();

        assert_eq!(actions.len(), 1);
        let sell = actions[0].as_place().unwrap();
        assert_eq!(sell.side, OrderSide::Sell);
        assert_eq!(sell.price, Some(dec!(100)));
        assert_eq!(sell.quantity, filled.quantity);
        assert!(strategy.levels[4].side.is_none());
    }

    #[test]
    fn test_multi_level_drop_flips_every_filled_level() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();
        let open = accept(&mut ledger, &actions);

        // 98.5, 99.0 and 99.5 fill bottom-up in one move down to 98.4.
        ledger.begin_tick();
        let mut records = Vec::new();
        let mut bought = Decimal::ZERO;
        for (action, remote) in actions[2..].iter().zip(&open[2..]) {
            let req = action.as_place().unwrap();
            bought += req.quantity;
            records.push(
                ledger
                    .record_fill(&remote.exchange_id, req.quantity, req.price.unwrap())
                    .unwrap(),
            );
        }
        let mut snap = snapshot(dec!(98.4), open[..2].to_vec());
        snap.balances
            .insert("BTC".to_string(), Balance::new("BTC", bought, dec!(0)));
        ledger.sync(&snap);

        for record in &records {
            strategy.on_fill(record, &ledger.view(SYMBOL));
        }
        let actions = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();

        assert_eq!(actions.len(), 3);
        let sells: Vec<(Decimal, Decimal)> = actions
            .iter()
            .filter_map(|a| a.as_place())
            .filter(|r| r.side == OrderSide::Sell)
            .map(|r| (r.price.unwrap(), r.quantity))
            .collect();
        let expected: Vec<(Decimal, Decimal)> = records
            .iter()
            .zip([dec!(99.0), dec!(99.5), dec!(100)])
            .map(|(record, price)| (price, record.quantity))
            .collect();
        assert_eq!(sells, expected);
        assert!(strategy.levels[2].side.is_none());
    }

    #[test]
    fn test_drift_cancels_then_recenters() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();
        let open = accept(&mut ledger, &actions);

        ledger.begin_tick();
        let snap = snapshot(dec!(106), open);
        ledger.sync(&snap);
        let cancels = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        assert_eq!(cancels.len(), 5);
        assert!(cancels.iter().all(|a| matches!(a, Action::Cancel { .. })));
        assert_eq!(strategy.phase, GridPhase::Rebalancing);

        let epoch = ledger.epoch();
        for action in &cancels {
            if let Action::Cancel { client_id, .. } = action {
                ledger.record_cancel(epoch, client_id).unwrap();
            }
        }

        ledger.begin_tick();
        let snap = snapshot(dec!(106), vec![]);
        ledger.sync(&snap);
        let actions = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        assert_eq!(strategy.phase, GridPhase::Active);
        assert_eq!(strategy.center, dec!(106));
        assert_eq!(actions.len(), 5);
        let events = strategy.take_events();
        assert!(matches!(
            events.as_slice(),
            [StrategyEvent::GridRebalanced { new_center, .. }] if *new_center == dec!(106)
        ));
    }

    #[test]
    fn test_collision_with_foreign_order_skips_level() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();
        let foreign = ExchangeOrder {
            exchange_id: "manual-1".to_string(),
            client_id: None,
            symbol: SYMBOL.to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: Some(dec!(99.0)),
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
        };

        ledger.begin_tick();
        let snap = snapshot(dec!(100), vec![foreign]);
        ledger.sync(&snap);
        let actions = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        assert_eq!(actions.len(), 4);
        assert!(actions
            .iter()
            .filter_map(|a| a.as_place())
            .all(|r| r.price != Some(dec!(99.0))));
    }

    #[test]
    fn test_vetoed_order_is_retried() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();
        let vetoed = actions[0].as_place().unwrap();

        strategy.on_risk_decision(&RiskDecision {
            check: RiskCheck::OrderCount,
            symbol: Some(SYMBOL.to_string()),
            owner: vetoed.owner.clone(),
            client_id: Some(vetoed.client_id.clone()),
            verdict: Verdict::Vetoed,
            reason: "test".to_string(),
        });
        let open = accept(&mut ledger, &actions[1..]);

        ledger.begin_tick();
        let snap = snapshot(dec!(100), open);
        ledger.sync(&snap);
        let retry = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].as_place().unwrap().price, Some(dec!(97.5)));
    }

    #[test]
    fn test_shutdown_cancels_own_orders() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = grid();

        ledger.begin_tick();
        ledger.sync(&snapshot(dec!(100), vec![]));
        let actions = strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap();
        accept(&mut ledger, &actions);

        let cancels = strategy.shutdown_actions(&ledger.view(SYMBOL));
        assert_eq!(cancels.len(), 5);
        assert!(!strategy.status(&ledger.view(SYMBOL)).active);
        assert!(strategy.decide(&snapshot(dec!(100), vec![]), &ledger.view(SYMBOL)).unwrap().is_empty());
    }
}
