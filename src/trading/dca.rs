//! DCA strategy: base order, safety orders on the way down, and a
//! take-profit that follows the average entry.
//!
//! Safety triggers are measured from the base fill price; take-profit and
//! stop-loss from the quantity-weighted average of all filled cycle orders.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::StrategyError;
use crate::models::{truncate_quantity, MarketAccountSnapshot, OrderRequest, OrderSide};

use super::action::Action;
use super::config::{pow, DcaConfig};
use super::ledger::{FillRecord, LedgerView};
use super::risk::RiskDecision;
use super::strategy::{cancel_owned, ref_state, RefState, Strategy, StrategyEvent, StrategyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcaPhase {
    Uninitialized,
    BasePending,
    BaseFilled,
    /// Safety order `n` (1-based) is resting
    SafetyPending(u32),
    /// All safety orders used; only the take-profit remains
    TakeProfitPending,
    CycleComplete,
    StoppedOut,
}

impl std::fmt::Display for DcaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DcaPhase::Uninitialized => f.write_str("uninitialized"),
            DcaPhase::BasePending => f.write_str("base_pending"),
            DcaPhase::BaseFilled => f.write_str("base_filled"),
            DcaPhase::SafetyPending(n) => write!(f, "safety_pending({})", n),
            DcaPhase::TakeProfitPending => f.write_str("take_profit_pending"),
            DcaPhase::CycleComplete => f.write_str("cycle_complete"),
            DcaPhase::StoppedOut => f.write_str("stopped_out"),
        }
    }
}

pub struct DcaStrategy {
    tag: String,
    symbol: String,
    config: DcaConfig,
    phase: DcaPhase,
    active: bool,

    base_order: Option<String>,
    /// Filled safety orders, in fill order
    safety_orders: Vec<String>,
    pending_safety: Option<String>,
    take_profit: Option<String>,
    stop_order: Option<String>,

    entry_price: Decimal,
    average_entry: Decimal,
    position_qty: Decimal,
    cycles_completed: u32,

    pending_cancel: HashSet<String>,
    queued: Vec<Action>,
    events: Vec<StrategyEvent>,
}

impl DcaStrategy {
    pub fn new(tag: String, symbol: String, config: DcaConfig) -> Self {
        Self {
            tag,
            symbol,
            config,
            phase: DcaPhase::Uninitialized,
            active: true,
            base_order: None,
            safety_orders: Vec::new(),
            pending_safety: None,
            take_profit: None,
            stop_order: None,
            entry_price: Decimal::ZERO,
            average_entry: Decimal::ZERO,
            position_qty: Decimal::ZERO,
            cycles_completed: 0,
            pending_cancel: HashSet::new(),
            queued: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn safety_count(&self) -> u32 {
        self.safety_orders.len() as u32
    }

    /// Price at which safety order `k + 1` triggers.
    pub fn safety_trigger(&self, k: u32) -> Decimal {
        let drop = self.config.deviation_pct * pow(self.config.step_scale, k);
        (self.entry_price * (Decimal::ONE - drop)).round_dp(8)
    }

    /// Base quantity for safety order `k + 1` placed at `trigger`.
    pub fn safety_quantity(&self, k: u32, trigger: Decimal) -> Decimal {
        truncate_quantity(self.config.safety_order_size * pow(self.config.volume_scale, k) / trigger)
    }

    pub fn take_profit_price(&self) -> Decimal {
        (self.average_entry * (Decimal::ONE + self.config.take_profit_pct)).round_dp(8)
    }

    fn stop_loss_price(&self) -> Option<Decimal> {
        self.config
            .stop_loss_pct
            .map(|sl| (self.average_entry * (Decimal::ONE - sl)).round_dp(8))
    }

    /// Recompute average entry and size from the ledger's filled cycle orders.
    fn recompute(&mut self, view: &LedgerView<'_>) {
        let mut qty = Decimal::ZERO;
        let mut cost = Decimal::ZERO;
        for id in self.base_order.iter().chain(self.safety_orders.iter()) {
            if let Some(order) = view.order(id) {
                let avg = order.average_fill_price.unwrap_or(Decimal::ZERO);
                qty += order.filled_quantity;
                cost += order.filled_quantity * avg;
            }
        }
        self.position_qty = qty;
        if qty > Decimal::ZERO {
            self.average_entry = cost / qty;
        }
    }

    fn reset_cycle(&mut self) {
        self.base_order = None;
        self.safety_orders.clear();
        self.pending_safety = None;
        self.take_profit = None;
        self.stop_order = None;
        self.entry_price = Decimal::ZERO;
        self.average_entry = Decimal::ZERO;
        self.position_qty = Decimal::ZERO;
    }

    fn queue_cancel(&mut self, client_id: String, reason: &str) {
        self.queued
            .push(Action::cancel(&client_id, &self.symbol, &self.tag, reason));
        self.pending_cancel.insert(client_id);
    }

    /// Phase to fall back to while no safety order is resting.
    fn idle_phase(&self) -> DcaPhase {
        if self.safety_count() >= self.config.max_safety_orders {
            DcaPhase::TakeProfitPending
        } else {
            DcaPhase::BaseFilled
        }
    }

    /// Clear references to orders that died without filling.
    fn refresh(&mut self, view: &LedgerView<'_>) {
        self.pending_cancel
            .retain(|id| matches!(ref_state(view, id), RefState::Live | RefState::InFlight));

        let dead = |id: &Option<String>| {
            id.as_deref()
                .is_some_and(|id| ref_state(view, id) == RefState::Dead)
        };

        if dead(&self.base_order) {
            warn!(strategy = %self.tag, symbol = %self.symbol, "Base order died, restarting cycle");
            self.reset_cycle();
            self.phase = DcaPhase::Uninitialized;
        }
        if dead(&self.pending_safety) {
            warn!(strategy = %self.tag, symbol = %self.symbol, "Safety order died");
            self.pending_safety = None;
            self.phase = self.idle_phase();
        }
        if dead(&self.take_profit) {
            warn!(strategy = %self.tag, symbol = %self.symbol, "Take-profit order died, replacing");
            self.take_profit = None;
        }
        if dead(&self.stop_order) {
            warn!(strategy = %self.tag, symbol = %self.symbol, "Stop-loss sell died, retrying");
            self.stop_order = None;
        }
    }

    fn start_cycle(&mut self, price: Decimal) -> Option<Action> {
        let qty = truncate_quantity(self.config.base_order_size / price);
        if qty <= Decimal::ZERO {
            warn!(
                strategy = %self.tag,
                symbol = %self.symbol,
                base_order_size = %self.config.base_order_size,
                price = %price,
                "Base order quantity rounds to zero, not submitting"
            );
            return None;
        }

        self.reset_cycle();
        let req = OrderRequest::market(&self.tag, &self.symbol, OrderSide::Buy, qty);
        self.base_order = Some(req.client_id.clone());
        self.phase = DcaPhase::BasePending;
        info!(strategy = %self.tag, symbol = %self.symbol, quantity = %qty, price = %price, "Starting DCA cycle");
        Some(Action::Place(req))
    }

    fn stop_out(&mut self, price: Decimal, view: &LedgerView<'_>) -> Vec<Action> {
        let mut actions = cancel_owned(view, &self.tag, "stop loss");
        // Proposed this tick and not in the ledger yet.
        for id in [self.pending_safety.take(), self.take_profit.take()]
            .into_iter()
            .flatten()
        {
            if ref_state(view, &id) == RefState::InFlight {
                actions.push(Action::cancel(&id, &self.symbol, &self.tag, "stop loss"));
            }
        }
        for action in &actions {
            if let Action::Cancel { client_id, .. } = action {
                self.pending_cancel.insert(client_id.clone());
            }
        }

        let qty = truncate_quantity(self.position_qty);
        warn!(
            strategy = %self.tag,
            symbol = %self.symbol,
            price = %price,
            average_entry = %self.average_entry,
            quantity = %qty,
            "Stop loss triggered"
        );
        self.events.push(StrategyEvent::StopLossTriggered {
            symbol: self.symbol.clone(),
            price,
            average_entry: self.average_entry,
            quantity: qty,
        });
        self.phase = DcaPhase::StoppedOut;
        if let Some(sell) = self.stop_sell(qty) {
            actions.push(sell);
        }
        actions
    }

    fn stop_sell(&mut self, qty: Decimal) -> Option<Action> {
        if qty <= Decimal::ZERO {
            self.reset_cycle();
            self.phase = DcaPhase::Uninitialized;
            return None;
        }
        let req = OrderRequest::market(&self.tag, &self.symbol, OrderSide::Sell, qty).reduce_only();
        self.stop_order = Some(req.client_id.clone());
        Some(Action::Place(req))
    }

    fn manage_position(&mut self, price: Decimal, view: &LedgerView<'_>) -> Vec<Action> {
        if let Some(stop) = self.stop_loss_price() {
            if price <= stop {
                return self.stop_out(price, view);
            }
        }

        let mut actions = Vec::new();
        if self.take_profit.is_none() && self.position_qty > Decimal::ZERO {
            let tp_price = self.take_profit_price();
            let qty = truncate_quantity(self.position_qty);
            let req = OrderRequest::limit(&self.tag, &self.symbol, OrderSide::Sell, qty, tp_price)
                .reduce_only();
            info!(
                strategy = %self.tag,
                symbol = %self.symbol,
                price = %tp_price,
                quantity = %qty,
                average_entry = %self.average_entry,
                "Placing take-profit"
            );
            self.take_profit = Some(req.client_id.clone());
            actions.push(Action::Place(req));
        }

        let k = self.safety_count();
        if self.pending_safety.is_none() && k < self.config.max_safety_orders {
            let trigger = self.safety_trigger(k);
            if price <= trigger {
                let qty = self.safety_quantity(k, trigger);
                if qty > Decimal::ZERO {
                    let req = OrderRequest::limit(&self.tag, &self.symbol, OrderSide::Buy, qty, trigger);
                    info!(
                        strategy = %self.tag,
                        symbol = %self.symbol,
                        safety_order = k + 1,
                        trigger = %trigger,
                        quantity = %qty,
                        "Placing safety order"
                    );
                    self.pending_safety = Some(req.client_id.clone());
                    self.phase = DcaPhase::SafetyPending(k + 1);
                    actions.push(Action::Place(req));
                } else {
                    warn!(strategy = %self.tag, safety_order = k + 1, "Safety quantity rounds to zero, not submitting");
                }
            }
        }
        actions
    }
}

impl Strategy for DcaStrategy {
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
        let id = fill.client_id.as_str();

        if self.base_order.as_deref() == Some(id) {
            self.entry_price = view
                .order(id)
                .and_then(|o| o.average_fill_price)
                .unwrap_or(fill.price);
            self.recompute(view);
            self.phase = DcaPhase::BaseFilled;
            info!(strategy = %self.tag, symbol = %self.symbol, entry = %self.entry_price, quantity = %self.position_qty, "Base order filled");
        } else if self.pending_safety.as_deref() == Some(id) {
            self.pending_safety = None;
            self.safety_orders.push(id.to_string());
            let previous_tp = self.take_profit_price();
            self.recompute(view);
            if let Some(tp) = self.take_profit.take() {
                self.queue_cancel(tp, "average entry changed");
            }
            self.phase = self.idle_phase();
            info!(
                strategy = %self.tag,
                symbol = %self.symbol,
                safety_order = self.safety_count(),
                average_entry = %self.average_entry,
                previous_take_profit = %previous_tp,
                "Safety order filled"
            );
        } else if self.take_profit.as_deref() == Some(id) {
            let (qty, avg) = view
                .order(id)
                .map(|o| (o.filled_quantity, o.average_fill_price.unwrap_or(fill.price)))
                .unwrap_or((fill.quantity, fill.price));
            let profit = (avg - self.average_entry) * qty;
            self.events.push(StrategyEvent::CycleComplete {
                symbol: self.symbol.clone(),
                profit,
                safety_orders_used: self.safety_count(),
            });
            self.cycles_completed += 1;
            info!(
                strategy = %self.tag,
                symbol = %self.symbol,
                profit = %profit,
                safety_orders = self.safety_count(),
                cycles = self.cycles_completed,
                "DCA cycle complete"
            );

            if let Some(safety) = self.pending_safety.take() {
                self.queue_cancel(safety, "cycle complete");
            }
            self.take_profit = None;
            self.reset_cycle();
            self.phase = DcaPhase::CycleComplete;
        } else if self.stop_order.as_deref() == Some(id) {
            info!(strategy = %self.tag, symbol = %self.symbol, price = %fill.price, "Stop-loss sell filled");
            self.reset_cycle();
            self.phase = DcaPhase::Uninitialized;
        } else {
            debug!(strategy = %self.tag, client_id = %id, "Fill for untracked order");
        }
    }

    fn decide(
        &mut self,
        snapshot: &MarketAccountSnapshot,
        view: &LedgerView<'_>,
    ) -> Result<Vec<Action>, StrategyError> {
        if !self.active {
            return Ok(Vec::new());
        }
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

        self.refresh(view);
        let mut actions = std::mem::take(&mut self.queued);

        match self.phase {
            DcaPhase::Uninitialized | DcaPhase::CycleComplete => {
                actions.extend(self.start_cycle(price));
            }
            DcaPhase::BasePending => {}
            DcaPhase::BaseFilled | DcaPhase::SafetyPending(_) | DcaPhase::TakeProfitPending => {
                if self.position_qty <= Decimal::ZERO {
                    return Err(StrategyError::Invariant {
                        symbol: self.symbol.clone(),
                        reason: format!("phase {} with no filled quantity", self.phase),
                    });
                }
                actions.extend(self.manage_position(price, view));
            }
            DcaPhase::StoppedOut => {
                if self.stop_order.is_none() {
                    let qty = truncate_quantity(self.position_qty);
                    actions.extend(self.stop_sell(qty));
                }
            }
        }
        Ok(actions)
    }

    fn on_risk_decision(&mut self, decision: &RiskDecision) {
        let Some(dropped) = decision.dropped_order() else {
            return;
        };
        if self.base_order.as_deref() == Some(dropped) {
            self.base_order = None;
            self.phase = DcaPhase::Uninitialized;
        } else if self.pending_safety.as_deref() == Some(dropped) {
            self.pending_safety = None;
            self.phase = self.idle_phase();
        } else if self.take_profit.as_deref() == Some(dropped) {
            self.take_profit = None;
        } else if self.stop_order.as_deref() == Some(dropped) {
            self.stop_order = None;
        }
    }

    fn shutdown_actions(&mut self, view: &LedgerView<'_>) -> Vec<Action> {
        self.active = false;
        self.queued.clear();
        cancel_owned(view, &self.tag, "strategy stopped")
    }

    fn take_events(&mut self) -> Vec<StrategyEvent> {
        std::mem::take(&mut self.events)
    }

    fn status(&self, view: &LedgerView<'_>) -> StrategyStatus {
        StrategyStatus {
            tag: self.tag.clone(),
            symbol: self.symbol.clone(),
            kind: "dca",
            phase: self.phase.to_string(),
            active: self.active,
            open_orders: view.open_orders().iter().filter(|o| o.owner == self.tag).count(),
            levels: None,
            safety_orders_used: Some(self.safety_count()),
            entry_price: (self.average_entry > Decimal::ZERO).then_some(self.average_entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Balance, OrderKind};
    use crate::trading::ledger::{Ledger, Submission};
    use crate::trading::risk::{RiskCheck, Verdict};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    const SYMBOL: &str = "BTC/USDT";

    fn config() -> DcaConfig {
        DcaConfig {
            base_order_size: dec!(100),
            safety_order_size: dec!(50),
            max_safety_orders: 3,
            deviation_pct: dec!(0.03),
            step_scale: dec!(1.2),
            volume_scale: dec!(1.5),
            take_profit_pct: dec!(0.02),
            stop_loss_pct: None,
        }
    }

    fn dca(config: DcaConfig) -> DcaStrategy {
        DcaStrategy::new(format!("dca:{SYMBOL}"), SYMBOL.to_string(), config)
    }

    fn snapshot(price: Decimal) -> MarketAccountSnapshot {
        MarketAccountSnapshot {
            taken_at: Utc::now(),
            prices: HashMap::from([(SYMBOL.to_string(), price)]),
            balances: HashMap::from([("USDT".to_string(), Balance::new("USDT", dec!(10000), dec!(0)))]),
            open_orders: Vec::new(),
        }
    }

    /// Run one tick: sync, decide, and record every placement as accepted.
    fn tick(ledger: &mut Ledger, strategy: &mut DcaStrategy, price: Decimal) -> Vec<Action> {
        let epoch = ledger.begin_tick();
        let snap = snapshot(price);
        ledger.sync(&snap);
        let actions = strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap();
        for action in &actions {
            match action {
                Action::Place(req) => ledger
                    .record_submission(epoch, req, Submission::Accepted { exchange_id: req.client_id.clone() })
                    .unwrap(),
                Action::Cancel { client_id, .. } => {
                    ledger.record_cancel(epoch, client_id).unwrap();
                }
                Action::CancelAll { .. } => {}
            }
        }
        actions
    }

    fn fill(ledger: &mut Ledger, strategy: &mut DcaStrategy, req: &OrderRequest, price: Decimal) {
        let record = ledger.record_fill(&req.client_id, req.quantity, price).unwrap();
        strategy.on_fill(&record, &ledger.view(SYMBOL));
    }

    fn placements(actions: &[Action]) -> Vec<OrderRequest> {
        actions.iter().filter_map(|a| a.as_place()).cloned().collect()
    }

    #[test]
    fn test_safety_triggers_follow_step_scale() {
        let mut strategy = dca(config());
        strategy.entry_price = dec!(50000);

        assert_eq!(strategy.safety_trigger(0), dec!(48500));
        assert_eq!(strategy.safety_trigger(1), dec!(48200));
        assert_eq!(strategy.safety_trigger(2), dec!(47840));
        assert_eq!(strategy.safety_quantity(1, dec!(48200)), dec!(0.00155601));
    }

    #[test]
    fn test_base_fill_places_take_profit() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(config());

        let actions = tick(&mut ledger, &mut strategy, dec!(50000));
        let base = placements(&actions).remove(0);
        assert_eq!(base.kind, OrderKind::Market);
        assert_eq!(base.quantity, dec!(0.002));
        assert_eq!(strategy.phase, DcaPhase::BasePending);

        fill(&mut ledger, &mut strategy, &base, dec!(50000));
        assert_eq!(strategy.phase, DcaPhase::BaseFilled);

        let actions = tick(&mut ledger, &mut strategy, dec!(50000));
        let tp = placements(&actions).remove(0);
        assert_eq!(tp.side, OrderSide::Sell);
        assert_eq!(tp.price, Some(dec!(51000)));
        assert_eq!(tp.quantity, dec!(0.002));
        assert!(tp.reduce_only);

        // Nothing more until price moves.
        assert!(tick(&mut ledger, &mut strategy, dec!(49000)).is_empty());
    }

    #[test]
    fn test_safety_fill_replaces_take_profit_lower() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(config());

        let base = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);
        fill(&mut ledger, &mut strategy, &base, dec!(50000));
        let tp = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);

        let safety = placements(&tick(&mut ledger, &mut strategy, dec!(48000))).remove(0);
        assert_eq!(safety.price, Some(dec!(48500)));
        assert_eq!(safety.quantity, dec!(0.00103092));
        assert_eq!(strategy.phase, DcaPhase::SafetyPending(1));

        fill(&mut ledger, &mut strategy, &safety, dec!(48500));
        assert_eq!(strategy.safety_count(), 1);

        let actions = tick(&mut ledger, &mut strategy, dec!(48000));
        assert!(matches!(&actions[0], Action::Cancel { client_id, .. } if *client_id == tp.client_id));
        let new_tp = placements(&actions).remove(0);
        let expected_avg = (dec!(0.002) * dec!(50000) + dec!(0.00103092) * dec!(48500)) / dec!(0.00303092);
        assert_eq!(strategy.average_entry, expected_avg);
        assert_eq!(new_tp.price, Some((expected_avg * dec!(1.02)).round_dp(8)));
        assert!(new_tp.price.unwrap() < dec!(51000));
        assert_eq!(new_tp.quantity, dec!(0.00303092));
    }

    #[test]
    fn test_take_profit_fill_completes_cycle() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(config());

        let base = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);
        fill(&mut ledger, &mut strategy, &base, dec!(50000));
        let tp = placements(&tick(&mut ledger, &mut strategy, dec!(50500))).remove(0);
        fill(&mut ledger, &mut strategy, &tp, dec!(51000));

        assert_eq!(strategy.phase, DcaPhase::CycleComplete);
        let events = strategy.take_events();
        assert_eq!(
            events,
            vec![StrategyEvent::CycleComplete {
                symbol: SYMBOL.to_string(),
                profit: dec!(2),
                safety_orders_used: 0,
            }]
        );

        let next = placements(&tick(&mut ledger, &mut strategy, dec!(51000)));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].kind, OrderKind::Market);
        assert_eq!(strategy.cycles_completed, 1);
    }

    #[test]
    fn test_stop_loss_cancels_and_sells() {
        let mut cfg = config();
        cfg.stop_loss_pct = Some(dec!(0.1));
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(cfg);

        let base = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);
        fill(&mut ledger, &mut strategy, &base, dec!(50000));
        let tp = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);

        let actions = tick(&mut ledger, &mut strategy, dec!(44000));
        assert!(matches!(&actions[0], Action::Cancel { client_id, .. } if *client_id == tp.client_id));
        let sell = placements(&actions).remove(0);
        assert_eq!(sell.kind, OrderKind::Market);
        assert_eq!(sell.side, OrderSide::Sell);
        assert_eq!(sell.quantity, dec!(0.002));
        assert_eq!(strategy.phase, DcaPhase::StoppedOut);
        assert!(matches!(
            strategy.take_events()[..],
            [StrategyEvent::StopLossTriggered { .. }]
        ));

        fill(&mut ledger, &mut strategy, &sell, dec!(44000));
        assert_eq!(strategy.phase, DcaPhase::Uninitialized);
    }

    #[test]
    fn test_vetoed_base_returns_to_uninitialized() {
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(config());
        ledger.begin_tick();
        let snap = snapshot(dec!(50000));
        let base = placements(&strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap()).remove(0);

        strategy.on_risk_decision(&RiskDecision {
            check: RiskCheck::EmergencyStop,
            symbol: Some(SYMBOL.to_string()),
            owner: base.owner.clone(),
            client_id: Some(base.client_id.clone()),
            verdict: Verdict::Vetoed,
            reason: "emergency stop is set".to_string(),
        });
        assert_eq!(strategy.phase, DcaPhase::Uninitialized);
        assert_eq!(placements(&strategy.decide(&snap, &ledger.view(SYMBOL)).unwrap()).len(), 1);
    }

    #[test]
    fn test_safety_orders_stop_at_max() {
        let mut cfg = config();
        cfg.max_safety_orders = 1;
        let mut ledger = Ledger::new(3, dec!(0.0001));
        let mut strategy = dca(cfg);

        let base = placements(&tick(&mut ledger, &mut strategy, dec!(50000))).remove(0);
        fill(&mut ledger, &mut strategy, &base, dec!(50000));
        tick(&mut ledger, &mut strategy, dec!(50000));
        let safety = placements(&tick(&mut ledger, &mut strategy, dec!(48000))).remove(0);
        fill(&mut ledger, &mut strategy, &safety, dec!(48500));
        assert_eq!(strategy.phase, DcaPhase::TakeProfitPending);

        let actions = tick(&mut ledger, &mut strategy, dec!(40000));
        // Only the replacement take-profit (and the cancel of the old one).
        assert_eq!(placements(&actions).len(), 1);
        assert_eq!(placements(&actions)[0].side, OrderSide::Sell);
    }
}
