//! Risk gate evaluated over every batch of proposed actions.
//!
//! Checks run in a fixed order:
//! - Emergency stop (latched, manual clear)
//! - Drawdown from the running peak portfolio value
//! - Per-position notional
//! - Total exposure
//! - Open orders per symbol
//!
//! The first two short-circuit: once either triggers, only cancels and
//! reduce-only orders pass. Every veto or change is reported as a
//! [`RiskDecision`]; nothing is dropped silently.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error};

use crate::models::{truncate_quantity, OrderRequest, OrderSide, PositionSide};

use super::action::{Action, RISK_OWNER};
use super::config::RiskConfig;

/// Exposure of one non-flat position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionExposure {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub mark: Decimal,
    /// size * mark
    pub notional: Decimal,
}

impl PositionExposure {
    pub fn is_increased_by(&self, side: OrderSide) -> bool {
        self.side.opening_side() == side
    }

    fn closing_side(&self) -> OrderSide {
        self.side.opening_side().opposite()
    }
}

/// Open order as seen by the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrderRef {
    pub client_id: String,
    pub owner: String,
    pub side: OrderSide,
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
}

/// Portfolio state for risk evaluation.
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    /// Balances valued in the quote asset
    pub total_value: Decimal,
    pub positions: Vec<PositionExposure>,
    /// Open orders per symbol, oldest first
    pub open_orders: HashMap<String, Vec<OpenOrderRef>>,
    pub marks: HashMap<String, Decimal>,
}

impl PortfolioState {
    pub fn position(&self, symbol: &str) -> Option<&PositionExposure> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    pub fn total_exposure(&self) -> Decimal {
        self.positions.iter().map(|p| p.notional.abs()).sum()
    }

    pub fn has_open_orders(&self) -> bool {
        self.open_orders.values().any(|orders| !orders.is_empty())
    }

    fn has_risk_order(&self, symbol: &str) -> bool {
        self.open_orders
            .get(symbol)
            .is_some_and(|orders| orders.iter().any(|o| o.owner == RISK_OWNER))
    }

    fn increases(&self, req: &OrderRequest) -> bool {
        !req.reduce_only
            && self
                .position(&req.symbol)
                .map_or(true, |p| p.is_increased_by(req.side))
    }
}

/// Which check produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCheck {
    EmergencyStop,
    Drawdown,
    PositionSize,
    TotalExposure,
    OrderCount,
}

impl RiskCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCheck::EmergencyStop => "emergency_stop",
            RiskCheck::Drawdown => "drawdown",
            RiskCheck::PositionSize => "position_size",
            RiskCheck::TotalExposure => "total_exposure",
            RiskCheck::OrderCount => "order_count",
        }
    }
}

impl std::fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gate did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Placement dropped
    Vetoed,
    /// Placement quantity reduced
    Shrunk { from: Decimal, to: Decimal },
    /// Placement dropped in favour of a reducing market order
    Replaced { reduce_client_id: String },
    /// Gate-originated reducing order
    Reduce { quantity: Decimal },
    /// Gate-originated cancel of an open order
    Cancelled,
    /// Gate-originated cancel of all open orders
    StopAll,
}

/// Structured record of one gate intervention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub check: RiskCheck,
    pub symbol: Option<String>,
    /// Strategy tag the decision concerns
    pub owner: String,
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub reason: String,
}

impl RiskDecision {
    /// Client id of a proposed order that will never reach the exchange.
    pub fn dropped_order(&self) -> Option<&str> {
        match self.verdict {
            Verdict::Vetoed | Verdict::Replaced { .. } => self.client_id.as_deref(),
            _ => None,
        }
    }

    fn on_request(check: RiskCheck, req: &OrderRequest, verdict: Verdict, reason: String) -> Self {
        Self {
            check,
            symbol: Some(req.symbol.clone()),
            owner: req.owner.clone(),
            client_id: Some(req.client_id.clone()),
            verdict,
            reason,
        }
    }
}

/// Result of one gate pass.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    pub accepted: Vec<Action>,
    pub decisions: Vec<RiskDecision>,
    /// The drawdown check latched the emergency stop during this pass
    pub stop_triggered: bool,
}

pub struct RiskGate {
    config: RiskConfig,
    peak_value: Decimal,
    last_drawdown: Decimal,
    emergency_stop: bool,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let emergency_stop = config.emergency_stop;
        Self {
            config,
            peak_value: Decimal::ZERO,
            last_drawdown: Decimal::ZERO,
            emergency_stop,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn peak_value(&self) -> Decimal {
        self.peak_value
    }

    pub fn current_drawdown(&self) -> Decimal {
        self.last_drawdown
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    /// Manually clear the latch. The peak restarts from the next valuation.
    pub fn clear_emergency_stop(&mut self) {
        self.emergency_stop = false;
        self.peak_value = Decimal::ZERO;
        self.last_drawdown = Decimal::ZERO;
    }

    /// Update the high-water mark and return the current drawdown.
    fn update_drawdown(&mut self, current: Decimal) -> Decimal {
        if current > self.peak_value {
            self.peak_value = current;
        }
        self.last_drawdown = if self.peak_value > Decimal::ZERO {
            ((self.peak_value - current) / self.peak_value).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        self.last_drawdown
    }

    // ==================== Filtering ====================

    pub fn filter(&mut self, actions: Vec<Action>, portfolio: &PortfolioState) -> GateOutcome {
        let mut outcome = GateOutcome::default();

        if self.emergency_stop {
            outcome.accepted = stop_all(
                actions,
                portfolio,
                RiskCheck::EmergencyStop,
                "emergency stop is set",
                &mut outcome.decisions,
            );
            return outcome;
        }

        let drawdown = self.update_drawdown(portfolio.total_value);
        if drawdown > self.config.max_drawdown_pct {
            self.emergency_stop = true;
            error!(
                severity = "critical",
                drawdown = %drawdown,
                max = %self.config.max_drawdown_pct,
                peak = %self.peak_value,
                current = %portfolio.total_value,
                "Drawdown limit breached, emergency stop latched"
            );
            let reason = format!(
                "drawdown {} exceeds max {}",
                drawdown.round_dp(4),
                self.config.max_drawdown_pct
            );
            outcome.accepted = stop_all(
                actions,
                portfolio,
                RiskCheck::Drawdown,
                &reason,
                &mut outcome.decisions,
            );
            outcome.stop_triggered = true;
            return outcome;
        }

        let mut reducing = HashSet::new();
        let actions =
            self.check_position_size(actions, portfolio, &mut reducing, &mut outcome.decisions);
        let actions =
            self.check_exposure(actions, portfolio, &mut reducing, &mut outcome.decisions);
        outcome.accepted = self.check_order_count(actions, portfolio, &mut outcome.decisions);

        debug!(
            accepted = outcome.accepted.len(),
            decisions = outcome.decisions.len(),
            "Risk gate pass complete"
        );
        outcome
    }

    fn check_position_size(
        &self,
        actions: Vec<Action>,
        portfolio: &PortfolioState,
        reducing: &mut HashSet<String>,
        decisions: &mut Vec<RiskDecision>,
    ) -> Vec<Action> {
        let max = self.config.max_position_size;
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            let mut req = match action {
                Action::Place(req) if portfolio.increases(&req) => req,
                other => {
                    out.push(other);
                    continue;
                }
            };

            let position = portfolio.position(&req.symbol);
            let current = position.map_or(Decimal::ZERO, |p| p.notional);

            if current > max {
                // Flagged: the first increasing action becomes a reduction.
                if let Some(p) = position {
                    if reducing.insert(req.symbol.clone()) && !portfolio.has_risk_order(&p.symbol) {
                        let qty = truncate_quantity((current - max) / p.mark);
                        if qty > Decimal::ZERO {
                            let reduce =
                                OrderRequest::market(RISK_OWNER, &p.symbol, p.closing_side(), qty)
                                    .reduce_only();
                            decisions.push(RiskDecision::on_request(
                                RiskCheck::PositionSize,
                                &req,
                                Verdict::Replaced {
                                    reduce_client_id: reduce.client_id.clone(),
                                },
                                format!("position notional {} exceeds max {}", current, max),
                            ));
                            out.push(Action::Place(reduce));
                            continue;
                        }
                    }
                }
                decisions.push(RiskDecision::on_request(
                    RiskCheck::PositionSize,
                    &req,
                    Verdict::Vetoed,
                    format!("position notional {} exceeds max {}", current, max),
                ));
                continue;
            }

            let Some(price) = req.price.or_else(|| portfolio.mark(&req.symbol)) else {
                decisions.push(RiskDecision::on_request(
                    RiskCheck::PositionSize,
                    &req,
                    Verdict::Vetoed,
                    "no price to value order".to_string(),
                ));
                continue;
            };

            if current + req.quantity * price > max {
                let allowed = truncate_quantity((max - current) / price);
                if allowed <= Decimal::ZERO {
                    decisions.push(RiskDecision::on_request(
                        RiskCheck::PositionSize,
                        &req,
                        Verdict::Vetoed,
                        format!("no room under max position {}", max),
                    ));
                    continue;
                }
                decisions.push(RiskDecision::on_request(
                    RiskCheck::PositionSize,
                    &req,
                    Verdict::Shrunk {
                        from: req.quantity,
                        to: allowed,
                    },
                    format!("order would push position past max {}", max),
                ));
                req.quantity = allowed;
            }
            out.push(Action::Place(req));
        }
        out
    }

    fn check_exposure(
        &self,
        actions: Vec<Action>,
        portfolio: &PortfolioState,
        reducing: &mut HashSet<String>,
        decisions: &mut Vec<RiskDecision>,
    ) -> Vec<Action> {
        let total = portfolio.total_exposure();
        let max = self.config.max_total_exposure;
        if total <= max {
            return actions;
        }

        let reason = format!("total exposure {} exceeds max {}", total, max);
        let mut out = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Place(req) if portfolio.increases(&req) => {
                    decisions.push(RiskDecision::on_request(
                        RiskCheck::TotalExposure,
                        &req,
                        Verdict::Vetoed,
                        reason.clone(),
                    ));
                }
                other => out.push(other),
            }
        }

        let mut ranked: Vec<&PositionExposure> = portfolio.positions.iter().collect();
        ranked.sort_by(|a, b| b.notional.cmp(&a.notional));

        let mut excess = total - max;
        let mut i = 0;
        while i < ranked.len() && excess > Decimal::ZERO {
            let notional = ranked[i].notional;
            let mut j = i;
            while j < ranked.len() && ranked[j].notional == notional {
                j += 1;
            }
            let group = &ranked[i..j];
            let count = Decimal::from(group.len());
            let take = excess.min(notional * count);
            let share = take / count;

            for p in group {
                if reducing.contains(&p.symbol) || portfolio.has_risk_order(&p.symbol) {
                    continue;
                }
                let qty = truncate_quantity(share / p.mark);
                if qty <= Decimal::ZERO {
                    continue;
                }
                let reduce =
                    OrderRequest::market(RISK_OWNER, &p.symbol, p.closing_side(), qty).reduce_only();
                decisions.push(RiskDecision {
                    check: RiskCheck::TotalExposure,
                    symbol: Some(p.symbol.clone()),
                    owner: RISK_OWNER.to_string(),
                    client_id: Some(reduce.client_id.clone()),
                    verdict: Verdict::Reduce { quantity: qty },
                    reason: reason.clone(),
                });
                reducing.insert(p.symbol.clone());
                out.push(Action::Place(reduce));
            }

            excess -= take;
            i = j;
        }
        out
    }

    fn check_order_count(
        &self,
        actions: Vec<Action>,
        portfolio: &PortfolioState,
        decisions: &mut Vec<RiskDecision>,
    ) -> Vec<Action> {
        let max = self.config.max_orders_per_symbol;

        let mut symbols: BTreeSet<&str> = portfolio.open_orders.keys().map(String::as_str).collect();
        symbols.extend(actions.iter().filter_map(|a| a.as_place()).map(|r| r.symbol.as_str()));

        let mut forced_cancels = Vec::new();
        let mut capacity: HashMap<String, usize> = HashMap::new();

        for symbol in symbols {
            let cancels_everything = actions.iter().any(|a| {
                matches!(a, Action::CancelAll { symbol: s, .. } if s.as_deref().map_or(true, |s| s == symbol))
            });
            let cancelled: HashSet<&str> = actions
                .iter()
                .filter_map(|a| match a {
                    Action::Cancel { client_id, .. } => Some(client_id.as_str()),
                    _ => None,
                })
                .collect();

            let remaining: Vec<&OpenOrderRef> = if cancels_everything {
                Vec::new()
            } else {
                portfolio
                    .open_orders
                    .get(symbol)
                    .map(|orders| {
                        orders
                            .iter()
                            .filter(|o| !cancelled.contains(o.client_id.as_str()))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            let over = remaining.len().saturating_sub(max);
            for order in remaining.iter().take(over) {
                let reason = format!("{} open orders exceed max {}", remaining.len(), max);
                decisions.push(RiskDecision {
                    check: RiskCheck::OrderCount,
                    symbol: Some(symbol.to_string()),
                    owner: order.owner.clone(),
                    client_id: Some(order.client_id.clone()),
                    verdict: Verdict::Cancelled,
                    reason: reason.clone(),
                });
                forced_cancels.push(Action::cancel(&order.client_id, symbol, &order.owner, reason));
            }
            capacity.insert(symbol.to_string(), max.saturating_sub(remaining.len() - over));
        }

        let mut out = forced_cancels;
        for action in actions {
            let req = match action {
                Action::Place(req) => req,
                other => {
                    out.push(other);
                    continue;
                }
            };
            let room = capacity.entry(req.symbol.clone()).or_insert(max);
            if *room > 0 || req.owner == RISK_OWNER {
                *room = room.saturating_sub(1);
                out.push(Action::Place(req));
            } else {
                decisions.push(RiskDecision::on_request(
                    RiskCheck::OrderCount,
                    &req,
                    Verdict::Vetoed,
                    format!("symbol at max {} open orders", max),
                ));
            }
        }
        out
    }
}

/// Pass only cancels and reduce-only orders; cancel everything still open.
fn stop_all(
    actions: Vec<Action>,
    portfolio: &PortfolioState,
    check: RiskCheck,
    reason: &str,
    decisions: &mut Vec<RiskDecision>,
) -> Vec<Action> {
    let mut out = Vec::new();
    for action in actions {
        match action {
            Action::Place(req) if !req.reduce_only => {
                decisions.push(RiskDecision::on_request(
                    check,
                    &req,
                    Verdict::Vetoed,
                    reason.to_string(),
                ));
            }
            Action::CancelAll { .. } => {}
            other => out.push(other),
        }
    }

    if portfolio.has_open_orders() {
        decisions.push(RiskDecision {
            check,
            symbol: None,
            owner: RISK_OWNER.to_string(),
            client_id: None,
            verdict: Verdict::StopAll,
            reason: reason.to_string(),
        });
        out.insert(
            0,
            Action::CancelAll {
                symbol: None,
                reason: reason.to_string(),
            },
        );
    }
    out
}
