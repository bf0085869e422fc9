//! Engine: the tick scheduler that drives ledger, strategies and risk gate.
//!
//! One tick:
//! 1. Fetch a market/account snapshot (bounded by the adapter timeout)
//! 2. Drain queued fills into the ledger and sync it against the snapshot
//! 3. Hand fills to their owning strategies, then collect proposals
//! 4. Filter proposals through the risk gate
//! 5. Dispatch cancels, then placements, and record the results

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{AdapterError, ReconciliationError};
use crate::events::{EngineEvent, EventSender};
use crate::exchange::{CancelAck, ExchangeAdapter, OrderHandle};
use crate::models::{split_symbol, truncate_quantity, FillEvent, MarketAccountSnapshot, OrderRequest};
use crate::trading::{
    build_strategy, Action, EngineConfig, Ledger, RiskDecision, RiskGate, Strategy,
    StrategyStatus, Submission,
};

const SNAPSHOT_RETRY_INITIAL: Duration = Duration::from_millis(100);

/// Cancel resolved to the id the exchange knows.
struct CancelOrder {
    client_id: String,
    symbol: String,
    order_id: String,
    reason: String,
}

pub struct Engine {
    config: EngineConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    ledger: Ledger,
    risk: RiskGate,
    strategies: Vec<Box<dyn Strategy>>,
    disabled: HashSet<String>,
    symbols: Vec<String>,
    fills: BoxStream<'static, FillEvent>,
    events: Option<EventSender>,
    stats: EngineStats,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,

    // Operator request to clear the emergency stop, honoured at the next tick
    clear_stop: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine from configuration.
    ///
    /// An invalid risk block fails construction. Invalid strategies are
    /// logged and left out.
    pub fn new(config: EngineConfig, adapter: Arc<dyn ExchangeAdapter>) -> Result<Self> {
        config
            .risk
            .validate()
            .context("Invalid risk configuration")?;

        let (valid, rejected) = config.partition_strategies();
        for (tag, e) in &rejected {
            warn!(strategy = %tag, error = %e, "Strategy not started");
        }
        if valid.is_empty() {
            anyhow::bail!("No valid strategies configured");
        }

        let strategies: Vec<Box<dyn Strategy>> = valid.iter().map(build_strategy).collect();
        let symbols = valid.iter().map(|s| s.symbol.clone()).collect();
        let fills = adapter.stream_fills();

        info!(
            adapter = adapter.name(),
            strategies = strategies.len(),
            rejected = rejected.len(),
            dry_run = config.dry_run,
            "Engine initialized"
        );

        Ok(Self {
            ledger: Ledger::new(config.reconcile_retry_ticks, config.balance_tolerance),
            risk: RiskGate::new(config.risk.clone()),
            stats: EngineStats {
                dry_run: config.dry_run,
                ..EngineStats::default()
            },
            config,
            adapter,
            strategies,
            disabled: HashSet::new(),
            symbols,
            fills,
            events: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            clear_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Forward engine events to `sender`.
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn is_disabled(&self, tag: &str) -> bool {
        self.disabled.contains(tag)
    }

    pub fn strategy_statuses(&self) -> Vec<StrategyStatus> {
        self.strategies
            .iter()
            .map(|s| {
                let mut status = s.status(&self.ledger.view(s.symbol()));
                status.active &= !self.disabled.contains(s.tag());
                status
            })
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.realized_pnl = self.ledger.realized_total();
        stats.unrealized_pnl = self.ledger.unrealized_total();
        stats.portfolio_value = self.ledger.portfolio_value(&self.config.quote_asset);
        stats.peak_value = self.risk.peak_value();
        stats.drawdown = self.risk.current_drawdown();
        stats.emergency_stop = self.risk.is_emergency_stopped();
        stats.active_strategies = self
            .strategies
            .iter()
            .filter(|s| !self.disabled.contains(s.tag()))
            .count();
        stats
    }

    /// Clear a latched emergency stop. Returns whether one was set.
    ///
    /// The drawdown peak restarts from the next valuation.
    pub fn clear_emergency_stop(&mut self) -> bool {
        if !self.risk.is_emergency_stopped() {
            debug!("Emergency stop not set, nothing to clear");
            return false;
        }
        self.risk.clear_emergency_stop();
        warn!(epoch = self.ledger.epoch(), "Emergency stop cleared by operator");
        self.emit(EngineEvent::EmergencyStopCleared);
        true
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            tick_interval_ms = self.config.tick_interval_ms,
            symbols = ?self.symbols,
            "Starting engine run loop"
        );

        let mut tick_interval = interval(Duration::from_millis(self.config.tick_interval_ms));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        // SIGUSR1 clears the emergency stop
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let clear_stop = self.clear_stop.clone();
            match signal(SignalKind::user_defined1()) {
                Ok(mut usr1) => {
                    tokio::spawn(async move {
                        while usr1.recv().await.is_some() {
                            info!("SIGUSR1 received, clearing emergency stop");
                            clear_stop.store(true, Ordering::SeqCst);
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to install SIGUSR1 handler"),
            }
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            tick_interval.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in engine tick");
            }
        }

        self.shutdown().await
    }

    /// Single iteration of the control loop.
    pub async fn tick(&mut self) -> Result<()> {
        let epoch = self.ledger.begin_tick();
        self.stats.ticks += 1;
        debug!(epoch, "Engine tick");

        if self.clear_stop.swap(false, Ordering::SeqCst) {
            self.clear_emergency_stop();
        }

        // 1. Snapshot; without one no strategy runs this tick
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.skipped_ticks += 1;
                warn!(error = %e, "Snapshot unavailable, skipping tick");
                self.emit(EngineEvent::SnapshotSkipped {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        // 2. Fills first, then reconciliation
        let fills = self.drain_fill_queue();
        if !fills.is_empty() {
            debug!(count = fills.len(), "Applying queued fills");
        }
        for e in self.ledger.ingest_fills(fills) {
            debug!(error = %e, "Fill not applied");
        }

        let mut proposed = Vec::new();
        for e in self.ledger.sync(&snapshot) {
            proposed.extend(self.handle_reconciliation(e));
        }

        // 3. Fills to owners, then proposals
        self.route_fills();
        proposed.extend(self.collect_proposals(&snapshot));

        // 4. Risk gate
        let portfolio = self.ledger.portfolio_state(&self.config.quote_asset);
        let outcome = self.risk.filter(proposed, &portfolio);
        if outcome.stop_triggered {
            self.emit(EngineEvent::EmergencyStop {
                reason: format!(
                    "drawdown {} exceeds {}",
                    self.risk.current_drawdown().round_dp(4),
                    self.risk.config().max_drawdown_pct
                ),
            });
        }
        for decision in &outcome.decisions {
            self.handle_risk_decision(decision);
        }

        // 5. Dispatch
        if self.config.dry_run {
            for action in &outcome.accepted {
                info!(
                    strategy = action.owner(),
                    symbol = action.symbol().unwrap_or("*"),
                    action = ?action,
                    "[DRY RUN] Would dispatch action"
                );
            }
            return Ok(());
        }
        self.dispatch(epoch, outcome.accepted).await;

        Ok(())
    }

    /// Cancel every strategy-owned order, then release the adapter.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down engine...");

        let epoch = self.ledger.begin_tick();
        let mut actions = Vec::new();
        for strategy in self.strategies.iter_mut() {
            let symbol = strategy.symbol().to_string();
            actions.extend(strategy.shutdown_actions(&self.ledger.view(&symbol)));
        }

        if self.config.dry_run {
            info!(cancels = actions.len(), "[DRY RUN] Would cancel strategy orders");
        } else if !actions.is_empty() {
            info!(cancels = actions.len(), "Cancelling strategy orders");
            self.dispatch(epoch, actions).await;
        }

        for status in self.strategy_statuses() {
            info!(status = %status, "Strategy final state");
        }

        self.adapter
            .close()
            .await
            .context("Failed to close exchange adapter")?;

        info!("Engine shutdown complete");
        Ok(())
    }

    // ==================== Inputs ====================

    /// Fetch a snapshot, retrying transient failures until the timeout.
    async fn fetch_snapshot(&self) -> Result<MarketAccountSnapshot, AdapterError> {
        let timeout_ms = self.config.adapter_timeout_ms;
        let limit = Duration::from_millis(timeout_ms);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(SNAPSHOT_RETRY_INITIAL)
            .with_max_elapsed_time(Some(limit))
            .build();

        let adapter = &self.adapter;
        let symbols = &self.symbols;
        backoff::future::retry(policy, || async move {
            match timeout(limit, adapter.fetch_snapshot(symbols)).await {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(e)) if e.is_retryable() => {
                    debug!(error = %e, "Snapshot fetch failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Ok(Err(e)) => Err(backoff::Error::permanent(e)),
                Err(_) => Err(backoff::Error::permanent(AdapterError::Timeout {
                    operation: "fetch_snapshot".to_string(),
                    timeout_ms,
                })),
            }
        })
        .await
    }

    /// Everything the fill stream has delivered so far, in arrival order.
    fn drain_fill_queue(&mut self) -> Vec<FillEvent> {
        let mut fills = Vec::new();
        while let Some(next) = self.fills.next().now_or_never() {
            match next {
                Some(fill) => fills.push(fill),
                None => {
                    warn!("Fill stream ended, resubscribing");
                    self.fills = self.adapter.stream_fills();
                    break;
                }
            }
        }
        fills
    }

    fn route_fills(&mut self) {
        for record in self.ledger.drain_fill_records() {
            self.stats.fills += 1;
            info!(
                symbol = %record.symbol,
                strategy = %record.owner,
                side = %record.side,
                quantity = %record.quantity,
                price = %record.price,
                realized_pnl = %record.realized_pnl,
                "Fill applied"
            );

            if let Some(strategy) = self
                .strategies
                .iter_mut()
                .find(|s| s.tag() == record.owner)
            {
                strategy.on_fill(&record, &self.ledger.view(&record.symbol));
            }
            self.emit(EngineEvent::OrderFilled(record));
        }
    }

    /// Run each active strategy once, in configuration order.
    fn collect_proposals(&mut self, snapshot: &MarketAccountSnapshot) -> Vec<Action> {
        let mut proposed = Vec::new();
        let mut failed = Vec::new();
        let mut events = Vec::new();

        for strategy in self.strategies.iter_mut() {
            if self.disabled.contains(strategy.tag()) {
                continue;
            }
            let symbol = strategy.symbol().to_string();
            match strategy.decide(snapshot, &self.ledger.view(&symbol)) {
                Ok(actions) => proposed.extend(actions),
                Err(e) => {
                    error!(strategy = %strategy.tag(), symbol = %symbol, error = %e, "Strategy failed");
                    failed.push((strategy.tag().to_string(), e.to_string()));
                }
            }
            events.extend(strategy.take_events());
        }

        for event in events {
            self.emit(EngineEvent::Strategy(event));
        }
        for (tag, reason) in failed {
            proposed.extend(self.disable(&tag, &reason));
        }
        proposed
    }

    // ==================== Failure handling ====================

    fn handle_reconciliation(&mut self, e: ReconciliationError) -> Vec<Action> {
        error!(error = %e, "Reconciliation failed");
        self.emit(EngineEvent::ReconciliationFailed {
            symbol: e.symbol().map(str::to_string),
            asset: e.asset().map(str::to_string),
            reason: e.to_string(),
        });

        let affected: Vec<String> = self
            .strategies
            .iter()
            .filter(|s| match (e.symbol(), e.asset()) {
                (Some(symbol), _) => s.symbol() == symbol,
                (None, Some(asset)) => split_symbol(s.symbol())
                    .is_some_and(|(base, quote)| base == asset || quote == asset),
                (None, None) => false,
            })
            .map(|s| s.tag().to_string())
            .collect();

        let reason = e.to_string();
        affected
            .iter()
            .flat_map(|tag| self.disable(tag, &reason))
            .collect()
    }

    /// Stop a strategy and return cancels for its open orders.
    fn disable(&mut self, tag: &str, reason: &str) -> Vec<Action> {
        if !self.disabled.insert(tag.to_string()) {
            return Vec::new();
        }
        let Some(strategy) = self.strategies.iter_mut().find(|s| s.tag() == tag) else {
            return Vec::new();
        };

        let symbol = strategy.symbol().to_string();
        let actions = strategy.shutdown_actions(&self.ledger.view(&symbol));
        warn!(
            strategy = %tag,
            symbol = %symbol,
            reason = %reason,
            cancels = actions.len(),
            "Strategy disabled"
        );
        self.emit(EngineEvent::StrategyDisabled {
            strategy: tag.to_string(),
            symbol,
            reason: reason.to_string(),
        });
        actions
    }

    fn handle_risk_decision(&mut self, decision: &RiskDecision) {
        warn!(
            check = %decision.check,
            strategy = %decision.owner,
            symbol = decision.symbol.as_deref().unwrap_or("*"),
            client_id = decision.client_id.as_deref().unwrap_or("-"),
            verdict = ?decision.verdict,
            reason = %decision.reason,
            "Risk violation"
        );
        if let Some(strategy) = self
            .strategies
            .iter_mut()
            .find(|s| s.tag() == decision.owner)
        {
            strategy.on_risk_decision(decision);
        }
        self.emit(EngineEvent::RiskViolation(decision.clone()));
    }

    // ==================== Dispatch ====================

    /// Send accepted actions to the exchange. Cancels go first; nothing
    /// order-mutating is retried.
    async fn dispatch(&mut self, epoch: u64, actions: Vec<Action>) {
        let mut cancels = Vec::new();
        let mut placements = Vec::new();
        for action in actions {
            match action {
                Action::Place(req) => placements.push(req),
                Action::Cancel {
                    client_id,
                    symbol,
                    reason,
                    ..
                } => cancels.push((client_id, symbol, reason)),
                Action::CancelAll { symbol, reason } => {
                    let open = match &symbol {
                        Some(symbol) => self.ledger.open_orders(symbol),
                        None => self.ledger.all_open_orders(),
                    };
                    cancels.extend(
                        open.into_iter()
                            .map(|o| (o.client_id.clone(), o.symbol.clone(), reason.clone())),
                    );
                }
            }
        }

        // Placements cancelled in the same pass never leave the process.
        let cancelled_ids: HashSet<String> = cancels.iter().map(|(id, _, _)| id.clone()).collect();
        let (withdrawn, placements): (Vec<_>, Vec<_>) = placements
            .into_iter()
            .partition(|req| cancelled_ids.contains(&req.client_id));
        for req in &withdrawn {
            self.record_rejection(epoch, req, "cancelled before dispatch");
        }

        let cancels = self.resolve_cancels(cancels);
        self.dispatch_cancels(epoch, cancels).await;
        self.dispatch_placements(epoch, placements).await;
    }

    fn resolve_cancels(&self, cancels: Vec<(String, String, String)>) -> Vec<CancelOrder> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        for (client_id, symbol, reason) in cancels {
            if !seen.insert(client_id.clone()) {
                continue;
            }
            let Some(order) = self.ledger.order(&client_id) else {
                debug!(client_id = %client_id, "Cancel for order never dispatched");
                continue;
            };
            if !order.is_open() {
                debug!(client_id = %client_id, status = %order.status, "Cancel for closed order skipped");
                continue;
            }
            let order_id = order
                .exchange_id
                .clone()
                .unwrap_or_else(|| client_id.clone());
            resolved.push(CancelOrder {
                client_id,
                symbol,
                order_id,
                reason,
            });
        }
        resolved
    }

    async fn dispatch_cancels(&mut self, epoch: u64, cancels: Vec<CancelOrder>) {
        if cancels.is_empty() {
            return;
        }
        let limit = Duration::from_millis(self.config.adapter_timeout_ms);
        let adapter = &self.adapter;
        let results: Vec<Result<CancelAck, AdapterError>> = join_all(cancels.iter().map(|c| async move {
            timeout(limit, adapter.cancel_order(&c.symbol, &c.order_id))
                .await
                .unwrap_or_else(|_| {
                    Err(AdapterError::Timeout {
                        operation: "cancel_order".to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                })
        }))
        .await;

        for (cancel, result) in cancels.into_iter().zip(results) {
            match result {
                Ok(ack) => match self.ledger.record_cancel(epoch, &cancel.client_id) {
                    Ok(_) => {
                        self.stats.orders_cancelled += 1;
                        info!(
                            symbol = %cancel.symbol,
                            client_id = %cancel.client_id,
                            exchange_id = %ack.exchange_id,
                            reason = %cancel.reason,
                            "Order cancelled"
                        );
                        self.emit(EngineEvent::OrderCancelled {
                            symbol: cancel.symbol,
                            client_id: cancel.client_id,
                            reason: cancel.reason,
                        });
                    }
                    Err(e) => error!(client_id = %cancel.client_id, error = %e, "Failed to record cancel"),
                },
                Err(e) => {
                    // Left open locally; fills or reconciliation settle it.
                    warn!(
                        symbol = %cancel.symbol,
                        client_id = %cancel.client_id,
                        reason = %cancel.reason,
                        error = %e,
                        "Cancel failed"
                    );
                }
            }
        }
    }

    async fn dispatch_placements(&mut self, epoch: u64, placements: Vec<OrderRequest>) {
        let mut ready = Vec::with_capacity(placements.len());
        for mut req in placements {
            req.quantity = truncate_quantity(req.quantity);
            if req.quantity <= Decimal::ZERO {
                warn!(strategy = %req.owner, symbol = %req.symbol, "Quantity truncates to zero, not submitting");
                self.record_rejection(epoch, &req, "quantity truncates to zero");
                continue;
            }
            ready.push(req);
        }
        if ready.is_empty() {
            return;
        }

        let limit = Duration::from_millis(self.config.adapter_timeout_ms);
        let adapter = &self.adapter;
        let results: Vec<Result<OrderHandle, AdapterError>> = join_all(ready.iter().map(|req| async move {
            timeout(limit, adapter.submit_order(req))
                .await
                .unwrap_or_else(|_| {
                    Err(AdapterError::Timeout {
                        operation: "submit_order".to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                })
        }))
        .await;

        for (req, result) in ready.into_iter().zip(results) {
            match result {
                Ok(handle) => {
                    if handle.client_id != req.client_id {
                        warn!(
                            sent = %req.client_id,
                            echoed = %handle.client_id,
                            "Exchange echoed a different client id"
                        );
                    }
                    if let Err(e) = self.ledger.record_submission(
                        epoch,
                        &req,
                        Submission::Accepted {
                            exchange_id: handle.exchange_id.clone(),
                        },
                    ) {
                        error!(client_id = %req.client_id, error = %e, "Failed to record submission");
                        continue;
                    }
                    self.stats.orders_placed += 1;
                    info!(
                        strategy = %req.owner,
                        symbol = %req.symbol,
                        side = %req.side,
                        quantity = %req.quantity,
                        price = ?req.price,
                        exchange_id = %handle.exchange_id,
                        "Order placed"
                    );
                    self.emit(EngineEvent::OrderPlaced {
                        symbol: req.symbol,
                        owner: req.owner,
                        client_id: req.client_id,
                        exchange_id: handle.exchange_id,
                        side: req.side,
                        quantity: req.quantity,
                        price: req.price,
                    });
                }
                Err(e @ AdapterError::InsufficientBalance { .. }) => {
                    warn!(strategy = %req.owner, symbol = %req.symbol, reason = %e, "Order skipped");
                    self.record_rejection(epoch, &req, &e.to_string());
                }
                Err(e) => {
                    error!(strategy = %req.owner, symbol = %req.symbol, reason = %e, "Order submission failed");
                    self.record_rejection(epoch, &req, &e.to_string());
                }
            }
        }
    }

    /// Record a placement that never reached the exchange so its owner sees it dead.
    fn record_rejection(&mut self, epoch: u64, req: &OrderRequest, reason: &str) {
        self.stats.orders_rejected += 1;
        let submission = Submission::Rejected {
            reason: reason.to_string(),
        };
        if let Err(e) = self.ledger.record_submission(epoch, req, submission) {
            error!(client_id = %req.client_id, error = %e, "Failed to record rejection");
        }
        self.emit(EngineEvent::OrderRejected {
            symbol: req.symbol.clone(),
            owner: req.owner.clone(),
            client_id: req.client_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sender) = &self.events {
            if sender.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub orders_rejected: u64,
    pub fills: u64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub portfolio_value: Decimal,
    pub peak_value: Decimal,
    pub drawdown: Decimal,
    pub active_strategies: usize,
    pub emergency_stop: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:=^50}", " ENGINE STATISTICS ")?;
        writeln!(f, "Ticks:            {} ({} skipped)", self.ticks, self.skipped_ticks)?;
        writeln!(f, "Orders Placed:    {}", self.orders_placed)?;
        writeln!(f, "Orders Cancelled: {}", self.orders_cancelled)?;
        writeln!(f, "Orders Rejected:  {}", self.orders_rejected)?;
        writeln!(f, "Fills:            {}", self.fills)?;
        writeln!(f, "Realized P&L:     ${:.2}", self.realized_pnl)?;
        writeln!(f, "Unrealized P&L:   ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Portfolio Value:  ${:.2}", self.portfolio_value)?;
        writeln!(f, "Peak Value:       ${:.2}", self.peak_value)?;
        writeln!(f, "Drawdown:         {:.2}%", self.drawdown * dec!(100))?;
        writeln!(f, "Active Strategies: {}", self.active_strategies)?;
        writeln!(
            f,
            "Status:           {} {}",
            if self.emergency_stop { "EMERGENCY STOP" } else { "Normal" },
            if self.dry_run { "(Dry Run)" } else { "" }
        )?;
        Ok(())
    }
}
