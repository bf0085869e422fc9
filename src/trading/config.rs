//! Engine, risk and strategy configuration.
//!
//! Percent parameters are fractions: `0.03` means 3%.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::exchange::PaperConfig;
use crate::models::split_symbol;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Asset the portfolio is valued in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    /// Control loop period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Per-call adapter timeout in milliseconds
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,

    /// Syncs a ledger/exchange disagreement may persist before it is an error
    #[serde(default = "default_reconcile_retry_ticks")]
    pub reconcile_retry_ticks: u32,

    /// Relative tolerance for locked-balance reconciliation
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: Decimal,

    /// Compute and gate actions without dispatching them
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub risk: RiskConfig,

    pub strategies: Vec<StrategyConfig>,

    #[serde(default)]
    pub paper: PaperConfig,
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_adapter_timeout_ms() -> u64 {
    5000
}

fn default_reconcile_retry_ticks() -> u32 {
    3
}

fn default_balance_tolerance() -> Decimal {
    dec!(0.0001)
}

/// Portfolio-wide risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum notional (quote) of any single position
    pub max_position_size: Decimal,

    /// Maximum summed absolute notional across positions
    pub max_total_exposure: Decimal,

    /// Drawdown from peak portfolio value that latches the emergency stop
    pub max_drawdown_pct: Decimal,

    /// Maximum open orders per symbol
    pub max_orders_per_symbol: usize,

    /// Start with the emergency stop engaged
    #[serde(default)]
    pub emergency_stop: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: dec!(1000),
            max_total_exposure: dec!(10000),
            max_drawdown_pct: dec!(0.20),
            max_orders_per_symbol: 10,
            emergency_stop: false,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_position_size <= Decimal::ZERO {
            return Err(ConfigError::invalid("max_position_size", "must be > 0"));
        }
        if self.max_total_exposure < self.max_position_size {
            return Err(ConfigError::invalid(
                "max_total_exposure",
                "must be >= max_position_size",
            ));
        }
        if self.max_drawdown_pct <= Decimal::ZERO || self.max_drawdown_pct > Decimal::ONE {
            return Err(ConfigError::invalid("max_drawdown_pct", "must be in (0, 1]"));
        }
        if self.max_orders_per_symbol == 0 {
            return Err(ConfigError::invalid("max_orders_per_symbol", "must be > 0"));
        }
        Ok(())
    }
}

/// One strategy instance bound to a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub params: StrategyParams,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StrategyParams {
    Grid(GridConfig),
    Dca(DcaConfig),
}

impl StrategyParams {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyParams::Grid(_) => "grid",
            StrategyParams::Dca(_) => "dca",
        }
    }
}

impl StrategyConfig {
    /// Owner tag stamped on every order this strategy creates.
    pub fn tag(&self) -> String {
        format!("{}:{}", self.params.kind(), self.symbol)
    }

    pub fn validate(&self, risk: &RiskConfig) -> Result<(), ConfigError> {
        if split_symbol(&self.symbol).is_none() {
            return Err(ConfigError::BadSymbol(self.symbol.clone()));
        }
        match &self.params {
            StrategyParams::Grid(grid) => grid.validate(risk),
            StrategyParams::Dca(dca) => dca.validate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingMode {
    /// P * (1 ± s*i)
    #[default]
    Linear,
    /// P * (1 ± s)^i
    Geometric,
}

/// Grid ladder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Levels around the center, split evenly above and below
    pub num_levels: usize,

    /// Distance between adjacent levels
    pub spacing_pct: Decimal,

    /// Share of the quote balance committed per level
    pub quantity_pct: Decimal,

    #[serde(default)]
    pub upper_price: Option<Decimal>,

    #[serde(default)]
    pub lower_price: Option<Decimal>,

    /// Drift from the center that triggers a rebalance
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,

    #[serde(default)]
    pub spacing_mode: SpacingMode,
}

fn default_rebalance_threshold() -> Decimal {
    dec!(0.05)
}

impl GridConfig {
    pub fn validate(&self, risk: &RiskConfig) -> Result<(), ConfigError> {
        if !(2..=100).contains(&self.num_levels) {
            return Err(ConfigError::invalid("num_levels", "must be in 2..=100"));
        }
        if self.num_levels > risk.max_orders_per_symbol {
            return Err(ConfigError::invalid(
                "num_levels",
                format!(
                    "{} levels exceed max_orders_per_symbol {}",
                    self.num_levels, risk.max_orders_per_symbol
                ),
            ));
        }
        if self.spacing_pct <= Decimal::ZERO || self.spacing_pct > dec!(0.5) {
            return Err(ConfigError::invalid("spacing_pct", "must be in (0, 0.5]"));
        }
        if self.quantity_pct <= Decimal::ZERO || self.quantity_pct > Decimal::ONE {
            return Err(ConfigError::invalid("quantity_pct", "must be in (0, 1]"));
        }
        if self.rebalance_threshold <= Decimal::ZERO {
            return Err(ConfigError::invalid("rebalance_threshold", "must be > 0"));
        }
        for (field, bound) in [("upper_price", self.upper_price), ("lower_price", self.lower_price)] {
            if matches!(bound, Some(p) if p <= Decimal::ZERO) {
                return Err(ConfigError::invalid(field, "must be > 0"));
            }
        }
        if let (Some(lower), Some(upper)) = (self.lower_price, self.upper_price) {
            if lower >= upper {
                return Err(ConfigError::invalid("lower_price", "must be below upper_price"));
            }
        }
        Ok(())
    }
}

/// DCA cycle parameters. Order sizes are in quote currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaConfig {
    pub base_order_size: Decimal,

    pub safety_order_size: Decimal,

    pub max_safety_orders: u32,

    /// Drop from entry that triggers the first safety order
    pub deviation_pct: Decimal,

    #[serde(default = "default_scale")]
    pub step_scale: Decimal,

    #[serde(default = "default_scale")]
    pub volume_scale: Decimal,

    #[serde(default = "default_take_profit")]
    pub take_profit_pct: Decimal,

    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
}

fn default_scale() -> Decimal {
    Decimal::ONE
}

fn default_take_profit() -> Decimal {
    dec!(0.01)
}

impl DcaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_order_size <= Decimal::ZERO {
            return Err(ConfigError::invalid("base_order_size", "must be > 0"));
        }
        if self.safety_order_size <= Decimal::ZERO {
            return Err(ConfigError::invalid("safety_order_size", "must be > 0"));
        }
        if !(1..=50).contains(&self.max_safety_orders) {
            return Err(ConfigError::invalid("max_safety_orders", "must be in 1..=50"));
        }
        if self.deviation_pct <= Decimal::ZERO || self.deviation_pct > dec!(0.5) {
            return Err(ConfigError::invalid("deviation_pct", "must be in (0, 0.5]"));
        }
        if self.step_scale <= Decimal::ZERO {
            return Err(ConfigError::invalid("step_scale", "must be > 0"));
        }
        if self.volume_scale <= Decimal::ZERO {
            return Err(ConfigError::invalid("volume_scale", "must be > 0"));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(ConfigError::invalid("take_profit_pct", "must be > 0"));
        }
        if matches!(self.stop_loss_pct, Some(sl) if sl <= Decimal::ZERO || sl >= Decimal::ONE) {
            return Err(ConfigError::invalid("stop_loss_pct", "must be in (0, 1)"));
        }
        // The deepest safety trigger must stay above zero.
        let deepest = self.deviation_pct * pow(self.step_scale, self.max_safety_orders - 1);
        if deepest >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "step_scale",
                format!("safety order {} would trigger at or below zero", self.max_safety_orders),
            ));
        }
        Ok(())
    }
}

/// Integer power without leaving decimal arithmetic.
pub fn pow(base: Decimal, exp: u32) -> Decimal {
    (0..exp).fold(Decimal::ONE, |acc, _| acc * base)
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Split strategies into runnable ones and those rejected by validation.
    ///
    /// Disabled strategies appear in neither list.
    pub fn partition_strategies(&self) -> (Vec<StrategyConfig>, Vec<(String, ConfigError)>) {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for strategy in self.strategies.iter().filter(|s| s.enabled) {
            let result = strategy.validate(&self.risk).and_then(|_| {
                if seen.insert(strategy.symbol.clone()) {
                    Ok(())
                } else {
                    Err(ConfigError::DuplicateSymbol(strategy.symbol.clone()))
                }
            });
            match result {
                Ok(()) => valid.push(strategy.clone()),
                Err(e) => rejected.push((strategy.tag(), e)),
            }
        }

        (valid, rejected)
    }

    /// Configuration printed by `gridbot config`.
    pub fn example() -> Self {
        Self {
            quote_asset: default_quote_asset(),
            tick_interval_ms: default_tick_interval_ms(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            reconcile_retry_ticks: default_reconcile_retry_ticks(),
            balance_tolerance: default_balance_tolerance(),
            dry_run: true,
            risk: RiskConfig::default(),
            strategies: vec![
                StrategyConfig {
                    symbol: "BTC/USDT".to_string(),
                    enabled: true,
                    params: StrategyParams::Grid(GridConfig {
                        num_levels: 10,
                        spacing_pct: dec!(0.005),
                        quantity_pct: dec!(0.05),
                        upper_price: None,
                        lower_price: None,
                        rebalance_threshold: dec!(0.05),
                        spacing_mode: SpacingMode::Linear,
                    }),
                },
                StrategyConfig {
                    symbol: "ETH/USDT".to_string(),
                    enabled: true,
                    params: StrategyParams::Dca(DcaConfig {
                        base_order_size: dec!(100),
                        safety_order_size: dec!(50),
                        max_safety_orders: 3,
                        deviation_pct: dec!(0.03),
                        step_scale: dec!(1.2),
                        volume_scale: dec!(1.5),
                        take_profit_pct: dec!(0.02),
                        stop_loss_pct: Some(dec!(0.15)),
                    }),
                },
            ],
            paper: PaperConfig {
                balances: HashMap::from([
                    ("USDT".to_string(), dec!(10000)),
                    ("BTC".to_string(), dec!(0.05)),
                ]),
                ..PaperConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridConfig {
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

    fn dca() -> DcaConfig {
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

    #[test]
    fn test_parse_json_config() {
        let raw = r#"{
            "strategies": [
                {"symbol": "BTC/USDT", "type": "grid", "num_levels": 10,
                 "spacing_pct": "0.005", "quantity_pct": "0.1"},
                {"symbol": "ETH/USDT", "type": "dca", "base_order_size": "100",
                 "safety_order_size": "50", "max_safety_orders": 3,
                 "deviation_pct": "0.03", "stop_loss_pct": "0.1"}
            ]
        }"#;
        let config: EngineConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.quote_asset, "USDT");
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].tag(), "grid:BTC/USDT");
        match &config.strategies[1].params {
            StrategyParams::Dca(d) => {
                assert_eq!(d.step_scale, Decimal::ONE);
                assert_eq!(d.stop_loss_pct, Some(dec!(0.1)));
            }
            other => panic!("expected dca, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_grid_validation() {
        let risk = RiskConfig::default();
        assert!(grid().validate(&risk).is_ok());

        let mut g = grid();
        g.num_levels = 12;
        assert!(g.validate(&risk).is_err(), "more levels than max orders");

        let mut g = grid();
        g.lower_price = Some(dec!(110));
        g.upper_price = Some(dec!(100));
        assert!(g.validate(&risk).is_err());

        let mut g = grid();
        g.spacing_pct = Decimal::ZERO;
        assert!(g.validate(&risk).is_err());
    }

    #[test]
    fn test_dca_validation() {
        assert!(dca().validate().is_ok());

        let mut d = dca();
        d.max_safety_orders = 0;
        assert!(d.validate().is_err());

        let mut d = dca();
        d.deviation_pct = dec!(0.4);
        d.step_scale = dec!(2);
        d.max_safety_orders = 3;
        assert!(d.validate().is_err(), "0.4 * 2^2 >= 1");
    }

    #[test]
    fn test_duplicate_symbols_rejected() {
        let mut config = EngineConfig::example();
        let mut dup = config.strategies[0].clone();
        dup.params = StrategyParams::Dca(dca());
        config.strategies.push(dup);

        let (valid, rejected) = config.partition_strategies();
        assert_eq!(valid.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].1, ConfigError::DuplicateSymbol("BTC/USDT".to_string()));
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(dec!(1.2), 0), Decimal::ONE);
        assert_eq!(pow(dec!(1.2), 2), dec!(1.44));
    }
}
