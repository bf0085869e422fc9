//! Account balance per asset.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,

    /// Available for new orders
    pub free: Decimal,

    /// Reserved by open orders
    #[serde(default)]
    pub locked: Decimal,
}

impl Balance {
    pub fn new(asset: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked,
        }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }

    pub fn is_valid(&self) -> bool {
        self.free >= Decimal::ZERO && self.locked >= Decimal::ZERO
    }
}

/// Split `BASE/QUOTE` into its assets.
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() || quote.contains('/') {
        return None;
    }
    Some((base, quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_symbol() {
        assert_eq!(split_symbol("BTC/USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("BTCUSDT"), None);
        assert_eq!(split_symbol("/USDT"), None);
        assert_eq!(split_symbol("A/B/C"), None);
    }

    #[test]
    fn test_total_and_validity() {
        let b = Balance::new("USDT", dec!(90), dec!(10));
        assert_eq!(b.total(), dec!(100));
        assert!(b.is_valid());
        assert!(!Balance::new("USDT", dec!(-1), dec!(0)).is_valid());
    }
}
