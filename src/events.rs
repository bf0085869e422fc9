//! Structured engine events for notification and dashboard consumers.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::OrderSide;
use crate::trading::{FillRecord, RiskDecision, StrategyEvent};

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    OrderPlaced {
        symbol: String,
        owner: String,
        client_id: String,
        exchange_id: String,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    },
    OrderFilled(FillRecord),
    OrderCancelled {
        symbol: String,
        client_id: String,
        reason: String,
    },
    OrderRejected {
        symbol: String,
        owner: String,
        client_id: String,
        reason: String,
    },
    RiskViolation(RiskDecision),
    EmergencyStop {
        reason: String,
    },
    EmergencyStopCleared,
    Strategy(StrategyEvent),
    StrategyDisabled {
        strategy: String,
        symbol: String,
        reason: String,
    },
    SnapshotSkipped {
        reason: String,
    },
    ReconciliationFailed {
        symbol: Option<String>,
        asset: Option<String>,
        reason: String,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::OrderPlaced { .. } => "order_placed",
            EngineEvent::OrderFilled(_) => "order_filled",
            EngineEvent::OrderCancelled { .. } => "order_cancelled",
            EngineEvent::OrderRejected { .. } => "order_rejected",
            EngineEvent::RiskViolation(_) => "risk_violation",
            EngineEvent::EmergencyStop { .. } => "emergency_stop",
            EngineEvent::EmergencyStopCleared => "emergency_stop_cleared",
            EngineEvent::Strategy(_) => "strategy",
            EngineEvent::StrategyDisabled { .. } => "strategy_disabled",
            EngineEvent::SnapshotSkipped { .. } => "snapshot_skipped",
            EngineEvent::ReconciliationFailed { .. } => "reconciliation_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = EngineEvent::OrderCancelled {
            symbol: "BTC/USDT".to_string(),
            client_id: "gb-1".to_string(),
            reason: "stop loss".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_cancelled");
        assert_eq!(json["client_id"], "gb-1");
    }

    #[test]
    fn test_strategy_event_flattens() {
        let event = EngineEvent::Strategy(StrategyEvent::CycleComplete {
            symbol: "ETH/USDT".to_string(),
            profit: dec!(2.5),
            safety_orders_used: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "strategy");
        assert_eq!(json["event"], "cycle_complete");
        assert_eq!(event.kind(), "strategy");
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (tx, mut rx) = channel();
        tx.send(EngineEvent::SnapshotSkipped { reason: "timeout".to_string() }).unwrap();
        tx.send(EngineEvent::EmergencyStop { reason: "drawdown".to_string() }).unwrap();
        tx.send(EngineEvent::EmergencyStopCleared).unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), "snapshot_skipped");
        assert_eq!(rx.recv().await.unwrap().kind(), "emergency_stop");
        let cleared = rx.recv().await.unwrap();
        assert_eq!(serde_json::to_value(&cleared).unwrap()["type"], "emergency_stop_cleared");
    }
}
