use crate::order::{OrderId, StrategyId};
use chrono::{DateTime, Utc};
use lumibot_instrument::asset::Asset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of an order lifecycle event dispatched by the simulated broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OrderEventKind {
    New,
    Filled {
        price: Decimal,
        quantity: Decimal,
    },
    Canceled,
    Expired,
    Modified,
    /// Expired in-the-money option settled for cash instead of delivering shares.
    CashSettled {
        price: Decimal,
        quantity: Decimal,
    },
}

/// One order lifecycle event, stamped with the virtual clock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub strategy: StrategyId,
    pub asset: Asset,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: OrderEventKind,
}

/// Append-only log of order events for one backtest run.
///
/// The executor drains fresh events each tick to invoke the strategy's `on_*_order` hooks;
/// the full log backs the optional orders JSON artifact.
#[derive(Debug, Default)]
pub struct OrderEventLog {
    events: Vec<OrderEvent>,
    drained: usize,
}

impl OrderEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: OrderEvent) {
        self.events.push(event);
    }

    pub fn all(&self) -> &[OrderEvent] {
        &self.events
    }

    /// Events appended since the previous drain.
    pub fn drain_new(&mut self) -> Vec<OrderEvent> {
        let fresh = self.events[self.drained..].to_vec();
        self.drained = self.events.len();
        fresh
    }

    /// Serialize the full log as pretty JSON for the orders artifact.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn event(id: u64, kind: OrderEventKind) -> OrderEvent {
        OrderEvent {
            order_id: OrderId(id),
            strategy: StrategyId::new("test"),
            asset: Asset::stock("SPY"),
            ts: Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap(),
            kind,
        }
    }

    #[test]
    fn test_drain_new_returns_only_fresh_events() {
        let mut log = OrderEventLog::new();
        log.push(event(1, OrderEventKind::New));
        log.push(event(
            1,
            OrderEventKind::Filled {
                price: dec!(100),
                quantity: dec!(10),
            },
        ));

        assert_eq!(log.drain_new().len(), 2);
        assert_eq!(log.drain_new().len(), 0);

        log.push(event(2, OrderEventKind::Canceled));
        let fresh = log.drain_new();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].order_id, OrderId(2));
        assert_eq!(log.all().len(), 3);
    }

    #[test]
    fn test_json_round_trip() {
        let mut log = OrderEventLog::new();
        log.push(event(
            7,
            OrderEventKind::CashSettled {
                price: dec!(10),
                quantity: dec!(1),
            },
        ));

        let json = log.to_json().unwrap();
        let parsed: Vec<OrderEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, log.all());
    }
}
