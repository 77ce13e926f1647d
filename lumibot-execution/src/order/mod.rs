use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use lumibot_instrument::{asset::Asset, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Arena [`OrderBook`](book::OrderBook) storing orders by [`OrderId`].
pub mod book;

/// Identifier of an order within the arena. Ids are assigned from a monotonically increasing
/// per-book counter; parent/child/dependent references are always ids, never pointers.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct OrderId(pub u64);

/// Identifier of the strategy that owns an order or position.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct StrategyId(pub SmolStr);

impl StrategyId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Order side as submitted by the strategy. Quantity is always positive; direction is carried
/// here. The `*_to_open` / `*_to_close` variants exist for option flows and brokers that
/// require them; execution semantics collapse to [`Side`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
    BuyToOpen,
    BuyToCover,
    SellToOpen,
    SellToClose,
    SellShort,
}

impl OrderSide {
    pub fn side(&self) -> Side {
        match self {
            OrderSide::Buy | OrderSide::BuyToOpen | OrderSide::BuyToCover => Side::Buy,
            OrderSide::Sell
            | OrderSide::SellToOpen
            | OrderSide::SellToClose
            | OrderSide::SellShort => Side::Sell,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side() == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side() == Side::Sell
    }

    /// Signed multiplier applied to the order quantity when updating positions.
    pub fn sign(&self) -> Decimal {
        match self.side() {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Trailing amount for trail orders - an absolute price offset or a percentage of price.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum TrailAmount {
    Price(Decimal),
    /// Fraction of price, eg/ `0.05` trails 5% behind the extreme.
    Percent(Decimal),
}

/// Tagged-union order pricing payload. Stop-limit carries its trigger state; trail carries the
/// ratcheting stop.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum OrderPayload {
    Market,
    Limit {
        price: Decimal,
    },
    Stop {
        price: Decimal,
    },
    StopLimit {
        stop: Decimal,
        limit: Decimal,
        triggered: bool,
    },
    Trail {
        amount: TrailAmount,
        stop: Option<Decimal>,
    },
}

impl OrderPayload {
    pub fn kind(&self) -> OrderKind {
        match self {
            OrderPayload::Market => OrderKind::Market,
            OrderPayload::Limit { .. } => OrderKind::Limit,
            OrderPayload::Stop { .. } => OrderKind::Stop,
            OrderPayload::StopLimit { .. } => OrderKind::StopLimit,
            OrderPayload::Trail { .. } => OrderKind::Trail,
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderPayload::Limit { price } => Some(*price),
            OrderPayload::StopLimit { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            OrderPayload::Stop { price } => Some(*price),
            OrderPayload::StopLimit { stop, .. } => Some(*stop),
            OrderPayload::Trail { stop, .. } => *stop,
            _ => None,
        }
    }
}

/// Discriminant of [`OrderPayload`], used in diagnostics and fee selection.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    StopLimit,
    Trail,
}

/// Composite class of an order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClass {
    Simple,
    /// One-cancels-other: a placeholder parent with two live children; a fill of either child
    /// cancels the sibling.
    Oco,
    /// One-triggers-other: a live parent whose children are submitted once it fills.
    Oto,
    /// Entry order plus a stop-loss / take-profit OCO pair submitted on fill.
    Bracket,
    /// Synthetic parent over independently-priced legs (option spreads).
    Multileg,
}

/// Time-in-force of an order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Expires at the end of the trading session.
    Day,
    GoodTilCancelled,
    /// Expires at the end of the tick it was first evaluated on.
    ImmediateOrCancel,
}

/// Order lifecycle status.
///
/// `New -> Submitted -> (PartialFill ->)? Filled | Canceled | Expired | Rejected`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Submitted,
    PartialFill,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Active orders are eligible for fills and cancellation.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Submitted | OrderStatus::PartialFill
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Submitted)
                | (New, Canceled)
                | (New, Rejected)
                | (Submitted, PartialFill)
                | (Submitted, Filled)
                | (Submitted, Canceled)
                | (Submitted, Expired)
                | (Submitted, Rejected)
                | (PartialFill, PartialFill)
                | (PartialFill, Filled)
                | (PartialFill, Canceled)
                | (PartialFill, Expired)
        )
    }
}

/// A strategy-authored order request, before the book assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderRequest {
    pub asset: Asset,
    pub quote: Asset,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub payload: OrderPayload,
    pub class: OrderClass,
    pub time_in_force: TimeInForce,
    /// Stop price of the child submitted when an OTO/bracket parent fills.
    pub secondary_stop: Option<Decimal>,
    /// Limit price of the child submitted when an OTO/bracket parent fills.
    pub secondary_limit: Option<Decimal>,
    /// Explicit child requests. Used by OCO, whose two legs are authored by the strategy
    /// (typically a stop and a limit protecting an existing position).
    pub children: Vec<OrderRequest>,
}

impl OrderRequest {
    pub fn market(asset: Asset, quantity: Decimal, side: OrderSide) -> Self {
        Self::new(asset, quantity, side, OrderPayload::Market)
    }

    pub fn limit(asset: Asset, quantity: Decimal, side: OrderSide, price: Decimal) -> Self {
        Self::new(asset, quantity, side, OrderPayload::Limit { price })
    }

    pub fn stop(asset: Asset, quantity: Decimal, side: OrderSide, price: Decimal) -> Self {
        Self::new(asset, quantity, side, OrderPayload::Stop { price })
    }

    pub fn stop_limit(
        asset: Asset,
        quantity: Decimal,
        side: OrderSide,
        stop: Decimal,
        limit: Decimal,
    ) -> Self {
        Self::new(
            asset,
            quantity,
            side,
            OrderPayload::StopLimit {
                stop,
                limit,
                triggered: false,
            },
        )
    }

    pub fn trail(asset: Asset, quantity: Decimal, side: OrderSide, amount: TrailAmount) -> Self {
        Self::new(
            asset,
            quantity,
            side,
            OrderPayload::Trail {
                amount,
                stop: None,
            },
        )
    }

    pub fn new(asset: Asset, quantity: Decimal, side: OrderSide, payload: OrderPayload) -> Self {
        Self {
            asset,
            quote: Asset::usd(),
            quantity,
            side,
            payload,
            class: OrderClass::Simple,
            time_in_force: TimeInForce::GoodTilCancelled,
            secondary_stop: None,
            secondary_limit: None,
            children: Vec::new(),
        }
    }

    /// One-cancels-other pair over two authored legs. The request itself becomes a
    /// placeholder parent.
    pub fn oco(first: OrderRequest, second: OrderRequest) -> Self {
        let mut parent = Self::new(
            first.asset.clone(),
            first.quantity,
            first.side,
            OrderPayload::Market,
        );
        parent.class = OrderClass::Oco;
        parent.children = vec![first, second];
        parent
    }

    pub fn with_quote(mut self, quote: Asset) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_class(mut self, class: OrderClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn with_secondary_stop(mut self, stop: Decimal) -> Self {
        self.secondary_stop = Some(stop);
        self
    }

    pub fn with_secondary_limit(mut self, limit: Decimal) -> Self {
        self.secondary_limit = Some(limit);
        self
    }
}

/// A tracked order in the arena.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub strategy: StrategyId,
    pub asset: Asset,
    pub quote: Asset,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub payload: OrderPayload,
    pub class: OrderClass,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub parent: Option<OrderId>,
    pub children: Vec<OrderId>,
    /// OCO sibling: filled or canceled together, never both filled.
    pub dependent: Option<OrderId>,
    /// Set when the dependent sibling filled first; the order is then skipped and canceled.
    pub dependent_filled: bool,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub avg_fill_price: Option<Decimal>,
    pub filled_quantity: Decimal,
    pub trade_cost: Decimal,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.status, OrderStatus::Canceled | OrderStatus::Expired)
    }

    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }

    /// Signed filled quantity: positive for buys, negative for sells.
    pub fn signed_filled_quantity(&self) -> Decimal {
        self.side.sign() * self.filled_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use OrderStatus::*;

        struct TestCase {
            from: OrderStatus,
            to: OrderStatus,
            expected: bool,
        }

        let cases = vec![
            // TC0: Normal submit
            TestCase {
                from: New,
                to: Submitted,
                expected: true,
            },
            // TC1: Submitted fills directly
            TestCase {
                from: Submitted,
                to: Filled,
                expected: true,
            },
            // TC2: Partial then full
            TestCase {
                from: PartialFill,
                to: Filled,
                expected: true,
            },
            // TC3: Cannot fill a canceled order
            TestCase {
                from: Canceled,
                to: Filled,
                expected: false,
            },
            // TC4: Cannot skip submission
            TestCase {
                from: New,
                to: Filled,
                expected: false,
            },
            // TC5: Day expiry from submitted
            TestCase {
                from: Submitted,
                to: Expired,
                expected: true,
            },
            // TC6: Terminal states are terminal
            TestCase {
                from: Filled,
                to: Canceled,
                expected: false,
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            assert_eq!(
                test.from.can_transition_to(test.to),
                test.expected,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_order_side_collapse() {
        assert_eq!(OrderSide::BuyToOpen.side(), Side::Buy);
        assert_eq!(OrderSide::BuyToCover.side(), Side::Buy);
        assert_eq!(OrderSide::SellShort.side(), Side::Sell);
        assert_eq!(OrderSide::SellToClose.side(), Side::Sell);
        assert_eq!(OrderSide::Buy.sign(), Decimal::ONE);
        assert_eq!(OrderSide::Sell.sign(), Decimal::NEGATIVE_ONE);
    }
}
