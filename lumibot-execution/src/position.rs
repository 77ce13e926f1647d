use crate::order::{OrderId, StrategyId};
use chrono::{DateTime, Utc};
use lumibot_instrument::asset::Asset;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holding of one asset by one strategy. Quantity is signed (negative = short); zero-quantity
/// positions are removed by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Position {
    pub strategy: StrategyId,
    pub asset: Asset,
    pub quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub orders: Vec<OrderId>,
}

impl Position {
    pub fn new(strategy: StrategyId, asset: Asset) -> Self {
        Self {
            strategy,
            asset,
            quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            orders: Vec::new(),
        }
    }

    /// Apply a signed fill. Increasing the position blends the average fill price by
    /// quantity; reducing leaves it; flipping resets it to the flip price.
    pub fn apply_fill(&mut self, order: OrderId, signed_quantity: Decimal, price: Decimal) {
        if !self.orders.contains(&order) {
            self.orders.push(order);
        }

        let prior = self.quantity;
        let next = prior + signed_quantity;

        let increasing = prior.is_zero() || (prior.signum() == signed_quantity.signum());
        let flipped = !prior.is_zero() && !next.is_zero() && prior.signum() != next.signum();

        if flipped {
            self.avg_fill_price = price;
        } else if increasing {
            let prior_abs = prior.abs();
            let added_abs = signed_quantity.abs();
            let total = prior_abs + added_abs;
            if !total.is_zero() {
                self.avg_fill_price =
                    (self.avg_fill_price * prior_abs + price * added_abs) / total;
            }
        }

        self.quantity = next;
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// One FIFO lot of an open futures position. Quantity is signed; `margin_per_contract` is
/// stored on the lot so closing releases exactly what was posted at entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FuturesLot {
    pub entry_ts: DateTime<Utc>,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin_per_contract: Decimal,
}

/// Cash movements produced by applying one futures fill to the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FuturesCashDelta {
    pub margin_posted: Decimal,
    pub margin_released: Decimal,
    pub realized_pnl: Decimal,
}

impl FuturesCashDelta {
    /// Net cash movement before fees: released margin plus realized P&L minus posted margin.
    pub fn net(&self) -> Decimal {
        self.margin_released + self.realized_pnl - self.margin_posted
    }
}

/// FIFO lot ledger per `(strategy, futures asset)`.
///
/// Futures have no notional cost at entry - opening posts initial margin, closing releases
/// the closed lots' margin and realizes P&L, and a flip closes everything before opening the
/// remainder in the opposite direction with fresh margin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FuturesLedger {
    lots: Vec<FuturesLot>,
}

impl FuturesLedger {
    pub fn lots(&self) -> &[FuturesLot] {
        &self.lots
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn net_quantity(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.quantity).sum()
    }

    pub fn margin_held(&self) -> Decimal {
        self.lots
            .iter()
            .map(|lot| lot.margin_per_contract * lot.quantity.abs())
            .sum()
    }

    /// Mark-to-market unrealized P&L across open lots:
    /// `(mark - entry) * signed_qty * multiplier` per lot.
    pub fn unrealized_pnl(&self, mark_price: Decimal, multiplier: Decimal) -> Decimal {
        self.lots
            .iter()
            .map(|lot| (mark_price - lot.entry_price) * lot.quantity * multiplier)
            .sum()
    }

    /// Apply a signed fill at `price`, returning the margin and realized-P&L cash movements.
    pub fn apply_fill(
        &mut self,
        entry_ts: DateTime<Utc>,
        signed_quantity: Decimal,
        price: Decimal,
        margin_per_contract: Decimal,
        multiplier: Decimal,
    ) -> FuturesCashDelta {
        let mut delta = FuturesCashDelta::default();
        let mut remaining = signed_quantity;

        // Close opposing lots front-first
        while !remaining.is_zero() {
            let Some(front) = self.lots.first().copied() else {
                break;
            };
            if front.quantity.signum() == remaining.signum() {
                break;
            }

            let close_quantity = front.quantity.abs().min(remaining.abs());
            let direction = front.quantity.signum();
            delta.realized_pnl +=
                (price - front.entry_price) * close_quantity * direction * multiplier;
            delta.margin_released += front.margin_per_contract * close_quantity;

            remaining += close_quantity * direction;
            let front = &mut self.lots[0];
            front.quantity -= close_quantity * direction;
            if front.quantity.is_zero() {
                self.lots.remove(0);
            }
        }

        // Open the remainder (fresh or flip) with fresh margin
        if !remaining.is_zero() {
            delta.margin_posted = margin_per_contract * remaining.abs();
            self.lots.push(FuturesLot {
                entry_ts,
                quantity: remaining,
                entry_price: price,
                margin_per_contract,
            });
        }

        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_position_average_price_blending() {
        struct TestCase {
            name: &'static str,
            fills: Vec<(Decimal, Decimal)>, // (signed_qty, price)
            expected_quantity: Decimal,
            expected_avg: Decimal,
        }

        let cases = vec![
            // TC0: Two buys blend quantity-weighted
            TestCase {
                name: "two buys blend",
                fills: vec![(dec!(10), dec!(100)), (dec!(10), dec!(110))],
                expected_quantity: dec!(20),
                expected_avg: dec!(105),
            },
            // TC1: Partial sell keeps basis
            TestCase {
                name: "reduce keeps basis",
                fills: vec![(dec!(10), dec!(100)), (dec!(-4), dec!(120))],
                expected_quantity: dec!(6),
                expected_avg: dec!(100),
            },
            // TC2: Flip resets basis to flip price
            TestCase {
                name: "flip resets basis",
                fills: vec![(dec!(10), dec!(100)), (dec!(-15), dec!(90))],
                expected_quantity: dec!(-5),
                expected_avg: dec!(90),
            },
            // TC3: Short add blends
            TestCase {
                name: "short adds blend",
                fills: vec![(dec!(-10), dec!(50)), (dec!(-10), dec!(60))],
                expected_quantity: dec!(-20),
                expected_avg: dec!(55),
            },
        ];

        for (index, test) in cases.iter().enumerate() {
            let mut position = Position::new(StrategyId::new("test"), Asset::stock("SPY"));
            for (fill_index, (quantity, price)) in test.fills.iter().enumerate() {
                position.apply_fill(OrderId(fill_index as u64), *quantity, *price);
            }
            assert_eq!(
                position.quantity, test.expected_quantity,
                "TC{index} ({}) quantity",
                test.name
            );
            assert_eq!(
                position.avg_fill_price, test.expected_avg,
                "TC{index} ({}) avg price",
                test.name
            );
        }
    }

    #[test]
    fn test_futures_open_close_releases_exact_margin() {
        let mut ledger = FuturesLedger::default();
        let margin = dec!(1300);
        let multiplier = dec!(5);

        let open = ledger.apply_fill(ts(), dec!(1), dec!(4700), margin, multiplier);
        assert_eq!(open.margin_posted, dec!(1300));
        assert_eq!(open.margin_released, dec!(0));
        assert_eq!(open.realized_pnl, dec!(0));
        assert_eq!(ledger.margin_held(), dec!(1300));

        // Unrealized at 4705: (4705 - 4700) * 1 * 5
        assert_eq!(ledger.unrealized_pnl(dec!(4705), multiplier), dec!(25));

        let close = ledger.apply_fill(ts(), dec!(-1), dec!(4706), margin, multiplier);
        assert_eq!(close.margin_released, dec!(1300));
        assert_eq!(close.realized_pnl, dec!(30));
        assert_eq!(close.margin_posted, dec!(0));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_futures_flip_closes_all_then_opens_remainder() {
        let mut ledger = FuturesLedger::default();
        let margin = dec!(10000);
        let multiplier = dec!(100);

        ledger.apply_fill(ts(), dec!(1), dec!(2000), margin, multiplier);

        // Sell 2 against a long 1: close the lot, open 1 short at 2005
        let flip = ledger.apply_fill(ts(), dec!(-2), dec!(2005), margin, multiplier);
        assert_eq!(flip.margin_released, dec!(10000));
        assert_eq!(flip.realized_pnl, dec!(500));
        assert_eq!(flip.margin_posted, dec!(10000));
        assert_eq!(flip.net(), dec!(500));
        assert_eq!(ledger.net_quantity(), dec!(-1));
        assert_eq!(ledger.lots()[0].entry_price, dec!(2005));

        // Cover the short at 2003: release margin + (2005 - 2003) * 1 * 100
        let cover = ledger.apply_fill(ts(), dec!(1), dec!(2003), margin, multiplier);
        assert_eq!(cover.margin_released, dec!(10000));
        assert_eq!(cover.realized_pnl, dec!(200));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_futures_fifo_partial_close() {
        let mut ledger = FuturesLedger::default();
        let margin = dec!(1300);
        let multiplier = dec!(5);

        ledger.apply_fill(ts(), dec!(2), dec!(4700), margin, multiplier);
        ledger.apply_fill(ts(), dec!(1), dec!(4710), margin, multiplier);

        // Close 2: takes both contracts of the first lot only
        let close = ledger.apply_fill(ts(), dec!(-2), dec!(4720), margin, multiplier);
        assert_eq!(close.margin_released, dec!(2600));
        assert_eq!(close.realized_pnl, dec!(200)); // (4720-4700)*2*5
        assert_eq!(ledger.net_quantity(), dec!(1));
        assert_eq!(ledger.lots()[0].entry_price, dec!(4710));
    }
}
