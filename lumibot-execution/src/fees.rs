use crate::order::{Order, OrderKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One entry of a per-side fee schedule. `taker` fees apply to market and stop orders,
/// `maker` fees to limit and stop-limit orders.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TradingFee {
    pub flat_fee: Decimal,
    /// Fraction of notional, eg/ `0.001` charges 10 bps.
    pub percent_fee: Decimal,
    pub maker: bool,
    pub taker: bool,
}

impl TradingFee {
    pub fn flat(flat_fee: Decimal) -> Self {
        Self {
            flat_fee,
            percent_fee: Decimal::ZERO,
            maker: true,
            taker: true,
        }
    }

    pub fn percent(percent_fee: Decimal) -> Self {
        Self {
            flat_fee: Decimal::ZERO,
            percent_fee,
            maker: true,
            taker: true,
        }
    }

    pub fn taker_only(mut self) -> Self {
        self.maker = false;
        self.taker = true;
        self
    }

    pub fn maker_only(mut self) -> Self {
        self.maker = true;
        self.taker = false;
        self
    }
}

/// Trade cost of a fill: flat fees plus percent fees over `price * quantity`, drawn from the
/// buy-side or sell-side schedule by the order's side. Fees always debit cash and are never
/// folded into position cost basis.
pub fn trade_cost(
    order: &Order,
    price: Decimal,
    buy_fees: &[TradingFee],
    sell_fees: &[TradingFee],
) -> Decimal {
    let fees = if order.side.is_buy() {
        buy_fees
    } else {
        sell_fees
    };

    let mut cost = Decimal::ZERO;
    for fee in fees {
        let applies = match order.payload.kind() {
            OrderKind::Market | OrderKind::Stop => fee.taker,
            OrderKind::Limit | OrderKind::StopLimit => fee.maker,
            // Trail orders carry no schedule entry
            OrderKind::Trail => false,
        };
        if applies {
            cost += fee.flat_fee;
            cost += price * order.quantity * fee.percent_fee;
        }
    }
    cost
}
