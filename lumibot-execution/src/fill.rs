use crate::order::{OrderPayload, TrailAmount};
use lumibot_instrument::Side;
use rust_decimal::{prelude::FromPrimitive, Decimal};

/// OHLC of the execution bar, lifted to [`Decimal`] at the fill boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarPrices {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

impl BarPrices {
    pub fn new(open: Decimal, high: Decimal, low: Decimal) -> Self {
        Self { open, high, low }
    }

    /// Lift f64 bar columns; `None` when any price is NaN (no trade printed).
    pub fn from_f64(open: f64, high: f64, low: f64) -> Option<Self> {
        Some(Self {
            open: Decimal::from_f64(open)?,
            high: Decimal::from_f64(high)?,
            low: Decimal::from_f64(low)?,
        })
    }
}

/// Limit order fill price on this bar, if any.
///
/// Gap-in wins before in-bar triggers: a bar opening through the limit fills at the open
/// (price improvement), otherwise the limit fills at its own price when the bar's range
/// touches it.
pub fn limit_order_price(limit: Decimal, side: Side, bar: &BarPrices) -> Option<Decimal> {
    // Gap up through a sell limit: fill at the better open
    if side == Side::Sell && limit <= bar.open {
        return Some(bar.open);
    }

    // Gap down through a buy limit: fill at the better open
    if side == Side::Buy && limit >= bar.open {
        return Some(bar.open);
    }

    // In-bar touch
    if bar.low <= limit && limit <= bar.high {
        return Some(limit);
    }

    None
}

/// Stop order fill price on this bar, if any. Same gap-first shape as
/// [`limit_order_price`] with inverted inequalities.
pub fn stop_order_price(stop: Decimal, side: Side, bar: &BarPrices) -> Option<Decimal> {
    // Gap down through a sell stop: fill at the (worse) open
    if side == Side::Sell && stop >= bar.open {
        return Some(bar.open);
    }

    // Gap up through a buy stop: fill at the (worse) open
    if side == Side::Buy && stop <= bar.open {
        return Some(bar.open);
    }

    if bar.low <= stop && stop <= bar.high {
        return Some(stop);
    }

    None
}

/// Evaluate an order payload against the execution bar.
///
/// Returns the fill price when the order fills this bar, and mutates payload state in place:
/// the stop-limit trigger flag and the trailing stop ratchet (which updates even on non-fill
/// bars). The caller persists the mutated payload back to the book.
pub fn evaluate(payload: &mut OrderPayload, side: Side, bar: &BarPrices) -> Option<Decimal> {
    match payload {
        OrderPayload::Market => Some(bar.open),

        OrderPayload::Limit { price } => limit_order_price(*price, side, bar),

        OrderPayload::Stop { price } => stop_order_price(*price, side, bar),

        OrderPayload::StopLimit {
            stop,
            limit,
            triggered,
        } => {
            if *triggered {
                return limit_order_price(*limit, side, bar);
            }
            let stop_fill = stop_order_price(*stop, side, bar)?;
            *triggered = true;
            // Within the trigger bar the limit is checked against the stop fill price, not
            // the bar open
            limit_order_price(
                *limit,
                side,
                &BarPrices::new(stop_fill, bar.high, bar.low),
            )
        }

        OrderPayload::Trail { amount, stop } => {
            let fill = stop.and_then(|stop| stop_order_price(stop, side, bar));

            // Ratchet the stop from this bar's favorable extreme
            let candidate = match (side, *amount) {
                (Side::Sell, TrailAmount::Price(offset)) => bar.high - offset,
                (Side::Sell, TrailAmount::Percent(pct)) => bar.high * (Decimal::ONE - pct),
                (Side::Buy, TrailAmount::Price(offset)) => bar.low + offset,
                (Side::Buy, TrailAmount::Percent(pct)) => bar.low * (Decimal::ONE + pct),
            };
            *stop = Some(match (*stop, side) {
                (Some(current), Side::Sell) => current.max(candidate),
                (Some(current), Side::Buy) => current.min(candidate),
                (None, _) => candidate,
            });

            fill
        }
    }
}
