use crate::order::{OrderId, OrderKind, OrderStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {id}: invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order quantity must be positive, got {0}")]
    NonPositiveQuantity(String),

    #[error("order {id}: only limit/stop prices of limit/stop orders may be modified, kind is {kind:?}")]
    ModifyUnsupported { id: OrderId, kind: OrderKind },

    #[error("order {id}: historical data missing for its asset, fill impossible")]
    FillImpossible { id: OrderId },

    #[error("no orders provided to submit_orders")]
    EmptyOrderBatch,

    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}
