use crate::{
    error::ExecutionError,
    order::{
        Order, OrderClass, OrderId, OrderPayload, OrderRequest, OrderStatus, StrategyId,
        TimeInForce,
    },
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use lumibot_instrument::asset::Asset;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

/// Outcome of refreshing a composite parent after a child reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentOutcome {
    /// All children filled (or a winner emerged): parent is now filled with the aggregated
    /// quantity and signed net price.
    Filled { price: Decimal, quantity: Decimal },
    /// Every child canceled: parent canceled to mirror the outcome.
    Canceled,
    /// Children still working.
    Unchanged,
}

/// The orders created by one `submit` call, in submission order. The first id is the primary
/// (or placeholder parent) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Orders that became live (`Submitted`) now.
    pub live: Vec<OrderId>,
    /// Children queued (`New`) until their parent fills.
    pub queued: Vec<OrderId>,
}

#[derive(Debug, Default)]
struct BookInner {
    orders: FnvHashMap<OrderId, Order>,
    by_strategy: FnvHashMap<StrategyId, Vec<OrderId>>,
    next_id: u64,
}

impl BookInner {
    fn allocate(&mut self) -> OrderId {
        self.next_id += 1;
        OrderId(self.next_id)
    }

    fn insert(
        &mut self,
        strategy: &StrategyId,
        request: OrderRequest,
        status: OrderStatus,
        parent: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> OrderId {
        let id = self.allocate();
        let order = Order {
            id,
            strategy: strategy.clone(),
            asset: request.asset,
            quote: request.quote,
            quantity: request.quantity,
            side: request.side,
            payload: request.payload,
            class: request.class,
            status,
            time_in_force: request.time_in_force,
            parent,
            children: Vec::new(),
            dependent: None,
            dependent_filled: false,
            created_at: now,
            filled_at: None,
            avg_fill_price: None,
            filled_quantity: Decimal::ZERO,
            trade_cost: Decimal::ZERO,
        };
        self.orders.insert(id, order);
        self.by_strategy
            .entry(strategy.clone())
            .or_default()
            .push(id);
        id
    }

    fn link_children(&mut self, parent: OrderId, children: &[OrderId]) {
        if let Some(order) = self.orders.get_mut(&parent) {
            order.children.extend_from_slice(children);
        }
    }

    fn link_dependents(&mut self, first: OrderId, second: OrderId) {
        if let Some(order) = self.orders.get_mut(&first) {
            order.dependent = Some(second);
        }
        if let Some(order) = self.orders.get_mut(&second) {
            order.dependent = Some(first);
        }
    }

    fn transition(&mut self, id: OrderId, to: OrderStatus) -> Result<(), ExecutionError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;
        if !order.status.can_transition_to(to) {
            return Err(ExecutionError::InvalidTransition {
                id,
                from: order.status,
                to,
            });
        }
        order.status = to;
        Ok(())
    }
}

/// Arena order book: every order lives in one map keyed by [`OrderId`]; composite structure is
/// expressed purely through id links, traversed via the arena.
///
/// All collections sit behind a single mutex so the same code path works in live trading
/// where broker streams dispatch events from a background thread. In backtesting the lock is
/// uncontended.
#[derive(Debug, Default)]
pub struct OrderBook {
    inner: Mutex<BookInner>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a request, flattening composites into child legs.
    ///
    /// * `Simple` - one live order.
    /// * `Oco` - a placeholder parent plus both children live immediately, linked as
    ///   dependents of each other.
    /// * `Oto` / `Bracket` - a live parent; children are built from the secondary stop/limit
    ///   prices and queued as `New` until the parent fills. Bracket children are additionally
    ///   an OCO pair.
    pub fn submit(
        &self,
        strategy: &StrategyId,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Submission, ExecutionError> {
        if request.class != OrderClass::Oco && request.quantity <= Decimal::ZERO {
            return Err(ExecutionError::NonPositiveQuantity(
                request.quantity.to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        match request.class {
            OrderClass::Simple => {
                let id = inner.insert(strategy, request, OrderStatus::Submitted, None, now);
                Ok(Submission {
                    live: vec![id],
                    queued: Vec::new(),
                })
            }
            OrderClass::Oco => {
                let (parent_request, children) = split_children(request);
                Self::submit_oco(&mut inner, strategy, parent_request, children, now)
            }
            OrderClass::Oto | OrderClass::Bracket => {
                Self::submit_triggered(&mut inner, strategy, request, now)
            }
            OrderClass::Multileg => Err(ExecutionError::InvariantViolated(
                "multileg orders are submitted via submit_multileg".to_string(),
            )),
        }
    }

    fn submit_oco(
        inner: &mut BookInner,
        strategy: &StrategyId,
        parent_request: OrderRequest,
        children: Vec<OrderRequest>,
        now: DateTime<Utc>,
    ) -> Result<Submission, ExecutionError> {
        if children.len() != 2 {
            return Err(ExecutionError::InvariantViolated(format!(
                "OCO requires exactly two children, got {}",
                children.len()
            )));
        }

        // Placeholder parent retained so the pair can still be looked up by id
        let parent = inner.insert(strategy, parent_request, OrderStatus::Submitted, None, now);
        let mut live = vec![parent];
        let mut child_ids = Vec::with_capacity(2);
        for child in children {
            if child.quantity <= Decimal::ZERO {
                return Err(ExecutionError::NonPositiveQuantity(
                    child.quantity.to_string(),
                ));
            }
            let mut child = child;
            child.class = OrderClass::Simple;
            let id = inner.insert(strategy, child, OrderStatus::Submitted, Some(parent), now);
            child_ids.push(id);
            live.push(id);
        }
        inner.link_children(parent, &child_ids);
        inner.link_dependents(child_ids[0], child_ids[1]);

        Ok(Submission {
            live,
            queued: Vec::new(),
        })
    }

    fn submit_triggered(
        inner: &mut BookInner,
        strategy: &StrategyId,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Submission, ExecutionError> {
        let class = request.class;
        let secondary_stop = request.secondary_stop;
        let secondary_limit = request.secondary_limit;
        let exit_side = match request.side.side() {
            lumibot_instrument::Side::Buy => super::OrderSide::Sell,
            lumibot_instrument::Side::Sell => super::OrderSide::Buy,
        };
        let child_template = OrderRequest {
            class: OrderClass::Simple,
            secondary_stop: None,
            secondary_limit: None,
            side: exit_side,
            children: Vec::new(),
            ..request.clone()
        };

        let parent = inner.insert(strategy, request, OrderStatus::Submitted, None, now);
        let mut queued = Vec::new();

        if let Some(stop) = secondary_stop {
            let child = OrderRequest {
                payload: OrderPayload::Stop { price: stop },
                ..child_template.clone()
            };
            queued.push(inner.insert(strategy, child, OrderStatus::New, Some(parent), now));
        }
        if let Some(limit) = secondary_limit {
            let child = OrderRequest {
                payload: OrderPayload::Limit { price: limit },
                ..child_template
            };
            queued.push(inner.insert(strategy, child, OrderStatus::New, Some(parent), now));
        }
        inner.link_children(parent, &queued);

        // Bracket stop-loss and take-profit are mutually exclusive
        if class == OrderClass::Bracket && queued.len() == 2 {
            inner.link_dependents(queued[0], queued[1]);
        }

        Ok(Submission {
            live: vec![parent],
            queued,
        })
    }

    /// Submit N independently-priced legs under a synthetic multileg parent. The parent fills
    /// once every leg has filled.
    pub fn submit_multileg(
        &self,
        strategy: &StrategyId,
        legs: Vec<OrderRequest>,
        now: DateTime<Utc>,
    ) -> Result<Submission, ExecutionError> {
        let first = legs.first().ok_or(ExecutionError::EmptyOrderBatch)?;

        // Legs are different option contracts; the parent is keyed by the bare symbol
        let parent_request = OrderRequest {
            asset: Asset::stock(first.asset.symbol.clone()),
            class: OrderClass::Multileg,
            secondary_stop: None,
            secondary_limit: None,
            children: Vec::new(),
            ..first.clone()
        };

        let mut inner = self.inner.lock();
        let parent = inner.insert(strategy, parent_request, OrderStatus::Submitted, None, now);

        let mut live = vec![parent];
        let mut child_ids = Vec::with_capacity(legs.len());
        for leg in legs {
            if leg.quantity <= Decimal::ZERO {
                return Err(ExecutionError::NonPositiveQuantity(leg.quantity.to_string()));
            }
            let mut leg = leg;
            leg.class = OrderClass::Simple;
            let id = inner.insert(strategy, leg, OrderStatus::Submitted, Some(parent), now);
            child_ids.push(id);
            live.push(id);
        }
        inner.link_children(parent, &child_ids);

        Ok(Submission {
            live,
            queued: Vec::new(),
        })
    }

    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.inner.lock().orders.get(&id).cloned()
    }

    /// Cancel an order and cascade to all still-active descendants. Returns the ids actually
    /// transitioned, in traversal order.
    pub fn cancel(&self, id: OrderId) -> Vec<OrderId> {
        let mut inner = self.inner.lock();
        let mut canceled = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(order) = inner.orders.get(&current) else {
                continue;
            };
            stack.extend(order.children.iter().copied());
            if order.status.is_active() {
                // Active orders always admit Canceled
                inner
                    .transition(current, OrderStatus::Canceled)
                    .expect("active orders can cancel");
                canceled.push(current);
            }
        }
        canceled
    }

    /// Modify the limit/stop price of a live limit/stop order. No side or quantity changes.
    pub fn modify(
        &self,
        id: OrderId,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;

        match (&mut order.payload, limit_price, stop_price) {
            (OrderPayload::Limit { price }, Some(limit), _) => {
                *price = limit;
                Ok(())
            }
            (OrderPayload::Stop { price }, _, Some(stop)) => {
                *price = stop;
                Ok(())
            }
            (payload, _, _) => Err(ExecutionError::ModifyUnsupported {
                id,
                kind: payload.kind(),
            }),
        }
    }

    /// All tracked orders of a strategy, in submission order.
    pub fn list_orders(&self, strategy: &StrategyId) -> Vec<Order> {
        let inner = self.inner.lock();
        inner
            .by_strategy
            .get(strategy)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.orders.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active orders of a strategy, in submission order.
    pub fn list_active(&self, strategy: &StrategyId) -> Vec<Order> {
        self.list_orders(strategy)
            .into_iter()
            .filter(Order::is_active)
            .collect()
    }

    /// All tracked orders for an asset across strategies.
    pub fn list_by_asset(&self, asset: &Asset) -> Vec<Order> {
        let inner = self.inner.lock();
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|order| order.asset == *asset)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.id);
        orders
    }

    /// Ids of a strategy's orders eligible for fill evaluation this tick: live, not waiting
    /// on a parent, not superseded by a filled OCO sibling.
    pub fn pending_order_ids(&self, strategy: &StrategyId) -> Vec<OrderId> {
        self.list_orders(strategy)
            .into_iter()
            .filter(|order| {
                matches!(
                    order.status,
                    OrderStatus::Submitted | OrderStatus::PartialFill
                ) && !order.dependent_filled
            })
            .map(|order| order.id)
            .collect()
    }

    /// Active order ids working `asset` for `strategy`, excluding `exclude`.
    pub fn active_for_asset(
        &self,
        strategy: &StrategyId,
        asset: &Asset,
        exclude: &[OrderId],
    ) -> Vec<OrderId> {
        self.list_active(strategy)
            .into_iter()
            .filter(|order| order.asset == *asset && !exclude.contains(&order.id))
            .map(|order| order.id)
            .collect()
    }

    /// Promote queued (`New`) children of a filled OTO/bracket parent to live.
    pub fn activate_children(&self, parent: OrderId) -> Vec<OrderId> {
        let mut inner = self.inner.lock();
        let children = match inner.orders.get(&parent) {
            Some(order) => order.children.clone(),
            None => return Vec::new(),
        };
        let mut activated = Vec::new();
        for child in children {
            if inner
                .orders
                .get(&child)
                .map(|order| order.status == OrderStatus::New)
                .unwrap_or(false)
            {
                inner
                    .transition(child, OrderStatus::Submitted)
                    .expect("New orders can be submitted");
                activated.push(child);
            }
        }
        activated
    }

    /// Validated status transition.
    pub fn transition(&self, id: OrderId, to: OrderStatus) -> Result<(), ExecutionError> {
        self.inner.lock().transition(id, to)
    }

    /// Record a (full) fill on the order.
    pub fn record_fill(
        &self,
        id: OrderId,
        price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        inner.transition(id, OrderStatus::Filled)?;
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;
        order.avg_fill_price = Some(price);
        order.filled_quantity = quantity;
        order.filled_at = Some(now);
        Ok(())
    }

    /// Write back mutated payload state (stop-limit trigger, trail stop ratchet).
    pub fn set_payload(&self, id: OrderId, payload: OrderPayload) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;
        order.payload = payload;
        Ok(())
    }

    pub fn set_trade_cost(&self, id: OrderId, cost: Decimal) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;
        order.trade_cost = cost;
        Ok(())
    }

    /// Flag the OCO loser after its sibling filled.
    pub fn mark_dependent_filled(&self, id: OrderId) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(ExecutionError::OrderNotFound(id))?;
        order.dependent_filled = true;
        Ok(())
    }

    /// Re-derive a composite parent's status from its children.
    ///
    /// The placeholder mirrors the winning child: filled when any child filled (with the
    /// aggregated absolute quantity and signed net price - sell legs negative), canceled only
    /// when every child canceled.
    pub fn refresh_parent(
        &self,
        parent: OrderId,
        now: DateTime<Utc>,
    ) -> Result<ParentOutcome, ExecutionError> {
        let mut inner = self.inner.lock();
        let Some(order) = inner.orders.get(&parent) else {
            return Err(ExecutionError::OrderNotFound(parent));
        };
        if !order.is_parent() || order.status.is_terminal() {
            return Ok(ParentOutcome::Unchanged);
        }

        let children: Vec<Order> = order
            .children
            .iter()
            .filter_map(|id| inner.orders.get(id))
            .cloned()
            .collect();

        if children.iter().any(Order::is_active) {
            return Ok(ParentOutcome::Unchanged);
        }

        if children.iter().all(Order::is_canceled) {
            inner.transition(parent, OrderStatus::Canceled)?;
            debug!(%parent, "all children canceled, parent mirrors cancel");
            return Ok(ParentOutcome::Canceled);
        }

        let filled: Vec<&Order> = children.iter().filter(|child| child.is_filled()).collect();
        let quantity: Decimal = filled.iter().map(|child| child.filled_quantity.abs()).sum();
        let price: Decimal = filled
            .iter()
            .filter_map(|child| {
                child
                    .avg_fill_price
                    .map(|price| if child.side.is_sell() { -price } else { price })
            })
            .sum();

        inner.transition(parent, OrderStatus::Filled)?;
        let order = inner
            .orders
            .get_mut(&parent)
            .ok_or(ExecutionError::OrderNotFound(parent))?;
        order.quantity = quantity;
        order.filled_quantity = quantity;
        order.avg_fill_price = Some(price);
        order.filled_at = Some(now);
        order.trade_cost = Decimal::ZERO;

        Ok(ParentOutcome::Filled { price, quantity })
    }

    /// Expire live orders per their time-in-force. `Day` orders expire at session end; `IOC`
    /// orders expire after their first evaluation tick.
    pub fn expire(&self, time_in_force: TimeInForce, strategy: &StrategyId) -> Vec<OrderId> {
        let ids: Vec<OrderId> = self
            .list_active(strategy)
            .into_iter()
            .filter(|order| {
                order.time_in_force == time_in_force
                    && matches!(
                        order.status,
                        OrderStatus::Submitted | OrderStatus::PartialFill
                    )
            })
            .map(|order| order.id)
            .collect();

        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        for id in ids {
            if inner.transition(id, OrderStatus::Expired).is_ok() {
                expired.push(id);
            }
        }
        expired
    }

    /// Total number of tracked orders, across all statuses.
    pub fn num_orders(&self) -> usize {
        self.inner.lock().orders.len()
    }
}

/// Split an OCO request into the placeholder parent and its children.
fn split_children(mut request: OrderRequest) -> (OrderRequest, Vec<OrderRequest>) {
    let children = std::mem::take(&mut request.children);
    (request, children)
}
