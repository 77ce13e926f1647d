use crate::{
    error::ExecutionError,
    event::{OrderEvent, OrderEventKind, OrderEventLog},
    fees::{trade_cost, TradingFee},
    fill::{self, BarPrices},
    order::{
        book::{OrderBook, ParentOutcome},
        Order, OrderClass, OrderId, OrderPayload, OrderRequest, OrderSide, StrategyId,
        TimeInForce,
    },
    position::{FuturesLedger, Position},
};
use chrono::{DateTime, Utc};
use chrono_tz::{America::New_York, Tz};
use fnv::FnvHashMap;
use lumibot_data::{
    calendar::TradingCalendar,
    source::{DataSource, FillShift},
};
use lumibot_instrument::{
    asset::{Asset, AssetKind},
    future,
    option::OptionContract,
    Side,
};
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

type PositionKey = (StrategyId, Asset);

/// Execution price resolved for one order on one tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ExecutionPrices {
    /// The execution bar's OHLC, evaluated by the fill rules.
    Bar(BarPrices),
    /// Quote-sourced option data with no trade: market orders fill at bid/ask directly.
    QuoteFallback(Decimal),
}

/// Simulated broker driving order fills, cash and position accounting against historical
/// bars.
///
/// One broker serves one backtest process; all state is per-strategy. The virtual clock lives
/// in the [`DataSource`], mutated only by the executor through
/// [`Self::update_datetime`].
#[derive(Debug)]
pub struct SimulatedBroker {
    source: Box<dyn DataSource>,
    calendar: Arc<TradingCalendar>,
    book: OrderBook,
    positions: FnvHashMap<PositionKey, Position>,
    futures_ledgers: FnvHashMap<PositionKey, FuturesLedger>,
    cash: FnvHashMap<StrategyId, f64>,
    buy_fees: Vec<TradingFee>,
    sell_fees: Vec<TradingFee>,
    events: OrderEventLog,
    minutes_before_closing: i64,
    market_tz: Tz,
}

impl SimulatedBroker {
    /// Distinguishes the simulated broker from live adapters: the executor re-raises strategy
    /// errors when this is set, instead of logging and continuing.
    pub const IS_BACKTESTING_BROKER: bool = true;

    pub fn new(source: Box<dyn DataSource>, calendar: Arc<TradingCalendar>) -> Self {
        Self {
            source,
            calendar,
            book: OrderBook::new(),
            positions: FnvHashMap::default(),
            futures_ledgers: FnvHashMap::default(),
            cash: FnvHashMap::default(),
            buy_fees: Vec::new(),
            sell_fees: Vec::new(),
            events: OrderEventLog::new(),
            minutes_before_closing: 15,
            market_tz: New_York,
        }
    }

    pub fn with_fees(mut self, buy_fees: Vec<TradingFee>, sell_fees: Vec<TradingFee>) -> Self {
        self.buy_fees = buy_fees;
        self.sell_fees = sell_fees;
        self
    }

    pub fn with_minutes_before_closing(mut self, minutes: i64) -> Self {
        self.minutes_before_closing = minutes;
        self
    }

    pub fn is_backtesting(&self) -> bool {
        Self::IS_BACKTESTING_BROKER
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    // =========Clock functions=====================

    pub fn datetime(&self) -> DateTime<Utc> {
        self.source.get_datetime()
    }

    pub fn update_datetime(&mut self, now: DateTime<Utc>) {
        self.source.update_datetime(now);
    }

    pub fn datetime_start(&self) -> DateTime<Utc> {
        self.source.datetime_start()
    }

    pub fn datetime_end(&self) -> DateTime<Utc> {
        self.source.datetime_end()
    }

    /// False once the virtual clock reaches the end of the data window.
    pub fn should_continue(&self) -> bool {
        self.datetime() < self.source.datetime_end()
    }

    // =========Account functions===================

    pub fn set_cash(&mut self, strategy: &StrategyId, cash: f64) {
        self.cash.insert(strategy.clone(), cash);
    }

    pub fn get_cash(&self, strategy: &StrategyId) -> f64 {
        self.cash.get(strategy).copied().unwrap_or(0.0)
    }

    fn adjust_cash(&mut self, strategy: &StrategyId, delta: Decimal) {
        let entry = self.cash.entry(strategy.clone()).or_insert(0.0);
        *entry += delta.to_f64().unwrap_or_default();
    }

    pub fn get_position(&self, strategy: &StrategyId, asset: &Asset) -> Option<&Position> {
        self.positions.get(&(strategy.clone(), asset.clone()))
    }

    pub fn get_positions(&self, strategy: &StrategyId) -> Vec<&Position> {
        self.positions
            .iter()
            .filter(|((owner, _), _)| owner == strategy)
            .map(|(_, position)| position)
            .collect()
    }

    /// Portfolio value: `cash + Σ position marks + Σ futures margin held + Σ futures
    /// unrealized P&L`. Futures contribute margin and unrealized P&L only, never notional.
    pub fn portfolio_value(&mut self, strategy: &StrategyId) -> f64 {
        let mut value = Decimal::from_f64(self.get_cash(strategy)).unwrap_or_default();

        let marks: Vec<(Asset, Decimal, Decimal)> = self
            .positions
            .iter()
            .filter(|((owner, _), position)| owner == strategy && !position.asset.is_futures())
            .map(|((_, asset), position)| {
                (
                    asset.clone(),
                    position.quantity,
                    position.avg_fill_price,
                )
            })
            .collect();
        for (asset, quantity, basis) in marks {
            let mark = self
                .source
                .get_mark_price(&asset, None)
                .unwrap_or_else(|| {
                    debug!(%asset, "no mark price, valuing at cost basis");
                    basis
                });
            value += quantity * mark * Decimal::from(asset.multiplier());
        }

        let ledgers: Vec<(Asset, FuturesLedger)> = self
            .futures_ledgers
            .iter()
            .filter(|((owner, _), _)| owner == strategy)
            .map(|((_, asset), ledger)| (asset.clone(), ledger.clone()))
            .collect();
        for (asset, ledger) in ledgers {
            value += ledger.margin_held();
            if let Some(mark) = self.source.get_mark_price(&asset, None) {
                value += ledger.unrealized_pnl(mark, Decimal::from(asset.multiplier()));
            }
        }

        value.to_f64().unwrap_or_default()
    }

    pub fn get_last_price(&mut self, asset: &Asset, quote: Option<&Asset>) -> Option<Decimal> {
        self.source.get_last_price(asset, quote)
    }

    pub fn source_mut(&mut self) -> &mut dyn DataSource {
        self.source.as_mut()
    }

    /// Order events appended since the previous drain, for the strategy's `on_*_order` hooks.
    pub fn drain_events(&mut self) -> Vec<OrderEvent> {
        self.events.drain_new()
    }

    pub fn event_log(&self) -> &OrderEventLog {
        &self.events
    }

    // =========Order functions=====================

    pub fn get_order(&self, id: OrderId) -> Option<Order> {
        self.book.get(id)
    }

    pub fn list_active_orders(&self, strategy: &StrategyId) -> Vec<Order> {
        self.book.list_active(strategy)
    }

    /// Submit an order, flattening composites. Returns the primary order id (the placeholder
    /// parent for OCO).
    pub fn submit_order(
        &mut self,
        strategy: &StrategyId,
        request: OrderRequest,
    ) -> Result<OrderId, ExecutionError> {
        let now = self.datetime();
        let submission = self.book.submit(strategy, request, now)?;
        for id in &submission.live {
            if let Some(order) = self.book.get(*id) {
                // The OCO placeholder is bookkeeping, not an order the strategy hears about
                if !(order.class == OrderClass::Oco && order.is_parent()) {
                    self.emit(&order, OrderEventKind::New);
                }
            }
        }
        Ok(submission.live[0])
    }

    /// Submit a batch. With `is_multileg` the batch becomes legs of one synthetic parent and
    /// the parent id is returned first.
    pub fn submit_orders(
        &mut self,
        strategy: &StrategyId,
        requests: Vec<OrderRequest>,
        is_multileg: bool,
    ) -> Result<Vec<OrderId>, ExecutionError> {
        if requests.is_empty() {
            return Err(ExecutionError::EmptyOrderBatch);
        }

        if is_multileg {
            let now = self.datetime();
            let submission = self.book.submit_multileg(strategy, requests, now)?;
            for id in &submission.live {
                if let Some(order) = self.book.get(*id) {
                    self.emit(&order, OrderEventKind::New);
                }
            }
            return Ok(submission.live);
        }

        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            ids.push(self.submit_order(strategy, request)?);
        }
        Ok(ids)
    }

    /// Cancel an order, cascading to descendants.
    pub fn cancel_order(&mut self, id: OrderId) {
        for canceled in self.book.cancel(id) {
            if let Some(order) = self.book.get(canceled) {
                self.emit(&order, OrderEventKind::Canceled);
            }
        }
    }

    /// Cancel every active order of the strategy.
    pub fn cancel_open_orders(&mut self, strategy: &StrategyId) {
        for order in self.book.list_active(strategy) {
            self.cancel_order(order.id);
        }
    }

    /// Modify the limit/stop price of a live order.
    pub fn modify_order(
        &mut self,
        id: OrderId,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Result<(), ExecutionError> {
        self.book.modify(id, limit_price, stop_price)?;
        if let Some(order) = self.book.get(id) {
            self.emit(&order, OrderEventKind::Modified);
        }
        Ok(())
    }

    /// Expire the strategy's remaining `Day` orders. The executor calls this at session end.
    pub fn expire_day_orders(&mut self, strategy: &StrategyId) {
        for id in self.book.expire(TimeInForce::Day, strategy) {
            if let Some(order) = self.book.get(id) {
                self.emit(&order, OrderEventKind::Expired);
            }
        }
    }

    // =========Fill engine=========================

    /// Evaluate and execute the strategy's open orders at the start of a new bar.
    ///
    /// Orders process in submission order. A failure on one order never breaks processing of
    /// the others. Afterwards, expired option contracts are cash settled.
    pub fn process_pending_orders(&mut self, strategy: &StrategyId) {
        let now = self.datetime();

        for id in self.book.pending_order_ids(strategy) {
            let Some(order) = self.book.get(id) else {
                continue;
            };
            if !order.is_active() || order.dependent_filled {
                continue;
            }

            // OCO placeholders never fill directly
            if order.class == OrderClass::Oco && order.is_parent() {
                continue;
            }

            // Multileg parents wait for all legs, then mirror the aggregate
            if order.class == OrderClass::Multileg && order.is_parent() {
                match self.book.refresh_parent(id, now) {
                    Ok(ParentOutcome::Filled { price, quantity }) => {
                        if let Some(parent) = self.book.get(id) {
                            self.emit(&parent, OrderEventKind::Filled { price, quantity });
                        }
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%id, %error, "failed refreshing multileg parent"),
                }
                continue;
            }

            let Some(prices) = self.execution_prices(&order) else {
                if self.source.known_complete() {
                    // Frame-loaded history is complete: a missing bar means the data
                    // genuinely does not exist, so the order can never fill
                    warn!(order = %id, asset = %order.asset, "no data for order, canceling");
                    self.cancel_order(id);
                } else {
                    debug!(order = %id, asset = %order.asset, "no bar yet, order stays pending");
                }
                continue;
            };

            let fill_price = match prices {
                ExecutionPrices::Bar(bar) => {
                    let mut payload = order.payload;
                    let price = fill::evaluate(&mut payload, order.side.side(), &bar);
                    if payload != order.payload {
                        if let Err(error) = self.book.set_payload(id, payload) {
                            warn!(%id, %error, "failed persisting payload state");
                        }
                    }
                    price
                }
                ExecutionPrices::QuoteFallback(price) => Some(price),
            };

            if let Some(price) = fill_price {
                if let Err(error) = self.execute_filled_order(strategy, id, price) {
                    warn!(order = %id, %error, "order fill failed, continuing tick");
                }
            }
        }

        // Immediate-or-cancel orders had their one evaluation
        for id in self.book.expire(TimeInForce::ImmediateOrCancel, strategy) {
            if let Some(order) = self.book.get(id) {
                self.emit(&order, OrderEventKind::Expired);
            }
        }

        self.process_expired_option_contracts(strategy);
    }

    /// Resolve the execution bar for an order per the source's bar-selection convention.
    fn execution_prices(&mut self, order: &Order) -> Option<ExecutionPrices> {
        let bar = match self.source.fill_shift() {
            FillShift::Fixed(shift) => {
                let bars = self.source.get_historical_prices(
                    &order.asset,
                    1,
                    None,
                    Some(shift),
                    Some(&order.quote),
                )?;
                bars.last_bar()?
            }
            FillShift::TwoBarSelect => {
                let bars = self.source.get_historical_prices(
                    &order.asset,
                    2,
                    None,
                    None,
                    Some(&order.quote),
                )?;
                let now = self.source.get_datetime();
                let index = bars
                    .index_at_or_after(now)
                    .unwrap_or_else(|| bars.len() - 1);
                bars.bar(index)
            }
        };

        if let Some(prices) = BarPrices::from_f64(bar.open, bar.high, bar.low) {
            return Some(ExecutionPrices::Bar(prices));
        }

        // Quote-sourced option data with no trade this bucket: market orders fill at the
        // touch, bounded by any limit price carried on the order
        if order.asset.is_option() && matches!(order.payload, OrderPayload::Market) {
            let quote = self.source.get_quote(&order.asset, Some(&order.quote));
            let touch = match order.side.side() {
                Side::Buy => quote.ask,
                Side::Sell => quote.bid,
            };
            let touch = Decimal::from_f64(touch?)?;
            let bounded = match (order.payload.limit_price(), order.side.side()) {
                (Some(limit), Side::Buy) => touch.min(limit),
                (Some(limit), Side::Sell) => touch.max(limit),
                (None, _) => touch,
            };
            return Some(ExecutionPrices::QuoteFallback(bounded));
        }

        None
    }

    /// Execute a fill: OCO sibling cancellation, triggered-children submission, fees, cash
    /// and position accounting, parent aggregation, and post-close order cleanup.
    fn execute_filled_order(
        &mut self,
        strategy: &StrategyId,
        id: OrderId,
        price: Decimal,
    ) -> Result<(), ExecutionError> {
        let now = self.datetime();
        let order = self.book.get(id).ok_or(ExecutionError::OrderNotFound(id))?;

        // OCO mutual cancellation: the sibling is dead before any new order may touch the
        // asset
        if let Some(dependent) = order.dependent {
            self.book.mark_dependent_filled(dependent)?;
            self.cancel_order(dependent);
        }

        // A filled bracket/OTO parent releases its queued children
        if matches!(order.class, OrderClass::Bracket | OrderClass::Oto) {
            for child in self.book.activate_children(id) {
                if let Some(child_order) = self.book.get(child) {
                    info!(parent = %id, child = %child, "submitting triggered child order");
                    self.emit(&child_order, OrderEventKind::New);
                }
            }
        }

        let cost = trade_cost(&order, price, &self.buy_fees, &self.sell_fees);

        self.book.record_fill(id, price, order.quantity, now)?;
        self.book.set_trade_cost(id, cost)?;
        let filled = self.book.get(id).ok_or(ExecutionError::OrderNotFound(id))?;
        self.emit(
            &filled,
            OrderEventKind::Filled {
                price,
                quantity: filled.filled_quantity,
            },
        );

        // Parent aggregation runs before accounting: a position close sweeps the asset's
        // remaining active orders, and the placeholder must already mirror the winner by then
        if let Some(parent) = filled.parent {
            match self.book.refresh_parent(parent, now)? {
                ParentOutcome::Filled { price, quantity } => {
                    if let Some(parent_order) = self.book.get(parent) {
                        if parent_order.class == OrderClass::Multileg {
                            self.emit(
                                &parent_order,
                                OrderEventKind::Filled { price, quantity },
                            );
                        }
                    }
                }
                ParentOutcome::Canceled | ParentOutcome::Unchanged => {}
            }
        }

        self.apply_fill_accounting(strategy, &filled, price, cost);

        Ok(())
    }

    /// Cash and position accounting for one fill, by asset class.
    fn apply_fill_accounting(
        &mut self,
        strategy: &StrategyId,
        order: &Order,
        price: Decimal,
        fees: Decimal,
    ) {
        let signed_quantity = order.signed_filled_quantity();
        let multiplier = Decimal::from(order.asset.multiplier());
        let key = (strategy.clone(), order.asset.clone());

        match (&order.asset.kind, &order.quote.kind) {
            // Futures: no notional at entry, only margin plus realized P&L on closes
            (AssetKind::Future { .. } | AssetKind::ContFuture, _) => {
                let spec = future::contract_spec(order.asset.symbol.as_str());
                let margin_per_contract = spec.initial_margin.unwrap_or_else(|| {
                    // Unknown contract: fall back to 5% of notional at entry
                    price * multiplier * Decimal::new(5, 2)
                });
                let now = self.datetime();
                let delta = self
                    .futures_ledgers
                    .entry(key.clone())
                    .or_default()
                    .apply_fill(now, signed_quantity, price, margin_per_contract, multiplier);
                self.adjust_cash(strategy, delta.net() - fees);
                if self
                    .futures_ledgers
                    .get(&key)
                    .map(FuturesLedger::is_empty)
                    .unwrap_or(false)
                {
                    self.futures_ledgers.remove(&key);
                }
            }

            // Crypto priced in crypto: both sides post position-style entries
            (AssetKind::Crypto, AssetKind::Crypto) => {
                let quote_key = (strategy.clone(), order.quote.clone());
                self.positions
                    .entry(quote_key.clone())
                    .or_insert_with(|| Position::new(strategy.clone(), order.quote.clone()))
                    .apply_fill(order.id, -signed_quantity * price, Decimal::ONE);
                if self
                    .positions
                    .get(&quote_key)
                    .map(Position::is_flat)
                    .unwrap_or(false)
                {
                    self.positions.remove(&quote_key);
                }
                self.adjust_cash(strategy, -fees);
            }

            // Stocks, options, indices, forex, and crypto quoted in forex: classical
            // cash-settled accounting
            _ => {
                self.adjust_cash(strategy, -signed_quantity * price * multiplier - fees);
            }
        }

        // Base position tracking is common to every class except the crypto quote leg
        // handled above
        let position = self
            .positions
            .entry(key.clone())
            .or_insert_with(|| Position::new(strategy.clone(), order.asset.clone()));
        position.apply_fill(order.id, signed_quantity, price);

        if position.is_flat() {
            info!(asset = %order.asset, "position liquidated");
            self.positions.remove(&key);
            self.cancel_open_orders_for_asset(strategy, &order.asset, &[order.id]);
        }
    }

    /// Cancel still-active orders working `asset`, excluding the order that triggered the
    /// close.
    fn cancel_open_orders_for_asset(
        &mut self,
        strategy: &StrategyId,
        asset: &Asset,
        exclude: &[OrderId],
    ) {
        for id in self.book.active_for_asset(strategy, asset, exclude) {
            self.cancel_order(id);
        }
    }

    // =========Option expiration===================

    /// Cash settle expired in-the-money option positions at (or after) expiration, once
    /// within `minutes_before_closing` of the close.
    pub fn process_expired_option_contracts(&mut self, strategy: &StrategyId) {
        let now = self.datetime();
        // No enclosing or upcoming close means the market data is exhausted
        let Some(time_to_close) = self.calendar.time_to_close(now) else {
            return;
        };
        let buffer_seconds = self.minutes_before_closing * 60;
        let today = now.with_timezone(&self.market_tz).date_naive();

        let expired: Vec<Position> = self
            .get_positions(strategy)
            .into_iter()
            .filter(|position| {
                position
                    .asset
                    .expiration()
                    .map(|expiration| expiration <= today)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for position in expired {
            let Some(expiration) = position.asset.expiration() else {
                continue;
            };
            // On expiration day itself, wait for the minutes-before-close buffer
            if expiration == today && time_to_close.num_seconds() > buffer_seconds {
                continue;
            }
            // Orders still working the contract may yet close it conventionally
            if !self
                .book
                .active_for_asset(strategy, &position.asset, &[])
                .is_empty()
            {
                continue;
            }

            if let AssetKind::Option(contract) = position.asset.kind.clone() {
                info!(asset = %position.asset, "cash settling expired option contract");
                self.cash_settle_option(strategy, &position, &contract);
            }
        }
    }

    fn cash_settle_option(
        &mut self,
        strategy: &StrategyId,
        position: &Position,
        contract: &OptionContract,
    ) {
        let Some(underlying) = position.asset.option_underlying() else {
            return;
        };

        // Underlying lookup: stock first, retried as an index when the symbol is not an
        // equity
        let underlying_price = match self.source.get_last_price(&underlying, None) {
            Some(price) => price,
            None => {
                let index = Asset::index(underlying.symbol.clone());
                match self.source.get_last_price(&index, None) {
                    Some(price) => price,
                    None => {
                        warn!(
                            asset = %position.asset,
                            "no underlying price, cannot cash settle"
                        );
                        return;
                    }
                }
            }
        };

        let multiplier = Decimal::from(contract.multiplier);
        let mut profit_loss =
            contract.intrinsic_value(underlying_price) * position.quantity * multiplier;

        // Long positions cannot lose more than the premium paid; shorts cannot gain more
        // than the premium collected
        if position.quantity > Decimal::ZERO && profit_loss < Decimal::ZERO {
            profit_loss = Decimal::ZERO;
        } else if position.quantity < Decimal::ZERO && profit_loss > Decimal::ZERO {
            profit_loss = Decimal::ZERO;
        }

        self.adjust_cash(strategy, profit_loss);

        // Offsetting order records the settlement in the books
        let side = if position.quantity > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let quantity = position.quantity.abs();
        let unit_price = if quantity.is_zero() {
            Decimal::ZERO
        } else {
            (profit_loss / quantity / multiplier).abs()
        };

        let now = self.datetime();
        let settlement = self
            .book
            .submit(
                strategy,
                OrderRequest::market(position.asset.clone(), quantity, side),
                now,
            )
            .and_then(|submission| {
                let id = submission.live[0];
                self.book.record_fill(id, unit_price, quantity, now)?;
                Ok(id)
            });

        match settlement {
            Ok(id) => {
                if let Some(order) = self.book.get(id) {
                    self.emit(
                        &order,
                        OrderEventKind::CashSettled {
                            price: unit_price,
                            quantity,
                        },
                    );
                }
                let key = (strategy.clone(), position.asset.clone());
                self.positions.remove(&key);
                self.cancel_open_orders_for_asset(strategy, &position.asset, &[id]);
            }
            Err(error) => warn!(asset = %position.asset, %error, "failed recording settlement"),
        }
    }

    fn emit(&mut self, order: &Order, kind: OrderEventKind) {
        self.events.push(OrderEvent {
            order_id: order.id,
            strategy: order.strategy.clone(),
            asset: order.asset.clone(),
            ts: self.source.get_datetime(),
            kind,
        });
    }
}
