use crate::error::StrategyError;
use chrono::{DateTime, Duration, Utc};
use lumibot_data::{
    bar::{BarSeries, Quote},
    timestep::Timestep,
};
use lumibot_execution::{
    broker::SimulatedBroker,
    order::{Order, OrderId, OrderRequest, OrderSide, StrategyId},
    position::Position,
};
use lumibot_instrument::{asset::Asset, option::OptionChain};
use rust_decimal::Decimal;
use tracing::info;

/// Capability set exposed to user strategy code during lifecycle hooks.
///
/// The context borrows the broker for the duration of one hook, so everything a strategy does
/// is serialized with the executor's tick - no hidden concurrency.
#[derive(Debug)]
pub struct Context<'a> {
    broker: &'a mut SimulatedBroker,
    strategy_id: &'a StrategyId,
    quiet_logs: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        broker: &'a mut SimulatedBroker,
        strategy_id: &'a StrategyId,
        quiet_logs: bool,
    ) -> Self {
        Self {
            broker,
            strategy_id,
            quiet_logs,
        }
    }

    /// Virtual clock.
    pub fn get_datetime(&self) -> DateTime<Utc> {
        self.broker.datetime()
    }

    /// Convenience builder for a market order request; refine with the [`OrderRequest`]
    /// builder methods.
    pub fn create_order(&self, asset: Asset, quantity: Decimal, side: OrderSide) -> OrderRequest {
        OrderRequest::market(asset, quantity, side)
    }

    pub fn submit_order(&mut self, request: OrderRequest) -> Result<OrderId, StrategyError> {
        Ok(self.broker.submit_order(self.strategy_id, request)?)
    }

    /// Submit a batch; with `is_multileg` the batch becomes one synthetic parent order.
    pub fn submit_orders(
        &mut self,
        requests: Vec<OrderRequest>,
        is_multileg: bool,
    ) -> Result<Vec<OrderId>, StrategyError> {
        Ok(self
            .broker
            .submit_orders(self.strategy_id, requests, is_multileg)?)
    }

    pub fn cancel_order(&mut self, id: OrderId) {
        self.broker.cancel_order(id);
    }

    pub fn cancel_open_orders(&mut self) {
        self.broker.cancel_open_orders(self.strategy_id);
    }

    pub fn get_order(&self, id: OrderId) -> Option<Order> {
        self.broker.get_order(id)
    }

    pub fn get_position(&self, asset: &Asset) -> Option<Position> {
        self.broker.get_position(self.strategy_id, asset).cloned()
    }

    pub fn get_positions(&self) -> Vec<Position> {
        self.broker
            .get_positions(self.strategy_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_cash(&self) -> f64 {
        self.broker.get_cash(self.strategy_id)
    }

    pub fn get_portfolio_value(&mut self) -> f64 {
        self.broker.portfolio_value(self.strategy_id)
    }

    pub fn get_last_price(&mut self, asset: &Asset) -> Option<Decimal> {
        self.broker.get_last_price(asset, None)
    }

    pub fn get_quote(&mut self, asset: &Asset) -> Quote {
        self.broker.source_mut().get_quote(asset, None)
    }

    pub fn get_chains(&mut self, asset: &Asset) -> Option<OptionChain> {
        self.broker.source_mut().get_chains(asset)
    }

    /// Up to `length` bars for `asset` ending at-or-before the virtual clock.
    pub fn get_historical_prices(
        &mut self,
        asset: &Asset,
        length: usize,
        timestep: Option<Timestep>,
    ) -> Option<BarSeries> {
        self.get_historical_prices_shifted(asset, length, timestep, None)
    }

    pub fn get_historical_prices_shifted(
        &mut self,
        asset: &Asset,
        length: usize,
        timestep: Option<Timestep>,
        timeshift: Option<Duration>,
    ) -> Option<BarSeries> {
        self.broker
            .source_mut()
            .get_historical_prices(asset, length, timestep, timeshift, None)
    }

    /// Structured log line attributed to the strategy. Suppressed by quiet-logs mode.
    pub fn log_message(&self, message: &str) {
        if !self.quiet_logs {
            info!(strategy = %self.strategy_id, "{message}");
        }
    }
}

/// A trading strategy driven by the [`StrategyExecutor`](crate::engine::StrategyExecutor).
///
/// Only [`Self::on_trading_iteration`] is required; every other hook defaults to a no-op.
/// Hook ordering per trading day: `before_market_opens`, then `on_trading_iteration` each
/// cadence tick, `before_market_closes` shortly before the close, `after_market_closes` once
/// the session ends.
pub trait Strategy {
    /// Called once before the first tick.
    fn initialize(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let _ = ctx;
        Ok(())
    }

    /// Called every cadence tick while the market is open.
    fn on_trading_iteration(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError>;

    /// Called once per trading day, at (or just before) the first bar of the session.
    fn before_market_opens(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let _ = ctx;
        Ok(())
    }

    /// Called once per trading day, `minutes_before_closing` before the close.
    fn before_market_closes(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let _ = ctx;
        Ok(())
    }

    /// Called once per trading day, after the session closes.
    fn after_market_closes(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let _ = ctx;
        Ok(())
    }

    /// Called for each order newly accepted by the broker.
    fn on_new_order(&mut self, ctx: &mut Context<'_>, order: &Order) {
        let _ = (ctx, order);
    }

    /// Called for each order fill, with the fill price and quantity.
    fn on_filled_order(
        &mut self,
        ctx: &mut Context<'_>,
        order: &Order,
        price: Decimal,
        quantity: Decimal,
    ) {
        let _ = (ctx, order, price, quantity);
    }

    /// Called for each canceled or expired order.
    fn on_canceled_order(&mut self, ctx: &mut Context<'_>, order: &Order) {
        let _ = (ctx, order);
    }

    /// Called once when the run terminates before `backtesting_end`.
    fn on_abrupt_closing(&mut self, ctx: &mut Context<'_>) -> Result<(), StrategyError> {
        let _ = ctx;
        Ok(())
    }

    /// Called with the terminal error when a hook aborts the backtest.
    fn on_bot_crash(&mut self, ctx: &mut Context<'_>, error: &StrategyError) {
        let _ = (ctx, error);
    }

    /// Polled each loop iteration; return false to stop the run.
    fn should_continue(&self) -> bool {
        true
    }
}
