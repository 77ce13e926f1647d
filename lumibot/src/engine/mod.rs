use crate::{
    config::BacktestConfig,
    error::{LumibotError, StrategyError},
    statistic::{BacktestSummary, EquityCurve},
    strategy::{Context, Strategy},
};
use chrono::{DateTime, Duration, Utc};
use lumibot_execution::{broker::SimulatedBroker, event::OrderEventKind};
use std::{fmt, path::PathBuf};
use tracing::{debug, error, info, warn};

/// Drives one strategy through a backtest from `backtesting_start` to `backtesting_end` at
/// its configured cadence.
///
/// The virtual clock is mutated here and nowhere else. Closed market periods are skipped in a
/// single jump to the next session open rather than iterated tick by tick.
pub struct StrategyExecutor<S> {
    strategy: S,
    broker: SimulatedBroker,
    config: BacktestConfig,
    stats: EquityCurve,
    /// Tick scheduled purely to fire `before_market_closes`; trading iteration is skipped.
    close_hook_tick: Option<DateTime<Utc>>,
}

impl<S> fmt::Debug for StrategyExecutor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyExecutor")
            .field("strategy_id", &self.config.strategy_id)
            .field("now", &self.broker.datetime())
            .field("checkpoints", &self.stats.len())
            .finish()
    }
}

impl<S: Strategy> StrategyExecutor<S> {
    pub fn new(strategy: S, broker: SimulatedBroker, config: BacktestConfig) -> Self {
        Self {
            strategy,
            broker,
            config,
            stats: EquityCurve::new(),
            close_hook_tick: None,
        }
    }

    /// Run the backtest to completion.
    ///
    /// Strategy errors abort the run and propagate (the process should exit non-zero); the
    /// stats CSV of completed ticks is still written. Live brokers would log and continue
    /// instead - the policy keys off the broker's backtesting flag.
    pub fn run(mut self) -> Result<BacktestSummary, LumibotError> {
        self.config.validate()?;
        let strategy_id = self.config.strategy_id.clone();
        self.broker.set_cash(&strategy_id, self.config.budget);

        info!(
            strategy = %strategy_id,
            start = %self.config.backtesting_start,
            end = %self.config.backtesting_end,
            market = %self.config.market,
            "starting backtest"
        );
        if self.broker.calendar().market() != self.config.market {
            warn!(
                configured = %self.config.market,
                calendar = %self.broker.calendar().market(),
                "configured market differs from the broker's calendar"
            );
        }

        let outcome = self
            .run_hook(|strategy, ctx| strategy.initialize(ctx))
            .and_then(|()| self.run_loop());

        let summary = self.finalize();
        match outcome {
            Ok(()) => summary,
            Err(error) => {
                error!(%error, "backtest aborted");
                Err(error)
            }
        }
    }

    fn run_loop(&mut self) -> Result<(), LumibotError> {
        let strategy_id = self.config.strategy_id.clone();
        let sleeptime = self.config.sleeptime.duration();
        let close_buffer = Duration::minutes(self.config.minutes_before_closing);

        let mut last_open_date = None;
        let mut before_close_date = None;
        let mut day_closed_date = None;
        let mut iterations: u64 = 0;

        while self.broker.should_continue() {
            if !self.strategy.should_continue() {
                info!(strategy = %strategy_id, "strategy requested stop");
                self.run_abrupt_closing();
                return Ok(());
            }

            let now = self.broker.datetime();
            self.broker.process_pending_orders(&strategy_id);
            self.dispatch_order_events();

            let session = self.broker.calendar().session_containing(now).copied();
            match session {
                Some(session) if self.broker.calendar().is_open(now) => {
                    if last_open_date != Some(session.date) {
                        self.run_hook(|strategy, ctx| strategy.before_market_opens(ctx))?;
                        last_open_date = Some(session.date);
                    }

                    let buffer_point = session.close - close_buffer;
                    if before_close_date != Some(session.date) && now >= buffer_point {
                        self.run_hook(|strategy, ctx| strategy.before_market_closes(ctx))?;
                        before_close_date = Some(session.date);
                    }

                    if self.close_hook_tick.take() != Some(now) {
                        self.run_hook(|strategy, ctx| strategy.on_trading_iteration(ctx))?;
                        iterations += 1;
                        if !self.config.quiet_logs {
                            debug!(strategy = %strategy_id, %now, iterations, "trading iteration");
                        }
                    }
                    self.checkpoint();

                    // Advance, never overshooting the session close; schedule the
                    // before-close tick when the next cadence step would skip past it
                    let now = self.broker.datetime();
                    let time_to_close = session.close - now;
                    let target = if time_to_close <= Duration::zero() {
                        // Nominally open with nothing left of the session: creep forward
                        // instead of looping forever
                        now + Duration::seconds(1)
                    } else {
                        let next = now + sleeptime;
                        if next >= session.close {
                            if before_close_date != Some(session.date) && buffer_point > now {
                                self.close_hook_tick = Some(buffer_point);
                                buffer_point
                            } else {
                                session.close
                            }
                        } else {
                            next
                        }
                    };
                    self.broker.update_datetime(target.max(now + Duration::seconds(1)));
                }
                _ => {
                    // Session ended (or table exhausted): end-of-day lifecycle, then jump
                    // straight to the next open instead of iterating overnight
                    if let Some(date) = last_open_date {
                        if day_closed_date != Some(date) {
                            self.broker.expire_day_orders(&strategy_id);
                            self.run_hook(|strategy, ctx| strategy.after_market_closes(ctx))?;
                            day_closed_date = Some(date);
                            self.dispatch_order_events();
                        }
                    }
                    self.checkpoint();

                    match self.broker.calendar().next_open(now) {
                        None => {
                            info!(strategy = %strategy_id, "no future sessions, ending backtest");
                            break;
                        }
                        Some(open) if open <= now => {
                            self.broker.update_datetime(now + Duration::seconds(1));
                        }
                        Some(open) => {
                            self.broker.update_datetime(open);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn run_hook<F>(&mut self, hook: F) -> Result<(), LumibotError>
    where
        F: FnOnce(&mut S, &mut Context<'_>) -> Result<(), StrategyError>,
    {
        let mut ctx = Context::new(
            &mut self.broker,
            &self.config.strategy_id,
            self.config.quiet_logs,
        );
        match hook(&mut self.strategy, &mut ctx) {
            Ok(()) => Ok(()),
            Err(strategy_error) => {
                if self.broker.is_backtesting() {
                    let mut ctx = Context::new(
                        &mut self.broker,
                        &self.config.strategy_id,
                        self.config.quiet_logs,
                    );
                    self.strategy.on_bot_crash(&mut ctx, &strategy_error);
                    Err(LumibotError::Strategy(strategy_error))
                } else {
                    // Live trading stays resilient to user-code errors
                    error!(error = %strategy_error, "strategy hook failed, continuing");
                    Ok(())
                }
            }
        }
    }

    fn run_abrupt_closing(&mut self) {
        let mut ctx = Context::new(
            &mut self.broker,
            &self.config.strategy_id,
            self.config.quiet_logs,
        );
        if let Err(error) = self.strategy.on_abrupt_closing(&mut ctx) {
            error!(%error, "on_abrupt_closing failed");
        }
    }

    fn dispatch_order_events(&mut self) {
        for event in self.broker.drain_events() {
            let Some(order) = self.broker.get_order(event.order_id) else {
                continue;
            };
            let mut ctx = Context::new(
                &mut self.broker,
                &self.config.strategy_id,
                self.config.quiet_logs,
            );
            match event.kind {
                OrderEventKind::New => self.strategy.on_new_order(&mut ctx, &order),
                OrderEventKind::Filled { price, quantity }
                | OrderEventKind::CashSettled { price, quantity } => {
                    self.strategy.on_filled_order(&mut ctx, &order, price, quantity)
                }
                OrderEventKind::Canceled | OrderEventKind::Expired => {
                    self.strategy.on_canceled_order(&mut ctx, &order)
                }
                OrderEventKind::Modified => {}
            }
        }
    }

    fn checkpoint(&mut self) {
        let now = self.broker.datetime();
        let cash = self.broker.get_cash(&self.config.strategy_id);
        let portfolio_value = self.broker.portfolio_value(&self.config.strategy_id);
        self.stats.checkpoint(now, cash, portfolio_value);
    }

    /// Write run artifacts and build the summary. Runs for aborted backtests too, so partial
    /// stats survive.
    fn finalize(&mut self) -> Result<BacktestSummary, LumibotError> {
        let stats_path = self.write_artifacts()?;
        let equity = self.stats.clone();

        Ok(BacktestSummary {
            strategy: self.config.strategy_id.to_string(),
            backtesting_start: self.config.backtesting_start,
            backtesting_end: self.config.backtesting_end,
            starting_cash: self.config.budget,
            ending_cash: self.broker.get_cash(&self.config.strategy_id),
            ending_portfolio_value: equity
                .last()
                .map(|point| point.portfolio_value)
                .unwrap_or(self.config.budget),
            total_return: equity.total_return(),
            max_drawdown: equity.max_drawdown(),
            equity,
            stats_path,
        })
    }

    fn write_artifacts(&mut self) -> Result<Option<PathBuf>, LumibotError> {
        let Some(dir) = self.config.logs_dir.clone() else {
            return Ok(None);
        };

        let stem = format!(
            "{}_{}",
            self.config.strategy_id,
            self.config.backtesting_end.format("%Y-%m-%dT%H-%M-%S")
        );
        let stats_path = dir.join(format!("{stem}.csv"));
        self.stats.write_csv(&stats_path)?;

        if self.config.write_orders_json {
            let orders_path = dir.join(format!("{stem}_orders.json"));
            let json = self
                .broker
                .event_log()
                .to_json()
                .map_err(|error| LumibotError::ArtifactIo(error.to_string()))?;
            std::fs::write(&orders_path, json)?;
        }

        Ok(Some(stats_path))
    }
}
