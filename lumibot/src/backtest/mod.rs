use crate::{
    config::BacktestConfig,
    engine::StrategyExecutor,
    error::LumibotError,
    statistic::BacktestSummary,
    strategy::Strategy,
};
use futures::future::try_join_all;
use lumibot_execution::broker::SimulatedBroker;
use tracing::info;

/// Everything one backtest needs: the strategy variant under test, a broker owning its own
/// data source, and the run configuration.
///
/// Backtests share nothing - each owns an independent bar store, order book and clock, which
/// is what makes running many of them concurrently safe.
#[derive(Debug)]
pub struct BacktestArgs<S> {
    pub strategy: S,
    pub broker: SimulatedBroker,
    pub config: BacktestConfig,
}

/// Summaries of a concurrent batch, along with the wall-clock duration of the whole batch.
#[derive(Debug)]
pub struct MultiBacktestSummary {
    pub duration: std::time::Duration,
    pub summaries: Vec<BacktestSummary>,
}

/// Run a single backtest to completion on the current thread.
pub fn run_backtest<S: Strategy>(
    strategy: S,
    broker: SimulatedBroker,
    config: BacktestConfig,
) -> Result<BacktestSummary, LumibotError> {
    StrategyExecutor::new(strategy, broker, config).run()
}

/// Run multiple backtests concurrently, each with different strategy parameters.
///
/// Each backtest is synchronous and CPU-bound, so they are dispatched to blocking tasks and
/// joined together. The first failing backtest fails the batch.
pub async fn run_backtests<S>(
    batch: impl IntoIterator<Item = BacktestArgs<S>>,
) -> Result<MultiBacktestSummary, LumibotError>
where
    S: Strategy + Send + 'static,
{
    let time_start = std::time::Instant::now();

    let handles = batch.into_iter().map(|args| {
        tokio::task::spawn_blocking(move || {
            run_backtest(args.strategy, args.broker, args.config)
        })
    });

    let joined = try_join_all(handles).await?;
    let summaries = joined.into_iter().collect::<Result<Vec<_>, _>>()?;

    let duration = time_start.elapsed();
    info!(
        backtests = summaries.len(),
        ?duration,
        "backtest batch complete"
    );

    Ok(MultiBacktestSummary {
        duration,
        summaries,
    })
}
