use lumibot_data::error::DataError;
use lumibot_execution::error::ExecutionError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LumibotError {
    #[error("config: {0}")]
    Config(String),

    #[error("market data: {0}")]
    Data(#[from] DataError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("stats artifact io: {0}")]
    ArtifactIo(String),

    #[error("JoinError: {0}")]
    JoinError(String),
}

/// Error raised from user strategy code. During backtesting these abort the run (non-zero
/// process exit); live trading logs and continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StrategyError(pub String);

impl StrategyError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

impl From<ExecutionError> for StrategyError {
    fn from(value: ExecutionError) -> Self {
        Self(value.to_string())
    }
}

impl From<DataError> for StrategyError {
    fn from(value: DataError) -> Self {
        Self(value.to_string())
    }
}

impl From<std::io::Error> for LumibotError {
    fn from(value: std::io::Error) -> Self {
        Self::ArtifactIo(value.to_string())
    }
}

impl From<tokio::task::JoinError> for LumibotError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::JoinError(format!("{value:?}"))
    }
}
