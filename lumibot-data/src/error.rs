use chrono::{DateTime, Utc};
use lumibot_instrument::asset::Asset;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("invalid timestep: {0}")]
    InvalidTimestep(String),

    #[error("unknown market: {0}")]
    UnknownMarket(String),

    #[error("calendar construction failed: {0}")]
    Calendar(String),

    #[error("bars for {asset} are not strictly monotonic at {ts}")]
    NonMonotonicBars { asset: Asset, ts: DateTime<Utc> },

    #[error("attempted look-ahead read: bar ts {bar_ts} > now {now}")]
    LookAhead {
        bar_ts: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("bar cache io: {0}")]
    CacheIo(String),

    #[error("bar cache parse: {0}")]
    CacheParse(String),
}

impl From<std::io::Error> for DataError {
    fn from(value: std::io::Error) -> Self {
        Self::CacheIo(value.to_string())
    }
}

impl From<csv::Error> for DataError {
    fn from(value: csv::Error) -> Self {
        Self::CacheParse(value.to_string())
    }
}
