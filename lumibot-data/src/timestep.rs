use crate::error::DataError;
use chrono::{DateTime, Datelike, Duration, DurationRound, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Unit of a [`Timestep`] bucket.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

/// Bucket duration for bar data, parsed once at ingress so all internal APIs work with the
/// enum rather than vendor strings.
///
/// Accepts both the compact forms (`"1M"`, `"5M"`, `"1H"`, `"1D"`) and the long forms used by
/// frame-loaded data (`"minute"`, `"5 minutes"`, `"hour"`, `"day"`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Timestep {
    pub unit: TimeUnit,
    pub qty: u32,
}

pub const SECOND: Timestep = Timestep {
    unit: TimeUnit::Second,
    qty: 1,
};
pub const MINUTE: Timestep = Timestep {
    unit: TimeUnit::Minute,
    qty: 1,
};
pub const HOUR: Timestep = Timestep {
    unit: TimeUnit::Hour,
    qty: 1,
};
pub const DAY: Timestep = Timestep {
    unit: TimeUnit::Day,
    qty: 1,
};

impl Timestep {
    pub fn new(unit: TimeUnit, qty: u32) -> Self {
        Self { unit, qty }
    }

    pub fn minutes(qty: u32) -> Self {
        Self::new(TimeUnit::Minute, qty)
    }

    pub fn hours(qty: u32) -> Self {
        Self::new(TimeUnit::Hour, qty)
    }

    /// Bucket length as a [`Duration`]. A day is 24 hours for window arithmetic.
    pub fn duration(&self) -> Duration {
        let qty = i64::from(self.qty);
        match self.unit {
            TimeUnit::Second => Duration::seconds(qty),
            TimeUnit::Minute => Duration::minutes(qty),
            TimeUnit::Hour => Duration::hours(qty),
            TimeUnit::Day => Duration::days(qty),
        }
    }

    /// True for the intraday timesteps that can be derived from a minute series.
    pub fn is_aggregatable_from_minute(&self) -> bool {
        match self.unit {
            TimeUnit::Second => false,
            TimeUnit::Minute => self.qty > 1,
            TimeUnit::Hour | TimeUnit::Day => true,
        }
    }

    /// Floor `ts` to the left-closed bucket boundary at this timestep, evaluated in market
    /// time `tz` so day buckets label at local midnight and intraday buckets at local offsets.
    pub fn floor(&self, ts: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let local = ts.with_timezone(&tz);
        match self.unit {
            TimeUnit::Day => {
                let date = local.date_naive();
                let midnight = tz
                    .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
                    .earliest();
                match midnight {
                    Some(midnight) => midnight.with_timezone(&Utc),
                    // Local midnight skipped by a DST transition; fall back to UTC flooring
                    None => ts.duration_trunc(Duration::days(1)).unwrap_or(ts),
                }
            }
            _ => {
                let step = self.duration().num_seconds();
                let since_midnight = i64::from(local.num_seconds_from_midnight());
                let offset = since_midnight % step;
                ts - Duration::seconds(offset) - Duration::nanoseconds(i64::from(ts.nanosecond()))
            }
        }
    }
}

impl Display for Timestep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            TimeUnit::Second => "S",
            TimeUnit::Minute => "M",
            TimeUnit::Hour => "H",
            TimeUnit::Day => "D",
        };
        write!(f, "{}{}", self.qty, unit)
    }
}

impl FromStr for Timestep {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Long forms first: "minute", "5 minutes", "hour", "2 hours", "day"
        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "second" => return Ok(SECOND),
            "minute" => return Ok(MINUTE),
            "hour" => return Ok(HOUR),
            "day" => return Ok(DAY),
            _ => {}
        }
        if let Some((qty, unit)) = lower.split_once(' ') {
            let qty: u32 = qty
                .parse()
                .map_err(|_| DataError::InvalidTimestep(s.to_string()))?;
            let unit = match unit.trim_end_matches('s') {
                "second" => TimeUnit::Second,
                "minute" => TimeUnit::Minute,
                "hour" => TimeUnit::Hour,
                "day" => TimeUnit::Day,
                _ => return Err(DataError::InvalidTimestep(s.to_string())),
            };
            return Self::validated(unit, qty, s);
        }

        // Compact forms: "30S", "5M", "1H", "1D"
        let split = trimmed.len().saturating_sub(1);
        let (qty, unit) = trimmed.split_at(split);
        let qty: u32 = qty
            .parse()
            .map_err(|_| DataError::InvalidTimestep(s.to_string()))?;
        let unit = match unit {
            "S" | "s" => TimeUnit::Second,
            "M" | "m" => TimeUnit::Minute,
            "H" | "h" => TimeUnit::Hour,
            "D" | "d" => TimeUnit::Day,
            _ => return Err(DataError::InvalidTimestep(s.to_string())),
        };
        Self::validated(unit, qty, s)
    }
}

impl Timestep {
    fn validated(unit: TimeUnit, qty: u32, raw: &str) -> Result<Self, DataError> {
        if qty == 0 {
            return Err(DataError::InvalidTimestep(raw.to_string()));
        }
        Ok(Self { unit, qty })
    }
}
