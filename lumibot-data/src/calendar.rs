use crate::error::DataError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::{America::Chicago, America::New_York, Tz};
use fnv::FnvHashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Named market whose session table a [`TradingCalendar`] is built from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Market {
    Nyse,
    CmeFx,
    UsFutures,
    /// Always-open market (crypto). Sessions are synthesized as contiguous UTC days so daily
    /// lifecycle hooks still have a close to anchor on.
    TwentyFourSeven,
}

impl FromStr for Market {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NYSE" => Ok(Market::Nyse),
            "CME_FX" => Ok(Market::CmeFx),
            "us_futures" => Ok(Market::UsFutures),
            "24/7" => Ok(Market::TwentyFourSeven),
            other => Err(DataError::UnknownMarket(other.to_string())),
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Market::Nyse => "NYSE",
                Market::CmeFx => "CME_FX",
                Market::UsFutures => "us_futures",
                Market::TwentyFourSeven => "24/7",
            }
        )
    }
}

/// One trading session: `[open, close)` in UTC, labeled with its market date.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct Session {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

const IS_OPEN_MEMO_CAPACITY: usize = 500;

/// Preloaded, read-only mapping of date to market session for a named market.
///
/// Two indices are built at construction: a day-to-sessions map for O(1) date resolution and a
/// sorted close-timestamp vector for binary-search lookups. The executor calls
/// [`Self::is_open`] with tightly clustered timestamps, so results are memoized in a small
/// LRU keyed by epoch milliseconds.
#[derive(Debug)]
pub struct TradingCalendar {
    market: Market,
    sessions: Vec<Session>,
    closes: Vec<DateTime<Utc>>,
    by_day: FnvHashMap<NaiveDate, Vec<usize>>,
    is_open_memo: Mutex<IndexMap<i64, bool>>,
}

impl TradingCalendar {
    /// Build the calendar for `market` covering `[start, end]` dates inclusive.
    pub fn new(market: Market, start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        if end < start {
            return Err(DataError::Calendar(format!(
                "calendar range end {end} precedes start {start}"
            )));
        }

        let sessions = match market {
            Market::Nyse => nyse_sessions(start, end)?,
            Market::CmeFx | Market::UsFutures => cme_sessions(start, end)?,
            Market::TwentyFourSeven => continuous_sessions(start, end),
        };

        Ok(Self::from_sessions(market, sessions))
    }

    /// Build a calendar directly from an explicit session list (custom markets, tests).
    pub fn from_sessions(market: Market, mut sessions: Vec<Session>) -> Self {
        sessions.sort_by_key(|session| session.close);

        let closes = sessions.iter().map(|session| session.close).collect();
        let mut by_day: FnvHashMap<NaiveDate, Vec<usize>> = FnvHashMap::default();
        for (index, session) in sessions.iter().enumerate() {
            by_day.entry(session.date).or_default().push(index);
        }

        Self {
            market,
            sessions,
            closes,
            by_day,
            is_open_memo: Mutex::new(IndexMap::with_capacity(IS_OPEN_MEMO_CAPACITY)),
        }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// True iff `now` lies within some session. The close boundary is exclusive.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if self.market == Market::TwentyFourSeven {
            return true;
        }

        let key = now.timestamp_millis();
        {
            let mut memo = self.is_open_memo.lock();
            if let Some(result) = memo.shift_remove(&key) {
                memo.insert(key, result);
                return result;
            }
        }

        let result = self
            .session_containing(now)
            .is_some();

        let mut memo = self.is_open_memo.lock();
        memo.insert(key, result);
        if memo.len() > IS_OPEN_MEMO_CAPACITY {
            memo.shift_remove_index(0);
        }
        result
    }

    /// The session enclosing `now`, if any.
    pub fn session_containing(&self, now: DateTime<Utc>) -> Option<&Session> {
        let index = self.closes.partition_point(|close| *close <= now);
        let session = self.sessions.get(index)?;
        (session.open <= now).then_some(session)
    }

    /// Zero while inside a session, otherwise the time until the next session opens. `None`
    /// when no future sessions remain in the table.
    pub fn time_to_open(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_open(now) {
            return Some(Duration::zero());
        }
        self.next_open(now).map(|open| open - now)
    }

    /// Time until the close of the enclosing session or, before an open, the next session's
    /// close. `None` once the table is exhausted.
    pub fn time_to_close(&self, now: DateTime<Utc>) -> Option<Duration> {
        let index = self.closes.partition_point(|close| *close <= now);
        let close = self.closes.get(index)?;
        Some(*close - now)
    }

    /// Next session open strictly after `now`.
    pub fn next_open(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Sessions are sorted by close and non-overlapping, so opens are sorted too
        let index = self
            .sessions
            .partition_point(|session| session.open <= now);
        self.sessions.get(index).map(|session| session.open)
    }

    /// All sessions dated `date`.
    pub fn sessions_on(&self, date: NaiveDate) -> Vec<&Session> {
        self.by_day
            .get(&date)
            .map(|indices| indices.iter().map(|&index| &self.sessions[index]).collect())
            .unwrap_or_default()
    }
}

fn localize(
    tz: Tz,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>, DataError> {
    tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            DataError::Calendar(format!(
                "nonexistent local time {date} {hour:02}:{minute:02} in {tz}"
            ))
        })
}

fn weekdays(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |date| *date <= end)
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
}

/// NYSE: 09:30-16:00 America/New_York on weekdays, minus US market holidays, with 13:00
/// early closes.
fn nyse_sessions(start: NaiveDate, end: NaiveDate) -> Result<Vec<Session>, DataError> {
    let mut sessions = Vec::new();
    for date in weekdays(start, end) {
        if us_market_holidays(date.year()).contains(&date) {
            continue;
        }
        let close_hour = if nyse_early_closes(date.year()).contains(&date) {
            13
        } else {
            16
        };
        sessions.push(Session {
            date,
            open: localize(New_York, date, 9, 30)?,
            close: localize(New_York, date, close_hour, 0)?,
        });
    }
    Ok(sessions)
}

/// CME Globex (equity index futures and FX): each trading day `D` runs from 17:00
/// America/Chicago on the prior calendar day to 16:00 on `D`, Monday through Friday, minus
/// full market holidays. The Monday session therefore opens Sunday evening.
fn cme_sessions(start: NaiveDate, end: NaiveDate) -> Result<Vec<Session>, DataError> {
    let mut sessions = Vec::new();
    for date in weekdays(start, end) {
        if cme_full_holidays(date.year()).contains(&date) {
            continue;
        }
        let prior = date - Duration::days(1);
        sessions.push(Session {
            date,
            open: localize(Chicago, prior, 17, 0)?,
            close: localize(Chicago, date, 16, 0)?,
        });
    }
    Ok(sessions)
}

/// 24/7 markets: one session per UTC day so daily hooks have boundaries.
fn continuous_sessions(start: NaiveDate, end: NaiveDate) -> Vec<Session> {
    start
        .iter_days()
        .take_while(move |date| *date <= end)
        .map(|date| {
            let open = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"));
            Session {
                date,
                open,
                close: open + Duration::days(1),
            }
        })
        .collect()
}

/// Observed date for a fixed holiday: Saturday observes Friday, Sunday observes Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, nth: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month");
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days(i64::from(offset) + 7 * (i64::from(nth) - 1))
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid first of month");
    let last = next_month - Duration::days(1);
    let offset = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last - Duration::days(i64::from(offset))
}

/// Western Easter Sunday via the anonymous Gregorian computus.
fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("computus yields a valid date")
}

/// Full-day US equity market holidays for `year`.
fn us_market_holidays(year: i32) -> Vec<NaiveDate> {
    let ymd = |month, day| NaiveDate::from_ymd_opt(year, month, day).expect("valid holiday date");
    let mut holidays = vec![
        observed(ymd(1, 1)),                                    // New Year's Day
        nth_weekday_of_month(year, 1, Weekday::Mon, 3),         // MLK Day
        nth_weekday_of_month(year, 2, Weekday::Mon, 3),         // Presidents' Day
        easter_sunday(year) - Duration::days(2),                // Good Friday
        last_weekday_of_month(year, 5, Weekday::Mon),           // Memorial Day
        observed(ymd(7, 4)),                                    // Independence Day
        nth_weekday_of_month(year, 9, Weekday::Mon, 1),         // Labor Day
        nth_weekday_of_month(year, 11, Weekday::Thu, 4),        // Thanksgiving
        observed(ymd(12, 25)),                                  // Christmas
    ];
    if year >= 2022 {
        holidays.push(observed(ymd(6, 19))); // Juneteenth
    }
    holidays
}

/// 13:00 early-close dates: July 3rd (when a weekday before a July 4th session), the day
/// after Thanksgiving, and Christmas Eve.
fn nyse_early_closes(year: i32) -> Vec<NaiveDate> {
    let ymd = |month, day| NaiveDate::from_ymd_opt(year, month, day).expect("valid date");
    let mut closes = vec![nth_weekday_of_month(year, 11, Weekday::Thu, 4) + Duration::days(1)];

    let july_3 = ymd(7, 3);
    if !matches!(july_3.weekday(), Weekday::Sat | Weekday::Sun) && observed(ymd(7, 4)) != july_3 {
        closes.push(july_3);
    }
    let christmas_eve = ymd(12, 24);
    if !matches!(christmas_eve.weekday(), Weekday::Sat | Weekday::Sun)
        && observed(ymd(12, 25)) != christmas_eve
    {
        closes.push(christmas_eve);
    }
    closes
}

/// CME full closures - the subset of US holidays with no Globex session at all.
fn cme_full_holidays(year: i32) -> Vec<NaiveDate> {
    let ymd = |month, day| NaiveDate::from_ymd_opt(year, month, day).expect("valid date");
    vec![
        observed(ymd(1, 1)),
        easter_sunday(year) - Duration::days(2),
        observed(ymd(12, 25)),
    ]
}
