use crate::{error::DataError, timestep::Timestep};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use lumibot_instrument::asset::Asset;
use serde::{Deserialize, Serialize};

/// A single OHLCV record for one timestep bucket.
///
/// `missing = true` means no trade printed during the bucket and the price columns are
/// forward-filled placeholders from the prior close.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub missing: bool,
}

impl Bar {
    pub fn new(ts: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
            missing: false,
        }
    }
}

/// Best bid/ask attached to a bar bucket, for quote-sourced (typically option) data.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct QuoteLevels {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

impl QuoteLevels {
    pub fn mid(&self) -> Option<f64> {
        if self.bid.is_finite() && self.ask.is_finite() {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }
}

/// Snapshot quote for an asset at the caller's virtual `now` - the current bar as a record
/// including bid/ask when the series carries them.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Quote {
    pub asset: Option<Asset>,
    pub ts: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
}

impl Quote {
    pub fn empty(asset: Asset) -> Self {
        Self {
            asset: Some(asset),
            ..Self::default()
        }
    }

    /// Mid of bid/ask when both sides are present and finite.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid.is_finite() && ask.is_finite() => {
                Some((bid + ask) / 2.0)
            }
            _ => None,
        }
    }
}

/// Ordered, strictly-monotonic-in-ts sequence of bars for one `(Asset, Quote, Timestep)` key.
///
/// Storage is columnar: one `Vec` per OHLCV column plus the `missing` flags and optional
/// bid/ask columns. Row lookup by timestamp goes through an epoch-second index map with a
/// binary-search fallback for between-bucket timestamps.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub asset: Asset,
    pub quote_asset: Asset,
    pub timestep: Timestep,
    ts: Vec<DateTime<Utc>>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    missing: Vec<bool>,
    bid: Vec<f64>,
    ask: Vec<f64>,
    bid_size: Vec<f64>,
    ask_size: Vec<f64>,
    ts_index: FnvHashMap<i64, usize>,
}

impl BarSeries {
    pub fn new(asset: Asset, quote_asset: Asset, timestep: Timestep) -> Self {
        Self {
            asset,
            quote_asset,
            timestep,
            ts: Vec::new(),
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            volume: Vec::new(),
            missing: Vec::new(),
            bid: Vec::new(),
            ask: Vec::new(),
            bid_size: Vec::new(),
            ask_size: Vec::new(),
            ts_index: FnvHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    pub fn has_quotes(&self) -> bool {
        !self.bid.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.ts
    }

    pub fn opens(&self) -> &[f64] {
        &self.open
    }

    pub fn highs(&self) -> &[f64] {
        &self.high
    }

    pub fn lows(&self) -> &[f64] {
        &self.low
    }

    pub fn closes(&self) -> &[f64] {
        &self.close
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volume
    }

    /// Append a bar, enforcing strictly increasing timestamps.
    pub fn push(&mut self, bar: Bar) -> Result<(), DataError> {
        self.push_with_quotes(bar, None)
    }

    /// Append a bar together with its bid/ask levels. The quote columns are materialized on
    /// first use and backfilled with NaN for earlier rows.
    pub fn push_with_quotes(
        &mut self,
        bar: Bar,
        quotes: Option<QuoteLevels>,
    ) -> Result<(), DataError> {
        if let Some(last) = self.ts.last() {
            if bar.ts <= *last {
                return Err(DataError::NonMonotonicBars {
                    asset: self.asset.clone(),
                    ts: bar.ts,
                });
            }
        }

        if quotes.is_some() && self.bid.is_empty() && !self.ts.is_empty() {
            let nan_fill = vec![f64::NAN; self.ts.len()];
            self.bid = nan_fill.clone();
            self.ask = nan_fill.clone();
            self.bid_size = nan_fill.clone();
            self.ask_size = nan_fill;
        }

        self.ts_index.insert(bar.ts.timestamp(), self.ts.len());
        self.ts.push(bar.ts);
        self.open.push(bar.open);
        self.high.push(bar.high);
        self.low.push(bar.low);
        self.close.push(bar.close);
        self.volume.push(bar.volume);
        self.missing.push(bar.missing);

        if self.has_quotes() || quotes.is_some() {
            let levels = quotes.unwrap_or(QuoteLevels {
                bid: f64::NAN,
                ask: f64::NAN,
                bid_size: f64::NAN,
                ask_size: f64::NAN,
            });
            self.bid.push(levels.bid);
            self.ask.push(levels.ask);
            self.bid_size.push(levels.bid_size);
            self.ask_size.push(levels.ask_size);
        }

        Ok(())
    }

    /// The bar at row `index`.
    pub fn bar(&self, index: usize) -> Bar {
        Bar {
            ts: self.ts[index],
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
            missing: self.missing[index],
        }
    }

    pub fn last_bar(&self) -> Option<Bar> {
        if self.is_empty() {
            None
        } else {
            Some(self.bar(self.len() - 1))
        }
    }

    pub fn quote_levels(&self, index: usize) -> Option<QuoteLevels> {
        if self.has_quotes() {
            Some(QuoteLevels {
                bid: self.bid[index],
                ask: self.ask[index],
                bid_size: self.bid_size[index],
                ask_size: self.ask_size[index],
            })
        } else {
            None
        }
    }

    /// Row index of the most recent bar with `ts <= at`. `None` when `at` precedes all bars.
    pub fn index_at_or_before(&self, at: DateTime<Utc>) -> Option<usize> {
        if let Some(index) = self.ts_index.get(&at.timestamp()) {
            return Some(*index);
        }
        let upper = self.ts.partition_point(|ts| *ts <= at);
        upper.checked_sub(1)
    }

    /// Row index of the first bar with `ts >= at`.
    pub fn index_at_or_after(&self, at: DateTime<Utc>) -> Option<usize> {
        let index = self.ts.partition_point(|ts| *ts < at);
        (index < self.ts.len()).then_some(index)
    }

    /// Last known trade price as of `at`: the open of the bar exactly at `at`, otherwise the
    /// close of the most recent earlier bar.
    ///
    /// Trade-based only - returns `None` on a NaN close even when a bid/ask mid could be
    /// computed; quote fallbacks belong to [`Self::mark_price`].
    pub fn last_price(&self, at: DateTime<Utc>) -> Option<f64> {
        let index = self.index_at_or_before(at)?;
        let price = if self.ts[index] == at {
            self.open[index]
        } else {
            self.close[index]
        };
        price.is_finite().then_some(price)
    }

    /// Marking price as of `at`: the [`Self::last_price`] when a trade exists, otherwise the
    /// bid/ask mid of the same bucket. Used for portfolio valuation, never for fills.
    pub fn mark_price(&self, at: DateTime<Utc>) -> Option<f64> {
        let index = self.index_at_or_before(at)?;
        let price = if self.ts[index] == at {
            self.open[index]
        } else {
            self.close[index]
        };
        if price.is_finite() {
            return Some(price);
        }
        self.quote_levels(index).and_then(|levels| levels.mid())
    }

    /// Snapshot [`Quote`] as of `at`.
    pub fn quote(&self, at: DateTime<Utc>) -> Quote {
        let Some(index) = self.index_at_or_before(at) else {
            return Quote::empty(self.asset.clone());
        };

        let finite = |value: f64| value.is_finite().then_some(value);
        let levels = self.quote_levels(index);

        Quote {
            asset: Some(self.asset.clone()),
            ts: Some(self.ts[index]),
            price: self.last_price(at),
            open: finite(self.open[index]),
            high: finite(self.high[index]),
            low: finite(self.low[index]),
            close: finite(self.close[index]),
            volume: finite(self.volume[index]),
            bid: levels.and_then(|l| finite(l.bid)),
            ask: levels.and_then(|l| finite(l.ask)),
            bid_size: levels.and_then(|l| finite(l.bid_size)),
            ask_size: levels.and_then(|l| finite(l.ask_size)),
        }
    }

    /// Clone the window of `length` rows ending at row `end` (inclusive). `None` when fewer
    /// than `length` rows are available.
    pub fn window(&self, end: usize, length: usize) -> Option<BarSeries> {
        if length == 0 || end >= self.len() || end + 1 < length {
            return None;
        }
        let start = end + 1 - length;
        let mut out = BarSeries::new(
            self.asset.clone(),
            self.quote_asset.clone(),
            self.timestep,
        );
        for index in start..=end {
            out.push_with_quotes(self.bar(index), self.quote_levels(index))
                .expect("source rows are monotonic");
        }
        Some(out)
    }

    /// Drop all rows with `ts < cutoff`, returning how many were removed. The timestamp index
    /// is rebuilt after a trim.
    pub fn trim_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let keep_from = self.ts.partition_point(|ts| *ts < cutoff);
        if keep_from == 0 {
            return 0;
        }

        self.ts.drain(..keep_from);
        self.open.drain(..keep_from);
        self.high.drain(..keep_from);
        self.low.drain(..keep_from);
        self.close.drain(..keep_from);
        self.volume.drain(..keep_from);
        self.missing.drain(..keep_from);
        if self.has_quotes() {
            self.bid.drain(..keep_from);
            self.ask.drain(..keep_from);
            self.bid_size.drain(..keep_from);
            self.ask_size.drain(..keep_from);
        }

        self.ts_index.clear();
        for (index, ts) in self.ts.iter().enumerate() {
            self.ts_index.insert(ts.timestamp(), index);
        }

        keep_from
    }

    /// Approximate heap footprint in bytes, used by the store's memory accountant.
    pub fn approx_bytes(&self) -> usize {
        let rows = self.len();
        let price_columns = 5 * std::mem::size_of::<f64>();
        let quote_columns = if self.has_quotes() {
            4 * std::mem::size_of::<f64>()
        } else {
            0
        };
        let per_row = std::mem::size_of::<DateTime<Utc>>()
            + price_columns
            + quote_columns
            + std::mem::size_of::<bool>()
            // ts_index entry
            + std::mem::size_of::<(i64, usize)>();
        rows * per_row
    }

    /// Reindex onto a complete time grid, forward-filling OHLC from the prior close for empty
    /// buckets (volume 0, `missing = true`). Buckets before the first trade stay NaN so
    /// [`Self::last_price`] correctly reports no price.
    pub fn repair_and_fill(&self, grid: &[DateTime<Utc>]) -> BarSeries {
        let mut out = BarSeries::new(
            self.asset.clone(),
            self.quote_asset.clone(),
            self.timestep,
        );

        let mut prior_close = f64::NAN;
        for ts in grid {
            match self.ts_index.get(&ts.timestamp()) {
                Some(&index) => {
                    let bar = self.bar(index);
                    if bar.close.is_finite() {
                        prior_close = bar.close;
                        out.push_with_quotes(bar, self.quote_levels(index))
                            .expect("grid is monotonic");
                    } else {
                        // Quote printed but no trade: forward-fill the price columns and
                        // keep the quote levels as the mark
                        out.push_with_quotes(
                            Bar {
                                ts: *ts,
                                open: prior_close,
                                high: prior_close,
                                low: prior_close,
                                close: prior_close,
                                volume: 0.0,
                                missing: true,
                            },
                            self.quote_levels(index),
                        )
                        .expect("grid is monotonic");
                    }
                }
                None => {
                    out.push_with_quotes(
                        Bar {
                            ts: *ts,
                            open: prior_close,
                            high: prior_close,
                            low: prior_close,
                            close: prior_close,
                            volume: 0.0,
                            missing: true,
                        },
                        None,
                    )
                    .expect("grid is monotonic");
                }
            }
        }

        out
    }
}
