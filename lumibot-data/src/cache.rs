use crate::{
    bar::{Bar, BarSeries, QuoteLevels},
    error::DataError,
    timestep::Timestep,
};
use chrono::{DateTime, NaiveDate, Utc};
use lumibot_instrument::asset::{Asset, AssetKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One row of a bar-cache file.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    ts: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    missing: bool,
    bid: Option<f64>,
    ask: Option<f64>,
    bid_size: Option<f64>,
    ask_size: Option<f64>,
}

fn asset_type_tag(asset: &Asset) -> &'static str {
    match asset.kind {
        AssetKind::Stock => "stock",
        AssetKind::Option(_) => "option",
        AssetKind::Future { .. } => "future",
        AssetKind::ContFuture => "cont_future",
        AssetKind::Crypto => "crypto",
        AssetKind::Forex => "forex",
        AssetKind::Index => "index",
    }
}

/// Cache file name for a series covering `[start, end]`:
/// `{asset_type}_{symbol}_{quote?}_{timestep}_{YYYY-MM-DD}_{YYYY-MM-DD}.csv`.
pub fn cache_file_name(
    asset: &Asset,
    quote: Option<&Asset>,
    timestep: Timestep,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    match quote {
        Some(quote) => format!(
            "{}_{}_{}_{}_{}_{}.csv",
            asset_type_tag(asset),
            asset.symbol,
            quote.symbol,
            timestep,
            start,
            end
        ),
        None => format!(
            "{}_{}_{}_{}_{}.csv",
            asset_type_tag(asset),
            asset.symbol,
            timestep,
            start,
            end
        ),
    }
}

/// Write a series to `dir` under its cache file name, creating the directory if needed.
pub fn save_series(
    dir: &Path,
    series: &BarSeries,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PathBuf, DataError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(cache_file_name(
        &series.asset,
        Some(&series.quote_asset),
        series.timestep,
        start,
        end,
    ));

    let mut writer = csv::Writer::from_path(&path)?;
    for index in 0..series.len() {
        let bar = series.bar(index);
        let levels = series.quote_levels(index);
        let finite = |value: f64| value.is_finite().then_some(value);
        writer.serialize(CacheRow {
            ts: bar.ts,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            missing: bar.missing,
            bid: levels.and_then(|l| finite(l.bid)),
            ask: levels.and_then(|l| finite(l.ask)),
            bid_size: levels.and_then(|l| finite(l.bid_size)),
            ask_size: levels.and_then(|l| finite(l.ask_size)),
        })?;
    }
    writer.flush().map_err(|err| DataError::CacheIo(err.to_string()))?;

    debug!(path = %path.display(), rows = series.len(), "saved bar cache file");
    Ok(path)
}

/// Load a series previously written by [`save_series`].
pub fn load_series(
    path: &Path,
    asset: Asset,
    quote: Asset,
    timestep: Timestep,
) -> Result<BarSeries, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut series = BarSeries::new(asset, quote, timestep);

    for row in reader.deserialize::<CacheRow>() {
        let row = row?;
        let levels = match (row.bid, row.ask) {
            (None, None) => None,
            (bid, ask) => Some(QuoteLevels {
                bid: bid.unwrap_or(f64::NAN),
                ask: ask.unwrap_or(f64::NAN),
                bid_size: row.bid_size.unwrap_or(f64::NAN),
                ask_size: row.ask_size.unwrap_or(f64::NAN),
            }),
        };
        series.push_with_quotes(
            Bar {
                ts: row.ts,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                missing: row.missing,
            },
            levels,
        )?;
    }

    debug!(path = %path.display(), rows = series.len(), "loaded bar cache file");
    Ok(series)
}
