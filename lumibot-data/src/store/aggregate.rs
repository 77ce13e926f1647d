use crate::{
    bar::{Bar, BarSeries},
    timestep::Timestep,
};
use chrono_tz::Tz;
use itertools::Itertools;
use tracing::debug;

/// Aggregate a minute-level series into `target` buckets: open = first, high = max, low = min,
/// close = last, volume = sum. Buckets are left-closed and left-labeled at the target interval
/// boundary in market time `tz`.
///
/// A bucket is flagged `missing` only when every source row inside it was missing. NaN price
/// rows (quote-only buckets) are skipped by the fold, so a bucket of pure NaN stays NaN.
pub fn aggregate_minute_series(source: &BarSeries, target: Timestep, tz: Tz) -> Option<BarSeries> {
    if source.is_empty() {
        return None;
    }

    let mut out = BarSeries::new(
        source.asset.clone(),
        source.quote_asset.clone(),
        target,
    );

    for (bucket, rows) in &(0..source.len()).chunk_by(|&row| target.floor(source.timestamps()[row], tz)) {
        let mut open = f64::NAN;
        let mut high = f64::NAN;
        let mut low = f64::NAN;
        let mut close = f64::NAN;
        let mut volume = 0.0;
        let mut missing = true;

        for row in rows {
            let bar = source.bar(row);
            if bar.open.is_finite() && open.is_nan() {
                open = bar.open;
            }
            // f64::max / f64::min ignore a NaN operand, so NaN seeds resolve to the first
            // finite value
            high = high.max(bar.high);
            low = low.min(bar.low);
            if bar.close.is_finite() {
                close = bar.close;
            }
            if bar.volume.is_finite() {
                volume += bar.volume;
            }
            missing &= bar.missing;
        }

        out.push(Bar {
            ts: bucket,
            open,
            high,
            low,
            close,
            volume,
            missing,
        })
        .expect("bucket labels are monotonic for sorted source rows");
    }

    debug!(
        asset = %source.asset,
        source_rows = source.len(),
        source_timestep = %source.timestep,
        target_rows = out.len(),
        target_timestep = %target,
        "aggregated minute series"
    );

    Some(out)
}
