//! Fixed-width time buckets and the resampler.
//!
//! Buckets are aligned to the Unix epoch: a bucket of width `W` starts at a
//! multiple of `W` since 1970-01-01T00:00:00Z. Two series bucketed with the
//! same width therefore line up without any shared reference point.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::types::*;

/// Default resampling width
pub const DEFAULT_RESAMPLE: Duration = Duration::from_secs(60);

/// Bucket width in microseconds, or `None` for a zero or oversized width
pub fn width_micros(width: Duration) -> Option<i64> {
    let us = i64::try_from(width.as_micros()).ok()?;
    (us > 0).then_some(us)
}

/// Index of the bucket holding `t`
pub fn bucket_index(t: TraceTime, width_us: i64) -> i64 {
    t.timestamp_micros().div_euclid(width_us)
}

/// The `[start, end)` window of bucket `index`
pub fn bucket_window(index: i64, width_us: i64) -> Option<TimeWindow> {
    let start_us = index.checked_mul(width_us)?;
    let end_us = start_us.checked_add(width_us)?;
    Some(TimeWindow::new(
        DateTime::from_timestamp_micros(start_us)?,
        DateTime::from_timestamp_micros(end_us)?,
    ))
}

/// One row of a resampled series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledPoint {
    pub bucket_start: TraceTime,
    /// Mean of the values that fell in the bucket
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Running {
    sum: f64,
    count: usize,
}

fn finish(buckets: BTreeMap<i64, Running>, width_us: i64) -> Vec<ResampledPoint> {
    buckets
        .into_iter()
        .filter_map(|(index, running)| {
            let window = bucket_window(index, width_us)?;
            Some(ResampledPoint {
                bucket_start: window.start,
                mean: running.sum / running.count as f64,
                count: running.count,
            })
        })
        .collect()
}

/// Resample a time-indexed series into buckets of `width`.
///
/// The input need not be sorted. Non-finite values are ignored. Buckets
/// without values are omitted rather than filled.
pub fn resample<I>(series: I, width: Duration) -> Vec<ResampledPoint>
where
    I: IntoIterator<Item = (TraceTime, f64)>,
{
    let Some(width_us) = width_micros(width) else {
        return Vec::new();
    };

    let mut buckets: BTreeMap<i64, Running> = BTreeMap::new();
    for (t, value) in series {
        if !value.is_finite() {
            continue;
        }
        let running = buckets.entry(bucket_index(t, width_us)).or_default();
        running.sum += value;
        running.count += 1;
    }

    finish(buckets, width_us)
}

/// Resample several series at once, keyed by `K` (a direction, a node, ...)
pub fn resample_grouped<K, I>(series: I, width: Duration) -> BTreeMap<K, Vec<ResampledPoint>>
where
    K: Ord,
    I: IntoIterator<Item = (K, TraceTime, f64)>,
{
    let Some(width_us) = width_micros(width) else {
        return BTreeMap::new();
    };

    let mut groups: BTreeMap<K, BTreeMap<i64, Running>> = BTreeMap::new();
    for (key, t, value) in series {
        if !value.is_finite() {
            continue;
        }
        let running = groups
            .entry(key)
            .or_default()
            .entry(bucket_index(t, width_us))
            .or_default();
        running.sum += value;
        running.count += 1;
    }

    groups
        .into_iter()
        .map(|(key, buckets)| (key, finish(buckets, width_us)))
        .collect()
}

/// Summary statistics of a series of values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation; needs at least two values
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Calculate count, mean, standard deviation and range, ignoring undefined values.
pub fn calculate_stats(values: &[Option<f64>]) -> SeriesStats {
    let valid: Vec<f64> = values.iter().filter_map(|v| *v).filter(|v| v.is_finite()).collect();

    if valid.is_empty() {
        return SeriesStats::default();
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;

    let std = if valid.len() > 1 {
        let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(variance.sqrt())
    } else {
        None
    };

    SeriesStats {
        count: valid.len(),
        mean: Some(mean),
        std,
        min: valid.iter().copied().reduce(f64::min),
        max: valid.iter().copied().reduce(f64::max),
    }
}
