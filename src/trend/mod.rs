//! Trend series construction for the reporter.
//!
//! Turns stored rows into time-bucketed series: resample onto a grid
//! aligned to the bucket width, average per bucket, fill interior gaps
//! by linear interpolation. Rendering lives in [`render`].

pub mod render;

use crate::sample::Sample;
use crate::storage::{SqliteStore, StoreError};

/// A reporting period: how far back to look and how wide the buckets
/// are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Hour-level trend, 5-minute buckets.
    Hours(u32),
    /// Day-level trend, 1-hour buckets.
    Days(u32),
    /// Month-level trend, 1-day buckets.
    Months(u32),
}

impl Period {
    /// Replaces a zero count with the period's default span.
    pub fn normalized(self) -> Period {
        match self {
            Period::Hours(0) => Period::Hours(80),
            Period::Days(0) => Period::Days(80),
            Period::Months(0) => Period::Months(38),
            other => other,
        }
    }

    pub fn count(&self) -> u32 {
        match *self {
            Period::Hours(n) | Period::Days(n) | Period::Months(n) => n,
        }
    }

    /// Window length in hours.
    pub fn hours(&self) -> i64 {
        match *self {
            Period::Hours(h) => i64::from(h),
            Period::Days(d) => i64::from(d) * 24,
            Period::Months(m) => i64::from(m) * 31 * 24,
        }
    }

    /// Bucket width in seconds.
    pub fn bucket_secs(&self) -> i64 {
        match self {
            Period::Hours(_) => 300,
            Period::Days(_) => 3600,
            Period::Months(_) => 86400,
        }
    }

    /// Tag used in output filenames.
    pub fn tag(&self) -> &'static str {
        match self {
            Period::Hours(_) => "hours",
            Period::Days(_) => "days",
            Period::Months(_) => "months",
        }
    }
}

/// One stored column charted on its own graph.
pub struct ChartGroup {
    /// Filename tag of the graph.
    pub name: &'static str,
    /// Stored column charted in this group, also the series label.
    pub column: &'static str,
    pub extract: fn(&Sample) -> f64,
    /// Rounding step for the y-axis limits.
    pub accuracy: f64,
}

/// The graphs the reporter renders per period. `volt_bat` and
/// `load_ups` are stored but not charted.
pub const GROUPS: [ChartGroup; 3] = [
    ChartGroup {
        name: "V",
        column: "volt_in",
        extract: |s| s.volt_in,
        accuracy: 10.0,
    },
    ChartGroup {
        name: "CHG",
        column: "charge_bat",
        extract: |s| s.charge_bat,
        accuracy: 10.0,
    },
    ChartGroup {
        name: "RUN",
        column: "runtime_bat",
        extract: |s| s.runtime_bat,
        accuracy: 300.0,
    },
];

/// One chart column resampled onto the bucket grid.
#[derive(Debug, Clone)]
pub struct TrendSeries {
    /// Series label in the chart legend.
    pub label: &'static str,
    /// Epoch of the first bucket, aligned to the bucket width.
    pub start_epoch: i64,
    pub bucket_secs: i64,
    /// One slot per bucket; `None` where no data exists even after
    /// interpolation (leading/trailing gaps).
    pub values: Vec<Option<f64>>,
}

impl TrendSeries {
    /// The drawable points: `(bucket epoch, value)` for filled buckets.
    pub fn points(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.values.iter().enumerate().filter_map(move |(i, v)| {
            v.map(|v| (self.start_epoch + i as i64 * self.bucket_secs, v))
        })
    }

    pub fn has_data(&self) -> bool {
        self.values.iter().any(Option::is_some)
    }
}

/// Fetches and resamples one column over the period ending at
/// `now_epoch`.
pub fn fetch_group(
    store: &SqliteStore,
    group: &ChartGroup,
    period: Period,
    now_epoch: i64,
) -> Result<TrendSeries, StoreError> {
    // one extra hour so the first bucket has data to average
    let since = now_epoch - (period.hours() + 1) * 3600;
    let rows = store.query_since(since)?;
    Ok(resample(&rows, group, period.bucket_secs(), since, now_epoch))
}

/// Buckets `rows` onto a grid aligned to `bucket_secs` covering
/// `[since, until]`, averaging within each bucket and interpolating
/// interior gaps.
pub fn resample(
    rows: &[Sample],
    group: &ChartGroup,
    bucket_secs: i64,
    since: i64,
    until: i64,
) -> TrendSeries {
    let start = since - since.rem_euclid(bucket_secs);
    let buckets = ((until - start) / bucket_secs + 1).max(1) as usize;
    let mut sums = vec![0.0f64; buckets];
    let mut counts = vec![0u32; buckets];

    for row in rows {
        let idx = (row.epoch - start) / bucket_secs;
        if row.epoch < start || idx as usize >= buckets {
            continue;
        }
        sums[idx as usize] += (group.extract)(row);
        counts[idx as usize] += 1;
    }

    let mut values: Vec<Option<f64>> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            if count > 0 {
                Some(sum / f64::from(count))
            } else {
                None
            }
        })
        .collect();
    interpolate(&mut values);

    TrendSeries {
        label: group.column,
        start_epoch: start,
        bucket_secs,
        values,
    }
}

/// Linearly fills interior runs of `None` between two filled buckets.
/// Leading and trailing gaps stay empty.
pub fn interpolate(values: &mut [Option<f64>]) {
    let mut last_filled: Option<usize> = None;
    for i in 0..values.len() {
        let Some(current) = values[i] else {
            continue;
        };
        if let Some(prev) = last_filled
            && i > prev + 1
            && let Some(anchor) = values[prev]
        {
            let span = (i - prev) as f64;
            for j in prev + 1..i {
                let t = (j - prev) as f64 / span;
                values[j] = Some(anchor + (current - anchor) * t);
            }
        }
        last_filled = Some(i);
    }
}

/// Rounds the data range outward to multiples of `accuracy`, padded by
/// 10 % of one step. An empty series spans `[0, accuracy]`.
pub fn y_limits(values: &[Option<f64>], accuracy: f64) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.iter().flatten() {
        min = min.min(*v);
        max = max.max(*v);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, accuracy);
    }
    let lo = (min / accuracy).floor() * accuracy - accuracy * 0.1;
    let hi = (max / accuracy).ceil() * accuracy + accuracy * 0.1;
    (lo, hi)
}
