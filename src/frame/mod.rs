// src/frame/mod.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

pub mod export;
pub mod resample;

pub use export::{export_csv, time_range_suffix};
pub use resample::bucket_start;

use crate::table::TIMESTAMP_COLUMN;

/// One named column of a frame; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Several series on one regular time grid.
///
/// `index[i]` is the start of bucket `i` in nanoseconds since the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeFrame {
    period_ns: i64,
    index: Vec<i64>,
    series: Vec<Series>,
}

/// Missing-value summary of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingStat {
    pub name: String,
    pub missing: usize,
    pub present: usize,
    /// `missing / present * 100`; `None` when nothing is present.
    pub percent: Option<f64>,
}

impl TimeFrame {
    pub fn from_parts(period_ns: i64, index: Vec<i64>, series: Vec<Series>) -> Result<Self> {
        if period_ns <= 0 {
            bail!("frame period must be positive, got {}ns", period_ns);
        }
        if let Some(bad) = series.iter().find(|s| s.values.len() != index.len()) {
            bail!(
                "series `{}` has {} values for {} timestamps",
                bad.name,
                bad.values.len(),
                index.len()
            );
        }
        Ok(Self {
            period_ns,
            index,
            series,
        })
    }

    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn series_by_name(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.index.first().map(|&ts| DateTime::from_timestamp_nanos(ts))
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.index.last().map(|&ts| DateTime::from_timestamp_nanos(ts))
    }

    /// Left join: `other`'s series are placed on this frame's grid, buckets
    /// `other` doesn't cover stay missing.
    pub fn join(mut self, other: &TimeFrame) -> Result<Self> {
        if other.period_ns != self.period_ns {
            bail!(
                "cannot join frames with periods {}ns and {}ns",
                self.period_ns,
                other.period_ns
            );
        }
        let positions: HashMap<i64, usize> = other
            .index
            .iter()
            .enumerate()
            .map(|(i, &ts)| (ts, i))
            .collect();

        for s in &other.series {
            if self.series_by_name(&s.name).is_some() {
                bail!("series `{}` is already in the frame", s.name);
            }
            let values = self
                .index
                .iter()
                .map(|ts| positions.get(ts).and_then(|&i| s.values[i]))
                .collect();
            self.series.push(Series::new(s.name.clone(), values));
        }
        debug!(series = self.series.len(), rows = self.len(), "joined frame");
        Ok(self)
    }

    /// Keep only `names`, in that order.
    pub fn select<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        let mut kept = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let pos = self
                .series
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| anyhow!("no series `{}` in frame", name))?;
            kept.push(self.series.swap_remove(pos));
        }
        self.series = kept;
        Ok(self)
    }

    /// Fill gaps, at most `limit` values per gap.
    ///
    /// Interior gaps are interpolated linearly in time between the known
    /// neighbours, filling from the start of the gap. Trailing gaps repeat
    /// the last known value. Leading gaps stay missing.
    pub fn interpolate_time(self, limit: usize) -> Self {
        self.interpolate_time_where(limit, |_| true)
    }

    /// [`interpolate_time`](Self::interpolate_time) on the series whose name
    /// passes `keep`; the others are left as they are.
    pub fn interpolate_time_where<F>(mut self, limit: usize, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        for s in self.series.iter_mut().filter(|s| keep(&s.name)) {
            let mut filled = 0;
            let mut i = 0;
            while i < s.values.len() {
                if s.values[i].is_some() {
                    i += 1;
                    continue;
                }
                let gap_start = i;
                while i < s.values.len() && s.values[i].is_none() {
                    i += 1;
                }
                // leading gap
                if gap_start == 0 {
                    continue;
                }
                let Some(before) = s.values[gap_start - 1] else {
                    continue;
                };
                let t0 = self.index[gap_start - 1];
                let fill_end = i.min(gap_start + limit);

                match s.values.get(i).copied().flatten() {
                    Some(after) => {
                        let span = (self.index[i] - t0) as f64;
                        for k in gap_start..fill_end {
                            let w = (self.index[k] - t0) as f64 / span;
                            s.values[k] = Some(before + (after - before) * w);
                        }
                    }
                    None => {
                        for k in gap_start..fill_end {
                            s.values[k] = Some(before);
                        }
                    }
                }
                filled += fill_end - gap_start;
            }
            debug!(series = %s.name, filled, "interpolated");
        }
        self
    }

    /// Share of missing values per series after dropping `trim` rows at
    /// each end.
    pub fn missing_report(&self, trim: usize) -> Vec<MissingStat> {
        let lo = trim.min(self.len());
        let hi = self.len().saturating_sub(trim).max(lo);
        self.series
            .iter()
            .map(|s| {
                let window = &s.values[lo..hi];
                let missing = window.iter().filter(|v| v.is_none()).count();
                let present = window.len() - missing;
                MissingStat {
                    name: s.name.clone(),
                    missing,
                    present,
                    percent: (present > 0).then(|| missing as f64 / present as f64 * 100.0),
                }
            })
            .collect()
    }

    /// Rows with `start <= timestamp <= end`.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let nanos = |t: DateTime<Utc>| {
            t.timestamp_nanos_opt()
                .ok_or_else(|| anyhow!("{} is outside the nanosecond range", t))
        };
        let (start, end) = (nanos(start)?, nanos(end)?);
        if start > end {
            bail!("slice start is after its end");
        }
        let lo = self.index.partition_point(|&ts| ts < start);
        let hi = self.index.partition_point(|&ts| ts <= end);

        Ok(Self {
            period_ns: self.period_ns,
            index: self.index[lo..hi].to_vec(),
            series: self
                .series
                .iter()
                .map(|s| Series::new(s.name.clone(), s.values[lo..hi].to_vec()))
                .collect(),
        })
    }

    /// `timestamp` first, then one float64 column per series.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        )];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(
            TimestampNanosecondArray::from(self.index.clone()).with_timezone("UTC"),
        )];
        for s in &self.series {
            fields.push(Field::new(&s.name, DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(s.values.clone())));
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .context("building frame record batch")
    }
}
