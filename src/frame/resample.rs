// src/frame/resample.rs

use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, AsArray},
    compute::cast,
    datatypes::{DataType, Float64Type},
};
use chrono::Duration;
use tracing::debug;

use super::{Series, TimeFrame};
use crate::table::{TopicTable, TIMESTAMP_COLUMN};

fn is_numeric(dt: &DataType) -> bool {
    dt.is_numeric() || matches!(dt, DataType::Boolean)
}

/// Start of the bucket holding `ts`. Buckets are counted from the Unix
/// epoch, so grids of equal period line up across topics.
pub fn bucket_start(ts: i64, period_ns: i64) -> i64 {
    ts.div_euclid(period_ns) * period_ns
}

impl TimeFrame {
    /// Mean of every numeric (and bool) column per `period` bucket.
    ///
    /// The grid runs from the first to the last occupied bucket; buckets
    /// without a value are `None`. Strings, structs and lists are skipped.
    pub fn resample_mean(table: &TopicTable, period: Duration) -> Result<Self> {
        let period_ns = match period.num_nanoseconds() {
            Some(p) if p > 0 => p,
            _ => bail!("resample period must be positive, got {}", period),
        };
        let timestamps = table.timestamps()?;
        let (first, last) = match (timestamps.values().iter().min(), timestamps.values().iter().max()) {
            (Some(&lo), Some(&hi)) => (bucket_start(lo, period_ns), bucket_start(hi, period_ns)),
            _ => bail!("cannot resample `{}`, it has no rows", table.topic()),
        };
        let len = usize::try_from((last - first) / period_ns + 1)
            .with_context(|| format!("bucket range of `{}` overflows", table.topic()))?;
        let slots: Vec<usize> = timestamps
            .values()
            .iter()
            .map(|&ts| ((bucket_start(ts, period_ns) - first) / period_ns) as usize)
            .collect();

        let batch = table.batch();
        let mut series = Vec::new();
        for (field, column) in batch.schema_ref().fields().iter().zip(batch.columns()) {
            if field.name() == TIMESTAMP_COLUMN {
                continue;
            }
            if !is_numeric(field.data_type()) {
                debug!(column = %field.name(), data_type = %field.data_type(), "skipping non-numeric column");
                continue;
            }
            let values = cast(column, &DataType::Float64)
                .with_context(|| format!("casting `{}` to float64", field.name()))?;
            let values = values.as_primitive::<Float64Type>();

            let mut sums = vec![0.0; len];
            let mut counts = vec![0u32; len];
            for (row, slot) in slots.iter().enumerate() {
                if values.is_valid(row) {
                    sums[*slot] += values.value(row);
                    counts[*slot] += 1;
                }
            }
            let means = sums
                .into_iter()
                .zip(counts)
                .map(|(sum, n)| (n > 0).then(|| sum / f64::from(n)))
                .collect();
            series.push(Series::new(field.name().clone(), means));
        }

        let index = (0..len as i64).map(|i| first + i * period_ns).collect();
        debug!(topic = %table.topic(), buckets = len, series = series.len(), "resampled");
        TimeFrame::from_parts(period_ns, index, series)
    }
}
