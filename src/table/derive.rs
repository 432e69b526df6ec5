// src/table/derive.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, TimestampNanosecondArray, UInt32Array},
    compute::{cast, take},
    datatypes::{DataType, Float64Type},
};
use chrono::Duration;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{TopicTable, TIMESTAMP_COLUMN};

/// How [`TopicTable::with_combined`] folds several columns into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Square root of the sum of squares, e.g. speed from velocity components.
    Norm,
    Sum,
    Mean,
}

impl Combine {
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Combine::Norm => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
            Combine::Sum => values.iter().sum(),
            Combine::Mean => values.iter().sum::<f64>() / values.len() as f64,
        }
    }
}

fn ensure_sorted(ts: &TimestampNanosecondArray, topic: &str) -> Result<()> {
    if ts.values().windows(2).any(|w| w[0] > w[1]) {
        bail!("timestamps of `{}` are not sorted", topic);
    }
    Ok(())
}

impl TopicTable {
    fn f64_column(&self, name: &str) -> Result<Float64Array> {
        let col = self
            .column(name)
            .ok_or_else(|| anyhow!("no column `{}` in `{}`", name, self.topic))?;
        let as_f64 =
            cast(col, &DataType::Float64).with_context(|| format!("casting `{}` to float64", name))?;
        Ok(as_f64.as_primitive::<Float64Type>().clone())
    }

    /// Fold numeric `columns` row by row into a new float64 column `name`.
    /// A row with any null input is null.
    pub fn with_combined(self, name: &str, op: Combine, columns: &[&str]) -> Result<Self> {
        if columns.is_empty() {
            bail!("`{}` combines no columns", name);
        }
        let inputs = columns
            .iter()
            .map(|c| self.f64_column(c))
            .collect::<Result<Vec<_>>>()?;

        let mut row = Vec::with_capacity(inputs.len());
        let values: Float64Array = (0..self.num_rows())
            .map(|i| {
                row.clear();
                for input in &inputs {
                    if input.is_null(i) {
                        return None;
                    }
                    row.push(input.value(i));
                }
                Some(op.apply(&row))
            })
            .collect();
        self.insert_column(name, Arc::new(values))
    }

    /// Mark where `column` changes against the previous row: `1.0` when it
    /// rises, `-1.0` when it falls, null otherwise. Used on logging markers
    /// to find where recording started and stopped.
    pub fn with_edges(self, name: &str, column: &str) -> Result<Self> {
        let marker = self.f64_column(column)?;
        let values: Float64Array = (0..marker.len())
            .map(|i| {
                if i == 0 || marker.is_null(i) || marker.is_null(i - 1) {
                    return None;
                }
                let delta = marker.value(i) - marker.value(i - 1);
                if delta > 0.0 {
                    Some(1.0)
                } else if delta < 0.0 {
                    Some(-1.0)
                } else {
                    None
                }
            })
            .collect();
        self.insert_column(name, Arc::new(values))
    }

    /// Attach the columns of `other` by timestamp: each row takes the last
    /// row of `other` at or before it, if that row is at most `tolerance`
    /// older. Unmatched rows are null. Both tables must be sorted by time
    /// and share no column names besides `timestamp`.
    pub fn join_asof(self, other: &TopicTable, tolerance: Duration) -> Result<Self> {
        let tol = tolerance
            .num_nanoseconds()
            .filter(|t| *t >= 0)
            .ok_or_else(|| anyhow!("invalid as-of tolerance {}", tolerance))?;
        let left = self.timestamps()?;
        let right = other.timestamps()?;
        ensure_sorted(left, &self.topic)?;
        ensure_sorted(right, &other.topic)?;

        for name in other.column_names() {
            if name != TIMESTAMP_COLUMN && self.column(name).is_some() {
                bail!("`{}` is in both `{}` and `{}`", name, self.topic, other.topic);
            }
        }

        // `next` counts the rows of `other` at or before the current time
        let mut next = 0usize;
        let indices: UInt32Array = left
            .values()
            .iter()
            .map(|&t| {
                while next < right.len() && right.value(next) <= t {
                    next += 1;
                }
                match next.checked_sub(1) {
                    Some(k) if t - right.value(k) <= tol => Some(k as u32),
                    _ => None,
                }
            })
            .collect();
        debug!(
            left = %self.topic,
            right = %other.topic,
            rows = indices.len(),
            matched = indices.len() - indices.null_count(),
            "as-of join"
        );

        let mut joined = self;
        for (field, col) in other.batch.schema_ref().fields().iter().zip(other.batch.columns()) {
            if field.name() == TIMESTAMP_COLUMN {
                continue;
            }
            let values = take(col.as_ref(), &indices, None)
                .with_context(|| format!("aligning `{}`", field.name()))?;
            joined = joined.insert_column(field.name(), values)?;
        }
        Ok(joined)
    }

    /// Replace nulls in `column` with the last value above them. Leading
    /// nulls stay null.
    pub fn fill_forward(self, column: &str) -> Result<Self> {
        let col: ArrayRef = self
            .column(column)
            .cloned()
            .ok_or_else(|| anyhow!("no column `{}` in `{}`", column, self.topic))?;
        let mut last = None;
        let indices: UInt32Array = (0..col.len())
            .map(|i| {
                if col.is_valid(i) {
                    last = Some(i as u32);
                }
                last
            })
            .collect();
        let filled = take(col.as_ref(), &indices, None)
            .with_context(|| format!("filling `{}`", column))?;
        self.insert_column(column, filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::Int32Array,
        datatypes::{Field, Schema, TimeUnit},
        record_batch::RecordBatch,
    };

    const MS: i64 = 1_000_000;

    fn table(topic: &str, ts: Vec<i64>, cols: Vec<(&str, ArrayRef)>) -> TopicTable {
        let mut fields: Vec<Field> = cols
            .iter()
            .map(|(n, c)| Field::new(*n, c.data_type().clone(), true))
            .collect();
        fields.push(Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        ));
        let mut columns: Vec<ArrayRef> = cols.into_iter().map(|(_, c)| c).collect();
        columns.push(Arc::new(TimestampNanosecondArray::from(ts).with_timezone("UTC")));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        TopicTable::new(topic, batch)
    }

    fn floats(table: &TopicTable, name: &str) -> Vec<Option<f64>> {
        table
            .column(name)
            .unwrap()
            .as_primitive::<Float64Type>()
            .iter()
            .collect()
    }

    #[test]
    fn combines_columns_row_by_row() -> Result<()> {
        let nav = table(
            "/nav",
            vec![0, 40 * MS, 80 * MS],
            vec![
                ("nav/vel_x", Arc::new(Float64Array::from(vec![Some(3.0), Some(1.0), None])) as ArrayRef),
                ("nav/vel_y", Arc::new(Int32Array::from(vec![4, 0, 2])) as ArrayRef),
            ],
        );

        let nav = nav
            .with_combined("nav/speed", Combine::Norm, &["nav/vel_x", "nav/vel_y"])?
            .with_combined("nav/sum", Combine::Sum, &["nav/vel_x", "nav/vel_y"])?
            .with_combined("nav/mean", Combine::Mean, &["nav/vel_x", "nav/vel_y"])?;
        assert_eq!(floats(&nav, "nav/speed"), vec![Some(5.0), Some(1.0), None]);
        assert_eq!(floats(&nav, "nav/sum"), vec![Some(7.0), Some(1.0), None]);
        assert_eq!(floats(&nav, "nav/mean"), vec![Some(3.5), Some(0.5), None]);
        assert_eq!(nav.column_names().last(), Some(&TIMESTAMP_COLUMN));

        assert!(nav.clone().with_combined("x", Combine::Sum, &[]).is_err());
        assert!(nav.with_combined("x", Combine::Sum, &["nav/nope"]).is_err());
        Ok(())
    }

    #[test]
    fn edges_mark_start_and_stop() -> Result<()> {
        let marker: ArrayRef = Arc::new(Int32Array::from(vec![
            Some(0),
            Some(0),
            Some(1),
            Some(1),
            Some(2),
            Some(0),
            None,
            Some(1),
        ]));
        let ts = (0..8).map(|i| i * MS).collect();
        let log = table("/log", ts, vec![("log_m/marker", marker)])
            .with_edges("log_m/start_stop", "log_m/marker")?;

        assert_eq!(
            floats(&log, "log_m/start_stop"),
            vec![None, None, Some(1.0), None, Some(1.0), Some(-1.0), None, None]
        );
        Ok(())
    }

    #[test]
    fn asof_join_takes_last_row_within_tolerance() -> Result<()> {
        let pdu = table(
            "/pdu",
            vec![0, MS, 2 * MS, 5 * MS, 8 * MS],
            vec![("pdu/current", Arc::new(Int32Array::from(vec![1, 2, 3, 4, 5])) as ArrayRef)],
        );
        let mark = table(
            "/mark",
            vec![MS, 4 * MS + MS / 2, 9 * MS],
            vec![("log_m/marker", Arc::new(Float64Array::from(vec![10.0, 20.0, 30.0])) as ArrayRef)],
        );

        let joined = pdu.join_asof(&mark, Duration::milliseconds(1))?;
        assert_eq!(
            joined.column_names(),
            vec!["pdu/current", "log_m/marker", "timestamp"]
        );
        // 0 has nothing before it, 8ms is 3.5ms past the last marker row
        assert_eq!(
            floats(&joined, "log_m/marker"),
            vec![None, Some(10.0), Some(10.0), Some(20.0), None]
        );

        let filled = joined.fill_forward("log_m/marker")?;
        assert_eq!(
            floats(&filled, "log_m/marker"),
            vec![None, Some(10.0), Some(10.0), Some(20.0), Some(20.0)]
        );
        assert_eq!(filled.column_names()[1], "log_m/marker");
        Ok(())
    }

    #[test]
    fn asof_join_rejects_unsorted_and_clashing_tables() {
        let a = table("/a", vec![0, MS], vec![("v", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef)]);
        let clash = table("/b", vec![0], vec![("v", Arc::new(Int32Array::from(vec![3])) as ArrayRef)]);
        let unsorted = table("/c", vec![MS, 0], vec![("w", Arc::new(Int32Array::from(vec![3, 4])) as ArrayRef)]);

        assert!(a.clone().join_asof(&clash, Duration::milliseconds(1)).is_err());
        assert!(a.clone().join_asof(&unsorted, Duration::milliseconds(1)).is_err());
        let fine = table("/d", vec![0], vec![("w", Arc::new(Int32Array::from(vec![5])) as ArrayRef)]);
        assert!(a.join_asof(&fine, Duration::milliseconds(-1)).is_err());
    }
}
