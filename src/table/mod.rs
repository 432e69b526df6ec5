// src/table/mod.rs

use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{make_array, Array, ArrayRef, AsArray, TimestampNanosecondArray},
    buffer::NullBuffer,
    compute::cast,
    datatypes::{DataType, Field, Float64Type, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;

pub mod arrow_types;
pub mod build;
pub mod convert;
pub mod derive;

pub use convert::topic_to_table;
pub use derive::Combine;

/// Name of the time index column every topic table ends with.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// What to drop and how to name columns when converting one topic.
#[derive(Debug, Clone, Default)]
pub struct TopicOptions {
    /// Top-level field keys to leave out.
    pub exclude: Vec<String>,
    /// Column name prefix; `<topic>/` when unset or empty.
    pub prefix: Option<String>,
}

impl TopicOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub(crate) fn column_name(&self, topic: &str, key: &str) -> String {
        match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => format!("{}{}", p, key),
            _ => format!("{}/{}", topic, key),
        }
    }
}

/// One topic as a table: field columns in declared order, then `timestamp`
/// (`Timestamp(Nanosecond, "UTC")`), one row per message.
#[derive(Debug, Clone)]
pub struct TopicTable {
    topic: String,
    batch: RecordBatch,
}

impl TopicTable {
    pub(crate) fn new(topic: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            topic: topic.into(),
            batch,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn timestamps(&self) -> Result<&TimestampNanosecondArray> {
        self.column(TIMESTAMP_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<TimestampNanosecondArray>())
            .ok_or_else(|| anyhow!("table for `{}` has no nanosecond timestamp column", self.topic))
    }

    /// Pull a sub-field out of a struct column, e.g. `("ekf_nav/position",
    /// ["x"])`. An empty path returns the column itself. Rows where any
    /// enclosing struct is null are null.
    pub fn field(&self, column: &str, path: &[&str]) -> Result<ArrayRef> {
        let mut current = self
            .column(column)
            .cloned()
            .ok_or_else(|| anyhow!("no column `{}` in `{}`", column, self.topic))?;

        for (depth, name) in path.iter().enumerate() {
            let parent = current.as_struct_opt().ok_or_else(|| {
                anyhow!(
                    "`{}` is not a struct at `{}`",
                    column,
                    path[..depth].join(".")
                )
            })?;
            let child = parent
                .column_by_name(name)
                .cloned()
                .ok_or_else(|| anyhow!("no field `{}` under `{}`", path[..=depth].join("."), column))?;

            current = match NullBuffer::union(parent.nulls(), child.nulls()) {
                Some(nulls) if Some(&nulls) != child.nulls() => {
                    let data = child.to_data().into_builder().nulls(Some(nulls)).build()?;
                    make_array(data)
                }
                _ => child,
            };
        }
        Ok(current)
    }

    /// Add `field(column, path)` as column `name`, placed before `timestamp`.
    /// With `scale` the values are cast to float64 and multiplied. A column
    /// already called `name` is replaced.
    pub fn with_field(
        self,
        name: &str,
        column: &str,
        path: &[&str],
        scale: Option<f64>,
    ) -> Result<Self> {
        let mut values = self.field(column, path)?;
        if let Some(factor) = scale {
            let as_f64 = cast(&values, &DataType::Float64)
                .with_context(|| format!("casting `{}` to float64", name))?;
            let scaled = as_f64
                .as_primitive::<Float64Type>()
                .unary::<_, Float64Type>(|v| v * factor);
            values = Arc::new(scaled);
        }

        self.insert_column(name, values)
    }

    /// Put `values` in as column `name`. An existing column of that name is
    /// replaced where it stands, otherwise the column goes just before
    /// `timestamp`.
    pub(crate) fn insert_column(self, name: &str, values: ArrayRef) -> Result<Self> {
        if name == TIMESTAMP_COLUMN {
            return Err(anyhow!("`{}` is reserved for the time index", TIMESTAMP_COLUMN));
        }
        let schema = self.batch.schema();
        let field = Arc::new(Field::new(name, values.data_type().clone(), true));
        let mut fields = Vec::with_capacity(schema.fields().len() + 1);
        let mut columns = Vec::with_capacity(fields.capacity());

        let replacing = schema.column_with_name(name).is_some();
        for (f, col) in schema.fields().iter().zip(self.batch.columns()) {
            if f.name() == name {
                fields.push(field.clone());
                columns.push(values.clone());
                continue;
            }
            if !replacing && f.name() == TIMESTAMP_COLUMN {
                fields.push(field.clone());
                columns.push(values.clone());
            }
            fields.push(f.clone());
            columns.push(col.clone());
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .with_context(|| format!("adding column `{}` to `{}`", name, self.topic))?;
        Ok(Self {
            topic: self.topic,
            batch,
        })
    }
}
