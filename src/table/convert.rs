// src/table/convert.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{ArrayRef, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::arrow_types::field_to_arrow;
use super::build::build_array;
use super::{TopicOptions, TopicTable, TIMESTAMP_COLUMN};
use crate::bag::BagSource;
use crate::msg::{Record, SchemaLookup, Value};

/// Convert every message of `topic` into one table.
///
/// Column keys come from the first message's fields in declared order,
/// minus `options.exclude`. Nested messages stay whole as struct columns.
/// Returns `Ok(None)` when the topic has no messages.
#[instrument(level = "info", skip(source, schemas, options), fields(topic = %topic))]
pub fn topic_to_table<B: BagSource + ?Sized>(
    source: &B,
    schemas: &dyn SchemaLookup,
    topic: &str,
    options: &TopicOptions,
) -> Result<Option<TopicTable>> {
    let mut messages = source.messages(topic)?;

    // 1) first message fixes the column set
    let first_raw = match messages.next() {
        Some(raw) => raw?,
        None => {
            warn!("no messages on topic");
            return Ok(None);
        }
    };
    let first = source
        .deserialize(&first_raw, schemas)
        .with_context(|| format!("decoding message 0 of `{}`", topic))?;

    for key in &options.exclude {
        if first.fields.get(key).is_none() {
            info!(key = %key, "excluded key not present in message, ignoring");
        }
    }
    let keys: Vec<String> = first
        .fields
        .keys()
        .filter(|k| !options.exclude.iter().any(|e| e.as_str() == *k))
        .map(str::to_string)
        .collect();

    // 2) column types from the declared layout of the first message
    let schema = schemas
        .resolve(&first.msg_type)
        .ok_or_else(|| anyhow!("no schema declared for message type `{}`", first.msg_type))?;
    let package = schema.package();
    let types = keys
        .iter()
        .map(|key| {
            let def = schema
                .field(key)
                .ok_or_else(|| anyhow!("`{}` has no declared field `{}`", schema.name, key))?;
            field_to_arrow(&def.ty, package, schemas)
        })
        .collect::<Result<Vec<DataType>>>()?;
    debug!(msg_type = %first.msg_type, columns = keys.len(), "derived column keys");

    // 3) gather one cell per key per message
    let mut columns: Vec<Vec<Value>> = keys.iter().map(|_| Vec::new()).collect();
    let mut timestamps: Vec<i64> = Vec::new();

    let mut push_row = |index: usize, mut fields: Record, timestamp: i64| -> Result<()> {
        for (key, column) in keys.iter().zip(columns.iter_mut()) {
            let value = fields.remove(key).ok_or_else(|| {
                anyhow!(
                    "schema drift on `{}`: message {} has no field `{}`",
                    topic,
                    index,
                    key
                )
            })?;
            column.push(value);
        }
        timestamps.push(timestamp);
        Ok(())
    };

    push_row(0, first.fields, first_raw.timestamp)?;
    for (i, raw) in messages.enumerate() {
        let index = i + 1;
        let raw = raw?;
        let msg = source
            .deserialize(&raw, schemas)
            .with_context(|| format!("decoding message {} of `{}`", index, topic))?;
        push_row(index, msg.fields, raw.timestamp)?;
    }
    drop(push_row);

    // 4) assemble the batch, timestamp last
    let mut fields = Vec::with_capacity(keys.len() + 1);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(keys.len() + 1);
    for ((key, dt), values) in keys.iter().zip(types).zip(&columns) {
        let name = options.column_name(topic, key);
        let cells: Vec<Option<&Value>> = values.iter().map(Some).collect();
        let array =
            build_array(&dt, &cells).with_context(|| format!("building column `{}`", name))?;
        fields.push(Field::new(name, dt, true));
        arrays.push(array);
    }
    if fields.iter().any(|f| f.name() == TIMESTAMP_COLUMN) {
        bail!(
            "column name `{}` collides with the time index on `{}`",
            TIMESTAMP_COLUMN,
            topic
        );
    }

    let rows = timestamps.len();
    fields.push(Field::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
        false,
    ));
    arrays.push(Arc::new(
        TimestampNanosecondArray::from(timestamps).with_timezone("UTC"),
    ));

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .with_context(|| format!("assembling table for `{}`", topic))?;
    info!(rows, columns = batch.num_columns(), "converted topic");
    Ok(Some(TopicTable::new(topic, batch)))
}
