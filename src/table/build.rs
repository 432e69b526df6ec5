// src/table/build.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{
        ArrayRef, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
        Int64Builder, Int8Builder, ListArray, StringBuilder, StructArray, UInt16Builder,
        UInt32Builder, UInt64Builder, UInt8Builder,
    },
    buffer::{NullBuffer, OffsetBuffer},
    datatypes::DataType,
};
use std::sync::Arc;

use crate::msg::Value;

fn mismatch(expected: &DataType, got: &Value) -> anyhow::Error {
    anyhow!("expected a {} value, got {}", expected, got.kind())
}

/// Validity mask, or `None` when every cell is present.
fn null_buffer(cells: &[Option<&Value>]) -> Option<NullBuffer> {
    if cells.iter().all(Option::is_some) {
        None
    } else {
        Some(NullBuffer::from(
            cells.iter().map(Option::is_some).collect::<Vec<bool>>(),
        ))
    }
}

macro_rules! primitive_array {
    ($builder:ty, $variant:ident, $dt:expr, $cells:expr) => {{
        let mut b = <$builder>::with_capacity($cells.len());
        for cell in $cells {
            match cell {
                None => b.append_null(),
                Some(Value::$variant(v)) => b.append_value(*v),
                Some(other) => return Err(mismatch($dt, other)),
            }
        }
        Arc::new(b.finish()) as ArrayRef
    }};
}

/// Build one Arrow array of type `dt` from decoded cells. `None` cells
/// become nulls.
pub fn build_array(dt: &DataType, cells: &[Option<&Value>]) -> Result<ArrayRef> {
    let array = match dt {
        DataType::Boolean => primitive_array!(BooleanBuilder, Bool, dt, cells),
        DataType::Int8 => primitive_array!(Int8Builder, I8, dt, cells),
        DataType::UInt8 => primitive_array!(UInt8Builder, U8, dt, cells),
        DataType::Int16 => primitive_array!(Int16Builder, I16, dt, cells),
        DataType::UInt16 => primitive_array!(UInt16Builder, U16, dt, cells),
        DataType::Int32 => primitive_array!(Int32Builder, I32, dt, cells),
        DataType::UInt32 => primitive_array!(UInt32Builder, U32, dt, cells),
        DataType::Int64 => primitive_array!(Int64Builder, I64, dt, cells),
        DataType::UInt64 => primitive_array!(UInt64Builder, U64, dt, cells),
        DataType::Float32 => primitive_array!(Float32Builder, F32, dt, cells),
        DataType::Float64 => primitive_array!(Float64Builder, F64, dt, cells),

        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(cells.len(), cells.len() * 8);
            for cell in cells {
                match cell {
                    None => b.append_null(),
                    Some(Value::String(s)) => b.append_value(s),
                    Some(other) => return Err(mismatch(dt, other)),
                }
            }
            Arc::new(b.finish()) as ArrayRef
        }

        DataType::Struct(fields) => {
            // 1) pull each child's cells out of the records
            let mut records = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    None => records.push(None),
                    Some(Value::Record(r)) => records.push(Some(r)),
                    Some(other) => return Err(mismatch(dt, other)),
                }
            }
            let nulls = null_buffer(cells);
            if fields.is_empty() {
                return Ok(Arc::new(StructArray::new_empty_fields(cells.len(), nulls)));
            }

            // 2) build children recursively
            let mut children = Vec::with_capacity(fields.len());
            for field in fields.iter() {
                let child_cells: Vec<Option<&Value>> = records
                    .iter()
                    .map(|r| r.and_then(|r| r.get(field.name())))
                    .collect();
                let child = build_array(field.data_type(), &child_cells)
                    .with_context(|| format!("in struct field `{}`", field.name()))?;
                children.push(child);
            }

            // 3) assemble
            Arc::new(StructArray::try_new(fields.clone(), children, nulls)?) as ArrayRef
        }

        DataType::List(item) => {
            let mut lengths = Vec::with_capacity(cells.len());
            let mut items: Vec<Option<&Value>> = Vec::new();
            for cell in cells {
                match cell {
                    None => lengths.push(0),
                    Some(Value::Array(values)) => {
                        lengths.push(values.len());
                        items.extend(values.iter().map(Some));
                    }
                    Some(other) => return Err(mismatch(dt, other)),
                }
            }
            let values = build_array(item.data_type(), &items).context("in list items")?;
            let offsets = OffsetBuffer::<i32>::from_lengths(lengths);
            Arc::new(ListArray::try_new(
                item.clone(),
                offsets,
                values,
                null_buffer(cells),
            )?) as ArrayRef
        }

        other => bail!("no column builder for Arrow type {}", other),
    };
    Ok(array)
}
