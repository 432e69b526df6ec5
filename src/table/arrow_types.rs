// src/table/arrow_types.rs

use anyhow::{anyhow, bail, Result};
use arrow::datatypes::{DataType, Field, Fields};
use std::sync::Arc;

use crate::msg::{FieldType, MessageSchema, Primitive, SchemaLookup};

const MAX_DEPTH: usize = 32;

/// Map a ROS2 primitive onto its Arrow type.
///
/// - bool                 → Boolean
/// - byte, char, uint8    → UInt8
/// - int8 … int64         → Int8 … Int64
/// - uint16 … uint64      → UInt16 … UInt64
/// - float32, float64     → Float32, Float64
pub fn primitive_to_arrow(p: Primitive) -> DataType {
    match p {
        Primitive::Bool => DataType::Boolean,
        Primitive::Byte | Primitive::Char | Primitive::UInt8 => DataType::UInt8,
        Primitive::Int8 => DataType::Int8,
        Primitive::Int16 => DataType::Int16,
        Primitive::UInt16 => DataType::UInt16,
        Primitive::Int32 => DataType::Int32,
        Primitive::UInt32 => DataType::UInt32,
        Primitive::Int64 => DataType::Int64,
        Primitive::UInt64 => DataType::UInt64,
        Primitive::Float32 => DataType::Float32,
        Primitive::Float64 => DataType::Float64,
    }
}

/// Arrow type for a declared field. Nested messages become `Struct`,
/// arrays of any size become `List`.
pub fn field_to_arrow(
    ty: &FieldType,
    package: Option<&str>,
    schemas: &dyn SchemaLookup,
) -> Result<DataType> {
    field_to_arrow_at(ty, package, schemas, 0)
}

/// Struct fields for every field of `schema`, in declared order.
pub fn record_fields(schema: &MessageSchema, schemas: &dyn SchemaLookup) -> Result<Fields> {
    record_fields_at(schema, schemas, 0)
}

fn field_to_arrow_at(
    ty: &FieldType,
    package: Option<&str>,
    schemas: &dyn SchemaLookup,
    depth: usize,
) -> Result<DataType> {
    let dt = match ty {
        FieldType::Primitive(p) => primitive_to_arrow(*p),
        FieldType::String { .. } => DataType::Utf8,
        FieldType::Nested(name) => {
            let schema = schemas
                .resolve_in(name, package)
                .ok_or_else(|| anyhow!("no schema declared for nested type `{}`", name))?;
            DataType::Struct(record_fields_at(schema, schemas, depth + 1)?)
        }
        FieldType::Array { elem, .. } => {
            let item = field_to_arrow_at(elem, package, schemas, depth)?;
            DataType::List(Arc::new(Field::new("item", item, true)))
        }
    };
    Ok(dt)
}

fn record_fields_at(
    schema: &MessageSchema,
    schemas: &dyn SchemaLookup,
    depth: usize,
) -> Result<Fields> {
    if depth > MAX_DEPTH {
        bail!(
            "message nesting exceeds {} levels at `{}`",
            MAX_DEPTH,
            schema.name
        );
    }
    let package = schema.package();
    let fields = schema
        .fields
        .iter()
        .map(|f| {
            let dt = field_to_arrow_at(&f.ty, package, schemas, depth)?;
            Ok(Field::new(&f.name, dt, /* nullable = */ true))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Fields::from(fields))
}
