// src/msg/decode.rs
//
// Schema-driven CDR decoding. The byte-level format (alignment, length
// prefixes, byte order) is handled by `cdr_encoding`; the seeds below only
// tell it which serde shape to read next.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, LittleEndian};
use cdr_encoding::CdrDeserializer;
use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};
use std::fmt;

use super::registry::SchemaLookup;
use super::types::{ArraySize, FieldType, MessageSchema, Primitive};
use super::value::{Message, Record, Value};

/// Nesting deeper than this means a self-referencing schema set.
const MAX_DEPTH: usize = 32;

/// Encapsulation ids of the 4-byte header in front of every payload.
const CDR_BE: [u8; 2] = [0x00, 0x00];
const CDR_LE: [u8; 2] = [0x00, 0x01];

/// Decode one serialized payload of type `type_name`.
pub fn decode_cdr(type_name: &str, buf: &[u8], schemas: &dyn SchemaLookup) -> Result<Message> {
    if buf.len() < 4 {
        bail!(
            "short encapsulation header for `{}` ({} bytes)",
            type_name,
            buf.len()
        );
    }
    let schema = schemas
        .resolve(type_name)
        .ok_or_else(|| anyhow!("no schema declared for message type `{}`", type_name))?;

    let seed = RecordSeed {
        schema,
        schemas,
        depth: 0,
    };
    let fields = match [buf[0], buf[1]] {
        CDR_LE => {
            let mut de = CdrDeserializer::<LittleEndian>::new(&buf[4..]);
            seed.deserialize(&mut de)
        }
        CDR_BE => {
            let mut de = CdrDeserializer::<BigEndian>::new(&buf[4..]);
            seed.deserialize(&mut de)
        }
        other => bail!(
            "unsupported CDR representation {:#04x}{:02x} for `{}`",
            other[0],
            other[1],
            type_name
        ),
    }
    .with_context(|| format!("failed to deserialize `{}` payload", type_name))?;

    Ok(Message {
        msg_type: type_name.to_string(),
        fields,
    })
}

/// Whole message (struct) in declared field order.
struct RecordSeed<'a> {
    schema: &'a MessageSchema,
    schemas: &'a dyn SchemaLookup,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for RecordSeed<'_> {
    type Value = Record;

    fn deserialize<D>(self, de: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        if self.depth > MAX_DEPTH {
            return Err(de::Error::custom(format!(
                "message nesting exceeds {} levels at `{}`",
                MAX_DEPTH, self.schema.name
            )));
        }
        de.deserialize_tuple(self.schema.fields.len(), RecordVisitor(self))
    }
}

struct RecordVisitor<'a>(RecordSeed<'a>);

impl<'de> Visitor<'de> for RecordVisitor<'_> {
    type Value = Record;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cdr struct `{}`", self.0.schema.name)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let RecordSeed {
            schema,
            schemas,
            depth,
        } = self.0;
        let package = schema.package();

        let mut out = Record::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let v = seq
                .next_element_seed(ValueSeed {
                    ty: &field.ty,
                    package,
                    schemas,
                    depth,
                })?
                .ok_or_else(|| {
                    de::Error::custom(format!("missing field `{}` of `{}`", field.name, schema.name))
                })?;
            out.push(field.name.clone(), v);
        }
        Ok(out)
    }
}

/// One value, driven by its declared [`FieldType`].
struct ValueSeed<'a> {
    ty: &'a FieldType,
    /// Package of the declaring message, for relative nested names.
    package: Option<&'a str>,
    schemas: &'a dyn SchemaLookup,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ValueSeed<'_> {
    type Value = Value;

    fn deserialize<D>(self, de: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        match self.ty {
            FieldType::Primitive(p) => match p {
                Primitive::Bool => de.deserialize_bool(ScalarVisitor),
                // ROS2 byte and char are both unsigned octets
                Primitive::Byte | Primitive::Char | Primitive::UInt8 => {
                    de.deserialize_u8(ScalarVisitor)
                }
                Primitive::Int8 => de.deserialize_i8(ScalarVisitor),
                Primitive::Int16 => de.deserialize_i16(ScalarVisitor),
                Primitive::UInt16 => de.deserialize_u16(ScalarVisitor),
                Primitive::Int32 => de.deserialize_i32(ScalarVisitor),
                Primitive::UInt32 => de.deserialize_u32(ScalarVisitor),
                Primitive::Int64 => de.deserialize_i64(ScalarVisitor),
                Primitive::UInt64 => de.deserialize_u64(ScalarVisitor),
                Primitive::Float32 => de.deserialize_f32(ScalarVisitor),
                Primitive::Float64 => de.deserialize_f64(ScalarVisitor),
            },
            FieldType::String { .. } => de.deserialize_string(ScalarVisitor),
            FieldType::Nested(name) => {
                let schema = self
                    .schemas
                    .resolve_in(name, self.package)
                    .ok_or_else(|| {
                        de::Error::custom(format!("no schema declared for nested type `{}`", name))
                    })?;
                RecordSeed {
                    schema,
                    schemas: self.schemas,
                    depth: self.depth + 1,
                }
                .deserialize(de)
                .map(Value::Record)
            }
            FieldType::Array { elem, size } => {
                let visitor = ArrayVisitor {
                    elem,
                    size: *size,
                    package: self.package,
                    schemas: self.schemas,
                    depth: self.depth,
                };
                match size {
                    // fixed arrays carry no length prefix
                    ArraySize::Fixed(n) => de.deserialize_tuple(*n, visitor),
                    ArraySize::Bounded(_) | ArraySize::Unbounded => de.deserialize_seq(visitor),
                }
                .map(Value::Array)
            }
        }
    }
}

struct ArrayVisitor<'a> {
    elem: &'a FieldType,
    size: ArraySize,
    package: Option<&'a str>,
    schemas: &'a dyn SchemaLookup,
    depth: usize,
}

impl ArrayVisitor<'_> {
    fn seed(&self) -> ValueSeed<'_> {
        ValueSeed {
            ty: self.elem,
            package: self.package,
            schemas: self.schemas,
            depth: self.depth,
        }
    }
}

impl<'de> Visitor<'de> for ArrayVisitor<'_> {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cdr array of {}", self.elem)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let len = match self.size {
            ArraySize::Fixed(n) => Some(n),
            _ => seq.size_hint(),
        };
        let mut out = Vec::with_capacity(len.unwrap_or(0));

        if let Some(len) = len {
            for _ in 0..len {
                let v = seq
                    .next_element_seed(self.seed())?
                    .ok_or_else(|| de::Error::custom("short array"))?;
                out.push(v);
            }
        } else {
            while let Some(v) = seq.next_element_seed(self.seed())? {
                out.push(v);
            }
        }

        if let ArraySize::Bounded(bound) = self.size {
            if out.len() > bound {
                return Err(de::Error::custom(format!(
                    "array of {} elements exceeds bound {}",
                    out.len(),
                    bound
                )));
            }
        }
        Ok(out)
    }
}

/// Maps whichever scalar the deserializer produced onto [`Value`].
struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cdr scalar")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
    fn visit_i8<E: de::Error>(self, v: i8) -> Result<Value, E> {
        Ok(Value::I8(v))
    }
    fn visit_u8<E: de::Error>(self, v: u8) -> Result<Value, E> {
        Ok(Value::U8(v))
    }
    fn visit_i16<E: de::Error>(self, v: i16) -> Result<Value, E> {
        Ok(Value::I16(v))
    }
    fn visit_u16<E: de::Error>(self, v: u16) -> Result<Value, E> {
        Ok(Value::U16(v))
    }
    fn visit_i32<E: de::Error>(self, v: i32) -> Result<Value, E> {
        Ok(Value::I32(v))
    }
    fn visit_u32<E: de::Error>(self, v: u32) -> Result<Value, E> {
        Ok(Value::U32(v))
    }
    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::I64(v))
    }
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::U64(v))
    }
    fn visit_f32<E: de::Error>(self, v: f32) -> Result<Value, E> {
        Ok(Value::F32(v))
    }
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::F64(v))
    }
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }
    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }
}
