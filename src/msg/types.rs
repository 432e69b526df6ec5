// src/msg/types.rs

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Built-in ROS2 scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Byte,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        let p = match name {
            "bool" => Primitive::Bool,
            "byte" => Primitive::Byte,
            "char" => Primitive::Char,
            "int8" => Primitive::Int8,
            "uint8" => Primitive::UInt8,
            "int16" => Primitive::Int16,
            "uint16" => Primitive::UInt16,
            "int32" => Primitive::Int32,
            "uint32" => Primitive::UInt32,
            "int64" => Primitive::Int64,
            "uint64" => Primitive::UInt64,
            "float32" => Primitive::Float32,
            "float64" => Primitive::Float64,
            _ => return None,
        };
        Some(p)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Int8 => "int8",
            Primitive::UInt8 => "uint8",
            Primitive::Int16 => "int16",
            Primitive::UInt16 => "uint16",
            Primitive::Int32 => "int32",
            Primitive::UInt32 => "uint32",
            Primitive::Int64 => "int64",
            Primitive::UInt64 => "uint64",
            Primitive::Float32 => "float32",
            Primitive::Float64 => "float64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArraySize {
    /// `T[N]`, no length prefix on the wire.
    Fixed(usize),
    /// `T[<=N]`
    Bounded(usize),
    /// `T[]`
    Unbounded,
}

/// Type of a single declared field.
///
/// Declared in schema files as the usual ROS2 type strings:
/// `float64`, `string`, `string<=16`, `geometry_msgs/msg/Vector3`,
/// `float64[9]`, `uint8[<=64]`, `Vector3[]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Primitive(Primitive),
    String { bound: Option<usize> },
    /// Another message type, absolute (`pkg/msg/Type`, `pkg/Type`) or
    /// relative to the declaring package (`Type`).
    Nested(String),
    Array { elem: Box<FieldType>, size: ArraySize },
}

impl FieldType {
    pub fn is_nested(&self) -> bool {
        matches!(self, FieldType::Nested(_))
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            bail!("empty field type");
        }

        // arrays: `elem[...]`
        if let Some(body) = s.strip_suffix(']') {
            let open = body
                .rfind('[')
                .ok_or_else(|| anyhow!("unbalanced `]` in field type `{}`", s))?;
            let elem: FieldType = body[..open].parse()?;
            if matches!(elem, FieldType::Array { .. }) {
                bail!("nested arrays are not valid ROS2 field types: `{}`", s);
            }
            let inner = body[open + 1..].trim();
            let size = if inner.is_empty() {
                ArraySize::Unbounded
            } else if let Some(n) = inner.strip_prefix("<=") {
                ArraySize::Bounded(
                    n.trim()
                        .parse()
                        .with_context(|| format!("array bound in `{}`", s))?,
                )
            } else {
                ArraySize::Fixed(
                    inner
                        .parse()
                        .with_context(|| format!("array length in `{}`", s))?,
                )
            };
            return Ok(FieldType::Array {
                elem: Box::new(elem),
                size,
            });
        }

        if s == "string" {
            return Ok(FieldType::String { bound: None });
        }
        if let Some(n) = s.strip_prefix("string<=") {
            let bound = n
                .trim()
                .parse()
                .with_context(|| format!("string bound in `{}`", s))?;
            return Ok(FieldType::String { bound: Some(bound) });
        }
        if s.starts_with("wstring") {
            bail!("wstring fields are not supported");
        }
        if let Some(p) = Primitive::from_name(s) {
            return Ok(FieldType::Primitive(p));
        }

        let valid = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/');
        if !valid || s.starts_with('/') || s.ends_with('/') {
            bail!("invalid message type name `{}`", s);
        }
        Ok(FieldType::Nested(s.to_string()))
    }
}

impl TryFrom<String> for FieldType {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(ty: FieldType) -> Self {
        ty.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(p) => f.write_str(p.as_str()),
            FieldType::String { bound: None } => f.write_str("string"),
            FieldType::String { bound: Some(n) } => write!(f, "string<={}", n),
            FieldType::Nested(name) => f.write_str(name),
            FieldType::Array { elem, size } => match size {
                ArraySize::Fixed(n) => write!(f, "{}[{}]", elem, n),
                ArraySize::Bounded(n) => write!(f, "{}[<={}]", elem, n),
                ArraySize::Unbounded => write!(f, "{}[]", elem),
            },
        }
    }
}

/// A single named field of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// Declared layout of one message type. Field order is the wire order and
/// the column order of every table built from this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub fields: Vec<FieldDef>,
}

impl MessageSchema {
    /// Build a schema from `(field name, type string)` pairs.
    pub fn new<'a, I>(name: &str, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let fields = fields
            .into_iter()
            .map(|(field, ty)| {
                Ok(FieldDef {
                    name: field.to_string(),
                    ty: ty
                        .parse()
                        .with_context(|| format!("field `{}` of `{}`", field, name))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_string(),
            aliases: Vec::new(),
            fields,
        })
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `sbg_driver` for `sbg_driver/msg/SbgEkfNav`.
    pub fn package(&self) -> Option<&str> {
        self.name.split_once('/').map(|(pkg, _)| pkg)
    }
}
