pub mod decode;
pub mod registry;
pub mod types;
pub mod value;

pub use decode::decode_cdr;
pub use registry::{SchemaLookup, SchemaSet};
pub use types::{ArraySize, FieldDef, FieldType, MessageSchema, Primitive};
pub use value::{Message, Record, Value};
