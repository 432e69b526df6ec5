// src/bag/mod.rs

use anyhow::Result;
use serde::Serialize;

use crate::msg::{decode_cdr, Message, SchemaLookup};

pub mod metadata;
pub mod sqlite;

pub use metadata::{BagInfo, BagMetadata};
pub use sqlite::Rosbag2Reader;

/// One serialized message as stored in the bag.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub msg_type: String,
    /// Receive time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub msg_type: String,
    pub serialization_format: String,
    pub message_count: u64,
}

pub type MessageIter<'a> = Box<dyn Iterator<Item = Result<RawMessage>> + 'a>;

/// A readable recording, already scoped to one file/session.
pub trait BagSource {
    fn topics(&self) -> Result<Vec<TopicInfo>>;

    /// Messages of exactly `topic`, in recorded order.
    fn messages<'a>(&'a self, topic: &'a str) -> Result<MessageIter<'a>>;

    /// Decode `raw` with the layouts in `schemas`.
    fn deserialize(&self, raw: &RawMessage, schemas: &dyn SchemaLookup) -> Result<Message> {
        decode_cdr(&raw.msg_type, &raw.data, schemas)
    }
}
