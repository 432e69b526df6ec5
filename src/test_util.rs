// src/test_util.rs
//
// Builders for small rosbag2 recordings used across the test suites.

use anyhow::Result;
use byteorder::LittleEndian;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

/// Serialize `value` as a little-endian CDR payload, header included.
pub fn cdr_le<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = vec![0x00, 0x01, 0x00, 0x00];
    buf.extend(cdr_encoding::to_vec::<_, LittleEndian>(value).expect("cdr serialization"));
    buf
}

#[derive(Default)]
pub struct BagFixture {
    /// (name, type, serialization format)
    topics: Vec<(String, String, String)>,
    /// (storage file, topic, timestamp, payload)
    messages: Vec<(usize, String, i64, Vec<u8>)>,
    /// List storage files as `<bag>/<file>` like older recorders did.
    legacy_paths: bool,
}

impl BagFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(self, name: &str, msg_type: &str) -> Self {
        self.topic_with_format(name, msg_type, "cdr")
    }

    pub fn topic_with_format(mut self, name: &str, msg_type: &str, format: &str) -> Self {
        self.topics
            .push((name.to_string(), msg_type.to_string(), format.to_string()));
        self
    }

    pub fn message(self, topic: &str, timestamp: i64, data: Vec<u8>) -> Self {
        self.message_in(0, topic, timestamp, data)
    }

    /// Put a message in storage file `file` (`<name>_<file>.db3`).
    pub fn message_in(mut self, file: usize, topic: &str, timestamp: i64, data: Vec<u8>) -> Self {
        self.messages.push((file, topic.to_string(), timestamp, data));
        self
    }

    pub fn legacy_paths(mut self) -> Self {
        self.legacy_paths = true;
        self
    }

    fn file_count(&self) -> usize {
        self.messages.iter().map(|m| m.0 + 1).max().unwrap_or(1)
    }
}

fn write_db(path: &Path, fixture: &BagFixture, file: usize) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE schema(schema_version INTEGER PRIMARY KEY, ros_distro TEXT NOT NULL);
         CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL,
                             serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
         CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL,
                               timestamp INTEGER NOT NULL, data BLOB NOT NULL);
         INSERT INTO schema VALUES (3, 'humble');",
    )?;
    for (i, (topic, ty, format)) in fixture.topics.iter().enumerate() {
        conn.execute(
            "INSERT INTO topics(id, name, type, serialization_format, offered_qos_profiles)
             VALUES (?1, ?2, ?3, ?4, '')",
            params![i as i64 + 1, topic, ty, format],
        )?;
    }
    for (_, topic, ts, data) in fixture.messages.iter().filter(|m| m.0 == file) {
        let topic_id = fixture
            .topics
            .iter()
            .position(|(t, _, _)| t == topic)
            .map_or(0, |i| i as i64 + 1);
        conn.execute(
            "INSERT INTO messages(topic_id, timestamp, data) VALUES (?1, ?2, ?3)",
            params![topic_id, ts, data],
        )?;
    }
    Ok(())
}

/// Write `fixture` as `<root>/<name>/<name>_<i>.db3`, one database per
/// storage file, plus `metadata.yaml` when `with_metadata` is set. Returns
/// the bag directory.
pub fn write_bag(root: &Path, name: &str, fixture: &BagFixture, with_metadata: bool) -> Result<PathBuf> {
    let dir = root.join(name);
    fs::create_dir_all(&dir)?;
    let db_names: Vec<String> = (0..fixture.file_count())
        .map(|i| format!("{}_{}.db3", name, i))
        .collect();
    for (i, db_name) in db_names.iter().enumerate() {
        write_db(&dir.join(db_name), fixture, i)?;
    }

    if with_metadata {
        let start = fixture.messages.iter().map(|m| m.2).min().unwrap_or(0);
        let end = fixture.messages.iter().map(|m| m.2).max().unwrap_or(0);

        let mut yaml = String::new();
        writeln!(yaml, "rosbag2_bagfile_information:")?;
        writeln!(yaml, "  version: 5")?;
        writeln!(yaml, "  storage_identifier: sqlite3")?;
        writeln!(yaml, "  duration:\n    nanoseconds: {}", end - start)?;
        writeln!(yaml, "  starting_time:\n    nanoseconds_since_epoch: {}", start)?;
        writeln!(yaml, "  message_count: {}", fixture.messages.len())?;
        writeln!(yaml, "  topics_with_message_count:")?;
        for (topic, ty, format) in &fixture.topics {
            let count = fixture.messages.iter().filter(|m| &m.1 == topic).count();
            writeln!(yaml, "    - topic_metadata:")?;
            writeln!(yaml, "        name: {}", topic)?;
            writeln!(yaml, "        type: {}", ty)?;
            writeln!(yaml, "        serialization_format: {}", format)?;
            writeln!(yaml, "        offered_qos_profiles: \"\"")?;
            writeln!(yaml, "      message_count: {}", count)?;
        }
        writeln!(yaml, "  compression_format: \"\"")?;
        writeln!(yaml, "  compression_mode: \"\"")?;
        writeln!(yaml, "  relative_file_paths:")?;
        for db_name in &db_names {
            if fixture.legacy_paths {
                writeln!(yaml, "    - {}/{}", name, db_name)?;
            } else {
                writeln!(yaml, "    - {}", db_name)?;
            }
        }
        fs::write(dir.join("metadata.yaml"), yaml)?;
    }

    Ok(dir)
}
