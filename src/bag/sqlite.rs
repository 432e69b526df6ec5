// src/bag/sqlite.rs

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use super::metadata::{BagInfo, BagMetadata};
use super::{BagSource, MessageIter, RawMessage, TopicInfo};

const STORAGE_ID: &str = "sqlite3";

/// Reader for rosbag2 recordings stored with the `sqlite3` plugin.
///
/// Either a bag directory (`metadata.yaml` + `*.db3`) or a bare `.db3` file.
/// All database handles are read-only and released when the reader drops.
pub struct Rosbag2Reader {
    path: PathBuf,
    metadata: Option<BagMetadata>,
    files: Vec<StorageFile>,
}

struct StorageFile {
    path: PathBuf,
    conn: Connection,
}

impl StorageFile {
    fn open(path: PathBuf) -> Result<Self> {
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening bag storage {:?}", path))?;
        Ok(Self { path, conn })
    }

    fn topics(&self) -> Result<Vec<TopicInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name, t.type, t.serialization_format,
                    (SELECT COUNT(*) FROM messages m WHERE m.topic_id = t.id)
             FROM topics t ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TopicInfo {
                name: row.get(0)?,
                msg_type: row.get(1)?,
                serialization_format: row.get(2)?,
                message_count: row.get::<_, i64>(3)? as u64,
            })
        })?;
        let topics = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("listing topics of {:?}", self.path))?;
        Ok(topics)
    }

    fn read_topic(&self, topic: &str) -> Result<Vec<RawMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.type, t.serialization_format, m.timestamp, m.data
             FROM messages m JOIN topics t ON m.topic_id = t.id
             WHERE t.name = ?1
             ORDER BY m.timestamp, m.id",
        )?;
        let rows = stmt.query_map([topic], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (msg_type, format, timestamp, data) =
                row.with_context(|| format!("reading `{}` from {:?}", topic, self.path))?;
            if format != "cdr" {
                bail!(
                    "topic `{}` uses serialization format `{}`, only cdr is supported",
                    topic,
                    format
                );
            }
            out.push(RawMessage {
                topic: topic.to_string(),
                msg_type,
                timestamp,
                data,
            });
        }
        debug!(topic, file = %self.path.display(), count = out.len(), "read messages");
        Ok(out)
    }

    /// (count, first timestamp, last timestamp)
    fn span(&self) -> Result<(u64, Option<i64>, Option<i64>)> {
        let (count, start, end) = self.conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM messages",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )?;
        Ok((count as u64, start, end))
    }
}

impl Rosbag2Reader {
    #[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_dir() {
            if !path.is_file() {
                bail!("bag {:?} does not exist", path);
            }
            let files = vec![StorageFile::open(path.clone())?];
            info!("opened bare sqlite bag");
            return Ok(Self {
                path,
                metadata: None,
                files,
            });
        }

        let metadata = BagMetadata::read(&path)?;
        if metadata.storage_identifier != STORAGE_ID {
            bail!(
                "unsupported storage `{}` in {:?}, expected {}",
                metadata.storage_identifier,
                path,
                STORAGE_ID
            );
        }
        if metadata.is_compressed() {
            bail!(
                "compressed bags are not supported ({} / {})",
                metadata.compression_format,
                metadata.compression_mode
            );
        }

        let mut files = Vec::with_capacity(metadata.relative_file_paths.len());
        for rel in &metadata.relative_file_paths {
            let mut file = path.join(rel);
            // older recorders stored the bag directory name in the relative path
            if !file.exists() {
                if let Some(name) = Path::new(rel).file_name() {
                    warn!(listed = %rel, "storage file not found, trying bag directory");
                    file = path.join(name);
                }
            }
            files.push(StorageFile::open(file)?);
        }
        if files.is_empty() {
            bail!("bag {:?} lists no storage files", path);
        }

        info!(files = files.len(), messages = metadata.message_count, "opened bag");
        Ok(Self {
            path,
            metadata: Some(metadata),
            files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> Option<&BagMetadata> {
        self.metadata.as_ref()
    }

    /// Duration, start time, message count and topics. Taken from
    /// `metadata.yaml` when present, otherwise queried from the database.
    pub fn info(&self) -> Result<BagInfo> {
        if let Some(md) = &self.metadata {
            return Ok(BagInfo {
                storage: md.storage_identifier.clone(),
                duration_ns: md.duration.nanoseconds,
                start_time_ns: md.starting_time.nanoseconds_since_epoch,
                message_count: md.message_count,
                topics: md.topics(),
            });
        }

        let mut count = 0;
        let mut start: Option<i64> = None;
        let mut end: Option<i64> = None;
        for file in &self.files {
            let (n, s, e) = file.span()?;
            count += n;
            start = match (start, s) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            end = match (end, e) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        let start_time_ns = start.unwrap_or(0);
        let duration_ns = end.map_or(0, |e| (e - start_time_ns).max(0) as u64);

        Ok(BagInfo {
            storage: STORAGE_ID.to_string(),
            duration_ns,
            start_time_ns,
            message_count: count,
            topics: self.topics()?,
        })
    }
}

impl BagSource for Rosbag2Reader {
    /// Topics across all storage files, first-seen order, counts summed.
    fn topics(&self) -> Result<Vec<TopicInfo>> {
        let mut merged: Vec<TopicInfo> = Vec::new();
        for file in &self.files {
            for topic in file.topics()? {
                match merged.iter_mut().find(|t| t.name == topic.name) {
                    Some(existing) => existing.message_count += topic.message_count,
                    None => merged.push(topic),
                }
            }
        }
        Ok(merged)
    }

    fn messages<'a>(&'a self, topic: &'a str) -> Result<MessageIter<'a>> {
        // storage files are split chronologically, read them one at a time
        let iter = self.files.iter().flat_map(move |file| {
            let batch: Vec<Result<RawMessage>> = match file.read_topic(topic) {
                Ok(rows) => rows.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            batch
        });
        Ok(Box::new(iter))
    }
}
