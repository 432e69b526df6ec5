// src/bag/metadata.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use super::TopicInfo;

pub const METADATA_FILE: &str = "metadata.yaml";

#[derive(Debug, Deserialize)]
struct MetadataFile {
    rosbag2_bagfile_information: BagMetadata,
}

/// The parts of rosbag2's `metadata.yaml` we rely on.
#[derive(Debug, Clone, Deserialize)]
pub struct BagMetadata {
    pub version: u32,
    pub storage_identifier: String,
    #[serde(default)]
    pub relative_file_paths: Vec<String>,
    pub duration: Nanoseconds,
    pub starting_time: StartingTime,
    pub message_count: u64,
    #[serde(default)]
    pub topics_with_message_count: Vec<TopicWithCount>,
    #[serde(default)]
    pub compression_format: String,
    #[serde(default)]
    pub compression_mode: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Nanoseconds {
    pub nanoseconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartingTime {
    pub nanoseconds_since_epoch: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicWithCount {
    pub topic_metadata: TopicMetadata,
    pub message_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub serialization_format: String,
}

impl BagMetadata {
    /// Read `<dir>/metadata.yaml`.
    pub fn read<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(METADATA_FILE);
        let text = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {:?}", path))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: MetadataFile = serde_yaml::from_str(text)?;
        Ok(file.rosbag2_bagfile_information)
    }

    pub fn is_compressed(&self) -> bool {
        !self.compression_mode.is_empty() || !self.compression_format.is_empty()
    }

    pub fn topics(&self) -> Vec<TopicInfo> {
        self.topics_with_message_count
            .iter()
            .map(|t| TopicInfo {
                name: t.topic_metadata.name.clone(),
                msg_type: t.topic_metadata.msg_type.clone(),
                serialization_format: t.topic_metadata.serialization_format.clone(),
                message_count: t.message_count,
            })
            .collect()
    }
}

/// Summary of a recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BagInfo {
    pub storage: String,
    pub duration_ns: u64,
    pub start_time_ns: i64,
    pub message_count: u64,
    pub topics: Vec<TopicInfo>,
}

impl BagInfo {
    pub fn duration_secs(&self) -> f64 {
        self.duration_ns as f64 * 1e-9
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.start_time_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMBLE_METADATA: &str = r#"
rosbag2_bagfile_information:
  version: 5
  storage_identifier: sqlite3
  duration:
    nanoseconds: 2500000000
  starting_time:
    nanoseconds_since_epoch: 1626794051000000000
  message_count: 3
  topics_with_message_count:
    - topic_metadata:
        name: /sbg/ekf_nav
        type: sbg_driver/msg/SbgEkfNav
        serialization_format: cdr
        offered_qos_profiles: "- history: 3\n  depth: 0\n"
      message_count: 2
    - topic_metadata:
        name: /waverunner/sys/status/logging_marker
        type: std_msgs/msg/Bool
        serialization_format: cdr
        offered_qos_profiles: ""
      message_count: 1
  compression_format: ""
  compression_mode: ""
  relative_file_paths:
    - rosbag2_2021_07_20-17_12_08_0.db3
  files:
    - path: rosbag2_2021_07_20-17_12_08_0.db3
      starting_time:
        nanoseconds_since_epoch: 1626794051000000000
      duration:
        nanoseconds: 2500000000
      message_count: 3
"#;

    #[test]
    fn parses_rosbag2_metadata() {
        let md = BagMetadata::from_yaml(HUMBLE_METADATA).unwrap();
        assert_eq!(md.storage_identifier, "sqlite3");
        assert_eq!(md.relative_file_paths.len(), 1);
        assert_eq!(md.message_count, 3);
        assert!(!md.is_compressed());

        let topics = md.topics();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "/sbg/ekf_nav");
        assert_eq!(topics[0].msg_type, "sbg_driver/msg/SbgEkfNav");
        assert_eq!(topics[0].message_count, 2);
    }

    #[test]
    fn info_time_helpers() {
        let info = BagInfo {
            storage: "sqlite3".into(),
            duration_ns: 2_500_000_000,
            start_time_ns: 1_626_794_051_000_000_000,
            message_count: 3,
            topics: vec![],
        };
        assert!((info.duration_secs() - 2.5).abs() < 1e-12);
        assert_eq!(info.start_time().timestamp(), 1_626_794_051);
    }

    #[test]
    fn info_serializes_to_json() -> anyhow::Result<()> {
        let md = BagMetadata::from_yaml(HUMBLE_METADATA)?;
        let info = BagInfo {
            storage: md.storage_identifier.clone(),
            duration_ns: md.duration.nanoseconds,
            start_time_ns: md.starting_time.nanoseconds_since_epoch,
            message_count: md.message_count,
            topics: md.topics(),
        };
        let json = serde_json::to_value(&info)?;
        assert_eq!(json["storage"], "sqlite3");
        assert_eq!(json["message_count"], 3);
        assert_eq!(json["topics"][1]["name"], "/waverunner/sys/status/logging_marker");
        assert_eq!(json["topics"][0]["message_count"], 2);
        Ok(())
    }
}
