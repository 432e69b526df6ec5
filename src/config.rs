// src/config.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::table::{Combine, TopicOptions};

fn default_resample_ms() -> u64 {
    40
}

fn default_interpolate_limit() -> usize {
    3
}

fn default_report_trim() -> usize {
    100
}

fn default_tolerance_ms() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_output_name() -> String {
    "export".to_string()
}

/// A full bag → CSV run, read from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// rosbag2 directory or single `.db3` file.
    pub bag: PathBuf,
    #[serde(default)]
    pub schema_dirs: Vec<PathBuf>,
    #[serde(default = "default_resample_ms")]
    pub resample_ms: u64,
    /// Most values filled per gap.
    #[serde(default = "default_interpolate_limit")]
    pub interpolate_limit: usize,
    /// Rows ignored at each end of the missing-value report.
    #[serde(default = "default_report_trim")]
    pub report_trim: usize,
    /// The first topic with messages defines the time grid.
    pub topics: Vec<TopicConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
    pub topic: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Topics attached row by row before anything else runs.
    #[serde(default)]
    pub merge_asof: Vec<AsofConfig>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub derived: Vec<DerivedConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    /// Series that join the frame; all numeric columns when unset.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Whether this topic's series take part in gap filling.
    #[serde(default = "default_true")]
    pub interpolate: bool,
}

/// Another topic joined onto this one with [`TopicTable::join_asof`].
///
/// [`TopicTable::join_asof`]: crate::table::TopicTable::join_asof
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AsofConfig {
    pub topic: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,
    /// Carry the last matched value over unmatched rows.
    #[serde(default)]
    pub fill_forward: bool,
}

/// A column computed from several numeric columns, e.g. a speed from its
/// components.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedConfig {
    pub name: String,
    pub op: Combine,
    pub columns: Vec<String>,
}

/// Start/stop markers computed from a column.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    pub name: String,
    pub column: String,
}

/// A sub-field pulled out of a struct column into its own column.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_output_name")]
    pub name: String,
    #[serde(default)]
    pub window: Option<Window>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            name: default_output_name(),
            window: None,
        }
    }
}

/// Inclusive export window.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TopicConfig {
    pub fn options(&self) -> TopicOptions {
        TopicOptions {
            exclude: self.exclude.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

impl AsofConfig {
    pub fn options(&self) -> TopicOptions {
        TopicOptions {
            exclude: self.exclude.clone(),
            prefix: self.prefix.clone(),
        }
    }

    pub fn tolerance(&self) -> Duration {
        Duration::milliseconds(self.tolerance_ms as i64)
    }
}

impl DerivedConfig {
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }
}

impl FieldConfig {
    pub fn path(&self) -> Vec<&str> {
        self.path.iter().map(String::as_str).collect()
    }
}

impl WorkflowConfig {
    /// Read and validate `path`. Relative paths inside the file are taken
    /// relative to the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let mut cfg = Self::from_yaml(&text).with_context(|| format!("parsing {:?}", path))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        cfg.bag = base.join(&cfg.bag);
        for dir in &mut cfg.schema_dirs {
            *dir = base.join(&*dir);
        }
        cfg.output.dir = base.join(&cfg.output.dir);
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn resample_period(&self) -> Duration {
        Duration::milliseconds(self.resample_ms as i64)
    }

    fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            bail!("workflow lists no topics");
        }
        if self.resample_ms == 0 {
            bail!("resample_ms must be positive");
        }
        if self.output.name.is_empty() {
            bail!("output.name must not be empty");
        }
        if let Some(w) = &self.output.window {
            if w.start > w.end {
                bail!("output window starts at {} after it ends at {}", w.start, w.end);
            }
        }
        for t in &self.topics {
            for f in &t.fields {
                if f.name.is_empty() || f.column.is_empty() {
                    bail!("field on `{}` needs both a name and a column", t.topic);
                }
            }
            for d in &t.derived {
                if d.name.is_empty() || d.columns.is_empty() {
                    bail!("derived column on `{}` needs a name and at least one input", t.topic);
                }
            }
            for e in &t.edges {
                if e.name.is_empty() || e.column.is_empty() {
                    bail!("edges on `{}` need both a name and a column", t.topic);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const WORKFLOW: &str = r#"
bag: logs_2021/rosbag2_2021_07_20-17_12_08
schema_dirs: [ros_msg_def/sbg]
topics:
  - topic: /sbg/ekf_nav
    prefix: ekf_nav/
    exclude: [header, time_stamp]
    fields:
      - { name: ekf_nav/longitude, column: ekf_nav/position, path: [y] }
    columns: [ekf_nav/longitude]
  - topic: /waverunner/sys/log/log2_tcu
output:
  name: heading-test-0720
  window: { start: 2021-07-20T17:14:00Z, end: 2021-07-20T17:16:30Z }
"#;

    #[test]
    fn parses_workflow_with_defaults() -> Result<()> {
        let cfg = WorkflowConfig::from_yaml(WORKFLOW)?;
        assert_eq!(cfg.resample_ms, 40);
        assert_eq!(cfg.resample_period(), Duration::milliseconds(40));
        assert_eq!(cfg.interpolate_limit, 3);
        assert_eq!(cfg.topics.len(), 2);
        assert_eq!(cfg.output.dir, PathBuf::from("output"));

        let nav = &cfg.topics[0];
        let opts = nav.options();
        assert_eq!(opts.prefix.as_deref(), Some("ekf_nav/"));
        assert_eq!(opts.exclude, vec!["header", "time_stamp"]);
        assert_eq!(nav.fields[0].path(), vec!["y"]);
        assert!(cfg.topics[1].columns.is_none());
        assert!(nav.interpolate);
        assert!(nav.merge_asof.is_empty() && nav.derived.is_empty() && nav.edges.is_empty());

        let window = cfg.output.window.unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2021, 7, 20, 17, 14, 0).unwrap());
        Ok(())
    }

    #[test]
    fn parses_derived_edges_and_asof_merges() -> Result<()> {
        let cfg = WorkflowConfig::from_yaml(
            r#"
bag: x
topics:
  - topic: /sbg/ekf_nav
    derived:
      - { name: ekf_nav/speed, op: norm, columns: [ekf_nav/vel_x, ekf_nav/vel_y] }
  - topic: /waverunner/sys/log/log_pdu
    interpolate: false
    merge_asof:
      - { topic: /waverunner/sys/log/log_marker, prefix: log_m/, fill_forward: true }
    edges:
      - { name: log_m/start_stop, column: log_m/data }
"#,
        )?;
        let nav = &cfg.topics[0];
        assert_eq!(nav.derived[0].op, Combine::Norm);
        assert_eq!(nav.derived[0].columns(), vec!["ekf_nav/vel_x", "ekf_nav/vel_y"]);

        let pdu = &cfg.topics[1];
        assert!(!pdu.interpolate);
        let asof = &pdu.merge_asof[0];
        assert_eq!(asof.tolerance(), Duration::milliseconds(1));
        assert!(asof.fill_forward);
        assert_eq!(asof.options().prefix.as_deref(), Some("log_m/"));
        assert_eq!(pdu.edges[0].column, "log_m/data");

        let no_inputs = "bag: x\ntopics: [{topic: /a, derived: [{name: s, op: sum, columns: []}]}]\n";
        assert!(WorkflowConfig::from_yaml(no_inputs).is_err());
        let bad_op = "bag: x\ntopics: [{topic: /a, derived: [{name: s, op: max, columns: [b]}]}]\n";
        assert!(WorkflowConfig::from_yaml(bad_op).is_err());
        Ok(())
    }

    #[test]
    fn rejects_bad_workflows() {
        assert!(WorkflowConfig::from_yaml("bag: x\ntopics: []\n").is_err());
        assert!(WorkflowConfig::from_yaml("bag: x\nresample_ms: 0\ntopics: [{topic: /a}]\n").is_err());
        assert!(WorkflowConfig::from_yaml("bag: x\ntopics: [{topic: /a, bogus: 1}]\n").is_err());
        let reversed = "bag: x\ntopics: [{topic: /a}]\noutput:\n  window: { start: 2021-07-20T17:16:00Z, end: 2021-07-20T17:14:00Z }\n";
        assert!(WorkflowConfig::from_yaml(reversed).is_err());
    }

    #[test]
    fn load_resolves_paths_next_to_the_file() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("workflow.yaml");
        fs::write(&file, "bag: bags/run1\nschema_dirs: [defs]\ntopics: [{topic: /a}]\n")?;

        let cfg = WorkflowConfig::load(&file)?;
        assert_eq!(cfg.bag, dir.path().join("bags/run1"));
        assert_eq!(cfg.schema_dirs, vec![dir.path().join("defs")]);
        assert_eq!(cfg.output.dir, dir.path().join("output"));
        Ok(())
    }
}
