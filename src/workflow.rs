// src/workflow.rs

use anyhow::{bail, Context, Result};
use std::{collections::HashSet, path::PathBuf};
use tracing::{info, instrument, warn};

use crate::{
    bag::Rosbag2Reader,
    config::{TopicConfig, WorkflowConfig},
    frame::{export_csv, TimeFrame},
    msg::SchemaSet,
    table::{topic_to_table, TopicTable, TIMESTAMP_COLUMN},
};

fn log_missing(frame: &TimeFrame, trim: usize, stage: &str) {
    for stat in frame.missing_report(trim) {
        match stat.percent {
            Some(pct) => info!(stage, series = %stat.name, missing = stat.missing, percent = pct, "missing values"),
            None => warn!(stage, series = %stat.name, "series has no values"),
        }
    }
}

/// Apply the row-level steps of `t`: as-of merges, then extracted fields,
/// derived columns and edge markers.
fn prepare(
    reader: &Rosbag2Reader,
    schemas: &SchemaSet,
    t: &TopicConfig,
    mut table: TopicTable,
) -> Result<TopicTable> {
    for m in &t.merge_asof {
        let Some(other) = topic_to_table(reader, schemas, &m.topic, &m.options())? else {
            warn!(topic = %t.topic, merge = %m.topic, "skipping as-of merge without messages");
            continue;
        };
        let added: Vec<String> = other
            .column_names()
            .into_iter()
            .filter(|n| *n != TIMESTAMP_COLUMN)
            .map(str::to_string)
            .collect();
        table = table
            .join_asof(&other, m.tolerance())
            .with_context(|| format!("merging `{}` into `{}`", m.topic, t.topic))?;
        if m.fill_forward {
            for name in &added {
                table = table.fill_forward(name)?;
            }
        }
    }
    for f in &t.fields {
        table = table
            .with_field(&f.name, &f.column, &f.path(), f.scale)
            .with_context(|| format!("extracting `{}` on `{}`", f.name, t.topic))?;
    }
    for d in &t.derived {
        table = table
            .with_combined(&d.name, d.op, &d.columns())
            .with_context(|| format!("deriving `{}` on `{}`", d.name, t.topic))?;
    }
    for e in &t.edges {
        table = table
            .with_edges(&e.name, &e.column)
            .with_context(|| format!("marking edges of `{}` on `{}`", e.column, t.topic))?;
    }
    Ok(table)
}

/// Convert, align, fill and export as described by `cfg`. Returns the
/// path of the written CSV.
#[instrument(level = "info", skip(cfg), fields(bag = %cfg.bag.display()))]
pub fn run(cfg: &WorkflowConfig) -> Result<PathBuf> {
    // 1) schemas
    let mut schemas = SchemaSet::with_builtins();
    for dir in &cfg.schema_dirs {
        let n = schemas
            .load_dir(dir)
            .with_context(|| format!("loading schemas from {:?}", dir))?;
        info!(dir = %dir.display(), schemas = n, "loaded schema directory");
    }

    // 2) one resampled frame per topic, joined onto the first
    let reader = Rosbag2Reader::open(&cfg.bag)?;
    let period = cfg.resample_period();
    let mut frame: Option<TimeFrame> = None;
    let mut frozen = HashSet::new();

    for t in &cfg.topics {
        let Some(table) = topic_to_table(&reader, &schemas, &t.topic, &t.options())? else {
            warn!(topic = %t.topic, "skipping topic without messages");
            continue;
        };
        let table = prepare(&reader, &schemas, t, table)?;

        let mut resampled = TimeFrame::resample_mean(&table, period)?;
        if let Some(columns) = &t.columns {
            resampled = resampled
                .select(columns)
                .with_context(|| format!("selecting columns of `{}`", t.topic))?;
        }
        if !t.interpolate {
            frozen.extend(resampled.series().iter().map(|s| s.name.clone()));
        }

        frame = Some(match frame {
            None => resampled,
            Some(grid) => grid.join(&resampled)?,
        });
    }
    let Some(frame) = frame else {
        bail!("none of the {} configured topics had messages", cfg.topics.len());
    };

    // 3) fill short gaps
    log_missing(&frame, cfg.report_trim, "resampled");
    let frame = frame.interpolate_time_where(cfg.interpolate_limit, |name| !frozen.contains(name));
    log_missing(&frame, cfg.report_trim, "interpolated");

    // 4) cut and write
    let frame = match &cfg.output.window {
        Some(w) => frame.slice(w.start, w.end)?,
        None => frame,
    };
    export_csv(&frame, &cfg.output.dir, &cfg.output.name)
}
