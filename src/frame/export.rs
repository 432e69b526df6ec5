// src/frame/export.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::csv::WriterBuilder;
use chrono::Timelike;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::info;

use super::TimeFrame;

/// `<startMinute>_<startSecond>-<endMinute>_<endSecond>` of the frame's
/// first and last rows, without zero padding.
pub fn time_range_suffix(frame: &TimeFrame) -> Result<String> {
    let (start, end) = frame
        .start()
        .zip(frame.end())
        .ok_or_else(|| anyhow!("frame has no rows"))?;
    Ok(format!(
        "{}_{}-{}_{}",
        start.minute(),
        start.second(),
        end.minute(),
        end.second()
    ))
}

/// Write `frame` with a header row to `<dir>/<name><suffix>.csv` and return
/// the path. `dir` is created if needed.
pub fn export_csv<P: AsRef<Path>>(frame: &TimeFrame, dir: P, name: &str) -> Result<PathBuf> {
    let dir = dir.as_ref();
    if frame.is_empty() {
        bail!("refusing to export `{}`, the frame is empty", name);
    }

    // 1) Resolve the target path
    let fname = format!("{}{}.csv", name, time_range_suffix(frame)?);
    fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;

    // 2) Write through a temporary file in the same directory
    let batch = frame.to_record_batch()?;
    let final_path = write_atomic(dir, &fname, |file| {
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer.write(&batch)?;
        Ok(())
    })?;

    info!(path = %final_path.display(), rows = frame.len(), series = frame.series().len(), "exported csv");
    Ok(final_path)
}

/// Run `write` against a temporary file in `dir`, then move it to
/// `dir/fname`. The temporary file is removed when any step fails.
fn write_atomic<F>(dir: &Path, fname: &str, write: F) -> Result<PathBuf>
where
    F: FnOnce(&File) -> Result<()>,
{
    let final_path = dir.join(fname);
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating a temporary file in {:?}", dir))?;

    write(tmp.as_file()).with_context(|| format!("writing {:?}", tmp.path()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("flushing {:?}", tmp.path()))?;

    tmp.persist(&final_path)
        .with_context(|| format!("failed to move the export into `{}`", final_path.display()))?;
    Ok(final_path)
}
