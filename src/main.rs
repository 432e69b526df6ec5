use anyhow::Result;
use bagtable::{config::WorkflowConfig, logging, workflow};
use std::{env, path::PathBuf, time::Instant};
use tracing::info;

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    logging::init();

    // ─── 2) load workflow ────────────────────────────────────────────
    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("workflow.yaml"));
    let cfg = WorkflowConfig::load(&path)?;
    info!(
        workflow = %path.display(),
        topics = cfg.topics.len(),
        resample_ms = cfg.resample_ms,
        "startup"
    );

    // ─── 3) run ──────────────────────────────────────────────────────
    let t0 = Instant::now();
    let out = workflow::run(&cfg)?;
    info!(path = %out.display(), elapsed = ?t0.elapsed(), "done");
    Ok(())
}
