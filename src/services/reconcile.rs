use crate::error::Result;
use crate::models::BuildStatus;
use crate::paths;
use crate::repository::{QueueStore, ResultStore};
use std::path::Path;

/// What a recovery pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub dangling_removed: usize,
    pub interrupted: usize,
    pub missing_status: usize,
    pub requeued: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Repairs the queue and results directories after an unclean shutdown.
///
/// Must run before the queue monitor starts. Builds that were running are
/// marked FAILED (there is no resuming), builds without a status are marked
/// FAILED, and waiting builds missing from the queue are re-admitted.
pub fn check_queues(lib_dir: &Path, queue: &dyn QueueStore) -> Result<RecoveryReport> {
    let results_dir = paths::results_dir(lib_dir);
    let mut report = RecoveryReport {
        dangling_removed: queue.prune_dangling()?,
        ..RecoveryReport::default()
    };

    for id in queue.running()? {
        tracing::info!("Setting build {} to FAILED, and removing it from the run queue", id);
        ResultStore::open(&results_dir, id).write_status(BuildStatus::Failed)?;
        queue.remove_run(id)?;
        report.interrupted += 1;
    }

    let waiting = queue.waiting()?;
    for entry in std::fs::read_dir(&results_dir)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(store) = ResultStore::from_dir(dir.clone()) else {
            tracing::warn!("Ignoring unexpected results entry {}", dir.display());
            continue;
        };

        match store.read_status() {
            None => {
                tracing::info!("Build {} has no usable STATUS, setting it to FAILED", store.id());
                store.write_status(BuildStatus::Failed)?;
                report.missing_status += 1;
            }
            Some(BuildStatus::Running) => {
                tracing::info!("Build {} was left RUNNING, setting it to FAILED", store.id());
                store.write_status(BuildStatus::Failed)?;
                report.interrupted += 1;
            }
            Some(BuildStatus::Waiting) if !waiting.contains(&store.id()) => {
                tracing::info!("Re-queueing waiting build {}", store.id());
                queue.enqueue(store.id())?;
                report.requeued += 1;
            }
            Some(_) => {}
        }
    }

    Ok(report)
}
