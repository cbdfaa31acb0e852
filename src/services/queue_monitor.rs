use crate::config::Config;
use crate::error::{AppError, Result};
use crate::executor::{BuildExecutor, CancelCheck, run_simulated};
use crate::logging::BuildLogs;
use crate::models::{BuildStatus, TimestampKind};
use crate::paths;
use crate::repository::{QueueStore, ResultStore, UploadStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of one pass of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStep {
    /// Nothing was waiting.
    Idle,
    /// The oldest entry was cancelled before it could be promoted.
    Raced(Uuid),
    Built { id: Uuid, status: BuildStatus },
}

/// Runs queued builds one at a time, forever.
pub struct QueueMonitor<E> {
    results_dir: PathBuf,
    queue: Arc<dyn QueueStore>,
    uploads: Arc<dyn UploadStore>,
    executor: Arc<E>,
    build_logs: BuildLogs,
    interval: Duration,
    simulated_build: Duration,
}

impl<E: BuildExecutor> QueueMonitor<E> {
    pub fn new(
        config: &Config,
        queue: Arc<dyn QueueStore>,
        uploads: Arc<dyn UploadStore>,
        executor: E,
        build_logs: BuildLogs,
    ) -> Self {
        Self {
            results_dir: paths::results_dir(&config.lib_dir),
            queue,
            uploads,
            executor: Arc::new(executor),
            build_logs,
            interval: config.monitor_interval(),
            simulated_build: config.simulated_build(),
        }
    }

    pub async fn run(self) {
        tracing::info!("Queue monitor started");
        loop {
            match self.run_next().await {
                Ok(MonitorStep::Idle) => tokio::time::sleep(self.interval).await,
                Ok(MonitorStep::Raced(id)) => {
                    tracing::debug!("Build {} left the queue before it could start", id);
                }
                Ok(MonitorStep::Built { id, status }) => {
                    tracing::info!("Build {} is {}", id, status);
                }
                Err(e) => {
                    tracing::error!("Queue monitor error: {}", e);
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    /// Takes the oldest waiting build, if any, and runs it to completion.
    pub async fn run_next(&self) -> Result<MonitorStep> {
        let Some(id) = self.queue.next()? else {
            return Ok(MonitorStep::Idle);
        };
        if !self.queue.promote(id)? {
            return Ok(MonitorStep::Raced(id));
        }

        let store = ResultStore::open(&self.results_dir, id);
        let status = {
            let _logs = match self.build_logs.attach(&store.logs_dir()) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!("Cannot capture logs for build {}: {}", id, e);
                    None
                }
            };

            tracing::info!("Starting build {}", id);
            let status = match self.build(&store).await {
                Ok(()) => {
                    tracing::info!("Finished build {}, results are in {}", id, store.path().display());
                    BuildStatus::Finished
                }
                Err(e) => {
                    tracing::error!("Build {} failed: {}", id, e);
                    BuildStatus::Failed
                }
            };
            self.finalize(&store, status);
            status
        };

        self.queue.demote(id)?;
        Ok(MonitorStep::Built { id, status })
    }

    async fn build(&self, store: &ResultStore) -> Result<()> {
        store.write_status(BuildStatus::Running)?;
        store.write_timestamp(TimestampKind::Started)?;

        let config = store.read_config()?;
        let results_dir = store.path().to_path_buf();
        let test_mode = store.test_mode();
        let cancel: CancelCheck = {
            let store = store.clone();
            Arc::new(move || store.is_cancel_requested())
        };
        let executor = Arc::clone(&self.executor);
        let simulated_build = self.simulated_build;

        // A separate task so a panicking executor only fails this build.
        let task = tokio::spawn(async move {
            match test_mode {
                Some(mode) => {
                    run_simulated(mode, &config, &results_dir, simulated_build, &cancel).await
                }
                None => executor.run_build(config, results_dir, cancel).await,
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Execution(format!("Build task died: {}", e))),
        }
    }

    // The finish time goes first: a canceller may delete the build as soon
    // as it sees the terminal status.
    fn finalize(&self, store: &ResultStore, status: BuildStatus) {
        if let Err(e) = store.write_timestamp(TimestampKind::Finished) {
            tracing::error!("Failed to write finish time for build {}: {}", store.id(), e);
        }
        if let Err(e) = store.write_status(status) {
            tracing::error!("Failed to write {} for build {}: {}", status, store.id(), e);
        }
        if status == BuildStatus::Finished {
            self.ready_uploads(store);
        }
    }

    fn ready_uploads(&self, store: &ResultStore) {
        let pending = store
            .read_config()
            .and_then(|config| Ok((store.image_path(&config), store.upload_ids()?)));
        let (image_path, upload_ids) = match pending {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Cannot ready uploads for build {}: {}", store.id(), e);
                return;
            }
        };

        for upload_id in upload_ids {
            tracing::info!("Readying upload {}", upload_id);
            if let Err(e) = self.uploads.ready_upload(upload_id, &image_path) {
                tracing::error!("Failed to ready upload {}: {}", upload_id, e);
            }
        }
    }
}
