use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    BuildConfig, BuildDetail, BuildInfo, BuildStatus, Nevra, QueueStatus,
};
use crate::paths;
use crate::repository::result_store::FINAL_KICKSTART;
use crate::repository::{LiveLogs, NewBuild, QueueStore, ResultStore, TarSelection, UploadStore};
use crate::services::{Depsolver, RecipeSource};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A request to build `blueprint_name` from `branch`.
#[derive(Debug, Clone)]
pub struct StartBuild {
    pub blueprint_name: String,
    pub branch: String,
    pub compose_type: String,
    /// 0 for a real build, 1 or more for a simulated one.
    pub test_mode: u8,
    pub upload: Option<UploadRequest>,
}

/// An upload to send the image to once the build finishes.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub provider: String,
    pub image_name: String,
    pub settings: toml::Table,
}

/// Build admission, cancellation, deletion and queries.
///
/// Shares nothing with the queue monitor except the filesystem.
#[derive(Clone)]
pub struct ComposeService {
    config: Arc<Config>,
    queue: Arc<dyn QueueStore>,
    uploads: Arc<dyn UploadStore>,
    recipes: Arc<Mutex<Box<dyn RecipeSource>>>,
    depsolver: Arc<Mutex<Box<dyn Depsolver>>>,
}

impl ComposeService {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<dyn QueueStore>,
        uploads: Arc<dyn UploadStore>,
        recipes: Box<dyn RecipeSource>,
        depsolver: Box<dyn Depsolver>,
    ) -> Self {
        Self {
            config,
            queue,
            uploads,
            recipes: Arc::new(Mutex::new(recipes)),
            depsolver: Arc::new(Mutex::new(depsolver)),
        }
    }

    fn results_dir(&self) -> PathBuf {
        paths::results_dir(&self.config.lib_dir)
    }

    fn store(&self, id: Uuid) -> ResultStore {
        ResultStore::open(&self.results_dir(), id)
    }

    fn existing_store(&self, id: Uuid) -> Result<ResultStore> {
        let store = self.store(id);
        if !store.exists() {
            return Err(AppError::BuildNotFound(id.to_string()));
        }
        Ok(store)
    }

    fn live_logs(&self) -> LiveLogs {
        LiveLogs {
            installer: self.config.installer_log.clone(),
            packaging: self.config.packaging_log.clone(),
        }
    }

    /// Admits a build and returns its id.
    ///
    /// Nothing is left on disk when any step fails.
    pub async fn start_build(&self, request: StartBuild) -> Result<Uuid> {
        let allowed = self.compose_types()?;
        if !allowed.contains(&request.compose_type) {
            return Err(AppError::InvalidComposeType {
                compose_type: request.compose_type,
                allowed,
            });
        }

        let (commit_id, recipe) = {
            let recipes = Arc::clone(&self.recipes);
            let branch = request.branch.clone();
            let name = request.blueprint_name.clone();
            run_blocking(move || recipes.blocking_lock().read_recipe_and_id(&branch, &name))
                .await?
        };

        let projects = recipe.projects();
        let deps = {
            let depsolver = Arc::clone(&self.depsolver);
            run_blocking(move || depsolver.blocking_lock().depsolve(&projects)).await?
        };
        tracing::debug!("Depsolved {} into {} packages", recipe.name, deps.len());

        let template_path =
            paths::templates_dir(&self.config.share_dir).join(format!("{}.ks", request.compose_type));
        let template = std::fs::read_to_string(&template_path)?;

        let id = Uuid::new_v4();
        let results_dir = self.results_dir();
        let build_dir = results_dir.join(id.to_string());
        let config = BuildConfig::for_compose_type(
            &request.compose_type,
            build_dir.join(FINAL_KICKSTART),
            build_dir.join("logs"),
            std::env::consts::ARCH,
        )
        .ok_or_else(|| AppError::InvalidComposeType {
            compose_type: request.compose_type.clone(),
            allowed: allowed.clone(),
        })?;

        let build = NewBuild {
            frozen: recipe.freeze(&deps),
            kickstart: final_kickstart(&template, &deps),
            recipe,
            commit_id,
            deps,
            config,
            template_name: request.compose_type.clone(),
            template,
            test_mode: request.test_mode,
        };
        let store = ResultStore::create(&results_dir, id, &build)?;

        if let Err(e) = self.admit(&store, request.upload) {
            tracing::error!("Failed to queue build {}: {}", id, e);
            let _ = self.queue.remove_new(id);
            if let Err(cleanup) = store.delete(self.uploads.as_ref()) {
                tracing::error!("Failed to clean up build {}: {}", id, cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            "Queued {} build {} of {} {}",
            request.compose_type,
            id,
            build.recipe.name,
            build.recipe.version
        );
        Ok(id)
    }

    fn admit(&self, store: &ResultStore, upload: Option<UploadRequest>) -> Result<()> {
        if let Some(upload) = upload {
            let upload_id =
                self.uploads
                    .create_upload(&upload.provider, &upload.image_name, upload.settings)?;
            store.add_upload(upload_id)?;
        }
        self.queue.enqueue(store.id())
    }

    /// Compose types with both a kickstart template and a known build
    /// configuration, sorted by name.
    pub fn compose_types(&self) -> Result<Vec<String>> {
        let templates = paths::templates_dir(&self.config.share_dir);
        let entries = match std::fs::read_dir(&templates) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("No kickstart templates in {}", templates.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut types = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(compose_type) = name.strip_suffix(".ks") {
                if crate::models::is_known_compose_type(compose_type) {
                    types.push(compose_type.to_string());
                }
            }
        }
        types.sort();
        Ok(types)
    }

    fn details(&self, ids: Vec<Uuid>) -> Vec<BuildDetail> {
        ids.into_iter()
            .filter_map(|id| match self.store(id).detail(self.uploads.as_ref()) {
                Ok(detail) => Some(detail),
                Err(e) => {
                    tracing::debug!("Skipping build {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            new: self.details(self.queue.waiting()?),
            run: self.details(self.queue.running()?),
        })
    }

    /// Every readable build, oldest first, optionally only those in `filter`.
    pub fn build_status(&self, filter: Option<BuildStatus>) -> Result<Vec<BuildDetail>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.results_dir())? {
            let path = entry?.path();
            if let Some(store) = ResultStore::from_dir(path) {
                ids.push(store.id());
            }
        }

        let mut details: Vec<BuildDetail> = self
            .details(ids)
            .into_iter()
            .filter(|detail| filter.is_none_or(|status| detail.queue_status == status))
            .collect();
        details.sort_by(|a, b| {
            a.job_created
                .partial_cmp(&b.job_created)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        Ok(details)
    }

    pub fn uuid_status(&self, id: Uuid) -> Option<BuildDetail> {
        let store = self.store(id);
        if !store.exists() {
            return None;
        }
        self.details(vec![id]).pop()
    }

    pub fn uuid_info(&self, id: Uuid) -> Result<BuildInfo> {
        let store = self.existing_store(id)?;
        let status = store
            .read_status()
            .ok_or_else(|| AppError::InvalidState(format!("Build {} has no status", id)))?;
        let config = store.read_config()?;

        Ok(BuildInfo {
            id,
            commit: store.read_commit()?,
            blueprint: store.read_frozen()?,
            deps: store.read_deps()?,
            compose_type: config.compose_type.clone(),
            queue_status: status,
            image_size: store.image_size(status, &config),
            uploads: self.uploads.get_uploads(&store.upload_ids()?)?,
            config,
        })
    }

    /// The last `size_kb` KiB of the most relevant log for the build.
    pub fn uuid_log(&self, id: Uuid, size_kb: u64) -> Result<String> {
        let store = self.existing_store(id)?;
        let running = store.read_status() == Some(BuildStatus::Running);
        store.tail_log(size_kb, running, &self.live_logs())
    }

    pub fn uuid_tar(
        &self,
        id: Uuid,
        selection: TarSelection,
    ) -> Result<tokio::process::ChildStdout> {
        self.existing_store(id)?.tar(&self.config.tar_path, selection)
    }

    /// Stops a build and removes it.
    ///
    /// Returns `false` for unknown builds, for builds that had already
    /// ended, and for builds that finished before the cancel took effect.
    pub async fn uuid_cancel(&self, id: Uuid) -> Result<bool> {
        let store = self.store(id);
        match store.read_status() {
            None => return Ok(false),
            Some(status) if status.is_terminal() => return Ok(false),
            Some(_) => {}
        }

        // Still waiting: the monitor can no longer promote it once the link
        // is gone.
        if self.queue.remove_new(id)? && store.read_status() == Some(BuildStatus::Waiting) {
            tracing::info!("Cancelled waiting build {}", id);
            self.uuid_delete(id)?;
            return Ok(true);
        }

        store.request_cancel()?;
        let deadline = tokio::time::Instant::now() + self.config.cancel_timeout();
        loop {
            match store.read_status() {
                Some(BuildStatus::Failed) => {
                    tracing::info!("Cancelled running build {}", id);
                    self.uuid_delete(id)?;
                    return Ok(true);
                }
                Some(BuildStatus::Finished) => {
                    tracing::info!("Build {} finished before it could be cancelled", id);
                    return Ok(false);
                }
                None if !store.exists() => return Ok(true),
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::error!(
                    "Build {} did not stop within {:?} of the cancel request",
                    id,
                    self.config.cancel_timeout()
                );
                if let Err(e) = self.uuid_delete(id) {
                    tracing::error!("Failed to delete build {}: {}", id, e);
                }
                return Ok(true);
            }
            tokio::time::sleep(self.config.cancel_poll()).await;
        }
    }

    /// Removes a build's results and upload jobs. Does not look at status.
    pub fn uuid_delete(&self, id: Uuid) -> Result<bool> {
        self.existing_store(id)?.delete(self.uploads.as_ref())?;
        Ok(true)
    }

    /// Deletes a build only once it has finished or failed.
    pub fn delete_finished(&self, id: Uuid) -> Result<()> {
        let store = self.existing_store(id)?;
        match store.read_status() {
            Some(status) if status.is_terminal() => {
                self.uuid_delete(id)?;
                Ok(())
            }
            Some(status) => Err(AppError::InvalidState(format!(
                "Build {} is {}, not finished",
                id, status
            ))),
            None => Err(AppError::InvalidState(format!("Build {} has no status", id))),
        }
    }

    /// Attaches a new upload job to a build. Builds that have already
    /// finished are readied right away.
    pub fn schedule_upload(&self, id: Uuid, request: UploadRequest) -> Result<Uuid> {
        let store = self.existing_store(id)?;
        let status = store
            .read_status()
            .ok_or_else(|| AppError::InvalidState(format!("Build {} has no status", id)))?;
        if status == BuildStatus::Failed {
            return Err(AppError::InvalidState(format!(
                "Build {} failed, there is nothing to upload",
                id
            )));
        }

        let upload_id =
            self.uploads
                .create_upload(&request.provider, &request.image_name, request.settings)?;
        store.add_upload(upload_id)?;

        if status == BuildStatus::Finished {
            self.ready_upload(id, upload_id)?;
        }
        Ok(upload_id)
    }

    pub fn ready_upload(&self, id: Uuid, upload_id: Uuid) -> Result<()> {
        let store = self.existing_store(id)?;
        if store.read_status() != Some(BuildStatus::Finished) {
            return Err(AppError::InvalidState(format!(
                "Build {} is not finished, cannot upload it",
                id
            )));
        }
        if !store.upload_ids()?.contains(&upload_id) {
            return Err(AppError::Upload(format!(
                "Upload {} does not belong to build {}",
                upload_id, id
            )));
        }

        let config = store.read_config()?;
        self.uploads.ready_upload(upload_id, &store.image_path(&config))
    }

    pub fn remove_upload(&self, id: Uuid, upload_id: Uuid) -> Result<()> {
        let store = self.existing_store(id)?;
        if !store.remove_upload(upload_id)? {
            return Err(AppError::Upload(format!(
                "Upload {} does not belong to build {}",
                upload_id, id
            )));
        }
        Ok(())
    }
}

/// The template followed by a `%packages` section pinning every resolved
/// package.
pub fn final_kickstart(template: &str, deps: &[Nevra]) -> String {
    let mut kickstart = template.trim_end().to_string();
    kickstart.push_str("\n\n%packages\n");
    for dep in deps {
        let _ = writeln!(kickstart, "{}", dep);
    }
    kickstart.push_str("%end\n");
    kickstart
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Execution(format!("Background task failed: {}", e)))?
}
