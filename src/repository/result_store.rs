//! One build's durable state: a directory under `results/` named by its id.
//!
//! Every other component reads and writes build state through this type, so
//! the file names below are the whole on-disk contract.

use crate::error::{AppError, Result};
use crate::models::{
    BuildConfig, BuildDetail, BuildStatus, DependencySnapshot, Nevra, Recipe, TimestampKind,
    Timestamps,
};
use crate::repository::{UploadStore, write_atomic};
use chrono::Utc;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use uuid::Uuid;

const STATUS_FILE: &str = "STATUS";
const CANCEL_FILE: &str = "CANCEL";
const TEST_FILE: &str = "TEST";
const COMMIT_FILE: &str = "COMMIT";
const RECIPE_FILE: &str = "recipe.toml";
const FROZEN_FILE: &str = "frozen.toml";
const DEPS_FILE: &str = "deps.toml";
const CONFIG_FILE: &str = "config.toml";
const TIMES_FILE: &str = "times.toml";
const UPLOADS_FILE: &str = "UPLOADS";
const LOGS_DIR: &str = "logs";
const COMBINED_LOG: &str = "combined.log";
pub const FINAL_KICKSTART: &str = "final-kickstart.ks";

const MIN_DELETE_PATH_LEN: usize = 10;
const LOG_FRESHNESS_SKEW: Duration = Duration::from_secs(15);

/// Everything written when a build is admitted.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub recipe: Recipe,
    pub frozen: Recipe,
    pub commit_id: String,
    pub deps: Vec<Nevra>,
    pub config: BuildConfig,
    pub template_name: String,
    pub template: String,
    pub kickstart: String,
    pub test_mode: u8,
}

/// Installer logs that only exist while a build is running.
#[derive(Debug, Clone)]
pub struct LiveLogs {
    pub installer: PathBuf,
    pub packaging: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarEntry {
    Metadata,
    Image,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarSelection {
    pub metadata: bool,
    pub image: bool,
    pub logs: bool,
}

impl TarSelection {
    pub const METADATA: Self = Self {
        metadata: true,
        image: false,
        logs: false,
    };
    pub const RESULTS: Self = Self {
        metadata: true,
        image: true,
        logs: true,
    };
    pub const LOGS: Self = Self {
        metadata: false,
        image: false,
        logs: true,
    };
    pub const IMAGE: Self = Self {
        metadata: false,
        image: true,
        logs: false,
    };

    pub fn includes(&self, entry: TarEntry) -> bool {
        match entry {
            TarEntry::Metadata => self.metadata,
            TarEntry::Image => self.image,
            TarEntry::Logs => self.logs,
        }
    }
}

/// Classifies a top-level entry of a results directory by name alone.
pub fn classify_entry(name: &str, image_name: &str) -> TarEntry {
    if name == LOGS_DIR {
        TarEntry::Logs
    } else if name == image_name {
        TarEntry::Image
    } else {
        TarEntry::Metadata
    }
}

/// Refuses to remove a tree whose resolved path is implausibly short.
pub fn check_delete_target(path: &Path) -> Result<()> {
    if path.as_os_str().len() < MIN_DELETE_PATH_LEN {
        return Err(AppError::UnsafeDeletePath(path.to_path_buf()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    id: Uuid,
    dir: PathBuf,
}

impl ResultStore {
    pub fn open(results_root: &Path, id: Uuid) -> Self {
        Self {
            id,
            dir: results_root.join(id.to_string()),
        }
    }

    /// Wraps an existing results directory; `None` if its name is not a uuid.
    pub fn from_dir(dir: PathBuf) -> Option<Self> {
        let id = dir.file_name()?.to_str()?.parse().ok()?;
        Some(Self { id, dir })
    }

    pub fn create(results_root: &Path, id: Uuid, build: &NewBuild) -> Result<Self> {
        let store = Self::open(results_root, id);
        fs::create_dir(&store.dir)?;

        if let Err(err) = store.populate(build) {
            let _ = fs::remove_dir_all(&store.dir);
            return Err(err);
        }
        Ok(store)
    }

    fn populate(&self, build: &NewBuild) -> Result<()> {
        fs::write(self.dir.join(COMMIT_FILE), &build.commit_id)?;
        fs::write(self.dir.join(RECIPE_FILE), toml::to_string(&build.recipe)?)?;
        fs::write(self.dir.join(FROZEN_FILE), toml::to_string(&build.frozen)?)?;
        let deps = DependencySnapshot {
            packages: build.deps.clone(),
        };
        fs::write(self.dir.join(DEPS_FILE), toml::to_string(&deps)?)?;
        fs::write(
            self.dir.join(format!("{}.ks", build.template_name)),
            &build.template,
        )?;
        fs::write(self.dir.join(FINAL_KICKSTART), &build.kickstart)?;
        fs::write(self.dir.join(CONFIG_FILE), toml::to_string(&build.config)?)?;
        fs::create_dir(self.logs_dir())?;

        if build.test_mode > 0 {
            fs::write(self.dir.join(TEST_FILE), build.test_mode.to_string())?;
        }

        self.write_status(BuildStatus::Waiting)?;
        self.write_timestamp(TimestampKind::Created)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }

    pub fn image_path(&self, config: &BuildConfig) -> PathBuf {
        self.dir.join(&config.image_name)
    }

    /// `None` when the build or its status marker is gone or unreadable.
    pub fn read_status(&self) -> Option<BuildStatus> {
        let raw = fs::read_to_string(self.dir.join(STATUS_FILE)).ok()?;
        raw.parse().ok()
    }

    pub fn write_status(&self, status: BuildStatus) -> Result<()> {
        write_atomic(
            &self.dir.join(STATUS_FILE),
            format!("{}\n", status).as_bytes(),
        )
    }

    pub fn read_timestamps(&self) -> Result<Timestamps> {
        match fs::read_to_string(self.dir.join(TIMES_FILE)) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Timestamps::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_timestamp(&self, kind: TimestampKind) -> Result<()> {
        let mut times = self.read_timestamps()?;
        times.set(kind, Utc::now().timestamp_millis() as f64 / 1000.0);
        write_atomic(&self.dir.join(TIMES_FILE), toml::to_string(&times)?.as_bytes())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.dir.join(CANCEL_FILE).exists()
    }

    pub fn request_cancel(&self) -> Result<()> {
        let path = self.dir.join(CANCEL_FILE);
        if !path.exists() {
            fs::write(path, "\n")?;
        }
        Ok(())
    }

    /// Simulated-build mode, if one was requested. Unreadable markers count
    /// as mode 1 (fail).
    pub fn test_mode(&self) -> Option<u8> {
        let raw = fs::read_to_string(self.dir.join(TEST_FILE)).ok()?;
        Some(raw.trim().parse().unwrap_or(1))
    }

    pub fn read_config(&self) -> Result<BuildConfig> {
        Ok(toml::from_str(&fs::read_to_string(self.dir.join(CONFIG_FILE))?)?)
    }

    pub fn read_recipe(&self) -> Result<Recipe> {
        Ok(toml::from_str(&fs::read_to_string(self.dir.join(RECIPE_FILE))?)?)
    }

    pub fn read_frozen(&self) -> Result<Recipe> {
        Ok(toml::from_str(&fs::read_to_string(self.dir.join(FROZEN_FILE))?)?)
    }

    pub fn read_deps(&self) -> Result<Vec<Nevra>> {
        let deps: DependencySnapshot =
            toml::from_str(&fs::read_to_string(self.dir.join(DEPS_FILE))?)?;
        Ok(deps.packages)
    }

    pub fn read_commit(&self) -> Result<String> {
        Ok(fs::read_to_string(self.dir.join(COMMIT_FILE))?
            .trim()
            .to_string())
    }

    pub fn upload_ids(&self) -> Result<Vec<Uuid>> {
        let content = match fs::read_to_string(self.dir.join(UPLOADS_FILE)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.parse::<Uuid>() {
                Ok(id) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(_) => tracing::warn!("Ignoring bad upload id {:?} in {}", line, self.id),
            }
        }
        Ok(ids)
    }

    pub fn add_upload(&self, upload_id: Uuid) -> Result<()> {
        let mut ids = self.upload_ids()?;
        if ids.contains(&upload_id) {
            return Ok(());
        }
        ids.push(upload_id);
        self.write_upload_ids(&ids)
    }

    pub fn remove_upload(&self, upload_id: Uuid) -> Result<bool> {
        let mut ids = self.upload_ids()?;
        let before = ids.len();
        ids.retain(|id| *id != upload_id);
        if ids.len() == before {
            return Ok(false);
        }
        self.write_upload_ids(&ids)?;
        Ok(true)
    }

    fn write_upload_ids(&self, ids: &[Uuid]) -> Result<()> {
        let mut content = String::new();
        for id in ids {
            content.push_str(&id.to_string());
            content.push('\n');
        }
        write_atomic(&self.dir.join(UPLOADS_FILE), content.as_bytes())
    }

    /// Size of the output image, 0 until the build has finished.
    pub fn image_size(&self, status: BuildStatus, config: &BuildConfig) -> u64 {
        if status != BuildStatus::Finished {
            return 0;
        }
        fs::metadata(self.image_path(config))
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    pub fn detail(&self, uploads: &dyn UploadStore) -> Result<BuildDetail> {
        let status = fs::read_to_string(self.dir.join(STATUS_FILE))?
            .parse::<BuildStatus>()
            .map_err(AppError::InvalidState)?;
        let recipe = self.read_recipe()?;
        let config = self.read_config()?;
        let times = self.read_timestamps()?;
        let uploads = uploads.get_uploads(&self.upload_ids()?)?;

        Ok(BuildDetail {
            id: self.id,
            queue_status: status,
            job_created: times.created,
            job_started: times.started,
            job_finished: times.finished,
            blueprint: recipe.name,
            version: recipe.version,
            image_size: self.image_size(status, &config),
            compose_type: config.compose_type,
            uploads,
        })
    }

    /// Removes the associated upload jobs, then the whole directory tree.
    pub fn delete(&self, uploads: &dyn UploadStore) -> Result<()> {
        let resolved = fs::canonicalize(&self.dir).unwrap_or_else(|_| self.dir.clone());
        check_delete_target(&resolved)?;

        for upload_id in self.upload_ids()? {
            uploads.delete_upload(upload_id)?;
        }
        fs::remove_dir_all(&resolved)?;
        tracing::info!("Deleted build {}", self.id);
        Ok(())
    }

    /// Streams an uncompressed tar of the selected entries from the external
    /// `tar` binary.
    pub fn tar(
        &self,
        tar_path: &Path,
        selection: TarSelection,
    ) -> Result<tokio::process::ChildStdout> {
        let config = self.read_config()?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if selection.includes(classify_entry(&name, &config.image_name)) {
                names.push(name);
            }
        }
        names.sort();
        if names.is_empty() {
            return Err(AppError::InvalidState(format!(
                "Build {} has nothing to archive for that request",
                self.id
            )));
        }

        let mut child = tokio::process::Command::new(tar_path)
            .arg("-C")
            .arg(&self.dir)
            .arg("-cf-")
            .args(&names)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Execution("tar produced no output stream".to_string()))?;

        let id = self.id;
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if !output.status.success() => tracing::error!(
                    "tar of build {} failed ({}): {}",
                    id,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to wait for tar of build {}: {}", id, e),
            }
        });

        Ok(stdout)
    }

    /// Picks the log that best shows what a build is doing right now.
    pub fn select_log(&self, running: bool, live: &LiveLogs) -> PathBuf {
        let combined = self.logs_dir().join(COMBINED_LOG);
        if !running || !live.installer.is_file() {
            return combined;
        }
        if !live.packaging.is_file() {
            return live.installer.clone();
        }

        let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified());
        let (Ok(installer), Ok(packaging)) =
            (modified(&live.installer), modified(&live.packaging))
        else {
            return combined;
        };

        if packaging >= installer + LOG_FRESHNESS_SKEW {
            live.packaging.clone()
        } else {
            live.installer.clone()
        }
    }

    pub fn tail_log(&self, size_kb: u64, running: bool, live: &LiveLogs) -> Result<String> {
        read_tail(&self.select_log(running, live), size_kb)
    }
}

/// Last `size_kb` KiB of a file, starting on a line boundary.
fn read_tail(path: &Path, size_kb: u64) -> Result<String> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err.into()),
    };

    let len = file.metadata()?.len();
    let window = size_kb.saturating_mul(1024);
    let mut buf = Vec::new();

    if len <= window {
        file.read_to_end(&mut buf)?;
    } else {
        file.seek(SeekFrom::Start(len - window))?;
        file.read_to_end(&mut buf)?;
        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                buf.drain(..=pos);
            }
            None => buf.clear(),
        }
    }

    Ok(String::from_utf8(buf).unwrap_or_default())
}
