//! Fixtures shared by the unit test suites.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::executor::{BuildExecutor, CancelCheck};
use crate::logging::BuildLogs;
use crate::models::{BuildConfig, Nevra, Recipe, RecipePackage};
use crate::paths;
use crate::repository::result_store::FINAL_KICKSTART;
use crate::repository::{LocalUploads, NewBuild, ResultStore, SymlinkQueue};
use crate::services::{ComposeService, Depsolver, QueueMonitor, RecipeSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;
use uuid::Uuid;

pub const SAMPLE_COMMIT: &str = "3f1c0ffee";
pub const SAMPLE_BRANCH: &str = "master";

pub fn sample_recipe() -> Recipe {
    Recipe {
        name: "demo-recipe".to_string(),
        description: "A recipe for tests".to_string(),
        version: "0.0.1".to_string(),
        modules: vec![RecipePackage {
            name: "tmux".to_string(),
            version: Some("*".to_string()),
        }],
        packages: vec![RecipePackage {
            name: "Bash".to_string(),
            version: None,
        }],
        groups: Vec::new(),
    }
}

pub fn sample_deps() -> Vec<Nevra> {
    vec![
        Nevra {
            name: "Bash".to_string(),
            epoch: 0,
            version: "5.0.7".to_string(),
            release: "1.fc30".to_string(),
            arch: "x86_64".to_string(),
        },
        Nevra {
            name: "tmux".to_string(),
            epoch: 0,
            version: "2.9a".to_string(),
            release: "2.fc30".to_string(),
            arch: "x86_64".to_string(),
        },
    ]
}

/// Admission payload for a build whose directory will be
/// `results_root/<id>`.
pub fn new_build(results_root: &Path, id: Uuid, compose_type: &str, test_mode: u8) -> NewBuild {
    let dir = results_root.join(id.to_string());
    let config = BuildConfig::for_compose_type(
        compose_type,
        dir.join(FINAL_KICKSTART),
        dir.join("logs"),
        "x86_64",
    )
    .unwrap();
    let recipe = sample_recipe();
    let deps = sample_deps();

    NewBuild {
        frozen: recipe.freeze(&deps),
        recipe,
        commit_id: SAMPLE_COMMIT.to_string(),
        deps,
        config,
        template_name: compose_type.to_string(),
        template: "lang en_US.UTF-8\n".to_string(),
        kickstart: "lang en_US.UTF-8\n%packages\nbash\n%end\n".to_string(),
        test_mode,
    }
}

/// A WAITING tar build under `lib_dir/results`, not yet queued.
pub fn create_build(lib_dir: &Path, test_mode: u8) -> ResultStore {
    let results = paths::results_dir(lib_dir);
    std::fs::create_dir_all(&results).unwrap();
    let id = Uuid::new_v4();
    ResultStore::create(&results, id, &new_build(&results, id, "tar", test_mode)).unwrap()
}

pub fn set_mtime(path: &Path, when: SystemTime) {
    std::fs::File::open(path).unwrap().set_modified(when).unwrap();
}

/// Serves `sample_recipe` as `demo-recipe` on the `master` branch.
pub struct FakeRecipes;

impl RecipeSource for FakeRecipes {
    fn read_recipe_and_id(&self, branch: &str, name: &str) -> Result<(String, Recipe)> {
        let recipe = sample_recipe();
        if branch != SAMPLE_BRANCH || name != recipe.name {
            return Err(AppError::RecipeNotFound(name.to_string()));
        }
        Ok((SAMPLE_COMMIT.to_string(), recipe))
    }
}

#[derive(Default)]
pub struct FakeDepsolver {
    pub fail: bool,
}

impl Depsolver for FakeDepsolver {
    fn depsolve(&self, _projects: &[RecipePackage]) -> Result<Vec<Nevra>> {
        if self.fail {
            return Err(AppError::Depsolve("No package matches nothing-provides-this".to_string()));
        }
        Ok(sample_deps())
    }
}

/// Writes a small image, like a real build would.
pub struct ImageExecutor;

impl BuildExecutor for ImageExecutor {
    async fn run_build(
        &self,
        config: BuildConfig,
        results_dir: PathBuf,
        _cancel: CancelCheck,
    ) -> Result<()> {
        std::fs::write(results_dir.join(&config.image_name), "IMAGE")?;
        Ok(())
    }
}

pub struct FailingExecutor;

impl BuildExecutor for FailingExecutor {
    async fn run_build(
        &self,
        _config: BuildConfig,
        _results_dir: PathBuf,
        _cancel: CancelCheck,
    ) -> Result<()> {
        Err(AppError::Execution("creator exited with status 1".to_string()))
    }
}

pub struct PanickingExecutor;

impl BuildExecutor for PanickingExecutor {
    async fn run_build(
        &self,
        _config: BuildConfig,
        _results_dir: PathBuf,
        _cancel: CancelCheck,
    ) -> Result<()> {
        panic!("creator blew up")
    }
}

/// Never looks at the cancel check and keeps building for ten seconds.
pub struct StubbornExecutor;

impl BuildExecutor for StubbornExecutor {
    async fn run_build(
        &self,
        config: BuildConfig,
        results_dir: PathBuf,
        _cancel: CancelCheck,
    ) -> Result<()> {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        std::fs::write(results_dir.join(&config.image_name), "IMAGE")?;
        Ok(())
    }
}

/// A lib/share tree in a temp dir with fast polling intervals.
pub struct TestEnv {
    _dir: TempDir,
    pub config: Config,
    pub queue: Arc<SymlinkQueue>,
    pub uploads: Arc<LocalUploads>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lib_dir = dir.path().join("lib");
        let share_dir = dir.path().join("share");
        paths::make_queue_dirs(&lib_dir).unwrap();

        let templates = paths::templates_dir(&share_dir);
        std::fs::create_dir_all(&templates).unwrap();
        for name in ["tar", "qcow2", "floppy"] {
            std::fs::write(templates.join(format!("{}.ks", name)), "lang en_US.UTF-8\n").unwrap();
        }

        let config = Config {
            recipes_dir: dir.path().join("recipes"),
            installer_log: dir.path().join("anaconda.log"),
            packaging_log: dir.path().join("packaging.log"),
            monitor_interval_ms: 20,
            cancel_poll_ms: 20,
            cancel_timeout_secs: 10,
            simulated_build_ms: 50,
            lib_dir: lib_dir.clone(),
            share_dir,
            ..Config::default()
        };

        Self {
            queue: Arc::new(SymlinkQueue::new(&lib_dir)),
            uploads: Arc::new(LocalUploads::new(paths::upload_queue_dir(&lib_dir))),
            config,
            _dir: dir,
        }
    }

    pub fn lib_dir(&self) -> &Path {
        &self.config.lib_dir
    }

    pub fn results_dir(&self) -> PathBuf {
        paths::results_dir(&self.config.lib_dir)
    }

    pub fn monitor<E: BuildExecutor>(&self, executor: E) -> QueueMonitor<E> {
        QueueMonitor::new(
            &self.config,
            self.queue.clone(),
            self.uploads.clone(),
            executor,
            BuildLogs::new(),
        )
    }

    pub fn service(&self) -> ComposeService {
        self.service_with(FakeDepsolver::default())
    }

    pub fn service_with(&self, depsolver: FakeDepsolver) -> ComposeService {
        ComposeService::new(
            Arc::new(self.config.clone()),
            self.queue.clone(),
            self.uploads.clone(),
            Box::new(FakeRecipes),
            Box::new(depsolver),
        )
    }
}
