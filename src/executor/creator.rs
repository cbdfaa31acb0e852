use super::{BuildExecutor, CancelCheck};
use crate::error::{AppError, Result};
use crate::logging::PROGRAM_TARGET;
use crate::models::{BuildConfig, OutputKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

const COMPOSE_SUBDIR: &str = "compose";

/// Runs `livemedia-creator` (or a compatible tool) for each build.
#[derive(Clone)]
pub struct CreatorExecutor {
    creator_path: PathBuf,
    cancel_poll: Duration,
}

impl CreatorExecutor {
    pub fn new(creator_path: Option<PathBuf>) -> Self {
        Self {
            creator_path: creator_path.unwrap_or_else(|| PathBuf::from("livemedia-creator")),
            cancel_poll: Duration::from_secs(1),
        }
    }

    /// How often a running creator checks for a cancel request.
    pub fn with_cancel_poll(mut self, cancel_poll: Duration) -> Self {
        self.cancel_poll = cancel_poll;
        self
    }

    /// Command-line flags for one build. The creator writes into
    /// `compose_dir`, which must not exist yet.
    pub fn build_args(config: &BuildConfig, compose_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-virt".to_string(),
            "--ks".to_string(),
            config.ks.to_string_lossy().to_string(),
            "--resultdir".to_string(),
            compose_dir.to_string_lossy().to_string(),
            "--logfile".to_string(),
            config.logfile.join("livemedia.log").to_string_lossy().to_string(),
            "--image-name".to_string(),
            config.image_name.clone(),
            "--timeout".to_string(),
            config.timeout.to_string(),
            "--project".to_string(),
            config.project.clone(),
            "--title".to_string(),
            config.title.clone(),
        ];

        if !config.releasever.is_empty() {
            args.push("--releasever".to_string());
            args.push(config.releasever.clone());
        }

        match config.output {
            OutputKind::Iso => args.push("--make-iso".to_string()),
            OutputKind::Disk => args.push("--make-disk".to_string()),
            OutputKind::FsImage => args.push("--make-fsimage".to_string()),
            OutputKind::Tar => args.push("--make-tar".to_string()),
        }

        if let Some(image_type) = &config.image_type {
            args.push("--image-type".to_string());
            args.push(image_type.clone());
        }

        if config.image_only {
            args.push("--image-only".to_string());
        }

        if config.output == OutputKind::Tar {
            args.push("--compression".to_string());
            args.push(config.compression.clone());
            for arg in &config.compress_args {
                args.push(format!("--compress-arg={}", arg));
            }
        }

        args
    }

    fn forward_output<R>(stream: Option<R>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Some(stream) = stream else {
            return;
        };
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(target: PROGRAM_TARGET, "{}", line);
            }
        });
    }
}

impl Default for CreatorExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BuildExecutor for CreatorExecutor {
    async fn run_build(
        &self,
        config: BuildConfig,
        results_dir: PathBuf,
        cancel: CancelCheck,
    ) -> Result<()> {
        let compose_dir = results_dir.join(COMPOSE_SUBDIR);
        if compose_dir.exists() {
            std::fs::remove_dir_all(&compose_dir)?;
        }
        std::fs::create_dir_all(&config.logfile)?;

        let args = Self::build_args(&config, &compose_dir);
        tracing::info!("Running {} {}", self.creator_path.display(), args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.creator_path);
        cmd.args(&args);
        cmd.current_dir(&results_dir);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AppError::Execution(format!(
                "Failed to run {}: {}",
                self.creator_path.display(),
                e
            ))
        })?;

        Self::forward_output(child.stdout.take());
        Self::forward_output(child.stderr.take());

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::time::sleep(self.cancel_poll) => {
                    if cancel() {
                        tracing::info!("Cancel requested, stopping {}", self.creator_path.display());
                        child.kill().await?;
                        let _ = std::fs::remove_dir_all(&compose_dir);
                        return Err(AppError::Cancelled);
                    }
                }
            }
        };

        if !status.success() {
            return Err(AppError::Execution(format!(
                "{} failed: {}",
                self.creator_path.display(),
                status
            )));
        }

        let built = compose_dir.join(&config.image_name);
        if !built.is_file() {
            return Err(AppError::Execution(format!(
                "Image not found after build: {}",
                built.display()
            )));
        }
        std::fs::rename(&built, results_dir.join(&config.image_name))?;
        std::fs::remove_dir_all(&compose_dir)?;

        Ok(())
    }
}
