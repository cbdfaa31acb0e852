use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub lib_dir: PathBuf,
    pub share_dir: PathBuf,
    pub recipes_dir: PathBuf,
    pub creator_path: PathBuf,
    pub tar_path: PathBuf,
    /// Live installer log consulted while a build is running.
    pub installer_log: PathBuf,
    /// Live packaging log consulted while a build is running.
    pub packaging_log: PathBuf,
    pub monitor_interval_ms: u64,
    pub cancel_poll_ms: u64,
    pub cancel_timeout_secs: u64,
    pub simulated_build_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let lib_dir = PathBuf::from(crate::paths::DEFAULT_LIB_DIR);
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            recipes_dir: lib_dir.join("blueprints"),
            lib_dir,
            share_dir: PathBuf::from(crate::paths::DEFAULT_SHARE_DIR),
            creator_path: PathBuf::from("livemedia-creator"),
            tar_path: PathBuf::from("tar"),
            installer_log: PathBuf::from("/tmp/anaconda.log"),
            packaging_log: PathBuf::from("/tmp/packaging.log"),
            monitor_interval_ms: 5000,
            cancel_poll_ms: 5000,
            cancel_timeout_secs: 600,
            simulated_build_ms: 5000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file(&crate::paths::conf_file())? {
            config.apply_file(file_config);
        }

        if let Ok(lib_dir) = std::env::var("COMPOSER_LIB_DIR") {
            config.lib_dir = PathBuf::from(lib_dir);
        }

        if let Ok(share_dir) = std::env::var("COMPOSER_SHARE_DIR") {
            config.share_dir = PathBuf::from(share_dir);
        }

        if let Ok(recipes_dir) = std::env::var("COMPOSER_RECIPES_DIR") {
            config.recipes_dir = PathBuf::from(recipes_dir);
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(4000);
        }

        config.validate_lib_dir()?;
        Ok(config)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    pub fn simulated_build(&self) -> Duration {
        Duration::from_millis(self.simulated_build_ms)
    }

    fn from_conf_file(path: &Path) -> Result<Option<FileConfig>> {
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(lib_dir) = file_config.lib_dir {
            self.lib_dir = PathBuf::from(lib_dir);
        }
        if let Some(share_dir) = file_config.share_dir {
            self.share_dir = PathBuf::from(share_dir);
        }
        if let Some(recipes_dir) = file_config.recipes_dir {
            self.recipes_dir = PathBuf::from(recipes_dir);
        }
        if let Some(creator_path) = file_config.creator_path {
            self.creator_path = PathBuf::from(creator_path);
        }
        if let Some(tar_path) = file_config.tar_path {
            self.tar_path = PathBuf::from(tar_path);
        }
        if let Some(installer_log) = file_config.installer_log {
            self.installer_log = PathBuf::from(installer_log);
        }
        if let Some(packaging_log) = file_config.packaging_log {
            self.packaging_log = PathBuf::from(packaging_log);
        }
        if let Some(ms) = file_config.monitor_interval_ms {
            self.monitor_interval_ms = ms;
        }
        if let Some(ms) = file_config.cancel_poll_ms {
            self.cancel_poll_ms = ms;
        }
        if let Some(secs) = file_config.cancel_timeout_secs {
            self.cancel_timeout_secs = secs;
        }
        if let Some(ms) = file_config.simulated_build_ms {
            self.simulated_build_ms = ms;
        }
    }

    fn validate_lib_dir(&self) -> Result<()> {
        let path_str = self.lib_dir.to_string_lossy();
        if path_str.trim().is_empty() {
            anyhow::bail!("lib_dir cannot be empty");
        }

        if !self.lib_dir.is_absolute() {
            anyhow::bail!("lib_dir must be an absolute path: {}", self.lib_dir.display());
        }

        if self
            .lib_dir
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            anyhow::bail!("lib_dir cannot contain '..'");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    lib_dir: Option<String>,
    share_dir: Option<String>,
    recipes_dir: Option<String>,
    creator_path: Option<String>,
    tar_path: Option<String>,
    installer_log: Option<String>,
    packaging_log: Option<String>,
    monitor_interval_ms: Option<u64>,
    cancel_poll_ms: Option<u64>,
    cancel_timeout_secs: Option<u64>,
    simulated_build_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("composer.json");
        std::fs::write(
            &path,
            r#"{"lib_dir": "/srv/composer", "port": 4100, "cancel_timeout_secs": 30}"#,
        )
        .unwrap();

        let mut config = Config::default();
        let file_config = Config::from_conf_file(&path).unwrap().unwrap();
        config.apply_file(file_config);

        assert_eq!(config.lib_dir, PathBuf::from("/srv/composer"));
        assert_eq!(config.port, 4100);
        assert_eq!(config.cancel_timeout(), Duration::from_secs(30));
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
    }

    #[test]
    fn missing_conf_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::from_conf_file(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn relative_or_parent_lib_dir_is_rejected() {
        let mut config = Config::default();
        config.lib_dir = PathBuf::from("relative/lib");
        assert!(config.validate_lib_dir().is_err());

        config.lib_dir = PathBuf::from("/var/lib/../tmp");
        assert!(config.validate_lib_dir().is_err());

        config.lib_dir = PathBuf::from("/var/lib/lorax/composer");
        assert!(config.validate_lib_dir().is_ok());
    }
}
