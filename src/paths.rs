use crate::error::Result;
use std::path::{Path, PathBuf};

const QUEUE_NEW_DIR: &str = "queue/new";
const QUEUE_RUN_DIR: &str = "queue/run";
const RESULTS_DIR: &str = "results";
const UPLOAD_QUEUE_DIR: &str = "upload/queue";
const TEMPLATES_DIR: &str = "composer";
const CONF_ENV: &str = "LORAX_COMPOSER_CONF";
const DEFAULT_CONF: &str = "/etc/lorax/composer.json";

pub const DEFAULT_LIB_DIR: &str = "/var/lib/lorax/composer";
pub const DEFAULT_SHARE_DIR: &str = "/usr/share/lorax";

/// Location of the optional JSON configuration file.
pub fn conf_file() -> PathBuf {
    match std::env::var(CONF_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONF),
    }
}

pub fn new_queue_dir(lib_dir: &Path) -> PathBuf {
    lib_dir.join(QUEUE_NEW_DIR)
}

pub fn run_queue_dir(lib_dir: &Path) -> PathBuf {
    lib_dir.join(QUEUE_RUN_DIR)
}

pub fn results_dir(lib_dir: &Path) -> PathBuf {
    lib_dir.join(RESULTS_DIR)
}

pub fn upload_queue_dir(lib_dir: &Path) -> PathBuf {
    lib_dir.join(UPLOAD_QUEUE_DIR)
}

/// Directory holding the `<compose_type>.ks` kickstart templates.
pub fn templates_dir(share_dir: &Path) -> PathBuf {
    share_dir.join(TEMPLATES_DIR)
}

/// Creates the queue, results and upload directories under `lib_dir`.
pub fn make_queue_dirs(lib_dir: &Path) -> Result<()> {
    for dir in [
        new_queue_dir(lib_dir),
        run_queue_dir(lib_dir),
        results_dir(lib_dir),
        upload_queue_dir(lib_dir),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
