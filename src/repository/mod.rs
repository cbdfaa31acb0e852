pub mod queue_store;
pub mod result_store;
pub mod upload_store;

pub use queue_store::{QueueStore, SymlinkQueue};
pub use result_store::{LiveLogs, NewBuild, ResultStore, TarSelection};
pub use upload_store::{LocalUploads, UploadStore};

use crate::error::{AppError, Result};
use std::io::Write;
use std::path::Path;

/// Replaces `path` by writing a sibling temp file and renaming it over.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        AppError::Execution(format!("No parent directory for {}", path.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
