mod creator;
mod simulated;

pub use creator::CreatorExecutor;
pub use simulated::run_simulated;

use crate::error::Result;
use crate::models::BuildConfig;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Returns true once someone asked for the running build to stop.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Produces the image for one build. Errors mark the build FAILED.
///
/// Implementations are expected to poll `cancel` and give up with
/// [`crate::error::AppError::Cancelled`] when it turns true.
pub trait BuildExecutor: Send + Sync + 'static {
    fn run_build(
        &self,
        config: BuildConfig,
        results_dir: PathBuf,
        cancel: CancelCheck,
    ) -> impl Future<Output = Result<()>> + Send;
}
