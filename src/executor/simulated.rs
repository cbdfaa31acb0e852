use super::CancelCheck;
use crate::error::{AppError, Result};
use crate::models::BuildConfig;
use std::path::Path;
use std::time::Duration;

const CANCEL_CHECK_STEP: Duration = Duration::from_millis(100);

/// Pretends to build: mode 1 fails, any higher mode writes a placeholder
/// image. Waits `duration` first, honouring cancellation.
pub async fn run_simulated(
    mode: u8,
    config: &BuildConfig,
    results_dir: &Path,
    duration: Duration,
    cancel: &CancelCheck,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if cancel() {
            return Err(AppError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::sleep(remaining.min(CANCEL_CHECK_STEP)).await;
    }
    if cancel() {
        return Err(AppError::Cancelled);
    }

    if mode == 1 {
        return Err(AppError::Execution("TESTING FAILED compose".to_string()));
    }

    std::fs::write(results_dir.join(&config.image_name), "TEST IMAGE")?;
    Ok(())
}
