pub mod build;
pub mod recipe;
pub mod upload;

pub use build::{
    BuildConfig, BuildDetail, BuildInfo, BuildStatus, OutputKind, QueueStatus, TimestampKind,
    Timestamps, is_known_compose_type,
};
pub use recipe::{DependencySnapshot, Nevra, Recipe, RecipePackage};
pub use upload::{UploadRecord, UploadStatus, UploadSummary};
