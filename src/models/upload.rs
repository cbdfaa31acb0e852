use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Waiting,
    Ready,
    Running,
    Finished,
    Failed,
    Cancelled,
}

/// Persisted upload job, one TOML file per upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub uuid: Uuid,
    pub provider_name: String,
    pub image_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub settings: toml::Table,
    pub status: UploadStatus,
    pub creation_time: f64,
}

/// What build queries report about an upload. Settings are left out since
/// they usually carry credentials.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadSummary {
    pub uuid: Uuid,
    pub status: UploadStatus,
    pub provider_name: String,
    pub image_name: String,
    pub image_path: Option<PathBuf>,
    pub creation_time: f64,
}

impl From<&UploadRecord> for UploadSummary {
    fn from(record: &UploadRecord) -> Self {
        Self {
            uuid: record.uuid,
            status: record.status,
            provider_name: record.provider_name.clone(),
            image_name: record.image_name.clone(),
            image_path: record.image_path.clone(),
            creation_time: record.creation_time,
        }
    }
}
