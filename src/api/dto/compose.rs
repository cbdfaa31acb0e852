use crate::models::BuildDetail;
use crate::services::{StartBuild, UploadRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_branch() -> String {
    "master".to_string()
}

fn default_log_size() -> u64 {
    1024
}

#[derive(Debug, Deserialize)]
pub struct ComposeRequest {
    pub blueprint_name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub compose_type: String,
    pub upload: Option<UploadDto>,
}

impl ComposeRequest {
    pub fn into_start_build(self, test_mode: u8) -> StartBuild {
        StartBuild {
            blueprint_name: self.blueprint_name,
            branch: self.branch,
            compose_type: self.compose_type,
            test_mode,
            upload: self.upload.map(UploadRequest::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadDto {
    pub provider: String,
    pub image_name: String,
    #[serde(default)]
    pub settings: toml::Table,
}

impl From<UploadDto> for UploadRequest {
    fn from(dto: UploadDto) -> Self {
        Self {
            provider: dto.provider,
            image_name: dto.image_name,
            settings: dto.settings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ComposeQuery {
    #[serde(default)]
    pub test: u8,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_log_size")]
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct ComposeResponse {
    pub status: bool,
    pub build_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ComposeTypeEntry {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ComposeTypesResponse {
    pub types: Vec<ComposeTypeEntry>,
}

#[derive(Debug, Serialize)]
pub struct FinishedResponse {
    pub finished: Vec<BuildDetail>,
}

#[derive(Debug, Serialize)]
pub struct FailedResponse {
    pub failed: Vec<BuildDetail>,
}

/// A per-id failure in a multi-id request.
#[derive(Debug, Serialize)]
pub struct ApiErrorEntry {
    pub id: String,
    pub msg: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uuids: Vec<BuildDetail>,
    pub errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct UuidResult {
    pub uuid: Uuid,
    pub status: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub uuids: Vec<UuidResult>,
    pub errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleUploadResponse {
    pub status: bool,
    pub upload_id: Uuid,
}
