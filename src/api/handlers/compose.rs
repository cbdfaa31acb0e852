use crate::api::dto::compose::{
    ApiErrorEntry, ComposeQuery, ComposeRequest, ComposeResponse, ComposeTypeEntry,
    ComposeTypesResponse, DeleteResponse, FailedResponse, FinishedResponse, LogQuery,
    ScheduleUploadResponse, StatusResponse, UploadDto, UuidResult,
};
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::models::{BuildStatus, QueueStatus};
use crate::repository::TarSelection;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BuildNotFound(raw.to_string()))
}

fn split_ids(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

pub async fn start_compose(
    State(state): State<AppState>,
    Query(query): Query<ComposeQuery>,
    Json(req): Json<ComposeRequest>,
) -> Result<Json<ComposeResponse>> {
    let build_id = state
        .compose_service
        .start_build(req.into_start_build(query.test))
        .await?;
    Ok(Json(ComposeResponse {
        status: true,
        build_id,
    }))
}

pub async fn compose_types(State(state): State<AppState>) -> Result<Json<ComposeTypesResponse>> {
    let types = state
        .compose_service
        .compose_types()?
        .into_iter()
        .map(|name| ComposeTypeEntry {
            name,
            enabled: true,
        })
        .collect();
    Ok(Json(ComposeTypesResponse { types }))
}

pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatus>> {
    Ok(Json(state.compose_service.queue_status()?))
}

pub async fn finished(State(state): State<AppState>) -> Result<Json<FinishedResponse>> {
    let finished = state
        .compose_service
        .build_status(Some(BuildStatus::Finished))?;
    Ok(Json(FinishedResponse { finished }))
}

pub async fn failed(State(state): State<AppState>) -> Result<Json<FailedResponse>> {
    let failed = state.compose_service.build_status(Some(BuildStatus::Failed))?;
    Ok(Json(FailedResponse { failed }))
}

/// `uuids` is a comma separated list, or `*` for every build.
pub async fn status(
    State(state): State<AppState>,
    Path(uuids): Path<String>,
) -> Result<Json<StatusResponse>> {
    if uuids.trim() == "*" {
        return Ok(Json(StatusResponse {
            uuids: state.compose_service.build_status(None)?,
            errors: Vec::new(),
        }));
    }

    let mut response = StatusResponse {
        uuids: Vec::new(),
        errors: Vec::new(),
    };
    for raw in split_ids(&uuids) {
        match parse_uuid(raw)
            .ok()
            .and_then(|id| state.compose_service.uuid_status(id))
        {
            Some(detail) => response.uuids.push(detail),
            None => response.errors.push(ApiErrorEntry {
                id: "UnknownUUID".to_string(),
                msg: format!("{} is not a valid build uuid", raw),
            }),
        }
    }
    Ok(Json(response))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<UuidResult>> {
    let id = parse_uuid(&uuid)?;
    if state.compose_service.uuid_status(id).is_none() {
        return Err(AppError::BuildNotFound(uuid));
    }
    let status = state.compose_service.uuid_cancel(id).await?;
    if !status {
        return Err(AppError::InvalidState(format!(
            "Build {} is not in WAITING or RUNNING",
            id
        )));
    }
    Ok(Json(UuidResult { uuid: id, status }))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(uuids): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let mut response = DeleteResponse {
        uuids: Vec::new(),
        errors: Vec::new(),
    };
    for raw in split_ids(&uuids) {
        let result = parse_uuid(raw).and_then(|id| {
            state.compose_service.delete_finished(id)?;
            Ok(id)
        });
        match result {
            Ok(uuid) => response.uuids.push(UuidResult { uuid, status: true }),
            Err(e) => response.errors.push(ApiErrorEntry {
                id: "ComposeError".to_string(),
                msg: format!("{}: {}", raw, e),
            }),
        }
    }
    Ok(Json(response))
}

pub async fn info(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<crate::models::BuildInfo>> {
    let id = parse_uuid(&uuid)?;
    Ok(Json(state.compose_service.uuid_info(id)?))
}

pub async fn log(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<String> {
    let id = parse_uuid(&uuid)?;
    state.compose_service.uuid_log(id, query.size)
}

fn tar_response(state: &AppState, uuid: &str, selection: TarSelection, suffix: &str) -> Result<Response> {
    let id = parse_uuid(uuid)?;
    let stdout = state.compose_service.uuid_tar(id, selection)?;
    let body = Body::from_stream(ReaderStream::new(stdout));
    let headers = [
        (header::CONTENT_TYPE, "application/x-tar".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}-{}.tar\"", id, suffix),
        ),
    ];
    Ok((headers, body).into_response())
}

pub async fn metadata(State(state): State<AppState>, Path(uuid): Path<String>) -> Result<Response> {
    tar_response(&state, &uuid, TarSelection::METADATA, "metadata")
}

pub async fn results(State(state): State<AppState>, Path(uuid): Path<String>) -> Result<Response> {
    tar_response(&state, &uuid, TarSelection::RESULTS, "results")
}

pub async fn logs(State(state): State<AppState>, Path(uuid): Path<String>) -> Result<Response> {
    tar_response(&state, &uuid, TarSelection::LOGS, "logs")
}

pub async fn image(State(state): State<AppState>, Path(uuid): Path<String>) -> Result<Response> {
    tar_response(&state, &uuid, TarSelection::IMAGE, "image")
}

pub async fn schedule_upload(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(req): Json<UploadDto>,
) -> Result<Json<ScheduleUploadResponse>> {
    let id = parse_uuid(&uuid)?;
    let upload_id = state.compose_service.schedule_upload(id, req.into())?;
    Ok(Json(ScheduleUploadResponse {
        status: true,
        upload_id,
    }))
}

pub async fn remove_upload(
    State(state): State<AppState>,
    Path((uuid, upload_uuid)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_uuid(&uuid)?;
    let upload_id: Uuid = upload_uuid
        .parse()
        .map_err(|_| AppError::Upload(format!("{} is not a valid upload uuid", upload_uuid)))?;
    state.compose_service.remove_upload(id, upload_id)?;
    Ok(Json(serde_json::json!({
        "status": true,
        "upload_id": upload_id
    })))
}
