use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::db::models::{ExportJob, ExportRequest, ExportStatus, OutputFormat};
use crate::db::repositories::{
    ExportsRepository, FramesRepository, SettingsRepository, TimelapsesRepository,
};
use crate::export;
use axum::body::StreamBody;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Export job as reported to clients, with live progress folded in
#[derive(Debug, Clone, Serialize)]
pub struct ExportJobResponse {
    pub id: Uuid,
    pub timelapse_id: Uuid,
    pub status: ExportStatus,
    pub output_format: OutputFormat,
    pub output_fps: i32,
    pub resolution: String,
    pub crf: i32,
    pub total_frames: i32,
    pub frames_done: i32,
    pub progress_pct: f64,
    pub output_file: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJobResponse {
    pub fn from_job(job: ExportJob, live_frames: Option<i32>, file_size_bytes: Option<u64>) -> Self {
        let frames_done = live_frames.unwrap_or(job.frames_done);
        let total = job.total_frames.max(1) as f64;
        let progress_pct = (frames_done as f64 / total * 1000.0).round() / 10.0;
        let output_file = job
            .output_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        Self {
            id: job.id,
            timelapse_id: job.timelapse_id,
            status: job.status,
            output_format: job.output_format,
            output_fps: job.output_fps,
            resolution: job.resolution,
            crf: job.crf,
            total_frames: job.total_frames,
            frames_done,
            progress_pct,
            output_file,
            file_size_bytes,
            error_message: job.error_message,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/timelapses/:id", post(create_export))
        .route("/:id/status", get(get_export_status))
        .route("/:id/download", get(download_export))
        .route("/list/:timelapse_id", get(list_exports))
}

async fn load_job(state: &AppState, id: &Uuid) -> ApiResult<ExportJob> {
    ExportsRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Export job not found: {}", id)))
}

async fn file_size(job: &ExportJob) -> Option<u64> {
    if job.status != ExportStatus::Completed {
        return None;
    }
    tokio::fs::metadata(&job.output_path)
        .await
        .ok()
        .map(|metadata| metadata.len())
}

async fn respond(state: &AppState, job: ExportJob) -> ExportJobResponse {
    let live = if job.status == ExportStatus::Running {
        state.exports.live_progress(&job.id)
    } else {
        None
    };
    let size = file_size(&job).await;
    ExportJobResponse::from_job(job, live, size)
}

async fn create_export(
    State(state): State<AppState>,
    Path(timelapse_id): Path<Uuid>,
    Json(request): Json<ExportRequest>,
) -> ApiResult<(StatusCode, Json<ExportJobResponse>)> {
    let timelapses = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    if timelapses.get_by_id(&timelapse_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "Timelapse not found: {}",
            timelapse_id
        )));
    }

    let frames = FramesRepository::new(Arc::clone(&state.db_pool))
        .get_by_timelapse(&timelapse_id)
        .await?;
    if frames.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Timelapse has no frames to export",
        ));
    }

    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    let output_path = export::output_path(
        &settings.storage_path,
        &timelapse_id,
        request.output_format,
        state.clock.now(),
    );
    let frame_paths: Vec<_> = frames.into_iter().map(|frame| frame.file_path).collect();

    let job = state
        .exports
        .submit(timelapse_id, &frame_paths, output_path.clone(), request)
        .await?;
    state.exports.spawn(job.id, frame_paths, output_path);

    Ok((
        StatusCode::ACCEPTED,
        Json(ExportJobResponse::from_job(job, None, None)),
    ))
}

async fn get_export_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExportJobResponse>> {
    let job = load_job(&state, &id).await?;
    Ok(Json(respond(&state, job).await))
}

async fn download_export(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    let job = load_job(&state, &id).await?;
    if job.status != ExportStatus::Completed {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Export is not yet complete",
        ));
    }

    let file = tokio::fs::File::open(&job.output_path)
        .await
        .map_err(|_| ApiError::not_found("Export file not found on disk"))?;
    let filename = job
        .output_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("export_{}.{}", job.id, job.output_format.extension()));

    let body = StreamBody::new(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, job.output_format.media_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

async fn list_exports(
    State(state): State<AppState>,
    Path(timelapse_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExportJobResponse>>> {
    let timelapses = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    if timelapses.get_by_id(&timelapse_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "Timelapse not found: {}",
            timelapse_id
        )));
    }

    let jobs = ExportsRepository::new(Arc::clone(&state.db_pool))
        .get_by_timelapse(&timelapse_id)
        .await?;
    let responses = join_all(jobs.into_iter().map(|job| respond(&state, job))).await;
    Ok(Json(responses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewExportJob;
    use std::path::PathBuf;

    fn job(total_frames: i32, frames_done: i32) -> ExportJob {
        let mut job = NewExportJob {
            timelapse_id: Uuid::new_v4(),
            request: ExportRequest::default(),
            total_frames,
            output_path: PathBuf::from("/data/exports/timelapse_x_20260101T000000_000000.webm"),
        }
        .into_job()
        .unwrap();
        job.frames_done = frames_done;
        job
    }

    #[test]
    fn progress_is_rounded_to_one_decimal() {
        let response = ExportJobResponse::from_job(job(3, 1), None, None);
        assert_eq!(response.progress_pct, 33.3);
        assert_eq!(
            response.output_file.as_deref(),
            Some("timelapse_x_20260101T000000_000000.webm")
        );
    }

    #[test]
    fn live_progress_overrides_checkpoint() {
        let response = ExportJobResponse::from_job(job(200, 10), Some(150), None);
        assert_eq!(response.frames_done, 150);
        assert_eq!(response.progress_pct, 75.0);
    }

    #[test]
    fn file_size_is_only_reported_when_given() {
        let response = ExportJobResponse::from_job(job(10, 10), None, Some(4096));
        assert_eq!(response.file_size_bytes, Some(4096));
        assert_eq!(response.progress_pct, 100.0);
    }
}
