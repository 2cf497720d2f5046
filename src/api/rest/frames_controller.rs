use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::db::models::{Frame, FrameCreate, FrameUpdate};
use crate::db::repositories::{FramesRepository, TimelapsesRepository};
use crate::db::store::Store;
use axum::body::StreamBody;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::warn;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    pub timelapse_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_frames).post(create_frame))
        .route("/:id", get(get_frame).patch(update_frame).delete(delete_frame))
        .route("/:id/image", get(get_frame_image))
}

/// Media type from the file extension written by the capture executor
fn image_media_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn load_frame(state: &AppState, id: &Uuid) -> ApiResult<Frame> {
    FramesRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Frame not found: {}", id)))
}

async fn get_frames(
    State(state): State<AppState>,
    Query(query): Query<FrameQuery>,
) -> ApiResult<Json<Vec<Frame>>> {
    let repo = FramesRepository::new(Arc::clone(&state.db_pool));
    let frames = repo
        .get_all(
            query.timelapse_id,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(0),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(frames))
}

async fn get_frame(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Frame>> {
    Ok(Json(load_frame(&state, &id).await?))
}

async fn get_frame_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let frame = load_frame(&state, &id).await?;
    let file = tokio::fs::File::open(&frame.file_path)
        .await
        .map_err(|_| ApiError::not_found("Frame image file not found on disk"))?;

    let body = StreamBody::new(ReaderStream::new(file));
    Ok((
        [(header::CONTENT_TYPE, image_media_type(&frame.file_path))],
        body,
    )
        .into_response())
}

async fn create_frame(
    State(state): State<AppState>,
    Json(payload): Json<FrameCreate>,
) -> ApiResult<(StatusCode, Json<Frame>)> {
    let timelapses = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    if timelapses.get_by_id(&payload.timelapse_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "Timelapse not found: {}",
            payload.timelapse_id
        )));
    }

    let repo = FramesRepository::new(Arc::clone(&state.db_pool));
    let frame = repo.create(&payload.into_frame()).await?;
    Ok((StatusCode::CREATED, Json(frame)))
}

async fn update_frame(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FrameUpdate>,
) -> ApiResult<Json<Frame>> {
    let frame = load_frame(&state, &id).await?;
    let Some(file_path) = payload.file_path else {
        return Ok(Json(frame));
    };

    let repo = FramesRepository::new(Arc::clone(&state.db_pool));
    Ok(Json(repo.update_path(&id, &file_path.to_string_lossy()).await?))
}

/// Removes the image file as well and gives its bytes back to the timelapse
async fn delete_frame(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let frame = load_frame(&state, &id).await?;

    let size = match tokio::fs::metadata(&frame.file_path).await {
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    };
    if let Err(e) = tokio::fs::remove_file(&frame.file_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove frame file {}: {}", frame.file_path.display(), e);
        }
    }

    state.store.delete_frame(&id, size).await?;
    Ok(StatusCode::NO_CONTENT)
}
