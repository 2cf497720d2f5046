use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::capture::{CaptureParams, FrameSource};
use crate::db::models::{Camera, CameraCreate, CameraUpdate, ConnectionType};
use crate::db::repositories::{CamerasRepository, SettingsRepository};
use crate::recorder::lifecycle;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Camera description for a one-off capture that is not persisted
#[derive(Debug, Deserialize)]
pub struct TestCaptureRequest {
    pub connection_type: ConnectionType,
    pub rtsp_url: Option<String>,
    pub device_index: Option<i32>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cameras).post(create_camera))
        .route("/test-capture", post(test_capture))
        .route(
            "/:id",
            get(get_camera).patch(update_camera).delete(delete_camera),
        )
}

async fn get_cameras(State(state): State<AppState>) -> ApiResult<Json<Vec<Camera>>> {
    let repo = CamerasRepository::new(Arc::clone(&state.db_pool));
    Ok(Json(repo.get_all().await?))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Camera>> {
    let repo = CamerasRepository::new(Arc::clone(&state.db_pool));
    let camera = repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Camera not found: {}", id)))?;

    Ok(Json(camera))
}

async fn create_camera(
    State(state): State<AppState>,
    Json(payload): Json<CameraCreate>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    let camera = payload.into_camera()?;
    let repo = CamerasRepository::new(Arc::clone(&state.db_pool));
    let camera = repo.create(&camera).await?;

    info!("Created camera {} ({})", camera.name, camera.id);
    Ok((StatusCode::CREATED, Json(camera)))
}

async fn update_camera(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CameraUpdate>,
) -> ApiResult<Json<Camera>> {
    let repo = CamerasRepository::new(Arc::clone(&state.db_pool));
    let current = repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Camera not found: {}", id)))?;

    let updated = payload.apply(current)?;
    Ok(Json(repo.update(&updated).await?))
}

/// Stops and cleans up every timelapse of the camera before the row goes
async fn delete_camera(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let repo = CamerasRepository::new(Arc::clone(&state.db_pool));
    if repo.get_by_id(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("Camera not found: {}", id)));
    }

    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    let released =
        lifecycle::release_camera(state.store.as_ref(), &state.scheduler, &settings.storage_path, &id)
            .await?;

    repo.delete(&id).await?;
    info!(
        "Deleted camera {} and {} timelapse(s)",
        id, released
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn test_capture(
    State(state): State<AppState>,
    Json(payload): Json<TestCaptureRequest>,
) -> ApiResult<Response> {
    let source = CameraCreate {
        name: "test-capture".to_string(),
        connection_type: payload.connection_type,
        rtsp_url: payload.rtsp_url,
        device_index: payload.device_index,
        enabled: true,
    }
    .into_camera()?
    .source()?;

    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    let params = CaptureParams::from_settings(&settings);
    let data = state.frame_source.capture(&source, &params).await?;

    Ok((
        [(header::CONTENT_TYPE, params.format.media_type())],
        data,
    )
        .into_response())
}
