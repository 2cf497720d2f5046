use crate::api::rest::{ApiError, ApiResult, AppState};
use crate::db::models::{Timelapse, TimelapseCreate, TimelapseUpdate};
use crate::db::repositories::{CamerasRepository, SettingsRepository, TimelapsesRepository};
use crate::db::store::Store;
use crate::recorder::{lifecycle, ScheduleAction};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TimelapseQuery {
    pub camera_id: Option<Uuid>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_timelapses).post(create_timelapse))
        .route(
            "/:id",
            get(get_timelapse)
                .patch(update_timelapse)
                .delete(delete_timelapse),
        )
}

async fn get_timelapses(
    State(state): State<AppState>,
    Query(query): Query<TimelapseQuery>,
) -> ApiResult<Json<Vec<Timelapse>>> {
    let repo = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    Ok(Json(repo.get_all(query.camera_id).await?))
}

async fn get_timelapse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Timelapse>> {
    let repo = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    let timelapse = repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Timelapse not found: {}", id)))?;

    Ok(Json(timelapse))
}

async fn create_timelapse(
    State(state): State<AppState>,
    Json(payload): Json<TimelapseCreate>,
) -> ApiResult<(StatusCode, Json<Timelapse>)> {
    let cameras = CamerasRepository::new(Arc::clone(&state.db_pool));
    if cameras.get_by_id(&payload.camera_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "Camera not found: {}",
            payload.camera_id
        )));
    }

    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    let timelapse = payload.into_timelapse(settings.default_capture_interval_seconds)?;

    let repo = TimelapsesRepository::new(Arc::clone(&state.db_pool));
    let timelapse = repo.create(&timelapse).await?;
    info!(
        "Created timelapse {} ({}) on camera {}",
        timelapse.name, timelapse.id, timelapse.camera_id
    );

    let action = ScheduleAction::for_new(&timelapse, state.clock.now());
    state.scheduler.apply(timelapse.id, action).await?;

    Ok((StatusCode::CREATED, Json(timelapse)))
}

async fn update_timelapse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TimelapseUpdate>,
) -> ApiResult<Json<Timelapse>> {
    let updated = lifecycle::update_timelapse(
        state.store.as_ref(),
        &state.scheduler,
        state.clock.now(),
        &id,
        payload,
    )
    .await?;

    Ok(Json(updated))
}

async fn delete_timelapse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.store.get_timelapse(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("Timelapse not found: {}", id)));
    }

    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    lifecycle::delete_timelapse(state.store.as_ref(), &state.scheduler, &settings.storage_path, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
