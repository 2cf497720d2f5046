use crate::api::rest::{ApiResult, AppState};
use crate::db::models::{Settings, SettingsUpdate};
use crate::db::repositories::SettingsRepository;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use std::sync::Arc;

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(get_settings).patch(update_settings))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Settings>> {
    let repo = SettingsRepository::new(Arc::clone(&state.db_pool));
    Ok(Json(repo.get_or_create().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    let repo = SettingsRepository::new(Arc::clone(&state.db_pool));
    let current = repo.get_or_create().await?;
    let updated = repo.update(&payload.apply(current)?).await?;

    info!("Settings updated");
    Ok(Json(updated))
}
