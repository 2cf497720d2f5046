use crate::api::rest::{ApiResult, AppState};
use crate::db::repositories::SettingsRepository;
use crate::recorder::storage::{self, StorageUsage};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn create_router() -> Router<AppState> {
    Router::new().route("/usage", get(get_usage))
}

async fn get_usage(State(state): State<AppState>) -> ApiResult<Json<StorageUsage>> {
    let settings = SettingsRepository::new(Arc::clone(&state.db_pool))
        .get_or_create()
        .await?;
    let usage = storage::usage(state.store.as_ref(), &settings.storage_path).await?;
    Ok(Json(usage))
}
