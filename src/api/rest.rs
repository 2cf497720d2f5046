pub mod cameras_controller;
pub mod exports_controller;
pub mod frames_controller;
pub mod settings_controller;
pub mod storage_controller;
pub mod timelapses_controller;

use crate::capture::{CaptureError, FrameSource};
use crate::clock::Clock;
use crate::config::ApiConfig;
use crate::db;
use crate::db::store::Store;
use crate::error::Error;
use crate::export::ExportController;
use crate::recorder::CaptureScheduler;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub store: Arc<dyn Store>,
    pub scheduler: CaptureScheduler,
    pub exports: ExportController,
    pub frame_source: Arc<dyn FrameSource>,
    pub clock: Arc<dyn Clock>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: status.as_u16(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::Validation(_) | Error::Camera(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Capture(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        Error::Capture(err.to_string()).into()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }
        if let Some(err) = err.downcast_ref::<CaptureError>() {
            return Error::Capture(err.to_string()).into();
        }

        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    version: &'static str,
}

impl HealthResponse {
    fn new(database_ok: bool) -> (StatusCode, Self) {
        let (code, status, database) = if database_ok {
            (StatusCode::OK, "ok", "ok")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unavailable")
        };
        (
            code,
            Self {
                status,
                database,
                version: env!("CARGO_PKG_VERSION"),
            },
        )
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, body) = HealthResponse::new(db::ping(&state.db_pool).await);
    (code, Json(body))
}

/// The `/api/v1` router without CORS or a listener, so it can be driven in-process
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .nest("/cameras", cameras_controller::create_router())
        .nest("/timelapses", timelapses_controller::create_router())
        .nest("/frames", frames_controller::create_router())
        .nest("/exports", exports_controller::create_router())
        .nest("/settings", settings_controller::create_router())
        .nest("/storage", storage_controller::create_router());

    Router::new().nest("/api/v1", api).with_state(state)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        let app = router(self.state.clone()).layer(cors);

        let addr: SocketAddr = format!("{}:{}", self.config.address, self.config.port).parse()?;
        info!("API server listening on {}", addr);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (Error::NotFound("x".into()), 404),
            (Error::InvalidState("x".into()), 409),
            (Error::AlreadyExists("x".into()), 409),
            (Error::Validation("x".into()), 422),
            (Error::Config("x".into()), 400),
            (Error::Capture("x".into()), 502),
            (Error::Database("x".into()), 500),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }

    #[test]
    fn health_reports_an_unreachable_database() {
        let (code, body) = HealthResponse::new(true);
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.database, "ok");

        let (code, body) = HealthResponse::new(false);
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.database, "unavailable");
    }

    #[test]
    fn anyhow_errors_are_downcast() {
        let err: anyhow::Error = Error::NotFound("Camera".into()).into();
        assert_eq!(ApiError::from(err).status, 404);

        let err: anyhow::Error = CaptureError::Timeout { seconds: 3 }.into();
        assert_eq!(ApiError::from(err).status, 502);

        let err = anyhow::anyhow!("boom");
        let api = ApiError::from(err);
        assert_eq!(api.status, 500);
        assert_eq!(api.message, "boom");
    }
}
