use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use stemsplit::{JobStatus, SeparateParams, StatusReport};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub file_id: String,
    pub status: JobStatus,
}

/// POST /separate - queues a separation and returns immediately.
pub async fn separate(
    State(state): State<AppState>,
    payload: Result<Json<SeparateParams>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(params) = payload?;
    state.service.start_separation(&params)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            file_id: params.file_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /status/:file_id
pub async fn status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(state.service.status(&file_id)?))
}

/// GET /download/:file_id/:stem - the stem as a WAV attachment.
pub async fn download(
    State(state): State<AppState>,
    Path((file_id, stem)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.service.read_stem(&file_id, &stem).await?;
    // read_stem only succeeds for known stem names
    let disposition = format!("attachment; filename=\"{}.wav\"", stem);

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// POST /cancel/:file_id
pub async fn cancel(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.cancel(&file_id)?;
    Ok(StatusCode::ACCEPTED)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/separate", post(separate))
        .route("/status/:file_id", get(status))
        .route("/download/:file_id/:stem", get(download))
        .route("/cancel/:file_id", post(cancel))
}
