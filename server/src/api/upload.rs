use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use stemsplit::UploadReceipt;

use crate::error::ApiError;
use crate::AppState;

const FILE_FIELD: &str = "file";

/// POST /upload - multipart form with a `file` field.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;

        let receipt = state.service.upload(&filename, bytes.to_vec()).await?;
        return Ok(Json(receipt));
    }

    Err(ApiError::bad_request("No file provided"))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}
