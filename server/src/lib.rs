//! HTTP transport for the stemsplit job service.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use stemsplit::JobService;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

pub use error::ApiError;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: JobService) -> Self {
        Self {
            service,
            started_at: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.service.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .merge(api::upload::routes())
        .merge(api::jobs::routes())
        .merge(api::events::routes())
        .merge(api::health::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
