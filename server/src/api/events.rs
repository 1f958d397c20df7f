//! Server-sent job events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /events - every job event, named by its kind.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.service.events().subscribe();
    log::debug!("SSE client connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(data) => {
                        let name = match event.kind {
                            stemsplit::JobEventKind::Created => "created",
                            stemsplit::JobEventKind::Updated => "updated",
                            stemsplit::JobEventKind::Removed => "removed",
                        };
                        yield Ok(Event::default().event(name).data(data));
                    }
                    Err(e) => log::warn!("Failed to serialize job event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("SSE client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
