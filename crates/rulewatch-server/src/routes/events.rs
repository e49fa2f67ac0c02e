use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /events: SSE stream. Opens with a `ping` event, then sends one
/// `data: <json>` frame per broadcast. The subscription is released when
/// the client disconnects and axum drops this stream.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let subscription = app.events.subscribe();
    let hello = tokio_stream::once(Ok::<Event, Infallible>(
        Event::default().event("ping").data("connected"),
    ));
    let updates = subscription.filter_map(|event| match Event::default().json_data(&event) {
        Ok(frame) => Some(Ok(frame)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode event");
            None
        }
    });
    Sse::new(hello.chain(updates)).keep_alive(KeepAlive::default())
}
