//! Server-sent refresh signals.
//!
//! Clients subscribe once and re-fetch whatever the named channels cover
//! (`orders`, `order:<id>`, `products`). Signals carry no payload beyond the
//! channel names.

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{events::RefreshSignal, AppState};

pub fn events_routes() -> Router<AppState> {
    Router::new().route("/", get(subscribe))
}

fn to_sse(signal: &RefreshSignal) -> Event {
    match Event::default().event("refresh").json_data(signal) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "could not encode refresh signal");
            Event::default().event("refresh").data("{}")
        }
    }
}

/// Adapts a broadcast receiver into an SSE stream. A lagging subscriber
/// skips what it missed and keeps going.
pub fn refresh_stream(
    rx: broadcast::Receiver<RefreshSignal>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(signal) => return Some((Ok(to_sse(&signal)), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    metrics::counter!("refresh_signals_dropped_total", skipped);
                    debug!(skipped, "refresh subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// Stream of refresh signals.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    summary = "Subscribe to refresh signals",
    responses(
        (status = 200, description = "text/event-stream of `refresh` events", content_type = "text/event-stream", body = RefreshSignal),
    ),
    tag = "Events"
)]
pub async fn subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    metrics::counter!("refresh_subscriptions_total", 1);
    Sse::new(refresh_stream(state.refresh.subscribe()))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
