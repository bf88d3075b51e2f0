//! `GET /events`: live SSE feed of domain events.
//!
//! Each frame is named after the event kind and carries the serialized
//! event. Subscribers that fall behind skip the events they missed.

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::SharedState;

pub(crate) async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    debug!("Event feed subscriber connected");
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|received| match received {
        Ok(event) => {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Some(Ok(SseEvent::default().event(event.kind()).data(data)))
        }
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "Event feed subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
