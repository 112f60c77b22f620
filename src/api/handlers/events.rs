use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::AppState;

/// Stream store notifications as server-sent events. Connecting takes over the
/// observer slot from any previous client.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(state.store.register_observer())
        .map(|event| Ok(Event::default().event(event.name()).data(event.identity())));

    Sse::new(events).keep_alive(KeepAlive::default())
}
