use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::SharedState,
};

/// Name of the series feed stream, echoed in the handshake.
pub const SERIES_STREAM: &str = "series";
const HANDSHAKE_EVENT: &str = "handshake";

/// Subscribe to the series feed and build the handshake sent ahead of live events.
pub fn subscribe_series(state: &SharedState) -> (broadcast::Receiver<ServerEvent>, ServerEvent) {
    let receiver = state.feed().subscribe();
    let handshake = handshake_event(state.is_degraded());
    (receiver, handshake)
}

fn handshake_event(degraded: bool) -> ServerEvent {
    let handshake = Handshake {
        stream: SERIES_STREAM.to_string(),
        message: "series stream connected".to_string(),
        degraded,
    };
    ServerEvent::json(Some(HANDSHAKE_EVENT.to_string()), &handshake).unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode SSE handshake");
        ServerEvent {
            event: Some(HANDSHAKE_EVENT.to_string()),
            data: String::new(),
        }
    })
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client leaves.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: ServerEvent,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(initial))).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE subscriber lagging; dropping events");
                            continue;
                        }
                    }
                }
            }
        }

        info!("series SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dto::sse::SERIES_MESSAGE_EVENT, services::test_support::test_app};

    #[tokio::test]
    async fn handshake_reports_degraded_mode() {
        let app = test_app();
        let (_receiver, handshake) = subscribe_series(&app.state);
        assert_eq!(handshake.event.as_deref(), Some(HANDSHAKE_EVENT));
        let body: serde_json::Value = serde_json::from_str(&handshake.data).unwrap();
        assert_eq!(body["stream"], "series");
        assert_eq!(body["degraded"], false);

        app.state.update_degraded(true);
        let (_receiver, handshake) = subscribe_series(&app.state);
        let body: serde_json::Value = serde_json::from_str(&handshake.data).unwrap();
        assert_eq!(body["degraded"], true);
    }

    #[tokio::test]
    async fn subscribers_receive_feed_events() {
        let app = test_app();
        let (mut receiver, _) = subscribe_series(&app.state);
        app.state.feed().broadcast(ServerEvent {
            event: Some(SERIES_MESSAGE_EVENT.to_string()),
            data: "{}".into(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(SERIES_MESSAGE_EVENT));
    }
}
