use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        matches::MatchSnapshot,
        sse::{Handshake, ServerEvent},
    },
    error::ServiceError,
    services::sse_events::{EVENT_HANDSHAKE, EVENT_MATCH_UPDATED},
    state::SharedState,
};

/// Subscribe to the events of an existing match.
///
/// Returns the receiver plus the events every new client gets first: a
/// handshake and the current snapshot. The snapshot is read after subscribing,
/// so no commit falls between the two. A finished match gets a receiver that is
/// already closed: the client sees the final snapshot and the stream ends.
pub async fn subscribe_match(
    state: &SharedState,
    match_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, Vec<ServerEvent>), ServiceError> {
    let receiver = match state.subscribe_match(match_id) {
        Some(receiver) => receiver,
        None => {
            // Loading registers the slot of a match that can still change.
            state.load_session(match_id).await?;
            state
                .subscribe_match(match_id)
                .unwrap_or_else(closed_receiver)
        }
    };
    let session = state.load_session(match_id).await?;

    let handshake = Handshake {
        match_id,
        version: session.version(),
        degraded: state.is_degraded().await,
    };
    let snapshot = MatchSnapshot::from(&session);
    let initial = vec![
        ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake)
            .map_err(|err| ServiceError::InvalidState(err.to_string()))?,
        ServerEvent::json(Some(EVENT_MATCH_UPDATED.to_string()), &snapshot)
            .map_err(|err| ServiceError::InvalidState(err.to_string()))?,
    ];
    Ok((receiver, initial))
}

fn closed_receiver() -> broadcast::Receiver<ServerEvent> {
    let (_, receiver) = broadcast::channel(1);
    receiver
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects or the match hub closes.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
    match_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
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
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }
        info!(%match_id, "match SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
