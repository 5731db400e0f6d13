use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::TurnEntity,
    dto::{
        matches::{MatchSnapshot, PlayerSnapshot, TurnRecordView},
        sse::{MatchFinishedEvent, ServerEvent},
    },
    state::{
        SharedState,
        match_session::MatchSession,
        state_machine::{FinishReason, MatchPhase},
    },
};

pub const EVENT_HANDSHAKE: &str = "handshake";
pub const EVENT_MATCH_UPDATED: &str = "match.updated";
pub const EVENT_TURN_RECORDED: &str = "turn.recorded";
pub const EVENT_MATCH_FINISHED: &str = "match.finished";

/// Broadcast the full snapshot after a committed transition.
pub fn broadcast_match_updated(state: &SharedState, session: &MatchSession) {
    let snapshot = MatchSnapshot::from(session);
    send_match_event(state, session.id, EVENT_MATCH_UPDATED, &snapshot);
}

/// Broadcast a freshly appended turn record.
pub fn broadcast_turn_recorded(state: &SharedState, turn: &TurnEntity) {
    let payload = TurnRecordView::from(turn);
    send_match_event(state, turn.match_id, EVENT_TURN_RECORDED, &payload);
}

/// Broadcast the winner and final tokens once a match is over.
pub fn broadcast_match_finished(state: &SharedState, session: &MatchSession) {
    let payload = MatchFinishedEvent {
        match_id: session.id,
        winner_id: session.winner_id,
        winner_user_id: session
            .winner_id
            .and_then(|id| session.player(id))
            .map(|player| player.user_id),
        forfeit: matches!(session.phase(), MatchPhase::Finished(FinishReason::Forfeit)),
        players: session.players.iter().map(PlayerSnapshot::from).collect(),
    };
    send_match_event(state, session.id, EVENT_MATCH_FINISHED, &payload);
}

fn send_match_event(state: &SharedState, match_id: Uuid, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.broadcast_match(match_id, event),
        Err(err) => warn!(%match_id, event, error = %err, "failed to serialize match SSE payload"),
    }
}
