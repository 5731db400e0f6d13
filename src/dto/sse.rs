use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::matches::PlayerSnapshot;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First message sent to an SSE client when it connects.
pub struct Handshake {
    pub match_id: Uuid,
    /// Version of the match at subscription time.
    pub version: u64,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once when a match reaches its terminal phase.
pub struct MatchFinishedEvent {
    pub match_id: Uuid,
    /// Winning player, absent when the only player forfeited a waiting match.
    pub winner_id: Option<Uuid>,
    pub winner_user_id: Option<Uuid>,
    pub forfeit: bool,
    /// Final tokens of both players.
    pub players: Vec<PlayerSnapshot>,
}
