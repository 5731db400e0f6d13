use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{
    InvitationEntity, MatchEntity, OutboxEntity, QuestionEntity, TurnEntity, UserStatsEntity,
};

pub const MATCH_PREFIX: &str = "match::";
pub const QUESTION_PREFIX: &str = "question::";
pub const STATS_PREFIX: &str = "stats::";
pub const INVITATION_PREFIX: &str = "invitation::";
pub const OUTBOX_PREFIX: &str = "outbox::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Body of a `PUT`/`DELETE` reply.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// Generic CouchDB document: `_id`/`_rev` envelope around a flattened body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, rev: Option<String>, body: T) -> Self {
        Self { id, rev, body }
    }
}

/// Match document. Players are part of [`MatchEntity`]; the turn log is embedded
/// so a resolved answer is one document write.
///
/// Stats increments and notifications ride along in `pending_*` until they have
/// been copied to their own documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchBody {
    #[serde(rename = "match")]
    pub entity: MatchEntity,
    #[serde(default)]
    pub turns: Vec<TurnEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_stats: Vec<UserStatsEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_outbox: Vec<OutboxEntity>,
}

impl MatchBody {
    pub fn new(entity: MatchEntity) -> Self {
        Self {
            entity,
            turns: Vec::new(),
            pending_stats: Vec::new(),
            pending_outbox: Vec::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_stats.is_empty() || !self.pending_outbox.is_empty()
    }
}

/// Stats totals plus the matches already folded into them, so replaying a
/// match's increments is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsBody {
    #[serde(flatten)]
    pub stats: UserStatsEntity,
    #[serde(default)]
    pub applied_matches: Vec<Uuid>,
}

pub type CouchMatchDocument = CouchDocument<MatchBody>;
pub type CouchQuestionDocument = CouchDocument<QuestionEntity>;
pub type CouchStatsDocument = CouchDocument<StatsBody>;
pub type CouchInvitationDocument = CouchDocument<InvitationEntity>;
pub type CouchOutboxDocument = CouchDocument<OutboxEntity>;

pub fn match_doc_id(id: Uuid) -> String {
    format!("{MATCH_PREFIX}{id}")
}

/// Questions are keyed by category first so a prefix scan returns a category pool.
pub fn question_doc_id(category_id: Uuid, id: Uuid) -> String {
    format!("{}{}", question_category_prefix(category_id), id)
}

pub fn question_category_prefix(category_id: Uuid) -> String {
    format!("{QUESTION_PREFIX}{category_id}::")
}

pub fn stats_doc_id(user_id: Uuid) -> String {
    format!("{STATS_PREFIX}{user_id}")
}

pub fn invitation_doc_id(id: Uuid) -> String {
    format!("{INVITATION_PREFIX}{id}")
}

pub fn outbox_doc_id(id: Uuid) -> String {
    format!("{OUTBOX_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_ids_share_category_prefix() {
        let category = Uuid::new_v4();
        let id = question_doc_id(category, Uuid::new_v4());
        assert!(id.starts_with(&question_category_prefix(category)));
        assert!(id.starts_with(QUESTION_PREFIX));
    }

    #[test]
    fn document_envelope_flattens_body() {
        let doc = CouchDocument::new(
            stats_doc_id(Uuid::nil()),
            None,
            StatsBody {
                stats: UserStatsEntity::default(),
                applied_matches: vec![Uuid::nil()],
            },
        );
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], format!("stats::{}", Uuid::nil()));
        assert!(value.get("_rev").is_none());
        assert_eq!(value["games_played"], 0);
        assert_eq!(value["applied_matches"].as_array().map(Vec::len), Some(1));

        let back: CouchStatsDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back.body.applied_matches, vec![Uuid::nil()]);
    }

    #[test]
    fn drained_match_body_omits_pending_fields() {
        let raw = serde_json::json!({
            "_id": match_doc_id(Uuid::nil()),
            "_rev": "1-a",
            "match": {
                "id": Uuid::nil(),
                "code": "ABC123",
                "status": "waiting",
                "level": 1,
                "current_player_id": null,
                "current_category_id": null,
                "winner_id": null,
                "phase": { "kind": "waiting" },
                "version": 0,
                "characters_this_turn": 0,
                "asked_question_ids": [],
                "players": [],
                "created_at": { "secs_since_epoch": 0, "nanos_since_epoch": 0 },
                "updated_at": { "secs_since_epoch": 0, "nanos_since_epoch": 0 },
                "finished_at": null
            }
        });
        let doc: CouchMatchDocument = serde_json::from_value(raw).unwrap();
        assert!(!doc.body.has_pending());

        let value = serde_json::to_value(&doc).unwrap();
        assert!(value.get("pending_stats").is_none());
        assert!(value.get("pending_outbox").is_none());
    }
}
