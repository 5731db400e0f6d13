use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::TurnEntity,
    dto::{
        format_system_time,
        phase::{MatchStatusDto, VisibleMatchPhase},
        validation::validate_match_code,
    },
    state::{
        match_session::{MatchSession, Player, Resolution},
        state_machine::PendingQuestion,
    },
};

/// Open a new match as player 1.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateMatchRequest {
    pub user_id: Uuid,
    /// Question difficulty, 1 to 3.
    #[validate(range(min = 1, max = 3))]
    pub level: u8,
}

/// Join an open match with its code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinMatchRequest {
    pub user_id: Uuid,
    #[validate(custom(function = "validate_match_code"))]
    pub code: String,
}

/// Pick a category, or let the server spin for one when `category_id` is omitted.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SpinRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    /// Version of the match the client acted on.
    pub expected_version: u64,
}

/// Answer the pending question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AnswerRequest {
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub option_index: usize,
    pub expected_version: u64,
}

/// Choose the category to claim or steal during the character round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CharacterRequest {
    pub user_id: Uuid,
    pub category_id: Uuid,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ForfeitRequest {
    pub user_id: Uuid,
}

/// Question as shown to players. Never carries the answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionView {
    pub id: Uuid,
    pub category_id: Uuid,
    pub text: String,
    pub options: Vec<String>,
    pub asked_at: String,
    pub deadline: String,
    /// Milliseconds left on the countdown when the snapshot was taken.
    pub remaining_ms: u64,
}

impl QuestionView {
    fn from_pending(question: &PendingQuestion, now: SystemTime) -> Self {
        let remaining = question.deadline.duration_since(now).unwrap_or_default();
        Self {
            id: question.question_id,
            category_id: question.category_id,
            text: question.text.clone(),
            options: question.options.clone(),
            asked_at: format_system_time(question.asked_at),
            deadline: format_system_time(question.deadline),
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub player_number: u8,
    /// Category tokens held, in the order they were won.
    pub characters_collected: Vec<Uuid>,
    pub current_streak: u32,
    pub best_streak: u32,
}

impl From<&Player> for PlayerSnapshot {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            user_id: player.user_id,
            player_number: player.number,
            characters_collected: player.characters.iter().copied().collect(),
            current_streak: player.current_streak,
            best_streak: player.best_streak,
        }
    }
}

/// Category at stake during a character question.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CharacterClaimView {
    pub category_id: Uuid,
    /// Player the token would be taken from.
    pub stolen_from: Option<Uuid>,
}

/// Full observable state of a match.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MatchSnapshot {
    pub id: Uuid,
    pub code: String,
    pub status: MatchStatusDto,
    pub level: u8,
    pub phase: VisibleMatchPhase,
    /// Version to send back as `expected_version` with the next command.
    pub version: u64,
    pub current_player_id: Option<Uuid>,
    pub current_category_id: Option<Uuid>,
    pub winner_id: Option<Uuid>,
    pub characters_this_turn: u8,
    pub players: Vec<PlayerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_claim: Option<CharacterClaimView>,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl From<&MatchSession> for MatchSnapshot {
    fn from(session: &MatchSession) -> Self {
        let now = SystemTime::now();
        Self {
            id: session.id,
            code: session.code.clone(),
            status: session.status().into(),
            level: session.level,
            phase: session.phase().into(),
            version: session.version(),
            current_player_id: session.current_player_id,
            current_category_id: session.current_category_id,
            winner_id: session.winner_id,
            characters_this_turn: session.characters_this_turn,
            players: session.players.iter().map(PlayerSnapshot::from).collect(),
            question: session
                .pending_question()
                .map(|question| QuestionView::from_pending(question, now)),
            character_claim: session.pending_claim().map(|claim| CharacterClaimView {
                category_id: claim.category_id,
                stolen_from: claim.stolen_from,
            }),
            created_at: format_system_time(session.created_at),
            updated_at: format_system_time(session.updated_at),
            finished_at: session.finished_at.map(format_system_time),
        }
    }
}

/// One entry of the append-only turn log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TurnRecordView {
    pub id: Uuid,
    pub match_id: Uuid,
    pub player_id: Uuid,
    pub category_id: Uuid,
    pub question_id: Uuid,
    pub correct: bool,
    pub timed_out: bool,
    pub time_taken_ms: u64,
    pub streak_at_answer: u32,
    pub character_won: Option<Uuid>,
    pub created_at: String,
}

impl From<&TurnEntity> for TurnRecordView {
    fn from(turn: &TurnEntity) -> Self {
        Self {
            id: turn.id,
            match_id: turn.match_id,
            player_id: turn.player_id,
            category_id: turn.category_id,
            question_id: turn.question_id,
            correct: turn.correct,
            timed_out: turn.timed_out,
            time_taken_ms: turn.time_taken_ms,
            streak_at_answer: turn.streak_at_answer,
            character_won: turn.character_won,
            created_at: format_system_time(turn.created_at),
        }
    }
}

/// Outcome of an answer, with the match state it produced.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswerResponse {
    pub correct: bool,
    pub timed_out: bool,
    /// Revealed once the question is resolved.
    pub correct_index: usize,
    pub character_won: Option<Uuid>,
    pub stolen_from: Option<Uuid>,
    /// Player now holding the turn, when it changed hands.
    pub turn_passed_to: Option<Uuid>,
    pub finished: bool,
    pub turn: TurnRecordView,
    #[serde(rename = "match")]
    pub snapshot: MatchSnapshot,
}

impl AnswerResponse {
    pub fn new(resolution: &Resolution, session: &MatchSession) -> Self {
        Self {
            correct: resolution.turn.correct,
            timed_out: resolution.turn.timed_out,
            correct_index: resolution.correct_index,
            character_won: resolution.turn.character_won,
            stolen_from: resolution.stolen_from,
            turn_passed_to: resolution.turn_passed_to,
            finished: resolution.finished,
            turn: TurnRecordView::from(&resolution.turn),
            snapshot: MatchSnapshot::from(session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::QuestionEntity;
    use crate::state::match_session::MatchRules;

    #[test]
    fn snapshot_hides_the_correct_answer() {
        let now = SystemTime::now();
        let alice = Uuid::new_v4();
        let mut session = MatchSession::new(alice, 2, "QWERTY".into(), now);
        session.join(Uuid::new_v4(), now).unwrap();
        let question = QuestionEntity {
            id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            level: 2,
            text: "Largest planet?".into(),
            options: vec!["Mars".into(), "Jupiter".into()],
            correct_index: 1,
        };
        session
            .start_question(alice, &question, now, &MatchRules::default())
            .unwrap();

        let snapshot = MatchSnapshot::from(&session);
        assert_eq!(snapshot.phase, VisibleMatchPhase::Questions);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["question"]["id"], question.id.to_string());
        assert!(value["question"].get("correct_index").is_none());
        assert!(snapshot.question.unwrap().remaining_ms <= 20_000);
    }

    #[test]
    fn join_request_validates_code() {
        let ok = JoinMatchRequest {
            user_id: Uuid::new_v4(),
            code: "AB12CD".into(),
        };
        assert!(ok.validate().is_ok());
        let bad = JoinMatchRequest {
            user_id: Uuid::new_v4(),
            code: "ab12".into(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn create_request_validates_level() {
        let bad = CreateMatchRequest {
            user_id: Uuid::new_v4(),
            level: 4,
        };
        assert!(bad.validate().is_err());
    }
}
