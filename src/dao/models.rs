use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Question stored in the bank, including its answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Stable identifier for the question.
    pub id: Uuid,
    /// Category the question belongs to.
    pub category_id: Uuid,
    /// Difficulty level (1 to 3).
    pub level: u8,
    /// Prompt shown to the player.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option inside `options`.
    pub correct_index: usize,
}

/// Lifecycle status of a match row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatusEntity {
    Waiting,
    Active,
    Finished,
}

/// Persisted form of a served question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingQuestionEntity {
    pub question_id: Uuid,
    pub category_id: Uuid,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub asked_at: SystemTime,
    pub deadline: SystemTime,
}

/// Persisted form of a character-round claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharacterClaimEntity {
    pub category_id: Uuid,
    pub stolen_from: Option<Uuid>,
}

/// Persisted turn phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseEntity {
    Waiting,
    Wheel,
    Questions {
        question: PendingQuestionEntity,
    },
    CharacterPicking,
    CharacterAnswering {
        question: PendingQuestionEntity,
        claim: CharacterClaimEntity,
    },
    Finished {
        forfeit: bool,
    },
}

/// Player row of a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier for the player row.
    pub id: Uuid,
    /// Match this player belongs to.
    pub match_id: Uuid,
    /// Platform user behind the player.
    pub user_id: Uuid,
    /// Seat number, 1 or 2.
    pub player_number: u8,
    /// Category tokens held, in the order they were won.
    pub characters_collected: Vec<Uuid>,
    /// Consecutive correct answers in the current turn.
    pub current_streak: u32,
    /// Longest streak reached in this match.
    pub best_streak: u32,
}

/// Aggregate match entity persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchEntity {
    /// Primary key of the match.
    pub id: Uuid,
    /// Short code shared with the opponent to join.
    pub code: String,
    /// Lifecycle status, derived from the phase.
    pub status: MatchStatusEntity,
    /// Difficulty level of the questions served.
    pub level: u8,
    /// Player (row id) whose turn it is.
    pub current_player_id: Option<Uuid>,
    /// Category of the last question served.
    pub current_category_id: Option<Uuid>,
    /// Winning player (row id) once finished.
    pub winner_id: Option<Uuid>,
    /// Turn phase.
    pub phase: PhaseEntity,
    /// Optimistic concurrency version, bumped on every transition.
    pub version: u64,
    /// Characters won by the current player since their turn started.
    pub characters_this_turn: u8,
    /// Questions already served in this match.
    pub asked_question_ids: Vec<Uuid>,
    /// Both players, ordered by seat.
    pub players: Vec<PlayerEntity>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the match entity was updated.
    pub updated_at: SystemTime,
    /// When the match reached its terminal phase.
    pub finished_at: Option<SystemTime>,
}

/// Append-only log entry written for every resolved question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnEntity {
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
    pub created_at: SystemTime,
}

/// Per-user aggregated statistics row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserStatsEntity {
    pub user_id: Uuid,
    pub games_played: u32,
    pub games_won: u32,
    pub games_lost: u32,
    pub total_points: u64,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub characters_collected: u32,
    pub best_streak: u32,
}

impl UserStatsEntity {
    /// Add the increments of one finished match to these totals.
    pub fn accumulate(&mut self, delta: &UserStatsEntity) {
        self.games_played += delta.games_played;
        self.games_won += delta.games_won;
        self.games_lost += delta.games_lost;
        self.total_points += delta.total_points;
        self.correct_answers += delta.correct_answers;
        self.wrong_answers += delta.wrong_answers;
        self.characters_collected += delta.characters_collected;
        self.best_streak = self.best_streak.max(delta.best_streak);
    }
}

/// Status of a match invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatusEntity {
    Pending,
    Accepted,
    Declined,
}

/// Invitation from one user to another to play a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationEntity {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub level: u8,
    pub status: InvitationStatusEntity,
    pub match_id: Option<Uuid>,
    pub created_at: SystemTime,
    pub responded_at: Option<SystemTime>,
}

/// Delivery channel of an outbox notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Push,
    Email,
}

/// Notification waiting to be delivered by the outbox dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntity {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub recipient_user_id: Uuid,
    pub match_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Earliest time of the next delivery attempt.
    pub next_attempt_at: SystemTime,
    /// Set once the entry gave up after too many failures.
    pub dead: bool,
    pub last_error: Option<String>,
    pub created_at: SystemTime,
}

/// Everything produced by one resolved command, written as a single unit.
#[derive(Debug, Clone)]
pub struct MatchCommit {
    /// New match state; its version must be `expected_version + 1`.
    pub entity: MatchEntity,
    /// Version the command was computed against.
    pub expected_version: u64,
    /// Turn record to append, if a question was resolved.
    pub turn: Option<TurnEntity>,
    /// Per-user stats increments, added to the stored totals.
    pub stats: Vec<UserStatsEntity>,
    /// Notifications to enqueue.
    pub outbox: Vec<OutboxEntity>,
}
