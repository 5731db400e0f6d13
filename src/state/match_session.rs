use std::time::{Duration, SystemTime};

use indexmap::IndexSet;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::models::{
        CharacterClaimEntity, MatchEntity, MatchStatusEntity, PendingQuestionEntity, PhaseEntity,
        PlayerEntity, QuestionEntity, TurnEntity,
    },
    state::{
        category::CATEGORY_COUNT,
        state_machine::{
            CharacterClaim, CharacterStage, FinishReason, InvalidTransition, MatchEvent,
            MatchPhase, MatchStateMachine, PendingQuestion,
        },
    },
};

/// Gameplay constants applied to every match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRules {
    /// Countdown for every question.
    pub question_time_limit: Duration,
    /// Size of the shuffled sample fetched for a category.
    pub questions_per_spin: usize,
    /// Consecutive correct answers unlocking the character round.
    pub streak_for_character_round: u32,
    /// Characters won in one turn before it passes to the opponent.
    pub characters_per_turn: u8,
    /// Points awarded to the winner.
    pub win_points: u32,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            question_time_limit: Duration::from_secs(20),
            questions_per_spin: 5,
            streak_for_character_round: 3,
            characters_per_turn: 3,
            win_points: 100,
        }
    }
}

/// Lifecycle status derived from the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
}

/// One of the two seats of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Player row identifier.
    pub id: Uuid,
    /// Platform user behind the seat.
    pub user_id: Uuid,
    /// Seat number, 1 or 2.
    pub number: u8,
    /// Category tokens held, in the order they were won.
    pub characters: IndexSet<Uuid>,
    /// Consecutive correct answers in the current turn.
    pub current_streak: u32,
    /// Longest streak reached in this match.
    pub best_streak: u32,
}

impl Player {
    fn new(user_id: Uuid, number: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            number,
            characters: IndexSet::new(),
            current_streak: 0,
            best_streak: 0,
        }
    }

    /// Whether the player holds every category.
    pub fn has_all_characters(&self) -> bool {
        self.characters.len() >= CATEGORY_COUNT
    }
}

/// Violations of the match rules, detected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("user `{0}` is not a player of this match")]
    NotAPlayer(Uuid),
    #[error("it is not the turn of user `{0}`")]
    NotYourTurn(Uuid),
    #[error("match already has two players")]
    MatchFull,
    #[error("user `{0}` cannot join their own match")]
    OwnMatch(Uuid),
    #[error("match is finished")]
    Finished,
    #[error("operation requires the {expected} phase")]
    WrongPhase { expected: &'static str },
    #[error("question `{got}` is not the pending question")]
    QuestionMismatch { got: Uuid },
    #[error("option {index} is out of range ({count} options)")]
    OptionOutOfRange { index: usize, count: usize },
    #[error("category `{0}` is already collected")]
    AlreadyCollected(Uuid),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Outcome of a resolved question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Turn record to append.
    pub turn: TurnEntity,
    /// Index of the correct option, revealed once resolved.
    pub correct_index: usize,
    /// Player now holding the turn, when it changed hands.
    pub turn_passed_to: Option<Uuid>,
    /// Player a character was taken from.
    pub stolen_from: Option<Uuid>,
    /// Whether this resolution ended the match.
    pub finished: bool,
}

/// Authoritative runtime state of a single match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSession {
    /// Primary key.
    pub id: Uuid,
    /// Join code.
    pub code: String,
    /// Question difficulty.
    pub level: u8,
    /// Seats, ordered by number.
    pub players: Vec<Player>,
    /// Player holding the turn.
    pub current_player_id: Option<Uuid>,
    /// Category of the last question served.
    pub current_category_id: Option<Uuid>,
    /// Winner once finished.
    pub winner_id: Option<Uuid>,
    /// Characters won by the current player during this turn.
    pub characters_this_turn: u8,
    /// Questions already served, never repeated within a match.
    pub asked_question_ids: Vec<Uuid>,
    machine: MatchStateMachine,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last transition timestamp.
    pub updated_at: SystemTime,
    /// Terminal timestamp.
    pub finished_at: Option<SystemTime>,
}

impl MatchSession {
    /// Open a match seating the creator as player 1.
    pub fn new(creator: Uuid, level: u8, code: String, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            level,
            players: vec![Player::new(creator, 1)],
            current_player_id: None,
            current_category_id: None,
            winner_id: None,
            characters_this_turn: 0,
            asked_question_ids: Vec::new(),
            machine: MatchStateMachine::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Current turn phase.
    pub fn phase(&self) -> &MatchPhase {
        self.machine.phase()
    }

    /// Optimistic concurrency version.
    pub fn version(&self) -> u64 {
        self.machine.version()
    }

    /// Question awaiting an answer, if any.
    pub fn pending_question(&self) -> Option<&PendingQuestion> {
        self.machine.pending_question()
    }

    /// Claim at stake during a character question.
    pub fn pending_claim(&self) -> Option<&CharacterClaim> {
        self.machine.pending_claim()
    }

    /// Lifecycle status.
    pub fn status(&self) -> MatchStatus {
        match self.machine.phase() {
            MatchPhase::Waiting => MatchStatus::Waiting,
            MatchPhase::Finished(_) => MatchStatus::Finished,
            _ => MatchStatus::Active,
        }
    }

    /// Seat of a player row.
    pub fn player(&self, player_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    /// Seat of a platform user.
    pub fn player_by_user(&self, user_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    /// Seat opposite to `player_id`.
    pub fn opponent_of(&self, player_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id != player_id)
    }

    /// Seat holding the turn.
    pub fn current_player(&self) -> Option<&Player> {
        self.current_player_id.and_then(|id| self.player(id))
    }

    fn player_mut(&mut self, player_id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    /// Return the acting user's player id when they own the turn.
    pub fn ensure_turn(&self, user_id: Uuid) -> Result<Uuid, RuleError> {
        if self.machine.is_finished() {
            return Err(RuleError::Finished);
        }
        let player = self
            .player_by_user(user_id)
            .ok_or(RuleError::NotAPlayer(user_id))?;
        if self.current_player_id != Some(player.id) {
            return Err(RuleError::NotYourTurn(user_id));
        }
        Ok(player.id)
    }

    /// Check the user may pick a category now.
    pub fn ensure_can_spin(&self, user_id: Uuid) -> Result<Uuid, RuleError> {
        let player_id = self.ensure_turn(user_id)?;
        if !matches!(self.phase(), MatchPhase::Wheel) {
            return Err(RuleError::WrongPhase { expected: "wheel" });
        }
        Ok(player_id)
    }

    /// Check the user may pick `category_id` in the character round and
    /// return the claim it would produce.
    pub fn ensure_can_choose_character(
        &self,
        user_id: Uuid,
        category_id: Uuid,
    ) -> Result<CharacterClaim, RuleError> {
        let player_id = self.ensure_turn(user_id)?;
        if !matches!(
            self.phase(),
            MatchPhase::CharacterRound(CharacterStage::Picking)
        ) {
            return Err(RuleError::WrongPhase {
                expected: "character round",
            });
        }
        let player = self
            .player(player_id)
            .ok_or(RuleError::NotAPlayer(user_id))?;
        if player.characters.contains(&category_id) {
            return Err(RuleError::AlreadyCollected(category_id));
        }
        let stolen_from = self
            .opponent_of(player_id)
            .filter(|opponent| opponent.characters.contains(&category_id))
            .map(|opponent| opponent.id);
        Ok(CharacterClaim {
            category_id,
            stolen_from,
        })
    }

    /// Seat the second player and hand the first turn to player 1.
    pub fn join(&mut self, user_id: Uuid, now: SystemTime) -> Result<Uuid, RuleError> {
        if self.machine.is_finished() {
            return Err(RuleError::Finished);
        }
        if self.player_by_user(user_id).is_some() {
            return Err(RuleError::OwnMatch(user_id));
        }
        if self.players.len() >= 2 {
            return Err(RuleError::MatchFull);
        }
        self.machine.advance(MatchEvent::OpponentJoined)?;

        let player = Player::new(user_id, 2);
        let player_id = player.id;
        self.players.push(player);
        self.current_player_id = self.players.first().map(|p| p.id);
        self.updated_at = now;
        Ok(player_id)
    }

    /// Serve the first question of a spun category.
    pub fn start_question(
        &mut self,
        user_id: Uuid,
        question: &QuestionEntity,
        now: SystemTime,
        rules: &MatchRules,
    ) -> Result<(), RuleError> {
        self.ensure_can_spin(user_id)?;
        let pending = pending_from(question, now, rules);
        self.machine.advance(MatchEvent::CategorySelected(pending))?;
        self.current_category_id = Some(question.category_id);
        self.asked_question_ids.push(question.id);
        self.updated_at = now;
        Ok(())
    }

    /// Serve a character question for a claim or steal of `question.category_id`.
    pub fn choose_character(
        &mut self,
        user_id: Uuid,
        question: &QuestionEntity,
        now: SystemTime,
        rules: &MatchRules,
    ) -> Result<CharacterClaim, RuleError> {
        let claim = self.ensure_can_choose_character(user_id, question.category_id)?;
        let pending = pending_from(question, now, rules);
        self.machine.advance(MatchEvent::CharacterChosen {
            question: pending,
            claim,
        })?;
        self.current_category_id = Some(question.category_id);
        self.asked_question_ids.push(question.id);
        self.updated_at = now;
        Ok(claim)
    }

    /// Resolve the pending question with the option picked by `user_id`.
    ///
    /// An answer arriving after the deadline counts as a timeout.
    pub fn resolve_answer(
        &mut self,
        user_id: Uuid,
        question_id: Uuid,
        option_index: usize,
        now: SystemTime,
        rules: &MatchRules,
    ) -> Result<Resolution, RuleError> {
        let player_id = self.ensure_turn(user_id)?;
        let pending = self.expect_pending(question_id)?;
        if option_index >= pending.options.len() {
            return Err(RuleError::OptionOutOfRange {
                index: option_index,
                count: pending.options.len(),
            });
        }

        if pending.is_expired(now) {
            self.resolve(player_id, pending, false, true, now, rules)
        } else {
            let correct = option_index == pending.correct_index;
            self.resolve(player_id, pending, correct, false, now, rules)
        }
    }

    /// Resolve the pending question as unanswered once its countdown elapsed.
    pub fn resolve_timeout(
        &mut self,
        question_id: Uuid,
        now: SystemTime,
        rules: &MatchRules,
    ) -> Result<Resolution, RuleError> {
        if self.machine.is_finished() {
            return Err(RuleError::Finished);
        }
        let pending = self.expect_pending(question_id)?;
        let player_id = self
            .current_player_id
            .ok_or(RuleError::WrongPhase { expected: "active" })?;
        self.resolve(player_id, pending, false, true, now, rules)
    }

    /// End the match in favour of the other player.
    pub fn forfeit(&mut self, user_id: Uuid, now: SystemTime) -> Result<Option<Uuid>, RuleError> {
        if self.machine.is_finished() {
            return Err(RuleError::Finished);
        }
        let player_id = self
            .player_by_user(user_id)
            .map(|p| p.id)
            .ok_or(RuleError::NotAPlayer(user_id))?;
        self.machine.advance(MatchEvent::Forfeit)?;

        self.winner_id = self.opponent_of(player_id).map(|p| p.id);
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(self.winner_id)
    }

    fn expect_pending(&self, question_id: Uuid) -> Result<PendingQuestion, RuleError> {
        let pending = self
            .machine
            .pending_question()
            .ok_or(RuleError::WrongPhase {
                expected: "question",
            })?;
        if pending.question_id != question_id {
            return Err(RuleError::QuestionMismatch { got: question_id });
        }
        Ok(pending.clone())
    }

    fn resolve(
        &mut self,
        player_id: Uuid,
        pending: PendingQuestion,
        correct: bool,
        timed_out: bool,
        now: SystemTime,
        rules: &MatchRules,
    ) -> Result<Resolution, RuleError> {
        let claim = self.machine.pending_claim().copied();
        let time_taken = now
            .duration_since(pending.asked_at)
            .unwrap_or_default()
            .min(rules.question_time_limit);

        let mut turn_passed_to = None;
        let mut character_won = None;
        let mut stolen_from = None;

        match (claim, correct) {
            (None, true) => {
                let streak = self
                    .players
                    .iter()
                    .find(|p| p.id == player_id)
                    .map(|p| p.current_streak + 1)
                    .unwrap_or(1);
                self.machine.advance(MatchEvent::AnswerCorrect {
                    character_round: streak >= rules.streak_for_character_round,
                })?;
                if let Some(player) = self.player_mut(player_id) {
                    player.current_streak = streak;
                    player.best_streak = player.best_streak.max(streak);
                }
            }
            (Some(claim), true) => {
                let match_won = {
                    let player = self
                        .player(player_id)
                        .ok_or(RuleError::NotAPlayer(player_id))?;
                    let gained = usize::from(!player.characters.contains(&claim.category_id));
                    player.characters.len() + gained >= CATEGORY_COUNT
                };
                self.machine
                    .advance(MatchEvent::CharacterWon { match_won })?;

                if let Some(victim) = claim.stolen_from {
                    if let Some(opponent) = self.player_mut(victim) {
                        opponent.characters.shift_remove(&claim.category_id);
                    }
                    stolen_from = Some(victim);
                }
                if let Some(player) = self.player_mut(player_id) {
                    player.characters.insert(claim.category_id);
                    player.current_streak = 0;
                }
                character_won = Some(claim.category_id);
                self.characters_this_turn = self.characters_this_turn.saturating_add(1);

                if match_won {
                    self.winner_id = Some(player_id);
                    self.finished_at = Some(now);
                } else if self.characters_this_turn >= rules.characters_per_turn {
                    turn_passed_to = self.pass_turn(player_id);
                }
            }
            (_, false) => {
                self.machine.advance(MatchEvent::AnswerMissed)?;
                turn_passed_to = self.pass_turn(player_id);
            }
        }

        self.updated_at = now;
        let streak_at_answer = self
            .player(player_id)
            .map(|p| p.current_streak)
            .unwrap_or_default();

        Ok(Resolution {
            turn: TurnEntity {
                id: Uuid::new_v4(),
                match_id: self.id,
                player_id,
                category_id: pending.category_id,
                question_id: pending.question_id,
                correct,
                timed_out,
                time_taken_ms: u64::try_from(time_taken.as_millis()).unwrap_or(u64::MAX),
                streak_at_answer,
                character_won,
                created_at: now,
            },
            correct_index: pending.correct_index,
            turn_passed_to,
            stolen_from,
            finished: self.machine.is_finished(),
        })
    }

    /// Hand the turn to the opponent, resetting the per-turn counters.
    fn pass_turn(&mut self, player_id: Uuid) -> Option<Uuid> {
        if let Some(player) = self.player_mut(player_id) {
            player.current_streak = 0;
        }
        self.characters_this_turn = 0;
        let next = self.opponent_of(player_id).map(|p| p.id);
        if next.is_some() {
            self.current_player_id = next;
        }
        next
    }
}

fn pending_from(question: &QuestionEntity, now: SystemTime, rules: &MatchRules) -> PendingQuestion {
    PendingQuestion {
        question_id: question.id,
        category_id: question.category_id,
        text: question.text.clone(),
        options: question.options.clone(),
        correct_index: question.correct_index,
        asked_at: now,
        deadline: now + rules.question_time_limit,
    }
}

impl From<MatchStatus> for MatchStatusEntity {
    fn from(value: MatchStatus) -> Self {
        match value {
            MatchStatus::Waiting => MatchStatusEntity::Waiting,
            MatchStatus::Active => MatchStatusEntity::Active,
            MatchStatus::Finished => MatchStatusEntity::Finished,
        }
    }
}

impl From<PendingQuestionEntity> for PendingQuestion {
    fn from(value: PendingQuestionEntity) -> Self {
        Self {
            question_id: value.question_id,
            category_id: value.category_id,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index,
            asked_at: value.asked_at,
            deadline: value.deadline,
        }
    }
}

impl From<PendingQuestion> for PendingQuestionEntity {
    fn from(value: PendingQuestion) -> Self {
        Self {
            question_id: value.question_id,
            category_id: value.category_id,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index,
            asked_at: value.asked_at,
            deadline: value.deadline,
        }
    }
}

impl From<PhaseEntity> for MatchPhase {
    fn from(value: PhaseEntity) -> Self {
        match value {
            PhaseEntity::Waiting => MatchPhase::Waiting,
            PhaseEntity::Wheel => MatchPhase::Wheel,
            PhaseEntity::Questions { question } => MatchPhase::Questions(question.into()),
            PhaseEntity::CharacterPicking => MatchPhase::CharacterRound(CharacterStage::Picking),
            PhaseEntity::CharacterAnswering { question, claim } => {
                MatchPhase::CharacterRound(CharacterStage::Answering {
                    question: question.into(),
                    claim: CharacterClaim {
                        category_id: claim.category_id,
                        stolen_from: claim.stolen_from,
                    },
                })
            }
            PhaseEntity::Finished { forfeit } => MatchPhase::Finished(if forfeit {
                FinishReason::Forfeit
            } else {
                FinishReason::Completed
            }),
        }
    }
}

impl From<MatchPhase> for PhaseEntity {
    fn from(value: MatchPhase) -> Self {
        match value {
            MatchPhase::Waiting => PhaseEntity::Waiting,
            MatchPhase::Wheel => PhaseEntity::Wheel,
            MatchPhase::Questions(question) => PhaseEntity::Questions {
                question: question.into(),
            },
            MatchPhase::CharacterRound(CharacterStage::Picking) => PhaseEntity::CharacterPicking,
            MatchPhase::CharacterRound(CharacterStage::Answering { question, claim }) => {
                PhaseEntity::CharacterAnswering {
                    question: question.into(),
                    claim: CharacterClaimEntity {
                        category_id: claim.category_id,
                        stolen_from: claim.stolen_from,
                    },
                }
            }
            MatchPhase::Finished(reason) => PhaseEntity::Finished {
                forfeit: reason == FinishReason::Forfeit,
            },
        }
    }
}

impl From<MatchEntity> for MatchSession {
    fn from(value: MatchEntity) -> Self {
        Self {
            id: value.id,
            code: value.code,
            level: value.level,
            players: value
                .players
                .into_iter()
                .map(|p| Player {
                    id: p.id,
                    user_id: p.user_id,
                    number: p.player_number,
                    characters: p.characters_collected.into_iter().collect(),
                    current_streak: p.current_streak,
                    best_streak: p.best_streak,
                })
                .collect(),
            current_player_id: value.current_player_id,
            current_category_id: value.current_category_id,
            winner_id: value.winner_id,
            characters_this_turn: value.characters_this_turn,
            asked_question_ids: value.asked_question_ids,
            machine: MatchStateMachine::restore(value.phase.into(), value.version),
            created_at: value.created_at,
            updated_at: value.updated_at,
            finished_at: value.finished_at,
        }
    }
}

impl From<MatchSession> for MatchEntity {
    fn from(value: MatchSession) -> Self {
        let status = value.status().into();
        let match_id = value.id;
        Self {
            id: value.id,
            code: value.code,
            status,
            level: value.level,
            current_player_id: value.current_player_id,
            current_category_id: value.current_category_id,
            winner_id: value.winner_id,
            phase: value.machine.phase().clone().into(),
            version: value.machine.version(),
            characters_this_turn: value.characters_this_turn,
            asked_question_ids: value.asked_question_ids,
            players: value
                .players
                .into_iter()
                .map(|p| PlayerEntity {
                    id: p.id,
                    match_id,
                    user_id: p.user_id,
                    player_number: p.number,
                    characters_collected: p.characters.into_iter().collect(),
                    current_streak: p.current_streak,
                    best_streak: p.best_streak,
                })
                .collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
            finished_at: value.finished_at,
        }
    }
}
