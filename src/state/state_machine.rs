use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

/// High-level phases a 1v1 match can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPhase {
    /// Match created, waiting for the second player to join.
    Waiting,
    /// The current player must pick (or spin for) a category.
    Wheel,
    /// A regular question is being answered.
    Questions(PendingQuestion),
    /// Streak bonus unlocked: the current player claims or steals a character.
    CharacterRound(CharacterStage),
    /// Terminal phase.
    Finished(FinishReason),
}

/// Sub-steps of the character round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterStage {
    /// Waiting for the player to choose the category they want to win.
    Picking,
    /// A character question is being answered for the given claim.
    Answering {
        /// Question served for the chosen category.
        question: PendingQuestion,
        /// Category at stake and, for a steal, whom it is taken from.
        claim: CharacterClaim,
    },
}

/// A question currently awaiting an answer, with its countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    /// Identifier of the question in the bank.
    pub question_id: Uuid,
    /// Category the question belongs to.
    pub category_id: Uuid,
    /// Prompt shown to the player.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option. Never sent to clients.
    pub correct_index: usize,
    /// When the question was served.
    pub asked_at: SystemTime,
    /// When the countdown reaches zero.
    pub deadline: SystemTime,
}

impl PendingQuestion {
    /// Whether the countdown has elapsed at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.deadline
    }
}

/// Category a player is trying to win during the character round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterClaim {
    /// Category token at stake.
    pub category_id: Uuid,
    /// Player id of the opponent currently holding the token, for a steal.
    pub stolen_from: Option<Uuid>,
}

impl CharacterClaim {
    /// Whether winning this claim takes the token from the opponent.
    pub fn is_steal(&self) -> bool {
        self.stolen_from.is_some()
    }
}

/// Indicates why a match reached its terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A player collected every category.
    Completed,
    /// A player gave up.
    Forfeit,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// The second player joined the match.
    OpponentJoined,
    /// A category was picked and its first question served.
    CategorySelected(PendingQuestion),
    /// The pending regular question was answered correctly.
    AnswerCorrect {
        /// Whether the streak reached the character-round threshold.
        character_round: bool,
    },
    /// The pending question was answered incorrectly or timed out.
    AnswerMissed,
    /// A character category was chosen and its question served.
    CharacterChosen {
        /// Question served for the claim.
        question: PendingQuestion,
        /// Category at stake.
        claim: CharacterClaim,
    },
    /// The character question was answered correctly.
    CharacterWon {
        /// Whether the winner now holds every category.
        match_won: bool,
    },
    /// A player forfeited.
    Forfeit,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: MatchPhase,
    /// The event that cannot be applied from this phase.
    pub event: MatchEvent,
}

/// Turn phase machine for a single match. Every applied transition bumps the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchStateMachine {
    phase: MatchPhase,
    version: u64,
}

impl Default for MatchStateMachine {
    fn default() -> Self {
        Self {
            phase: MatchPhase::Waiting,
            version: 0,
        }
    }
}

impl MatchStateMachine {
    /// Create a new state machine waiting for an opponent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a machine from persisted phase and version.
    pub fn restore(phase: MatchPhase, version: u64) -> Self {
        Self { phase, version }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &MatchPhase {
        &self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Question awaiting an answer in the current phase, if any.
    pub fn pending_question(&self) -> Option<&PendingQuestion> {
        match &self.phase {
            MatchPhase::Questions(question) => Some(question),
            MatchPhase::CharacterRound(CharacterStage::Answering { question, .. }) => {
                Some(question)
            }
            _ => None,
        }
    }

    /// Claim at stake while a character question is pending.
    pub fn pending_claim(&self) -> Option<&CharacterClaim> {
        match &self.phase {
            MatchPhase::CharacterRound(CharacterStage::Answering { claim, .. }) => Some(claim),
            _ => None,
        }
    }

    /// Whether the match reached its terminal phase.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, MatchPhase::Finished(_))
    }

    /// Validate and apply an event, returning the new phase.
    pub fn advance(&mut self, event: MatchEvent) -> Result<&MatchPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(&self.phase)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: MatchEvent) -> Result<MatchPhase, InvalidTransition> {
        let next = match (self.phase.clone(), event) {
            (MatchPhase::Waiting, MatchEvent::OpponentJoined) => MatchPhase::Wheel,
            (MatchPhase::Wheel, MatchEvent::CategorySelected(question)) => {
                MatchPhase::Questions(question)
            }
            (MatchPhase::Questions(_), MatchEvent::AnswerCorrect { character_round }) => {
                if character_round {
                    MatchPhase::CharacterRound(CharacterStage::Picking)
                } else {
                    MatchPhase::Wheel
                }
            }
            (MatchPhase::Questions(_), MatchEvent::AnswerMissed) => MatchPhase::Wheel,
            (
                MatchPhase::CharacterRound(CharacterStage::Picking),
                MatchEvent::CharacterChosen { question, claim },
            ) => MatchPhase::CharacterRound(CharacterStage::Answering { question, claim }),
            (
                MatchPhase::CharacterRound(CharacterStage::Answering { .. }),
                MatchEvent::CharacterWon { match_won },
            ) => {
                if match_won {
                    MatchPhase::Finished(FinishReason::Completed)
                } else {
                    MatchPhase::Wheel
                }
            }
            (
                MatchPhase::CharacterRound(CharacterStage::Answering { .. }),
                MatchEvent::AnswerMissed,
            ) => MatchPhase::Wheel,
            (from, MatchEvent::Forfeit) if !matches!(from, MatchPhase::Finished(_)) => {
                MatchPhase::Finished(FinishReason::Forfeit)
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn question() -> PendingQuestion {
        let now = SystemTime::now();
        PendingQuestion {
            question_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            text: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_index: 1,
            asked_at: now,
            deadline: now + Duration::from_secs(20),
        }
    }

    fn running() -> MatchStateMachine {
        let mut sm = MatchStateMachine::new();
        sm.advance(MatchEvent::OpponentJoined).unwrap();
        sm
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = MatchStateMachine::new();
        assert_eq!(sm.phase(), &MatchPhase::Waiting);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn correct_answer_below_threshold_returns_to_wheel() {
        let mut sm = running();
        sm.advance(MatchEvent::CategorySelected(question())).unwrap();
        let next = sm
            .advance(MatchEvent::AnswerCorrect {
                character_round: false,
            })
            .unwrap();
        assert_eq!(next, &MatchPhase::Wheel);
        assert_eq!(sm.version(), 3);
    }

    #[test]
    fn streak_threshold_always_enters_character_round() {
        let mut sm = running();
        sm.advance(MatchEvent::CategorySelected(question())).unwrap();
        let next = sm
            .advance(MatchEvent::AnswerCorrect {
                character_round: true,
            })
            .unwrap();
        assert_eq!(next, &MatchPhase::CharacterRound(CharacterStage::Picking));
    }

    #[test]
    fn character_round_win_finishes_or_returns_to_wheel() {
        let mut sm = running();
        sm.advance(MatchEvent::CategorySelected(question())).unwrap();
        sm.advance(MatchEvent::AnswerCorrect {
            character_round: true,
        })
        .unwrap();
        let q = question();
        let claim = CharacterClaim {
            category_id: q.category_id,
            stolen_from: None,
        };
        sm.advance(MatchEvent::CharacterChosen {
            question: q.clone(),
            claim,
        })
        .unwrap();
        assert_eq!(sm.pending_question(), Some(&q));
        assert_eq!(sm.pending_claim(), Some(&claim));

        let mut finished = sm.clone();
        assert_eq!(
            finished
                .advance(MatchEvent::CharacterWon { match_won: true })
                .unwrap(),
            &MatchPhase::Finished(FinishReason::Completed)
        );
        assert_eq!(
            sm.advance(MatchEvent::CharacterWon { match_won: false })
                .unwrap(),
            &MatchPhase::Wheel
        );
    }

    #[test]
    fn answering_without_a_question_is_rejected() {
        let mut sm = running();
        let err = sm.advance(MatchEvent::AnswerMissed).unwrap_err();
        assert_eq!(err.from, MatchPhase::Wheel);
        assert_eq!(err.event, MatchEvent::AnswerMissed);
        assert_eq!(sm.version(), 1);
    }

    #[test]
    fn cannot_skip_picking_step() {
        let mut sm = running();
        sm.advance(MatchEvent::CategorySelected(question())).unwrap();
        let err = sm
            .advance(MatchEvent::CharacterWon { match_won: false })
            .unwrap_err();
        assert!(matches!(err.from, MatchPhase::Questions(_)));
    }

    #[test]
    fn forfeit_is_terminal() {
        let mut sm = running();
        sm.advance(MatchEvent::Forfeit).unwrap();
        assert!(sm.is_finished());
        assert!(sm.advance(MatchEvent::Forfeit).is_err());
        assert!(sm.advance(MatchEvent::OpponentJoined).is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let q = question();
        assert!(!q.is_expired(q.asked_at));
        assert!(q.is_expired(q.deadline));
    }
}
