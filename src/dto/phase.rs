use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::InvitationStatusEntity,
    state::{
        match_session::MatchStatus,
        state_machine::{CharacterStage, MatchPhase},
    },
};

/// Publicly visible turn phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleMatchPhase {
    /// Waiting for the second player.
    Waiting,
    /// Current player picks or spins for a category.
    Wheel,
    /// A regular question is pending.
    Questions,
    /// Streak bonus unlocked, a character must be chosen.
    CharacterPicking,
    /// A character question is pending.
    CharacterAnswering,
    /// Match is over.
    Finished,
}

impl From<&MatchPhase> for VisibleMatchPhase {
    fn from(value: &MatchPhase) -> Self {
        match value {
            MatchPhase::Waiting => VisibleMatchPhase::Waiting,
            MatchPhase::Wheel => VisibleMatchPhase::Wheel,
            MatchPhase::Questions(_) => VisibleMatchPhase::Questions,
            MatchPhase::CharacterRound(CharacterStage::Picking) => {
                VisibleMatchPhase::CharacterPicking
            }
            MatchPhase::CharacterRound(CharacterStage::Answering { .. }) => {
                VisibleMatchPhase::CharacterAnswering
            }
            MatchPhase::Finished(_) => VisibleMatchPhase::Finished,
        }
    }
}

/// Lifecycle status of a match.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatusDto {
    Waiting,
    Active,
    Finished,
}

impl From<MatchStatus> for MatchStatusDto {
    fn from(value: MatchStatus) -> Self {
        match value {
            MatchStatus::Waiting => MatchStatusDto::Waiting,
            MatchStatus::Active => MatchStatusDto::Active,
            MatchStatus::Finished => MatchStatusDto::Finished,
        }
    }
}

/// Status of an invitation.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatusDto {
    Pending,
    Accepted,
    Declined,
}

impl From<InvitationStatusEntity> for InvitationStatusDto {
    fn from(value: InvitationStatusEntity) -> Self {
        match value {
            InvitationStatusEntity::Pending => InvitationStatusDto::Pending,
            InvitationStatusEntity::Accepted => InvitationStatusDto::Accepted,
            InvitationStatusEntity::Declined => InvitationStatusDto::Declined,
        }
    }
}
