use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::InvitationEntity,
    dto::{format_system_time, matches::MatchSnapshot, phase::InvitationStatusDto},
};

/// Invite another user to a match.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateInvitationRequest {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    #[validate(range(min = 1, max = 3))]
    pub level: u8,
}

/// Accept or decline an invitation as the invitee.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RespondInvitationRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvitationView {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub level: u8,
    pub status: InvitationStatusDto,
    /// Match created when the invitation was accepted.
    pub match_id: Option<Uuid>,
    pub created_at: String,
    pub responded_at: Option<String>,
}

/// Accepted invitation together with the match it started.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AcceptInvitationResponse {
    pub invitation: InvitationView,
    #[serde(rename = "match")]
    pub snapshot: MatchSnapshot,
}

impl From<&InvitationEntity> for InvitationView {
    fn from(value: &InvitationEntity) -> Self {
        Self {
            id: value.id,
            from_user_id: value.from_user_id,
            to_user_id: value.to_user_id,
            level: value.level,
            status: value.status.into(),
            match_id: value.match_id,
            created_at: format_system_time(value.created_at),
            responded_at: value.responded_at.map(format_system_time),
        }
    }
}
