use std::time::SystemTime;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{InvitationEntity, InvitationStatusEntity},
    dto::{
        invitation::{
            AcceptInvitationResponse, CreateInvitationRequest, InvitationView,
            RespondInvitationRequest,
        },
        matches::MatchSnapshot,
    },
    error::ServiceError,
    services::{match_service, notifier},
    state::{SharedState, match_session::MatchSession},
};

/// Challenge another user. The invitee is notified through the outbox.
pub async fn invite(
    state: &SharedState,
    request: CreateInvitationRequest,
) -> Result<InvitationView, ServiceError> {
    if request.from_user_id == request.to_user_id {
        return Err(ServiceError::InvalidInput(
            "a user cannot invite themselves".into(),
        ));
    }
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let invitation = InvitationEntity {
        id: Uuid::new_v4(),
        from_user_id: request.from_user_id,
        to_user_id: request.to_user_id,
        level: request.level,
        status: InvitationStatusEntity::Pending,
        match_id: None,
        created_at: now,
        responded_at: None,
    };

    let outbox = notifier::invitation_received(&invitation, now);
    store
        .save_invitation(invitation.clone(), None, outbox)
        .await?;
    state.wake_outbox();
    info!(invitation_id = %invitation.id, "invitation sent");
    Ok(InvitationView::from(&invitation))
}

/// Pending invitations addressed to `user_id`.
pub async fn list_invitations(
    state: &SharedState,
    user_id: Uuid,
) -> Result<Vec<InvitationView>, ServiceError> {
    let store = state.require_store().await?;
    let invitations = store.list_invitations(user_id).await?;
    Ok(invitations.iter().map(InvitationView::from).collect())
}

async fn pending_for_invitee(
    state: &SharedState,
    invitation_id: Uuid,
    user_id: Uuid,
) -> Result<InvitationEntity, ServiceError> {
    let store = state.require_store().await?;
    let invitation = store
        .find_invitation(invitation_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("invitation `{invitation_id}` not found")))?;
    if invitation.to_user_id != user_id {
        return Err(ServiceError::Forbidden(
            "only the invitee can respond to an invitation".into(),
        ));
    }
    if invitation.status != InvitationStatusEntity::Pending {
        return Err(already_answered(invitation_id));
    }
    Ok(invitation)
}

fn already_answered(invitation_id: Uuid) -> ServiceError {
    ServiceError::InvalidState(format!(
        "invitation `{invitation_id}` was already answered"
    ))
}

/// Accept an invitation: starts a match with the inviter as player 1.
///
/// The invitation is claimed with a status-checked write before the match is
/// created, so a repeated accept loses the claim and starts nothing.
pub async fn accept(
    state: &SharedState,
    invitation_id: Uuid,
    request: RespondInvitationRequest,
) -> Result<AcceptInvitationResponse, ServiceError> {
    let pending = pending_for_invitee(state, invitation_id, request.user_id).await?;
    let store = state.require_store().await?;
    let now = SystemTime::now();

    let code = match_service::unused_code(state).await?;
    let mut session = MatchSession::new(pending.from_user_id, pending.level, code, now);
    session.join(pending.to_user_id, now)?;

    let mut invitation = pending.clone();
    invitation.status = InvitationStatusEntity::Accepted;
    invitation.match_id = Some(session.id);
    invitation.responded_at = Some(now);
    let claimed = store
        .save_invitation(
            invitation.clone(),
            Some(InvitationStatusEntity::Pending),
            Vec::new(),
        )
        .await?;
    if !claimed {
        return Err(already_answered(invitation_id));
    }

    if let Err(err) = store.insert_match(session.clone().into()).await {
        // Hand the invitation back so the invitee can retry.
        if let Err(revert) = store
            .save_invitation(pending, Some(InvitationStatusEntity::Accepted), Vec::new())
            .await
        {
            warn!(%invitation_id, error = %revert, "failed to reopen invitation");
        }
        return Err(err.into());
    }

    for entry in notifier::invitation_accepted(&invitation, session.id, now) {
        if let Err(err) = store.save_outbox(entry).await {
            warn!(%invitation_id, error = %err, "failed to enqueue acceptance notification");
        }
    }
    state.wake_outbox();

    info!(%invitation_id, match_id = %session.id, "invitation accepted");
    let snapshot = MatchSnapshot::from(&session);
    state.cache_session(session).await;
    Ok(AcceptInvitationResponse {
        invitation: InvitationView::from(&invitation),
        snapshot,
    })
}

/// Decline an invitation.
pub async fn decline(
    state: &SharedState,
    invitation_id: Uuid,
    request: RespondInvitationRequest,
) -> Result<InvitationView, ServiceError> {
    let mut invitation = pending_for_invitee(state, invitation_id, request.user_id).await?;
    let store = state.require_store().await?;

    invitation.status = InvitationStatusEntity::Declined;
    invitation.responded_at = Some(SystemTime::now());
    let saved = store
        .save_invitation(
            invitation.clone(),
            Some(InvitationStatusEntity::Pending),
            Vec::new(),
        )
        .await?;
    if !saved {
        return Err(already_answered(invitation_id));
    }
    info!(%invitation_id, "invitation declined");
    Ok(InvitationView::from(&invitation))
}
