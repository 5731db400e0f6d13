use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::invitation::{
        AcceptInvitationResponse, CreateInvitationRequest, InvitationView,
        RespondInvitationRequest,
    },
    error::AppError,
    services::invitation_service,
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/invitations", post(invite))
        .route("/invitations/{id}/accept", post(accept))
        .route("/invitations/{id}/decline", post(decline))
        .route("/users/{id}/invitations", get(list_invitations))
}

/// Challenge another user to a match.
#[utoipa::path(
    post,
    path = "/invitations",
    tag = "invitations",
    request_body = CreateInvitationRequest,
    responses(
        (status = 200, description = "Invitation sent", body = InvitationView),
        (status = 400, description = "Self invitation or invalid level")
    )
)]
pub async fn invite(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateInvitationRequest>>,
) -> Result<Json<InvitationView>, AppError> {
    Ok(Json(invitation_service::invite(&state, payload).await?))
}

#[utoipa::path(
    get,
    path = "/users/{id}/invitations",
    tag = "invitations",
    params(("id" = Uuid, Path, description = "Invitee user identifier")),
    responses((status = 200, description = "Pending invitations", body = [InvitationView]))
)]
pub async fn list_invitations(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InvitationView>>, AppError> {
    Ok(Json(invitation_service::list_invitations(&state, id).await?))
}

/// Accept an invitation and start the match.
#[utoipa::path(
    post,
    path = "/invitations/{id}/accept",
    tag = "invitations",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    request_body = RespondInvitationRequest,
    responses(
        (status = 200, description = "Match started", body = AcceptInvitationResponse),
        (status = 403, description = "Not the invitee"),
        (status = 404, description = "Unknown invitation"),
        (status = 409, description = "Invitation already answered")
    )
)]
pub async fn accept(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<RespondInvitationRequest>>,
) -> Result<Json<AcceptInvitationResponse>, AppError> {
    Ok(Json(invitation_service::accept(&state, id, payload).await?))
}

#[utoipa::path(
    post,
    path = "/invitations/{id}/decline",
    tag = "invitations",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    request_body = RespondInvitationRequest,
    responses(
        (status = 200, description = "Invitation declined", body = InvitationView),
        (status = 403, description = "Not the invitee"),
        (status = 409, description = "Invitation already answered")
    )
)]
pub async fn decline(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<RespondInvitationRequest>>,
) -> Result<Json<InvitationView>, AppError> {
    Ok(Json(invitation_service::decline(&state, id, payload).await?))
}
