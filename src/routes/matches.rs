use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::matches::{
        AnswerRequest, AnswerResponse, CharacterRequest, CreateMatchRequest, ForfeitRequest,
        JoinMatchRequest, MatchSnapshot, SpinRequest, TurnRecordView,
    },
    error::AppError,
    services::{match_service, sse_service, turn_service},
    state::SharedState,
};

/// Match lifecycle and turn commands.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/matches", post(create_match))
        .route("/matches/join", post(join_match))
        .route("/matches/code/{code}", get(get_match_by_code))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/turns", get(list_turns))
        .route("/matches/{id}/events", get(match_events))
        .route("/matches/{id}/spin", post(spin))
        .route("/matches/{id}/answer", post(answer))
        .route("/matches/{id}/character", post(choose_character))
        .route("/matches/{id}/forfeit", post(forfeit))
}

/// Open a match and get its join code.
#[utoipa::path(
    post,
    path = "/matches",
    tag = "matches",
    request_body = CreateMatchRequest,
    responses(
        (status = 200, description = "Match created", body = MatchSnapshot),
        (status = 400, description = "Invalid level"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_match(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateMatchRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(match_service::create_match(&state, payload).await?))
}

/// Join a waiting match with its code.
#[utoipa::path(
    post,
    path = "/matches/join",
    tag = "matches",
    request_body = JoinMatchRequest,
    responses(
        (status = 200, description = "Match started", body = MatchSnapshot),
        (status = 403, description = "Own match"),
        (status = 404, description = "Unknown code"),
        (status = 409, description = "Match already full or finished")
    )
)]
pub async fn join_match(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinMatchRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(match_service::join_match(&state, payload).await?))
}

#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Match snapshot", body = MatchSnapshot),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(match_service::get_match(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/matches/code/{code}",
    tag = "matches",
    params(("code" = String, Path, description = "Six character join code")),
    responses(
        (status = 200, description = "Match snapshot", body = MatchSnapshot),
        (status = 404, description = "Unknown code")
    )
)]
pub async fn get_match_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(match_service::get_match_by_code(&state, &code).await?))
}

/// Append-only log of resolved questions.
#[utoipa::path(
    get,
    path = "/matches/{id}/turns",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Turn log, oldest first", body = [TurnRecordView]),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn list_turns(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TurnRecordView>>, AppError> {
    Ok(Json(match_service::list_turns(&state, id).await?))
}

/// Stream the events of one match.
#[utoipa::path(
    get,
    path = "/matches/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Match SSE stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn match_events(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, initial) = sse_service::subscribe_match(&state, id).await?;
    info!(match_id = %id, "new match SSE connection");
    Ok(sse_service::to_sse_stream(receiver, initial, id))
}

/// Pick a category, or omit `category_id` to spin the wheel.
#[utoipa::path(
    post,
    path = "/matches/{id}/spin",
    tag = "turns",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = SpinRequest,
    responses(
        (status = 200, description = "Question served", body = MatchSnapshot),
        (status = 403, description = "Not your turn"),
        (status = 409, description = "Wrong phase, stale version or no questions left")
    )
)]
pub async fn spin(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SpinRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(turn_service::spin(&state, id, payload).await?))
}

#[utoipa::path(
    post,
    path = "/matches/{id}/answer",
    tag = "turns",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer resolved", body = AnswerResponse),
        (status = 400, description = "Wrong question or option out of range"),
        (status = 403, description = "Not your turn"),
        (status = 409, description = "No pending question or stale version")
    )
)]
pub async fn answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<AnswerRequest>>,
) -> Result<Json<AnswerResponse>, AppError> {
    Ok(Json(turn_service::answer(&state, id, payload).await?))
}

/// Choose the character to claim, or the opponent's character to steal.
#[utoipa::path(
    post,
    path = "/matches/{id}/character",
    tag = "turns",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = CharacterRequest,
    responses(
        (status = 200, description = "Character question served", body = MatchSnapshot),
        (status = 400, description = "Character already collected"),
        (status = 403, description = "Not your turn"),
        (status = 409, description = "Wrong phase or stale version")
    )
)]
pub async fn choose_character(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<CharacterRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(turn_service::choose_character(&state, id, payload).await?))
}

#[utoipa::path(
    post,
    path = "/matches/{id}/forfeit",
    tag = "matches",
    params(("id" = Uuid, Path, description = "Match identifier")),
    request_body = ForfeitRequest,
    responses(
        (status = 200, description = "Match finished", body = MatchSnapshot),
        (status = 403, description = "Not a player of this match"),
        (status = 409, description = "Match already finished")
    )
)]
pub async fn forfeit(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ForfeitRequest>>,
) -> Result<Json<MatchSnapshot>, AppError> {
    Ok(Json(match_service::forfeit(&state, id, payload).await?))
}
