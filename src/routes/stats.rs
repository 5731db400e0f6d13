use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{dto::stats::UserStatsView, error::AppError, services::stats_service, state::SharedState};

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/users/{id}/stats", get(get_stats))
}

/// Lifetime statistics of a user, zeroed when they never finished a match.
#[utoipa::path(
    get,
    path = "/users/{id}/stats",
    tag = "stats",
    params(("id" = Uuid, Path, description = "User identifier")),
    responses((status = 200, description = "User statistics", body = UserStatsView))
)]
pub async fn get_stats(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserStatsView>, AppError> {
    Ok(Json(stats_service::get_stats(&state, id).await?))
}
