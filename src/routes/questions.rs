use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::question::{CategoryView, ImportQuestionsRequest, ImportQuestionsResponse},
    error::AppError,
    services::question_service,
    state::SharedState,
};

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/categories", get(list_categories))
        .route("/questions", post(import_questions))
}

/// Wheel categories.
#[utoipa::path(
    get,
    path = "/categories",
    tag = "questions",
    responses((status = 200, description = "Configured categories", body = [CategoryView]))
)]
pub async fn list_categories(State(state): State<SharedState>) -> Json<Vec<CategoryView>> {
    Json(question_service::list_categories(&state))
}

/// Bulk import into the question bank. Either every question is stored or none.
#[utoipa::path(
    post,
    path = "/questions",
    tag = "questions",
    request_body = ImportQuestionsRequest,
    responses(
        (status = 200, description = "Questions imported", body = ImportQuestionsResponse),
        (status = 400, description = "A question is invalid")
    )
)]
pub async fn import_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ImportQuestionsRequest>>,
) -> Result<Json<ImportQuestionsResponse>, AppError> {
    let imported = question_service::import_questions(&state, payload.questions).await?;
    Ok(Json(ImportQuestionsResponse { imported }))
}
