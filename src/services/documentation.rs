use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Duel Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::questions::list_categories,
        crate::routes::questions::import_questions,
        crate::routes::matches::create_match,
        crate::routes::matches::join_match,
        crate::routes::matches::get_match,
        crate::routes::matches::get_match_by_code,
        crate::routes::matches::list_turns,
        crate::routes::matches::match_events,
        crate::routes::matches::spin,
        crate::routes::matches::answer,
        crate::routes::matches::choose_character,
        crate::routes::matches::forfeit,
        crate::routes::invitations::invite,
        crate::routes::invitations::list_invitations,
        crate::routes::invitations::accept,
        crate::routes::invitations::decline,
        crate::routes::stats::get_stats,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::question::CategoryView,
            crate::dto::question::ImportQuestionsRequest,
            crate::dto::question::QuestionInput,
            crate::dto::question::ImportQuestionsResponse,
            crate::dto::matches::CreateMatchRequest,
            crate::dto::matches::JoinMatchRequest,
            crate::dto::matches::SpinRequest,
            crate::dto::matches::AnswerRequest,
            crate::dto::matches::CharacterRequest,
            crate::dto::matches::ForfeitRequest,
            crate::dto::matches::QuestionView,
            crate::dto::matches::PlayerSnapshot,
            crate::dto::matches::CharacterClaimView,
            crate::dto::matches::MatchSnapshot,
            crate::dto::matches::TurnRecordView,
            crate::dto::matches::AnswerResponse,
            crate::dto::phase::VisibleMatchPhase,
            crate::dto::phase::MatchStatusDto,
            crate::dto::phase::InvitationStatusDto,
            crate::dto::invitation::CreateInvitationRequest,
            crate::dto::invitation::RespondInvitationRequest,
            crate::dto::invitation::InvitationView,
            crate::dto::invitation::AcceptInvitationResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::MatchFinishedEvent,
            crate::dto::stats::UserStatsView,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "questions", description = "Categories and question bank"),
        (name = "matches", description = "Match lifecycle"),
        (name = "turns", description = "Turn commands of an active match"),
        (name = "invitations", description = "Direct challenges between users"),
        (name = "stats", description = "Per-user statistics"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
