use std::time::SystemTime;

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::match_store::MatchStore,
    dto::matches::{AnswerRequest, AnswerResponse, CharacterRequest, MatchSnapshot, SpinRequest},
    error::ServiceError,
    services::{notifier, question_service, stats_service},
    state::{
        SharedState, StagedTransition,
        match_session::{MatchSession, Resolution},
        transitions::run_transition_with_broadcast,
    },
};

fn ensure_known_category(config: &AppConfig, category_id: Uuid) -> Result<(), ServiceError> {
    match config.category(category_id) {
        Some(_) => Ok(()),
        None => Err(ServiceError::InvalidInput(format!(
            "unknown category `{category_id}`"
        ))),
    }
}

/// Pick (or spin for) a category and serve its first question.
pub async fn spin(
    state: &SharedState,
    match_id: Uuid,
    request: SpinRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let config = state.config().clone();
    if let Some(category_id) = request.category_id {
        ensure_known_category(&config, category_id)?;
    }
    let store = state.require_store().await?;

    let (_, session) = run_transition_with_broadcast(
        state,
        match_id,
        Some(request.expected_version),
        move |mut session| async move {
            session.ensure_can_spin(request.user_id)?;
            let rules = config.rules();
            let exclude = session.asked_question_ids.clone();

            let sample = match request.category_id {
                Some(category_id) => question_service::fetch_sample(
                    store.as_ref(),
                    category_id,
                    session.level,
                    &exclude,
                    rules.questions_per_spin,
                )
                .await?,
                None => {
                    let categories = config.categories().iter().map(|c| c.id).collect();
                    question_service::spin_category(
                        store.as_ref(),
                        categories,
                        session.level,
                        &exclude,
                        rules.questions_per_spin,
                    )
                    .await?
                    .map(|(_, sample)| sample)
                    .unwrap_or_default()
                }
            };

            let question = sample.into_iter().next().ok_or_else(|| {
                ServiceError::InvalidState("no questions left for this category".into())
            })?;
            session.start_question(request.user_id, &question, SystemTime::now(), rules)?;
            Ok(StagedTransition::new(session, ()))
        },
    )
    .await?;

    Ok(MatchSnapshot::from(&session))
}

/// Choose the character to claim or steal and serve its question.
pub async fn choose_character(
    state: &SharedState,
    match_id: Uuid,
    request: CharacterRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let config = state.config().clone();
    ensure_known_category(&config, request.category_id)?;
    let store = state.require_store().await?;

    let (_, session) = run_transition_with_broadcast(
        state,
        match_id,
        Some(request.expected_version),
        move |mut session| async move {
            session.ensure_can_choose_character(request.user_id, request.category_id)?;
            let rules = config.rules();
            let question = question_service::fetch_sample(
                store.as_ref(),
                request.category_id,
                session.level,
                &session.asked_question_ids,
                rules.questions_per_spin,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ServiceError::InvalidState("no questions left for this category".into())
            })?;
            session.choose_character(request.user_id, &question, SystemTime::now(), rules)?;
            Ok(StagedTransition::new(session, ()))
        },
    )
    .await?;

    Ok(MatchSnapshot::from(&session))
}

/// Answer the pending question.
pub async fn answer(
    state: &SharedState,
    match_id: Uuid,
    request: AnswerRequest,
) -> Result<AnswerResponse, ServiceError> {
    let config = state.config().clone();
    let store = state.require_store().await?;

    let (resolution, session) = run_transition_with_broadcast(
        state,
        match_id,
        Some(request.expected_version),
        move |mut session| async move {
            let resolution = session.resolve_answer(
                request.user_id,
                request.question_id,
                request.option_index,
                SystemTime::now(),
                config.rules(),
            )?;
            stage_resolution(store.as_ref(), &config, session, resolution).await
        },
    )
    .await?;

    Ok(AnswerResponse::new(&resolution, &session))
}

/// Resolve `question_id` as a timeout. Returns `false` when the question was
/// already resolved (stale timer).
pub async fn expire_question(
    state: &SharedState,
    match_id: Uuid,
    question_id: Uuid,
) -> Result<bool, ServiceError> {
    let config = state.config().clone();
    let store = state.require_store().await?;

    let (expired, _) = run_transition_with_broadcast(
        state,
        match_id,
        None,
        move |mut session| async move {
            let pending = session.pending_question().map(|q| q.question_id);
            if pending != Some(question_id) {
                return Ok(StagedTransition::new(session, false));
            }
            let resolution =
                session.resolve_timeout(question_id, SystemTime::now(), config.rules())?;
            let staged = stage_resolution(store.as_ref(), &config, session, resolution).await?;
            Ok(staged.map(|_| true))
        },
    )
    .await?;

    Ok(expired)
}

/// Attach the turn record, finalized stats and notifications of a resolved question.
async fn stage_resolution(
    store: &dyn MatchStore,
    config: &AppConfig,
    session: MatchSession,
    resolution: Resolution,
) -> Result<StagedTransition<Resolution>, ServiceError> {
    let now = SystemTime::now();
    let mut outbox = Vec::new();
    let mut stats = Vec::new();

    if let Some(next) = resolution.turn_passed_to.and_then(|id| session.player(id)) {
        outbox.extend(notifier::your_turn(next.user_id, session.id, now));
    }

    if resolution.finished {
        let mut turns = store.list_turns(session.id).await?;
        turns.push(resolution.turn.clone());
        stats = stats_service::finalize_match(&session, &turns, config.rules().win_points);
        outbox.extend(notifier::match_finished(&session, now));
    }

    let turn = resolution.turn.clone();
    Ok(StagedTransition::new(session, resolution)
        .with_turn(turn)
        .with_stats(stats)
        .with_outbox(outbox))
}
