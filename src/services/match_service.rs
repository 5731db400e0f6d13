use std::time::SystemTime;

use rand::{Rng, rng};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::MatchStatusEntity,
    dto::{
        matches::{CreateMatchRequest, ForfeitRequest, JoinMatchRequest, MatchSnapshot, TurnRecordView},
        validation::MATCH_CODE_LEN,
    },
    error::ServiceError,
    services::{notifier, stats_service},
    state::{
        SharedState, StagedTransition,
        match_session::{MatchSession, MatchStatus},
        transitions::{ensure_question_timer, run_transition_with_broadcast},
    },
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 16;

/// Random join code, e.g. `K7Q2ZD`.
pub fn generate_code() -> String {
    let mut rng = rng();
    (0..MATCH_CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Join code not used by any unfinished match.
pub(crate) async fn unused_code(state: &SharedState) -> Result<String, ServiceError> {
    let store = state.require_store().await?;
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_code();
        let taken = store
            .find_match_by_code(code.clone())
            .await?
            .is_some_and(|entity| entity.status != MatchStatusEntity::Finished);
        if !taken {
            return Ok(code);
        }
    }
    Err(ServiceError::InvalidState(
        "could not allocate a free match code".into(),
    ))
}

/// Open a match waiting for an opponent.
pub async fn create_match(
    state: &SharedState,
    request: CreateMatchRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let code = unused_code(state).await?;
    let session = MatchSession::new(request.user_id, request.level, code, SystemTime::now());

    store.insert_match(session.clone().into()).await?;
    info!(match_id = %session.id, code = %session.code, level = session.level, "match created");
    let snapshot = MatchSnapshot::from(&session);
    state.cache_session(session).await;
    Ok(snapshot)
}

/// Take the second seat of a waiting match.
pub async fn join_match(
    state: &SharedState,
    request: JoinMatchRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let entity = store
        .find_match_by_code(request.code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no match with code `{}`", request.code)))?;

    let (_, session) =
        run_transition_with_broadcast(state, entity.id, None, move |mut session| async move {
            session.join(request.user_id, SystemTime::now())?;
            Ok(StagedTransition::new(session, ()))
        })
        .await?;

    info!(match_id = %session.id, "match started");
    Ok(MatchSnapshot::from(&session))
}

/// Current snapshot of a match.
pub async fn get_match(state: &SharedState, match_id: Uuid) -> Result<MatchSnapshot, ServiceError> {
    let session = state.load_session(match_id).await?;
    if session.status() == MatchStatus::Active {
        ensure_question_timer(state, &session).await?;
    }
    Ok(MatchSnapshot::from(&session))
}

/// Snapshot of the latest match carrying `code`.
pub async fn get_match_by_code(
    state: &SharedState,
    code: &str,
) -> Result<MatchSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let entity = store
        .find_match_by_code(code.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no match with code `{code}`")))?;
    get_match(state, entity.id).await
}

/// Turn log of a match, oldest first.
pub async fn list_turns(
    state: &SharedState,
    match_id: Uuid,
) -> Result<Vec<TurnRecordView>, ServiceError> {
    let store = state.require_store().await?;
    if store.find_match(match_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "match `{match_id}` not found"
        )));
    }
    let turns = store.list_turns(match_id).await?;
    Ok(turns.iter().map(TurnRecordView::from).collect())
}

/// Give up: the opponent wins. Abandoning a match nobody joined has no winner
/// and leaves stats untouched.
pub async fn forfeit(
    state: &SharedState,
    match_id: Uuid,
    request: ForfeitRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let win_points = state.config().rules().win_points;

    let (_, session) =
        run_transition_with_broadcast(state, match_id, None, move |mut session| async move {
            let now = SystemTime::now();
            if session.forfeit(request.user_id, now)?.is_none() {
                return Ok(StagedTransition::new(session, ()));
            }
            let turns = store.list_turns(session.id).await?;
            let stats = stats_service::finalize_match(&session, &turns, win_points);
            let outbox = notifier::match_finished(&session, now);
            Ok(StagedTransition::new(session, ())
                .with_stats(stats)
                .with_outbox(outbox))
        })
        .await?;

    info!(%match_id, winner = ?session.winner_id, "match forfeited");
    Ok(MatchSnapshot::from(&session))
}
