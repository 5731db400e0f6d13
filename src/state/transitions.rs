use std::{future::Future, time::SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::{sse_events, turn_service},
    state::{
        ArmedTimer, SharedState, StagedTransition, TransitionOutcome,
        match_session::{MatchSession, MatchStatus},
    },
};

/// Run a match command, then publish its effects: SSE events, the question
/// countdown and the outbox wake-up.
///
/// Effects are published before the match gate opens, so events go out in
/// version order and an older command cannot re-arm a replaced countdown.
pub async fn run_transition_with_broadcast<F, Fut, T>(
    state: &SharedState,
    match_id: Uuid,
    expected_version: Option<u64>,
    work: F,
) -> Result<(T, MatchSession), ServiceError>
where
    F: FnOnce(MatchSession) -> Fut,
    Fut: Future<Output = Result<StagedTransition<T>, ServiceError>>,
{
    let TransitionOutcome {
        value,
        session,
        turn,
        notifications,
        changed,
        gate,
    } = state
        .run_transition(match_id, expected_version, work)
        .await?;
    if !changed {
        return Ok((value, session));
    }

    if let Some(turn) = turn.as_ref() {
        sse_events::broadcast_turn_recorded(state, turn);
    }
    sse_events::broadcast_match_updated(state, &session);
    if notifications > 0 {
        state.wake_outbox();
    }

    if session.status() == MatchStatus::Finished {
        sse_events::broadcast_match_finished(state, &session);
        state.release_match(match_id);
    } else {
        sync_question_timer(state, &session);
    }
    drop(gate);

    Ok((value, session))
}

/// Re-arm the countdown of a question served before a restart.
pub async fn ensure_question_timer(
    state: &SharedState,
    session: &MatchSession,
) -> Result<(), ServiceError> {
    let Some(question) = session.pending_question() else {
        return Ok(());
    };
    if state.armed_question(session.id) == Some(question.question_id) {
        return Ok(());
    }

    let lock = state.lock_match(session.id).await?;
    if lock.session.status() == MatchStatus::Active {
        sync_question_timer(state, &lock.session);
    }
    Ok(())
}

/// Make sure the pending question of `session` (if any) has a countdown, and
/// that no countdown outlives its question. Callers hold the match gate.
fn sync_question_timer(state: &SharedState, session: &MatchSession) {
    let Some(question) = session.pending_question() else {
        state.cancel_timer(session.id);
        return;
    };
    if state.armed_question(session.id) == Some(question.question_id) {
        return;
    }

    let match_id = session.id;
    let question_id = question.question_id;
    let wait = question
        .deadline
        .duration_since(SystemTime::now())
        .unwrap_or_default();

    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        task_state.disarm_fired(match_id, question_id);
        match turn_service::expire_question(&task_state, match_id, question_id).await {
            Ok(true) => debug!(%match_id, %question_id, "question timed out"),
            Ok(false) => debug!(%match_id, %question_id, "stale question timer ignored"),
            Err(err) => warn!(%match_id, %question_id, error = %err, "failed to expire question"),
        }
    });

    state.replace_timer(
        match_id,
        ArmedTimer {
            question_id,
            handle,
        },
    );
}
