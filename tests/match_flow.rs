use std::{sync::Arc, time::Duration};

use trivia_duel_back::{
    config::AppConfig,
    dao::match_store::memory::MemoryMatchStore,
    dto::{
        matches::{
            AnswerRequest, AnswerResponse, CharacterRequest, CreateMatchRequest, ForfeitRequest,
            JoinMatchRequest, MatchSnapshot, SpinRequest,
        },
        phase::{MatchStatusDto, VisibleMatchPhase},
        question::QuestionInput,
    },
    error::ServiceError,
    services::{
        match_service, question_service,
        sse_events::{EVENT_HANDSHAKE, EVENT_MATCH_UPDATED},
        sse_service, stats_service, turn_service,
    },
    state::{AppState, SharedState},
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

const RIGHT: usize = 0;
const WRONG: usize = 1;

async fn setup_with(config: AppConfig) -> (SharedState, Arc<MemoryMatchStore>) {
    let state = AppState::new(config);
    let store = Arc::new(MemoryMatchStore::new());
    state.set_match_store(store.clone()).await;

    let questions = state
        .config()
        .categories()
        .iter()
        .flat_map(|category| {
            (0..10).map(move |n| QuestionInput {
                id: None,
                category_id: category.id,
                level: 1,
                text: format!("{} #{n}", category.name),
                options: vec!["right".into(), "wrong".into(), "also wrong".into()],
                correct_index: RIGHT,
            })
        })
        .collect();
    question_service::import_questions(&state, questions)
        .await
        .unwrap();
    (state, store)
}

async fn setup() -> (SharedState, Arc<MemoryMatchStore>) {
    setup_with(AppConfig::default()).await
}

fn category(state: &SharedState, index: usize) -> Uuid {
    state.config().categories()[index].id
}

async fn start_match(state: &SharedState, alice: Uuid, bob: Uuid) -> MatchSnapshot {
    let created = match_service::create_match(
        state,
        CreateMatchRequest {
            user_id: alice,
            level: 1,
        },
    )
    .await
    .unwrap();
    match_service::join_match(
        state,
        JoinMatchRequest {
            user_id: bob,
            code: created.code,
        },
    )
    .await
    .unwrap()
}

async fn spin_and_answer(
    state: &SharedState,
    match_id: Uuid,
    user_id: Uuid,
    category_id: Uuid,
    version: u64,
    option_index: usize,
) -> AnswerResponse {
    let served = turn_service::spin(
        state,
        match_id,
        SpinRequest {
            user_id,
            category_id: Some(category_id),
            expected_version: version,
        },
    )
    .await
    .unwrap();
    let question = served.question.expect("question served");
    turn_service::answer(
        state,
        match_id,
        AnswerRequest {
            user_id,
            question_id: question.id,
            option_index,
            expected_version: served.version,
        },
    )
    .await
    .unwrap()
}

/// Three correct answers, then a correct character question. Returns the last response.
async fn win_character(
    state: &SharedState,
    match_id: Uuid,
    user_id: Uuid,
    category_id: Uuid,
    mut version: u64,
) -> AnswerResponse {
    for _ in 0..3 {
        let response = spin_and_answer(state, match_id, user_id, category_id, version, RIGHT).await;
        assert!(response.correct);
        version = response.snapshot.version;
    }
    let picking = match_service::get_match(state, match_id).await.unwrap();
    assert_eq!(picking.phase, VisibleMatchPhase::CharacterPicking);

    let served = turn_service::choose_character(
        state,
        match_id,
        CharacterRequest {
            user_id,
            category_id,
            expected_version: version,
        },
    )
    .await
    .unwrap();
    assert_eq!(served.phase, VisibleMatchPhase::CharacterAnswering);
    let question = served.question.expect("character question served");
    let response = turn_service::answer(
        state,
        match_id,
        AnswerRequest {
            user_id,
            question_id: question.id,
            option_index: RIGHT,
            expected_version: served.version,
        },
    )
    .await
    .unwrap();
    assert_eq!(response.character_won, Some(category_id));
    response
}

#[tokio::test]
async fn join_starts_the_match_with_player_one() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let snapshot = start_match(&state, alice, bob).await;

    assert_eq!(snapshot.status, MatchStatusDto::Active);
    assert_eq!(snapshot.phase, VisibleMatchPhase::Wheel);
    assert_eq!(snapshot.players.len(), 2);
    assert_eq!(snapshot.current_player_id, Some(snapshot.players[0].id));
    assert_eq!(snapshot.players[0].user_id, alice);

    let by_code = match_service::get_match_by_code(&state, &snapshot.code)
        .await
        .unwrap();
    assert_eq!(by_code.id, snapshot.id);
}

#[tokio::test]
async fn joining_own_or_full_match_fails() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let created = match_service::create_match(
        &state,
        CreateMatchRequest {
            user_id: alice,
            level: 1,
        },
    )
    .await
    .unwrap();

    let own = match_service::join_match(
        &state,
        JoinMatchRequest {
            user_id: alice,
            code: created.code.clone(),
        },
    )
    .await;
    assert!(matches!(own, Err(ServiceError::Forbidden(_))));

    match_service::join_match(
        &state,
        JoinMatchRequest {
            user_id: bob,
            code: created.code.clone(),
        },
    )
    .await
    .unwrap();
    let full = match_service::join_match(
        &state,
        JoinMatchRequest {
            user_id: Uuid::new_v4(),
            code: created.code,
        },
    )
    .await;
    assert!(matches!(full, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn full_game_until_six_characters() {
    let (state, store) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;
    let match_id = started.id;
    let alice_id = started.players[0].id;
    let bob_id = started.players[1].id;

    let mut version = started.version;
    for index in 0..3 {
        let response = win_character(&state, match_id, alice, category(&state, index), version).await;
        version = response.snapshot.version;
        if index == 2 {
            assert_eq!(response.turn_passed_to, Some(bob_id));
        } else {
            assert_eq!(response.turn_passed_to, None);
        }
    }

    let missed = spin_and_answer(&state, match_id, bob, category(&state, 3), version, WRONG).await;
    assert!(!missed.correct);
    assert_eq!(missed.correct_index, RIGHT);
    assert_eq!(missed.turn_passed_to, Some(alice_id));
    version = missed.snapshot.version;

    let mut last = None;
    for index in 3..6 {
        let response = win_character(&state, match_id, alice, category(&state, index), version).await;
        version = response.snapshot.version;
        last = Some(response);
    }
    let last = last.unwrap();
    assert!(last.finished);
    assert_eq!(last.snapshot.status, MatchStatusDto::Finished);
    assert_eq!(last.snapshot.winner_id, Some(alice_id));
    assert_eq!(last.snapshot.players[0].characters_collected.len(), 6);

    let turns = match_service::list_turns(&state, match_id).await.unwrap();
    assert_eq!(turns.len(), 6 * 4 + 1);

    let winner = stats_service::get_stats(&state, alice).await.unwrap();
    assert_eq!(winner.games_played, 1);
    assert_eq!(winner.games_won, 1);
    assert_eq!(winner.total_points, 100);
    assert_eq!(winner.correct_answers, 24);
    assert_eq!(winner.characters_collected, 6);
    assert_eq!(winner.best_streak, 3);

    let loser = stats_service::get_stats(&state, bob).await.unwrap();
    assert_eq!(loser.games_lost, 1);
    assert_eq!(loser.wrong_answers, 1);
    assert_eq!(loser.total_points, 0);

    let outbox = store.outbox_entries().await;
    assert!(outbox.iter().any(|entry| entry.recipient_user_id == bob && entry.title == "Your turn"));
    assert_eq!(
        outbox
            .iter()
            .filter(|entry| entry.title == "Match finished")
            .count(),
        2
    );

    let after = turn_service::spin(
        &state,
        match_id,
        SpinRequest {
            user_id: alice,
            category_id: None,
            expected_version: version,
        },
    )
    .await;
    assert!(matches!(after, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn correct_character_answer_steals_from_opponent() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;
    let match_id = started.id;
    let shared = category(&state, 0);

    let mut version = started.version;
    let won = win_character(&state, match_id, alice, shared, version).await;
    version = won.snapshot.version;
    let missed = spin_and_answer(&state, match_id, alice, category(&state, 1), version, WRONG).await;
    version = missed.snapshot.version;

    let stolen = win_character(&state, match_id, bob, shared, version).await;
    assert_eq!(stolen.stolen_from, Some(started.players[0].id));
    assert!(stolen.snapshot.players[0].characters_collected.is_empty());
    assert_eq!(stolen.snapshot.players[1].characters_collected, vec![shared]);
}

#[tokio::test]
async fn stale_expected_version_is_rejected() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;

    let stale = turn_service::spin(
        &state,
        started.id,
        SpinRequest {
            user_id: alice,
            category_id: None,
            expected_version: started.version - 1,
        },
    )
    .await;
    assert!(matches!(stale, Err(ServiceError::Conflict(_))));

    let unchanged = match_service::get_match(&state, started.id).await.unwrap();
    assert_eq!(unchanged.version, started.version);
    assert_eq!(unchanged.phase, VisibleMatchPhase::Wheel);
}

#[tokio::test]
async fn concurrent_answers_resolve_once() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;
    let served = turn_service::spin(
        &state,
        started.id,
        SpinRequest {
            user_id: alice,
            category_id: None,
            expected_version: started.version,
        },
    )
    .await
    .unwrap();
    let question = served.question.unwrap();

    let request = |option_index| AnswerRequest {
        user_id: alice,
        question_id: question.id,
        option_index,
        expected_version: served.version,
    };
    let (first, second) = tokio::join!(
        turn_service::answer(&state, started.id, request(RIGHT)),
        turn_service::answer(&state, started.id, request(WRONG)),
    );
    assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);

    let turns = match_service::list_turns(&state, started.id).await.unwrap();
    assert_eq!(turns.len(), 1);
}

#[tokio::test]
async fn wrong_user_cannot_answer() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;

    let result = turn_service::spin(
        &state,
        started.id,
        SpinRequest {
            user_id: bob,
            category_id: None,
            expected_version: started.version,
        },
    )
    .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn unanswered_question_times_out_and_passes_the_turn() {
    let config = AppConfig::from_json(r#"{ "question_time_limit_secs": 1 }"#).unwrap();
    let (state, _) = setup_with(config).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;

    let served = turn_service::spin(
        &state,
        started.id,
        SpinRequest {
            user_id: alice,
            category_id: None,
            expected_version: started.version,
        },
    )
    .await
    .unwrap();
    let question = served.question.unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let snapshot = match_service::get_match(&state, started.id).await.unwrap();
    assert_eq!(snapshot.phase, VisibleMatchPhase::Wheel);
    assert_eq!(snapshot.current_player_id, Some(started.players[1].id));

    let turns = match_service::list_turns(&state, started.id).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert!(turns[0].timed_out);
    assert!(!turns[0].correct);

    let late = turn_service::answer(
        &state,
        started.id,
        AnswerRequest {
            user_id: alice,
            question_id: question.id,
            option_index: RIGHT,
            expected_version: snapshot.version,
        },
    )
    .await;
    assert!(matches!(late, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn forfeit_finishes_and_records_stats() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;
    let answered =
        spin_and_answer(&state, started.id, alice, category(&state, 0), started.version, RIGHT)
            .await;
    assert!(answered.correct);

    let finished = match_service::forfeit(&state, started.id, ForfeitRequest { user_id: bob })
        .await
        .unwrap();
    assert_eq!(finished.status, MatchStatusDto::Finished);
    assert_eq!(finished.winner_id, Some(started.players[0].id));

    let alice_stats = stats_service::get_stats(&state, alice).await.unwrap();
    assert_eq!(alice_stats.games_won, 1);
    assert_eq!(alice_stats.correct_answers, 1);
    let bob_stats = stats_service::get_stats(&state, bob).await.unwrap();
    assert_eq!(bob_stats.games_lost, 1);

    let again = match_service::forfeit(&state, started.id, ForfeitRequest { user_id: bob }).await;
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn abandoning_a_waiting_match_leaves_stats_untouched() {
    let (state, _) = setup().await;
    let alice = Uuid::new_v4();
    let created = match_service::create_match(
        &state,
        CreateMatchRequest {
            user_id: alice,
            level: 1,
        },
    )
    .await
    .unwrap();

    let finished = match_service::forfeit(&state, created.id, ForfeitRequest { user_id: alice })
        .await
        .unwrap();
    assert_eq!(finished.status, MatchStatusDto::Finished);
    assert_eq!(finished.winner_id, None);
    assert_eq!(
        stats_service::get_stats(&state, alice)
            .await
            .unwrap()
            .games_played,
        0
    );
}

#[tokio::test]
async fn commands_fail_while_degraded() {
    let state = AppState::new(AppConfig::default());
    let result = match_service::create_match(
        &state,
        CreateMatchRequest {
            user_id: Uuid::new_v4(),
            level: 1,
        },
    )
    .await;
    assert!(matches!(result, Err(ServiceError::Degraded)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_finishes_both_count_in_stats() {
    let (state, _) = setup().await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let first = start_match(&state, alice, bob).await;
    let second = start_match(&state, alice, carol).await;

    let (bob_gives_up, carol_gives_up) = tokio::join!(
        match_service::forfeit(&state, first.id, ForfeitRequest { user_id: bob }),
        match_service::forfeit(&state, second.id, ForfeitRequest { user_id: carol }),
    );
    bob_gives_up.unwrap();
    carol_gives_up.unwrap();

    let stats = stats_service::get_stats(&state, alice).await.unwrap();
    assert_eq!(stats.games_played, 2);
    assert_eq!(stats.games_won, 2);
    assert_eq!(stats.total_points, 200);
}

#[tokio::test]
async fn subscribers_get_a_handshake_then_live_updates() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;

    let (mut receiver, initial) = sse_service::subscribe_match(&state, started.id)
        .await
        .unwrap();
    assert_eq!(initial.len(), 2);
    assert_eq!(initial[0].event.as_deref(), Some(EVENT_HANDSHAKE));
    let handshake: Value = serde_json::from_str(&initial[0].data).unwrap();
    assert_eq!(handshake["version"], started.version);
    assert_eq!(handshake["degraded"], false);
    assert_eq!(initial[1].event.as_deref(), Some(EVENT_MATCH_UPDATED));
    let snapshot: Value = serde_json::from_str(&initial[1].data).unwrap();
    assert_eq!(snapshot["id"], started.id.to_string());
    assert_eq!(snapshot["version"], started.version);

    let served = turn_service::spin(
        &state,
        started.id,
        SpinRequest {
            user_id: alice,
            category_id: None,
            expected_version: started.version,
        },
    )
    .await
    .unwrap();
    let update = receiver.recv().await.unwrap();
    assert_eq!(update.event.as_deref(), Some(EVENT_MATCH_UPDATED));
    let snapshot: Value = serde_json::from_str(&update.data).unwrap();
    assert_eq!(snapshot["version"], served.version);
}

#[tokio::test]
async fn finished_match_stream_ends_after_the_snapshot() {
    let (state, _) = setup().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let started = start_match(&state, alice, bob).await;
    match_service::forfeit(&state, started.id, ForfeitRequest { user_id: bob })
        .await
        .unwrap();
    assert_eq!(state.tracked_matches(), 0);

    let (mut receiver, initial) = sse_service::subscribe_match(&state, started.id)
        .await
        .unwrap();
    assert_eq!(initial.len(), 2);
    assert!(matches!(receiver.recv().await, Err(RecvError::Closed)));
    match_service::get_match(&state, started.id).await.unwrap();
    assert_eq!(state.tracked_matches(), 0);
}

#[tokio::test]
async fn unknown_match_lookups_track_nothing() {
    let (state, _) = setup().await;
    for _ in 0..20 {
        let id = Uuid::new_v4();
        assert!(matches!(
            match_service::get_match(&state, id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            sse_service::subscribe_match(&state, id).await,
            Err(ServiceError::NotFound(_))
        ));
    }
    assert_eq!(state.tracked_matches(), 0);
}
