use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use axum::{Router, http::StatusCode, routing::post};
use reqwest::Client;
use tokio::net::TcpListener;
use trivia_duel_back::{
    config::AppConfig,
    dao::{
        match_store::{MatchStore, memory::MemoryMatchStore},
        models::{InvitationEntity, InvitationStatusEntity, NotificationChannel},
    },
    services::notifier,
    state::{AppState, SharedState},
};
use uuid::Uuid;

/// Local endpoint answering every notification with `status`.
async fn endpoint(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/send",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                status
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/send"), hits)
}

async fn setup(push_url: &str, max_attempts: u32) -> (SharedState, Arc<MemoryMatchStore>) {
    let config = AppConfig::from_json(&format!(
        r#"{{ "notifications": {{ "push_url": "{push_url}", "max_attempts": {max_attempts} }} }}"#
    ))
    .unwrap();
    let state = AppState::new(config);
    let store = Arc::new(MemoryMatchStore::new());
    state.set_match_store(store.clone()).await;
    (state, store)
}

async fn enqueue_push(store: &MemoryMatchStore) -> Uuid {
    let entry = notifier::your_turn(Uuid::new_v4(), Uuid::new_v4(), SystemTime::now()).remove(0);
    let id = entry.id;
    store.save_outbox(entry).await.unwrap();
    id
}

#[tokio::test]
async fn delivered_entries_leave_the_outbox() {
    let (url, hits) = endpoint(StatusCode::OK).await;
    let (state, store) = setup(&url, 3).await;
    enqueue_push(&store).await;

    let delivered = notifier::dispatch_due(&state, &Client::new()).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(store.outbox_entries().await.is_empty());
}

#[tokio::test]
async fn failed_delivery_is_rescheduled() {
    let (url, hits) = endpoint(StatusCode::INTERNAL_SERVER_ERROR).await;
    let (state, store) = setup(&url, 3).await;
    let id = enqueue_push(&store).await;
    let client = Client::new();

    let before = SystemTime::now();
    assert_eq!(notifier::dispatch_due(&state, &client).await.unwrap(), 0);
    let entries = store.outbox_entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, id);
    assert_eq!(entry.attempts, 1);
    assert!(!entry.dead);
    assert!(entry.next_attempt_at > before);
    assert!(entry.last_error.is_some());

    // Not due again until its backoff elapsed.
    assert_eq!(notifier::dispatch_due(&state, &client).await.unwrap(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_entries_are_dead_lettered() {
    let (url, hits) = endpoint(StatusCode::BAD_GATEWAY).await;
    let (state, store) = setup(&url, 1).await;
    enqueue_push(&store).await;
    let client = Client::new();

    notifier::dispatch_due(&state, &client).await.unwrap();
    let entries = store.outbox_entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].dead);

    notifier::dispatch_due(&state, &client).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unconfigured_channel_is_dead_lettered_at_once() {
    let (url, hits) = endpoint(StatusCode::OK).await;
    let (state, store) = setup(&url, 5).await;
    let now = SystemTime::now();
    let invitation = InvitationEntity {
        id: Uuid::new_v4(),
        from_user_id: Uuid::new_v4(),
        to_user_id: Uuid::new_v4(),
        level: 1,
        status: InvitationStatusEntity::Pending,
        match_id: None,
        created_at: now,
        responded_at: None,
    };
    store
        .save_invitation(
            invitation.clone(),
            None,
            notifier::invitation_received(&invitation, now),
        )
        .await
        .unwrap();

    let delivered = notifier::dispatch_due(&state, &Client::new()).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let entries = store.outbox_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].channel, NotificationChannel::Email);
    assert!(entries[0].dead);
    assert_eq!(entries[0].attempts, 1);
}
