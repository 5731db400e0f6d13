//! Durable notification outbox: entry builders and the delivery loop.

use std::time::{Duration, SystemTime};

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::NotificationConfig,
    dao::models::{InvitationEntity, NotificationChannel, OutboxEntity},
    error::ServiceError,
    state::{SharedState, match_session::MatchSession},
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const BATCH_SIZE: usize = 32;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the next attempt once `attempts` deliveries failed.
pub fn backoff_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    INITIAL_BACKOFF
        .saturating_mul(1 << exponent)
        .min(MAX_BACKOFF)
}

fn entry(
    channel: NotificationChannel,
    recipient_user_id: Uuid,
    match_id: Option<Uuid>,
    title: &str,
    body: String,
    now: SystemTime,
) -> OutboxEntity {
    OutboxEntity {
        id: Uuid::new_v4(),
        channel,
        recipient_user_id,
        match_id,
        title: title.to_owned(),
        body,
        attempts: 0,
        next_attempt_at: now,
        dead: false,
        last_error: None,
        created_at: now,
    }
}

/// "Your turn" push for the player who just received the turn.
pub fn your_turn(user_id: Uuid, match_id: Uuid, now: SystemTime) -> Vec<OutboxEntity> {
    vec![entry(
        NotificationChannel::Push,
        user_id,
        Some(match_id),
        "Your turn",
        "Your opponent missed. Spin the wheel!".into(),
        now,
    )]
}

/// "Match finished" push for both players.
pub fn match_finished(session: &MatchSession, now: SystemTime) -> Vec<OutboxEntity> {
    session
        .players
        .iter()
        .map(|player| {
            let body = match session.winner_id {
                Some(winner) if winner == player.id => "You won the match!".to_owned(),
                Some(_) => "Your opponent won the match.".to_owned(),
                None => "The match was abandoned.".to_owned(),
            };
            entry(
                NotificationChannel::Push,
                player.user_id,
                Some(session.id),
                "Match finished",
                body,
                now,
            )
        })
        .collect()
}

/// Push and email for the invitee of a new invitation.
pub fn invitation_received(invitation: &InvitationEntity, now: SystemTime) -> Vec<OutboxEntity> {
    let body = format!(
        "You have been challenged to a level {} trivia duel.",
        invitation.level
    );
    [NotificationChannel::Push, NotificationChannel::Email]
        .into_iter()
        .map(|channel| {
            entry(
                channel,
                invitation.to_user_id,
                None,
                "New challenge",
                body.clone(),
                now,
            )
        })
        .collect()
}

/// "Match started" push for the inviter once the invitee accepted.
pub fn invitation_accepted(
    invitation: &InvitationEntity,
    match_id: Uuid,
    now: SystemTime,
) -> Vec<OutboxEntity> {
    vec![entry(
        NotificationChannel::Push,
        invitation.from_user_id,
        Some(match_id),
        "Challenge accepted",
        "Your challenge was accepted. It is your turn!".into(),
        now,
    )]
}

#[derive(Debug, Error)]
enum DeliveryError {
    #[error("no endpoint configured for {0:?} notifications")]
    Unconfigured(NotificationChannel),
    #[error("delivery request failed")]
    Request(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct NotificationPayload<'a> {
    user_id: Uuid,
    match_id: Option<Uuid>,
    title: &'a str,
    body: &'a str,
}

async fn deliver(
    client: &Client,
    config: &NotificationConfig,
    entry: &OutboxEntity,
) -> Result<(), DeliveryError> {
    let url = match entry.channel {
        NotificationChannel::Push => config.push_url.as_deref(),
        NotificationChannel::Email => config.email_url.as_deref(),
    }
    .ok_or(DeliveryError::Unconfigured(entry.channel))?;

    client
        .post(url)
        .timeout(REQUEST_TIMEOUT)
        .json(&NotificationPayload {
            user_id: entry.recipient_user_id,
            match_id: entry.match_id,
            title: &entry.title,
            body: &entry.body,
        })
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Apply a failed attempt to `entry`: reschedule it or mark it dead.
fn record_failure(
    mut entry: OutboxEntity,
    error: String,
    give_up: bool,
    max_attempts: u32,
    now: SystemTime,
) -> OutboxEntity {
    entry.attempts = entry.attempts.saturating_add(1);
    entry.last_error = Some(error);
    if give_up || entry.attempts >= max_attempts {
        entry.dead = true;
    } else {
        entry.next_attempt_at = now + backoff_delay(entry.attempts);
    }
    entry
}

/// Deliver every due entry once. Returns how many were delivered.
pub async fn dispatch_due(state: &SharedState, client: &Client) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config().notifications();
    let due = store.due_outbox(SystemTime::now(), BATCH_SIZE).await?;
    let mut delivered = 0;

    for entry in due {
        match deliver(client, config, &entry).await {
            Ok(()) => {
                store.delete_outbox(entry.id).await?;
                delivered += 1;
                debug!(entry_id = %entry.id, channel = ?entry.channel, "notification delivered");
            }
            Err(err) => {
                let give_up = matches!(err, DeliveryError::Unconfigured(_));
                let updated = record_failure(
                    entry,
                    err.to_string(),
                    give_up,
                    config.max_attempts,
                    SystemTime::now(),
                );
                if updated.dead {
                    warn!(
                        entry_id = %updated.id,
                        recipient = %updated.recipient_user_id,
                        attempts = updated.attempts,
                        error = %err,
                        "notification dead-lettered"
                    );
                } else {
                    debug!(
                        entry_id = %updated.id,
                        attempts = updated.attempts,
                        error = %err,
                        "notification delivery failed; retrying later"
                    );
                }
                store.save_outbox(updated).await?;
            }
        }
    }

    Ok(delivered)
}

/// Background loop draining the outbox whenever new entries are committed, and
/// at least every few seconds for retries.
pub async fn run_dispatcher(state: SharedState) {
    let client = match Client::builder().build() {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "failed to build notification client; outbox disabled");
            return;
        }
    };
    info!("notification dispatcher started");

    loop {
        match dispatch_due(&state, &client).await {
            Ok(0) => {}
            Ok(delivered) => debug!(delivered, "outbox drained"),
            Err(ServiceError::Degraded) => {}
            Err(err) => warn!(error = %err, "outbox dispatch failed"),
        }

        tokio::select! {
            _ = state.outbox_woken() => {}
            _ = sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboxEntity {
        your_turn(Uuid::new_v4(), Uuid::new_v4(), SystemTime::now()).remove(0)
    }

    #[test]
    fn backoff_doubles_up_to_a_minute() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(7), Duration::from_secs(60));
        assert_eq!(backoff_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn failure_reschedules_until_max_attempts() {
        let now = SystemTime::now();
        let once = record_failure(sample(), "boom".into(), false, 3, now);
        assert_eq!(once.attempts, 1);
        assert!(!once.dead);
        assert_eq!(once.next_attempt_at, now + Duration::from_secs(1));

        let twice = record_failure(once, "boom".into(), false, 3, now);
        assert_eq!(twice.next_attempt_at, now + Duration::from_secs(2));
        let thrice = record_failure(twice, "boom".into(), false, 3, now);
        assert!(thrice.dead);
        assert_eq!(thrice.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn unconfigured_channel_dies_immediately() {
        let dead = record_failure(sample(), "no endpoint".into(), true, 5, SystemTime::now());
        assert!(dead.dead);
        assert_eq!(dead.attempts, 1);
    }

    #[test]
    fn invitation_notifies_push_and_email() {
        let now = SystemTime::now();
        let invitation = InvitationEntity {
            id: Uuid::new_v4(),
            from_user_id: Uuid::new_v4(),
            to_user_id: Uuid::new_v4(),
            level: 2,
            status: crate::dao::models::InvitationStatusEntity::Pending,
            match_id: None,
            created_at: now,
            responded_at: None,
        };
        let entries = invitation_received(&invitation, now);
        assert_eq!(entries.len(), 2);
        assert!(
            entries
                .iter()
                .all(|e| e.recipient_user_id == invitation.to_user_id && !e.dead)
        );
    }
}
