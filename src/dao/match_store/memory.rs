//! In-process store used when no database is configured, and by the test-suite.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dao::{
    match_store::MatchStore,
    models::{
        InvitationEntity, InvitationStatusEntity, MatchCommit, MatchEntity, OutboxEntity,
        QuestionEntity, TurnEntity, UserStatsEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Tables {
    matches: HashMap<Uuid, MatchEntity>,
    turns: HashMap<Uuid, Vec<TurnEntity>>,
    questions: HashMap<Uuid, QuestionEntity>,
    stats: HashMap<Uuid, UserStatsEntity>,
    invitations: HashMap<Uuid, InvitationEntity>,
    outbox: HashMap<Uuid, OutboxEntity>,
}

/// Store keeping every table behind one lock, so a commit is trivially atomic.
#[derive(Clone, Default)]
pub struct MemoryMatchStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryMatchStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox entry, including dead ones.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntity> {
        let tables = self.tables.read().await;
        tables.outbox.values().cloned().collect()
    }
}

impl MatchStore for MemoryMatchStore {
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            tables.matches.insert(entity.id, entity);
            Ok(())
        })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.matches.get(&id).cloned()) })
    }

    fn find_match_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .matches
                .values()
                .filter(|entity| entity.code == code)
                .max_by_key(|entity| entity.created_at)
                .cloned())
        })
    }

    fn commit(&self, commit: MatchCommit) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let match_id = commit.entity.id;
            let current = tables.matches.get(&match_id).map(|entity| entity.version);
            if current != Some(commit.expected_version) {
                return Err(StorageError::VersionConflict {
                    match_id,
                    expected: commit.expected_version,
                });
            }

            tables.matches.insert(match_id, commit.entity);
            if let Some(turn) = commit.turn {
                tables.turns.entry(match_id).or_default().push(turn);
            }
            for delta in commit.stats {
                tables
                    .stats
                    .entry(delta.user_id)
                    .or_insert_with(|| UserStatsEntity {
                        user_id: delta.user_id,
                        ..UserStatsEntity::default()
                    })
                    .accumulate(&delta);
            }
            for entry in commit.outbox {
                tables.outbox.insert(entry.id, entry);
            }
            Ok(())
        })
    }

    fn list_turns(&self, match_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TurnEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables.turns.get(&match_id).cloned().unwrap_or_default())
        })
    }

    fn save_questions(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            for question in questions {
                tables.questions.insert(question.id, question);
            }
            Ok(())
        })
    }

    fn list_questions(
        &self,
        category_id: Uuid,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .questions
                .values()
                .filter(|q| q.category_id == category_id && q.level == level)
                .cloned()
                .collect())
        })
    }

    fn find_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserStatsEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.stats.get(&user_id).cloned()) })
    }

    fn save_invitation(
        &self,
        invitation: InvitationEntity,
        expected: Option<InvitationStatusEntity>,
        outbox: Vec<OutboxEntity>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            if let Some(expected) = expected {
                let current = tables.invitations.get(&invitation.id).map(|inv| inv.status);
                if current != Some(expected) {
                    return Ok(false);
                }
            }
            tables.invitations.insert(invitation.id, invitation);
            for entry in outbox {
                tables.outbox.insert(entry.id, entry);
            }
            Ok(true)
        })
    }

    fn find_invitation(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.invitations.get(&id).cloned()) })
    }

    fn list_invitations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let mut pending = tables
                .invitations
                .values()
                .filter(|inv| {
                    inv.to_user_id == user_id && inv.status == InvitationStatusEntity::Pending
                })
                .cloned()
                .collect::<Vec<_>>();
            pending.sort_by_key(|inv| inv.created_at);
            Ok(pending)
        })
    }

    fn due_outbox(
        &self,
        now: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<OutboxEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let mut due = tables
                .outbox
                .values()
                .filter(|entry| !entry.dead && entry.next_attempt_at <= now)
                .cloned()
                .collect::<Vec<_>>();
            due.sort_by_key(|entry| entry.next_attempt_at);
            due.truncate(limit);
            Ok(due)
        })
    }

    fn save_outbox(&self, entry: OutboxEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            tables.write().await.outbox.insert(entry.id, entry);
            Ok(())
        })
    }

    fn delete_outbox(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.write().await.outbox.remove(&id).is_some()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{MatchStatusEntity, PhaseEntity};

    fn entity(version: u64) -> MatchEntity {
        let now = SystemTime::now();
        MatchEntity {
            id: Uuid::nil(),
            code: "ABC123".into(),
            status: MatchStatusEntity::Waiting,
            level: 1,
            current_player_id: None,
            current_category_id: None,
            winner_id: None,
            phase: PhaseEntity::Waiting,
            version,
            characters_this_turn: 0,
            asked_question_ids: Vec::new(),
            players: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn turn() -> TurnEntity {
        TurnEntity {
            id: Uuid::new_v4(),
            match_id: Uuid::nil(),
            player_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            correct: true,
            timed_out: false,
            time_taken_ms: 1_500,
            streak_at_answer: 1,
            character_won: None,
            created_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn stale_commit_writes_nothing() {
        let store = MemoryMatchStore::new();
        store.insert_match(entity(0)).await.unwrap();
        store
            .commit(MatchCommit {
                entity: entity(1),
                expected_version: 0,
                turn: Some(turn()),
                stats: Vec::new(),
                outbox: Vec::new(),
            })
            .await
            .unwrap();

        let err = store
            .commit(MatchCommit {
                entity: entity(1),
                expected_version: 0,
                turn: Some(turn()),
                stats: vec![UserStatsEntity::default()],
                outbox: Vec::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::VersionConflict { expected: 0, .. }));
        assert_eq!(store.list_turns(Uuid::nil()).await.unwrap().len(), 1);
        assert!(store.find_stats(Uuid::nil()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_on_unknown_match_conflicts() {
        let store = MemoryMatchStore::new();
        let err = store
            .commit(MatchCommit {
                entity: entity(1),
                expected_version: 0,
                turn: None,
                stats: Vec::new(),
                outbox: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn stats_deltas_add_up_across_matches() {
        let store = MemoryMatchStore::new();
        let user_id = Uuid::new_v4();
        let delta = UserStatsEntity {
            user_id,
            games_played: 1,
            games_won: 1,
            total_points: 100,
            best_streak: 3,
            ..UserStatsEntity::default()
        };

        for match_id in [Uuid::new_v4(), Uuid::new_v4()] {
            let mut current = entity(0);
            current.id = match_id;
            store.insert_match(current.clone()).await.unwrap();
            current.version = 1;
            store
                .commit(MatchCommit {
                    entity: current,
                    expected_version: 0,
                    turn: None,
                    stats: vec![delta.clone()],
                    outbox: Vec::new(),
                })
                .await
                .unwrap();
        }

        let totals = store.find_stats(user_id).await.unwrap().unwrap();
        assert_eq!(totals.games_played, 2);
        assert_eq!(totals.games_won, 2);
        assert_eq!(totals.total_points, 200);
        assert_eq!(totals.best_streak, 3);
    }

    #[tokio::test]
    async fn invitation_update_requires_expected_status() {
        let store = MemoryMatchStore::new();
        let now = SystemTime::now();
        let pending = InvitationEntity {
            id: Uuid::new_v4(),
            from_user_id: Uuid::new_v4(),
            to_user_id: Uuid::new_v4(),
            level: 1,
            status: InvitationStatusEntity::Pending,
            match_id: None,
            created_at: now,
            responded_at: None,
        };
        assert!(
            store
                .save_invitation(pending.clone(), None, Vec::new())
                .await
                .unwrap()
        );

        let accepted = InvitationEntity {
            status: InvitationStatusEntity::Accepted,
            match_id: Some(Uuid::new_v4()),
            responded_at: Some(now),
            ..pending.clone()
        };
        let declined = InvitationEntity {
            status: InvitationStatusEntity::Declined,
            responded_at: Some(now),
            ..pending.clone()
        };
        let expected = Some(InvitationStatusEntity::Pending);
        assert!(
            store
                .save_invitation(accepted.clone(), expected, Vec::new())
                .await
                .unwrap()
        );
        assert!(
            !store
                .save_invitation(declined, expected, Vec::new())
                .await
                .unwrap()
        );

        let stored = store.find_invitation(pending.id).await.unwrap().unwrap();
        assert_eq!(stored, accepted);
    }
}
