#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use std::time::SystemTime;

use crate::dao::models::{
    InvitationEntity, InvitationStatusEntity, MatchCommit, MatchEntity, OutboxEntity,
    QuestionEntity, TurnEntity, UserStatsEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for matches, the question bank and side tables.
pub trait MatchStore: Send + Sync {
    /// Store a freshly created match.
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    fn find_match_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    /// Apply a resolved command atomically, failing with a version conflict when the
    /// stored match is not at `commit.expected_version`.
    fn commit(&self, commit: MatchCommit) -> BoxFuture<'static, StorageResult<()>>;
    fn list_turns(&self, match_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TurnEntity>>>;
    fn save_questions(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Every question of a category at a given level.
    fn list_questions(
        &self,
        category_id: Uuid,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;
    fn find_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserStatsEntity>>>;
    /// Upsert an invitation together with the notifications it produces.
    ///
    /// With `expected` set, nothing is written unless the stored invitation still
    /// has that status; the call then returns `Ok(false)`.
    fn save_invitation(
        &self,
        invitation: InvitationEntity,
        expected: Option<InvitationStatusEntity>,
        outbox: Vec<OutboxEntity>,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_invitation(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>>;
    /// Pending invitations addressed to a user.
    fn list_invitations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>>;
    /// Live outbox entries whose next attempt is due at `now`.
    fn due_outbox(
        &self,
        now: SystemTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<OutboxEntity>>>;
    fn save_outbox(&self, entry: OutboxEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_outbox(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Retry copying side effects that a commit could not finish writing.
    fn flush_pending(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
