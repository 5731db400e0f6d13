use std::{collections::HashSet, sync::Arc, time::SystemTime};

use dashmap::DashSet;
use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    match_store::MatchStore,
    models::{
        InvitationEntity, InvitationStatusEntity, MatchCommit, MatchEntity, OutboxEntity,
        QuestionEntity, TurnEntity, UserStatsEntity,
    },
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchDocument, CouchInvitationDocument, CouchMatchDocument,
        CouchOutboxDocument, CouchQuestionDocument, CouchStatsDocument, END_SUFFIX,
        INVITATION_PREFIX, MATCH_PREFIX, MatchBody, OUTBOX_PREFIX, StatsBody, WriteResponse,
        invitation_doc_id, match_doc_id, outbox_doc_id, question_category_prefix,
        question_doc_id, stats_doc_id,
    },
};

/// Attempts at a `_rev`-checked read-modify-write before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct CouchMatchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    /// Matches whose embedded side effects still wait to be copied out.
    undrained: Arc<DashSet<Uuid>>,
}

impl CouchMatchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            undrained: Arc::new(DashSet::new()),
        };

        store.ensure_database().await?;
        match store.list_documents::<CouchMatchDocument>(MATCH_PREFIX).await {
            Ok(docs) => {
                for doc in docs.into_iter().filter(|doc| doc.body.has_pending()) {
                    store.undrained.insert(doc.body.entity.id);
                }
            }
            Err(err) => warn!(error = %err, "could not scan matches for pending side effects"),
        }
        Ok(store)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorized(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// `PUT` a document. A `409` surfaces as `Ok(None)` so callers decide what a
    /// revision conflict means for them.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<Option<String>>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(None),
            status if status.is_success() => response
                .json::<WriteResponse>()
                .await
                .map(|written| Some(written.rev))
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Insert or overwrite a document regardless of its current revision.
    async fn upsert_document<T>(&self, doc_id: String, body: T) -> CouchResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let rev = self
            .get_document::<CouchDocument<serde_json::Value>>(&doc_id)
            .await?
            .and_then(|existing| existing.rev);
        let doc = CouchDocument::new(doc_id.clone(), rev, body);
        match self.put_document(&doc_id, &doc).await? {
            Some(_) => Ok(()),
            None => Err(CouchDaoError::RequestStatus {
                path: doc_id,
                status: StatusCode::CONFLICT,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str) -> CouchResult<bool> {
        let Some(existing) = self
            .get_document::<CouchDocument<serde_json::Value>>(doc_id)
            .await?
        else {
            return Ok(false);
        };
        let Some(rev) = existing.rev else {
            return Ok(false);
        };

        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn commit_match(&self, commit: MatchCommit) -> CouchResult<()> {
        let match_id = commit.entity.id;
        let expected = commit.expected_version;
        let doc_id = match_doc_id(match_id);
        let stale = || CouchDaoError::StaleMatch { match_id, expected };

        let existing = self
            .get_document::<CouchMatchDocument>(&doc_id)
            .await?
            .ok_or_else(stale)?;
        if existing.body.entity.version != expected {
            return Err(stale());
        }

        let mut body = existing.body;
        body.entity = commit.entity;
        body.turns.extend(commit.turn);
        body.pending_stats.extend(commit.stats);
        body.pending_outbox.extend(commit.outbox);
        let has_pending = body.has_pending();

        let doc = CouchMatchDocument::new(doc_id.clone(), existing.rev, body);
        // `_rev` guards the read-check-write window against other processes.
        self.put_document(&doc_id, &doc).await?.ok_or_else(stale)?;

        // The match has advanced; copying side effects out can be retried later.
        if has_pending {
            if let Err(err) = self.drain_match(match_id).await {
                warn!(%match_id, error = %err, "side effects left pending on match document");
                self.undrained.insert(match_id);
            }
        }
        Ok(())
    }

    /// Add one match's increments to a user's stats document.
    async fn apply_stats_delta(
        &self,
        match_id: Uuid,
        delta: &UserStatsEntity,
    ) -> CouchResult<()> {
        let doc_id = stats_doc_id(delta.user_id);
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let existing = self.get_document::<CouchStatsDocument>(&doc_id).await?;
            let (rev, mut body) = match existing {
                Some(doc) => (doc.rev, doc.body),
                None => (
                    None,
                    StatsBody {
                        stats: UserStatsEntity {
                            user_id: delta.user_id,
                            ..UserStatsEntity::default()
                        },
                        applied_matches: Vec::new(),
                    },
                ),
            };
            if body.applied_matches.contains(&match_id) {
                return Ok(());
            }
            body.stats.accumulate(delta);
            body.applied_matches.push(match_id);

            let doc = CouchDocument::new(doc_id.clone(), rev, body);
            if self.put_document(&doc_id, &doc).await?.is_some() {
                return Ok(());
            }
            debug!(user_id = %delta.user_id, "stats revision moved; retrying");
        }
        Err(CouchDaoError::RequestStatus {
            path: doc_id,
            status: StatusCode::CONFLICT,
        })
    }

    /// Copy the stats increments and notifications embedded in a match document
    /// to their own documents, then clear them from the match.
    async fn drain_match(&self, match_id: Uuid) -> CouchResult<()> {
        let doc_id = match_doc_id(match_id);
        let Some(mut doc) = self.get_document::<CouchMatchDocument>(&doc_id).await? else {
            return Ok(());
        };
        if !doc.body.has_pending() {
            return Ok(());
        }

        for delta in &doc.body.pending_stats {
            self.apply_stats_delta(match_id, delta).await?;
        }
        for entry in &doc.body.pending_outbox {
            self.upsert_document(outbox_doc_id(entry.id), entry.clone())
                .await?;
        }

        let drained_stats = doc
            .body
            .pending_stats
            .iter()
            .map(|delta| delta.user_id)
            .collect::<HashSet<_>>();
        let drained_outbox = doc
            .body
            .pending_outbox
            .iter()
            .map(|entry| entry.id)
            .collect::<HashSet<_>>();

        for _ in 0..MAX_WRITE_ATTEMPTS {
            doc.body
                .pending_stats
                .retain(|delta| !drained_stats.contains(&delta.user_id));
            doc.body
                .pending_outbox
                .retain(|entry| !drained_outbox.contains(&entry.id));
            if self.put_document(&doc_id, &doc).await?.is_some() {
                return Ok(());
            }
            match self.get_document::<CouchMatchDocument>(&doc_id).await? {
                Some(latest) => doc = latest,
                None => return Ok(()),
            }
        }
        Err(CouchDaoError::RequestStatus {
            path: doc_id,
            status: StatusCode::CONFLICT,
        })
    }
}

impl MatchStore for CouchMatchStore {
    fn insert_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = match_doc_id(entity.id);
            let doc = CouchMatchDocument::new(doc_id.clone(), None, MatchBody::new(entity));
            match store.put_document(&doc_id, &doc).await? {
                Some(_) => Ok(()),
                None => Err(CouchDaoError::RequestStatus {
                    path: doc_id,
                    status: StatusCode::CONFLICT,
                }
                .into()),
            }
        })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchMatchDocument>(&match_doc_id(id))
                .await?;
            Ok(doc.map(|doc| doc.body.entity))
        })
    }

    fn find_match_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchMatchDocument>(MATCH_PREFIX)
                .await?;
            Ok(docs
                .into_iter()
                .map(|doc| doc.body.entity)
                .filter(|entity| entity.code == code)
                .max_by_key(|entity| entity.created_at))
        })
    }

    fn commit(&self, commit: MatchCommit) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit_match(commit).await.map_err(Into::into) })
    }

    fn list_turns(&self, match_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TurnEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchMatchDocument>(&match_doc_id(match_id))
                .await?;
            Ok(doc.map(|doc| doc.body.turns).unwrap_or_default())
        })
    }

    fn save_questions(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            for question in questions {
                let doc_id = question_doc_id(question.category_id, question.id);
                store.upsert_document(doc_id, question).await?;
            }
            Ok(())
        })
    }

    fn list_questions(
        &self,
        category_id: Uuid,
        level: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchQuestionDocument>(&question_category_prefix(category_id))
                .await?;
            Ok(docs
                .into_iter()
                .map(|doc| doc.body)
                .filter(|question| question.level == level)
                .collect())
        })
    }

    fn find_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserStatsEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchStatsDocument>(&stats_doc_id(user_id))
                .await?;
            Ok(doc.map(|doc| doc.body.stats))
        })
    }

    fn save_invitation(
        &self,
        invitation: InvitationEntity,
        expected: Option<InvitationStatusEntity>,
        outbox: Vec<OutboxEntity>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = invitation_doc_id(invitation.id);
            let existing = store
                .get_document::<CouchInvitationDocument>(&doc_id)
                .await?;
            if let Some(expected) = expected {
                if existing.as_ref().map(|doc| doc.body.status) != Some(expected) {
                    return Ok(false);
                }
            }

            let rev = existing.and_then(|doc| doc.rev);
            let doc = CouchDocument::new(doc_id.clone(), rev, invitation);
            if store.put_document(&doc_id, &doc).await?.is_none() {
                if expected.is_some() {
                    return Ok(false);
                }
                return Err(CouchDaoError::RequestStatus {
                    path: doc_id,
                    status: StatusCode::CONFLICT,
                }
                .into());
            }

            for entry in outbox {
                let entry_id = entry.id;
                if let Err(err) = store.upsert_document(outbox_doc_id(entry_id), entry).await {
                    warn!(
                        outbox_id = %entry_id,
                        error = %err,
                        "failed to enqueue invitation notification"
                    );
                }
            }
            Ok(true)
        })
    }

    fn find_invitation(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchInvitationDocument>(&invitation_doc_id(id))
                .await?;
            Ok(doc.map(|doc| doc.body))
        })
    }

    fn list_invitations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut pending = store
                .list_documents::<CouchInvitationDocument>(INVITATION_PREFIX)
                .await?
                .into_iter()
                .map(|doc| doc.body)
                .filter(|inv| {
                    inv.to_user_id == user_id && inv.status == InvitationStatusEntity::Pending
                })
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
        let store = self.clone();
        Box::pin(async move {
            let mut due = store
                .list_documents::<CouchOutboxDocument>(OUTBOX_PREFIX)
                .await?
                .into_iter()
                .map(|doc| doc.body)
                .filter(|entry| !entry.dead && entry.next_attempt_at <= now)
                .collect::<Vec<_>>();
            due.sort_by_key(|entry| entry.next_attempt_at);
            due.truncate(limit);
            Ok(due)
        })
    }

    fn save_outbox(&self, entry: OutboxEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_document(outbox_doc_id(entry.id), entry)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_outbox(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_document(&outbox_doc_id(id))
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                warn!(status = %response.status(), "CouchDB health check failed");
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }

    fn flush_pending(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let match_ids = store.undrained.iter().map(|id| *id).collect::<Vec<_>>();
            for match_id in match_ids {
                match store.drain_match(match_id).await {
                    Ok(()) => {
                        store.undrained.remove(&match_id);
                        debug!(%match_id, "pending side effects drained");
                    }
                    Err(err) => {
                        warn!(%match_id, error = %err, "pending side effects still not drained");
                    }
                }
            }
            Ok(())
        })
    }
}
