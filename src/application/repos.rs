//! Adapter contracts for the three stores behind the coordinator.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::entities::{ActivityLogRecord, PostRecord, SearchDocument};
use crate::domain::posts::NewPost;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("primary store unavailable: {0}")]
    Unavailable(String),
    #[error("database timeout")]
    Timeout,
}

impl StoreError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache command failed: {0}")]
    Command(String),
    #[error("cache call timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search index unavailable: {0}")]
    Unavailable(String),
    #[error("search index rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed search response: {0}")]
    Decode(String),
    #[error("search call timed out")]
    Timeout,
}

/// Partial update applied by [`PostStore::update_fields`]; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFieldChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl PostFieldChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none()
    }
}

/// Statements that run inside one primary-store transaction.
#[async_trait]
pub trait PostStoreTx: Send {
    async fn insert_post(&mut self, post: &NewPost) -> Result<PostRecord, StoreError>;

    async fn insert_activity(
        &mut self,
        post_id: i64,
        action: &str,
    ) -> Result<ActivityLogRecord, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of truth for posts.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PostStoreTx>, StoreError>;

    /// Apply `changes` and return the row as committed, or `None` when the id is unknown.
    async fn update_fields(
        &self,
        id: i64,
        changes: &PostFieldChanges,
    ) -> Result<Option<PostRecord>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<PostRecord>, StoreError>;

    /// Posts whose tag set contains `tag`, newest identity first.
    async fn find_by_tag(&self, tag: &str) -> Result<Vec<PostRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Run `work` inside a single primary-store transaction.
///
/// The transaction commits only when `work` succeeds; any error rolls it back.
pub async fn run_in_transaction<T, F>(store: &dyn PostStore, work: F) -> Result<T, StoreError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut (dyn PostStoreTx + 'static)) -> BoxFuture<'t, Result<T, StoreError>>
        + Send,
{
    let mut tx = store.begin().await?;
    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    error = %rollback_err,
                    "rollback failed; the connection drops the transaction instead"
                );
            }
            Err(err)
        }
    }
}

/// Advisory key/value cache. A miss is `Ok(None)`, never an error.
#[async_trait]
pub trait PostCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether calls are currently worth attempting.
    fn is_available(&self) -> bool;
}

/// Outcome of a document upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Applied,
    /// The index already holds an equal or newer revision.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchPage {
    pub documents: Vec<SearchDocument>,
    pub total: u64,
}

/// Eventually consistent full-text view of posts.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Idempotent; run once at startup.
    async fn ensure_schema(&self) -> Result<(), SearchError>;

    async fn upsert(&self, doc: &SearchDocument) -> Result<UpsertOutcome, SearchError>;

    async fn query(&self, text: &str) -> Result<SearchPage, SearchError>;

    fn is_available(&self) -> bool;
}
