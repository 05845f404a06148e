use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::application::reindex::ReindexSettings;
use crate::application::repos::{PostFieldChanges, StoreError};
use crate::domain::error::DomainError;
use crate::domain::posts::{ensure_non_empty, normalize_tags};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("post {id} not found")]
    NotFound { id: i64 },
    #[error("write could not be committed: {0}")]
    WriteFailed(#[source] StoreError),
    #[error("primary store read failed: {0}")]
    ReadFailed(#[source] StoreError),
    #[error("dependency `{dependency}` unavailable: {reason}")]
    DependencyUnavailable {
        dependency: &'static str,
        reason: String,
    },
}

impl CoordinatorError {
    pub(crate) fn search_unavailable(reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: "search",
            reason: reason.into(),
        }
    }
}

/// Partial update of an existing post. Only the fields that were set change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePostCommand {
    pub id: i64,
    pub changes: PostFieldChanges,
}

impl UpdatePostCommand {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            changes: PostFieldChanges::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Result<Self, DomainError> {
        self.changes.title = Some(ensure_non_empty(title.into(), "title")?);
        Ok(self)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Result<Self, DomainError> {
        self.changes.content = Some(ensure_non_empty(content.into(), "content")?);
        Ok(self)
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.changes.tags = Some(normalize_tags(tags));
        self
    }
}

/// Deadlines and cache policy applied by [`super::PostCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub cache_key_prefix: String,
    pub store_timeout: Duration,
    pub search_timeout: Duration,
    pub reindex: ReindexSettings,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            cache_key_prefix: String::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            reindex: ReindexSettings::default(),
        }
    }
}

/// Cache key holding the snapshot of post `id`.
pub fn post_cache_key(prefix: &str, id: i64) -> String {
    format!("{prefix}post:{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub primary: bool,
    pub cache: bool,
    pub search: bool,
}

impl HealthReport {
    /// The service can answer requests whenever the primary store is up.
    pub fn is_serving(&self) -> bool {
        self.primary
    }
}
