use metrics::counter;
use tracing::{debug, warn};

use crate::application::repos::{SearchPage, StoreError};
use crate::domain::entities::PostRecord;

use super::service::PostCoordinator;
use super::types::CoordinatorError;

impl PostCoordinator {
    /// Cache-aside point lookup.
    pub async fn get_by_id(&self, id: i64) -> Result<PostRecord, CoordinatorError> {
        if id <= 0 {
            return Err(CoordinatorError::NotFound { id });
        }

        if let Some(post) = self.cached_post(id).await {
            return Ok(post);
        }

        let post = self.read_primary(id).await?;
        self.backfill(&post).await;
        Ok(post)
    }

    /// Posts carrying `tag`, newest first, straight from the primary store.
    pub async fn search_by_tag(&self, tag: &str) -> Result<Vec<PostRecord>, CoordinatorError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(Vec::new());
        }

        let lookup = self.store.find_by_tag(tag);
        match tokio::time::timeout(self.settings.store_timeout, lookup).await {
            Ok(Ok(posts)) => {
                debug!(tag, matches = posts.len(), "tag search");
                Ok(posts)
            }
            Ok(Err(err)) => {
                warn!(tag, error = %err, "tag search failed");
                Err(CoordinatorError::ReadFailed(err))
            }
            Err(_) => {
                warn!(tag, "tag search timed out");
                Err(CoordinatorError::ReadFailed(StoreError::Timeout))
            }
        }
    }

    /// Full-text query against the search index. Results may lag the primary store.
    pub async fn search_by_text(&self, query: &str) -> Result<SearchPage, CoordinatorError> {
        if !self.index.is_available() {
            counter!("postsync_search_unavailable_total").increment(1);
            return Err(CoordinatorError::search_unavailable(
                "search index marked unavailable",
            ));
        }

        let lookup = self.index.query(query);
        match tokio::time::timeout(self.settings.search_timeout, lookup).await {
            Ok(Ok(page)) => {
                debug!(hits = page.documents.len(), total = page.total, "text search");
                Ok(page)
            }
            Ok(Err(err)) => {
                counter!("postsync_search_unavailable_total").increment(1);
                warn!(error = %err, "text search failed");
                Err(CoordinatorError::search_unavailable(err.to_string()))
            }
            Err(_) => {
                counter!("postsync_search_unavailable_total").increment(1);
                warn!(
                    timeout_ms = self.settings.search_timeout.as_millis() as u64,
                    "text search timed out"
                );
                Err(CoordinatorError::search_unavailable("search query timed out"))
            }
        }
    }

    pub(crate) async fn read_primary(&self, id: i64) -> Result<PostRecord, CoordinatorError> {
        let lookup = self.store.find_by_id(id);
        match tokio::time::timeout(self.settings.store_timeout, lookup).await {
            Ok(Ok(Some(post))) => Ok(post),
            Ok(Ok(None)) | Ok(Err(StoreError::NotFound)) => Err(CoordinatorError::NotFound { id }),
            Ok(Err(err)) => {
                warn!(post_id = id, error = %err, "primary store read failed");
                Err(CoordinatorError::ReadFailed(err))
            }
            Err(_) => {
                warn!(post_id = id, "primary store read timed out");
                Err(CoordinatorError::ReadFailed(StoreError::Timeout))
            }
        }
    }
}
