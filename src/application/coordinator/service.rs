use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::reindex::{DispatchOutcome, ReindexDispatcher};
use crate::application::repos::{PostCache, PostStore, SearchError, SearchIndex};
use crate::domain::entities::{PostRecord, SearchDocument};

use super::types::{CoordinatorSettings, HealthReport};

/// Single authority that turns post operations into store operations.
///
/// Holds no locks across requests; share it behind an [`Arc`]. Construction
/// spawns the reindex workers, so it must happen inside a Tokio runtime.
pub struct PostCoordinator {
    pub(crate) store: Arc<dyn PostStore>,
    pub(crate) cache: Arc<dyn PostCache>,
    pub(crate) index: Arc<dyn SearchIndex>,
    pub(crate) reindex: ReindexDispatcher,
    pub(crate) settings: CoordinatorSettings,
}

impl PostCoordinator {
    pub fn new(
        store: Arc<dyn PostStore>,
        cache: Arc<dyn PostCache>,
        index: Arc<dyn SearchIndex>,
        settings: CoordinatorSettings,
    ) -> Self {
        let reindex = ReindexDispatcher::spawn(Arc::clone(&index), settings.reindex.clone());
        Self {
            store,
            cache,
            index,
            reindex,
            settings,
        }
    }

    /// Create the search index mapping if it does not exist yet.
    pub async fn ensure_search_schema(&self) -> Result<(), SearchError> {
        match tokio::time::timeout(self.settings.search_timeout, self.index.ensure_schema()).await
        {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let primary =
            match tokio::time::timeout(self.settings.store_timeout, self.store.health_check())
                .await
            {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    warn!(error = %err, "primary store health check failed");
                    false
                }
                Err(_) => {
                    warn!("primary store health check timed out");
                    false
                }
            };

        HealthReport {
            primary,
            cache: self.cache.is_available(),
            search: self.index.is_available(),
        }
    }

    /// Stop accepting reindex work and wait up to `grace` for queued jobs.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let drained = self.reindex.shutdown(grace).await;
        info!(drained, "coordinator shut down");
        drained
    }

    pub(crate) fn schedule_reindex(&self, post: &PostRecord) -> DispatchOutcome {
        self.reindex.dispatch(SearchDocument::from(post))
    }
}
