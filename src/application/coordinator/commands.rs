use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::repos::{PostFieldChanges, PostStore, StoreError, run_in_transaction};
use crate::domain::entities::PostRecord;
use crate::domain::posts::{ACTIVITY_NEW_POST, NewPost};

use super::cache::Invalidation;
use super::service::PostCoordinator;
use super::types::{CoordinatorError, UpdatePostCommand};

impl PostCoordinator {
    /// Insert the post and its activity entry in one transaction, then reindex.
    pub async fn create(&self, post: NewPost) -> Result<PostRecord, CoordinatorError> {
        let write = run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let record = tx.insert_post(&post).await?;
                tx.insert_activity(record.id, ACTIVITY_NEW_POST).await?;
                Ok(record)
            })
        });

        let record = match tokio::time::timeout(self.settings.store_timeout, write).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                warn!(error = %err, "post creation rolled back");
                return Err(CoordinatorError::WriteFailed(err));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.store_timeout.as_millis() as u64,
                    "post creation timed out"
                );
                return Err(CoordinatorError::WriteFailed(StoreError::Timeout));
            }
        };

        info!(post_id = record.id, tags = record.tags.len(), "post created");
        self.schedule_reindex(&record);
        Ok(record)
    }

    /// Apply a partial update, drop the cached snapshot, then reindex.
    ///
    /// Returns the post as committed. A command without changes performs no
    /// write and returns the current post.
    pub async fn update(&self, command: UpdatePostCommand) -> Result<PostRecord, CoordinatorError> {
        let UpdatePostCommand { id, changes } = command;

        if changes.is_empty() {
            return self.read_primary(id).await;
        }

        // Spawned so that a caller giving up mid-write cannot skip the invalidation.
        let write = tokio::spawn(apply_update(
            Arc::clone(&self.store),
            id,
            changes,
            self.settings.store_timeout,
            self.invalidation(id),
        ));
        let record = match write.await {
            Ok(result) => result?,
            Err(err) => {
                warn!(post_id = id, error = %err, "post update task failed");
                return Err(CoordinatorError::WriteFailed(StoreError::from_persistence(err)));
            }
        };

        info!(post_id = id, revision = record.revision, "post updated");
        self.schedule_reindex(&record);
        Ok(record)
    }
}

/// Write `changes` and drop the cached snapshot whenever the write may have
/// committed, including when it failed or outlived `timeout`.
async fn apply_update(
    store: Arc<dyn PostStore>,
    id: i64,
    changes: PostFieldChanges,
    timeout: Duration,
    invalidation: Invalidation,
) -> Result<PostRecord, CoordinatorError> {
    match tokio::time::timeout(timeout, store.update_fields(id, &changes)).await {
        Ok(Ok(Some(record))) => {
            invalidation.run().await;
            Ok(record)
        }
        Ok(Ok(None)) | Ok(Err(StoreError::NotFound)) => Err(CoordinatorError::NotFound { id }),
        Ok(Err(err)) => {
            warn!(post_id = id, error = %err, "post update failed");
            invalidation.run().await;
            Err(CoordinatorError::WriteFailed(err))
        }
        Err(_) => {
            warn!(
                post_id = id,
                timeout_ms = timeout.as_millis() as u64,
                "post update timed out; it may still commit"
            );
            invalidation.run().await;
            Err(CoordinatorError::WriteFailed(StoreError::Timeout))
        }
    }
}
