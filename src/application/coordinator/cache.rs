//! Cache-aside helpers. Every failure here degrades to a miss.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::application::repos::PostCache;
use crate::domain::entities::PostRecord;

use super::service::PostCoordinator;
use super::types::post_cache_key;

/// Adapters enforce `cache_timeout` themselves and count the expiry against
/// their availability; the coordinator gives up only after this extra margin.
const CACHE_DEADLINE_MARGIN: Duration = Duration::from_millis(50);

impl PostCoordinator {
    pub(crate) fn cache_key(&self, id: i64) -> String {
        post_cache_key(&self.settings.cache_key_prefix, id)
    }

    fn cache_deadline(&self) -> Duration {
        self.settings.cache_timeout + CACHE_DEADLINE_MARGIN
    }

    /// Look up a snapshot; `None` means "read the primary store".
    pub(crate) async fn cached_post(&self, id: i64) -> Option<PostRecord> {
        if !self.cache.is_available() {
            counter!("postsync_cache_miss_total", "reason" => "unavailable").increment(1);
            return None;
        }

        let key = self.cache_key(id);
        let lookup = tokio::time::timeout(self.cache_deadline(), self.cache.get(&key)).await;
        let bytes = match lookup {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                counter!("postsync_cache_miss_total", "reason" => "absent").increment(1);
                debug!(post_id = id, "cache miss");
                return None;
            }
            Ok(Err(err)) => {
                counter!("postsync_cache_error_total", "op" => "get").increment(1);
                warn!(post_id = id, error = %err, "cache lookup failed; reading primary store");
                return None;
            }
            Err(_) => {
                counter!("postsync_cache_error_total", "op" => "get").increment(1);
                warn!(post_id = id, "cache lookup timed out; reading primary store");
                return None;
            }
        };

        match serde_json::from_slice::<PostRecord>(&bytes) {
            Ok(post) if post.id == id => {
                counter!("postsync_cache_hit_total").increment(1);
                debug!(post_id = id, revision = post.revision, "cache hit");
                Some(post)
            }
            Ok(post) => {
                counter!("postsync_cache_error_total", "op" => "decode").increment(1);
                warn!(
                    post_id = id,
                    cached_id = post.id,
                    "cache entry holds another post; ignoring it"
                );
                None
            }
            Err(err) => {
                counter!("postsync_cache_error_total", "op" => "decode").increment(1);
                warn!(post_id = id, error = %err, "undecodable cache entry; ignoring it");
                None
            }
        }
    }

    /// Best-effort write-back after a primary-store read.
    pub(crate) async fn backfill(&self, post: &PostRecord) {
        if !self.cache.is_available() {
            return;
        }

        let payload = match serde_json::to_vec(post) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(post_id = post.id, error = %err, "failed to serialize cache snapshot");
                return;
            }
        };

        let key = self.cache_key(post.id);
        let write = self.cache.set(&key, &payload, self.settings.cache_ttl);
        match tokio::time::timeout(self.cache_deadline(), write).await {
            Ok(Ok(())) => debug!(post_id = post.id, "cache backfilled"),
            Ok(Err(err)) => {
                counter!("postsync_cache_error_total", "op" => "set").increment(1);
                warn!(post_id = post.id, error = %err, "cache backfill failed");
            }
            Err(_) => {
                counter!("postsync_cache_error_total", "op" => "set").increment(1);
                warn!(post_id = post.id, "cache backfill timed out");
            }
        }
    }

    /// Deletion of the snapshot of `id`, detached from `self`.
    ///
    /// Attempted even while the cache is marked unavailable: a surviving entry
    /// would be served once the cache recovers.
    pub(crate) fn invalidation(&self, id: i64) -> Invalidation {
        Invalidation {
            cache: Arc::clone(&self.cache),
            key: self.cache_key(id),
            post_id: id,
            deadline: self.cache_deadline(),
            ttl: self.settings.cache_ttl,
        }
    }
}

/// Owned cache delete that can run on a spawned task.
pub(crate) struct Invalidation {
    cache: Arc<dyn PostCache>,
    key: String,
    post_id: i64,
    deadline: Duration,
    ttl: Duration,
}

impl Invalidation {
    pub(crate) async fn run(self) {
        let post_id = self.post_id;
        match tokio::time::timeout(self.deadline, self.cache.delete(&self.key)).await {
            Ok(Ok(())) => debug!(post_id, "cache entry invalidated"),
            Ok(Err(err)) => {
                counter!("postsync_cache_error_total", "op" => "delete").increment(1);
                warn!(
                    post_id,
                    error = %err,
                    ttl_secs = self.ttl.as_secs(),
                    "cache invalidation failed; a stale entry may live until its ttl"
                );
            }
            Err(_) => {
                counter!("postsync_cache_error_total", "op" => "delete").increment(1);
                warn!(
                    post_id,
                    ttl_secs = self.ttl.as_secs(),
                    "cache invalidation timed out; a stale entry may live until its ttl"
                );
            }
        }
    }
}
