//! Multi-store consistency coordinator for posts.
//!
//! The primary store is the source of truth. The cache is read-through and
//! invalidated synchronously on writes; the search index is refreshed by
//! detached reindex jobs and never blocks or fails a write.

use metrics::{Unit, describe_counter};

mod cache;
mod commands;
mod queries;
mod service;
pub mod types;

pub use service::PostCoordinator;
pub use types::{
    CoordinatorError, CoordinatorSettings, HealthReport, UpdatePostCommand, post_cache_key,
};

/// Register descriptions for the cache and search metrics emitted here.
pub fn describe_metrics() {
    describe_counter!(
        "postsync_cache_hit_total",
        Unit::Count,
        "Post lookups answered from the cache."
    );
    describe_counter!(
        "postsync_cache_miss_total",
        Unit::Count,
        "Post lookups that fell through to the primary store, by reason."
    );
    describe_counter!(
        "postsync_cache_error_total",
        Unit::Count,
        "Failed or timed out cache calls, by operation."
    );
    describe_counter!(
        "postsync_search_unavailable_total",
        Unit::Count,
        "Text searches refused because the index was unavailable."
    );
}
