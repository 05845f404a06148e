//! In-memory adapter doubles with fault injection and access counters.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use postsync::application::coordinator::CoordinatorSettings;
use postsync::application::reindex::ReindexSettings;
use postsync::application::repos::{
    CacheError, PostCache, PostFieldChanges, PostStore, PostStoreTx, SearchError, SearchIndex,
    SearchPage, StoreError, UpsertOutcome,
};
use postsync::domain::entities::{ActivityLogRecord, PostRecord, SearchDocument};
use postsync::domain::posts::NewPost;
use time::OffsetDateTime;
use tokio::sync::Mutex;

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        cache_timeout: Duration::from_millis(200),
        store_timeout: Duration::from_secs(2),
        search_timeout: Duration::from_millis(200),
        reindex: ReindexSettings {
            timeout: Duration::from_millis(100),
            workers: std::num::NonZeroUsize::new(2).expect("non-zero"),
            queue_capacity: std::num::NonZeroUsize::new(64).expect("non-zero"),
        },
        ..CoordinatorSettings::default()
    }
}

pub fn new_post(title: &str, tags: &[&str]) -> NewPost {
    NewPost::new(
        title,
        format!("{title} body"),
        tags.iter().map(|tag| tag.to_string()),
    )
    .expect("valid post")
}

#[derive(Default)]
struct StoreState {
    posts: BTreeMap<i64, PostRecord>,
    activities: Vec<ActivityLogRecord>,
    next_post_id: i64,
    next_activity_id: i64,
}

/// Transactional primary store kept in memory.
#[derive(Default)]
pub struct MemoryPostStore {
    state: Arc<Mutex<StoreState>>,
    /// Fail the activity insert of the next transaction, after the post insert succeeded.
    pub fail_next_activity: Arc<AtomicBool>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub point_reads: AtomicUsize,
    /// Delay, in milliseconds, between an update committing and the call returning.
    pub update_delay_ms: AtomicU64,
}

impl MemoryPostStore {
    pub async fn post_count(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    pub async fn activities(&self) -> Vec<ActivityLogRecord> {
        self.state.lock().await.activities.clone()
    }

    pub async fn post(&self, id: i64) -> Option<PostRecord> {
        self.state.lock().await.posts.get(&id).cloned()
    }

    pub fn point_reads(&self) -> usize {
        self.point_reads.load(Ordering::SeqCst)
    }
}

struct MemoryTx {
    state: Arc<Mutex<StoreState>>,
    fail_activity: Arc<AtomicBool>,
    posts: Vec<PostRecord>,
    activities: Vec<ActivityLogRecord>,
}

#[async_trait]
impl PostStoreTx for MemoryTx {
    async fn insert_post(&mut self, post: &NewPost) -> Result<PostRecord, StoreError> {
        let id = {
            let mut state = self.state.lock().await;
            state.next_post_id += 1;
            state.next_post_id
        };
        let now = OffsetDateTime::now_utc();
        let record = PostRecord {
            id,
            title: post.title().to_string(),
            content: post.content().to_string(),
            tags: post.tags().to_vec(),
            created_at: now,
            updated_at: now,
            revision: 1,
        };
        self.posts.push(record.clone());
        Ok(record)
    }

    async fn insert_activity(
        &mut self,
        post_id: i64,
        action: &str,
    ) -> Result<ActivityLogRecord, StoreError> {
        if self.fail_activity.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        if !self.posts.iter().any(|post| post.id == post_id) {
            return Err(StoreError::InvalidInput {
                message: format!("post {post_id} does not exist"),
            });
        }
        let id = {
            let mut state = self.state.lock().await;
            state.next_activity_id += 1;
            state.next_activity_id
        };
        let record = ActivityLogRecord {
            id,
            post_id,
            action: action.to_string(),
            logged_at: OffsetDateTime::now_utc(),
        };
        self.activities.push(record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            state,
            posts,
            activities,
            ..
        } = *self;
        let mut state = state.lock().await;
        for post in posts {
            state.posts.insert(post.id, post);
        }
        state.activities.extend(activities);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn begin(&self) -> Result<Box<dyn PostStoreTx>, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store down".to_string()));
        }
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            fail_activity: Arc::clone(&self.fail_next_activity),
            posts: Vec::new(),
            activities: Vec::new(),
        }))
    }

    async fn update_fields(
        &self,
        id: i64,
        changes: &PostFieldChanges,
    ) -> Result<Option<PostRecord>, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store down".to_string()));
        }
        let mut state = self.state.lock().await;
        let Some(post) = state.posts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = changes.title.as_ref() {
            post.title = title.clone();
        }
        if let Some(content) = changes.content.as_ref() {
            post.content = content.clone();
        }
        if let Some(tags) = changes.tags.as_ref() {
            post.tags = tags.clone();
        }
        post.revision += 1;
        post.updated_at = OffsetDateTime::now_utc();
        let record = post.clone();
        drop(state);

        let delay = self.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(Some(record))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<PostRecord>, StoreError> {
        self.point_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store down".to_string()));
        }
        Ok(self.state.lock().await.posts.get(&id).cloned())
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Vec<PostRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store down".to_string()));
        }
        let state = self.state.lock().await;
        Ok(state
            .posts
            .values()
            .rev()
            .filter(|post| post.has_tag(tag))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store down".to_string()));
        }
        Ok(())
    }
}

/// Key/value cache with counters; `fail_all` turns every call into an error
/// and `hang` makes every call wait forever.
pub struct MemoryCache {
    entries: StdMutex<HashMap<String, (Vec<u8>, Duration)>>,
    pub fail_all: AtomicBool,
    pub hang: AtomicBool,
    pub available: AtomicBool,
    pub gets: AtomicUsize,
    pub hits: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            available: AtomicBool::new(true),
            gets: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }
}

impl MemoryCache {
    pub fn failing() -> Self {
        let cache = Self::default();
        cache.fail_all.store(true, Ordering::SeqCst);
        cache
    }

    pub fn hanging() -> Self {
        let cache = Self::default();
        cache.hang.store(true, Ordering::SeqCst);
        cache
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().expect("cache lock").contains_key(key)
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries
            .lock()
            .expect("cache lock")
            .get(key)
            .map(|(_, ttl)| *ttl)
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), (value.to_vec(), Duration::from_secs(60)));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn check(&self) -> Result<(), CacheError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PostCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        let value = self
            .entries
            .lock()
            .expect("cache lock")
            .get(key)
            .map(|(value, _)| value.clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), (value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.entries.lock().expect("cache lock").remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Healthy,
    Failing,
    Hanging,
}

/// Search index that keeps the highest revision per post.
pub struct MemorySearchIndex {
    docs: StdMutex<HashMap<i64, SearchDocument>>,
    mode: StdMutex<IndexMode>,
    pub upserts: AtomicUsize,
}

impl MemorySearchIndex {
    pub fn new(mode: IndexMode) -> Self {
        Self {
            docs: StdMutex::new(HashMap::new()),
            mode: StdMutex::new(mode),
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: IndexMode) {
        *self.mode.lock().expect("mode lock") = mode;
    }

    pub fn document(&self, id: i64) -> Option<SearchDocument> {
        self.docs.lock().expect("index lock").get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().expect("index lock").len()
    }

    fn mode(&self) -> IndexMode {
        *self.mode.lock().expect("mode lock")
    }
}

impl Default for MemorySearchIndex {
    fn default() -> Self {
        Self::new(IndexMode::Healthy)
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn ensure_schema(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn upsert(&self, doc: &SearchDocument) -> Result<UpsertOutcome, SearchError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            IndexMode::Healthy => {}
            IndexMode::Failing => {
                return Err(SearchError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            IndexMode::Hanging => std::future::pending::<()>().await,
        }

        let mut docs = self.docs.lock().expect("index lock");
        let superseded = docs
            .get(&doc.id)
            .is_some_and(|existing| existing.revision >= doc.revision);
        if superseded {
            return Ok(UpsertOutcome::Superseded);
        }
        docs.insert(doc.id, doc.clone());
        Ok(UpsertOutcome::Applied)
    }

    async fn query(&self, text: &str) -> Result<SearchPage, SearchError> {
        match self.mode() {
            IndexMode::Healthy => {}
            IndexMode::Failing => return Err(SearchError::Unavailable("down".to_string())),
            IndexMode::Hanging => std::future::pending::<()>().await,
        }

        let needle = text.to_lowercase();
        let docs = self.docs.lock().expect("index lock");
        let mut documents: Vec<SearchDocument> = docs
            .values()
            .filter(|doc| {
                doc.title.to_lowercase().contains(&needle)
                    || doc.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        documents.sort_by_key(|doc| doc.id);
        let total = documents.len() as u64;
        Ok(SearchPage { documents, total })
    }

    fn is_available(&self) -> bool {
        true
    }
}
