use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::application::repos::{PostFieldChanges, PostStoreTx, StoreError};
use crate::domain::entities::{ActivityLogRecord, PostRecord};
use crate::domain::posts::NewPost;
use crate::infra::db::map_sqlx_error;

use super::types::{ActivityLogRow, PostRow};
use super::{POST_COLUMNS, PostgresRepositories};

/// Open primary-store transaction handed to the coordinator.
///
/// Dropping it without committing rolls the transaction back.
pub struct PgPostStoreTx {
    tx: Transaction<'static, Postgres>,
}

impl PgPostStoreTx {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PostStoreTx for PgPostStoreTx {
    async fn insert_post(&mut self, post: &NewPost) -> Result<PostRecord, StoreError> {
        let sql = format!(
            "INSERT INTO posts (title, content, tags) VALUES ($1, $2, $3) RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post.title())
            .bind(post.content())
            .bind(post.tags())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    async fn insert_activity(
        &mut self,
        post_id: i64,
        action: &str,
    ) -> Result<ActivityLogRecord, StoreError> {
        let row = sqlx::query_as::<_, ActivityLogRow>(
            "INSERT INTO activity_logs (post_id, action) VALUES ($1, $2) \
             RETURNING id, post_id, action, logged_at",
        )
        .bind(post_id)
        .bind(action)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ActivityLogRecord::from(row))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

impl PostgresRepositories {
    pub(crate) async fn update_post_fields(
        &self,
        id: i64,
        changes: &PostFieldChanges,
    ) -> Result<Option<PostRecord>, StoreError> {
        let sql = format!(
            "UPDATE posts SET \
                 title = COALESCE($2, title), \
                 content = COALESCE($3, content), \
                 tags = COALESCE($4, tags), \
                 revision = revision + 1, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .bind(changes.title.as_deref())
            .bind(changes.content.as_deref())
            .bind(changes.tags.as_deref())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}
