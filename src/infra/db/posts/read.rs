use async_trait::async_trait;

use crate::application::repos::{PostFieldChanges, PostStore, PostStoreTx, StoreError};
use crate::domain::entities::PostRecord;
use crate::infra::db::map_sqlx_error;

use super::types::PostRow;
use super::{POST_COLUMNS, PgPostStoreTx, PostgresRepositories};

#[async_trait]
impl PostStore for PostgresRepositories {
    async fn begin(&self) -> Result<Box<dyn PostStoreTx>, StoreError> {
        let tx = PostgresRepositories::begin(self)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Box::new(PgPostStoreTx::new(tx)))
    }

    async fn update_fields(
        &self,
        id: i64,
        changes: &PostFieldChanges,
    ) -> Result<Option<PostRecord>, StoreError> {
        self.update_post_fields(id, changes).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<PostRecord>, StoreError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Vec<PostRecord>, StoreError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE tags @> ARRAY[$1]::text[] ORDER BY id DESC"
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(tag)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        PostgresRepositories::health_check(self)
            .await
            .map_err(map_sqlx_error)
    }
}
