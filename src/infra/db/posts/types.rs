use time::OffsetDateTime;

use crate::domain::entities::{ActivityLogRecord, PostRecord};

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) id: i64,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) tags: Vec<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
    pub(crate) revision: i64,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            content: row.content,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
            revision: row.revision,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ActivityLogRow {
    pub(crate) id: i64,
    pub(crate) post_id: i64,
    pub(crate) action: String,
    pub(crate) logged_at: OffsetDateTime,
}

impl From<ActivityLogRow> for ActivityLogRecord {
    fn from(row: ActivityLogRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            action: row.action,
            logged_at: row.logged_at,
        }
    }
}
