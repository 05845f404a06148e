mod read;
mod types;
mod write;

pub use write::PgPostStoreTx;

use super::PostgresRepositories;

const POST_COLUMNS: &str = "id, title, content, tags, created_at, updated_at, revision";
