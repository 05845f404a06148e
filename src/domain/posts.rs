//! Post invariants enforced before anything reaches the coordinator.

use std::collections::HashSet;

use super::error::DomainError;

/// Action label recorded in the activity log when a post is created.
pub const ACTIVITY_NEW_POST: &str = "new_post";

/// A validated post that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    title: String,
    content: String,
    tags: Vec<String>,
}

impl NewPost {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Result<Self, DomainError> {
        let title = ensure_non_empty(title.into(), "title")?;
        let content = ensure_non_empty(content.into(), "content")?;
        Ok(Self {
            title,
            content,
            tags: normalize_tags(tags),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// Trim the value and reject it when nothing is left.
pub fn ensure_non_empty(value: String, field: &'static str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("`{field}` must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Tags form a set: blanks are dropped and duplicates collapse onto the first occurrence.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}
