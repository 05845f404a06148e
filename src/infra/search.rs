//! Elasticsearch-backed search index over its REST API, and its disabled stand-in.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::application::availability::AvailabilityTracker;
use crate::application::repos::{SearchError, SearchIndex, SearchPage, UpsertOutcome};
use crate::domain::entities::SearchDocument;

use super::error::InfraError;

pub struct ElasticsearchIndex {
    client: Client,
    base: Url,
    index: String,
    health: AvailabilityTracker,
}

impl ElasticsearchIndex {
    pub fn new(url: &str, index: &str, request_timeout: Duration) -> Result<Self, InfraError> {
        let base = parse_base_url(url)?;
        if index.is_empty() || index.contains('/') {
            return Err(InfraError::search(format!("invalid index name `{index}`")));
        }

        let client = Client::builder()
            .user_agent(concat!("postsync/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|err| InfraError::search(err.to_string()))?;

        Ok(Self {
            client,
            base,
            index: index.to_string(),
            health: AvailabilityTracker::new("search"),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SearchError> {
        self.base
            .join(path)
            .map_err(|err| SearchError::Unavailable(format!("invalid url: {err}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send and read the body, tracking availability on the way.
    async fn execute(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), SearchError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.health.record_failure();
                return Err(classify_reqwest_error(&err));
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(err) => {
                self.health.record_failure();
                return Err(classify_reqwest_error(&err));
            }
        };

        if status.is_server_error() {
            self.health.record_failure();
        } else {
            self.health.record_success();
        }
        Ok((status, body))
    }
}

fn parse_base_url(url: &str) -> Result<Url, InfraError> {
    let mut normalized = url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let base = Url::parse(&normalized)
        .map_err(|err| InfraError::search(format!("invalid search url `{url}`: {err}")))?;
    if base.cannot_be_a_base() {
        return Err(InfraError::search(format!("invalid search url `{url}`")));
    }
    Ok(base)
}

fn classify_reqwest_error(err: &reqwest::Error) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout
    } else if err.is_decode() {
        SearchError::Decode(err.to_string())
    } else {
        SearchError::Unavailable(err.to_string())
    }
}

fn rejected(status: StatusCode, body: &[u8]) -> SearchError {
    SearchError::Rejected {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

fn index_mapping() -> serde_json::Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "title": {
                    "type": "text",
                    "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                },
                "content": { "type": "text" },
                "tags": { "type": "keyword" },
                "revision": { "type": "long" }
            }
        }
    })
}

fn text_query(text: &str) -> serde_json::Value {
    json!({
        "query": {
            "multi_match": {
                "query": text,
                "fields": ["title", "content"]
            }
        },
        "track_total_hits": true
    })
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    #[serde(default)]
    total: Option<HitsTotal>,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Object { value: u64 },
    Count(u64),
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: SearchDocument,
}

/// Decode a `_search` response body into documents in relevance order.
pub(crate) fn parse_search_response(body: &[u8]) -> Result<SearchPage, SearchError> {
    let response: SearchResponse =
        serde_json::from_slice(body).map_err(|err| SearchError::Decode(err.to_string()))?;

    let documents: Vec<SearchDocument> = response
        .hits
        .hits
        .into_iter()
        .map(|hit| hit.source)
        .collect();
    let total = match response.hits.total {
        Some(HitsTotal::Object { value }) | Some(HitsTotal::Count(value)) => value,
        None => documents.len() as u64,
    };

    Ok(SearchPage { documents, total })
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn ensure_schema(&self) -> Result<(), SearchError> {
        let url = self.url(&self.index)?;
        let (status, body) = self.execute(self.request(Method::HEAD, url.clone())).await?;
        match status {
            status if status.is_success() => {
                debug!(index = %self.index, "search index already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            status => return Err(rejected(status, &body)),
        }

        let create = self.request(Method::PUT, url).json(&index_mapping());
        let (status, body) = self.execute(create).await?;
        if status.is_success() {
            info!(index = %self.index, "search index created");
            return Ok(());
        }
        if status == StatusCode::BAD_REQUEST
            && String::from_utf8_lossy(&body).contains("resource_already_exists_exception")
        {
            return Ok(());
        }
        Err(rejected(status, &body))
    }

    async fn upsert(&self, doc: &SearchDocument) -> Result<UpsertOutcome, SearchError> {
        let mut url = self.url(&format!("{}/_doc/{}", self.index, doc.id))?;
        url.query_pairs_mut()
            .append_pair("version", &doc.revision.max(1).to_string())
            .append_pair("version_type", "external");

        let (status, body) = self
            .execute(self.request(Method::PUT, url).json(doc))
            .await?;
        match status {
            status if status.is_success() => Ok(UpsertOutcome::Applied),
            StatusCode::CONFLICT => Ok(UpsertOutcome::Superseded),
            status => Err(rejected(status, &body)),
        }
    }

    async fn query(&self, text: &str) -> Result<SearchPage, SearchError> {
        let url = self.url(&format!("{}/_search", self.index))?;
        let (status, body) = self
            .execute(self.request(Method::POST, url).json(&text_query(text)))
            .await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        parse_search_response(&body)
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }
}

/// Index installed when search is disabled or unreachable at startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSearchIndex;

#[async_trait]
impl SearchIndex for DisabledSearchIndex {
    async fn ensure_schema(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn upsert(&self, _doc: &SearchDocument) -> Result<UpsertOutcome, SearchError> {
        Err(SearchError::Unavailable("search index disabled".to_string()))
    }

    async fn query(&self, _text: &str) -> Result<SearchPage, SearchError> {
        Err(SearchError::Unavailable("search index disabled".to_string()))
    }

    fn is_available(&self) -> bool {
        false
    }
}
