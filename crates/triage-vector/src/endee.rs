//! HTTP client for the Endee vector index service.
//!
//! Every operation comes in two flavours. The `try_*` methods return a typed
//! [`IndexError`] so callers can tell a refused connection from a bad status
//! or an undecodable body. The plain methods absorb those errors, log them,
//! and return `false` / an empty list / an `{"error": ...}` map, so a flaky
//! index never takes the classification path down with it.
//!
//! No request is ever retried.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use triage_core::config::EndeeConfig;
use triage_core::error::TriageError;

use crate::wire::{
    decode_search_response, CreateIndexRequest, IndexHit, IndexedItem, Metric, SearchRequest,
};

/// Body fragment some Endee builds return instead of a 409.
const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Longest response body excerpt kept in errors and logs.
const BODY_EXCERPT_CHARS: usize = 200;

/// Per-call failure talking to the index service.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index unreachable: {0}")]
    Transport(String),

    #[error("index request timed out: {0}")]
    Timeout(String),

    #[error("index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode index response: {0}")]
    Decode(String),

    #[error("invalid index request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IndexError::Timeout(err.to_string())
        } else if err.is_decode() {
            IndexError::Decode(err.to_string())
        } else {
            IndexError::Transport(err.to_string())
        }
    }
}

/// Result of a create call that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Typed client for the Endee v1 HTTP API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct VectorIndexClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    metadata_timeout: Duration,
    insert_timeout: Duration,
}

impl VectorIndexClient {
    /// Build a client from the `[endee]` configuration section.
    pub fn new(config: &EndeeConfig) -> Result<Self, TriageError> {
        let metadata_timeout = Duration::from_secs(config.metadata_timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(metadata_timeout)
            .build()
            .map_err(|e| TriageError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(host = %config.host, "Endee HTTP client initialized");

        Ok(Self {
            http,
            base_url: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            metadata_timeout,
            insert_timeout: Duration::from_secs(config.insert_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(timeout);
        match &self.api_key {
            Some(key) => builder.header(AUTHORIZATION, key),
            None => builder,
        }
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    /// Create an index. An index that already exists counts as success.
    ///
    /// HTTP 409 is the primary "already exists" signal; the textual marker in
    /// an error body is honoured as a fallback for builds that don't use 409.
    pub async fn try_create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<CreateOutcome, IndexError> {
        let payload = CreateIndexRequest {
            index_name: name,
            dim: dimension,
            space_type: metric.space_type(),
        };

        let resp = self
            .request(Method::POST, "/api/v1/index/create", self.metadata_timeout)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        if status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let body = resp.text().await.unwrap_or_default();
        if body.to_lowercase().contains(ALREADY_EXISTS_MARKER) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(status_error(status, &body))
    }

    pub async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> bool {
        match self.try_create_index(name, dimension, metric).await {
            Ok(CreateOutcome::Created) => {
                info!(
                    index = %name,
                    dimension,
                    space_type = metric.space_type(),
                    "Created index"
                );
                true
            }
            Ok(CreateOutcome::AlreadyExists) => {
                info!(index = %name, "Index already exists");
                true
            }
            Err(e) => {
                warn!(index = %name, error = %e, "Failed to create index");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Insert
    // -------------------------------------------------------------------------

    /// Send the whole batch in one request.
    ///
    /// Success is judged solely on the HTTP status; there is no partial
    /// success. An empty batch is a no-op and sends nothing.
    pub async fn try_batch_insert(
        &self,
        name: &str,
        items: &[IndexedItem],
    ) -> Result<usize, IndexError> {
        if items.is_empty() {
            debug!(index = %name, "Skipping empty batch insert");
            return Ok(0);
        }

        let resp = self
            .request(
                Method::POST,
                &format!("/api/v1/index/{}/vector/insert", name),
                self.insert_timeout,
            )
            .json(items)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(items.len());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    pub async fn batch_insert(&self, name: &str, items: &[IndexedItem]) -> bool {
        match self.try_batch_insert(name, items).await {
            Ok(count) => {
                info!(index = %name, count, "Inserted vectors");
                true
            }
            Err(e) => {
                warn!(index = %name, count = items.len(), error = %e, "Batch insert failed");
                false
            }
        }
    }

    /// Insert a single vector as a one-element batch.
    pub async fn insert_vector(&self, name: &str, id: &str, vector: Vec<f32>) -> bool {
        let item = IndexedItem {
            id: id.to_string(),
            vector,
        };
        self.batch_insert(name, std::slice::from_ref(&item)).await
    }

    // -------------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------------

    /// Nearest-neighbor search.
    ///
    /// Hits keep the order the service returned them in; they are not
    /// re-sorted here.
    pub async fn try_search(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<IndexHit>, IndexError> {
        if top_k == 0 {
            return Err(IndexError::InvalidRequest("top_k must be at least 1".into()));
        }
        if query.is_empty() {
            return Err(IndexError::InvalidRequest("query vector is empty".into()));
        }

        let payload = SearchRequest {
            vector: query,
            k: top_k,
            include_vectors: false,
            filter,
        };

        let resp = self
            .request(
                Method::POST,
                &format!("/api/v1/index/{}/search", name),
                self.metadata_timeout,
            )
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = resp.bytes().await?;
        let (decoded, format) = decode_search_response(&body).map_err(IndexError::Decode)?;
        debug!(index = %name, ?format, hits = decoded.results.len(), "Search response decoded");

        Ok(decoded.results.into_iter().map(IndexHit::from).collect())
    }

    pub async fn search(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&Value>,
    ) -> Vec<IndexHit> {
        match self.try_search(name, query, top_k, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(index = %name, top_k, error = %e, "Search failed, returning no neighbors");
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stats / delete
    // -------------------------------------------------------------------------

    pub async fn try_get_stats(&self, name: &str) -> Result<Map<String, Value>, IndexError> {
        let resp = self
            .request(
                Method::GET,
                &format!("/api/v1/index/{}/stats", name),
                self.metadata_timeout,
            )
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        match resp.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            other => Err(IndexError::Decode(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Remote stats passthrough. Failures come back as `{"error": "..."}`
    /// instead of an `Err` so monitoring callers never have to handle one.
    pub async fn get_stats(&self, name: &str) -> Map<String, Value> {
        match self.try_get_stats(name).await {
            Ok(map) => map,
            Err(e) => {
                warn!(index = %name, error = %e, "Failed to fetch index stats");
                let message = match e {
                    IndexError::Status { status, .. } => format!("HTTP {}", status),
                    other => other.to_string(),
                };
                let mut map = Map::new();
                map.insert("error".to_string(), Value::String(message));
                map
            }
        }
    }

    pub async fn try_delete_index(&self, name: &str) -> Result<(), IndexError> {
        let resp = self
            .request(
                Method::DELETE,
                &format!("/api/v1/index/{}", name),
                self.metadata_timeout,
            )
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    pub async fn delete_index(&self, name: &str) -> bool {
        match self.try_delete_index(name).await {
            Ok(()) => {
                info!(index = %name, "Deleted index");
                true
            }
            Err(e) => {
                warn!(index = %name, error = %e, "Failed to delete index");
                false
            }
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> IndexError {
    IndexError::Status {
        status: status.as_u16(),
        body: body.chars().take(BODY_EXCERPT_CHARS).collect(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_endee::FakeEndee;
    use serde_json::json;

    fn client_for(base_url: &str, api_key: Option<&str>) -> VectorIndexClient {
        let config = EndeeConfig {
            host: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            ..EndeeConfig::default()
        };
        VectorIndexClient::new(&config).unwrap()
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_create_index_sends_translated_space_type() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);

        assert!(client.create_index("tickets", 4, Metric::Euclidean).await);

        let req = fake.last_request().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/index/create");
        assert_eq!(
            req.body,
            json!({"index_name": "tickets", "dim": 4, "space_type": "l2"})
        );
    }

    #[tokio::test]
    async fn test_create_index_twice_is_idempotent() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);

        assert_eq!(
            client.try_create_index("tickets", 4, Metric::Cosine).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            client.try_create_index("tickets", 4, Metric::Cosine).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert!(client.create_index("tickets", 4, Metric::Cosine).await);
    }

    #[tokio::test]
    async fn test_create_index_textual_already_exists_marker() {
        let fake = FakeEndee::spawn().await;
        fake.set_conflict_status(StatusCode::BAD_REQUEST);
        let client = client_for(&fake.base_url, None);

        assert!(client.create_index("tickets", 4, Metric::Cosine).await);
        assert_eq!(
            client.try_create_index("tickets", 4, Metric::Cosine).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_create_index_other_failure() {
        let fake = FakeEndee::spawn().await;
        fake.fail_next(StatusCode::INTERNAL_SERVER_ERROR, "disk full");
        let client = client_for(&fake.base_url, None);

        let err = client
            .try_create_index("tickets", 4, Metric::Cosine)
            .await
            .unwrap_err();
        match err {
            IndexError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "disk full");
            }
            other => panic!("Expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_absorbed() {
        // Nothing listens on port 9 (discard) in the test environment.
        let client = client_for("http://127.0.0.1:9", None);

        assert!(!client.create_index("tickets", 4, Metric::Cosine).await);
        assert!(
            !client
                .batch_insert("tickets", &[IndexedItem { id: "a".into(), vector: vec![1.0] }])
                .await
        );
        assert!(client.search("tickets", &[1.0], 3, None).await.is_empty());
        assert!(client.get_stats("tickets").await.contains_key("error"));
        assert!(!client.delete_index("tickets").await);

        let err = client.try_search("tickets", &[1.0], 3, None).await.unwrap_err();
        assert!(matches!(err, IndexError::Transport(_) | IndexError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_api_key_sent_verbatim_in_authorization_header() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, Some("secret-key"));
        client.create_index("tickets", 4, Metric::Cosine).await;
        assert_eq!(
            fake.last_request().unwrap().authorization.as_deref(),
            Some("secret-key")
        );

        let anonymous = client_for(&fake.base_url, None);
        anonymous.get_stats("tickets").await;
        assert!(fake.last_request().unwrap().authorization.is_none());
    }

    #[tokio::test]
    async fn test_batch_insert_sends_top_level_array() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;

        let items = vec![
            IndexedItem { id: "ticket_1".into(), vector: vec![1.0, 0.0] },
            IndexedItem { id: "ticket_2".into(), vector: vec![0.0, 1.0] },
        ];
        assert_eq!(client.try_batch_insert("tickets", &items).await.unwrap(), 2);

        let req = fake.last_request().unwrap();
        assert_eq!(req.path, "/api/v1/index/tickets/vector/insert");
        assert!(req.body.is_array());
        assert_eq!(req.body.as_array().unwrap().len(), 2);
        assert_eq!(req.body[1]["id"], "ticket_2");
        assert_eq!(fake.len("tickets"), 2);
    }

    #[tokio::test]
    async fn test_batch_insert_rejected_is_all_or_nothing() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;

        // Second vector has the wrong dimension; the fake rejects the batch.
        let items = vec![
            IndexedItem { id: "ok".into(), vector: vec![1.0, 0.0] },
            IndexedItem { id: "bad".into(), vector: vec![1.0, 0.0, 0.0] },
        ];
        assert!(!client.batch_insert("tickets", &items).await);
        assert_eq!(fake.len("tickets"), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        assert!(client.batch_insert("tickets", &[]).await);
        assert!(fake.last_request().is_none());
    }

    #[tokio::test]
    async fn test_insert_vector_wraps_single_item() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;

        assert!(client.insert_vector("tickets", "solo", vec![0.0, 1.0]).await);
        let req = fake.last_request().unwrap();
        assert_eq!(req.body, json!([{"id": "solo", "vector": [0.0, 1.0]}]));
    }

    #[tokio::test]
    async fn test_insert_then_search_finds_exact_match() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 8, Metric::Cosine).await;

        let items: Vec<IndexedItem> = (0..8)
            .map(|i| IndexedItem { id: format!("ticket_{}", i), vector: unit(8, i) })
            .collect();
        assert!(client.batch_insert("tickets", &items).await);

        let hits = client.try_search("tickets", &unit(8, 5), 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "ticket_5");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let req = fake.last_request().unwrap();
        assert_eq!(req.body["k"], 3);
        assert_eq!(req.body["include_vectors"], false);
        assert!(req.body.get("filter").is_none());
    }

    #[tokio::test]
    async fn test_search_decodes_msgpack_responses() {
        let fake = FakeEndee::spawn().await;
        fake.set_msgpack(true);
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;
        client
            .batch_insert("tickets", &[IndexedItem { id: "a".into(), vector: vec![1.0, 0.0] }])
            .await;

        let hits = client.try_search("tickets", &[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_preserves_service_order() {
        let fake = FakeEndee::spawn().await;
        fake.script_search(json!({"results": [
            {"id": "far", "distance": 0.9},
            {"id": "near", "distance": 0.1},
            {"id": "gone", "distance": 1.5}
        ]}));
        let client = client_for(&fake.base_url, None);

        let hits = client.search("tickets", &[1.0], 3, None).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["far", "near", "gone"]);
        assert!((hits[0].score - 0.1).abs() < 1e-12);
        assert_eq!(hits[2].score, 0.0);
    }

    #[tokio::test]
    async fn test_search_forwards_filter() {
        let fake = FakeEndee::spawn().await;
        fake.script_search(json!({"results": []}));
        let client = client_for(&fake.base_url, None);

        let filter = json!({"category": {"$eq": "Billing"}});
        client.search("tickets", &[1.0], 2, Some(&filter)).await;
        assert_eq!(fake.last_request().unwrap().body["filter"], filter);
    }

    #[tokio::test]
    async fn test_search_failures_return_empty() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);

        // Unknown index → 404.
        assert!(client.search("missing", &[1.0], 3, None).await.is_empty());

        fake.script_raw_search("definitely not a search payload");
        let err = client.try_search("missing", &[1.0], 3, None).await.unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
        assert!(client.search("missing", &[1.0], 3, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_bad_arguments_locally() {
        let client = client_for("http://127.0.0.1:9", None);
        let err = client.try_search("t", &[1.0], 0, None).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidRequest(_)));
        let err = client.try_search("t", &[], 3, None).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_get_stats_passthrough_and_error_map() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;
        client
            .batch_insert("tickets", &[IndexedItem { id: "a".into(), vector: vec![1.0, 0.0] }])
            .await;

        let stats = client.get_stats("tickets").await;
        assert_eq!(stats["total_elements"], 1);
        assert_eq!(stats["dimension"], 2);

        let missing = client.get_stats("nope").await;
        assert_eq!(missing["error"], "HTTP 404");
    }

    #[tokio::test]
    async fn test_delete_index() {
        let fake = FakeEndee::spawn().await;
        let client = client_for(&fake.base_url, None);
        client.create_index("tickets", 2, Metric::Cosine).await;

        assert!(client.delete_index("tickets").await);
        assert_eq!(fake.last_request().unwrap().method, "DELETE");
        assert!(!client.delete_index("tickets").await);
    }

    #[test]
    fn test_trailing_slash_trimmed_from_host() {
        let client = client_for("http://localhost:8080/", None);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
