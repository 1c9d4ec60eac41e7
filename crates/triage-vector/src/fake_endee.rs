//! In-process stand-in for the Endee index service.
//!
//! Speaks the same v1 routes as the real service over a loopback socket so
//! the HTTP client can be exercised end to end: brute-force cosine search,
//! all-or-nothing batch inserts, optional MessagePack responses, and hooks
//! for scripting failures. Available to other crates' tests through the
//! `test-util` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};

/// One request as the fake received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Debug)]
struct FakeIndex {
    dim: usize,
    space_type: String,
    items: Vec<(String, Vec<f32>)>,
}

#[derive(Debug)]
enum ScriptedSearch {
    Json(Value),
    Raw(String),
}

#[derive(Debug, Default)]
struct FakeState {
    indexes: HashMap<String, FakeIndex>,
    requests: Vec<RecordedRequest>,
    msgpack: bool,
    conflict_status: Option<StatusCode>,
    fail_next: Option<(StatusCode, String)>,
    scripted_search: Option<ScriptedSearch>,
}

type Shared = Arc<Mutex<FakeState>>;

/// Handle to a running fake index service.
#[derive(Clone)]
pub struct FakeEndee {
    pub base_url: String,
    state: Shared,
}

impl FakeEndee {
    /// Bind an ephemeral loopback port and start serving.
    pub async fn spawn() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake endee listener");
        let addr = listener.local_addr().expect("fake endee local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake endee state poisoned")
    }

    /// Encode search responses as MessagePack instead of JSON.
    pub fn set_msgpack(&self, enabled: bool) {
        self.lock().msgpack = enabled;
    }

    /// Status returned when creating an index that already exists (409 by default).
    pub fn set_conflict_status(&self, status: StatusCode) {
        self.lock().conflict_status = Some(status);
    }

    /// Answer the next request, whatever it is, with this status and body.
    pub fn fail_next(&self, status: StatusCode, body: &str) {
        self.lock().fail_next = Some((status, body.to_string()));
    }

    /// Answer every search with this payload regardless of index contents.
    pub fn script_search(&self, payload: Value) {
        self.lock().scripted_search = Some(ScriptedSearch::Json(payload));
    }

    /// Answer every search with this raw body and a 200 status.
    pub fn script_raw_search(&self, body: &str) {
        self.lock().scripted_search = Some(ScriptedSearch::Raw(body.to_string()));
    }

    /// Create an index and load vectors directly, bypassing HTTP.
    pub fn seed(&self, name: &str, dim: usize, items: Vec<(String, Vec<f32>)>) {
        self.lock().indexes.insert(
            name.to_string(),
            FakeIndex {
                dim,
                space_type: "cosine".to_string(),
                items,
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.lock().requests.last().cloned()
    }

    /// Number of vectors stored in an index (0 if it doesn't exist).
    pub fn len(&self, name: &str) -> usize {
        self.lock()
            .indexes
            .get(name)
            .map(|idx| idx.items.len())
            .unwrap_or(0)
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();

    let mut st = state.lock().expect("fake endee state poisoned");
    st.requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.clone(),
    });

    if let Some((status, text)) = st.fail_next.take() {
        return (status, text).into_response();
    }

    if method == Method::POST && path == "/api/v1/index/create" {
        return create(&mut st, &body);
    }

    let Some(rest) = path.strip_prefix("/api/v1/index/") else {
        return (StatusCode::NOT_FOUND, "no such route").into_response();
    };
    let segments: Vec<&str> = rest.split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("POST", [name, "vector", "insert"]) => insert(&mut st, name, &body),
        ("POST", [name, "search"]) => search(&st, name, &body),
        ("GET", [name, "stats"]) => match st.indexes.get(*name) {
            Some(idx) => axum::Json(json!({
                "dimension": idx.dim,
                "space_type": idx.space_type,
                "total_elements": idx.items.len(),
            }))
            .into_response(),
            None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
        },
        ("DELETE", [name]) => match st.indexes.remove(*name) {
            Some(_) => (StatusCode::OK, "Index deleted").into_response(),
            None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
        },
        _ => (StatusCode::NOT_FOUND, "no such route").into_response(),
    }
}

fn create(st: &mut FakeState, body: &Value) -> Response {
    let Some(name) = body["index_name"].as_str() else {
        return (StatusCode::BAD_REQUEST, "index_name required").into_response();
    };
    if st.indexes.contains_key(name) {
        let status = st.conflict_status.unwrap_or(StatusCode::CONFLICT);
        return (status, "Index already exists").into_response();
    }
    st.indexes.insert(
        name.to_string(),
        FakeIndex {
            dim: body["dim"].as_u64().unwrap_or(0) as usize,
            space_type: body["space_type"].as_str().unwrap_or("cosine").to_string(),
            items: Vec::new(),
        },
    );
    (StatusCode::OK, "Index created").into_response()
}

fn insert(st: &mut FakeState, name: &str, body: &Value) -> Response {
    let Some(idx) = st.indexes.get_mut(name) else {
        return (StatusCode::NOT_FOUND, "Index not found").into_response();
    };
    let Some(items) = body.as_array() else {
        return (StatusCode::BAD_REQUEST, "Expected an array of vectors").into_response();
    };

    let mut parsed = Vec::with_capacity(items.len());
    for item in items {
        let id = item["id"].as_str().unwrap_or_default().to_string();
        let vector = to_f32_vec(&item["vector"]);
        if vector.len() != idx.dim {
            return (
                StatusCode::BAD_REQUEST,
                format!("Dimension mismatch for {}: expected {}", id, idx.dim),
            )
                .into_response();
        }
        parsed.push((id, vector));
    }
    idx.items.extend(parsed);
    (StatusCode::OK, "Inserted").into_response()
}

fn search(st: &FakeState, name: &str, body: &Value) -> Response {
    let payload = match &st.scripted_search {
        Some(ScriptedSearch::Raw(text)) => return (StatusCode::OK, text.clone()).into_response(),
        Some(ScriptedSearch::Json(value)) => value.clone(),
        None => {
            let Some(idx) = st.indexes.get(name) else {
                return (StatusCode::NOT_FOUND, "Index not found").into_response();
            };
            let query = to_f32_vec(&body["vector"]);
            if query.len() != idx.dim {
                return (StatusCode::BAD_REQUEST, "Dimension mismatch").into_response();
            }
            let k = body["k"].as_u64().unwrap_or(10) as usize;

            let mut scored: Vec<(&str, f64)> = idx
                .items
                .iter()
                .map(|(id, v)| (id.as_str(), cosine_distance(&query, v)))
                .collect();
            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            json!({
                "results": scored
                    .into_iter()
                    .map(|(id, distance)| json!({"id": id, "distance": distance}))
                    .collect::<Vec<_>>()
            })
        }
    };

    if st.msgpack {
        match rmp_serde::to_vec_named(&payload) {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/msgpack")],
                bytes,
            )
                .into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        }
    } else {
        axum::Json(payload).into_response()
    }
}

fn to_f32_vec(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|xs| xs.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
        .unwrap_or_default()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}
