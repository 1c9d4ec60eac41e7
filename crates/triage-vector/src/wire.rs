//! Endee v1 wire format: request payloads, response decoding, and the
//! distance → similarity mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use triage_core::error::TriageError;

/// Distance metric requested for a new index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl Metric {
    /// Wire-level `space_type` understood by the index service.
    pub fn space_type(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "l2",
            Metric::Dot => "ip",
        }
    }

    /// Parse a metric name, falling back to cosine for anything unknown.
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        })
    }
}

impl FromStr for Metric {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            "dot" => Ok(Metric::Dot),
            other => Err(TriageError::Config(format!(
                "Unknown metric '{}'. Must be one of: cosine, euclidean, dot",
                other
            ))),
        }
    }
}

/// Body of `POST /api/v1/index/create`.
#[derive(Debug, Serialize)]
pub struct CreateIndexRequest<'a> {
    pub index_name: &'a str,
    pub dim: usize,
    pub space_type: &'static str,
}

/// One element of the top-level array sent to `.../vector/insert`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem {
    pub id: String,
    pub vector: Vec<f32>,
}

/// Body of `POST /api/v1/index/{name}/search`.
#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub vector: &'a [f32],
    pub k: usize,
    pub include_vectors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<&'a Value>,
}

/// Decoded search response. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<RawHit>,
}

/// A single hit as the index reports it.
#[derive(Debug, Deserialize)]
pub struct RawHit {
    #[serde(default = "unknown_id", deserialize_with = "id_string")]
    pub id: String,
    #[serde(default = "max_distance")]
    pub distance: f64,
}

fn unknown_id() -> String {
    "unknown".to_string()
}

fn max_distance() -> f64 {
    1.0
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::Uint(n) => n.to_string(),
    })
}

/// A search hit after score normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexHit {
    pub id: String,
    /// Similarity in [0, 1] for cosine indexes.
    pub score: f64,
}

impl From<RawHit> for IndexHit {
    fn from(raw: RawHit) -> Self {
        Self {
            score: distance_to_score(raw.distance),
            id: raw.id,
        }
    }
}

/// Convert a reported distance into a similarity score.
///
/// `1 - distance` below 1.0, otherwise 0.0. Exact for cosine distance in
/// [0, 1]; only an approximation for l2 and ip indexes.
pub fn distance_to_score(distance: f64) -> f64 {
    if distance < 1.0 {
        1.0 - distance
    } else {
        0.0
    }
}

/// Which encoding a search response body turned out to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFormat {
    MessagePack,
    Json,
}

/// Decode a search response body.
///
/// MessagePack is tried first and JSON second; the error carries both
/// failure reasons when neither parses.
pub fn decode_search_response(body: &[u8]) -> Result<(SearchResponse, BodyFormat), String> {
    let msgpack_err = match rmp_serde::from_slice::<SearchResponse>(body) {
        Ok(resp) => return Ok((resp, BodyFormat::MessagePack)),
        Err(e) => e,
    };
    serde_json::from_slice::<SearchResponse>(body)
        .map(|resp| (resp, BodyFormat::Json))
        .map_err(|json_err| format!("msgpack: {}; json: {}", msgpack_err, json_err))
}
