//! Route handler functions for all API endpoints.
//!
//! Handlers validate what the classifier won't (text length) and hand
//! everything else to [`ClassificationService`](triage_vector::ClassificationService).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use triage_core::types::{validate_ticket_text, ClassificationResult};

use crate::error::ApiError;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Request / response types
// =============================================================================

/// Request body for POST /classify.
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    /// Ticket text, 10 to 2000 characters.
    pub text: String,
    /// Neighbors to vote over, at most `classifier.max_top_k`; the configured
    /// default when absent.
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub health: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub classifier: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET / - service banner.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Support Ticket Classifier API".to_string(),
        version: VERSION.to_string(),
        health: "/health".to_string(),
    })
}

/// GET /health - liveness plus uptime.
///
/// The server only starts once the classifier has loaded, so a response
/// here always means it is ready.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        classifier: "ready".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /classify - predict category, priority, and routing for a ticket.
pub async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> Result<Json<ClassificationResult>, ApiError> {
    validate_ticket_text(&body.text)?;

    let top_k = body.top_k.unwrap_or_else(|| state.classifier.top_k());
    let result = state.classifier.classify_with_k(&body.text, top_k).await?;

    tracing::info!(
        category = %result.category,
        confidence = result.confidence,
        team = %result.routing_team,
        "Classified ticket"
    );
    Ok(Json(result))
}

/// GET /categories - routed categories in registration order.
pub async fn categories(State(state): State<AppState>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        categories: state.classifier.get_categories(),
    })
}

/// GET /stats - remote index statistics, or `{"error": ...}`.
pub async fn stats(State(state): State<AppState>) -> Json<Map<String, Value>> {
    Json(state.classifier.stats().await)
}
