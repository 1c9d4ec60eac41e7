use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TriageError;

/// Shortest ticket text accepted at the boundary, in characters.
pub const MIN_TICKET_CHARS: usize = 10;

/// Longest ticket text accepted at the boundary, in characters.
pub const MAX_TICKET_CHARS: usize = 2000;

/// Category reported when no neighbor could be found.
pub const UNCLASSIFIED: &str = "Unclassified";

// =============================================================================
// Enums
// =============================================================================

/// Ticket urgency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(TriageError::Validation(format!(
                "Unknown priority '{}'. Must be one of: Low, Medium, High, Critical",
                other
            ))),
        }
    }
}

// =============================================================================
// Tickets
// =============================================================================

/// A labeled support ticket from the indexing corpus.
///
/// Corpus files in the wild carry both numeric and string ids, so `id`
/// accepts either and is kept as a string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub text: String,
    pub category: String,
    pub priority: Priority,
}

impl Ticket {
    /// Id under which this ticket's vector and metadata are stored.
    pub fn vector_id(&self) -> String {
        format!("ticket_{}", self.id)
    }

    pub fn metadata(&self) -> TicketMetadata {
        TicketMetadata {
            category: self.category.clone(),
            priority: self.priority,
            text: self.text.clone(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

/// Labels carried alongside an indexed vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketMetadata {
    pub category: String,
    pub priority: Priority,
    pub text: String,
}

/// Check that ticket text fits the accepted length window.
///
/// Length is counted in characters, not bytes.
pub fn validate_ticket_text(text: &str) -> Result<(), TriageError> {
    let len = text.chars().count();
    if len < MIN_TICKET_CHARS || len > MAX_TICKET_CHARS {
        return Err(TriageError::Validation(format!(
            "Ticket text must be between {} and {} characters (got {})",
            MIN_TICKET_CHARS, MAX_TICKET_CHARS, len
        )));
    }
    Ok(())
}

// =============================================================================
// Search and classification results
// =============================================================================

/// One neighbor returned by a vector search, joined with its labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeighborResult {
    pub id: String,
    /// Similarity in [0, 1], higher is closer.
    pub score: f64,
    pub metadata: TicketMetadata,
}

/// A neighbor as reported back to API callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarTicket {
    pub id: String,
    pub text: String,
    pub category: String,
    pub priority: Priority,
    pub similarity: f64,
}

/// Outcome of classifying a single ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub priority: Priority,
    pub confidence: f64,
    pub routing_team: String,
    pub similar_tickets: Vec<SimilarTicket>,
}
