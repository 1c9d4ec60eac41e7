//! Majority vote over retrieved neighbors.
//!
//! Category and priority are tallied independently, unweighted by score.
//! Ties go to whichever value was seen first, so the outcome depends only on
//! the order the index returned its hits in.

use triage_core::types::{NeighborResult, Priority, SimilarTicket, UNCLASSIFIED};

/// How many neighbors are echoed back as similar tickets.
pub const SIMILAR_TICKETS_SHOWN: usize = 3;

/// Outcome of voting over a neighbor list, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborVote {
    pub category: String,
    pub priority: Priority,
    /// Mean neighbor similarity, rounded to 3 decimals.
    pub confidence: f64,
    pub similar_tickets: Vec<SimilarTicket>,
}

impl NeighborVote {
    /// The vote for an empty neighbor list.
    pub fn unclassified() -> Self {
        Self {
            category: UNCLASSIFIED.to_string(),
            priority: Priority::Medium,
            confidence: 0.0,
            similar_tickets: Vec::new(),
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.similar_tickets.is_empty() && self.category == UNCLASSIFIED
    }
}

/// Vote over `neighbors`, which must already be ordered by descending
/// similarity.
pub fn aggregate(neighbors: &[NeighborResult]) -> NeighborVote {
    if neighbors.is_empty() {
        return NeighborVote::unclassified();
    }

    let category = mode(neighbors.iter().map(|n| n.metadata.category.as_str()))
        .unwrap_or(UNCLASSIFIED)
        .to_string();
    let priority = mode(neighbors.iter().map(|n| n.metadata.priority)).unwrap_or_default();

    let mean = neighbors.iter().map(|n| n.score).sum::<f64>() / neighbors.len() as f64;

    let similar_tickets = neighbors
        .iter()
        .take(SIMILAR_TICKETS_SHOWN)
        .map(|n| SimilarTicket {
            id: n.id.clone(),
            text: n.metadata.text.clone(),
            category: n.metadata.category.clone(),
            priority: n.metadata.priority,
            similarity: round3(n.score),
        })
        .collect();

    NeighborVote {
        category,
        priority,
        confidence: round3(mean),
        similar_tickets,
    }
}

/// Most frequent value; the earliest one wins a tie.
///
/// A linear tally keeps first-seen order without hashing, and neighbor lists
/// are only ever `top_k` long.
fn mode<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut tally: Vec<(T, usize)> = Vec::new();
    for value in values {
        match tally.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => tally.push((value, 1)),
        }
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in tally {
        // An earlier value keeps a tie.
        let replace = match &best {
            Some((_, top)) => count > *top,
            None => true,
        };
        if replace {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Round to 3 decimal places, half away from zero.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
