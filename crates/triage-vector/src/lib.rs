//! Triage Vector crate - embeddings, the Endee index client, neighbor voting,
//! and the classification service that ties them together.
//!
//! A ticket is embedded, its nearest labeled neighbors are fetched from the
//! external index, their labels are joined from the local store, and the
//! neighbors vote on category and priority. The winning category is then
//! mapped to a support team.

pub mod aggregate;
pub mod classifier;
pub mod embedding;
pub mod endee;
pub mod routing;
pub mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod fake_endee;

pub use aggregate::{aggregate, NeighborVote};
pub use classifier::ClassificationService;
pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use endee::{CreateOutcome, IndexError, VectorIndexClient};
pub use routing::RoutingTable;
pub use wire::{IndexHit, IndexedItem, Metric};
