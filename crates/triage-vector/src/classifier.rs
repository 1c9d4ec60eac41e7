//! Ticket classification service.
//!
//! Embeds ticket text, fetches its nearest labeled neighbors from the Endee
//! index, joins their labels from the local store, votes, and routes the
//! winning category to a team. Also owns the indexing path that fills the
//! index and the label store in the first place.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use triage_core::config::TriageConfig;
use triage_core::error::TriageError;
use triage_core::types::{validate_ticket_text, ClassificationResult, NeighborResult, Ticket};
use triage_storage::TicketRepository;

use crate::aggregate::{aggregate, NeighborVote};
use crate::embedding::{DynEmbeddingService, OnnxEmbeddingService};
use crate::endee::{CreateOutcome, VectorIndexClient};
use crate::routing::RoutingTable;
use crate::wire::{IndexedItem, Metric};

/// Summary of one indexing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexingReport {
    /// Tickets written to both the index and the label store.
    pub indexed: usize,
    /// Ids of tickets skipped for out-of-range text.
    pub rejected: Vec<String>,
    /// Per-category totals for the whole index after the run.
    pub category_counts: Vec<(String, u64)>,
}

/// Classifies tickets by nearest-neighbor vote.
///
/// Immutable after construction and safe to share across request handlers
/// behind an `Arc`.
pub struct ClassificationService {
    embedder: Arc<dyn DynEmbeddingService>,
    index: VectorIndexClient,
    labels: TicketRepository,
    routing: RoutingTable,
    index_name: String,
    dimension: usize,
    metric: Metric,
    top_k: usize,
    max_top_k: usize,
}

impl std::fmt::Debug for ClassificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationService")
            .field("index_name", &self.index_name)
            .field("dimension", &self.dimension)
            .field("metric", &self.metric)
            .field("top_k", &self.top_k)
            .field("max_top_k", &self.max_top_k)
            .field("routes", &self.routing.len())
            .finish()
    }
}

impl ClassificationService {
    /// Assemble a service from already-constructed parts.
    ///
    /// Fails if the embedder's output width doesn't match the configured
    /// index dimension, or if `top_k` is zero or above `max_top_k`.
    pub fn new(
        embedder: Arc<dyn DynEmbeddingService>,
        index: VectorIndexClient,
        labels: TicketRepository,
        config: &TriageConfig,
    ) -> Result<Self, TriageError> {
        if embedder.dimensions() != config.endee.dimension {
            return Err(TriageError::Config(format!(
                "Embedding model produces {}-dimensional vectors but index '{}' is configured for {}",
                embedder.dimensions(),
                config.endee.index_name,
                config.endee.dimension
            )));
        }
        if config.classifier.top_k == 0 {
            return Err(TriageError::Config("classifier.top_k must be at least 1".into()));
        }
        if config.classifier.top_k > config.classifier.max_top_k {
            return Err(TriageError::Config(format!(
                "classifier.top_k ({}) exceeds classifier.max_top_k ({})",
                config.classifier.top_k, config.classifier.max_top_k
            )));
        }

        Ok(Self {
            embedder,
            index,
            labels,
            routing: RoutingTable::from_config(&config.classifier),
            index_name: config.endee.index_name.clone(),
            dimension: config.endee.dimension,
            metric: Metric::parse_lenient(&config.endee.metric),
            top_k: config.classifier.top_k,
            max_top_k: config.classifier.max_top_k,
        })
    }

    /// Load the ONNX model named by the config and connect to the index.
    ///
    /// A missing or unloadable model is an error; there is no degraded mode.
    pub fn from_config(config: &TriageConfig, labels: TicketRepository) -> Result<Self, TriageError> {
        let embedder = OnnxEmbeddingService::from_directory(Path::new(&config.classifier.model_dir))?;
        let index = VectorIndexClient::new(&config.endee)?;
        let service = Self::new(Arc::new(embedder), index, labels, config)?;
        info!(
            index = %service.index_name,
            dimension = service.dimension,
            top_k = service.top_k,
            "Classification service ready"
        );
        Ok(service)
    }

    /// Classify with the configured `top_k`.
    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, TriageError> {
        self.classify_with_k(text, self.top_k).await
    }

    /// Classify `text` by voting over its `top_k` nearest labeled neighbors.
    ///
    /// Length limits are the caller's job; any non-blank text is accepted.
    /// An unreachable index or a search with no labeled hits yields the
    /// "Unclassified" result rather than an error.
    pub async fn classify_with_k(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<ClassificationResult, TriageError> {
        if text.trim().is_empty() {
            return Err(TriageError::Validation("Ticket text is empty".into()));
        }
        if top_k == 0 || top_k > self.max_top_k {
            return Err(TriageError::Validation(format!(
                "top_k must be between 1 and {}",
                self.max_top_k
            )));
        }

        let query = self.embedder.encode_boxed(text, true).await?;
        let hits = self.index.search(&self.index_name, &query, top_k, None).await;
        let neighbors = self.join_labels(hits.into_iter().map(|h| (h.id, h.score)).collect())?;

        let vote = aggregate(&neighbors);
        let routing_team = if vote.is_unclassified() {
            self.routing.default_team().to_string()
        } else {
            self.routing.resolve(&vote.category).to_string()
        };

        debug!(
            category = %vote.category,
            confidence = vote.confidence,
            neighbors = neighbors.len(),
            "Ticket classified"
        );

        let NeighborVote {
            category,
            priority,
            confidence,
            similar_tickets,
        } = vote;
        Ok(ClassificationResult {
            category,
            priority,
            confidence,
            routing_team,
            similar_tickets,
        })
    }

    /// Attach stored labels to search hits, keeping hit order.
    ///
    /// Hits with no stored labels are dropped so no vote is ever cast for a
    /// made-up category.
    fn join_labels(&self, hits: Vec<(String, f64)>) -> Result<Vec<NeighborResult>, TriageError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let mut labels = self.labels.find_many(&self.index_name, &ids)?;

        let mut neighbors = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            match labels.remove(&id) {
                Some(metadata) => neighbors.push(NeighborResult {
                    id,
                    score,
                    metadata,
                }),
                None => warn!(id = %id, index = %self.index_name, "Search hit has no stored labels, skipping"),
            }
        }
        Ok(neighbors)
    }

    /// Categories that have a routing entry, in registration order.
    pub fn get_categories(&self) -> Vec<String> {
        self.routing.categories()
    }

    /// Remote index statistics, or `{"error": ...}` if they can't be fetched.
    pub async fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        self.index.get_stats(&self.index_name).await
    }

    /// Create the configured index. Running it again is harmless.
    pub async fn setup_index(&self) -> Result<CreateOutcome, TriageError> {
        self.index
            .try_create_index(&self.index_name, self.dimension, self.metric)
            .await
            .map_err(|e| TriageError::Index(e.to_string()))
    }

    /// Drop the configured index along with its stored labels.
    pub async fn delete_index(&self) -> Result<u64, TriageError> {
        self.index
            .try_delete_index(&self.index_name)
            .await
            .map_err(|e| TriageError::Index(e.to_string()))?;
        let cleared = self.labels.clear_index(&self.index_name)?;
        info!(index = %self.index_name, labels = cleared, "Index and labels removed");
        Ok(cleared)
    }

    /// Embed and index a labeled corpus.
    ///
    /// Tickets with out-of-range text are skipped before embedding. Vectors
    /// go to the index in one batch; labels are stored only once the index
    /// has accepted it.
    pub async fn index_tickets(&self, tickets: &[Ticket]) -> Result<IndexingReport, TriageError> {
        let mut rejected = Vec::new();
        let mut items = Vec::with_capacity(tickets.len());
        let mut entries = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            if let Err(e) = validate_ticket_text(&ticket.text) {
                warn!(id = %ticket.id, error = %e, "Skipping ticket");
                rejected.push(ticket.id.clone());
                continue;
            }
            let vector = self.embedder.encode_boxed(&ticket.text, true).await?;
            let vector_id = ticket.vector_id();
            items.push(IndexedItem {
                id: vector_id.clone(),
                vector,
            });
            entries.push((vector_id, ticket.metadata()));
        }

        let indexed = self
            .index
            .try_batch_insert(&self.index_name, &items)
            .await
            .map_err(|e| TriageError::Index(e.to_string()))?;
        self.labels.upsert_many(&self.index_name, &entries)?;

        info!(
            index = %self.index_name,
            count = indexed,
            rejected = rejected.len(),
            "Tickets indexed"
        );

        Ok(IndexingReport {
            indexed,
            rejected,
            category_counts: self.labels.category_counts(&self.index_name)?,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::fake_endee::FakeEndee;
    use serde_json::json;
    use triage_core::types::{Priority, TicketMetadata};
    use triage_storage::Database;

    const DIM: usize = 16;

    fn config_for(base_url: &str) -> TriageConfig {
        let mut config = TriageConfig::default();
        config.endee.host = base_url.to_string();
        config.endee.dimension = DIM;
        config
    }

    fn service_for(fake: &FakeEndee) -> ClassificationService {
        let config = config_for(&fake.base_url);
        let labels = TicketRepository::new(Arc::new(Database::in_memory().unwrap()));
        ClassificationService::new(
            Arc::new(MockEmbedding::with_dimensions(DIM)),
            VectorIndexClient::new(&config.endee).unwrap(),
            labels,
            &config,
        )
        .unwrap()
    }

    fn ticket(id: u32, text: &str, category: &str, priority: Priority) -> Ticket {
        Ticket {
            id: id.to_string(),
            text: text.to_string(),
            category: category.to_string(),
            priority,
        }
    }

    fn label(category: &str, priority: Priority, text: &str) -> TicketMetadata {
        TicketMetadata {
            category: category.to_string(),
            priority,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_password_reset_routes_to_security() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        service
            .labels
            .upsert_many(
                "support_tickets",
                &[
                    ("ticket_1".into(), label("Authentication", Priority::High, "Cannot log in after reset")),
                    ("ticket_2".into(), label("Billing", Priority::Low, "Invoice shows wrong amount")),
                    ("ticket_3".into(), label("Authentication", Priority::High, "Password reset email missing")),
                    ("ticket_4".into(), label("Billing", Priority::Low, "Refund not received yet")),
                    ("ticket_5".into(), label("Authentication", Priority::High, "Account locked out")),
                ],
            )
            .unwrap();
        fake.script_search(json!({"results": [
            {"id": "ticket_1", "distance": 0.1},
            {"id": "ticket_2", "distance": 0.15},
            {"id": "ticket_3", "distance": 0.2},
            {"id": "ticket_4", "distance": 0.25},
            {"id": "ticket_5", "distance": 0.3},
        ]}));

        let result = service
            .classify("I forgot my password and the reset link isn't working")
            .await
            .unwrap();

        assert_eq!(result.category, "Authentication");
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.routing_team, "Security Team");
        assert_eq!(result.confidence, 0.8);
        let ids: Vec<_> = result.similar_tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["ticket_1", "ticket_2", "ticket_3"]);
        assert_eq!(result.similar_tickets[1].category, "Billing");
        assert_eq!(result.similar_tickets[0].similarity, 0.9);

        let search = fake.last_request().unwrap();
        assert_eq!(search.path, "/api/v1/index/support_tickets/search");
        assert_eq!(search.body["k"], 5);
        assert_eq!(search.body["vector"].as_array().unwrap().len(), DIM);
    }

    #[tokio::test]
    async fn test_empty_search_is_unclassified() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        fake.script_search(json!({"results": []}));

        let result = service.classify("Something about my account").await.unwrap();
        assert_eq!(result.category, "Unclassified");
        assert_eq!(result.priority, Priority::Medium);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.routing_team, "General Support");
        assert!(result.similar_tickets.is_empty());
    }

    #[tokio::test]
    async fn test_unlabeled_hits_are_dropped() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        service
            .labels
            .upsert_many(
                "support_tickets",
                &[("ticket_2".into(), label("Technical", Priority::Critical, "Server down"))],
            )
            .unwrap();
        fake.script_search(json!({"results": [
            {"id": "ticket_1", "distance": 0.05},
            {"id": "ticket_2", "distance": 0.4},
        ]}));

        let result = service.classify("The dashboard will not load").await.unwrap();
        assert_eq!(result.category, "Technical");
        assert_eq!(result.priority, Priority::Critical);
        assert_eq!(result.routing_team, "Technical Support");
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.similar_tickets.len(), 1);

        fake.script_search(json!({"results": [{"id": "ticket_9", "distance": 0.0}]}));
        let result = service.classify("The dashboard will not load").await.unwrap();
        assert_eq!(result.category, "Unclassified");
        assert_eq!(result.routing_team, "General Support");
    }

    #[tokio::test]
    async fn test_index_failure_is_absorbed() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        fake.fail_next(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom");

        let result = service.classify("Billing page shows an error").await.unwrap();
        assert_eq!(result.category, "Unclassified");
    }

    #[tokio::test]
    async fn test_rejects_blank_text_and_out_of_range_k() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);

        let err = service.classify("   ").await.unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
        let err = service.classify_with_k("Valid ticket text", 0).await.unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
        let err = service
            .classify_with_k("Valid ticket text", 1_000_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Validation(ref m) if m.contains("between 1 and 50")));
        assert!(fake.requests().is_empty());

        // Short text is the boundary layer's concern.
        fake.script_search(json!({"results": []}));
        assert!(service.classify("hi").await.is_ok());
    }

    #[tokio::test]
    async fn test_index_then_classify_exact_text() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        assert_eq!(service.setup_index().await.unwrap(), CreateOutcome::Created);
        assert_eq!(service.setup_index().await.unwrap(), CreateOutcome::AlreadyExists);

        let tickets = vec![
            ticket(1, "Two-factor codes never arrive on my phone", "Authentication", Priority::High),
            ticket(2, "I was charged twice for the annual plan", "Billing", Priority::Medium),
            ticket(3, "Export to CSV crashes the desktop app", "Technical", Priority::High),
            ticket(4, "Too short", "Billing", Priority::Low),
            ticket(5, "Please add a dark mode to the dashboard", "Feature Request", Priority::Low),
        ];
        let report = service.index_tickets(&tickets).await.unwrap();
        assert_eq!(report.indexed, 4);
        assert_eq!(report.rejected, vec!["4".to_string()]);
        assert_eq!(report.category_counts.len(), 4);
        assert_eq!(fake.len("support_tickets"), 4);

        let result = service
            .classify_with_k("I was charged twice for the annual plan", 1)
            .await
            .unwrap();
        assert_eq!(result.category, "Billing");
        assert_eq!(result.routing_team, "Billing Team");
        assert_eq!(result.similar_tickets[0].id, "ticket_2");
        assert!(result.similar_tickets[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_index_tickets_fails_when_index_rejects_batch() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);

        // No index created: the insert is refused and no labels are stored.
        let tickets = vec![ticket(1, "Cannot reset my password", "Authentication", Priority::High)];
        let err = service.index_tickets(&tickets).await.unwrap_err();
        assert!(matches!(err, TriageError::Index(_)));
        assert_eq!(service.labels.count("support_tickets").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_index_clears_labels() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        service.setup_index().await.unwrap();
        service
            .index_tickets(&[ticket(7, "App freezes on startup every time", "Technical", Priority::High)])
            .await
            .unwrap();

        assert_eq!(service.delete_index().await.unwrap(), 1);
        assert_eq!(service.labels.count("support_tickets").unwrap(), 0);
        assert!(service.delete_index().await.is_err());
    }

    #[tokio::test]
    async fn test_stats_passthrough() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);

        let stats = service.stats().await;
        assert_eq!(stats["error"], "HTTP 404");

        service.setup_index().await.unwrap();
        let stats = service.stats().await;
        assert_eq!(stats["dimension"], DIM);
        assert_eq!(stats["total_elements"], 0);
    }

    #[tokio::test]
    async fn test_categories_in_registration_order() {
        let fake = FakeEndee::spawn().await;
        let service = service_for(&fake);
        assert_eq!(
            service.get_categories(),
            vec!["Authentication", "Billing", "Technical", "Feature Request", "General Inquiry"]
        );
    }

    #[test]
    fn test_dimension_mismatch_is_config_error() {
        let config = TriageConfig::default();
        let labels = TicketRepository::new(Arc::new(Database::in_memory().unwrap()));
        let err = ClassificationService::new(
            Arc::new(MockEmbedding::with_dimensions(8)),
            VectorIndexClient::new(&config.endee).unwrap(),
            labels,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, TriageError::Config(_)));
    }

    #[test]
    fn test_default_k_above_cap_is_config_error() {
        let mut config = TriageConfig::default();
        config.endee.dimension = DIM;
        config.classifier.top_k = 80;
        let labels = TicketRepository::new(Arc::new(Database::in_memory().unwrap()));
        let err = ClassificationService::new(
            Arc::new(MockEmbedding::with_dimensions(DIM)),
            VectorIndexClient::new(&config.endee).unwrap(),
            labels,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, TriageError::Config(ref m) if m.contains("max_top_k")));
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TriageConfig::default();
        config.classifier.model_dir = dir.path().join("nope").to_string_lossy().into_owned();
        let labels = TicketRepository::new(Arc::new(Database::in_memory().unwrap()));
        let err = ClassificationService::from_config(&config, labels).unwrap_err();
        assert!(matches!(err, TriageError::Embedding(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_classification() {
        let fake = FakeEndee::spawn().await;
        let service = Arc::new(service_for(&fake));
        service
            .labels
            .upsert_many(
                "support_tickets",
                &[("ticket_1".into(), label("Billing", Priority::Low, "Charged twice"))],
            )
            .unwrap();
        fake.script_search(json!({"results": [{"id": "ticket_1", "distance": 0.25}]}));

        let mut handles = Vec::new();
        for i in 0..16 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.classify(&format!("Billing question number {}", i)).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.category, "Billing");
            assert_eq!(result.confidence, 0.75);
        }
        assert_eq!(fake.requests().len(), 16);
    }
}
