//! Entity extraction, SKOS taxonomy linkage, and stats aggregation
//! (spec §4.8 "Entity/taxonomy extraction").

use async_trait::async_trait;
use swarmmail::domain::models::DecayBoundaries;
use swarmmail::domain::ports::{EntityExtractor, ExtractedEntity, ExtractedRelation, ExtractionResult, NullEmbeddingProvider};
use swarmmail::semantic_memory::{SemanticMemory, StoreOptions};
use swarmmail::store::Store;

/// A fixed-output extractor standing in for an LLM-backed one: every
/// memory is tagged with one pref_label and linked `broader` to "testing".
struct FixedExtractor {
    label: &'static str,
}

#[async_trait]
impl EntityExtractor for FixedExtractor {
    async fn extract(&self, _content: &str) -> swarmmail::Result<ExtractionResult> {
        Ok(ExtractionResult {
            entities: vec![ExtractedEntity { pref_label: self.label.to_string(), alt_labels: vec![] }],
            relations: vec![ExtractedRelation { broader: Some("testing".to_string()), narrower: None, related: None }],
        })
    }
}

#[tokio::test]
async fn stored_entities_are_linked_and_queryable() {
    let store = Store::open_in_memory().await.unwrap();
    let embedder = NullEmbeddingProvider;
    let extractor = FixedExtractor { label: "oauth-config" };
    let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, DecayBoundaries::default(), 0.85, 30_000);

    let outcome = memory
        .store("OAuth tokens require refresh 5 minutes before expiry", StoreOptions { extract_entities: true, ..Default::default() })
        .await
        .unwrap();
    assert!(!outcome.duplicate);

    let entities = memory.list_entities().await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].pref_label, "oauth-config");

    let by_label = memory.get_entity("oauth-config").await.unwrap();
    assert_eq!(by_label.len(), 1);
    assert_eq!(by_label[0].memory_id, outcome.id);

    let tree = memory.taxonomy_tree("testing").await.unwrap();
    assert_eq!(tree.label, "testing");
    assert!(tree.children.iter().any(|c| c.label == "oauth-config"));
}

#[tokio::test]
async fn extractor_failure_still_stores_the_memory() {
    struct FailingExtractor;
    #[async_trait]
    impl EntityExtractor for FailingExtractor {
        async fn extract(&self, _content: &str) -> swarmmail::Result<ExtractionResult> {
            Err(swarmmail::Error::io("test.extract", "extractor unavailable"))
        }
    }

    let store = Store::open_in_memory().await.unwrap();
    let embedder = NullEmbeddingProvider;
    let extractor = FailingExtractor;
    let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, DecayBoundaries::default(), 0.85, 30_000);

    let outcome = memory
        .store("a learning that should survive extractor failure", StoreOptions { extract_entities: true, ..Default::default() })
        .await
        .unwrap();
    assert!(memory.get(&outcome.id).await.is_ok());
    assert!(memory.list_entities().await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_aggregate_across_collections_and_tiers() {
    let store = Store::open_in_memory().await.unwrap();
    let embedder = NullEmbeddingProvider;
    let extractor = swarmmail::domain::ports::NullEntityExtractor;
    let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, DecayBoundaries::default(), 0.85, 30_000);

    memory.store("first distinct learning about deploy rollbacks", StoreOptions { collection: Some("ops".into()), ..Default::default() }).await.unwrap();
    memory.store("second distinct learning about release cadence", StoreOptions { collection: Some("ops".into()), ..Default::default() }).await.unwrap();
    memory.store("a third learning in the default collection", StoreOptions::default()).await.unwrap();

    let stats = memory.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(*stats.by_collection.get("ops").unwrap(), 2);
    assert_eq!(*stats.by_collection.get("default").unwrap(), 1);
    assert_eq!(*stats.by_tier.get("hot").unwrap(), 3);
}
