//! End-to-end: corpus file -> build -> persist -> load -> query.

use std::sync::Arc;

use knowmap::error::IndexError;
use knowmap::index::BuildParams;
use knowmap::service::ServiceOptions;
use knowmap::types::{Coordinate2D, FineId, ParentAssignment};
use knowmap::vector::{
    ClusterAssigner, ClusteringError, EmbeddingGenerator, LayoutError, LayoutProjector,
    VectorDimension, VectorError,
};
use knowmap::{IndexBuilder, SimilarityService, SnapshotPersistence, load_documents};
use tempfile::TempDir;

const CORPUS: &str = r#"{"articles": [
    {"headline": "Senate passes budget bill", "abstract": "Lawmakers approve the federal budget.", "section_name": "U.S."},
    {"headline": "Budget talks stall in Senate", "abstract": "Negotiations continue.", "section_name": "U.S."},
    {"headline": "Senate votes on budget", "abstract": "A vote is expected Friday.", "section_name": "U.S."},
    {"headline": "Jazz festival opens downtown", "abstract": "Musicians celebrate.", "section_name": "Arts"},
    {"headline": "Jazz legends return", "abstract": "Crowds cheer the legends.", "section_name": "Arts"},
    {"headline": "Football season kicks off", "abstract": "Fans pack the stadium.", "section_name": "Sports"},
    {"headline": "", "abstract": "null"}
]}"#;

const KEYWORDS: [&[&str]; 3] = [&["senate", "budget"], &["jazz"], &["football"]];

/// One axis per keyword family; text without keywords embeds to zeros.
struct KeywordEmbedder;

impl EmbeddingGenerator for KeywordEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|family| family.iter().filter(|k| lower.contains(*k)).count() as f32)
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(KEYWORDS.len()).unwrap()
    }

    fn model_name(&self) -> String {
        "keyword-test".to_string()
    }
}

/// Politics / culture at the coarse level; four fine slots, the last one empty.
struct FixedAssigner;

impl ClusterAssigner for FixedAssigner {
    fn assign(
        &self,
        vectors: &[Vec<f32>],
        k: usize,
        _seed: u64,
    ) -> Result<Vec<u32>, ClusteringError> {
        assert_eq!(vectors.len(), 6);
        Ok(if k == 2 {
            vec![0, 0, 0, 1, 1, 1]
        } else {
            vec![0, 0, 0, 1, 1, 2]
        })
    }
}

struct DiagonalProjector;

impl LayoutProjector for DiagonalProjector {
    fn project(&self, vectors: &[Vec<f32>], _seed: u64) -> Result<Vec<Coordinate2D>, LayoutError> {
        Ok((0..vectors.len())
            .map(|i| Coordinate2D::new(i as f32, i as f32 * 2.0))
            .collect())
    }
}

fn build_fixture() -> (TempDir, SnapshotPersistence) {
    let dir = TempDir::new().unwrap();
    let corpus_path = dir.path().join("articles.json");
    std::fs::write(&corpus_path, CORPUS).unwrap();

    let documents = load_documents(&corpus_path).unwrap();
    assert_eq!(documents.len(), 6, "record without text is dropped");

    let persistence = SnapshotPersistence::new(dir.path().join("index"));
    let builder = IndexBuilder::new(
        Arc::new(KeywordEmbedder),
        Arc::new(FixedAssigner),
        Arc::new(DiagonalProjector),
    );
    let params = BuildParams {
        coarse_count: 2,
        fine_count: 4,
        ..BuildParams::default()
    };
    builder
        .build_and_save(documents, &params, &persistence)
        .unwrap();
    (dir, persistence)
}

fn service(persistence: &SnapshotPersistence, classify_neighbors: usize) -> SimilarityService {
    SimilarityService::load(
        persistence,
        Arc::new(KeywordEmbedder),
        ServiceOptions { classify_neighbors },
    )
    .unwrap()
}

#[test]
fn test_snapshot_round_trips_through_disk() {
    let (_dir, persistence) = build_fixture();
    assert!(persistence.exists());

    let metadata = persistence.load_metadata().unwrap();
    assert_eq!(metadata.model_name, "keyword-test");
    assert_eq!(metadata.dimension, 3);
    assert_eq!(metadata.document_count, 6);
    assert_eq!(metadata.fine_count, 4);

    let snapshot = persistence.load().unwrap();
    assert_eq!(snapshot.parents.len(), 4);
    assert_eq!(
        snapshot.parents[3],
        ParentAssignment::Unassigned,
        "empty fine cluster has no parent"
    );
    assert_eq!(snapshot.labels.fine[3], "Cluster 3");
    assert!(snapshot.labels.fine[0].contains("budget") || snapshot.labels.fine[0].contains("senate"));
    assert_eq!(snapshot.fine_nodes.len(), 3);
    assert_eq!(snapshot.bounds.x_max, 5.0);
    assert_eq!(snapshot.bounds.y_max, 10.0);
}

#[test]
fn test_search_ranks_matching_documents_first() {
    let (_dir, persistence) = build_fixture();
    let service = service(&persistence, 10);

    let results = service.search("jazz", 2).unwrap();
    assert_eq!(results.hits.len(), 2);
    let ids: Vec<u64> = results.hits.iter().map(|hit| hit.document.id).collect();
    assert_eq!(ids, vec![3, 4]);
    for hit in &results.hits {
        assert!((hit.score.unwrap().get() - 1.0).abs() < 1e-5);
        assert_eq!(hit.fine_id, FineId(1));
    }

    // k larger than the corpus returns every document
    assert_eq!(service.search("budget", 100).unwrap().hits.len(), 6);
}

#[test]
fn test_classify_votes_among_neighbors() {
    let (_dir, persistence) = build_fixture();

    let wide = service(&persistence, 10).classify("senate budget deal").unwrap();
    assert_eq!(wide.fine_id, FineId(0));
    assert_eq!(wide.votes, 3);
    assert_eq!(wide.neighbors.len(), 6);

    let narrow = service(&persistence, 2).classify("late night jazz").unwrap();
    assert_eq!(narrow.fine_id, FineId(1));
    assert_eq!(narrow.votes, 2);
    assert_eq!(narrow.parent.coarse().map(|c| c.value()), Some(1));
}

#[test]
fn test_cluster_listing_and_missing_clusters() {
    let (_dir, persistence) = build_fixture();
    let service = service(&persistence, 10);

    let members = service.cluster_members(0).unwrap();
    assert_eq!(members.members.len(), 3);
    assert!(members.members.iter().all(|hit| hit.score.is_none()));
    assert_eq!(members.parent.coarse().map(|c| c.value()), Some(0));

    for missing in [-1, 3, 4] {
        assert!(matches!(
            service.cluster_members(missing),
            Err(IndexError::ClusterNotFound { id }) if id == missing
        ));
    }
}

#[test]
fn test_map_lists_nonempty_nodes() {
    let (_dir, persistence) = build_fixture();
    let map = service(&persistence, 10).map();

    assert_eq!(map.coarse_nodes.len(), 2);
    assert_eq!(map.fine_nodes.len(), 3);
    let json = serde_json::to_value(&map).unwrap();
    assert!(json["bounds"].is_object());
}

#[test]
fn test_loading_a_missing_index_fails() {
    let dir = TempDir::new().unwrap();
    let persistence = SnapshotPersistence::new(dir.path().join("nothing-here"));
    assert!(!persistence.exists());
    assert!(matches!(
        SimilarityService::load(
            &persistence,
            Arc::new(KeywordEmbedder),
            ServiceOptions::default()
        ),
        Err(IndexError::LoadError { .. })
    ));
}
