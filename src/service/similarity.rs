//! Query-time operations over one loaded snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::index::{ClusterNode, IndexSnapshot, LabelTable, SnapshotPersistence, group_members};
use crate::labels::{LabelRewriter, MAX_SAMPLES};
use crate::service::responses::{
    Classification, ClusterMembers, DocumentHit, MapView, SearchResults,
};
use crate::types::{CoarseId, FineId};
use crate::vector::{EmbeddingGenerator, Score, VectorError, dot, normalize_embedding};

/// Neighbors consulted by [`SimilarityService::classify`].
pub const DEFAULT_CLASSIFY_NEIGHBORS: usize = 10;

/// Result count used by the CLI when `-k` is not given.
pub const DEFAULT_SEARCH_K: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Independent of the `k` passed to search.
    pub classify_neighbors: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            classify_neighbors: DEFAULT_CLASSIFY_NEIGHBORS,
        }
    }
}

/// Read-mostly query service.
///
/// The snapshot is immutable. Labels sit behind a lock holding an `Arc`; each
/// query takes one clone of it, so a response never mixes label generations.
pub struct SimilarityService {
    snapshot: IndexSnapshot,
    embedder: Arc<dyn EmbeddingGenerator>,
    options: ServiceOptions,
    labels: RwLock<Arc<LabelTable>>,
    refined: AtomicBool,
}

impl SimilarityService {
    /// Serve `snapshot`, embedding queries with `embedder`.
    ///
    /// Fails when the embedder's dimension differs from the snapshot's.
    pub fn new(
        snapshot: IndexSnapshot,
        embedder: Arc<dyn EmbeddingGenerator>,
        options: ServiceOptions,
    ) -> IndexResult<Self> {
        let expected = snapshot.metadata.dimension;
        let actual = embedder.dimension().get();
        if expected != actual {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "embedder '{}' produces {actual}-dim vectors but the snapshot was built with '{}' ({expected} dims)",
                    embedder.model_name(),
                    snapshot.metadata.model_name
                ),
            });
        }
        let labels = RwLock::new(Arc::new(snapshot.labels.clone()));
        Ok(Self {
            snapshot,
            embedder,
            options,
            labels,
            refined: AtomicBool::new(false),
        })
    }

    /// Load the snapshot at `persistence` and serve it.
    pub fn load(
        persistence: &SnapshotPersistence,
        embedder: Arc<dyn EmbeddingGenerator>,
        options: ServiceOptions,
    ) -> IndexResult<Self> {
        Self::new(persistence.load()?, embedder, options)
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    pub fn document_count(&self) -> usize {
        self.snapshot.document_count()
    }

    /// Current label table.
    pub fn labels(&self) -> Arc<LabelTable> {
        Arc::clone(&self.labels.read())
    }

    pub fn is_refined(&self) -> bool {
        self.refined.load(Ordering::Acquire)
    }

    /// The `k` documents most similar to `query`, best first.
    ///
    /// `k` is clamped to `[1, document_count]`; equal scores keep document order.
    pub fn search(&self, query: &str, k: usize) -> IndexResult<SearchResults> {
        let vector = self.embed_query(query)?;
        Ok(SearchResults {
            query: query.to_string(),
            hits: self.ranked_hits(&vector, k),
        })
    }

    /// [`search`](Self::search) for a precomputed query vector.
    pub fn search_embedding(&self, vector: &[f32], k: usize) -> IndexResult<Vec<DocumentHit>> {
        let vector = self.prepare_query(vector.to_vec())?;
        Ok(self.ranked_hits(&vector, k))
    }

    /// Members of fine cluster `fine_id` with its label and parent.
    ///
    /// Ids outside `[0, fine_count)` and ids without members are
    /// [`IndexError::ClusterNotFound`].
    pub fn cluster_members(&self, fine_id: i64) -> IndexResult<ClusterMembers> {
        let not_found = || IndexError::ClusterNotFound { id: fine_id };
        let id = u32::try_from(fine_id)
            .ok()
            .map(FineId)
            .filter(|id| id.index() < self.snapshot.fine_count())
            .ok_or_else(not_found)?;

        let members = self.snapshot.fine_members(id);
        if members.is_empty() {
            return Err(not_found());
        }

        let labels = self.labels();
        let parent = self.snapshot.parents[id.index()];
        Ok(ClusterMembers {
            fine_id: id,
            label: fine_label(&labels, id),
            parent,
            parent_label: parent
                .coarse()
                .and_then(|c| labels.coarse_label(c))
                .map(str::to_string),
            members: members.into_iter().map(|doc| self.hit(doc, None)).collect(),
        })
    }

    /// Assign `text` to the most frequent fine cluster among its nearest
    /// neighbors. Ties go to the lowest fine id.
    pub fn classify(&self, text: &str) -> IndexResult<Classification> {
        let vector = self.embed_query(text)?;
        Ok(self.vote(&vector))
    }

    /// [`classify`](Self::classify) for a precomputed vector.
    pub fn classify_embedding(&self, vector: &[f32]) -> IndexResult<Classification> {
        let vector = self.prepare_query(vector.to_vec())?;
        Ok(self.vote(&vector))
    }

    /// All map nodes with current labels, and the bounds.
    pub fn map(&self) -> MapView {
        let labels = self.labels();
        let relabel = |nodes: &[ClusterNode], table: &[String]| -> Vec<ClusterNode> {
            nodes
                .iter()
                .map(|node| {
                    let mut node = node.clone();
                    if let Some(label) = table.get(node.id as usize) {
                        node.label.clone_from(label);
                    }
                    node
                })
                .collect()
        };
        MapView {
            coarse_nodes: relabel(&self.snapshot.coarse_nodes, &labels.coarse),
            fine_nodes: relabel(&self.snapshot.fine_nodes, &labels.fine),
            bounds: self.snapshot.bounds,
        }
    }

    /// One-time relabeling pass after load.
    ///
    /// Samples up to `sample_size` fresh member titles per populated cluster,
    /// builds a complete table off-lock and swaps it in with one write.
    /// Returns the number of labels that changed. Later calls are no-ops.
    pub fn refine_labels(
        &self,
        rewriter: &dyn LabelRewriter,
        sample_size: usize,
        seed: u64,
        max_len: usize,
    ) -> usize {
        if self.refined.swap(true, Ordering::AcqRel) {
            debug!("Labels already refined, skipping");
            return 0;
        }

        let current = self.labels();
        let amount = sample_size.clamp(1, MAX_SAMPLES);
        let mut rng = StdRng::seed_from_u64(seed);

        let coarse_members = group_members(
            self.snapshot.coarse_ids.iter().map(CoarseId::index),
            self.snapshot.coarse_count(),
        );
        let fine_members = group_members(
            self.snapshot.fine_ids.iter().map(FineId::index),
            self.snapshot.fine_count(),
        );

        let coarse = self.refine_level(
            rewriter,
            &current.coarse,
            &coarse_members,
            amount,
            max_len,
            &mut rng,
        );
        let fine = self.refine_level(
            rewriter,
            &current.fine,
            &fine_members,
            amount,
            max_len,
            &mut rng,
        );
        let refined = LabelTable { coarse, fine };
        let changed = refined
            .coarse
            .iter()
            .zip(&current.coarse)
            .chain(refined.fine.iter().zip(&current.fine))
            .filter(|(new, old)| new != old)
            .count();

        *self.labels.write() = Arc::new(refined);
        info!("Refined labels after load: {changed} changed");
        changed
    }

    fn refine_level(
        &self,
        rewriter: &dyn LabelRewriter,
        labels: &[String],
        members: &[Vec<usize>],
        amount: usize,
        max_len: usize,
        rng: &mut StdRng,
    ) -> Vec<String> {
        labels
            .iter()
            .zip(members)
            .map(|(label, docs)| {
                if docs.is_empty() {
                    return label.clone();
                }
                let samples: Vec<String> = sample(&mut *rng, docs.len(), amount.min(docs.len()))
                    .into_iter()
                    .map(|i| self.snapshot.documents[docs[i]].title())
                    .collect();
                rewriter.rewrite(label, &samples, max_len)
            })
            .collect()
    }

    fn embed_query(&self, text: &str) -> IndexResult<Vec<f32>> {
        let vector = self.embedder.embed_one(text)?;
        self.prepare_query(vector)
    }

    /// Check the dimension and normalize like build-time vectors.
    ///
    /// A query with no usable direction scores zero against everything.
    fn prepare_query(&self, mut vector: Vec<f32>) -> IndexResult<Vec<f32>> {
        let expected = self.snapshot.embeddings.dimension();
        if vector.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }
            .into());
        }
        if let Err(e) = normalize_embedding(&mut vector) {
            debug!("Query vector not normalizable ({e}), scoring as zero");
            vector.fill(0.0);
        }
        Ok(vector)
    }

    /// `(document, score)` pairs, best first, at most `limit` of them.
    fn rank(&self, query: &[f32], limit: usize) -> Vec<(usize, f32)> {
        let matrix = &self.snapshot.embeddings;
        let mut scored: Vec<(usize, f32)> = (0..matrix.len())
            .into_par_iter()
            .map(|doc| (doc, dot(query, matrix.row(doc))))
            .collect();
        // Stable: equal scores stay in document order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        scored
    }

    fn ranked_hits(&self, query: &[f32], k: usize) -> Vec<DocumentHit> {
        let k = k.clamp(1, self.document_count());
        self.rank(query, k)
            .into_iter()
            .map(|(doc, score)| self.hit(doc, Some(score)))
            .collect()
    }

    fn vote(&self, query: &[f32]) -> Classification {
        let n = self
            .options
            .classify_neighbors
            .clamp(1, self.document_count());
        let neighbors = self.rank(query, n);

        let mut votes: BTreeMap<FineId, usize> = BTreeMap::new();
        for &(doc, _) in &neighbors {
            *votes.entry(self.snapshot.fine_ids[doc]).or_default() += 1;
        }
        // Ascending ids; only a strictly larger count replaces the leader
        let (fine_id, count) = votes
            .iter()
            .fold((FineId(0), 0), |best, (&id, &count)| {
                if count > best.1 { (id, count) } else { best }
            });

        let labels = self.labels();
        let parent = self.snapshot.parents[fine_id.index()];
        Classification {
            fine_id,
            label: fine_label(&labels, fine_id),
            parent,
            parent_label: parent
                .coarse()
                .and_then(|c| labels.coarse_label(c))
                .map(str::to_string),
            votes: count,
            neighbors: neighbors
                .into_iter()
                .map(|(doc, score)| self.hit(doc, Some(score)))
                .collect(),
        }
    }

    fn hit(&self, doc: usize, score: Option<f32>) -> DocumentHit {
        DocumentHit {
            document: self.snapshot.documents[doc].clone(),
            coarse_id: self.snapshot.coarse_ids[doc],
            fine_id: self.snapshot.fine_ids[doc],
            coordinate: self.snapshot.coordinates[doc],
            score: score.map(Score::from_dot),
        }
    }
}

fn fine_label(labels: &LabelTable, id: FineId) -> String {
    labels
        .fine_label(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Cluster {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sample_parts;
    use crate::labels::LabelRefinementError;
    use crate::types::ParentAssignment;
    use crate::vector::{VectorDimension, VectorError};

    /// Embeds a handful of known texts onto the snapshot's three axes.
    struct AxisEmbedder;

    impl EmbeddingGenerator for AxisEmbedder {
        fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
            Ok(texts
                .iter()
                .map(|text| match *text {
                    "x" => vec![1.0, 0.0, 0.0],
                    "y" => vec![0.0, 1.0, 0.0],
                    "z" => vec![0.0, 0.0, 3.0],
                    _ => vec![0.0, 0.0, 0.0],
                })
                .collect())
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new_unchecked(3)
        }

        fn model_name(&self) -> String {
            "axes".into()
        }
    }

    struct Prefixer;

    impl LabelRewriter for Prefixer {
        fn try_rewrite(&self, label: &str, _samples: &[String]) -> Result<String, LabelRefinementError> {
            Ok(format!("Refined {label}"))
        }
    }

    fn service(neighbors: usize) -> SimilarityService {
        let snapshot = IndexSnapshot::assemble(sample_parts()).unwrap();
        SimilarityService::new(
            snapshot,
            Arc::new(AxisEmbedder),
            ServiceOptions {
                classify_neighbors: neighbors,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_classify_uses_mode_not_nearest() {
        // Nearest documents are 3 and 4 (fine 1) but three of five neighbors are fine 0
        let result = service(5).classify("z").unwrap();
        assert_eq!(result.neighbors[0].fine_id, FineId(1));
        assert_eq!(result.fine_id, FineId(0));
        assert_eq!(result.votes, 3);
        assert_eq!(result.parent, ParentAssignment::Assigned(CoarseId(0)));
        assert_eq!(result.parent_label.as_deref(), Some("Topic 0"));
    }

    #[test]
    fn test_classify_small_neighborhood_follows_nearest() {
        let result = service(2).classify("z").unwrap();
        assert_eq!(result.fine_id, FineId(1));
        assert_eq!(result.label, "Cluster 1");
    }

    #[test]
    fn test_classify_tie_goes_to_lowest_id() {
        // Neighbors: docs 3, 4 (fine 1) then 0, 1 (fine 0); two votes each
        let result = service(4).classify("z").unwrap();
        assert_eq!(result.votes, 2);
        assert_eq!(result.fine_id, FineId(0));
    }

    #[test]
    fn test_search_clamps_k() {
        let service = service(10);
        assert_eq!(service.search("x", 0).unwrap().hits.len(), 1);
        assert_eq!(service.search("x", 3).unwrap().hits.len(), 3);
        assert_eq!(service.search("x", 100).unwrap().hits.len(), 5);
    }

    #[test]
    fn test_search_is_sorted_and_stable() {
        let hits = service(10).search("x", 5).unwrap().hits;
        let scores: Vec<f32> = hits.iter().map(|h| h.score.unwrap().get()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        let ids: Vec<u64> = hits.iter().map(|h| h.document.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!((scores[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unembeddable_query_still_answers() {
        let results = service(10).search("unknown", 2).unwrap();
        assert_eq!(results.hits.len(), 2);
        assert!(results.hits.iter().all(|h| h.score.unwrap().get() == 0.0));
    }

    #[test]
    fn test_search_embedding_checks_dimension() {
        let service = service(10);
        assert!(service.search_embedding(&[1.0, 0.0], 2).is_err());
        let hits = service.search_embedding(&[0.0, 5.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].document.id, 2);
    }

    #[test]
    fn test_cluster_members_not_found() {
        let service = service(10);
        assert!(matches!(
            service.cluster_members(-1),
            Err(IndexError::ClusterNotFound { id: -1 })
        ));
        assert!(matches!(
            service.cluster_members(3),
            Err(IndexError::ClusterNotFound { id: 3 })
        ));
        // Reserved but empty
        assert!(matches!(
            service.cluster_members(2),
            Err(IndexError::ClusterNotFound { id: 2 })
        ));
    }

    #[test]
    fn test_cluster_members_lists_documents_with_parent() {
        let members = service(10).cluster_members(1).unwrap();
        assert_eq!(members.label, "Cluster 1");
        assert_eq!(members.parent_label.as_deref(), Some("Topic 1"));
        let ids: Vec<u64> = members.members.iter().map(|m| m.document.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(members.members.iter().all(|m| m.score.is_none()));
    }

    #[test]
    fn test_map_is_snapshot_projection() {
        let service = service(10);
        let map = service.map();
        assert_eq!(map.coarse_nodes, service.snapshot().coarse_nodes);
        assert_eq!(map.fine_nodes, service.snapshot().fine_nodes);
        assert_eq!(map.bounds, service.snapshot().bounds);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let snapshot = IndexSnapshot::assemble(sample_parts()).unwrap();
        let result = SimilarityService::new(
            snapshot,
            Arc::new(crate::vector::HashedTextEmbedder::new()),
            ServiceOptions::default(),
        );
        assert!(matches!(result, Err(IndexError::ConfigError { .. })));
    }

    #[test]
    fn test_refine_runs_once_and_keeps_structure() {
        let service = service(10);
        let before = service.snapshot().parents.clone();

        // Only populated clusters are rewritten: 2 coarse + 2 fine
        assert_eq!(service.refine_labels(&Prefixer, 3, 7, 60), 4);
        assert!(service.is_refined());
        assert_eq!(service.labels().fine[0], "Refined Cluster 0");
        assert_eq!(service.labels().fine[2], "Cluster 2");
        assert_eq!(service.map().coarse_nodes[1].label, "Refined Topic 1");

        assert_eq!(service.refine_labels(&Prefixer, 3, 7, 60), 0);
        assert_eq!(service.labels().fine[0], "Refined Cluster 0");
        assert_eq!(service.snapshot().parents, before);
        // The snapshot's own table is untouched
        assert_eq!(service.snapshot().labels.fine[0], "Cluster 0");
    }

    #[test]
    fn test_readers_never_see_partial_refinement() {
        let service = service(10);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let labels = service.labels();
                        let refined = labels.coarse[0].starts_with("Refined");
                        assert!(labels.coarse[1].starts_with("Refined") == refined);
                        assert!(labels.fine[0].starts_with("Refined") == refined);
                        assert!(labels.fine[1].starts_with("Refined") == refined);
                    }
                });
            }
            scope.spawn(|| service.refine_labels(&Prefixer, 5, 1, 60));
        });
        assert!(service.labels().fine[1].starts_with("Refined"));
    }
}
