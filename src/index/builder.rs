//! Offline index builder.
//!
//! Runs the whole pipeline to completion or fails without producing a
//! snapshot: embed, cluster twice, resolve parents, project, label.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::corpus::Document;
use crate::error::{IndexError, IndexResult};
use crate::index::hierarchy::group_members;
use crate::index::persistence::SnapshotPersistence;
use crate::index::snapshot::{EmbeddingMatrix, IndexSnapshot, LabelTable, SnapshotParts};
use crate::labels::{
    DEFAULT_MAX_LABEL_LEN, LabelRewriter, LabelSynthesizer, MAX_SAMPLES, TermStatistics,
    TfIdfOptions, fallback_label,
};
use crate::types::{CoarseId, FineId};
use crate::vector::{
    ClusterAssigner, EmbeddingGenerator, LayoutProjector, VectorError, normalize_embedding,
};

pub const DEFAULT_COARSE_COUNT: usize = 8;
pub const DEFAULT_FINE_COUNT: usize = 40;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 256;
pub const DEFAULT_COARSE_PREFIX: &str = "Topic";
pub const DEFAULT_FINE_PREFIX: &str = "Cluster";

/// Seeds for every randomized stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSeeds {
    pub coarse: u64,
    pub fine: u64,
    pub layout: u64,
}

impl Default for BuildSeeds {
    fn default() -> Self {
        Self {
            coarse: 42,
            fine: 43,
            layout: 44,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    pub coarse_count: usize,
    pub fine_count: usize,
    pub seeds: BuildSeeds,
    pub embed_batch_size: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            coarse_count: DEFAULT_COARSE_COUNT,
            fine_count: DEFAULT_FINE_COUNT,
            seeds: BuildSeeds::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

/// Orchestrates the build stages into one [`IndexSnapshot`].
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingGenerator>,
    assigner: Arc<dyn ClusterAssigner>,
    projector: Arc<dyn LayoutProjector>,
    synthesizer: LabelSynthesizer,
    tfidf: TfIdfOptions,
    coarse_prefix: String,
    fine_prefix: String,
    rewriter: Option<Arc<dyn LabelRewriter>>,
    max_label_len: usize,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn EmbeddingGenerator>,
        assigner: Arc<dyn ClusterAssigner>,
        projector: Arc<dyn LayoutProjector>,
    ) -> Self {
        Self {
            embedder,
            assigner,
            projector,
            synthesizer: LabelSynthesizer::default(),
            tfidf: TfIdfOptions::default(),
            coarse_prefix: DEFAULT_COARSE_PREFIX.to_string(),
            fine_prefix: DEFAULT_FINE_PREFIX.to_string(),
            rewriter: None,
            max_label_len: DEFAULT_MAX_LABEL_LEN,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: LabelSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_tfidf(mut self, options: TfIdfOptions) -> Self {
        self.tfidf = options;
        self
    }

    pub fn with_prefixes(mut self, coarse: impl Into<String>, fine: impl Into<String>) -> Self {
        self.coarse_prefix = coarse.into();
        self.fine_prefix = fine.into();
        self
    }

    /// Refine synthesized labels with `rewriter`; failures keep the original.
    pub fn with_rewriter(mut self, rewriter: Arc<dyn LabelRewriter>, max_label_len: usize) -> Self {
        self.rewriter = Some(rewriter);
        self.max_label_len = max_label_len;
        self
    }

    /// Build a snapshot in memory.
    pub fn build(&self, documents: Vec<Document>, params: &BuildParams) -> IndexResult<IndexSnapshot> {
        let started = Instant::now();
        if documents.is_empty() {
            return Err(IndexError::build("input", "corpus contains no documents"));
        }
        if params.coarse_count == 0 || params.fine_count == 0 {
            return Err(IndexError::build(
                "parameters",
                format!(
                    "cluster counts must be positive (coarse={}, fine={})",
                    params.coarse_count, params.fine_count
                ),
            ));
        }
        info!(
            "Building index over {} documents (coarse={}, fine={})",
            documents.len(),
            params.coarse_count,
            params.fine_count
        );

        let vectors = self.embed_corpus(&documents, params.embed_batch_size)?;
        info!(
            "Embedded {} documents with {} ({} dims)",
            vectors.len(),
            self.embedder.model_name(),
            self.embedder.dimension().get()
        );

        let coarse_ids: Vec<CoarseId> = self
            .cluster(&vectors, params.coarse_count, params.seeds.coarse)?
            .into_iter()
            .map(CoarseId)
            .collect();
        let fine_ids: Vec<FineId> = self
            .cluster(&vectors, params.fine_count, params.seeds.fine)?
            .into_iter()
            .map(FineId)
            .collect();
        info!("Clustered into {} coarse and {} fine groups", params.coarse_count, params.fine_count);

        let coordinates = self.projector.project(&vectors, params.seeds.layout)?;
        if coordinates.len() != vectors.len() {
            return Err(IndexError::build(
                "layout",
                format!(
                    "projector returned {} coordinates for {} documents",
                    coordinates.len(),
                    vectors.len()
                ),
            ));
        }
        info!("Projected layout to 2-D");

        let labels = self.synthesize_labels(&documents, &coarse_ids, &fine_ids, params);

        let snapshot = IndexSnapshot::assemble(SnapshotParts {
            model_name: self.embedder.model_name(),
            documents,
            embeddings: EmbeddingMatrix::from_rows(vectors)?,
            coarse_ids,
            fine_ids,
            coordinates,
            coarse_count: params.coarse_count,
            fine_count: params.fine_count,
            labels,
        })
        .map_err(|e| IndexError::build("assembly", e.to_string()))?;

        info!(
            "Index built in {:.2?}: {} coarse nodes, {} fine nodes",
            started.elapsed(),
            snapshot.coarse_nodes.len(),
            snapshot.fine_nodes.len()
        );
        Ok(snapshot)
    }

    /// Build and persist. Nothing is written when any stage fails.
    pub fn build_and_save(
        &self,
        documents: Vec<Document>,
        params: &BuildParams,
        persistence: &SnapshotPersistence,
    ) -> IndexResult<IndexSnapshot> {
        let snapshot = self.build(documents, params)?;
        persistence.save(&snapshot)?;
        Ok(snapshot)
    }

    fn embed_corpus(&self, documents: &[Document], batch_size: usize) -> IndexResult<Vec<Vec<f32>>> {
        let dimension = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(documents.len());

        for (batch_no, batch) in documents.chunks(batch_size.max(1)).enumerate() {
            let texts: Vec<&str> = batch.iter().map(Document::embedding_text).collect();
            let embeddings = self.embedder.generate_embeddings(&texts)?;
            if embeddings.len() != texts.len() {
                return Err(VectorError::CountMismatch {
                    expected: texts.len(),
                    actual: embeddings.len(),
                }
                .into());
            }
            for (document, mut embedding) in batch.iter().zip(embeddings) {
                dimension.validate_vector(&embedding)?;
                normalize_embedding(&mut embedding).map_err(|e| {
                    IndexError::build("embedding", format!("document {}: {e}", document.id))
                })?;
                vectors.push(embedding);
            }
            debug!("Embedded batch {batch_no} ({} documents)", batch.len());
        }
        Ok(vectors)
    }

    fn cluster(&self, vectors: &[Vec<f32>], k: usize, seed: u64) -> IndexResult<Vec<u32>> {
        let labels = self.assigner.assign(vectors, k, seed)?;
        if labels.len() != vectors.len() {
            return Err(IndexError::build(
                "clustering",
                format!("assigner returned {} labels for {} vectors", labels.len(), vectors.len()),
            ));
        }
        if let Some(bad) = labels.iter().find(|&&label| label as usize >= k) {
            return Err(IndexError::build(
                "clustering",
                format!("assigner returned label {bad}, outside [0, {k})"),
            ));
        }
        Ok(labels)
    }

    fn synthesize_labels(
        &self,
        documents: &[Document],
        coarse_ids: &[CoarseId],
        fine_ids: &[FineId],
        params: &BuildParams,
    ) -> LabelTable {
        let texts: Vec<&str> = documents.iter().map(Document::embedding_text).collect();
        let stats = TermStatistics::fit(&texts, self.tfidf);
        debug!("Term vocabulary: {} terms", stats.vocabulary().len());

        let coarse_members = group_members(coarse_ids.iter().map(CoarseId::index), params.coarse_count);
        let fine_members = group_members(fine_ids.iter().map(FineId::index), params.fine_count);

        let table = LabelTable {
            coarse: self.level_labels(&stats, documents, &coarse_members, &self.coarse_prefix),
            fine: self.level_labels(&stats, documents, &fine_members, &self.fine_prefix),
        };
        info!(
            "Labeled {} coarse and {} fine clusters{}",
            table.coarse.len(),
            table.fine.len(),
            if self.rewriter.is_some() { " (refined)" } else { "" }
        );
        table
    }

    fn level_labels(
        &self,
        stats: &TermStatistics,
        documents: &[Document],
        members: &[Vec<usize>],
        prefix: &str,
    ) -> Vec<String> {
        members
            .iter()
            .enumerate()
            .map(|(id, docs)| {
                let id = id as u32;
                if docs.is_empty() {
                    return fallback_label(prefix, id);
                }
                let importance = stats.mean_importance(docs);
                let label = self
                    .synthesizer
                    .synthesize(&importance, stats.vocabulary(), prefix, id);
                match &self.rewriter {
                    Some(rewriter) => {
                        let samples: Vec<String> = docs
                            .iter()
                            .take(MAX_SAMPLES)
                            .map(|&doc| documents[doc].title())
                            .collect();
                        rewriter.rewrite(&label, &samples, self.max_label_len)
                    }
                    None => label,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelRefinementError;
    use crate::types::Coordinate2D;
    use crate::vector::{
        ClusteringError, HashedTextEmbedder, KMeansAssigner, LayoutError, TsneProjector, is_unit,
    };

    /// Uses fixed labels so the hierarchy is known in advance.
    struct FixedAssigner {
        coarse: Vec<u32>,
        fine: Vec<u32>,
    }

    impl ClusterAssigner for FixedAssigner {
        fn assign(&self, vectors: &[Vec<f32>], k: usize, _seed: u64) -> Result<Vec<u32>, ClusteringError> {
            let labels = if k == 2 { &self.coarse } else { &self.fine };
            assert_eq!(labels.len(), vectors.len());
            Ok(labels.clone())
        }
    }

    struct LineProjector;

    impl LayoutProjector for LineProjector {
        fn project(&self, vectors: &[Vec<f32>], _seed: u64) -> Result<Vec<Coordinate2D>, LayoutError> {
            Ok((0..vectors.len())
                .map(|i| Coordinate2D::new(i as f32, -(i as f32)))
                .collect())
        }
    }

    struct Shouting;

    impl LabelRewriter for Shouting {
        fn try_rewrite(&self, label: &str, samples: &[String]) -> Result<String, LabelRefinementError> {
            if label.contains("jazz") {
                Err(LabelRefinementError::Request("timeout".into()))
            } else {
                Ok(format!("{} ({})", label.to_uppercase(), samples.len()))
            }
        }
    }

    fn corpus() -> Vec<Document> {
        [
            ("Senate passes budget bill", "Lawmakers approve federal budget."),
            ("Budget talks stall in Senate", "Federal budget negotiations continue."),
            ("Jazz festival opens downtown", "Musicians celebrate jazz traditions."),
            ("Jazz legends return", "Festival crowds cheer jazz legends."),
            ("Senate votes on budget", "Budget vote expected Friday."),
        ]
        .iter()
        .enumerate()
        .map(|(i, (h, a))| Document::new(i as u64, Some(h.to_string()), Some(a.to_string())))
        .collect()
    }

    fn fixed_builder() -> IndexBuilder {
        IndexBuilder::new(
            Arc::new(HashedTextEmbedder::new()),
            Arc::new(FixedAssigner {
                coarse: vec![0, 0, 1, 1, 0],
                fine: vec![0, 0, 1, 1, 0],
            }),
            Arc::new(LineProjector),
        )
    }

    fn params(coarse: usize, fine: usize) -> BuildParams {
        BuildParams {
            coarse_count: coarse,
            fine_count: fine,
            ..BuildParams::default()
        }
    }

    #[test]
    fn test_build_produces_consistent_snapshot() {
        let snapshot = fixed_builder().build(corpus(), &params(2, 3)).unwrap();

        assert_eq!(snapshot.document_count(), 5);
        assert!(snapshot.embeddings.rows().all(is_unit));
        assert!(snapshot.coarse_ids.iter().all(|c| c.index() < 2));
        assert!(snapshot.fine_ids.iter().all(|f| f.index() < 3));
        assert_eq!(snapshot.parents[2], crate::types::ParentAssignment::Unassigned);
        assert_eq!(snapshot.labels.fine[2], "Cluster 2");
        assert!(snapshot.labels.fine[0].contains("budget"));
        assert!(snapshot.labels.fine[1].contains("jazz"));
        assert_eq!(snapshot.bounds.x_max, 4.0);
        assert_eq!(snapshot.bounds.y_min, -4.0);
    }

    #[test]
    fn test_rewriter_failures_fall_back() {
        let builder = fixed_builder().with_rewriter(Arc::new(Shouting), 80);
        let snapshot = builder.build(corpus(), &params(2, 3)).unwrap();

        assert!(snapshot.labels.fine[0].ends_with("(3)"));
        assert_eq!(snapshot.labels.fine[0], snapshot.labels.fine[0].to_uppercase());
        assert!(snapshot.labels.fine[1].contains("jazz"));
        assert!(!snapshot.labels.fine[1].contains('('));
        // Empty clusters are never sent to the rewriter
        assert_eq!(snapshot.labels.fine[2], "Cluster 2");
    }

    #[test]
    fn test_empty_corpus_and_zero_counts_fail() {
        let builder = fixed_builder();
        assert!(matches!(
            builder.build(Vec::new(), &params(2, 3)),
            Err(IndexError::BuildFailed { .. })
        ));
        assert!(matches!(
            builder.build(corpus(), &params(0, 3)),
            Err(IndexError::BuildFailed { .. })
        ));
    }

    #[test]
    fn test_too_many_clusters_is_fatal() {
        let builder = IndexBuilder::new(
            Arc::new(HashedTextEmbedder::new()),
            Arc::new(KMeansAssigner::new()),
            Arc::new(TsneProjector::new(2.0, 50)),
        );
        assert!(matches!(
            builder.build(corpus(), &params(2, 9)),
            Err(IndexError::ClusteringFailed(_))
        ));
    }

    #[test]
    fn test_empty_text_embedding_is_fatal() {
        let mut docs = corpus();
        docs.push(Document {
            text: String::new(),
            ..Document::new(9, None, None)
        });
        assert!(matches!(
            fixed_builder().build(docs, &params(2, 3)),
            Err(IndexError::BuildFailed { .. })
        ));
    }

    #[test]
    fn test_real_pipeline_is_reproducible() {
        let builder = IndexBuilder::new(
            Arc::new(HashedTextEmbedder::new()),
            Arc::new(KMeansAssigner::new()),
            Arc::new(TsneProjector::new(2.0, 100)),
        );
        let a = builder.build(corpus(), &params(2, 3)).unwrap();
        let b = builder.build(corpus(), &params(2, 3)).unwrap();
        assert_eq!(a.parents, b.parents);
        assert_eq!(a.fine_ids, b.fine_ids);
        assert_eq!(a.coordinates, b.coordinates);
        assert_eq!(a.labels, b.labels);
    }
}
