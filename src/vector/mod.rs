//! Embedding vectors and the numeric stages of an index build.
//!
//! This module provides the embedding generators, the k-means cluster
//! assigner and the t-SNE layout projector. Each stage is a trait so the
//! builder can be driven by test doubles.
//!
//! # Invariants
//! - Stored vectors are unit-normalized, so dot product equals cosine similarity
//! - Cluster labels are dense indices in `[0, k)`
//! - Every stage takes an explicit seed; identical inputs give identical outputs

mod clustering;
mod embedding;
mod layout;
mod types;

pub use clustering::{
    ClusterAssigner, ClusteringError, KMeansAssigner, KMeansResult, assign_to_nearest_centroid,
    kmeans_clustering,
};
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HASHED_DIMENSION, HASHED_MODEL_PREFIX,
    HashedTextEmbedder, LazyEmbedder, create_embedder, parse_embedding_model,
};
pub use layout::{
    DEFAULT_ITERATIONS, DEFAULT_PERPLEXITY, LayoutError, LayoutProjector, TsneProjector,
};
pub use types::{
    NORM_TOLERANCE, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError, cosine_similarity,
    dot, is_unit, l2_norm, normalize_embedding,
};
