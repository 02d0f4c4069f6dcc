//! K-means clustering used for the coarse and fine partitions.
//!
//! This module provides a pure Rust implementation of K-means clustering
//! over unit-normalized sentence embeddings. It uses cosine similarity as the
//! distance metric and K-means++ for centroid initialization.
//!
//! # Algorithm Details
//! - Distance metric: Cosine similarity (not Euclidean)
//! - Initialization: K-means++ driven by an explicit seed
//! - Max iterations: 100 (configurable)
//! - Convergence tolerance: 1e-4
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs on the rayon pool

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::vector::cosine_similarity;

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Partitions embeddings into a fixed number of groups.
///
/// Returned labels are dense cluster indices in `[0, k)`, one per input
/// vector. Identical inputs and seed must give identical labels.
pub trait ClusterAssigner: Send + Sync {
    fn assign(&self, vectors: &[Vec<f32>], k: usize, seed: u64)
    -> Result<Vec<u32>, ClusteringError>;
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster index for each input vector.
    pub assignments: Vec<u32>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error(
        "Invalid cluster count: {requested} for {available} vectors\nSuggestion: Use k between 1 and the number of documents"
    )]
    InvalidClusterCount { requested: usize, available: usize },

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,
}

/// Seeded K-means++ / Lloyd clustering over cosine similarity.
#[derive(Debug, Clone)]
pub struct KMeansAssigner {
    max_iterations: usize,
}

impl Default for KMeansAssigner {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
        }
    }
}

impl KMeansAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

impl ClusterAssigner for KMeansAssigner {
    fn assign(
        &self,
        vectors: &[Vec<f32>],
        k: usize,
        seed: u64,
    ) -> Result<Vec<u32>, ClusteringError> {
        kmeans_clustering(vectors, k, seed, self.max_iterations).map(|result| result.assignments)
    }
}

/// Performs K-means clustering on a set of vectors using cosine similarity.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `k` - Number of clusters (must be >= 1 and <= number of vectors)
/// * `seed` - Seed for centroid initialization and empty-cluster reseeding
///
/// # Algorithm
/// 1. Initialize centroids using K-means++ method
/// 2. Iterate until convergence or max iterations:
///    - Assign each vector to nearest centroid (by cosine similarity)
///    - Update centroids as mean of assigned vectors
///    - Check convergence based on centroid movement
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[Vec<f32>],
    k: usize,
    seed: u64,
    max_iterations: usize,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount {
            requested: k,
            available: vectors.len(),
        });
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng);
    let mut assignments = vec![u32::MAX; vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        // Assignment step: assign each vector to nearest centroid
        let new_assignments: Vec<u32> = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= max_iterations {
            break;
        }

        // Update step: recompute centroids
        let new_centroids = update_centroids(vectors, &assignments, k, &mut rng);

        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            // Centroids moved; labels must reflect the final positions.
            assignments = vectors
                .par_iter()
                .map(|vector| assign_to_nearest_centroid(vector, &centroids))
                .collect();
            break;
        }
    }

    if iterations >= max_iterations {
        warn!("K-means did not fully converge after {max_iterations} iterations (k={k})");
    } else {
        debug!("K-means converged after {iterations} iterations (k={k})");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Assigns a vector to the nearest centroid based on cosine similarity.
///
/// Ties go to the lowest centroid index.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> u32 {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    best_cluster as u32
}

/// Updates centroids as the mean of their assigned vectors.
fn update_centroids(
    vectors: &[Vec<f32>],
    assignments: &[u32],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster as usize;
        for (i, &value) in vector.iter().enumerate() {
            new_centroids[idx][i] += value;
        }
        cluster_sizes[idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random member
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = normalize_vector_copy(&vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize_vector(centroid);
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
///
/// When every remaining point coincides with a chosen centroid the rest are
/// filled with uniformly drawn points, so exactly `k` centroids come back.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(normalize_vector_copy(&vectors[first_idx]));

    // Squared cosine distance to the nearest chosen centroid
    let mut distances: Vec<f32> = vectors
        .iter()
        .map(|v| squared_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total_distance: f32 = distances.iter().sum();

        let next_idx = if total_distance < EPSILON {
            rng.random_range(0..vectors.len())
        } else {
            let target = rng.random::<f32>() * total_distance;
            let mut cumulative = 0.0;
            let mut chosen = vectors.len() - 1;
            for (i, &distance) in distances.iter().enumerate() {
                cumulative += distance;
                if cumulative >= target && distance > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = normalize_vector_copy(&vectors[next_idx]);
        for (distance, vector) in distances.iter_mut().zip(vectors.iter()) {
            *distance = distance.min(squared_distance(vector, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn squared_distance(vector: &[f32], centroid: &[f32]) -> f32 {
    let distance = (1.0 - cosine_similarity(vector, centroid)).max(0.0);
    distance * distance
}

/// Calculates the mean movement of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| 1.0 - cosine_similarity(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

/// Normalizes a vector in-place to unit length.
fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector.
fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three well-separated blobs on the unit circle.
    fn blobs() -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for (cx, cy) in [(1.0f32, 0.0f32), (-0.5, 0.86), (-0.5, -0.86)] {
            for j in 0..5 {
                let jitter = j as f32 * 0.01;
                let mut v = vec![cx + jitter, cy - jitter, 0.0];
                normalize_vector(&mut v);
                vectors.push(v);
            }
        }
        vectors
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let vectors = blobs();
        let result = kmeans_clustering(&vectors, 3, 42, MAX_ITERATIONS).unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 15);
        for group in result.assignments.chunks(5) {
            assert!(group.iter().all(|&c| c == group[0]));
        }
        let mut distinct: Vec<u32> = result.assignments.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_same_seed_same_labels() {
        let vectors = blobs();
        let assigner = KMeansAssigner::new();
        let a = assigner.assign(&vectors, 4, 7).unwrap();
        let b = assigner.assign(&vectors, 4, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&c| c < 4));
    }

    #[test]
    fn test_invalid_inputs() {
        let vectors = blobs();
        assert!(matches!(
            kmeans_clustering(&[], 2, 0, MAX_ITERATIONS),
            Err(ClusteringError::EmptyVectorSet)
        ));
        assert!(matches!(
            kmeans_clustering(&vectors, 0, 0, MAX_ITERATIONS),
            Err(ClusteringError::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            kmeans_clustering(&vectors, 16, 0, MAX_ITERATIONS),
            Err(ClusteringError::InvalidClusterCount { .. })
        ));

        let ragged = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(matches!(
            kmeans_clustering(&ragged, 1, 0, MAX_ITERATIONS),
            Err(ClusteringError::DimensionMismatch)
        ));
    }

    #[test]
    fn test_coincident_points_still_yield_k_centroids() {
        let vectors = vec![vec![1.0, 0.0]; 6];
        let result = kmeans_clustering(&vectors, 3, 1, MAX_ITERATIONS).unwrap();
        assert_eq!(result.centroids.len(), 3);
        assert!(result.assignments.iter().all(|&c| c < 3));
    }

    #[test]
    fn test_assign_ties_go_to_lowest_index() {
        let centroids = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        assert_eq!(assign_to_nearest_centroid(&[1.0, 0.0], &centroids), 0);
    }
}
