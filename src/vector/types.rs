//! Type-safe wrappers and core types for embedding vectors.
//!
//! Every stored embedding is unit-normalized, so the dot product of two
//! stored vectors is their cosine similarity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard vector dimension for sentence embeddings (all-MiniLM-L6-v2 model).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Allowed deviation from unit length for stored vectors.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// Norms below this are treated as degenerate.
const EPSILON: f32 = 1e-10;

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions
/// to prevent dimension mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a dimension from a known non-zero constant.
    ///
    /// # Panics
    /// Panics if `dim` is zero. Use `new()` for fallible construction.
    #[must_use]
    pub const fn new_unchecked(dim: usize) -> Self {
        assert!(dim > 0, "VectorDimension cannot be zero");
        Self(dim)
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Cosine similarity between a query and a stored vector.
///
/// Unit vectors give scores in `[-1.0, 1.0]`; 1.0 is identical direction.
/// Ordering is total, so scores can key a sort directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score`, rejecting NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        Ok(Self(value))
    }

    /// Wraps a dot product of two finite unit vectors.
    #[must_use]
    pub(crate) fn from_dot(value: f32) -> Self {
        Self(value)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error(
        "Degenerate vector (norm {norm}) cannot be normalized\nSuggestion: Check that the input text is not empty"
    )]
    DegenerateVector { norm: f32 },

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Embedding count mismatch: sent {expected} texts, got {actual} vectors\nSuggestion: This is likely a bug in the embedding backend"
    )]
    CountMismatch { expected: usize, actual: usize },
}

/// Returns the L2 norm of a vector.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Fails on zero, NaN or infinite norms; the vector is left untouched then.
pub fn normalize_embedding(vector: &mut [f32]) -> Result<(), VectorError> {
    let norm = l2_norm(vector);
    if !norm.is_finite() || norm < EPSILON {
        return Err(VectorError::DegenerateVector { norm });
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes cosine similarity between two vectors of arbitrary length.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

/// Checks the unit-length invariant for a stored vector.
pub fn is_unit(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= NORM_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(384).unwrap();
        assert_eq!(dim.get(), 384);
        assert_eq!(VectorDimension::dimension_384().get(), 384);
        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&[0.1; 384]).is_ok());
        assert!(dim.validate_vector(&[0.1; 100]).is_err());
    }

    #[test]
    fn test_score_ordering() {
        let high = Score::new(0.9).unwrap();
        let low = Score::new(-0.2).unwrap();
        assert!(high > low);
        assert!(Score::new(f32::NAN).is_err());
        assert_eq!(Score::from_dot(0.5).get(), 0.5);
    }

    #[test]
    fn test_normalize_embedding() {
        let mut v = vec![3.0, 4.0];
        normalize_embedding(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(is_unit(&v));
    }

    #[test]
    fn test_normalize_rejects_degenerate() {
        let mut zero = vec![0.0; 4];
        assert!(matches!(
            normalize_embedding(&mut zero),
            Err(VectorError::DegenerateVector { .. })
        ));

        let mut nan = vec![f32::NAN, 1.0];
        assert!(normalize_embedding(&mut nan).is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let x = vec![1.0, 0.0];
        let y = vec![0.0, 1.0];
        assert!(cosine_similarity(&x, &y).abs() < f32::EPSILON);

        let neg = vec![-1.0, 0.0];
        assert!((cosine_similarity(&x, &neg) + 1.0).abs() < f32::EPSILON);

        assert_eq!(cosine_similarity(&[0.0, 0.0], &x), 0.0);
    }
}
