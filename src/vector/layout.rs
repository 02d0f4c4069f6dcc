//! 2-D layout projection for the document map.
//!
//! Exact t-SNE over the embedding matrix. Coordinates are display-only and
//! never feed back into ranking.
//!
//! # Algorithm Details
//! - Affinities: Gaussian kernel per point, bandwidth found by binary search
//!   so the conditional entropy matches `ln(perplexity)`
//! - Low-dimensional kernel: Student-t with one degree of freedom
//! - Optimizer: gradient descent with momentum and per-coordinate gains,
//!   early exaggeration for the first 250 iterations
//!
//! # Performance Characteristics
//! - O(n^2) memory for the affinity matrix, O(n^2) time per iteration
//! - Rows of the gradient run on the rayon pool; reductions are sequential
//!   so results are identical across runs and thread counts

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::types::Coordinate2D;

/// Default perplexity; clamped to `n - 1` for small inputs.
pub const DEFAULT_PERPLEXITY: f32 = 35.0;

/// Default number of optimization iterations.
pub const DEFAULT_ITERATIONS: usize = 1000;

const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERATIONS: usize = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const MIN_LEARNING_RATE: f64 = 50.0;
const INIT_STD: f64 = 1e-4;
const MIN_AFFINITY: f64 = 1e-12;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;

/// Projects embeddings into two dimensions.
pub trait LayoutProjector: Send + Sync {
    fn project(&self, vectors: &[Vec<f32>], seed: u64) -> Result<Vec<Coordinate2D>, LayoutError>;
}

/// Errors that can occur during layout projection.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Empty vector set provided for layout")]
    EmptyVectorSet,

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error("Invalid layout parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Layout diverged: coordinate for document at position {index} is not finite")]
    Diverged { index: usize },
}

/// Exact t-SNE projector.
#[derive(Debug, Clone)]
pub struct TsneProjector {
    perplexity: f32,
    iterations: usize,
}

impl Default for TsneProjector {
    fn default() -> Self {
        Self {
            perplexity: DEFAULT_PERPLEXITY,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl TsneProjector {
    pub fn new(perplexity: f32, iterations: usize) -> Self {
        Self {
            perplexity,
            iterations,
        }
    }

    pub fn perplexity(&self) -> f32 {
        self.perplexity
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

impl LayoutProjector for TsneProjector {
    fn project(&self, vectors: &[Vec<f32>], seed: u64) -> Result<Vec<Coordinate2D>, LayoutError> {
        if vectors.is_empty() {
            return Err(LayoutError::EmptyVectorSet);
        }
        let dimension = vectors[0].len();
        if vectors.iter().any(|v| v.len() != dimension) {
            return Err(LayoutError::DimensionMismatch);
        }
        if !(self.perplexity.is_finite() && self.perplexity > 0.0) {
            return Err(LayoutError::InvalidParameter {
                name: "perplexity",
                value: f64::from(self.perplexity),
            });
        }
        if self.iterations == 0 {
            return Err(LayoutError::InvalidParameter {
                name: "iterations",
                value: 0.0,
            });
        }

        let n = vectors.len();
        if n == 1 {
            return Ok(vec![Coordinate2D::new(0.0, 0.0)]);
        }

        let perplexity = f64::from(self.perplexity).min((n - 1) as f64);
        let distances = squared_distances(vectors);
        let affinities = joint_affinities(&distances, n, perplexity);
        drop(distances);

        let learning_rate = (n as f64 / EARLY_EXAGGERATION / 4.0).max(MIN_LEARNING_RATE);
        debug!(
            "t-SNE: n={n}, perplexity={perplexity:.1}, learning_rate={learning_rate:.1}, iterations={}",
            self.iterations
        );

        let positions = optimize(&affinities, n, self.iterations, learning_rate, seed);

        positions
            .chunks_exact(2)
            .enumerate()
            .map(|(index, point)| {
                let coordinate = Coordinate2D::new(point[0] as f32, point[1] as f32);
                if coordinate.is_finite() {
                    Ok(coordinate)
                } else {
                    Err(LayoutError::Diverged { index })
                }
            })
            .collect()
    }
}

/// Dense row-major matrix of squared Euclidean distances.
fn squared_distances(vectors: &[Vec<f32>]) -> Vec<f64> {
    let n = vectors.len();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            vectors
                .iter()
                .map(|other| {
                    vectors[i]
                        .iter()
                        .zip(other.iter())
                        .map(|(a, b)| {
                            let d = f64::from(*a) - f64::from(*b);
                            d * d
                        })
                        .sum()
                })
                .collect()
        })
        .collect();
    rows.into_iter().flatten().collect()
}

/// Symmetrized joint probabilities `P = (P_cond + P_cond^T) / 2n`.
fn joint_affinities(distances: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let target_entropy = perplexity.ln();
    let conditional: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| conditional_row(&distances[i * n..(i + 1) * n], i, target_entropy))
        .collect();

    let mut joint = vec![0.0f64; n * n];
    let scale = 2.0 * n as f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                joint[i * n + j] = ((conditional[i][j] + conditional[j][i]) / scale).max(MIN_AFFINITY);
            }
        }
    }
    joint
}

/// Binary search for the Gaussian precision that hits the target entropy.
fn conditional_row(distances: &[f64], i: usize, target_entropy: f64) -> Vec<f64> {
    let mut beta = 1.0f64;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut row = vec![0.0f64; distances.len()];

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum = 0.0;
        for (j, &d) in distances.iter().enumerate() {
            row[j] = if j == i { 0.0 } else { (-d * beta).exp() };
            sum += row[j];
        }
        if sum <= 0.0 {
            sum = f64::MIN_POSITIVE;
        }

        let mut weighted = 0.0;
        for (j, value) in row.iter_mut().enumerate() {
            *value /= sum;
            weighted += distances[j] * *value;
        }
        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - target_entropy;

        if diff.abs() <= PERPLEXITY_TOLERANCE {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }

    row
}

/// Gradient descent on the KL divergence. Returns interleaved `x, y` pairs.
fn optimize(p: &[f64], n: usize, iterations: usize, learning_rate: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions: Vec<f64> = (0..n * 2).map(|_| gaussian(&mut rng) * INIT_STD).collect();
    let mut updates = vec![0.0f64; n * 2];
    let mut gains = vec![1.0f64; n * 2];

    for iteration in 0..iterations {
        let (exaggeration, momentum) = if iteration < EXAGGERATION_ITERATIONS {
            (EARLY_EXAGGERATION, INITIAL_MOMENTUM)
        } else {
            (1.0, FINAL_MOMENTUM)
        };

        let gradient = gradient(p, &positions, n, exaggeration);

        for k in 0..n * 2 {
            let same_direction = (gradient[k] > 0.0) == (updates[k] > 0.0);
            gains[k] = if same_direction {
                (gains[k] * 0.8).max(MIN_GAIN)
            } else {
                gains[k] + 0.2
            };
            updates[k] = momentum * updates[k] - learning_rate * gains[k] * gradient[k];
            positions[k] += updates[k];
        }

        recenter(&mut positions, n);
    }

    positions
}

fn gradient(p: &[f64], positions: &[f64], n: usize, exaggeration: f64) -> Vec<f64> {
    let kernel = |i: usize, j: usize| {
        let dx = positions[2 * i] - positions[2 * j];
        let dy = positions[2 * i + 1] - positions[2 * j + 1];
        1.0 / (1.0 + dx * dx + dy * dy)
    };

    let row_sums: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| (0..n).filter(|&j| j != i).map(|j| kernel(i, j)).sum())
        .collect();
    let z = row_sums.iter().sum::<f64>().max(f64::MIN_POSITIVE);

    let rows: Vec<[f64; 2]> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for j in 0..n {
                if j == i {
                    continue;
                }
                let q_num = kernel(i, j);
                let force = (exaggeration * p[i * n + j] - q_num / z) * q_num;
                gx += force * (positions[2 * i] - positions[2 * j]);
                gy += force * (positions[2 * i + 1] - positions[2 * j + 1]);
            }
            [4.0 * gx, 4.0 * gy]
        })
        .collect();

    rows.into_iter().flatten().collect()
}

fn recenter(positions: &mut [f64], n: usize) {
    let (mut mx, mut my) = (0.0, 0.0);
    for point in positions.chunks_exact(2) {
        mx += point[0];
        my += point[1];
    }
    mx /= n as f64;
    my /= n as f64;
    for point in positions.chunks_exact_mut(2) {
        point[0] -= mx;
        point[1] -= my;
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for i in 0..6 {
            vectors.push(vec![1.0, 0.05 * i as f32, 0.0]);
        }
        for i in 0..6 {
            vectors.push(vec![0.0, 0.05 * i as f32, 1.0]);
        }
        vectors
    }

    fn distance(a: Coordinate2D, b: Coordinate2D) -> f32 {
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    }

    #[test]
    fn test_single_point_is_origin() {
        let projector = TsneProjector::default();
        let coords = projector.project(&[vec![0.3, 0.4]], 1).unwrap();
        assert_eq!(coords, vec![Coordinate2D::new(0.0, 0.0)]);
    }

    #[test]
    fn test_projection_is_seeded_and_finite() {
        let projector = TsneProjector::new(5.0, 300);
        let vectors = two_groups();
        let a = projector.project(&vectors, 44).unwrap();
        let b = projector.project(&vectors, 44).unwrap();

        assert_eq!(a.len(), vectors.len());
        assert_eq!(a, b);
        assert!(a.iter().all(Coordinate2D::is_finite));
    }

    #[test]
    fn test_groups_stay_apart() {
        let projector = TsneProjector::new(4.0, 500);
        let coords = projector.project(&two_groups(), 7).unwrap();

        let mean_within: f32 = (1..6).map(|i| distance(coords[0], coords[i])).sum::<f32>() / 5.0;
        let mean_across: f32 = (6..12).map(|i| distance(coords[0], coords[i])).sum::<f32>() / 6.0;
        assert!(mean_within < mean_across);
    }

    #[test]
    fn test_rejects_bad_input() {
        let projector = TsneProjector::default();
        assert!(matches!(
            projector.project(&[], 0),
            Err(LayoutError::EmptyVectorSet)
        ));
        assert!(matches!(
            projector.project(&[vec![1.0], vec![1.0, 2.0]], 0),
            Err(LayoutError::DimensionMismatch)
        ));
        assert!(TsneProjector::new(0.0, 10).project(&two_groups(), 0).is_err());
    }

    #[test]
    fn test_conditional_row_sums_to_one() {
        let distances = vec![0.0, 1.0, 4.0, 9.0];
        let row = conditional_row(&distances, 0, 2.0f64.ln());
        assert_eq!(row[0], 0.0);
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(row[1] > row[2] && row[2] > row[3]);
    }
}
