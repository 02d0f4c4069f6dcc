//! Embedding generation for documents and queries.
//!
//! This module provides the trait and implementations for turning text into
//! unit-normalized vectors. The builder and the similarity service share one
//! generator so query vectors are produced exactly like corpus vectors.

use crate::vector::{VECTOR_DIMENSION_384, VectorDimension, VectorError, normalize_embedding};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Dimension of the offline hashed embedder.
pub const HASHED_DIMENSION: usize = 256;

/// Model-name prefix of [`HashedTextEmbedder`], followed by its dimension.
pub const HASHED_MODEL_PREFIX: &str = "hashed-chars-";

/// Trait for generating embeddings from text.
///
/// Implementations of this trait should be thread-safe and deterministic for
/// a fixed model and input.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    ///
    /// # Returns
    /// A vector of embeddings, one for each input text, or an error
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Name recorded in snapshot metadata.
    fn model_name(&self) -> String;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.generate_embeddings(&[text])?
            .into_iter()
            .next()
            .ok_or(VectorError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

/// Parse a configured model name into a fastembed model.
///
/// Accepts both the enum-style names and the sentence-transformers codes.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name.trim() {
        "AllMiniLML6V2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        }
        "AllMiniLML12V2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok(EmbeddingModel::AllMiniLML12V2)
        }
        "BGESmallENV15" | "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" | "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" | "intfloat/multilingual-e5-small" => {
            Ok(EmbeddingModel::MultilingualE5Small)
        }
        other => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small"
        ))),
    }
}

/// FastEmbed implementation, AllMiniLML6V2 by default.
///
/// # Performance
/// - Batch processing: ~1-10ms per embedding on average
/// - Memory: 384 * 4 bytes = 1536 bytes per embedding
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    model_name: String,
}

impl FastEmbedGenerator {
    /// Create a new FastEmbed generator with AllMiniLML6V2 model.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(cache_dir: PathBuf) -> Result<Self, VectorError> {
        Self::with_model("AllMiniLML6V2", cache_dir, false)
    }

    /// Create a generator for a configured model name.
    ///
    /// The dimension is probed with a test embedding rather than assumed.
    pub fn with_model(
        name: &str,
        cache_dir: PathBuf,
        show_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(name)?;
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        let probe = text_model
            .embed(vec!["test"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let dimension = probe
            .first()
            .map(|v| v.len())
            .unwrap_or(VECTOR_DIMENSION_384);

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
            model_name: name.trim().to_string(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // fastembed expects owned strings
        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        if embeddings.len() != texts.len() {
            return Err(VectorError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }
        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

/// Offline, model-free embedder.
///
/// Each character code adds `(code % 13) / 13` to bucket `code % dimension`,
/// and the result is unit-normalized. Crude but deterministic, which makes it
/// the embedder for offline builds and tests.
#[derive(Debug, Clone)]
pub struct HashedTextEmbedder {
    dimension: VectorDimension,
}

impl Default for HashedTextEmbedder {
    fn default() -> Self {
        Self {
            dimension: VectorDimension::new_unchecked(HASHED_DIMENSION),
        }
    }
}

impl HashedTextEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let size = self.dimension.get();
        let mut vector = vec![0.0f32; size];
        for ch in text.trim().chars() {
            let code = ch as usize;
            vector[code % size] += (code % 13) as f32 / 13.0;
        }
        // Empty input stays a zero vector; callers decide how to treat it.
        let _ = normalize_embedding(&mut vector);
        vector
    }
}

impl EmbeddingGenerator for HashedTextEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        format!("{HASHED_MODEL_PREFIX}{}", self.dimension.get())
    }
}

/// Construct the embedder recorded under `model_name`.
///
/// `hashed-chars-<dim>` selects the offline embedder; anything else is a
/// fastembed model name.
pub fn create_embedder(
    model_name: &str,
    cache_dir: PathBuf,
    show_progress: bool,
) -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
    if let Some(dim) = model_name.trim().strip_prefix(HASHED_MODEL_PREFIX) {
        let dim = dim.parse::<usize>().map_err(|_| {
            VectorError::EmbeddingFailed(format!("Invalid hashed embedder name '{model_name}'"))
        })?;
        return Ok(Arc::new(HashedTextEmbedder::with_dimension(
            VectorDimension::new(dim)?,
        )));
    }
    Ok(Arc::new(FastEmbedGenerator::with_model(
        model_name,
        cache_dir,
        show_progress,
    )?))
}

/// Embedder whose model is constructed on the first embedding request.
///
/// Commands that never embed (map, cluster listings) skip the model load.
pub struct LazyEmbedder {
    model_name: String,
    dimension: VectorDimension,
    cache_dir: PathBuf,
    show_progress: bool,
    inner: OnceLock<Result<Arc<dyn EmbeddingGenerator>, String>>,
}

impl LazyEmbedder {
    /// `dimension` is what the model is expected to produce; a model that
    /// disagrees fails every request.
    pub fn new(
        model_name: impl Into<String>,
        dimension: VectorDimension,
        cache_dir: PathBuf,
        show_progress: bool,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            cache_dir,
            show_progress,
            inner: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.get().is_some()
    }

    fn get(&self) -> Result<&Arc<dyn EmbeddingGenerator>, VectorError> {
        self.inner
            .get_or_init(|| {
                let embedder =
                    create_embedder(&self.model_name, self.cache_dir.clone(), self.show_progress)
                        .map_err(|e| e.to_string())?;
                if embedder.dimension() != self.dimension {
                    return Err(format!(
                        "model '{}' produces {} dims, expected {}",
                        self.model_name,
                        embedder.dimension().get(),
                        self.dimension.get()
                    ));
                }
                Ok(embedder)
            })
            .as_ref()
            .map_err(|reason| VectorError::EmbeddingFailed(reason.clone()))
    }
}

impl EmbeddingGenerator for LazyEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.get()?.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}
