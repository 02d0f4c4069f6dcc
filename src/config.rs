//! Configuration for index builds and serving.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.knowmap/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `KM_` and use double underscores
//! to separate nested levels:
//! - `KM_BUILD__FINE_COUNT=60` sets `build.fine_count`
//! - `KM_EMBEDDING__OFFLINE=true` sets `embedding.offline`
//! - `KM_REFINE__ENABLED=true` sets `refine.enabled`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::corpus::DEFAULT_SAMPLE_SEED;
use crate::index::{
    BuildParams, BuildSeeds, DEFAULT_COARSE_COUNT, DEFAULT_COARSE_PREFIX,
    DEFAULT_EMBED_BATCH_SIZE, DEFAULT_FINE_COUNT, DEFAULT_FINE_PREFIX,
};
use crate::labels::{
    DEFAULT_BASE_URL, DEFAULT_MAX_FEATURES, DEFAULT_MAX_LABEL_LEN, DEFAULT_MAX_TERMS,
    DEFAULT_MODEL, DEFAULT_SEPARATOR, MAX_SAMPLES, TfIdfOptions,
};
use crate::service::{DEFAULT_CLASSIFY_NEIGHBORS, DEFAULT_SEARCH_K, ServiceOptions};
use crate::vector::{DEFAULT_ITERATIONS, DEFAULT_PERPLEXITY};

/// Directory holding the settings file and, by default, the index.
pub const CONFIG_DIR: &str = ".knowmap";

const ENV_PREFIX: &str = "KM_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Snapshot directory, relative to the workspace root
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .knowmap is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub labels: LabelsConfig,

    /// Optional external label rewriting
    #[serde(default)]
    pub refine: RefineConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Cluster counts and seeds for `build`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BuildConfig {
    #[serde(default = "default_coarse_count")]
    pub coarse_count: usize,

    #[serde(default = "default_fine_count")]
    pub fine_count: usize,

    #[serde(default = "default_coarse_seed")]
    pub coarse_seed: u64,

    #[serde(default = "default_fine_seed")]
    pub fine_seed: u64,

    #[serde(default = "default_layout_seed")]
    pub layout_seed: u64,

    /// Build from a seeded random subset of this many documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,

    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name, or `hashed-chars-<dim>`
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Use the model-free hashed embedder
    #[serde(default)]
    pub offline: bool,

    /// Model download cache; defaults to the user's data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LayoutConfig {
    #[serde(default = "default_perplexity")]
    pub perplexity: f32,

    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LabelsConfig {
    #[serde(default = "default_coarse_prefix")]
    pub coarse_prefix: String,

    #[serde(default = "default_fine_prefix")]
    pub fine_prefix: String,

    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default = "default_max_terms")]
    pub max_terms: usize,

    /// Vocabulary cap for term statistics
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    /// Words never used in labels, on top of the built-in list
    #[serde(default)]
    pub extra_denylist: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RefineConfig {
    /// Rewrite labels at build time
    #[serde(default)]
    pub enabled: bool,

    /// Rewrite labels once after loading, before serving
    #[serde(default)]
    pub on_load: bool,

    #[serde(default = "default_refine_model")]
    pub model: String,

    /// OpenAI-compatible API root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_label_len")]
    pub max_label_len: usize,

    /// Member titles sent per cluster (at most 5)
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seed for sampling titles after load
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Results returned when `-k` is not given
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Neighbors that vote in `classify`
    #[serde(default = "default_classify_neighbors")]
    pub classify_neighbors: usize,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_coarse_count() -> usize {
    DEFAULT_COARSE_COUNT
}
fn default_fine_count() -> usize {
    DEFAULT_FINE_COUNT
}
fn default_coarse_seed() -> u64 {
    BuildSeeds::default().coarse
}
fn default_fine_seed() -> u64 {
    BuildSeeds::default().fine
}
fn default_layout_seed() -> u64 {
    BuildSeeds::default().layout
}
fn default_sample_seed() -> u64 {
    DEFAULT_SAMPLE_SEED
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}
fn default_perplexity() -> f32 {
    DEFAULT_PERPLEXITY
}
fn default_iterations() -> usize {
    DEFAULT_ITERATIONS
}
fn default_coarse_prefix() -> String {
    DEFAULT_COARSE_PREFIX.to_string()
}
fn default_fine_prefix() -> String {
    DEFAULT_FINE_PREFIX.to_string()
}
fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}
fn default_max_terms() -> usize {
    DEFAULT_MAX_TERMS
}
fn default_max_features() -> usize {
    DEFAULT_MAX_FEATURES
}
fn default_refine_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_label_len() -> usize {
    DEFAULT_MAX_LABEL_LEN
}
fn default_sample_size() -> usize {
    MAX_SAMPLES
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_k() -> usize {
    DEFAULT_SEARCH_K
}
fn default_classify_neighbors() -> usize {
    DEFAULT_CLASSIFY_NEIGHBORS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            build: BuildConfig::default(),
            embedding: EmbeddingConfig::default(),
            layout: LayoutConfig::default(),
            labels: LabelsConfig::default(),
            refine: RefineConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            coarse_count: default_coarse_count(),
            fine_count: default_fine_count(),
            coarse_seed: default_coarse_seed(),
            fine_seed: default_fine_seed(),
            layout_seed: default_layout_seed(),
            sample_size: None,
            sample_seed: default_sample_seed(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            offline: false,
            cache_dir: None,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            perplexity: default_perplexity(),
            iterations: default_iterations(),
        }
    }
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            coarse_prefix: default_coarse_prefix(),
            fine_prefix: default_fine_prefix(),
            separator: default_separator(),
            max_terms: default_max_terms(),
            max_features: default_max_features(),
            extra_denylist: Vec::new(),
        }
    }
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_load: false,
            model: default_refine_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_label_len: default_max_label_len(),
            sample_size: default_sample_size(),
            timeout_secs: default_timeout_secs(),
            seed: 0,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            classify_neighbors: default_classify_neighbors(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscores stay
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a .knowmap directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .knowmap is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Check if configuration is properly initialized
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        match std::fs::read_to_string(&config_path) {
            Ok(content) => {
                if let Err(e) = toml::from_str::<Settings>(&content) {
                    return Err(format!(
                        "Configuration file is corrupted: {e}\nRun 'knowmap init --force' to regenerate."
                    ));
                }
            }
            Err(e) => {
                return Err(format!("Cannot read configuration file: {e}"));
            }
        }

        Ok(())
    }

    /// Snapshot directory, resolved against the workspace root when relative.
    pub fn resolved_index_path(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Model cache directory.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.embedding.cache_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
                .join("knowmap")
                .join("models")
        })
    }

    pub fn build_params(&self) -> BuildParams {
        BuildParams {
            coarse_count: self.build.coarse_count,
            fine_count: self.build.fine_count,
            seeds: BuildSeeds {
                coarse: self.build.coarse_seed,
                fine: self.build.fine_seed,
                layout: self.build.layout_seed,
            },
            embed_batch_size: self.embedding.batch_size,
        }
    }

    pub fn tfidf_options(&self) -> TfIdfOptions {
        TfIdfOptions {
            max_features: self.labels.max_features,
            ..TfIdfOptions::default()
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            classify_neighbors: self.search.classify_neighbors,
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, Self::template())?;
        Ok(config_path)
    }

    /// Commented settings file matching the defaults.
    pub fn template() -> String {
        let defaults = Settings::default();
        format!(
            r#"# knowmap configuration

# Version of the configuration schema
version = {version}

# Snapshot directory (relative to the workspace root)
index_path = "{index_path}"

# Global debug mode
debug = false

[build]
# Topic (coarse) and subtopic (fine) cluster counts
coarse_count = {coarse_count}
fine_count = {fine_count}

# Seeds for each randomized stage; identical input and seeds give identical maps
coarse_seed = {coarse_seed}
fine_seed = {fine_seed}
layout_seed = {layout_seed}

# Optional: build from a seeded random subset of the corpus
# sample_size = 8000
sample_seed = {sample_seed}

[embedding]
# fastembed model: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small
model = "{model}"
batch_size = {batch_size}

# Use the model-free hashed embedder (no download)
offline = false

# cache_dir = "/path/to/models"

[layout]
# t-SNE parameters; perplexity is clamped below the document count
perplexity = {perplexity:.1}
iterations = {iterations}

[labels]
coarse_prefix = "{coarse_prefix}"
fine_prefix = "{fine_prefix}"
separator = "{separator}"
max_terms = {max_terms}
max_features = {max_features}

# Extra words never used in labels
extra_denylist = []

[refine]
# Rewrite labels with an OpenAI-compatible model. Failures keep the synthesized label.
enabled = false
on_load = false
model = "{refine_model}"
base_url = "{base_url}"
api_key_env = "{api_key_env}"
max_label_len = {max_label_len}
sample_size = {sample_size}
timeout_secs = {timeout_secs}

[search]
default_k = {default_k}
classify_neighbors = {classify_neighbors}
"#,
            version = defaults.version,
            index_path = defaults.index_path.display(),
            coarse_count = defaults.build.coarse_count,
            fine_count = defaults.build.fine_count,
            coarse_seed = defaults.build.coarse_seed,
            fine_seed = defaults.build.fine_seed,
            layout_seed = defaults.build.layout_seed,
            sample_seed = defaults.build.sample_seed,
            model = defaults.embedding.model,
            batch_size = defaults.embedding.batch_size,
            perplexity = defaults.layout.perplexity,
            iterations = defaults.layout.iterations,
            coarse_prefix = defaults.labels.coarse_prefix,
            fine_prefix = defaults.labels.fine_prefix,
            separator = defaults.labels.separator,
            max_terms = defaults.labels.max_terms,
            max_features = defaults.labels.max_features,
            refine_model = defaults.refine.model,
            base_url = defaults.refine.base_url,
            api_key_env = defaults.refine.api_key_env,
            max_label_len = defaults.refine.max_label_len,
            sample_size = defaults.refine.sample_size,
            timeout_secs = defaults.refine.timeout_secs,
            default_k = defaults.search.default_k,
            classify_neighbors = defaults.search.classify_neighbors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".knowmap/index"));
        assert_eq!(settings.build.coarse_count, 8);
        assert_eq!(settings.build.fine_count, 40);
        assert_eq!(settings.search.classify_neighbors, 10);
        assert_eq!(settings.labels.fine_prefix, "Cluster");
        assert!(!settings.refine.enabled);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[build]
coarse_count = 4
fine_seed = 7

[labels]
extra_denylist = ["reuters"]

[refine]
enabled = true
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.build.coarse_count, 4);
        assert_eq!(settings.build.fine_seed, 7);
        assert_eq!(settings.labels.extra_denylist, vec!["reuters"]);
        assert!(settings.refine.enabled);
        // Untouched values keep their defaults
        assert_eq!(settings.build.fine_count, 40);
        assert_eq!(settings.refine.max_label_len, 60);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.build.fine_count = 12;
        settings.embedding.offline = true;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.build.fine_count, 12);
        assert!(loaded.embedding.offline);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let parsed: Settings = toml::from_str(&Settings::template()).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[layout]\niterations = 250\nperplexity = 12.0\n").unwrap();

        unsafe {
            std::env::set_var("KM_LAYOUT__ITERATIONS", "321");
        }
        let settings = Settings::load_from(&config_path).unwrap();
        unsafe {
            std::env::remove_var("KM_LAYOUT__ITERATIONS");
        }

        assert_eq!(settings.layout.iterations, 321);
        assert_eq!(settings.layout.perplexity, 12.0);
    }

    #[test]
    fn test_sample_size_from_toml() {
        let settings: Settings =
            toml::from_str("[build]\nsample_size = 8000\nsample_seed = 7\n").unwrap();
        assert_eq!(settings.build.sample_size, Some(8000));
        assert_eq!(settings.build.sample_seed, 7);
        assert_eq!(settings.build.coarse_count, 8);
    }

    #[test]
    fn test_derived_params() {
        let mut settings = Settings::default();
        settings.build.layout_seed = 99;
        settings.search.classify_neighbors = 3;
        settings.labels.max_features = 100;

        assert_eq!(settings.build_params().seeds.layout, 99);
        assert_eq!(settings.build.sample_size, None);
        assert_eq!(settings.build.sample_seed, 42);
        assert_eq!(settings.build_params().coarse_count, 8);
        assert_eq!(settings.service_options().classify_neighbors, 3);
        assert_eq!(settings.tfidf_options().max_features, 100);
    }

    #[test]
    fn test_index_path_resolves_against_workspace() {
        let mut settings = Settings {
            workspace_root: Some(PathBuf::from("/work")),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolved_index_path(),
            PathBuf::from("/work/.knowmap/index")
        );
        settings.index_path = PathBuf::from("/abs/index");
        assert_eq!(settings.resolved_index_path(), PathBuf::from("/abs/index"));
    }
}
