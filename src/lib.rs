//! Two-level topical maps over short-text corpora.
//!
//! A build embeds every document, clusters the corpus twice (coarse topics and
//! fine subtopics), attaches each fine cluster to a coarse parent by majority
//! vote, projects the documents to 2-D and labels every cluster. The result is
//! one immutable [`IndexSnapshot`] that a [`SimilarityService`] serves for
//! search, cluster listings and classification.

pub mod config;
pub mod corpus;
pub mod display;
pub mod error;
pub mod index;
pub mod io;
pub mod labels;
pub mod service;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use corpus::{Document, load_documents};
pub use error::{IndexError, IndexResult};
pub use index::{BuildParams, BuildSeeds, IndexBuilder, IndexSnapshot, SnapshotPersistence};
pub use labels::{LabelRewriter, LabelSynthesizer};
pub use service::{ServiceOptions, SimilarityService};
pub use types::{ClusterLevel, CoarseId, Coordinate2D, FineId, ParentAssignment};
