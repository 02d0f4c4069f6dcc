//! Similarity serving over a loaded snapshot.
//!
//! Search, cluster membership, neighbor-vote classification and the map
//! view. All queries read shared state only and may run concurrently.

mod responses;
mod similarity;

pub use responses::{Classification, ClusterMembers, DocumentHit, MapView, SearchResults};
pub use similarity::{
    DEFAULT_CLASSIFY_NEIGHBORS, DEFAULT_SEARCH_K, ServiceOptions, SimilarityService,
};
