//! Index building and the persisted snapshot.
//!
//! The builder owns every entity while it runs and hands the finished
//! [`IndexSnapshot`] to [`SnapshotPersistence`]. Snapshots are never updated
//! in place; a rebuild replaces the whole directory.

mod builder;
mod hierarchy;
mod persistence;
mod snapshot;

pub use builder::{
    BuildParams, BuildSeeds, DEFAULT_COARSE_COUNT, DEFAULT_COARSE_PREFIX, DEFAULT_EMBED_BATCH_SIZE,
    DEFAULT_FINE_COUNT, DEFAULT_FINE_PREFIX, IndexBuilder,
};
pub use hierarchy::{
    ClusterNode, MapBounds, assign_parents, build_nodes, centroid, group_members, size_weight,
};
pub use persistence::SnapshotPersistence;
pub use snapshot::{
    EmbeddingMatrix, IndexSnapshot, LabelTable, SNAPSHOT_FORMAT_VERSION, SnapshotMetadata,
    SnapshotParts,
};

#[cfg(test)]
pub(crate) use snapshot::tests::sample_parts;
