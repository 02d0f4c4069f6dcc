//! Snapshot persistence.
//!
//! A snapshot is a directory:
//! - `metadata.json`: format version, model, dimension, counts, timestamp
//! - `documents.json`: document records with nullable metadata fields
//! - `clusters.json`: id arrays, parents, coordinates, nodes, labels, bounds
//! - `embeddings.vec`: binary embedding matrix
//!
//! # Vector File Format
//! - Header (16 bytes): magic `KMAP`, version, dimension, vector count (u32 LE)
//! - Vectors: contiguous little-endian f32 rows
//!
//! Saving writes a sibling temp directory, then swaps it in with two renames:
//! the old snapshot moves aside, the new one moves into place. Files are
//! never rewritten in place, but `base_path` is briefly absent between the
//! renames, so a concurrent `load` may fail with `LoadError` and should retry.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::corpus::Document;
use crate::error::{IndexError, IndexResult};
use crate::index::hierarchy::{ClusterNode, MapBounds};
use crate::index::snapshot::{EmbeddingMatrix, IndexSnapshot, LabelTable, SNAPSHOT_FORMAT_VERSION, SnapshotMetadata};
use crate::types::{CoarseId, Coordinate2D, FineId, ParentAssignment};

const METADATA_FILE: &str = "metadata.json";
const DOCUMENTS_FILE: &str = "documents.json";
const CLUSTERS_FILE: &str = "clusters.json";
const VECTORS_FILE: &str = "embeddings.vec";

/// Magic bytes identifying an embedding file.
const MAGIC_BYTES: &[u8; 4] = b"KMAP";

/// Current vector file version.
const VECTOR_FILE_VERSION: u32 = 1;

const HEADER_SIZE: usize = 16;
const BYTES_PER_F32: usize = 4;

/// Per-cluster contents of `clusters.json`.
#[derive(Debug, Serialize, Deserialize)]
struct ClusterFile {
    coarse_ids: Vec<CoarseId>,
    fine_ids: Vec<FineId>,
    parents: Vec<ParentAssignment>,
    coordinates: Vec<Coordinate2D>,
    coarse_nodes: Vec<ClusterNode>,
    fine_nodes: Vec<ClusterNode>,
    labels: LabelTable,
    bounds: MapBounds,
}

/// Reads and writes snapshots under one directory.
#[derive(Debug, Clone)]
pub struct SnapshotPersistence {
    base_path: PathBuf,
}

impl SnapshotPersistence {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Whether a snapshot has been written here.
    pub fn exists(&self) -> bool {
        self.base_path.join(METADATA_FILE).exists()
    }

    /// Write `snapshot`, atomically replacing any previous one.
    #[must_use = "Save errors should be handled to ensure data is persisted"]
    pub fn save(&self, snapshot: &IndexSnapshot) -> IndexResult<()> {
        snapshot.validate()?;

        let parent = self
            .base_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| IndexError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".knowmap-staging-")
            .tempdir_in(parent)
            .map_err(|source| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;

        write_json(&staging.path().join(METADATA_FILE), &snapshot.metadata)?;
        write_json(&staging.path().join(DOCUMENTS_FILE), &snapshot.documents)?;
        write_json(
            &staging.path().join(CLUSTERS_FILE),
            &ClusterFile {
                coarse_ids: snapshot.coarse_ids.clone(),
                fine_ids: snapshot.fine_ids.clone(),
                parents: snapshot.parents.clone(),
                coordinates: snapshot.coordinates.clone(),
                coarse_nodes: snapshot.coarse_nodes.clone(),
                fine_nodes: snapshot.fine_nodes.clone(),
                labels: snapshot.labels.clone(),
                bounds: snapshot.bounds,
            },
        )?;
        write_vectors(&staging.path().join(VECTORS_FILE), &snapshot.embeddings)?;

        self.swap_in(parent, staging)?;

        info!(
            "Saved snapshot ({} documents) to {}",
            snapshot.document_count(),
            self.base_path.display()
        );
        Ok(())
    }

    /// Move the staged directory to `base_path`, retiring any previous
    /// snapshot into a uniquely named sibling that is removed afterwards.
    ///
    /// On failure the previous snapshot is put back and the staged directory
    /// is removed when `staging` drops.
    fn swap_in(&self, parent: &Path, staging: tempfile::TempDir) -> IndexResult<()> {
        let retired_root = tempfile::Builder::new()
            .prefix(".knowmap-retired-")
            .tempdir_in(parent)
            .map_err(|source| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        let retired = retired_root.path().join("snapshot");

        let had_previous = self.base_path.exists();
        if had_previous {
            std::fs::rename(&self.base_path, &retired).map_err(|e| self.persist_error(e))?;
        }
        if let Err(e) = std::fs::rename(staging.path(), &self.base_path) {
            if had_previous {
                if let Err(rollback) = std::fs::rename(&retired, &self.base_path) {
                    warn!(
                        "Could not restore previous snapshot from {}: {rollback}",
                        retired.display()
                    );
                    // Leave the old snapshot on disk for manual recovery
                    let _ = retired_root.keep();
                }
            }
            return Err(self.persist_error(e));
        }

        // The staged path has moved; disarm its guard
        let _ = staging.keep();
        if let Err(e) = retired_root.close() {
            debug!("Could not remove retired snapshot: {e}");
        }
        Ok(())
    }

    /// Load and validate a snapshot.
    pub fn load(&self) -> IndexResult<IndexSnapshot> {
        if !self.exists() {
            return Err(IndexError::LoadError {
                path: self.base_path.clone(),
                source: format!("no snapshot found (missing {METADATA_FILE})").into(),
            });
        }

        let metadata: SnapshotMetadata = self.read_json(METADATA_FILE)?;
        if metadata.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(IndexError::corrupt(format!(
                "snapshot format version {} is not supported (expected {SNAPSHOT_FORMAT_VERSION})",
                metadata.format_version
            )));
        }
        let documents: Vec<Document> = self.read_json(DOCUMENTS_FILE)?;
        let clusters: ClusterFile = self.read_json(CLUSTERS_FILE)?;
        let embeddings = self.read_vectors()?;

        let snapshot = IndexSnapshot {
            metadata,
            documents,
            embeddings,
            coarse_ids: clusters.coarse_ids,
            fine_ids: clusters.fine_ids,
            parents: clusters.parents,
            coordinates: clusters.coordinates,
            coarse_nodes: clusters.coarse_nodes,
            fine_nodes: clusters.fine_nodes,
            labels: clusters.labels,
            bounds: clusters.bounds,
        };
        snapshot.validate()?;

        info!(
            "Loaded snapshot ({} documents, {} coarse / {} fine clusters) from {}",
            snapshot.document_count(),
            snapshot.coarse_count(),
            snapshot.fine_count(),
            self.base_path.display()
        );
        Ok(snapshot)
    }

    /// Only the metadata file, for `info`-style reporting.
    pub fn load_metadata(&self) -> IndexResult<SnapshotMetadata> {
        self.read_json(METADATA_FILE)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> IndexResult<T> {
        let path = self.base_path.join(name);
        let content = std::fs::read_to_string(&path).map_err(|e| IndexError::LoadError {
            path: path.clone(),
            source: Box::new(e),
        })?;
        serde_json::from_str(&content)
            .map_err(|e| IndexError::corrupt(format!("{name}: {e}")))
    }

    fn read_vectors(&self) -> IndexResult<EmbeddingMatrix> {
        let path = self.base_path.join(VECTORS_FILE);
        let file = File::open(&path).map_err(|e| IndexError::LoadError {
            path: path.clone(),
            source: Box::new(e),
        })?;
        // SAFETY: the file is only ever replaced by directory rename, never
        // modified in place, and the map is dropped before this returns.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IndexError::LoadError {
            path: path.clone(),
            source: Box::new(e),
        })?;
        decode_vectors(&mmap)
    }

    fn persist_error(&self, e: std::io::Error) -> IndexError {
        IndexError::PersistenceError {
            path: self.base_path.clone(),
            source: Box::new(e),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> IndexResult<()> {
    let file = File::create(path).map_err(|source| IndexError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| IndexError::PersistenceError {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;
    writer.flush().map_err(|source| IndexError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn write_vectors(path: &Path, matrix: &EmbeddingMatrix) -> IndexResult<()> {
    let io_error = |source| IndexError::FileWrite {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encode_header(matrix)?).map_err(io_error)?;
    for value in matrix.as_flat() {
        writer.write_all(&value.to_le_bytes()).map_err(io_error)?;
    }
    writer.flush().map_err(io_error)
}

fn encode_header(matrix: &EmbeddingMatrix) -> IndexResult<[u8; HEADER_SIZE]> {
    let to_u32 = |value: usize, what: &str| {
        u32::try_from(value)
            .map_err(|_| IndexError::General(format!("{what} {value} does not fit the vector file header")))
    };
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(MAGIC_BYTES);
    header[4..8].copy_from_slice(&VECTOR_FILE_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&to_u32(matrix.dimension(), "dimension")?.to_le_bytes());
    header[12..16].copy_from_slice(&to_u32(matrix.len(), "vector count")?.to_le_bytes());
    Ok(header)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decode a vector file, rejecting any malformed or truncated content.
fn decode_vectors(bytes: &[u8]) -> IndexResult<EmbeddingMatrix> {
    if bytes.len() < HEADER_SIZE {
        return Err(IndexError::corrupt(format!(
            "{VECTORS_FILE} is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(IndexError::corrupt(format!("{VECTORS_FILE} has bad magic bytes")));
    }
    let version = read_u32(bytes, 4);
    if version != VECTOR_FILE_VERSION {
        return Err(IndexError::corrupt(format!(
            "{VECTORS_FILE} version {version} is not supported (expected {VECTOR_FILE_VERSION})"
        )));
    }
    let dimension = read_u32(bytes, 8) as usize;
    let count = read_u32(bytes, 12) as usize;

    let expected = dimension
        .checked_mul(count)
        .and_then(|values| values.checked_mul(BYTES_PER_F32))
        .and_then(|body| body.checked_add(HEADER_SIZE));
    if expected != Some(bytes.len()) {
        return Err(IndexError::corrupt(format!(
            "{VECTORS_FILE} declares {count} vectors of dimension {dimension} but holds {} bytes",
            bytes.len()
        )));
    }

    let data: Vec<f32> = bytes[HEADER_SIZE..]
        .chunks_exact(BYTES_PER_F32)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    EmbeddingMatrix::from_flat(dimension, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::snapshot::tests::sample_parts;
    use tempfile::TempDir;

    fn saved() -> (TempDir, SnapshotPersistence, IndexSnapshot) {
        let dir = TempDir::new().unwrap();
        let persistence = SnapshotPersistence::new(dir.path().join("index"));
        let snapshot = IndexSnapshot::assemble(sample_parts()).unwrap();
        persistence.save(&snapshot).unwrap();
        (dir, persistence, snapshot)
    }

    #[test]
    fn test_save_then_load_preserves_snapshot() {
        let (_dir, persistence, snapshot) = saved();
        let loaded = persistence.load().unwrap();

        assert_eq!(loaded.metadata, snapshot.metadata);
        assert_eq!(loaded.documents, snapshot.documents);
        assert_eq!(loaded.embeddings, snapshot.embeddings);
        assert_eq!(loaded.parents, snapshot.parents);
        assert_eq!(loaded.fine_nodes, snapshot.fine_nodes);
        assert_eq!(loaded.labels, snapshot.labels);
        assert_eq!(loaded.bounds, snapshot.bounds);
    }

    #[test]
    fn test_parents_persist_with_sentinel() {
        let (_dir, persistence, _) = saved();
        let raw = std::fs::read_to_string(persistence.path().join(CLUSTERS_FILE)).unwrap();
        assert!(raw.contains("\"parents\":[0,1,-1]"));
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let (dir, persistence, _) = saved();
        let mut parts = sample_parts();
        parts.labels.fine[0] = "Renamed".into();
        persistence
            .save(&IndexSnapshot::assemble(parts).unwrap())
            .unwrap();

        assert_eq!(persistence.load().unwrap().labels.fine[0], "Renamed");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name() != "index")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_stale_retired_dir_does_not_block_save() {
        let (dir, persistence, _) = saved();
        let stale = dir
            .path()
            .join(format!(".knowmap-retired-{}", std::process::id()));
        std::fs::create_dir_all(stale.join("snapshot")).unwrap();
        std::fs::write(stale.join("snapshot").join(METADATA_FILE), "{}").unwrap();

        for label in ["First", "Second"] {
            let mut parts = sample_parts();
            parts.labels.fine[0] = label.into();
            persistence
                .save(&IndexSnapshot::assemble(parts).unwrap())
                .unwrap();
            assert_eq!(persistence.load().unwrap().labels.fine[0], label);
        }

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        // Only the unrelated leftover survives; nothing staged or retired leaks
        assert_eq!(
            names,
            vec![
                format!(".knowmap-retired-{}", std::process::id()),
                "index".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_snapshot_is_load_error() {
        let dir = TempDir::new().unwrap();
        let persistence = SnapshotPersistence::new(dir.path().join("nothing"));
        assert!(matches!(persistence.load(), Err(IndexError::LoadError { .. })));
    }

    #[test]
    fn test_truncated_vectors_are_corrupt() {
        let (_dir, persistence, _) = saved();
        let path = persistence.path().join(VECTORS_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            persistence.load(),
            Err(IndexError::SnapshotCorrupt { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut bytes = encode_header(&EmbeddingMatrix::from_flat(1, vec![1.0]).unwrap())
            .unwrap()
            .to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        assert!(decode_vectors(&bytes).is_ok());
        bytes[0] = b'X';
        assert!(decode_vectors(&bytes).is_err());
    }

    #[test]
    fn test_mismatched_cluster_arrays_are_corrupt() {
        let (_dir, persistence, _) = saved();
        let path = persistence.path().join(CLUSTERS_FILE);
        let mut clusters: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        clusters["fine_ids"].as_array_mut().unwrap().pop();
        std::fs::write(&path, clusters.to_string()).unwrap();

        let err = persistence.load().unwrap_err();
        assert!(matches!(err, IndexError::SnapshotCorrupt { .. }));
    }

    #[test]
    fn test_missing_field_is_corrupt() {
        let (_dir, persistence, _) = saved();
        std::fs::write(persistence.path().join(CLUSTERS_FILE), "{\"coarse_ids\": []}").unwrap();
        assert!(matches!(
            persistence.load(),
            Err(IndexError::SnapshotCorrupt { .. })
        ));
    }
}
