//! The immutable index snapshot: unit of persistence and of atomic load.

use serde::{Deserialize, Serialize};

use crate::corpus::Document;
use crate::error::{IndexError, IndexResult};
use crate::index::hierarchy::{ClusterNode, MapBounds, assign_parents, build_nodes, group_members};
use crate::types::{ClusterLevel, CoarseId, Coordinate2D, FineId, ParentAssignment};
use crate::vector::{NORM_TOLERANCE, l2_norm};

/// Current on-disk snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Row-major embedding matrix, one unit-normalized row per document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Wrap flat row-major data. Fails when `data` is not a whole number of rows.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> IndexResult<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(IndexError::corrupt(format!(
                "embedding data of length {} is not a multiple of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    /// Stack rows; all rows must share one dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> IndexResult<Self> {
        let dimension = rows.first().map(Vec::len).unwrap_or_default();
        if let Some(bad) = rows.iter().position(|row| row.len() != dimension) {
            return Err(IndexError::corrupt(format!(
                "embedding row {bad} has dimension {}, expected {dimension}",
                rows[bad].len()
            )));
        }
        Ok(Self {
            dimension,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

/// Current label of every reserved cluster id, populated or not.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelTable {
    pub coarse: Vec<String>,
    pub fine: Vec<String>,
}

impl LabelTable {
    pub fn coarse_label(&self, id: CoarseId) -> Option<&str> {
        self.coarse.get(id.index()).map(String::as_str)
    }

    pub fn fine_label(&self, id: FineId) -> Option<&str> {
        self.fine.get(id.index()).map(String::as_str)
    }
}

/// Build provenance, stored as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub model_name: String,
    pub dimension: usize,
    pub document_count: usize,
    pub coarse_count: usize,
    pub fine_count: usize,
    /// UTC, RFC 3339.
    pub created_at: String,
}

/// Everything one build produces.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub metadata: SnapshotMetadata,
    pub documents: Vec<Document>,
    pub embeddings: EmbeddingMatrix,
    pub coarse_ids: Vec<CoarseId>,
    pub fine_ids: Vec<FineId>,
    /// One entry per fine id.
    pub parents: Vec<ParentAssignment>,
    pub coordinates: Vec<Coordinate2D>,
    pub coarse_nodes: Vec<ClusterNode>,
    pub fine_nodes: Vec<ClusterNode>,
    pub labels: LabelTable,
    pub bounds: MapBounds,
}

/// Per-document inputs of [`IndexSnapshot::assemble`].
#[derive(Debug, Clone)]
pub struct SnapshotParts {
    pub model_name: String,
    pub documents: Vec<Document>,
    pub embeddings: EmbeddingMatrix,
    pub coarse_ids: Vec<CoarseId>,
    pub fine_ids: Vec<FineId>,
    pub coordinates: Vec<Coordinate2D>,
    pub coarse_count: usize,
    pub fine_count: usize,
    pub labels: LabelTable,
}

impl IndexSnapshot {
    /// Derive parents, nodes and bounds from per-document assignments, then
    /// validate the result.
    pub fn assemble(parts: SnapshotParts) -> IndexResult<Self> {
        let SnapshotParts {
            model_name,
            documents,
            embeddings,
            coarse_ids,
            fine_ids,
            coordinates,
            coarse_count,
            fine_count,
            labels,
        } = parts;

        check_alignment(
            documents.len(),
            &[
                ("embedding matrix", embeddings.len()),
                ("coarse id array", coarse_ids.len()),
                ("fine id array", fine_ids.len()),
                ("coordinate array", coordinates.len()),
            ],
        )?;
        check_ranges(&coarse_ids, &fine_ids, coarse_count, fine_count)?;
        check_label_table(&labels, coarse_count, fine_count)?;

        let parents = assign_parents(&coarse_ids, &fine_ids, coarse_count, fine_count);
        let coarse_members = group_members(coarse_ids.iter().map(CoarseId::index), coarse_count);
        let fine_members = group_members(fine_ids.iter().map(FineId::index), fine_count);

        let coarse_nodes = build_nodes(
            ClusterLevel::Coarse,
            &coarse_members,
            &coordinates,
            &labels.coarse,
            None,
        );
        let fine_nodes = build_nodes(
            ClusterLevel::Fine,
            &fine_members,
            &coordinates,
            &labels.fine,
            Some(&parents),
        );

        let snapshot = Self {
            metadata: SnapshotMetadata {
                format_version: SNAPSHOT_FORMAT_VERSION,
                model_name,
                dimension: embeddings.dimension(),
                document_count: documents.len(),
                coarse_count,
                fine_count,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            bounds: MapBounds::from_coordinates(&coordinates),
            documents,
            embeddings,
            coarse_ids,
            fine_ids,
            parents,
            coordinates,
            coarse_nodes,
            fine_nodes,
            labels,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn coarse_count(&self) -> usize {
        self.metadata.coarse_count
    }

    pub fn fine_count(&self) -> usize {
        self.metadata.fine_count
    }

    /// Document positions whose fine id is `fine_id`, in document order.
    pub fn fine_members(&self, fine_id: FineId) -> Vec<usize> {
        self.fine_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == fine_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Check every alignment and range invariant.
    ///
    /// Any violation is [`IndexError::SnapshotCorrupt`].
    pub fn validate(&self) -> IndexResult<()> {
        let meta = &self.metadata;
        if self.documents.is_empty() {
            return Err(IndexError::corrupt("snapshot contains no documents"));
        }
        check_alignment(
            self.documents.len(),
            &[
                ("metadata document count", meta.document_count),
                ("embedding matrix", self.embeddings.len()),
                ("coarse id array", self.coarse_ids.len()),
                ("fine id array", self.fine_ids.len()),
                ("coordinate array", self.coordinates.len()),
            ],
        )?;
        if self.embeddings.dimension() != meta.dimension {
            return Err(IndexError::corrupt(format!(
                "embedding dimension {} does not match metadata dimension {}",
                self.embeddings.dimension(),
                meta.dimension
            )));
        }
        if self.parents.len() != meta.fine_count {
            return Err(IndexError::corrupt(format!(
                "parent array has {} entries, expected {}",
                self.parents.len(),
                meta.fine_count
            )));
        }
        check_ranges(
            &self.coarse_ids,
            &self.fine_ids,
            meta.coarse_count,
            meta.fine_count,
        )?;
        check_label_table(&self.labels, meta.coarse_count, meta.fine_count)?;

        let expected = assign_parents(
            &self.coarse_ids,
            &self.fine_ids,
            meta.coarse_count,
            meta.fine_count,
        );
        if let Some(fine) = (0..expected.len()).find(|&f| expected[f] != self.parents[f]) {
            return Err(IndexError::corrupt(format!(
                "parent of fine cluster {fine} is {:?}, member votes give {:?}",
                self.parents[fine], expected[fine]
            )));
        }

        for (level, nodes, count) in [
            (ClusterLevel::Coarse, &self.coarse_nodes, meta.coarse_count),
            (ClusterLevel::Fine, &self.fine_nodes, meta.fine_count),
        ] {
            if let Some(node) = nodes
                .iter()
                .find(|node| node.level != level || node.id as usize >= count)
            {
                return Err(IndexError::corrupt(format!(
                    "{level} node list contains invalid node {} ({})",
                    node.id, node.level
                )));
            }
        }

        if let Some(row) = self
            .embeddings
            .rows()
            .position(|row| (l2_norm(row) - 1.0).abs() > NORM_TOLERANCE)
        {
            return Err(IndexError::corrupt(format!(
                "embedding {row} is not unit-normalized"
            )));
        }
        Ok(())
    }
}

fn check_alignment(expected: usize, arrays: &[(&str, usize)]) -> IndexResult<()> {
    for (name, len) in arrays {
        if *len != expected {
            return Err(IndexError::corrupt(format!(
                "{name} has {len} entries, expected {expected}"
            )));
        }
    }
    Ok(())
}

fn check_ranges(
    coarse_ids: &[CoarseId],
    fine_ids: &[FineId],
    coarse_count: usize,
    fine_count: usize,
) -> IndexResult<()> {
    if let Some((doc, id)) = coarse_ids
        .iter()
        .enumerate()
        .find(|(_, id)| id.index() >= coarse_count)
    {
        return Err(IndexError::corrupt(format!(
            "document {doc} has coarse id {id}, outside [0, {coarse_count})"
        )));
    }
    if let Some((doc, id)) = fine_ids
        .iter()
        .enumerate()
        .find(|(_, id)| id.index() >= fine_count)
    {
        return Err(IndexError::corrupt(format!(
            "document {doc} has fine id {id}, outside [0, {fine_count})"
        )));
    }
    Ok(())
}

fn check_label_table(labels: &LabelTable, coarse_count: usize, fine_count: usize) -> IndexResult<()> {
    check_alignment(coarse_count, &[("coarse label table", labels.coarse.len())])?;
    check_alignment(fine_count, &[("fine label table", labels.fine.len())])
}
