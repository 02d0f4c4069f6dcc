//! Identifier newtypes and small value types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense id of a coarse (top-level) cluster, in `[0, coarse_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoarseId(pub u32);

/// Dense id of a fine (subtopic) cluster, in `[0, fine_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FineId(pub u32);

impl CoarseId {
    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl FineId {
    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoarseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parent of a fine cluster.
///
/// Persisted as a plain integer where `-1` marks a fine cluster that had
/// no members at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ParentAssignment {
    Assigned(CoarseId),
    Unassigned,
}

impl ParentAssignment {
    /// Sentinel used on the wire for [`ParentAssignment::Unassigned`].
    pub const SENTINEL: i64 = -1;

    pub fn coarse(&self) -> Option<CoarseId> {
        match self {
            Self::Assigned(id) => Some(*id),
            Self::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }
}

impl From<i64> for ParentAssignment {
    fn from(raw: i64) -> Self {
        match u32::try_from(raw) {
            Ok(id) => Self::Assigned(CoarseId(id)),
            Err(_) => Self::Unassigned,
        }
    }
}

impl From<ParentAssignment> for i64 {
    fn from(parent: ParentAssignment) -> i64 {
        match parent {
            ParentAssignment::Assigned(id) => i64::from(id.0),
            ParentAssignment::Unassigned => ParentAssignment::SENTINEL,
        }
    }
}

/// Display-only 2-D position of a document on the map.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

impl Coordinate2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Which level of the hierarchy a cluster belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterLevel {
    Coarse,
    Fine,
}

impl fmt::Display for ClusterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coarse => f.write_str("coarse"),
            Self::Fine => f.write_str("fine"),
        }
    }
}
