//! Hierarchy construction: parent assignment, centroids and map nodes.
//!
//! The coarse and fine partitions are clustered independently, so they are
//! not nested. Each fine cluster is attached to the coarse cluster that most
//! of its members belong to; ties go to the lowest coarse id.

use serde::{Deserialize, Serialize};

use crate::types::{ClusterLevel, CoarseId, Coordinate2D, FineId, ParentAssignment};

/// Glyph size for a cluster with `member_count` members.
///
/// Monotonic and sub-linear; display only.
pub fn size_weight(member_count: usize) -> f32 {
    5.0 + (member_count as f32).ln_1p() * 8.0
}

/// Resolve the parent of every fine cluster by majority vote.
///
/// Returns one entry per fine id in `[0, fine_count)`. Fine clusters without
/// members are [`ParentAssignment::Unassigned`].
///
/// # Panics
/// Panics if the id arrays differ in length or an id is out of range; callers
/// validate both before voting.
pub fn assign_parents(
    coarse_ids: &[CoarseId],
    fine_ids: &[FineId],
    coarse_count: usize,
    fine_count: usize,
) -> Vec<ParentAssignment> {
    assert_eq!(coarse_ids.len(), fine_ids.len(), "id arrays must align");
    if coarse_count == 0 {
        return vec![ParentAssignment::Unassigned; fine_count];
    }

    let mut votes = vec![0usize; fine_count * coarse_count];
    for (coarse, fine) in coarse_ids.iter().zip(fine_ids.iter()) {
        votes[fine.index() * coarse_count + coarse.index()] += 1;
    }

    votes
        .chunks(coarse_count)
        .take(fine_count)
        .map(|row| {
            let mut best: Option<(usize, usize)> = None;
            for (coarse, &count) in row.iter().enumerate() {
                if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
                    best = Some((coarse, count));
                }
            }
            match best {
                Some((coarse, _)) => ParentAssignment::Assigned(CoarseId(coarse as u32)),
                None => ParentAssignment::Unassigned,
            }
        })
        .collect()
}

/// Document positions grouped by cluster id, in document order.
pub fn group_members<I>(ids: I, count: usize) -> Vec<Vec<usize>>
where
    I: IntoIterator<Item = usize>,
{
    let mut members = vec![Vec::new(); count];
    for (document, id) in ids.into_iter().enumerate() {
        members[id].push(document);
    }
    members
}

/// Mean coordinate of the given documents, `None` when there are none.
pub fn centroid(members: &[usize], coordinates: &[Coordinate2D]) -> Option<Coordinate2D> {
    if members.is_empty() {
        return None;
    }
    let (sx, sy) = members.iter().fold((0.0f64, 0.0f64), |(sx, sy), &i| {
        (sx + f64::from(coordinates[i].x), sy + f64::from(coordinates[i].y))
    });
    let n = members.len() as f64;
    Some(Coordinate2D::new((sx / n) as f32, (sy / n) as f32))
}

/// Global extent of the map.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MapBounds {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl MapBounds {
    /// Exact min/max over all coordinates; all zeros for an empty slice.
    pub fn from_coordinates(coordinates: &[Coordinate2D]) -> Self {
        let Some(first) = coordinates.first() else {
            return Self::default();
        };
        coordinates.iter().skip(1).fold(
            Self {
                x_min: first.x,
                x_max: first.x,
                y_min: first.y,
                y_max: first.y,
            },
            |bounds, c| Self {
                x_min: bounds.x_min.min(c.x),
                x_max: bounds.x_max.max(c.x),
                y_min: bounds.y_min.min(c.y),
                y_max: bounds.y_max.max(c.y),
            },
        )
    }
}

/// One glyph on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: u32,
    pub level: ClusterLevel,
    pub label: String,
    pub centroid_x: f32,
    pub centroid_y: f32,
    pub size_weight: f32,
    pub member_count: usize,
    /// Set for fine nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ParentAssignment>,
}

/// Map nodes for one level. Clusters without members are skipped; their ids
/// stay reserved.
pub fn build_nodes(
    level: ClusterLevel,
    members: &[Vec<usize>],
    coordinates: &[Coordinate2D],
    labels: &[String],
    parents: Option<&[ParentAssignment]>,
) -> Vec<ClusterNode> {
    members
        .iter()
        .enumerate()
        .filter_map(|(id, docs)| {
            let center = centroid(docs, coordinates)?;
            Some(ClusterNode {
                id: id as u32,
                level,
                label: labels[id].clone(),
                centroid_x: center.x,
                centroid_y: center.y,
                size_weight: size_weight(docs.len()),
                member_count: docs.len(),
                parent_id: parents.map(|p| p[id]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coarse(ids: &[u32]) -> Vec<CoarseId> {
        ids.iter().map(|&i| CoarseId(i)).collect()
    }

    fn fine(ids: &[u32]) -> Vec<FineId> {
        ids.iter().map(|&i| FineId(i)).collect()
    }

    #[test]
    fn test_parent_is_majority_coarse() {
        let parents = assign_parents(
            &coarse(&[0, 1, 1, 2, 2, 2]),
            &fine(&[0, 0, 0, 1, 1, 1]),
            3,
            2,
        );
        assert_eq!(
            parents,
            vec![
                ParentAssignment::Assigned(CoarseId(1)),
                ParentAssignment::Assigned(CoarseId(2)),
            ]
        );
    }

    #[test]
    fn test_parent_ties_go_to_lowest_coarse_id() {
        let parents = assign_parents(&coarse(&[3, 1, 3, 1]), &fine(&[0, 0, 0, 0]), 4, 1);
        assert_eq!(parents, vec![ParentAssignment::Assigned(CoarseId(1))]);
    }

    #[test]
    fn test_empty_fine_cluster_is_unassigned_and_stable() {
        let c = coarse(&[0, 1]);
        let f = fine(&[0, 2]);
        let first = assign_parents(&c, &f, 2, 3);
        assert_eq!(first[1], ParentAssignment::Unassigned);
        for _ in 0..5 {
            assert_eq!(assign_parents(&c, &f, 2, 3), first);
        }
    }

    #[test]
    fn test_bounds_are_global_extremes() {
        let coords = vec![
            Coordinate2D::new(0.0, 0.0),
            Coordinate2D::new(10.0, -5.0),
            Coordinate2D::new(-2.0, 8.0),
        ];
        let bounds = MapBounds::from_coordinates(&coords);
        assert_eq!(
            bounds,
            MapBounds {
                x_min: -2.0,
                x_max: 10.0,
                y_min: -5.0,
                y_max: 8.0,
            }
        );
        assert_eq!(MapBounds::from_coordinates(&[]), MapBounds::default());
    }

    #[test]
    fn test_size_weight_is_monotonic_and_sublinear() {
        assert_eq!(size_weight(0), 5.0);
        assert!(size_weight(10) > size_weight(9));
        assert!(size_weight(200) - size_weight(100) < size_weight(100) - size_weight(0));
    }

    #[test]
    fn test_build_nodes_skips_empty_clusters() {
        let coords = vec![
            Coordinate2D::new(0.0, 0.0),
            Coordinate2D::new(2.0, 4.0),
            Coordinate2D::new(9.0, 9.0),
        ];
        let members = group_members([0usize, 0, 2], 3);
        assert_eq!(members, vec![vec![0, 1], vec![], vec![2]]);

        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let parents = vec![
            ParentAssignment::Assigned(CoarseId(0)),
            ParentAssignment::Unassigned,
            ParentAssignment::Assigned(CoarseId(1)),
        ];
        let nodes = build_nodes(ClusterLevel::Fine, &members, &coords, &labels, Some(&parents));

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, 0);
        assert_eq!((nodes[0].centroid_x, nodes[0].centroid_y), (1.0, 2.0));
        assert_eq!(nodes[0].member_count, 2);
        assert_eq!(nodes[1].id, 2);
        assert_eq!(nodes[1].parent_id, Some(ParentAssignment::Assigned(CoarseId(1))));
    }
}
