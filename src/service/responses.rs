//! Response types returned by the similarity service.
//!
//! Each type serializes for `--json` output and renders as a table through
//! `Display`.

use std::fmt;

use serde::Serialize;

use crate::corpus::Document;
use crate::display::{THEME, TableBuilder, truncate_cell};
use crate::index::{ClusterNode, MapBounds};
use crate::types::{CoarseId, Coordinate2D, FineId, ParentAssignment};
use crate::vector::Score;

const TITLE_WIDTH: usize = 70;

/// One document with its position in the hierarchy and on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentHit {
    pub document: Document,
    pub coarse_id: CoarseId,
    pub fine_id: FineId,
    pub coordinate: Coordinate2D,
    /// Similarity to the query; absent for plain membership listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
}

impl DocumentHit {
    fn cells(&self) -> Vec<String> {
        vec![
            self.document.id.to_string(),
            truncate_cell(&self.document.title(), TITLE_WIDTH),
            self.coarse_id.to_string(),
            self.fine_id.to_string(),
        ]
    }
}

fn hit_table(hits: &[DocumentHit]) -> String {
    let scored = hits.iter().any(|hit| hit.score.is_some());
    let mut headers = vec!["Id", "Title", "Coarse", "Fine"];
    if scored {
        headers.insert(0, "Score");
    }
    hits.iter()
        .fold(TableBuilder::new().set_headers(headers), |table, hit| {
            match hit.score {
                Some(score) if scored => table.add_scored_row(score.get(), hit.cells()),
                _ => table.add_row(hit.cells()),
            }
        })
        .build()
}

/// Ranked search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<DocumentHit>,
}

impl fmt::Display for SearchResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} results for \"{}\"", self.hits.len(), self.query)?;
        write!(f, "{}", hit_table(&self.hits))
    }
}

/// A fine cluster with its parent and every member.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMembers {
    pub fine_id: FineId,
    pub label: String,
    pub parent: ParentAssignment,
    pub parent_label: Option<String>,
    pub members: Vec<DocumentHit>,
}

impl fmt::Display for ClusterMembers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", THEME.cluster_heading("Cluster", self.fine_id, &self.label))?;
        writeln!(f, "Parent:  {}", parent_text(self.parent, self.parent_label.as_deref()))?;
        writeln!(f, "Members: {}", THEME.apply(&THEME.number, self.members.len()))?;
        write!(f, "{}", hit_table(&self.members))
    }
}

/// Neighbor-vote assignment of free text to a fine cluster.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub fine_id: FineId,
    pub label: String,
    pub parent: ParentAssignment,
    pub parent_label: Option<String>,
    /// Neighbors that voted for `fine_id`.
    pub votes: usize,
    pub neighbors: Vec<DocumentHit>,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} of {} neighbors)",
            THEME.cluster_heading("Cluster", self.fine_id, &self.label),
            THEME.apply(&THEME.number, self.votes),
            self.neighbors.len()
        )?;
        writeln!(f, "Parent:  {}", parent_text(self.parent, self.parent_label.as_deref()))?;
        write!(f, "{}", hit_table(&self.neighbors))
    }
}

fn parent_text(parent: ParentAssignment, label: Option<&str>) -> String {
    match (parent.coarse(), label) {
        (Some(id), Some(label)) => THEME.cluster_heading("Topic", id, label),
        (Some(id), None) => format!("Topic {}", THEME.apply(&THEME.number, id)),
        (None, _) => THEME.apply(&THEME.muted, "unassigned"),
    }
}

/// Every map node plus the global bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    pub coarse_nodes: Vec<ClusterNode>,
    pub fine_nodes: Vec<ClusterNode>,
    pub bounds: MapBounds,
}

impl fmt::Display for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = TableBuilder::new().set_headers(vec!["Topic", "Cluster", "Label", "Docs"]);
        for coarse in &self.coarse_nodes {
            table = table.add_row(vec![
                coarse.id.to_string(),
                String::new(),
                coarse.label.clone(),
                coarse.member_count.to_string(),
            ]);
            let parent = Some(ParentAssignment::Assigned(CoarseId(coarse.id)));
            for fine in self.fine_nodes.iter().filter(|node| node.parent_id == parent) {
                table = table.add_row(vec![
                    String::new(),
                    fine.id.to_string(),
                    format!("  {}", fine.label),
                    fine.member_count.to_string(),
                ]);
            }
        }
        let summary = format!(
            "{} topics, {} clusters",
            self.coarse_nodes.len(),
            self.fine_nodes.len()
        );
        writeln!(f, "{}", THEME.apply(&THEME.header, summary))?;
        writeln!(f, "{}", table.build())?;
        let bounds = format!(
            "Bounds: x [{:.2}, {:.2}]  y [{:.2}, {:.2}]",
            self.bounds.x_min, self.bounds.x_max, self.bounds.y_min, self.bounds.y_max
        );
        write!(f, "{}", THEME.apply(&THEME.muted, bounds))
    }
}
