use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use geomedia_common::{EdgeTest, GeoReferenceTable, GeomediaError, NetworkThresholds};

use crate::null_model::ResidualCell;

/// A candidate edge: an entity pair with a size and a test value.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCandidate {
    pub source: String,
    pub target: String,
    pub size: f64,
    pub test: f64,
}

impl EdgeCandidate {
    pub fn new(source: impl Into<String>, target: impl Into<String>, size: f64, test: f64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            size,
            test,
        }
    }

    /// Observed co-occurrence as size, the chosen residual as test.
    pub fn from_residual(cell: &ResidualCell, test: EdgeTest) -> Self {
        let test = match test {
            EdgeTest::ChiResidual => cell.chi_residual,
            EdgeTest::RelResidual => cell.rel_residual,
            EdgeTest::AbsResidual => cell.abs_residual,
        };
        Self::new(cell.row.clone(), cell.col.clone(), cell.observed, test)
    }

    fn is_loop(&self) -> bool {
        self.source == self.target
    }

    fn is_canonical(&self) -> bool {
        self.source <= self.target
    }

    fn canonical(&self) -> Self {
        if self.is_canonical() {
            self.clone()
        } else {
            Self::new(self.target.clone(), self.source.clone(), self.size, self.test)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphNode {
    pub id: usize,
    pub code: String,
    /// Display name from the reference table, or the code itself.
    pub label: String,
    /// Sum of `size` over the edges touching this node.
    pub mass: f64,
    pub is_target: bool,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub size: f64,
    pub test: f64,
    /// `size` relative to the largest edge, in (0, 1].
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn node(&self, code: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.code == code)
    }
}

fn within_bounds(edge: &EdgeCandidate, t: &NetworkThresholds) -> bool {
    edge.size >= t.min_size
        && t.max_size.map_or(true, |max| edge.size <= max)
        && edge.test >= t.min_test
}

/// Collapse each unordered pair to one edge oriented from the smaller code.
/// An edge already in canonical orientation wins over its mirror.
fn fold_directions(edges: Vec<EdgeCandidate>) -> Vec<EdgeCandidate> {
    let mut pairs: BTreeMap<(String, String), (bool, EdgeCandidate)> = BTreeMap::new();
    for edge in edges.into_iter().filter(|e| !e.is_loop()) {
        let canonical = edge.canonical();
        let key = (canonical.source.clone(), canonical.target.clone());
        let replace = match pairs.get(&key) {
            None => true,
            Some((kept_canonical, _)) => !kept_canonical && edge.is_canonical(),
        };
        if replace {
            pairs.insert(key, (edge.is_canonical(), canonical));
        }
    }
    pairs.into_values().map(|(_, edge)| edge).collect()
}

/// Threshold candidate edges and assemble the node/edge graph.
pub fn extract(
    candidates: &[EdgeCandidate],
    t: &NetworkThresholds,
    reference: &GeoReferenceTable,
) -> Result<Graph, GeomediaError> {
    t.validate()?;

    let kept: Vec<EdgeCandidate> = candidates
        .iter()
        .filter(|e| within_bounds(e, t))
        .cloned()
        .collect();
    let edges = if t.loops { kept } else { fold_directions(kept) };

    let codes: BTreeSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    let ids: BTreeMap<&str, usize> = codes.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    let targets: BTreeSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();

    let mut mass = vec![0.0; ids.len()];
    for edge in &edges {
        let (s, d) = (ids[edge.source.as_str()], ids[edge.target.as_str()]);
        mass[s] += edge.size;
        if d != s {
            mass[d] += edge.size;
        }
    }

    let nodes: Vec<GraphNode> = codes
        .iter()
        .enumerate()
        .map(|(id, code)| {
            let geo = reference.get(code);
            GraphNode {
                id,
                code: code.to_string(),
                label: geo
                    .map(|g| g.display_name.clone())
                    .unwrap_or_else(|| code.to_string()),
                mass: mass[id],
                is_target: targets.contains(code),
                longitude: geo.map(|g| g.longitude),
                latitude: geo.map(|g| g.latitude),
            }
        })
        .collect();

    let max_size = edges.iter().map(|e| e.size).fold(0.0_f64, f64::max);
    let mut graph_edges: Vec<GraphEdge> = edges
        .iter()
        .map(|e| GraphEdge {
            source: ids[e.source.as_str()],
            target: ids[e.target.as_str()],
            size: e.size,
            test: e.test,
            width: if max_size > 0.0 { e.size / max_size } else { 0.0 },
        })
        .collect();
    graph_edges.sort_by(|a, b| (a.source, a.target).cmp(&(b.source, b.target)));

    info!(
        candidates = candidates.len(),
        nodes = nodes.len(),
        edges = graph_edges.len(),
        loops = t.loops,
        "Network extracted"
    );

    Ok(Graph {
        nodes,
        edges: graph_edges,
    })
}
