use std::hash::Hash;

use ahash::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{community::Label, error::OracleError, similarity::SimilarityMatrix};

/// document key -> oracle-local community label
pub type Partition<K> = IndexMap<K, usize, RandomState>;

/// One partitioning job handed to an oracle
#[derive(Debug, Clone, Copy)]
pub struct PartitionRequest<'a, K> {
    /// documents, aligned with the matrix rows/cols
    pub ids: &'a [K],
    /// symmetric similarity matrix, diagonal zeroed
    pub matrix: &'a SimilarityMatrix,
    /// edges are drawn only above this similarity
    pub threshold: f64,
    /// label being subdivided, `None` for the initial round
    pub parent: Option<Label>,
}

impl<'a, K> PartitionRequest<'a, K> {
    /// Thresholded edge list of this request
    pub fn graph(&self) -> WeightedGraph {
        WeightedGraph::from_matrix(self.matrix, self.threshold)
    }
}

/// Modularity-based community detection, treated as a black box.
///
/// Must label every requested document with a non-negative integer.
/// Labels need not be contiguous; the subdivider compacts them.
pub trait PartitionOracle<K> {
    fn partition(&self, request: &PartitionRequest<'_, K>) -> Result<Partition<K>, OracleError>;
}

impl<K, F> PartitionOracle<K> for F
where
    F: Fn(&PartitionRequest<'_, K>) -> Result<Partition<K>, OracleError>,
{
    fn partition(&self, request: &PartitionRequest<'_, K>) -> Result<Partition<K>, OracleError> {
        self(request)
    }
}

/// Oracle answer after validation
#[derive(Debug, Clone)]
pub(crate) struct PartitionOutcome<K> {
    /// (document, compacted local label) in request order
    pub labels: Vec<(K, usize)>,
    /// number of distinct labels, all local labels are < count
    pub count: usize,
}

/// Call the oracle and validate its answer.
/// Labels are compacted to 0..count in ascending order of the raw label.
pub(crate) fn partition_with<K, O>(oracle: &O, request: &PartitionRequest<'_, K>) -> Result<PartitionOutcome<K>, OracleError>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
    O: PartitionOracle<K> + ?Sized,
{
    let raw = oracle.partition(request)?;
    if raw.len() != request.ids.len() {
        return Err(OracleError::Malformed(format!(
            "expected {} labelled documents, got {}",
            request.ids.len(),
            raw.len()
        )));
    }

    let mut distinct: Vec<usize> = raw.values().copied().collect();
    distinct.sort_unstable();
    distinct.dedup();
    let compacted = distinct.last().map_or(false, |&max| max + 1 != distinct.len());
    if compacted {
        tracing::debug!(parent = ?request.parent, labels = distinct.len(), "compacting non-contiguous oracle labels");
    }

    let mut labels = Vec::with_capacity(request.ids.len());
    for id in request.ids {
        let raw_label = raw
            .get(id)
            .ok_or_else(|| OracleError::Malformed(format!("document {id:?} missing from partition")))?;
        // distinct は sort 済みなので二分探索で詰め直す
        let local = distinct.binary_search(raw_label).unwrap_or_default();
        labels.push((id.clone(), local));
    }
    Ok(PartitionOutcome { labels, count: distinct.len() })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Undirected weighted graph over matrix indices.
///
/// An edge joins `i < j` when `similarity > threshold`; its weight is
/// `similarity - threshold`, so the weakest admitted edge is near zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedGraph {
    pub nodes: usize,
    pub edges: Vec<Edge>,
}

impl WeightedGraph {
    pub fn from_matrix(matrix: &SimilarityMatrix, threshold: f64) -> Self {
        let nodes = matrix.rows().min(matrix.cols());
        let mut edges = Vec::new();
        for i in 0..nodes {
            let row = matrix.row(i);
            for (j, &sim) in row.iter().enumerate().take(nodes).skip(i + 1) {
                if sim > threshold {
                    edges.push(Edge { source: i, target: j, weight: sim - threshold });
                }
            }
        }
        Self { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> SimilarityMatrix {
        SimilarityMatrix::from_raw(3, 3, vec![
            0.0, 0.9, 0.2,
            0.9, 0.0, 0.5,
            0.2, 0.5, 0.0,
        ]).unwrap()
    }

    #[test]
    fn graph_keeps_edges_above_threshold_only() {
        let graph = WeightedGraph::from_matrix(&matrix(), 0.35);
        assert_eq!(graph.nodes, 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!((graph.edges[0].source, graph.edges[0].target), (0, 1));
        assert!((graph.edges[0].weight - 0.55).abs() < 1e-12);
        assert_eq!((graph.edges[1].source, graph.edges[1].target), (1, 2));
        assert!((graph.edges[1].weight - 0.15).abs() < 1e-12);
    }

    #[test]
    fn negative_threshold_connects_everything_but_self() {
        let graph = WeightedGraph::from_matrix(&matrix(), -1.0);
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.edges.iter().all(|e| e.source != e.target));
    }

    struct Fixed(Vec<(&'static str, usize)>);

    impl PartitionOracle<&'static str> for Fixed {
        fn partition(&self, _: &PartitionRequest<'_, &'static str>) -> Result<Partition<&'static str>, OracleError> {
            Ok(self.0.iter().copied().collect())
        }
    }

    #[test]
    fn partition_with_compacts_labels() {
        let ids = ["a", "b", "c"];
        let m = matrix();
        let request = PartitionRequest { ids: &ids, matrix: &m, threshold: 0.35, parent: None };
        let out = partition_with(&Fixed(vec![("c", 7), ("a", 2), ("b", 7)]), &request).unwrap();
        assert_eq!(out.count, 2);
        assert_eq!(out.labels, vec![("a", 0), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn partition_with_rejects_missing_documents() {
        let ids = ["a", "b", "c"];
        let m = matrix();
        let request = PartitionRequest { ids: &ids, matrix: &m, threshold: 0.35, parent: Some(4) };
        let short = Fixed(vec![("a", 0), ("b", 0)]);
        assert!(matches!(partition_with(&short, &request), Err(OracleError::Malformed(_))));

        let wrong = Fixed(vec![("a", 0), ("b", 0), ("z", 1)]);
        assert!(matches!(partition_with(&wrong, &request), Err(OracleError::Malformed(_))));
    }
}
