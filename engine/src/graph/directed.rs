use super::Vertex;
use crate::TxId;
use indexmap::{IndexMap, IndexSet};
use parex_common::crypto::Hash;

/// Directed conflict graph. Edges are oriented from the lower to the
/// higher transaction id, so repeatedly collecting in-degree-zero
/// vertices yields rounds that respect the original block order.
#[derive(Debug, Clone, Default)]
pub struct DirectedGraph {
    vertices: IndexMap<TxId, Vertex>,
    adjacency: IndexMap<TxId, IndexSet<TxId>>,
}

impl DirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, tx_hash: Hash, id: TxId) {
        if self.vertices.contains_key(&id) {
            return;
        }
        self.vertices.insert(id, Vertex::new(id, tx_hash));
        self.adjacency.insert(id, IndexSet::new());
    }

    /// Insert `source -> destination`, bumping the destination in-degree.
    pub fn add_edge(&mut self, source: TxId, destination: TxId) {
        if self.has_edge(source, destination) {
            return;
        }
        self.adjacency
            .get_mut(&source)
            .expect("source vertex present")
            .insert(destination);
        self.vertices[&destination].degree += 1;
    }

    pub fn has_edge(&self, source: TxId, destination: TxId) -> bool {
        self.adjacency
            .get(&source)
            .map(|set| set.contains(&destination))
            .unwrap_or(false)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn successors(&self, id: TxId) -> impl Iterator<Item = TxId> + '_ {
        self.adjacency[&id].iter().copied()
    }

    /// Peel the DAG into layers of in-degree-zero vertices. Consumes the
    /// degrees; every vertex lands in exactly one layer.
    pub fn degree_zero_layers(mut self) -> Vec<Vec<TxId>> {
        let mut layers = Vec::new();
        let mut current: Vec<TxId> = self
            .vertices
            .values()
            .filter(|v| v.degree == 0)
            .map(|v| v.tx_id)
            .collect();
        current.sort_unstable();
        if current.is_empty() {
            return layers;
        }
        layers.push(current.clone());
        loop {
            let mut next = Vec::new();
            for id in &current {
                for successor in self.adjacency[id].clone() {
                    let v = &mut self.vertices[&successor];
                    v.degree -= 1;
                    if v.degree == 0 {
                        next.push(successor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            next.sort_unstable();
            layers.push(next.clone());
            current = next;
        }
        layers
    }
}
