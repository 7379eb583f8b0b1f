use super::Vertex;
use crate::TxId;
use indexmap::IndexMap;
use parex_common::crypto::Hash;
use std::collections::HashSet;

/// Undirected conflict graph over the transactions of one block.
/// Vertices are soft-deleted so the MIS solver can peel repeatedly
/// without rebuilding adjacency.
#[derive(Debug, Clone, Default)]
pub struct UndirectedGraph {
    vertices: IndexMap<TxId, Vertex>,
    adjacency: IndexMap<TxId, Vec<TxId>>,
}

impl UndirectedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, tx_hash: Hash, id: TxId) {
        if self.vertices.contains_key(&id) {
            return;
        }
        self.vertices.insert(id, Vertex::new(id, tx_hash));
        self.adjacency.insert(id, Vec::new());
    }

    pub fn add_edge(&mut self, a: TxId, b: TxId) {
        if a == b || self.has_edge(a, b) {
            return;
        }
        self.adjacency.get_mut(&a).expect("vertex a present").push(b);
        self.adjacency.get_mut(&b).expect("vertex b present").push(a);
        self.vertices[&a].degree += 1;
        self.vertices[&b].degree += 1;
    }

    /// Edge test between two live vertices; deleted endpoints report false.
    pub fn has_edge(&self, a: TxId, b: TxId) -> bool {
        match (self.vertices.get(&a), self.vertices.get(&b)) {
            (Some(va), Some(vb)) if !va.is_deleted && !vb.is_deleted => {
                self.adjacency[&a].contains(&b)
            }
            _ => false,
        }
    }

    /// Soft-delete a vertex, decrementing its live neighbors' degrees.
    pub fn remove_vertex(&mut self, id: TxId) {
        if self.vertices[&id].is_deleted {
            return;
        }
        self.vertices[&id].is_deleted = true;
        let neighbors = self.adjacency[&id].clone();
        for neighbor in neighbors {
            let v = &mut self.vertices[&neighbor];
            if !v.is_deleted {
                v.degree -= 1;
            }
        }
    }

    pub fn vertex(&self, id: TxId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn degree(&self, id: TxId) -> usize {
        self.vertices[&id].degree
    }

    pub fn is_deleted(&self, id: TxId) -> bool {
        self.vertices[&id].is_deleted
    }

    pub fn mark_deleted(&mut self, id: TxId) {
        self.vertices[&id].is_deleted = true;
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.vertices.keys().copied()
    }

    pub fn live_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.vertices
            .values()
            .filter(|v| !v.is_deleted)
            .map(|v| v.tx_id)
    }

    pub fn live_count(&self) -> usize {
        self.vertices.values().filter(|v| !v.is_deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn neighbors(&self, id: TxId) -> &[TxId] {
        &self.adjacency[&id]
    }

    /// Live neighbors only.
    pub fn live_neighbors(&self, id: TxId) -> impl Iterator<Item = TxId> + '_ {
        self.adjacency[&id]
            .iter()
            .copied()
            .filter(|n| !self.vertices[n].is_deleted)
    }

    /// Rebuild without the deleted vertices, dropping their edges.
    pub fn copy_with_deletion(&self) -> UndirectedGraph {
        let mut copy = UndirectedGraph::new();
        for vertex in self.vertices.values() {
            if !vertex.is_deleted {
                copy.add_vertex(vertex.tx_hash.clone(), vertex.tx_id);
            }
        }
        let ids: Vec<TxId> = copy.vertex_ids().collect();
        for id in ids {
            for neighbor in self.adjacency[&id].clone() {
                if !self.vertices[&neighbor].is_deleted {
                    copy.add_edge(id, neighbor);
                }
            }
        }
        copy
    }

    /// Connected components of the live subgraph, via iterative DFS.
    pub fn connected_components(&self) -> Vec<Vec<TxId>> {
        let mut visited: HashSet<TxId> = HashSet::new();
        let mut components = Vec::new();

        for start in self.vertices.values() {
            if start.is_deleted || visited.contains(&start.tx_id) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start.tx_id];
            visited.insert(start.tx_id);
            while let Some(id) = stack.pop() {
                component.push(id);
                for neighbor in self.adjacency[&id].iter() {
                    if !self.vertices[neighbor].is_deleted && visited.insert(*neighbor) {
                        stack.push(*neighbor);
                    }
                }
            }
            components.push(component);
        }

        components
    }
}
