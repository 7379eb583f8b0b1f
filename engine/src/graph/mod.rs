mod directed;
mod undirected;

pub use directed::DirectedGraph;
pub use undirected::UndirectedGraph;

use crate::TxId;
use parex_common::crypto::Hash;

/// A conflict-graph vertex: one transaction of the block.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// Dense index of the transaction inside the block.
    pub tx_id: TxId,
    /// Transaction hash, carried for diagnostics only.
    pub tx_hash: Hash,
    /// Soft-delete flag; deleted vertices stay in the maps.
    pub is_deleted: bool,
    /// Current live degree (in-degree for the directed variant).
    pub degree: usize,
}

impl Vertex {
    pub fn new(tx_id: TxId, tx_hash: Hash) -> Self {
        Self {
            tx_id,
            tx_hash,
            is_deleted: false,
            degree: 0,
        }
    }
}
