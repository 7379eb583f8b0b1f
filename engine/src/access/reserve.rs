use super::AccessTuple;
use crate::TxId;
use dashmap::DashMap;
use parex_common::crypto::{Address, Hash};

/// Concurrent reservation table mapping each (address, key) pair to the
/// lowest transaction id that touched it. Heavily written during the
/// Aria parallel phase, so it shards per address and per key.
#[derive(Debug, Default)]
pub struct ReserveSet {
    inner: DashMap<Address, DashMap<Hash, TxId>>,
}

impl ReserveSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, address: &Address, key: &Hash) -> Option<TxId> {
        self.inner
            .get(address)
            .and_then(|slots| slots.get(key).map(|id| *id))
    }

    /// Record `tid` at every key of `set`, keeping the minimum id per key.
    pub fn reserve(&self, set: &AccessTuple, tid: TxId) {
        for (address, key) in set.entries() {
            let slots = self.inner.entry(*address).or_default();
            slots
                .entry(key.clone())
                .and_modify(|reserved| {
                    if tid < *reserved {
                        *reserved = tid;
                    }
                })
                .or_insert(tid);
        }
    }

    /// True iff some key of `set` carries a reservation strictly below `tid`.
    pub fn has_conflict(&self, tid: TxId, set: &AccessTuple) -> bool {
        set.entries().any(|(address, key)| {
            self.get(address, key)
                .map(|reserved| reserved < tid)
                .unwrap_or(false)
        })
    }
}
