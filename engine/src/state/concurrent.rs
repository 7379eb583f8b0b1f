use super::{StateView, WorkerState};
use crate::access::{AccessTuple, RwSet, ALIVE, BALANCE, CODE, CODE_HASH, NONCE};
use dashmap::DashMap;
use parex_common::{
    crypto::{Address, Hash, EMPTY_CODE_HASH},
    transaction::Log,
};
use primitive_types::U256;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct SlotEntry {
    /// Value copied from the backing state at warm time; `None` when the
    /// slot was first written by a merge.
    original: Option<Hash>,
    current: Hash,
}

/// Per-address entry of the warmed cache. Scalar fields keep their
/// warm-time originals so the block-end commit writes only real changes.
#[derive(Debug)]
struct ConcurrentAccount {
    created: bool,
    nonce: u64,
    original_nonce: u64,
    balance: U256,
    original_balance: U256,
    code_hash: Hash,
    bytecode: Vec<u8>,
    code_dirty: bool,
    is_alive: bool,
    original_is_alive: bool,
    storage: DashMap<Hash, SlotEntry>,
}

impl ConcurrentAccount {
    fn new() -> Self {
        Self {
            created: false,
            nonce: 0,
            original_nonce: 0,
            balance: U256::zero(),
            original_balance: U256::zero(),
            code_hash: EMPTY_CODE_HASH.clone(),
            bytecode: Vec::new(),
            code_dirty: false,
            is_alive: true,
            original_is_alive: true,
            storage: DashMap::new(),
        }
    }
}

/// Thread-safe cache shared by every worker of a block: warmed from the
/// authoritative state before round one, extended before residual
/// rounds, merged into after each round. No journal and no revisions;
/// snapshot and revert are no-ops. Writes at disjoint (address, key)
/// pairs do not conflict, and the scheduler guarantees committed rounds
/// never write the same key twice.
#[derive(Debug, Default)]
pub struct ConcurrentCache {
    accounts: DashMap<Address, ConcurrentAccount>,
    // also records keys written by merges, so a later warm-up pass can
    // never clobber merged values with stale authoritative ones
    prefetched: Mutex<AccessTuple>,
}

impl ConcurrentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm every key of the given footprints from `backing`. Keys that
    /// were already warmed, or that a merge has since written, keep
    /// their current value.
    pub fn prefetch<'a, I>(&self, backing: &dyn StateView, rw_sets: I)
    where
        I: IntoIterator<Item = &'a RwSet>,
    {
        let mut prefetched = self.prefetched.lock().expect("prefetched lock poisoned");
        for rw_set in rw_sets {
            for (address, key) in rw_set.reads().entries().chain(rw_set.writes().entries()) {
                if prefetched.contains(address, key) {
                    continue;
                }
                prefetched.add(*address, key.clone());
                let mut account = self
                    .accounts
                    .entry(*address)
                    .or_insert_with(ConcurrentAccount::new);
                if *key == *BALANCE {
                    let value = backing.get_balance(address);
                    account.balance = value;
                    account.original_balance = value;
                } else if *key == *NONCE {
                    let value = backing.get_nonce(address);
                    account.nonce = value;
                    account.original_nonce = value;
                } else if *key == *CODE_HASH {
                    account.code_hash = backing.get_code_hash(address);
                } else if *key == *CODE {
                    account.bytecode = backing.get_code(address);
                } else if *key == *ALIVE {
                    let alive = backing.exists(address);
                    account.is_alive = alive;
                    account.original_is_alive = alive;
                } else {
                    let value = backing.get_state(address, key);
                    account.storage.insert(
                        key.clone(),
                        SlotEntry {
                            original: Some(value.clone()),
                            current: value,
                        },
                    );
                }
            }
        }
    }

    fn mark_known(&self, address: &Address, key: Hash) {
        self.prefetched
            .lock()
            .expect("prefetched lock poisoned")
            .add(*address, key);
    }

    pub(crate) fn store_created(&self, address: &Address) {
        self.mark_known(address, ALIVE.clone());
        let mut account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account.created = true;
        account.is_alive = true;
    }

    pub(crate) fn store_balance(&self, address: &Address, amount: U256) {
        self.mark_known(address, BALANCE.clone());
        let mut account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account.balance = amount;
    }

    pub(crate) fn store_nonce(&self, address: &Address, nonce: u64) {
        self.mark_known(address, NONCE.clone());
        let mut account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account.nonce = nonce;
    }

    pub(crate) fn store_code(&self, address: &Address, code_hash: Hash, code: Vec<u8>) {
        self.mark_known(address, CODE.clone());
        self.mark_known(address, CODE_HASH.clone());
        let mut account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account.code_hash = code_hash;
        account.bytecode = code;
        account.code_dirty = true;
    }

    pub(crate) fn store_slot(&self, address: &Address, key: Hash, value: Hash) {
        self.mark_known(address, key.clone());
        let account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account
            .storage
            .entry(key)
            .and_modify(|entry| entry.current = value.clone())
            .or_insert(SlotEntry {
                original: None,
                current: value,
            });
    }

    pub(crate) fn mark_destructed(&self, address: &Address) {
        self.mark_known(address, ALIVE.clone());
        let mut account = self
            .accounts
            .entry(*address)
            .or_insert_with(ConcurrentAccount::new);
        account.is_alive = false;
        account.balance = U256::zero();
    }

    /// Write everything that changed since warm time into `target`.
    /// Runs single-threaded at block end; the authoritative state is
    /// only ever mutated here.
    pub fn commit_into(&self, target: &mut dyn WorkerState) {
        let mut addresses: Vec<Address> = self.accounts.iter().map(|e| *e.key()).collect();
        addresses.sort_unstable();
        for address in addresses {
            let account = self.accounts.get(&address).expect("address listed above");
            if account.created {
                target.create_account(address);
            }
            if account.balance != account.original_balance {
                target.set_balance(&address, account.balance);
            }
            if account.nonce != account.original_nonce {
                target.set_nonce(&address, account.nonce);
            }
            if account.code_dirty {
                target.set_code(&address, account.bytecode.clone());
            }
            let mut keys: Vec<Hash> = account.storage.iter().map(|e| e.key().clone()).collect();
            keys.sort_unstable();
            for key in keys {
                let entry = account.storage.get(&key).expect("slot listed above");
                let changed = match &entry.original {
                    Some(original) => *original != entry.current,
                    None => true,
                };
                if changed {
                    target.set_state(&address, key.clone(), entry.current.clone());
                }
            }
            if !account.is_alive && account.original_is_alive {
                target.self_destruct(&address);
            }
        }
    }

    /// Deep copy, mostly for experiment harnesses and tests.
    pub fn deep_copy(&self) -> Self {
        let copy = ConcurrentCache::new();
        for entry in self.accounts.iter() {
            let account = entry.value();
            let cloned = ConcurrentAccount {
                created: account.created,
                nonce: account.nonce,
                original_nonce: account.original_nonce,
                balance: account.balance,
                original_balance: account.original_balance,
                code_hash: account.code_hash.clone(),
                bytecode: account.bytecode.clone(),
                code_dirty: account.code_dirty,
                is_alive: account.is_alive,
                original_is_alive: account.original_is_alive,
                storage: account.storage.clone(),
            };
            copy.accounts.insert(*entry.key(), cloned);
        }
        let prefetched = self.prefetched.lock().expect("prefetched lock poisoned");
        *copy.prefetched.lock().expect("fresh lock") = prefetched.clone();
        copy
    }
}

impl StateView for ConcurrentCache {
    fn get_balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        self.accounts
            .get(address)
            .map(|account| account.code_hash.clone())
            .unwrap_or_else(Hash::zero)
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        self.accounts
            .get(address)
            .map(|account| account.bytecode.clone())
            .unwrap_or_default()
    }

    fn get_code_size(&self, address: &Address) -> usize {
        self.accounts
            .get(address)
            .map(|account| account.bytecode.len())
            .unwrap_or_default()
    }

    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        self.accounts
            .get(address)
            .and_then(|account| account.storage.get(key).map(|entry| entry.current.clone()))
            .unwrap_or_else(Hash::zero)
    }

    fn exists(&self, address: &Address) -> bool {
        self.accounts
            .get(address)
            .map(|account| account.is_alive)
            .unwrap_or(false)
    }

    fn is_empty(&self, address: &Address) -> bool {
        self.accounts
            .get(address)
            .map(|account| {
                account.nonce == 0
                    && account.balance.is_zero()
                    && account.code_hash == *EMPTY_CODE_HASH
            })
            .unwrap_or(true)
    }

    fn has_self_destructed(&self, address: &Address) -> bool {
        self.accounts
            .get(address)
            .map(|account| !account.is_alive)
            .unwrap_or(false)
    }
}

impl WorkerState for ConcurrentCache {
    fn create_account(&mut self, address: Address) {
        self.store_created(&address);
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        let balance = self.get_balance(address).saturating_add(amount);
        self.store_balance(address, balance);
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        let balance = self.get_balance(address).saturating_sub(amount);
        self.store_balance(address, balance);
    }

    fn set_balance(&mut self, address: &Address, amount: U256) {
        self.store_balance(address, amount);
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.store_nonce(address, nonce);
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let code_hash = parex_common::crypto::keccak256(&code);
        self.store_code(address, code_hash, code);
    }

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash) {
        self.store_slot(address, key, value);
    }

    fn self_destruct(&mut self, address: &Address) {
        self.mark_destructed(address);
    }

    // the warmed cache keeps no revisions
    fn snapshot(&mut self) -> usize {
        0
    }

    fn revert_to_snapshot(&mut self, _id: usize) {}

    fn set_tx_context(&mut self, _tx_hash: Hash, _index: usize) {}

    fn add_log(&mut self, _log: Log) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;
    use std::sync::Arc;

    fn addr(n: u64) -> Address {
        Address::from_u64(n)
    }

    fn slot(n: u64) -> Hash {
        Hash::from_u64(n)
    }

    fn rw_set(address: Address, keys: &[Hash]) -> RwSet {
        let mut set = RwSet::new();
        for key in keys {
            set.add_read(address, key.clone());
        }
        set
    }

    fn backing() -> MemoryState {
        let mut state = MemoryState::new();
        let a = addr(1);
        state.create_account(a);
        state.set_balance(&a, U256::from(100u64));
        state.set_state(&a, slot(1), Hash::from_u64(7));
        state
    }

    #[test]
    fn warms_fields_and_slots() {
        let state = backing();
        let cache = ConcurrentCache::new();
        cache.prefetch(&state, [&rw_set(addr(1), &[BALANCE.clone(), slot(1)])]);

        assert_eq!(cache.get_balance(&addr(1)), U256::from(100u64));
        assert_eq!(cache.get_state(&addr(1), &slot(1)), Hash::from_u64(7));
        // unwarmed key reads as default
        assert_eq!(cache.get_state(&addr(1), &slot(2)), Hash::zero());
    }

    #[test]
    fn warm_up_never_clobbers_merged_values() {
        let state = backing();
        let cache = ConcurrentCache::new();
        cache.prefetch(&state, [&rw_set(addr(1), &[BALANCE.clone()])]);

        cache.store_balance(&addr(1), U256::from(42u64));
        // a later residual warm-up of the same key must keep 42
        cache.prefetch(&state, [&rw_set(addr(1), &[BALANCE.clone()])]);
        assert_eq!(cache.get_balance(&addr(1)), U256::from(42u64));

        // same for a key first written by a merge, never warmed
        cache.store_slot(&addr(1), slot(9), Hash::from_u64(3));
        cache.prefetch(&state, [&rw_set(addr(1), &[slot(9)])]);
        assert_eq!(cache.get_state(&addr(1), &slot(9)), Hash::from_u64(3));
    }

    #[test]
    fn commit_writes_only_changes() {
        let state = backing();
        let cache = ConcurrentCache::new();
        cache.prefetch(
            &state,
            [&rw_set(addr(1), &[BALANCE.clone(), NONCE.clone(), slot(1)])],
        );

        cache.store_balance(&addr(1), U256::from(58u64));

        let mut target = MemoryState::new();
        cache.commit_into(&mut target);
        assert_eq!(target.get_balance(&addr(1)), U256::from(58u64));
        // nonce and slot were unchanged: target never saw the account's
        // other fields, so the slot is still absent there
        assert_eq!(target.get_state(&addr(1), &slot(1)), Hash::zero());
    }

    #[test]
    fn snapshot_and_revert_are_no_ops() {
        let mut cache = ConcurrentCache::new();
        let id = cache.snapshot();
        cache.set_balance(&addr(5), U256::from(9u64));
        cache.revert_to_snapshot(id);
        assert_eq!(cache.get_balance(&addr(5)), U256::from(9u64));
    }

    #[test]
    fn deep_copy_is_detached() {
        let state = backing();
        let cache = ConcurrentCache::new();
        cache.prefetch(&state, [&rw_set(addr(1), &[BALANCE.clone(), slot(1)])]);

        let copy = cache.deep_copy();
        cache.store_balance(&addr(1), U256::from(1u64));
        assert_eq!(copy.get_balance(&addr(1)), U256::from(100u64));
        assert_eq!(copy.get_state(&addr(1), &slot(1)), Hash::from_u64(7));
    }

    #[test]
    fn disjoint_writers_do_not_interfere() {
        let cache = Arc::new(ConcurrentCache::new());
        let mut handles = Vec::new();
        for i in 0..8u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache.store_slot(&addr(i), slot(i), Hash::from_u64(i));
                cache.store_balance(&addr(i), U256::from(i));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..8u64 {
            assert_eq!(cache.get_state(&addr(i), &slot(i)), Hash::from_u64(i));
            assert_eq!(cache.get_balance(&addr(i)), U256::from(i));
        }
    }
}
