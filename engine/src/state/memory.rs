use super::{AccountRecord, StateView, WorkerState};
use parex_common::{
    crypto::{keccak256, Address, Hash},
    transaction::Log,
};
use primitive_types::U256;
use std::collections::HashMap;

/// In-memory authoritative state: the reference implementation of the
/// full state surface, used by the tests, the benches and any embedder
/// without a durable backend. Setters materialize accounts on demand;
/// snapshots clone the account map, which is fine at this scale.
#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    accounts: HashMap<Address, AccountRecord>,
    logs: HashMap<Hash, Vec<Log>>,
    tx_hash: Hash,
    tx_index: usize,
    log_size: usize,
    snapshots: Vec<(usize, HashMap<Address, AccountRecord>)>,
    next_revision_id: usize,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, address: &Address) -> Option<&AccountRecord> {
        self.accounts.get(address)
    }

    fn record_mut(&mut self, address: &Address) -> &mut AccountRecord {
        self.accounts
            .entry(*address)
            .or_insert_with(|| AccountRecord::new(*address))
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn logs(&self) -> &HashMap<Hash, Vec<Log>> {
        &self.logs
    }
}

impl StateView for MemoryState {
    fn get_balance(&self, address: &Address) -> U256 {
        self.record(address)
            .map(|record| record.balance())
            .unwrap_or_default()
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.record(address)
            .map(|record| record.nonce())
            .unwrap_or_default()
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        self.record(address)
            .map(|record| record.code_hash().clone())
            .unwrap_or_else(Hash::zero)
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        self.record(address)
            .map(|record| record.code().to_vec())
            .unwrap_or_default()
    }

    fn get_code_size(&self, address: &Address) -> usize {
        self.record(address)
            .map(|record| record.code().len())
            .unwrap_or_default()
    }

    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        self.record(address)
            .and_then(|record| record.storage_value(key).cloned())
            .unwrap_or_else(Hash::zero)
    }

    fn exists(&self, address: &Address) -> bool {
        self.record(address)
            .map(|record| record.is_alive())
            .unwrap_or(false)
    }

    fn is_empty(&self, address: &Address) -> bool {
        self.record(address)
            .map(|record| record.is_empty())
            .unwrap_or(true)
    }

    fn has_self_destructed(&self, address: &Address) -> bool {
        self.record(address)
            .map(|record| !record.is_alive())
            .unwrap_or(false)
    }
}

impl WorkerState for MemoryState {
    fn create_account(&mut self, address: Address) {
        self.accounts
            .entry(address)
            .or_insert_with(|| AccountRecord::new(address));
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        self.record_mut(address).add_balance(amount);
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        self.record_mut(address).sub_balance(amount);
    }

    fn set_balance(&mut self, address: &Address, amount: U256) {
        self.record_mut(address).set_balance(amount);
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.record_mut(address).set_nonce(nonce);
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let code_hash = keccak256(&code);
        self.record_mut(address).set_code(code_hash, code);
    }

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash) {
        self.record_mut(address).set_storage(key, value);
    }

    fn self_destruct(&mut self, address: &Address) {
        if let Some(record) = self.accounts.get_mut(address) {
            record.set_alive(false);
            record.set_balance(U256::zero());
        }
    }

    fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.snapshots.push((id, self.accounts.clone()));
        id
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        let idx = self
            .snapshots
            .binary_search_by(|(revision, _)| revision.cmp(&id))
            .unwrap_or_else(|_| panic!("revision id {id} cannot be reverted"));
        let (_, accounts) = self.snapshots.swap_remove(idx);
        self.snapshots.truncate(idx);
        self.accounts = accounts;
    }

    fn set_tx_context(&mut self, tx_hash: Hash, index: usize) {
        self.tx_hash = tx_hash;
        self.tx_index = index;
    }

    fn add_log(&mut self, mut log: Log) {
        log.tx_hash = self.tx_hash.clone();
        log.tx_index = self.tx_index;
        log.log_index = self.log_size;
        self.log_size += 1;
        self.logs.entry(self.tx_hash.clone()).or_default().push(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_u64(n)
    }

    #[test]
    fn setters_materialize_accounts() {
        let mut state = MemoryState::new();
        state.set_balance(&addr(1), U256::from(10u64));
        assert!(state.exists(&addr(1)));
        assert_eq!(state.get_balance(&addr(1)), U256::from(10u64));
    }

    #[test]
    fn snapshot_revert_restores_the_whole_map() {
        let mut state = MemoryState::new();
        state.set_balance(&addr(1), U256::from(10u64));
        let s = state.snapshot();
        state.set_balance(&addr(1), U256::from(99u64));
        state.set_balance(&addr(2), U256::from(5u64));
        state.revert_to_snapshot(s);
        assert_eq!(state.get_balance(&addr(1)), U256::from(10u64));
        assert!(!state.exists(&addr(2)));
    }

    #[test]
    fn self_destruct_of_unknown_account_is_a_no_op() {
        let mut state = MemoryState::new();
        state.self_destruct(&addr(9));
        assert!(!state.exists(&addr(9)));
        assert!(!state.has_self_destructed(&addr(9)));
    }
}
