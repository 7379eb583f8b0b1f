use super::{AccountRecord, StateView, WorkerState};
use parex_common::{
    crypto::{keccak256, Address, Hash},
    transaction::Log,
};
use primitive_types::U256;
use std::collections::HashMap;

/// Disposable read-through view used for tentative execution.
///
/// Reads fall through to the backing state until an account is touched
/// by a write, at which point its scalar fields are materialized into
/// the overlay; storage slots are copied lazily. The backing state is
/// never mutated: the predictor runs the VM here and throws the overlay
/// away.
pub struct OverlayState<'a> {
    backing: &'a dyn StateView,
    accounts: HashMap<Address, AccountRecord>,
    logs: Vec<Log>,
    tx_hash: Hash,
    tx_index: usize,
    snapshots: Vec<(usize, HashMap<Address, AccountRecord>)>,
    next_revision_id: usize,
}

impl<'a> OverlayState<'a> {
    pub fn new(backing: &'a dyn StateView) -> Self {
        Self {
            backing,
            accounts: HashMap::new(),
            logs: Vec::new(),
            tx_hash: Hash::zero(),
            tx_index: 0,
            snapshots: Vec::new(),
            next_revision_id: 0,
        }
    }

    fn materialize(&mut self, address: &Address) -> &mut AccountRecord {
        if !self.accounts.contains_key(address) {
            let mut record = AccountRecord::new(*address);
            if self.backing.exists(address) {
                record.set_balance(self.backing.get_balance(address));
                record.set_nonce(self.backing.get_nonce(address));
                record.set_code(
                    self.backing.get_code_hash(address),
                    self.backing.get_code(address),
                );
            }
            self.accounts.insert(*address, record);
        }
        self.accounts.get_mut(address).expect("materialized above")
    }

    fn overlay(&self, address: &Address) -> Option<&AccountRecord> {
        self.accounts.get(address)
    }
}

impl StateView for OverlayState<'_> {
    fn get_balance(&self, address: &Address) -> U256 {
        match self.overlay(address) {
            Some(record) => record.balance(),
            None => self.backing.get_balance(address),
        }
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        match self.overlay(address) {
            Some(record) => record.nonce(),
            None => self.backing.get_nonce(address),
        }
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        match self.overlay(address) {
            Some(record) => record.code_hash().clone(),
            None => self.backing.get_code_hash(address),
        }
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        match self.overlay(address) {
            Some(record) => record.code().to_vec(),
            None => self.backing.get_code(address),
        }
    }

    fn get_code_size(&self, address: &Address) -> usize {
        self.get_code(address).len()
    }

    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        if let Some(record) = self.overlay(address) {
            if let Some(value) = record.storage_value(key) {
                return value.clone();
            }
        }
        self.backing.get_state(address, key)
    }

    fn exists(&self, address: &Address) -> bool {
        match self.overlay(address) {
            Some(record) => record.is_alive(),
            None => self.backing.exists(address),
        }
    }

    fn is_empty(&self, address: &Address) -> bool {
        match self.overlay(address) {
            Some(record) => record.is_empty(),
            None => self.backing.is_empty(address),
        }
    }

    fn has_self_destructed(&self, address: &Address) -> bool {
        match self.overlay(address) {
            Some(record) => !record.is_alive(),
            None => false,
        }
    }
}

impl WorkerState for OverlayState<'_> {
    fn create_account(&mut self, address: Address) {
        if self.exists(&address) {
            return;
        }
        self.accounts.insert(address, AccountRecord::new(address));
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        self.materialize(address).add_balance(amount);
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        self.materialize(address).sub_balance(amount);
    }

    fn set_balance(&mut self, address: &Address, amount: U256) {
        self.materialize(address).set_balance(amount);
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.materialize(address).set_nonce(nonce);
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let code_hash = keccak256(&code);
        self.materialize(address).set_code(code_hash, code);
    }

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash) {
        self.materialize(address).set_storage(key, value);
    }

    fn self_destruct(&mut self, address: &Address) {
        if !self.exists(address) {
            return;
        }
        let record = self.materialize(address);
        record.set_alive(false);
        record.set_balance(U256::zero());
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
        self.logs.push(log);
    }
}
