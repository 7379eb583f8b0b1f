use super::{
    concurrent::ConcurrentCache, AccountRecord, Journal, JournalEntry, Revision, StateView,
    WorkerState,
};
use crate::access::{AccessTuple, RwSet, ALIVE, BALANCE, CODE, CODE_HASH, NONCE};
use parex_common::{
    crypto::{keccak256, Address, Hash},
    transaction::Log,
};
use primitive_types::U256;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct DirtyFields {
    created: bool,
    balance: bool,
    nonce: bool,
    code: bool,
    alive: bool,
    /// Slot keys with at least one live journal entry.
    slots: HashSet<Hash>,
}

/// Single-worker journaled cache.
///
/// A transaction executes against exactly one `CacheState`, prefetched
/// with its predicted footprint. Any touch outside the prefetched keys
/// flips `state_judge`, which the executor reads as a misprediction
/// after the run. Snapshot/revert replays the journal, so a mispredicted
/// or failed transaction leaves no residue.
pub struct CacheState {
    accounts: HashMap<Address, AccountRecord>,
    logs: HashMap<Hash, Vec<Log>>,
    tx_hash: Hash,
    tx_index: usize,
    log_size: usize,
    // Cell: getters stay &self, the flag is a diagnostic side channel
    state_judge: Cell<bool>,
    prefetching: bool,
    prefetched: AccessTuple,
    journal: Journal,
    valid_revisions: Vec<Revision>,
    next_revision_id: usize,
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheState {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            logs: HashMap::new(),
            tx_hash: Hash::zero(),
            tx_index: 0,
            log_size: 0,
            state_judge: Cell::new(true),
            prefetching: false,
            prefetched: AccessTuple::new(),
            journal: Journal::new(),
            valid_revisions: Vec::new(),
            next_revision_id: 0,
        }
    }

    /// True while every access so far stayed inside the prefetched set.
    pub fn state_judge(&self) -> bool {
        self.state_judge.get()
    }

    /// Re-arm the misprediction flag for the next attempt.
    pub fn reset_state_judge(&mut self) {
        self.state_judge.set(true);
    }

    fn miss(&self) {
        self.state_judge.set(false);
    }

    fn record(&self, address: &Address) -> Option<&AccountRecord> {
        self.accounts.get(address)
    }

    /// Warm this cache from `backing` with every key of the given
    /// footprints. Already-warmed keys are skipped, so repeated calls
    /// never clobber values written since.
    pub fn prefetch<'a, I>(&mut self, backing: &dyn StateView, rw_sets: I)
    where
        I: IntoIterator<Item = &'a RwSet>,
    {
        self.prefetching = true;
        for rw_set in rw_sets {
            let entries = rw_set
                .reads()
                .entries()
                .chain(rw_set.writes().entries())
                .map(|(address, key)| (*address, key.clone()))
                .collect::<Vec<_>>();
            for (address, key) in entries {
                self.prefetch_entry(backing, address, key);
            }
        }
        self.prefetching = false;
    }

    fn prefetch_entry(&mut self, backing: &dyn StateView, address: Address, key: Hash) {
        if self.prefetched.contains(&address, &key) {
            return;
        }
        self.prefetched.add(address, key.clone());

        self.create_account(address);
        let record = self
            .accounts
            .get_mut(&address)
            .expect("account created above");
        if key == *BALANCE {
            record.set_balance(backing.get_balance(&address));
        } else if key == *NONCE {
            record.set_nonce(backing.get_nonce(&address));
        } else if key == *CODE_HASH {
            record.set_code_hash(backing.get_code_hash(&address));
        } else if key == *CODE {
            record.set_bytecode(backing.get_code(&address));
        } else if key == *ALIVE {
            record.set_alive(backing.exists(&address));
        } else {
            record.set_storage(key.clone(), backing.get_state(&address, &key));
        }
    }

    /// Which fields of each dirty address the journal actually touched.
    /// Walking the journal is fine: merge runs once per cache.
    fn dirty_fields(&self) -> HashMap<Address, DirtyFields> {
        let mut fields: HashMap<Address, DirtyFields> = HashMap::new();
        for entry in self.journal.entries() {
            match entry {
                JournalEntry::CreateAccount { address } => {
                    fields.entry(*address).or_default().created = true;
                }
                JournalEntry::BalanceChange { address, .. } => {
                    fields.entry(*address).or_default().balance = true;
                }
                JournalEntry::NonceChange { address, .. } => {
                    fields.entry(*address).or_default().nonce = true;
                }
                JournalEntry::CodeChange { address, .. } => {
                    fields.entry(*address).or_default().code = true;
                }
                JournalEntry::StorageChange { address, key, .. } => {
                    fields.entry(*address).or_default().slots.insert(key.clone());
                }
                JournalEntry::SelfDestructChange { address, .. } => {
                    let f = fields.entry(*address).or_default();
                    f.alive = true;
                    f.balance = true;
                }
            }
        }
        fields
    }

    /// Write the final values of every journal-dirty account into
    /// `target`. Untouched accounts are skipped, and only the fields and
    /// slots the journal touched are written, so a balance-only change
    /// can never clobber a nonce or code that was not prefetched, and a
    /// merely-read slot is never pushed back.
    pub fn merge_into(&self, target: &mut dyn WorkerState) {
        let dirty = self.dirty_fields();
        for address in self.journal.dirty_addresses() {
            let record = match self.record(address) {
                Some(record) => record,
                None => continue,
            };
            let fields = match dirty.get(address) {
                Some(fields) => fields,
                None => continue,
            };
            if fields.created {
                target.create_account(*address);
            }
            if fields.balance {
                target.set_balance(address, record.balance());
            }
            if fields.nonce {
                target.set_nonce(address, record.nonce());
            }
            if fields.code {
                target.set_code(address, record.code().to_vec());
            }
            for key in &fields.slots {
                if let Some(value) = record.storage_value(key) {
                    target.set_state(address, key.clone(), value.clone());
                }
            }
            if fields.alive && !record.is_alive() {
                target.self_destruct(address);
            }
        }
    }

    /// Same merge, targeting the shared warmed cache. Runs on `&self`
    /// receivers on both sides so committed caches can merge in parallel.
    pub fn merge_into_concurrent(&self, target: &ConcurrentCache) {
        let dirty = self.dirty_fields();
        for address in self.journal.dirty_addresses() {
            let record = match self.record(address) {
                Some(record) => record,
                None => continue,
            };
            let fields = match dirty.get(address) {
                Some(fields) => fields,
                None => continue,
            };
            if fields.created {
                target.store_created(address);
            }
            if fields.balance {
                target.store_balance(address, record.balance());
            }
            if fields.nonce {
                target.store_nonce(address, record.nonce());
            }
            if fields.code {
                target.store_code(address, record.code_hash().clone(), record.code().to_vec());
            }
            for key in &fields.slots {
                if let Some(value) = record.storage_value(key) {
                    target.store_slot(address, key.clone(), value.clone());
                }
            }
            if fields.alive && !record.is_alive() {
                target.mark_destructed(address);
            }
        }
    }

    /// Logs accumulated so far, keyed by transaction hash.
    pub fn take_logs(&mut self) -> HashMap<Hash, Vec<Log>> {
        std::mem::take(&mut self.logs)
    }
}

impl StateView for CacheState {
    fn get_balance(&self, address: &Address) -> U256 {
        match self.record(address) {
            Some(record) => record.balance(),
            None => {
                self.miss();
                U256::zero()
            }
        }
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        match self.record(address) {
            Some(record) => record.nonce(),
            None => {
                self.miss();
                0
            }
        }
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        match self.record(address) {
            Some(record) => record.code_hash().clone(),
            None => {
                self.miss();
                Hash::zero()
            }
        }
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        match self.record(address) {
            Some(record) => record.code().to_vec(),
            None => {
                self.miss();
                Vec::new()
            }
        }
    }

    fn get_code_size(&self, address: &Address) -> usize {
        match self.record(address) {
            Some(record) => record.code().len(),
            None => {
                self.miss();
                0
            }
        }
    }

    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        match self.record(address) {
            Some(record) => match record.storage_value(key) {
                Some(value) => value.clone(),
                None => {
                    // slot was not prefetched for this account
                    self.miss();
                    Hash::zero()
                }
            },
            None => {
                self.miss();
                Hash::zero()
            }
        }
    }

    fn exists(&self, address: &Address) -> bool {
        match self.record(address) {
            Some(_) => true,
            None => {
                self.miss();
                false
            }
        }
    }

    fn is_empty(&self, address: &Address) -> bool {
        match self.record(address) {
            Some(record) => record.is_empty(),
            None => {
                self.miss();
                true
            }
        }
    }

    fn has_self_destructed(&self, address: &Address) -> bool {
        match self.record(address) {
            Some(record) => !record.is_alive(),
            None => {
                self.miss();
                false
            }
        }
    }
}

impl WorkerState for CacheState {
    fn create_account(&mut self, address: Address) {
        if self.accounts.contains_key(&address) {
            return;
        }
        if !self.prefetching {
            self.journal.append(JournalEntry::CreateAccount { address });
        }
        self.accounts.insert(address, AccountRecord::new(address));
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                self.journal.append(JournalEntry::BalanceChange {
                    address: *address,
                    prev: record.balance(),
                });
                record.add_balance(amount);
            }
            None => self.miss(),
        }
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                self.journal.append(JournalEntry::BalanceChange {
                    address: *address,
                    prev: record.balance(),
                });
                record.sub_balance(amount);
            }
            None => self.miss(),
        }
    }

    fn set_balance(&mut self, address: &Address, amount: U256) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                self.journal.append(JournalEntry::BalanceChange {
                    address: *address,
                    prev: record.balance(),
                });
                record.set_balance(amount);
            }
            None => self.miss(),
        }
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                self.journal.append(JournalEntry::NonceChange {
                    address: *address,
                    prev: record.nonce(),
                });
                record.set_nonce(nonce);
            }
            None => self.miss(),
        }
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                self.journal.append(JournalEntry::CodeChange {
                    address: *address,
                    prev_hash: record.code_hash().clone(),
                    prev_code: record.code().to_vec(),
                });
                let code_hash = keccak256(&code);
                record.set_code(code_hash, code);
            }
            None => self.miss(),
        }
    }

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash) {
        match self.accounts.get_mut(address) {
            Some(record) => {
                // slot presence is checked before anything is journaled,
                // so a rejected write leaves no partial undo entry
                match record.storage_value(&key) {
                    Some(prev) => {
                        let prev = prev.clone();
                        self.journal.append(JournalEntry::StorageChange {
                            address: *address,
                            key: key.clone(),
                            prev,
                        });
                        record.set_storage(key, value);
                    }
                    None => self.miss(),
                }
            }
            None => self.miss(),
        }
    }

    fn self_destruct(&mut self, address: &Address) {
        // destroying an unknown account is a no-op
        if let Some(record) = self.accounts.get_mut(address) {
            self.journal.append(JournalEntry::SelfDestructChange {
                address: *address,
                prev_alive: record.is_alive(),
                prev_balance: record.balance(),
            });
            record.set_alive(false);
            record.set_balance(U256::zero());
        }
    }

    fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.valid_revisions.push(Revision {
            id,
            journal_index: self.journal.len(),
        });
        id
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        let idx = self
            .valid_revisions
            .binary_search_by(|revision| revision.id.cmp(&id))
            .unwrap_or_else(|_| panic!("revision id {id} cannot be reverted"));
        let snapshot = self.valid_revisions[idx].journal_index;
        self.journal.revert(&mut self.accounts, snapshot);
        self.valid_revisions.truncate(idx);
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
