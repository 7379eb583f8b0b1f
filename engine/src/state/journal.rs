use super::AccountRecord;
use indexmap::IndexMap;
use parex_common::crypto::{Address, Hash};
use primitive_types::U256;
use std::collections::HashMap;

/// One reversible cache mutation. Each variant owns enough prior state
/// to undo itself.
#[derive(Debug, Clone)]
pub enum JournalEntry {
    CreateAccount {
        address: Address,
    },
    BalanceChange {
        address: Address,
        prev: U256,
    },
    NonceChange {
        address: Address,
        prev: u64,
    },
    CodeChange {
        address: Address,
        prev_hash: Hash,
        prev_code: Vec<u8>,
    },
    StorageChange {
        address: Address,
        key: Hash,
        prev: Hash,
    },
    SelfDestructChange {
        address: Address,
        prev_alive: bool,
        prev_balance: U256,
    },
}

impl JournalEntry {
    fn address(&self) -> &Address {
        match self {
            JournalEntry::CreateAccount { address }
            | JournalEntry::BalanceChange { address, .. }
            | JournalEntry::NonceChange { address, .. }
            | JournalEntry::CodeChange { address, .. }
            | JournalEntry::StorageChange { address, .. }
            | JournalEntry::SelfDestructChange { address, .. } => address,
        }
    }

    fn undo(self, accounts: &mut HashMap<Address, AccountRecord>) {
        match self {
            JournalEntry::CreateAccount { address } => {
                accounts.remove(&address);
            }
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(record) = accounts.get_mut(&address) {
                    record.set_balance(prev);
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(record) = accounts.get_mut(&address) {
                    record.set_nonce(prev);
                }
            }
            JournalEntry::CodeChange {
                address,
                prev_hash,
                prev_code,
            } => {
                if let Some(record) = accounts.get_mut(&address) {
                    record.set_code(prev_hash, prev_code);
                }
            }
            JournalEntry::StorageChange { address, key, prev } => {
                if let Some(record) = accounts.get_mut(&address) {
                    record.set_storage(key, prev);
                }
            }
            JournalEntry::SelfDestructChange {
                address,
                prev_alive,
                prev_balance,
            } => {
                if let Some(record) = accounts.get_mut(&address) {
                    record.set_alive(prev_alive);
                    record.set_balance(prev_balance);
                }
            }
        }
    }
}

/// Ordered undo log of one journaled cache, with per-address dirty
/// counting so the merge step knows which accounts to write back.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    dirties: IndexMap<Address, usize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: JournalEntry) {
        *self.dirties.entry(*entry.address()).or_insert(0) += 1;
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Addresses touched by at least one live entry, in first-touch order.
    pub fn dirty_addresses(&self) -> impl Iterator<Item = &Address> {
        self.dirties.keys()
    }

    /// Undo every entry at index >= `snapshot`, newest first.
    pub fn revert(&mut self, accounts: &mut HashMap<Address, AccountRecord>, snapshot: usize) {
        while self.entries.len() > snapshot {
            let entry = self.entries.pop().expect("journal length checked");
            let address = *entry.address();
            entry.undo(accounts);
            if let Some(count) = self.dirties.get_mut(&address) {
                *count -= 1;
                if *count == 0 {
                    self.dirties.shift_remove(&address);
                }
            }
        }
    }
}

/// A snapshot handle: a monotonically increasing id paired with the
/// journal length it captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub id: usize,
    pub journal_index: usize,
}
