use parex_common::crypto::{Address, Hash, EMPTY_CODE_HASH};
use primitive_types::U256;
use std::collections::HashMap;

/// In-cache record of one account: the scalar fields plus the storage
/// slots warmed for it. A record existing in a cache does not imply the
/// account exists on chain; `is_alive` tracks that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    address: Address,
    nonce: u64,
    balance: U256,
    code_hash: Hash,
    bytecode: Vec<u8>,
    storage: HashMap<Hash, Hash>,
    is_alive: bool,
}

impl AccountRecord {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balance: U256::zero(),
            code_hash: EMPTY_CODE_HASH.clone(),
            bytecode: Vec::new(),
            storage: HashMap::new(),
            is_alive: true,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn set_balance(&mut self, amount: U256) {
        self.balance = amount;
    }

    pub fn add_balance(&mut self, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.balance = self.balance.saturating_add(amount);
    }

    pub fn sub_balance(&mut self, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.balance = self.balance.saturating_sub(amount);
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn code_hash(&self) -> &Hash {
        &self.code_hash
    }

    pub fn set_code_hash(&mut self, code_hash: Hash) {
        self.code_hash = code_hash;
    }

    pub fn code(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn set_code(&mut self, code_hash: Hash, code: Vec<u8>) {
        self.code_hash = code_hash;
        self.bytecode = code;
    }

    /// Replace only the code payload, leaving the hash untouched; the
    /// prefetcher warms the two fields independently.
    pub fn set_bytecode(&mut self, code: Vec<u8>) {
        self.bytecode = code;
    }

    pub fn storage_value(&self, key: &Hash) -> Option<&Hash> {
        self.storage.get(key)
    }

    pub fn set_storage(&mut self, key: Hash, value: Hash) {
        self.storage.insert(key, value);
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    pub fn set_alive(&mut self, alive: bool) {
        self.is_alive = alive;
    }

    /// An empty account: zero nonce, zero balance, no deployed code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == *EMPTY_CODE_HASH
    }
}
