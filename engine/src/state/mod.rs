mod account;
mod cache;
mod concurrent;
mod journal;
mod memory;
mod overlay;
mod wrapped;

pub use account::AccountRecord;
pub use cache::CacheState;
pub use concurrent::ConcurrentCache;
pub use journal::{Journal, JournalEntry, Revision};
pub use memory::MemoryState;
pub use overlay::OverlayState;
pub use wrapped::WrappedState;

use parex_common::{
    crypto::{Address, Hash},
    transaction::Log,
};
use primitive_types::U256;

/// Read-only account and storage access. Every state in the stack
/// (authoritative, warmed concurrent cache, per-worker journaled cache)
/// exposes this surface, so the VM and the prefetcher can be driven
/// against any of them.
pub trait StateView {
    fn get_balance(&self, address: &Address) -> U256;

    fn get_nonce(&self, address: &Address) -> u64;

    fn get_code_hash(&self, address: &Address) -> Hash;

    fn get_code(&self, address: &Address) -> Vec<u8>;

    fn get_code_size(&self, address: &Address) -> usize;

    fn get_state(&self, address: &Address, key: &Hash) -> Hash;

    /// Pre-transaction value of a slot. The caches serve the same value
    /// as [`StateView::get_state`]; a trie-backed implementation may
    /// distinguish the two.
    fn get_committed_state(&self, address: &Address, key: &Hash) -> Hash {
        self.get_state(address, key)
    }

    fn exists(&self, address: &Address) -> bool;

    fn is_empty(&self, address: &Address) -> bool;

    fn has_self_destructed(&self, address: &Address) -> bool;
}

/// Full mutable state surface the VM executes against. Drop-in across
/// the whole state stack.
pub trait WorkerState: StateView {
    fn create_account(&mut self, address: Address);

    fn add_balance(&mut self, address: &Address, amount: U256);

    fn sub_balance(&mut self, address: &Address, amount: U256);

    fn set_balance(&mut self, address: &Address, amount: U256);

    fn set_nonce(&mut self, address: &Address, nonce: u64);

    fn set_code(&mut self, address: &Address, code: Vec<u8>);

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash);

    fn self_destruct(&mut self, address: &Address);

    /// Open a new revision and return its id.
    fn snapshot(&mut self) -> usize;

    /// Undo everything since the given revision. Unknown ids are a
    /// caller bug and fail fast.
    fn revert_to_snapshot(&mut self, id: usize);

    /// Bind the transaction whose logs are being accumulated.
    fn set_tx_context(&mut self, tx_hash: Hash, index: usize);

    fn add_log(&mut self, log: Log);
}
