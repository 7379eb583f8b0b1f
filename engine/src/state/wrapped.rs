use super::{StateView, WorkerState};
use crate::access::{RwSet, ALIVE, BALANCE, CODE, CODE_HASH, NONCE};
use parex_common::{
    crypto::{Address, Hash},
    transaction::Log,
};
use primitive_types::U256;
use std::cell::RefCell;

/// Records every getter into the read set and every setter into the
/// write set of an exchangeable [`RwSet`], while delegating to the inner
/// state. This is the ground-truth footprint extractor: it validates
/// predictions after the fact and collects observed sets on-line for the
/// Aria reservation phase.
pub struct WrappedState<S> {
    inner: S,
    // RefCell: reads are recorded from &self getters
    rw_set: RefCell<RwSet>,
}

impl<S> WrappedState<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            rw_set: RefCell::new(RwSet::new()),
        }
    }

    /// Swap in a fresh footprint before a transaction runs.
    pub fn set_rw_set(&mut self, rw_set: RwSet) {
        *self.rw_set.borrow_mut() = rw_set;
    }

    /// Take the footprint observed since the last exchange.
    pub fn take_rw_set(&mut self) -> RwSet {
        self.rw_set.replace(RwSet::new())
    }

    pub fn rw_set(&self) -> RwSet {
        self.rw_set.borrow().clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn note_read(&self, address: &Address, key: Hash) {
        self.rw_set.borrow_mut().add_read(*address, key);
    }

    fn note_write(&mut self, address: &Address, key: Hash) {
        self.rw_set.borrow_mut().add_write(*address, key);
    }
}

impl<S: StateView> StateView for WrappedState<S> {
    fn get_balance(&self, address: &Address) -> U256 {
        self.note_read(address, BALANCE.clone());
        self.inner.get_balance(address)
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.note_read(address, NONCE.clone());
        self.inner.get_nonce(address)
    }

    fn get_code_hash(&self, address: &Address) -> Hash {
        self.note_read(address, CODE_HASH.clone());
        self.inner.get_code_hash(address)
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        self.note_read(address, CODE.clone());
        self.inner.get_code(address)
    }

    fn get_code_size(&self, address: &Address) -> usize {
        self.note_read(address, CODE.clone());
        self.inner.get_code_size(address)
    }

    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        self.note_read(address, key.clone());
        self.inner.get_state(address, key)
    }

    fn get_committed_state(&self, address: &Address, key: &Hash) -> Hash {
        self.note_read(address, key.clone());
        self.inner.get_committed_state(address, key)
    }

    fn exists(&self, address: &Address) -> bool {
        self.note_read(address, ALIVE.clone());
        self.inner.exists(address)
    }

    fn is_empty(&self, address: &Address) -> bool {
        self.note_read(address, ALIVE.clone());
        self.inner.is_empty(address)
    }

    fn has_self_destructed(&self, address: &Address) -> bool {
        self.note_read(address, ALIVE.clone());
        self.inner.has_self_destructed(address)
    }
}

impl<S: WorkerState> WorkerState for WrappedState<S> {
    fn create_account(&mut self, address: Address) {
        self.note_write(&address, ALIVE.clone());
        self.inner.create_account(address);
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        self.note_read(address, BALANCE.clone());
        self.note_write(address, BALANCE.clone());
        self.inner.add_balance(address, amount);
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        self.note_read(address, BALANCE.clone());
        self.note_write(address, BALANCE.clone());
        self.inner.sub_balance(address, amount);
    }

    fn set_balance(&mut self, address: &Address, amount: U256) {
        self.note_write(address, BALANCE.clone());
        self.inner.set_balance(address, amount);
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.note_write(address, NONCE.clone());
        self.inner.set_nonce(address, nonce);
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        self.note_write(address, CODE.clone());
        self.note_write(address, CODE_HASH.clone());
        self.inner.set_code(address, code);
    }

    fn set_state(&mut self, address: &Address, key: Hash, value: Hash) {
        self.note_write(address, key.clone());
        self.inner.set_state(address, key, value);
    }

    fn self_destruct(&mut self, address: &Address) {
        self.note_write(address, ALIVE.clone());
        self.note_write(address, BALANCE.clone());
        self.inner.self_destruct(address);
    }

    fn snapshot(&mut self) -> usize {
        self.inner.snapshot()
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        self.inner.revert_to_snapshot(id);
    }

    fn set_tx_context(&mut self, tx_hash: Hash, index: usize) {
        self.inner.set_tx_context(tx_hash, index);
    }

    fn add_log(&mut self, log: Log) {
        self.inner.add_log(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;

    fn addr(n: u64) -> Address {
        Address::from_u64(n)
    }

    #[test]
    fn getters_enter_the_read_set() {
        let mut backing = MemoryState::new();
        backing.set_balance(&addr(1), U256::from(3u64));
        let wrapped = WrappedState::new(backing);

        wrapped.get_balance(&addr(1));
        wrapped.get_state(&addr(1), &Hash::from_u64(5));

        let observed = wrapped.rw_set();
        assert!(observed.reads().contains(&addr(1), &BALANCE));
        assert!(observed.reads().contains(&addr(1), &Hash::from_u64(5)));
        assert!(observed.writes().is_empty());
    }

    #[test]
    fn setters_enter_the_write_set() {
        let mut wrapped = WrappedState::new(MemoryState::new());
        wrapped.set_balance(&addr(2), U256::from(9u64));
        wrapped.set_state(&addr(2), Hash::from_u64(5), Hash::from_u64(6));

        let observed = wrapped.rw_set();
        assert!(observed.writes().contains(&addr(2), &BALANCE));
        assert!(observed.writes().contains(&addr(2), &Hash::from_u64(5)));
    }

    #[test]
    fn balance_arithmetic_is_read_modify_write() {
        let mut wrapped = WrappedState::new(MemoryState::new());
        wrapped.add_balance(&addr(1), U256::from(1u64));
        let observed = wrapped.rw_set();
        assert!(observed.reads().contains(&addr(1), &BALANCE));
        assert!(observed.writes().contains(&addr(1), &BALANCE));
    }

    #[test]
    fn exchange_protocol_swaps_footprints() {
        let mut wrapped = WrappedState::new(MemoryState::new());
        wrapped.get_balance(&addr(1));
        let first = wrapped.take_rw_set();
        assert!(first.reads().contains(&addr(1), &BALANCE));

        wrapped.get_nonce(&addr(2));
        let second = wrapped.take_rw_set();
        assert!(!second.reads().contains(&addr(1), &BALANCE));
        assert!(second.reads().contains(&addr(2), &NONCE));
    }
}
