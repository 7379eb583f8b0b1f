use crate::access::{RwSet, ALIVE, BALANCE, CODE, CODE_HASH, NONCE};
use crate::state::{OverlayState, StateView};
use crate::vm::{u256_to_address, u256_to_hash, OpCode, OpcodeTracer, ScopeContext, Vm, VmError};
use parex_common::{
    config::ChainRules,
    crypto::{create_address, keccak256, Address},
    gas::GasPool,
    transaction::{Message, TransactionError},
};
use primitive_types::U256;
use std::collections::HashSet;

/// Opcode-level tracer accumulating the footprint of one tentative
/// execution. Accesses to stateless precompiles never enter the set.
pub struct AccessTracer {
    excl: HashSet<Address>,
    list: RwSet,
}

impl AccessTracer {
    pub fn new(precompiles: &[Address]) -> Self {
        Self {
            excl: precompiles.iter().copied().collect(),
            list: RwSet::new(),
        }
    }

    /// Start from a previously collected footprint, dropping whatever
    /// falls on an excluded address.
    pub fn with_seed(seed: &RwSet, precompiles: &[Address]) -> Self {
        let mut tracer = Self::new(precompiles);
        for (address, key) in seed.reads().entries() {
            tracer.add_read(*address, key.clone());
        }
        for (address, key) in seed.writes().entries() {
            tracer.add_write(*address, key.clone());
        }
        tracer
    }

    fn excluded(&self, address: &Address) -> bool {
        self.excl.contains(address)
    }

    fn add_read(&mut self, address: Address, key: parex_common::crypto::Hash) {
        if !self.excluded(&address) {
            self.list.add_read(address, key);
        }
    }

    fn add_write(&mut self, address: Address, key: parex_common::crypto::Hash) {
        if !self.excluded(&address) {
            self.list.add_write(address, key);
        }
    }

    /// Entries every execution of this message is certain to touch,
    /// derived from the message kind before the VM runs.
    pub fn seed_message(&mut self, message: &Message) {
        let from = *message.from();
        self.add_read(from, BALANCE.clone());
        self.add_write(from, BALANCE.clone());
        self.add_read(from, NONCE.clone());
        self.add_write(from, NONCE.clone());

        match message.to() {
            Some(to) => {
                let to = *to;
                self.add_read(to, CODE.clone());
                self.add_read(to, CODE_HASH.clone());
                if !message.value().is_zero() {
                    self.add_read(to, BALANCE.clone());
                    self.add_write(to, BALANCE.clone());
                }
            }
            None => {
                // the child address races on the sender nonce, so this
                // seed is best effort; a stale nonce surfaces later as a
                // misprediction
                let child = create_address(&from, message.nonce());
                self.add_write(child, BALANCE.clone());
                self.add_write(child, CODE_HASH.clone());
                self.add_write(child, CODE.clone());
                self.add_write(child, NONCE.clone());
                self.add_write(child, ALIVE.clone());
                self.add_read(child, NONCE.clone());
                self.add_read(child, CODE_HASH.clone());
            }
        }
    }

    pub fn rw_set(&self) -> &RwSet {
        &self.list
    }

    pub fn into_rw_set(self) -> RwSet {
        self.list
    }
}

impl OpcodeTracer for AccessTracer {
    fn capture_state(
        &mut self,
        _pc: u64,
        op: OpCode,
        _gas: u64,
        _cost: u64,
        scope: &ScopeContext,
        _depth: usize,
        _err: Option<&VmError>,
    ) {
        match op {
            OpCode::Sload => {
                if let Some(slot) = scope.stack_back(0) {
                    self.add_read(scope.contract, u256_to_hash(slot));
                }
            }
            OpCode::Sstore => {
                if let Some(slot) = scope.stack_back(0) {
                    self.add_write(scope.contract, u256_to_hash(slot));
                }
            }
            OpCode::ExtCodeCopy | OpCode::ExtCodeSize => {
                if let Some(target) = scope.stack_back(0) {
                    self.add_read(u256_to_address(target), CODE.clone());
                }
            }
            OpCode::ExtCodeHash => {
                if let Some(target) = scope.stack_back(0) {
                    self.add_read(u256_to_address(target), CODE_HASH.clone());
                }
            }
            OpCode::Balance => {
                if let Some(target) = scope.stack_back(0) {
                    self.add_read(u256_to_address(target), BALANCE.clone());
                }
            }
            OpCode::SelfDestruct => {
                if let Some(beneficiary) = scope.stack_back(0) {
                    let beneficiary = u256_to_address(beneficiary);
                    self.add_read(beneficiary, BALANCE.clone());
                    self.add_write(beneficiary, BALANCE.clone());
                    let contract = scope.contract;
                    self.add_write(contract, BALANCE.clone());
                    self.add_write(contract, ALIVE.clone());
                }
            }
            OpCode::Call => {
                if scope.stack.len() >= 5 {
                    let from = scope.contract;
                    let to = u256_to_address(scope.stack_back(1).expect("stack length checked"));
                    let value = *scope.stack_back(2).expect("stack length checked");
                    self.add_read(from, BALANCE.clone());
                    self.add_write(from, BALANCE.clone());
                    self.add_read(from, NONCE.clone());
                    self.add_write(from, NONCE.clone());
                    self.add_read(to, CODE.clone());
                    self.add_read(to, CODE_HASH.clone());
                    // a zero-value call is known not to touch the callee balance
                    if !value.is_zero() {
                        self.add_read(to, BALANCE.clone());
                        self.add_write(to, BALANCE.clone());
                    }
                }
            }
            OpCode::StaticCall | OpCode::DelegateCall | OpCode::CallCode => {
                if scope.stack.len() >= 5 {
                    let to = u256_to_address(scope.stack_back(1).expect("stack length checked"));
                    self.add_read(to, CODE.clone());
                    self.add_read(to, CODE_HASH.clone());
                }
            }
            OpCode::Create2 => {
                if scope.stack.len() >= 4 {
                    let from = scope.contract;
                    self.add_read(from, BALANCE.clone());
                    self.add_write(from, BALANCE.clone());
                    self.add_read(from, NONCE.clone());
                    self.add_write(from, NONCE.clone());

                    let offset = scope.stack_back(1).expect("stack length checked").low_u64() as usize;
                    let size = scope.stack_back(2).expect("stack length checked").low_u64() as usize;
                    let salt = u256_to_hash(scope.stack_back(3).expect("stack length checked"));
                    let init_code = scope.memory_copy(offset, size);
                    let code_hash = keccak256(&init_code);
                    let child =
                        parex_common::crypto::create2_address(&scope.contract, &salt, &code_hash);
                    self.add_write(child, BALANCE.clone());
                    self.add_write(child, CODE_HASH.clone());
                    self.add_write(child, CODE.clone());
                    self.add_write(child, NONCE.clone());
                    self.add_write(child, ALIVE.clone());
                    // probe for an occupied child address
                    self.add_read(child, NONCE.clone());
                    self.add_read(child, CODE_HASH.clone());
                }
            }
            // the child address of a plain CREATE depends on the sender
            // nonce; whatever the runtime touches is picked up instead
            OpCode::Create => {}
        }
    }
}

/// Predict one message's footprint by tentative execution against a
/// disposable overlay of `backing`. A VM rejection means "no footprint":
/// the scheduler keeps such transactions out of the parallel rounds.
pub fn predict_rw_set(
    vm: &dyn Vm,
    backing: &dyn StateView,
    message: &Message,
    rules: &ChainRules,
) -> Option<RwSet> {
    let mut overlay = OverlayState::new(backing);
    let mut tracer = AccessTracer::new(rules.active_precompiles());
    tracer.seed_message(message);
    let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
    match vm.apply_message_traced(&mut overlay, message, &mut gas_pool, &mut tracer) {
        Ok(_) => Some(tracer.into_rw_set()),
        Err(err) => {
            debug!("prediction failed for tx {}: {err}", message.tx_hash());
            None
        }
    }
}

/// Ground-truth footprint: run the message over a recording wrapper of
/// a disposable overlay and report exactly what it touched. Used to
/// validate opcode-level predictions after the fact; the executor uses
/// the same wrapper on-line for the Aria reservation phase.
pub fn observe_rw_set(
    vm: &dyn Vm,
    backing: &dyn StateView,
    message: &Message,
) -> Result<RwSet, crate::vm::VmError> {
    let overlay = OverlayState::new(backing);
    let mut wrapped = crate::state::WrappedState::new(overlay);
    let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
    vm.apply_message(&mut wrapped, message, &mut gas_pool)?;
    Ok(wrapped.take_rw_set())
}

/// Footprints for a whole block, aligned with the input; `None` marks
/// both invalid messages and failed predictions.
pub fn predict_rw_sets(
    vm: &dyn Vm,
    backing: &dyn StateView,
    messages: &[Result<Message, TransactionError>],
    rules: &ChainRules,
) -> Vec<Option<RwSet>> {
    messages
        .iter()
        .map(|message| {
            message
                .as_ref()
                .ok()
                .and_then(|message| predict_rw_set(vm, backing, message, rules))
        })
        .collect()
}
