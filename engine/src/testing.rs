//! Reference VM and fixtures used by the test suite and the benches.
//!
//! `ScriptVm` interprets a bincode-encoded op list against any
//! [`WorkerState`], reporting every state-touching step to the opcode
//! tracer the way an interpreter loop would. It exists to drive the
//! engine end to end; opcode semantics are deliberately minimal.

use crate::state::WorkerState;
use crate::vm::{
    address_to_u256, hash_to_u256, ExecutionReceipt, OpCode, OpcodeTracer, ScopeContext, Vm,
    VmError,
};
use parex_common::{
    block::{ChainContext, Header},
    crypto::{create2_address, create_address, keccak256, Address, Hash, EMPTY_CODE_HASH},
    gas::GasPool,
    transaction::{Log, Message, MessageKind, Transaction},
};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BASE_GAS: u64 = 21_000;

/// One scripted step. Each variant mirrors the opcode the prediction
/// tracer would see for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScriptOp {
    Sload { slot: Hash },
    Sstore { slot: Hash, value: Hash },
    BalanceOf { address: Address },
    CodeSizeOf { address: Address },
    CodeHashOf { address: Address },
    CodeCopy { address: Address },
    CallTransfer { to: Address, value: u64 },
    SelfDestruct { beneficiary: Address },
    Create2 { salt: Hash, code: Vec<u8> },
    EmitLog { topics: Vec<Hash>, data: Vec<u8> },
    /// Look a block header up through the chain context and log its
    /// hash; stateless, like the opcode it stands in for.
    BlockHash { number: u64 },
    Revert { reason: String },
}

/// A transaction payload for [`ScriptVm`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub ops: Vec<ScriptOp>,
}

impl Script {
    pub fn new(ops: Vec<ScriptOp>) -> Self {
        Self { ops }
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("script serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, VmError> {
        bincode::deserialize(bytes).map_err(|err| VmError::InvalidPayload(err.to_string()))
    }
}

fn op_gas(op: &ScriptOp) -> u64 {
    match op {
        ScriptOp::Sload { .. } => 2_100,
        ScriptOp::Sstore { .. } => 5_000,
        ScriptOp::BalanceOf { .. } => 2_600,
        ScriptOp::CodeSizeOf { .. } => 2_600,
        ScriptOp::CodeHashOf { .. } => 2_600,
        ScriptOp::CodeCopy { .. } => 2_600,
        ScriptOp::CallTransfer { .. } => 9_000,
        ScriptOp::SelfDestruct { .. } => 5_000,
        ScriptOp::Create2 { .. } => 32_000,
        ScriptOp::EmitLog { .. } => 375,
        ScriptOp::BlockHash { .. } => 20,
        ScriptOp::Revert { .. } => 0,
    }
}

/// The traced opcode and geth-shaped stack/memory frame for one step.
fn scope_for(op: &ScriptOp, contract: Address) -> Option<(OpCode, ScopeContext)> {
    let mut scope = ScopeContext::new(contract);
    let opcode = match op {
        ScriptOp::Sload { slot } => {
            scope.stack = vec![hash_to_u256(slot)];
            OpCode::Sload
        }
        ScriptOp::Sstore { slot, value } => {
            scope.stack = vec![hash_to_u256(value), hash_to_u256(slot)];
            OpCode::Sstore
        }
        ScriptOp::BalanceOf { address } => {
            scope.stack = vec![address_to_u256(address)];
            OpCode::Balance
        }
        ScriptOp::CodeSizeOf { address } => {
            scope.stack = vec![address_to_u256(address)];
            OpCode::ExtCodeSize
        }
        ScriptOp::CodeHashOf { address } => {
            scope.stack = vec![address_to_u256(address)];
            OpCode::ExtCodeHash
        }
        ScriptOp::CodeCopy { address } => {
            scope.stack = vec![address_to_u256(address)];
            OpCode::ExtCodeCopy
        }
        ScriptOp::CallTransfer { to, value } => {
            // .., ret_size, ret_offset, args_size, args_offset, value, to, gas
            scope.stack = vec![
                U256::zero(),
                U256::zero(),
                U256::zero(),
                U256::zero(),
                U256::from(*value),
                address_to_u256(to),
                U256::from(BASE_GAS),
            ];
            OpCode::Call
        }
        ScriptOp::SelfDestruct { beneficiary } => {
            scope.stack = vec![address_to_u256(beneficiary)];
            OpCode::SelfDestruct
        }
        ScriptOp::Create2 { salt, code } => {
            // .., salt, size, offset, value; init code sits at memory 0
            scope.stack = vec![
                hash_to_u256(salt),
                U256::from(code.len() as u64),
                U256::zero(),
                U256::zero(),
            ];
            scope.memory = code.clone();
            OpCode::Create2
        }
        // logs and header lookups are invisible to the footprint model
        ScriptOp::EmitLog { .. } | ScriptOp::BlockHash { .. } | ScriptOp::Revert { .. } => {
            return None
        }
    };
    Some((opcode, scope))
}

/// Minimal scripted interpreter over the engine's state surface.
#[derive(Clone, Default)]
pub struct ScriptVm {
    chain: Option<Arc<dyn ChainContext>>,
}

impl ScriptVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a chain context for header-lookup ops.
    pub fn with_chain_context(chain: Arc<dyn ChainContext>) -> Self {
        Self { chain: Some(chain) }
    }

    fn execute(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
        mut tracer: Option<&mut dyn OpcodeTracer>,
    ) -> Result<ExecutionReceipt, VmError> {
        let initial_gas = gas_pool.gas();
        if let Some(tracer) = tracer.as_deref_mut() {
            tracer.capture_tx_start(message.gas_limit());
            tracer.capture_start(
                message.from(),
                message.to(),
                message.is_create(),
                message.input(),
                message.gas_limit(),
                message.value(),
            );
        }

        let result = self.run_message(state, message, gas_pool, &mut tracer);
        let gas_used = initial_gas - gas_pool.gas();

        if let Some(tracer) = tracer.as_deref_mut() {
            tracer.capture_end(&[], gas_used, result.as_ref().err());
            tracer.capture_tx_end(gas_pool.gas());
        }
        result.map(|_| ExecutionReceipt {
            gas_used,
            output: Vec::new(),
        })
    }

    fn run_message(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
        tracer: &mut Option<&mut dyn OpcodeTracer>,
    ) -> Result<(), VmError> {
        gas_pool.sub_gas(BASE_GAS)?;

        let from = *message.from();
        let value = message.value();
        if state.get_balance(&from) < value {
            return Err(VmError::InsufficientBalance);
        }
        let nonce = state.get_nonce(&from);
        state.set_nonce(&from, nonce + 1);

        let (contract, script) = match message.kind() {
            MessageKind::Call(to) => {
                let to = *to;
                // load the callee the way an interpreter would
                let _ = state.get_code_hash(&to);
                let code = state.get_code(&to);
                if !value.is_zero() {
                    state.sub_balance(&from, value);
                    if !state.exists(&to) {
                        state.create_account(to);
                    }
                    state.add_balance(&to, value);
                }
                let source: &[u8] = if !message.input().is_empty() {
                    message.input()
                } else {
                    &code
                };
                if source.is_empty() {
                    return Ok(());
                }
                (to, Script::decode(source)?)
            }
            MessageKind::Create => {
                // the child address hangs off the sender's CURRENT nonce,
                // which is exactly why plain creations resist prediction
                let child = create_address(&from, nonce);
                if state.get_nonce(&child) != 0 {
                    return Err(VmError::CreateCollision(child));
                }
                let child_code_hash = state.get_code_hash(&child);
                if child_code_hash != Hash::zero() && child_code_hash != *EMPTY_CODE_HASH {
                    return Err(VmError::CreateCollision(child));
                }
                state.create_account(child);
                state.set_nonce(&child, 1);
                if !value.is_zero() {
                    state.sub_balance(&from, value);
                    state.add_balance(&child, value);
                }
                state.set_code(&child, message.input().to_vec());
                // an undecodable creation payload is plain data, not an error
                match Script::decode(message.input()) {
                    Ok(script) => (child, script),
                    Err(_) => return Ok(()),
                }
            }
        };

        self.run_script(state, contract, &script, gas_pool, tracer)
    }

    fn run_script(
        &self,
        state: &mut dyn WorkerState,
        contract: Address,
        script: &Script,
        gas_pool: &mut GasPool,
        tracer: &mut Option<&mut dyn OpcodeTracer>,
    ) -> Result<(), VmError> {
        for (pc, op) in script.ops.iter().enumerate() {
            let cost = op_gas(op);
            gas_pool.sub_gas(cost)?;
            if let Some(tracer) = tracer.as_deref_mut() {
                if let Some((opcode, scope)) = scope_for(op, contract) {
                    tracer.capture_state(pc as u64, opcode, gas_pool.gas(), cost, &scope, 1, None);
                }
            }
            self.apply_op(state, contract, op)?;
        }
        Ok(())
    }

    fn apply_op(
        &self,
        state: &mut dyn WorkerState,
        contract: Address,
        op: &ScriptOp,
    ) -> Result<(), VmError> {
        match op {
            ScriptOp::Sload { slot } => {
                let _ = state.get_state(&contract, slot);
            }
            ScriptOp::Sstore { slot, value } => {
                state.set_state(&contract, slot.clone(), value.clone());
            }
            ScriptOp::BalanceOf { address } => {
                let _ = state.get_balance(address);
            }
            ScriptOp::CodeSizeOf { address } => {
                let _ = state.get_code_size(address);
            }
            ScriptOp::CodeHashOf { address } => {
                let _ = state.get_code_hash(address);
            }
            ScriptOp::CodeCopy { address } => {
                let _ = state.get_code(address);
            }
            ScriptOp::CallTransfer { to, value } => {
                let _ = state.get_code_hash(to);
                let _ = state.get_code(to);
                let value = U256::from(*value);
                if !value.is_zero() {
                    if state.get_balance(&contract) < value {
                        return Err(VmError::InsufficientBalance);
                    }
                    state.sub_balance(&contract, value);
                    if !state.exists(to) {
                        state.create_account(*to);
                    }
                    state.add_balance(to, value);
                }
            }
            ScriptOp::SelfDestruct { beneficiary } => {
                let balance = state.get_balance(&contract);
                if !state.exists(beneficiary) {
                    state.create_account(*beneficiary);
                }
                state.add_balance(beneficiary, balance);
                state.self_destruct(&contract);
            }
            ScriptOp::Create2 { salt, code } => {
                let code_hash = keccak256(code);
                let child = create2_address(&contract, salt, &code_hash);
                if state.get_nonce(&child) != 0 {
                    return Err(VmError::CreateCollision(child));
                }
                let existing = state.get_code_hash(&child);
                if existing != Hash::zero() && existing != *EMPTY_CODE_HASH {
                    return Err(VmError::CreateCollision(child));
                }
                state.create_account(child);
                state.set_nonce(&child, 1);
                state.set_code(&child, code.clone());
            }
            ScriptOp::EmitLog { topics, data } => {
                state.add_log(Log::new(contract, topics.clone(), data.clone()));
            }
            ScriptOp::BlockHash { number } => {
                let header = self
                    .chain
                    .as_ref()
                    .and_then(|chain| chain.header_by_number(*number));
                if let Some(header) = header {
                    state.add_log(Log::new(
                        contract,
                        vec![header.get_hash().clone()],
                        Vec::new(),
                    ));
                }
            }
            ScriptOp::Revert { reason } => {
                return Err(VmError::Reverted(reason.clone()));
            }
        }
        Ok(())
    }
}

impl Vm for ScriptVm {
    fn apply_message(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
    ) -> Result<ExecutionReceipt, VmError> {
        self.execute(state, message, gas_pool, None)
    }

    fn apply_message_traced(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
        tracer: &mut dyn OpcodeTracer,
    ) -> Result<ExecutionReceipt, VmError> {
        self.execute(state, message, gas_pool, Some(tracer))
    }
}

/// Plain value transfer.
pub fn transfer_tx(seed: u64, from: Address, to: Address, value: u64, nonce: u64) -> Transaction {
    Transaction::new(
        Hash::from_u64(seed),
        from,
        Some(to),
        U256::from(value),
        nonce,
        100_000,
        Vec::new(),
    )
}

/// Call carrying a script payload.
pub fn script_tx(
    seed: u64,
    from: Address,
    to: Address,
    value: u64,
    nonce: u64,
    script: &Script,
) -> Transaction {
    Transaction::new(
        Hash::from_u64(seed),
        from,
        Some(to),
        U256::from(value),
        nonce,
        1_000_000,
        script.encode(),
    )
}

/// Contract creation carrying a script payload as its init/runtime code.
pub fn create_tx(seed: u64, from: Address, value: u64, nonce: u64, script: &Script) -> Transaction {
    Transaction::new(
        Hash::from_u64(seed),
        from,
        None,
        U256::from(value),
        nonce,
        1_000_000,
        script.encode(),
    )
}

/// An authoritative in-memory state with the given balances funded.
pub fn funded_state(accounts: &[(Address, u64)]) -> crate::state::MemoryState {
    let mut state = crate::state::MemoryState::new();
    for (address, balance) in accounts {
        state.create_account(*address);
        state.set_balance(address, U256::from(*balance));
    }
    state
}

pub fn test_header(number: u64) -> Header {
    Header::new(
        number,
        Hash::from_u64(number),
        Hash::from_u64(number.saturating_sub(1)),
        1_700_000_000,
        30_000_000,
        Address::from_u64(0xc0ffee),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryState, StateView};
    use crate::state::WorkerState as _;

    fn addr(n: u64) -> Address {
        Address::from_u64(n)
    }

    fn apply(state: &mut MemoryState, tx: &Transaction) -> Result<ExecutionReceipt, VmError> {
        let vm = ScriptVm::new();
        let message = Message::from_transaction(tx).unwrap();
        let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
        vm.apply_message(state, &message, &mut gas_pool)
    }

    #[test]
    fn transfer_moves_value_and_bumps_the_nonce() {
        let mut state = funded_state(&[(addr(1), 10)]);
        apply(&mut state, &transfer_tx(1, addr(1), addr(2), 4, 0)).unwrap();

        assert_eq!(state.get_balance(&addr(1)), U256::from(6u64));
        assert_eq!(state.get_balance(&addr(2)), U256::from(4u64));
        assert_eq!(state.get_nonce(&addr(1)), 1);
    }

    #[test]
    fn insufficient_balance_fails_deterministically() {
        let mut state = funded_state(&[(addr(1), 3)]);
        let err = apply(&mut state, &transfer_tx(1, addr(1), addr(2), 4, 0)).unwrap_err();
        assert_eq!(err, VmError::InsufficientBalance);
    }

    #[test]
    fn scripts_read_and_write_storage() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![
            ScriptOp::Sstore {
                slot: Hash::from_u64(1),
                value: Hash::from_u64(42),
            },
            ScriptOp::Sload {
                slot: Hash::from_u64(1),
            },
        ]);
        apply(&mut state, &script_tx(1, addr(1), addr(5), 0, 0, &script)).unwrap();
        assert_eq!(
            state.get_state(&addr(5), &Hash::from_u64(1)),
            Hash::from_u64(42)
        );
    }

    #[test]
    fn revert_surfaces_as_a_vm_error() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![ScriptOp::Revert {
            reason: "nope".into(),
        }]);
        let err = apply(&mut state, &script_tx(1, addr(1), addr(5), 0, 0, &script)).unwrap_err();
        assert_eq!(err, VmError::Reverted("nope".into()));
    }

    #[test]
    fn creation_deploys_code_at_the_nonce_address() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![ScriptOp::Sstore {
            slot: Hash::from_u64(1),
            value: Hash::from_u64(9),
        }]);
        apply(&mut state, &create_tx(1, addr(1), 0, 0, &script)).unwrap();

        let child = create_address(&addr(1), 0);
        assert!(state.exists(&child));
        assert_eq!(state.get_nonce(&child), 1);
        assert!(!state.get_code(&child).is_empty());
        assert_eq!(
            state.get_state(&child, &Hash::from_u64(1)),
            Hash::from_u64(9)
        );
    }

    #[test]
    fn calling_deployed_code_runs_it() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![ScriptOp::Sstore {
            slot: Hash::from_u64(7),
            value: Hash::from_u64(1),
        }]);
        apply(&mut state, &create_tx(1, addr(1), 0, 0, &script)).unwrap();

        let child = create_address(&addr(1), 0);
        // empty input: the callee's stored code runs
        let call = Transaction::new(
            Hash::from_u64(2),
            addr(1),
            Some(child),
            U256::zero(),
            1,
            1_000_000,
            Vec::new(),
        );
        apply(&mut state, &call).unwrap();
        assert_eq!(
            state.get_state(&child, &Hash::from_u64(7)),
            Hash::from_u64(1)
        );
    }

    #[test]
    fn out_of_gas_stops_the_script() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![
            ScriptOp::Sstore {
                slot: Hash::from_u64(1),
                value: Hash::from_u64(1),
            };
            10
        ]);
        let tx = Transaction::new(
            Hash::from_u64(1),
            addr(1),
            Some(addr(5)),
            U256::zero(),
            0,
            BASE_GAS + 2 * 5_000,
            script.encode(),
        );
        let err = apply(&mut state, &tx).unwrap_err();
        assert!(matches!(err, VmError::OutOfGas(_)));
    }

    #[test]
    fn call_transfer_moves_value_from_the_contract() {
        let mut state = funded_state(&[(addr(1), 10), (addr(5), 50)]);
        let script = Script::new(vec![
            ScriptOp::CodeHashOf { address: addr(6) },
            ScriptOp::CodeSizeOf { address: addr(6) },
            ScriptOp::CallTransfer {
                to: addr(6),
                value: 30,
            },
        ]);
        apply(&mut state, &script_tx(1, addr(1), addr(5), 0, 0, &script)).unwrap();

        assert_eq!(state.get_balance(&addr(5)), U256::from(20u64));
        assert_eq!(state.get_balance(&addr(6)), U256::from(30u64));
    }

    #[test]
    fn create2_deploys_at_the_salted_address() {
        let mut state = funded_state(&[(addr(1), 10)]);
        let code = vec![0xfe, 0xed];
        let script = Script::new(vec![ScriptOp::Create2 {
            salt: Hash::from_u64(3),
            code: code.clone(),
        }]);
        apply(&mut state, &script_tx(1, addr(1), addr(5), 0, 0, &script)).unwrap();

        let child = create2_address(&addr(5), &Hash::from_u64(3), &keccak256(&code));
        assert!(state.exists(&child));
        assert_eq!(state.get_code(&child), code);
        assert_eq!(state.get_nonce(&child), 1);

        // deploying at the same salt again collides
        let err = apply(&mut state, &script_tx(2, addr(1), addr(5), 0, 1, &script)).unwrap_err();
        assert_eq!(err, VmError::CreateCollision(child));
    }

    #[test]
    fn block_hash_lookup_goes_through_the_chain_context() {
        use parex_common::block::StaticChainContext;

        let header = test_header(7);
        let vm = ScriptVm::with_chain_context(Arc::new(StaticChainContext::new(header.clone())));
        let mut state = funded_state(&[(addr(1), 10)]);
        let script = Script::new(vec![ScriptOp::BlockHash { number: 7 }]);
        let tx = script_tx(1, addr(1), addr(5), 0, 0, &script);

        let message = Message::from_transaction(&tx).unwrap();
        state.set_tx_context(tx.get_hash().clone(), 0);
        let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
        vm.apply_message(&mut state, &message, &mut gas_pool).unwrap();

        let logs = &state.logs()[tx.get_hash()];
        assert_eq!(logs[0].topics, vec![header.get_hash().clone()]);
    }

    #[test]
    fn self_destruct_moves_the_balance() {
        let mut state = funded_state(&[(addr(1), 10), (addr(5), 100)]);
        let script = Script::new(vec![ScriptOp::SelfDestruct {
            beneficiary: addr(9),
        }]);
        apply(&mut state, &script_tx(1, addr(1), addr(5), 0, 0, &script)).unwrap();

        assert_eq!(state.get_balance(&addr(9)), U256::from(100u64));
        assert!(state.has_self_destructed(&addr(5)));
        assert!(state.get_balance(&addr(5)).is_zero());
    }
}
