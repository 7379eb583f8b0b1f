use crate::state::WorkerState;
use parex_common::{
    crypto::{Address, Hash},
    gas::{GasError, GasPool},
    transaction::Message,
};
use primitive_types::U256;
use strum::Display;
use thiserror::Error;

/// Execution aborted inside the VM. Deterministic given the same state:
/// transactions failing this way are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("out of gas: {0}")]
    OutOfGas(#[from] GasError),

    #[error("stack underflow at {op}")]
    StackUnderflow { op: OpCode },

    #[error("sender balance below transferred value")]
    InsufficientBalance,

    #[error("contract address {0} already occupied")]
    CreateCollision(Address),

    #[error("undecodable call payload: {0}")]
    InvalidPayload(String),
}

/// Successful execution summary for one message.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReceipt {
    pub gas_used: u64,
    pub output: Vec<u8>,
}

/// The opcodes the prediction tracer understands. Everything else is
/// invisible to the footprint model.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Sload,
    Sstore,
    ExtCodeCopy,
    ExtCodeSize,
    ExtCodeHash,
    Balance,
    SelfDestruct,
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

/// Interpreter frame handed to per-opcode hooks: operand stack, memory
/// and the address of the executing contract.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
    pub contract: Address,
}

impl ScopeContext {
    pub fn new(contract: Address) -> Self {
        Self {
            stack: Vec::new(),
            memory: Vec::new(),
            contract,
        }
    }

    /// Operand `n` positions below the top of the stack.
    pub fn stack_back(&self, n: usize) -> Option<&U256> {
        let len = self.stack.len();
        if n < len {
            self.stack.get(len - 1 - n)
        } else {
            None
        }
    }

    /// Copy of `memory[offset .. offset + size]`, zero padded.
    pub fn memory_copy(&self, offset: usize, size: usize) -> Vec<u8> {
        let mut out = vec![0u8; size];
        if offset < self.memory.len() {
            let end = usize::min(offset + size, self.memory.len());
            out[..end - offset].copy_from_slice(&self.memory[offset..end]);
        }
        out
    }
}

/// Per-opcode observation hooks, the shape the VM drives its tracer
/// with. Only `capture_state` is mandatory; the bracketing callbacks
/// default to no-ops.
pub trait OpcodeTracer {
    fn capture_start(
        &mut self,
        _from: &Address,
        _to: Option<&Address>,
        _create: bool,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    fn capture_state(
        &mut self,
        pc: u64,
        op: OpCode,
        gas: u64,
        cost: u64,
        scope: &ScopeContext,
        depth: usize,
        err: Option<&VmError>,
    );

    fn capture_fault(
        &mut self,
        _pc: u64,
        _op: OpCode,
        _gas: u64,
        _cost: u64,
        _scope: &ScopeContext,
        _depth: usize,
        _err: &VmError,
    ) {
    }

    fn capture_end(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&VmError>) {}

    fn capture_enter(
        &mut self,
        _op: OpCode,
        _from: &Address,
        _to: &Address,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    fn capture_exit(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&VmError>) {}

    fn capture_tx_start(&mut self, _gas_limit: u64) {}

    fn capture_tx_end(&mut self, _rest_gas: u64) {}
}

/// The virtual machine the engine drives. Implementations must not care
/// which member of the state stack they run against.
pub trait Vm: Send + Sync {
    /// Apply one message to `state`, spending gas from `gas_pool`.
    fn apply_message(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
    ) -> Result<ExecutionReceipt, VmError>;

    /// Same, with every state-touching opcode reported to `tracer`.
    /// The tracer observes; it must never alter execution.
    fn apply_message_traced(
        &self,
        state: &mut dyn WorkerState,
        message: &Message,
        gas_pool: &mut GasPool,
        tracer: &mut dyn OpcodeTracer,
    ) -> Result<ExecutionReceipt, VmError>;
}

/// Helpers to move between stack operands and addresses/slot keys.
pub fn u256_to_address(value: &U256) -> Address {
    let bytes = value.to_big_endian();
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[12..]);
    Address::new(out)
}

pub fn u256_to_hash(value: &U256) -> Hash {
    Hash::new(value.to_big_endian())
}

pub fn address_to_u256(address: &Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}
