use crate::crypto::{Address, Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised while turning a raw transaction into an executable
/// message. Such transactions never reach the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0} has a zero gas limit")]
    ZeroGasLimit(Hash),

    #[error("transaction {0} creates a contract with empty init code")]
    EmptyInitCode(Hash),
}

/// An ordered block transaction as handed to the engine.
///
/// Signature recovery happens upstream: `from` is already the recovered
/// sender. `to = None` denotes contract creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    hash: Hash,
    from: Address,
    to: Option<Address>,
    value: U256,
    nonce: u64,
    gas_limit: u64,
    input: Vec<u8>,
}

impl Transaction {
    pub fn new(
        hash: Hash,
        from: Address,
        to: Option<Address>,
        value: U256,
        nonce: u64,
        gas_limit: u64,
        input: Vec<u8>,
    ) -> Self {
        Self {
            hash,
            from,
            to,
            value,
            nonce,
            gas_limit,
            input,
        }
    }

    pub fn get_hash(&self) -> &Hash {
        &self.hash
    }

    pub fn get_source(&self) -> &Address {
        &self.from
    }

    pub fn get_destination(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    pub fn get_value(&self) -> U256 {
        self.value
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_input(&self) -> &[u8] {
        &self.input
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// Call target of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain call, value-carrying or not.
    Call(Address),
    /// Contract creation; the child address depends on the sender nonce.
    Create,
}

/// The VM-facing form of a transaction.
#[derive(Debug, Clone)]
pub struct Message {
    tx_hash: Hash,
    from: Address,
    kind: MessageKind,
    value: U256,
    nonce: u64,
    gas_limit: u64,
    input: Vec<u8>,
}

impl Message {
    /// Build a message from a transaction, rejecting malformed ones.
    pub fn from_transaction(tx: &Transaction) -> Result<Self, TransactionError> {
        if tx.gas_limit == 0 {
            return Err(TransactionError::ZeroGasLimit(tx.hash.clone()));
        }
        let kind = match tx.to {
            Some(to) => MessageKind::Call(to),
            None => {
                if tx.input.is_empty() {
                    return Err(TransactionError::EmptyInitCode(tx.hash.clone()));
                }
                MessageKind::Create
            }
        };
        Ok(Self {
            tx_hash: tx.hash.clone(),
            from: tx.from,
            kind,
            value: tx.value,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            input: tx.input.clone(),
        })
    }

    pub fn tx_hash(&self) -> &Hash {
        &self.tx_hash
    }

    pub fn from(&self) -> &Address {
        &self.from
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Call target, if any.
    pub fn to(&self) -> Option<&Address> {
        match &self.kind {
            MessageKind::Call(to) => Some(to),
            MessageKind::Create => None,
        }
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn is_create(&self) -> bool {
        self.kind == MessageKind::Create
    }
}

/// An event record emitted during execution. The transaction binding
/// fields are filled in by the state the VM runs against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    /// Hash of the transaction that emitted the log.
    pub tx_hash: Hash,
    /// Index of that transaction inside its block.
    pub tx_index: usize,
    /// Position of the log within the transaction.
    pub log_index: usize,
}

impl Log {
    pub fn new(address: Address, topics: Vec<Hash>, data: Vec<u8>) -> Self {
        Self {
            address,
            topics,
            data,
            tx_hash: Hash::zero(),
            tx_index: 0,
            log_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(to: Option<Address>, gas_limit: u64, input: Vec<u8>) -> Transaction {
        Transaction::new(
            Hash::from_u64(1),
            Address::from_u64(1),
            to,
            U256::from(5u64),
            0,
            gas_limit,
            input,
        )
    }

    #[test]
    fn message_from_call() {
        let to = Address::from_u64(2);
        let msg = Message::from_transaction(&tx(Some(to), 21_000, Vec::new())).unwrap();
        assert_eq!(msg.to(), Some(&to));
        assert!(!msg.is_create());
    }

    #[test]
    fn zero_gas_limit_is_invalid() {
        let err = Message::from_transaction(&tx(Some(Address::from_u64(2)), 0, Vec::new()));
        assert!(matches!(err, Err(TransactionError::ZeroGasLimit(_))));
    }

    #[test]
    fn create_requires_init_code() {
        let err = Message::from_transaction(&tx(None, 100_000, Vec::new()));
        assert!(matches!(err, Err(TransactionError::EmptyInitCode(_))));

        let msg = Message::from_transaction(&tx(None, 100_000, vec![0x60])).unwrap();
        assert!(msg.is_create());
        assert_eq!(msg.to(), None);
    }
}
