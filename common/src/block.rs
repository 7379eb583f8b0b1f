use crate::crypto::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Block header fields the engine needs: enough to derive chain rules
/// and to bind execution to a height.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    number: u64,
    hash: Hash,
    parent_hash: Hash,
    timestamp: u64,
    gas_limit: u64,
    coinbase: Address,
}

impl Header {
    pub fn new(
        number: u64,
        hash: Hash,
        parent_hash: Hash,
        timestamp: u64,
        gas_limit: u64,
        coinbase: Address,
    ) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp,
            gas_limit,
            coinbase,
        }
    }

    pub fn get_number(&self) -> u64 {
        self.number
    }

    pub fn get_hash(&self) -> &Hash {
        &self.hash
    }

    pub fn get_parent_hash(&self) -> &Hash {
        &self.parent_hash
    }

    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_coinbase(&self) -> &Address {
        &self.coinbase
    }
}

/// Header lookup surface the engine consumes. Implemented by the block
/// store of the embedding node; tests use a static in-memory variant.
pub trait ChainContext: Send + Sync {
    fn header_by_number(&self, number: u64) -> Option<Header>;

    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    /// Header of the block currently being processed.
    fn current_header(&self) -> Header;
}

/// Fixed single-header context, enough for block-at-a-time processing.
#[derive(Debug, Clone)]
pub struct StaticChainContext {
    header: Header,
}

impl StaticChainContext {
    pub fn new(header: Header) -> Self {
        Self { header }
    }
}

impl ChainContext for StaticChainContext {
    fn header_by_number(&self, number: u64) -> Option<Header> {
        (number == self.header.number).then(|| self.header.clone())
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        (*hash == self.header.hash).then(|| self.header.clone())
    }

    fn current_header(&self) -> Header {
        self.header.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_context_serves_its_header() {
        let header = Header::new(
            7,
            Hash::from_u64(7),
            Hash::from_u64(6),
            1_700_000_000,
            30_000_000,
            Address::from_u64(0xc0),
        );
        let ctx = StaticChainContext::new(header.clone());
        assert_eq!(ctx.header_by_number(7), Some(header.clone()));
        assert_eq!(ctx.header_by_number(8), None);
        assert_eq!(ctx.header_by_hash(&Hash::from_u64(7)), Some(header.clone()));
        assert_eq!(ctx.current_header(), header);
    }
}
