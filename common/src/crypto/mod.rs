mod address;
mod hash;

pub use address::{Address, ADDRESS_SIZE};
pub use hash::{hash_of, keccak256, Hash, HASH_SIZE};

use lazy_static::lazy_static;

lazy_static! {
    /// Keccak-256 of the empty byte string, carried by every account
    /// without deployed code.
    pub static ref EMPTY_CODE_HASH: Hash = keccak256(&[]);
}

/// Contract address for a plain creation: digest of sender and nonce.
/// The nonce dependency is why plain creations resist prediction.
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut input = Vec::with_capacity(ADDRESS_SIZE + 8);
    input.extend_from_slice(sender.as_bytes());
    input.extend_from_slice(&nonce.to_be_bytes());
    truncate_to_address(keccak256(&input))
}

/// Contract address for a salted creation: digest of sender, salt and
/// init-code hash. Fully determined before execution.
pub fn create2_address(sender: &Address, salt: &Hash, code_hash: &Hash) -> Address {
    let mut input = Vec::with_capacity(1 + ADDRESS_SIZE + 2 * HASH_SIZE);
    input.push(0xff);
    input.extend_from_slice(sender.as_bytes());
    input.extend_from_slice(salt.as_bytes());
    input.extend_from_slice(code_hash.as_bytes());
    truncate_to_address(keccak256(&input))
}

fn truncate_to_address(hash: Hash) -> Address {
    let mut out = [0u8; ADDRESS_SIZE];
    out.copy_from_slice(&hash.as_bytes()[HASH_SIZE - ADDRESS_SIZE..]);
    Address::new(out)
}
