mod reserve;

pub use reserve::ReserveSet;

use lazy_static::lazy_static;
use parex_common::crypto::{hash_of, Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

lazy_static! {
    /// Synthetic key reserving an account's code payload.
    pub static ref CODE: Hash = hash_of(b"code");
    /// Synthetic key reserving an account's code hash.
    pub static ref CODE_HASH: Hash = hash_of(b"codeHash");
    /// Synthetic key reserving an account's balance.
    pub static ref BALANCE: Hash = hash_of(b"balance");
    /// Synthetic key reserving an account's nonce.
    pub static ref NONCE: Hash = hash_of(b"nonce");
    /// Synthetic key reserving an account's liveness flag.
    pub static ref ALIVE: Hash = hash_of(b"alive");
}

/// Render a key as its field label, or as hex when it is a plain slot.
pub fn decode_key(key: &Hash) -> String {
    if *key == *CODE {
        "code".to_owned()
    } else if *key == *BALANCE {
        "balance".to_owned()
    } else if *key == *ALIVE {
        "alive".to_owned()
    } else if *key == *CODE_HASH {
        "codeHash".to_owned()
    } else if *key == *NONCE {
        "nonce".to_owned()
    } else {
        format!("0x{}", key.to_hex())
    }
}

/// Inverse of [`decode_key`]; `None` when the hex payload is malformed.
pub fn encode_key(label: &str) -> Option<Hash> {
    match label {
        "code" => Some(CODE.clone()),
        "balance" => Some(BALANCE.clone()),
        "alive" => Some(ALIVE.clone()),
        "codeHash" => Some(CODE_HASH.clone()),
        "nonce" => Some(NONCE.clone()),
        other => Hash::from_str(other).ok(),
    }
}

/// The set of fields and slots a transaction touched, per address.
/// Insertion is idempotent; only set membership matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessTuple {
    inner: HashMap<Address, HashSet<Hash>>,
}

impl AccessTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, address: Address, key: Hash) {
        self.inner.entry(address).or_default().insert(key);
    }

    pub fn contains(&self, address: &Address, key: &Hash) -> bool {
        self.inner
            .get(address)
            .map(|state| state.contains(key))
            .unwrap_or(false)
    }

    pub fn extend(&mut self, other: &AccessTuple) {
        for (address, keys) in other.iter() {
            let state = self.inner.entry(*address).or_default();
            for key in keys {
                state.insert(key.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &HashSet<Hash>)> {
        self.inner.iter()
    }

    /// Flattened (address, key) pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&Address, &Hash)> {
        self.inner
            .iter()
            .flat_map(|(address, keys)| keys.iter().map(move |key| (address, key)))
    }

    /// Number of addresses with at least one key recorded.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True when some (address, key) pair appears in both tuples.
    pub fn intersects(&self, other: &AccessTuple) -> bool {
        // Probe from the smaller side
        let (probe, base) = if self.inner.len() <= other.inner.len() {
            (self, other)
        } else {
            (other, self)
        };
        probe
            .entries()
            .any(|(address, key)| base.contains(address, key))
    }
}

/// A transaction's read/write footprint. A key may legitimately appear
/// on both sides (read-modify-write).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RwSet {
    reads: AccessTuple,
    writes: AccessTuple,
}

impl RwSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&mut self, address: Address, key: Hash) {
        self.reads.add(address, key);
    }

    pub fn add_write(&mut self, address: Address, key: Hash) {
        self.writes.add(address, key);
    }

    pub fn reads(&self) -> &AccessTuple {
        &self.reads
    }

    pub fn writes(&self) -> &AccessTuple {
        &self.writes
    }

    /// Two footprints conflict iff a key written by one side is touched
    /// by the other. Symmetric by construction.
    pub fn has_conflict(&self, other: &RwSet) -> bool {
        self.writes.intersects(&other.writes)
            || self.writes.intersects(&other.reads)
            || self.reads.intersects(&other.writes)
    }

    /// Widen this footprint with everything `other` touched.
    pub fn merge(&mut self, other: &RwSet) {
        self.reads.extend(&other.reads);
        self.writes.extend(&other.writes);
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Diagnostic JSON form: address hex mapped to decoded key names.
    /// Intended for logging and test vectors only.
    pub fn to_json_struct(&self) -> RwSetJson {
        fn render(tuple: &AccessTuple) -> BTreeMap<String, Vec<String>> {
            let mut out = BTreeMap::new();
            for (address, keys) in tuple.iter() {
                let mut names: Vec<String> = keys.iter().map(decode_key).collect();
                names.sort();
                out.insert(format!("0x{}", address.to_hex()), names);
            }
            out
        }
        RwSetJson {
            read_set: render(&self.reads),
            write_set: render(&self.writes),
        }
    }
}

/// Serialized diagnostic form of an [`RwSet`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RwSetJson {
    #[serde(rename = "readSet")]
    pub read_set: BTreeMap<String, Vec<String>>,
    #[serde(rename = "writeSet")]
    pub write_set: BTreeMap<String, Vec<String>>,
}

impl RwSetJson {
    /// Decode back into a working footprint; `None` on malformed keys.
    pub fn to_rw_set(&self) -> Option<RwSet> {
        let mut set = RwSet::new();
        for (address, names) in &self.read_set {
            let address = Address::from_str(address).ok()?;
            for name in names {
                set.add_read(address, encode_key(name)?);
            }
        }
        for (address, names) in &self.write_set {
            let address = Address::from_str(address).ok()?;
            for name in names {
                set.add_write(address, encode_key(name)?);
            }
        }
        Some(set)
    }
}
