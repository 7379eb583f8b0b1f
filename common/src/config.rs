use crate::{block::Header, crypto::Address};
use lazy_static::lazy_static;

/// Height at which the extended precompile set activates.
pub const POINT_EVAL_FORK_HEIGHT: u64 = 1_000_000;

lazy_static! {
    /// Stateless precompiles present from genesis (0x01..=0x09).
    static ref BASE_PRECOMPILES: Vec<Address> = (1u64..=9).map(Address::from_u64).collect();
}

/// Chain rules derived from a block header. No global state: every
/// component that needs the rules receives them explicitly.
#[derive(Debug, Clone)]
pub struct ChainRules {
    precompiles: Vec<Address>,
}

impl ChainRules {
    /// Rules in force for the given header.
    pub fn at(header: &Header) -> Self {
        let mut precompiles = BASE_PRECOMPILES.clone();
        if header.get_number() >= POINT_EVAL_FORK_HEIGHT {
            precompiles.push(Address::from_u64(0x0a));
        }
        Self { precompiles }
    }

    /// Addresses whose accesses the prediction tracer must ignore.
    pub fn active_precompiles(&self) -> &[Address] {
        &self.precompiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    fn header_at(number: u64) -> Header {
        Header::new(
            number,
            Hash::from_u64(number),
            Hash::from_u64(number.saturating_sub(1)),
            0,
            30_000_000,
            Address::zero(),
        )
    }

    #[test]
    fn base_set_before_fork() {
        let rules = ChainRules::at(&header_at(0));
        assert_eq!(rules.active_precompiles().len(), 9);
    }

    #[test]
    fn extended_set_after_fork() {
        let rules = ChainRules::at(&header_at(POINT_EVAL_FORK_HEIGHT));
        assert_eq!(rules.active_precompiles().len(), 10);
        assert!(rules
            .active_precompiles()
            .contains(&Address::from_u64(0x0a)));
    }
}
