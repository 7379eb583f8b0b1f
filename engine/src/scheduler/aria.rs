use crate::access::{ReserveSet, RwSet};
use crate::TxId;

/// Reservation bookkeeping for one Aria round.
///
/// Workers reserve the footprint they actually observed while the round
/// runs; the validation sweep afterwards admits a transaction only when
/// no lower-id transaction wrote any of its writes (WAW), wrote any of
/// its reads (RAW), or read any of its writes (WAR). This is the
/// conjunctive form of the Aria rule, stricter than the published
/// `!WAW && (!RAW || !WAR)`: every set admitted here is also admissible
/// under the paper's inequalities.
#[derive(Debug, Default)]
pub struct AriaValidator {
    read_reserve: ReserveSet,
    write_reserve: ReserveSet,
}

impl AriaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction's observed footprint. Safe to call from
    /// concurrent workers.
    pub fn reserve(&self, tid: TxId, observed: &RwSet) {
        self.read_reserve.reserve(observed.reads(), tid);
        self.write_reserve.reserve(observed.writes(), tid);
    }

    /// Commit decision for one transaction, taken after the parallel
    /// phase has fully drained.
    pub fn commit_allowed(&self, tid: TxId, observed: &RwSet) -> bool {
        let waw = self.write_reserve.has_conflict(tid, observed.writes());
        let raw = self.write_reserve.has_conflict(tid, observed.reads());
        let war = self.read_reserve.has_conflict(tid, observed.writes());
        !(waw || raw || war)
    }
}
