mod aria;

pub use aria::AriaValidator;

use crate::access::RwSet;
use crate::graph::{DirectedGraph, UndirectedGraph};
use crate::mis;
use crate::TxId;
use parex_common::transaction::Transaction;
use strum::Display;

/// The four scheduling strategies. All of them honor the same contract:
/// the union of the produced chains is exactly the set of schedulable
/// transactions, once each.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Connected components of the conflict graph run concurrently;
    /// inside a component execution is sequential in id order.
    Components,
    /// Directed layering: each round is the current in-degree-zero set.
    DegreeZero,
    /// Repeated maximal-independent-set peeling.
    Mis,
    /// Optimistic single round with reservation-based validation.
    Aria,
}

/// Transactions executed sequentially on one worker, in order.
pub type Chain = Vec<TxId>;

/// Chains that may execute concurrently.
pub type Round = Vec<Chain>;

/// Ordered rounds for one block.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub rounds: Vec<Round>,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.rounds.iter().all(|round| round.is_empty())
    }

    /// Total number of scheduled transactions across all rounds.
    pub fn tx_count(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|round| round.iter())
            .map(|chain| chain.len())
            .sum()
    }

    pub fn tx_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.rounds
            .iter()
            .flat_map(|round| round.iter())
            .flat_map(|chain| chain.iter().copied())
    }
}

/// Undirected conflict graph over the schedulable transactions.
/// Transactions without a footprint are skipped entirely.
pub fn build_undirected_graph(
    txs: &[Transaction],
    rw_sets: &[Option<RwSet>],
) -> UndirectedGraph {
    let mut graph = UndirectedGraph::new();
    for (id, tx) in txs.iter().enumerate() {
        if rw_sets[id].is_some() {
            graph.add_vertex(tx.get_hash().clone(), id);
        }
    }
    for i in 0..txs.len() {
        let Some(a) = rw_sets[i].as_ref() else { continue };
        for j in i + 1..txs.len() {
            let Some(b) = rw_sets[j].as_ref() else { continue };
            if a.has_conflict(b) {
                graph.add_edge(i, j);
            }
        }
    }
    graph
}

/// Directed variant: every conflict edge points from the lower to the
/// higher transaction id.
pub fn build_directed_graph(txs: &[Transaction], rw_sets: &[Option<RwSet>]) -> DirectedGraph {
    let mut graph = DirectedGraph::new();
    for (id, tx) in txs.iter().enumerate() {
        if rw_sets[id].is_some() {
            graph.add_vertex(tx.get_hash().clone(), id);
        }
    }
    for i in 0..txs.len() {
        let Some(a) = rw_sets[i].as_ref() else { continue };
        for j in i + 1..txs.len() {
            let Some(b) = rw_sets[j].as_ref() else { continue };
            if a.has_conflict(b) {
                graph.add_edge(i, j);
            }
        }
    }
    graph
}

/// Compute the parallel rounds for a block under the given strategy.
pub fn schedule(strategy: Strategy, txs: &[Transaction], rw_sets: &[Option<RwSet>]) -> Schedule {
    let schedule = match strategy {
        Strategy::Components => components_schedule(txs, rw_sets),
        Strategy::DegreeZero => degree_zero_schedule(txs, rw_sets),
        Strategy::Mis => mis_schedule(txs, rw_sets),
        Strategy::Aria => aria_schedule(rw_sets),
    };
    if log_enabled!(log::Level::Debug) {
        debug!(
            "{strategy} scheduled {} txs into {} rounds",
            schedule.tx_count(),
            schedule.rounds.len()
        );
    }
    schedule
}

fn components_schedule(txs: &[Transaction], rw_sets: &[Option<RwSet>]) -> Schedule {
    let graph = build_undirected_graph(txs, rw_sets);
    let mut chains: Vec<Chain> = graph
        .connected_components()
        .into_iter()
        .map(|mut component| {
            component.sort_unstable();
            component
        })
        .collect();
    chains.sort_by_key(|chain| chain[0]);
    if chains.is_empty() {
        Schedule::default()
    } else {
        Schedule {
            rounds: vec![chains],
        }
    }
}

fn degree_zero_schedule(txs: &[Transaction], rw_sets: &[Option<RwSet>]) -> Schedule {
    let graph = build_directed_graph(txs, rw_sets);
    let rounds = graph
        .degree_zero_layers()
        .into_iter()
        .map(|layer| layer.into_iter().map(|id| vec![id]).collect())
        .collect();
    Schedule { rounds }
}

fn mis_schedule(txs: &[Transaction], rw_sets: &[Option<RwSet>]) -> Schedule {
    let graph = build_undirected_graph(txs, rw_sets);
    let rounds = mis::peel_rounds(&graph)
        .into_iter()
        .map(|set| set.into_iter().map(|id| vec![id]).collect())
        .collect();
    Schedule { rounds }
}

fn aria_schedule(rw_sets: &[Option<RwSet>]) -> Schedule {
    let chains: Vec<Chain> = rw_sets
        .iter()
        .enumerate()
        .filter_map(|(id, set)| set.as_ref().map(|_| vec![id]))
        .collect();
    if chains.is_empty() {
        Schedule::default()
    } else {
        Schedule {
            rounds: vec![chains],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parex_common::crypto::{Address, Hash};
    use primitive_types::U256;

    fn tx(id: u64) -> Transaction {
        Transaction::new(
            Hash::from_u64(id),
            Address::from_u64(id + 100),
            Some(Address::from_u64(id + 200)),
            U256::zero(),
            0,
            21_000,
            Vec::new(),
        )
    }

    fn slot_set(address: u64, key: u64, write: bool) -> RwSet {
        let mut set = RwSet::new();
        if write {
            set.add_write(Address::from_u64(address), Hash::from_u64(key));
        } else {
            set.add_read(Address::from_u64(address), Hash::from_u64(key));
        }
        set
    }

    fn block(sets: Vec<Option<RwSet>>) -> (Vec<Transaction>, Vec<Option<RwSet>>) {
        let txs = (0..sets.len() as u64).map(tx).collect();
        (txs, sets)
    }

    #[test]
    fn every_strategy_covers_each_schedulable_tx_once() {
        let (txs, sets) = block(vec![
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, false)),
            Some(slot_set(2, 1, true)),
            None,
            Some(slot_set(3, 1, true)),
        ]);
        for strategy in [
            Strategy::Components,
            Strategy::DegreeZero,
            Strategy::Mis,
            Strategy::Aria,
        ] {
            let schedule = schedule(strategy, &txs, &sets);
            let mut ids: Vec<TxId> = schedule.tx_ids().collect();
            ids.sort_unstable();
            assert_eq!(ids, vec![0, 1, 2, 4], "{strategy} broke the contract");
        }
    }

    #[test]
    fn components_group_conflicting_txs_into_one_chain() {
        let (txs, sets) = block(vec![
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, false)),
            Some(slot_set(2, 1, true)),
        ]);
        let schedule = schedule(Strategy::Components, &txs, &sets);
        assert_eq!(schedule.rounds.len(), 1);
        let round = &schedule.rounds[0];
        assert_eq!(round.len(), 2);
        assert!(round.contains(&vec![0, 1]));
        assert!(round.contains(&vec![2]));
    }

    #[test]
    fn degree_zero_orders_conflicts_by_id() {
        let (txs, sets) = block(vec![
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, true)),
            Some(slot_set(9, 9, true)),
        ]);
        let schedule = schedule(Strategy::DegreeZero, &txs, &sets);
        assert_eq!(
            schedule.rounds,
            vec![vec![vec![0], vec![2]], vec![vec![1]]]
        );
    }

    #[test]
    fn mis_rounds_are_independent_sets() {
        let (txs, sets) = block(vec![
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, true)),
        ]);
        let schedule = schedule(Strategy::Mis, &txs, &sets);
        // fully conflicting block: three singleton rounds
        assert_eq!(schedule.rounds.len(), 3);
        for round in &schedule.rounds {
            assert_eq!(round.len(), 1);
        }
    }

    #[test]
    fn aria_is_one_round_of_singletons() {
        let (txs, sets) = block(vec![
            Some(slot_set(1, 1, true)),
            Some(slot_set(1, 1, true)),
        ]);
        let schedule = schedule(Strategy::Aria, &txs, &sets);
        assert_eq!(schedule.rounds, vec![vec![vec![0], vec![1]]]);
    }

    #[test]
    fn empty_block_schedules_nothing() {
        let (txs, sets) = block(vec![]);
        for strategy in [
            Strategy::Components,
            Strategy::DegreeZero,
            Strategy::Mis,
            Strategy::Aria,
        ] {
            assert!(schedule(strategy, &txs, &sets).is_empty());
        }
    }
}
