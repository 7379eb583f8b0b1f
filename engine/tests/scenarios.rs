//! End-to-end block scenarios: literal inputs, expected final state.

use parex_common::crypto::{create_address, Address, Hash};
use parex_common::transaction::{Message, Transaction};
use parex_engine::access::RwSet;
use parex_engine::executor::{BlockExecutor, TxStatus};
use parex_engine::scheduler::{self, Strategy};
use parex_engine::state::{MemoryState, StateView, WorkerState};
use parex_engine::testing::{
    create_tx, funded_state, script_tx, test_header, transfer_tx, Script, ScriptOp, ScriptVm,
};
use parex_engine::vm::Vm;
use parex_common::gas::GasPool;
use primitive_types::U256;

const ALL_STRATEGIES: [Strategy; 4] = [
    Strategy::Components,
    Strategy::DegreeZero,
    Strategy::Mis,
    Strategy::Aria,
];

fn addr(n: u64) -> Address {
    Address::from_u64(n)
}

fn slot(n: u64) -> Hash {
    Hash::from_u64(n)
}

/// Reference result: apply the block sequentially on a fresh copy.
fn serial_result(state: &MemoryState, txs: &[Transaction]) -> MemoryState {
    let vm = ScriptVm::new();
    let mut serial = state.clone();
    for tx in txs {
        let message = Message::from_transaction(tx).unwrap();
        let snapshot = serial.snapshot();
        let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
        if vm.apply_message(&mut serial, &message, &mut gas_pool).is_err() {
            serial.revert_to_snapshot(snapshot);
        }
    }
    serial
}

#[tokio::test]
async fn two_independent_transfers_run_in_one_round() {
    let (a, b, c, d) = (addr(1), addr(2), addr(3), addr(4));
    let txs = vec![
        transfer_tx(1, a, b, 5, 0),
        transfer_tx(2, c, d, 7, 0),
    ];

    for strategy in ALL_STRATEGIES {
        let mut state = funded_state(&[(a, 10), (c, 20)]);
        let executor = BlockExecutor::new(ScriptVm::new());
        let result = executor
            .execute_block(&mut state, &txs, &test_header(1), strategy)
            .await
            .unwrap();

        assert_eq!(result.report.committed, 2, "{strategy}");
        assert_eq!(result.report.rounds, 1, "{strategy}");
        assert_eq!(state.get_balance(&a), U256::from(5u64), "{strategy}");
        assert_eq!(state.get_balance(&b), U256::from(5u64), "{strategy}");
        assert_eq!(state.get_balance(&c), U256::from(13u64), "{strategy}");
        assert_eq!(state.get_balance(&d), U256::from(7u64), "{strategy}");
    }
}

#[tokio::test]
async fn raw_conflict_is_grouped_and_sequential() {
    let x = addr(10);
    let writer = Script::new(vec![ScriptOp::Sstore {
        slot: slot(1),
        value: Hash::from_u64(42),
    }]);
    let reader = Script::new(vec![ScriptOp::Sload { slot: slot(1) }]);
    let txs = vec![
        script_tx(1, addr(1), x, 0, 0, &writer),
        script_tx(2, addr(2), x, 0, 0, &reader),
    ];
    let mut state = funded_state(&[(addr(1), 10), (addr(2), 10)]);

    // the components strategy puts both into a single sequential chain
    let vm = ScriptVm::new();
    let header = test_header(1);
    let rules = parex_common::config::ChainRules::at(&header);
    let messages: Vec<_> = txs.iter().map(Message::from_transaction).collect();
    let predictions = parex_engine::tracer::predict_rw_sets(&vm, &state, &messages, &rules);
    let schedule = scheduler::schedule(Strategy::Components, &txs, &predictions);
    assert_eq!(schedule.rounds.len(), 1);
    assert!(schedule.rounds[0].contains(&vec![0, 1]));

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &txs, &header, Strategy::Components)
        .await
        .unwrap();
    assert_eq!(result.report.committed, 2);
    assert_eq!(result.report.rounds, 1);
    assert_eq!(state.get_state(&x, &slot(1)), Hash::from_u64(42));
}

#[test]
fn mis_peels_a_five_cycle() {
    let x = addr(10);
    // tx i writes K_i and reads K_{i+1}: the conflict graph is C5
    let txs: Vec<Transaction> = (0..5)
        .map(|i| transfer_tx(i, addr(100 + i), addr(200 + i), 0, 0))
        .collect();
    let sets: Vec<Option<RwSet>> = (0..5u64)
        .map(|i| {
            let mut set = RwSet::new();
            set.add_write(x, slot(i));
            set.add_read(x, slot((i + 1) % 5));
            Some(set)
        })
        .collect();

    let schedule = scheduler::schedule(Strategy::Mis, &txs, &sets);
    assert_eq!(schedule.rounds[0].len(), 2, "first peel of C5 has size two");

    let mut seen: Vec<usize> = schedule.tx_ids().collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);

    // every round is an independent set of the conflict graph
    for round in &schedule.rounds {
        let ids: Vec<usize> = round.iter().flatten().copied().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                let (sa, sb) = (sets[*a].as_ref().unwrap(), sets[*b].as_ref().unwrap());
                assert!(!sa.has_conflict(sb), "round holds conflicting txs {a},{b}");
            }
        }
    }
}

#[tokio::test]
async fn misprediction_reverts_and_retries() {
    let x = addr(10);
    let sender = addr(1);
    let script = Script::new(vec![ScriptOp::Sload { slot: slot(1) }]);
    let txs = vec![script_tx(1, sender, x, 0, 0, &script)];

    let mut state = funded_state(&[(sender, 10)]);
    state.set_state(&x, slot(1), Hash::from_u64(42));
    let expected = serial_result(&state, &txs);

    // deliberately wrong prediction: the slot read is missing
    let mut pruned = RwSet::new();
    pruned.add_read(sender, parex_engine::access::BALANCE.clone());
    pruned.add_write(sender, parex_engine::access::BALANCE.clone());
    pruned.add_read(sender, parex_engine::access::NONCE.clone());
    pruned.add_write(sender, parex_engine::access::NONCE.clone());
    pruned.add_read(x, parex_engine::access::CODE.clone());
    pruned.add_read(x, parex_engine::access::CODE_HASH.clone());

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block_with_predictions(
            &mut state,
            &txs,
            &test_header(1),
            Strategy::Components,
            vec![Some(pruned)],
        )
        .await
        .unwrap();

    assert!(result.outcomes[0].is_committed());
    assert_eq!(result.outcomes[0].attempts, 2, "first attempt mispredicts");
    assert_eq!(result.report.retried, 1);
    assert_eq!(
        state.get_nonce(&sender),
        expected.get_nonce(&sender),
        "retried execution matches the serial result"
    );
    assert_eq!(state.get_state(&x, &slot(1)), Hash::from_u64(42));
}

#[tokio::test]
async fn aria_waw_commits_the_lower_id_first() {
    let x = addr(10);
    let script = Script::new(vec![ScriptOp::Sstore {
        slot: slot(1),
        value: Hash::from_u64(7),
    }]);
    let other = Script::new(vec![ScriptOp::Sstore {
        slot: slot(1),
        value: Hash::from_u64(9),
    }]);
    let txs = vec![
        script_tx(1, addr(1), x, 0, 0, &script),
        script_tx(2, addr(2), x, 0, 0, &other),
    ];
    let mut state = funded_state(&[(addr(1), 10), (addr(2), 10)]);
    let expected = serial_result(&state, &txs);

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Aria)
        .await
        .unwrap();

    assert!(result.outcomes[0].is_committed());
    assert!(result.outcomes[1].is_committed());
    assert_eq!(result.outcomes[0].attempts, 1, "lower id wins the round");
    assert_eq!(result.outcomes[1].attempts, 2, "loser retries next round");
    assert_eq!(
        state.get_state(&x, &slot(1)),
        expected.get_state(&x, &slot(1))
    );
    assert_eq!(state.get_state(&x, &slot(1)), Hash::from_u64(9));
}

#[tokio::test]
async fn parallel_execution_matches_serial_for_every_strategy() {
    // a mix of disjoint transfers, chained transfers and storage traffic
    let contract = addr(50);
    let store = Script::new(vec![
        ScriptOp::Sstore {
            slot: slot(1),
            value: Hash::from_u64(5),
        },
        ScriptOp::Sload { slot: slot(2) },
    ]);
    let load = Script::new(vec![ScriptOp::Sload { slot: slot(1) }]);
    let txs = vec![
        transfer_tx(1, addr(1), addr(2), 5, 0),
        transfer_tx(2, addr(2), addr(3), 3, 0),
        transfer_tx(3, addr(4), addr(5), 7, 0),
        script_tx(4, addr(6), contract, 0, 0, &store),
        script_tx(5, addr(7), contract, 0, 0, &load),
        transfer_tx(6, addr(5), addr(1), 2, 0),
        // deterministic failure: not enough funds
        transfer_tx(7, addr(8), addr(9), 1_000, 0),
    ];
    let base = funded_state(&[
        (addr(1), 100),
        (addr(2), 100),
        (addr(4), 100),
        (addr(5), 100),
        (addr(6), 100),
        (addr(7), 100),
        (addr(8), 10),
    ]);
    let expected = serial_result(&base, &txs);
    let watched: Vec<Address> = (1..10).map(addr).chain([contract]).collect();

    for strategy in ALL_STRATEGIES {
        let mut state = base.clone();
        let executor = BlockExecutor::new(ScriptVm::new());
        let result = executor
            .execute_block(&mut state, &txs, &test_header(1), strategy)
            .await
            .unwrap();

        assert_eq!(result.report.committed, 6, "{strategy}");
        assert_eq!(result.report.failed, 1, "{strategy}");
        assert!(matches!(result.outcomes[6].status, TxStatus::Failed(_)));
        for address in &watched {
            assert_eq!(
                state.get_balance(address),
                expected.get_balance(address),
                "{strategy}: balance of {address}"
            );
            assert_eq!(
                state.get_nonce(address),
                expected.get_nonce(address),
                "{strategy}: nonce of {address}"
            );
        }
        assert_eq!(
            state.get_state(&contract, &slot(1)),
            expected.get_state(&contract, &slot(1)),
            "{strategy}"
        );
    }
}

#[tokio::test]
async fn stale_nonce_creation_mispredicts_but_commits() {
    let sender = addr(1);
    // message nonce says 4, the account nonce is 0: the predicted child
    // address is wrong and the creation must go through the retry path
    let txs = vec![create_tx(1, sender, 0, 4, &Script::new(vec![]))];
    let mut state = funded_state(&[(sender, 10)]);

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Components)
        .await
        .unwrap();

    assert!(result.outcomes[0].is_committed());
    assert!(result.outcomes[0].attempts > 1, "stale nonce must retry");
    let child = create_address(&sender, 0);
    assert!(state.exists(&child));
    assert_eq!(state.get_nonce(&child), 1);
    assert!(!state.get_code(&child).is_empty());
}

#[test]
fn predicted_footprints_cover_the_observed_ones() {
    let vm = ScriptVm::new();
    let header = test_header(1);
    let rules = parex_common::config::ChainRules::at(&header);
    let contract = addr(50);
    let script = Script::new(vec![
        ScriptOp::Sstore {
            slot: slot(1),
            value: Hash::from_u64(5),
        },
        ScriptOp::Sload { slot: slot(2) },
        ScriptOp::BalanceOf { address: addr(9) },
    ]);
    let state = funded_state(&[(addr(1), 100)]);

    for tx in [
        transfer_tx(1, addr(1), addr(2), 5, 0),
        script_tx(2, addr(1), contract, 0, 0, &script),
    ] {
        let message = Message::from_transaction(&tx).unwrap();
        let predicted =
            parex_engine::tracer::predict_rw_set(&vm, &state, &message, &rules).unwrap();
        let observed = parex_engine::tracer::observe_rw_set(&vm, &state, &message).unwrap();

        for (address, key) in observed
            .reads()
            .entries()
            .chain(observed.writes().entries())
        {
            // liveness probes are satisfied by any materialized record
            // and never fault a warmed cache, so the seed omits them
            if *key == *parex_engine::access::ALIVE {
                continue;
            }
            assert!(
                predicted.reads().contains(address, key)
                    || predicted.writes().contains(address, key),
                "observed access ({address}, {key}) was not predicted for {}",
                tx.get_hash()
            );
        }
    }
}

#[test]
fn snapshot_revert_undoes_account_creation() {
    use parex_engine::state::CacheState;

    let a = addr(1);
    let mut cache = CacheState::new();
    let s1 = cache.snapshot();
    cache.create_account(a);
    cache.set_balance(&a, U256::from(10u64));
    let _s2 = cache.snapshot();
    cache.set_balance(&a, U256::from(20u64));
    cache.revert_to_snapshot(s1);

    // the journal undoes the creation itself
    assert!(!cache.exists(&a));
    assert!(cache.get_balance(&a).is_zero());
}

#[tokio::test]
async fn empty_block_returns_an_empty_outcome_list() {
    for strategy in ALL_STRATEGIES {
        let mut state = MemoryState::new();
        let executor = BlockExecutor::new(ScriptVm::new());
        let result = executor
            .execute_block(&mut state, &[], &test_header(1), strategy)
            .await
            .unwrap();
        assert!(result.outcomes.is_empty(), "{strategy}");
        assert_eq!(result.report.rounds, 0, "{strategy}");
    }
}

#[tokio::test]
async fn single_transaction_blocks_work_under_every_strategy() {
    for strategy in ALL_STRATEGIES {
        let mut state = funded_state(&[(addr(1), 10)]);
        let txs = vec![transfer_tx(1, addr(1), addr(2), 4, 0)];
        let executor = BlockExecutor::new(ScriptVm::new());
        let result = executor
            .execute_block(&mut state, &txs, &test_header(1), strategy)
            .await
            .unwrap();
        assert_eq!(result.report.committed, 1, "{strategy}");
        assert_eq!(state.get_balance(&addr(2)), U256::from(4u64), "{strategy}");
    }
}

#[tokio::test]
async fn prefetched_zero_slot_does_not_mispredict() {
    let x = addr(10);
    let script = Script::new(vec![ScriptOp::Sload { slot: slot(9) }]);
    let txs = vec![script_tx(1, addr(1), x, 0, 0, &script)];
    let mut state = funded_state(&[(addr(1), 10)]);

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Components)
        .await
        .unwrap();

    assert!(result.outcomes[0].is_committed());
    assert_eq!(result.outcomes[0].attempts, 1, "zero slot is not a miss");
}

#[tokio::test]
async fn invalid_transactions_are_reported_and_skipped() {
    let bad = Transaction::new(
        Hash::from_u64(1),
        addr(1),
        Some(addr(2)),
        U256::from(1u64),
        0,
        0, // zero gas limit
        Vec::new(),
    );
    let good = transfer_tx(2, addr(3), addr(4), 2, 0);
    let mut state = funded_state(&[(addr(1), 10), (addr(3), 10)]);

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &[bad, good], &test_header(1), Strategy::DegreeZero)
        .await
        .unwrap();

    assert!(matches!(result.outcomes[0].status, TxStatus::Invalid(_)));
    assert_eq!(result.outcomes[0].attempts, 0);
    assert!(result.outcomes[1].is_committed());
    assert_eq!(state.get_balance(&addr(1)), U256::from(10u64));
    assert_eq!(state.get_balance(&addr(4)), U256::from(2u64));
}

#[tokio::test]
async fn cancellation_interrupts_at_the_round_boundary() {
    use parex_engine::error::ExecutionError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let cancel = Arc::new(AtomicBool::new(true));
    let executor = BlockExecutor::new(ScriptVm::new()).with_cancel_flag(Arc::clone(&cancel));
    let mut state = funded_state(&[(addr(1), 10)]);
    let txs = vec![transfer_tx(1, addr(1), addr(2), 4, 0)];

    let err = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Components)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Cancelled));
    // nothing was committed
    assert_eq!(state.get_balance(&addr(1)), U256::from(10u64));

    cancel.store(false, Ordering::Relaxed);
    let result = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Components)
        .await
        .unwrap();
    assert_eq!(result.report.committed, 1);
}

#[tokio::test]
async fn reverting_transaction_fails_without_residue() {
    let x = addr(10);
    let script = Script::new(vec![
        ScriptOp::Sstore {
            slot: slot(1),
            value: Hash::from_u64(5),
        },
        ScriptOp::Revert {
            reason: "guard tripped".into(),
        },
    ]);
    let txs = vec![script_tx(1, addr(1), x, 0, 0, &script)];
    let mut state = funded_state(&[(addr(1), 10)]);

    let executor = BlockExecutor::new(ScriptVm::new());
    let result = executor
        .execute_block(&mut state, &txs, &test_header(1), Strategy::Components)
        .await
        .unwrap();

    assert!(matches!(result.outcomes[0].status, TxStatus::Failed(_)));
    // the reverted write never reaches the authoritative state
    assert_eq!(state.get_state(&x, &slot(1)), Hash::zero());
    assert_eq!(state.get_nonce(&addr(1)), 0);
}
