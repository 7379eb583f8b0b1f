mod pool;

pub use pool::WorkerPool;

use crate::access::RwSet;
use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::scheduler::{self, AriaValidator, Strategy};
use crate::state::{CacheState, ConcurrentCache, WorkerState, WrappedState};
use crate::tracer;
use crate::vm::{Vm, VmError};
use crate::TxId;
use parex_common::{
    block::Header,
    config::ChainRules,
    crypto::Hash,
    gas::GasPool,
    transaction::{Message, Transaction, TransactionError},
};
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Final status of one transaction, aligned to the block order.
#[derive(Debug, Clone)]
pub enum TxStatus {
    /// Executed and merged, possibly after retries.
    Committed,
    /// Message construction failed; never scheduled, never retried.
    Invalid(TransactionError),
    /// Deterministic VM failure; reverted and never retried.
    Failed(VmError),
}

#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: Hash,
    pub status: TxStatus,
    pub gas_used: u64,
    /// Number of execution attempts, including the successful one.
    pub attempts: u32,
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TxStatus::Committed)
    }
}

/// Block-level execution accounting.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub committed: usize,
    pub invalid: usize,
    pub failed: usize,
    /// Parallel rounds dispatched, across all attempts.
    pub rounds: usize,
    /// Transactions that needed more than one attempt.
    pub retried: usize,
    /// Transactions resolved by the sequential tail.
    pub serial_tail: usize,
}

#[derive(Debug)]
pub struct BlockResult {
    pub outcomes: Vec<TxOutcome>,
    pub report: ExecutionReport,
}

enum RunStatus {
    Ok,
    Vm(VmError),
    FalsePredict,
}

struct TxRun {
    tid: TxId,
    status: RunStatus,
    gas_used: u64,
    observed: RwSet,
}

struct ChainRun {
    runs: Vec<TxRun>,
    cache: CacheState,
}

struct TxSlot {
    message: Option<Message>,
    status: Option<TxStatus>,
    gas_used: u64,
    attempts: u32,
}

/// The block driver: predicts footprints, warms the shared cache,
/// schedules rounds, executes them on the worker pool, validates,
/// merges, retries residuals and finally commits into the authoritative
/// state.
pub struct BlockExecutor<V> {
    vm: Arc<V>,
    config: EngineConfig,
    pool: WorkerPool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<V: Vm + 'static> BlockExecutor<V> {
    pub fn new(vm: V) -> Self {
        Self::with_config(vm, EngineConfig::default())
    }

    pub fn with_config(vm: V, config: EngineConfig) -> Self {
        let pool = WorkerPool::new(config.effective_workers());
        Self {
            vm: Arc::new(vm),
            config,
            pool,
            cancel: None,
        }
    }

    /// Install a block-level cancellation flag, honored at round
    /// boundaries only.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn vm(&self) -> &Arc<V> {
        &self.vm
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Execute a block end to end: predict, then run.
    pub async fn execute_block<S: WorkerState>(
        &self,
        state: &mut S,
        txs: &[Transaction],
        header: &Header,
        strategy: Strategy,
    ) -> Result<BlockResult, ExecutionError> {
        let rules = ChainRules::at(header);
        let messages = build_messages(txs);
        let predictions =
            tracer::predict_rw_sets(self.vm.as_ref(), &*state, &messages, &rules);
        self.run_block(state, txs, strategy, messages, predictions)
            .await
    }

    /// Execute with caller-supplied footprints. The embedder (or a
    /// test) may predict with different rules, or deliberately inject
    /// wrong predictions.
    pub async fn execute_block_with_predictions<S: WorkerState>(
        &self,
        state: &mut S,
        txs: &[Transaction],
        _header: &Header,
        strategy: Strategy,
        predictions: Vec<Option<RwSet>>,
    ) -> Result<BlockResult, ExecutionError> {
        let messages = build_messages(txs);
        self.run_block(state, txs, strategy, messages, predictions)
            .await
    }

    async fn run_block<S: WorkerState>(
        &self,
        state: &mut S,
        txs: &[Transaction],
        strategy: Strategy,
        messages: Vec<Result<Message, TransactionError>>,
        predictions: Vec<Option<RwSet>>,
    ) -> Result<BlockResult, ExecutionError> {
        let tx_count = txs.len();
        if tx_count == 0 {
            return Ok(BlockResult {
                outcomes: Vec::new(),
                report: ExecutionReport::default(),
            });
        }

        let mut slots: Vec<TxSlot> = messages
            .into_iter()
            .map(|message| match message {
                Ok(message) => TxSlot {
                    message: Some(message),
                    status: None,
                    gas_used: 0,
                    attempts: 0,
                },
                Err(err) => TxSlot {
                    message: None,
                    status: Some(TxStatus::Invalid(err)),
                    gas_used: 0,
                    attempts: 0,
                },
            })
            .collect();

        let mut current_sets: Vec<Option<RwSet>> = predictions;
        let mut pending: Vec<TxId> = (0..tx_count)
            .filter(|id| slots[*id].message.is_some())
            .collect();

        // Warm the shared cache with the union of the predicted
        // footprints, off the critical path.
        let warmed = Arc::new(ConcurrentCache::new());
        warmed.prefetch(&*state, current_sets.iter().flatten());

        let mut report = ExecutionReport::default();
        let aria = matches!(strategy, Strategy::Aria).then(|| Arc::new(AriaValidator::new()));

        for attempt in 0..=self.config.max_retries {
            if self.cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if pending.is_empty() {
                break;
            }

            let attempt_strategy = if attempt == 0 {
                strategy
            } else {
                self.config.effective_residual_strategy()
            };

            let mut masked: Vec<Option<RwSet>> = vec![None; tx_count];
            for id in &pending {
                masked[*id] = current_sets[*id].clone();
            }
            let schedule = scheduler::schedule(attempt_strategy, txs, &masked);
            if schedule.is_empty() {
                // only footprint-less transactions remain
                break;
            }

            // reservation-based validation only applies to the
            // optimistic first round; residuals commit like any other
            // speculative round
            let attempt_aria = if attempt == 0 { aria.clone() } else { None };

            let scheduled: HashSet<TxId> = schedule.tx_ids().collect();
            let mut next_pending: Vec<TxId> = pending
                .iter()
                .copied()
                .filter(|id| !scheduled.contains(id))
                .collect();

            for round in schedule.rounds {
                if self.cancelled() {
                    return Err(ExecutionError::Cancelled);
                }
                if round.is_empty() {
                    continue;
                }
                report.rounds += 1;

                let chain_runs = self
                    .run_round(txs, &slots, &masked, &round, &warmed, attempt_aria.clone())
                    .await?;

                let mut merges: Vec<CacheState> = Vec::new();
                for chain_run in chain_runs {
                    let mut committed_any = false;
                    for run in chain_run.runs {
                        let slot = &mut slots[run.tid];
                        slot.attempts += 1;
                        match run.status {
                            RunStatus::Ok => {
                                let admitted = match &attempt_aria {
                                    Some(validator) => {
                                        validator.commit_allowed(run.tid, &run.observed)
                                    }
                                    None => true,
                                };
                                if admitted {
                                    slot.status = Some(TxStatus::Committed);
                                    slot.gas_used = run.gas_used;
                                    committed_any = true;
                                } else {
                                    // lost an Aria reservation; retry
                                    widen(&mut current_sets[run.tid], &run.observed);
                                    next_pending.push(run.tid);
                                }
                            }
                            RunStatus::Vm(err) => {
                                slot.status = Some(TxStatus::Failed(err));
                            }
                            RunStatus::FalsePredict => {
                                widen(&mut current_sets[run.tid], &run.observed);
                                next_pending.push(run.tid);
                            }
                        }
                    }
                    if committed_any {
                        // Aria chains are singletons, so an admitted
                        // chain cache never carries rejected effects
                        merges.push(chain_run.cache);
                    }
                }

                if !merges.is_empty() {
                    let warmed_for_merge = Arc::clone(&warmed);
                    self.pool
                        .run_with(
                            move |cache: CacheState| cache.merge_into_concurrent(&warmed_for_merge),
                            merges,
                        )
                        .await?;
                }
            }

            next_pending.sort_unstable();
            next_pending.dedup();
            pending = next_pending;

            if !pending.is_empty() {
                if log_enabled!(log::Level::Debug) {
                    debug!(
                        "attempt {attempt}: {} residual transactions",
                        pending.len()
                    );
                }
                // extend the warmed cache for the widened footprints;
                // merged values are never overwritten
                warmed.prefetch(
                    &*state,
                    pending.iter().filter_map(|id| current_sets[*id].as_ref()),
                );
            }
        }

        // The speculative phase is over: fold the warmed cache into the
        // authoritative state (the only place it is ever mutated), then
        // finish any stragglers sequentially against it.
        warmed.commit_into(state);
        if !pending.is_empty() {
            report.serial_tail = pending.len();
            self.run_serial_tail(state, txs, &mut slots, &pending)?;
        }

        let outcomes: Vec<TxOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| TxOutcome {
                tx_hash: txs[id].get_hash().clone(),
                status: slot
                    .status
                    .expect("every transaction resolves by the serial tail"),
                gas_used: slot.gas_used,
                attempts: slot.attempts,
            })
            .collect();

        for outcome in &outcomes {
            match &outcome.status {
                TxStatus::Committed => report.committed += 1,
                TxStatus::Invalid(_) => report.invalid += 1,
                TxStatus::Failed(_) => report.failed += 1,
            }
            if outcome.attempts > 1 {
                report.retried += 1;
            }
        }

        if log_enabled!(log::Level::Info) {
            info!(
                "block executed: {} committed, {} failed, {} invalid over {} rounds ({} retried, {} serial)",
                report.committed,
                report.failed,
                report.invalid,
                report.rounds,
                report.retried,
                report.serial_tail
            );
        }

        Ok(BlockResult { outcomes, report })
    }

    /// Dispatch one round: each chain becomes one pool task owning a
    /// fresh journaled cache prefetched from the warmed view.
    async fn run_round(
        &self,
        txs: &[Transaction],
        slots: &[TxSlot],
        masked: &[Option<RwSet>],
        round: &[Vec<TxId>],
        warmed: &Arc<ConcurrentCache>,
        aria: Option<Arc<AriaValidator>>,
    ) -> Result<Vec<ChainRun>, ExecutionError> {
        let mut tasks: Vec<Box<dyn FnOnce() -> ChainRun + Send + 'static>> = Vec::new();
        for chain in round {
            let work: Vec<(TxId, Hash, Message, RwSet)> = chain
                .iter()
                .map(|tid| {
                    (
                        *tid,
                        txs[*tid].get_hash().clone(),
                        slots[*tid]
                            .message
                            .clone()
                            .expect("scheduled transactions carry a message"),
                        masked[*tid]
                            .clone()
                            .expect("scheduled transactions carry a footprint"),
                    )
                })
                .collect();
            let warmed = Arc::clone(warmed);
            let vm = Arc::clone(&self.vm);
            let aria = aria.clone();
            tasks.push(Box::new(move || run_chain(&*vm, &warmed, aria, work)));
        }
        self.pool.run_all(tasks).await
    }

    /// Sequential tail over the authoritative state: no prefetch, no
    /// misprediction, every remaining transaction resolves here.
    fn run_serial_tail<S: WorkerState>(
        &self,
        state: &mut S,
        txs: &[Transaction],
        slots: &mut [TxSlot],
        pending: &[TxId],
    ) -> Result<(), ExecutionError> {
        for tid in pending {
            let slot = &mut slots[*tid];
            let message = slot
                .message
                .clone()
                .expect("pending transactions carry a message");
            slot.attempts += 1;
            state.set_tx_context(txs[*tid].get_hash().clone(), *tid);
            let snapshot = state.snapshot();
            let mut gas_pool = GasPool::new().add_gas(message.gas_limit());
            match self.vm.apply_message(state, &message, &mut gas_pool) {
                Ok(receipt) => {
                    slot.status = Some(TxStatus::Committed);
                    slot.gas_used = receipt.gas_used;
                }
                Err(err) => {
                    state.revert_to_snapshot(snapshot);
                    slot.status = Some(TxStatus::Failed(err));
                }
            }
        }
        Ok(())
    }
}

fn build_messages(txs: &[Transaction]) -> Vec<Result<Message, TransactionError>> {
    txs.iter().map(Message::from_transaction).collect()
}

fn widen(current: &mut Option<RwSet>, observed: &RwSet) {
    match current {
        Some(set) => set.merge(observed),
        None => *current = Some(observed.clone()),
    }
}

/// Worker body: execute one chain sequentially against one journaled
/// cache, snapshotting before each transaction and reverting on VM
/// failure or misprediction.
fn run_chain(
    vm: &dyn Vm,
    warmed: &ConcurrentCache,
    aria: Option<Arc<AriaValidator>>,
    work: Vec<(TxId, Hash, Message, RwSet)>,
) -> ChainRun {
    let mut cache = CacheState::new();
    cache.prefetch(warmed, work.iter().map(|(_, _, _, set)| set));
    let mut wrapped = WrappedState::new(cache);

    let mut runs = Vec::with_capacity(work.len());
    for (tid, tx_hash, message, _predicted) in work {
        wrapped.set_rw_set(RwSet::new());
        wrapped.set_tx_context(tx_hash, tid);
        let snapshot = wrapped.snapshot();
        let mut gas_pool = GasPool::new().add_gas(message.gas_limit());

        let result = vm.apply_message(&mut wrapped, &message, &mut gas_pool);
        let observed = wrapped.take_rw_set();
        match result {
            Ok(receipt) => {
                if wrapped.inner().state_judge() {
                    if let Some(validator) = &aria {
                        validator.reserve(tid, &observed);
                    }
                    runs.push(TxRun {
                        tid,
                        status: RunStatus::Ok,
                        gas_used: receipt.gas_used,
                        observed,
                    });
                } else {
                    trace!("tx {tid} touched outside its prefetch, reverting");
                    wrapped.revert_to_snapshot(snapshot);
                    wrapped.inner_mut().reset_state_judge();
                    runs.push(TxRun {
                        tid,
                        status: RunStatus::FalsePredict,
                        gas_used: 0,
                        observed,
                    });
                }
            }
            Err(err) => {
                wrapped.revert_to_snapshot(snapshot);
                wrapped.inner_mut().reset_state_judge();
                runs.push(TxRun {
                    tid,
                    status: RunStatus::Vm(err),
                    gas_used: 0,
                    observed,
                });
            }
        }
    }

    ChainRun {
        runs,
        cache: wrapped.into_inner(),
    }
}
