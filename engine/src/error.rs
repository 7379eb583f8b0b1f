use thiserror::Error;

/// Block-level failures. Per-transaction failures never surface here:
/// they are reported inside the outcome list instead.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("block execution cancelled at a round boundary")]
    Cancelled,

    #[error("worker task panicked: {0}")]
    WorkerPanic(String),
}
