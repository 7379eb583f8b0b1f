use crate::error::ExecutionError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Fixed-size worker pool over the tokio runtime.
///
/// Tasks are admitted through an owned semaphore permit, so at most
/// `workers` of them run at once; both submission modes wait for every
/// task of a batch before returning, and results come back in
/// submission order.
pub struct WorkerPool {
    workers: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        Self {
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ad-hoc submission: run every closure, barrier, return results in
    /// submission order.
    pub async fn run_all<T>(
        &self,
        tasks: Vec<Box<dyn FnOnce() -> T + Send + 'static>>,
    ) -> Result<Vec<T>, ExecutionError>
    where
        T: Send + 'static,
    {
        let mut join_set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore never closes");
            join_set.spawn(async move {
                let _permit = permit;
                (index, task())
            });
        }

        let mut indexed = Vec::with_capacity(join_set.len());
        let mut panic_message = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => indexed.push(entry),
                Err(err) => {
                    error!("worker task failed: {err}");
                    panic_message.get_or_insert_with(|| err.to_string());
                }
            }
        }
        if let Some(message) = panic_message {
            return Err(ExecutionError::WorkerPanic(message));
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, value)| value).collect())
    }

    /// Bound-function submission: one task function shared by the pool,
    /// called once per argument.
    pub async fn run_with<A, T, F>(&self, task: F, args: Vec<A>) -> Result<Vec<T>, ExecutionError>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let closures: Vec<Box<dyn FnOnce() -> T + Send + 'static>> = args
            .into_iter()
            .map(|arg| {
                let task = Arc::clone(&task);
                Box::new(move || task(arg)) as Box<dyn FnOnce() -> T + Send + 'static>
            })
            .collect();
        self.run_all(closures).await
    }
}
