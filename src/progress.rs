use std::sync::Arc;

use crate::dispatch::Executor;

/// A snapshot of transfer progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes moved so far.
    pub completed: u64,
    /// Declared total, or `None` while the size is unknown.
    pub total: Option<u64>,
}

impl Progress {
    /// Completed over total, when the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.completed as f64 / total as f64),
            _ => None,
        }
    }
}

/// A progress subscription: closure plus the executor it runs on.
pub(crate) struct ProgressSubscription {
    handler: Arc<dyn Fn(Progress) + Send + Sync>,
    executor: Arc<dyn Executor>,
}

impl ProgressSubscription {
    pub(crate) fn new(
        handler: Arc<dyn Fn(Progress) + Send + Sync>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self { handler, executor }
    }

    /// A second handle on the same handler and executor.
    pub(crate) fn share(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            executor: Arc::clone(&self.executor),
        }
    }

    /// Dispatches one progress snapshot. Never blocks on the handler.
    pub(crate) fn fire(&self, progress: Progress) {
        let handler = Arc::clone(&self.handler);
        self.executor
            .execute(Box::new(move || handler(progress)));
    }
}
