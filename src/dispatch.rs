use std::sync::Arc;

/// Where user-visible callbacks run.
///
/// The engine's own bookkeeping always runs on the transport's callback
/// threads; completion and progress closures are handed to an `Executor` so
/// callers can hop onto a UI loop, a thread pool or anything else. The
/// default is [`InlineExecutor`].
pub trait Executor: Send + Sync + 'static {
    /// Runs `job` on this executor's context.
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// Runs jobs immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        (**self).execute(job);
    }
}

pub(crate) fn inline() -> Arc<dyn Executor> {
    Arc::new(InlineExecutor)
}
