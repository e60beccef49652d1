//! Handle to a single in-flight transport operation.

use std::io;

/// Identifier the transport assigns to a task, unique within its session for
/// the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A readable request-body source handed to the transport on demand.
pub type BodyStream = Box<dyn io::Read + Send>;

/// Callback receiving resume data produced by a cancelled download, or
/// `None` when the transport has nothing resumable to offer.
pub type ResumeDataHandler = Box<dyn FnOnce(Option<Vec<u8>>) + Send>;

/// One in-flight network operation as seen by the underlying stack.
///
/// All methods must be callable from any thread. State-control calls on a
/// task that already reached its terminal event are no-ops.
pub trait TransportTask: Send + Sync {
    /// The session-unique identifier of this task.
    fn id(&self) -> TaskId;

    /// Starts or resumes the transfer.
    fn resume(&self);

    /// Pauses the transfer if the transport supports it.
    fn suspend(&self);

    /// Cancels the transfer. A terminal
    /// [`TaskEvent::Completed`](crate::TaskEvent::Completed) still follows.
    fn cancel(&self);

    /// Cancels a download, offering resumable bytes to `handler` first.
    ///
    /// The handler must be invoked before the terminal event is delivered so
    /// the delegate observes the resume data when completion fires. The
    /// default forwards to [`cancel`](Self::cancel) and reports `None`.
    fn cancel_for_resume_data(&self, handler: ResumeDataHandler) {
        handler(None);
        self.cancel();
    }
}
