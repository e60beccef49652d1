//! Session construction and task minting.

use std::sync::Arc;
use std::time::Duration;

use crate::{SessionDelegate, TransportRequest, TransportTask, UploadPayload};

/// Session-wide configuration consumed opaquely by the transport.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Headers applied to every request unless the request overrides them.
    pub base_headers: Vec<(String, String)>,
    /// Per-request timeout, if any. Timeout expiry surfaces as
    /// [`Error::RequestTimeout`](crate::Error::RequestTimeout) on the
    /// terminal event; there is no separate timeout machinery above this.
    pub request_timeout: Option<Duration>,
}

/// Entry point a transport implementation registers: opens sessions bound to
/// a delegate.
pub trait TransportConnector: Send + Sync + 'static {
    /// Opens one shared session. Every callback the session ever produces is
    /// delivered to `delegate`.
    fn open_session(
        &self,
        delegate: Arc<dyn SessionDelegate>,
        options: SessionOptions,
    ) -> crate::Result<Box<dyn TransportSession>>;
}

/// One shared transport session; the factory for all tasks.
///
/// Tasks are created suspended and start transferring when
/// [`TransportTask::resume`] is called.
pub trait TransportSession: Send + Sync {
    /// Creates a plain data-transfer task.
    fn data_task(&self, request: TransportRequest) -> crate::Result<Box<dyn TransportTask>>;

    /// Creates a download-to-file task.
    fn download_task(&self, request: TransportRequest) -> crate::Result<Box<dyn TransportTask>>;

    /// Creates a download task continuing from previously captured resume
    /// data.
    fn download_task_resuming(&self, resume_data: Vec<u8>)
        -> crate::Result<Box<dyn TransportTask>>;

    /// Creates an upload task sending `payload` as the request body.
    fn upload_task(
        &self,
        request: TransportRequest,
        payload: UploadPayload,
    ) -> crate::Result<Box<dyn TransportTask>>;

    /// Invalidates the session: cancels in-flight tasks and refuses new
    /// ones. Idempotent.
    fn invalidate(&self);
}
