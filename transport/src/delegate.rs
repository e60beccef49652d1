//! The callback surface a transport drives while tasks are in flight.

use std::path::PathBuf;

use crate::{
    BodyStream, Error, ResponseHead, ServerTrust, TaskId, TaskMetrics, TransportRequest,
    TransportTask, TrustDisposition,
};

/// Everything that can happen to one task, in delivery order.
///
/// Events for a single task arrive strictly in the order the transport
/// observed them; [`TaskEvent::Completed`] is always last and is delivered
/// exactly once per started task.
pub enum TaskEvent {
    /// Status line and headers arrived.
    ReceivedResponse(ResponseHead),
    /// A chunk of response body arrived.
    ReceivedData(Vec<u8>),
    /// Request body bytes went out (upload tasks).
    SentBodyData {
        /// Bytes sent in this increment.
        bytes_sent: u64,
        /// Cumulative bytes sent.
        total_sent: u64,
        /// Declared request body size, if known.
        expected_to_send: Option<u64>,
    },
    /// Download task wrote bytes to its temporary file.
    WroteData {
        /// Cumulative bytes written.
        total_written: u64,
        /// Declared download size, if known.
        expected_to_write: Option<u64>,
    },
    /// A previously interrupted download resumed at `offset`.
    ResumedAtOffset {
        /// Byte offset the transfer restarted from.
        offset: u64,
        /// Declared total size, if known.
        expected_total: Option<u64>,
    },
    /// Download task finished writing its temporary file. The receiver owns
    /// the file at `temporary` and must relocate it before returning; the
    /// transport may reclaim the path afterwards.
    FinishedDownloading {
        /// Path of the completed temporary file.
        temporary: PathBuf,
    },
    /// The transport transparently converted a data task into a download
    /// task; subsequent events arrive under the new task's id.
    BecameDownloadTask(Box<dyn TransportTask>),
    /// Timing summary, delivered at most once, right before completion.
    Metrics(TaskMetrics),
    /// Terminal event.
    Completed {
        /// The transport-level failure, or `None` on success.
        error: Option<Error>,
        /// Resumable bytes captured from a failed or cancelled download.
        resume_data: Option<Vec<u8>>,
    },
}

impl std::fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskEvent::ReceivedResponse(head) => {
                f.debug_tuple("ReceivedResponse").field(&head.status).finish()
            }
            TaskEvent::ReceivedData(data) => {
                f.debug_tuple("ReceivedData").field(&data.len()).finish()
            }
            TaskEvent::SentBodyData { total_sent, .. } => f
                .debug_struct("SentBodyData")
                .field("total_sent", total_sent)
                .finish(),
            TaskEvent::WroteData { total_written, .. } => f
                .debug_struct("WroteData")
                .field("total_written", total_written)
                .finish(),
            TaskEvent::ResumedAtOffset { offset, .. } => f
                .debug_struct("ResumedAtOffset")
                .field("offset", offset)
                .finish(),
            TaskEvent::FinishedDownloading { temporary } => f
                .debug_struct("FinishedDownloading")
                .field("temporary", temporary)
                .finish(),
            TaskEvent::BecameDownloadTask(task) => f
                .debug_tuple("BecameDownloadTask")
                .field(&task.id())
                .finish(),
            TaskEvent::Metrics(metrics) => f.debug_tuple("Metrics").field(metrics).finish(),
            TaskEvent::Completed { error, resume_data } => f
                .debug_struct("Completed")
                .field("error", error)
                .field("has_resume_data", &resume_data.is_some())
                .finish(),
        }
    }
}

/// The sole receiver of every callback a session produces.
///
/// One delegate serves the whole session and must route events itself; it
/// may be called concurrently from any number of transport threads.
pub trait SessionDelegate: Send + Sync + 'static {
    /// An event occurred on the task `id`.
    fn task_event(&self, id: TaskId, event: TaskEvent);

    /// The transport is about to follow a redirect. Return the request to
    /// follow (possibly modified), or `None` to stop and deliver the
    /// redirect response as the task's result.
    fn redirect(
        &self,
        id: TaskId,
        response: &ResponseHead,
        new_request: TransportRequest,
    ) -> Option<TransportRequest> {
        let _ = (id, response);
        Some(new_request)
    }

    /// A TLS server trust challenge arrived. `id` is `None` for challenges
    /// raised before any task association exists.
    fn challenge(&self, id: Option<TaskId>, trust: &ServerTrust) -> TrustDisposition {
        let _ = (id, trust);
        TrustDisposition::Default
    }

    /// The transport needs a (fresh) request body stream for the task `id`.
    fn need_body_stream(&self, id: TaskId) -> Option<BodyStream> {
        let _ = id;
        None
    }
}
