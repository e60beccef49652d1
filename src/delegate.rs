use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use weft_transport::{BodyStream, ResponseHead, TaskEvent, TaskId, TaskMetrics, TransportTask};

use crate::bounded::{BoundedCopier, CopyError};
use crate::error::Error;
use crate::paths::ensure_dir;
use crate::pipeline::CompletionPipeline;
use crate::progress::{Progress, ProgressSubscription};

/// Consumes response bytes as they arrive instead of buffering them.
pub(crate) type StreamHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Maps a finished download's temporary file to its final destination.
pub(crate) type DestinationResolver =
    Arc<dyn Fn(&Path, &ResponseHead) -> PathBuf + Send + Sync>;

/// Mints a fresh request body stream each time the transport asks for one,
/// including on retransmission after a redirect.
pub(crate) type BodyStreamProvider = Arc<dyn Fn() -> BodyStream + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Active,
    Completed,
}

/// What the finished exchange left behind as a payload.
pub(crate) enum PayloadSnapshot {
    Empty,
    Bytes(Vec<u8>),
    File(PathBuf),
}

#[derive(Default)]
struct DataState {
    buffer: Vec<u8>,
    total_received: u64,
    expected: Option<u64>,
    stream_handler: Option<StreamHandler>,
}

#[derive(Default)]
struct DownloadState {
    destination: Option<DestinationResolver>,
    final_location: Option<PathBuf>,
    bytes_written: u64,
    expected_to_write: Option<u64>,
    resumed_offset: Option<u64>,
}

#[derive(Default)]
struct UploadState {
    bytes_sent: u64,
    expected_to_send: Option<u64>,
    body_stream: Option<BodyStreamProvider>,
    data: DataState,
}

struct StreamingState {
    destination: PathBuf,
    scratch: PathBuf,
    file: Option<File>,
    buffer: Vec<u8>,
    final_location: Option<PathBuf>,
    bytes_written: u64,
    expected_to_write: Option<u64>,
}

impl StreamingState {
    /// Appends one chunk to the in-memory buffer and the scratch file in
    /// lockstep. The scratch file opens on the first chunk; the stable
    /// destination is only touched when the transfer completes cleanly, so
    /// a file at the destination is always a finished download.
    fn append(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if self.file.is_none() {
            if let Some(parent) = self.scratch.parent() {
                ensure_dir(parent)?;
            }
            let file = File::create(&self.scratch).map_err(|source| Error::FileOperationFailed {
                path: self.scratch.clone(),
                source: Arc::new(source),
            })?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        BoundedCopier::new()
            .copy(&mut &chunk[..], file)
            .map_err(|error| {
                let (CopyError::Read(source) | CopyError::Write(source)) = error;
                Error::FileOperationFailed {
                    path: self.scratch.clone(),
                    source: Arc::new(source),
                }
            })?;
        self.buffer.extend_from_slice(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }
}

/// The in-progress file sits next to the destination with a `.part` suffix
/// until the transfer finishes.
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsString::from)
        .unwrap_or_else(|| std::ffi::OsString::from("download"));
    name.push(".part");
    destination.with_file_name(name)
}

/// Role-specific accumulation state; one variant per kind of request, so
/// each event is matched against an explicit shape rather than downcast.
enum DelegateKind {
    Data(DataState),
    Download(DownloadState),
    Upload(UploadState),
    StreamingDownload(StreamingState),
}

struct DelegateState {
    phase: Phase,
    response: Option<ResponseHead>,
    error: Option<Error>,
    metrics: Option<TaskMetrics>,
    resume_data: Option<Vec<u8>>,
    progress: Vec<ProgressSubscription>,
    upload_progress: Vec<ProgressSubscription>,
    kind: DelegateKind,
}

/// Per-request state machine fed by the session multiplexer.
///
/// Every transport callback for one task funnels through
/// [`handle_event`](Self::handle_event); the mutex makes each event atomic
/// while user-visible closures always run with the lock released. The held
/// completion pipeline is released exactly once, on the terminal event.
pub(crate) struct TaskDelegate {
    task: Mutex<Option<Box<dyn TransportTask>>>,
    queue: CompletionPipeline,
    state: Mutex<DelegateState>,
}

impl TaskDelegate {
    fn with_kind(kind: DelegateKind) -> Self {
        Self {
            task: Mutex::new(None),
            queue: CompletionPipeline::new(),
            state: Mutex::new(DelegateState {
                phase: Phase::Idle,
                response: None,
                error: None,
                metrics: None,
                resume_data: None,
                progress: Vec::new(),
                upload_progress: Vec::new(),
                kind,
            }),
        }
    }

    pub(crate) fn new_data() -> Self {
        Self::with_kind(DelegateKind::Data(DataState::default()))
    }

    pub(crate) fn new_download() -> Self {
        Self::with_kind(DelegateKind::Download(DownloadState::default()))
    }

    pub(crate) fn new_upload() -> Self {
        Self::with_kind(DelegateKind::Upload(UploadState::default()))
    }

    pub(crate) fn new_streaming(destination: PathBuf) -> Self {
        Self::with_kind(DelegateKind::StreamingDownload(StreamingState {
            scratch: partial_path(&destination),
            destination,
            file: None,
            buffer: Vec::new(),
            final_location: None,
            bytes_written: 0,
            expected_to_write: None,
        }))
    }

    /// Attaches the transport task this delegate drives.
    pub(crate) fn bind_task(&self, task: Box<dyn TransportTask>) {
        *self.task.lock().unwrap() = Some(task);
    }

    pub(crate) fn task_id(&self) -> Option<TaskId> {
        self.task.lock().unwrap().as_ref().map(|t| t.id())
    }

    pub(crate) fn queue(&self) -> &CompletionPipeline {
        &self.queue
    }

    /// Starts the transfer. Without a task (construction failed before one
    /// could be made) there is nothing to wait for: the terminal state is
    /// already here, so the pipeline opens now.
    pub(crate) fn resume(&self) {
        let started = {
            let task = self.task.lock().unwrap();
            match task.as_ref() {
                Some(task) => {
                    task.resume();
                    true
                }
                None => false,
            }
        };
        if started {
            let mut state = self.state.lock().unwrap();
            if state.phase == Phase::Idle {
                state.phase = Phase::Active;
            }
        } else {
            {
                let mut state = self.state.lock().unwrap();
                state.phase = Phase::Completed;
            }
            self.queue.release();
        }
    }

    pub(crate) fn suspend(&self) {
        if let Some(task) = self.task.lock().unwrap().as_ref() {
            task.suspend();
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(task) = self.task.lock().unwrap().as_ref() {
            task.cancel();
        }
    }

    /// Cancels a download, offering its resume data to `handler` first.
    ///
    /// The handler observes the resume data before any completion closure
    /// runs; the transport guarantees it fires ahead of the terminal event.
    pub(crate) fn cancel_with_resume_data(
        &self,
        handler: Box<dyn FnOnce(Option<Vec<u8>>) + Send>,
    ) {
        let task = self.task.lock().unwrap();
        match task.as_ref() {
            Some(task) => task.cancel_for_resume_data(handler),
            None => handler(None),
        }
    }

    /// Records a client-side error. The first one sticks; it takes
    /// precedence over any transport error reported later.
    pub(crate) fn record_error(&self, error: Error) {
        let mut state = self.state.lock().unwrap();
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    pub(crate) fn set_stream_handler(&self, handler: StreamHandler) {
        let mut state = self.state.lock().unwrap();
        match &mut state.kind {
            DelegateKind::Data(data) | DelegateKind::Upload(UploadState { data, .. }) => {
                // Streamed bytes are not buffered; drop anything gathered
                // before the handler was attached.
                data.buffer = Vec::new();
                data.stream_handler = Some(handler);
            }
            _ => {}
        }
    }

    pub(crate) fn add_progress(&self, subscription: ProgressSubscription) {
        self.state.lock().unwrap().progress.push(subscription);
    }

    pub(crate) fn add_upload_progress(&self, subscription: ProgressSubscription) {
        self.state.lock().unwrap().upload_progress.push(subscription);
    }

    pub(crate) fn set_destination(&self, resolver: DestinationResolver) {
        let mut state = self.state.lock().unwrap();
        if let DelegateKind::Download(download) = &mut state.kind {
            download.destination = Some(resolver);
        }
    }

    pub(crate) fn set_body_stream_provider(&self, provider: BodyStreamProvider) {
        let mut state = self.state.lock().unwrap();
        if let DelegateKind::Upload(upload) = &mut state.kind {
            upload.body_stream = Some(provider);
        }
    }

    /// Mints a fresh request body stream, when this upload carries a
    /// provider. The provider runs with the state lock released.
    pub(crate) fn open_body_stream(&self) -> Option<BodyStream> {
        let provider = {
            let state = self.state.lock().unwrap();
            match &state.kind {
                DelegateKind::Upload(upload) => upload.body_stream.clone(),
                _ => None,
            }
        };
        provider.map(|provider| provider())
    }

    /// Routes one transport callback into the state machine.
    pub(crate) fn handle_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::ReceivedResponse(head) => {
                let mut state = self.state.lock().unwrap();
                match &mut state.kind {
                    DelegateKind::Data(data)
                    | DelegateKind::Upload(UploadState { data, .. }) => {
                        data.expected = head.content_length;
                    }
                    DelegateKind::Download(download) => {
                        download.expected_to_write = head.content_length;
                    }
                    DelegateKind::StreamingDownload(streaming) => {
                        streaming.expected_to_write = head.content_length;
                    }
                }
                state.response = Some(head);
            }
            TaskEvent::ReceivedData(bytes) => self.received_data(bytes),
            TaskEvent::SentBodyData {
                total_sent,
                expected_to_send,
                ..
            } => {
                let (snapshot, subscriptions) = {
                    let mut state = self.state.lock().unwrap();
                    if let DelegateKind::Upload(upload) = &mut state.kind {
                        upload.bytes_sent = total_sent;
                        upload.expected_to_send = expected_to_send;
                    }
                    (
                        Progress {
                            completed: total_sent,
                            total: expected_to_send,
                        },
                        state
                            .upload_progress
                            .iter()
                            .map(ProgressSubscription::share)
                            .collect::<Vec<_>>(),
                    )
                };
                for subscription in &subscriptions {
                    subscription.fire(snapshot);
                }
            }
            TaskEvent::WroteData {
                total_written,
                expected_to_write,
            } => {
                let (snapshot, subscriptions) = {
                    let mut state = self.state.lock().unwrap();
                    match &mut state.kind {
                        DelegateKind::Download(download) => {
                            download.bytes_written = total_written;
                            if expected_to_write.is_some() {
                                download.expected_to_write = expected_to_write;
                            }
                        }
                        DelegateKind::StreamingDownload(streaming) => {
                            streaming.bytes_written = total_written;
                            if expected_to_write.is_some() {
                                streaming.expected_to_write = expected_to_write;
                            }
                        }
                        _ => {}
                    }
                    (
                        Progress {
                            completed: total_written,
                            total: expected_to_write,
                        },
                        state
                            .progress
                            .iter()
                            .map(ProgressSubscription::share)
                            .collect::<Vec<_>>(),
                    )
                };
                for subscription in &subscriptions {
                    subscription.fire(snapshot);
                }
            }
            TaskEvent::ResumedAtOffset {
                offset,
                expected_total,
            } => {
                let mut state = self.state.lock().unwrap();
                if let DelegateKind::Download(download) = &mut state.kind {
                    download.resumed_offset = Some(offset);
                    download.bytes_written = offset;
                    download.expected_to_write = expected_total;
                }
            }
            TaskEvent::FinishedDownloading { temporary } => {
                self.finished_downloading(&temporary)
            }
            TaskEvent::BecameDownloadTask(task) => {
                debug!(id = %task.id(), "data task became a download task");
                self.bind_task(task);
                let mut state = self.state.lock().unwrap();
                if let DelegateKind::Data(_) = state.kind {
                    state.kind = DelegateKind::Download(DownloadState::default());
                }
            }
            TaskEvent::Metrics(metrics) => {
                self.state.lock().unwrap().metrics = Some(metrics);
            }
            TaskEvent::Completed { error, resume_data } => {
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(transport_error) = error {
                        if state.error.is_none() {
                            state.error = Some(Error::Transport(transport_error));
                        }
                    }
                    if resume_data.is_some() {
                        state.resume_data = resume_data;
                    }
                    let clean = state.error.is_none();
                    let mut move_error = None;
                    if let DelegateKind::StreamingDownload(streaming) = &mut state.kind {
                        // Drop the handle so every byte is on disk before
                        // the scratch file moves or goes away.
                        if streaming.file.take().is_some() {
                            if clean {
                                match relocate(&streaming.scratch, &streaming.destination) {
                                    Ok(()) => {
                                        streaming.final_location =
                                            Some(streaming.destination.clone());
                                    }
                                    Err(error) => move_error = Some(error),
                                }
                            } else if let Err(source) = std::fs::remove_file(&streaming.scratch)
                            {
                                debug!(
                                    path = %streaming.scratch.display(),
                                    error = %source,
                                    "could not remove partial download"
                                );
                            }
                        }
                    }
                    if let Some(error) = move_error {
                        warn!(error = %error, "failed to move streamed download into place");
                        state.error = Some(error);
                    }
                    state.phase = Phase::Completed;
                }
                self.queue.release();
            }
        }
    }

    fn received_data(&self, bytes: Vec<u8>) {
        let (handler, snapshot, subscriptions) = {
            let mut state = self.state.lock().unwrap();
            let already_failed = state.error.is_some();
            let mut write_error = None;
            let (handler, completed, total) = match &mut state.kind {
                DelegateKind::Data(data) | DelegateKind::Upload(UploadState { data, .. }) => {
                    data.total_received += bytes.len() as u64;
                    match &data.stream_handler {
                        Some(handler) => {
                            (Some(Arc::clone(handler)), data.total_received, data.expected)
                        }
                        None => {
                            data.buffer.extend_from_slice(&bytes);
                            (None, data.total_received, data.expected)
                        }
                    }
                }
                DelegateKind::StreamingDownload(streaming) => {
                    if !already_failed {
                        if let Err(error) = streaming.append(&bytes) {
                            write_error = Some(error);
                        }
                    }
                    (None, streaming.bytes_written, streaming.expected_to_write)
                }
                // Plain downloads report progress through write callbacks.
                _ => return,
            };
            if let Some(error) = write_error {
                warn!(error = %error, "failed to write streamed download chunk");
                state.error = Some(error);
            }
            (
                handler,
                Progress { completed, total },
                state
                    .progress
                    .iter()
                    .map(ProgressSubscription::share)
                    .collect::<Vec<_>>(),
            )
        };
        if let Some(handler) = handler {
            handler(&bytes);
        }
        for subscription in &subscriptions {
            subscription.fire(snapshot);
        }
    }

    /// The temporary file only survives this callback, so the move to its
    /// final home happens here, before the terminal event.
    fn finished_downloading(&self, temporary: &Path) {
        let mut state = self.state.lock().unwrap();
        let response = state.response.clone();
        let moved = match &mut state.kind {
            DelegateKind::Download(download) => {
                let target = download.destination.as_ref().and_then(|resolve| {
                    response.as_ref().map(|head| resolve(temporary, head))
                });
                match target {
                    Some(target) => match relocate(temporary, &target) {
                        Ok(()) => {
                            download.final_location = Some(target);
                            Ok(())
                        }
                        Err(error) => Err(error),
                    },
                    None => {
                        download.final_location = Some(temporary.to_path_buf());
                        Ok(())
                    }
                }
            }
            // Streaming downloads never ride download tasks; their bytes
            // arrive as data callbacks and are written in received_data.
            _ => Ok(()),
        };
        if let Err(error) = moved {
            warn!(error = %error, "failed to relocate downloaded file");
            if state.error.is_none() {
                state.error = Some(error);
            }
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    pub(crate) fn response(&self) -> Option<ResponseHead> {
        self.state.lock().unwrap().response.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.state.lock().unwrap().error.clone()
    }

    pub(crate) fn metrics(&self) -> TaskMetrics {
        self.state.lock().unwrap().metrics.clone().unwrap_or_default()
    }

    pub(crate) fn resume_data(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().resume_data.clone()
    }

    /// Where the downloaded file ended up, for download-shaped requests.
    pub(crate) fn downloaded_file(&self) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        match &state.kind {
            DelegateKind::Download(download) => download.final_location.clone(),
            DelegateKind::StreamingDownload(streaming) => streaming.final_location.clone(),
            _ => None,
        }
    }

    /// The finished payload: buffered bytes, a file on disk, or nothing
    /// (streamed responses are consumed as they arrive and leave nothing).
    pub(crate) fn payload(&self) -> PayloadSnapshot {
        let state = self.state.lock().unwrap();
        match &state.kind {
            DelegateKind::Data(data) | DelegateKind::Upload(UploadState { data, .. }) => {
                if data.stream_handler.is_some() {
                    PayloadSnapshot::Empty
                } else {
                    PayloadSnapshot::Bytes(data.buffer.clone())
                }
            }
            DelegateKind::Download(download) => match &download.final_location {
                Some(path) => PayloadSnapshot::File(path.clone()),
                None => PayloadSnapshot::Empty,
            },
            // The streamed copy on disk and the buffer hold the same bytes;
            // hand out the buffer and let the file speak for itself.
            DelegateKind::StreamingDownload(streaming) => {
                PayloadSnapshot::Bytes(streaming.buffer.clone())
            }
        }
    }
}

/// Moves `from` to `to`, creating parent directories and falling back to
/// copy-and-delete when a plain rename cannot cross filesystems.
fn relocate(from: &Path, to: &Path) -> Result<(), Error> {
    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|source| Error::FileOperationFailed {
        path: to.to_path_buf(),
        source: Arc::new(source),
    })?;
    if let Err(source) = std::fs::remove_file(from) {
        debug!(path = %from.display(), error = %source, "could not remove temporary file");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;

    fn completed_event() -> TaskEvent {
        TaskEvent::Completed {
            error: None,
            resume_data: None,
        }
    }

    fn head(status: u16, content_length: Option<u64>) -> ResponseHead {
        ResponseHead {
            status,
            url: "https://example.test/".to_string(),
            content_length,
            headers: Vec::new(),
        }
    }

    #[test]
    fn data_accumulates_across_chunks() {
        let delegate = TaskDelegate::new_data();
        delegate.handle_event(TaskEvent::ReceivedResponse(head(200, Some(6))));
        delegate.handle_event(TaskEvent::ReceivedData(b"abc".to_vec()));
        delegate.handle_event(TaskEvent::ReceivedData(b"def".to_vec()));
        delegate.handle_event(completed_event());

        match delegate.payload() {
            PayloadSnapshot::Bytes(bytes) => assert_eq!(bytes, b"abcdef"),
            _ => panic!("expected buffered bytes"),
        }
        assert_eq!(delegate.phase(), Phase::Completed);
    }

    #[test]
    fn stream_handler_sees_chunks_and_nothing_is_buffered() {
        let delegate = TaskDelegate::new_data();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        delegate.set_stream_handler(Arc::new(move |chunk: &[u8]| {
            sink.lock().unwrap().extend_from_slice(chunk);
        }));
        delegate.handle_event(TaskEvent::ReceivedData(b"abc".to_vec()));
        delegate.handle_event(TaskEvent::ReceivedData(b"def".to_vec()));
        delegate.handle_event(completed_event());

        assert_eq!(*seen.lock().unwrap(), b"abcdef");
        assert!(matches!(delegate.payload(), PayloadSnapshot::Empty));
    }

    #[test]
    fn client_error_wins_over_transport_error() {
        let delegate = TaskDelegate::new_data();
        delegate.record_error(Error::InvalidUrl {
            url: "bogus".to_string(),
        });
        delegate.handle_event(TaskEvent::Completed {
            error: Some(weft_transport::Error::Cancelled),
            resume_data: None,
        });
        assert!(delegate.error().unwrap().is_invalid_url_error());
    }

    #[test]
    fn completion_releases_the_queue_exactly_once() {
        let delegate = TaskDelegate::new_data();
        let ran = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ran);
        delegate
            .queue()
            .submit(Box::new(move || *counter.lock().unwrap() += 1));
        assert_eq!(*ran.lock().unwrap(), 0);

        delegate.handle_event(completed_event());
        delegate.handle_event(completed_event());
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[test]
    fn resume_without_task_completes_immediately() {
        let delegate = TaskDelegate::new_data();
        delegate.record_error(Error::InvalidUrl {
            url: ":".to_string(),
        });
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        delegate
            .queue()
            .submit(Box::new(move || *flag.lock().unwrap() = true));
        delegate.resume();
        assert!(*ran.lock().unwrap());
        assert_eq!(delegate.phase(), Phase::Completed);
    }

    #[test]
    fn finished_download_moves_to_the_resolved_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let temp_file = tmp.path().join("incoming.part");
        std::fs::write(&temp_file, b"payload").unwrap();
        let target = tmp.path().join("deep/final.bin");

        let delegate = TaskDelegate::new_download();
        let resolved = target.clone();
        delegate.set_destination(Arc::new(move |_, _| resolved.clone()));
        delegate.handle_event(TaskEvent::ReceivedResponse(head(200, Some(7))));
        delegate.handle_event(TaskEvent::FinishedDownloading {
            temporary: temp_file.clone(),
        });
        delegate.handle_event(completed_event());

        assert_eq!(delegate.downloaded_file(), Some(target.clone()));
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!temp_file.exists());
    }

    #[test]
    fn streaming_download_writes_buffer_and_file_in_lockstep() {
        let tmp = tempfile::tempdir().unwrap();
        let destination = tmp.path().join("stable.bin");
        std::fs::write(&destination, b"stale leftovers").unwrap();

        let delegate = TaskDelegate::new_streaming(destination.clone());
        delegate.handle_event(TaskEvent::ReceivedData(b"fre".to_vec()));
        delegate.handle_event(TaskEvent::ReceivedData(b"sh".to_vec()));
        // The stable destination still holds the previous download; the
        // in-progress bytes live next to it.
        assert_eq!(std::fs::read(&destination).unwrap(), b"stale leftovers");
        assert_eq!(
            std::fs::read(tmp.path().join("stable.bin.part")).unwrap(),
            b"fresh"
        );
        delegate.handle_event(completed_event());

        assert_eq!(std::fs::read(&destination).unwrap(), b"fresh");
        assert!(!tmp.path().join("stable.bin.part").exists());
        assert_eq!(delegate.downloaded_file(), Some(destination));
        match delegate.payload() {
            PayloadSnapshot::Bytes(bytes) => assert_eq!(bytes, b"fresh"),
            _ => panic!("expected buffered bytes"),
        }
        assert!(delegate.error().is_none());
    }

    #[test]
    fn failed_streaming_download_leaves_nothing_at_the_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let destination = tmp.path().join("stable.bin");

        let delegate = TaskDelegate::new_streaming(destination.clone());
        delegate.handle_event(TaskEvent::ReceivedData(vec![0u8; 4096]));
        delegate.handle_event(TaskEvent::Completed {
            error: Some(weft_transport::Error::Cancelled),
            resume_data: None,
        });

        assert!(!destination.exists());
        assert!(!tmp.path().join("stable.bin.part").exists());
        assert_eq!(delegate.downloaded_file(), None);
        assert!(delegate.error().is_some());
    }

    #[test]
    fn progress_reports_ride_write_callbacks() {
        let delegate = TaskDelegate::new_download();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        delegate.add_progress(ProgressSubscription::new(
            Arc::new(move |p: Progress| sink.lock().unwrap().push(p)),
            dispatch::inline(),
        ));
        delegate.handle_event(TaskEvent::WroteData {
            total_written: 10,
            expected_to_write: Some(100),
        });
        delegate.handle_event(TaskEvent::WroteData {
            total_written: 100,
            expected_to_write: Some(100),
        });
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].fraction(), Some(1.0));
    }

    #[test]
    fn resume_data_is_kept_from_the_terminal_event() {
        let delegate = TaskDelegate::new_download();
        delegate.handle_event(TaskEvent::Completed {
            error: Some(weft_transport::Error::Cancelled),
            resume_data: Some(vec![1, 2, 3]),
        });
        assert_eq!(delegate.resume_data(), Some(vec![1, 2, 3]));
    }
}
