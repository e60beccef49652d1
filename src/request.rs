use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use weft_transport::{Method, ResponseHead, TaskId, TaskMetrics, TransportRequest};

use crate::delegate::{PayloadSnapshot, TaskDelegate};
use crate::dispatch::{self, Executor};
use crate::error::{Error, Result, ResponseSerializationFailureReason};
use crate::progress::{Progress, ProgressSubscription};
use crate::registry::TaskRegistry;
use crate::serialize::{
    JsonDeserializer, RawDeserializer, ResponseDeserializer, StringDeserializer,
};
use crate::validation;

#[derive(Default)]
struct RegistryKeys {
    id: Option<TaskId>,
    url: Option<String>,
}

/// Shared core behind every public request handle.
///
/// Registry entries pointing here are weak; this drop impl is what removes
/// them when the last handle goes away, so an abandoned request never
/// lingers in the session's indexes.
pub(crate) struct RequestInner {
    delegate: TaskDelegate,
    original: Option<TransportRequest>,
    registry: Weak<TaskRegistry>,
    keys: Mutex<RegistryKeys>,
}

impl RequestInner {
    pub(crate) fn new(
        delegate: TaskDelegate,
        original: Option<TransportRequest>,
        registry: Weak<TaskRegistry>,
    ) -> Self {
        Self {
            delegate,
            original,
            registry,
            keys: Mutex::new(RegistryKeys::default()),
        }
    }

    pub(crate) fn delegate(&self) -> &TaskDelegate {
        &self.delegate
    }

    pub(crate) fn set_task_id(&self, id: Option<TaskId>) {
        self.keys.lock().unwrap().id = id;
    }

    pub(crate) fn set_url_key(&self, url: Option<String>) {
        self.keys.lock().unwrap().url = url;
    }

    pub(crate) fn url_key(&self) -> Option<String> {
        self.keys.lock().unwrap().url.clone()
    }

    fn submit_validation(
        self: &Arc<Self>,
        predicate: Box<dyn FnOnce(&ResponseHead, bool) -> Result<()> + Send>,
    ) {
        let weak = Arc::downgrade(self);
        self.delegate.queue().submit(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            if inner.delegate.error().is_some() {
                return;
            }
            let Some(head) = inner.delegate.response() else {
                return;
            };
            let has_payload = match inner.delegate.payload() {
                PayloadSnapshot::Empty => false,
                PayloadSnapshot::Bytes(bytes) => !bytes.is_empty(),
                PayloadSnapshot::File(_) => true,
            };
            if let Err(error) = predicate(&head, has_payload) {
                inner.delegate.record_error(error);
            }
        }));
    }

    fn submit_response<D, F>(self: &Arc<Self>, executor: Arc<dyn Executor>, deserializer: D, handler: F)
    where
        D: ResponseDeserializer + Send + 'static,
        D::Output: Send + 'static,
        F: FnOnce(Response<D::Output>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.delegate.queue().submit(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let response = inner.build_response(&deserializer);
            executor.execute(Box::new(move || handler(response)));
        }));
    }

    fn build_response<D: ResponseDeserializer>(&self, deserializer: &D) -> Response<D::Output> {
        let head = self.delegate.response();
        let mut error = self.delegate.error();
        let (data, file) = match self.delegate.payload() {
            PayloadSnapshot::Bytes(bytes) => (Some(bytes), None),
            PayloadSnapshot::File(path) => match std::fs::read(&path) {
                Ok(bytes) => (Some(bytes), Some(path)),
                Err(_) => {
                    if error.is_none() {
                        error = Some(Error::ResponseSerializationFailed {
                            reason: ResponseSerializationFailureReason::InputFileReadFailed {
                                path: path.clone(),
                            },
                        });
                    }
                    (None, Some(path))
                }
            },
            PayloadSnapshot::Empty => (None, None),
        };
        // Streaming downloads expose their buffer as the payload; the copy
        // on disk is reported alongside it.
        let file = file.or_else(|| self.delegate.downloaded_file());
        let result = deserializer.deserialize(head.as_ref(), data.as_deref(), error.as_ref());
        Response {
            request: self.original.clone(),
            response: head,
            data,
            file,
            resume_data: self.delegate.resume_data(),
            metrics: self.delegate.metrics(),
            result,
        }
    }

    /// A copy-pasteable `curl` rendition of the request, for logs.
    fn transcript(&self) -> String {
        let Some(request) = &self.original else {
            return "$ curl command could not be created".to_string();
        };
        let mut parts = vec!["curl -v".to_string()];
        if !matches!(request.method, Method::Get) {
            parts.push(format!("-X {}", request.method));
        }
        for (name, value) in &request.headers {
            parts.push(format!("-H \"{name}: {value}\""));
        }
        if let Some(body) = &request.body {
            if let Ok(text) = std::str::from_utf8(body) {
                parts.push(format!("-d \"{}\"", text.replace('"', "\\\"")));
            }
        }
        parts.push(format!("\"{}\"", request.url));
        parts.join(" \\\n\t")
    }
}

impl Drop for RequestInner {
    fn drop(&mut self) {
        let keys = self.keys.get_mut().unwrap();
        if let Some(registry) = self.registry.upgrade() {
            if let Some(id) = keys.id.take() {
                registry.set(id, None);
            }
            if let Some(url) = keys.url.take() {
                registry.set_by_url(&url, None);
            }
        }
    }
}

/// The full outcome of one exchange.
#[derive(Debug)]
pub struct Response<T> {
    /// The request as handed to the transport, when construction got far
    /// enough to build one.
    pub request: Option<TransportRequest>,
    /// The response head, if one arrived.
    pub response: Option<ResponseHead>,
    /// Buffered payload bytes, when the exchange produced any in memory.
    pub data: Option<Vec<u8>>,
    /// Final location of a downloaded file, for download-shaped requests.
    pub file: Option<PathBuf>,
    /// Resumable bytes captured from an interrupted download.
    pub resume_data: Option<Vec<u8>>,
    /// Timing summary from the transport.
    pub metrics: TaskMetrics,
    /// The deserialized value, or the error that ended the exchange.
    pub result: Result<T>,
}

macro_rules! request_surface {
    ($handle:ident) => {
        impl $handle {
            /// Starts the transfer, or fires the completion pipeline right
            /// away when construction already failed.
            pub fn resume(&self) -> &Self {
                self.inner.delegate().resume();
                self
            }

            /// Pauses the transfer if the transport supports it.
            pub fn suspend(&self) -> &Self {
                self.inner.delegate().suspend();
                self
            }

            /// Cancels the transfer; a terminal completion still follows.
            pub fn cancel(&self) -> &Self {
                self.inner.delegate().cancel();
                self
            }

            /// The transport task id, once a task exists.
            pub fn task_id(&self) -> Option<TaskId> {
                self.inner.delegate().task_id()
            }

            /// Subscribes to transfer progress, delivered inline.
            pub fn progress<F>(&self, handler: F) -> &Self
            where
                F: Fn(Progress) + Send + Sync + 'static,
            {
                self.progress_on(crate::dispatch::InlineExecutor, handler)
            }

            /// Subscribes to transfer progress on a chosen executor.
            pub fn progress_on<F>(&self, executor: impl Executor, handler: F) -> &Self
            where
                F: Fn(Progress) + Send + Sync + 'static,
            {
                self.inner.delegate().add_progress(ProgressSubscription::new(
                    Arc::new(handler),
                    Arc::new(executor),
                ));
                self
            }

            /// Queues a validation over the response head. Runs after the
            /// terminal event, before any completion handler attached later;
            /// a rejection becomes the request's error.
            pub fn validate<F>(&self, predicate: F) -> &Self
            where
                F: FnOnce(&ResponseHead) -> Result<()> + Send + 'static,
            {
                self.inner
                    .submit_validation(Box::new(move |head, _| predicate(head)));
                self
            }

            /// Queues a status-code validation.
            pub fn validate_status<R>(&self, acceptable: R) -> &Self
            where
                R: RangeBounds<u16> + Send + 'static,
            {
                self.inner.submit_validation(Box::new(move |head, _| {
                    validation::validate_status(head, &acceptable)
                }));
                self
            }

            /// Queues a `Content-Type` validation.
            pub fn validate_content_types<I>(&self, acceptable: I) -> &Self
            where
                I: IntoIterator,
                I::Item: Into<String>,
            {
                let acceptable: Vec<String> =
                    acceptable.into_iter().map(Into::into).collect();
                self.inner.submit_validation(Box::new(move |head, has_payload| {
                    validation::validate_content_types(head, &acceptable, has_payload)
                }));
                self
            }

            /// Delivers the raw payload bytes once the exchange finishes.
            pub fn response_raw<F>(&self, handler: F) -> &Self
            where
                F: FnOnce(Response<Vec<u8>>) + Send + 'static,
            {
                self.inner
                    .submit_response(dispatch::inline(), RawDeserializer, handler);
                self
            }

            /// Delivers the payload decoded as UTF-8 text.
            pub fn response_string<F>(&self, handler: F) -> &Self
            where
                F: FnOnce(Response<String>) + Send + 'static,
            {
                self.inner
                    .submit_response(dispatch::inline(), StringDeserializer, handler);
                self
            }

            /// Delivers the payload parsed as JSON into `T`.
            pub fn response_json<T, F>(&self, handler: F) -> &Self
            where
                T: DeserializeOwned + Default + Send + Sync + 'static,
                F: FnOnce(Response<T>) + Send + 'static,
            {
                self.inner.submit_response(
                    dispatch::inline(),
                    JsonDeserializer::<T>::new(),
                    handler,
                );
                self
            }

            /// Delivers the exchange through a caller-supplied deserializer.
            pub fn response_with<D, F>(&self, deserializer: D, handler: F) -> &Self
            where
                D: ResponseDeserializer + Send + 'static,
                D::Output: Send + 'static,
                F: FnOnce(Response<D::Output>) + Send + 'static,
            {
                self.inner
                    .submit_response(dispatch::inline(), deserializer, handler);
                self
            }

            /// Like [`response_with`](Self::response_with), with the handler
            /// hopping onto `executor`.
            pub fn response_with_on<D, F>(
                &self,
                executor: impl Executor,
                deserializer: D,
                handler: F,
            ) -> &Self
            where
                D: ResponseDeserializer + Send + 'static,
                D::Output: Send + 'static,
                F: FnOnce(Response<D::Output>) + Send + 'static,
            {
                self.inner
                    .submit_response(Arc::new(executor), deserializer, handler);
                self
            }

            /// A copy-pasteable `curl` rendition of the request.
            pub fn transcript(&self) -> String {
                self.inner.transcript()
            }
        }

        impl std::fmt::Debug for $handle {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("task", &self.inner.delegate().task_id())
                    .finish()
            }
        }
    };
}

/// A plain request whose response body accumulates in memory, unless a
/// stream handler consumes it chunk by chunk.
#[derive(Clone)]
pub struct DataRequest {
    inner: Arc<RequestInner>,
}

request_surface!(DataRequest);

impl DataRequest {
    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    /// Routes response bytes to `handler` as they arrive.
    ///
    /// Once set, nothing is buffered: completion handlers see an empty
    /// payload and the stream handler is the only consumer.
    pub fn stream<F>(&self, handler: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.inner.delegate().set_stream_handler(Arc::new(handler));
        self
    }
}

/// A download writing to a file via the transport's temporary location.
#[derive(Clone)]
pub struct DownloadRequest {
    inner: Arc<RequestInner>,
}

request_surface!(DownloadRequest);

impl DownloadRequest {
    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    /// Chooses where the finished file lands, given the temporary path and
    /// the response head. Without a resolver the file stays at the
    /// transport's temporary location, which may not outlive the callback.
    pub fn destination<F>(&self, resolver: F) -> &Self
    where
        F: Fn(&Path, &ResponseHead) -> PathBuf + Send + Sync + 'static,
    {
        self.inner.delegate().set_destination(Arc::new(resolver));
        self
    }

    /// Cancels the download, offering resumable bytes to `handler` before
    /// any completion closure runs.
    pub fn cancel_with_resume_data<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Option<Vec<u8>>) + Send + 'static,
    {
        self.inner
            .delegate()
            .cancel_with_resume_data(Box::new(handler));
        self
    }

    /// Resumable bytes captured by the terminal event, if any.
    pub fn resume_data(&self) -> Option<Vec<u8>> {
        self.inner.delegate().resume_data()
    }

    /// Where the finished file ended up.
    pub fn downloaded_file(&self) -> Option<PathBuf> {
        self.inner.delegate().downloaded_file()
    }
}

/// An upload; its response body accumulates like a data request's.
#[derive(Clone)]
pub struct UploadRequest {
    inner: Arc<RequestInner>,
}

request_surface!(UploadRequest);

impl UploadRequest {
    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    /// Subscribes to request-body progress, delivered inline.
    pub fn upload_progress<F>(&self, handler: F) -> &Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.upload_progress_on(crate::dispatch::InlineExecutor, handler)
    }

    /// Subscribes to request-body progress on a chosen executor.
    pub fn upload_progress_on<F>(&self, executor: impl Executor, handler: F) -> &Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.inner
            .delegate()
            .add_upload_progress(ProgressSubscription::new(Arc::new(handler), Arc::new(executor)));
        self
    }
}

/// A download with a stable, URL-derived destination that concurrent
/// callers share: asking for a URL already in flight joins the existing
/// transfer instead of starting a second one.
#[derive(Clone)]
pub struct StreamingDownloadRequest {
    inner: Arc<RequestInner>,
    destination: PathBuf,
}

request_surface!(StreamingDownloadRequest);

impl StreamingDownloadRequest {
    pub(crate) fn from_inner(inner: Arc<RequestInner>, destination: PathBuf) -> Self {
        Self { inner, destination }
    }

    /// The stable destination this URL always maps to.
    pub fn destination(&self) -> &Path {
        &self.destination
    }
}
