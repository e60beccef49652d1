use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, warn};
use weft_transport::{
    BodyStream, Method, ServerTrust, SessionOptions, TransportConnector, TransportRequest,
    TransportSession, TransportTask, TrustDisposition, UploadPayload,
};

use crate::delegate::TaskDelegate;
use crate::encoding::{ParameterEncoding, Parameters};
use crate::error::{Error, Result};
use crate::multipart::{unique_token, MultipartFormData};
use crate::multiplexer::SessionMultiplexer;
use crate::paths::{ensure_dir, DownloadLocations};
use crate::registry::{normalize_url, TaskRegistry};
use crate::request::{
    DataRequest, DownloadRequest, RequestInner, StreamingDownloadRequest, UploadRequest,
};

/// Multipart bodies below this size are encoded in memory; at or above it
/// they are streamed through a temporary file instead.
pub const MULTIPART_ENCODING_MEMORY_THRESHOLD: u64 = 1024 * 1024;

/// A ready-made `Authorization: Basic` header for `user`/`password`.
pub fn authorization_header(user: &str, password: &str) -> (String, String) {
    let credential = BASE64.encode(format!("{user}:{password}"));
    ("Authorization".to_string(), format!("Basic {credential}"))
}

/// Rewrites every outgoing request once, right before a task is minted.
///
/// The canonical use is attaching credentials. An adapter failure becomes
/// the request's construction error; the handle still comes back and its
/// completion pipeline fires immediately.
pub trait RequestAdapter: Send + Sync + 'static {
    /// Returns the request to actually send.
    fn adapt(&self, request: TransportRequest) -> Result<TransportRequest>;
}

impl<F> RequestAdapter for F
where
    F: Fn(TransportRequest) -> Result<TransportRequest> + Send + Sync + 'static,
{
    fn adapt(&self, request: TransportRequest) -> Result<TransportRequest> {
        self(request)
    }
}

/// Decides TLS server trust challenges for the whole session.
pub trait TrustPolicy: Send + Sync + 'static {
    /// Disposition for the trust material presented by `host`.
    fn evaluate(&self, host: &str, trust: &ServerTrust) -> TrustDisposition;
}

/// Configures and opens a [`RequestEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    options: SessionOptions,
    adapter: Option<Arc<dyn RequestAdapter>>,
    trust_policy: Option<Arc<dyn TrustPolicy>>,
    locations: Option<DownloadLocations>,
    start_immediately: Option<bool>,
}

impl EngineBuilder {
    /// A builder with stock settings: a `User-Agent` base header, scratch
    /// download locations, and requests that start as soon as they are made.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header applied to every request that does not set it itself.
    pub fn base_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.base_headers.push((name.into(), value.into()));
        self
    }

    /// Per-request timeout enforced by the transport.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Installs a request adapter, applied once per request.
    pub fn adapter(mut self, adapter: impl RequestAdapter) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Installs a TLS trust policy for the session.
    pub fn trust_policy(mut self, policy: impl TrustPolicy) -> Self {
        self.trust_policy = Some(Arc::new(policy));
        self
    }

    /// Where streamed downloads land. Defaults to
    /// [`DownloadLocations::scratch`].
    pub fn download_locations(mut self, locations: DownloadLocations) -> Self {
        self.locations = Some(locations);
        self
    }

    /// Whether requests begin transferring at creation. When `false` the
    /// caller drives them with `resume`. Defaults to `true`.
    pub fn start_requests_immediately(mut self, start: bool) -> Self {
        self.start_immediately = Some(start);
        self
    }

    /// Opens the shared session and hands back the engine.
    pub fn build(mut self, connector: &dyn TransportConnector) -> Result<RequestEngine> {
        if !self
            .options
            .base_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
        {
            self.options.base_headers.push((
                "User-Agent".to_string(),
                concat!("weft/", env!("CARGO_PKG_VERSION")).to_string(),
            ));
        }
        let registry = Arc::new(TaskRegistry::new());
        let multiplexer = Arc::new(SessionMultiplexer::new(
            Arc::clone(&registry),
            self.trust_policy,
        ));
        let session = connector.open_session(multiplexer, self.options.clone())?;
        Ok(RequestEngine {
            session,
            registry,
            base_headers: self.options.base_headers,
            adapter: self.adapter,
            locations: self.locations.unwrap_or_else(DownloadLocations::scratch),
            start_immediately: self.start_immediately.unwrap_or(true),
        })
    }
}

/// The front door: mints transport tasks over one shared session and hands
/// out request handles.
///
/// Construction failures (bad URL, encoding failure, adapter rejection, a
/// transport that refuses the task) never surface as panics or missing
/// handles: the returned handle carries the error and its completion
/// pipeline fires as soon as the request is resumed.
pub struct RequestEngine {
    session: Box<dyn TransportSession>,
    registry: Arc<TaskRegistry>,
    base_headers: Vec<(String, String)>,
    adapter: Option<Arc<dyn RequestAdapter>>,
    locations: DownloadLocations,
    start_immediately: bool,
}

impl RequestEngine {
    /// A data request with no parameters.
    pub fn request(&self, method: Method, url: &str) -> DataRequest {
        let built = self.prepare(method, url, None, None);
        self.data_request(built)
    }

    /// A data request with `parameters` attached by `encoding`.
    pub fn request_with(
        &self,
        method: Method,
        url: &str,
        parameters: &Parameters,
        encoding: &dyn ParameterEncoding,
    ) -> DataRequest {
        let built = self.prepare(method, url, Some((parameters, encoding)), None);
        self.data_request(built)
    }

    /// Shorthand for a parameterless GET.
    pub fn get(&self, url: &str) -> DataRequest {
        self.request(Method::Get, url)
    }

    /// Shorthand for a bodyless POST.
    pub fn post(&self, url: &str) -> DataRequest {
        self.request(Method::Post, url)
    }

    /// A download task fetching `url` to a file.
    pub fn download(&self, url: &str) -> DownloadRequest {
        let built = self.prepare(Method::Get, url, None, None);
        let delegate = TaskDelegate::new_download();
        let inner = match built {
            Ok(request) => {
                let minted = self.session.download_task(request.clone());
                self.attach(delegate, Some(request), minted, |_| {})
            }
            Err(error) => self.construction_failure(delegate, None, error),
        };
        DownloadRequest::from_inner(inner)
    }

    /// A download continuing from previously captured resume data.
    pub fn download_resuming(&self, resume_data: Vec<u8>) -> DownloadRequest {
        let delegate = TaskDelegate::new_download();
        let minted = self.session.download_task_resuming(resume_data);
        DownloadRequest::from_inner(self.attach(delegate, None, minted, |_| {}))
    }

    /// An upload sending `data` as the request body.
    pub fn upload_data(&self, method: Method, url: &str, data: Vec<u8>) -> UploadRequest {
        self.upload(method, url, UploadPayload::Bytes(data), None)
    }

    /// An upload streaming the file at `path` as the request body.
    pub fn upload_file(&self, method: Method, url: &str, path: impl Into<PathBuf>) -> UploadRequest {
        self.upload(method, url, UploadPayload::File(path.into()), None)
    }

    /// An upload whose body is pulled lazily from `provider`.
    ///
    /// The transport asks for a fresh stream every time it needs to send the
    /// body, including retransmission after a redirect, so the provider must
    /// be able to mint more than one.
    pub fn upload_stream(
        &self,
        method: Method,
        url: &str,
        provider: impl Fn() -> BodyStream + Send + Sync + 'static,
    ) -> UploadRequest {
        let delegate = TaskDelegate::new_upload();
        delegate.set_body_stream_provider(Arc::new(provider));
        let inner = match self.prepare(method, url, None, None) {
            Ok(request) => {
                let minted = self.session.upload_task(request.clone(), UploadPayload::Stream);
                self.attach(delegate, Some(request), minted, |_| {})
            }
            Err(error) => self.construction_failure(delegate, None, error),
        };
        UploadRequest::from_inner(inner)
    }

    /// An upload sending a multipart form assembled by `build`.
    ///
    /// Small bodies are encoded in memory; bodies at or past
    /// [`MULTIPART_ENCODING_MEMORY_THRESHOLD`] are streamed through a
    /// temporary file that is deleted when the request completes.
    pub fn upload_multipart(
        &self,
        method: Method,
        url: &str,
        build: impl FnOnce(&mut MultipartFormData),
    ) -> UploadRequest {
        let mut form = MultipartFormData::new();
        build(&mut form);
        let content_type = form.content_type();
        let delegate = TaskDelegate::new_upload();

        let payload = if form.content_length() < MULTIPART_ENCODING_MEMORY_THRESHOLD {
            form.encode().map(UploadPayload::Bytes)
        } else {
            self.spill_multipart(form, &delegate)
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(error) => {
                warn!(url, error = %error, "multipart encoding failed");
                return UploadRequest::from_inner(
                    self.construction_failure(delegate, None, error),
                );
            }
        };
        match self.prepare(method, url, None, Some(&content_type)) {
            Ok(request) => {
                let minted = self.session.upload_task(request.clone(), payload);
                UploadRequest::from_inner(self.attach(delegate, Some(request), minted, |_| {}))
            }
            Err(error) => {
                UploadRequest::from_inner(self.construction_failure(delegate, None, error))
            }
        }
    }

    /// A shared download to a stable, URL-derived destination.
    ///
    /// If a streaming download for the same URL is already in flight, the
    /// returned handle joins it instead of starting a second transfer; both
    /// callers' completion handlers fire off the one terminal event.
    pub fn stream_download(&self, url: &str) -> StreamingDownloadRequest {
        // The destination derives from the same normalized form the
        // registry dedupes on, so case-variant URLs share one file.
        let destination = self.locations.destination_for(&normalize_url(url));
        if let Some(existing) = self.registry.get_by_url(url) {
            debug!(url, "joining in-flight streaming download");
            return StreamingDownloadRequest::from_inner(existing, destination);
        }
        let delegate = TaskDelegate::new_streaming(destination.clone());
        let inner = match self.prepare(Method::Get, url, None, None) {
            Ok(request) => {
                let minted = self.session.data_task(request.clone());
                let registry = &self.registry;
                self.attach(delegate, Some(request), minted, |inner| {
                    inner.set_url_key(Some(url.to_string()));
                    registry.set_by_url(url, Some(Arc::downgrade(inner)));
                })
            }
            Err(error) => self.construction_failure(delegate, None, error),
        };
        StreamingDownloadRequest::from_inner(inner, destination)
    }

    /// Number of live requests the session currently tracks.
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// Where this engine places streamed downloads.
    pub fn download_locations(&self) -> &DownloadLocations {
        &self.locations
    }

    /// Shuts the session down: in-flight tasks are cancelled and new ones
    /// refused. Idempotent; also runs on drop.
    pub fn invalidate(&self) {
        self.session.invalidate();
    }

    fn upload(
        &self,
        method: Method,
        url: &str,
        payload: UploadPayload,
        content_type: Option<&str>,
    ) -> UploadRequest {
        let delegate = TaskDelegate::new_upload();
        let inner = match self.prepare(method, url, None, content_type) {
            Ok(request) => {
                let minted = self.session.upload_task(request.clone(), payload);
                self.attach(delegate, Some(request), minted, |_| {})
            }
            Err(error) => self.construction_failure(delegate, None, error),
        };
        UploadRequest::from_inner(inner)
    }

    /// Builds and adapts the outgoing request. Any failure here becomes the
    /// handle's construction error.
    fn prepare(
        &self,
        method: Method,
        url: &str,
        parameters: Option<(&Parameters, &dyn ParameterEncoding)>,
        content_type: Option<&str>,
    ) -> Result<TransportRequest> {
        let url = validated_url(url)?;
        let mut request = TransportRequest::new(method, url);
        for (name, value) in &self.base_headers {
            if request.header(name).is_none() {
                request.set_header(name.clone(), value.clone());
            }
        }
        if let Some(content_type) = content_type {
            request.set_header("Content-Type", content_type.to_string());
        }
        if let Some((parameters, encoding)) = parameters {
            encoding.encode(&mut request, parameters)?;
        }
        match &self.adapter {
            Some(adapter) => adapter.adapt(request),
            None => Ok(request),
        }
    }

    /// Writes an oversized multipart body to a temporary file and schedules
    /// its removal for when the request completes.
    fn spill_multipart(
        &self,
        form: MultipartFormData,
        delegate: &TaskDelegate,
    ) -> Result<UploadPayload> {
        let dir = std::env::temp_dir().join("weft.engine/multipart.form.data");
        ensure_dir(&dir)?;
        let (first, second) = unique_token();
        let temp = dir.join(format!("{first:08x}{second:08x}"));
        form.write_encoded_data(&temp)?;
        let cleanup_target = temp.clone();
        delegate.queue().submit(Box::new(move || {
            if let Err(error) = std::fs::remove_file(&cleanup_target) {
                debug!(path = %cleanup_target.display(), error = %error,
                    "could not remove multipart temporary file");
            }
        }));
        Ok(UploadPayload::File(temp))
    }

    fn data_request(&self, built: Result<TransportRequest>) -> DataRequest {
        let delegate = TaskDelegate::new_data();
        let inner = match built {
            Ok(request) => {
                let minted = self.session.data_task(request.clone());
                self.attach(delegate, Some(request), minted, |_| {})
            }
            Err(error) => self.construction_failure(delegate, None, error),
        };
        DataRequest::from_inner(inner)
    }

    /// Wires a minted task (or its minting failure) into a registered
    /// request. `configure` runs after registration and before the request
    /// is resumed, so extra index entries exist before any callback fires.
    fn attach(
        &self,
        delegate: TaskDelegate,
        original: Option<TransportRequest>,
        minted: weft_transport::Result<Box<dyn TransportTask>>,
        configure: impl FnOnce(&Arc<RequestInner>),
    ) -> Arc<RequestInner> {
        let inner = match minted {
            Ok(task) => {
                let id = task.id();
                debug!(id = %id, "task created");
                delegate.bind_task(task);
                let inner = Arc::new(RequestInner::new(
                    delegate,
                    original,
                    Arc::downgrade(&self.registry),
                ));
                self.registry.set(id, Some(Arc::downgrade(&inner)));
                inner.set_task_id(Some(id));
                inner
            }
            Err(error) => {
                warn!(error = %error, "transport refused the task");
                delegate.record_error(Error::Transport(error));
                Arc::new(RequestInner::new(delegate, original, Weak::new()))
            }
        };
        configure(&inner);
        if self.start_immediately {
            inner.delegate().resume();
        }
        inner
    }

    fn construction_failure(
        &self,
        delegate: TaskDelegate,
        original: Option<TransportRequest>,
        error: Error,
    ) -> Arc<RequestInner> {
        warn!(error = %error, "request construction failed");
        delegate.record_error(error);
        let inner = Arc::new(RequestInner::new(delegate, original, Weak::new()));
        if self.start_immediately {
            inner.delegate().resume();
        }
        inner
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        self.session.invalidate();
    }
}

/// A URL the engine will hand to the transport: a scheme, `://`, and a
/// non-empty authority.
fn validated_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let invalid = || Error::InvalidUrl {
        url: url.to_string(),
    };
    let (scheme, rest) = trimmed.split_once("://").ok_or_else(invalid)?;
    let scheme_ok = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if !scheme_ok || host.is_empty() {
        return Err(invalid());
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_need_a_scheme_and_a_host() {
        assert!(validated_url("https://example.test/path").is_ok());
        assert!(validated_url("  https://example.test  ").is_ok());
        assert!(validated_url("example.test/path").is_err());
        assert!(validated_url("https:///path").is_err());
        assert!(validated_url("1bad://example.test").is_err());
        assert!(validated_url("").is_err());
    }

    #[test]
    fn basic_auth_header_is_base64_of_user_colon_password() {
        let (name, value) = authorization_header("user", "passw0rd");
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Basic dXNlcjpwYXNzdzByZA==");
    }
}
