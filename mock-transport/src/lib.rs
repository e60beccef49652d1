//! A scripted, in-memory transport.
//!
//! Register a [`Script`] per URL on a [`MockConnector`], open a session
//! through it, and every task minted for that URL replays the script:
//! response head, body chunks, progress callbacks, errors. Events are
//! delivered from a spawned thread per task, so consumers see the same
//! any-thread, interleaved callback behavior a real transport produces.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use weft_transport::{
    Error, Method, ResponseHead, ResumeDataHandler, ServerTrust, SessionDelegate, SessionOptions,
    TaskEvent, TaskId, TaskMetrics, TransportConnector, TransportRequest, TransportSession,
    TransportTask, TrustDisposition, UploadPayload,
};

/// What the mock does when a task for a given URL runs.
#[derive(Clone)]
pub struct Script {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunk_size: usize,
    chunk_delay: Duration,
    fail_with: Option<Error>,
    refuse_task: bool,
    becomes_download: bool,
    challenge_host: Option<String>,
    redirects: Vec<String>,
}

impl Script {
    /// A 200 response carrying `body`.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            chunk_size: 1024,
            chunk_delay: Duration::ZERO,
            fail_with: None,
            refuse_task: false,
            becomes_download: false,
            challenge_host: None,
            redirects: Vec::new(),
        }
    }

    /// Overrides the status code.
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a response header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Delivers the body in chunks of `size` bytes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sleeps between chunks, leaving a window for cancellation.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Ends the task with `error` after delivering any scripted body.
    pub fn fail_with(mut self, error: Error) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Makes the session refuse to mint a task for this URL.
    pub fn refuse_task(mut self) -> Self {
        self.refuse_task = true;
        self
    }

    /// Converts a data task into a download task before the response, the
    /// way a transport may when it decides to spool to disk.
    pub fn becomes_download(mut self) -> Self {
        self.becomes_download = true;
        self
    }

    /// Raises a TLS trust challenge for `host` before responding.
    pub fn challenge(mut self, host: impl Into<String>) -> Self {
        self.challenge_host = Some(host.into());
        self
    }

    /// Announces these redirect hops, consulting the delegate for each.
    pub fn redirect_through(mut self, hops: impl IntoIterator<Item = String>) -> Self {
        self.redirects = hops.into_iter().collect();
        self
    }
}

/// Scripted transport entry point; also records every request it sees.
#[derive(Default)]
pub struct MockConnector {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    seen: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script replayed for tasks targeting `url`.
    pub fn script(&self, url: impl Into<String>, script: Script) {
        self.scripts.lock().unwrap().insert(url.into(), script);
    }

    /// Every request handed to the session so far, in creation order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl TransportConnector for MockConnector {
    fn open_session(
        &self,
        delegate: Arc<dyn SessionDelegate>,
        options: SessionOptions,
    ) -> weft_transport::Result<Box<dyn TransportSession>> {
        Ok(Box::new(MockSession {
            shared: Arc::new(Shared {
                delegate,
                scripts: Arc::clone(&self.scripts),
                seen: Arc::clone(&self.seen),
                next_id: AtomicU64::new(1),
                invalidated: AtomicBool::new(false),
                _options: options,
            }),
        }))
    }
}

struct Shared {
    delegate: Arc<dyn SessionDelegate>,
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    seen: Arc<Mutex<Vec<TransportRequest>>>,
    next_id: AtomicU64,
    invalidated: AtomicBool,
    _options: SessionOptions,
}

impl Shared {
    fn script_for(&self, url: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Script::ok(Vec::new()).status(404))
    }

    fn mint_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

struct MockSession {
    shared: Arc<Shared>,
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Data,
    Download,
    Upload,
}

struct Plan {
    kind: Kind,
    url: String,
    script: Script,
    resume_offset: u64,
    upload_size: Option<u64>,
}

struct TaskState {
    id: TaskId,
    shared: Arc<Shared>,
    plan: Mutex<Option<Plan>>,
    started: AtomicBool,
    cancelled: AtomicBool,
    resume_capture: Mutex<Option<ResumeDataHandler>>,
}

/// Handle the session hands out; the script replays on a worker thread.
pub struct MockTask {
    state: Arc<TaskState>,
}

impl MockSession {
    fn task(&self, plan: Plan) -> weft_transport::Result<Box<dyn TransportTask>> {
        if self.shared.invalidated.load(Ordering::SeqCst) {
            return Err(Error::SessionInvalidated);
        }
        if plan.script.refuse_task {
            return Err(Error::InvalidUrl);
        }
        Ok(Box::new(MockTask {
            state: Arc::new(TaskState {
                id: self.shared.mint_id(),
                shared: Arc::clone(&self.shared),
                plan: Mutex::new(Some(plan)),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                resume_capture: Mutex::new(None),
            }),
        }))
    }

    fn plan_for(&self, kind: Kind, request: TransportRequest, upload_size: Option<u64>) -> Plan {
        self.shared.seen.lock().unwrap().push(request.clone());
        let script = self.shared.script_for(&request.url);
        Plan {
            kind,
            url: request.url,
            script,
            resume_offset: 0,
            upload_size,
        }
    }
}

impl TransportSession for MockSession {
    fn data_task(&self, request: TransportRequest) -> weft_transport::Result<Box<dyn TransportTask>> {
        let plan = self.plan_for(Kind::Data, request, None);
        self.task(plan)
    }

    fn download_task(
        &self,
        request: TransportRequest,
    ) -> weft_transport::Result<Box<dyn TransportTask>> {
        let plan = self.plan_for(Kind::Download, request, None);
        self.task(plan)
    }

    fn download_task_resuming(
        &self,
        resume_data: Vec<u8>,
    ) -> weft_transport::Result<Box<dyn TransportTask>> {
        let (url, offset) = decode_resume_data(&resume_data).ok_or(Error::InvalidUrl)?;
        let script = self.shared.script_for(&url);
        self.task(Plan {
            kind: Kind::Download,
            url,
            script,
            resume_offset: offset,
            upload_size: None,
        })
    }

    fn upload_task(
        &self,
        request: TransportRequest,
        payload: UploadPayload,
    ) -> weft_transport::Result<Box<dyn TransportTask>> {
        let upload_size = match payload {
            UploadPayload::Bytes(bytes) => Some(bytes.len() as u64),
            UploadPayload::File(path) => Some(
                std::fs::metadata(&path)
                    .map(|m| m.len())
                    .map_err(Error::from)?,
            ),
            UploadPayload::Stream => None,
        };
        let plan = self.plan_for(Kind::Upload, request, upload_size);
        self.task(plan)
    }

    fn invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::SeqCst);
    }
}

impl TransportTask for MockTask {
    fn id(&self) -> TaskId {
        self.state.id
    }

    fn resume(&self) {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || run(state));
    }

    fn suspend(&self) {
        // The mock has no pause machinery; scripts are short-lived.
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        if !self.state.started.swap(true, Ordering::SeqCst) {
            // Never resumed: complete immediately as cancelled.
            let state = Arc::clone(&self.state);
            std::thread::spawn(move || {
                finish(&state, Some(Error::Cancelled), None);
            });
        }
    }

    fn cancel_for_resume_data(&self, handler: ResumeDataHandler) {
        *self.state.resume_capture.lock().unwrap() = Some(handler);
        self.cancel();
    }
}

fn encode_resume_data(url: &str, offset: u64) -> Vec<u8> {
    let mut blob = url.as_bytes().to_vec();
    blob.push(0);
    blob.extend_from_slice(&offset.to_be_bytes());
    blob
}

fn decode_resume_data(blob: &[u8]) -> Option<(String, u64)> {
    let split = blob.iter().position(|&b| b == 0)?;
    let url = String::from_utf8(blob[..split].to_vec()).ok()?;
    let offset_bytes: [u8; 8] = blob[split + 1..].try_into().ok()?;
    Some((url, u64::from_be_bytes(offset_bytes)))
}

fn response_head(url: &str, script: &Script) -> ResponseHead {
    ResponseHead {
        status: script.status,
        url: url.to_string(),
        content_length: Some(script.body.len() as u64),
        headers: script.headers.clone(),
    }
}

fn finish(state: &TaskState, error: Option<Error>, resume_data: Option<Vec<u8>>) {
    finish_as(state, state.id, error, resume_data);
}

fn finish_as(state: &TaskState, id: TaskId, error: Option<Error>, resume_data: Option<Vec<u8>>) {
    if let Some(handler) = state.resume_capture.lock().unwrap().take() {
        handler(resume_data.clone());
    }
    state
        .shared
        .delegate
        .task_event(id, TaskEvent::Completed { error, resume_data });
}

fn run(state: Arc<TaskState>) {
    let Some(mut plan) = state.plan.lock().unwrap().take() else {
        return;
    };
    let started_at = Instant::now();
    let delegate = Arc::clone(&state.shared.delegate);

    if state.shared.invalidated.load(Ordering::SeqCst) {
        finish(&state, Some(Error::SessionInvalidated), None);
        return;
    }
    if state.cancelled.load(Ordering::SeqCst) {
        finish(&state, Some(Error::Cancelled), None);
        return;
    }

    if let Some(host) = &plan.script.challenge_host {
        let trust = ServerTrust {
            host: host.clone(),
            certificate_chain: Vec::new(),
        };
        if delegate.challenge(Some(state.id), &trust) == TrustDisposition::Cancel {
            finish(&state, Some(Error::Cancelled), None);
            return;
        }
    }

    let mut redirect_count = 0u32;
    for hop in std::mem::take(&mut plan.script.redirects) {
        let interim = ResponseHead {
            status: 302,
            url: plan.url.clone(),
            content_length: None,
            headers: vec![("Location".to_string(), hop.clone())],
        };
        let next = TransportRequest::new(Method::Get, hop);
        match delegate.redirect(state.id, &interim, next) {
            Some(followed) => {
                redirect_count += 1;
                plan.url = followed.url;
                plan.script = {
                    let followed = state.shared.script_for(&plan.url);
                    Script {
                        redirects: Vec::new(),
                        ..followed
                    }
                };
            }
            None => {
                delegate.task_event(state.id, TaskEvent::ReceivedResponse(interim));
                finish(&state, None, None);
                return;
            }
        }
    }

    // A data task the transport decides to spool: hand the delegate a fresh
    // task and keep emitting under its id.
    let mut effective = state.id;
    if plan.script.becomes_download && plan.kind == Kind::Data {
        plan.kind = Kind::Download;
        let replacement = MockTask {
            state: Arc::new(TaskState {
                id: state.shared.mint_id(),
                shared: Arc::clone(&state.shared),
                plan: Mutex::new(None),
                started: AtomicBool::new(true),
                cancelled: AtomicBool::new(false),
                resume_capture: Mutex::new(None),
            }),
        };
        effective = replacement.state.id;
        delegate.task_event(state.id, TaskEvent::BecameDownloadTask(Box::new(replacement)));
    }

    if plan.kind == Kind::Upload {
        // A declared payload size comes from bytes or a file; a streamed
        // body is pulled fresh from the session delegate and drained here.
        let size = match plan.upload_size {
            Some(size) => Some(size),
            None => match delegate.need_body_stream(effective) {
                Some(mut stream) => {
                    let mut body = Vec::new();
                    match stream.read_to_end(&mut body) {
                        Ok(_) => Some(body.len() as u64),
                        Err(source) => {
                            finish_as(&state, effective, Some(Error::from(source)), None);
                            return;
                        }
                    }
                }
                None => None,
            },
        };
        if let Some(size) = size {
            let mut sent = 0u64;
            while sent < size {
                let step = (size - sent).min(plan.script.chunk_size as u64);
                sent += step;
                delegate.task_event(
                    effective,
                    TaskEvent::SentBodyData {
                        bytes_sent: step,
                        total_sent: sent,
                        expected_to_send: Some(size),
                    },
                );
            }
        }
    }

    delegate.task_event(
        effective,
        TaskEvent::ReceivedResponse(response_head(&plan.url, &plan.script)),
    );

    let outcome = match plan.kind {
        Kind::Data | Kind::Upload => deliver_data(&state, effective, &plan),
        Kind::Download => deliver_download(&state, effective, &plan),
    };

    match outcome {
        Outcome::Cancelled { resume_data } => {
            finish_as(&state, effective, Some(Error::Cancelled), resume_data);
        }
        Outcome::Finished => {
            delegate.task_event(
                effective,
                TaskEvent::Metrics(TaskMetrics {
                    task_duration: started_at.elapsed(),
                    transaction_count: 1 + redirect_count,
                    redirect_count,
                }),
            );
            finish_as(&state, effective, plan.script.fail_with.clone(), None);
        }
        Outcome::Failed(error) => {
            finish_as(&state, effective, Some(error), None);
        }
    }
}

enum Outcome {
    Finished,
    Cancelled { resume_data: Option<Vec<u8>> },
    Failed(Error),
}

fn deliver_data(state: &TaskState, id: TaskId, plan: &Plan) -> Outcome {
    let delegate = &state.shared.delegate;
    for chunk in plan.script.body.chunks(plan.script.chunk_size) {
        if state.cancelled.load(Ordering::SeqCst) {
            return Outcome::Cancelled { resume_data: None };
        }
        delegate.task_event(id, TaskEvent::ReceivedData(chunk.to_vec()));
        if !plan.script.chunk_delay.is_zero() {
            std::thread::sleep(plan.script.chunk_delay);
        }
    }
    Outcome::Finished
}

fn deliver_download(state: &TaskState, id: TaskId, plan: &Plan) -> Outcome {
    let delegate = &state.shared.delegate;
    let body = &plan.script.body;
    let total = body.len() as u64;
    let offset = plan.resume_offset.min(total);
    let temporary = temp_path(id);

    let mut file = match std::fs::File::create(&temporary) {
        Ok(file) => file,
        Err(source) => return Outcome::Failed(Error::from(source)),
    };
    let mut written = 0u64;
    if offset > 0 {
        if let Err(source) = file.write_all(&body[..offset as usize]) {
            return Outcome::Failed(Error::from(source));
        }
        written = offset;
        delegate.task_event(
            id,
            TaskEvent::ResumedAtOffset {
                offset,
                expected_total: Some(total),
            },
        );
    }
    for chunk in body[offset as usize..].chunks(plan.script.chunk_size) {
        if state.cancelled.load(Ordering::SeqCst) {
            let resume_data = (written > 0).then(|| encode_resume_data(&plan.url, written));
            let _ = std::fs::remove_file(&temporary);
            return Outcome::Cancelled { resume_data };
        }
        if let Err(source) = file.write_all(chunk) {
            return Outcome::Failed(Error::from(source));
        }
        written += chunk.len() as u64;
        delegate.task_event(
            id,
            TaskEvent::WroteData {
                total_written: written,
                expected_to_write: Some(total),
            },
        );
        if !plan.script.chunk_delay.is_zero() {
            std::thread::sleep(plan.script.chunk_delay);
        }
    }
    drop(file);
    if plan.script.fail_with.is_none() {
        delegate.task_event(
            id,
            TaskEvent::FinishedDownloading {
                temporary: temporary.clone(),
            },
        );
    }
    // The receiver relocates the file during the callback; anything left
    // behind is ours to reclaim.
    let _ = std::fs::remove_file(&temporary);
    Outcome::Finished
}

fn temp_path(id: TaskId) -> PathBuf {
    static UNIQUE: AtomicU64 = AtomicU64::new(0);
    let n = UNIQUE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("weft.mock.{id}.{n}.part"))
}
