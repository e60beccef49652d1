use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use weft::{
    authorization_header, EngineBuilder, Error, MultipartFormData, Progress, RequestEngine,
    TrustPolicy,
};
use weft_mock_transport::{MockConnector, Script};
use weft_transport::{Method, ServerTrust, TransportRequest, TrustDisposition};

const WAIT: Duration = Duration::from_secs(5);

fn engine(connector: &MockConnector) -> RequestEngine {
    EngineBuilder::new().build(connector).unwrap()
}

fn manual_engine(connector: &MockConnector) -> RequestEngine {
    EngineBuilder::new()
        .start_requests_immediately(false)
        .build(connector)
        .unwrap()
}

#[test]
fn get_delivers_the_scripted_body() {
    let connector = MockConnector::new();
    connector.script(
        "https://example.test/greeting",
        Script::ok(b"hello".to_vec()).header("Content-Type", "text/plain"),
    );
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/greeting");
    request.response_string(move |response| {
        tx.send((
            response.response.map(|h| h.status),
            response.result.map_err(|e| e.to_string()),
        ))
        .unwrap();
    });
    let (status, result) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, Some(200));
    assert_eq!(result.unwrap(), "hello");
}

#[test]
fn invalid_url_still_returns_a_handle_that_completes() {
    let connector = MockConnector::new();
    let engine = engine(&connector);

    let delivered = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&delivered);
    engine.get("not a url at all").response_raw(move |response| {
        *sink.lock().unwrap() = Some(response.result.unwrap_err().is_invalid_url_error());
    });
    // Construction failed, so the pipeline was already open and the handler
    // ran inline.
    assert_eq!(*delivered.lock().unwrap(), Some(true));
    assert!(connector.requests().is_empty());
}

#[test]
fn status_validation_rejects_out_of_range_codes() {
    let connector = MockConnector::new();
    connector.script("https://example.test/missing", Script::ok(Vec::new()).status(404));
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/missing");
    request.validate_status(200..300).response_raw(move |response| {
        tx.send(response.result.map_err(|e| e.to_string())).unwrap();
    });
    let result = rx.recv_timeout(WAIT).unwrap();
    assert!(result.unwrap_err().contains("unacceptable status code: 404"));
}

#[test]
fn content_type_validation_accepts_wildcards() {
    let connector = MockConnector::new();
    connector.script(
        "https://example.test/doc",
        Script::ok(b"{}".to_vec()).header("Content-Type", "application/json; charset=utf-8"),
    );
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/doc");
    request
        .validate_content_types(["application/*"])
        .response_raw(move |response| {
            tx.send(response.result.is_ok()).unwrap();
        });
    assert!(rx.recv_timeout(WAIT).unwrap());
}

#[test]
fn content_type_validation_skips_empty_bodies() {
    let connector = MockConnector::new();
    connector.script("https://example.test/empty", Script::ok(Vec::new()).status(204));
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/empty");
    request
        .validate_content_types(["application/json"])
        .response_raw(move |response| {
            tx.send(response.result.map_err(|e| e.to_string())).unwrap();
        });
    assert!(rx.recv_timeout(WAIT).unwrap().is_ok());
}

#[test]
fn pipeline_runs_validations_and_handlers_in_submission_order() {
    let connector = MockConnector::new();
    connector.script("https://example.test/ordered", Script::ok(b"x".to_vec()));
    let engine = manual_engine(&connector);

    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/ordered");
    {
        let order = Arc::clone(&order);
        request.validate(move |_| {
            order.lock().unwrap().push("validate");
            Ok(())
        });
    }
    {
        let order = Arc::clone(&order);
        request.response_raw(move |_| order.lock().unwrap().push("complete_a"));
    }
    {
        let order = Arc::clone(&order);
        request.response_raw(move |_| {
            order.lock().unwrap().push("complete_b");
            tx.send(()).unwrap();
        });
    }
    request.resume();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["validate", "complete_a", "complete_b"]
    );
}

#[test]
fn stream_handler_consumes_chunks_and_nothing_is_buffered() {
    let connector = MockConnector::new();
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    connector.script(
        "https://example.test/feed",
        Script::ok(body.clone()).chunk_size(512),
    );
    let engine = manual_engine(&connector);

    let streamed = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/feed");
    {
        let streamed = Arc::clone(&streamed);
        request.stream(move |chunk| streamed.lock().unwrap().extend_from_slice(chunk));
    }
    request.response_raw(move |response| {
        tx.send(response.data.is_none()).unwrap();
    });
    request.resume();

    assert!(rx.recv_timeout(WAIT).unwrap());
    assert_eq!(*streamed.lock().unwrap(), body);
}

#[test]
fn download_lands_at_the_resolved_destination() {
    let connector = MockConnector::new();
    let body: Vec<u8> = (0..4_000u32).map(|i| (i % 199) as u8).collect();
    connector.script("https://example.test/archive", Script::ok(body.clone()));
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("saved/archive.bin");
    let engine = manual_engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.download("https://example.test/archive");
    let resolved = target.clone();
    request.destination(move |_, _| resolved.clone());
    request.response_raw(move |response| {
        tx.send(response.file).unwrap();
    });
    request.resume();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(target.clone()));
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[test]
fn upload_progress_reaches_the_declared_total() {
    let connector = MockConnector::new();
    connector.script("https://example.test/inbox", Script::ok(b"ok".to_vec()));
    let engine = manual_engine(&connector);

    let reports = Arc::new(Mutex::new(Vec::<Progress>::new()));
    let (tx, rx) = mpsc::channel();
    let request = engine.upload_data(
        Method::Post,
        "https://example.test/inbox",
        vec![9u8; 4096],
    );
    {
        let reports = Arc::clone(&reports);
        request.upload_progress(move |p| reports.lock().unwrap().push(p));
    }
    request.response_raw(move |_| tx.send(()).unwrap());
    request.resume();
    rx.recv_timeout(WAIT).unwrap();

    let reports = reports.lock().unwrap();
    let last = reports.last().expect("at least one progress report");
    assert_eq!(last.completed, 4096);
    assert_eq!(last.fraction(), Some(1.0));
}

#[test]
fn streamed_upload_pulls_a_fresh_body_from_the_provider() {
    let connector = MockConnector::new();
    connector.script("https://example.test/inbox", Script::ok(b"ok".to_vec()));
    let engine = manual_engine(&connector);

    let minted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&minted);
    let reports = Arc::new(Mutex::new(Vec::<Progress>::new()));
    let (tx, rx) = mpsc::channel();
    let request = engine.upload_stream(Method::Post, "https://example.test/inbox", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(std::io::Cursor::new(vec![7u8; 2048]))
    });
    {
        let reports = Arc::clone(&reports);
        request.upload_progress(move |p| reports.lock().unwrap().push(p));
    }
    request.response_raw(move |response| tx.send(response.result.is_ok()).unwrap());
    request.resume();
    assert!(rx.recv_timeout(WAIT).unwrap());

    assert_eq!(minted.load(Ordering::SeqCst), 1);
    let reports = reports.lock().unwrap();
    assert_eq!(reports.last().expect("progress reported").completed, 2048);
}

#[test]
fn multipart_upload_carries_the_boundary_content_type() {
    let connector = MockConnector::new();
    connector.script("https://example.test/form", Script::ok(b"ok".to_vec()));
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.upload_multipart(Method::Post, "https://example.test/form", |form| {
        form.append_text("field", "value");
        form.append_data(vec![1, 2, 3], "blob", Some("b.bin"), Some("application/octet-stream"));
    });
    request.response_raw(move |response| tx.send(response.result.is_ok()).unwrap());
    assert!(rx.recv_timeout(WAIT).unwrap());

    let seen = connector.requests();
    assert_eq!(seen.len(), 1);
    let content_type = seen[0].header("content-type").unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary=weft.boundary."));
}

#[test]
fn oversized_multipart_bodies_are_streamed_from_disk() {
    let connector = MockConnector::new();
    connector.script("https://example.test/big-form", Script::ok(b"ok".to_vec()));
    let engine = engine(&connector);

    // Past the in-memory threshold, the body is spilled to a temp file and
    // the transport sees a file payload of the full encoded size.
    let payload = vec![7u8; 2 * 1024 * 1024];
    let (tx, rx) = mpsc::channel();
    let request = engine.upload_multipart(Method::Post, "https://example.test/big-form", move |form| {
        form.append_data(payload, "blob", Some("big.bin"), None);
    });
    request.response_raw(move |response| tx.send(response.result.is_ok()).unwrap());
    assert!(rx.recv_timeout(WAIT).unwrap());
}

#[test]
fn multipart_construction_failure_rides_the_handle() {
    let connector = MockConnector::new();
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.upload_multipart(Method::Post, "https://example.test/form", |form| {
        form.append_file("/definitely/not/here.bin", "missing");
    });
    request.response_raw(move |response| {
        tx.send(response.result.unwrap_err().is_multipart_encoding_error())
            .unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap());
    assert!(connector.requests().is_empty());
}

#[test]
fn streaming_downloads_share_one_in_flight_transfer() {
    let connector = MockConnector::new();
    let body: Vec<u8> = (0..50_000u32).map(|i| (i % 241) as u8).collect();
    connector.script(
        "https://example.test/shared",
        Script::ok(body.clone())
            .chunk_size(1000)
            .chunk_delay(Duration::from_millis(2)),
    );
    let tmp = tempfile::tempdir().unwrap();
    let engine = EngineBuilder::new()
        .download_locations(weft::DownloadLocations::at(tmp.path()))
        .build(&connector)
        .unwrap();

    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let first = engine.stream_download("https://example.test/shared");
    let second = engine.stream_download("https://example.test/shared");
    assert_eq!(first.destination(), second.destination());

    first.response_raw(move |response| tx_a.send(response.file).unwrap());
    second.response_raw(move |response| tx_b.send(response.file).unwrap());

    let file_a = rx_a.recv_timeout(WAIT).unwrap();
    let file_b = rx_b.recv_timeout(WAIT).unwrap();
    assert_eq!(file_a, file_b);
    assert_eq!(std::fs::read(file_a.unwrap()).unwrap(), body);
    // One transfer served both handles.
    assert_eq!(connector.requests().len(), 1);
}

#[test]
fn streaming_destination_ignores_url_case() {
    let connector = MockConnector::new();
    let engine = manual_engine(&connector);

    let first = engine.stream_download("https://example.test/Shared/file.bin");
    let second = engine.stream_download("HTTPS://EXAMPLE.TEST/Shared/file.bin");
    // Both handles join one transfer and agree on where it lands.
    assert_eq!(first.destination(), second.destination());
    assert_eq!(engine.in_flight(), 1);
}

#[test]
fn cancelled_download_resumes_from_captured_data() {
    let connector = MockConnector::new();
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 233) as u8).collect();
    connector.script(
        "https://example.test/resumable",
        Script::ok(body.clone())
            .chunk_size(1000)
            .chunk_delay(Duration::from_millis(5)),
    );
    let tmp = tempfile::tempdir().unwrap();
    let engine = manual_engine(&connector);

    let (progress_tx, progress_rx) = mpsc::channel();
    let (blob_tx, blob_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let request = engine.download("https://example.test/resumable");
    request.progress(move |p| {
        let _ = progress_tx.send(p);
    });
    request.response_raw(move |response| {
        done_tx
            .send(matches!(
                response.result,
                Err(Error::Transport(weft_transport::Error::Cancelled))
            ))
            .unwrap();
    });
    request.resume();
    progress_rx.recv_timeout(WAIT).unwrap();

    request.cancel_with_resume_data(move |blob| blob_tx.send(blob).unwrap());
    let blob = blob_rx.recv_timeout(WAIT).unwrap().expect("resume data");
    assert!(done_rx.recv_timeout(WAIT).unwrap());

    // Second leg continues from the captured offset.
    let target = tmp.path().join("resumed.bin");
    let (tx, rx) = mpsc::channel();
    let resumed = engine.download_resuming(blob);
    let resolved = target.clone();
    resumed.destination(move |_, _| resolved.clone());
    resumed.response_raw(move |response| tx.send(response.result.is_ok()).unwrap());
    resumed.resume();
    assert!(rx.recv_timeout(WAIT).unwrap());
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[test]
fn adapter_is_applied_exactly_once_per_request() {
    let connector = MockConnector::new();
    connector.script("https://example.test/secured", Script::ok(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let engine = EngineBuilder::new()
        .adapter(move |mut request: TransportRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            let (name, value) = authorization_header("user", "secret");
            request.set_header(name, value);
            Ok(request)
        })
        .build(&connector)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/secured");
    request.response_raw(move |_| tx.send(()).unwrap());
    rx.recv_timeout(WAIT).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let seen = connector.requests();
    assert!(seen[0].header("authorization").unwrap().starts_with("Basic "));
}

#[test]
fn trust_policy_can_cancel_a_challenge() {
    struct RejectAll;
    impl TrustPolicy for RejectAll {
        fn evaluate(&self, _host: &str, _trust: &ServerTrust) -> TrustDisposition {
            TrustDisposition::Cancel
        }
    }

    let connector = MockConnector::new();
    connector.script(
        "https://untrusted.test/",
        Script::ok(b"secret".to_vec()).challenge("untrusted.test"),
    );
    let engine = EngineBuilder::new()
        .trust_policy(RejectAll)
        .build(&connector)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://untrusted.test/");
    request.response_raw(move |response| {
        tx.send(matches!(
            response.result,
            Err(Error::Transport(weft_transport::Error::Cancelled))
        ))
        .unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap());
}

#[test]
fn redirects_are_followed_to_the_final_response() {
    let connector = MockConnector::new();
    connector.script(
        "https://example.test/old",
        Script::ok(Vec::new()).redirect_through(["https://example.test/new".to_string()]),
    );
    connector.script("https://example.test/new", Script::ok(b"moved".to_vec()));
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/old");
    request.response_string(move |response| {
        tx.send((
            response.response.map(|h| h.url),
            response.result.unwrap(),
            response.metrics.redirect_count,
        ))
        .unwrap();
    });
    let (url, body, redirects) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(url.as_deref(), Some("https://example.test/new"));
    assert_eq!(body, "moved");
    assert_eq!(redirects, 1);
}

#[test]
fn data_task_converted_to_download_still_completes_its_handle() {
    let connector = MockConnector::new();
    connector.script(
        "https://example.test/spooled",
        Script::ok(b"spooled body".to_vec()).becomes_download(),
    );
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/spooled");
    request.response_raw(move |response| {
        tx.send(response.response.map(|h| h.status)).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(200));
}

#[test]
fn registry_empties_once_transfers_finish() {
    let connector = MockConnector::new();
    for i in 0..4 {
        connector.script(
            format!("https://example.test/item/{i}"),
            Script::ok(vec![i as u8; 100]),
        );
    }
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let mut requests = Vec::new();
    for i in 0..4 {
        let tx = tx.clone();
        let request = engine.get(&format!("https://example.test/item/{i}"));
        request.response_raw(move |response| tx.send(response.result.is_ok()).unwrap());
        requests.push(request);
    }
    for _ in 0..4 {
        assert!(rx.recv_timeout(WAIT).unwrap());
    }
    drop(requests);
    assert_eq!(engine.in_flight(), 0);
}

#[test]
fn concurrent_transfers_never_cross_wires() {
    let connector = MockConnector::new();
    let mut bodies = Vec::new();
    for i in 0..8u8 {
        let body: Vec<u8> = (0..20_000u32).map(|j| (j as u8).wrapping_mul(i + 1)).collect();
        connector.script(
            format!("https://example.test/wire/{i}"),
            Script::ok(body.clone())
                .chunk_size(700)
                .chunk_delay(Duration::from_micros(200)),
        );
        bodies.push(body);
    }
    let engine = engine(&connector);

    let (tx, rx) = mpsc::channel();
    let mut requests = Vec::new();
    for i in 0..8u8 {
        let tx = tx.clone();
        let request = engine.get(&format!("https://example.test/wire/{i}"));
        request.response_raw(move |response| tx.send((i, response.result.unwrap())).unwrap());
        requests.push(request);
    }
    let mut seen = 0;
    while seen < 8 {
        let (i, payload) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(payload, bodies[i as usize], "payload for request {i}");
        seen += 1;
    }
}

#[test]
fn base_headers_apply_unless_the_request_overrides_them() {
    let connector = MockConnector::new();
    connector.script("https://example.test/agent", Script::ok(Vec::new()));
    let engine = EngineBuilder::new()
        .base_header("X-Client", "weft-tests")
        .build(&connector)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let request = engine.get("https://example.test/agent");
    request.response_raw(move |_| tx.send(()).unwrap());
    rx.recv_timeout(WAIT).unwrap();

    let seen = connector.requests();
    assert_eq!(seen[0].header("x-client"), Some("weft-tests"));
    assert!(seen[0].header("user-agent").unwrap().starts_with("weft/"));
}

#[test]
fn transcript_is_available_for_in_flight_requests() {
    let connector = MockConnector::new();
    connector.script("https://example.test/log", Script::ok(Vec::new()));
    let engine = manual_engine(&connector);

    let request = engine.request_with(
        Method::Post,
        "https://example.test/log",
        &serde_json::Map::from_iter([("k".to_string(), serde_json::json!("v"))]),
        &weft::UrlEncoding,
    );
    let transcript = request.transcript();
    assert!(transcript.contains("-X POST"));
    assert!(transcript.contains("-d \"k=v\""));
    assert!(transcript.contains("https://example.test/log"));
}

#[test]
fn multipart_encode_matches_known_layout() {
    // Exercised here at the public surface; the boundary itself is random,
    // so the layout is checked structurally.
    let mut form = MultipartFormData::new();
    form.append_text("name", "weft");
    let boundary = form.boundary().to_string();
    let encoded = String::from_utf8(form.encode().unwrap()).unwrap();
    assert!(encoded.starts_with(&format!("--{boundary}\r\n")));
    assert!(encoded.contains("Content-Disposition: form-data; name=\"name\"\r\n\r\nweft"));
    assert!(encoded.ends_with(&format!("\r\n--{boundary}--\r\n")));
}
