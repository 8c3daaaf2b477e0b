// Orchestrator behaviour against a scripted transport.

use forge_oss_cli::chunk::{ChunkRequest, ChunkResponse, ChunkTransport, CredentialProvider, TokenPolicy};
use forge_oss_cli::plan::plan;
use forge_oss_cli::session::UploadTarget;
use forge_oss_cli::state::StateDir;
use forge_oss_cli::upload::{NoopObserver, RetryPolicy, UploadOptions, Uploader};
use forge_oss_cli::{urn, UploadError};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const BUCKET: &str = "test-bucket";

#[derive(Debug, Clone)]
struct Sent {
    session_id: String,
    content_range: String,
    body: Vec<u8>,
    token: String,
}

/// Answers chunk calls from a script; `None` entries simulate a dropped
/// connection.
struct ScriptedTransport {
    script: RefCell<Vec<Option<(u16, String)>>>,
    sent: RefCell<Vec<Sent>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Option<(u16, String)>>) -> Self {
        let mut script = script;
        script.reverse();
        ScriptedTransport {
            script: RefCell::new(script),
            sent: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl ChunkTransport for ScriptedTransport {
    fn send_chunk(&self, request: &ChunkRequest<'_>, token: &str) -> forge_oss_cli::Result<ChunkResponse> {
        self.sent.borrow_mut().push(Sent {
            session_id: request.session_id.to_string(),
            content_range: request.content_range(),
            body: request.body.to_vec(),
            token: token.to_string(),
        });
        match self.script.borrow_mut().pop() {
            Some(Some((status, body))) => Ok(ChunkResponse { status, body }),
            Some(None) => Err(UploadError::transport(None, "connection reset", "Failed to send chunk")),
            None => panic!("chunk call beyond the script"),
        }
    }
}

struct CountingCredentials {
    issued: Cell<u32>,
    fail: bool,
}

impl CountingCredentials {
    fn new() -> Self {
        CountingCredentials {
            issued: Cell::new(0),
            fail: false,
        }
    }
}

impl CredentialProvider for CountingCredentials {
    fn access_token(&self) -> forge_oss_cli::Result<String> {
        if self.fail {
            return Err(UploadError::CredentialError("HTTP 401 - bad client".into()));
        }
        self.issued.set(self.issued.get() + 1);
        Ok(format!("token-{}", self.issued.get()))
    }
}

struct Fixture {
    dir: TempDir,
    state: StateDir,
    file: PathBuf,
    data: Vec<u8>,
}

impl Fixture {
    fn new(size: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let file = dir.path().join("model.rvt");
        std::fs::write(&file, &data).unwrap();
        let state = StateDir::new(dir.path().join("data"));
        Fixture { dir, state, file, data }
    }
}

fn accepted() -> Option<(u16, String)> {
    Some((202, String::new()))
}

fn finalized() -> Option<(u16, String)> {
    Some((
        200,
        serde_json::json!({
            "bucketKey": BUCKET,
            "objectId": "urn:adsk.objects:os.object:test-bucket/model.rvt",
            "objectKey": "model.rvt",
            "location": "https://developer.api.autodesk.com/oss/v2/buckets/test-bucket/objects/model.rvt",
            "size": 1000
        })
        .to_string(),
    ))
}

#[test]
fn uploads_every_range_then_records_descriptor() {
    let fx = Fixture::new(1000);
    let transport = ScriptedTransport::new(vec![accepted(), accepted(), accepted(), finalized()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let outcome = uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap();

    assert_eq!(transport.calls(), plan(1000, 3).unwrap().len());
    assert_eq!(outcome.chunks_sent, 4);
    assert_eq!(outcome.object_key, "model.rvt");
    assert_eq!(outcome.descriptor.object_id, "urn:adsk.objects:os.object:test-bucket/model.rvt");
    assert_eq!(outcome.urn, urn::encode(&outcome.descriptor.object_id));
    assert_eq!(outcome.urn_safe, urn::safe_encode(&outcome.descriptor.object_id));

    let sent = transport.sent.borrow();
    let ranges: Vec<&str> = sent.iter().map(|s| s.content_range.as_str()).collect();
    assert_eq!(
        ranges,
        vec!["bytes 0-332/1000", "bytes 333-665/1000", "bytes 666-998/1000", "bytes 999-999/1000"]
    );
    assert!(sent.iter().all(|s| s.session_id == outcome.session_id));
    assert_eq!(outcome.session_id.len(), 12);
    let reassembled: Vec<u8> = sent.iter().flat_map(|s| s.body.clone()).collect();
    assert_eq!(reassembled, fx.data);

    let saved = fx.state.load_descriptor(BUCKET, "model.rvt").unwrap().unwrap();
    assert_eq!(saved, outcome.descriptor);
    assert!(fx.state.load_checkpoint(BUCKET, "model.rvt").unwrap().is_none());
}

#[test]
fn final_answer_on_early_range_short_circuits() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![accepted(), finalized()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let outcome = uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(outcome.chunks_sent, 2);
}

#[test]
fn strict_mode_rejects_early_final_answer() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![accepted(), finalized()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.strict = true;

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::PrematureCompletion { index: 1, planned: 3 }));
    assert!(fx.state.load_descriptor(BUCKET, "model.rvt").unwrap().is_none());
}

#[test]
fn error_status_aborts_without_further_calls() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![accepted(), Some((403, "forbidden".into()))]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(err.to_string(), "Failed to upload partial file model.rvt: HTTP 403 - forbidden");
    assert_eq!(transport.calls(), 2);
    assert!(fx.state.load_descriptor(BUCKET, "model.rvt").unwrap().is_none());
}

#[test]
fn missing_file_is_reported_before_any_call() {
    let fx = Fixture::new(10);
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let err = uploader
        .resumable_upload(&fx.dir.path().join("absent.bin"), BUCKET, &UploadOptions::new(2), &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::FileNotFound(_)));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn zero_pieces_and_empty_files_are_invalid() {
    let fx = Fixture::new(10);
    let empty = fx.dir.path().join("empty.bin");
    std::fs::write(&empty, b"").unwrap();
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let zero = uploader.resumable_upload(&fx.file, BUCKET, &UploadOptions::new(0), &mut NoopObserver);
    let empty = uploader.resumable_upload(&empty, BUCKET, &UploadOptions::new(2), &mut NoopObserver);

    assert!(matches!(zero, Err(UploadError::InvalidArgument(_))));
    assert!(matches!(empty, Err(UploadError::InvalidArgument(_))));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn credential_failure_is_fatal() {
    let fx = Fixture::new(10);
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials {
        issued: Cell::new(0),
        fail: true,
    };
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(2), &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::CredentialError(_)));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn all_ranges_accepted_without_final_answer_is_protocol_error() {
    let fx = Fixture::new(10);
    let transport = ScriptedTransport::new(vec![accepted(), accepted()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(2), &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::ProtocolError(_)));
}

#[test]
fn token_is_refreshed_per_chunk_by_default() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![accepted(), accepted(), finalized()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    uploader
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap();

    let tokens: Vec<String> = transport.sent.borrow().iter().map(|s| s.token.clone()).collect();
    assert_eq!(tokens, vec!["token-1", "token-2", "token-3"]);
}

#[test]
fn on_unauthorized_policy_reuses_one_token() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![accepted(), accepted(), finalized()]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.token_policy = TokenPolicy::OnUnauthorized;

    uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap();

    assert_eq!(credentials.issued.get(), 1);
}

#[test]
fn transient_failures_are_retried_when_allowed() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![
        accepted(),
        None,
        Some((503, "busy".into())),
        accepted(),
        finalized(),
    ]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    let outcome = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap();

    assert_eq!(outcome.chunks_sent, 5);
    let sent = transport.sent.borrow();
    assert_eq!(sent[1].content_range, sent[3].content_range);
}

#[test]
fn client_errors_are_not_retried() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![Some((400, "bad range".into()))]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.retry = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(transport.calls(), 1);
}

#[test]
fn cancelled_upload_stops_before_next_range() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let options = UploadOptions::new(3);
    options.cancel.cancel();

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled(0)));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn exhausted_timeout_stops_before_next_range() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.timeout = Some(Duration::ZERO);

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::TimedOut(0)));
}

#[test]
fn interrupted_upload_resumes_with_same_session() {
    let fx = Fixture::new(900);
    let credentials = CountingCredentials::new();

    let first = ScriptedTransport::new(vec![accepted(), Some((500, "down".into()))]);
    Uploader::new(&first, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap_err();
    let checkpoint = fx.state.load_checkpoint(BUCKET, "model.rvt").unwrap().unwrap();
    assert_eq!(checkpoint.session.next_range_index, 1);
    assert!(checkpoint.matches(
        &UploadTarget {
            bucket_key: BUCKET.into(),
            object_key: "model.rvt".into(),
            total_size: 900,
        },
        3
    ));

    let second = ScriptedTransport::new(vec![accepted(), finalized()]);
    let mut options = UploadOptions::new(3);
    options.resume = true;
    let outcome = Uploader::new(&second, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap();

    let sent = second.sent.borrow();
    assert_eq!(sent[0].content_range, "bytes 300-599/900");
    assert_eq!(outcome.session_id, checkpoint.session.session_id);
    assert!(sent.iter().all(|s| s.session_id == checkpoint.session.session_id));
    assert!(fx.state.load_checkpoint(BUCKET, "model.rvt").unwrap().is_none());
}

#[test]
fn checkpoint_is_ignored_without_resume() {
    let fx = Fixture::new(900);
    let credentials = CountingCredentials::new();

    let first = ScriptedTransport::new(vec![accepted(), Some((500, "down".into()))]);
    Uploader::new(&first, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap_err();

    let second = ScriptedTransport::new(vec![accepted(), accepted(), finalized()]);
    Uploader::new(&second, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap();

    assert_eq!(second.sent.borrow()[0].content_range, "bytes 0-299/900");
}

#[test]
fn invalid_bucket_is_rejected() {
    let fx = Fixture::new(10);
    let transport = ScriptedTransport::new(vec![]);
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);

    let err = uploader
        .resumable_upload(&fx.file, "Bad Bucket", &UploadOptions::new(2), &mut NoopObserver)
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidArgument(_)));
}

#[test]
fn retries_stop_once_the_timeout_is_spent() {
    let fx = Fixture::new(900);
    let transport = ScriptedTransport::new((0..6).map(|_| Some((503, "busy".to_string()))).collect());
    let credentials = CountingCredentials::new();
    let uploader = Uploader::new(&transport, &credentials, &fx.state);
    let mut options = UploadOptions::new(3);
    options.timeout = Some(Duration::from_millis(200));
    options.retry = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(300),
        max_delay: Duration::from_millis(300),
    };

    let err = uploader
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(transport.calls(), 2);
}

#[test]
fn rewritten_source_is_not_resumed() {
    let fx = Fixture::new(0);
    std::fs::write(&fx.file, vec![b'A'; 900]).unwrap();
    let credentials = CountingCredentials::new();

    let first = ScriptedTransport::new(vec![accepted(), Some((500, "down".into()))]);
    Uploader::new(&first, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &UploadOptions::new(3), &mut NoopObserver)
        .unwrap_err();
    let checkpoint = fx.state.load_checkpoint(BUCKET, "model.rvt").unwrap().unwrap();

    std::fs::write(&fx.file, vec![b'B'; 900]).unwrap();

    let second = ScriptedTransport::new(vec![accepted(), accepted(), finalized()]);
    let mut options = UploadOptions::new(3);
    options.resume = true;
    let outcome = Uploader::new(&second, &credentials, &fx.state)
        .resumable_upload(&fx.file, BUCKET, &options, &mut NoopObserver)
        .unwrap();

    let sent = second.sent.borrow();
    assert_eq!(sent[0].content_range, "bytes 0-299/900");
    assert_ne!(outcome.session_id, checkpoint.session.session_id);
    let uploaded: Vec<u8> = sent.iter().flat_map(|s| s.body.clone()).collect();
    assert_eq!(uploaded, vec![b'B'; 900]);
}
