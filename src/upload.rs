// Resumable upload orchestration.
//
// A run goes `Planning -> Transferring(0) -> ... -> Finalized | Aborted`.
// Ranges are sent strictly in index order, one at a time, all under the
// same session id. The first non-2xx answer aborts the run; ranges the
// server already accepted are left for it to clean up. A final (non-202)
// answer on any range is taken as authoritative unless `strict` is set.

use crate::chunk::{self, ChunkClient, ChunkResult, ChunkTransport, CredentialProvider, TokenPolicy};
use crate::error::{Result, UploadError};
use crate::plan::{plan, ByteRange};
use crate::session::{range_digest, UploadSession, UploadTarget};
use crate::state::{check_bucket_key, StateDir};
use crate::urn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Object record the server returns once the last range is assembled.
/// Fields beyond `objectId` and `location` are kept as-is so the saved
/// descriptor mirrors the server's answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    pub object_id: String,
    pub location: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Shared flag checked between ranges. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded per-chunk retry with exponential backoff. Only failures that
/// `UploadError::is_retryable` accepts are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..Self::none()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Clone, Debug)]
pub struct UploadOptions {
    pub pieces: u32,
    /// Reject a final answer on any range but the last.
    pub strict: bool,
    pub retry: RetryPolicy,
    pub token_policy: TokenPolicy,
    pub cancel: CancelToken,
    /// Overall budget, checked between ranges.
    pub timeout: Option<Duration>,
    /// Continue from a matching checkpoint instead of starting over.
    pub resume: bool,
}

impl UploadOptions {
    pub fn new(pieces: u32) -> Self {
        UploadOptions {
            pieces,
            strict: false,
            retry: RetryPolicy::none(),
            token_policy: TokenPolicy::default(),
            cancel: CancelToken::new(),
            timeout: None,
            resume: false,
        }
    }
}

/// Progress hooks, all optional.
pub trait UploadObserver {
    fn on_start(&mut self, _session: &UploadSession, _resumed: bool) {}
    fn on_range(&mut self, _range: &ByteRange, _total_size: u64) {}
    fn on_accepted(&mut self, _range: &ByteRange) {}
    fn on_retry(&mut self, _range: &ByteRange, _attempt: u32, _error: &UploadError) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadOutcome {
    pub bucket_key: String,
    pub object_key: String,
    pub session_id: String,
    pub descriptor: ObjectDescriptor,
    pub urn: String,
    pub urn_safe: String,
    /// Chunk requests issued in this run, retries included.
    pub chunks_sent: usize,
}

impl UploadOutcome {
    fn new(session: &UploadSession, descriptor: ObjectDescriptor, chunks_sent: usize) -> Self {
        UploadOutcome {
            bucket_key: session.target.bucket_key.clone(),
            object_key: session.target.object_key.clone(),
            session_id: session.session_id.clone(),
            urn: urn::encode(&descriptor.object_id),
            urn_safe: urn::safe_encode(&descriptor.object_id),
            descriptor,
            chunks_sent,
        }
    }
}

/// Drives one file through the chunked protocol. Holds only borrowed
/// collaborators, so independent uploads never share mutable state.
pub struct Uploader<'a, T, C> {
    transport: &'a T,
    credentials: &'a C,
    state: &'a StateDir,
}

impl<'a, T: ChunkTransport, C: CredentialProvider> Uploader<'a, T, C> {
    pub fn new(transport: &'a T, credentials: &'a C, state: &'a StateDir) -> Self {
        Uploader {
            transport,
            credentials,
            state,
        }
    }

    /// Upload `file_path` to `bucket_key` under the file's own name.
    pub fn resumable_upload(
        &self,
        file_path: &Path,
        bucket_key: &str,
        options: &UploadOptions,
        observer: &mut dyn UploadObserver,
    ) -> Result<UploadOutcome> {
        check_bucket_key(bucket_key)?;
        let object_key = object_key_for(file_path)?;

        // Held for the whole run and dropped on every return path.
        let mut source = File::open(file_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => UploadError::FileNotFound(file_path.display().to_string()),
            _ => UploadError::Io(e),
        })?;
        let metadata = source.metadata()?;
        let total_size = metadata.len();
        let modified = metadata.modified().ok();

        let target = UploadTarget {
            bucket_key: bucket_key.to_string(),
            object_key,
            total_size,
        };
        let (mut session, resumed, mut accepted_digests) = self.open_session(target, options, &mut source, modified)?;

        info!(
            session_id = %session.session_id,
            object_key = %session.target.object_key,
            pieces = session.plan.len(),
            resumed,
            "starting resumable upload"
        );
        observer.on_start(&session, resumed);

        let mut client = ChunkClient::new(self.transport, self.credentials, options.token_policy)
            .with_context(format!("Failed to upload partial file {}", session.target.object_key));
        let started = Instant::now();
        let out_of_time = || options.timeout.map_or(false, |limit| started.elapsed() >= limit);
        let mut chunks_sent = 0;

        while let Some(range) = session.next_range().copied() {
            if options.cancel.is_cancelled() {
                warn!(range = range.index, "upload cancelled");
                return Err(UploadError::Cancelled(range.index));
            }
            if out_of_time() {
                warn!(range = range.index, "upload timed out");
                return Err(UploadError::TimedOut(range.index));
            }

            observer.on_range(&range, total_size);
            info!(range = %range.content_range(total_size), "loading");

            let mut attempt = 0;
            let result = loop {
                chunks_sent += 1;
                let result = client.upload_chunk(&session.target, &session.session_id, &range, &mut source);
                match result {
                    ChunkResult::Failed(e)
                        if e.is_retryable()
                            && attempt < options.retry.max_retries
                            && !options.cancel.is_cancelled()
                            && !out_of_time() =>
                    {
                        attempt += 1;
                        let delay = options.retry.delay(attempt);
                        warn!(range = %range, attempt, ?delay, error = %e, "retrying chunk");
                        observer.on_retry(&range, attempt, &e);
                        thread::sleep(delay);
                    }
                    other => break other,
                }
            };

            match result {
                ChunkResult::Accepted => {
                    info!(range = %range, "partial upload accepted");
                    session.advance();
                    let saved = chunk::read_range(&mut source, &range).and_then(|bytes| {
                        accepted_digests.push(range_digest(&bytes));
                        self.state
                            .save_checkpoint(&session.checkpoint(options.pieces, modified, accepted_digests.clone()))
                    });
                    if let Err(e) = saved {
                        warn!(error = %e, "could not save upload checkpoint");
                    }
                    observer.on_accepted(&range);
                }
                ChunkResult::Completed(descriptor) => {
                    if options.strict && !session.is_last(&range) {
                        return Err(UploadError::PrematureCompletion {
                            index: range.index,
                            planned: session.plan.len(),
                        });
                    }
                    if !session.is_last(&range) {
                        debug!(range = range.index, planned = session.plan.len(), "server finalized early");
                    }
                    return self.finalize(&session, descriptor, chunks_sent);
                }
                ChunkResult::Failed(e) => {
                    warn!(range = %range, error = %e, "chunk failed, aborting upload");
                    return Err(e);
                }
            }
        }

        // Every range accepted yet no final answer.
        Err(UploadError::ProtocolError(format!(
            "server did not finalize {} after the last range",
            session.target.object_key
        )))
    }

    /// Returns the session, whether it was resumed, and the digests of the
    /// ranges the server already holds.
    fn open_session(
        &self,
        target: UploadTarget,
        options: &UploadOptions,
        source: &mut File,
        modified: Option<SystemTime>,
    ) -> Result<(UploadSession, bool, Vec<String>)> {
        let plan = plan(target.total_size, options.pieces)?;
        if plan.is_empty() {
            return Err(UploadError::InvalidArgument(format!(
                "{} is empty, nothing to upload",
                target.object_key
            )));
        }

        if options.resume {
            if let Some(checkpoint) = self.state.load_checkpoint(&target.bucket_key, &target.object_key)? {
                if checkpoint.matches(&target, options.pieces) && checkpoint.source_unchanged(source, modified)? {
                    return Ok((checkpoint.session, true, checkpoint.accepted_digests));
                }
                warn!("saved upload checkpoint does not match this file, starting over");
            }
        }
        self.state.clear_checkpoint(&target.bucket_key, &target.object_key)?;
        Ok((UploadSession::new(target, plan), false, Vec::new()))
    }

    fn finalize(&self, session: &UploadSession, descriptor: ObjectDescriptor, chunks_sent: usize) -> Result<UploadOutcome> {
        let target = &session.target;
        self.state.save_descriptor(&target.bucket_key, &target.object_key, &descriptor)?;
        if let Err(e) = self.state.clear_checkpoint(&target.bucket_key, &target.object_key) {
            warn!(error = %e, "could not remove upload checkpoint");
        }
        info!(object_id = %descriptor.object_id, chunks_sent, "upload successful");
        Ok(UploadOutcome::new(session, descriptor, chunks_sent))
    }
}

fn object_key_for(file_path: &Path) -> Result<String> {
    file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::InvalidArgument(format!("{} is not a file name", file_path.display())))
}
