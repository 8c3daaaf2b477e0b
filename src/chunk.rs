// Chunk transfer: read one byte range from the source, send it under the
// upload session, and classify what the server made of it.

use crate::error::{Result, UploadError};
use crate::plan::ByteRange;
use crate::session::UploadTarget;
use crate::upload::ObjectDescriptor;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// Status the storage service answers with while it still expects ranges.
pub const PARTIAL_STATUS: u16 = 202;
const UNAUTHORIZED: u16 = 401;

/// Source of bearer tokens for chunk requests.
pub trait CredentialProvider {
    fn access_token(&self) -> Result<String>;
}

/// One chunk as it goes on the wire.
#[derive(Debug)]
pub struct ChunkRequest<'a> {
    pub target: &'a UploadTarget,
    pub session_id: &'a str,
    pub range: &'a ByteRange,
    pub body: &'a [u8],
}

impl ChunkRequest<'_> {
    pub fn content_range(&self) -> String {
        self.range.content_range(self.target.total_size)
    }
}

/// Raw answer to a chunk request. Transports only fail with
/// `TransportError { status: None, .. }` when no answer came back at all;
/// status interpretation is left to `ChunkClient`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkResponse {
    pub status: u16,
    pub body: String,
}

pub trait ChunkTransport {
    fn send_chunk(&self, request: &ChunkRequest<'_>, token: &str) -> Result<ChunkResponse>;
}

#[derive(Debug)]
pub enum ChunkResult {
    /// More ranges expected.
    Accepted,
    /// The server assembled the object.
    Completed(ObjectDescriptor),
    Failed(UploadError),
}

/// When a new bearer token is fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenPolicy {
    /// Fresh token before every chunk.
    #[default]
    EveryChunk,
    /// Keep one token; on a 401 fetch a new one and resend the chunk once.
    OnUnauthorized,
}

pub struct ChunkClient<'a, T, C> {
    transport: &'a T,
    credentials: &'a C,
    policy: TokenPolicy,
    cached_token: Option<String>,
    context: String,
}

impl<'a, T: ChunkTransport, C: CredentialProvider> ChunkClient<'a, T, C> {
    pub fn new(transport: &'a T, credentials: &'a C, policy: TokenPolicy) -> Self {
        ChunkClient {
            transport,
            credentials,
            policy,
            cached_token: None,
            context: "Failed to upload partial file".into(),
        }
    }

    /// Message prefixed to transport failures.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn upload_chunk<R: Read + Seek>(
        &mut self,
        target: &UploadTarget,
        session_id: &str,
        range: &ByteRange,
        source: &mut R,
    ) -> ChunkResult {
        match self.try_upload_chunk(target, session_id, range, source) {
            Ok(result) => result,
            Err(e) => ChunkResult::Failed(e),
        }
    }

    fn try_upload_chunk<R: Read + Seek>(
        &mut self,
        target: &UploadTarget,
        session_id: &str,
        range: &ByteRange,
        source: &mut R,
    ) -> Result<ChunkResult> {
        let body = read_range(source, range)?;
        let request = ChunkRequest {
            target,
            session_id,
            range,
            body: &body,
        };

        let token = self.token(false)?;
        let mut response = self.transport.send_chunk(&request, &token)?;
        if response.status == UNAUTHORIZED && self.policy == TokenPolicy::OnUnauthorized {
            warn!(range = %range, "token rejected, refreshing and resending chunk");
            let token = self.token(true)?;
            response = self.transport.send_chunk(&request, &token)?;
        }
        debug!(range = %range, status = response.status, "chunk answered");

        self.classify(response)
    }

    fn token(&mut self, force_refresh: bool) -> Result<String> {
        if self.policy == TokenPolicy::EveryChunk {
            return self.credentials.access_token();
        }
        match &self.cached_token {
            Some(token) if !force_refresh => Ok(token.clone()),
            _ => {
                let token = self.credentials.access_token()?;
                self.cached_token = Some(token.clone());
                Ok(token)
            }
        }
    }

    fn classify(&self, response: ChunkResponse) -> Result<ChunkResult> {
        match response.status {
            PARTIAL_STATUS => Ok(ChunkResult::Accepted),
            200..=299 => {
                let descriptor: ObjectDescriptor = serde_json::from_str(&response.body).map_err(|e| {
                    UploadError::ProtocolError(format!("object descriptor in final chunk response: {}", e))
                })?;
                Ok(ChunkResult::Completed(descriptor))
            }
            status => Err(UploadError::transport(Some(status), response.body, self.context.clone())),
        }
    }
}

/// Exactly `range.length` bytes from `range.start`; a short file is an error.
pub fn read_range<R: Read + Seek>(source: &mut R, range: &ByteRange) -> Result<Vec<u8>> {
    let length = usize::try_from(range.length)
        .map_err(|_| UploadError::InvalidArgument(format!("range {} does not fit in memory", range)))?;
    let mut buffer = vec![0u8; length];
    source.seek(SeekFrom::Start(range.start))?;
    source.read_exact(&mut buffer)?;
    Ok(buffer)
}
