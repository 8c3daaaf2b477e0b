// Upload session identity and the checkpoint written between chunks.

use crate::chunk::read_range;
use crate::error::Result;
use crate::plan::{BytePlan, ByteRange};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek};
use std::time::SystemTime;

const SESSION_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const DEFAULT_SESSION_ID_LEN: usize = 12;

/// Random `[A-Z0-9]` identifier correlating every chunk of one upload on
/// the server. Not a secret.
pub fn new_session_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| SESSION_CHARSET[rng.gen_range(0..SESSION_CHARSET.len())] as char)
        .collect()
}

/// Destination of one resumable upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub bucket_key: String,
    pub object_key: String,
    pub total_size: u64,
}

/// In-memory state of one orchestrator run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub target: UploadTarget,
    pub plan: BytePlan,
    pub next_range_index: usize,
}

impl UploadSession {
    pub fn new(target: UploadTarget, plan: BytePlan) -> Self {
        UploadSession {
            session_id: new_session_id(DEFAULT_SESSION_ID_LEN),
            target,
            plan,
            next_range_index: 0,
        }
    }

    pub fn next_range(&self) -> Option<&ByteRange> {
        self.plan.get(self.next_range_index)
    }

    pub fn is_last(&self, range: &ByteRange) -> bool {
        range.index + 1 == self.plan.len()
    }

    pub fn advance(&mut self) {
        self.next_range_index += 1;
    }

    /// `accepted_digests` holds one `range_digest` per accepted range, in order.
    pub fn checkpoint(
        &self,
        requested_pieces: u32,
        source_modified: Option<SystemTime>,
        accepted_digests: Vec<String>,
    ) -> SessionCheckpoint {
        SessionCheckpoint {
            requested_pieces,
            source_modified,
            accepted_digests,
            session: self.clone(),
        }
    }
}

/// Hex SHA-256 of one range's bytes.
pub fn range_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// What gets persisted after each accepted chunk so an interrupted run can
/// pick up at `session.next_range_index` with the same session id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub requested_pieces: u32,
    pub source_modified: Option<SystemTime>,
    pub accepted_digests: Vec<String>,
    pub session: UploadSession,
}

impl SessionCheckpoint {
    /// A checkpoint is only reusable for the same file size and split;
    /// anything else would send ranges the server never saw planned.
    pub fn matches(&self, target: &UploadTarget, requested_pieces: u32) -> bool {
        self.requested_pieces == requested_pieces
            && self.session.target == *target
            && self.session.next_range_index < self.session.plan.len()
    }

    /// True when the source still holds the bytes the server already
    /// accepted: same modification time, and every accepted range hashes to
    /// its recorded digest.
    pub fn source_unchanged<R: Read + Seek>(&self, source: &mut R, modified: Option<SystemTime>) -> Result<bool> {
        if self.source_modified != modified {
            return Ok(false);
        }
        let accepted = &self.session.plan.ranges[..self.session.next_range_index.min(self.session.plan.len())];
        if accepted.len() != self.accepted_digests.len() {
            return Ok(false);
        }
        for (range, digest) in accepted.iter().zip(&self.accepted_digests) {
            if range_digest(&read_range(source, range)?) != *digest {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
