// Range planner: splits a file of `total_size` bytes into the ordered,
// contiguous byte ranges sent one per chunk request.

use crate::error::{Result, UploadError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One inclusive byte range of the source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub length: u64,
}

impl ByteRange {
    fn new(index: usize, start: u64, end: u64) -> Self {
        ByteRange {
            index,
            start,
            end,
            length: end - start + 1,
        }
    }

    /// Value of the `Content-Range` header for this range.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Ordered ranges covering `[0, total_size - 1]` with no gap and no overlap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytePlan {
    pub total_size: u64,
    pub ranges: Vec<ByteRange>,
}

impl BytePlan {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ByteRange> {
        self.ranges.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ByteRange> {
        self.ranges.get(index)
    }
}

/// Upper bound on the requested piece count.
pub const MAX_PIECES: u32 = 10_000;

/// Split `total_size` bytes into `requested_pieces` ranges of
/// `total_size / requested_pieces` bytes. A non-zero remainder is never
/// folded into an existing range: it is appended as one extra, shorter
/// (or, when pieces are tiny, longer) range that ends at the last byte.
///
/// More pieces than bytes degrades to one byte per piece. An empty file
/// yields an empty plan.
pub fn plan(total_size: u64, requested_pieces: u32) -> Result<BytePlan> {
    if requested_pieces == 0 {
        return Err(UploadError::InvalidArgument(
            "piece count must be at least 1".into(),
        ));
    }
    if requested_pieces > MAX_PIECES {
        return Err(UploadError::InvalidArgument(format!(
            "piece count {} exceeds the maximum of {}",
            requested_pieces, MAX_PIECES
        )));
    }
    if total_size == 0 {
        return Ok(BytePlan {
            total_size,
            ranges: Vec::new(),
        });
    }

    let pieces = u64::from(requested_pieces).min(total_size);
    let piece_size = total_size / pieces;
    let remainder = total_size % pieces;

    let mut ranges = Vec::new();
    for i in 0..pieces {
        let start = i * piece_size;
        let end = total_size.min((i + 1) * piece_size) - 1;
        ranges.push(ByteRange::new(i as usize, start, end));
    }
    if remainder > 0 {
        ranges.push(ByteRange::new(pieces as usize, pieces * piece_size, total_size - 1));
    }

    Ok(BytePlan { total_size, ranges })
}
