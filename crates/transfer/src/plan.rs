//! Deterministic chunk planning.
//!
//! The plan is a pure function of the file size and chunk size. Resumed
//! sessions recompute it to reconcile persisted completed-chunk indices,
//! so the same inputs must always yield the same plan.

use serde::{Deserialize, Serialize};

use crate::config::PartLimits;

/// One contiguous byte range of a file, transferred as a single HTTP
/// operation. Indices are 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub index: u32,
    pub offset: u64,
    pub length: u64,
}

impl ChunkDescriptor {
    /// Returns `true` for the distinguished empty-file chunk, which the
    /// engine routes to a direct whole-object PUT/GET rather than the
    /// multipart path.
    pub fn is_empty_file(&self) -> bool {
        self.length == 0
    }
}

/// Resolves the chunk size actually used for a file of `total_size`.
///
/// The requested size is clamped to the backend's part limits, then
/// grown if the resulting part count would exceed `max_parts`.
pub fn effective_chunk_size(total_size: u64, requested: u64, limits: &PartLimits) -> u64 {
    let clamped = requested.clamp(limits.min_part_size, limits.max_part_size);
    let needed_for_count = total_size.div_ceil(limits.max_parts as u64);
    clamped.max(needed_for_count).min(limits.max_part_size)
}

/// Computes the ordered chunk plan for a file.
///
/// Ranges are contiguous, non-overlapping, and sum to `total_size`.
/// A zero-byte file yields a single zero-length chunk.
pub fn plan(total_size: u64, chunk_size: u64, limits: &PartLimits) -> Vec<ChunkDescriptor> {
    if total_size == 0 {
        return vec![ChunkDescriptor {
            index: 1,
            offset: 0,
            length: 0,
        }];
    }

    let size = effective_chunk_size(total_size, chunk_size, limits);
    let count = total_size.div_ceil(size);
    let mut chunks = Vec::with_capacity(count as usize);
    let mut offset = 0;
    let mut index = 1;
    while offset < total_size {
        let length = size.min(total_size - offset);
        chunks.push(ChunkDescriptor {
            index,
            offset,
            length,
        });
        offset += length;
        index += 1;
    }
    chunks
}
