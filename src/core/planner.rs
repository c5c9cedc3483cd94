//! Capacity planning
//!
//! Walks the geometry from a start block and yields the data blocks a string
//! may occupy, skipping the manufacturer block and every sector trailer.
//! The walk is lazy: take a prefix for a write plan, or count it for a
//! capacity figure.

use crate::core::geometry::{raw_role, MediaFamily, MediaProfile, Role, BLOCK_SIZE};
use crate::core::header::HeaderFormat;
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// Lazy sequence of usable block indices
///
/// A clone continues from the clone point. Call [`usable_blocks_from`]
/// again to walk from the start block.
#[derive(Debug, Clone)]
pub struct UsableBlocks {
    next: u32,
    end: u32,
}

impl Iterator for UsableBlocks {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next < self.end {
            let index = self.next;
            self.next += 1;
            if raw_role(index) == Role::Data {
                return Some(index);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end.saturating_sub(self.next) as usize))
    }
}

impl FusedIterator for UsableBlocks {}

/// Every data block at or after `start_block`, in ascending order
///
/// A start on a trailer or the manufacturer block begins at the next data
/// block. A start past the end of the medium yields nothing.
pub fn usable_blocks_from(start_block: u32, profile: &MediaProfile) -> UsableBlocks {
    UsableBlocks {
        next: start_block.min(profile.total_blocks),
        end: profile.total_blocks,
    }
}

pub fn usable_block_count(start_block: u32, profile: &MediaProfile) -> usize {
    usable_blocks_from(start_block, profile).count()
}

/// Payload bytes a string starting at `start_block` can hold
pub fn available_bytes_from(
    start_block: u32,
    profile: &MediaProfile,
    format: HeaderFormat,
) -> usize {
    (usable_block_count(start_block, profile) * BLOCK_SIZE).saturating_sub(format.header_size())
}

/// Number of blocks a serialized string of `payload_len` bytes occupies
pub fn blocks_needed(payload_len: usize, format: HeaderFormat) -> usize {
    (format.header_size() + payload_len).div_ceil(BLOCK_SIZE)
}

/// Free space summary for a start block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub family: MediaFamily,
    pub total_blocks: u32,
    pub start_block: u32,
    pub usable_block_count: usize,
    /// Payload bytes after the current header
    pub usable_bytes: usize,
    /// Conservative character estimate (about 1.25 bytes per character)
    pub estimated_max_chars: usize,
}

pub fn space_report(start_block: u32, profile: &MediaProfile) -> SpaceReport {
    let usable_block_count = usable_block_count(start_block, profile);
    let usable_bytes =
        (usable_block_count * BLOCK_SIZE).saturating_sub(HeaderFormat::Current.header_size());

    SpaceReport {
        family: profile.family,
        total_blocks: profile.total_blocks,
        start_block,
        usable_block_count,
        usable_bytes,
        estimated_max_chars: usable_bytes * 4 / 5,
    }
}
