//! Physical medium access
//!
//! The session talks to hardware only through [`Transport`]. Two
//! implementations ship with the crate: [`MemoryCard`], an in-memory medium
//! with fault injection, and [`DumpFileCard`], a memory-mapped `.mfd` dump.
//! Reader drivers live outside this crate and implement the same trait.

pub mod dump_file;
pub mod memory;

pub use dump_file::DumpFileCard;
pub use memory::{Fault, MemoryCard};

use crate::core::error::Result;
use crate::core::geometry::{Block, MediaFamily, MediaProfile, BLOCK_SIZE};
use std::time::Duration;

/// Capability set the session needs from a reader
///
/// Every call may block up to the transport's own I/O timeout. Errors follow
/// the crate taxonomy: `Probe` when no medium answers a detection request,
/// `Auth` for key failures, `WriteProtected` for refused writes, `Timeout`
/// for expired I/O, `Transport` for everything else on the link. A medium
/// that leaves the field after detection is a `Transport` failure.
pub trait Transport {
    /// Wait up to `timeout` for a medium in the field
    fn probe_presence(&mut self, timeout: Duration) -> Result<bool>;

    fn detect_profile(&mut self) -> Result<MediaProfile>;

    fn uid(&mut self) -> Result<Vec<u8>>;

    fn read_block(&mut self, index: u32) -> Result<Block>;

    fn write_block(&mut self, index: u32, data: &Block) -> Result<()>;

    /// Re-initialize the link after a failure
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn probe_presence(&mut self, timeout: Duration) -> Result<bool> {
        (**self).probe_presence(timeout)
    }

    fn detect_profile(&mut self) -> Result<MediaProfile> {
        (**self).detect_profile()
    }

    fn uid(&mut self) -> Result<Vec<u8>> {
        (**self).uid()
    }

    fn read_block(&mut self, index: u32) -> Result<Block> {
        (**self).read_block(index)
    }

    fn write_block(&mut self, index: u32, data: &Block) -> Result<()> {
        (**self).write_block(index, data)
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

/// Access bits and GPB of a factory-fresh trailer
pub const DEFAULT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// Trailer contents with the given key A, default access bits and key B = FF
pub fn default_trailer(key_a: &[u8; 6]) -> Block {
    let mut block = [0xFFu8; BLOCK_SIZE];
    block[..6].copy_from_slice(key_a);
    block[6..10].copy_from_slice(&DEFAULT_ACCESS_BITS);
    block
}

/// Manufacturer block for a 4-byte UID: UID, BCC, SAK, ATQA, then zeros
pub fn manufacturer_block(uid: &[u8], sak: u8) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    let len = uid.len().min(7);
    block[..len].copy_from_slice(&uid[..len]);
    if len == 4 {
        block[4] = uid.iter().take(4).fold(0, |acc, b| acc ^ b);
        block[5] = sak;
        block[6] = 0x04;
    }
    block
}

/// SAK byte reported by media of the given profile
pub fn sak_for(profile: &MediaProfile) -> u8 {
    match profile.family {
        MediaFamily::ClassicMini => 0x09,
        MediaFamily::Classic4K => 0x18,
        MediaFamily::Classic1K | MediaFamily::Unknown => 0x08,
    }
}
