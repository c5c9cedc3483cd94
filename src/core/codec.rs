//! String codec
//!
//! Lays a length-prefixed UTF-8 string across the usable blocks of a medium
//! and reads it back. Encoding is a pure planning step: it returns the
//! `(block, bytes)` pairs to write and performs no I/O. Decoding pulls
//! blocks through a caller-supplied [`BlockReader`].
//!
//! ```text
//! start=4 on 1K, 40-byte payload:
//!   block 4: [00 00 00 28][payload 0..12]
//!   block 5: [payload 12..28]
//!   block 6: [payload 28..40][00 00 00 00]
//!   block 7: trailer, never touched
//! ```

use crate::core::error::{CardError, Result};
use crate::core::geometry::{Block, MediaProfile, Role, BLOCK_SIZE};
use crate::core::header::{detect_format, Detection, HeaderFormat, StringHeader};
use crate::core::planner::{
    available_bytes_from, blocks_needed, usable_block_count, usable_blocks_from, UsableBlocks,
};
use serde::{Deserialize, Serialize};

/// Payload bytes shown in a metadata preview unless configured otherwise
pub const DEFAULT_PREVIEW_BYTES: usize = 64;

/// Source of block contents for decoding
pub trait BlockReader {
    fn read_block(&mut self, index: u32) -> Result<Block>;
}

impl<F> BlockReader for F
where
    F: FnMut(u32) -> Result<Block>,
{
    fn read_block(&mut self, index: u32) -> Result<Block> {
        self(index)
    }
}

/// Ordered block writes for one stored string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub start_block: u32,
    pub header: StringHeader,
    pub blocks: Vec<(u32, Block)>,
}

impl WritePlan {
    pub fn block_indices(&self) -> Vec<u32> {
        self.blocks.iter().map(|(index, _)| *index).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Header facts and a short preview of a stored string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringInfo {
    pub start_block: u32,
    /// Payload length in bytes
    pub length: usize,
    pub format: HeaderFormat,
    pub preview: String,
    /// True when the preview does not cover the whole payload
    pub preview_truncated: bool,
    /// Every block the string occupies, in order
    pub blocks: Vec<u32>,
    pub end_block: u32,
}

/// Reject a start block that is out of range or not a data block
pub fn check_start(start_block: u32, profile: &MediaProfile) -> Result<()> {
    match profile.role_of(start_block)? {
        Role::Data => Ok(()),
        Role::Manufacturer => Err(CardError::address(
            start_block,
            "manufacturer block cannot hold a string",
        )),
        Role::Trailer => Err(CardError::address(
            start_block,
            "sector trailer cannot hold a string",
        )),
    }
}

/// Plan a write of `text` in the current header format
pub fn encode(text: &str, start_block: u32, profile: &MediaProfile) -> Result<WritePlan> {
    encode_with_format(text, start_block, profile, HeaderFormat::Current)
}

/// Plan a write of `text` with an explicit header format
///
/// New writes should use [`encode`]; the legacy format is kept for tooling
/// that has to reproduce old media.
pub fn encode_with_format(
    text: &str,
    start_block: u32,
    profile: &MediaProfile,
    format: HeaderFormat,
) -> Result<WritePlan> {
    check_start(start_block, profile)?;

    let payload = text.as_bytes();
    let available = available_bytes_from(start_block, profile, format).min(format.max_length());
    if payload.len() > available {
        return Err(CardError::Capacity {
            requested: payload.len(),
            available,
            start_block,
        });
    }

    let header = StringHeader::new(format, payload.len());
    let header_bytes = header.to_bytes().ok_or(CardError::Capacity {
        requested: payload.len(),
        available,
        start_block,
    })?;

    let mut data = Vec::with_capacity(blocks_needed(payload.len(), format) * BLOCK_SIZE);
    data.extend_from_slice(&header_bytes);
    data.extend_from_slice(payload);
    data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);

    let blocks: Vec<(u32, Block)> = data
        .chunks_exact(BLOCK_SIZE)
        .zip(usable_blocks_from(start_block, profile))
        .map(|(chunk, index)| {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            (index, block)
        })
        .collect();

    Ok(WritePlan {
        start_block,
        header,
        blocks,
    })
}

/// Sequential reader over the usable blocks of one string
struct SpanReader<'a, R: BlockReader + ?Sized> {
    reader: &'a mut R,
    blocks: UsableBlocks,
    start_block: u32,
    buffer: Vec<u8>,
}

impl<'a, R: BlockReader + ?Sized> SpanReader<'a, R> {
    fn new(reader: &'a mut R, start_block: u32, profile: &MediaProfile) -> Self {
        SpanReader {
            reader,
            blocks: usable_blocks_from(start_block, profile),
            start_block,
            buffer: Vec::new(),
        }
    }

    /// Read blocks until at least `len` bytes are buffered
    fn fill_to(&mut self, len: usize) -> Result<()> {
        while self.buffer.len() < len {
            let index = self.blocks.next().ok_or_else(|| {
                CardError::decode(
                    self.start_block,
                    "declared length runs past the end of the medium",
                )
            })?;
            let block = self.reader.read_block(index)?;
            self.buffer.extend_from_slice(&block);
        }
        Ok(())
    }

    fn payload(&self, header: &StringHeader) -> &[u8] {
        &self.buffer[header.size()..header.total_size()]
    }
}

fn read_header<R: BlockReader + ?Sized>(
    span: &mut SpanReader<'_, R>,
    start_block: u32,
    profile: &MediaProfile,
) -> Result<Detection> {
    span.fill_to(HeaderFormat::Current.header_size())?;
    let capacity = usable_block_count(start_block, profile) * BLOCK_SIZE;

    detect_format(&span.buffer, capacity).ok_or_else(|| {
        let head: Vec<String> = span.buffer.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        CardError::decode(
            start_block,
            format!("no valid string header (first bytes: {})", head.join(" ")),
        )
    })
}

/// Settle an ambiguous header from the payloads it would frame
///
/// Reads both payloads in full, so only the ambiguous case costs more than
/// the header itself.
fn resolve_header<R: BlockReader + ?Sized>(
    span: &mut SpanReader<'_, R>,
    detection: Detection,
) -> Result<StringHeader> {
    let Some(fallback) = detection.fallback else {
        return Ok(detection.primary);
    };

    span.fill_to(detection.primary.total_size())?;
    if plausible_payload(span.payload(&detection.primary)) {
        return Ok(detection.primary);
    }

    span.fill_to(fallback.total_size())?;
    if std::str::from_utf8(span.payload(&fallback)).is_ok() {
        Ok(fallback)
    } else {
        Ok(detection.primary)
    }
}

/// A current-format payload that is valid UTF-8 and free of NUL bytes
fn plausible_payload(payload: &[u8]) -> bool {
    !payload.contains(&0) && std::str::from_utf8(payload).is_ok()
}

/// Read back a string stored at `start_block`
///
/// The header width is detected, never supplied by the caller.
pub fn decode<R: BlockReader + ?Sized>(
    reader: &mut R,
    start_block: u32,
    profile: &MediaProfile,
) -> Result<String> {
    check_start(start_block, profile)?;

    let mut span = SpanReader::new(reader, start_block, profile);
    let detection = read_header(&mut span, start_block, profile)?;
    let header = resolve_header(&mut span, detection)?;

    span.fill_to(header.total_size())?;
    String::from_utf8(span.payload(&header).to_vec()).map_err(|err| {
        CardError::decode(start_block, format!("payload is not valid UTF-8: {}", err))
    })
}

/// Header facts plus a preview of at most `preview_bytes` payload bytes
///
/// Reads only the blocks needed for the header and the preview, unless the
/// header width is ambiguous.
pub fn get_metadata<R: BlockReader + ?Sized>(
    reader: &mut R,
    start_block: u32,
    profile: &MediaProfile,
    preview_bytes: usize,
) -> Result<StringInfo> {
    check_start(start_block, profile)?;

    let mut span = SpanReader::new(reader, start_block, profile);
    let detection = read_header(&mut span, start_block, profile)?;
    let header = resolve_header(&mut span, detection)?;

    let shown = header.length.min(preview_bytes);
    span.fill_to(header.size() + shown)?;
    let raw = &span.buffer[header.size()..header.size() + shown];
    let preview = match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        // Cut at the last complete character
        Err(err) => String::from_utf8_lossy(&raw[..err.valid_up_to()]).into_owned(),
    };

    let blocks = string_span(&header, start_block, profile);
    let end_block = blocks.last().copied().unwrap_or(start_block);

    Ok(StringInfo {
        start_block,
        length: header.length,
        format: header.format,
        preview_truncated: preview.len() < header.length,
        preview,
        blocks,
        end_block,
    })
}

/// Blocks occupied by a string with the given header
pub fn string_span(header: &StringHeader, start_block: u32, profile: &MediaProfile) -> Vec<u32> {
    usable_blocks_from(start_block, profile)
        .take(blocks_needed(header.length, header.format))
        .collect()
}
