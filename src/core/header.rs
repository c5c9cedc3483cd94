//! Length-prefix headers for stored strings
//!
//! Two on-medium layouts exist and no tag distinguishes them:
//!
//! ```text
//! Legacy:  [len: u16 BE][payload ...][zero padding]
//! Current: [len: u32 BE][payload ...][zero padding]
//! ```
//!
//! New writes always use [`HeaderFormat::Current`]. Reads go through
//! [`detect_format`], which picks the width from plausibility against the
//! capacity left on the medium.
//!
//! # Decision table
//!
//! `L32` is the first four bytes as u32 BE, `L16` the first two as u16 BE,
//! `cap` the bytes spanned by every usable block from the start block.
//!
//! | L32  | 4 + L32 <= cap | L16 > 0 and 2 + L16 <= cap | result                        |
//! |------|----------------|----------------------------|-------------------------------|
//! | 0    | -              | -                          | Current, empty string         |
//! | > 0  | yes            | no                         | Current                       |
//! | > 0  | no             | yes                        | Legacy                        |
//! | > 0  | yes            | yes                        | Current, Legacy as fallback   |
//! | > 0  | no             | no                         | corrupt header                |
//!
//! A non-empty legacy header always gives `L32 >= 65536`, which is larger
//! than any Classic medium, so the ambiguous row only arises on oversized
//! media of unknown type. The codec settles it from the payloads:
//!
//! | current payload              | legacy payload | result  |
//! |------------------------------|----------------|---------|
//! | valid UTF-8, no NUL bytes    | -              | Current |
//! | invalid UTF-8 or has NUL     | valid UTF-8    | Legacy  |
//! | invalid UTF-8 or has NUL     | invalid UTF-8  | Current |
//!
//! Zero padding after a short legacy string is valid UTF-8, so a current
//! reading that runs over it is recognized by its NUL bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderFormat {
    /// 2-byte big-endian length
    Legacy,
    /// 4-byte big-endian length
    Current,
}

impl HeaderFormat {
    pub const fn header_size(self) -> usize {
        match self {
            HeaderFormat::Legacy => 2,
            HeaderFormat::Current => 4,
        }
    }

    /// Largest payload the length field can express
    pub const fn max_length(self) -> usize {
        match self {
            HeaderFormat::Legacy => u16::MAX as usize,
            HeaderFormat::Current => u32::MAX as usize,
        }
    }
}

impl fmt::Display for HeaderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderFormat::Legacy => write!(f, "legacy (2-byte header)"),
            HeaderFormat::Current => write!(f, "current (4-byte header)"),
        }
    }
}

/// Decoded length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringHeader {
    pub format: HeaderFormat,
    /// Payload length in bytes
    pub length: usize,
}

impl StringHeader {
    pub fn new(format: HeaderFormat, length: usize) -> Self {
        StringHeader { format, length }
    }

    pub fn size(&self) -> usize {
        self.format.header_size()
    }

    /// Header plus payload, in bytes
    pub fn total_size(&self) -> usize {
        self.size() + self.length
    }

    /// Serialize the length prefix
    ///
    /// Returns `None` if the length does not fit the format's field.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self.format {
            HeaderFormat::Legacy => u16::try_from(self.length)
                .ok()
                .map(|len| len.to_be_bytes().to_vec()),
            HeaderFormat::Current => u32::try_from(self.length)
                .ok()
                .map(|len| len.to_be_bytes().to_vec()),
        }
    }

    /// Parse a prefix of the given format from the start of `bytes`
    pub fn from_bytes(format: HeaderFormat, bytes: &[u8]) -> Option<Self> {
        let length = match format {
            HeaderFormat::Legacy => {
                let raw: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
                u16::from_be_bytes(raw) as usize
            }
            HeaderFormat::Current => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                u32::from_be_bytes(raw) as usize
            }
        };
        Some(StringHeader { format, length })
    }
}

/// Outcome of header detection: the reading to try first, and an optional
/// second reading when both widths are plausible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub primary: StringHeader,
    pub fallback: Option<StringHeader>,
}

/// Pick the header width for the bytes at the start of a stored string
///
/// `capacity` is the number of bytes spanned by every usable block from the
/// start block (header included). Returns `None` when neither width yields
/// a length that fits. See the module docs for the full table.
pub fn detect_format(prefix: &[u8], capacity: usize) -> Option<Detection> {
    let current = StringHeader::from_bytes(HeaderFormat::Current, prefix)?;
    let legacy = StringHeader::from_bytes(HeaderFormat::Legacy, prefix)?;

    if current.length == 0 {
        return Some(Detection {
            primary: current,
            fallback: None,
        });
    }

    let current_fits = current.total_size() <= capacity;
    let legacy_fits = legacy.length > 0 && legacy.total_size() <= capacity;

    match (current_fits, legacy_fits) {
        (true, false) => Some(Detection {
            primary: current,
            fallback: None,
        }),
        (false, true) => Some(Detection {
            primary: legacy,
            fallback: None,
        }),
        (true, true) => Some(Detection {
            primary: current,
            fallback: Some(legacy),
        }),
        (false, false) => None,
    }
}
