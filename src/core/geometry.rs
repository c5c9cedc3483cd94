//! Block addressing for MIFARE Classic style media
//!
//! Maps a linear block index to its sector and role. The layout is
//! non-uniform: the first 32 sectors hold 4 blocks each, every sector after
//! that holds 16 blocks (the 4K family). The last block of each sector is
//! its trailer (keys and access bits) and block 0 carries manufacturer data.
//!
//! ```text
//! 1K:  sectors 0..15  × 4 blocks                     =  64 blocks
//! 4K:  sectors 0..31  × 4 blocks + sectors 32..39 × 16 = 256 blocks
//! ```

use crate::core::error::{CardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Contents of a single block
pub type Block = [u8; BLOCK_SIZE];

/// Blocks per sector in the small-sector region
pub const SMALL_SECTOR_BLOCKS: u32 = 4;

/// Blocks per sector past the small-sector region
pub const LARGE_SECTOR_BLOCKS: u32 = 16;

/// Number of small sectors before the layout switches to large sectors
pub const SMALL_SECTOR_COUNT: u32 = 32;

const SMALL_REGION_BLOCKS: u32 = SMALL_SECTOR_COUNT * SMALL_SECTOR_BLOCKS;

/// Role of a block, derived from its index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Block 0: UID and manufacturer data, never writable
    Manufacturer,
    /// Ordinary payload block
    Data,
    /// Last block of a sector: keys and access conditions
    Trailer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Manufacturer => write!(f, "UID/Manufacturer"),
            Role::Data => write!(f, "Data"),
            Role::Trailer => write!(f, "Trailer/Keys"),
        }
    }
}

/// Media capacity family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFamily {
    ClassicMini,
    Classic1K,
    Classic4K,
    Unknown,
}

impl MediaFamily {
    /// Block count for the known families
    pub fn total_blocks(self) -> Option<u32> {
        match self {
            MediaFamily::ClassicMini => Some(20),
            MediaFamily::Classic1K => Some(64),
            MediaFamily::Classic4K => Some(256),
            MediaFamily::Unknown => None,
        }
    }

    /// Human-readable family name
    pub fn name(self) -> &'static str {
        match self {
            MediaFamily::ClassicMini => "MIFARE Mini",
            MediaFamily::Classic1K => "MIFARE Classic 1K",
            MediaFamily::Classic4K => "MIFARE Classic 4K",
            MediaFamily::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MediaFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detected medium: capacity family plus block count
///
/// Derived once per medium and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaProfile {
    pub family: MediaFamily,
    pub total_blocks: u32,
}

impl MediaProfile {
    pub const MINI: MediaProfile = MediaProfile {
        family: MediaFamily::ClassicMini,
        total_blocks: 20,
    };

    pub const CLASSIC_1K: MediaProfile = MediaProfile {
        family: MediaFamily::Classic1K,
        total_blocks: 64,
    };

    pub const CLASSIC_4K: MediaProfile = MediaProfile {
        family: MediaFamily::Classic4K,
        total_blocks: 256,
    };

    /// Profile for a medium of unrecognized type
    ///
    /// The block count must end on a sector boundary.
    pub fn unknown(total_blocks: u32) -> Result<Self> {
        let aligned = if total_blocks <= SMALL_REGION_BLOCKS {
            total_blocks % SMALL_SECTOR_BLOCKS == 0
        } else {
            (total_blocks - SMALL_REGION_BLOCKS) % LARGE_SECTOR_BLOCKS == 0
        };

        if total_blocks == 0 || !aligned {
            return Err(CardError::Probe(format!(
                "{} blocks does not end on a sector boundary",
                total_blocks
            )));
        }

        Ok(MediaProfile {
            family: MediaFamily::Unknown,
            total_blocks,
        })
    }

    /// Classify a medium from its SAK byte, falling back to UID length
    ///
    /// SAK is more reliable than UID length: 7-byte UIDs exist on 1K media,
    /// so the UID length is consulted only for an unrecognized SAK.
    pub fn from_sak(sak: u8, uid_len: usize) -> Self {
        match sak {
            0x08 => Self::CLASSIC_1K,
            0x18 => Self::CLASSIC_4K,
            0x09 => Self::MINI,
            _ => match uid_len {
                4 => Self::CLASSIC_1K,
                7 => Self::CLASSIC_4K,
                _ => MediaProfile {
                    family: MediaFamily::Unknown,
                    total_blocks: 64,
                },
            },
        }
    }

    /// Check that `index` addresses a block on this medium
    pub fn contains(&self, index: u32) -> bool {
        index < self.total_blocks
    }

    fn check(&self, index: u32) -> Result<()> {
        if self.contains(index) {
            Ok(())
        } else {
            Err(CardError::address(
                index,
                format!(
                    "out of range for {} ({} blocks)",
                    self.family, self.total_blocks
                ),
            ))
        }
    }

    /// Number of sectors on the medium
    pub fn sector_count(&self) -> u32 {
        if self.total_blocks <= SMALL_REGION_BLOCKS {
            self.total_blocks.div_ceil(SMALL_SECTOR_BLOCKS)
        } else {
            SMALL_SECTOR_COUNT
                + (self.total_blocks - SMALL_REGION_BLOCKS).div_ceil(LARGE_SECTOR_BLOCKS)
        }
    }

    /// Sector containing `index`
    pub fn sector_of(&self, index: u32) -> Result<u32> {
        self.check(index)?;
        Ok(raw_sector(index))
    }

    /// First block and block count of `sector`
    pub fn sector_bounds(&self, sector: u32) -> Result<(u32, u32)> {
        if sector >= self.sector_count() {
            return Err(CardError::address(
                sector_first_block(sector),
                format!("sector {} does not exist on {}", sector, self.family),
            ));
        }
        Ok((sector_first_block(sector), sector_len(sector)))
    }

    /// Role of `index`, or an address error when out of range
    pub fn role_of(&self, index: u32) -> Result<Role> {
        self.check(index)?;
        Ok(raw_role(index))
    }

    /// Check if `index` is a sector trailer
    pub fn is_trailer(&self, index: u32) -> Result<bool> {
        Ok(self.role_of(index)? == Role::Trailer)
    }

    /// First payload block of `sector` (block 1 for sector 0)
    pub fn first_data_block_of_sector(&self, sector: u32) -> Result<u32> {
        let (first, _) = self.sector_bounds(sector)?;
        Ok(if first == 0 { 1 } else { first })
    }
}

fn raw_sector(index: u32) -> u32 {
    if index < SMALL_REGION_BLOCKS {
        index / SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTOR_COUNT + (index - SMALL_REGION_BLOCKS) / LARGE_SECTOR_BLOCKS
    }
}

fn sector_first_block(sector: u32) -> u32 {
    if sector < SMALL_SECTOR_COUNT {
        sector * SMALL_SECTOR_BLOCKS
    } else {
        SMALL_REGION_BLOCKS + (sector - SMALL_SECTOR_COUNT) * LARGE_SECTOR_BLOCKS
    }
}

fn sector_len(sector: u32) -> u32 {
    if sector < SMALL_SECTOR_COUNT {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    }
}

/// Role of an in-range index. Callers check the range first.
pub(crate) fn raw_role(index: u32) -> Role {
    if index == 0 {
        return Role::Manufacturer;
    }
    let sector = raw_sector(index);
    if index == sector_first_block(sector) + sector_len(sector) - 1 {
        Role::Trailer
    } else {
        Role::Data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1k_trailers() {
        let p = MediaProfile::CLASSIC_1K;
        let trailers: Vec<u32> = (0..64).filter(|&i| p.is_trailer(i).unwrap()).collect();
        let expected: Vec<u32> = (0..16).map(|s| s * 4 + 3).collect();
        assert_eq!(trailers, expected);
    }

    #[test]
    fn test_4k_large_sectors() {
        let p = MediaProfile::CLASSIC_4K;
        assert_eq!(p.sector_count(), 40);
        assert_eq!(p.sector_of(127).unwrap(), 31);
        assert_eq!(p.sector_of(128).unwrap(), 32);
        assert_eq!(p.sector_of(143).unwrap(), 32);
        assert_eq!(p.sector_of(144).unwrap(), 33);
        assert_eq!(p.sector_of(255).unwrap(), 39);

        assert_eq!(p.role_of(127).unwrap(), Role::Trailer);
        assert_eq!(p.role_of(131).unwrap(), Role::Data);
        assert_eq!(p.role_of(143).unwrap(), Role::Trailer);
        assert_eq!(p.role_of(255).unwrap(), Role::Trailer);
    }

    #[test]
    fn test_manufacturer_block() {
        assert_eq!(
            MediaProfile::CLASSIC_1K.role_of(0).unwrap(),
            Role::Manufacturer
        );
        assert_eq!(MediaProfile::CLASSIC_1K.role_of(1).unwrap(), Role::Data);
    }

    #[test]
    fn test_out_of_range() {
        let p = MediaProfile::CLASSIC_1K;
        assert!(matches!(p.role_of(64), Err(CardError::Address { block: 64, .. })));
        assert!(p.sector_of(1000).is_err());
        assert!(p.sector_bounds(16).is_err());
    }

    #[test]
    fn test_from_sak() {
        assert_eq!(MediaProfile::from_sak(0x08, 7), MediaProfile::CLASSIC_1K);
        assert_eq!(MediaProfile::from_sak(0x18, 4), MediaProfile::CLASSIC_4K);
        assert_eq!(MediaProfile::from_sak(0x09, 4), MediaProfile::MINI);
        assert_eq!(MediaProfile::from_sak(0x88, 4), MediaProfile::CLASSIC_1K);
        assert_eq!(MediaProfile::from_sak(0x88, 7), MediaProfile::CLASSIC_4K);
        assert_eq!(
            MediaProfile::from_sak(0x20, 10).family,
            MediaFamily::Unknown
        );
    }

    #[test]
    fn test_unknown_alignment() {
        assert!(MediaProfile::unknown(64).is_ok());
        assert!(MediaProfile::unknown(144).is_ok());
        assert!(MediaProfile::unknown(130).is_err());
        assert!(MediaProfile::unknown(62).is_err());
        assert!(MediaProfile::unknown(0).is_err());
    }

    #[test]
    fn test_first_data_block_of_sector() {
        let p = MediaProfile::CLASSIC_4K;
        assert_eq!(p.first_data_block_of_sector(0).unwrap(), 1);
        assert_eq!(p.first_data_block_of_sector(2).unwrap(), 8);
        assert_eq!(p.first_data_block_of_sector(33).unwrap(), 144);
    }

    #[test]
    fn test_mini_layout() {
        let p = MediaProfile::MINI;
        assert_eq!(p.sector_count(), 5);
        assert_eq!(p.role_of(19).unwrap(), Role::Trailer);
        assert!(p.role_of(20).is_err());
    }
}
