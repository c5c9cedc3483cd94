//! Memory-mapped card dump
//!
//! A `.mfd` dump is the raw block contents concatenated, 16 bytes per block,
//! as written by common reader tools. The profile follows from the file
//! size. Key A in each sector trailer must match the configured key, so a
//! dump taken with non-default keys behaves like the card it came from.

use super::{default_trailer, manufacturer_block, sak_for, Transport};
use crate::core::config::TransportConfig;
use crate::core::error::{CardError, Result};
use crate::core::geometry::{raw_role, Block, MediaProfile, Role, BLOCK_SIZE};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub struct DumpFileCard {
    mmap: MmapMut,
    path: PathBuf,
    profile: MediaProfile,
    key_a: [u8; 6],
}

impl DumpFileCard {
    /// Write a factory-fresh image for `profile` at `config.device`
    pub fn create(config: &TransportConfig, profile: MediaProfile, uid: &[u8]) -> Result<Self> {
        let path = PathBuf::from(&config.device);
        let size = profile.total_blocks as usize * BLOCK_SIZE;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size as u64)?;

        // SAFETY: the file is opened read-write and owned by this handle
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        for index in 0..profile.total_blocks {
            let block = match raw_role(index) {
                Role::Manufacturer => manufacturer_block(uid, sak_for(&profile)),
                Role::Trailer => default_trailer(&config.key_a),
                Role::Data => [0u8; BLOCK_SIZE],
            };
            let offset = index as usize * BLOCK_SIZE;
            mmap[offset..offset + BLOCK_SIZE].copy_from_slice(&block);
        }
        mmap.flush()?;

        info!(path = %path.display(), family = %profile.family, "Created dump image");

        Ok(DumpFileCard {
            mmap,
            path,
            profile,
            key_a: config.key_a,
        })
    }

    /// Map an existing dump at `config.device`
    pub fn open(config: &TransportConfig) -> Result<Self> {
        let path = PathBuf::from(&config.device);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;
        let profile = profile_for_size(len)?;

        // SAFETY: the file is opened read-write and owned by this handle
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        debug!(
            path = %path.display(),
            family = %profile.family,
            blocks = profile.total_blocks,
            "Opened dump image"
        );

        Ok(DumpFileCard {
            mmap,
            path,
            profile,
            key_a: config.key_a,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> MediaProfile {
        self.profile
    }

    /// Flush all pending changes to disk
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn block_at(&self, index: u32) -> Block {
        let offset = index as usize * BLOCK_SIZE;
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&self.mmap[offset..offset + BLOCK_SIZE]);
        block
    }

    /// Range check plus key A check against the sector trailer
    fn authenticate(&self, index: u32) -> Result<()> {
        if !self.profile.contains(index) {
            return Err(CardError::address(
                index,
                format!("dump holds {} blocks", self.profile.total_blocks),
            ));
        }

        let sector = self.profile.sector_of(index)?;
        let (first, len) = self.profile.sector_bounds(sector)?;
        let trailer = self.block_at(first + len - 1);
        if trailer[..6] != self.key_a {
            return Err(CardError::Auth {
                block: index,
                reason: format!("key A does not open sector {}", sector),
            });
        }
        Ok(())
    }
}

/// Profile implied by a dump's byte length
pub fn profile_for_size(len: usize) -> Result<MediaProfile> {
    if len % BLOCK_SIZE != 0 {
        return Err(CardError::Probe(format!(
            "dump size {} is not a multiple of {} bytes",
            len, BLOCK_SIZE
        )));
    }

    let blocks = (len / BLOCK_SIZE) as u32;
    [MediaProfile::MINI, MediaProfile::CLASSIC_1K, MediaProfile::CLASSIC_4K]
        .into_iter()
        .find(|profile| profile.total_blocks == blocks)
        .map_or_else(|| MediaProfile::unknown(blocks), Ok)
}

impl Transport for DumpFileCard {
    fn probe_presence(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn detect_profile(&mut self) -> Result<MediaProfile> {
        Ok(self.profile)
    }

    fn uid(&mut self) -> Result<Vec<u8>> {
        Ok(self.block_at(0)[..4].to_vec())
    }

    fn read_block(&mut self, index: u32) -> Result<Block> {
        self.authenticate(index)?;
        Ok(self.block_at(index))
    }

    fn write_block(&mut self, index: u32, data: &Block) -> Result<()> {
        self.authenticate(index)?;
        if index == 0 {
            return Err(CardError::WriteProtected { block: 0 });
        }

        let offset = index as usize * BLOCK_SIZE;
        self.mmap[offset..offset + BLOCK_SIZE].copy_from_slice(data);
        self.mmap.flush_range(offset, BLOCK_SIZE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> TransportConfig {
        TransportConfig::new(dir.path().join("card.mfd").to_string_lossy())
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        {
            let mut card =
                DumpFileCard::create(&config, MediaProfile::CLASSIC_1K, &[1, 2, 3, 4]).unwrap();
            card.write_block(4, &[0xAB; 16]).unwrap();
        }

        let mut card = DumpFileCard::open(&config).unwrap();
        assert_eq!(card.detect_profile().unwrap(), MediaProfile::CLASSIC_1K);
        assert_eq!(card.uid().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(card.read_block(4).unwrap(), [0xAB; 16]);
        assert_eq!(std::fs::metadata(card.path()).unwrap().len(), 1024);
    }

    #[test]
    fn test_profile_for_size() {
        assert_eq!(profile_for_size(320).unwrap(), MediaProfile::MINI);
        assert_eq!(profile_for_size(1024).unwrap(), MediaProfile::CLASSIC_1K);
        assert_eq!(profile_for_size(4096).unwrap(), MediaProfile::CLASSIC_4K);
        assert_eq!(profile_for_size(2048).unwrap().total_blocks, 128);
        assert!(profile_for_size(1000).is_err());
        assert!(profile_for_size(0).is_err());
    }

    #[test]
    fn test_wrong_key_fails_auth() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        DumpFileCard::create(&config, MediaProfile::CLASSIC_1K, &[1, 2, 3, 4]).unwrap();

        let other_key = TransportConfig {
            key_a: [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
            ..config
        };
        let mut card = DumpFileCard::open(&other_key).unwrap();
        assert!(matches!(card.read_block(4), Err(CardError::Auth { block: 4, .. })));
    }

    #[test]
    fn test_block_zero_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let mut card =
            DumpFileCard::create(&config_in(&dir), MediaProfile::MINI, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            card.write_block(0, &[0u8; 16]),
            Err(CardError::WriteProtected { block: 0 })
        ));
        assert!(matches!(card.read_block(20), Err(CardError::Address { block: 20, .. })));
    }
}
