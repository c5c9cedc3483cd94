//! In-memory medium
//!
//! Behaves like a card held in the field of a reader: it can be removed,
//! write-protected, or made to fail specific block operations a given number
//! of times. Clones share the same medium, so a test can keep a handle while
//! the session owns another.

use super::{default_trailer, manufacturer_block, sak_for, Transport};
use crate::core::config::{TransportConfig, DEFAULT_KEY_A};
use crate::core::error::{CardError, Result};
use crate::core::geometry::{raw_role, Block, MediaProfile, Role, BLOCK_SIZE};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_UID: [u8; 4] = [0x04, 0x1A, 0x2B, 0x3C];

/// Failure injected into one block operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Timeout,
    Auth,
}

#[derive(Debug)]
struct CardState {
    profile: MediaProfile,
    uid: Vec<u8>,
    blocks: Vec<Block>,
    present: bool,
    write_protected: bool,
    io_timeout_ms: u64,
    faults: HashMap<u32, VecDeque<Fault>>,
    reads: Vec<u32>,
    writes: Vec<u32>,
    resets: usize,
}

impl CardState {
    fn take_fault(&mut self, index: u32) -> Option<Fault> {
        let queue = self.faults.get_mut(&index)?;
        let fault = queue.pop_front();
        if queue.is_empty() {
            self.faults.remove(&index);
        }
        fault
    }

    /// Presence, injected faults and range, in that order
    fn check_access(&mut self, index: u32) -> Result<()> {
        if !self.present {
            return Err(CardError::Transport(format!(
                "medium left the field before block {}",
                index
            )));
        }

        if let Some(fault) = self.take_fault(index) {
            debug!(block = index, ?fault, "Injected fault");
            return Err(match fault {
                Fault::Transport => {
                    CardError::Transport(format!("link error at block {}", index))
                }
                Fault::Timeout => CardError::Timeout {
                    elapsed_ms: self.io_timeout_ms,
                    budget_ms: self.io_timeout_ms,
                },
                Fault::Auth => CardError::Auth {
                    block: index,
                    reason: "key A rejected".to_string(),
                },
            });
        }

        if !self.profile.contains(index) {
            return Err(CardError::address(
                index,
                format!("medium has {} blocks", self.profile.total_blocks),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCard {
    state: Arc<Mutex<CardState>>,
}

impl MemoryCard {
    /// Factory-fresh medium: zeroed data blocks, default trailers, present
    pub fn new(profile: MediaProfile) -> Self {
        let blocks = (0..profile.total_blocks)
            .map(|index| match raw_role(index) {
                Role::Manufacturer => manufacturer_block(&DEFAULT_UID, sak_for(&profile)),
                Role::Trailer => default_trailer(&DEFAULT_KEY_A),
                Role::Data => [0u8; BLOCK_SIZE],
            })
            .collect();

        MemoryCard {
            state: Arc::new(Mutex::new(CardState {
                profile,
                uid: DEFAULT_UID.to_vec(),
                blocks,
                present: true,
                write_protected: false,
                io_timeout_ms: TransportConfig::default().io_timeout_ms,
                faults: HashMap::new(),
                reads: Vec::new(),
                writes: Vec::new(),
                resets: 0,
            })),
        }
    }

    pub fn with_uid(self, uid: &[u8]) -> Self {
        {
            let mut state = self.state.lock();
            let sak = sak_for(&state.profile);
            state.uid = uid.to_vec();
            if let Some(block) = state.blocks.first_mut() {
                *block = manufacturer_block(uid, sak);
            }
        }
        self
    }

    /// Apply key A and I/O timeout from a transport config
    pub fn with_config(self, config: &TransportConfig) -> Self {
        {
            let mut state = self.state.lock();
            state.io_timeout_ms = config.io_timeout_ms;
            for (index, block) in state.blocks.iter_mut().enumerate() {
                if raw_role(index as u32) == Role::Trailer {
                    *block = default_trailer(&config.key_a);
                }
            }
        }
        self
    }

    /// Fail the next `times` operations on `block` with `fault`
    pub fn inject_fault(&self, block: u32, fault: Fault, times: usize) {
        let mut state = self.state.lock();
        state
            .faults
            .entry(block)
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Put the medium in or out of the reader's field
    pub fn set_present(&self, present: bool) {
        self.state.lock().present = present;
    }

    pub fn is_present(&self) -> bool {
        self.state.lock().present
    }

    /// Refuse every write, the way demo media do
    pub fn set_write_protected(&self, protected: bool) {
        self.state.lock().write_protected = protected;
    }

    /// Place raw contents into any block, bypassing the transport rules
    pub fn seed_block(&self, index: u32, block: Block) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .blocks
            .get_mut(index as usize)
            .ok_or_else(|| CardError::address(index, "outside the medium"))?;
        *slot = block;
        Ok(())
    }

    /// Current contents of a block, without logging a read
    pub fn peek(&self, index: u32) -> Option<Block> {
        self.state.lock().blocks.get(index as usize).copied()
    }

    /// Block indices read through the transport, in order
    pub fn reads(&self) -> Vec<u32> {
        self.state.lock().reads.clone()
    }

    /// Block indices written through the transport, in order
    pub fn writes(&self) -> Vec<u32> {
        self.state.lock().writes.clone()
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.reads.clear();
        state.writes.clear();
    }
}

impl Transport for MemoryCard {
    fn probe_presence(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(self.state.lock().present)
    }

    fn detect_profile(&mut self) -> Result<MediaProfile> {
        let state = self.state.lock();
        if !state.present {
            return Err(CardError::Probe("no medium in field".to_string()));
        }
        Ok(state.profile)
    }

    fn uid(&mut self) -> Result<Vec<u8>> {
        let state = self.state.lock();
        if !state.present {
            return Err(CardError::Transport("medium left the field".to_string()));
        }
        Ok(state.uid.clone())
    }

    fn read_block(&mut self, index: u32) -> Result<Block> {
        let mut state = self.state.lock();
        state.check_access(index)?;
        state.reads.push(index);
        Ok(state.blocks[index as usize])
    }

    fn write_block(&mut self, index: u32, data: &Block) -> Result<()> {
        let mut state = self.state.lock();
        state.check_access(index)?;
        if index == 0 || state.write_protected {
            return Err(CardError::WriteProtected { block: index });
        }
        state.blocks[index as usize] = *data;
        state.writes.push(index);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.resets += 1;
        debug!(resets = state.resets, "Memory card link reset");
        Ok(())
    }
}
