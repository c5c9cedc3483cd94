//! Resilient session over one transport
//!
//! ```text
//!                 connect / wait_for_medium
//!  Disconnected ─────────────────────────────▶ Connected
//!       ▲                                        │   ▲
//!       │ recovery failed                        │   │ recovery ok
//!       │ medium removed           transport     ▼   │
//!       └──────────────────────────────────── Degraded
//!                                   error / timeout
//! ```
//!
//! A transport failure during an operation moves the session to `Degraded`,
//! runs [`Session::recover_connection`] and retries the operation once. A
//! second failure is returned to the caller. A timeout also leaves the
//! session `Degraded` but is never retried; the next operation recovers
//! first.

use crate::core::cache::{CacheStats, SessionCache};
use crate::core::classifier::{sample_indices, WritabilityClassifier, WritabilityVerdict};
use crate::core::codec::{self, BlockReader, StringInfo};
use crate::core::config::SessionConfig;
use crate::core::error::{CardError, ErrorKind, Result};
use crate::core::geometry::{Block, MediaProfile, Role, BLOCK_SIZE};
use crate::core::planner::{space_report, SpaceReport};
use crate::core::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connected,
    Degraded,
}

/// Time budget of one operation, retry included
#[derive(Debug, Clone, Copy)]
struct OpClock {
    started: Instant,
    budget: Duration,
}

impl OpClock {
    fn start(budget: Duration) -> Self {
        OpClock {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            return Err(CardError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    classifier: WritabilityClassifier,
    cache: SessionCache,
    state: SessionState,
    profile: Option<MediaProfile>,
}

/// Cached, deadline-checked block source for the codec
struct SessionReader<'a, T: Transport> {
    session: &'a mut Session<T>,
    clock: OpClock,
}

impl<T: Transport> BlockReader for SessionReader<'_, T> {
    fn read_block(&mut self, index: u32) -> Result<Block> {
        self.session.cached_read(index, &self.clock)
    }
}

impl<T: Transport> Session<T> {
    /// Wrap a transport; nothing is read until the first operation
    pub fn new(
        transport: T,
        config: SessionConfig,
        classifier: WritabilityClassifier,
    ) -> Self {
        Session {
            cache: SessionCache::new(config.cache_capacity),
            transport,
            config,
            classifier,
            state: SessionState::Disconnected,
            profile: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Profile of the connected medium, if any
    pub fn profile(&self) -> Option<MediaProfile> {
        self.profile
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Probe for a medium and detect its profile
    pub fn connect(&mut self) -> Result<MediaProfile> {
        match self.detect() {
            Ok(profile) => {
                self.cache.invalidate_all();
                self.profile = Some(profile);
                self.state = SessionState::Connected;
                info!(family = %profile.family, blocks = profile.total_blocks, "Session connected");
                Ok(profile)
            }
            Err(err) => {
                self.disconnect();
                Err(err)
            }
        }
    }

    fn detect(&mut self) -> Result<MediaProfile> {
        let timeout = self.config.presence_timeout();
        if !self.transport.probe_presence(timeout)? {
            return Err(CardError::Probe(format!(
                "no medium present within {}ms",
                timeout.as_millis()
            )));
        }
        self.transport.detect_profile()
    }

    fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.profile = None;
        self.cache.invalidate_all();
    }

    /// Reset the link and re-detect the medium
    ///
    /// Clears the cache, resets the transport, re-probes presence, re-detects
    /// the profile and verifies the link by reading block 0. On success the
    /// session is `Connected`; otherwise it is `Disconnected`.
    pub fn recover_connection(&mut self) -> bool {
        info!(state = ?self.state, "Recovering connection");
        self.cache.invalidate_all();

        if let Err(err) = self.transport.reset() {
            debug!(error = %err, "Transport reset failed, continuing recovery");
        }

        let settle = self.config.recovery_settle();
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }

        let previous = self.profile;
        let outcome = self.detect().and_then(|profile| {
            let block = self.transport.read_block(0)?;
            self.cache.insert(0, block);
            Ok(profile)
        });

        match outcome {
            Ok(profile) => {
                if previous.is_some_and(|p| p != profile) {
                    info!(family = %profile.family, "Medium changed during recovery");
                }
                self.profile = Some(profile);
                self.state = SessionState::Connected;
                info!("Connection recovered");
                true
            }
            Err(err) => {
                warn!(error = %err, "Connection recovery failed");
                self.disconnect();
                false
            }
        }
    }

    /// Drop every cached block
    pub fn refresh_cache(&mut self) {
        debug!(entries = self.cache.len(), "Cache refreshed");
        self.cache.invalidate_all();
    }

    /// Bring the session to `Connected` before an operation
    fn ensure_ready(&mut self) -> Result<MediaProfile> {
        match self.state {
            SessionState::Connected => self
                .profile
                .ok_or_else(|| CardError::Probe("connected without a profile".to_string())),
            SessionState::Disconnected => self.connect(),
            SessionState::Degraded => {
                if self.recover_connection() {
                    self.profile.ok_or_else(|| {
                        CardError::Probe("recovered without a profile".to_string())
                    })
                } else {
                    Err(CardError::Transport(
                        "session degraded and recovery failed".to_string(),
                    ))
                }
            }
        }
    }

    /// Run `op` with the recover-and-retry-once policy
    fn run<R>(
        &mut self,
        name: &'static str,
        mut op: impl FnMut(&mut Self, MediaProfile, &OpClock) -> Result<R>,
    ) -> Result<R> {
        let profile = self.ensure_ready()?;
        let clock = OpClock::start(self.config.op_timeout());

        match op(self, profile, &clock) {
            Ok(value) => Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(op = name, error = %err, "Transport failure, attempting recovery");
                self.state = SessionState::Degraded;
                if !self.recover_connection() {
                    return Err(err);
                }

                let profile = self.ensure_ready()?;
                info!(op = name, "Retrying after recovery");
                op(self, profile, &clock).map_err(|err| {
                    self.note_failure(name, &err);
                    err
                })
            }
            Err(err) => {
                self.note_failure(name, &err);
                Err(err)
            }
        }
    }

    fn note_failure(&mut self, name: &'static str, err: &CardError) {
        match err.kind() {
            ErrorKind::Transport | ErrorKind::Timeout => {
                warn!(op = name, error = %err, "Operation failed, session degraded");
                self.state = SessionState::Degraded;
            }
            ErrorKind::WriteProtected | ErrorKind::Auth => {
                warn!(op = name, error = %err, "Medium refused access");
            }
            _ => debug!(op = name, error = %err, "Operation failed"),
        }
    }

    fn cached_read(&mut self, index: u32, clock: &OpClock) -> Result<Block> {
        if let Some(block) = self.cache.get(index) {
            return Ok(block);
        }
        self.physical_read(index, clock)
    }

    /// Read from the medium and refresh the cached copy
    fn physical_read(&mut self, index: u32, clock: &OpClock) -> Result<Block> {
        clock.check()?;
        let block = self.transport.read_block(index)?;
        self.cache.insert(index, block);
        Ok(block)
    }

    fn physical_write(&mut self, index: u32, block: &Block, clock: &OpClock) -> Result<()> {
        clock.check()?;
        self.cache.invalidate(index);
        self.transport.write_block(index, block)
    }

    /// Store `text` starting at `start_block`
    ///
    /// The whole write is planned before any I/O, so a capacity or address
    /// error leaves the medium untouched. Returns the blocks written.
    pub fn write_string(&mut self, start_block: u32, text: &str) -> Result<Vec<u32>> {
        self.run("write_string", |session, profile, clock| {
            let plan = codec::encode(text, start_block, &profile)?;
            debug!(
                start_block,
                bytes = plan.header.length,
                blocks = ?plan.block_indices(),
                "Writing string"
            );
            for (index, block) in &plan.blocks {
                session.physical_write(*index, block, clock)?;
            }
            Ok(plan.block_indices())
        })
    }

    /// Store `text` from the first data block of `sector`
    pub fn write_string_in_sector(&mut self, sector: u32, text: &str) -> Result<Vec<u32>> {
        let profile = self.ensure_ready()?;
        let start_block = profile.first_data_block_of_sector(sector)?;
        self.write_string(start_block, text)
    }

    pub fn read_string(&mut self, start_block: u32) -> Result<String> {
        self.run("read_string", |session, profile, clock| {
            let mut reader = SessionReader {
                session,
                clock: *clock,
            };
            codec::decode(&mut reader, start_block, &profile)
        })
    }

    /// Header facts and preview, reading only the blocks they need
    pub fn get_string_info(&mut self, start_block: u32) -> Result<StringInfo> {
        let preview_bytes = self.config.preview_bytes;
        self.run("get_string_info", |session, profile, clock| {
            let mut reader = SessionReader {
                session,
                clock: *clock,
            };
            codec::get_metadata(&mut reader, start_block, &profile, preview_bytes)
        })
    }

    /// Capacity from `start_block` to the end of the medium
    pub fn get_available_space(&mut self, start_block: u32) -> Result<SpaceReport> {
        let profile = self.ensure_ready()?;
        Ok(space_report(start_block, &profile))
    }

    /// Zero-fill every block occupied by the string at `start_block`
    pub fn erase_string(&mut self, start_block: u32) -> Result<Vec<u32>> {
        self.run("erase_string", |session, profile, clock| {
            let info = {
                let mut reader = SessionReader {
                    session: &mut *session,
                    clock: *clock,
                };
                codec::get_metadata(&mut reader, start_block, &profile, 0)?
            };
            debug!(start_block, blocks = ?info.blocks, "Erasing string");
            for index in &info.blocks {
                session.physical_write(*index, &[0u8; BLOCK_SIZE], clock)?;
            }
            Ok(info.blocks)
        })
    }

    /// Grade whether the medium accepts writes
    ///
    /// Samples the low blocks for demo signatures, always from the medium
    /// rather than the cache. With `probe_writes` enabled, a writable-looking
    /// medium also gets one data block rewritten with the bytes just read
    /// from it; a refusal marks the medium not writable.
    pub fn check_writability(&mut self) -> Result<WritabilityVerdict> {
        let probe = self.config.probe_writes;
        let verdict = self.run("check_writability", |session, profile, clock| {
            clock.check()?;
            let uid = session.transport.uid()?;

            let mut sample = Vec::new();
            for index in sample_indices(&profile) {
                match session.physical_read(index, clock) {
                    Ok(block) => sample.push((index, block)),
                    Err(CardError::Auth { .. }) => {
                        debug!(block = index, "Skipping unreadable block in sample");
                    }
                    Err(err) => return Err(err),
                }
            }

            let verdict = session.classifier.classify(&uid, &sample);
            if !(probe && verdict.writable) {
                return Ok(verdict);
            }

            let target = sample
                .iter()
                .find(|(index, _)| profile.role_of(*index).ok() == Some(Role::Data));
            match target {
                Some((index, block)) => match session.physical_write(*index, block, clock) {
                    Ok(()) => Ok(verdict),
                    Err(CardError::WriteProtected { block }) => {
                        Ok(verdict.probe_rejected(block))
                    }
                    Err(err) => Err(err),
                },
                None => Ok(verdict),
            }
        })?;

        info!(
            writable = verdict.writable,
            confidence = ?verdict.confidence,
            reason = %verdict.reason,
            "Writability verdict"
        );
        Ok(verdict)
    }

    /// Read one block through the cache
    pub fn read_block(&mut self, index: u32) -> Result<Block> {
        self.run("read_block", |session, profile, clock| {
            profile.role_of(index)?;
            session.cached_read(index, clock)
        })
    }

    /// Write one data block
    ///
    /// Block 0 and sector trailers are refused before any I/O.
    pub fn write_block(&mut self, index: u32, data: &Block) -> Result<()> {
        self.run("write_block", |session, profile, clock| {
            match profile.role_of(index)? {
                Role::Data => session.physical_write(index, data, clock),
                role => Err(CardError::address(
                    index,
                    format!("{} block cannot be written", role),
                )),
            }
        })
    }

    /// Poll until a medium enters the field, then connect
    ///
    /// Returns `Ok(false)` when `timeout` passes with no medium.
    pub fn wait_for_medium(&mut self, timeout: Duration) -> Result<bool> {
        let started = Instant::now();
        let poll = self.config.poll_interval();
        info!(timeout_ms = timeout.as_millis() as u64, "Waiting for medium");

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if self.transport.probe_presence(poll.min(remaining))? {
                self.connect()?;
                return Ok(true);
            }
            if remaining.is_zero() {
                return Ok(false);
            }
            std::thread::sleep(poll.min(remaining));
        }
    }

    /// Poll until the medium leaves the field
    ///
    /// On removal the session becomes `Disconnected`. Returns `Ok(false)`
    /// when the medium is still present after `timeout`.
    pub fn wait_for_removal(&mut self, timeout: Duration) -> Result<bool> {
        let started = Instant::now();
        let poll = self.config.poll_interval();

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if !self.transport.probe_presence(poll.min(remaining))? {
                info!("Medium removed");
                self.disconnect();
                return Ok(true);
            }
            if remaining.is_zero() {
                return Ok(false);
            }
            std::thread::sleep(poll.min(remaining));
        }
    }

    /// Hex dump of the first `count` blocks
    ///
    /// One line per block: `Block NN: hex | ascii (role)`. Blocks that fail
    /// authentication are shown as such instead of aborting the dump.
    pub fn format_blocks(&mut self, count: u32) -> Result<String> {
        self.run("format_blocks", |session, profile, clock| {
            let mut out = String::new();
            for index in 0..count.min(profile.total_blocks) {
                let role = profile.role_of(index)?;
                match session.cached_read(index, clock) {
                    Ok(block) => out.push_str(&format_block_line(index, &block, role)),
                    Err(CardError::Auth { .. }) => out.push_str(&format!(
                        "Block {:02}: <authentication failed> ({})",
                        index, role
                    )),
                    Err(err) => return Err(err),
                }
                out.push('\n');
            }
            Ok(out)
        })
    }
}

/// `Block NN: hex | ascii (role)`
pub fn format_block_line(index: u32, block: &Block, role: Role) -> String {
    let hex: Vec<String> = block.iter().map(|b| format!("{:02X}", b)).collect();
    let ascii: String = block
        .iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect();
    format!("Block {:02}: {} | {} ({})", index, hex.join(" "), ascii, role)
}
