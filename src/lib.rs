//! # Cardstore - String Storage on MIFARE Classic Media
//!
//! `cardstore-rs` stores length-prefixed UTF-8 strings across the data blocks
//! of MIFARE Classic style cards, skipping sector trailers and the
//! manufacturer block. It provides:
//!
//! - **Block geometry** for Mini, 1K and 4K layouts
//! - **Capacity planning** from any start block
//! - **String codec** with 2-byte and 4-byte length headers, detected on read
//! - **Writability checks** for demo and sample media
//! - **Resilient sessions** with caching and recover-and-retry-once
//!
//! The physical reader is supplied by the caller through the
//! [`Transport`] trait. [`MemoryCard`] and [`DumpFileCard`] ship with the
//! crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cardstore_rs::{DumpFileCard, Result, SessionBuilder, TransportConfig};
//!
//! # fn main() -> Result<()> {
//! let card = DumpFileCard::open(&TransportConfig::new("card.mfd"))?;
//! let mut session = SessionBuilder::new(card).build()?;
//!
//! session.write_string(4, "Hello RFID World!")?;
//! let text = session.read_string(4)?;
//!
//! let space = session.get_available_space(4)?;
//! println!("{} ({} usable blocks)", text, space.usable_block_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use cardstore_rs::{MediaProfile, MemoryCard, Result, SessionBuilder, SessionConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let config = SessionConfig::load("cardstore.toml")?;
//! let mut session = SessionBuilder::new(MemoryCard::new(MediaProfile::CLASSIC_4K))
//!     .config(config)
//!     .op_timeout(Duration::from_secs(5))
//!     .with_write_probe()
//!     .build()?;
//!
//! let verdict = session.check_writability()?;
//! println!("writable: {} ({:?})", verdict.writable, verdict.confidence);
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    cache::CacheStats,
    classifier::{Confidence, WritabilityClassifier, WritabilityVerdict, DEFAULT_DEMO_PATTERNS},
    codec::{decode, encode, get_metadata, BlockReader, StringInfo, WritePlan},
    config::{SessionConfig, TransportConfig, DEFAULT_KEY_A},
    error::{CardError, ErrorKind, Result},
    geometry::{Block, MediaFamily, MediaProfile, Role, BLOCK_SIZE},
    header::{detect_format, HeaderFormat, StringHeader},
    planner::{available_bytes_from, space_report, usable_blocks_from, SpaceReport},
    session::{Session, SessionState},
    transport::{DumpFileCard, Fault, MemoryCard, Transport},
    worker::SessionWorker,
};

use std::time::Duration;
use tracing::debug;
use validator::Validate;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for a [`Session`] over a transport
///
/// # Examples
///
/// ```rust,no_run
/// use cardstore_rs::{MediaProfile, MemoryCard, SessionBuilder};
///
/// # fn main() -> cardstore_rs::Result<()> {
/// let session = SessionBuilder::new(MemoryCard::new(MediaProfile::CLASSIC_1K))
///     .cache_capacity(64)
///     .demo_patterns(["ACME-DEMO"])
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder<T: Transport> {
    transport: T,
    config: SessionConfig,
    classifier: Option<WritabilityClassifier>,
}

impl<T: Transport> SessionBuilder<T> {
    /// Start from the default configuration
    pub fn new(transport: T) -> Self {
        SessionBuilder {
            transport,
            config: SessionConfig::default(),
            classifier: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.config.op_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn presence_timeout(mut self, timeout: Duration) -> Self {
        self.config.presence_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Pause between a transport reset and the re-probe
    pub fn recovery_settle(mut self, settle: Duration) -> Self {
        self.config.recovery_settle_ms = settle.as_millis() as u64;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn preview_bytes(mut self, bytes: usize) -> Self {
        self.config.preview_bytes = bytes;
        self
    }

    /// Rewrite a sample block during writability checks
    pub fn with_write_probe(mut self) -> Self {
        self.config.probe_writes = true;
        self
    }

    /// Signatures of demo media, matched literally
    pub fn demo_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.demo_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Use a prepared classifier instead of building one from the patterns
    pub fn classifier(mut self, classifier: WritabilityClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validate the configuration and build the session
    ///
    /// No I/O happens here; the session connects on its first operation.
    pub fn build(self) -> Result<Session<T>> {
        self.config.validate()?;

        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => WritabilityClassifier::new(self.config.demo_patterns.as_slice())?,
        };

        debug!(
            op_timeout_ms = self.config.op_timeout_ms,
            cache_capacity = self.config.cache_capacity,
            probe_writes = self.config.probe_writes,
            "Building session"
        );

        Ok(Session::new(self.transport, self.config, classifier))
    }
}
