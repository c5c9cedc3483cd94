//! Writability heuristics
//!
//! Demo and sample cards ship with permanent content and silently ignore
//! writes. They are recognized by fixed text stamped into their data
//! blocks. The result is advisory: callers decide whether to write anyway.

use crate::core::error::{CardError, Result};
use crate::core::geometry::{raw_role, Block, MediaProfile, Role};
use regex::bytes::RegexSet;
use serde::{Deserialize, Serialize};

/// Text stamped on known demo/test media
pub const DEFAULT_DEMO_PATTERNS: &[&str] = &["TEST-4K", "TEST-1K", "DEMO-", "SAMPLE"];

/// Blocks below this index are sampled
pub const SAMPLE_BLOCK_LIMIT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritabilityVerdict {
    pub writable: bool,
    pub confidence: Confidence,
    pub reason: String,
    pub demo_blocks_found: usize,
    pub blocks_checked: usize,
}

impl WritabilityVerdict {
    /// Downgrade after the medium refused a byte-identical rewrite
    ///
    /// The refusal is direct evidence but not a known signature, so the
    /// result is `Medium`. Sample counts are kept.
    pub fn probe_rejected(self, block: u32) -> Self {
        WritabilityVerdict {
            writable: false,
            confidence: Confidence::Medium,
            reason: format!("Block {} rejected an identical rewrite", block),
            ..self
        }
    }
}

/// Data blocks worth sampling, plus the manufacturer block
pub fn sample_indices(profile: &MediaProfile) -> Vec<u32> {
    (0..SAMPLE_BLOCK_LIMIT.min(profile.total_blocks))
        .filter(|&index| raw_role(index) != Role::Trailer)
        .collect()
}

/// Pattern matcher over UID and block contents
#[derive(Debug, Clone)]
pub struct WritabilityClassifier {
    patterns: RegexSet,
}

impl WritabilityClassifier {
    /// Build a classifier from literal signatures
    pub fn new<S: AsRef<str>>(signatures: &[S]) -> Result<Self> {
        let escaped: Vec<String> = signatures
            .iter()
            .map(|s| regex::escape(s.as_ref()))
            .collect();
        let patterns = RegexSet::new(&escaped)
            .map_err(|e| CardError::Config(format!("invalid demo pattern: {}", e)))?;
        Ok(WritabilityClassifier { patterns })
    }

    fn matches(&self, bytes: &[u8]) -> bool {
        self.patterns.is_match(bytes)
    }

    /// Grade how likely the medium accepts writes
    ///
    /// `sample_blocks` may include block 0; a signature there is treated
    /// as conclusive. Trailers in the sample are ignored.
    pub fn classify(&self, uid: &[u8], sample_blocks: &[(u32, Block)]) -> WritabilityVerdict {
        let mut demo_blocks = 0;
        let mut checked = 0;
        let mut manufacturer_hit = false;

        for (index, block) in sample_blocks {
            match raw_role(*index) {
                Role::Trailer => continue,
                Role::Manufacturer => manufacturer_hit |= self.matches(block),
                Role::Data => {
                    checked += 1;
                    if self.matches(block) {
                        demo_blocks += 1;
                    }
                }
            }
        }

        let mut verdict = if manufacturer_hit || self.matches(uid) {
            WritabilityVerdict {
                writable: false,
                confidence: Confidence::High,
                reason: "Demo/test signature in card identity".to_string(),
                demo_blocks_found: demo_blocks,
                blocks_checked: checked,
            }
        } else {
            grade_ratio(demo_blocks, checked)
        };

        if verdict.confidence != Confidence::High && synthetic_uid(uid) {
            verdict.confidence = Confidence::Low;
            verdict.reason.push_str("; UID looks synthetic");
        }

        verdict
    }
}

fn grade_ratio(demo_blocks: usize, checked: usize) -> WritabilityVerdict {
    let (writable, confidence, reason) = if demo_blocks == 0 {
        (
            true,
            Confidence::Medium,
            "No demo patterns detected - likely writable".to_string(),
        )
    } else {
        // ratio > 0.3 and ratio > 0.1, in integer form
        if demo_blocks * 10 > checked * 3 {
            (
                false,
                Confidence::High,
                format!(
                    "Demo/test card detected ({}/{} blocks have demo patterns)",
                    demo_blocks, checked
                ),
            )
        } else if demo_blocks * 10 > checked {
            (
                false,
                Confidence::Medium,
                format!(
                    "Likely demo card ({}/{} blocks have demo patterns)",
                    demo_blocks, checked
                ),
            )
        } else {
            (
                true,
                Confidence::Low,
                format!(
                    "Some demo patterns found ({}/{} blocks)",
                    demo_blocks, checked
                ),
            )
        }
    };

    WritabilityVerdict {
        writable,
        confidence,
        reason,
        demo_blocks_found: demo_blocks,
        blocks_checked: checked,
    }
}

/// All-zero, all-0xFF and similar single-byte UIDs come from emulators
/// and blank test fixtures, not production silicon.
fn synthetic_uid(uid: &[u8]) -> bool {
    match uid.split_first() {
        Some((first, rest)) => rest.iter().all(|b| b == first),
        None => false,
    }
}
