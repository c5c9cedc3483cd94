//! Recovery and retry behavior of the session
//!
//! Faults are injected through `MemoryCard`; a slow wrapper transport covers
//! the operation deadline.

use cardstore_rs::{
    Block, CardError, Fault, MediaProfile, MemoryCard, Result, Session, SessionBuilder,
    SessionState, Transport,
};
use std::time::Duration;

fn session_over(card: &MemoryCard) -> Session<MemoryCard> {
    SessionBuilder::new(card.clone())
        .recovery_settle(Duration::ZERO)
        .build()
        .unwrap()
}

/// Session with `text` stored at block 4 and an empty cache
fn prepared(card: &MemoryCard, text: &str) -> Session<MemoryCard> {
    let mut session = session_over(card);
    session.write_string(4, text).unwrap();
    session.refresh_cache();
    card.clear_log();
    session
}

#[test]
fn test_single_read_fault_is_retried() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let text = "x".repeat(60);
    let mut session = prepared(&card, &text);

    card.inject_fault(8, Fault::Transport, 1);
    assert_eq!(session.read_string(4).unwrap(), text);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(card.reset_count(), 1);

    // Recovery cleared the cache, so the retry re-read from block 4
    let reads = card.reads();
    assert_eq!(reads.iter().filter(|&&i| i == 4).count(), 2);
    assert!(reads.contains(&0));
}

#[test]
fn test_two_consecutive_faults_surface_transport_error() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = prepared(&card, "two strikes");

    card.inject_fault(4, Fault::Transport, 2);
    let err = session.read_string(4).unwrap_err();
    assert!(matches!(err, CardError::Transport(_)));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Degraded);
    assert_eq!(card.reset_count(), 1);
}

#[test]
fn test_degraded_session_recovers_before_next_operation() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = prepared(&card, "back again");

    card.inject_fault(4, Fault::Transport, 2);
    assert!(session.read_string(4).is_err());

    assert_eq!(session.read_string(4).unwrap(), "back again");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(card.reset_count(), 2);
}

#[test]
fn test_write_fault_retries_whole_plan() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = session_over(&card);
    let text = "y".repeat(40);

    card.inject_fault(6, Fault::Transport, 1);
    assert_eq!(session.write_string(4, &text).unwrap(), vec![4, 5, 6]);
    assert_eq!(card.writes(), vec![4, 5, 4, 5, 6]);

    session.refresh_cache();
    assert_eq!(session.read_string(4).unwrap(), text);
}

#[test]
fn test_timeout_leaves_session_degraded() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_4K);
    let mut session = prepared(&card, "slow medium");

    card.inject_fault(4, Fault::Timeout, 1);
    assert!(matches!(
        session.read_string(4),
        Err(CardError::Timeout { .. })
    ));
    assert_eq!(session.state(), SessionState::Degraded);
    assert_eq!(card.reset_count(), 0);

    assert_eq!(session.read_string(4).unwrap(), "slow medium");
    assert_eq!(card.reset_count(), 1);
}

#[test]
fn test_auth_failure_is_not_retried() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = prepared(&card, "locked sector");

    card.inject_fault(4, Fault::Auth, 1);
    assert!(matches!(
        session.read_string(4),
        Err(CardError::Auth { block: 4, .. })
    ));
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(card.reset_count(), 0);
}

#[test]
fn test_removed_medium_disconnects() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = prepared(&card, "gone");

    card.set_present(false);
    assert!(matches!(
        session.read_string(4),
        Err(CardError::Transport(_))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);

    card.set_present(true);
    assert_eq!(session.read_string(4).unwrap(), "gone");
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_explicit_recovery() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    let mut session = prepared(&card, "manual");

    assert!(session.recover_connection());
    assert_eq!(session.state(), SessionState::Connected);

    card.set_present(false);
    assert!(!session.recover_connection());
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// Delays every block read
struct SlowCard {
    inner: MemoryCard,
    delay: Duration,
}

impl Transport for SlowCard {
    fn probe_presence(&mut self, timeout: Duration) -> Result<bool> {
        self.inner.probe_presence(timeout)
    }

    fn detect_profile(&mut self) -> Result<MediaProfile> {
        self.inner.detect_profile()
    }

    fn uid(&mut self) -> Result<Vec<u8>> {
        self.inner.uid()
    }

    fn read_block(&mut self, index: u32) -> Result<Block> {
        std::thread::sleep(self.delay);
        self.inner.read_block(index)
    }

    fn write_block(&mut self, index: u32, data: &Block) -> Result<()> {
        self.inner.write_block(index, data)
    }
}

#[test]
fn test_operation_deadline() {
    let card = MemoryCard::new(MediaProfile::CLASSIC_1K);
    prepared(&card, &"z".repeat(100));

    let slow = SlowCard {
        inner: card.clone(),
        delay: Duration::from_millis(20),
    };
    let mut session = SessionBuilder::new(slow)
        .op_timeout(Duration::from_millis(5))
        .recovery_settle(Duration::ZERO)
        .build()
        .unwrap();

    let err = session.read_string(4).unwrap_err();
    match err {
        CardError::Timeout {
            elapsed_ms,
            budget_ms,
        } => {
            assert_eq!(budget_ms, 5);
            assert!(elapsed_ms >= 5);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Degraded);
}
