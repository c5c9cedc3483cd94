//! Card storage core
//!
//! Pure layers first, then the I/O-facing ones:
//!
//! - [`error`] - Error taxonomy shared by every layer
//! - [`geometry`] - Block index to sector and role mapping
//! - [`planner`] - Usable-block enumeration and capacity math
//! - [`header`] - Length-prefix formats and width detection
//! - [`codec`] - String encode planning and decode
//! - [`classifier`] - Writability heuristics
//! - [`cache`] - Per-session block cache
//! - [`config`] - Session and transport configuration
//! - [`transport`] - Medium access trait and the bundled transports
//! - [`session`] - Resilient session state machine
//! - [`worker`] - Session on a dedicated thread

pub mod cache;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod geometry;
pub mod header;
pub mod planner;
pub mod session;
pub mod transport;
pub mod worker;
