//! Floodgate feed server: per-source flood accounting with captcha fan-out.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Captcha policy facade over the registry and the connection directory.
pub mod antispam;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Identifier to live connection lookup.
pub mod directory;
/// Error types for accounting and connection handling.
pub mod error;
/// Concurrent client IP to connection table.
pub mod feeds;
/// Prometheus metrics, probes and the admin HTTP endpoint.
pub mod metrics;
/// Trusted proxy networks and client IP resolution.
pub mod proxy;
/// Source to throttle table with idle expiry.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// Virtual-schedule throttle for a single source.
pub mod throttle;

pub use antispam::{AntiSpam, ChallengeSwitch, FanOut, Verdict};
pub use connection::SPAM_CLOSE_REASON;
pub use error::{FloodgateError, SpamError};
pub use server::{run, run_with_shutdown, ServerState};
