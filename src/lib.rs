//! Cashout Arena Server Library
//!
//! Server-authoritative sync engine for a real-time ".io" arena, served
//! over WebTransport.
//!
//! # Features
//!
//! - `dos_ratelimit` - Per-message rate limiting in the transport (enabled by default)
//! - `profile_reporter` - Report completed missions to an HTTP profile service
//! - `minimal` - Build without optional features for testing/debugging

pub mod anticheat;
pub mod client;
pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod progression;
pub mod util;
