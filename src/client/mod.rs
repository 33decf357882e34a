//! Client reconciliation engine
//!
//! Consumes authoritative server messages and keeps the local-only view
//! state: camera, cash-out ring, virus animation, leaderboard and minimap.
//! Nothing here is ever sent back as fact.

pub mod camera;
pub mod cashout_ring;
pub mod engine;
pub mod latency;
pub mod leaderboard;
pub mod minimap;
pub mod status;
pub mod virus_anim;

pub use engine::{ReconciliationEngine, SessionOutcome};
pub use leaderboard::{derive_leaderboard, LeaderboardEntry, LiveCell};
pub use status::{ConnectionStatus, ConnectionTracker};
