//! Rooms: one arena task per room id
//!
//! The room id from `join` selects an arena. Unknown ids start a new arena
//! up to the configured room limit.

pub mod manager;
pub mod room;

pub use manager::RoomManager;
pub use room::{ArenaRoom, RoomError};
