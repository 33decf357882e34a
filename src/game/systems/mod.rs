pub mod cashout;
pub mod collision;
pub mod physics;
pub mod pickup;
pub mod split;
pub mod virus;
pub mod zone;
