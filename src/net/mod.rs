pub mod dos_protection;
pub mod framing;
pub mod game_session;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transport;
