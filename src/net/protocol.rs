use serde::{Deserialize, Serialize};

use crate::game::constants::net;
use crate::game::state::{ArenaState, CashOutState, Coin, EntityId, PlayerCell, SessionId, SplitPiece, Virus, Zone};
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request to join an arena
    Join {
        display_name: String,
        /// Empty selects the default arena
        room_id: String,
        /// Opaque cosmetic selection, passed through untouched
        cosmetic: String,
        /// Identity issued by the external auth service; `None` for guests
        user_id: Option<String>,
    },
    /// Movement direction, magnitude at most 1
    Input { seq: u64, dx: f32, dy: f32 },
    /// Split toward a world-space point
    Split { target_x: f32, target_y: f32 },
    CashOutStart,
    CashOutStop,
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Request to leave the arena
    Leave,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join confirmation with assigned session id and session token
    JoinAccepted {
        session_id: SessionId,
        session_token: Vec<u8>,
        room_id: String,
        zone: ZoneSnapshot,
    },
    /// Join was rejected
    JoinRejected { reason: String },
    /// World state after a tick
    StateSnapshot(ArenaSnapshot),
    /// Terminal elimination event, sent once per session
    GameOver {
        final_score: u64,
        final_mass: f32,
        eliminated_by: String,
    },
    /// Cash-out reached 100%; the score is banked and the session ends
    CashOutComplete { final_score: u64, final_mass: f32 },
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
    /// Server is closing this session
    Kicked { reason: String },
}

/// Zone as seen by clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub center: Vec2,
    pub current_radius: f32,
    pub target_radius: f32,
}

impl From<&Zone> for ZoneSnapshot {
    fn from(zone: &Zone) -> Self {
        Self {
            center: zone.center,
            current_radius: zone.current_radius,
            target_radius: zone.target_radius,
        }
    }
}

/// Split piece for network transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceSnapshot {
    pub id: EntityId,
    pub position: Vec2,
    pub mass: f32,
    pub radius: f32,
    pub can_merge: bool,
}

impl PieceSnapshot {
    pub fn from_piece(piece: &SplitPiece) -> Self {
        Self {
            id: piece.id,
            position: piece.position,
            mass: piece.mass,
            radius: piece.radius(),
            can_merge: piece.can_merge,
        }
    }
}

/// Player-Cell for network transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub session_id: SessionId,
    pub name: String,
    pub cosmetic: String,
    pub position: Vec2,
    pub mass: f32,
    pub radius: f32,
    pub score: u64,
    pub alive: bool,
    pub spawn_protected: bool,
    pub cash_out: CashOutState,
    pub pieces: Vec<PieceSnapshot>,
}

impl PlayerSnapshot {
    pub fn from_player(player: &PlayerCell, now: f64) -> Self {
        Self {
            session_id: player.session_id,
            name: player.name.clone(),
            cosmetic: player.cosmetic.clone(),
            position: player.position,
            mass: player.mass,
            radius: player.radius(),
            score: player.score,
            alive: player.alive,
            spawn_protected: player.is_spawn_protected(now),
            cash_out: player.cash_out,
            pieces: player.pieces.iter().map(PieceSnapshot::from_piece).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    pub color: u8,
    pub value: u64,
}

impl From<&Coin> for CoinSnapshot {
    fn from(coin: &Coin) -> Self {
        Self {
            id: coin.id,
            position: coin.position,
            radius: coin.radius,
            color: coin.color,
            value: coin.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirusSnapshot {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    pub spikes: u8,
}

impl From<&Virus> for VirusSnapshot {
    fn from(virus: &Virus) -> Self {
        Self {
            id: virus.id,
            position: virus.position,
            radius: virus.radius,
            spikes: virus.spikes,
        }
    }
}

/// One row of the arena-wide standings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderSnapshot {
    pub session_id: SessionId,
    pub name: String,
    pub score: u64,
}

/// Top alive players by score across the whole arena, ties in arena order
fn leaders(state: &ArenaState) -> Vec<LeaderSnapshot> {
    let mut alive: Vec<&PlayerCell> = state.players.iter().filter(|p| p.alive).collect();
    alive.sort_by(|a, b| b.score.cmp(&a.score));
    alive
        .into_iter()
        .take(net::LEADERBOARD_SIZE)
        .map(|p| LeaderSnapshot {
            session_id: p.session_id,
            name: p.name.clone(),
            score: p.score,
        })
        .collect()
}

/// World state for one viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    pub tick: u64,
    pub zone: ZoneSnapshot,
    pub players: Vec<PlayerSnapshot>,
    pub coins: Vec<CoinSnapshot>,
    pub viruses: Vec<VirusSnapshot>,
    /// Alive players in the arena before view filtering
    pub players_alive: u32,
    /// Standings computed before view filtering
    pub leaders: Vec<LeaderSnapshot>,
}

impl ArenaSnapshot {
    /// Every entity in the arena
    pub fn full(state: &ArenaState) -> Self {
        Self {
            tick: state.tick,
            zone: ZoneSnapshot::from(&state.zone),
            players: state
                .players
                .iter()
                .map(|p| PlayerSnapshot::from_player(p, state.time))
                .collect(),
            coins: state.coins.iter().map(CoinSnapshot::from).collect(),
            viruses: state.viruses.iter().map(VirusSnapshot::from).collect(),
            players_alive: state.alive_count() as u32,
            leaders: leaders(state),
        }
    }

    /// State relevant to `viewer`: its own player (always, alive or not),
    /// alive players with any cell inside `view_radius`, coins inside
    /// `view_radius` and every virus
    pub fn for_viewer(state: &ArenaState, viewer: SessionId, view_radius: f32) -> Self {
        let own = state.get_player(viewer);
        let center = own.map(|p| p.position).unwrap_or(state.zone.center);
        let view_sq = view_radius * view_radius;
        let in_view = |pos: Vec2| pos.distance_sq_to(center) <= view_sq;

        let players = state
            .players
            .iter()
            .filter(|p| {
                p.session_id == viewer
                    || (p.alive
                        && (in_view(p.position) || p.pieces.iter().any(|piece| in_view(piece.position))))
            })
            .map(|p| PlayerSnapshot::from_player(p, state.time))
            .collect();

        Self {
            tick: state.tick,
            zone: ZoneSnapshot::from(&state.zone),
            players,
            coins: state
                .coins
                .iter()
                .filter(|c| in_view(c.position))
                .map(CoinSnapshot::from)
                .collect(),
            viruses: state.viruses.iter().map(VirusSnapshot::from).collect(),
            players_alive: state.alive_count() as u32,
            leaders: leaders(state),
        }
    }

    pub fn player(&self, session_id: SessionId) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.session_id == session_id)
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
