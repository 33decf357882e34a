//! Arena entity model
//!
//! Player-Cells, their Split-Pieces, coins, viruses and the play Zone.
//! Everything here is mutated only by the tick loop in `game_loop`.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::game::constants::{mass, split, spawn};
use crate::game::constants::mass_to_radius;
use crate::util::vec2::Vec2;

/// Unique per-connection session identifier
pub type SessionId = Uuid;

/// Identifier for coins, viruses and split pieces (unique within an arena)
pub type EntityId = u64;

/// Pieces are stored inline up to this count
pub type PieceList = SmallVec<[SplitPiece; 4]>;

/// Cash-out accumulation for one player
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CashOutState {
    pub is_cashing_out: bool,
    /// 0..=100
    pub progress: f32,
}

impl CashOutState {
    pub fn reset(&mut self) {
        self.is_cashing_out = false;
        self.progress = 0.0;
    }
}

/// Mass split off a Player-Cell. Always owned by exactly one player and
/// stored inside that player's `pieces` list.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPiece {
    pub id: EntityId,
    pub position: Vec2,
    /// Launch velocity at split time; decays to zero over `split::BOOST_DURATION`
    pub velocity: Vec2,
    pub mass: f32,
    /// Simulation time of the split
    pub split_time: f64,
    /// Set once `split::MERGE_COOLDOWN` has elapsed
    pub can_merge: bool,
}

impl SplitPiece {
    pub fn new(id: EntityId, position: Vec2, velocity: Vec2, mass: f32, split_time: f64) -> Self {
        Self {
            id,
            position,
            velocity,
            mass,
            split_time,
            can_merge: false,
        }
    }

    pub fn radius(&self) -> f32 {
        mass_to_radius(self.mass)
    }

    /// Whether the merge cooldown has elapsed at `now`
    pub fn merge_ready_at(&self, now: f64) -> bool {
        now - self.split_time >= split::MERGE_COOLDOWN
    }

    /// Remaining share (1..0) of the launch velocity at `now`
    pub fn boost_factor(&self, now: f64) -> f32 {
        let elapsed = now - self.split_time;
        if elapsed >= split::BOOST_DURATION {
            0.0
        } else {
            (1.0 - elapsed / split::BOOST_DURATION).max(0.0) as f32
        }
    }
}

/// A player's main cell plus everything the authority tracks for the session
#[derive(Debug, Clone)]
pub struct PlayerCell {
    pub session_id: SessionId,
    pub name: String,
    /// Opaque cosmetic selection passed through to other clients
    pub cosmetic: String,
    pub position: Vec2,
    /// Normalized movement direction from the latest accepted input
    pub heading: Vec2,
    pub mass: f32,
    pub alive: bool,
    /// Simulation time until which the cell cannot be absorbed
    pub spawn_protected_until: f64,
    /// Banked score; never decreases within a session
    pub score: u64,
    pub cash_out: CashOutState,
    pub pieces: PieceList,
    /// Highest input sequence applied
    pub last_input_seq: Option<u64>,
    /// Simulation time of the spawn
    pub joined_at: f64,
    /// Display name of whoever absorbed this player
    pub eliminated_by: Option<String>,
}

impl PlayerCell {
    pub fn new(session_id: SessionId, name: String, cosmetic: String, position: Vec2, now: f64) -> Self {
        Self {
            session_id,
            name,
            cosmetic,
            position,
            heading: Vec2::ZERO,
            mass: mass::STARTING,
            alive: true,
            spawn_protected_until: now + spawn::PROTECTION_DURATION,
            score: 0,
            cash_out: CashOutState::default(),
            pieces: PieceList::new(),
            last_input_seq: None,
            joined_at: now,
            eliminated_by: None,
        }
    }

    /// Radius is always derived from mass
    pub fn radius(&self) -> f32 {
        mass_to_radius(self.mass)
    }

    pub fn is_spawn_protected(&self, now: f64) -> bool {
        now < self.spawn_protected_until
    }

    /// Mass of the main cell plus all pieces
    pub fn total_mass(&self) -> f32 {
        self.mass + self.pieces.iter().map(|p| p.mass).sum::<f32>()
    }

    pub fn piece(&self, id: EntityId) -> Option<&SplitPiece> {
        self.pieces.iter().find(|p| p.id == id)
    }
}

/// Collectible that converts into score and mass
#[derive(Debug, Clone, PartialEq)]
pub struct Coin {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    /// Palette index
    pub color: u8,
    pub value: u64,
}

/// Static hazard
#[derive(Debug, Clone, PartialEq)]
pub struct Virus {
    pub id: EntityId,
    pub position: Vec2,
    pub radius: f32,
    pub spikes: u8,
}

/// Circular play area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub center: Vec2,
    pub current_radius: f32,
    pub target_radius: f32,
    /// Maximum radius change per second
    pub transition_speed: f32,
}

impl Zone {
    pub fn new(center: Vec2, radius: f32, transition_speed: f32) -> Self {
        Self {
            center,
            current_radius: radius,
            target_radius: radius,
            transition_speed,
        }
    }

    pub fn contains(&self, position: Vec2) -> bool {
        position.distance_sq_to(self.center) <= self.current_radius * self.current_radius
    }

    /// Position pushed back onto the boundary along its radial direction,
    /// or `None` when already inside
    pub fn confine(&self, position: Vec2) -> Option<Vec2> {
        let offset = position - self.center;
        let distance = offset.length();
        if distance <= self.current_radius {
            return None;
        }
        Some(self.center + offset * (self.current_radius / distance))
    }

    /// Move `current_radius` toward `target_radius` by at most `transition_speed * dt`
    pub fn step(&mut self, dt: f32) {
        let max_step = self.transition_speed * dt;
        let diff = self.target_radius - self.current_radius;
        if diff.abs() <= max_step {
            self.current_radius = self.target_radius;
        } else {
            self.current_radius += max_step.copysign(diff);
        }
    }
}

/// Handle to a single mass-bearing cell during collision passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKey {
    Main(SessionId),
    Piece(SessionId, EntityId),
}

impl CellKey {
    pub fn owner(&self) -> SessionId {
        match self {
            CellKey::Main(owner) | CellKey::Piece(owner, _) => *owner,
        }
    }
}

/// Full authoritative state of one arena
#[derive(Debug, Clone)]
pub struct ArenaState {
    pub tick: u64,
    /// Seconds of simulated time
    pub time: f64,
    pub players: Vec<PlayerCell>,
    pub coins: Vec<Coin>,
    pub viruses: Vec<Virus>,
    pub zone: Zone,
    next_entity_id: EntityId,
}

impl ArenaState {
    pub fn new(zone: Zone) -> Self {
        Self {
            tick: 0,
            time: 0.0,
            players: Vec::new(),
            coins: Vec::new(),
            viruses: Vec::new(),
            zone,
            next_entity_id: 1,
        }
    }

    pub fn next_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn get_player(&self, id: SessionId) -> Option<&PlayerCell> {
        self.players.iter().find(|p| p.session_id == id)
    }

    pub fn get_player_mut(&mut self, id: SessionId) -> Option<&mut PlayerCell> {
        self.players.iter_mut().find(|p| p.session_id == id)
    }

    /// Remove a player together with every piece it owns
    pub fn remove_player(&mut self, id: SessionId) -> Option<PlayerCell> {
        let idx = self.players.iter().position(|p| p.session_id == id)?;
        Some(self.players.swap_remove(idx))
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    pub fn piece_count(&self) -> usize {
        self.players.iter().map(|p| p.pieces.len()).sum()
    }

    /// Position, radius and mass of a cell, if it still exists
    pub fn cell(&self, key: CellKey) -> Option<(Vec2, f32, f32)> {
        match key {
            CellKey::Main(owner) => self
                .get_player(owner)
                .map(|p| (p.position, p.radius(), p.mass)),
            CellKey::Piece(owner, id) => self
                .get_player(owner)
                .and_then(|p| p.piece(id))
                .map(|piece| (piece.position, piece.radius(), piece.mass)),
        }
    }

    /// Add mass to a cell; returns false if the cell no longer exists
    pub fn add_cell_mass(&mut self, key: CellKey, amount: f32) -> bool {
        match key {
            CellKey::Main(owner) => match self.get_player_mut(owner) {
                Some(player) => {
                    player.mass += amount;
                    true
                }
                None => false,
            },
            CellKey::Piece(owner, id) => self
                .get_player_mut(owner)
                .and_then(|p| p.pieces.iter_mut().find(|piece| piece.id == id))
                .map(|piece| piece.mass += amount)
                .is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_player(x: f32, y: f32) -> PlayerCell {
        PlayerCell::new(Uuid::new_v4(), "Tester".into(), String::new(), Vec2::new(x, y), 0.0)
    }

    #[test]
    fn test_player_radius_follows_mass() {
        let mut player = test_player(0.0, 0.0);
        let before = player.radius();
        player.mass *= 4.0;
        assert!((player.radius() - before * 2.0).abs() < 0.001);
        assert_eq!(player.radius(), mass_to_radius(player.mass));
    }

    #[test]
    fn test_spawn_protection_window() {
        let player = test_player(0.0, 0.0);
        assert!(player.is_spawn_protected(0.0));
        assert!(player.is_spawn_protected(spawn::PROTECTION_DURATION - 0.01));
        assert!(!player.is_spawn_protected(spawn::PROTECTION_DURATION));
    }

    #[test]
    fn test_piece_boost_decays_over_one_second() {
        let piece = SplitPiece::new(1, Vec2::ZERO, Vec2::new(100.0, 0.0), 20.0, 10.0);
        assert!((piece.boost_factor(10.0) - 1.0).abs() < 1e-6);
        assert!((piece.boost_factor(10.5) - 0.5).abs() < 1e-6);
        assert_eq!(piece.boost_factor(11.0), 0.0);
        assert_eq!(piece.boost_factor(40.0), 0.0);
    }

    #[test]
    fn test_piece_merge_ready_after_cooldown() {
        let piece = SplitPiece::new(1, Vec2::ZERO, Vec2::ZERO, 20.0, 5.0);
        assert!(!piece.merge_ready_at(5.0 + split::MERGE_COOLDOWN - 0.001));
        assert!(piece.merge_ready_at(5.0 + split::MERGE_COOLDOWN));
    }

    #[test]
    fn test_zone_confine_projects_onto_boundary() {
        let zone = Zone::new(Vec2::new(100.0, 100.0), 50.0, 10.0);
        assert_eq!(zone.confine(Vec2::new(120.0, 100.0)), None);

        let clamped = zone.confine(Vec2::new(100.0, 300.0)).unwrap();
        assert!(clamped.approx_eq(Vec2::new(100.0, 150.0), 1e-4));
        assert!((clamped.distance_to(zone.center) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_zone_step_is_rate_limited() {
        let mut zone = Zone::new(Vec2::ZERO, 1000.0, 30.0);
        zone.target_radius = 500.0;
        zone.step(1.0);
        assert!((zone.current_radius - 970.0).abs() < 1e-3);

        zone.target_radius = 980.0;
        zone.step(1.0);
        assert!((zone.current_radius - 980.0).abs() < 1e-3, "should land exactly on target");
    }

    #[test]
    fn test_remove_player_takes_pieces() {
        let mut state = ArenaState::new(Zone::new(Vec2::ZERO, 1000.0, 10.0));
        let mut player = test_player(0.0, 0.0);
        let id = player.session_id;
        let piece_id = state.next_entity_id();
        player.pieces.push(SplitPiece::new(piece_id, Vec2::ZERO, Vec2::ZERO, 10.0, 0.0));
        state.players.push(player);

        assert_eq!(state.piece_count(), 1);
        let removed = state.remove_player(id).unwrap();
        assert_eq!(removed.pieces.len(), 1);
        assert_eq!(state.piece_count(), 0);
        assert!(state.cell(CellKey::Piece(id, piece_id)).is_none());
    }

    #[test]
    fn test_add_cell_mass() {
        let mut state = ArenaState::new(Zone::new(Vec2::ZERO, 1000.0, 10.0));
        let player = test_player(0.0, 0.0);
        let id = player.session_id;
        state.players.push(player);

        assert!(state.add_cell_mass(CellKey::Main(id), 5.0));
        assert_eq!(state.get_player(id).unwrap().mass, mass::STARTING + 5.0);
        assert!(!state.add_cell_mass(CellKey::Piece(id, 99), 5.0));
    }
}
