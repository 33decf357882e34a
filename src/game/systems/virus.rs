//! Virus hazards
//!
//! A cell at or above `virus::TRIGGER_MASS` whose radius covers a virus
//! centre consumes the virus and bursts into split pieces.

use crate::game::constants::{split, virus};
use crate::game::state::{ArenaState, CellKey, EntityId, SessionId, SplitPiece};
use crate::util::vec2::Vec2;

/// One virus consumed by one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirusBurst {
    pub session_id: SessionId,
    pub virus_id: EntityId,
    /// Pieces created by the burst (may be 0 at the split cap)
    pub pieces: usize,
}

/// Find the first triggering cell for each virus, in player order
fn find_triggers(state: &ArenaState) -> Vec<(EntityId, CellKey)> {
    let mut triggers = Vec::new();
    for v in &state.viruses {
        let hit = state.players.iter().filter(|p| p.alive).find_map(|p| {
            let covers = |position: Vec2, cell_mass: f32, radius: f32| {
                cell_mass >= virus::TRIGGER_MASS && position.distance_to(v.position) < radius
            };
            if covers(p.position, p.mass, p.radius()) {
                return Some(CellKey::Main(p.session_id));
            }
            p.pieces
                .iter()
                .find(|piece| covers(piece.position, piece.mass, piece.radius()))
                .map(|piece| CellKey::Piece(p.session_id, piece.id))
        });
        if let Some(key) = hit {
            triggers.push((v.id, key));
        }
    }
    triggers
}

/// Resolve every virus collision for this tick
pub fn resolve_virus_bursts(state: &mut ArenaState) -> Vec<VirusBurst> {
    let triggers = find_triggers(state);
    let mut bursts = Vec::with_capacity(triggers.len());

    for (virus_id, key) in triggers {
        let Some((position, _, cell_mass)) = state.cell(key) else {
            continue;
        };
        // An earlier burst this tick may already have shrunk the cell
        if cell_mass < virus::TRIGGER_MASS {
            continue;
        }

        let owner = key.owner();
        let free_slots = state
            .get_player(owner)
            .map(|p| split::MAX_PIECES.saturating_sub(p.pieces.len()))
            .unwrap_or(0);
        let count = virus::BURST_PIECES.min(free_slots);
        let share = cell_mass / (count as f32 + 1.0);
        let now = state.time;
        let ids: Vec<EntityId> = (0..count).map(|_| state.next_entity_id()).collect();

        state.viruses.retain(|v| v.id != virus_id);

        let Some(player) = state.get_player_mut(owner) else {
            continue;
        };
        match key {
            CellKey::Main(_) => player.mass = share,
            CellKey::Piece(_, piece_id) => {
                if let Some(piece) = player.pieces.iter_mut().find(|p| p.id == piece_id) {
                    piece.mass = share;
                }
            }
        }
        for (i, id) in ids.into_iter().enumerate() {
            let angle = i as f32 / count as f32 * std::f32::consts::TAU;
            let direction = Vec2::from_angle(angle);
            player.pieces.push(SplitPiece::new(
                id,
                position,
                direction * split::LAUNCH_SPEED,
                share,
                now,
            ));
        }

        bursts.push(VirusBurst {
            session_id: owner,
            virus_id,
            pieces: count,
        });
    }

    bursts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{PlayerCell, Virus, Zone};
    use uuid::Uuid;

    fn setup(mass: f32) -> (ArenaState, SessionId) {
        let mut state = ArenaState::new(Zone::new(Vec2::ZERO, 5000.0, 10.0));
        let id = Uuid::new_v4();
        let mut player = PlayerCell::new(id, "Big".into(), String::new(), Vec2::ZERO, 0.0);
        player.mass = mass;
        state.players.push(player);
        let virus_id = state.next_entity_id();
        state.viruses.push(Virus {
            id: virus_id,
            position: Vec2::new(5.0, 0.0),
            radius: virus::RADIUS,
            spikes: 16,
        });
        (state, id)
    }

    #[test]
    fn test_small_cell_passes_over_virus() {
        let (mut state, id) = setup(virus::TRIGGER_MASS - 1.0);
        assert!(resolve_virus_bursts(&mut state).is_empty());
        assert_eq!(state.viruses.len(), 1);
        assert!(state.get_player(id).unwrap().pieces.is_empty());
    }

    #[test]
    fn test_large_cell_bursts_and_conserves_mass() {
        let (mut state, id) = setup(700.0);
        let bursts = resolve_virus_bursts(&mut state);

        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].pieces, virus::BURST_PIECES);
        assert!(state.viruses.is_empty(), "virus consumed");

        let player = state.get_player(id).unwrap();
        assert_eq!(player.pieces.len(), virus::BURST_PIECES);
        assert!((player.total_mass() - 700.0).abs() < 1e-2);
        assert!(player.pieces.iter().all(|p| !p.can_merge));
    }

    #[test]
    fn test_burst_respects_piece_cap() {
        let (mut state, id) = setup(700.0);
        {
            let player = state.get_player_mut(id).unwrap();
            for i in 0..(split::MAX_PIECES - 2) {
                player
                    .pieces
                    .push(SplitPiece::new(1000 + i as u64, Vec2::new(3000.0, 0.0), Vec2::ZERO, 10.0, 0.0));
            }
        }

        let bursts = resolve_virus_bursts(&mut state);
        assert_eq!(bursts[0].pieces, 2);
        assert_eq!(state.get_player(id).unwrap().pieces.len(), split::MAX_PIECES);
    }
}
