//! Cell-vs-cell absorption and player elimination

use crate::game::constants::eat;
use crate::game::state::{ArenaState, CellKey, SessionId};
use crate::util::vec2::Vec2;

/// Terminal result for a player whose main cell was absorbed
#[derive(Debug, Clone, PartialEq)]
pub struct Elimination {
    pub victim: SessionId,
    pub eliminator: SessionId,
    pub eliminator_name: String,
    pub final_score: u64,
    pub final_mass: f32,
}

/// Whether an eater cell can absorb a victim cell
///
/// The eater must outweigh the victim by `eat::MASS_RATIO` and the victim
/// must sit deep enough inside it (`eat::OVERLAP_RATIO` of its radius).
pub fn can_absorb(
    eater_pos: Vec2,
    eater_mass: f32,
    eater_radius: f32,
    victim_pos: Vec2,
    victim_mass: f32,
    victim_radius: f32,
) -> bool {
    if eater_mass < victim_mass * eat::MASS_RATIO {
        return false;
    }
    eater_pos.distance_to(victim_pos) + victim_radius * eat::OVERLAP_RATIO < eater_radius
}

struct Candidate {
    key: CellKey,
    position: Vec2,
    mass: f32,
    protected: bool,
    consumed: bool,
}

/// Resolve all absorptions for this tick
///
/// Cells are processed largest first; a consumed cell can no longer eat.
/// Absorbing a main cell consumes all of that player's pieces too. Cells of
/// the same owner never absorb each other and spawn-protected players
/// cannot be absorbed.
pub fn resolve_absorptions(state: &mut ArenaState) -> Vec<Elimination> {
    let now = state.time;
    let mut cells: Vec<Candidate> = Vec::new();
    for p in state.players.iter().filter(|p| p.alive) {
        let protected = p.is_spawn_protected(now);
        cells.push(Candidate {
            key: CellKey::Main(p.session_id),
            position: p.position,
            mass: p.mass,
            protected,
            consumed: false,
        });
        for piece in &p.pieces {
            cells.push(Candidate {
                key: CellKey::Piece(p.session_id, piece.id),
                position: piece.position,
                mass: piece.mass,
                protected,
                consumed: false,
            });
        }
    }
    if cells.len() < 2 {
        return Vec::new();
    }

    cells.sort_by(|a, b| b.mass.total_cmp(&a.mass));

    // (eater, victim, victim mass)
    let mut absorbed: Vec<(CellKey, CellKey, f32)> = Vec::new();
    for i in 0..cells.len() {
        if cells[i].consumed {
            continue;
        }
        for j in 0..cells.len() {
            if i == j || cells[j].consumed || cells[j].protected {
                continue;
            }
            if cells[i].key.owner() == cells[j].key.owner() {
                continue;
            }
            let (eater, victim) = (&cells[i], &cells[j]);
            let eater_radius = crate::game::constants::mass_to_radius(eater.mass);
            let victim_radius = crate::game::constants::mass_to_radius(victim.mass);
            if can_absorb(
                eater.position,
                eater.mass,
                eater_radius,
                victim.position,
                victim.mass,
                victim_radius,
            ) {
                let victim_mass = victim.mass;
                let victim_key = victim.key;
                absorbed.push((cells[i].key, victim_key, victim_mass));
                cells[i].mass += victim_mass;
                cells[j].consumed = true;
                // A dead player's pieces dissolve with it and eat nothing more
                if let CellKey::Main(owner) = victim_key {
                    for cell in cells.iter_mut().filter(|c| c.key.owner() == owner) {
                        cell.consumed = true;
                    }
                }
            }
        }
    }

    let mut eliminations = Vec::new();
    for (eater, victim, victim_mass) in absorbed {
        if !state.add_cell_mass(eater, victim_mass) {
            continue;
        }
        let eater_name = match state.get_player_mut(eater.owner()) {
            Some(owner) => {
                owner.score += victim_mass.round() as u64;
                owner.name.clone()
            }
            None => continue,
        };

        match victim {
            CellKey::Piece(owner, piece_id) => {
                if let Some(player) = state.get_player_mut(owner) {
                    player.pieces.retain(|p| p.id != piece_id);
                }
            }
            CellKey::Main(owner) => {
                if let Some(player) = state.get_player_mut(owner) {
                    let final_mass = player.total_mass();
                    player.alive = false;
                    player.heading = Vec2::ZERO;
                    player.pieces.clear();
                    player.cash_out.reset();
                    player.eliminated_by = Some(eater_name.clone());
                    eliminations.push(Elimination {
                        victim: owner,
                        eliminator: eater.owner(),
                        eliminator_name: eater_name,
                        final_score: player.score,
                        final_mass,
                    });
                }
            }
        }
    }

    eliminations
}
