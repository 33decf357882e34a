use rayon::prelude::*;

use crate::game::constants::{speed_for_mass, split};
use crate::game::state::{ArenaState, SessionId};
use crate::util::vec2::Vec2;

/// Integrate every alive cell and its pieces for one tick
///
/// Main cells move along their heading at a mass-dependent speed. Pieces
/// follow the same heading, carry their decaying launch velocity for the
/// first second after a split, and drift toward the owner once they are
/// merge-eligible.
pub fn update(state: &mut ArenaState, dt: f32) {
    let now = state.time;

    state.players.par_iter_mut().for_each(|player| {
        if !player.alive {
            return;
        }

        player.position += player.heading * speed_for_mass(player.mass) * dt;

        let owner_position = player.position;
        let heading = player.heading;
        for piece in player.pieces.iter_mut() {
            let mut velocity = heading * speed_for_mass(piece.mass);
            velocity += piece.velocity * piece.boost_factor(now);
            if piece.can_merge {
                velocity += (owner_position - piece.position).normalize() * split::MERGE_PULL_SPEED;
            }
            piece.position += velocity * dt;
        }
    });
}

/// Apply a movement input
///
/// Returns false (and leaves state untouched) when the session is unknown or
/// dead, the vector is not finite, or `seq` does not exceed the last applied
/// sequence for the session.
pub fn apply_input(state: &mut ArenaState, session_id: SessionId, seq: u64, direction: Vec2) -> bool {
    if !direction.is_finite() {
        return false;
    }

    let player = match state.get_player_mut(session_id) {
        Some(p) if p.alive => p,
        _ => return false,
    };

    if matches!(player.last_input_seq, Some(last) if seq <= last) {
        return false;
    }

    player.last_input_seq = Some(seq);
    player.heading = direction.clamp_length(1.0);
    true
}
