//! Splitting and merging of Player-Cells

use crate::game::constants::split;
use crate::game::state::{ArenaState, EntityId, SessionId, SplitPiece};
use crate::util::vec2::Vec2;

/// Split half of the owner's mass into a new piece launched toward `target`
///
/// Accepted only if the owner is alive, has at least `split::MIN_MASS` and
/// owns fewer than `split::MAX_PIECES` pieces. Returns the new piece id.
pub fn try_split(state: &mut ArenaState, session_id: SessionId, target: Vec2) -> Option<EntityId> {
    if !target.is_finite() {
        return None;
    }

    let eligible = state.get_player(session_id).is_some_and(|p| {
        p.alive && p.mass >= split::MIN_MASS && p.pieces.len() < split::MAX_PIECES
    });
    if !eligible {
        return None;
    }

    let piece_id = state.next_entity_id();
    let now = state.time;
    let player = state.get_player_mut(session_id)?;

    let mut direction = (target - player.position).normalize();
    if direction == Vec2::ZERO {
        direction = if player.heading == Vec2::ZERO {
            Vec2::new(1.0, 0.0)
        } else {
            player.heading.normalize()
        };
    }

    let half = player.mass / 2.0;
    player.mass = half;
    let spawn_at = player.position + direction * player.radius();
    player.pieces.push(SplitPiece::new(
        piece_id,
        spawn_at,
        direction * split::LAUNCH_SPEED,
        half,
        now,
    ));
    Some(piece_id)
}

/// Refresh `can_merge` on every piece
pub fn update_merge_flags(state: &mut ArenaState) {
    let now = state.time;
    for player in state.players.iter_mut() {
        for piece in player.pieces.iter_mut() {
            piece.can_merge = piece.merge_ready_at(now);
        }
    }
}

/// Merge eligible pieces into their owner, or into another eligible piece of
/// the same owner, when they overlap. Returns `(owner, absorbed piece)` pairs.
pub fn resolve_merges(state: &mut ArenaState) -> Vec<(SessionId, EntityId)> {
    let mut merged = Vec::new();

    for player in state.players.iter_mut() {
        if !player.alive || player.pieces.is_empty() {
            continue;
        }

        // Pieces into the owner
        let mut i = 0;
        while i < player.pieces.len() {
            let piece = &player.pieces[i];
            let reach = player.radius().max(piece.radius());
            if piece.can_merge && piece.position.distance_to(player.position) < reach {
                let piece = player.pieces.remove(i);
                player.mass += piece.mass;
                merged.push((player.session_id, piece.id));
            } else {
                i += 1;
            }
        }

        // Remaining eligible pieces into each other
        let mut i = 0;
        while i < player.pieces.len() {
            let mut j = i + 1;
            while j < player.pieces.len() {
                let (a, b) = (&player.pieces[i], &player.pieces[j]);
                let reach = a.radius().max(b.radius());
                if a.can_merge && b.can_merge && a.position.distance_to(b.position) < reach {
                    let absorbed = player.pieces.remove(j);
                    player.pieces[i].mass += absorbed.mass;
                    merged.push((player.session_id, absorbed.id));
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    merged
}
