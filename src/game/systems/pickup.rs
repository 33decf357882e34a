//! Coin pickups
//!
//! Candidate (coin, cell) pairs are gathered in parallel against a spatial
//! grid of coins; claims are then resolved sequentially in a fixed order so
//! each coin is credited to exactly one cell.

use bitvec::prelude::*;
use rayon::prelude::*;

use crate::game::spatial::SpatialGrid;
use crate::game::state::{ArenaState, CellKey, EntityId, SessionId};
use crate::util::vec2::Vec2;

/// A coin credited to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinPickup {
    pub session_id: SessionId,
    pub coin_id: EntityId,
    pub value: u64,
}

/// Absorb every coin whose centre lies within a cell's radius
pub fn collect_coins(state: &mut ArenaState, grid: &mut SpatialGrid<usize>) -> Vec<CoinPickup> {
    if state.coins.is_empty() {
        return Vec::new();
    }

    grid.rebuild(state.coins.iter().enumerate().map(|(idx, coin)| (idx, coin.position)));

    let cells: Vec<(CellKey, Vec2, f32)> = state
        .players
        .iter()
        .filter(|p| p.alive)
        .flat_map(|p| {
            std::iter::once((CellKey::Main(p.session_id), p.position, p.radius())).chain(
                p.pieces
                    .iter()
                    .map(move |piece| (CellKey::Piece(p.session_id, piece.id), piece.position, piece.radius())),
            )
        })
        .collect();

    let grid_ref = &*grid;
    let mut claims: Vec<(usize, usize)> = cells
        .par_iter()
        .enumerate()
        .flat_map_iter(|(cell_idx, (_, position, radius))| {
            grid_ref
                .query_radius(*position, *radius)
                .map(move |coin_idx| (coin_idx, cell_idx))
        })
        .collect();
    claims.sort_unstable();

    let mut consumed = bitvec![0; state.coins.len()];
    let mut pickups = Vec::new();

    for (coin_idx, cell_idx) in claims {
        if consumed[coin_idx] {
            continue;
        }
        consumed.set(coin_idx, true);

        let key = cells[cell_idx].0;
        let coin = &state.coins[coin_idx];
        let (coin_id, value) = (coin.id, coin.value);

        state.add_cell_mass(key, value as f32);
        if let Some(owner) = state.get_player_mut(key.owner()) {
            owner.score += value;
        }
        pickups.push(CoinPickup {
            session_id: key.owner(),
            coin_id,
            value,
        });
    }

    if !pickups.is_empty() {
        let mut idx = 0;
        state.coins.retain(|_| {
            let keep = !consumed[idx];
            idx += 1;
            keep
        });
    }

    pickups
}
