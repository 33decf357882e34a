//! Play zone: radius transitions, containment and population
//!
//! The zone radius eases toward a target derived from the alive player
//! count. Anything beyond the current radius is pushed back onto the
//! boundary along its radial direction. Coins and viruses are topped up
//! at random points inside the zone.

use rand::Rng;

use crate::config::ArenaConfig;
use crate::game::constants::{coin, spawn, virus};
use crate::game::state::{ArenaState, Coin, Virus, Zone};
use crate::util::vec2::Vec2;

/// Target radius for the given number of alive players
pub fn target_radius(config: &ArenaConfig, alive_players: usize) -> f32 {
    let wanted = config.zone_min_radius + config.zone_radius_per_player * alive_players as f32;
    wanted.clamp(config.zone_min_radius, config.zone_max_radius)
}

/// Retarget and step the zone; `override_target` replaces the player-count rule
pub fn update_zone(state: &mut ArenaState, config: &ArenaConfig, override_target: Option<f32>, dt: f32) {
    let target = override_target.unwrap_or_else(|| target_radius(config, state.alive_count()));
    state.zone.target_radius = target.max(0.0);
    state.zone.step(dt);
}

/// Clamp every entity beyond the current radius onto the boundary.
/// Returns the number of entities moved.
pub fn enforce_containment(state: &mut ArenaState) -> usize {
    let zone = state.zone;
    let mut clamped = 0;

    let mut confine = |position: &mut Vec2| {
        if let Some(on_edge) = zone.confine(*position) {
            *position = on_edge;
            clamped += 1;
        }
    };

    for player in state.players.iter_mut().filter(|p| p.alive) {
        confine(&mut player.position);
        for piece in player.pieces.iter_mut() {
            confine(&mut piece.position);
        }
    }
    for c in state.coins.iter_mut() {
        confine(&mut c.position);
    }
    for v in state.viruses.iter_mut() {
        confine(&mut v.position);
    }

    clamped
}

/// Uniformly distributed point inside `fraction` of the current zone radius
pub fn random_point_in_zone<R: Rng>(zone: &Zone, fraction: f32, rng: &mut R) -> Vec2 {
    let radius = zone.current_radius * fraction.clamp(0.0, 1.0);
    let angle = rng.gen_range(0.0..std::f32::consts::TAU);
    let distance = radius * rng.gen::<f32>().sqrt();
    zone.center + Vec2::from_angle(angle) * distance
}

/// Pick a spawn point inside the zone, preferring one clear of other players
pub fn spawn_position<R: Rng>(state: &ArenaState, rng: &mut R) -> Vec2 {
    let mut best = state.zone.center;
    let mut best_clearance = f32::MIN;

    for _ in 0..spawn::MAX_SPAWN_ATTEMPTS {
        let candidate = random_point_in_zone(&state.zone, spawn::ZONE_FRACTION, rng);
        let clearance = state
            .players
            .iter()
            .filter(|p| p.alive)
            .map(|p| candidate.distance_to(p.position) - p.radius())
            .fold(f32::MAX, f32::min);

        if clearance >= spawn::SAFE_DISTANCE {
            return candidate;
        }
        if clearance > best_clearance {
            best_clearance = clearance;
            best = candidate;
        }
    }

    best
}

/// Top coins and viruses up to the configured population.
/// Returns `(coins added, viruses added)`.
pub fn replenish<R: Rng>(state: &mut ArenaState, config: &ArenaConfig, rng: &mut R) -> (usize, usize) {
    let coins_missing = config.coin_count.saturating_sub(state.coins.len());
    for _ in 0..coins_missing {
        let id = state.next_entity_id();
        let position = random_point_in_zone(&state.zone, 1.0, rng);
        state.coins.push(Coin {
            id,
            position,
            radius: coin::RADIUS,
            color: rng.gen_range(0..coin::PALETTE_SIZE),
            value: coin::VALUE,
        });
    }

    let viruses_missing = config.virus_count.saturating_sub(state.viruses.len());
    for _ in 0..viruses_missing {
        let id = state.next_entity_id();
        let position = random_point_in_zone(&state.zone, spawn::ZONE_FRACTION, rng);
        state.viruses.push(Virus {
            id,
            position,
            radius: virus::RADIUS,
            spikes: rng.gen_range(virus::MIN_SPIKES..=virus::MAX_SPIKES),
        });
    }

    (coins_missing, viruses_missing)
}
