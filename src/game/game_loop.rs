//! Authoritative arena simulation
//!
//! `GameLoop` is the single writer of an arena's `ArenaState`. Commands are
//! applied between ticks; `tick` advances the world in a fixed order and
//! returns the events it produced.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::ArenaConfig;
use crate::game::constants::coin;
use crate::game::spatial::SpatialGrid;
use crate::game::state::{ArenaState, EntityId, PlayerCell, SessionId, Zone};
use crate::game::systems::{cashout, collision, physics, pickup, split, virus, zone};
use crate::util::vec2::Vec2;

/// Events emitted by the simulation
#[derive(Debug, Clone, PartialEq)]
pub enum GameLoopEvent {
    PlayerSpawned {
        session_id: SessionId,
        position: Vec2,
    },
    CoinCollected {
        session_id: SessionId,
        coin_id: EntityId,
        value: u64,
    },
    PieceMerged {
        session_id: SessionId,
        piece_id: EntityId,
    },
    VirusBurst {
        session_id: SessionId,
        virus_id: EntityId,
        pieces: usize,
    },
    PlayerEliminated {
        session_id: SessionId,
        eliminator_id: SessionId,
        eliminated_by: String,
        final_score: u64,
        final_mass: f32,
    },
    CashOutCompleted {
        session_id: SessionId,
        final_score: u64,
        final_mass: f32,
    },
}

/// One arena's simulation
#[derive(Clone)]
pub struct GameLoop {
    state: ArenaState,
    config: ArenaConfig,
    rng: StdRng,
    coin_grid: SpatialGrid<usize>,
    zone_override: Option<f32>,
    pending: Vec<GameLoopEvent>,
}

impl GameLoop {
    pub fn new(config: ArenaConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic spawn and population placement
    pub fn with_seed(config: ArenaConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ArenaConfig, mut rng: StdRng) -> Self {
        let radius = zone::target_radius(&config, 0);
        let mut state = ArenaState::new(Zone::new(Vec2::ZERO, radius, config.zone_transition_speed));
        zone::replenish(&mut state, &config, &mut rng);

        Self {
            state,
            config,
            rng,
            coin_grid: SpatialGrid::new(coin::GRID_CELL_SIZE),
            zone_override: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ArenaState {
        &mut self.state
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Spawn a Player-Cell inside the zone. An existing cell with the same
    /// session id is replaced.
    pub fn spawn_player(&mut self, session_id: SessionId, name: String, cosmetic: String) -> Vec2 {
        self.state.remove_player(session_id);

        let position = zone::spawn_position(&self.state, &mut self.rng);
        let player = PlayerCell::new(session_id, name, cosmetic, position, self.state.time);
        self.state.players.push(player);

        self.pending.push(GameLoopEvent::PlayerSpawned {
            session_id,
            position,
        });
        position
    }

    /// Remove a Player-Cell and every piece it owns
    pub fn remove_player(&mut self, session_id: SessionId) -> Option<PlayerCell> {
        self.state.remove_player(session_id)
    }

    pub fn apply_input(&mut self, session_id: SessionId, seq: u64, direction: Vec2) -> bool {
        physics::apply_input(&mut self.state, session_id, seq, direction)
    }

    pub fn apply_split(&mut self, session_id: SessionId, target: Vec2) -> Option<EntityId> {
        split::try_split(&mut self.state, session_id, target)
    }

    pub fn set_cash_out_intent(&mut self, session_id: SessionId, active: bool) -> bool {
        cashout::set_intent(&mut self.state, session_id, active)
    }

    /// Pin the zone target radius, or return to the player-count rule with `None`
    pub fn set_zone_target(&mut self, radius: Option<f32>) {
        self.zone_override = radius.filter(|r| r.is_finite());
    }

    /// Advance the world by `dt` seconds
    pub fn tick(&mut self, dt: f32) -> Vec<GameLoopEvent> {
        let mut events = std::mem::take(&mut self.pending);

        self.state.tick += 1;
        self.state.time += dt as f64;

        zone::update_zone(&mut self.state, &self.config, self.zone_override, dt);
        physics::update(&mut self.state, dt);
        split::update_merge_flags(&mut self.state);

        for p in pickup::collect_coins(&mut self.state, &mut self.coin_grid) {
            events.push(GameLoopEvent::CoinCollected {
                session_id: p.session_id,
                coin_id: p.coin_id,
                value: p.value,
            });
        }

        for b in virus::resolve_virus_bursts(&mut self.state) {
            events.push(GameLoopEvent::VirusBurst {
                session_id: b.session_id,
                virus_id: b.virus_id,
                pieces: b.pieces,
            });
        }

        for e in collision::resolve_absorptions(&mut self.state) {
            events.push(GameLoopEvent::PlayerEliminated {
                session_id: e.victim,
                eliminator_id: e.eliminator,
                eliminated_by: e.eliminator_name,
                final_score: e.final_score,
                final_mass: e.final_mass,
            });
        }

        for (session_id, piece_id) in split::resolve_merges(&mut self.state) {
            events.push(GameLoopEvent::PieceMerged {
                session_id,
                piece_id,
            });
        }

        zone::enforce_containment(&mut self.state);

        // Completed cash-outs leave the arena
        let progress = self.config.cash_out_progress_per_tick();
        for c in cashout::advance(&mut self.state, progress) {
            self.state.remove_player(c.session_id);
            events.push(GameLoopEvent::CashOutCompleted {
                session_id: c.session_id,
                final_score: c.final_score,
                final_mass: c.final_mass,
            });
        }

        zone::replenish(&mut self.state, &self.config, &mut self.rng);

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::mass_to_radius;
    use crate::game::state::Coin;
    use uuid::Uuid;

    fn empty_config() -> ArenaConfig {
        ArenaConfig {
            coin_count: 0,
            virus_count: 0,
            ..ArenaConfig::default()
        }
    }

    fn eliminations(events: &[GameLoopEvent]) -> Vec<&GameLoopEvent> {
        events
            .iter()
            .filter(|e| matches!(e, GameLoopEvent::PlayerEliminated { .. }))
            .collect()
    }

    #[test]
    fn test_new_arena_is_populated() {
        let config = ArenaConfig {
            coin_count: 50,
            virus_count: 5,
            ..ArenaConfig::default()
        };
        let game = GameLoop::with_seed(config, 1);
        assert_eq!(game.state().coins.len(), 50);
        assert_eq!(game.state().viruses.len(), 5);
        assert_eq!(game.state().zone.current_radius, game.config().zone_min_radius);
    }

    #[test]
    fn test_spawn_inside_zone_and_reported() {
        let mut game = GameLoop::with_seed(empty_config(), 2);
        let id = Uuid::new_v4();
        let position = game.spawn_player(id, "Newbie".into(), "skin-3".into());
        assert!(game.state().zone.contains(position));

        let events = game.tick(1.0 / 30.0);
        assert!(events.contains(&GameLoopEvent::PlayerSpawned {
            session_id: id,
            position
        }));
        assert_eq!(game.state().get_player(id).unwrap().cosmetic, "skin-3");
    }

    #[test]
    fn test_radius_follows_mass_every_tick() {
        let config = ArenaConfig {
            coin_count: 300,
            virus_count: 6,
            ..ArenaConfig::default()
        };
        let mut game = GameLoop::with_seed(config, 3);
        let ids: Vec<_> = (0..6).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            game.spawn_player(*id, format!("P{}", i), String::new());
            game.apply_input(*id, 1, Vec2::from_angle(i as f32));
        }

        for _ in 0..120 {
            game.tick(1.0 / 30.0);
            for p in &game.state().players {
                assert_eq!(p.radius(), mass_to_radius(p.mass));
                for piece in &p.pieces {
                    assert_eq!(piece.radius(), mass_to_radius(piece.mass));
                }
            }
        }
    }

    #[test]
    fn test_elimination_event_delivered_once() {
        let mut game = GameLoop::with_seed(empty_config(), 4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        game.spawn_player(a, "Alpha".into(), String::new());
        game.spawn_player(b, "Beta".into(), String::new());
        for (id, m) in [(a, 100.0), (b, 40.0)] {
            let p = game.state_mut().get_player_mut(id).unwrap();
            p.mass = m;
            p.position = Vec2::new(10.0, 10.0);
            p.spawn_protected_until = 0.0;
        }

        let events = game.tick(1.0 / 30.0);
        let found = eliminations(&events);
        assert_eq!(found.len(), 1);
        match found[0] {
            GameLoopEvent::PlayerEliminated {
                session_id,
                eliminator_id,
                eliminated_by,
                ..
            } => {
                assert_eq!(*session_id, b);
                assert_eq!(*eliminator_id, a);
                assert_eq!(eliminated_by, "Alpha");
            }
            _ => unreachable!(),
        }
        assert_eq!(game.state().get_player(a).unwrap().mass, 140.0);
        assert!(!game.state().get_player(b).unwrap().alive);

        for _ in 0..30 {
            assert!(eliminations(&game.tick(1.0 / 30.0)).is_empty());
        }
    }

    #[test]
    fn test_cash_out_completes_once_and_leaves() {
        let mut game = GameLoop::with_seed(empty_config(), 5);
        let id = Uuid::new_v4();
        game.spawn_player(id, "Banker".into(), String::new());
        game.state_mut().get_player_mut(id).unwrap().score = 17;
        assert!(game.set_cash_out_intent(id, true));

        let ticks = (game.config().cash_out_duration_secs * game.config().tick_rate as f32) as usize;
        let mut completed = Vec::new();
        for _ in 0..ticks + 60 {
            for e in game.tick(1.0 / 30.0) {
                if let GameLoopEvent::CashOutCompleted { final_score, .. } = e {
                    completed.push(final_score);
                }
            }
        }

        assert_eq!(completed, vec![17]);
        assert!(game.state().get_player(id).is_none());
    }

    #[test]
    fn test_entities_outside_zone_clamped_after_tick() {
        let mut game = GameLoop::with_seed(empty_config(), 6);
        let id = Uuid::new_v4();
        game.spawn_player(id, "Wanderer".into(), String::new());
        game.state_mut().get_player_mut(id).unwrap().position = Vec2::new(0.0, 9000.0);
        let coin_id = game.state_mut().next_entity_id();
        game.state_mut().coins.push(Coin {
            id: coin_id,
            position: Vec2::new(-7000.0, 0.0),
            radius: coin::RADIUS,
            color: 0,
            value: coin::VALUE,
        });

        game.tick(1.0 / 30.0);
        let radius = game.state().zone.current_radius;
        let player = game.state().get_player(id).unwrap();
        assert!((player.position.length() - radius).abs() < 1e-2);
        assert!(player.position.x.abs() < 1e-3, "radial direction kept");
        assert!((game.state().coins[0].position.length() - radius).abs() < 1e-2);
    }

    #[test]
    fn test_zone_override() {
        let mut game = GameLoop::with_seed(empty_config(), 7);
        game.set_zone_target(Some(500.0));
        let before = game.state().zone.current_radius;
        game.tick(1.0);
        let after = game.state().zone.current_radius;
        assert_eq!(game.state().zone.target_radius, 500.0);
        assert!((before - after - game.config().zone_transition_speed).abs() < 1e-3);
    }

    #[test]
    fn test_idle_player_never_moves() {
        let mut game = GameLoop::with_seed(empty_config(), 8);
        let id = Uuid::new_v4();
        let spawn = game.spawn_player(id, "Idle".into(), String::new());
        for _ in 0..90 {
            game.tick(1.0 / 30.0);
        }
        assert_eq!(game.state().get_player(id).unwrap().position, spawn);
    }
}
