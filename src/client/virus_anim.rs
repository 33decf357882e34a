use hashbrown::HashMap;
use std::f32::consts::TAU;

use crate::game::constants::client::{VIRUS_EVICT_AFTER, VIRUS_PULSE_SPEED, VIRUS_ROTATION_SPEED};
use crate::game::state::EntityId;
use crate::net::protocol::VirusSnapshot;

/// Cosmetic animation phase of one virus. Never fed back to the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirusPhase {
    pub rotation: f32,
    pub pulse: f32,
    missing: u32,
}

impl VirusPhase {
    /// Starting phase from the static position so neighbours do not spin
    /// in lockstep
    fn seeded(virus: &VirusSnapshot) -> Self {
        let seed = virus.position.x * 0.013 + virus.position.y * 0.007;
        Self {
            rotation: seed.rem_euclid(TAU),
            pulse: (seed * 3.0).rem_euclid(TAU),
            missing: 0,
        }
    }
}

/// Per-virus animation cache keyed by entity id
#[derive(Debug, Default)]
pub struct VirusAnimations {
    phases: HashMap<EntityId, VirusPhase>,
}

impl VirusAnimations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile with the viruses in a snapshot. Entries absent for more
    /// than `VIRUS_EVICT_AFTER` snapshots are dropped.
    pub fn sync(&mut self, viruses: &[VirusSnapshot]) {
        for phase in self.phases.values_mut() {
            phase.missing += 1;
        }
        for virus in viruses {
            self.phases
                .entry(virus.id)
                .and_modify(|p| p.missing = 0)
                .or_insert_with(|| VirusPhase::seeded(virus));
        }
        self.phases.retain(|_, p| p.missing <= VIRUS_EVICT_AFTER);
    }

    /// Advance every phase by one frame
    pub fn advance(&mut self, dt: f32) {
        for phase in self.phases.values_mut() {
            phase.rotation = (phase.rotation + VIRUS_ROTATION_SPEED * dt).rem_euclid(TAU);
            phase.pulse = (phase.pulse + VIRUS_PULSE_SPEED * dt).rem_euclid(TAU);
        }
    }

    pub fn phase(&self, id: EntityId) -> Option<VirusPhase> {
        self.phases.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn clear(&mut self) {
        self.phases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec2::Vec2;

    fn virus(id: EntityId, x: f32) -> VirusSnapshot {
        VirusSnapshot {
            id,
            position: Vec2::new(x, 0.0),
            radius: 45.0,
            spikes: 16,
        }
    }

    #[test]
    fn test_phase_persists_across_snapshots() {
        let mut anim = VirusAnimations::new();
        anim.sync(&[virus(1, 100.0)]);
        anim.advance(0.5);
        let before = anim.phase(1).unwrap();

        anim.sync(&[virus(1, 100.0)]);
        assert_eq!(anim.phase(1).unwrap().rotation, before.rotation);
    }

    #[test]
    fn test_evicted_after_missing_snapshots() {
        let mut anim = VirusAnimations::new();
        anim.sync(&[virus(1, 0.0), virus(2, 50.0)]);

        // One missed snapshot is tolerated
        anim.sync(&[virus(2, 50.0)]);
        assert!(anim.phase(1).is_some());

        anim.sync(&[virus(2, 50.0)]);
        assert!(anim.phase(1).is_none());
        assert_eq!(anim.len(), 1);
    }

    #[test]
    fn test_returning_virus_resets_miss_count() {
        let mut anim = VirusAnimations::new();
        anim.sync(&[virus(7, 0.0)]);
        anim.sync(&[]);
        anim.sync(&[virus(7, 0.0)]);
        anim.sync(&[]);
        assert!(anim.phase(7).is_some());
    }

    #[test]
    fn test_phases_wrap() {
        let mut anim = VirusAnimations::new();
        anim.sync(&[virus(1, 0.0)]);
        anim.advance(100.0);
        let phase = anim.phase(1).unwrap();
        assert!((0.0..TAU).contains(&phase.rotation));
        assert!((0.0..TAU).contains(&phase.pulse));

        anim.clear();
        assert!(anim.is_empty());
    }
}
