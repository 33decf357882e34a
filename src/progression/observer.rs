//! Progress events inferred from consecutive snapshots of one player
//!
//! The wire protocol does not say why a score changed, so coin pickups are
//! recognised by comparing the score delta with the mass delta.

use serde::{Deserialize, Serialize};

/// Survival thresholds in seconds
pub const SURVIVAL_MILESTONES: [u64; 4] = [60, 180, 300, 600];

/// Largest gap between score and mass deltas still treated as a pickup
pub const COIN_DELTA_TOLERANCE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    CoinCollected { score_delta: u64 },
    MassMilestone { mass: f32 },
    SurvivalMilestone { seconds: u64 },
}

/// Whether a score/mass change looks like a coin pickup
///
/// Absorbing another cell adds the victim's mass to both score and mass,
/// so kills also classify as coins. Coin missions therefore count any
/// matching gain, not only coin pickups.
pub fn looks_like_coin(score_delta: i64, mass_delta: f32) -> bool {
    if score_delta <= 0 {
        return false;
    }
    if (score_delta as f32 - mass_delta).abs() <= COIN_DELTA_TOLERANCE {
        return true;
    }
    // Mass decay can hide the pickup's mass gain
    score_delta == 1 && mass_delta < 0.0
}

/// Per-session observer state
#[derive(Debug, Clone)]
pub struct ProgressionObserver {
    last: Option<(u64, f32)>,
    max_mass: f32,
    started_at: Option<f64>,
    survival_milestones: Vec<u64>,
    next_survival: usize,
}

impl Default for ProgressionObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressionObserver {
    pub fn new() -> Self {
        Self::with_survival_milestones(SURVIVAL_MILESTONES.to_vec())
    }

    pub fn with_survival_milestones(mut milestones: Vec<u64>) -> Self {
        milestones.sort_unstable();
        milestones.dedup();
        Self {
            last: None,
            max_mass: 0.0,
            started_at: None,
            survival_milestones: milestones,
            next_survival: 0,
        }
    }

    /// Feed the player's score and mass at time `now` (seconds).
    /// The first observation only sets the baseline.
    pub fn observe(&mut self, score: u64, mass: f32, now: f64) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        let started_at = *self.started_at.get_or_insert(now);

        match self.last {
            None => self.max_mass = mass,
            Some((last_score, last_mass)) => {
                let score_delta = score as i64 - last_score as i64;
                let mass_delta = mass - last_mass;
                if looks_like_coin(score_delta, mass_delta) {
                    events.push(ProgressEvent::CoinCollected {
                        score_delta: score_delta as u64,
                    });
                }
                if mass > self.max_mass {
                    self.max_mass = mass;
                    events.push(ProgressEvent::MassMilestone { mass });
                }
            }
        }
        self.last = Some((score, mass));

        let survived = (now - started_at).max(0.0);
        while let Some(&threshold) = self.survival_milestones.get(self.next_survival) {
            if survived < threshold as f64 {
                break;
            }
            self.next_survival += 1;
            events.push(ProgressEvent::SurvivalMilestone { seconds: threshold });
        }

        events
    }

    pub fn max_mass(&self) -> f32 {
        self.max_mass
    }

    /// Forget everything, e.g. when a new session starts
    pub fn reset(&mut self) {
        self.last = None;
        self.max_mass = 0.0;
        self.started_at = None;
        self.next_survival = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_heuristic() {
        assert!(looks_like_coin(1, 1.0));
        assert!(looks_like_coin(5, 3.5));
        assert!(looks_like_coin(1, -0.2), "decay hid the mass gain");
        assert!(!looks_like_coin(40, 30.0), "mass well below the score gain");
        assert!(!looks_like_coin(0, 1.0));
        assert!(!looks_like_coin(2, -0.5));
    }

    #[test]
    fn test_kill_counts_as_coin() {
        // Eating a 50-mass cell: score and mass both grow by 50
        assert!(looks_like_coin(50, 50.0));
        assert!(looks_like_coin(50, 49.0));
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut observer = ProgressionObserver::new();
        assert!(observer.observe(0, 10.0, 0.0).is_empty());
        assert_eq!(observer.max_mass(), 10.0);
    }

    #[test]
    fn test_coin_and_mass_milestone() {
        let mut observer = ProgressionObserver::new();
        observer.observe(0, 10.0, 0.0);
        let events = observer.observe(1, 11.0, 0.1);
        assert_eq!(
            events,
            vec![
                ProgressEvent::CoinCollected { score_delta: 1 },
                ProgressEvent::MassMilestone { mass: 11.0 },
            ]
        );
    }

    #[test]
    fn test_mass_milestone_only_above_running_max() {
        let mut observer = ProgressionObserver::new();
        observer.observe(0, 50.0, 0.0);
        assert!(observer.observe(0, 30.0, 1.0).is_empty());
        assert!(observer.observe(0, 45.0, 2.0).is_empty());
        assert_eq!(
            observer.observe(0, 51.0, 3.0),
            vec![ProgressEvent::MassMilestone { mass: 51.0 }]
        );
    }

    #[test]
    fn test_survival_milestones_fire_once_each() {
        let mut observer = ProgressionObserver::with_survival_milestones(vec![60, 180]);
        observer.observe(0, 10.0, 100.0);
        assert!(observer.observe(0, 10.0, 159.0).is_empty());
        assert_eq!(
            observer.observe(0, 10.0, 160.0),
            vec![ProgressEvent::SurvivalMilestone { seconds: 60 }]
        );
        assert!(observer.observe(0, 10.0, 161.0).is_empty());

        // A long gap crosses the remaining threshold once
        let events = observer.observe(0, 10.0, 1000.0);
        assert_eq!(events, vec![ProgressEvent::SurvivalMilestone { seconds: 180 }]);
    }

    #[test]
    fn test_reset_starts_new_baseline() {
        let mut observer = ProgressionObserver::with_survival_milestones(vec![1]);
        observer.observe(0, 10.0, 0.0);
        observer.observe(0, 10.0, 2.0);
        observer.reset();
        assert!(observer.observe(5, 10.0, 50.0).is_empty());
    }
}
