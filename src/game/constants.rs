/// Tick timing
pub mod physics {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 30.0;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
}

/// Mass and movement
pub mod mass {
    /// Mass of a freshly spawned Player-Cell
    pub const STARTING: f32 = 20.0;
    /// Floor applied when sanitizing corrupted state
    pub const MINIMUM: f32 = 10.0;
    /// Radius constant `k` in `radius = sqrt(mass / PI) * k`
    pub const RADIUS_SCALE: f32 = 10.0;
    /// Speed (world units/s) of a cell at starting mass
    pub const BASE_SPEED: f32 = 260.0;
    /// Slowest a cell can get, no matter how large
    pub const MIN_SPEED: f32 = 40.0;
}

/// Split and merge rules
pub mod split {
    /// Owner mass required to split
    pub const MIN_MASS: f32 = 40.0;
    /// Split pieces a player may own at once
    pub const MAX_PIECES: usize = 8;
    /// Initial speed of a freshly launched piece
    pub const LAUNCH_SPEED: f32 = 650.0;
    /// Seconds over which the launch velocity decays to zero
    pub const BOOST_DURATION: f64 = 1.0;
    /// Seconds after a split before a piece may merge back
    pub const MERGE_COOLDOWN: f64 = 30.0;
    /// Speed at which merge-eligible pieces drift toward the owner
    pub const MERGE_PULL_SPEED: f32 = 120.0;
}

/// Cell-vs-cell absorption
pub mod eat {
    /// Eater must outweigh the victim by this factor
    pub const MASS_RATIO: f32 = 1.25;
    /// Fraction of the victim radius that must be inside the eater
    pub const OVERLAP_RATIO: f32 = 0.5;
}

/// Coins
pub mod coin {
    /// Score and mass granted per pickup
    pub const VALUE: u64 = 1;
    pub const RADIUS: f32 = 6.0;
    /// Number of palette entries a coin color is drawn from
    pub const PALETTE_SIZE: u8 = 8;
    /// Cell size of the pickup grid
    pub const GRID_CELL_SIZE: f32 = 96.0;
}

/// Viruses
pub mod virus {
    pub const RADIUS: f32 = 45.0;
    /// Cells at or above this mass burst when they cover a virus
    pub const TRIGGER_MASS: f32 = 150.0;
    /// Pieces produced by one burst (bounded by the split cap)
    pub const BURST_PIECES: usize = 6;
    pub const MIN_SPIKES: u8 = 14;
    pub const MAX_SPIKES: u8 = 22;
}

/// Spawning
pub mod spawn {
    /// Duration of spawn protection in seconds
    pub const PROTECTION_DURATION: f64 = 3.0;
    /// Spawn points are drawn inside this fraction of the current zone radius
    pub const ZONE_FRACTION: f32 = 0.85;
    /// Preferred clearance from other players
    pub const SAFE_DISTANCE: f32 = 120.0;
    /// Attempts before accepting a crowded spawn point
    pub const MAX_SPAWN_ATTEMPTS: u32 = 24;
}

/// Client-side presentation tuning
pub mod client {
    /// Fraction of the remaining camera distance covered per frame
    pub const CAMERA_SMOOTHING: f32 = 0.12;
    /// How far past the zone edge the camera may drift
    pub const CAMERA_OVERSCROLL: f32 = 60.0;
    /// Fixed delay before a reconnect attempt
    pub const RECONNECT_BACKOFF_MS: u64 = 2000;
    /// RTT samples kept for the rolling average
    pub const RTT_SAMPLES: usize = 10;
    /// Round trip assumed for cash-out reconciliation before any pong arrives
    pub const CASH_OUT_SETTLE_FALLBACK_MS: u64 = 250;
    /// Radians per second of virus spin
    pub const VIRUS_ROTATION_SPEED: f32 = 0.6;
    /// Radians per second of virus pulse
    pub const VIRUS_PULSE_SPEED: f32 = 2.4;
    /// Snapshots a virus may be absent before its animation state is dropped
    pub const VIRUS_EVICT_AFTER: u32 = 1;
}

/// Network limits
pub mod net {
    /// Maximum size of a framed stream message
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Maximum size of an unreliable datagram
    pub const MAX_DATAGRAM_SIZE: usize = 1200;
    /// Pending control messages per session before drops
    pub const CONTROL_QUEUE_SIZE: usize = 32;
    /// Rows of arena-wide standings carried in every snapshot
    pub const LEADERBOARD_SIZE: usize = 10;
    /// Longest accepted display name (characters)
    pub const MAX_NAME_LEN: usize = 16;
    /// Longest accepted room id (characters)
    pub const MAX_ROOM_ID_LEN: usize = 32;
    /// Largest cosmetic blob passed through to other clients
    pub const MAX_COSMETIC_LEN: usize = 256;
    /// Room used when a join names none
    pub const DEFAULT_ROOM: &str = "default";
}

/// Radius of a mass-bearing cell
#[inline]
pub fn mass_to_radius(mass: f32) -> f32 {
    (mass.max(0.0) / std::f32::consts::PI).sqrt() * mass::RADIUS_SCALE
}

/// Movement speed for a cell of the given mass
///
/// Falls off with the square root of mass relative to the starting mass, so
/// a cell four times heavier moves at half the speed.
#[inline]
pub fn speed_for_mass(cell_mass: f32) -> f32 {
    let ratio = mass::STARTING / cell_mass.max(mass::MINIMUM);
    (mass::BASE_SPEED * ratio.sqrt()).max(mass::MIN_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_to_radius_formula() {
        let radius = mass_to_radius(std::f32::consts::PI * 4.0);
        // sqrt(4) * 10
        assert!((radius - 20.0).abs() < 0.001, "got {}", radius);
    }

    #[test]
    fn test_mass_to_radius_negative_is_zero() {
        assert_eq!(mass_to_radius(-5.0), 0.0);
    }

    #[test]
    fn test_tick_rate() {
        assert_eq!(physics::TICK_RATE, 30);
        assert!((physics::DT - 1.0 / 30.0).abs() < 0.0001);
        assert_eq!(physics::TICK_DURATION_MS, 33);
    }

    #[test]
    fn test_speed_decreases_with_mass() {
        let masses = [20.0, 40.0, 80.0, 160.0, 320.0];
        for pair in masses.windows(2) {
            assert!(
                speed_for_mass(pair[0]) > speed_for_mass(pair[1]),
                "mass {} should be faster than mass {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_speed_at_four_times_starting_mass_is_half() {
        let base = speed_for_mass(mass::STARTING);
        let heavy = speed_for_mass(mass::STARTING * 4.0);
        assert!((heavy - base / 2.0).abs() < 0.01);
    }

    #[test]
    fn test_speed_floor() {
        assert_eq!(speed_for_mass(1_000_000.0), mass::MIN_SPEED);
        assert!(speed_for_mass(f32::MAX).is_finite());
    }

    #[test]
    fn test_virus_trigger_above_split_threshold() {
        assert!(virus::TRIGGER_MASS > split::MIN_MASS);
        assert!(split::MERGE_COOLDOWN > split::BOOST_DURATION);
    }
}
