use crate::util::vec2::Vec2;

/// Violations detected by the input validator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheatViolation {
    #[error("NaN or Infinity in input direction")]
    NonFiniteInput,
    #[error("Input direction magnitude {0} beyond tolerated bound")]
    MagnitudeOverflow(f32),
    #[error("Split target is not a finite world position")]
    NonFiniteTarget,
    #[error("Sequence number went backwards: prev={0}, current={1}")]
    SequenceRegression(u64, u64),
    #[error("Sequence jumped too far: prev={0}, current={1}")]
    SequenceJump(u64, u64),
}

impl CheatViolation {
    /// Whether the violation counts toward closing the connection.
    /// Regressions happen naturally when datagrams are reordered.
    pub fn is_severe(&self) -> bool {
        !matches!(self, CheatViolation::SequenceRegression(..))
    }
}

/// Configuration for input validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Magnitudes up to this are normalized; beyond it the input is rejected
    pub max_raw_magnitude: f32,
    /// Maximum sequence jump allowed
    pub max_sequence_jump: u64,
    /// Split targets must lie within this distance of the origin
    pub max_target_coordinate: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_raw_magnitude: 10.0,
            max_sequence_jump: 100,
            max_target_coordinate: 1.0e6,
        }
    }
}

/// Input validator for anti-cheat
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    config: ValidationConfig,
}

impl InputValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a movement direction and clamp it to unit length
    pub fn validate_direction(&self, dx: f32, dy: f32) -> Result<Vec2, CheatViolation> {
        let direction = Vec2::new(dx, dy);
        if !direction.is_finite() {
            return Err(CheatViolation::NonFiniteInput);
        }
        let magnitude = direction.length();
        if magnitude > self.config.max_raw_magnitude {
            return Err(CheatViolation::MagnitudeOverflow(magnitude));
        }
        Ok(direction.clamp_length(1.0))
    }

    /// Validate a split target position
    pub fn validate_split_target(&self, x: f32, y: f32) -> Result<Vec2, CheatViolation> {
        let limit = self.config.max_target_coordinate;
        if !x.is_finite() || !y.is_finite() || x.abs() > limit || y.abs() > limit {
            return Err(CheatViolation::NonFiniteTarget);
        }
        Ok(Vec2::new(x, y))
    }

    /// Validate sequence number progression against the last forwarded one
    pub fn validate_sequence(&self, prev: Option<u64>, current: u64) -> Result<(), CheatViolation> {
        let Some(prev) = prev else {
            return Ok(());
        };
        if current <= prev {
            return Err(CheatViolation::SequenceRegression(prev, current));
        }
        if current - prev > self.config.max_sequence_jump {
            return Err(CheatViolation::SequenceJump(prev, current));
        }
        Ok(())
    }
}
