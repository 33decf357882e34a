//! Input validation applied by the session gateway before commands reach
//! an arena

pub mod validator;

pub use validator::{CheatViolation, InputValidator, ValidationConfig};
