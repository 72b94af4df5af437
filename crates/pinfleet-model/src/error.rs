//! Error taxonomy for the device model.
//!
//! Pin conflicts are *not* errors: they are advisory warnings carried in
//! [`crate::gpio::PinCheck`] and never block an operation.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors surfaced by catalog and assignment operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A required field is missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested GPIO pin can never carry this assignment.
    #[error("GPIO {pin} rejected: {reason}")]
    PinRejected { pin: u8, reason: String },

    /// A definition cannot be retired while assignments reference it.
    #[error("definition {id} still has {active_refs} active assignment(s)")]
    DefinitionInUse { id: i64, active_refs: usize },

    /// Unknown entity id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The repository collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_informative() {
        let err = ModelError::PinRejected {
            pin: 6,
            reason: "reserved for flash".to_string(),
        };
        assert_eq!(err.to_string(), "GPIO 6 rejected: reserved for flash");

        let err = ModelError::DefinitionInUse {
            id: 3,
            active_refs: 2,
        };
        assert!(err.to_string().contains("2 active assignment"));
    }
}
