//! Custom error types for the server.
//!
//! This module defines the primary error type, `ServerError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur, from configuration problems at
//! start-up to instrument faults while sampling.
//!
//! ## Error Hierarchy
//!
//! `ServerError` consolidates the following sources:
//!
//! - **`Config`**: Wraps [`ConfigError`], raised while loading or validating the
//!   configuration. Always fatal.
//! - **`Connection`**: No instrument could be discovered or the device refused to
//!   open. Recoverable: the polling loop probes again on its next iteration.
//! - **`Acquisition`**: A sampling call failed while capturing. Recoverable: the
//!   polling loop drops the session and falls back to probing.
//! - **`TypeMismatch`**: A write disagreed with the declared type of a variable.
//!   Rejected at the registry boundary, never coerced.
//! - **`NotFound`** / **`DuplicateVariable`**: Registry lookups and registrations
//!   that contradict the static declaration list. Fatal at start-up.
//! - **`AccessDenied`**: A consumer tried to write a read-only variable.
//! - **`Server`**: The protocol server refused an operation (e.g. not running).
//!
//! Only `Connection` and `Acquisition` are considered recoverable, see
//! [`ServerError::is_recoverable`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::VariantType;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ServerError>;

/// Errors raised anywhere in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No instrument discovered, or the device refused to open
    #[error("Instrument connection error: {0}")]
    Connection(String),

    /// Sampling call failed on a connected instrument
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// Value type disagrees with the declared variable type
    #[error("Type mismatch for '{name}': expected {expected}, got {found}")]
    TypeMismatch {
        /// Variable written
        name: String,
        /// Declared type
        expected: VariantType,
        /// Type of the rejected value
        found: VariantType,
    },

    /// No variable with this name or node id
    #[error("Variable '{0}' not found")]
    NotFound(String),

    /// Name or node id registered twice
    #[error("Variable '{0}' is already registered")]
    DuplicateVariable(String),

    /// Consumer write to a read-only variable
    #[error("Variable '{0}' is read-only")]
    AccessDenied(String),

    /// Protocol server refused the operation
    #[error("Protocol server error: {0}")]
    Server(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Steady-state errors the polling loop recovers from by re-probing the instrument.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ServerError::Connection(_) | ServerError::Acquisition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::Acquisition("spectrometer timed out".to_string());
        assert_eq!(err.to_string(), "Acquisition error: spectrometer timed out");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = ServerError::TypeMismatch {
            name: "SpectraCounter".into(),
            expected: VariantType::UInt32,
            found: VariantType::Float,
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch for 'SpectraCounter': expected UInt32, got Float"
        );
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ServerError::Connection("no device".into()).is_recoverable());
        assert!(ServerError::Acquisition("usb fault".into()).is_recoverable());
        assert!(!ServerError::NotFound("Comms".into()).is_recoverable());
        assert!(!ServerError::AccessDenied("Intensities".into()).is_recoverable());
        assert!(!ServerError::Config(ConfigError::Validation("bad".into())).is_recoverable());
    }
}
