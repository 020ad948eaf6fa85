//! Error types for planner_core
//!
//! Constraint violations are never errors: they travel as filter codes and
//! status bits. This enum only carries conditions that abort a call.

use thiserror::Error;

/// Main error type for the planning contract
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The configuration space specification is invalid or unsatisfiable
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A planner parameter is inconsistent
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A vector does not match the configuration space dimension
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A mandatory capability was never bound
    #[error("mandatory function `{0}` is not set")]
    MissingFunction(&'static str),
    /// Writing values onto the live state failed
    #[error("state setting failed: {0}")]
    StateSetting(String),
    /// An external collaborator (collision engine, projection) failed
    #[error("collaborator failure: {0}")]
    Collaborator(String),
    /// No planner registered under this name
    #[error("unknown planner `{0}`")]
    UnknownPlanner(String),
    /// Parameter or status (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlanningError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }

    pub fn state_setting(message: impl Into<String>) -> Self {
        Self::StateSetting(message.into())
    }

    /// Checks a vector length against the expected dimension
    pub fn check_len(what: &'static str, expected: usize, actual: usize) -> PlanningResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::DimensionMismatch {
                what,
                expected,
                actual,
            })
        }
    }
}

/// Result type alias for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanningError::MissingFunction("sampler");
        assert_eq!(format!("{}", err), "mandatory function `sampler` is not set");
    }

    #[test]
    fn test_check_len() {
        assert!(PlanningError::check_len("q0", 2, 2).is_ok());
        let err = PlanningError::check_len("q0", 2, 3).unwrap_err();
        assert!(matches!(
            err,
            PlanningError::DimensionMismatch {
                what: "q0",
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlanningError = io_err.into();
        assert!(matches!(err, PlanningError::Io(_)));
    }
}
