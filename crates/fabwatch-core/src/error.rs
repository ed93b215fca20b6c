// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fabwatch-core.
//!
//! Provides a unified error type with stable error codes for API responses.

use std::fmt;

/// Result type using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while processing monitoring events.
///
/// Lock contention is deliberately *not* an error: a busy lock means another
/// transition for the same machine is in flight and the current event is
/// superseded (see [`TransitionOutcome::Superseded`]).
///
/// [`TransitionOutcome::Superseded`]: crate::monitor::TransitionOutcome::Superseded
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MonitorError {
    /// Machine is not known to the configuration provider.
    MachineNotFound {
        /// The machine ID that was not found.
        machine_id: String,
    },

    /// A raw signal pattern has no configured status mapping.
    SignalNotMapped {
        /// The machine ID the signal was reported for.
        machine_id: String,
        /// The raw signal pattern.
        signal: String,
    },

    /// Input validation failed before any lock or transaction was taken.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The storage transaction could not commit; the transition was rolled
    /// back and the caller may retry.
    StorageError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A collaborator (job lookup, user lookup) failed mid-transition.
    CollaboratorError {
        /// Name of the collaborator.
        collaborator: String,
        /// Error details.
        details: String,
    },
}

impl MonitorError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MachineNotFound { .. } => "MACHINE_NOT_FOUND",
            Self::SignalNotMapped { .. } => "SIGNAL_NOT_MAPPED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::StorageError { .. } => "STORAGE_ERROR",
            Self::CollaboratorError { .. } => "COLLABORATOR_ERROR",
        }
    }

    /// Whether the caller may safely retry the same event.
    ///
    /// Storage failures roll the transition back atomically, so a retry is
    /// harmless. Validation and not-found errors are permanent for the
    /// same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageError { .. } | Self::CollaboratorError { .. }
        )
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MachineNotFound { machine_id } => {
                write!(f, "Machine '{}' not found", machine_id)
            }
            Self::SignalNotMapped { machine_id, signal } => {
                write!(
                    f,
                    "No status mapping for signal '{}' on machine '{}'",
                    signal, machine_id
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::StorageError { operation, details } => {
                write!(f, "Storage error during '{}': {}", operation, details)
            }
            Self::CollaboratorError {
                collaborator,
                details,
            } => {
                write!(f, "Collaborator '{}' failed: {}", collaborator, details)
            }
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<sqlx::Error> for MonitorError {
    fn from(err: sqlx::Error) -> Self {
        MonitorError::StorageError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::StorageError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                MonitorError::MachineNotFound {
                    machine_id: "m-1".to_string(),
                },
                "MACHINE_NOT_FOUND",
            ),
            (
                MonitorError::SignalNotMapped {
                    machine_id: "m-1".to_string(),
                    signal: "IN3=1".to_string(),
                },
                "SIGNAL_NOT_MAPPED",
            ),
            (
                MonitorError::ValidationError {
                    field: "reason".to_string(),
                    message: "must not be empty".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                MonitorError::StorageError {
                    operation: "apply_transition".to_string(),
                    details: "connection refused".to_string(),
                },
                "STORAGE_ERROR",
            ),
            (
                MonitorError::CollaboratorError {
                    collaborator: "job_lookup".to_string(),
                    details: "timeout".to_string(),
                },
                "COLLABORATOR_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_error_display() {
        let err = MonitorError::MachineNotFound {
            machine_id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "Machine 'abc-123' not found");

        let err = MonitorError::SignalNotMapped {
            machine_id: "abc-123".to_string(),
            signal: "IN0=1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No status mapping for signal 'IN0=1' on machine 'abc-123'"
        );

        let err = MonitorError::ValidationError {
            field: "reason".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error for 'reason': must not be empty"
        );

        let err = MonitorError::StorageError {
            operation: "insert".to_string(),
            details: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Storage error during 'insert': connection refused"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(MonitorError::StorageError {
            operation: "commit".to_string(),
            details: "timeout".to_string(),
        }
        .is_retryable());

        assert!(!MonitorError::ValidationError {
            field: "reason".to_string(),
            message: "empty".to_string(),
        }
        .is_retryable());

        assert!(!MonitorError::MachineNotFound {
            machine_id: "x".to_string(),
        }
        .is_retryable());
    }
}
