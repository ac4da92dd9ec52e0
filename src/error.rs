//! Error taxonomy.
//!
//! Errors are organized by kind, not by failing type: Usage, Data,
//! Incomplete, Invariant, External. The orchestrator never lets an error
//! cross its boundary; everything here is eventually mapped to an exit code
//! and a single contract block.

use thiserror::Error;

use crate::reasons::IncompleteReason;

/// Library-level error type.
///
/// | Kind | Meaning | Exit |
/// |------|---------|------|
/// | `Usage` | bad flags, missing args, src/url mismatch, no promises | 64 |
/// | `Data` | unreadable or corrupt artifact on re-read | 50 |
/// | `Incomplete` | run cannot reach a full verdict | 30 |
/// | `Invariant` | internal contract violated | 50 |
/// | `External` | collaborator unavailable (surfaces as Incomplete) | 30 |
#[derive(Error, Debug)]
pub enum VeraxError {
    #[error("Usage error: {message}")]
    Usage { message: String },

    #[error("Artifact data error: {message}")]
    Data { message: String },

    #[error("Run incomplete")]
    Incomplete { reasons: Vec<IncompleteReason> },

    #[error("Invariant violation: {message}")]
    Invariant { message: String },

    #[error("External collaborator failure: {message}")]
    External {
        reason: IncompleteReason,
        message: String,
    },

    #[error("Lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VeraxError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }
}

/// Policy loading and validation failures. All map to Usage (exit 64): a bad
/// policy is an invocation problem, not a scan result.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy file not found: {path}")]
    FileNotFound { path: String },

    #[error("Policy file has invalid format: {reason}")]
    InvalidFile { reason: String },

    #[error("Invalid policy value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid environment override {var}: {reason}")]
    InvalidEnv { var: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_error_display() {
        let err = VeraxError::usage("unknown flag --frobnicate");
        assert_eq!(err.to_string(), "Usage error: unknown flag --frobnicate");
    }

    #[test]
    fn policy_error_converts() {
        let err: VeraxError = PolicyError::InvalidValue {
            key: "minCoverage".to_string(),
            reason: "must be in (0, 1]".to_string(),
        }
        .into();
        assert!(matches!(err, VeraxError::Policy(_)));
    }
}
