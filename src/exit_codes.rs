//! Exit code constants and mapping.
//!
//! The exit code is derived solely from the final truth state and the
//! artifact validation result. The set below is closed; no other code is
//! ever produced. (A historical map carried a 10/NEEDS_REVIEW variant; it is
//! intentionally absent and any path producing it is a bug.)

use crate::error::VeraxError;
use crate::types::TruthState;

/// Exit code constants for verax.
pub mod codes {
    /// All promises observed, zero confirmed findings.
    pub const SUCCESS: i32 = 0;

    /// At least one confirmed finding.
    pub const FINDINGS: i32 = 20;

    /// Run could not reach a full verdict.
    pub const INCOMPLETE: i32 = 30;

    /// Artifact corruption or internal contract violation.
    pub const INVARIANT_VIOLATION: i32 = 50;

    /// Invalid invocation.
    pub const USAGE_ERROR: i32 = 64;
}

/// Typed exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Findings,
    Incomplete,
    InvariantViolation,
    UsageError,
}

impl ExitCode {
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Success => codes::SUCCESS,
            Self::Findings => codes::FINDINGS,
            Self::Incomplete => codes::INCOMPLETE,
            Self::InvariantViolation => codes::INVARIANT_VIOLATION,
            Self::UsageError => codes::USAGE_ERROR,
        }
    }

    /// Contract-block RESULT label for this code.
    #[must_use]
    pub const fn result_label(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Findings => "FINDINGS",
            Self::Incomplete => "INCOMPLETE",
            Self::InvariantViolation => "INVARIANT_VIOLATION",
            Self::UsageError => "USAGE_ERROR",
        }
    }
}

/// Map (truth, validation result, confirmed-finding count) to an exit code.
///
/// Invariants enforced here:
/// - corrupted artifacts override everything → 50;
/// - SUCCESS must never coexist with a confirmed finding → 50.
#[must_use]
pub fn exit_code_for(truth: TruthState, validation_ok: bool, confirmed_findings: u32) -> ExitCode {
    if !validation_ok {
        return ExitCode::InvariantViolation;
    }
    match truth {
        TruthState::Success if confirmed_findings > 0 => ExitCode::InvariantViolation,
        TruthState::Success => ExitCode::Success,
        TruthState::Findings => ExitCode::Findings,
        TruthState::Incomplete => ExitCode::Incomplete,
    }
}

/// Map an error that escaped phase handling to its exit code.
#[must_use]
pub fn exit_code_for_error(error: &VeraxError) -> ExitCode {
    match error {
        VeraxError::Usage { .. } | VeraxError::Policy(_) | VeraxError::Lock(_) => {
            ExitCode::UsageError
        }
        VeraxError::Data { .. } | VeraxError::Invariant { .. } => ExitCode::InvariantViolation,
        VeraxError::Incomplete { .. } | VeraxError::External { .. } => ExitCode::Incomplete,
        VeraxError::Io(_) | VeraxError::Other(_) => ExitCode::Incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_constants() {
        assert_eq!(codes::SUCCESS, 0);
        assert_eq!(codes::FINDINGS, 20);
        assert_eq!(codes::INCOMPLETE, 30);
        assert_eq!(codes::INVARIANT_VIOLATION, 50);
        assert_eq!(codes::USAGE_ERROR, 64);
    }

    #[test]
    fn closed_code_set() {
        // Exhaustive over the ExitCode enum: nothing can produce 10.
        let all = [
            ExitCode::Success,
            ExitCode::Findings,
            ExitCode::Incomplete,
            ExitCode::InvariantViolation,
            ExitCode::UsageError,
        ];
        let codes: Vec<i32> = all.iter().map(ExitCode::as_i32).collect();
        assert_eq!(codes, vec![0, 20, 30, 50, 64]);
    }

    #[test]
    fn truth_mapping() {
        assert_eq!(
            exit_code_for(TruthState::Success, true, 0),
            ExitCode::Success
        );
        assert_eq!(
            exit_code_for(TruthState::Findings, true, 2),
            ExitCode::Findings
        );
        assert_eq!(
            exit_code_for(TruthState::Incomplete, true, 0),
            ExitCode::Incomplete
        );
    }

    #[test]
    fn corrupted_artifacts_override_truth() {
        assert_eq!(
            exit_code_for(TruthState::Success, false, 0),
            ExitCode::InvariantViolation
        );
        assert_eq!(
            exit_code_for(TruthState::Findings, false, 1),
            ExitCode::InvariantViolation
        );
    }

    #[test]
    fn success_with_confirmed_findings_is_invariant_violation() {
        assert_eq!(
            exit_code_for(TruthState::Success, true, 1),
            ExitCode::InvariantViolation
        );
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            exit_code_for_error(&VeraxError::usage("bad flag")),
            ExitCode::UsageError
        );
        assert_eq!(
            exit_code_for_error(&VeraxError::invariant("missing artifact")),
            ExitCode::InvariantViolation
        );
        assert_eq!(
            exit_code_for_error(&VeraxError::data("corrupt findings.json")),
            ExitCode::InvariantViolation
        );
    }
}
