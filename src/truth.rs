//! Truth classifier.
//!
//! Derives the run-level verdict from counts and flags, top-down:
//! infrastructure failure, then any incompleteness condition, then confirmed
//! findings, then SUCCESS. "Nothing observed" is never allowed to read as
//! "nothing wrong": every shortfall lands in INCOMPLETE with sorted reasons.

use serde::{Deserialize, Serialize};

use crate::policy::CiMode;
use crate::reasons::{IncompleteReason, canonical_reasons};
use crate::types::TruthState;

/// Inputs to the classifier; assembled by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct TruthInputs {
    pub expectations_total: u32,
    pub attempted: u32,
    pub observed: u32,
    pub confirmed_findings: u32,
    pub coverage_ratio: f64,
    pub critical_silence_count: u32,
    pub infra_failure: bool,
    /// Incompleteness already established upstream (limited mode, timeouts,
    /// unavailable driver, post-auth) with its reasons.
    pub incomplete: bool,
    pub incomplete_reasons: Vec<IncompleteReason>,
    pub min_coverage: f64,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthVerdict {
    pub truth: TruthState,
    /// Non-empty and sorted whenever `truth` is INCOMPLETE.
    pub incomplete_reasons: Vec<IncompleteReason>,
    /// Set when strict CI mode promoted an INCOMPLETE verdict.
    pub promoted_by_strict_mode: bool,
}

/// Classify the run. Rules are evaluated top-down; the first match wins.
#[must_use]
pub fn classify(inputs: &TruthInputs, ci_mode: CiMode) -> TruthVerdict {
    if inputs.infra_failure {
        return incomplete_verdict(vec![IncompleteReason::InfraFailure], ci_mode);
    }

    let mut reasons = inputs.incomplete_reasons.clone();
    if inputs.coverage_ratio < inputs.min_coverage {
        reasons.push(IncompleteReason::CoverageBelowThreshold);
    }
    if inputs.attempted < inputs.expectations_total {
        reasons.push(IncompleteReason::PartialAttempts);
    }
    if inputs.critical_silence_count > 0 {
        reasons.push(IncompleteReason::CriticalSilenceDetected);
    }

    let is_incomplete = inputs.incomplete
        || inputs.expectations_total == 0
        || !reasons.is_empty();
    if is_incomplete {
        return incomplete_verdict(reasons, ci_mode);
    }

    if inputs.confirmed_findings > 0 {
        return TruthVerdict {
            truth: TruthState::Findings,
            incomplete_reasons: Vec::new(),
            promoted_by_strict_mode: false,
        };
    }

    TruthVerdict {
        truth: TruthState::Success,
        incomplete_reasons: Vec::new(),
        promoted_by_strict_mode: false,
    }
}

fn incomplete_verdict(mut reasons: Vec<IncompleteReason>, ci_mode: CiMode) -> TruthVerdict {
    if reasons.is_empty() {
        reasons.push(IncompleteReason::UnknownIncompleteness);
    }
    let reasons = canonical_reasons(reasons);

    // Strict CI treats an unfinished run as a failure, not a shrug.
    if ci_mode == CiMode::Strict {
        return TruthVerdict {
            truth: TruthState::Findings,
            incomplete_reasons: reasons,
            promoted_by_strict_mode: true,
        };
    }

    TruthVerdict {
        truth: TruthState::Incomplete,
        incomplete_reasons: reasons,
        promoted_by_strict_mode: false,
    }
}

/// Reasons forced by a post-authentication invocation.
#[must_use]
pub fn post_auth_reasons() -> Vec<IncompleteReason> {
    vec![
        IncompleteReason::PostAuthExperimental,
        IncompleteReason::OutOfScopePerVision,
    ]
}
