//! Normalized failure-mode reason codes.
//!
//! Every way a run can fall short of a full verdict is expressed through one
//! of the closed enums below. Free-form reason strings never enter artifacts;
//! the enums serialize to stable snake_case (kebab-case for skip reasons,
//! which appear verbatim in observation records).

use serde::{Deserialize, Serialize};

/// Reasons a run (or an observation set) is INCOMPLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    CoverageBelowThreshold,
    PartialAttempts,
    ObservationIncomplete,
    CriticalSilenceDetected,
    SourceNotDetected,
    UnsupportedFramework,
    LimitedRuntimeOnlyMode,
    PostAuthExperimental,
    OutOfScopePerVision,
    GlobalTimeoutExceeded,
    PhaseTimeoutExceeded,
    InfraFailure,
    BrowserDriverUnavailable,
    DryLearnRequested,
    /// Sentinel added when a run is INCOMPLETE but no specific reason was
    /// recorded; its presence in an artifact indicates a reporting gap.
    UnknownIncompleteness,
}

impl IncompleteReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CoverageBelowThreshold => "coverage_below_threshold",
            Self::PartialAttempts => "partial_attempts",
            Self::ObservationIncomplete => "observation_incomplete",
            Self::CriticalSilenceDetected => "critical_silence_detected",
            Self::SourceNotDetected => "source_not_detected",
            Self::UnsupportedFramework => "unsupported_framework",
            Self::LimitedRuntimeOnlyMode => "limited_runtime_only_mode",
            Self::PostAuthExperimental => "post_auth_experimental",
            Self::OutOfScopePerVision => "out_of_scope_per_vision",
            Self::GlobalTimeoutExceeded => "global_timeout_exceeded",
            Self::PhaseTimeoutExceeded => "phase_timeout_exceeded",
            Self::InfraFailure => "infra_failure",
            Self::BrowserDriverUnavailable => "browser_driver_unavailable",
            Self::DryLearnRequested => "dry_learn_requested",
            Self::UnknownIncompleteness => "unknown_incompleteness",
        }
    }
}

/// Sort and deduplicate a reason list into the canonical artifact order.
///
/// Artifacts always carry reason lists sorted lexicographically by their
/// serialized form so re-runs hash identically.
#[must_use]
pub fn canonical_reasons(mut reasons: Vec<IncompleteReason>) -> Vec<IncompleteReason> {
    reasons.sort_by_key(|r| r.as_str());
    reasons.dedup();
    reasons
}

/// Why a single expectation was skipped instead of attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The expectation's value turned out to be non-exercisable at runtime.
    DynamicValue,
    /// The per-interaction deadline fired before the attempt settled.
    InteractionTimeoutExceeded,
    /// The runtime readiness probe failed before this expectation ran.
    RuntimeNotReady,
    /// The attempt would have issued a mutating HTTP method.
    MutatingMethodBlocked,
    /// The engine returned no record for this expectation; a skipped record
    /// is synthesized so the set stays total.
    EngineOmitted,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DynamicValue => "dynamic-value",
            Self::InteractionTimeoutExceeded => "interaction-timeout-exceeded",
            Self::RuntimeNotReady => "runtime-not-ready",
            Self::MutatingMethodBlocked => "mutating-method-blocked",
            Self::EngineOmitted => "engine-omitted",
        }
    }
}

/// Ambiguity notes recorded (never enforced) by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    BlockedWriteDetected,
    ConsoleOnly,
    NetworkOnly,
}

impl AmbiguityReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedWriteDetected => "blocked_write_detected",
            Self::ConsoleOnly => "console_only",
            Self::NetworkOnly => "network_only",
        }
    }
}

/// Cross-artifact consistency notes attached when findings and observations
/// disagree about evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossArtifactNote {
    UnmappedToObservation,
    AmbiguousObservationMapping,
    ObservationMissing,
    EvidenceNotInObservation,
}

impl CrossArtifactNote {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnmappedToObservation => "unmapped_to_observation",
            Self::AmbiguousObservationMapping => "ambiguous_observation_mapping",
            Self::ObservationMissing => "observation_missing",
            Self::EvidenceNotInObservation => "evidence_not_in_observation",
        }
    }
}
