//! Core value types for the scan pipeline.
//!
//! Expectations, observations and findings are plain value types with total
//! field sets; every classification dimension is a closed sum type. All
//! serde forms are stable: they appear verbatim in hashed artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reasons::{AmbiguityReason, CrossArtifactNote, IncompleteReason, SkipReason};

/// Kinds of user-facing promises a source tree can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpectationType {
    Navigation,
    Network,
    State,
    Validation,
    Form,
    UiFeedback,
}

impl ExpectationType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Network => "network",
            Self::State => "state",
            Self::Validation => "validation",
            Self::Form => "form",
            Self::UiFeedback => "ui-feedback",
        }
    }

    /// Whether exercising this expectation is a click-class interaction
    /// (used by the silent-permission-wall detection rule).
    #[must_use]
    pub const fn is_click_class(&self) -> bool {
        matches!(self, Self::Navigation | Self::Form | Self::State)
    }
}

/// The concrete action a source site promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseKind {
    Navigate,
    Request,
    Submit,
    StateMutation,
    Feedback,
}

impl PromiseKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Request => "request",
            Self::Submit => "submit",
            Self::StateMutation => "state_mutation",
            Self::Feedback => "feedback",
        }
    }
}

/// A promise: what the source claims will happen, and about what.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Promise {
    pub kind: PromiseKind,
    pub value: String,
}

/// Where in the source tree a promise was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path relative to the scanned source root, forward slashes.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// A statically extracted user-facing promise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    /// Deterministic id over (file, line, column, kind, value).
    pub id: String,
    #[serde(rename = "type")]
    pub expectation_type: ExpectationType,
    pub promise: Promise,
    pub source: SourceLocation,
    /// Static heuristic strength in [0, 1].
    pub confidence: f64,
}

/// Tally of extraction sites that never become expectations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTally {
    /// Interpolated or template-derived values.
    pub dynamic: u32,
    /// Values built by runtime computation (concatenation, ternaries).
    pub computed: u32,
    /// Literal values outside the exercisable scope (relative API urls,
    /// non-http schemes).
    pub external: u32,
    /// Files that could not be read or decoded.
    pub parse_error: u32,
}

impl SkipTally {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.dynamic + self.computed + self.external + self.parse_error
    }
}

/// `learn.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnReport {
    pub schema_version: String,
    pub expectations: Vec<Expectation>,
    pub skipped: SkipTally,
    pub files_scanned: u32,
}

impl LearnReport {
    pub const SCHEMA_VERSION: &'static str = "learn.v1";

    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            expectations: Vec::new(),
            skipped: SkipTally::default(),
            files_scanned: 0,
        }
    }
}

/// State-related runtime signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSignals {
    /// Identifiers of state slots that changed during the attempt.
    pub changed: Vec<String>,
}

/// Runtime signals recorded while exercising one expectation.
///
/// `title_changed`, `network_status`, `element_disabled` and
/// `replay_mismatch` are contract additions consumed by specific detection
/// rules; observation engines must populate them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    pub navigation_changed: bool,
    pub title_changed: bool,
    pub dom_changed: bool,
    pub feedback_seen: bool,
    pub network_activity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_status: Option<u16>,
    pub console_errors: u32,
    pub blocked_write: bool,
    pub loading_indicator_detected: bool,
    pub error_message_detected: bool,
    pub element_disabled: bool,
    pub replay_mismatch: bool,
    pub state: StateSignals,
}

impl Signals {
    /// True when the attempt produced no user-visible or network signal at
    /// all (detection rules 6 and 8).
    #[must_use]
    pub fn is_silent(&self) -> bool {
        !self.navigation_changed
            && !self.title_changed
            && !self.dom_changed
            && !self.feedback_seen
            && !self.network_activity
            && self.console_errors == 0
            && !self.blocked_write
            && !self.loading_indicator_detected
            && !self.error_message_detected
            && self.state.changed.is_empty()
    }
}

/// Informational timings for one attempt. Excluded from all digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub total_ms: u64,
    pub settle_ms: u64,
}

/// The single execution record for one expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Equals the expectation id.
    pub id: String,
    pub attempted: bool,
    pub observed: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub signals: Signals,
    /// Safe relative paths under the evidence directory, `exp_<N>_` prefixed.
    pub evidence_files: Vec<String>,
    pub timings: Timings,
}

impl Observation {
    /// Record for an expectation that was never reached.
    #[must_use]
    pub fn skipped(id: &str, reason: SkipReason) -> Self {
        Self {
            id: id.to_string(),
            attempted: false,
            observed: false,
            skipped: true,
            skip_reason: Some(reason),
            signals: Signals::default(),
            evidence_files: Vec::new(),
            timings: Timings::default(),
        }
    }

    /// The `observed ⇒ attempted`, `skipped ⇒ ¬attempted`,
    /// `skipped ⇒ skip_reason ≠ ∅` consistency rule.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.observed && !self.attempted {
            return false;
        }
        if self.skipped && self.attempted {
            return false;
        }
        if self.skipped && self.skip_reason.is_none() {
            return false;
        }
        true
    }
}

/// Observation-set stability notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stability {
    pub incomplete_reasons: Vec<IncompleteReason>,
}

/// `observe.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveReport {
    pub schema_version: String,
    pub observations: Vec<Observation>,
    pub stability: Stability,
}

impl ObserveReport {
    pub const SCHEMA_VERSION: &'static str = "observe.v1";

    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            observations: Vec::new(),
            stability: Stability::default(),
        }
    }
}

/// Closed set of finding classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    BrokenNavigationPromise,
    SilentSubmission,
    RenderFailure,
    InvisibleStateFailure,
    StuckOrPhantomLoading,
    SilentPermissionWall,
    ObservedBreak,
    DeadInteractionSilentFailure,
}

impl FindingType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BrokenNavigationPromise => "broken_navigation_promise",
            Self::SilentSubmission => "silent_submission",
            Self::RenderFailure => "render_failure",
            Self::InvisibleStateFailure => "invisible_state_failure",
            Self::StuckOrPhantomLoading => "stuck_or_phantom_loading",
            Self::SilentPermissionWall => "silent_permission_wall",
            Self::ObservedBreak => "observed_break",
            Self::DeadInteractionSilentFailure => "dead_interaction_silent_failure",
        }
    }

    /// Types subject to the Evidence File Existence Law.
    #[must_use]
    pub const fn requires_evidence_files(&self) -> bool {
        matches!(
            self,
            Self::DeadInteractionSilentFailure
                | Self::BrokenNavigationPromise
                | Self::SilentSubmission
        )
    }
}

/// Finding status, ordered by display priority (CONFIRMED first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Confirmed,
    Suspected,
    Informational,
}

impl FindingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Suspected => "SUSPECTED",
            Self::Informational => "INFORMATIONAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Evidence classification buckets (Evidence Law v2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Navigation,
    MeaningfulDom,
    Feedback,
    Network,
    Console,
    BlockedWrite,
    CapturedEvidence,
}

impl EvidenceCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::MeaningfulDom => "meaningful_dom",
            Self::Feedback => "feedback",
            Self::Network => "network",
            Self::Console => "console",
            Self::BlockedWrite => "blocked_write",
            Self::CapturedEvidence => "captured_evidence",
        }
    }

    /// Strong categories can sustain a CONFIRMED status on their own.
    #[must_use]
    pub const fn is_strong(&self) -> bool {
        matches!(
            self,
            Self::Navigation | Self::MeaningfulDom | Self::Feedback | Self::Network
        )
    }
}

/// Evidence attached to a finding: file references plus structured signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingEvidence {
    pub evidence_files: Vec<String>,
    pub signals: Signals,
}

/// Validator annotations. All lists are deduplicated and sorted before any
/// artifact write so hashes stay stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub ambiguity_reasons: Vec<AmbiguityReason>,
    pub evidence_categories: Vec<EvidenceCategory>,
    pub evidence_law_downgrade_reasons: Vec<String>,
    pub evidence_file_law_downgrade_reasons: Vec<String>,
    pub evidence_cross_artifact_notes: Vec<CrossArtifactNote>,
}

/// A classified discrepancy between a promise and its observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub status: FindingStatus,
    pub severity: Severity,
    pub confidence: f64,
    pub promise: Promise,
    /// Snapshot of the signals that drove the classification.
    pub observed: Signals,
    pub evidence: FindingEvidence,
    pub impact: String,
    #[serde(default)]
    pub enrichment: Enrichment,
}

/// `findings.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingsReport {
    pub schema_version: String,
    pub findings: Vec<Finding>,
}

impl FindingsReport {
    pub const SCHEMA_VERSION: &'static str = "findings.v1";

    #[must_use]
    pub fn new(findings: Vec<Finding>) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            findings,
        }
    }
}

/// Final run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TruthState {
    Success,
    Findings,
    Incomplete,
}

impl TruthState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Findings => "FINDINGS",
            Self::Incomplete => "INCOMPLETE",
        }
    }
}

/// Orchestrator state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Running,
    Finalizing,
    Final,
}

impl RunState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Finalizing => "FINALIZING",
            Self::Final => "FINAL",
        }
    }
}

/// `run.status.json` payload; rewritten atomically on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub schema_version: String,
    pub state: RunState,
    pub scan_id: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truth: Option<TruthState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub incomplete_reasons: Vec<IncompleteReason>,
    pub updated_at: DateTime<Utc>,
}

impl RunStatus {
    pub const SCHEMA_VERSION: &'static str = "run-status.v1";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_type_serde_forms() {
        let json = serde_json::to_string(&ExpectationType::UiFeedback).unwrap();
        assert_eq!(json, r#""ui-feedback""#);
        let json = serde_json::to_string(&ExpectationType::Navigation).unwrap();
        assert_eq!(json, r#""navigation""#);
    }

    #[test]
    fn finding_type_serde_matches_as_str() {
        for ft in [
            FindingType::BrokenNavigationPromise,
            FindingType::SilentSubmission,
            FindingType::DeadInteractionSilentFailure,
        ] {
            let json = serde_json::to_string(&ft).unwrap();
            assert_eq!(json, format!("\"{}\"", ft.as_str()));
        }
    }

    #[test]
    fn status_and_severity_screaming_case() {
        assert_eq!(
            serde_json::to_string(&FindingStatus::Confirmed).unwrap(),
            r#""CONFIRMED""#
        );
        assert_eq!(
            serde_json::to_string(&Severity::Unknown).unwrap(),
            r#""UNKNOWN""#
        );
        assert_eq!(
            serde_json::to_string(&TruthState::Incomplete).unwrap(),
            r#""INCOMPLETE""#
        );
    }

    #[test]
    fn observation_consistency_rule() {
        let mut obs = Observation::skipped("exp-1", SkipReason::RuntimeNotReady);
        assert!(obs.is_consistent());

        obs.skip_reason = None;
        assert!(!obs.is_consistent());

        obs.skipped = false;
        obs.observed = true;
        obs.attempted = false;
        assert!(!obs.is_consistent());

        obs.attempted = true;
        assert!(obs.is_consistent());
    }

    #[test]
    fn silent_signals() {
        let signals = Signals::default();
        assert!(signals.is_silent());

        let noisy = Signals {
            console_errors: 1,
            ..Signals::default()
        };
        assert!(!noisy.is_silent());
    }

    #[test]
    fn evidence_file_law_type_set() {
        assert!(FindingType::SilentSubmission.requires_evidence_files());
        assert!(FindingType::BrokenNavigationPromise.requires_evidence_files());
        assert!(FindingType::DeadInteractionSilentFailure.requires_evidence_files());
        assert!(!FindingType::RenderFailure.requires_evidence_files());
    }

    #[test]
    fn strong_evidence_categories() {
        assert!(EvidenceCategory::Navigation.is_strong());
        assert!(EvidenceCategory::Network.is_strong());
        assert!(!EvidenceCategory::Console.is_strong());
        assert!(!EvidenceCategory::CapturedEvidence.is_strong());
    }

    #[test]
    fn status_ordering_puts_confirmed_first() {
        assert!(FindingStatus::Confirmed < FindingStatus::Suspected);
        assert!(FindingStatus::Suspected < FindingStatus::Informational);
    }
}
