//! Detect engine.
//!
//! Pure function of (expectations, observations, evidence index). Each
//! observation yields at most one finding via a fixed decision table; when
//! several rules match, the earliest rule wins — that ordering is part of
//! the contract. No probabilistic scoring anywhere.

use camino::Utf8Path;
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::finding_id;
use crate::types::{
    Expectation, ExpectationType, Finding, FindingEvidence, FindingStatus, FindingType,
    Observation, Severity, Signals,
};

/// Immutable view of the evidence directory contents, keyed by safe relative
/// path.
#[derive(Debug, Clone, Default)]
pub struct EvidenceIndex {
    files: BTreeSet<String>,
}

impl EvidenceIndex {
    /// Index an on-disk evidence directory (recursive, relative paths).
    pub fn from_dir(dir: &Utf8Path) -> anyhow::Result<Self> {
        let mut files = BTreeSet::new();
        if dir.is_dir() {
            collect(dir, dir, &mut files)?;
        }
        Ok(Self { files })
    }

    /// Index from an iterator of relative paths (tests, remote engines).
    pub fn from_files<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: paths.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, rel_path: &str) -> bool {
        self.files.contains(rel_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn collect(root: &Utf8Path, dir: &Utf8Path, files: &mut BTreeSet<String>) -> anyhow::Result<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect(root, path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.insert(rel.as_str().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Classify every observation against its expectation.
///
/// Output ordering: (status priority, finding type, id) — deterministic over
/// identical inputs.
#[must_use]
pub fn detect(
    expectations: &[Expectation],
    observations: &[Observation],
    evidence: &EvidenceIndex,
) -> Vec<Finding> {
    let by_id: BTreeMap<&str, &Observation> =
        observations.iter().map(|o| (o.id.as_str(), o)).collect();

    let mut findings = Vec::new();
    for expectation in expectations {
        let Some(observation) = by_id.get(expectation.id.as_str()) else {
            continue;
        };
        if observation.skipped || !observation.attempted {
            continue;
        }
        if let Some(finding) = classify(expectation, observation, evidence) {
            findings.push(finding);
        }
    }

    findings.sort_by(|a, b| {
        (a.status, a.finding_type, &a.id).cmp(&(b.status, b.finding_type, &b.id))
    });
    findings
}

/// The decision table. Rules are evaluated top-down; first match wins.
fn classify(
    expectation: &Expectation,
    observation: &Observation,
    evidence: &EvidenceIndex,
) -> Option<Finding> {
    let s = &observation.signals;
    let t = expectation.expectation_type;

    // Findings only reference evidence that exists in the index; anything an
    // engine claimed but never materialized is excluded up front.
    let backed: Vec<String> = observation
        .evidence_files
        .iter()
        .filter(|f| evidence.contains(f))
        .cloned()
        .collect();

    // 1. Navigation promise: URL moved but nothing rendered.
    if t == ExpectationType::Navigation && s.navigation_changed && !s.dom_changed && !s.title_changed
    {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::BrokenNavigationPromise,
            Severity::High,
            status_from(s),
            "navigation completed to a page that rendered no new content",
        ));
    }

    // 2. Form submit accepted by the server with zero user-visible effect.
    if t == ExpectationType::Form
        && s.network_status.is_some_and(|code| (200..300).contains(&code))
        && !s.navigation_changed
        && !s.dom_changed
        && !s.feedback_seen
    {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::SilentSubmission,
            Severity::High,
            status_from(s),
            "submission returned 2xx but the user saw no confirmation, navigation or change",
        ));
    }

    // 3. State mutated without a render or an error surface.
    if t == ExpectationType::State
        && !s.state.changed.is_empty()
        && !s.dom_changed
        && !s.error_message_detected
    {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::RenderFailure,
            Severity::Medium,
            status_from(s),
            "state changed but the bound UI never re-rendered",
        ));
    }

    // 4. Network did work; nothing surfaced.
    if s.network_activity && !s.navigation_changed && !s.dom_changed && !s.feedback_seen {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::InvisibleStateFailure,
            Severity::Medium,
            status_from(s),
            "network activity completed without any visible outcome",
        ));
    }

    // 5. Spinner with no content, no error, no navigation.
    if s.loading_indicator_detected
        && !s.dom_changed
        && !s.error_message_detected
        && !s.navigation_changed
    {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::StuckOrPhantomLoading,
            Severity::Low,
            status_from(s),
            "a loading indicator appeared and nothing followed it",
        ));
    }

    // 6. Click-class action swallowed by an enabled element.
    if t.is_click_class() && s.is_silent() && !s.element_disabled {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::SilentPermissionWall,
            Severity::High,
            status_from(s),
            "an enabled control accepted the interaction and did nothing",
        ));
    }

    // 7. Signal seen once but not reproduced on replay.
    if s.replay_mismatch {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::ObservedBreak,
            Severity::Medium,
            FindingStatus::Suspected,
            "an observed signal did not reproduce across replays",
        ));
    }

    // 8. Attempted, totally silent (disabled elements land here).
    if s.is_silent() {
        return Some(build(
            expectation,
            observation,
            &backed,
            FindingType::DeadInteractionSilentFailure,
            Severity::Medium,
            status_from(s),
            "the interaction was attempted and produced no signal at all",
        ));
    }

    None
}

/// Status is a fixed function of signal strength: a strong evidence signal
/// sustains CONFIRMED, anything else starts as SUSPECTED. The validator may
/// only downgrade from here.
fn status_from(signals: &Signals) -> FindingStatus {
    if signals.navigation_changed
        || signals.dom_changed
        || signals.feedback_seen
        || signals.network_activity
    {
        FindingStatus::Confirmed
    } else {
        FindingStatus::Suspected
    }
}

fn build(
    expectation: &Expectation,
    observation: &Observation,
    evidence_files: &[String],
    finding_type: FindingType,
    severity: Severity,
    status: FindingStatus,
    impact: &str,
) -> Finding {
    Finding {
        id: finding_id(&expectation.id, finding_type.as_str()),
        finding_type,
        status,
        severity,
        confidence: expectation.confidence,
        promise: expectation.promise.clone(),
        observed: observation.signals.clone(),
        evidence: FindingEvidence {
            evidence_files: evidence_files.to_vec(),
            signals: observation.signals.clone(),
        },
        impact: impact.to_string(),
        enrichment: crate::types::Enrichment::default(),
    }
}
