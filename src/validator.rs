//! Constitutional validator (Evidence Law v2).
//!
//! Pure sanitation pass over Detect output. Laws apply in a fixed sequence:
//! required fields, the strong-evidence-category law, the evidence-file
//! existence law, observe↔findings consistency, the ambiguity recorder, and
//! the no-guessing rule. Laws only ever keep, downgrade or drop — they never
//! upgrade. Every disposition is recorded in `judgments.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::detect::EvidenceIndex;
use crate::observe::parse_evidence_ordinal;
use crate::reasons::{AmbiguityReason, CrossArtifactNote};
use crate::types::{
    EvidenceCategory, Finding, FindingStatus, Observation, Signals,
};

/// What happened to a finding during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Kept,
    Downgraded,
    Dropped,
}

/// Audit record for one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub finding_id: String,
    pub disposition: Disposition,
    /// Laws that altered the finding, in application order.
    pub laws_applied: Vec<String>,
    pub notes: Vec<String>,
}

/// `judgments.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentsReport {
    pub schema_version: String,
    pub judgments: Vec<Judgment>,
}

impl JudgmentsReport {
    pub const SCHEMA_VERSION: &'static str = "judgments.v1";
}

/// Validator output: surviving findings plus the audit trail.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub findings: Vec<Finding>,
    pub judgments: JudgmentsReport,
}

/// Run the full law sequence over the findings.
#[must_use]
pub fn validate(
    findings: Vec<Finding>,
    observations: &[Observation],
    evidence: &EvidenceIndex,
) -> ValidationOutcome {
    let mut kept = Vec::new();
    let mut judgments = Vec::new();

    for mut finding in findings {
        let mut laws_applied = Vec::new();
        let mut notes = Vec::new();

        // 1. Required fields.
        if let Some(reason) = required_fields_violation(&finding) {
            judgments.push(Judgment {
                finding_id: finding.id.clone(),
                disposition: Disposition::Dropped,
                laws_applied: vec!["required_fields".to_string()],
                notes: vec![reason],
            });
            continue;
        }

        // 2. Evidence Law v2: strong category required for CONFIRMED.
        let categories = categorize(&finding.observed, &finding.evidence.evidence_files);
        finding.enrichment.evidence_categories = categories.clone();
        let has_strong = categories.iter().any(EvidenceCategory::is_strong);
        if finding.status == FindingStatus::Confirmed && !has_strong {
            finding.status = FindingStatus::Suspected;
            finding
                .enrichment
                .evidence_law_downgrade_reasons
                .push("missing_strong_evidence_category".to_string());
            laws_applied.push("evidence_law_v2".to_string());
        }

        // 3. Evidence File Existence Law for the silent-failure types.
        if finding.status == FindingStatus::Confirmed
            && finding.finding_type.requires_evidence_files()
        {
            let violations = evidence_file_violations(&finding, evidence);
            if !violations.is_empty() {
                finding.status = FindingStatus::Suspected;
                finding
                    .enrichment
                    .evidence_file_law_downgrade_reasons
                    .extend(violations);
                laws_applied.push("evidence_file_existence_law".to_string());
            }
        }

        // 4. Observe ↔ Findings consistency for the same type set.
        if finding.status == FindingStatus::Confirmed
            && finding.finding_type.requires_evidence_files()
        {
            let cross_notes = cross_artifact_violations(&finding, observations);
            if !cross_notes.is_empty() {
                finding.status = FindingStatus::Suspected;
                finding
                    .enrichment
                    .evidence_cross_artifact_notes
                    .extend(cross_notes);
                laws_applied.push("observe_findings_consistency".to_string());
            }
        }

        // 5. Ambiguity engine: records, never rejects.
        finding.enrichment.ambiguity_reasons = ambiguity_reasons(&finding.observed);

        // 6. No-Guessing: high confidence with zero evidence entries.
        if finding.confidence > 0.85
            && finding.evidence.evidence_files.is_empty()
            && categories.is_empty()
        {
            judgments.push(Judgment {
                finding_id: finding.id.clone(),
                disposition: Disposition::Dropped,
                laws_applied: vec!["no_guessing".to_string()],
                notes: vec!["confidence above 0.85 with zero evidence entries".to_string()],
            });
            continue;
        }

        seal_enrichment(&mut finding);

        let disposition = if laws_applied.is_empty() {
            Disposition::Kept
        } else {
            notes.push(format!("downgraded to {}", finding.status.as_str()));
            Disposition::Downgraded
        };
        judgments.push(Judgment {
            finding_id: finding.id.clone(),
            disposition,
            laws_applied,
            notes,
        });
        kept.push(finding);
    }

    // Downgrades change the status key; restore canonical ordering.
    kept.sort_by(|a, b| (a.status, a.finding_type, &a.id).cmp(&(b.status, b.finding_type, &b.id)));

    ValidationOutcome {
        findings: kept,
        judgments: JudgmentsReport {
            schema_version: JudgmentsReport::SCHEMA_VERSION.to_string(),
            judgments,
        },
    }
}

fn required_fields_violation(finding: &Finding) -> Option<String> {
    if finding.id.is_empty() {
        return Some("empty finding id".to_string());
    }
    if !(0.0..=1.0).contains(&finding.confidence) || !finding.confidence.is_finite() {
        return Some(format!("confidence out of range: {}", finding.confidence));
    }
    if finding.promise.value.is_empty() {
        return Some("empty promise value".to_string());
    }
    if finding.impact.is_empty() {
        return Some("empty impact".to_string());
    }
    None
}

/// Classify evidence by signal presence plus captured files.
fn categorize(signals: &Signals, evidence_files: &[String]) -> Vec<EvidenceCategory> {
    let mut categories = BTreeSet::new();
    if signals.navigation_changed {
        categories.insert(EvidenceCategory::Navigation);
    }
    if signals.dom_changed {
        categories.insert(EvidenceCategory::MeaningfulDom);
    }
    if signals.feedback_seen {
        categories.insert(EvidenceCategory::Feedback);
    }
    if signals.network_activity {
        categories.insert(EvidenceCategory::Network);
    }
    if signals.console_errors > 0 {
        categories.insert(EvidenceCategory::Console);
    }
    if signals.blocked_write {
        categories.insert(EvidenceCategory::BlockedWrite);
    }
    if !evidence_files.is_empty() {
        categories.insert(EvidenceCategory::CapturedEvidence);
    }
    categories.into_iter().collect()
}

fn evidence_file_violations(finding: &Finding, evidence: &EvidenceIndex) -> Vec<String> {
    let files = &finding.evidence.evidence_files;
    let mut violations = Vec::new();

    if files.is_empty() {
        violations.push("no_evidence_files".to_string());
        return violations;
    }
    if files
        .iter()
        .any(|f| !crate::paths::is_safe_relative(f) || !evidence.contains(f))
    {
        violations.push("evidence_file_missing".to_string());
    }
    if !has_strong_file_class(files) {
        violations.push("no_strong_evidence_file".to_string());
    }
    violations
}

/// Strong file classes: a dom diff, a network trace, or a before/after
/// screenshot pair.
fn has_strong_file_class(files: &[String]) -> bool {
    let has_dom_diff = files.iter().any(|f| f.ends_with("dom_diff.json"));
    let has_network = files.iter().any(|f| f.ends_with("network.json"));
    let has_before = files.iter().any(|f| f.ends_with("before.png"));
    let has_after = files.iter().any(|f| f.ends_with("after.png"));
    has_dom_diff || has_network || (has_before && has_after)
}

fn cross_artifact_violations(
    finding: &Finding,
    observations: &[Observation],
) -> Vec<CrossArtifactNote> {
    let files = &finding.evidence.evidence_files;
    let mut notes = BTreeSet::new();

    let mut ordinals = BTreeSet::new();
    for file in files {
        match parse_evidence_ordinal(file) {
            Some(n) => {
                ordinals.insert(n);
            }
            None => {
                notes.insert(CrossArtifactNote::UnmappedToObservation);
            }
        }
    }

    if ordinals.len() > 1 {
        notes.insert(CrossArtifactNote::AmbiguousObservationMapping);
    } else if let Some(&ordinal) = ordinals.iter().next() {
        match ordinal.checked_sub(1).and_then(|i| observations.get(i)) {
            None => {
                notes.insert(CrossArtifactNote::ObservationMissing);
            }
            Some(observation) => {
                if files
                    .iter()
                    .any(|f| !observation.evidence_files.contains(f))
                {
                    notes.insert(CrossArtifactNote::EvidenceNotInObservation);
                }
            }
        }
    }

    let mut sorted: Vec<CrossArtifactNote> = notes.into_iter().collect();
    sorted.sort_by_key(CrossArtifactNote::as_str);
    sorted
}

fn ambiguity_reasons(signals: &Signals) -> Vec<AmbiguityReason> {
    let mut reasons = Vec::new();
    if signals.blocked_write {
        reasons.push(AmbiguityReason::BlockedWriteDetected);
    }
    let strong = signals.navigation_changed
        || signals.dom_changed
        || signals.feedback_seen
        || signals.network_activity;
    if signals.console_errors > 0 && !strong {
        reasons.push(AmbiguityReason::ConsoleOnly);
    }
    if signals.network_activity
        && !signals.navigation_changed
        && !signals.dom_changed
        && !signals.feedback_seen
    {
        reasons.push(AmbiguityReason::NetworkOnly);
    }
    reasons
}

/// Deduplicate and lexicographically sort every enrichment list.
fn seal_enrichment(finding: &mut Finding) {
    let e = &mut finding.enrichment;
    e.ambiguity_reasons.sort_by_key(AmbiguityReason::as_str);
    e.ambiguity_reasons.dedup();
    e.evidence_categories.sort_by_key(EvidenceCategory::as_str);
    e.evidence_categories.dedup();
    e.evidence_law_downgrade_reasons.sort();
    e.evidence_law_downgrade_reasons.dedup();
    e.evidence_file_law_downgrade_reasons.sort();
    e.evidence_file_law_downgrade_reasons.dedup();
    e.evidence_cross_artifact_notes
        .sort_by_key(CrossArtifactNote::as_str);
    e.evidence_cross_artifact_notes.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Enrichment, FindingEvidence, FindingType, Promise, PromiseKind, Severity, Timings,
    };

    fn finding(
        finding_type: FindingType,
        status: FindingStatus,
        signals: Signals,
        files: Vec<&str>,
    ) -> Finding {
        Finding {
            id: "fnd-0000000000000001".to_string(),
            finding_type,
            status,
            severity: Severity::High,
            confidence: 0.8,
            promise: Promise {
                kind: PromiseKind::Navigate,
                value: "/x".to_string(),
            },
            observed: signals.clone(),
            evidence: FindingEvidence {
                evidence_files: files.into_iter().map(String::from).collect(),
                signals,
            },
            impact: "impact".to_string(),
            enrichment: Enrichment::default(),
        }
    }

    fn observation_with_evidence(id: &str, files: Vec<&str>) -> Observation {
        Observation {
            id: id.to_string(),
            attempted: true,
            observed: true,
            skipped: false,
            skip_reason: None,
            signals: Signals::default(),
            evidence_files: files.into_iter().map(String::from).collect(),
            timings: Timings::default(),
        }
    }

    fn nav_signals() -> Signals {
        Signals {
            navigation_changed: true,
            ..Signals::default()
        }
    }

    #[test]
    fn confirmed_without_strong_category_is_downgraded() {
        let weak = Signals {
            console_errors: 2,
            ..Signals::default()
        };
        let f = finding(
            FindingType::RenderFailure,
            FindingStatus::Confirmed,
            weak,
            vec!["exp_1_state_element.png"],
        );
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        let f = &outcome.findings[0];
        assert_eq!(f.status, FindingStatus::Suspected);
        assert_eq!(
            f.enrichment.evidence_law_downgrade_reasons,
            vec!["missing_strong_evidence_category".to_string()]
        );
        assert_eq!(outcome.judgments.judgments[0].disposition, Disposition::Downgraded);
    }

    #[test]
    fn confirmed_with_strong_category_survives() {
        let files = vec!["exp_1_navigation_dom_diff.json"];
        let obs = observation_with_evidence("exp-1", files.clone());
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files.clone(),
        );
        let index = EvidenceIndex::from_files(files);
        let outcome = validate(vec![f], &[obs], &index);
        assert_eq!(outcome.findings[0].status, FindingStatus::Confirmed);
        assert_eq!(outcome.judgments.judgments[0].disposition, Disposition::Kept);
    }

    #[test]
    fn silent_type_without_files_is_downgraded() {
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            vec![],
        );
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        let f = &outcome.findings[0];
        assert_eq!(f.status, FindingStatus::Suspected);
        assert!(f
            .enrichment
            .evidence_file_law_downgrade_reasons
            .contains(&"no_evidence_files".to_string()));
    }

    #[test]
    fn missing_on_disk_evidence_downgrades() {
        let files = vec!["exp_1_navigation_dom_diff.json"];
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files,
        );
        // Index is empty: the referenced file does not exist.
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        assert!(outcome.findings[0]
            .enrichment
            .evidence_file_law_downgrade_reasons
            .contains(&"evidence_file_missing".to_string()));
    }

    #[test]
    fn weak_file_classes_are_insufficient() {
        let files = vec!["exp_1_navigation_element.png"];
        let obs = observation_with_evidence("exp-1", files.clone());
        let index = EvidenceIndex::from_files(files.clone());
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files,
        );
        let outcome = validate(vec![f], &[obs], &index);
        assert!(outcome.findings[0]
            .enrichment
            .evidence_file_law_downgrade_reasons
            .contains(&"no_strong_evidence_file".to_string()));
    }

    #[test]
    fn before_after_pair_is_a_strong_class() {
        assert!(has_strong_file_class(&[
            "exp_1_form_before.png".to_string(),
            "exp_1_form_after.png".to_string(),
        ]));
        assert!(!has_strong_file_class(&["exp_1_form_before.png".to_string()]));
        assert!(has_strong_file_class(&["exp_2_form_network.json".to_string()]));
    }

    #[test]
    fn ambiguous_ordinal_mapping_downgrades() {
        let files = vec![
            "exp_1_navigation_dom_diff.json",
            "exp_2_navigation_before.png",
        ];
        let index = EvidenceIndex::from_files(files.clone());
        let obs = observation_with_evidence("exp-1", files.clone());
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files,
        );
        let outcome = validate(vec![f], &[obs], &index);
        assert!(outcome.findings[0]
            .enrichment
            .evidence_cross_artifact_notes
            .contains(&CrossArtifactNote::AmbiguousObservationMapping));
        assert_eq!(outcome.findings[0].status, FindingStatus::Suspected);
    }

    #[test]
    fn evidence_not_in_observation_downgrades() {
        let files = vec!["exp_1_navigation_dom_diff.json"];
        let index = EvidenceIndex::from_files(files.clone());
        // The observation never recorded that file.
        let obs = observation_with_evidence("exp-1", vec!["exp_1_navigation_before.png"]);
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files,
        );
        let outcome = validate(vec![f], &[obs], &index);
        assert!(outcome.findings[0]
            .enrichment
            .evidence_cross_artifact_notes
            .contains(&CrossArtifactNote::EvidenceNotInObservation));
    }

    #[test]
    fn observation_missing_for_ordinal_downgrades() {
        let files = vec!["exp_7_navigation_dom_diff.json"];
        let index = EvidenceIndex::from_files(files.clone());
        let f = finding(
            FindingType::BrokenNavigationPromise,
            FindingStatus::Confirmed,
            nav_signals(),
            files,
        );
        let outcome = validate(vec![f], &[], &index);
        assert!(outcome.findings[0]
            .enrichment
            .evidence_cross_artifact_notes
            .contains(&CrossArtifactNote::ObservationMissing));
    }

    #[test]
    fn no_guessing_drops_high_confidence_evidence_free_findings() {
        let mut f = finding(
            FindingType::SilentPermissionWall,
            FindingStatus::Suspected,
            Signals::default(),
            vec![],
        );
        f.confidence = 0.9;
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.judgments.judgments[0].disposition, Disposition::Dropped);
        assert_eq!(
            outcome.judgments.judgments[0].laws_applied,
            vec!["no_guessing".to_string()]
        );
    }

    #[test]
    fn required_fields_drop() {
        let mut f = finding(
            FindingType::RenderFailure,
            FindingStatus::Suspected,
            Signals::default(),
            vec![],
        );
        f.confidence = f64::NAN;
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.judgments.judgments[0].disposition, Disposition::Dropped);
    }

    #[test]
    fn ambiguity_reasons_are_recorded_not_enforced() {
        let signals = Signals {
            network_activity: true,
            blocked_write: true,
            ..Signals::default()
        };
        let files = vec!["exp_1_network_network.json"];
        let obs = observation_with_evidence("exp-1", files.clone());
        let index = EvidenceIndex::from_files(files.clone());
        let f = finding(
            FindingType::InvisibleStateFailure,
            FindingStatus::Confirmed,
            signals,
            files,
        );
        let outcome = validate(vec![f], &[obs], &index);
        let f = &outcome.findings[0];
        assert_eq!(f.status, FindingStatus::Confirmed);
        assert_eq!(
            f.enrichment.ambiguity_reasons,
            vec![
                AmbiguityReason::BlockedWriteDetected,
                AmbiguityReason::NetworkOnly
            ]
        );
    }

    #[test]
    fn enrichment_lists_are_sorted_and_deduped() {
        let weak = Signals {
            console_errors: 1,
            ..Signals::default()
        };
        let f = finding(
            FindingType::RenderFailure,
            FindingStatus::Confirmed,
            weak,
            vec!["exp_1_state_element.png"],
        );
        let outcome = validate(vec![f], &[], &EvidenceIndex::default());
        let categories = &outcome.findings[0].enrichment.evidence_categories;
        let mut sorted = categories.clone();
        sorted.sort_by_key(EvidenceCategory::as_str);
        assert_eq!(categories, &sorted);
    }
}
