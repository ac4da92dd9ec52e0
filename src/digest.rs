//! Determinism digest.
//!
//! Hashes the non-volatile projection of the run: normalized expectations,
//! observations, findings and summary counts. Volatile material — timestamps,
//! durations, the run id, finding ids, ephemeral paths — is stripped before
//! hashing, so re-running on identical inputs yields the identical digest.
//!
//! Schema is tagged `digest.v1`; adding any projected field requires a bump
//! to `digest.v2`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{hash_canonical, sha256_hex};
use crate::types::{FindingsReport, LearnReport, ObserveReport};

/// Keys stripped from every projection level before hashing.
const VOLATILE_KEYS: &[&str] = &[
    "timings",
    "run_id",
    "updated_at",
    "emitted_at",
    "started_at",
    "finished_at",
    "at",
];

/// Count block shared between `summary.json` and the digest projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub expectations_total: u32,
    pub attempted: u32,
    pub observed: u32,
    pub confirmed: u32,
}

/// Per-artifact hashes over the determinism projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestArtifacts {
    pub learn: String,
    pub observe: String,
    pub findings: String,
    pub summary: String,
}

/// `run.digest.json` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestReport {
    pub schema_version: String,
    pub artifacts: DigestArtifacts,
    pub deterministic_digest: String,
}

impl DigestReport {
    pub const SCHEMA_VERSION: &'static str = "digest.v1";
}

/// Compute the digest over the run's deterministic projection.
pub fn compute(
    learn: &LearnReport,
    observe: &ObserveReport,
    findings: &FindingsReport,
    counts: &SummaryCounts,
) -> Result<DigestReport> {
    let learn_hash = hash_projection(serde_json::to_value(learn)?, false)?;
    let observe_hash = hash_projection(serde_json::to_value(observe)?, false)?;
    // Finding ids are excluded from the projection by contract.
    let findings_hash = hash_projection(serde_json::to_value(findings)?, true)?;
    let summary_hash = hash_projection(serde_json::to_value(counts)?, false)?;

    let composite = format!("{learn_hash}{observe_hash}{findings_hash}{summary_hash}");
    Ok(DigestReport {
        schema_version: DigestReport::SCHEMA_VERSION.to_string(),
        artifacts: DigestArtifacts {
            learn: learn_hash,
            observe: observe_hash,
            findings: findings_hash,
            summary: summary_hash,
        },
        deterministic_digest: sha256_hex(composite.as_bytes()),
    })
}

fn hash_projection(mut value: Value, strip_ids: bool) -> Result<String> {
    strip_volatile(&mut value, strip_ids);
    hash_canonical(&value)
}

fn strip_volatile(value: &mut Value, strip_ids: bool) {
    match value {
        Value::Object(map) => {
            for key in VOLATILE_KEYS {
                map.remove(*key);
            }
            if strip_ids {
                map.remove("id");
            }
            for (_, nested) in map.iter_mut() {
                strip_volatile(nested, strip_ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_volatile(item, strip_ids);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasons::SkipReason;
    use crate::types::{Observation, Timings};

    fn sample_observe(total_ms: u64) -> ObserveReport {
        let mut obs = Observation::skipped("exp-1", SkipReason::RuntimeNotReady);
        obs.timings = Timings {
            total_ms,
            settle_ms: 0,
        };
        ObserveReport {
            schema_version: ObserveReport::SCHEMA_VERSION.to_string(),
            observations: vec![obs],
            stability: crate::types::Stability::default(),
        }
    }

    #[test]
    fn digest_is_stable_over_identical_inputs() {
        let learn = LearnReport::empty();
        let observe = sample_observe(10);
        let findings = FindingsReport::new(Vec::new());
        let counts = SummaryCounts::default();

        let a = compute(&learn, &observe, &findings, &counts).unwrap();
        let b = compute(&learn, &observe, &findings, &counts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.schema_version, "digest.v1");
    }

    #[test]
    fn timings_do_not_affect_the_digest() {
        let learn = LearnReport::empty();
        let findings = FindingsReport::new(Vec::new());
        let counts = SummaryCounts::default();

        let a = compute(&learn, &sample_observe(10), &findings, &counts).unwrap();
        let b = compute(&learn, &sample_observe(99_999), &findings, &counts).unwrap();
        assert_eq!(a.deterministic_digest, b.deterministic_digest);
    }

    #[test]
    fn counts_do_affect_the_digest() {
        let learn = LearnReport::empty();
        let observe = ObserveReport::empty();
        let findings = FindingsReport::new(Vec::new());

        let a = compute(&learn, &observe, &findings, &SummaryCounts::default()).unwrap();
        let b = compute(
            &learn,
            &observe,
            &findings,
            &SummaryCounts {
                observed: 1,
                ..SummaryCounts::default()
            },
        )
        .unwrap();
        assert_ne!(a.deterministic_digest, b.deterministic_digest);
        assert_eq!(a.artifacts.learn, b.artifacts.learn);
    }

    #[test]
    fn strip_removes_nested_volatile_keys() {
        let mut value = serde_json::json!({
            "run_id": "run-1",
            "nested": [{"timings": {"total_ms": 5}, "keep": 1}],
        });
        strip_volatile(&mut value, false);
        assert!(value.get("run_id").is_none());
        assert!(value["nested"][0].get("timings").is_none());
        assert_eq!(value["nested"][0]["keep"], 1);
    }
}
