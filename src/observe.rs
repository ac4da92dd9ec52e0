//! Observation engine contract.
//!
//! The browser layer is an external collaborator behind the
//! [`ObservationEngine`] trait. This module owns everything Detect relies
//! on: the evidence file-name schema, the per-expectation record shape, and
//! the normalization pass that makes an engine's raw output total, ordered
//! and consistent before it reaches classification.
//!
//! Engines are read-only by design: mutating HTTP methods must be blocked
//! and recorded with `skip_reason = mutating-method-blocked`.

use async_trait::async_trait;
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::paths::is_safe_relative;
use crate::reasons::{IncompleteReason, SkipReason, canonical_reasons};
use crate::types::{Expectation, ExpectationType, Observation, ObserveReport, Stability};

/// Auth material forwarded to the engine. Post-auth runs force INCOMPLETE at
/// the truth layer regardless of what the engine observes.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub storage: Option<String>,
    pub cookie: Option<String>,
    pub header: Option<String>,
    pub mode: Option<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.storage.is_some()
            || self.cookie.is_some()
            || self.header.is_some()
            || self.mode.is_some()
    }
}

/// Evidence file variants in the fixed naming schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceVariant {
    Before,
    After,
    Element,
    DomDiff,
    Network,
    Traces,
}

impl EvidenceVariant {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Element => "element",
            Self::DomDiff => "dom_diff",
            Self::Network => "network",
            Self::Traces => "traces",
        }
    }
}

/// Build an evidence file name: `exp_<N>_<kind>_<variant>.<ext>` where `N`
/// is the 1-based expectation ordinal.
#[must_use]
pub fn evidence_file_name(
    ordinal: usize,
    kind: ExpectationType,
    variant: EvidenceVariant,
    ext: &str,
) -> String {
    let kind = kind.as_str().replace('-', "_");
    format!("exp_{ordinal}_{kind}_{}.{ext}", variant.as_str())
}

static ORDINAL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^exp_([0-9]+)_").unwrap());

/// Parse the expectation ordinal out of an evidence file name.
#[must_use]
pub fn parse_evidence_ordinal(name: &str) -> Option<usize> {
    ORDINAL_PREFIX
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Runtime readiness probe result.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub ready: bool,
    pub reason: Option<IncompleteReason>,
}

impl Readiness {
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    #[must_use]
    pub const fn not_ready(reason: IncompleteReason) -> Self {
        Self {
            ready: false,
            reason: Some(reason),
        }
    }
}

/// One-shot page probe used by the alignment preflight.
#[derive(Debug, Clone)]
pub struct PageProbe {
    pub status: u16,
    pub body_text: String,
}

/// Raw engine output before normalization.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub observations: Vec<Observation>,
    pub incomplete_reasons: Vec<IncompleteReason>,
}

/// Inputs for one observe pass.
pub struct ObserveRequest<'a> {
    pub expectations: &'a [Expectation],
    pub url: &'a str,
    pub evidence_dir: &'a Utf8Path,
    pub auth: Option<&'a AuthConfig>,
    pub interaction_timeout_ms: u64,
}

/// Per-interaction progress callback.
pub trait ProgressSink: Send {
    fn interaction_done(&mut self, id: &str, attempted: bool, observed: bool);
}

/// Sink that drops progress on the floor.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn interaction_done(&mut self, _id: &str, _attempted: bool, _observed: bool) {}
}

/// The browser layer contract.
///
/// Guarantees expected from implementations:
/// - exactly one observation per expectation, in expectation order;
/// - the attempted/observed/skipped consistency rule holds;
/// - evidence files live under the evidence directory with `exp_<N>_`
///   prefixed names, paths recorded relative to it;
/// - identical inputs produce identical outputs.
///
/// Normalization re-checks all of this; a misbehaving engine degrades to
/// skipped records rather than corrupting the pipeline.
#[async_trait]
pub trait ObservationEngine: Send + Sync {
    /// Probe the runtime before exercising anything.
    async fn readiness(&self, url: &str) -> Readiness;

    /// Exercise the expectations and emit one record each.
    async fn observe(
        &self,
        request: ObserveRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> anyhow::Result<EngineOutput>;

    /// Fetch the page once for the alignment preflight.
    async fn probe_page(&self, url: &str) -> anyhow::Result<PageProbe>;
}

/// Stand-in engine for environments with no browser driver attached. Every
/// run through it surfaces as INCOMPLETE, never as SUCCESS.
pub struct UnavailableDriver;

#[async_trait]
impl ObservationEngine for UnavailableDriver {
    async fn readiness(&self, _url: &str) -> Readiness {
        Readiness::not_ready(IncompleteReason::BrowserDriverUnavailable)
    }

    async fn observe(
        &self,
        _request: ObserveRequest<'_>,
        _progress: &mut dyn ProgressSink,
    ) -> anyhow::Result<EngineOutput> {
        Ok(EngineOutput {
            observations: Vec::new(),
            incomplete_reasons: vec![IncompleteReason::BrowserDriverUnavailable],
        })
    }

    async fn probe_page(&self, _url: &str) -> anyhow::Result<PageProbe> {
        anyhow::bail!("no browser driver attached")
    }
}

/// Make engine output total, ordered and consistent.
///
/// - Missing records are synthesized as skipped (`engine-omitted`).
/// - Records violating the consistency rule are coerced deterministically.
/// - Unsafe evidence paths are dropped.
/// - Output order follows expectation order; evidence lists are sorted.
#[must_use]
pub fn normalize(expectations: &[Expectation], output: EngineOutput) -> ObserveReport {
    let mut by_id: BTreeMap<String, Observation> = output
        .observations
        .into_iter()
        .map(|o| (o.id.clone(), o))
        .collect();

    let mut observations = Vec::with_capacity(expectations.len());
    for expectation in expectations {
        let mut obs = by_id
            .remove(&expectation.id)
            .unwrap_or_else(|| Observation::skipped(&expectation.id, SkipReason::EngineOmitted));

        if obs.observed && !obs.attempted {
            obs.attempted = true;
        }
        if obs.skipped {
            obs.attempted = false;
            obs.observed = false;
            if obs.skip_reason.is_none() {
                obs.skip_reason = Some(SkipReason::EngineOmitted);
            }
        }

        obs.evidence_files.retain(|path| is_safe_relative(path));
        obs.evidence_files.sort();
        obs.evidence_files.dedup();

        debug_assert!(obs.is_consistent());
        observations.push(obs);
    }

    ObserveReport {
        schema_version: ObserveReport::SCHEMA_VERSION.to_string(),
        observations,
        stability: Stability {
            incomplete_reasons: canonical_reasons(output.incomplete_reasons),
        },
    }
}
