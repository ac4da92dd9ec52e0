//! Alignment preflight (opt-in).
//!
//! One read-only page probe before Observe: at least one extracted literal
//! (an hrefable path, a form action, an error-element selector) must appear
//! in the served page, otherwise the source tree and the target URL do not
//! belong together and the run is a usage error.

use crate::observe::ObservationEngine;
use crate::types::{Expectation, PromiseKind};

/// Outcome of the alignment check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alignment {
    /// A literal matched, or there was nothing checkable.
    Aligned,
    /// No extracted literal appears on the page.
    Mismatch,
    /// The probe itself failed; preflight is advisory, so the run proceeds.
    ProbeUnavailable,
}

/// Probe `url` once and look for any expectation literal in the page body.
pub async fn check_alignment(
    engine: &dyn ObservationEngine,
    url: &str,
    expectations: &[Expectation],
) -> Alignment {
    let literals: Vec<&str> = expectations
        .iter()
        .filter_map(probe_literal)
        .collect();
    if literals.is_empty() {
        return Alignment::Aligned;
    }

    let Ok(page) = engine.probe_page(url).await else {
        return Alignment::ProbeUnavailable;
    };

    if literals.iter().any(|lit| page.body_text.contains(lit)) {
        Alignment::Aligned
    } else {
        Alignment::Mismatch
    }
}

/// The literal a page would have to contain for this expectation.
fn probe_literal(expectation: &Expectation) -> Option<&str> {
    match expectation.promise.kind {
        PromiseKind::Navigate | PromiseKind::Submit => Some(expectation.promise.value.as_str()),
        PromiseKind::Feedback => {
            // `#email-error` probes as `email-error`.
            Some(expectation.promise.value.trim_start_matches('#'))
        }
        PromiseKind::Request | PromiseKind::StateMutation => None,
    }
}
