//! Three-tier timeout management.
//!
//! Tiers, higher preempts lower:
//! - global watchdog over the whole run (no recovery);
//! - phase deadline over Learn / Observe / Detect (phase yields an empty
//!   result and the run continues);
//! - interaction deadline over a single observation attempt (recorded as a
//!   skip and the engine moves on).
//!
//! All budgets are integers in milliseconds with enforced floors.

use std::future::Future;
use std::time::Duration;

use crate::events::PhaseName;
use crate::policy::BudgetPolicy;

/// Floor for the global budget regardless of expectation count.
const GLOBAL_FLOOR_MS: u64 = 10_000;

/// Floor for any single phase deadline.
const PHASE_FLOOR_MS: u64 = 1_000;

/// Floor for the interaction deadline.
const INTERACTION_FLOOR_MS: u64 = 250;

/// Bounded budgets used when `VERAX_TEST_MODE=1`.
const TEST_MODE_GLOBAL_CAP_MS: u64 = 15_000;

/// Resolved deadlines for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    pub global_ms: u64,
    pub learn_ms: u64,
    pub observe_ms: u64,
    pub detect_ms: u64,
    pub interaction_ms: u64,
}

impl RunBudget {
    #[must_use]
    pub fn phase_ms(&self, phase: PhaseName) -> u64 {
        match phase {
            PhaseName::Learn | PhaseName::Discovery => self.learn_ms,
            PhaseName::Observe | PhaseName::Preflight => self.observe_ms,
            PhaseName::Detect | PhaseName::Finalize => self.detect_ms,
        }
    }
}

/// Budget formula: `base + per_expectation × count`, scaled by the framework
/// family multiplier (itself capped by policy), bounded by the policy cap
/// and the floors above.
#[must_use]
pub fn compute_budget(
    expectation_count: usize,
    framework_multiplier: f64,
    budget: &BudgetPolicy,
    test_mode: bool,
) -> RunBudget {
    let count = u64::try_from(expectation_count).unwrap_or(u64::MAX);
    let multiplier = framework_multiplier.clamp(1.0, budget.multiplier_cap);

    let raw = budget
        .base_ms
        .saturating_add(budget.per_expectation_ms.saturating_mul(count));
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = (raw as f64 * multiplier) as u64;

    let mut global_ms = scaled.min(budget.cap_ms).max(GLOBAL_FLOOR_MS);
    if test_mode {
        global_ms = global_ms.min(TEST_MODE_GLOBAL_CAP_MS);
    }

    // Fixed shares; Observe dominates because it is the only phase doing
    // browser I/O.
    let learn_ms = (global_ms / 5).max(PHASE_FLOOR_MS);
    let observe_ms = (global_ms * 3 / 5).max(PHASE_FLOOR_MS);
    let detect_ms = (global_ms / 10).max(PHASE_FLOOR_MS);

    RunBudget {
        global_ms,
        learn_ms,
        observe_ms,
        detect_ms,
        interaction_ms: budget.interaction_timeout_ms.max(INTERACTION_FLOOR_MS),
    }
}

/// Outcome of wrapping a future in a phase deadline.
#[derive(Debug)]
pub enum Deadline<T> {
    Completed(T),
    TimedOut(PhaseName),
}

/// Run a phase future under its deadline; a timeout cancels the phase task
/// and surfaces as `Deadline::TimedOut`.
pub async fn with_phase_deadline<F, T>(phase: PhaseName, ms: u64, fut: F) -> Deadline<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(value) => Deadline::Completed(value),
        Err(_) => Deadline::TimedOut(phase),
    }
}

/// Run the remaining pipeline under the global watchdog.
pub async fn with_global_watchdog<F, T>(ms: u64, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_millis(ms), fut).await.ok()
}
