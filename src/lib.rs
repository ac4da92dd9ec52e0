//! verax - deterministic silent-failure detection engine for web applications
//!
//! The pipeline ingests a source tree and a target URL, statically extracts
//! user-facing promises, exercises them against a live page through an
//! observation engine, and classifies every promise × observation pair into
//! evidence-backed findings. Artifacts are byte-stable across re-runs on
//! identical inputs; the exit code derives solely from the final truth state
//! and artifact validation.

/// Returns the verax version string.
#[must_use]
pub fn verax_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub mod artifacts;
pub mod atomic_write;
pub mod canonical;
pub mod cli;
pub mod clock;
pub mod detect;
pub mod digest;
pub mod discovery;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod ids;
pub mod learn;
pub mod lock;
pub mod logging;
pub mod observe;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod preflight;
pub mod reasons;
pub mod redaction;
pub mod timeout;
pub mod truth;
pub mod types;
pub mod validator;

// Core types and entry points used by external consumers
pub use error::VeraxError;
pub use exit_codes::ExitCode;
pub use observe::{EngineOutput, ObservationEngine, ObserveRequest, ProgressSink, Readiness};
pub use orchestrator::{Invocation, RunOutcome};
pub use types::*;
