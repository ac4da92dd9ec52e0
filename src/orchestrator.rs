//! Run orchestrator.
//!
//! Drives the phase sequence — Discovery → Learn → (optional alignment
//! preflight) → Observe → Detect → Finalize — under the budgeted timeout
//! tiers, owns the run directory and the event log, and never lets an error
//! cross its boundary: every path collapses into a [`RunOutcome`] carrying
//! exactly one RESULT/REASON/ACTION contract block and a deterministic exit
//! code.

use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::artifacts::{
    ArtifactWriter, COMPLETION_SENTINEL, CoverageReport, RUN_FINALIZED, RunMeta, SummaryDigestBlock,
    SummaryReport,
};
use crate::detect::EvidenceIndex;
use crate::digest::SummaryCounts;
use crate::error::VeraxError;
use crate::events::{EventLog, EventSink, PhaseName, RunEvent};
use crate::exit_codes::{ExitCode, exit_code_for, exit_code_for_error};
use crate::lock::ScanLock;
use crate::observe::{
    AuthConfig, EngineOutput, ObservationEngine, ObserveRequest, ProgressSink,
};
use crate::paths::RunPaths;
use crate::policy::{LoadedPolicy, PolicyOverrides};
use crate::preflight::Alignment;
use crate::reasons::{IncompleteReason, SkipReason, canonical_reasons};
use crate::redaction::Redactor;
use crate::timeout::{Deadline, compute_budget, with_global_watchdog, with_phase_deadline};
use crate::truth::{TruthInputs, classify, post_auth_reasons};
use crate::types::{
    Expectation, FindingStatus, FindingType, FindingsReport, LearnReport, Observation,
    ObserveReport, RunState, RunStatus, TruthState,
};

/// Everything the CLI resolved from the invocation.
#[derive(Debug, Default)]
pub struct Invocation {
    pub url: String,
    pub src: Option<Utf8PathBuf>,
    pub out: Utf8PathBuf,
    pub overrides: PolicyOverrides,
    pub auth: AuthConfig,
    pub dry_learn: bool,
    pub explain_expectations: bool,
    pub preflight: bool,
    pub deterministic: bool,
}

/// The single result of a run; the CLI renders it as the contract block.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit: ExitCode,
    pub truth: Option<TruthState>,
    pub reason: String,
    pub action: String,
    pub run_id: Option<String>,
    pub digest: Option<String>,
    pub url: String,
}

/// Run the full pipeline. Never returns an error; failures are mapped into
/// the outcome.
pub async fn run(
    invocation: Invocation,
    engine: &dyn ObservationEngine,
    progress: Option<EventSink>,
) -> RunOutcome {
    let url = invocation.url.clone();
    match run_inner(invocation, engine, progress).await {
        Ok(outcome) => outcome,
        Err(error) => {
            let exit = exit_code_for_error(&error);
            warn!(error = %error, "run failed before finalization");
            RunOutcome {
                exit,
                truth: matches!(exit, ExitCode::Incomplete).then_some(TruthState::Incomplete),
                reason: error.to_string(),
                action: action_for(exit).to_string(),
                run_id: None,
                digest: None,
                url,
            }
        }
    }
}

async fn run_inner(
    invocation: Invocation,
    engine: &dyn ObservationEngine,
    progress: Option<EventSink>,
) -> Result<RunOutcome, VeraxError> {
    validate_url(&invocation.url)?;

    // Source resolution: explicitly provided paths must exist; absence of a
    // source puts the run in LIMITED mode and forces INCOMPLETE.
    let limited = invocation.src.is_none();
    if let Some(src) = &invocation.src {
        if !src.is_dir() {
            return Err(VeraxError::usage(format!(
                "source path does not exist or is not a directory: {src}"
            )));
        }
    }

    crate::clock::init().map_err(VeraxError::usage)?;
    let loaded: LoadedPolicy = crate::policy::load(&invocation.overrides)?;
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    let policy = &loaded.policy;
    let redactor = Redactor::new(policy.redaction.enabled);

    let deterministic = invocation.deterministic
        || std::env::var("VERAX_DETERMINISTIC_MODE").as_deref() == Ok("1");
    let src_display = invocation
        .src
        .as_ref()
        .map_or_else(|| "<none>".to_string(), ToString::to_string);
    let scan_id = crate::ids::scan_id(&invocation.url, &src_display, &policy.profile);
    let run_id = crate::ids::run_id(deterministic, &invocation.url);

    let paths = RunPaths::new(&invocation.out, &scan_id, &run_id);
    let _lock = ScanLock::acquire(paths.scan_dir(), &scan_id, &run_id)?;
    let writer = ArtifactWriter::create(paths.clone(), redactor, &run_id)
        .map_err(VeraxError::Other)?;

    let mut events = EventLog::new();
    if let Some(sink) = progress {
        events = EventLog::new().with_sink(sink);
    }
    events.record(RunEvent::RunStarted {
        scan_id: scan_id.clone(),
        run_id: run_id.clone(),
        url: invocation.url.clone(),
    });

    let mut status = RunStatus {
        schema_version: RunStatus::SCHEMA_VERSION.to_string(),
        state: RunState::Init,
        scan_id: scan_id.clone(),
        run_id: run_id.clone(),
        truth: None,
        exit_code: None,
        incomplete_reasons: Vec::new(),
        updated_at: crate::clock::now(),
    };
    writer.write_status(&status).map_err(VeraxError::Other)?;
    status.state = RunState::Running;
    status.updated_at = crate::clock::now();
    writer.write_status(&status).map_err(VeraxError::Other)?;

    let mut incomplete = false;
    let mut reasons: Vec<IncompleteReason> = Vec::new();
    let mut infra_failure = false;

    // --- Discovery -------------------------------------------------------
    events.record(RunEvent::PhaseStarted {
        phase: PhaseName::Discovery,
    });
    let project = match &invocation.src {
        Some(src) => crate::discovery::discover(src, policy),
        None => crate::discovery::ProjectProfile::undetected(),
    };
    if project.unsupported_framework {
        warn!(framework = project.framework.as_str(), "framework is not supported by policy");
        incomplete = true;
        reasons.push(IncompleteReason::UnsupportedFramework);
    }
    events.record(RunEvent::PhaseCompleted {
        phase: PhaseName::Discovery,
    });

    // --- Learn -----------------------------------------------------------
    events.record(RunEvent::PhaseStarted {
        phase: PhaseName::Learn,
    });
    let provisional = compute_budget(0, 1.0, &policy.budget, policy.test_mode);
    let learn = if limited {
        incomplete = true;
        reasons.push(IncompleteReason::SourceNotDetected);
        reasons.push(IncompleteReason::LimitedRuntimeOnlyMode);
        LearnReport::empty()
    } else {
        let src = invocation.src.clone().expect("source present");
        let learn_policy = policy.learn.clone();
        let task = tokio::task::spawn_blocking(move || {
            crate::learn::extract(&src, &learn_policy)
        });
        match with_phase_deadline(PhaseName::Learn, provisional.learn_ms, task).await {
            Deadline::Completed(joined) => joined
                .map_err(|e| VeraxError::Other(anyhow::anyhow!("learn task panicked: {e}")))?
                .map_err(VeraxError::Other)?,
            Deadline::TimedOut(phase) => {
                events.record(RunEvent::PhaseTimedOut { phase });
                incomplete = true;
                reasons.push(IncompleteReason::PhaseTimeoutExceeded);
                LearnReport::empty()
            }
        }
    };
    events.record(RunEvent::PhaseCompleted {
        phase: PhaseName::Learn,
    });
    events.heartbeat();

    if learn.expectations.is_empty() && !limited && !incomplete {
        write_failure_status(&writer, &mut status);
        return Err(VeraxError::usage(format!(
            "no observable user-facing promises found under {src_display}"
        )));
    }

    if invocation.explain_expectations {
        for exp in &learn.expectations {
            eprintln!(
                "  {} {} {}:{}:{} {} {}",
                exp.id,
                exp.expectation_type.as_str(),
                exp.source.file,
                exp.source.line,
                exp.source.column,
                exp.promise.kind.as_str(),
                exp.promise.value
            );
        }
    }

    if invocation.dry_learn {
        incomplete = true;
        reasons.push(IncompleteReason::DryLearnRequested);
    }

    // --- Budget ----------------------------------------------------------
    let budget = compute_budget(
        learn.expectations.len(),
        project.framework.budget_multiplier(),
        &policy.budget,
        policy.test_mode,
    );
    info!(
        global_ms = budget.global_ms,
        observe_ms = budget.observe_ms,
        expectations = learn.expectations.len(),
        "budget armed"
    );

    // --- Preflight -------------------------------------------------------
    if invocation.preflight && !limited && !invocation.dry_learn {
        events.record(RunEvent::PhaseStarted {
            phase: PhaseName::Preflight,
        });
        let alignment =
            crate::preflight::check_alignment(engine, &invocation.url, &learn.expectations).await;
        events.record(RunEvent::PhaseCompleted {
            phase: PhaseName::Preflight,
        });
        if alignment == Alignment::Mismatch {
            write_failure_status(&writer, &mut status);
            return Err(VeraxError::usage(
                "src/url mismatch: no extracted promise literal appears on the target page",
            ));
        }
    }

    // --- Observe + Detect under the global watchdog ----------------------
    let (observe_report, findings_raw) = if invocation.dry_learn {
        (
            crate::observe::normalize(&learn.expectations, EngineOutput::default()),
            Vec::new(),
        )
    } else {
        let observed = with_global_watchdog(
            budget.global_ms,
            observe_and_detect(
                engine,
                &invocation,
                &budget,
                &learn.expectations,
                &paths,
                &mut events,
            ),
        )
        .await;
        match observed {
            Some(Ok(pair)) => pair,
            Some(Err(_engine_error)) => {
                infra_failure = true;
                (
                    crate::observe::normalize(
                        &learn.expectations,
                        EngineOutput {
                            observations: Vec::new(),
                            incomplete_reasons: vec![IncompleteReason::InfraFailure],
                        },
                    ),
                    Vec::new(),
                )
            }
            None => {
                incomplete = true;
                reasons.push(IncompleteReason::GlobalTimeoutExceeded);
                reasons.push(IncompleteReason::ObservationIncomplete);
                (
                    crate::observe::normalize(
                        &learn.expectations,
                        EngineOutput {
                            observations: Vec::new(),
                            incomplete_reasons: vec![IncompleteReason::GlobalTimeoutExceeded],
                        },
                    ),
                    Vec::new(),
                )
            }
        }
    };
    reasons.extend(observe_report.stability.incomplete_reasons.iter().copied());
    if !observe_report.stability.incomplete_reasons.is_empty() {
        incomplete = true;
    }

    // --- Validate --------------------------------------------------------
    let evidence = EvidenceIndex::from_dir(paths.evidence_dir()).map_err(VeraxError::Other)?;
    let validated = crate::validator::validate(findings_raw, &observe_report.observations, &evidence);
    for finding in &validated.findings {
        events.record(RunEvent::FindingEmitted {
            id: finding.id.clone(),
            finding_type: finding.finding_type,
        });
    }
    let findings = FindingsReport::new(validated.findings);

    // --- Truth -----------------------------------------------------------
    if invocation.auth.is_configured() {
        incomplete = true;
        reasons.extend(post_auth_reasons());
    }

    let expectations_total = u32::try_from(learn.expectations.len()).unwrap_or(u32::MAX);
    let attempted = count(&observe_report.observations, |o| o.attempted);
    let observed_count = count(&observe_report.observations, |o| o.observed);
    let confirmed = count_findings(&findings, FindingStatus::Confirmed);
    let coverage_ratio = if expectations_total == 0 {
        0.0
    } else {
        f64::from(observed_count) / f64::from(expectations_total)
    };
    let critical_silence_count =
        critical_silences(&learn.expectations, &observe_report.observations, &findings);

    let verdict = classify(
        &TruthInputs {
            expectations_total,
            attempted,
            observed: observed_count,
            confirmed_findings: confirmed,
            coverage_ratio,
            critical_silence_count,
            infra_failure,
            incomplete,
            incomplete_reasons: canonical_reasons(reasons),
            min_coverage: policy.min_coverage,
        },
        policy.ci_mode,
    );

    // --- Digest ----------------------------------------------------------
    let counts = SummaryCounts {
        expectations_total,
        attempted,
        observed: observed_count,
        confirmed,
    };
    let digest = crate::digest::compute(&learn, &observe_report, &findings, &counts)
        .map_err(VeraxError::Other)?;

    // --- Finalize --------------------------------------------------------
    status.state = RunState::Finalizing;
    status.truth = Some(verdict.truth);
    status.incomplete_reasons.clone_from(&verdict.incomplete_reasons);
    status.updated_at = crate::clock::now();
    writer.write_status(&status).map_err(VeraxError::Other)?;
    events.record(RunEvent::PhaseStarted {
        phase: PhaseName::Finalize,
    });

    let exit_if_valid = exit_code_for(verdict.truth, true, confirmed);
    let summary = SummaryReport {
        schema_version: SummaryReport::SCHEMA_VERSION.to_string(),
        truth: verdict.truth,
        exit_code: exit_if_valid.as_i32(),
        incomplete_reasons: verdict.incomplete_reasons.clone(),
        findings_total: u32::try_from(findings.findings.len()).unwrap_or(u32::MAX),
        confirmed_findings: confirmed,
        digest: SummaryDigestBlock {
            counts,
            deterministic_digest: digest.deterministic_digest.clone(),
        },
    };
    let meta = RunMeta {
        schema_version: RunMeta::SCHEMA_VERSION.to_string(),
        url: invocation.url.clone(),
        src_path: invocation.src.as_ref().map(ToString::to_string),
        limited_mode: limited,
        scan_id: scan_id.clone(),
        run_id: run_id.clone(),
        started_at: crate::clock::now(),
        verax_version: crate::verax_version(),
        canonicalization_backend: crate::canonical::CANONICALIZATION_BACKEND.to_string(),
        hash_algorithm: crate::canonical::HASH_ALGORITHM.to_string(),
        policy: serde_json::to_value(policy).map_err(|e| VeraxError::Other(e.into()))?,
        policy_sources: loaded.sources.clone(),
    };
    let coverage = CoverageReport {
        schema_version: CoverageReport::SCHEMA_VERSION.to_string(),
        expectations_total,
        attempted,
        observed: observed_count,
        skipped: count(&observe_report.observations, |o| o.skipped),
        coverage_ratio,
        min_coverage: policy.min_coverage,
    };

    writer.write_json("learn.json", &learn, true).map_err(VeraxError::Other)?;
    writer.write_json("observe.json", &observe_report, true).map_err(VeraxError::Other)?;
    writer.write_json("findings.json", &findings, true).map_err(VeraxError::Other)?;
    writer.write_json("project.json", &project, false).map_err(VeraxError::Other)?;
    writer.write_json("coverage.json", &coverage, false).map_err(VeraxError::Other)?;
    writer.write_json("judgments.json", &validated.judgments, true).map_err(VeraxError::Other)?;
    writer.write_json("run.digest.json", &digest, true).map_err(VeraxError::Other)?;
    writer.write_json("run.meta.json", &meta, false).map_err(VeraxError::Other)?;
    writer.write_json("summary.json", &summary, true).map_err(VeraxError::Other)?;
    writer.write_traces(&events).map_err(VeraxError::Other)?;
    if policy.emit_manifest {
        writer.write_manifest().map_err(VeraxError::Other)?;
    }
    writer.write_sentinel(RUN_FINALIZED).map_err(VeraxError::Other)?;

    // Re-read everything before choosing the exit code.
    let corrupted = writer.verify_required();
    let validation_ok = corrupted.is_empty();
    let exit = exit_code_for(verdict.truth, validation_ok, confirmed);

    if matches!(verdict.truth, TruthState::Success | TruthState::Findings) && validation_ok {
        writer.write_sentinel(COMPLETION_SENTINEL).map_err(VeraxError::Other)?;
    }

    events.record(RunEvent::RunFinalized {
        truth: verdict.truth,
        exit_code: exit.as_i32(),
    });
    writer.write_traces(&events).map_err(VeraxError::Other)?;

    status.state = RunState::Final;
    status.exit_code = Some(exit.as_i32());
    status.updated_at = crate::clock::now();
    writer.write_status(&status).map_err(VeraxError::Other)?;

    if policy.retention.enabled {
        let pruned = writer
            .prune_runs(policy.retention.keep_runs.max(1))
            .map_err(VeraxError::Other)?;
        if pruned > 0 {
            info!(pruned, "pruned archived runs");
        }
    }

    let reason = if validation_ok {
        reason_for(verdict.truth, &summary, &verdict.incomplete_reasons)
    } else {
        format!("artifact validation found corrupted files: {}", corrupted.join(", "))
    };

    Ok(RunOutcome {
        exit,
        truth: Some(verdict.truth),
        reason,
        action: action_for(exit).to_string(),
        run_id: Some(run_id),
        digest: Some(digest.deterministic_digest),
        url: invocation.url,
    })
}

/// Observe then Detect; runs inside the global watchdog.
async fn observe_and_detect(
    engine: &dyn ObservationEngine,
    invocation: &Invocation,
    budget: &crate::timeout::RunBudget,
    expectations: &[Expectation],
    paths: &RunPaths,
    events: &mut EventLog,
) -> anyhow::Result<(ObserveReport, Vec<crate::types::Finding>)> {
    events.record(RunEvent::PhaseStarted {
        phase: PhaseName::Observe,
    });

    let readiness = engine.readiness(&invocation.url).await;
    let output = if readiness.ready {
        let request = ObserveRequest {
            expectations,
            url: &invocation.url,
            evidence_dir: paths.evidence_dir(),
            auth: invocation.auth.is_configured().then_some(&invocation.auth),
            interaction_timeout_ms: budget.interaction_ms,
        };
        let mut sink = EventProgress { events: Vec::new() };
        let observed =
            with_phase_deadline(PhaseName::Observe, budget.observe_ms, engine.observe(request, &mut sink))
                .await;
        for event in sink.events {
            events.record(event);
        }
        match observed {
            Deadline::Completed(result) => result?,
            Deadline::TimedOut(phase) => {
                events.record(RunEvent::PhaseTimedOut { phase });
                EngineOutput {
                    observations: Vec::new(),
                    incomplete_reasons: vec![
                        IncompleteReason::ObservationIncomplete,
                        IncompleteReason::PhaseTimeoutExceeded,
                    ],
                }
            }
        }
    } else {
        let reason = readiness
            .reason
            .unwrap_or(IncompleteReason::BrowserDriverUnavailable);
        EngineOutput {
            observations: expectations
                .iter()
                .map(|e| Observation::skipped(&e.id, SkipReason::RuntimeNotReady))
                .collect(),
            incomplete_reasons: vec![reason],
        }
    };

    let report = crate::observe::normalize(expectations, output);
    events.record(RunEvent::PhaseCompleted {
        phase: PhaseName::Observe,
    });
    events.heartbeat();

    events.record(RunEvent::PhaseStarted {
        phase: PhaseName::Detect,
    });
    let evidence = EvidenceIndex::from_dir(paths.evidence_dir())?;
    let detected = match with_phase_deadline(PhaseName::Detect, budget.detect_ms, async {
        crate::detect::detect(expectations, &report.observations, &evidence)
    })
    .await
    {
        Deadline::Completed(findings) => findings,
        Deadline::TimedOut(phase) => {
            events.record(RunEvent::PhaseTimedOut { phase });
            Vec::new()
        }
    };
    events.record(RunEvent::PhaseCompleted {
        phase: PhaseName::Detect,
    });

    Ok((report, detected))
}

/// Buffers per-interaction progress so the engine does not need access to
/// the event log itself.
struct EventProgress {
    events: Vec<RunEvent>,
}

impl ProgressSink for EventProgress {
    fn interaction_done(&mut self, id: &str, attempted: bool, observed: bool) {
        self.events.push(RunEvent::ObservationRecorded {
            id: id.to_string(),
            attempted,
            observed,
        });
    }
}

/// Mark the run FINAL before surfacing an error that aborts the pipeline.
fn write_failure_status(writer: &ArtifactWriter, status: &mut RunStatus) {
    status.state = RunState::Final;
    status.updated_at = crate::clock::now();
    if let Err(error) = writer.write_status(status) {
        warn!(%error, "failed to write failure status");
    }
}

fn validate_url(url: &str) -> Result<(), VeraxError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| {
            VeraxError::usage(format!("target URL must use http or https: {url}"))
        })?;
    let host = crate::ids::host_of(url);
    if host.is_empty() || rest.is_empty() {
        return Err(VeraxError::usage(format!("target URL has no hostname: {url}")));
    }
    Ok(())
}

fn count(observations: &[Observation], pred: impl Fn(&Observation) -> bool) -> u32 {
    u32::try_from(observations.iter().filter(|o| pred(o)).count()).unwrap_or(u32::MAX)
}

fn count_findings(report: &FindingsReport, status: FindingStatus) -> u32 {
    u32::try_from(
        report
            .findings
            .iter()
            .filter(|f| f.status == status)
            .count(),
    )
    .unwrap_or(u32::MAX)
}

/// Attempted, fully silent observations whose silence survived no finding:
/// silence the pipeline could not even classify.
fn critical_silences(
    expectations: &[Expectation],
    observations: &[Observation],
    findings: &FindingsReport,
) -> u32 {
    let silent_types = [
        FindingType::SilentPermissionWall,
        FindingType::DeadInteractionSilentFailure,
    ];
    let mut counter = 0;
    for (expectation, observation) in expectations.iter().zip(observations.iter()) {
        if !observation.attempted || !observation.signals.is_silent() {
            continue;
        }
        let has_finding = silent_types.iter().any(|t| {
            let id = crate::ids::finding_id(&expectation.id, t.as_str());
            findings.findings.iter().any(|f| f.id == id)
        });
        if !has_finding {
            counter += 1;
        }
    }
    counter
}

fn reason_for(
    truth: TruthState,
    summary: &SummaryReport,
    reasons: &[IncompleteReason],
) -> String {
    match truth {
        TruthState::Success => format!(
            "all {} promises observed with no silent failures",
            summary.digest.counts.expectations_total
        ),
        TruthState::Findings if reasons.is_empty() => format!(
            "{} confirmed finding(s) detected",
            summary.confirmed_findings
        ),
        TruthState::Findings => format!(
            "incomplete run promoted by strict mode: {}",
            join_reasons(reasons)
        ),
        TruthState::Incomplete => format!("run incomplete: {}", join_reasons(reasons)),
    }
}

fn join_reasons(reasons: &[IncompleteReason]) -> String {
    reasons
        .iter()
        .map(IncompleteReason::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prescriptive action text, tied to the exit code.
#[must_use]
pub fn action_for(exit: ExitCode) -> &'static str {
    match exit {
        ExitCode::Success => "none required",
        ExitCode::Findings => "inspect findings.json and the evidence/ subtree of the run directory",
        ExitCode::Incomplete => "address the listed incompleteness reasons and re-run",
        ExitCode::InvariantViolation => {
            "delete the run directory and re-run to regenerate artifacts"
        }
        ExitCode::UsageError => "fix the invocation and try again (see --help)",
    }
}
