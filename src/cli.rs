//! Command-line interface.
//!
//! One subcommand, `run`. Stdout carries exactly one RESULT/REASON/ACTION
//! contract block per invocation (preceded by JSONL progress events under
//! `--json`); everything else goes to stderr. Unknown flags and argument
//! errors map to exit 64, never clap's default 2.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::exit_codes::ExitCode;
use crate::observe::{AuthConfig, UnavailableDriver};
use crate::orchestrator::{self, Invocation, RunOutcome};
use crate::policy::{CiMode, PolicyOverrides};

/// verax - deterministic silent-failure detection for web applications
#[derive(Parser)]
#[command(name = "verax")]
#[command(about = "Detects silent failures by checking a live site against the promises its source makes")]
#[command(long_about = r#"
verax statically extracts user-facing promises from a source tree
(navigations, requests, form submissions, state-driven UI updates),
exercises them against a live page, and classifies every discrepancy as a
trusted, evidence-backed finding. Artifacts are byte-stable across re-runs
on identical inputs.

EXAMPLES:
  # Scan a local preview build
  verax run http://127.0.0.1:4173 --src ./app

  # CI usage with strict incompleteness handling and JSON output
  verax run https://staging.example.com --src . --ci-mode strict --json

  # Extraction only: see what promises the source makes
  verax run http://127.0.0.1:4173 --src ./app --dry-learn --explain-expectations

EXIT CODES:
  0   SUCCESS              every promise observed, zero confirmed findings
  20  FINDINGS             at least one confirmed finding
  30  INCOMPLETE           the run could not reach a full verdict
  50  INVARIANT_VIOLATION  artifact corruption or internal contract breach
  64  USAGE_ERROR          invalid invocation
"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scan against a target URL
    Run {
        /// Target URL (http or https)
        url: String,

        /// Source tree to extract promises from; omitting it records a
        /// LIMITED run that always finalizes INCOMPLETE
        #[arg(long)]
        src: Option<Utf8PathBuf>,

        /// Output root for run artifacts
        #[arg(long, default_value = ".verax")]
        out: Utf8PathBuf,

        /// Stream progress as JSONL and emit the final block as JSON
        #[arg(long)]
        json: bool,

        /// Verbose diagnostics on stderr
        #[arg(long, visible_alias = "verbose")]
        debug: bool,

        /// Keep at most N archived runs per scan
        #[arg(long, value_name = "N")]
        retain_runs: Option<u32>,

        /// Disable retention pruning entirely
        #[arg(long)]
        no_retention: bool,

        /// Minimum coverage ratio in (0, 1]
        #[arg(long, value_name = "0..1")]
        min_coverage: Option<f64>,

        /// CI mode; strict promotes INCOMPLETE to FINDINGS
        #[arg(long, value_parser = ["balanced", "strict"])]
        ci_mode: Option<String>,

        /// Browser storage state for authenticated scans (post-auth runs
        /// always finalize INCOMPLETE)
        #[arg(long)]
        auth_storage: Option<String>,

        /// Cookie header value for authenticated scans
        #[arg(long)]
        auth_cookie: Option<String>,

        /// Authorization header value for authenticated scans
        #[arg(long)]
        auth_header: Option<String>,

        /// Auth mode hint forwarded to the observation engine
        #[arg(long)]
        auth_mode: Option<String>,

        /// Policy file (JSON or YAML)
        #[arg(long)]
        policy_file: Option<Utf8PathBuf>,

        /// Disable secret redaction in artifacts (surfaces a warning)
        #[arg(long)]
        no_redaction: bool,

        /// Stop after Learn; writes learn.json and finalizes INCOMPLETE
        #[arg(long)]
        dry_learn: bool,

        /// List every extracted expectation on stderr
        #[arg(long)]
        explain_expectations: bool,

        /// Probe the page once before Observe and fail on src/url mismatch
        #[arg(long)]
        preflight: bool,

        /// Derive the run id deterministically from the URL
        #[arg(long)]
        deterministic: bool,
    },
}

/// JSON form of the final contract block.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContractBlock<'a> {
    command: &'a str,
    exit_code: i32,
    reason: &'a str,
    action: &'a str,
    truth: Option<&'a str>,
    digest: Option<&'a str>,
    run_id: Option<&'a str>,
    url: &'a str,
}

/// CLI entrypoint: parse, run, emit the contract block, map to exit code.
pub fn run() -> Result<(), ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                return Ok(());
            }
            // One contract block even for malformed invocations.
            let reason = err.to_string().lines().next().unwrap_or("invalid arguments").to_string();
            emit_text_block(ExitCode::UsageError, &reason, orchestrator::action_for(ExitCode::UsageError));
            return Err(ExitCode::UsageError);
        }
    };

    let Commands::Run {
        url,
        src,
        out,
        json,
        debug,
        retain_runs,
        no_retention,
        min_coverage,
        ci_mode,
        auth_storage,
        auth_cookie,
        auth_header,
        auth_mode,
        policy_file,
        no_redaction,
        dry_learn,
        explain_expectations,
        preflight,
        deterministic,
    } = cli.command;

    crate::logging::init(debug);

    let ci_mode = ci_mode.as_deref().map(|raw| match raw {
        "strict" => CiMode::Strict,
        _ => CiMode::Balanced,
    });

    let invocation = Invocation {
        url,
        src,
        out,
        overrides: PolicyOverrides {
            min_coverage,
            ci_mode,
            retain_runs,
            no_retention,
            no_redaction,
            policy_file,
        },
        auth: AuthConfig {
            storage: auth_storage,
            cookie: auth_cookie,
            header: auth_header,
            mode: auth_mode,
        },
        dry_learn,
        explain_expectations,
        preflight,
        deterministic,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|_| ExitCode::Incomplete)?;

    let progress = json.then(|| {
        Box::new(|event: &crate::events::TracedEvent| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        }) as crate::events::EventSink
    });

    let engine = UnavailableDriver;
    let outcome = runtime.block_on(orchestrator::run(invocation, &engine, progress));

    emit_outcome(&outcome, json);
    if outcome.exit == ExitCode::Success {
        Ok(())
    } else {
        Err(outcome.exit)
    }
}

fn emit_outcome(outcome: &RunOutcome, json: bool) {
    if json {
        let block = ContractBlock {
            command: "run",
            exit_code: outcome.exit.as_i32(),
            reason: &outcome.reason,
            action: &outcome.action,
            truth: outcome.truth.map(|t| t.as_str()),
            digest: outcome.digest.as_deref(),
            run_id: outcome.run_id.as_deref(),
            url: &outcome.url,
        };
        if let Ok(line) = serde_json::to_string(&block) {
            println!("{line}");
        }
    } else {
        emit_text_block(outcome.exit, &outcome.reason, &outcome.action);
    }
}

fn emit_text_block(exit: ExitCode, reason: &str, action: &str) {
    println!("RESULT: {}", exit.result_label());
    println!("REASON: {reason}");
    println!("ACTION: {action}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_minimal_run() {
        let cli = Cli::try_parse_from(["verax", "run", "http://127.0.0.1:4173"]).unwrap();
        let Commands::Run { url, src, out, .. } = cli.command;
        assert_eq!(url, "http://127.0.0.1:4173");
        assert!(src.is_none());
        assert_eq!(out, Utf8PathBuf::from(".verax"));
    }

    #[test]
    fn parses_full_flag_set() {
        let cli = Cli::try_parse_from([
            "verax",
            "run",
            "https://staging.example.com",
            "--src",
            "./app",
            "--out",
            "/tmp/verax-out",
            "--json",
            "--debug",
            "--retain-runs",
            "5",
            "--min-coverage",
            "0.9",
            "--ci-mode",
            "strict",
            "--policy-file",
            "policy.yaml",
            "--dry-learn",
            "--explain-expectations",
            "--preflight",
            "--deterministic",
        ])
        .unwrap();
        let Commands::Run {
            json,
            retain_runs,
            min_coverage,
            ci_mode,
            dry_learn,
            deterministic,
            ..
        } = cli.command;
        assert!(json);
        assert_eq!(retain_runs, Some(5));
        assert_eq!(min_coverage, Some(0.9));
        assert_eq!(ci_mode.as_deref(), Some("strict"));
        assert!(dry_learn);
        assert!(deterministic);
    }

    #[test]
    fn unknown_flags_fail_to_parse() {
        let parsed = Cli::try_parse_from(["verax", "run", "http://h", "--frobnicate"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_ci_mode_fails_to_parse() {
        let parsed =
            Cli::try_parse_from(["verax", "run", "http://h", "--ci-mode", "lenient"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_url_fails_to_parse() {
        let parsed = Cli::try_parse_from(["verax", "run"]);
        assert!(parsed.is_err());
    }
}
