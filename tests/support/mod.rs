//! Shared test support: a scripted observation engine and fixture helpers.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use verax::observe::{
    AuthConfig, EngineOutput, EvidenceVariant, ObservationEngine, ObserveRequest, PageProbe,
    ProgressSink, Readiness, evidence_file_name,
};
use verax::orchestrator::Invocation;
use verax::policy::PolicyOverrides;
use verax::types::{Observation, Signals, Timings};

/// What the scripted engine should do for one promise value.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    pub signals: Signals,
    /// Evidence files to materialize, as (variant, extension, content).
    pub evidence: Vec<(EvidenceVariant, &'static str, &'static str)>,
}

/// Deterministic in-process observation engine driven by a per-promise plan.
/// Promises without a plan entry are observed as fully healthy.
pub struct ScriptedEngine {
    plan: BTreeMap<String, Scripted>,
    page_body: String,
    delay: Option<Duration>,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new(plan: BTreeMap<String, Scripted>) -> Self {
        Self {
            plan,
            page_body: String::new(),
            delay: None,
        }
    }

    #[must_use]
    pub fn healthy() -> Self {
        Self::new(BTreeMap::new())
    }

    #[must_use]
    pub fn with_page_body(mut self, body: &str) -> Self {
        self.page_body = body.to_string();
        self
    }

    /// Sleep this long inside observe; drives the watchdog tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

fn healthy_signals() -> Signals {
    Signals {
        navigation_changed: true,
        title_changed: true,
        dom_changed: true,
        feedback_seen: false,
        network_activity: false,
        ..Signals::default()
    }
}

#[async_trait]
impl ObservationEngine for ScriptedEngine {
    async fn readiness(&self, _url: &str) -> Readiness {
        Readiness::ready()
    }

    async fn observe(
        &self,
        request: ObserveRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> anyhow::Result<EngineOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut observations = Vec::new();
        for (idx, expectation) in request.expectations.iter().enumerate() {
            let ordinal = idx + 1;
            let script = self
                .plan
                .get(&expectation.promise.value)
                .cloned()
                .unwrap_or_else(|| Scripted {
                    signals: healthy_signals(),
                    evidence: Vec::new(),
                });

            let mut evidence_files = Vec::new();
            for (variant, ext, content) in &script.evidence {
                let name =
                    evidence_file_name(ordinal, expectation.expectation_type, *variant, ext);
                fs::write(request.evidence_dir.join(&name).as_std_path(), content)?;
                evidence_files.push(name);
            }
            evidence_files.sort();

            observations.push(Observation {
                id: expectation.id.clone(),
                attempted: true,
                observed: true,
                skipped: false,
                skip_reason: None,
                signals: script.signals,
                evidence_files,
                timings: Timings {
                    total_ms: 12,
                    settle_ms: 3,
                },
            });
            progress.interaction_done(&expectation.id, true, true);
        }

        Ok(EngineOutput {
            observations,
            incomplete_reasons: Vec::new(),
        })
    }

    async fn probe_page(&self, _url: &str) -> anyhow::Result<PageProbe> {
        Ok(PageProbe {
            status: 200,
            body_text: self.page_body.clone(),
        })
    }
}

/// A workspace holding a fixture source tree and an output root.
pub struct Fixture {
    _dir: TempDir,
    pub src: Utf8PathBuf,
    pub out: Utf8PathBuf,
}

impl Fixture {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let src = root.join("src");
        let out = root.join("out");
        fs::create_dir_all(src.as_std_path()).unwrap();
        Self {
            _dir: dir,
            src,
            out,
        }
    }

    pub fn write_source(&self, rel: &str, content: &str) {
        let path = self.src.join(rel);
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
    }

    /// Invocation with deterministic run ids so re-runs land in one place.
    #[must_use]
    pub fn invocation(&self, url: &str) -> Invocation {
        Invocation {
            url: url.to_string(),
            src: Some(self.src.clone()),
            out: self.out.clone(),
            overrides: PolicyOverrides::default(),
            auth: AuthConfig::default(),
            dry_learn: false,
            explain_expectations: false,
            preflight: false,
            deterministic: true,
        }
    }

    /// The single run directory under `<out>/runs/<scan>/<run>` (requires
    /// exactly one scan directory).
    #[must_use]
    pub fn run_dir(&self) -> Utf8PathBuf {
        let runs = self.out.join("runs");
        let scan = single_subdir(&runs);
        let latest = fs::read_to_string(scan.join("latest").as_std_path()).unwrap();
        scan.join(latest.trim())
    }

    #[must_use]
    pub fn artifact(&self, name: &str) -> String {
        fs::read_to_string(self.run_dir().join(name).as_std_path()).unwrap()
    }

    #[must_use]
    pub fn artifact_json(&self, name: &str) -> serde_json::Value {
        serde_json::from_str(&self.artifact(name)).unwrap()
    }
}

fn single_subdir(dir: &Utf8Path) -> Utf8PathBuf {
    let mut dirs: Vec<Utf8PathBuf> = dir
        .read_dir_utf8()
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path().to_owned())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one directory under {dir}");
    dirs.pop().unwrap()
}

/// Drive the orchestrator on a current-thread runtime.
pub fn run_pipeline(
    invocation: Invocation,
    engine: &dyn ObservationEngine,
) -> verax::orchestrator::RunOutcome {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(verax::orchestrator::run(invocation, engine, None))
}
