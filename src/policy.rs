//! Policy layer.
//!
//! A frozen policy is assembled once per run from four layers, lowest to
//! highest precedence: built-in defaults, an optional policy file (JSON or
//! YAML), `VERAX_POLICY_*` environment overrides, and invocation flags.
//! Every overridden key records its source for the `run.meta.json` snapshot.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

use crate::error::PolicyError;

/// CI strictness mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMode {
    Balanced,
    Strict,
}

impl CiMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Strict => "strict",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        match raw {
            "balanced" => Ok(Self::Balanced),
            "strict" => Ok(Self::Strict),
            other => Err(PolicyError::InvalidValue {
                key: "ciMode".to_string(),
                reason: format!("expected 'balanced' or 'strict', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Number of archived runs to keep per scan. Must be >= 0.
    pub keep_runs: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionPolicy {
    /// Default ON. Disabling requires an explicit flag and surfaces a warning.
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkPolicy {
    /// Framework tags the scan supports. Empty means all.
    pub allow: Vec<String>,
    /// Framework tags the scan refuses. Disjoint from `allow`.
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnPolicy {
    /// File extensions in scope for extraction (without the dot).
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    /// Hard cap on files visited in one scan.
    pub max_files: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub base_ms: u64,
    pub per_expectation_ms: u64,
    /// Upper bound on the global budget after the framework multiplier.
    pub cap_ms: u64,
    pub interaction_timeout_ms: u64,
    /// Upper bound on the framework-family multiplier.
    pub multiplier_cap: f64,
}

/// The frozen, merged policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Profile name; participates in scan id derivation.
    pub profile: String,
    /// Minimum coverage ratio in (0, 1].
    pub min_coverage: f64,
    pub ci_mode: CiMode,
    pub retention: RetentionPolicy,
    pub redaction: RedactionPolicy,
    pub frameworks: FrameworkPolicy,
    pub learn: LearnPolicy,
    pub budget: BudgetPolicy,
    /// Emit a `run.manifest.json` with per-artifact hashes.
    pub emit_manifest: bool,
    /// Bounded budgets for test environments (`VERAX_TEST_MODE=1`).
    pub test_mode: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            min_coverage: 0.7,
            ci_mode: CiMode::Balanced,
            retention: RetentionPolicy {
                keep_runs: 10,
                enabled: true,
            },
            redaction: RedactionPolicy { enabled: true },
            frameworks: FrameworkPolicy {
                allow: Vec::new(),
                deny: Vec::new(),
            },
            learn: LearnPolicy {
                extensions: ["js", "jsx", "ts", "tsx", "html", "vue", "svelte"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                skip_dirs: [
                    "node_modules",
                    ".git",
                    "dist",
                    "build",
                    ".next",
                    ".nuxt",
                    "coverage",
                    ".cache",
                    "out",
                ]
                .iter()
                .map(ToString::to_string)
                .collect(),
                max_files: 5000,
            },
            budget: BudgetPolicy {
                base_ms: 10_000,
                per_expectation_ms: 2_000,
                cap_ms: 300_000,
                interaction_timeout_ms: 5_000,
                multiplier_cap: 2.0,
            },
            emit_manifest: false,
            test_mode: false,
        }
    }
}

/// Where an effective policy value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    Default,
    File,
    Env,
    Invocation,
}

/// Merged policy plus per-key source attribution.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: Policy,
    pub sources: BTreeMap<String, PolicySource>,
    /// Warnings to surface (currently only the redaction-off warning).
    pub warnings: Vec<String>,
}

/// Invocation-level overrides (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub min_coverage: Option<f64>,
    pub ci_mode: Option<CiMode>,
    pub retain_runs: Option<u32>,
    pub no_retention: bool,
    pub no_redaction: bool,
    pub policy_file: Option<Utf8PathBuf>,
}

/// Partial policy as read from a policy file. Keys are camelCase to match
/// the documented file format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyFile {
    profile: Option<String>,
    min_coverage: Option<f64>,
    ci_mode: Option<String>,
    keep_runs: Option<i64>,
    retention_enabled: Option<bool>,
    redaction_enabled: Option<bool>,
    framework_allow: Option<Vec<String>>,
    framework_deny: Option<Vec<String>>,
    learn_extensions: Option<Vec<String>>,
    learn_skip_dirs: Option<Vec<String>>,
    learn_max_files: Option<u32>,
    budget_base_ms: Option<u64>,
    budget_per_expectation_ms: Option<u64>,
    budget_cap_ms: Option<u64>,
    interaction_timeout_ms: Option<u64>,
    emit_manifest: Option<bool>,
}

/// Load and freeze the policy for this run.
pub fn load(overrides: &PolicyOverrides) -> Result<LoadedPolicy, PolicyError> {
    let mut policy = Policy::default();
    let mut sources = BTreeMap::new();
    let mut warnings = Vec::new();

    if let Some(path) = &overrides.policy_file {
        let file = read_policy_file(path)?;
        apply_file(&mut policy, &mut sources, file)?;
    }

    apply_env(&mut policy, &mut sources)?;
    apply_overrides(&mut policy, &mut sources, overrides, &mut warnings);

    if std::env::var("VERAX_TEST_MODE").as_deref() == Ok("1") {
        policy.test_mode = true;
        sources.insert("testMode".to_string(), PolicySource::Env);
    }

    validate(&policy)?;

    Ok(LoadedPolicy {
        policy,
        sources,
        warnings,
    })
}

fn read_policy_file(path: &Utf8PathBuf) -> Result<PolicyFile, PolicyError> {
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|_| PolicyError::FileNotFound {
            path: path.to_string(),
        })?;

    let is_yaml = matches!(path.extension(), Some("yaml" | "yml"));
    if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| PolicyError::InvalidFile {
            reason: e.to_string(),
        })
    } else {
        serde_json::from_str(&content).map_err(|e| PolicyError::InvalidFile {
            reason: e.to_string(),
        })
    }
}

fn apply_file(
    policy: &mut Policy,
    sources: &mut BTreeMap<String, PolicySource>,
    file: PolicyFile,
) -> Result<(), PolicyError> {
    let mut set = |key: &str| {
        sources.insert(key.to_string(), PolicySource::File);
    };

    if let Some(v) = file.profile {
        policy.profile = v;
        set("profile");
    }
    if let Some(v) = file.min_coverage {
        policy.min_coverage = v;
        set("minCoverage");
    }
    if let Some(v) = file.ci_mode {
        policy.ci_mode = CiMode::parse(&v)?;
        set("ciMode");
    }
    if let Some(v) = file.keep_runs {
        policy.retention.keep_runs =
            u32::try_from(v).map_err(|_| PolicyError::InvalidValue {
                key: "keepRuns".to_string(),
                reason: format!("must be >= 0, got {v}"),
            })?;
        set("keepRuns");
    }
    if let Some(v) = file.retention_enabled {
        policy.retention.enabled = v;
        set("retentionEnabled");
    }
    if let Some(v) = file.redaction_enabled {
        policy.redaction.enabled = v;
        set("redactionEnabled");
    }
    if let Some(v) = file.framework_allow {
        policy.frameworks.allow = v;
        set("frameworkAllow");
    }
    if let Some(v) = file.framework_deny {
        policy.frameworks.deny = v;
        set("frameworkDeny");
    }
    if let Some(v) = file.learn_extensions {
        policy.learn.extensions = v;
        set("learnExtensions");
    }
    if let Some(v) = file.learn_skip_dirs {
        policy.learn.skip_dirs = v;
        set("learnSkipDirs");
    }
    if let Some(v) = file.learn_max_files {
        policy.learn.max_files = v;
        set("learnMaxFiles");
    }
    if let Some(v) = file.budget_base_ms {
        policy.budget.base_ms = v;
        set("budgetBaseMs");
    }
    if let Some(v) = file.budget_per_expectation_ms {
        policy.budget.per_expectation_ms = v;
        set("budgetPerExpectationMs");
    }
    if let Some(v) = file.budget_cap_ms {
        policy.budget.cap_ms = v;
        set("budgetCapMs");
    }
    if let Some(v) = file.interaction_timeout_ms {
        policy.budget.interaction_timeout_ms = v;
        set("interactionTimeoutMs");
    }
    if let Some(v) = file.emit_manifest {
        policy.emit_manifest = v;
        set("emitManifest");
    }
    Ok(())
}

fn apply_env(
    policy: &mut Policy,
    sources: &mut BTreeMap<String, PolicySource>,
) -> Result<(), PolicyError> {
    if let Ok(raw) = std::env::var("VERAX_POLICY_MIN_COVERAGE") {
        policy.min_coverage = raw.parse().map_err(|_| PolicyError::InvalidEnv {
            var: "VERAX_POLICY_MIN_COVERAGE".to_string(),
            reason: format!("not a number: '{raw}'"),
        })?;
        sources.insert("minCoverage".to_string(), PolicySource::Env);
    }
    if let Ok(raw) = std::env::var("VERAX_POLICY_CI_MODE") {
        policy.ci_mode = CiMode::parse(&raw).map_err(|_| PolicyError::InvalidEnv {
            var: "VERAX_POLICY_CI_MODE".to_string(),
            reason: format!("expected 'balanced' or 'strict', got '{raw}'"),
        })?;
        sources.insert("ciMode".to_string(), PolicySource::Env);
    }
    if let Ok(raw) = std::env::var("VERAX_POLICY_KEEP_RUNS") {
        let parsed: i64 = raw.parse().map_err(|_| PolicyError::InvalidEnv {
            var: "VERAX_POLICY_KEEP_RUNS".to_string(),
            reason: format!("not an integer: '{raw}'"),
        })?;
        policy.retention.keep_runs =
            u32::try_from(parsed).map_err(|_| PolicyError::InvalidEnv {
                var: "VERAX_POLICY_KEEP_RUNS".to_string(),
                reason: format!("must be >= 0, got {parsed}"),
            })?;
        sources.insert("keepRuns".to_string(), PolicySource::Env);
    }
    if let Ok(raw) = std::env::var("VERAX_POLICY_REDACTION") {
        policy.redaction.enabled = match raw.as_str() {
            "1" | "true" => true,
            "0" | "false" => false,
            other => {
                return Err(PolicyError::InvalidEnv {
                    var: "VERAX_POLICY_REDACTION".to_string(),
                    reason: format!("expected 0/1/true/false, got '{other}'"),
                });
            }
        };
        sources.insert("redactionEnabled".to_string(), PolicySource::Env);
    }
    if let Ok(raw) = std::env::var("VERAX_POLICY_PROFILE") {
        policy.profile = raw;
        sources.insert("profile".to_string(), PolicySource::Env);
    }
    Ok(())
}

fn apply_overrides(
    policy: &mut Policy,
    sources: &mut BTreeMap<String, PolicySource>,
    overrides: &PolicyOverrides,
    warnings: &mut Vec<String>,
) {
    if let Some(v) = overrides.min_coverage {
        policy.min_coverage = v;
        sources.insert("minCoverage".to_string(), PolicySource::Invocation);
    }
    if let Some(v) = overrides.ci_mode {
        policy.ci_mode = v;
        sources.insert("ciMode".to_string(), PolicySource::Invocation);
    }
    if let Some(v) = overrides.retain_runs {
        policy.retention.keep_runs = v;
        sources.insert("keepRuns".to_string(), PolicySource::Invocation);
    }
    if overrides.no_retention {
        policy.retention.enabled = false;
        sources.insert("retentionEnabled".to_string(), PolicySource::Invocation);
    }
    if overrides.no_redaction {
        policy.redaction.enabled = false;
        sources.insert("redactionEnabled".to_string(), PolicySource::Invocation);
        warnings.push(
            "redaction disabled by --no-redaction; artifacts may contain secrets".to_string(),
        );
    }
}

fn validate(policy: &Policy) -> Result<(), PolicyError> {
    if !(policy.min_coverage > 0.0 && policy.min_coverage <= 1.0) {
        return Err(PolicyError::InvalidValue {
            key: "minCoverage".to_string(),
            reason: format!("must be in (0, 1], got {}", policy.min_coverage),
        });
    }
    for tag in &policy.frameworks.allow {
        if policy.frameworks.deny.contains(tag) {
            return Err(PolicyError::InvalidValue {
                key: "frameworkAllow".to_string(),
                reason: format!("tag '{tag}' appears in both allow and deny lists"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let policy = Policy::default();
        assert!(validate(&policy).is_ok());
        assert!(policy.redaction.enabled);
        assert_eq!(policy.ci_mode, CiMode::Balanced);
        assert!(policy.min_coverage > 0.0 && policy.min_coverage <= 1.0);
    }

    #[test]
    fn invocation_overrides_win() {
        let overrides = PolicyOverrides {
            min_coverage: Some(0.9),
            ci_mode: Some(CiMode::Strict),
            retain_runs: Some(3),
            ..PolicyOverrides::default()
        };
        let loaded = load(&overrides).unwrap();
        assert_eq!(loaded.policy.min_coverage, 0.9);
        assert_eq!(loaded.policy.ci_mode, CiMode::Strict);
        assert_eq!(loaded.policy.retention.keep_runs, 3);
        assert_eq!(
            loaded.sources.get("minCoverage"),
            Some(&PolicySource::Invocation)
        );
    }

    #[test]
    fn no_redaction_surfaces_warning() {
        let overrides = PolicyOverrides {
            no_redaction: true,
            ..PolicyOverrides::default()
        };
        let loaded = load(&overrides).unwrap();
        assert!(!loaded.policy.redaction.enabled);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn rejects_out_of_range_coverage() {
        let overrides = PolicyOverrides {
            min_coverage: Some(1.5),
            ..PolicyOverrides::default()
        };
        assert!(load(&overrides).is_err());

        let overrides = PolicyOverrides {
            min_coverage: Some(0.0),
            ..PolicyOverrides::default()
        };
        assert!(load(&overrides).is_err());
    }

    #[test]
    fn rejects_overlapping_framework_lists() {
        let policy = Policy {
            frameworks: FrameworkPolicy {
                allow: vec!["react".to_string()],
                deny: vec!["react".to_string()],
            },
            ..Policy::default()
        };
        assert!(validate(&policy).is_err());
    }

    #[test]
    fn json_policy_file_merges_below_overrides() {
        let dir = TempDir::new().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("policy.json")).unwrap();
        fs::write(
            path.as_std_path(),
            r#"{"minCoverage": 0.5, "keepRuns": 2, "ciMode": "strict"}"#,
        )
        .unwrap();

        let overrides = PolicyOverrides {
            policy_file: Some(path),
            min_coverage: Some(0.8),
            ..PolicyOverrides::default()
        };
        let loaded = load(&overrides).unwrap();
        // Invocation beats file; file beats default.
        assert_eq!(loaded.policy.min_coverage, 0.8);
        assert_eq!(loaded.policy.retention.keep_runs, 2);
        assert_eq!(loaded.policy.ci_mode, CiMode::Strict);
    }

    #[test]
    fn yaml_policy_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("policy.yaml")).unwrap();
        fs::write(path.as_std_path(), "minCoverage: 0.4\nkeepRuns: 1\n").unwrap();

        let overrides = PolicyOverrides {
            policy_file: Some(path),
            ..PolicyOverrides::default()
        };
        let loaded = load(&overrides).unwrap();
        assert_eq!(loaded.policy.min_coverage, 0.4);
        assert_eq!(loaded.policy.retention.keep_runs, 1);
    }

    #[test]
    fn negative_keep_runs_in_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("policy.json")).unwrap();
        fs::write(path.as_std_path(), r#"{"keepRuns": -1}"#).unwrap();

        let overrides = PolicyOverrides {
            policy_file: Some(path),
            ..PolicyOverrides::default()
        };
        assert!(load(&overrides).is_err());
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let overrides = PolicyOverrides {
            policy_file: Some(Utf8PathBuf::from("/nonexistent/policy.json")),
            ..PolicyOverrides::default()
        };
        assert!(matches!(
            load(&overrides),
            Err(PolicyError::FileNotFound { .. })
        ));
    }
}
