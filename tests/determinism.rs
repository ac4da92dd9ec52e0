//! Double-run determinism: identical inputs must produce byte-identical
//! deterministic artifacts and the same digest.

mod support;

use std::collections::BTreeMap;

use support::{Fixture, Scripted, ScriptedEngine, run_pipeline};
use verax::exit_codes::ExitCode;
use verax::observe::EvidenceVariant;
use verax::types::Signals;

const URL: &str = "http://127.0.0.1:4173";

fn broken_nav_engine() -> ScriptedEngine {
    let mut plan = BTreeMap::new();
    plan.insert(
        "/missing".to_string(),
        Scripted {
            signals: Signals {
                navigation_changed: true,
                ..Signals::default()
            },
            evidence: vec![(EvidenceVariant::DomDiff, "json", r#"{"changed": []}"#)],
        },
    );
    ScriptedEngine::new(plan)
}

#[test]
fn two_runs_produce_identical_deterministic_artifacts() {
    let fixture = Fixture::new();
    fixture.write_source("index.html", r#"<a href="/missing">About</a>"#);
    fixture.write_source("app.js", r#"fetch("https://api.example.com/items");"#);

    let first = run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    let learn_one = fixture.artifact("learn.json");
    let findings_one = fixture.artifact("findings.json");
    let observe_one = fixture.artifact("observe.json");
    let digest_one = fixture.artifact_json("run.digest.json");

    let second = run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    let learn_two = fixture.artifact("learn.json");
    let findings_two = fixture.artifact("findings.json");
    let observe_two = fixture.artifact("observe.json");
    let digest_two = fixture.artifact_json("run.digest.json");

    assert_eq!(first.exit, second.exit);
    assert_eq!(learn_one, learn_two);
    assert_eq!(findings_one, findings_two);
    assert_eq!(observe_one, observe_two);
    assert_eq!(digest_one, digest_two);
    assert_eq!(first.digest, second.digest);
}

#[test]
fn digest_changes_when_source_changes() {
    let fixture = Fixture::new();
    fixture.write_source("index.html", r#"<a href="/missing">About</a>"#);

    run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    let digest_one = fixture.artifact_json("run.digest.json")["deterministic_digest"].clone();

    fixture.write_source("index.html", r#"<a href="/missing">About</a><a href="/more">M</a>"#);
    run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    let digest_two = fixture.artifact_json("run.digest.json")["deterministic_digest"].clone();

    assert_ne!(digest_one, digest_two);
}

#[test]
fn deterministic_artifacts_have_sorted_keys_and_no_whitespace() {
    let fixture = Fixture::new();
    fixture.write_source("index.html", r#"<a href="/missing">About</a>"#);

    let outcome = run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    assert_eq!(outcome.exit, ExitCode::Findings);

    for name in ["learn.json", "observe.json", "findings.json", "run.digest.json", "summary.json"] {
        let content = fixture.artifact(name);
        // Canonical form: single line, no trailing newline, no indentation.
        assert_eq!(content.lines().count(), 1, "{name} should be canonical");
        assert!(!content.contains(": "), "{name} should have no pretty spacing");
    }
}

#[test]
fn digest_artifact_matches_outcome_digest() {
    let fixture = Fixture::new();
    fixture.write_source("index.html", r#"<a href="/missing">About</a>"#);

    let outcome = run_pipeline(fixture.invocation(URL), &broken_nav_engine());
    let digest = fixture.artifact_json("run.digest.json");
    assert_eq!(digest["schema_version"], "digest.v1");
    assert_eq!(
        digest["deterministic_digest"].as_str().unwrap(),
        outcome.digest.as_deref().unwrap()
    );

    let summary = fixture.artifact_json("summary.json");
    assert_eq!(
        summary["digest"]["deterministic_digest"],
        digest["deterministic_digest"]
    );
}
