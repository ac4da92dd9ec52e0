//! Static promise extraction (Learn).
//!
//! Cheap, robust pattern extraction without full AST parsing: count
//! well-formed literal promises reliably and refuse everything dynamic.
//! Interpolated, computed or external values are tallied in `skipped` and
//! never become expectations. Output ordering is deterministic by
//! (file, line, column, kind, value); ids are assigned after sorting.

use anyhow::Result;
use camino::Utf8Path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::ids::expectation_id;
use crate::policy::LearnPolicy;
use crate::types::{
    Expectation, ExpectationType, LearnReport, Promise, PromiseKind, SkipTally, SourceLocation,
};

// Anchor targets; literal double- or single-quoted values only.
static HREF_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href\s*=\s*["']([^"'{}$]*)["']"#).unwrap());
static HREF_DYNAMIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"href\s*=\s*[{`]").unwrap());

// Router navigation calls with a literal first argument.
static ROUTER_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:router|history)\.(?:push|replace)\(\s*["']([^"']+)["']"#).unwrap()
});
static NAVIGATE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bnavigate\(\s*["']([^"']+)["']"#).unwrap());
static ROUTER_DYNAMIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:router\.(?:push|replace)|history\.(?:push|replace)|navigate)\(\s*`").unwrap()
});
static ROUTER_COMPUTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:router\.(?:push|replace)|history\.(?:push|replace)|navigate)\(\s*["'][^"']*["']\s*\+"#)
        .unwrap()
});

// Fetch / HTTP client calls.
static FETCH_ABSOLUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:fetch|axios\.(?:get|post|put|delete|patch))\(\s*["'](https?://[^"']+)["']"#)
        .unwrap()
});
static FETCH_RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:fetch|axios\.(?:get|post|put|delete|patch))\(\s*["']((?:/|wss?://)[^"']*)["']"#)
        .unwrap()
});
static FETCH_DYNAMIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:fetch|axios\.(?:get|post|put|delete|patch))\(\s*`").unwrap()
});
static FETCH_COMPUTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:fetch|axios\.(?:get|post|put|delete|patch))\(\s*["'][^"']*["']\s*\+"#)
        .unwrap()
});

// Form submissions.
static FORM_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<form[^>]*action\s*=\s*["']([^"'{}$]+)["']"#).unwrap());
static FORM_DYNAMIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<form[^>]*(?:onSubmit|action)\s*=\s*\{").unwrap());

// State-hook declarations; the setter must additionally be bound to JSX
// usage of the same identifier before a promise is emitted.
static USE_STATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"const\s*\[\s*([A-Za-z_$][\w$]*)\s*,\s*(set[A-Z][\w$]*)\s*\]\s*=\s*(?:React\.)?useState")
        .unwrap()
});

// Validation feedback surfaces.
static ARIA_LIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"aria-live\s*=\s*["'](polite|assertive)["']"#).unwrap());
static ROLE_ALERT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"role\s*=\s*["']alert["']"#).unwrap());
static ERROR_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"id\s*=\s*["']([A-Za-z0-9_-]*error[A-Za-z0-9_-]*)["']"#).unwrap()
});

/// Extract all promises from the source tree under `src_root`.
pub fn extract(src_root: &Utf8Path, policy: &LearnPolicy) -> Result<LearnReport> {
    let include = extension_matcher(policy)?;
    let mut sites: Vec<Site> = Vec::new();
    let mut skipped = SkipTally::default();
    let mut files_scanned: u32 = 0;

    let mut walker: Vec<_> = WalkDir::new(src_root.as_std_path())
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                return !policy.skip_dirs.iter().any(|d| d == name.as_ref());
            }
            true
        })
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    walker.sort();

    for path in walker {
        if files_scanned >= policy.max_files {
            break;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !include.is_match(name) {
            continue;
        }
        files_scanned += 1;

        let rel = path
            .strip_prefix(src_root.as_std_path())
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        match std::fs::read_to_string(&path) {
            Ok(content) => extract_from_file(&rel, &content, &mut sites, &mut skipped),
            Err(_) => skipped.parse_error += 1,
        }
    }

    sites.sort_by(|a, b| {
        (
            &a.location.file,
            a.location.line,
            a.location.column,
            a.promise.kind,
            &a.promise.value,
        )
            .cmp(&(
                &b.location.file,
                b.location.line,
                b.location.column,
                b.promise.kind,
                &b.promise.value,
            ))
    });
    sites.dedup_by(|a, b| a.location == b.location && a.promise == b.promise);

    let expectations = sites
        .into_iter()
        .map(|site| Expectation {
            id: expectation_id(&site.location, site.promise.kind.as_str(), &site.promise.value),
            expectation_type: site.expectation_type,
            promise: site.promise,
            source: site.location,
            confidence: site.confidence,
        })
        .collect();

    Ok(LearnReport {
        schema_version: LearnReport::SCHEMA_VERSION.to_string(),
        expectations,
        skipped,
        files_scanned,
    })
}

struct Site {
    expectation_type: ExpectationType,
    promise: Promise,
    location: SourceLocation,
    confidence: f64,
}

fn extension_matcher(policy: &LearnPolicy) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in &policy.extensions {
        builder.add(Glob::new(&format!("*.{ext}"))?);
    }
    Ok(builder.build()?)
}

fn extract_from_file(file: &str, content: &str, sites: &mut Vec<Site>, skipped: &mut SkipTally) {
    let index = LineIndex::new(content);
    let mut push = |expectation_type: ExpectationType,
                    kind: PromiseKind,
                    value: String,
                    offset: usize,
                    confidence: f64| {
        let (line, column) = index.position(offset);
        sites.push(Site {
            expectation_type,
            promise: Promise { kind, value },
            location: SourceLocation {
                file: file.to_string(),
                line,
                column,
            },
            confidence,
        });
    };

    for m in HREF_LITERAL.captures_iter(content) {
        let value = m.get(1).map_or("", |v| v.as_str());
        if is_navigable_target(value) {
            push(
                ExpectationType::Navigation,
                PromiseKind::Navigate,
                value.to_string(),
                m.get(0).unwrap().start(),
                0.9,
            );
        }
    }
    skipped.dynamic += count(&HREF_DYNAMIC, content);

    for re in [&*ROUTER_LITERAL, &*NAVIGATE_LITERAL] {
        for m in re.captures_iter(content) {
            let value = m.get(1).map_or("", |v| v.as_str());
            let whole = m.get(0).unwrap();
            if is_navigable_target(value) && !followed_by_concat(content, whole.end()) {
                push(
                    ExpectationType::Navigation,
                    PromiseKind::Navigate,
                    value.to_string(),
                    whole.start(),
                    0.85,
                );
            }
        }
    }
    skipped.dynamic += count(&ROUTER_DYNAMIC, content);
    skipped.computed += count(&ROUTER_COMPUTED, content);

    for m in FETCH_ABSOLUTE.captures_iter(content) {
        let value = m.get(1).map_or("", |v| v.as_str());
        let whole = m.get(0).unwrap();
        if followed_by_concat(content, whole.end()) {
            // Counted by the computed tally below.
            continue;
        }
        push(
            ExpectationType::Network,
            PromiseKind::Request,
            value.to_string(),
            whole.start(),
            0.8,
        );
    }
    skipped.external += count(&FETCH_RELATIVE, content);
    skipped.dynamic += count(&FETCH_DYNAMIC, content);
    skipped.computed += count(&FETCH_COMPUTED, content);

    for m in FORM_ACTION.captures_iter(content) {
        let value = m.get(1).map_or("", |v| v.as_str());
        push(
            ExpectationType::Form,
            PromiseKind::Submit,
            value.to_string(),
            m.get(0).unwrap().start(),
            0.85,
        );
    }
    skipped.dynamic += count(&FORM_DYNAMIC, content);

    for m in USE_STATE.captures_iter(content) {
        let var = m.get(1).map_or("", |v| v.as_str());
        let setter = m.get(2).map_or("", |v| v.as_str());
        if setter_is_called(content, setter) && bound_to_jsx(content, var) {
            push(
                ExpectationType::State,
                PromiseKind::StateMutation,
                var.to_string(),
                m.get(0).unwrap().start(),
                0.7,
            );
        }
        // Isolated setters (no JSX binding) are discarded, not tallied.
    }

    for m in ARIA_LIVE.captures_iter(content) {
        let value = m.get(1).map_or("", |v| v.as_str());
        push(
            ExpectationType::UiFeedback,
            PromiseKind::Feedback,
            format!("aria-live:{value}"),
            m.get(0).unwrap().start(),
            0.75,
        );
    }
    for m in ROLE_ALERT.find_iter(content) {
        push(
            ExpectationType::UiFeedback,
            PromiseKind::Feedback,
            "role:alert".to_string(),
            m.start(),
            0.75,
        );
    }
    for m in ERROR_ELEMENT.captures_iter(content) {
        let id = m.get(1).map_or("", |v| v.as_str());
        push(
            ExpectationType::Validation,
            PromiseKind::Feedback,
            format!("#{id}"),
            m.get(0).unwrap().start(),
            0.7,
        );
    }
}

fn count(re: &Regex, content: &str) -> u32 {
    u32::try_from(re.find_iter(content).count()).unwrap_or(u32::MAX)
}

/// Literal followed by `+` is a concatenation, not a compile-time value.
fn followed_by_concat(content: &str, end: usize) -> bool {
    content[end..].trim_start().starts_with('+')
}

fn is_navigable_target(value: &str) -> bool {
    if value.is_empty() || value == "#" {
        return false;
    }
    if value.starts_with("javascript:") || value.starts_with("mailto:") || value.starts_with("tel:")
    {
        return false;
    }
    value.starts_with('/') || value.starts_with("http://") || value.starts_with("https://")
}

fn setter_is_called(content: &str, setter: &str) -> bool {
    // A call site beyond the declaration itself.
    content.matches(&format!("{setter}(")).count() > 0
}

fn bound_to_jsx(content: &str, var: &str) -> bool {
    // `{count}`, `{count.items}`, `{count &&` and similar JSX bindings.
    let re = Regex::new(&format!(r"\{{\s*{}\b", regex::escape(var))).expect("jsx binding regex");
    re.is_match(content)
}

/// Byte-offset to (1-based line, column) mapping.
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut line_starts = vec![0usize];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line = u32::try_from(line_idx + 1).unwrap_or(u32::MAX);
        let column = u32::try_from(offset - self.line_starts[line_idx] + 1).unwrap_or(u32::MAX);
        (line, column)
    }
}
