//! Deterministic identifier derivation.
//!
//! Expectation and scan ids are content-addressed over stable inputs only.
//! The per-execution run id is the single non-deterministic identifier in
//! the system and is excluded from every digest.

use std::sync::atomic::{AtomicU64, Ordering};
use unicode_normalization::UnicodeNormalization;

use crate::canonical::sha256_hex;
use crate::types::SourceLocation;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stable id for an expectation: hash of (file, line, column, kind, value).
#[must_use]
pub fn expectation_id(source: &SourceLocation, kind: &str, value: &str) -> String {
    let input = format!(
        "{}\n{}\n{}\n{}\n{}",
        source.file, source.line, source.column, kind, value
    );
    format!("exp-{}", &sha256_hex(input.as_bytes())[..16])
}

/// Stable id for a finding: hash of the expectation id and the finding type.
#[must_use]
pub fn finding_id(expectation_id: &str, finding_type: &str) -> String {
    let input = format!("{expectation_id}\n{finding_type}");
    format!("fnd-{}", &sha256_hex(input.as_bytes())[..16])
}

/// Human-readable scan id derived only from stable inputs:
/// `<sanitized-host>-<hash12>` over (url, source path, policy profile).
#[must_use]
pub fn scan_id(url: &str, src_display: &str, policy_profile: &str) -> String {
    let host = sanitize_component(&host_of(url));
    let input = format!("{url}\n{src_display}\n{policy_profile}");
    format!("{host}-{}", &sha256_hex(input.as_bytes())[..12])
}

/// Per-execution run id. Carries a monotonic component; never hashed.
///
/// Under deterministic mode the id is derived from the URL alone so repeated
/// runs land in the same directory.
#[must_use]
pub fn run_id(deterministic: bool, url: &str) -> String {
    if deterministic {
        return format!("run-{}", &sha256_hex(url.as_bytes())[..12]);
    }
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = crate::clock::now().format("%Y%m%dT%H%M%S");
    format!("run-{stamp}-{seq:04}")
}

/// Extract the host portion of an http(s) URL without a URL parser.
#[must_use]
pub fn host_of(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let end = rest
        .find(['/', '?', '#'])
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    // Drop userinfo and port.
    let host = authority.rsplit('@').next().unwrap_or(authority);
    host.split(':').next().unwrap_or(host).to_string()
}

/// Sanitize an id component for filesystem use: NFKC-normalize, keep
/// `[A-Za-z0-9._-]`, replace the rest with `_`, collapse `..` sequences.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let normalized: String = raw.nfkc().collect();
    let mut out: String = normalized
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    while out.contains("..") {
        out = out.replace("..", "__");
    }
    if out.is_empty() {
        out.push_str("host");
    }
    out
}
