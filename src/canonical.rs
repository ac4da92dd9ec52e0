//! Canonical JSON and stable hashing.
//!
//! A single canonicalization routine (RFC 8785 JCS) backs both artifact
//! hashing and deterministic artifact writes: keys sorted, fixed number
//! formatting, no insignificant whitespace. Content hashes are SHA-256, hex.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonicalization backend identifier recorded in `run.meta.json`.
pub const CANONICALIZATION_BACKEND: &str = "jcs-rfc8785";

/// Hash algorithm identifier recorded in `run.meta.json`.
pub const HASH_ALGORITHM: &str = "sha-256";

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// This is the standard way to emit JSON for deterministic artifacts
/// (`learn.json`, `observe.json`, `findings.json`, `run.digest.json`) and
/// the only input form ever hashed.
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

/// SHA-256 of raw bytes, lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// SHA-256 over the JCS form of a serializable value.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String> {
    Ok(sha256_hex(emit_jcs(value)?.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
