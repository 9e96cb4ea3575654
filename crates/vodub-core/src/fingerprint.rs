//! Deterministic fingerprints over files and JSON values.
//!
//! Every artifact in the manifest is identified by `"sha256:" + hex` of its
//! bytes. JSON values are hashed through a canonical rendering so that two
//! semantically-equal documents produced by different code paths fingerprint
//! identically: keys sorted, compact separators, and `null` values plus empty
//! objects/arrays recursively stripped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::manifest::ArtifactRecord;

/// Recursively drop `null`s and empty containers.
///
/// Returns `None` when the value itself collapses to nothing, so parents can
/// drop the key entirely.
fn prune(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if let Some(kept) = prune(v) {
                    out.insert(k.clone(), kept);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out.into_iter().collect()))
            }
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items.iter().filter_map(prune).collect();
            if kept.is_empty() { None } else { Some(Value::Array(kept)) }
        }
        other => Some(other.clone()),
    }
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json escapes exactly the way we need; strings are leaf
            // values so a per-string serialization round-trip is fine.
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string()));
                out.push(':');
                render(v, out);
            }
            out.push('}');
        }
    }
}

/// Canonical JSON: sorted keys, no whitespace, nulls and empty containers
/// recursively removed.
pub fn canonicalize_json(value: &Value) -> String {
    let pruned = prune(value).unwrap_or(Value::Object(serde_json::Map::new()));
    let mut out = String::new();
    render(&pruned, &mut out);
    out
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// SHA-256 of a UTF-8 string, `"sha256:" + hex`.
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("sha256:{}", hex_digest(hasher))
}

/// SHA-256 of a file's bytes, streamed in 1 MiB chunks.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex_digest(hasher)))
}

/// Hash of the canonicalized JSON rendering.
pub fn hash_json(value: &Value) -> String {
    hash_string(&canonicalize_json(value))
}

/// Inputs fingerprint: `hash(join(sorted(key + ":" + fingerprint)))` over the
/// artifacts a phase requires.
///
/// Errors with the missing key so `should_run` can report it as a rerun
/// reason.
pub fn compute_inputs_fingerprint(
    required_keys: &[String],
    artifacts: &BTreeMap<String, ArtifactRecord>,
) -> Result<String, String> {
    let mut sorted: Vec<&String> = required_keys.iter().collect();
    sorted.sort();

    let mut parts = Vec::with_capacity(sorted.len());
    for key in sorted {
        let artifact = artifacts
            .get(key)
            .ok_or_else(|| format!("required artifact '{key}' not found in manifest"))?;
        parts.push(format!("{key}:{}", artifact.fingerprint));
    }
    Ok(hash_string(&parts.join(",")))
}
