use sha2::{Digest, Sha256};

const MAX_STEM_LEN: usize = 60;

/// Deterministic, filesystem-safe name for an item record:
/// `{sanitized_key}--{short_hash(key)}.json`. The same key always maps to the
/// same file, so re-persisting an item overwrites its record.
pub fn record_filename(key: &str) -> String {
    let stem = sanitize(strip_scheme(key));
    let hash = short_hash(key);
    format!("{stem}--{hash}.json")
}

fn strip_scheme(key: &str) -> &str {
    key.split_once("://").map_or(key, |(_, rest)| rest)
}

fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_STEM_LEN));
    let mut prev_underscore = false;
    for c in input.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
            c
        } else {
            '_'
        };
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        out.push(c);
        if out.len() >= MAX_STEM_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches(&['_', '.', '-'][..]);
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
