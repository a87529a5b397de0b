//! Storage key layout.
//!
//! Every batch lives under
//! `uploads/{referenceType}/{referenceId}/{role}/{batchId | rev-N}/` and each
//! file under `{prefix}{YYYY-MM-DD}/{filename}`. User-supplied pieces pass
//! through [`sanitize_segment`], so no segment can contain a separator or
//! climb out of its prefix.

use crate::models::reference::{BatchTag, ReferenceType, Role};
use chrono::NaiveDate;
use std::collections::HashSet;

const ROOT: &str = "uploads";
const MAX_SEGMENT_LEN: usize = 128;

/// Reduce `raw` to a single safe key segment.
///
/// Keeps ASCII alphanumerics and `.`, `-`, `_`. Everything else, path
/// separators included, becomes `_`; runs of `_` collapse and leading dots
/// are dropped. Returns `fallback` if nothing usable remains.
pub fn sanitize_segment(raw: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    while out.contains("..") {
        out = out.replace("..", ".");
    }

    let segment: String = out
        .trim_start_matches(['.', '_'])
        .trim_end_matches('_')
        .chars()
        .take(MAX_SEGMENT_LEN)
        .collect();

    if segment.is_empty() {
        fallback.to_string()
    } else {
        segment
    }
}

/// True when `raw` is already its own sanitized form, so it maps to a key
/// segment no other input shares.
pub fn is_canonical_segment(raw: &str) -> bool {
    !raw.is_empty() && sanitize_segment(raw, "") == raw
}

/// Prefix shared by every object of one batch. Always ends with `/`.
pub fn batch_prefix(
    reference_type: ReferenceType,
    reference_id: &str,
    role: Role,
    tag: BatchTag,
) -> String {
    format!(
        "{}/{}/{}/{}/{}/",
        ROOT,
        reference_type.as_str(),
        sanitize_segment(reference_id, "unknown"),
        role.as_str(),
        tag
    )
}

/// Key for one file under `prefix`, dated with the upload day.
pub fn object_key(prefix: &str, date: NaiveDate, filename: &str) -> String {
    format!(
        "{}{}/{}",
        prefix,
        date.format("%Y-%m-%d"),
        sanitize_segment(filename, "file")
    )
}

/// Make `name` unique within `taken` by appending ` (n)` before the extension.
pub fn dedupe_name(name: &str, taken: &mut HashSet<String>) -> String {
    dedupe_with(name, taken, |stem, n, ext| format!("{} ({}){}", stem, n, ext))
}

/// Like [`dedupe_name`] but the suffix (`-n`) survives [`sanitize_segment`].
pub fn dedupe_segment(segment: &str, taken: &mut HashSet<String>) -> String {
    dedupe_with(segment, taken, |stem, n, ext| format!("{}-{}{}", stem, n, ext))
}

fn dedupe_with<F>(name: &str, taken: &mut HashSet<String>, suffixed: F) -> String
where
    F: Fn(&str, usize, &str) -> String,
{
    if taken.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    // Leave room for the suffix so a later length cap cannot undo it.
    let stem: String = stem
        .chars()
        .take(MAX_SEGMENT_LEN.saturating_sub(ext.len() + 8))
        .collect();

    let mut n = 1;
    loop {
        let candidate = suffixed(&stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
