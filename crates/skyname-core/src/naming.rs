//! Turn classifier output into collision-free file names.
//!
//! Pure functions only: the same results always resolve to the same names.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::gateway::ClassificationResult;

pub const UNKNOWN_LABEL: &str = "unknown";

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DISALLOWED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());

/// Lower-case, hyphenate whitespace runs, keep only `[a-z0-9-]`.
/// Falls back to "unknown" for blank or "unknown" input.
pub fn sanitize_label(name: &str) -> String {
    if name.is_empty() || name.to_lowercase() == UNKNOWN_LABEL {
        return UNKNOWN_LABEL.to_string();
    }
    let lowered = name.to_lowercase();
    let hyphenated = WHITESPACE_RE.replace_all(&lowered, "-");
    let stripped = DISALLOWED_RE.replace_all(&hyphenated, "");
    if stripped.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        stripped.into_owned()
    }
}

pub fn result_label(result: &ClassificationResult) -> String {
    if !result.success {
        return UNKNOWN_LABEL.to_string();
    }
    sanitize_label(&result.name)
}

/// Resolve final labels for an ordered result list.
///
/// Labels seen more than once get `-1`, `-2`, ... in the order they appear.
/// "unknown" is never numbered. A label seen once normally stays as it is.
/// The one exception is a singleton that equals a generated name (a plane
/// literally called "boeing-747-1" next to two "boeing-747"s): it gets its
/// own counter (`boeing-747-1-1`), giving up its unchanged label so that
/// no two resolved labels are the same.
pub fn resolve(results: &[ClassificationResult]) -> Vec<String> {
    let labels: Vec<String> = results.iter().map(result_label).collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in &labels {
        if label != UNKNOWN_LABEL {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
    }

    let mut sequence: HashMap<&str, usize> = HashMap::new();
    let mut resolved: Vec<String> = Vec::with_capacity(labels.len());
    let mut numbered: HashSet<String> = HashSet::new();
    for label in &labels {
        if label == UNKNOWN_LABEL || counts[label.as_str()] <= 1 {
            resolved.push(label.clone());
            continue;
        }
        let n = sequence.entry(label.as_str()).or_insert(0);
        *n += 1;
        let name = format!("{}-{}", label, n);
        numbered.insert(name.clone());
        resolved.push(name);
    }

    let clashes: Vec<usize> = resolved
        .iter()
        .enumerate()
        .filter(|(i, name)| counts.get(labels[*i].as_str()) == Some(&1) && numbered.contains(*name))
        .map(|(i, _)| i)
        .collect();
    if !clashes.is_empty() {
        let mut used: HashSet<String> = resolved.iter().cloned().collect();
        for i in clashes {
            let base = resolved[i].clone();
            let mut counter = 0usize;
            let name = loop {
                counter += 1;
                let candidate = format!("{}-{}", base, counter);
                if !used.contains(&candidate) {
                    break candidate;
                }
            };
            used.insert(name.clone());
            resolved[i] = name;
        }
    }

    resolved
}

/// File name for an image given its resolved label. "unknown" keeps the
/// original stem; the original extension is always re-appended as-is.
pub fn final_file_name(label: &str, original_stem: &str, extension: &str) -> String {
    let stem = if label == UNKNOWN_LABEL { original_stem } else { label };
    format!("{}{}", stem, extension)
}
