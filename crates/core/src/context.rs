use crate::models::Fragment;
use std::collections::HashSet;

/// Drops repeated fragments from overlapping windows, keeping first-seen order.
pub fn distinct_fragments(fragments: &[Fragment]) -> Vec<&Fragment> {
    let mut seen = HashSet::new();
    fragments
        .iter()
        .filter(|fragment| seen.insert(fragment.position))
        .collect()
}

/// Renders search output as prompt context, one `[page N] text` line per fragment.
pub fn format_context(fragments: &[Fragment]) -> String {
    distinct_fragments(fragments)
        .into_iter()
        .map(|fragment| format!("[page {}] {}", fragment.page, fragment.text))
        .collect::<Vec<_>>()
        .join("\n")
}
