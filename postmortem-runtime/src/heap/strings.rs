//! String statistics helpers for the combined heap pass.

use postmortem_report::StringHistogram;

/// Character length above which a duplicate is suggested for pooling
/// rather than interning.
const POOL_THRESHOLD: usize = 1000;

/// Longest display value emitted for a duplicate entry.
const MAX_DISPLAY_LEN: usize = 120;

/// Buckets a string length into the report histogram.
pub(crate) fn classify_length(histogram: &mut StringHistogram, length: u64) {
    match length {
        0 => histogram.empty += 1,
        1..=10 => histogram.tiny += 1,
        11..=100 => histogram.small += 1,
        101..=1000 => histogram.medium += 1,
        _ => histogram.large += 1,
    }
}

/// Produces the remediation suggestion attached to a duplicate entry.
pub(crate) fn suggestion_for(value: &str) -> String {
    if value.is_empty() {
        return "Use the canonical empty string instance instead of allocating empty strings."
            .to_owned();
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return "Cache or intern common URL prefixes instead of rebuilding them per request."
            .to_owned();
    }
    if value.chars().count() > POOL_THRESHOLD {
        return "Pool or stream this large string instead of holding duplicate copies."
            .to_owned();
    }
    "Consider string interning for this frequently repeated value.".to_owned()
}

/// Escapes control characters and truncates the display value of a
/// duplicate entry.
pub(crate) fn display_value(value: &str) -> String {
    let escaped = postmortem_common::escape_controls(value);
    if escaped.chars().count() <= MAX_DISPLAY_LEN {
        return escaped;
    }
    let mut truncated: String = escaped.chars().take(MAX_DISPLAY_LEN).collect();
    truncated.push('…');
    truncated
}
