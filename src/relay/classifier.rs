// Upstream failure classification
//
// Decides whether a failed generation is a quota problem (reported as 429)
// and whether fallback mode may substitute the placeholder image for it.

/// Vocabulary that marks a failure as quota/rate-limit related.
/// Matched case-insensitively; `RESOURCE_EXHAUSTED` is covered by
/// "exhausted".
const QUOTA_MARKERS: [&str; 4] = ["quota", "exhausted", "rate", "insufficient"];

/// Quota classification: upstream said 429, or the message uses
/// quota/rate-limit vocabulary.
pub fn is_quota_error(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Whether fallback mode may substitute a placeholder for this failure:
/// quota errors, empty-output errors, and permission/not-found errors.
pub fn fallback_applies(status: Option<u16>, message: &str) -> bool {
    if is_quota_error(status, message) {
        return true;
    }
    if message.contains("NO_OUTPUT") {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("permission") || contains_not_found(&lower)
}

/// Matches "not" followed by whitespace and "found", anywhere in the text.
fn contains_not_found(lower: &str) -> bool {
    let mut rest = lower;
    while let Some(idx) = rest.find("not") {
        let after = &rest[idx + 3..];
        let trimmed = after.trim_start();
        if trimmed.len() < after.len() && trimmed.starts_with("found") {
            return true;
        }
        rest = after;
    }
    false
}
