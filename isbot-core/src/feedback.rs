//! Feedback links tying a user's form submission to a session record.

/// Placeholder replaced by the session timestamp.
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// Substitute `timestamp` into `template`.
///
/// Templates without the placeholder get the timestamp appended as a query
/// parameter so the link still identifies the session.
pub fn feedback_link(template: &str, timestamp: &str) -> String {
    if template.contains(TIMESTAMP_PLACEHOLDER) {
        template.replace(TIMESTAMP_PLACEHOLDER, timestamp)
    } else {
        let separator = if template.contains('?') { '&' } else { '?' };
        format!("{template}{separator}session={timestamp}")
    }
}
