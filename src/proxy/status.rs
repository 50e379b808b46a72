//! Upstream status self-correction.
//!
//! Some upstream errors arrive with a generic status while the message
//! quotes the real one (`"HTTP 429"`, `"status code 503"`, `"code": 400`).
//! When the quoted status is a plausible error status that differs from
//! the reported one, the quoted status wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::validation::is_error_status;

static QUOTED_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:HTTP|status code)\s*(\d{3})|"code"\s*:\s*(\d{3})"#)
        .expect("status pattern is a valid regex")
});

/// The first error status quoted in `message`, if any.
#[must_use]
pub fn quoted_status(message: &str) -> Option<u16> {
    let captures = QUOTED_STATUS.captures(message)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .filter(|code| is_error_status(*code))
}

#[must_use]
pub fn correct_status(reported: u16, message: &str) -> u16 {
    match quoted_status(message) {
        Some(quoted) if quoted != reported => {
            tracing::warn!(reported, corrected = quoted, "upstream status corrected from error message");
            quoted
        }
        _ => reported,
    }
}
