//! Per-path streaming mode selection.
//!
//! Overrides are matched by specificity: an exact segment scores 10, a
//! `:param` segment 5, a `/prefix/*` wildcard 10 per prefix segment, and
//! the `/*` catch-all 0. The most specific override for the request
//! decides the mode; without a match the configured default applies.

use crate::config::model::{StreamOverride, StreamingConfig, StreamingMode};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Score of `pattern` against the request segments, or `None` when it does not match.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn specificity(pattern: &str, request: &[&str]) -> Option<i32> {
    if pattern == "/*" {
        return Some(0);
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix = segments(prefix);
        let covered = request.len() >= prefix.len()
            && prefix.iter().zip(request).all(|(p, q)| p == q);
        return covered.then_some(prefix.len() as i32 * 10);
    }

    let pattern = segments(pattern);
    if pattern.len() != request.len() {
        return None;
    }
    pattern.iter().zip(request).try_fold(0, |score, (p, q)| {
        if p.starts_with(':') {
            Some(score + 5)
        } else if p == q {
            Some(score + 10)
        } else {
            None
        }
    })
}

fn method_matches(rule: &StreamOverride, method: &str) -> bool {
    rule.methods
        .iter()
        .any(|m| m == "*" || m.eq_ignore_ascii_case(method))
}

/// The most specific matching override, if any. Earlier rules win ties.
#[must_use]
pub fn match_override<'a>(
    overrides: &'a [StreamOverride],
    method: &str,
    path: &str,
) -> Option<&'a StreamOverride> {
    let request = segments(path);
    let mut best: Option<(i32, &StreamOverride)> = None;
    for rule in overrides.iter().filter(|r| method_matches(r, method)) {
        if let Some(score) = specificity(&rule.path, &request) {
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, rule));
            }
        }
    }
    best.map(|(_, rule)| rule)
}

#[must_use]
pub fn resolve_streaming_mode(streaming: &StreamingConfig, method: &str, path: &str) -> StreamingMode {
    match_override(&streaming.overrides, method, path).map_or(streaming.mode, |rule| rule.mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(path: &str, methods: &[&str], mode: StreamingMode) -> StreamOverride {
        StreamOverride {
            path: path.into(),
            methods: methods.iter().map(|m| (*m).to_string()).collect(),
            mode,
        }
    }

    fn config(overrides: Vec<StreamOverride>) -> StreamingConfig {
        StreamingConfig {
            overrides,
            ..StreamingConfig::default()
        }
    }

    #[test]
    fn default_applies_without_overrides() {
        let streaming = config(vec![]);
        assert_eq!(
            resolve_streaming_mode(&streaming, "POST", "/v1/chat/completions"),
            StreamingMode::Real
        );
    }

    #[test]
    fn exact_beats_param_beats_wildcard() {
        let streaming = config(vec![
            rule("/*", &["*"], StreamingMode::Fake),
            rule("/v1beta/*", &["*"], StreamingMode::Real),
            rule("/v1beta/models/:model", &["*"], StreamingMode::Fake),
            rule("/v1beta/models/list", &["*"], StreamingMode::Real),
        ]);

        assert_eq!(
            resolve_streaming_mode(&streaming, "GET", "/v1beta/models/list"),
            StreamingMode::Real
        );
        assert_eq!(
            resolve_streaming_mode(&streaming, "GET", "/v1beta/models/gemini-pro"),
            StreamingMode::Fake
        );
        assert_eq!(
            resolve_streaming_mode(&streaming, "GET", "/v1beta/files/abc/meta"),
            StreamingMode::Real
        );
        assert_eq!(
            resolve_streaming_mode(&streaming, "GET", "/healthz"),
            StreamingMode::Fake
        );
    }

    #[test]
    fn method_filter_is_respected() {
        let streaming = config(vec![rule("/v1/*", &["post"], StreamingMode::Fake)]);
        assert_eq!(
            resolve_streaming_mode(&streaming, "POST", "/v1/chat/completions"),
            StreamingMode::Fake
        );
        assert_eq!(
            resolve_streaming_mode(&streaming, "GET", "/v1/models"),
            StreamingMode::Real
        );
    }

    #[test]
    fn wildcard_prefix_must_match_every_segment() {
        assert_eq!(specificity("/v1beta/*", &["v1", "models"]), None);
        assert_eq!(specificity("/v1beta/*", &["v1beta"]), Some(10));
        assert_eq!(specificity("/a/:b", &["a"]), None);
    }
}
