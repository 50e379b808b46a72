//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for values the
//! relay cannot run with: zero attempts, status codes outside the error
//! range, malformed override paths, a Redis backend without a URL, and
//! empty API keys. Every problem is reported, not just the first.

use url::Url;

use super::model::{CacheBackendKind, Config};
use crate::error::ValidationError;

pub const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "*",
];

/// Validate an override path. Returns `Ok(())` or a human-readable error.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path cannot be empty".into());
    }
    if !path.starts_with('/') {
        return Err(format!("path must start with '/' (did you mean '/{path}'?)"));
    }
    Ok(())
}

pub fn validate_method(method: &str) -> Result<(), String> {
    let upper = method.to_uppercase();
    if VALID_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(format!("'{method}' is not a valid HTTP method"))
    }
}

pub fn validate_redis_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "redis" | "rediss") => Ok(()),
        Ok(parsed) => Err(format!(
            "unsupported scheme '{}' (expected redis or rediss)",
            parsed.scheme()
        )),
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

/// Error statuses are the only ones that can trigger an account switch.
#[must_use]
pub const fn is_error_status(code: u16) -> bool {
    code >= 400 && code <= 599
}

fn error(section: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        section: section.into(),
        field: field.into(),
        message: message.into(),
        suggestion: None,
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.retry.max_retries == 0 {
        errors.push(ValidationError {
            suggestion: Some("use 1 to disable retries".into()),
            ..error("retry", "max_retries", "at least one attempt is required")
        });
    }

    if config.streaming.keep_alive_ms == 0 {
        errors.push(error(
            "streaming",
            "keep_alive_ms",
            "keep-alive interval must be positive",
        ));
    }

    for (i, rule) in config.streaming.overrides.iter().enumerate() {
        let field = format!("overrides[{i}].path");
        if let Err(msg) = validate_path(&rule.path) {
            errors.push(ValidationError {
                suggestion: (!rule.path.is_empty() && !rule.path.starts_with('/'))
                    .then(|| format!("did you mean '/{}'?", rule.path)),
                ..error("streaming", &field, msg)
            });
        }
        for method in &rule.methods {
            if let Err(msg) = validate_method(method) {
                errors.push(error("streaming", &format!("overrides[{i}].methods"), msg));
            }
        }
    }

    for code in &config.rotation.immediate_switch_status_codes {
        if !is_error_status(*code) {
            errors.push(ValidationError {
                suggestion: Some("only 4xx and 5xx statuses can trigger a switch".into()),
                ..error(
                    "rotation",
                    "immediate_switch_status_codes",
                    format!("{code} is not an error status"),
                )
            });
        }
    }

    if config.rotation.initial_auth_index == Some(0) {
        errors.push(error(
            "rotation",
            "initial_auth_index",
            "account indices start at 1",
        ));
    }

    if config.timeouts.first_response_ms == 0 {
        errors.push(error("timeouts", "first_response_ms", "must be positive"));
    }
    if config.timeouts.stream_idle_ms == 0 {
        errors.push(error("timeouts", "stream_idle_ms", "must be positive"));
    }

    match (&config.cache.backend, &config.cache.redis_url) {
        (CacheBackendKind::Redis, None) => {
            errors.push(ValidationError {
                suggestion: Some("set cache.redis_url or REDIS_URL".into()),
                ..error("cache", "redis_url", "required when backend is redis")
            });
        }
        (_, Some(url)) => {
            if let Err(msg) = validate_redis_url(url) {
                errors.push(error("cache", "redis_url", msg));
            }
        }
        _ => {}
    }

    if config.auth.api_keys.iter().any(|k| k.trim().is_empty()) {
        errors.push(error("auth", "api_keys", "API keys cannot be empty"));
    }
    if config.auth.credentials_dir.is_empty() {
        errors.push(error("auth", "credentials_dir", "cannot be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let threshold = match config.rotation.failure_threshold {
        0 => "disabled".to_string(),
        n => format!("{n} consecutive failures"),
    };
    let immediate = if config.rotation.immediate_switch_status_codes.is_empty() {
        "none".to_string()
    } else {
        config
            .rotation
            .immediate_switch_status_codes
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let cache = if config.cache.enabled() {
        format!("{:?}, ttl {}s", config.cache.backend, config.cache.ttl_secs).to_lowercase()
    } else {
        "disabled".to_string()
    };

    let lines = [
        format!("  streaming:   {} ({} overrides)", config.streaming.mode, config.streaming.overrides.len()),
        format!(
            "  retries:     {} attempts, {}ms apart",
            config.retry.max_retries, config.retry.retry_delay_ms
        ),
        format!("  switch on:   {threshold}; immediately on {immediate}"),
        format!("  cache:       {cache}"),
        format!(
            "  api keys:    {}",
            if config.auth.api_keys.is_empty() {
                "open access".to_string()
            } else {
                format!("{} configured", config.auth.api_keys.len())
            }
        ),
    ];

    format!("{path} is valid\n{}", lines.join("\n"))
}
