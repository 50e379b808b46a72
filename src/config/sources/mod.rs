//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! [`file_source::FileSource`] reads YAML, JSON, or TOML files (each
//! gated by its feature flag); [`defaults::DefaultsSource`] serves the
//! built-in configuration when no file is present.

pub mod defaults;
pub mod file_source;

use sha2::{Digest, Sha256};

use crate::config::model::Config;
use crate::error::RelayError;

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, RelayError> {
    let parse_error = |source: Box<dyn std::error::Error + Send + Sync>| RelayError::ConfigParse {
        path: path_display.to_string(),
        source,
    };

    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => {
            // An all-comment YAML file parses as null rather than an empty map.
            if content.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with('#')) {
                return Ok(Config::default());
            }
            serde_yml::from_str(content).map_err(|e| parse_error(Box::new(e)))
        }

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| parse_error(Box::new(e))),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| parse_error(Box::new(e))),

        other => Err(RelayError::UnsupportedFormat(other.to_string())),
    }
}

/// Lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            parse_config_str("ini", "", "relay.ini"),
            Err(RelayError::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn comment_only_yaml_yields_defaults() {
        let config = parse_config_str("yaml", "# nothing yet\n\n", "wsrelay.yaml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_config_str("yaml", "retries: 3\n", "wsrelay.yaml").is_err());
    }
}
