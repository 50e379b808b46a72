//! `wsrelay init` — generate a starter configuration file.
//!
//! Creates a YAML, JSON, or TOML config file with either minimal
//! or fully documented templates.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::RelayError;

pub fn execute(args: &InitArgs) -> Result<(), RelayError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("wsrelay.{}", args.format.extension())));

    if output.exists() {
        return Err(RelayError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!("Created {}", output.display());
    Ok(())
}

const fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# wsrelay config
#
# Every setting has a default; see `wsrelay init --full` for the complete list.

streaming:
  mode: real

rotation:
  failure_threshold: 3
  immediate_switch_status_codes: [429]
"#;

const YAML_FULL: &str = r#"# wsrelay config
#
# All values shown are defaults unless noted. Uncomment and modify as needed.

streaming:
  mode: real                     # real: forward chunks as they arrive
                                 # fake: buffer the full body, keep the client alive meanwhile
  keep_alive_ms: 2000            # keep-alive period while buffering a streaming response
  # overrides:                   # per-path mode, most specific pattern wins
  #   - path: "/v1beta/models/:model"
  #     methods: ["POST"]
  #     mode: fake
  #   - path: "/v1/*"
  #     mode: real

retry:
  max_retries: 3                 # total attempts per request
  retry_delay_ms: 2000

rotation:
  failure_threshold: 0           # consecutive failures before switching accounts; 0 disables
  immediate_switch_status_codes: []   # e.g. [429, 503]
  # initial_auth_index: 1
  manual_switch_respects_breaker: false

timeouts:
  first_response_ms: 1200000     # wait for the first upstream event
  stream_idle_ms: 30000          # gap between chunks that ends a real stream

upstream:
  selection: first               # first | round_robin
  status_correction: true        # trust a status quoted in the error message

cache:
  backend: none                  # none | memory | redis
  ttl_secs: 300
  # redis_url: "redis://localhost:6379"

auth:
  api_keys: []                   # empty leaves the relay open
  credentials_dir: "auth"        # auth-<n>.json files, unless AUTH_JSON_<n> is set

debug: false
"#;

const JSON_MINIMAL: &str = r#"{
  "streaming": { "mode": "real" },
  "rotation": {
    "failure_threshold": 3,
    "immediate_switch_status_codes": [429]
  }
}
"#;

const JSON_FULL: &str = r#"{
  "streaming": {
    "mode": "real",
    "keep_alive_ms": 2000,
    "overrides": []
  },
  "retry": {
    "max_retries": 3,
    "retry_delay_ms": 2000
  },
  "rotation": {
    "failure_threshold": 0,
    "immediate_switch_status_codes": [],
    "manual_switch_respects_breaker": false
  },
  "timeouts": {
    "first_response_ms": 1200000,
    "stream_idle_ms": 30000
  },
  "upstream": {
    "selection": "first",
    "status_correction": true
  },
  "cache": {
    "backend": "none",
    "ttl_secs": 300
  },
  "auth": {
    "api_keys": [],
    "credentials_dir": "auth"
  },
  "debug": false
}
"#;

const TOML_MINIMAL: &str = r#"# wsrelay config

[streaming]
mode = "real"

[rotation]
failure_threshold = 3
immediate_switch_status_codes = [429]
"#;

const TOML_FULL: &str = r#"# wsrelay config
#
# All values shown are defaults. Uncomment and modify as needed.

debug = false

[streaming]
mode = "real"                    # real | fake
keep_alive_ms = 2000

# [[streaming.overrides]]
# path = "/v1beta/models/:model"
# methods = ["POST"]
# mode = "fake"

[retry]
max_retries = 3
retry_delay_ms = 2000

[rotation]
failure_threshold = 0
immediate_switch_status_codes = []
# initial_auth_index = 1
manual_switch_respects_breaker = false

[timeouts]
first_response_ms = 1200000
stream_idle_ms = 30000

[upstream]
selection = "first"              # first | round_robin
status_correction = true

[cache]
backend = "none"                 # none | memory | redis
ttl_secs = 300
# redis_url = "redis://localhost:6379"

[auth]
api_keys = []
credentials_dir = "auth"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Config;
    use crate::config::sources::parse_config_str;
    use crate::config::validation::validate;

    fn check(ext: &str, content: &str) -> Config {
        let config = parse_config_str(ext, content, "template").unwrap();
        validate(&config).unwrap();
        config
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_templates_are_valid() {
        let full = check("yaml", template(&ConfigFormat::Yaml, true));
        assert_eq!(full, Config::default());
        let minimal = check("yaml", template(&ConfigFormat::Yaml, false));
        assert_eq!(minimal.rotation.immediate_switch_status_codes, vec![429]);
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_templates_are_valid() {
        assert_eq!(check("json", template(&ConfigFormat::Json, true)), Config::default());
        check("json", template(&ConfigFormat::Json, false));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn toml_templates_are_valid() {
        assert_eq!(check("toml", template(&ConfigFormat::Toml, true)), Config::default());
        check("toml", template(&ConfigFormat::Toml, false));
    }
}
