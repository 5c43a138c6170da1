//! Guest and host configuration.
//!
//! Both configs can be written by hand in YAML (merge keys are supported so a
//! shared `defaults: &defaults` anchor can be reused across games) and every
//! field falls back to its default when omitted.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yml::Value;
use yaml_merge_keys::merge_keys_serde_yml;

pub const DEBUG_ENV_VAR: &str = "LIVETUNE_DEBUG";
pub const STORAGE_DIR_ENV_VAR: &str = "LIVETUNE_STORAGE_DIR";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GuestConfig {
    pub game_id: Option<String>,
    pub debug: bool,
    /// How long a score submission waits for `SCORE_ACK` before settling
    /// as a (successful) timeout
    pub ack_timeout_ms: u64,
    /// Interval between schema re-announcements while no host message has
    /// been observed
    pub announce_retry_ms: u64,
    pub announce_retries: u32,
    pub persist_high_score: bool,
    pub storage_dir: Option<PathBuf>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            game_id: None,
            debug: false,
            ack_timeout_ms: 3000,
            announce_retry_ms: 1000,
            announce_retries: 3,
            persist_high_score: true,
            storage_dir: None,
        }
    }
}

impl GuestConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        load_yaml(path)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn announce_retry(&self) -> Duration {
        Duration::from_millis(self.announce_retry_ms)
    }

    /// Applies `LIVETUNE_DEBUG` and `LIVETUNE_STORAGE_DIR` on top of the
    /// current values.
    pub fn with_env_overrides(mut self) -> Self {
        if env_flag(DEBUG_ENV_VAR) {
            self.debug = true;
        }

        if let Ok(dir) = env::var(STORAGE_DIR_ENV_VAR) {
            if !dir.trim().is_empty() {
                self.storage_dir = Some(PathBuf::from(dir));
            }
        }

        self
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Reply to every `SCORE_SUBMIT` with `SCORE_ACK`
    pub auto_ack_scores: bool,
    /// Send `REQUEST_SCHEMA` if no schema has arrived this long after attach
    pub schema_request_after_ms: u64,
    /// Check edits against the mirrored schema before sending them. The guest
    /// validates again either way. When off, the mirror records every edit
    /// as sent, so a value the guest refuses stays in the mirror until the
    /// next `SCHEMA_DEFINED`; `Host::request_schema` forces one.
    pub validate_edits: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            auto_ack_scores: true,
            schema_request_after_ms: 500,
            validate_edits: true,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        load_yaml(path)
    }

    pub fn schema_request_after(&self) -> Duration {
        Duration::from_millis(self.schema_request_after_ms)
    }
}

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let source = fs::read_to_string(path).map_err(|err| {
        format!("failed to read config '{}': {}", path.display(), err)
    })?;

    parse_yaml(&source).map_err(|err| {
        format!("failed to parse config '{}': {}", path.display(), err)
    })
}

pub fn parse_yaml<T: DeserializeOwned>(source: &str) -> Result<T, String> {
    let raw: Value = serde_yml::from_str(source).map_err(|err| err.to_string())?;

    let merged = merge_keys_serde_yml(raw).map_err(|err| {
        format!("failed to process YAML merge keys: {}", err)
    })?;

    serde_yml::from_value(merged).map_err(|err| err.to_string())
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: GuestConfig = parse_yaml("debug: true").unwrap();
        assert!(config.debug);
        assert_eq!(config.ack_timeout_ms, 3000);
        assert_eq!(config.announce_retries, 3);
        assert!(config.persist_high_score);
    }

    #[test]
    fn test_merge_keys_are_resolved() {
        let source = r#"
shared: &shared
  auto_ack_scores: false
  schema_request_after_ms: 50
host:
  <<: *shared
  validate_edits: false
"#;
        #[derive(Deserialize)]
        struct Doc {
            host: HostConfig,
        }

        let doc: Doc = parse_yaml(source).unwrap();
        assert!(!doc.host.auto_ack_scores);
        assert!(!doc.host.validate_edits);
        assert_eq!(doc.host.schema_request_after(), Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let result = parse_yaml::<HostConfig>("auto_ack_scores: [");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            env::set_var(DEBUG_ENV_VAR, "yes");
            env::set_var(STORAGE_DIR_ENV_VAR, "/tmp/livetune-test");
        }

        let config = GuestConfig::default().with_env_overrides();

        unsafe {
            env::remove_var(DEBUG_ENV_VAR);
            env::remove_var(STORAGE_DIR_ENV_VAR);
        }

        assert!(config.debug);
        assert_eq!(
            config.storage_dir,
            Some(PathBuf::from("/tmp/livetune-test"))
        );
    }
}
