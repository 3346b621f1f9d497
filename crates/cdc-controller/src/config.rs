use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Replicator configuration, loaded from `vibestack-replicator.toml` with
/// `${VAR}` environment-variable substitution for secrets (the connection
/// string), following the teacher's `ProjectConfig::resolve_env` convention.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::slot")]
    pub slot: String,
    #[serde(default = "defaults::publication")]
    pub publication: String,
    #[serde(default = "defaults::wal_batch_size")]
    pub wal_batch_size: usize,
    #[serde(default = "defaults::wal_consume_size")]
    pub wal_consume_size: usize,
    #[serde(default = "defaults::wal_batch_threshold")]
    pub wal_batch_threshold: f64,
    #[serde(default = "defaults::polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "defaults::fast_polling_interval_ms")]
    pub fast_polling_interval_ms: u64,
    #[serde(default = "defaults::max_consecutive_polls")]
    pub max_consecutive_polls: u32,
    #[serde(default = "defaults::store_batch_size")]
    pub store_batch_size: usize,
    #[serde(default = "defaults::skip_wal_consumption")]
    pub skip_wal_consumption: bool,
    #[serde(default)]
    pub tracked_tables: Vec<String>,
    #[serde(default = "defaults::client_timeout_secs")]
    pub client_timeout_secs: i64,
    #[serde(default = "defaults::full_cleanup_interval_secs")]
    pub full_cleanup_interval_secs: i64,
    #[serde(default = "defaults::client_check_interval_secs")]
    pub client_check_interval_secs: u64,
    #[serde(default = "defaults::hibernation_check_interval_secs")]
    pub hibernation_check_interval_secs: u64,
    pub connection_string: String,
    #[serde(default = "defaults::state_db_path")]
    pub state_db_path: String,
    #[serde(default = "defaults::admin_bind_addr")]
    pub admin_bind_addr: String,
}

mod defaults {
    pub fn slot() -> String {
        "vibestack".into()
    }
    pub fn publication() -> String {
        "vibestack_pub".into()
    }
    pub fn wal_batch_size() -> usize {
        2000
    }
    pub fn wal_consume_size() -> usize {
        2000
    }
    pub fn wal_batch_threshold() -> f64 {
        0.5
    }
    pub fn polling_interval_ms() -> u64 {
        1000
    }
    pub fn fast_polling_interval_ms() -> u64 {
        100
    }
    pub fn max_consecutive_polls() -> u32 {
        10
    }
    pub fn store_batch_size() -> usize {
        100
    }
    pub fn skip_wal_consumption() -> bool {
        true
    }
    pub fn client_timeout_secs() -> i64 {
        600
    }
    pub fn full_cleanup_interval_secs() -> i64 {
        86_400
    }
    pub fn client_check_interval_secs() -> u64 {
        60
    }
    pub fn hibernation_check_interval_secs() -> u64 {
        300
    }
    pub fn state_db_path() -> String {
        "vibestack-replicator.db".into()
    }
    pub fn admin_bind_addr() -> String {
        "127.0.0.1:8787".into()
    }
}

impl Config {
    /// Load configuration from a TOML file, resolving `${VAR}` references in
    /// `connection_string` against the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.connection_string = resolve_env(&config.connection_string);
        Ok(config)
    }

    pub fn client_timeout_millis(&self) -> i64 {
        self.client_timeout_secs * 1000
    }

    pub fn full_cleanup_interval_millis(&self) -> i64 {
        self.full_cleanup_interval_secs * 1000
    }
}

/// Resolve `${VAR_NAME}` references in `s` against the process environment.
/// Unset variables resolve to the empty string, matching the teacher's
/// `ProjectConfig::resolve_env`.
pub fn resolve_env(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        } else {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_substitutes_known_vars() {
        std::env::set_var("CDC_TEST_VAR", "hello");
        assert_eq!(resolve_env("${CDC_TEST_VAR}"), "hello");
        assert_eq!(resolve_env("prefix_${CDC_TEST_VAR}_suffix"), "prefix_hello_suffix");
        assert_eq!(resolve_env("no_vars"), "no_vars");
    }

    #[test]
    fn resolve_env_blanks_unset_vars() {
        std::env::remove_var("CDC_TEST_UNSET");
        assert_eq!(resolve_env("${CDC_TEST_UNSET}"), "");
    }

    #[test]
    fn load_applies_defaults_for_omitted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vibestack-replicator.toml");
        std::fs::write(&path, "connection_string = \"postgres://localhost/db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.slot, "vibestack");
        assert_eq!(config.wal_batch_size, 2000);
        assert!(config.skip_wal_consumption);
    }
}
