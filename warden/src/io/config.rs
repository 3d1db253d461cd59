//! Warden configuration, stored as TOML next to the shared store.
//!
//! Every field has a default so a missing file or a partial file both
//! load cleanly; `validate` catches values that would make the engine
//! misbehave (zero retries, an empty domain list, and so on).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Hosts the warden restricts while a lockout window is open.
    /// Subdomains of a listed host count as restricted.
    pub domains: Vec<String>,
    /// Length of the relax phase at the start of a cycle lockout.
    pub relax_minutes: u64,
    /// First rule id handed out when the registry is empty.
    pub rule_start_id: u32,
    /// Name of the enforcer ruleset toggled by lockouts.
    pub session_ruleset: String,
    /// How often the watch loop re-reads the store.
    pub poll_interval_secs: u64,
    pub mutex: MutexSettings,
    pub redirect: RedirectSettings,
}

/// Tuning for the store-level mutex used by id allocation and cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutexSettings {
    /// Acquisition attempts after the initial one.
    pub retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How long a held lock stays valid before others may take it over.
    pub lease_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectSettings {
    /// Whether a redirect to the home page also primes an on-page message.
    pub insert_message: bool,
    /// Template for the primed message; `{{ goal }}` is the lockout reason.
    pub template: String,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            domains: vec!["chatgpt.com".to_owned()],
            relax_minutes: 5,
            rule_start_id: 1,
            session_ruleset: "session_rules".to_owned(),
            poll_interval_secs: 2,
            mutex: MutexSettings::default(),
            redirect: RedirectSettings::default(),
        }
    }
}

impl Default for MutexSettings {
    fn default() -> Self {
        Self { retries: 5, initial_delay_ms: 10, max_delay_ms: 1_000, lease_ms: 30_000 }
    }
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self {
            insert_message: true,
            template: "Remember your goal: {{ goal }}".to_owned(),
        }
    }
}

/// Longest accepted relax phase (one day).
const MAX_RELAX_MINUTES: u64 = 24 * 60;
/// Longest accepted mutex lease (one hour). Critical sections are a few
/// store round trips.
const MAX_LEASE_MS: u64 = 3_600_000;

impl WardenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            bail!("domains must list at least one host");
        }
        for domain in &self.domains {
            if domain.trim().is_empty() || domain.contains(char::is_whitespace) {
                bail!("domain {domain:?} is not a valid host");
            }
        }
        if self.relax_minutes == 0 {
            bail!("relax_minutes must be at least 1");
        }
        if self.relax_minutes > MAX_RELAX_MINUTES {
            bail!("relax_minutes must be at most {MAX_RELAX_MINUTES}");
        }
        if self.session_ruleset.trim().is_empty() {
            bail!("session_ruleset must not be empty");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.mutex.retries == 0 {
            bail!("mutex.retries must be at least 1");
        }
        if self.mutex.initial_delay_ms == 0 {
            bail!("mutex.initial_delay_ms must be at least 1");
        }
        if self.mutex.max_delay_ms < self.mutex.initial_delay_ms {
            bail!("mutex.max_delay_ms must be at least mutex.initial_delay_ms");
        }
        if self.mutex.lease_ms == 0 {
            bail!("mutex.lease_ms must be at least 1");
        }
        if self.mutex.lease_ms > MAX_LEASE_MS {
            bail!("mutex.lease_ms must be at most {MAX_LEASE_MS}");
        }
        if self.redirect.insert_message && self.redirect.template.trim().is_empty() {
            bail!("redirect.template must not be empty when insert_message is on");
        }
        Ok(())
    }
}

/// Loads the config from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<WardenConfig> {
    if !path.exists() {
        return Ok(WardenConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config: WardenConfig = toml::from_str(&raw)
        .with_context(|| format!("parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Writes the config atomically via a temp file and rename.
pub fn write_config(path: &Path, config: &WardenConfig) -> Result<()> {
    let body = toml::to_string_pretty(config).context("encode config")?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, body).with_context(|| format!("write config {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    /// Verifies that a missing config file loads as the defaults.
    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("config.toml")).expect("load");
        assert_eq!(config, WardenConfig::default());
    }

    /// Verifies that a partial file keeps defaults for omitted fields.
    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "relax_minutes = 10\n\n[mutex]\nretries = 2\n").expect("write");

        let config = load_config(&path).expect("load");
        assert_eq!(config.relax_minutes, 10);
        assert_eq!(config.mutex.retries, 2);
        assert_eq!(config.mutex.initial_delay_ms, 10);
        assert_eq!(config.domains, vec!["chatgpt.com".to_owned()]);
    }

    /// Verifies that a written config loads back identically.
    #[test]
    fn write_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = WardenConfig::default();
        config.domains = vec!["example.org".to_owned()];
        config.mutex.lease_ms = 5_000;
        write_config(&path, &config).expect("write");

        assert_eq!(load_config(&path).expect("load"), config);
    }

    /// Verifies that validation rejects an empty domain list.
    #[test]
    fn validate_rejects_empty_domains() {
        let mut config = WardenConfig::default();
        config.domains.clear();
        assert!(config.validate().is_err());
    }

    /// Verifies that validation rejects a backoff cap below the initial delay.
    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut config = WardenConfig::default();
        config.mutex.max_delay_ms = 5;
        assert!(config.validate().is_err());
    }

    /// Verifies that validation bounds the knobs that feed millisecond
    /// arithmetic.
    #[test]
    fn validate_bounds_time_knobs() {
        let mut config = WardenConfig::default();
        config.relax_minutes = 200_000_000_000_000;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.relax_minutes = MAX_RELAX_MINUTES;
        assert!(config.validate().is_ok());

        let mut config = WardenConfig::default();
        config.mutex.lease_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    /// Verifies that loading a file with a bad value reports the path.
    #[test]
    fn load_invalid_file_errors() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "domains = 3\n").expect("write");

        let err = load_config(&path).expect_err("bad type should fail");
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
