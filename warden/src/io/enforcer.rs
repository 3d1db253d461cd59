//! Where blocking rules land once the warden decides on them.
//!
//! The warden itself does not intercept traffic; it maintains a rules
//! file that cooperating tools (a proxy, a browser extension) consume.
//! [`Enforcer`] is the seam, [`FileEnforcer`] the shipped implementation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One host-blocking rule installed for a lockout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u32,
    pub domain: String,
}

pub trait Enforcer: Send + Sync {
    /// Installs `add` and drops the rules whose ids appear in `remove_ids`.
    /// Adding a rule with an id that is already present replaces it.
    fn update_rules(&self, add: &[Rule], remove_ids: &[u32]) -> Result<()>;

    /// Turns the named ruleset on or off. Unknown names are created.
    fn set_ruleset_enabled(&self, ruleset: &str, enabled: bool) -> Result<()>;
}

/// On-disk shape of the rules file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub rulesets: BTreeMap<String, bool>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

pub fn read_rules(path: &Path) -> Result<RulesFile> {
    if !path.exists() {
        return Ok(RulesFile::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read rules {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse rules {}", path.display()))
}

pub fn write_rules(path: &Path, rules: &RulesFile) -> Result<()> {
    let mut body = serde_json::to_string_pretty(rules).context("encode rules")?;
    body.push('\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).with_context(|| format!("write rules {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace rules {}", path.display()))?;
    Ok(())
}

/// Enforcer persisting to a JSON rules file.
#[derive(Debug, Clone)]
pub struct FileEnforcer {
    path: PathBuf,
}

impl FileEnforcer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn rules(&self) -> Result<RulesFile> {
        read_rules(&self.path)
    }
}

impl Enforcer for FileEnforcer {
    fn update_rules(&self, add: &[Rule], remove_ids: &[u32]) -> Result<()> {
        let mut file = read_rules(&self.path)?;
        file.rules.retain(|rule| {
            !remove_ids.contains(&rule.id) && !add.iter().any(|new| new.id == rule.id)
        });
        file.rules.extend(add.iter().cloned());
        file.rules.sort_by_key(|rule| rule.id);
        write_rules(&self.path, &file)
    }

    fn set_ruleset_enabled(&self, ruleset: &str, enabled: bool) -> Result<()> {
        let mut file = read_rules(&self.path)?;
        file.rulesets.insert(ruleset.to_owned(), enabled);
        write_rules(&self.path, &file)
    }
}
