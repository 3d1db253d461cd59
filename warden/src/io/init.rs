//! Initialization helpers for `.warden/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{WardenConfig, write_config};
use super::enforcer::{RulesFile, write_rules};

/// All canonical paths within `.warden/` for a project root.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    pub root: PathBuf,
    pub warden_dir: PathBuf,
    pub store_path: PathBuf,
    pub store_lock_path: PathBuf,
    pub config_path: PathBuf,
    pub rules_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WardenPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let warden_dir = root.join(".warden");
        Self {
            root: root.clone(),
            warden_dir: warden_dir.clone(),
            store_path: warden_dir.join("store.json"),
            store_lock_path: warden_dir.join("store.lock"),
            config_path: warden_dir.join("config.toml"),
            rules_path: warden_dir.join("rules.json"),
            gitignore_path: warden_dir.join(".gitignore"),
        }
    }
}

/// Options for `init_warden`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing warden-owned files.
    pub force: bool,
}

/// Create `.warden/` scaffolding in `root`.
///
/// Fails if `.warden/` already exists unless `options.force` is set.
pub fn init_warden(root: &Path, options: &InitOptions) -> Result<WardenPaths> {
    let paths = WardenPaths::new(root);
    if paths.warden_dir.exists() && !options.force {
        return Err(anyhow!(
            "warden init: .warden already exists (use --force to overwrite)"
        ));
    }
    if paths.warden_dir.exists() && !paths.warden_dir.is_dir() {
        return Err(anyhow!("warden init: .warden exists but is not a directory"));
    }

    create_dir(&paths.warden_dir)?;

    write_file(&paths.gitignore_path, WARDEN_GITIGNORE)?;
    write_file(&paths.store_path, EMPTY_STORE)?;
    write_config(&paths.config_path, &WardenConfig::default())?;
    write_rules(&paths.rules_path, &RulesFile::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const EMPTY_STORE: &str = "{}\n";
const WARDEN_GITIGNORE: &str = "store.json\nstore.lock\n*.tmp\n";

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    /// Verifies init_warden creates the complete directory layout.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let paths = init_warden(root, &InitOptions { force: false }).expect("init");

        assert!(paths.warden_dir.is_dir());
        assert!(paths.store_path.is_file());
        assert!(paths.config_path.is_file());
        assert!(paths.rules_path.is_file());
        assert!(paths.gitignore_path.is_file());

        let store = fs::read_to_string(&paths.store_path).expect("read store");
        assert_eq!(store, EMPTY_STORE);
    }

    /// Verifies init_warden refuses to overwrite without --force.
    #[test]
    fn init_without_force_refuses_existing_warden_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        init_warden(root, &InitOptions { force: false }).expect("init");
        let err = init_warden(root, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies init_warden with --force resets warden-owned files.
    #[test]
    fn init_with_force_rewrites_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let paths = init_warden(root, &InitOptions { force: false }).expect("init");

        fs::write(&paths.store_path, "{\"left\":\"over\"}").expect("write custom");

        init_warden(root, &InitOptions { force: true }).expect("re-init");

        let store = fs::read_to_string(&paths.store_path).expect("read store");
        assert_eq!(store, EMPTY_STORE);
    }
}
