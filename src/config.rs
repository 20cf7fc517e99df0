//! Repository configuration, stored as JSON at `.git/.stackit_config`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Default bound on the undo snapshot ring.
pub const DEFAULT_UNDO_DEPTH: usize = 20;

/// Default pattern for generated branch names.
pub const DEFAULT_BRANCH_PATTERN: &str = "{message}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The primary trunk branch.
    pub trunk: String,
    /// All trunk branches (contains `trunk`).
    #[serde(default)]
    pub trunks: Vec<String>,
    /// Whether forge (PR) integration is enabled.
    #[serde(default = "default_true")]
    pub is_forge_enabled: bool,
    /// Bound on the undo snapshot ring.
    #[serde(default = "default_undo_depth")]
    pub undo_stack_depth: usize,
    /// Pattern for generated branch names; see `naming`.
    #[serde(default = "default_branch_pattern")]
    pub branch_name_pattern: String,
    /// Whether `create` may generate commit messages with AI assistance.
    #[serde(default)]
    pub create_ai: bool,
    /// Whether `submit` appends a stack footer to PR bodies.
    #[serde(default = "default_true")]
    pub submit_footer: bool,
}

fn default_true() -> bool {
    true
}

fn default_undo_depth() -> usize {
    DEFAULT_UNDO_DEPTH
}

fn default_branch_pattern() -> String {
    DEFAULT_BRANCH_PATTERN.to_string()
}

impl Config {
    /// A fresh configuration for `init`.
    pub fn new(trunk: String) -> Self {
        Self {
            trunks: vec![trunk.clone()],
            trunk,
            is_forge_enabled: true,
            undo_stack_depth: DEFAULT_UNDO_DEPTH,
            branch_name_pattern: DEFAULT_BRANCH_PATTERN.to_string(),
            create_ai: false,
            submit_footer: true,
        }
    }

    fn path(git_dir: &Path) -> PathBuf {
        git_dir.join(".stackit_config")
    }

    /// Whether the repository has been initialized.
    pub fn exists(git_dir: &Path) -> bool {
        Self::path(git_dir).exists()
    }

    /// Load the configuration, failing with `NotInitialized` when absent.
    pub fn load(git_dir: &Path) -> Result<Self> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Err(Error::NotInitialized);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        let mut config: Config = serde_json::from_str(&content).with_context(|| {
            format!(
                "Config file is corrupted. To recover, re-run 'stackit init' or delete {:?}",
                path
            )
        })?;
        if config.trunks.is_empty() {
            config.trunks = vec![config.trunk.clone()];
        }
        Ok(config)
    }

    /// Persist the configuration atomically (write-to-temp + rename).
    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        let tmp = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path).with_context(|| "Failed to persist config")?;
        Ok(())
    }

    /// Read one key, for `config get`.
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "trunk" => Ok(self.trunk.clone()),
            "trunks" => Ok(self.trunks.join(",")),
            "is_forge_enabled" => Ok(self.is_forge_enabled.to_string()),
            "undo_stack_depth" => Ok(self.undo_stack_depth.to_string()),
            "branch_name_pattern" => Ok(self.branch_name_pattern.clone()),
            "create_ai" => Ok(self.create_ai.to_string()),
            "submit_footer" => Ok(self.submit_footer.to_string()),
            _ => Err(Error::Other(anyhow::anyhow!("Unknown config key '{}'", key))),
        }
    }

    /// Set one key from its string form, for `config set`. Unknown keys and
    /// unparsable values are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "trunk" => {
                self.trunk = value.to_string();
                if !self.trunks.contains(&self.trunk) {
                    self.trunks.push(self.trunk.clone());
                }
            }
            "trunks" => {
                let trunks: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if trunks.is_empty() {
                    return Err(Error::Other(anyhow::anyhow!(
                        "at least one trunk is required"
                    )));
                }
                if !trunks.contains(&self.trunk) {
                    return Err(Error::Other(anyhow::anyhow!(
                        "trunks must include the primary trunk '{}'",
                        self.trunk
                    )));
                }
                self.trunks = trunks;
            }
            "is_forge_enabled" => self.is_forge_enabled = parse_bool(key, value)?,
            "undo_stack_depth" => {
                self.undo_stack_depth = value.parse().map_err(|_| {
                    Error::Other(anyhow::anyhow!("'{}' is not a valid depth", value))
                })?;
            }
            "branch_name_pattern" => {
                if !value.contains("{message}") {
                    return Err(Error::Other(anyhow::anyhow!(
                        "branch_name_pattern must contain {{message}}"
                    )));
                }
                self.branch_name_pattern = value.to_string();
            }
            "create_ai" => self.create_ai = parse_bool(key, value)?,
            "submit_footer" => self.submit_footer = parse_bool(key, value)?,
            _ => return Err(Error::Other(anyhow::anyhow!("Unknown config key '{}'", key))),
        }
        Ok(())
    }

    /// All keys and their current values, for `config list`.
    pub fn list(&self) -> Vec<(&'static str, String)> {
        vec![
            ("trunk", self.trunk.clone()),
            ("trunks", self.trunks.join(",")),
            ("is_forge_enabled", self.is_forge_enabled.to_string()),
            ("undo_stack_depth", self.undo_stack_depth.to_string()),
            ("branch_name_pattern", self.branch_name_pattern.clone()),
            ("create_ai", self.create_ai.to_string()),
            ("submit_footer", self.submit_footer.to_string()),
        ]
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Other(anyhow::anyhow!(
            "'{}' is not a valid boolean for '{}'",
            value,
            key
        ))),
    }
}
