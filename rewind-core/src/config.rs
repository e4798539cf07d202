//! Configuration loading and management
//!
//! Four sources merge in increasing priority: built-in defaults, the tier
//! preset, the user-level file (`~/.config/rewind/config.toml`), and the
//! project-level file (`<storage>/code/config.json`). Ignore patterns and
//! force-include lists are unioned across sources; scalar values override.
//! The host VCS ignore file contributes patterns at built-in priority.
//!
//! Malformed files are never fatal: the layer is skipped with a warning and
//! the previous layers stand.

use crate::error::{Error, Result};
use crate::layout::StorageLayout;
use crate::types::StorageMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Named preset of debounce/retention parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

impl Tier {
    fn preset(&self) -> (u64, usize, u32) {
        // (min_interval_seconds, max_checkpoints, max_age_days)
        match self {
            Tier::Minimal => (600, 10, 7),
            Tier::Balanced => (120, 50, 14),
            Tier::Aggressive => (15, 200, 30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Minimal => "minimal",
            Tier::Balanced => "balanced",
            Tier::Aggressive => "aggressive",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Tier::Minimal),
            "balanced" => Ok(Tier::Balanced),
            "aggressive" => Ok(Tier::Aggressive),
            _ => Err(format!("unknown tier: {} (expected minimal|balanced|aggressive)", s)),
        }
    }
}

/// Fully merged engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageMode,
    pub tier: Tier,

    /// Keep at most this many checkpoints after age pruning
    pub max_checkpoints: usize,
    /// Drop checkpoints older than this many days (0 disables age pruning)
    pub max_age_days: u32,
    /// Debounce window for hook-driven checkpoints
    pub min_interval_seconds: u64,

    /// Ignore patterns, all sources unioned
    pub ignore_patterns: Vec<String>,
    /// Patterns that override an ignore match
    pub force_include: Vec<String>,

    /// Substring patterns marking a shell command as destructive
    pub destructive_patterns: Vec<String>,

    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One configuration layer as read from disk. Absent fields inherit.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConfigOverlay {
    pub storage: Option<StorageMode>,
    pub tier: Option<Tier>,
    #[serde(rename = "maxCheckpoints", alias = "max_checkpoints")]
    pub max_checkpoints: Option<usize>,
    #[serde(rename = "maxAgeDays", alias = "max_age_days")]
    pub max_age_days: Option<u32>,
    #[serde(rename = "minIntervalSeconds", alias = "min_interval_seconds")]
    pub min_interval_seconds: Option<u64>,
    #[serde(rename = "ignorePatterns", alias = "ignore_patterns")]
    pub ignore_patterns: Option<Vec<String>>,
    #[serde(rename = "forceInclude", alias = "force_include")]
    pub force_include: Option<Vec<String>>,
    #[serde(rename = "destructivePatterns", alias = "destructive_patterns")]
    pub destructive_patterns: Option<Vec<String>>,
    pub logging: Option<LoggingConfig>,
}

/// Paths the scanner never snapshots regardless of user configuration.
fn default_ignore_patterns() -> Vec<String> {
    [
        ".git/",
        ".rewind/",
        "node_modules/",
        "target/",
        "dist/",
        "build/",
        ".venv/",
        "venv/",
        "__pycache__/",
        ".next/",
        ".cache/",
        "*.log",
        ".DS_Store",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_destructive_patterns() -> Vec<String> {
    [
        "rm ",
        "rm\t",
        "rmdir",
        "mv ",
        "dd ",
        "truncate ",
        "git checkout",
        "git reset",
        "git clean",
        "git rebase",
        "git stash",
        "sed -i",
        "> ",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        let tier = Tier::default();
        let (min_interval_seconds, max_checkpoints, max_age_days) = tier.preset();
        Self {
            storage: StorageMode::default(),
            tier,
            max_checkpoints,
            max_age_days,
            min_interval_seconds,
            ignore_patterns: default_ignore_patterns(),
            force_include: Vec::new(),
            destructive_patterns: default_destructive_patterns(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the merged configuration for a project root.
    ///
    /// The project layer is looked up first under the project-local placement,
    /// then under the global placement, so a `storage` setting in either spot
    /// is honored without a migration.
    pub fn load_for_project(project_root: &Path) -> Config {
        let user = load_user_overlay();

        let mut project = None;
        for mode in [StorageMode::Project, StorageMode::Global] {
            if let Ok(layout) = StorageLayout::resolve(project_root, mode) {
                if let Some(overlay) = load_project_overlay(&layout.project_config_path()) {
                    project = Some(overlay);
                    break;
                }
            }
        }

        let mut config = Config::merged(user.as_ref(), project.as_ref());
        config
            .ignore_patterns
            .extend(vcs_ignore_patterns(project_root));
        config
    }

    /// Fold overlays onto the defaults in priority order.
    pub fn merged(user: Option<&ConfigOverlay>, project: Option<&ConfigOverlay>) -> Config {
        let mut config = Config::default();

        // The tier is chosen by the highest layer that names one, but its
        // preset applies below user/project scalar overrides.
        let tier = project
            .and_then(|o| o.tier)
            .or_else(|| user.and_then(|o| o.tier))
            .unwrap_or_default();
        let (min_interval_seconds, max_checkpoints, max_age_days) = tier.preset();
        config.tier = tier;
        config.min_interval_seconds = min_interval_seconds;
        config.max_checkpoints = max_checkpoints;
        config.max_age_days = max_age_days;

        for overlay in [user, project].into_iter().flatten() {
            if let Some(storage) = overlay.storage {
                config.storage = storage;
            }
            if let Some(v) = overlay.max_checkpoints {
                config.max_checkpoints = v;
            }
            if let Some(v) = overlay.max_age_days {
                config.max_age_days = v;
            }
            if let Some(v) = overlay.min_interval_seconds {
                config.min_interval_seconds = v;
            }
            if let Some(ref patterns) = overlay.ignore_patterns {
                config.ignore_patterns.extend(patterns.iter().cloned());
            }
            if let Some(ref patterns) = overlay.force_include {
                config.force_include.extend(patterns.iter().cloned());
            }
            if let Some(ref patterns) = overlay.destructive_patterns {
                config.destructive_patterns = patterns.clone();
            }
            if let Some(ref logging) = overlay.logging {
                config.logging = logging.clone();
            }
        }

        config
    }

    /// Returns the user config file path (`~/.config/rewind/config.toml`)
    pub fn user_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rewind")
            .join("config.toml")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rewind")
    }
}

fn load_user_overlay() -> Option<ConfigOverlay> {
    let path = Config::user_config_path();
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(overlay) => Some(overlay),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed user config");
            None
        }
    }
}

fn load_project_overlay(path: &Path) -> Option<ConfigOverlay> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(overlay) => Some(overlay),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed project config");
            None
        }
    }
}

/// Patterns contributed by `<root>/.gitignore`, at built-in priority.
///
/// Negations are beyond what the matcher models and are skipped.
fn vcs_ignore_patterns(project_root: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(project_root.join(".gitignore")) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| line.trim_start_matches('/').to_string())
        .collect()
}

/// Keys settable via `config <key> <value>`.
const SETTABLE_KEYS: &[&str] = &[
    "storage",
    "tier",
    "maxCheckpoints",
    "maxAgeDays",
    "minIntervalSeconds",
];

/// Set one key in the project config file, creating it if needed.
pub fn set_project_key(layout: &StorageLayout, key: &str, value: &str) -> Result<()> {
    let json_value = validate_key(key, value)?;
    let path = layout.project_config_path();
    let mut doc: serde_json::Map<String, serde_json::Value> =
        crate::layout::read_json_opt(&path)?.unwrap_or_default();
    doc.insert(key.to_string(), json_value);
    crate::layout::write_json_atomic(&path, &doc)
}

/// Set one key in the user config file, creating it if needed.
pub fn set_user_key(key: &str, value: &str) -> Result<()> {
    validate_key(key, value)?;
    let path = Config::user_config_path();
    let mut doc: toml::Table = match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot edit malformed user config: {}", e)))?,
        Err(_) => toml::Table::new(),
    };

    let toml_value = match key {
        "maxCheckpoints" | "maxAgeDays" | "minIntervalSeconds" => {
            toml::Value::Integer(value.parse::<i64>().map_err(|_| {
                Error::Config(format!("{} expects an integer, got {:?}", key, value))
            })?)
        }
        _ => toml::Value::String(value.to_string()),
    };
    doc.insert(key.to_string(), toml_value);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&doc)
        .map_err(|e| Error::Config(format!("cannot render user config: {}", e)))?;
    std::fs::write(&path, rendered)?;
    Ok(())
}

fn validate_key(key: &str, value: &str) -> Result<serde_json::Value> {
    if !SETTABLE_KEYS.contains(&key) {
        return Err(Error::Config(format!(
            "unknown config key: {} (known keys: {})",
            key,
            SETTABLE_KEYS.join(", ")
        )));
    }
    match key {
        "storage" => {
            let mode: StorageMode = value.parse().map_err(Error::Config)?;
            Ok(serde_json::to_value(mode).map_err(Error::Json)?)
        }
        "tier" => {
            let tier: Tier = value.parse().map_err(Error::Config)?;
            Ok(serde_json::Value::String(tier.as_str().to_string()))
        }
        _ => {
            let n: u64 = value.parse().map_err(|_| {
                Error::Config(format!("{} expects an integer, got {:?}", key, value))
            })?;
            Ok(serde_json::Value::Number(n.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_balanced_preset() {
        let config = Config::default();
        assert_eq!(config.tier, Tier::Balanced);
        assert_eq!(config.min_interval_seconds, 120);
        assert_eq!(config.max_checkpoints, 50);
        assert!(config.ignore_patterns.iter().any(|p| p == ".git/"));
        assert!(config.ignore_patterns.iter().any(|p| p == ".rewind/"));
    }

    #[test]
    fn tier_preset_applies_below_explicit_values() {
        let project: ConfigOverlay = serde_json::from_str(
            r#"{ "tier": "aggressive", "maxCheckpoints": 7 }"#,
        )
        .unwrap();

        let config = Config::merged(None, Some(&project));
        assert_eq!(config.tier, Tier::Aggressive);
        // Preset interval stands, explicit cap wins.
        assert_eq!(config.min_interval_seconds, 15);
        assert_eq!(config.max_checkpoints, 7);
    }

    #[test]
    fn pattern_lists_union_across_layers() {
        let user: ConfigOverlay = toml::from_str(
            r#"
            ignore_patterns = ["*.tmp"]
            force_include = ["node_modules"]
            "#,
        )
        .unwrap();
        let project: ConfigOverlay =
            serde_json::from_str(r#"{ "ignorePatterns": ["secrets/"] }"#).unwrap();

        let config = Config::merged(Some(&user), Some(&project));
        assert!(config.ignore_patterns.iter().any(|p| p == "*.tmp"));
        assert!(config.ignore_patterns.iter().any(|p| p == "secrets/"));
        // Defaults survive user additions.
        assert!(config.ignore_patterns.iter().any(|p| p == ".git/"));
        assert_eq!(config.force_include, vec!["node_modules".to_string()]);
    }

    #[test]
    fn project_layer_overrides_user_layer() {
        let user: ConfigOverlay =
            toml::from_str(r#"min_interval_seconds = 300"#).unwrap();
        let project: ConfigOverlay =
            serde_json::from_str(r#"{ "minIntervalSeconds": 5 }"#).unwrap();

        let config = Config::merged(Some(&user), Some(&project));
        assert_eq!(config.min_interval_seconds, 5);
    }

    #[test]
    fn unknown_config_key_is_refused() {
        let err = validate_key("shinyNewKnob", "1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
