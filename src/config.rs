//! Configuration for stagecraft.
//!
//! Identity sources (highest priority first):
//! 1. Command-line flags / environment variables (STAGECRAFT_APP_NAME, STAGECRAFT_ENV_NAME)
//! 2. The Elastic Beanstalk CLI config file (.elasticbeanstalk/config.yml)
//!
//! Config file discovery:
//! - An explicit path wins
//! - Otherwise searches the current directory and parents for .elasticbeanstalk/config.yml
//!
//! The same YAML file may carry a `staging:` section overriding the
//! defaults in [`StagingSettings`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::EnvironmentIdentity;

/// Errors raised before any pipeline starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Please give a config.yml file path or both an application name and an environment name"
    )]
    MissingIdentity,

    #[error("Cannot open env file {}, the file was not found", .0.display())]
    EnvFileNotFound(PathBuf),

    #[error("Config file not found: {}", .0.display())]
    ConfigFileNotFound(PathBuf),
}

/// Raw config file schema (matches the EB CLI's YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub global: Option<GlobalSection>,

    #[serde(default, rename = "branch-defaults")]
    pub branch_defaults: HashMap<String, BranchDefaults>,

    #[serde(default)]
    pub staging: Option<StagingSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalSection {
    pub application_name: Option<String>,
    pub default_region: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchDefaults {
    pub environment: Option<String>,
}

impl ConfigFile {
    /// Load and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file parses as YAML null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }

    pub fn application_name(&self) -> Option<&str> {
        self.global.as_ref()?.application_name.as_deref()
    }

    /// Environment bound to the `default` branch
    pub fn default_environment(&self) -> Option<&str> {
        self.branch_defaults.get("default")?.environment.as_deref()
    }
}

/// Polling cadence for a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Seconds between polls
    pub delay_seconds: u64,

    /// Maximum number of polls before giving up
    pub max_attempts: u32,
}

impl WaitConfig {
    pub const fn new(delay_seconds: u64, max_attempts: u32) -> Self {
        Self {
            delay_seconds,
            max_attempts,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Names of the last-id state files inside the state directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFileNames {
    #[serde(default = "default_database_file")]
    pub database: String,

    #[serde(default = "default_database_snapshot_file")]
    pub database_snapshot: String,

    #[serde(default = "default_cache_file")]
    pub cache: String,
}

fn default_database_file() -> String {
    "last_rds_id.txt".to_string()
}
fn default_database_snapshot_file() -> String {
    "last_rds_snapshot_id.txt".to_string()
}
fn default_cache_file() -> String {
    "last_cache_id.txt".to_string()
}

impl Default for StateFileNames {
    fn default() -> Self {
        Self {
            database: default_database_file(),
            database_snapshot: default_database_snapshot_file(),
            cache: default_cache_file(),
        }
    }
}

/// Defaults for databases restored from a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDefaults {
    #[serde(default = "default_instance_class")]
    pub instance_class: String,

    #[serde(default = "default_true")]
    pub publicly_accessible: bool,

    #[serde(default)]
    pub multi_az: bool,
}

fn default_instance_class() -> String {
    "db.t3.micro".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for DatabaseDefaults {
    fn default() -> Self {
        Self {
            instance_class: default_instance_class(),
            publicly_accessible: true,
            multi_az: false,
        }
    }
}

/// Defaults for newly created cache clusters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDefaults {
    #[serde(default = "default_node_type")]
    pub node_type: String,

    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default = "default_num_nodes")]
    pub num_nodes: u32,
}

fn default_node_type() -> String {
    "cache.t3.micro".to_string()
}
fn default_engine() -> String {
    "redis".to_string()
}
fn default_num_nodes() -> u32 {
    1
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            node_type: default_node_type(),
            engine: default_engine(),
            num_nodes: default_num_nodes(),
        }
    }
}

/// Poll settings per resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSettings {
    #[serde(default = "default_environment_wait")]
    pub environment: WaitConfig,

    #[serde(default = "default_database_wait")]
    pub database: WaitConfig,

    #[serde(default = "default_cache_wait")]
    pub cache: WaitConfig,

    /// Minutes to wait for an environment update to finish
    #[serde(default = "default_update_timeout")]
    pub update_timeout_minutes: u64,
}

fn default_environment_wait() -> WaitConfig {
    WaitConfig::new(60, 100)
}
fn default_database_wait() -> WaitConfig {
    WaitConfig::new(30, 60)
}
fn default_cache_wait() -> WaitConfig {
    WaitConfig::new(15, 40)
}
fn default_update_timeout() -> u64 {
    30
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            environment: default_environment_wait(),
            database: default_database_wait(),
            cache: default_cache_wait(),
            update_timeout_minutes: default_update_timeout(),
        }
    }
}

/// Tunables for the staging workflows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingSettings {
    /// Directory holding state files and env snapshots (default: current directory)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub state_files: StateFileNames,

    #[serde(default)]
    pub database: DatabaseDefaults,

    #[serde(default)]
    pub cache: CacheDefaults,

    #[serde(default)]
    pub waits: WaitSettings,
}

impl StagingSettings {
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_deref().unwrap_or(Path::new("."))
    }

    pub fn database_state_file(&self) -> PathBuf {
        self.state_dir().join(&self.state_files.database)
    }

    pub fn database_snapshot_state_file(&self) -> PathBuf {
        self.state_dir().join(&self.state_files.database_snapshot)
    }

    pub fn cache_state_file(&self) -> PathBuf {
        self.state_dir().join(&self.state_files.cache)
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub identity: EnvironmentIdentity,
    pub settings: StagingSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub application_name: Option<String>,
    pub environment_name: Option<String>,
    pub config_file: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Find config file by searching a directory and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".elasticbeanstalk").join("config.yml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Resolve identity and settings from overrides plus the config file
pub fn resolve(overrides: Overrides) -> Result<ResolvedConfig> {
    let config_file = match overrides.config_file {
        Some(path) if path.exists() => Some(path),
        Some(path) => return Err(ConfigError::ConfigFileNotFound(path).into()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    let file = match config_file {
        Some(ref path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };

    let application_name = overrides
        .application_name
        .filter(|s| !s.is_empty())
        .or_else(|| file.application_name().map(str::to_string))
        .unwrap_or_default();
    let environment_name = overrides
        .environment_name
        .filter(|s| !s.is_empty())
        .or_else(|| file.default_environment().map(str::to_string))
        .unwrap_or_default();

    let identity = EnvironmentIdentity::new(application_name, environment_name)?;

    let mut settings = file.staging.clone().unwrap_or_default();
    if overrides.state_dir.is_some() {
        settings.state_dir = overrides.state_dir;
    }

    let global = file.global.unwrap_or_default();

    Ok(ResolvedConfig {
        identity,
        settings,
        config_file,
        region: overrides.region.or(global.default_region),
        profile: overrides.profile.or(global.profile),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EB_CONFIG: &str = r#"
branch-defaults:
  default:
    environment: shop-web-develop
global:
  application_name: Shop
  default_region: ap-northeast-1
  profile: null
  sc: git
"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let eb_dir = dir.join(".elasticbeanstalk");
        std::fs::create_dir_all(&eb_dir).unwrap();
        let path = eb_dir.join("config.yml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_eb_config_parsing() {
        let config = ConfigFile::from_yaml(EB_CONFIG).unwrap();

        assert_eq!(config.application_name(), Some("Shop"));
        assert_eq!(config.default_environment(), Some("shop-web-develop"));
        assert!(config.staging.is_none());
    }

    #[test]
    fn test_staging_section_defaults() {
        let yaml = r#"
global:
  application_name: Shop
staging:
  cache:
    node_type: cache.t3.small
  waits:
    environment:
      delay_seconds: 5
      max_attempts: 3
"#;
        let config = ConfigFile::from_yaml(yaml).unwrap();
        let staging = config.staging.unwrap();

        assert_eq!(staging.cache.node_type, "cache.t3.small");
        assert_eq!(staging.cache.engine, "redis");
        assert_eq!(staging.cache.num_nodes, 1);
        assert_eq!(staging.waits.environment, WaitConfig::new(5, 3));
        assert_eq!(staging.waits.database, WaitConfig::new(30, 60));
        assert_eq!(staging.database.instance_class, "db.t3.micro");
        assert!(staging.database.publicly_accessible);
        assert!(!staging.database.multi_az);
        assert_eq!(staging.state_files.database, "last_rds_id.txt");
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let expected = write_config(temp.path(), EB_CONFIG);
        let nested = temp.path().join("app").join("src");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(expected));
    }

    #[test]
    fn test_resolve_from_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), EB_CONFIG);

        let resolved = resolve(Overrides {
            config_file: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(resolved.identity.application_name, "Shop");
        assert_eq!(resolved.identity.environment_name, "shop-web-develop");
        assert_eq!(resolved.config_file, Some(path));
        assert_eq!(resolved.region.as_deref(), Some("ap-northeast-1"));
        assert_eq!(resolved.profile, None);
    }

    #[test]
    fn test_explicit_names_override_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), EB_CONFIG);

        let resolved = resolve(Overrides {
            environment_name: Some("shop-web-hotfix".into()),
            config_file: Some(path),
            state_dir: Some(temp.path().join("state")),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(resolved.identity.application_name, "Shop");
        assert_eq!(resolved.identity.environment_name, "shop-web-hotfix");
        assert_eq!(
            resolved.settings.cache_state_file(),
            temp.path().join("state").join("last_cache_id.txt")
        );
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "global:\n  application_name: Shop\n");

        let err = resolve(Overrides {
            config_file: Some(path),
            ..Default::default()
        })
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingIdentity)
        ));
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let temp = TempDir::new().unwrap();
        let err = resolve(Overrides {
            config_file: Some(temp.path().join("missing.yml")),
            ..Default::default()
        })
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ConfigFileNotFound(_))
        ));
    }
}
