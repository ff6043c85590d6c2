//! Command-line interface for stagecraft.
//!
//! Provides commands for building and removing a staging environment and
//! for the single-resource operations those workflows are made of.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::adapters::{AwsServices, Services};
use crate::config::{self, Overrides, ResolvedConfig};
use crate::core::{
    AssumeYes, BuildStaging, Decide, Orchestrator, PhaseReport, RemoveStaging, RunStatus,
};

pub mod prompt;

pub use prompt::PromptDecider;

/// stagecraft - Build and tear down Elastic Beanstalk staging environments
#[derive(Parser, Debug)]
#[command(name = "stagecraft")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Application name (defaults to the EB CLI config)
    #[arg(long, global = true, env = "STAGECRAFT_APP_NAME")]
    pub app_name: Option<String>,

    /// Environment name (defaults to the EB CLI branch default)
    #[arg(long, global = true, env = "STAGECRAFT_ENV_NAME")]
    pub env_name: Option<String>,

    /// Path to an EB CLI style config.yml
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Directory holding last-id files and env snapshots
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// AWS region for the SDK clients
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// AWS profile to load credentials from
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Accept every endpoint change without prompting
    #[arg(short, long, global = true)]
    pub yes: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            application_name: self.app_name.clone(),
            environment_name: self.env_name.clone(),
            config_file: self.config_file.clone(),
            state_dir: self.state_dir.clone(),
            region: self.region.clone(),
            profile: self.profile.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore the database, create the cache and clone the environment
    BuildStaging {
        /// Environment to clone
        source_environment: String,

        /// Database instance to restore or reuse
        #[arg(long)]
        database_id: Option<String>,

        /// Snapshot to restore the database from
        #[arg(long)]
        snapshot_id: Option<String>,

        /// Cache cluster to create
        #[arg(long)]
        cache_id: Option<String>,

        /// Saved environment variables (default <state-dir>/<env>.env.json)
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Name of the new environment
        #[arg(long)]
        clone_name: Option<String>,

        /// Platform ARN for the clone (defaults to the source's)
        #[arg(long)]
        platform: Option<String>,

        /// Instance count of the clone
        #[arg(long, default_value = "1")]
        scale: u32,

        /// Tags for the clone, as KEY=VALUE
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Do not wait for resources to become available
        #[arg(long)]
        no_wait: bool,
    },

    /// Terminate the environment and delete its database and cache
    RemoveStaging {
        #[arg(long)]
        database_id: Option<String>,

        /// Name of the final database snapshot
        #[arg(long)]
        snapshot_id: Option<String>,

        #[arg(long)]
        cache_id: Option<String>,

        #[arg(long)]
        no_wait: bool,
    },

    /// Save the environment's variables to a file
    SaveEnv {
        #[arg(long)]
        env_file: Option<PathBuf>,
    },

    /// Push saved variables to the environment
    LoadEnv {
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Minutes to wait for the update to finish
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Snapshot a database instance
    TakeSnapshot {
        database_id: String,

        /// Snapshot name (default <app>-<env>-<timestamp>)
        #[arg(long)]
        snapshot_id: Option<String>,

        #[arg(long)]
        no_wait: bool,
    },

    /// Restore a database instance from a snapshot
    RestoreSnapshot {
        /// Defaults to the last restored database id
        #[arg(long)]
        database_id: Option<String>,

        /// Defaults to the last snapshot taken
        #[arg(long)]
        snapshot_id: Option<String>,

        #[arg(long)]
        no_wait: bool,
    },

    /// Create a cache cluster
    CreateCache {
        cache_id: String,

        #[arg(long)]
        node_type: Option<String>,

        #[arg(long)]
        engine: Option<String>,

        #[arg(long)]
        num_nodes: Option<u32>,

        #[arg(long)]
        no_wait: bool,
    },

    /// Show the last recorded resource ids
    LastIds,

    /// Show resolved configuration (debug)
    Config,
}

/// Parse a `KEY=VALUE` tag
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid tag '{}', expected KEY=VALUE", raw)),
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let resolved = config::resolve(self.global.overrides())?;

        match self.command {
            Commands::BuildStaging {
                source_environment,
                database_id,
                snapshot_id,
                cache_id,
                env_file,
                clone_name,
                platform,
                scale,
                tags,
                no_wait,
            } => {
                let request = BuildStaging {
                    source_environment,
                    database_id,
                    database_snapshot_id: snapshot_id,
                    cache_id,
                    env_file,
                    clone_name,
                    wait: !no_wait,
                    platform,
                    scale,
                    tags,
                };
                build_staging(orchestrator(&self.global, resolved).await, request).await
            }
            Commands::RemoveStaging {
                database_id,
                snapshot_id,
                cache_id,
                no_wait,
            } => {
                let request = RemoveStaging {
                    database_id,
                    database_snapshot_id: snapshot_id,
                    cache_id,
                    wait: !no_wait,
                };
                remove_staging(orchestrator(&self.global, resolved).await, request).await
            }
            Commands::SaveEnv { env_file } => {
                let path = orchestrator(&self.global, resolved)
                    .await
                    .save_env_vars(env_file.as_deref())
                    .await?;
                println!("{}", path.display());
                Ok(())
            }
            Commands::LoadEnv { env_file, timeout } => {
                orchestrator(&self.global, resolved)
                    .await
                    .update_env_vars_from_file(env_file.as_deref(), timeout)
                    .await
            }
            Commands::TakeSnapshot {
                database_id,
                snapshot_id,
                no_wait,
            } => {
                let snapshot = orchestrator(&self.global, resolved)
                    .await
                    .take_database_snapshot(&database_id, snapshot_id, !no_wait)
                    .await?;
                println!("{}", snapshot);
                Ok(())
            }
            Commands::RestoreSnapshot {
                database_id,
                snapshot_id,
                no_wait,
            } => {
                let database = orchestrator(&self.global, resolved)
                    .await
                    .restore_database_from_snapshot(database_id, snapshot_id, !no_wait)
                    .await?;
                println!("{}", database);
                Ok(())
            }
            Commands::CreateCache {
                cache_id,
                node_type,
                engine,
                num_nodes,
                no_wait,
            } => {
                let mut resolved = resolved;
                let cache = &mut resolved.settings.cache;
                if let Some(node_type) = node_type {
                    cache.node_type = node_type;
                }
                if let Some(engine) = engine {
                    cache.engine = engine;
                }
                if let Some(num_nodes) = num_nodes {
                    cache.num_nodes = num_nodes;
                }
                orchestrator(&self.global, resolved)
                    .await
                    .create_cache(&cache_id, !no_wait)
                    .await?;
                Ok(())
            }
            Commands::LastIds => {
                let ids = orchestrator(&self.global, resolved)
                    .await
                    .last_ids()
                    .await?;
                let show = |id: Option<String>| id.unwrap_or_else(|| "(none)".to_string());
                println!("Database:          {}", show(ids.database));
                println!("Database snapshot: {}", show(ids.database_snapshot));
                println!("Cache:             {}", show(ids.cache));
                Ok(())
            }
            Commands::Config => show_config(&resolved),
        }
    }
}

/// Wire the AWS clients and the decider into an orchestrator
async fn orchestrator(global: &GlobalArgs, resolved: ResolvedConfig) -> Orchestrator {
    let aws = AwsServices::from_env(resolved.region, resolved.profile).await;

    let decider: Arc<dyn Decide> = if global.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(PromptDecider::stdio())
    };

    Orchestrator::new(
        resolved.identity,
        Services::from_shared(Arc::new(aws)),
        decider,
        resolved.settings,
    )
}

async fn build_staging(orchestrator: Orchestrator, request: BuildStaging) -> Result<()> {
    let build = orchestrator
        .build_staging(request)
        .await
        .context("Failed to build staging environment")?;

    print_phases(&build.phases);
    println!("Staging environment: {}", build.clone_name);

    fail_on_phase_errors(&build.phases)
}

async fn remove_staging(orchestrator: Orchestrator, request: RemoveStaging) -> Result<()> {
    let phases = orchestrator.remove_staging(request).await?;
    print_phases(&phases);
    fail_on_phase_errors(&phases)
}

fn print_phases(phases: &[PhaseReport]) {
    println!("{:<14} {}", "PHASE", "RESULT");
    println!("{}", "-".repeat(60));

    for phase in phases {
        let result = match &phase.status {
            None => "skipped".to_string(),
            Some(RunStatus::Completed { jobs_run }) => format!("completed ({} jobs)", jobs_run),
            Some(RunStatus::Failed { job, error, .. }) => {
                format!("failed at '{}': {}", job, error)
            }
        };
        println!("{:<14} {}", phase.name, result);
    }
}

fn fail_on_phase_errors(phases: &[PhaseReport]) -> Result<()> {
    let failed: Vec<&str> = phases
        .iter()
        .filter(|p| p.is_failed())
        .map(|p| p.name.as_str())
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Phases failed: {}", failed.join(", "))
    }
}

/// Show resolved configuration
fn show_config(resolved: &ResolvedConfig) -> Result<()> {
    let settings = &resolved.settings;

    let config_file = resolved
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none - using defaults)".to_string());

    println!("Config file: {}", config_file);
    println!();
    println!("Environment:");
    println!("  Application: {}", resolved.identity.application_name);
    println!("  Environment: {}", resolved.identity.environment_name);
    println!("  Clone name:  {}", resolved.identity.staging_clone_name());
    println!("  Region:      {}", resolved.region.as_deref().unwrap_or("(aws default)"));
    println!("  Profile:     {}", resolved.profile.as_deref().unwrap_or("(aws default)"));
    println!();
    println!("State files:");
    println!("  Directory:         {}", settings.state_dir().display());
    println!("  Database:          {}", settings.database_state_file().display());
    println!("  Database snapshot: {}", settings.database_snapshot_state_file().display());
    println!("  Cache:             {}", settings.cache_state_file().display());
    println!();
    println!("Resource defaults:");
    println!("  DB instance class: {}", settings.database.instance_class);
    println!("  DB public:         {}", settings.database.publicly_accessible);
    println!("  DB multi-AZ:       {}", settings.database.multi_az);
    println!("  Cache node type:   {}", settings.cache.node_type);
    println!("  Cache engine:      {}", settings.cache.engine);
    println!("  Cache nodes:       {}", settings.cache.num_nodes);
    println!();
    println!("Waits (delay x attempts):");
    for (name, wait) in [
        ("Environment", settings.waits.environment),
        ("Database", settings.waits.database),
        ("Cache", settings.waits.cache),
    ] {
        println!("  {:<12} {}s x {}", name, wait.delay_seconds, wait.max_attempts);
    }
    println!("  Env update timeout: {} minutes", settings.waits.update_timeout_minutes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            parse_tag("team=web").unwrap(),
            ("team".to_string(), "web".to_string())
        );
        assert_eq!(
            parse_tag("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn test_build_staging_args() {
        let cli = Cli::try_parse_from([
            "stagecraft",
            "--app-name",
            "shop",
            "--env-name",
            "shop-web-production",
            "build-staging",
            "shop-web-production",
            "--database-id",
            "shop-staging",
            "--tag",
            "team=web",
            "--no-wait",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.global.app_name.as_deref(), Some("shop"));
        assert!(cli.global.yes);
        match cli.command {
            Commands::BuildStaging {
                source_environment,
                database_id,
                tags,
                no_wait,
                scale,
                ..
            } => {
                assert_eq!(source_environment, "shop-web-production");
                assert_eq!(database_id.as_deref(), Some("shop-staging"));
                assert_eq!(tags, vec![("team".to_string(), "web".to_string())]);
                assert!(no_wait);
                assert_eq!(scale, 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_phase_failures_become_error() {
        let phases = vec![
            PhaseReport {
                name: "database".into(),
                status: None,
            },
            PhaseReport {
                name: "cache".into(),
                status: Some(RunStatus::Failed {
                    position: 0,
                    job: "create cache cluster c".into(),
                    error: "boom".into(),
                }),
            },
        ];

        let err = fail_on_phase_errors(&phases).unwrap_err();
        assert_eq!(err.to_string(), "Phases failed: cache");
        assert!(fail_on_phase_errors(&phases[..1]).is_ok());
    }
}
