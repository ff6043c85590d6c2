//! Staging lifecycle orchestration.
//!
//! Builds one pipeline per resource for the "build staging" and "remove
//! staging" workflows and runs them one after another. A failing pipeline
//! stops only its own remaining jobs; sibling pipelines still run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::adapters::{CacheClusterSpec, CloneSpec, RestoreSpec, Services};
use crate::config::{StagingSettings, WaitConfig};
use crate::domain::{EnvVars, EnvironmentIdentity};

use super::pipeline::{effect, job, Pipeline, RunStatus, Step};
use super::reconcile::{update_cache_endpoints, update_database_urls, Decide};
use super::state_file::{persist_last_id, read_last_id, resolve_id};

/// Timestamp format used in snapshot names
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Local time formatted for snapshot names
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Number of 30 second polls that fit in `minutes`
fn update_poll_attempts(minutes: u64) -> u32 {
    u32::try_from(minutes.saturating_mul(2))
        .unwrap_or(u32::MAX)
        .max(1)
}

fn waiting_suffix(wait: bool) -> &'static str {
    if wait {
        "with waiting"
    } else {
        "without waiting"
    }
}

/// Parameters of the build-staging workflow
#[derive(Debug, Clone)]
pub struct BuildStaging {
    /// Environment whose topology the clone copies
    pub source_environment: String,
    pub database_id: Option<String>,
    pub database_snapshot_id: Option<String>,
    pub cache_id: Option<String>,
    /// Saved env snapshot (default `<state-dir>/<env>.env.json`)
    pub env_file: Option<PathBuf>,
    pub clone_name: Option<String>,
    pub wait: bool,
    pub platform: Option<String>,
    pub scale: u32,
    pub tags: Vec<(String, String)>,
}

impl BuildStaging {
    pub fn new(source_environment: impl Into<String>) -> Self {
        Self {
            source_environment: source_environment.into(),
            database_id: None,
            database_snapshot_id: None,
            cache_id: None,
            env_file: None,
            clone_name: None,
            wait: true,
            platform: None,
            scale: 1,
            tags: Vec::new(),
        }
    }
}

/// Parameters of the remove-staging workflow
#[derive(Debug, Clone)]
pub struct RemoveStaging {
    pub database_id: Option<String>,
    pub database_snapshot_id: Option<String>,
    pub cache_id: Option<String>,
    pub wait: bool,
}

impl Default for RemoveStaging {
    fn default() -> Self {
        Self {
            database_id: None,
            database_snapshot_id: None,
            cache_id: None,
            wait: true,
        }
    }
}

/// How one resource pipeline ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub name: String,
    /// `None` when the phase was skipped
    pub status: Option<RunStatus>,
}

impl PhaseReport {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: None,
        }
    }

    fn ran(name: &str, status: RunStatus) -> Self {
        Self {
            name: name.to_string(),
            status: Some(status),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status.is_none()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, Some(RunStatus::Failed { .. }))
    }
}

/// Result of a build-staging run
#[derive(Debug, Clone)]
pub struct StagingBuild {
    pub clone_name: String,
    /// Variables the clone was created with
    pub env_vars: EnvVars,
    pub phases: Vec<PhaseReport>,
}

/// Contents of the three last-id state files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastIds {
    pub database: Option<String>,
    pub database_snapshot: Option<String>,
    pub cache: Option<String>,
}

/// Drives the staging workflows for one application environment
#[derive(Clone)]
pub struct Orchestrator {
    identity: EnvironmentIdentity,
    services: Services,
    decider: Arc<dyn Decide>,
    settings: StagingSettings,
}

impl Orchestrator {
    pub fn new(
        identity: EnvironmentIdentity,
        services: Services,
        decider: Arc<dyn Decide>,
        settings: StagingSettings,
    ) -> Self {
        info!(
            app_name = %identity.application_name,
            env_name = %identity.environment_name,
            "Using application environment"
        );
        Self {
            identity,
            services,
            decider,
            settings,
        }
    }

    /// Path of the env snapshot, explicit or `<state-dir>/<env>.env.json`
    pub fn env_file_path(&self, env_file: Option<&Path>) -> PathBuf {
        env_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.state_dir().join(self.identity.env_file_name()))
    }

    // ------------------------------------------------------------------
    // Environment variables
    // ------------------------------------------------------------------

    /// Fetch the environment's variables and write them to the snapshot file
    pub async fn save_env_vars(&self, env_file: Option<&Path>) -> Result<PathBuf> {
        let path = self.env_file_path(env_file);
        let vars = self
            .services
            .compute
            .environment_variables(&self.identity.application_name, &self.identity.environment_name)
            .await?;
        vars.save(&path).await?;

        info!(
            env = %self.identity,
            file = %path.display(),
            count = vars.len(),
            "Saved environment variables"
        );
        Ok(path)
    }

    /// Read a snapshot file
    pub async fn load_env_vars(&self, env_file: Option<&Path>) -> Result<EnvVars> {
        let path = self.env_file_path(env_file);
        let vars = EnvVars::load(&path).await?;
        info!(file = %path.display(), "Loaded environment variables");
        Ok(vars)
    }

    /// Push a snapshot file to the environment and wait for the update
    pub async fn update_env_vars_from_file(
        &self,
        env_file: Option<&Path>,
        timeout_minutes: Option<u64>,
    ) -> Result<()> {
        let vars = self.load_env_vars(env_file).await?;
        let app = &self.identity.application_name;
        let env = &self.identity.environment_name;

        self.services
            .compute
            .update_environment_variables(app, env, &vars)
            .await?;

        let minutes = timeout_minutes.unwrap_or(self.settings.waits.update_timeout_minutes);
        let wait = WaitConfig::new(30, update_poll_attempts(minutes));
        self.services
            .compute
            .wait_environment_ready(app, env, wait)
            .await?;

        info!(env = %self.identity, "Updated environment variables");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Single-resource operations
    // ------------------------------------------------------------------

    /// Create a cache cluster with the configured defaults
    #[instrument(skip(self))]
    pub async fn create_cache(&self, cache_id: &str, wait: bool) -> Result<String> {
        let spec = CacheClusterSpec {
            cluster_id: cache_id.to_string(),
            node_type: self.settings.cache.node_type.clone(),
            engine: self.settings.cache.engine.clone(),
            num_nodes: self.settings.cache.num_nodes,
        };

        info!("Creating ElastiCache {}", cache_id);
        self.services.cache.create_cache_cluster(&spec).await?;

        if wait {
            info!("Waiting for ElastiCache {} to become available", cache_id);
            self.services
                .cache
                .wait_cache_cluster_available(cache_id, self.settings.waits.cache)
                .await?;
        }

        info!("Created ElastiCache {} successfully {}", cache_id, waiting_suffix(wait));
        persist_last_id(&self.settings.cache_state_file(), cache_id).await?;
        Ok(cache_id.to_string())
    }

    /// Restore a database instance from a snapshot.
    ///
    /// Missing ids fall back to the state files; if either is still
    /// missing the call fails before touching the service.
    #[instrument(skip(self))]
    pub async fn restore_database_from_snapshot(
        &self,
        database_id: Option<String>,
        snapshot_id: Option<String>,
        wait: bool,
    ) -> Result<String> {
        let snapshot_id = resolve_id(snapshot_id, &self.settings.database_snapshot_state_file())
            .await?
            .context("Please give the snapshot id")?;
        let database_id = resolve_id(database_id, &self.settings.database_state_file())
            .await?
            .context("Please give the database id")?;

        let spec = RestoreSpec {
            instance_id: database_id.clone(),
            snapshot_id: snapshot_id.clone(),
            instance_class: self.settings.database.instance_class.clone(),
            publicly_accessible: self.settings.database.publicly_accessible,
            multi_az: self.settings.database.multi_az,
            tags: vec![(
                "From".to_string(),
                format!("Auto create by snapshot {}", snapshot_id),
            )],
        };

        info!("Restoring RDS {} as {}", snapshot_id, database_id);
        self.services.database.restore_from_snapshot(&spec).await?;

        if wait {
            info!("Waiting for restoring snapshot {} as {}", snapshot_id, database_id);
            self.services
                .database
                .wait_instance_available(&database_id, self.settings.waits.database)
                .await?;
        }

        info!(
            snapshot = %snapshot_id,
            database = %database_id,
            "Restored RDS snapshot successfully {}",
            waiting_suffix(wait)
        );
        persist_last_id(&self.settings.database_state_file(), &database_id).await?;
        Ok(database_id)
    }

    /// Snapshot a database instance, naming it `<app>-<env>-<timestamp>` by default
    #[instrument(skip(self))]
    pub async fn take_database_snapshot(
        &self,
        database_id: &str,
        snapshot_id: Option<String>,
        wait: bool,
    ) -> Result<String> {
        let snapshot_id = snapshot_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.identity.snapshot_name(&timestamp()));

        self.services
            .database
            .create_snapshot(database_id, &snapshot_id)
            .await?;

        if wait {
            info!("Waiting for snapshot {} of {}", snapshot_id, database_id);
            self.services
                .database
                .wait_snapshot_completed(database_id, &snapshot_id, self.settings.waits.database)
                .await?;
        }

        info!(
            snapshot = %snapshot_id,
            database = %database_id,
            "Created RDS snapshot successfully {}",
            waiting_suffix(wait)
        );
        persist_last_id(&self.settings.database_snapshot_state_file(), &snapshot_id).await?;
        Ok(snapshot_id)
    }

    /// Read all three state files
    pub async fn last_ids(&self) -> Result<LastIds> {
        Ok(LastIds {
            database: read_last_id(&self.settings.database_state_file()).await?,
            database_snapshot: read_last_id(&self.settings.database_snapshot_state_file()).await?,
            cache: read_last_id(&self.settings.cache_state_file()).await?,
        })
    }

    // ------------------------------------------------------------------
    // Build staging
    // ------------------------------------------------------------------

    /// Restore/reuse the database and cache, fold their endpoints into the
    /// saved variables, then clone the source environment with them.
    #[instrument(skip(self, request), fields(source = %request.source_environment))]
    pub async fn build_staging(&self, request: BuildStaging) -> Result<StagingBuild> {
        let mut env_vars = self.load_env_vars(request.env_file.as_deref()).await?;

        let database_id =
            resolve_id(request.database_id, &self.settings.database_state_file()).await?;
        let snapshot_id = resolve_id(
            request.database_snapshot_id,
            &self.settings.database_snapshot_state_file(),
        )
        .await?;
        let cache_id = resolve_id(request.cache_id, &self.settings.cache_state_file()).await?;

        let mut phases = Vec::new();

        match database_id {
            Some(database_id) => {
                let run = self
                    .database_phase(database_id, snapshot_id, request.wait)
                    .run(env_vars)
                    .await;
                env_vars = run.state;
                phases.push(PhaseReport::ran("database", run.status));
            }
            None => phases.push(PhaseReport::skipped("database")),
        }

        match cache_id {
            Some(cache_id) => {
                let run = self.cache_phase(cache_id, request.wait).run(env_vars).await;
                env_vars = run.state;
                phases.push(PhaseReport::ran("cache", run.status));
            }
            None => phases.push(PhaseReport::skipped("cache")),
        }

        let clone_name = request
            .clone_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.identity.staging_clone_name());

        let spec = CloneSpec {
            application_name: self.identity.application_name.clone(),
            source_environment: request.source_environment.clone(),
            environment_name: clone_name.clone(),
            cname_prefix: clone_name.clone(),
            platform: request.platform,
            scale: request.scale,
            tags: request.tags,
            option_settings: env_vars.to_option_settings(),
        };

        info!("Cloning {} as {}", request.source_environment, clone_name);
        self.services.compute.clone_environment(&spec).await?;
        info!("Cloned {} as {}", request.source_environment, clone_name);

        Ok(StagingBuild {
            clone_name,
            env_vars,
            phases,
        })
    }

    fn database_phase(
        &self,
        database_id: String,
        snapshot_id: Option<String>,
        wait: bool,
    ) -> Pipeline<EnvVars> {
        let mut steps = Vec::new();

        if let Some(snapshot_id) = snapshot_id {
            let this = self.clone();
            let db = database_id.clone();
            steps.push(effect(
                format!("restore database {} from snapshot {}", database_id, snapshot_id),
                move || {
                    let this = this.clone();
                    let db = db.clone();
                    let snapshot = snapshot_id.clone();
                    async move {
                        this.restore_database_from_snapshot(Some(db), Some(snapshot), wait)
                            .await
                            .map(|_| ())
                    }
                },
            ));
        }

        let this = self.clone();
        let db = database_id.clone();
        steps.push(job(
            format!("point DATABASE_URL variables at {}", database_id),
            move |env: EnvVars| this.clone().reconcile_database_endpoint(db.clone(), env),
        ));

        Pipeline::new(format!("database {}", database_id), steps)
    }

    async fn reconcile_database_endpoint(
        self,
        database_id: String,
        env: EnvVars,
    ) -> Result<EnvVars> {
        let endpoint = self
            .services
            .database
            .describe_instance(&database_id)
            .await?;
        info!("Staging RDS endpoint is: {}", endpoint.address);

        if endpoint.address.is_empty() {
            return Ok(env);
        }
        update_database_urls(env, &endpoint.address, self.decider.as_ref())
    }

    fn cache_phase(&self, cache_id: String, wait: bool) -> Pipeline<EnvVars> {
        let this = self.clone();
        let id = cache_id.clone();
        let create = effect(format!("create cache cluster {}", cache_id), move || {
            let this = this.clone();
            let id = id.clone();
            async move { this.create_cache(&id, wait).await.map(|_| ()) }
        });

        let this = self.clone();
        let id = cache_id.clone();
        let reconcile = job(
            format!("point cache variables at {}", cache_id),
            move |env: EnvVars| this.clone().reconcile_cache_endpoint(id.clone(), env),
        );

        Pipeline::new(format!("cache {}", cache_id), vec![create, reconcile])
    }

    async fn reconcile_cache_endpoint(self, cache_id: String, env: EnvVars) -> Result<EnvVars> {
        let endpoint = self.services.cache.describe_cache_cluster(&cache_id).await?;
        info!("Staging ElastiCache endpoint is: {}", endpoint);
        update_cache_endpoints(env, &endpoint, self.decider.as_ref())
    }

    // ------------------------------------------------------------------
    // Remove staging
    // ------------------------------------------------------------------

    /// Save and terminate the environment, snapshot and delete the
    /// database, delete the cache. Each resource runs in its own pipeline.
    #[instrument(skip(self, request))]
    pub async fn remove_staging(&self, request: RemoveStaging) -> Result<Vec<PhaseReport>> {
        let database_id =
            resolve_id(request.database_id, &self.settings.database_state_file()).await?;
        let cache_id = resolve_id(request.cache_id, &self.settings.cache_state_file()).await?;

        let mut phases = Vec::new();

        let run = self.environment_teardown(request.wait).run(()).await;
        phases.push(PhaseReport::ran("environment", run.status));

        match database_id {
            Some(database_id) => {
                let run = self
                    .database_teardown(database_id, request.database_snapshot_id, request.wait)
                    .run(())
                    .await;
                phases.push(PhaseReport::ran("database", run.status));
            }
            None => phases.push(PhaseReport::skipped("database")),
        }

        match cache_id {
            Some(cache_id) => {
                let run = self.cache_teardown(cache_id, request.wait).run(()).await;
                phases.push(PhaseReport::ran("cache", run.status));
            }
            None => phases.push(PhaseReport::skipped("cache")),
        }

        info!("Completed remove staging");
        Ok(phases)
    }

    fn environment_teardown(&self, wait: bool) -> Pipeline<()> {
        let app = self.identity.application_name.clone();
        let env = self.identity.environment_name.clone();
        let mut steps = Vec::new();

        let this = self.clone();
        steps.push(effect(format!("save environment variables of {}", env), move || {
            let this = this.clone();
            async move { this.save_env_vars(None).await.map(|_| ()) }
        }));

        let compute = self.services.compute.clone();
        let (a, e) = (app.clone(), env.clone());
        steps.push(effect(format!("terminate environment {}", env), move || {
            let compute = compute.clone();
            let (a, e) = (a.clone(), e.clone());
            async move { compute.terminate_environment(&a, &e).await }
        }));

        if wait {
            let compute = self.services.compute.clone();
            let config = self.settings.waits.environment;
            let (a, e) = (app.clone(), env.clone());
            steps.push(effect(format!("wait for termination of {}", env), move || {
                let compute = compute.clone();
                let (a, e) = (a.clone(), e.clone());
                async move {
                    info!("Waiting for terminating environment {}", e);
                    compute.wait_environment_terminated(&a, &e, config).await
                }
            }));
        }

        steps.push(notice(format!(
            "Terminated environment {} successfully {}",
            env,
            waiting_suffix(wait)
        )));

        Pipeline::new(format!("environment {}", env), steps)
    }

    fn database_teardown(
        &self,
        database_id: String,
        snapshot_id: Option<String>,
        wait: bool,
    ) -> Pipeline<()> {
        let mut steps = Vec::new();

        let this = self.clone();
        let db = database_id.clone();
        steps.push(effect(format!("snapshot database {}", database_id), move || {
            let this = this.clone();
            let db = db.clone();
            let snapshot = snapshot_id.clone();
            async move { this.take_database_snapshot(&db, snapshot, wait).await.map(|_| ()) }
        }));

        let database = self.services.database.clone();
        let db = database_id.clone();
        steps.push(effect(format!("delete database {}", database_id), move || {
            let database = database.clone();
            let db = db.clone();
            async move { database.delete_instance(&db, true).await }
        }));

        if wait {
            let database = self.services.database.clone();
            let config = self.settings.waits.database;
            let db = database_id.clone();
            steps.push(effect(format!("wait for deletion of database {}", database_id), move || {
                let database = database.clone();
                let db = db.clone();
                async move {
                    info!("Waiting for deleting RDS {}", db);
                    database.wait_instance_deleted(&db, config).await
                }
            }));
        }

        steps.push(notice(format!(
            "Deleted RDS {} successfully {}",
            database_id,
            waiting_suffix(wait)
        )));
        steps.push(record_id(
            self.settings.database_state_file(),
            database_id.clone(),
        ));

        Pipeline::new(format!("database {}", database_id), steps)
    }

    fn cache_teardown(&self, cache_id: String, wait: bool) -> Pipeline<()> {
        let mut steps = Vec::new();

        let cache = self.services.cache.clone();
        let id = cache_id.clone();
        let final_snapshot = format!("{}-{}", cache_id, timestamp());
        steps.push(effect(format!("delete cache cluster {}", cache_id), move || {
            let cache = cache.clone();
            let id = id.clone();
            let final_snapshot = final_snapshot.clone();
            async move { cache.delete_cache_cluster(&id, &final_snapshot).await }
        }));

        if wait {
            let cache = self.services.cache.clone();
            let config = self.settings.waits.cache;
            let id = cache_id.clone();
            steps.push(effect(format!("wait for deletion of cache cluster {}", cache_id), move || {
                let cache = cache.clone();
                let id = id.clone();
                async move {
                    info!("Waiting for deleting ElastiCache {}", id);
                    cache.wait_cache_cluster_deleted(&id, config).await
                }
            }));
        }

        steps.push(notice(format!(
            "Deleted ElastiCache {} successfully {}",
            cache_id,
            waiting_suffix(wait)
        )));
        steps.push(record_id(self.settings.cache_state_file(), cache_id.clone()));

        Pipeline::new(format!("cache {}", cache_id), steps)
    }
}

/// A step that only reports progress
fn notice<S: Send + 'static>(message: String) -> Step<S> {
    effect(format!("report: {}", message), move || {
        let message = message.clone();
        async move {
            info!("{}", message);
            Ok::<(), anyhow::Error>(())
        }
    })
}

/// A step appending `id` to a state file
fn record_id<S: Send + 'static>(path: PathBuf, id: String) -> Step<S> {
    effect(format!("record {} in {}", id, path.display()), move || {
        let path = path.clone();
        let id = id.clone();
        async move { persist_last_id(&path, &id).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        let parts: Vec<&str> = ts.split('-').collect();

        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0].len(), 4);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_waiting_suffix() {
        assert_eq!(waiting_suffix(true), "with waiting");
        assert_eq!(waiting_suffix(false), "without waiting");
    }

    #[test]
    fn test_update_poll_attempts() {
        assert_eq!(update_poll_attempts(30), 60);
        assert_eq!(update_poll_attempts(0), 1);
        assert_eq!(update_poll_attempts(u64::MAX), u32::MAX);
        assert_eq!(update_poll_attempts(u64::from(u32::MAX)), u32::MAX);
    }

    #[test]
    fn test_build_request_defaults() {
        let request = BuildStaging::new("shop-web-production");
        assert!(request.wait);
        assert_eq!(request.scale, 1);
        assert!(request.database_id.is_none());
        assert!(RemoveStaging::default().wait);
    }
}
