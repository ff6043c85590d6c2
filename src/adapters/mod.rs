//! Interfaces to the cloud services a staging environment is made of.
//!
//! The orchestrator only talks to these traits. [`AwsServices`] implements
//! all three on top of the AWS SDK clients.

pub mod aws;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::WaitConfig;
use crate::domain::{Endpoint, EnvVars, OptionSetting};

pub use aws::AwsServices;

/// Parameters for creating a cache cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheClusterSpec {
    pub cluster_id: String,
    pub node_type: String,
    pub engine: String,
    pub num_nodes: u32,
}

/// Parameters for restoring a database instance from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSpec {
    pub instance_id: String,
    pub snapshot_id: String,
    pub instance_class: String,
    pub publicly_accessible: bool,
    pub multi_az: bool,
    pub tags: Vec<(String, String)>,
}

/// Parameters for cloning an application-platform environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    pub application_name: String,
    pub source_environment: String,
    pub environment_name: String,
    pub cname_prefix: String,
    /// Platform ARN; `None` keeps the source environment's platform
    pub platform: Option<String>,
    pub scale: u32,
    pub tags: Vec<(String, String)>,
    /// Extra option settings layered over the source's configuration
    pub option_settings: Vec<OptionSetting>,
}

/// ElastiCache operations
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn create_cache_cluster(&self, spec: &CacheClusterSpec) -> Result<()>;

    /// Endpoint of the cluster's first node
    async fn describe_cache_cluster(&self, cluster_id: &str) -> Result<Endpoint>;

    async fn delete_cache_cluster(&self, cluster_id: &str, final_snapshot: &str) -> Result<()>;

    async fn wait_cache_cluster_available(&self, cluster_id: &str, wait: WaitConfig) -> Result<()>;

    async fn wait_cache_cluster_deleted(&self, cluster_id: &str, wait: WaitConfig) -> Result<()>;
}

/// RDS operations
#[async_trait]
pub trait DatabaseService: Send + Sync {
    async fn restore_from_snapshot(&self, spec: &RestoreSpec) -> Result<()>;

    async fn describe_instance(&self, instance_id: &str) -> Result<Endpoint>;

    async fn create_snapshot(&self, instance_id: &str, snapshot_id: &str) -> Result<()>;

    async fn delete_instance(&self, instance_id: &str, skip_final_snapshot: bool) -> Result<()>;

    async fn wait_instance_available(&self, instance_id: &str, wait: WaitConfig) -> Result<()>;

    async fn wait_instance_deleted(&self, instance_id: &str, wait: WaitConfig) -> Result<()>;

    async fn wait_snapshot_completed(
        &self,
        instance_id: &str,
        snapshot_id: &str,
        wait: WaitConfig,
    ) -> Result<()>;
}

/// Elastic Beanstalk operations
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Current environment properties of an environment
    async fn environment_variables(&self, application: &str, environment: &str) -> Result<EnvVars>;

    async fn update_environment_variables(
        &self,
        application: &str,
        environment: &str,
        vars: &EnvVars,
    ) -> Result<()>;

    /// Block until the environment is `Ready` again after an update
    async fn wait_environment_ready(
        &self,
        application: &str,
        environment: &str,
        wait: WaitConfig,
    ) -> Result<()>;

    async fn terminate_environment(&self, application: &str, environment: &str) -> Result<()>;

    async fn wait_environment_terminated(
        &self,
        application: &str,
        environment: &str,
        wait: WaitConfig,
    ) -> Result<()>;

    async fn clone_environment(&self, spec: &CloneSpec) -> Result<()>;
}

/// The three services a workflow needs, shared between its jobs
#[derive(Clone)]
pub struct Services {
    pub compute: Arc<dyn ComputePlatform>,
    pub database: Arc<dyn DatabaseService>,
    pub cache: Arc<dyn CacheService>,
}

impl Services {
    pub fn new(
        compute: Arc<dyn ComputePlatform>,
        database: Arc<dyn DatabaseService>,
        cache: Arc<dyn CacheService>,
    ) -> Self {
        Self {
            compute,
            database,
            cache,
        }
    }

    /// Use one implementation for all three services
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: ComputePlatform + DatabaseService + CacheService + 'static,
    {
        Self {
            compute: shared.clone(),
            database: shared.clone(),
            cache: shared,
        }
    }
}
