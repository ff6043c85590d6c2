//! AWS adapter backed by the official SDK clients.
//!
//! One client per service, all built from the same `SdkConfig`. Waits use
//! the SDK's generated waiters; a [`WaitConfig`] becomes the waiter's total
//! time budget (`delay_seconds * max_attempts`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_elasticache::client::Waiters as _;
use aws_sdk_elasticbeanstalk::client::Waiters as _;
use aws_sdk_elasticbeanstalk::types::{ConfigurationOptionSetting, EnvironmentStatus};
use aws_sdk_rds::client::Waiters as _;
use aws_sdk_rds::config::Region;
use aws_sdk_rds::error::DisplayErrorContext;
use tracing::{debug, warn};

use super::{
    CacheClusterSpec, CacheService, CloneSpec, ComputePlatform, DatabaseService, RestoreSpec,
};
use crate::config::WaitConfig;
use crate::domain::{Endpoint, EnvVars, OptionSetting};

const ASG_NAMESPACE: &str = "aws:autoscaling:asg";

/// Turn an SDK failure into an error carrying the full service message
fn sdk_error<E: std::error::Error>(operation: &str, error: E) -> anyhow::Error {
    anyhow::anyhow!("{} failed: {}", operation, DisplayErrorContext(&error))
}

fn max_wait(wait: WaitConfig) -> Duration {
    wait.delay() * wait.max_attempts.max(1)
}

fn endpoint(address: Option<&str>, port: Option<i32>) -> Endpoint {
    Endpoint::new(
        address.unwrap_or_default(),
        port.and_then(|p| u16::try_from(p).ok()).unwrap_or_default(),
    )
}

fn to_sdk_setting(setting: &OptionSetting) -> ConfigurationOptionSetting {
    ConfigurationOptionSetting::builder()
        .namespace(&setting.namespace)
        .option_name(&setting.option_name)
        .set_value(setting.value.clone())
        .build()
}

fn from_sdk_setting(setting: &ConfigurationOptionSetting) -> OptionSetting {
    OptionSetting {
        namespace: setting.namespace().unwrap_or_default().to_string(),
        option_name: setting.option_name().unwrap_or_default().to_string(),
        value: setting.value().map(str::to_string),
    }
}

/// Option settings for a clone: the variables plus a fixed instance count
fn clone_option_settings(spec: &CloneSpec) -> Vec<ConfigurationOptionSetting> {
    let scale = spec.scale.to_string();
    spec.option_settings
        .iter()
        .cloned()
        .chain([
            OptionSetting::new(ASG_NAMESPACE, "MinSize", &scale),
            OptionSetting::new(ASG_NAMESPACE, "MaxSize", &scale),
        ])
        .map(|setting| to_sdk_setting(&setting))
        .collect()
}

/// RDS, ElastiCache and Elastic Beanstalk clients
#[derive(Debug, Clone)]
pub struct AwsServices {
    beanstalk: aws_sdk_elasticbeanstalk::Client,
    rds: aws_sdk_rds::Client,
    elasticache: aws_sdk_elasticache::Client,
}

impl AwsServices {
    pub fn new(
        beanstalk: aws_sdk_elasticbeanstalk::Client,
        rds: aws_sdk_rds::Client,
        elasticache: aws_sdk_elasticache::Client,
    ) -> Self {
        Self {
            beanstalk,
            rds,
            elasticache,
        }
    }

    pub fn from_conf(config: &SdkConfig) -> Self {
        Self::new(
            aws_sdk_elasticbeanstalk::Client::new(config),
            aws_sdk_rds::Client::new(config),
            aws_sdk_elasticache::Client::new(config),
        )
    }

    /// Load credentials and region from the usual AWS sources, with
    /// optional region and profile overrides
    pub async fn from_env(region: Option<String>, profile: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        Self::from_conf(&loader.load().await)
    }

    async fn source_environment_id(&self, application: &str, environment: &str) -> Result<String> {
        let output = self
            .beanstalk
            .describe_environments()
            .application_name(application)
            .environment_names(environment)
            .include_deleted(false)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeEnvironments", e))?;

        output
            .environments()
            .iter()
            .filter(|env| env.status() != Some(&EnvironmentStatus::Terminated))
            .find_map(|env| env.environment_id())
            .map(str::to_string)
            .with_context(|| format!("Source environment {} not found", environment))
    }
}

#[async_trait]
impl CacheService for AwsServices {
    async fn create_cache_cluster(&self, spec: &CacheClusterSpec) -> Result<()> {
        let num_nodes = i32::try_from(spec.num_nodes).context("Cache node count too large")?;
        self.elasticache
            .create_cache_cluster()
            .cache_cluster_id(&spec.cluster_id)
            .cache_node_type(&spec.node_type)
            .engine(&spec.engine)
            .num_cache_nodes(num_nodes)
            .send()
            .await
            .map_err(|e| sdk_error("CreateCacheCluster", e))?;
        debug!(cluster = %spec.cluster_id, "CreateCacheCluster accepted");
        Ok(())
    }

    async fn describe_cache_cluster(&self, cluster_id: &str) -> Result<Endpoint> {
        let output = self
            .elasticache
            .describe_cache_clusters()
            .cache_cluster_id(cluster_id)
            .show_cache_node_info(true)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(err) if err.is_cache_cluster_not_found_fault() => {
                    anyhow::anyhow!("Cache cluster {} not found", cluster_id)
                }
                _ => sdk_error("DescribeCacheClusters", e),
            })?;

        output
            .cache_clusters()
            .iter()
            .flat_map(|cluster| cluster.cache_nodes())
            .find_map(|node| node.endpoint())
            .map(|ep| endpoint(ep.address(), ep.port()))
            .with_context(|| format!("Cache cluster {} has no node endpoint yet", cluster_id))
    }

    async fn delete_cache_cluster(&self, cluster_id: &str, final_snapshot: &str) -> Result<()> {
        self.elasticache
            .delete_cache_cluster()
            .cache_cluster_id(cluster_id)
            .final_snapshot_identifier(final_snapshot)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteCacheCluster", e))?;
        Ok(())
    }

    async fn wait_cache_cluster_available(&self, cluster_id: &str, wait: WaitConfig) -> Result<()> {
        self.elasticache
            .wait_until_cache_cluster_available()
            .cache_cluster_id(cluster_id)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for cache cluster", e))?;
        Ok(())
    }

    async fn wait_cache_cluster_deleted(&self, cluster_id: &str, wait: WaitConfig) -> Result<()> {
        self.elasticache
            .wait_until_cache_cluster_deleted()
            .cache_cluster_id(cluster_id)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for cache cluster deletion", e))?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseService for AwsServices {
    async fn restore_from_snapshot(&self, spec: &RestoreSpec) -> Result<()> {
        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| aws_sdk_rds::types::Tag::builder().key(key).value(value).build())
            .collect();

        self.rds
            .restore_db_instance_from_db_snapshot()
            .db_instance_identifier(&spec.instance_id)
            .db_snapshot_identifier(&spec.snapshot_id)
            .db_instance_class(&spec.instance_class)
            .publicly_accessible(spec.publicly_accessible)
            .multi_az(spec.multi_az)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| sdk_error("RestoreDBInstanceFromDBSnapshot", e))?;
        debug!(instance = %spec.instance_id, "RestoreDBInstanceFromDBSnapshot accepted");
        Ok(())
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Endpoint> {
        let output = self
            .rds
            .describe_db_instances()
            .db_instance_identifier(instance_id)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(err) if err.is_db_instance_not_found_fault() => {
                    anyhow::anyhow!("DB instance {} not found", instance_id)
                }
                _ => sdk_error("DescribeDBInstances", e),
            })?;

        output
            .db_instances()
            .iter()
            .find_map(|instance| instance.endpoint())
            .map(|ep| endpoint(ep.address(), ep.port()))
            .with_context(|| format!("DB instance {} has no endpoint yet", instance_id))
    }

    async fn create_snapshot(&self, instance_id: &str, snapshot_id: &str) -> Result<()> {
        self.rds
            .create_db_snapshot()
            .db_instance_identifier(instance_id)
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .map_err(|e| sdk_error("CreateDBSnapshot", e))?;
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str, skip_final_snapshot: bool) -> Result<()> {
        self.rds
            .delete_db_instance()
            .db_instance_identifier(instance_id)
            .skip_final_snapshot(skip_final_snapshot)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteDBInstance", e))?;
        Ok(())
    }

    async fn wait_instance_available(&self, instance_id: &str, wait: WaitConfig) -> Result<()> {
        self.rds
            .wait_until_db_instance_available()
            .db_instance_identifier(instance_id)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for DB instance", e))?;
        Ok(())
    }

    async fn wait_instance_deleted(&self, instance_id: &str, wait: WaitConfig) -> Result<()> {
        self.rds
            .wait_until_db_instance_deleted()
            .db_instance_identifier(instance_id)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for DB instance deletion", e))?;
        Ok(())
    }

    async fn wait_snapshot_completed(
        &self,
        instance_id: &str,
        snapshot_id: &str,
        wait: WaitConfig,
    ) -> Result<()> {
        self.rds
            .wait_until_db_snapshot_available()
            .db_instance_identifier(instance_id)
            .db_snapshot_identifier(snapshot_id)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for DB snapshot", e))?;
        Ok(())
    }
}

#[async_trait]
impl ComputePlatform for AwsServices {
    async fn environment_variables(&self, application: &str, environment: &str) -> Result<EnvVars> {
        let output = self
            .beanstalk
            .describe_configuration_settings()
            .application_name(application)
            .environment_name(environment)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeConfigurationSettings", e))?;

        let settings = output
            .configuration_settings()
            .first()
            .with_context(|| format!("No configuration found for {}:{}", application, environment))?
            .option_settings()
            .iter()
            .map(from_sdk_setting)
            .collect::<Vec<_>>();

        Ok(EnvVars::from_option_settings(&settings))
    }

    async fn update_environment_variables(
        &self,
        application: &str,
        environment: &str,
        vars: &EnvVars,
    ) -> Result<()> {
        let settings = vars.to_option_settings().iter().map(to_sdk_setting).collect();
        self.beanstalk
            .update_environment()
            .application_name(application)
            .environment_name(environment)
            .set_option_settings(Some(settings))
            .send()
            .await
            .map_err(|e| sdk_error("UpdateEnvironment", e))?;
        Ok(())
    }

    /// Sleeps one poll interval before the first status check.
    async fn wait_environment_ready(
        &self,
        application: &str,
        environment: &str,
        wait: WaitConfig,
    ) -> Result<()> {
        tokio::time::sleep(wait.delay()).await;
        self.beanstalk
            .wait_until_environment_updated()
            .application_name(application)
            .environment_names(environment)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for environment update", e))?;
        Ok(())
    }

    async fn terminate_environment(&self, application: &str, environment: &str) -> Result<()> {
        debug!(application, environment, "Terminating environment");
        self.beanstalk
            .terminate_environment()
            .environment_name(environment)
            .send()
            .await
            .map_err(|e| sdk_error("TerminateEnvironment", e))?;
        Ok(())
    }

    async fn wait_environment_terminated(
        &self,
        application: &str,
        environment: &str,
        wait: WaitConfig,
    ) -> Result<()> {
        self.beanstalk
            .wait_until_environment_terminated()
            .application_name(application)
            .environment_names(environment)
            .wait(max_wait(wait))
            .await
            .map_err(|e| sdk_error("Waiting for environment termination", e))?;
        Ok(())
    }

    /// Clone through a configuration template saved from the source
    /// environment; an explicit platform ARN is layered on top of it.
    async fn clone_environment(&self, spec: &CloneSpec) -> Result<()> {
        let source_id = self
            .source_environment_id(&spec.application_name, &spec.source_environment)
            .await?;

        let template = format!("{}-clone-source", spec.environment_name);
        self.beanstalk
            .create_configuration_template()
            .application_name(&spec.application_name)
            .template_name(&template)
            .environment_id(&source_id)
            .send()
            .await
            .map_err(|e| sdk_error("CreateConfigurationTemplate", e))?;

        let tags = spec
            .tags
            .iter()
            .map(|(key, value)| {
                aws_sdk_elasticbeanstalk::types::Tag::builder().key(key).value(value).build()
            })
            .collect();

        let created = self
            .beanstalk
            .create_environment()
            .application_name(&spec.application_name)
            .environment_name(&spec.environment_name)
            .cname_prefix(&spec.cname_prefix)
            .template_name(&template)
            .set_platform_arn(spec.platform.clone())
            .set_option_settings(Some(clone_option_settings(spec)))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| sdk_error("CreateEnvironment", e));

        let cleanup = self
            .beanstalk
            .delete_configuration_template()
            .application_name(&spec.application_name)
            .template_name(&template)
            .send()
            .await;
        if let Err(e) = cleanup {
            warn!(
                template = %template,
                error = %DisplayErrorContext(&e),
                "Failed to delete clone template"
            );
        }

        created.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ENV_NAMESPACE;

    fn clone_spec(scale: u32) -> CloneSpec {
        CloneSpec {
            application_name: "shop".into(),
            source_environment: "shop-web-production".into(),
            environment_name: "shop-web-staging".into(),
            cname_prefix: "shop-web-staging".into(),
            platform: None,
            scale,
            tags: Vec::new(),
            option_settings: vec![OptionSetting::new(ENV_NAMESPACE, "RAILS_ENV", "staging")],
        }
    }

    #[test]
    fn test_max_wait_is_total_budget() {
        assert_eq!(max_wait(WaitConfig::new(30, 60)), Duration::from_secs(1800));
        assert_eq!(max_wait(WaitConfig::new(15, 0)), Duration::from_secs(15));
    }

    #[test]
    fn test_endpoint_conversion() {
        let ep = endpoint(Some("db.abc.rds.amazonaws.com"), Some(5432));
        assert_eq!(ep, Endpoint::new("db.abc.rds.amazonaws.com", 5432));

        // Missing or out-of-range parts collapse to empty values
        assert_eq!(endpoint(None, Some(70000)), Endpoint::new("", 0));
    }

    #[test]
    fn test_option_setting_conversion() {
        let setting = OptionSetting::new(ENV_NAMESPACE, "DATABASE_URL", "u@h:5432/db");
        let sdk = to_sdk_setting(&setting);

        assert_eq!(sdk.namespace(), Some(ENV_NAMESPACE));
        assert_eq!(sdk.option_name(), Some("DATABASE_URL"));
        assert_eq!(sdk.value(), Some("u@h:5432/db"));
        assert_eq!(from_sdk_setting(&sdk), setting);

        let empty = ConfigurationOptionSetting::builder()
            .namespace(ENV_NAMESPACE)
            .option_name("EMPTY")
            .build();
        assert_eq!(from_sdk_setting(&empty).value, None);
    }

    #[test]
    fn test_clone_settings_pin_instance_count() {
        let settings = clone_option_settings(&clone_spec(3));

        assert_eq!(settings.len(), 3);
        assert_eq!(settings[0].option_name(), Some("RAILS_ENV"));
        for setting in &settings[1..] {
            assert_eq!(setting.namespace(), Some(ASG_NAMESPACE));
            assert_eq!(setting.value(), Some("3"));
        }
    }
}
