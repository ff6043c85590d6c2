//! Application / environment identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// The Elastic Beanstalk application and environment a workflow acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentIdentity {
    pub application_name: String,
    pub environment_name: String,
}

impl EnvironmentIdentity {
    /// Both names must be non-empty
    pub fn new(
        application_name: impl Into<String>,
        environment_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let application_name = application_name.into();
        let environment_name = environment_name.into();

        if application_name.trim().is_empty() || environment_name.trim().is_empty() {
            return Err(ConfigError::MissingIdentity);
        }

        Ok(Self {
            application_name,
            environment_name,
        })
    }

    /// Environment name with its last hyphen-delimited token replaced by `staging`.
    ///
    /// `shop-web-develop` becomes `shop-web-staging`; a name without a hyphen
    /// becomes plain `staging`.
    pub fn staging_clone_name(&self) -> String {
        let mut parts: Vec<&str> = self.environment_name.split('-').collect();
        parts.pop();
        parts.push("staging");
        parts.join("-")
    }

    /// Default database snapshot name, `<app>-<env>-<timestamp>` lower-cased
    pub fn snapshot_name(&self, timestamp: &str) -> String {
        format!(
            "{}-{}-{}",
            self.application_name.replace(' ', "-"),
            self.environment_name.replace(' ', "-"),
            timestamp
        )
        .to_lowercase()
    }

    /// Default environment-variable snapshot file name
    pub fn env_file_name(&self) -> String {
        format!("{}.env.json", self.environment_name)
    }
}

impl fmt::Display for EnvironmentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.application_name, self.environment_name)
    }
}
