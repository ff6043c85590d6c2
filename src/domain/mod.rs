//! Domain types for staging orchestration.
//!
//! - Identity: which application/environment a workflow targets
//! - EnvVars: environment variable sets and their snapshot files
//! - Endpoint: live network address of a provisioned resource

pub mod endpoint;
pub mod env_vars;
pub mod identity;

pub use endpoint::Endpoint;
pub use env_vars::{EnvVars, OptionSetting, ENV_NAMESPACE};
pub use identity::EnvironmentIdentity;
