//! stagecraft - staging environment orchestration for Elastic Beanstalk
//!
//! Builds a staging copy of an application environment out of cloned cloud
//! infrastructure and tears it down again.
//!
//! # Architecture
//!
//! Each workflow is a sequence of fail-fast pipelines, one per resource:
//! - A pipeline stops at its first failing job and reports it
//! - A failed pipeline never stops its sibling pipelines
//! - Nothing is retried or rolled back
//!
//! # Modules
//!
//! - `adapters`: Cloud service interfaces and the AWS SDK backend
//! - `core`: Pipelines, endpoint reconciliation, state files, Orchestrator
//! - `domain`: Data structures (EnvVars, Endpoint, EnvironmentIdentity)
//! - `config`: EB CLI config discovery and staging settings
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Save the production variables, then build staging from them
//! stagecraft --env-name shop-web-production save-env
//! stagecraft --env-name shop-web-production build-staging shop-web-production \
//!     --database-id shop-staging --snapshot-id shop-prod-latest --cache-id shop-staging
//!
//! # Tear it down again
//! stagecraft --env-name shop-web-staging remove-staging
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{AwsServices, Services};
pub use core::{BuildStaging, Orchestrator, Pipeline, RemoveStaging};
pub use domain::{Endpoint, EnvVars, EnvironmentIdentity};
