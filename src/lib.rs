//! Static validation and isolated execution of untrusted Python snippets.
//!
//! A submission is parsed and checked against a [`SandboxPolicy`]; accepted
//! code runs in a child interpreter under a wall-clock deadline with capped
//! output capture, and any figures it draws are saved as image artifacts
//! addressed by resource path.
//!
//! ```rust,ignore
//! use code_sandbox::{create_default_sandbox, CodeEngine};
//!
//! let sandbox = create_default_sandbox()?;
//! let result = sandbox.execute("print(sum(range(10)))").await;
//! assert_eq!(result.stdout, "45\n");
//! ```

pub mod analyzer;
pub mod artifacts;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod policy;
pub mod retention;
pub mod sandbox_builder;
pub mod wrapper;

pub use analyzer::{analyze_code, PolicyViolation, Validation, ViolationKind};
pub use config::{ExecutionLimits, SandboxConfig};
pub use engine::{CodeEngine, ExecutionResult, ExecutionStatus};
pub use errors::{Result, SandboxError};
pub use executor::IsolationHost;
pub use policy::{SandboxPolicy, SandboxPolicyBuilder};
pub use retention::SweepReport;
pub use sandbox_builder::{create_default_sandbox, create_sandbox_with_options, SandboxOptions};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Validator, isolation host and artifact store behind one handle.
///
/// Concurrent `execute` calls are independent: each run has its own id,
/// working directory and output directory.
pub struct CodeSandbox {
    config: Arc<SandboxConfig>,
    host: IsolationHost,
}

impl CodeSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let host = IsolationHost::new(Arc::clone(&config))?;
        Ok(Self { config, host })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn python_path(&self) -> &Path {
        self.host.python_path()
    }

    /// Run a submission without validating it first
    pub async fn run(&self, code: &str) -> ExecutionResult {
        self.host.run(code).await
    }

    /// Remove output directories older than the retention horizon
    pub fn sweep(&self) -> Result<SweepReport> {
        retention::sweep(&self.config.output_dir, self.config.retention())
    }

    /// Start the background sweeper on the current runtime
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        info!(
            "[RETENTION] Sweeping {:?} every {:?} (max age {:?})",
            self.config.output_dir,
            self.config.sweep_interval(),
            self.config.retention()
        );
        retention::spawn_periodic_sweeper(
            self.config.output_dir.clone(),
            self.config.retention(),
            self.config.sweep_interval(),
        )
    }

    /// Find the file behind an artifact resource path, with its content type
    pub fn resolve_artifact(&self, resource: &str) -> Option<(PathBuf, &'static str)> {
        let path = artifacts::resolve(&self.config.output_dir, self.config.namespace(), resource)?;
        let content_type = artifacts::content_type_for(&path);
        Some((path, content_type))
    }
}

#[async_trait]
impl CodeEngine for CodeSandbox {
    fn validate(&self, code: &str) -> Validation {
        analyze_code(code, &self.config.policy)
    }

    async fn execute(&self, code: &str) -> ExecutionResult {
        let validation = self.validate(code);
        if !validation.is_accepted() {
            info!(
                "[VALIDATOR] Rejected submission with {} violation(s)",
                validation.violations.len()
            );
            return ExecutionResult::rejected(&validation);
        }
        self.run(code).await
    }
}
