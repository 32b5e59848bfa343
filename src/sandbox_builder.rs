use crate::{config::ExecutionLimits, retention, CodeSandbox, Result, SandboxConfig};
use std::path::PathBuf;
use tracing::{info, warn};

/// Options for creating a sandbox
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// JSON configuration file; defaults are used when absent
    pub config_path: Option<PathBuf>,
    /// Whether `CODE_SANDBOX_*` environment overrides are applied
    pub apply_env: bool,
    /// Custom Python path (for a bundled interpreter)
    pub python_path: Option<PathBuf>,
    /// Custom output root
    pub output_dir: Option<PathBuf>,
    /// Custom execution limits
    pub limits: Option<ExecutionLimits>,
    /// Whether to sweep old output directories before returning
    pub sweep_on_start: bool,
}

impl SandboxOptions {
    /// Options for a long-running service: environment overrides and a
    /// startup sweep
    pub fn service() -> Self {
        Self {
            apply_env: true,
            sweep_on_start: true,
            ..Default::default()
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn with_python_path(mut self, path: PathBuf) -> Self {
        self.python_path = Some(path);
        self
    }

    pub fn with_output_dir(mut self, path: PathBuf) -> Self {
        self.output_dir = Some(path);
        self
    }

    /// Set custom execution limits
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Resolve the configuration the options describe.
///
/// Precedence, lowest first: defaults, config file, environment, explicit
/// options.
pub fn resolve_config(options: &SandboxOptions) -> Result<SandboxConfig> {
    let mut config = match &options.config_path {
        Some(path) => SandboxConfig::from_file(path)?,
        None => SandboxConfig::default(),
    };
    if options.apply_env {
        config.apply_env()?;
    }
    if let Some(path) = &options.python_path {
        config.python_path = Some(path.clone());
    }
    if let Some(path) = &options.output_dir {
        config.output_dir = path.clone();
    }
    if let Some(limits) = &options.limits {
        config.limits = limits.clone();
    }
    config.check()?;
    Ok(config)
}

/// Create sandbox with custom options
pub fn create_sandbox_with_options(options: SandboxOptions) -> Result<CodeSandbox> {
    let config = resolve_config(&options)?;
    std::fs::create_dir_all(&config.output_dir)?;

    if options.sweep_on_start {
        match retention::sweep(&config.output_dir, config.retention()) {
            Ok(report) => info!(
                "[SANDBOX] Startup sweep removed {} old output dir(s)",
                report.removed.len()
            ),
            Err(e) => warn!("[SANDBOX] Startup sweep failed: {}", e),
        }
    }

    let sandbox = CodeSandbox::new(config)?;
    info!(
        "[SANDBOX] Ready: python={:?} output={:?} policy={}",
        sandbox.python_path(),
        sandbox.config().output_dir,
        sandbox.config().policy.name
    );
    Ok(sandbox)
}

/// Create default sandbox (no config file, no environment overrides)
pub fn create_default_sandbox() -> Result<CodeSandbox> {
    create_sandbox_with_options(SandboxOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_explicit_options_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(
            &path,
            r#"{"python_path": "/opt/python/bin/python3", "limits": {"timeout_seconds": 10}}"#,
        )
        .unwrap();

        let options = SandboxOptions::default()
            .with_config_file(path)
            .with_python_path(PathBuf::from("/usr/local/bin/python3"))
            .with_limits(ExecutionLimits {
                timeout_seconds: 3,
                ..Default::default()
            });
        let config = resolve_config(&options).unwrap();
        assert_eq!(config.python_path, Some(PathBuf::from("/usr/local/bin/python3")));
        assert_eq!(config.limits.timeout_seconds, 3);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let options = SandboxOptions::default().with_limits(ExecutionLimits {
            timeout_seconds: 0,
            ..Default::default()
        });
        assert!(resolve_config(&options).is_err());
    }

    #[test]
    fn test_startup_sweep() {
        let root = tempfile::tempdir().unwrap();
        let old = root.path().join("old");
        std::fs::create_dir(&old).unwrap();
        std::fs::File::open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();

        let options = SandboxOptions {
            sweep_on_start: true,
            ..Default::default()
        }
        .with_output_dir(root.path().to_path_buf())
        // A configured interpreter is not probed, so this works without Python
        .with_python_path(PathBuf::from("/nonexistent/python3"));

        let sandbox = create_sandbox_with_options(options).unwrap();
        assert!(!old.exists());
        assert_eq!(sandbox.config().output_dir, root.path());
    }
}
