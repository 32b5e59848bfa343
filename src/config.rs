use crate::errors::{Result, SandboxError};
use crate::policy::SandboxPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-execution limits enforced by the isolation host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock deadline in seconds
    pub timeout_seconds: u64,
    /// Bytes of stdout kept; the rest is read and discarded
    pub max_stdout_bytes: usize,
    /// Bytes of stderr kept; the rest is read and discarded
    pub max_stderr_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_stdout_bytes: 50_000,
            max_stderr_bytes: 10_000,
        }
    }
}

/// Static configuration for the sandbox, built once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Import/builtin/attribute tables
    pub policy: SandboxPolicy,
    /// Deadline and output caps
    pub limits: ExecutionLimits,
    /// Root of the per-execution output directories
    pub output_dir: PathBuf,
    /// Parent for ephemeral working directories (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
    /// Python interpreter; discovered in PATH when unset
    pub python_path: Option<PathBuf>,
    /// Path prefix under which artifacts are addressed
    pub resource_namespace: String,
    /// Age after which output directories are swept
    pub retention_hours: u64,
    /// Period of the background sweeper
    pub sweep_interval_minutes: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            policy: SandboxPolicy::default(),
            limits: ExecutionLimits::default(),
            output_dir: std::env::temp_dir().join("code-sandbox-output"),
            scratch_dir: None,
            python_path: None,
            resource_namespace: "/api/code-output".to_string(),
            retention_hours: 1,
            sweep_interval_minutes: 10,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file. Missing sections keep defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: SandboxConfig = serde_json::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Apply `CODE_SANDBOX_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("CODE_SANDBOX_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CODE_SANDBOX_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CODE_SANDBOX_PYTHON") {
            self.python_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CODE_SANDBOX_NAMESPACE") {
            self.resource_namespace = v;
        }
        if let Some(v) = get("CODE_SANDBOX_TIMEOUT_SECS") {
            self.limits.timeout_seconds = parse_number("CODE_SANDBOX_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("CODE_SANDBOX_MAX_STDOUT_BYTES") {
            self.limits.max_stdout_bytes = parse_number("CODE_SANDBOX_MAX_STDOUT_BYTES", &v)?;
        }
        if let Some(v) = get("CODE_SANDBOX_MAX_STDERR_BYTES") {
            self.limits.max_stderr_bytes = parse_number("CODE_SANDBOX_MAX_STDERR_BYTES", &v)?;
        }
        if let Some(v) = get("CODE_SANDBOX_RETENTION_HOURS") {
            self.retention_hours = parse_number("CODE_SANDBOX_RETENTION_HOURS", &v)?;
        }
        Ok(())
    }

    /// Reject settings that would disable a limit outright
    pub fn check(&self) -> Result<()> {
        if self.limits.timeout_seconds == 0 {
            return Err(SandboxError::Config(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_stdout_bytes == 0 || self.limits.max_stderr_bytes == 0 {
            return Err(SandboxError::Config(
                "output caps must be greater than zero".to_string(),
            ));
        }
        // A zero horizon would let the sweeper remove directories of runs in flight
        if self.retention_hours == 0 {
            return Err(SandboxError::Config(
                "retention_hours must be greater than zero".to_string(),
            ));
        }
        if !self.resource_namespace.starts_with('/') {
            return Err(SandboxError::Config(format!(
                "resource_namespace must start with '/': {}",
                self.resource_namespace
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.limits.timeout_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1).saturating_mul(60))
    }

    /// Namespace without a trailing slash
    pub fn namespace(&self) -> &str {
        self.resource_namespace.trim_end_matches('/')
    }

    /// Where ephemeral working directories are created
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Output directory for one execution
    pub fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.output_dir.join(execution_id)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SandboxError::Config(format!("{key} is not a valid number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.limits.max_stdout_bytes, 50_000);
        assert_eq!(config.limits.max_stderr_bytes, 10_000);
        assert_eq!(config.retention(), Duration::from_secs(3600));
        assert_eq!(config.namespace(), "/api/code-output");
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CODE_SANDBOX_TIMEOUT_SECS", "5"),
            ("CODE_SANDBOX_OUTPUT_DIR", "/srv/plots"),
            ("CODE_SANDBOX_PYTHON", "  "),
            ("CODE_SANDBOX_NAMESPACE", "/files/"),
        ]
        .into_iter()
        .collect();

        let mut config = SandboxConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.limits.timeout_seconds, 5);
        assert_eq!(config.output_dir, PathBuf::from("/srv/plots"));
        // Blank values are ignored
        assert!(config.python_path.is_none());
        assert_eq!(config.namespace(), "/files");
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = SandboxConfig::default();
        let err = config
            .apply_overrides(|k| (k == "CODE_SANDBOX_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_check_rejects_zero_timeout() {
        let mut config = SandboxConfig::default();
        config.limits.timeout_seconds = 0;
        assert!(config.check().is_err());

        let mut config = SandboxConfig::default();
        config.resource_namespace = "api/code-output".to_string();
        assert!(config.check().is_err());
    }

    #[test]
    fn test_check_rejects_zero_retention() {
        let mut config = SandboxConfig::default();
        config.retention_hours = 0;
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("retention_hours"));

        let mut config = SandboxConfig::default();
        let err = config
            .apply_overrides(|k| (k == "CODE_SANDBOX_RETENTION_HOURS").then(|| "0".to_string()))
            .and_then(|()| config.check());
        assert!(err.is_err());
    }

    #[test]
    fn test_huge_durations_saturate() {
        let mut config = SandboxConfig::default();
        config.retention_hours = u64::MAX;
        config.sweep_interval_minutes = u64::MAX;
        assert!(config.check().is_ok());
        assert_eq!(config.retention(), Duration::from_secs(u64::MAX));
        assert_eq!(config.sweep_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(
            &path,
            r#"{"limits": {"timeout_seconds": 10}, "retention_hours": 6}"#,
        )
        .unwrap();

        let config = SandboxConfig::from_file(&path).unwrap();
        assert_eq!(config.limits.timeout_seconds, 10);
        // Unspecified fields within a section keep their defaults
        assert_eq!(config.limits.max_stdout_bytes, 50_000);
        assert_eq!(config.retention_hours, 6);
        assert!(config.policy.is_builtin_blocked("exec"));
    }

    #[test]
    fn test_from_missing_file() {
        let err = SandboxConfig::from_file(Path::new("/nonexistent/sandbox.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
