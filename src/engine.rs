use crate::analyzer::Validation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How an execution request ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The script ran and exited successfully
    Succeeded,
    /// Syntax error or policy violation; nothing was executed
    Rejected,
    /// The script ran and exited unsuccessfully
    RuntimeFailure,
    /// The script exceeded the deadline and was killed
    TimedOut,
    /// The host failed to run the script (spawn, filesystem, ...)
    InternalFault,
}

/// Result returned to the orchestration layer for one request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    /// Resource paths of produced images, in creation order
    pub artifacts: Vec<String>,
    /// Empty when the submission was rejected
    pub execution_id: String,
    /// Validator output; non-empty only for rejected submissions
    pub validation_errors: Vec<String>,
    /// Host-level failure messages (timeout, internal fault)
    pub errors: Vec<String>,
}

impl ExecutionResult {
    pub fn rejected(validation: &Validation) -> Self {
        Self {
            success: false,
            status: ExecutionStatus::Rejected,
            stdout: String::new(),
            stderr: String::new(),
            artifacts: Vec::new(),
            execution_id: String::new(),
            validation_errors: validation.errors(),
            errors: Vec::new(),
        }
    }

    pub fn completed(
        execution_id: String,
        exited_ok: bool,
        stdout: String,
        stderr: String,
        artifacts: Vec<String>,
    ) -> Self {
        Self {
            success: exited_ok,
            status: if exited_ok {
                ExecutionStatus::Succeeded
            } else {
                ExecutionStatus::RuntimeFailure
            },
            stdout,
            stderr,
            artifacts,
            execution_id,
            validation_errors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn timed_out(execution_id: String, timeout_seconds: u64, artifacts: Vec<String>) -> Self {
        let message = format!("Execution timed out after {} seconds.", timeout_seconds);
        Self {
            success: false,
            status: ExecutionStatus::TimedOut,
            stdout: String::new(),
            stderr: message.clone(),
            artifacts,
            execution_id,
            validation_errors: Vec::new(),
            errors: vec![message],
        }
    }

    pub fn faulted(execution_id: String, message: String) -> Self {
        Self {
            success: false,
            status: ExecutionStatus::InternalFault,
            stdout: String::new(),
            stderr: message.clone(),
            artifacts: Vec::new(),
            execution_id,
            validation_errors: Vec::new(),
            errors: vec![message],
        }
    }
}

/// The contract the orchestration layer depends on
#[async_trait]
pub trait CodeEngine: Send + Sync {
    /// Statically check a submission without running it
    fn validate(&self, code: &str) -> Validation;

    /// Validate, then run the submission if it was accepted
    async fn execute(&self, code: &str) -> ExecutionResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_code;
    use crate::policy::SandboxPolicy;

    #[test]
    fn test_rejected_has_no_execution() {
        let validation = analyze_code("import os", &SandboxPolicy::default());
        let result = ExecutionResult::rejected(&validation);
        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Rejected);
        assert!(result.execution_id.is_empty());
        assert!(result.stdout.is_empty());
        assert!(result.artifacts.is_empty());
        assert_eq!(result.validation_errors.len(), 1);
    }

    #[test]
    fn test_timeout_message() {
        let result = ExecutionResult::timed_out("abc".to_string(), 30, Vec::new());
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert_eq!(result.stderr, "Execution timed out after 30 seconds.");
        assert_eq!(result.errors, vec![result.stderr.clone()]);
        assert!(result.validation_errors.is_empty());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let result = ExecutionResult::completed(
            "id".to_string(),
            false,
            String::new(),
            "ZeroDivisionError".to_string(),
            Vec::new(),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "runtime_failure");
        assert_eq!(json["success"], false);
    }
}
