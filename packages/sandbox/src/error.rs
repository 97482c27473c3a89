// ABOUTME: Error types for sandbox provisioning and configuration
// ABOUTME: Covers container runtime failures, lifecycle errors, and invalid profiles or settings

use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Build or start of the sandbox instance failed
    #[error("Provisioning failed: {message}")]
    Provisioning { message: String, stderr: String },

    /// Stopping the tracked instance failed; the instance is still tracked
    #[error("Failed to stop instance {instance_id}: {stderr}")]
    Stop { instance_id: String, stderr: String },

    /// A container runtime command exited with a non-zero status
    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The container runtime binary could not be invoked at all
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Runtime output could not be understood
    #[error("Unexpected runtime output: {0}")]
    UnexpectedOutput(String),

    /// Security profile rejected during validation
    #[error("Invalid security profile: {0}")]
    InvalidProfile(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Captured diagnostic stream attached to this error, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            SandboxError::Provisioning { stderr, .. }
            | SandboxError::Stop { stderr, .. }
            | SandboxError::CommandFailed { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }

    /// Wrap any error raised while building or starting an instance
    pub(crate) fn provisioning(context: &str, source: SandboxError) -> Self {
        let stderr = source.stderr().unwrap_or_default().to_string();
        SandboxError::Provisioning {
            message: format!("{}: {}", context, source),
            stderr,
        }
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_keeps_stderr_verbatim() {
        let source = SandboxError::CommandFailed {
            command: "docker run".to_string(),
            code: Some(125),
            stderr: "docker: invalid reference format.\n".to_string(),
        };

        let err = SandboxError::provisioning("Failed to start instance", source);

        assert_eq!(err.stderr(), Some("docker: invalid reference format.\n"));
        assert!(err.to_string().starts_with("Provisioning failed: Failed to start instance"));
    }

    #[test]
    fn test_stderr_absent_for_configuration_errors() {
        let err = SandboxError::InvalidConfiguration("bad port".to_string());
        assert!(err.stderr().is_none());
    }
}
