// ABOUTME: Core type definitions for sandbox provisioning and execution sessions
// ABOUTME: Defines instance state, session state, and the structured execution result contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle status of the provisioned instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Nothing known yet (no build, discover or start has run)
    Unknown,
    /// Image build in progress
    Building,
    /// Instance is running
    Running,
    /// Instance was stopped
    Stopped,
    /// Unrecoverable provisioning failure
    Error,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Building => "building",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One provisioned execution environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInstance {
    /// Container ID, unset until started or discovered
    pub instance_id: Option<String>,
    /// Image the instance runs
    pub image_ref: String,
    /// Host port the execution service is published on
    pub host_port: u16,
    /// Current lifecycle status
    pub status: InstanceStatus,
}

impl SandboxInstance {
    pub fn new(image_ref: impl Into<String>, host_port: u16) -> Self {
        Self {
            instance_id: None,
            image_ref: image_ref.into(),
            host_port,
            status: InstanceStatus::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        self.instance_id.is_some() && self.status == InstanceStatus::Running
    }

    /// WebSocket endpoint of the execution service inside this instance
    pub fn endpoint(&self) -> String {
        crate::protocol::endpoint_for_port(self.host_port)
    }
}

/// Result of an image build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub image: String,
    /// Combined stdout and stderr of the build tool
    pub log: String,
}

/// Runtime details of an instance as reported by the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub id: String,
    pub short_id: String,
    /// Raw runtime state, e.g. "running" or "exited"
    pub status: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub read_only_rootfs: bool,
    pub network_mode: String,
    pub caps_dropped: Vec<String>,
}

/// Status summary handed to monitoring and presentation layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatusReport {
    pub status: String,
    pub id: String,
    pub started_at: Option<DateTime<Utc>>,
}

impl InstanceStatusReport {
    pub fn stopped() -> Self {
        Self {
            status: InstanceStatus::Stopped.to_string(),
            id: "-".to_string(),
            started_at: None,
        }
    }

    /// Time the instance has been up as of `now`
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        (now - started).to_std().ok()
    }
}

/// State of one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    Awaiting,
    Streaming,
    Complete,
    TimedOut,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Complete
                | SessionState::TimedOut
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }

    /// States in which the receive loop is waiting for frames
    pub fn is_receiving(&self) -> bool {
        matches!(self, SessionState::Awaiting | SessionState::Streaming)
    }
}

/// Classification of a failed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance could not be built or started
    Provisioning,
    /// Connect retries exhausted
    Connection,
    /// Channel dropped mid-exchange
    ConnectionClosed,
    /// Session exceeded its deadline
    Timeout,
    /// The channel produced something other than frames or a clean close
    MalformedChannel,
    /// Caller cancelled the session
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Provisioning => "provisioning failure",
            ErrorKind::Connection => "connection failure",
            ErrorKind::ConnectionClosed => "connection closed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedChannel => "malformed channel",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Structured outcome of `execute()`; every failure path is represented here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Concatenated response text (empty on failure)
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Diagnostic stream from provisioning, when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Raw inbound payloads in arrival order
    pub frames: Vec<String>,
    /// Content received before a failure; never part of `stdout`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub partial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
}

impl ExecutionResult {
    pub fn completed(stdout: String, frames: Vec<String>) -> Self {
        Self {
            success: true,
            stdout,
            error: None,
            stderr: None,
            frames,
            partial: String::new(),
            state: Some(SessionState::Complete),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            stderr: None,
            frames: Vec::new(),
            partial: String::new(),
            state: None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
