// ABOUTME: Sandboxed execution backend with resilient streaming sessions
// ABOUTME: Provisions hardened containers and runs request/response sessions against the service inside

pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod profile;
pub mod protocol;
pub mod runtime;
pub mod settings;
pub mod types;

pub use error::{Result, SandboxError};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use orchestrator::SandboxOrchestrator;
pub use profile::{LaunchSpec, NetworkMode, SecurityProfile, SecurityProfileBuilder, VolumeMount};
pub use protocol::{ClientConfig, SessionClient};
pub use runtime::{ContainerRuntime, DockerCli, InstanceFilter};
pub use settings::SandboxSettings;
pub use types::{
    BuildReport, ErrorKind, ExecutionError, ExecutionResult, InstanceDetails, InstanceStatus,
    InstanceStatusReport, SandboxInstance, SessionState,
};
