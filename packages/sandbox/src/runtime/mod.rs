// ABOUTME: Container runtime trait used by the lifecycle manager
// ABOUTME: Abstracts build, discovery, launch, stop and inspect operations over a container engine

use crate::profile::LaunchSpec;
use crate::types::{BuildReport, InstanceDetails};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod docker_cli;

pub use docker_cli::DockerCli;

/// Which running instances `find_running` should match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceFilter {
    /// A specific container ID
    Id(String),
    /// Any container created from this image
    Ancestor(String),
}

/// Container engine operations needed to manage one sandbox instance.
///
/// Implementations report a non-zero exit of the underlying tool as an error
/// carrying the captured stderr verbatim.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is reachable
    async fn is_available(&self) -> bool;

    /// Build `image` from `dockerfile` using `context` as build context
    async fn build_image(&self, image: &str, dockerfile: &Path, context: &Path)
        -> Result<BuildReport>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// IDs of running containers matching `filter`, in runtime order
    async fn find_running(&self, filter: &InstanceFilter) -> Result<Vec<String>>;

    /// Launch a detached container and return its ID
    async fn run_detached(&self, spec: &LaunchSpec) -> Result<String>;

    /// Gracefully stop a container
    async fn stop(&self, instance_id: &str) -> Result<()>;

    /// Runtime details of a container, `None` if it no longer exists
    async fn inspect(&self, instance_id: &str) -> Result<Option<InstanceDetails>>;
}
