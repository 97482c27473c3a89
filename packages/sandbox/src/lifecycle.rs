// ABOUTME: Sandbox instance lifecycle management over a container runtime
// ABOUTME: Builds the image, discovers or starts the instance, stops and inspects it

use crate::profile::{LaunchSpec, SecurityProfile};
use crate::runtime::{ContainerRuntime, InstanceFilter};
use crate::types::{BuildReport, InstanceDetails, InstanceStatus, SandboxInstance};
use crate::{Result, SandboxError};
use sandcastle_config::constants;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where the image comes from and how the instance is published
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub image: String,
    pub dockerfile: PathBuf,
    /// Build context; defaults to the Dockerfile's directory
    pub build_context: Option<PathBuf>,
    pub host_port: u16,
    pub container_port: u16,
    /// Pause after a successful start so the service inside can bind its port
    pub settle: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            image: constants::DEFAULT_IMAGE.to_string(),
            dockerfile: PathBuf::from(constants::DEFAULT_DOCKERFILE),
            build_context: None,
            host_port: constants::DEFAULT_HOST_PORT,
            container_port: constants::DEFAULT_CONTAINER_PORT,
            settle: Duration::from_secs(constants::DEFAULT_SETTLE_SECS),
        }
    }
}

impl LifecycleConfig {
    pub fn context_dir(&self) -> PathBuf {
        if let Some(context) = &self.build_context {
            return context.clone();
        }
        match self.dockerfile.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Owns the single tracked sandbox instance.
///
/// Build and start are attempted once per call; callers decide whether to retry.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: LifecycleConfig,
    profile: SecurityProfile,
    instance: SandboxInstance,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: LifecycleConfig,
        profile: SecurityProfile,
    ) -> Self {
        let instance = SandboxInstance::new(config.image.clone(), config.host_port);
        Self {
            runtime,
            config,
            profile,
            instance,
        }
    }

    /// Snapshot of the tracked instance
    pub fn instance(&self) -> &SandboxInstance {
        &self.instance
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn profile(&self) -> &SecurityProfile {
        &self.profile
    }

    pub async fn is_runtime_available(&self) -> bool {
        self.runtime.is_available().await
    }

    /// Launch description for the next `start`
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::new(
            &self.profile,
            &self.config.image,
            self.config.host_port,
            self.config.container_port,
        )
    }

    /// Build the image from the configured Dockerfile
    pub async fn build_image(&mut self) -> Result<BuildReport> {
        let previous = self.instance.status;
        self.instance.status = InstanceStatus::Building;

        let context = self.config.context_dir();
        info!(
            "Building image {} from {}",
            self.config.image,
            self.config.dockerfile.display()
        );

        match self
            .runtime
            .build_image(&self.config.image, &self.config.dockerfile, &context)
            .await
        {
            Ok(report) => {
                info!("Image {} built", report.image);
                self.instance.status = previous;
                Ok(report)
            }
            Err(e) => {
                error!("Failed to build image {}: {}", self.config.image, e);
                self.instance.status = InstanceStatus::Error;
                Err(SandboxError::provisioning("Failed to build image", e))
            }
        }
    }

    pub async fn image_exists(&self) -> Result<bool> {
        self.runtime.image_exists(&self.config.image).await
    }

    /// Build when the image is missing or `force` is set; returns whether a build ran
    pub async fn ensure_image(&mut self, force: bool) -> Result<bool> {
        if !force {
            match self.image_exists().await {
                Ok(true) => {
                    debug!("Image {} already present", self.config.image);
                    return Ok(false);
                }
                Ok(false) => info!("Image {} not found, building", self.config.image),
                Err(e) => warn!("Could not check for image {}: {}", self.config.image, e),
            }
        }

        self.build_image().await?;
        Ok(true)
    }

    /// Find an already-running instance, preferring the tracked one.
    ///
    /// Not atomic with `start`; serialize the two externally.
    pub async fn discover(&mut self) -> Result<Option<SandboxInstance>> {
        if let Some(id) = self.instance.instance_id.clone() {
            let found = self
                .runtime
                .find_running(&InstanceFilter::Id(id.clone()))
                .await?;
            if found.is_empty() {
                debug!("Tracked instance {} is no longer running", id);
                self.instance.instance_id = None;
                self.instance.status = InstanceStatus::Stopped;
            } else {
                self.instance.status = InstanceStatus::Running;
                return Ok(Some(self.instance.clone()));
            }
        }

        let found = self
            .runtime
            .find_running(&InstanceFilter::Ancestor(self.config.image.clone()))
            .await?;

        match found.into_iter().next() {
            Some(id) => {
                info!("Found running instance {} of {}", id, self.config.image);
                self.instance.instance_id = Some(id);
                self.instance.status = InstanceStatus::Running;
                Ok(Some(self.instance.clone()))
            }
            None => Ok(None),
        }
    }

    /// Launch a fresh detached instance under the security profile
    pub async fn start(&mut self) -> Result<SandboxInstance> {
        let spec = self.launch_spec();

        match self.runtime.run_detached(&spec).await {
            Ok(id) => {
                info!("Started instance {} on port {}", id, spec.host_port);
                self.instance.instance_id = Some(id);
                self.instance.status = InstanceStatus::Running;

                if !self.config.settle.is_zero() {
                    debug!("Waiting {:?} for the instance to settle", self.config.settle);
                    tokio::time::sleep(self.config.settle).await;
                }

                Ok(self.instance.clone())
            }
            Err(e) => {
                error!("Failed to start instance of {}: {}", spec.image, e);
                self.instance.status = InstanceStatus::Error;
                Err(SandboxError::provisioning("Failed to start instance", e))
            }
        }
    }

    /// Stop the tracked instance; a no-op when nothing is tracked
    pub async fn stop(&mut self) -> Result<()> {
        let Some(id) = self.instance.instance_id.clone() else {
            debug!("No tracked instance to stop");
            return Ok(());
        };

        match self.runtime.stop(&id).await {
            Ok(()) => {
                info!("Stopped instance {}", id);
                self.instance.instance_id = None;
                self.instance.status = InstanceStatus::Stopped;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to stop instance {}: {}", id, e);
                Err(SandboxError::Stop {
                    stderr: e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string()),
                    instance_id: id,
                })
            }
        }
    }

    /// Runtime details of the tracked instance
    pub async fn inspect(&self) -> Result<Option<InstanceDetails>> {
        match &self.instance.instance_id {
            Some(id) => self.runtime.inspect(id).await,
            None => Ok(None),
        }
    }
}
