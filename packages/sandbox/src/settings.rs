// ABOUTME: Sandbox settings loaded from environment variables
// ABOUTME: Produces the security profile, lifecycle config and client config for the orchestrator

use crate::lifecycle::LifecycleConfig;
use crate::profile::{NetworkMode, SecurityProfile, VolumeMount};
use crate::protocol::ClientConfig;
use crate::{Result, SandboxError};
use sandcastle_config::constants::*;
use sandcastle_config::parse_flag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Every tunable of the sandbox, with defaults matching a stock install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub image: String,
    pub dockerfile: PathBuf,
    pub build_context: Option<PathBuf>,
    pub docker_bin: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub pids_limit: u32,
    pub host_port: u16,
    pub container_port: u16,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub settle_secs: u64,
    pub debug: bool,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub network_mode: NetworkMode,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub read_only: bool,
    pub volumes: Vec<VolumeMount>,
    pub seccomp_profile: Option<PathBuf>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            dockerfile: PathBuf::from(DEFAULT_DOCKERFILE),
            build_context: None,
            docker_bin: DEFAULT_DOCKER_BIN.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT.to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            pids_limit: DEFAULT_PIDS_LIMIT,
            host_port: DEFAULT_HOST_PORT,
            container_port: DEFAULT_CONTAINER_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            settle_secs: DEFAULT_SETTLE_SECS,
            debug: false,
            user_id: None,
            group_id: None,
            network_mode: NetworkMode::default(),
            cap_drop: vec![DEFAULT_CAP_DROP.to_string()],
            cap_add: Vec::new(),
            read_only: false,
            volumes: Vec::new(),
            seccomp_profile: None,
        }
    }
}

impl SandboxSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable source; unset or blank values keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(v) = get(SANDCASTLE_IMAGE) {
            settings.image = v.trim().to_string();
        }
        if let Some(v) = get(SANDCASTLE_DOCKERFILE) {
            settings.dockerfile = PathBuf::from(v.trim());
        }
        if let Some(v) = get(SANDCASTLE_BUILD_CONTEXT) {
            settings.build_context = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get(SANDCASTLE_DOCKER_BIN) {
            settings.docker_bin = v.trim().to_string();
        }
        if let Some(v) = get(SANDCASTLE_CPU_LIMIT) {
            settings.cpu_limit = v.trim().to_string();
        }
        if let Some(v) = get(SANDCASTLE_MEMORY_LIMIT) {
            settings.memory_limit = v.trim().to_string();
        }
        if let Some(v) = get(SANDCASTLE_PIDS_LIMIT) {
            settings.pids_limit = parse_number(SANDCASTLE_PIDS_LIMIT, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_HOST_PORT) {
            settings.host_port = parse_number(SANDCASTLE_HOST_PORT, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_CONTAINER_PORT) {
            settings.container_port = parse_number(SANDCASTLE_CONTAINER_PORT, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_TIMEOUT_SECS) {
            settings.timeout_secs = parse_number(SANDCASTLE_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_MAX_RETRIES) {
            settings.max_retries = parse_number(SANDCASTLE_MAX_RETRIES, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_RETRY_DELAY_SECS) {
            settings.retry_delay_secs = parse_number(SANDCASTLE_RETRY_DELAY_SECS, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_SETTLE_SECS) {
            settings.settle_secs = parse_number(SANDCASTLE_SETTLE_SECS, &v)?;
        }
        if let Some(v) = get(SANDCASTLE_DEBUG) {
            settings.debug = parse_flag(SANDCASTLE_DEBUG, &v, settings.debug);
        }
        if let Some(v) = get(SANDCASTLE_USER_ID) {
            settings.user_id = Some(v.trim().to_string());
        }
        if let Some(v) = get(SANDCASTLE_GROUP_ID) {
            settings.group_id = Some(v.trim().to_string());
        }
        if let Some(v) = get(SANDCASTLE_NETWORK_MODE) {
            settings.network_mode = NetworkMode::from_str(&v)?;
        }
        if let Some(v) = lookup(SANDCASTLE_CAP_DROP) {
            // An empty value means drop nothing.
            settings.cap_drop = split_list(&v);
        }
        if let Some(v) = get(SANDCASTLE_CAP_ADD) {
            settings.cap_add = split_list(&v);
        }
        if let Some(v) = get(SANDCASTLE_READ_ONLY) {
            settings.read_only = parse_flag(SANDCASTLE_READ_ONLY, &v, settings.read_only);
        }
        if let Some(v) = get(SANDCASTLE_VOLUMES) {
            settings.volumes = parse_volumes(&v)?;
        }
        if let Some(v) = get(SANDCASTLE_SECCOMP_PROFILE) {
            settings.seccomp_profile = Some(PathBuf::from(v.trim()));
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::InvalidConfiguration(
                "image name must not be empty".to_string(),
            ));
        }
        if self.host_port == 0 || self.container_port == 0 {
            return Err(SandboxError::InvalidConfiguration(
                "ports must be in the range 1-65535".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(SandboxError::InvalidConfiguration(
                "max retries must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(SandboxError::InvalidConfiguration(format!(
                "timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.retry_delay_secs > MAX_RETRY_DELAY_SECS {
            return Err(SandboxError::InvalidConfiguration(format!(
                "retry delay must be at most {} seconds",
                MAX_RETRY_DELAY_SECS
            )));
        }
        Ok(())
    }

    pub fn security_profile(&self) -> Result<SecurityProfile> {
        let mut builder = SecurityProfile::builder()
            .cap_drop(self.cap_drop.clone())
            .cap_add(self.cap_add.clone())
            .read_only_rootfs(self.read_only)
            .network_mode(self.network_mode)
            .volumes(self.volumes.clone())
            .cpu_limit(self.cpu_limit.clone())
            .memory_limit(self.memory_limit.clone())
            .pids_limit(self.pids_limit);

        if let Some(user) = &self.user_id {
            builder = builder.user(user.clone());
        }
        if let Some(group) = &self.group_id {
            builder = builder.group(group.clone());
        }
        if let Some(path) = &self.seccomp_profile {
            builder = builder.seccomp_profile(path.clone());
        }

        builder.build()
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            image: self.image.clone(),
            dockerfile: self.dockerfile.clone(),
            build_context: self.build_context.clone(),
            host_port: self.host_port,
            container_port: self.container_port,
            settle: Duration::from_secs(self.settle_secs),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            debug: self.debug,
            ..ClientConfig::for_port(self.host_port)
        }
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        SandboxError::InvalidConfiguration(format!("{} must be a number, got {:?}", name, value))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `host:container[,host:container...]`
fn parse_volumes(value: &str) -> Result<Vec<VolumeMount>> {
    split_list(value)
        .into_iter()
        .map(|entry| match entry.rsplit_once(':') {
            Some((host, container)) if !host.is_empty() && !container.is_empty() => {
                Ok(VolumeMount::new(host, container))
            }
            _ => Err(SandboxError::InvalidConfiguration(format!(
                "volume {:?} must look like host_path:container_path",
                entry
            ))),
        })
        .collect()
}
