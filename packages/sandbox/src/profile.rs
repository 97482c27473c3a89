// ABOUTME: Security profile and resource limits for sandbox instances
// ABOUTME: Normalizes capability, filesystem, network and limit intent into a launch specification

use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Label applied to every instance launched by Sandcastle
pub const MANAGED_LABEL: &str = "sandcastle.managed";

/// Scratch mounts the execution service needs even under a read-only root
pub const SCRATCH_MOUNTS: [&str; 3] = ["/tmp", "/var/tmp", "/run"];

const SCRATCH_MOUNT_OPTIONS: &str = "exec,mode=777";

/// Network mode for the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
    None,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
            NetworkMode::None => "none",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bridge" => Ok(NetworkMode::Bridge),
            "host" => Ok(NetworkMode::Host),
            "none" => Ok(NetworkMode::None),
            other => Err(SandboxError::InvalidProfile(format!(
                "unknown network mode '{}' (expected bridge, host or none)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
}

impl VolumeMount {
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }

    /// `host:container` form accepted by `-v`
    pub fn to_bind(&self) -> String {
        format!("{}:{}", self.host_path, self.container_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsMount {
    pub path: String,
    pub options: String,
}

impl TmpfsMount {
    pub fn to_arg(&self) -> String {
        format!("{}:{}", self.path, self.options)
    }
}

/// Immutable isolation and resource constraints for one instance.
///
/// Built through [`SecurityProfile::builder`]; the builder guarantees that no
/// capability is both added and dropped. Deserialization goes through the
/// same builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileDocument")]
pub struct SecurityProfile {
    cap_drop: Vec<String>,
    cap_add: Vec<String>,
    read_only_rootfs: bool,
    network_mode: NetworkMode,
    seccomp_profile: Option<PathBuf>,
    volumes: Vec<VolumeMount>,
    cpu_limit: String,
    memory_limit: String,
    pids_limit: u32,
    user: Option<String>,
    group: Option<String>,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            cap_drop: vec!["ALL".to_string()],
            cap_add: Vec::new(),
            read_only_rootfs: false,
            network_mode: NetworkMode::Bridge,
            seccomp_profile: None,
            volumes: Vec::new(),
            cpu_limit: sandcastle_config::constants::DEFAULT_CPU_LIMIT.to_string(),
            memory_limit: sandcastle_config::constants::DEFAULT_MEMORY_LIMIT.to_string(),
            pids_limit: sandcastle_config::constants::DEFAULT_PIDS_LIMIT,
            user: None,
            group: None,
        }
    }
}

impl SecurityProfile {
    pub fn builder() -> SecurityProfileBuilder {
        SecurityProfileBuilder::default()
    }

    /// Effective drop list; never names a capability from `cap_add`
    pub fn cap_drop(&self) -> &[String] {
        &self.cap_drop
    }

    pub fn cap_add(&self) -> &[String] {
        &self.cap_add
    }

    pub fn read_only_rootfs(&self) -> bool {
        self.read_only_rootfs
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    pub fn seccomp_profile(&self) -> Option<&PathBuf> {
        self.seccomp_profile.as_ref()
    }

    pub fn volumes(&self) -> &[VolumeMount] {
        &self.volumes
    }

    pub fn cpu_limit(&self) -> &str {
        &self.cpu_limit
    }

    pub fn memory_limit(&self) -> &str {
        &self.memory_limit
    }

    pub fn pids_limit(&self) -> u32 {
        self.pids_limit
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

/// Serialized form of a profile; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileDocument {
    cap_drop: Option<Vec<String>>,
    cap_add: Vec<String>,
    read_only_rootfs: bool,
    network_mode: NetworkMode,
    seccomp_profile: Option<PathBuf>,
    volumes: Vec<VolumeMount>,
    cpu_limit: Option<String>,
    memory_limit: Option<String>,
    pids_limit: Option<u32>,
    user: Option<String>,
    group: Option<String>,
}

impl TryFrom<ProfileDocument> for SecurityProfile {
    type Error = SandboxError;

    fn try_from(doc: ProfileDocument) -> Result<Self> {
        SecurityProfileBuilder {
            cap_drop: doc.cap_drop,
            cap_add: doc.cap_add,
            read_only_rootfs: doc.read_only_rootfs,
            network_mode: doc.network_mode,
            seccomp_profile: doc.seccomp_profile,
            volumes: doc.volumes,
            cpu_limit: doc.cpu_limit,
            memory_limit: doc.memory_limit,
            pids_limit: doc.pids_limit,
            user: doc.user,
            group: doc.group,
        }
        .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecurityProfileBuilder {
    cap_drop: Option<Vec<String>>,
    cap_add: Vec<String>,
    read_only_rootfs: bool,
    network_mode: NetworkMode,
    seccomp_profile: Option<PathBuf>,
    volumes: Vec<VolumeMount>,
    cpu_limit: Option<String>,
    memory_limit: Option<String>,
    pids_limit: Option<u32>,
    user: Option<String>,
    group: Option<String>,
}

impl SecurityProfileBuilder {
    /// Replace the drop list (default: `ALL`)
    pub fn cap_drop<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cap_drop = Some(caps.into_iter().map(Into::into).collect());
        self
    }

    pub fn cap_add<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cap_add = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn read_only_rootfs(mut self, read_only: bool) -> Self {
        self.read_only_rootfs = read_only;
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = mode;
        self
    }

    pub fn seccomp_profile(mut self, path: impl Into<PathBuf>) -> Self {
        self.seccomp_profile = Some(path.into());
        self
    }

    pub fn volume(mut self, host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount::new(host_path, container_path));
        self
    }

    pub fn volumes(mut self, volumes: Vec<VolumeMount>) -> Self {
        self.volumes = volumes;
        self
    }

    pub fn cpu_limit(mut self, cpus: impl Into<String>) -> Self {
        self.cpu_limit = Some(cpus.into());
        self
    }

    pub fn memory_limit(mut self, memory: impl Into<String>) -> Self {
        self.memory_limit = Some(memory.into());
        self
    }

    pub fn pids_limit(mut self, pids: u32) -> Self {
        self.pids_limit = Some(pids);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Validate and normalize into an immutable profile
    pub fn build(self) -> Result<SecurityProfile> {
        let defaults = SecurityProfile::default();

        let cap_add = canonical_caps(self.cap_add)?;
        let requested_drop = canonical_caps(self.cap_drop.unwrap_or(defaults.cap_drop))?;

        // Add wins: anything explicitly added is removed from the drop list.
        let (overlap, cap_drop): (Vec<String>, Vec<String>) = requested_drop
            .into_iter()
            .partition(|cap| cap_add.contains(cap));
        if !overlap.is_empty() {
            debug!(
                "Capabilities {:?} are both added and dropped; keeping them added",
                overlap
            );
        }

        let cpu_limit = self.cpu_limit.unwrap_or(defaults.cpu_limit);
        validate_cpu_limit(&cpu_limit)?;

        let memory_limit = self.memory_limit.unwrap_or(defaults.memory_limit);
        validate_memory_limit(&memory_limit)?;

        let pids_limit = self.pids_limit.unwrap_or(defaults.pids_limit);
        if pids_limit == 0 {
            return Err(SandboxError::InvalidProfile(
                "pids limit must be greater than zero".to_string(),
            ));
        }

        for volume in &self.volumes {
            if volume.host_path.trim().is_empty() {
                return Err(SandboxError::InvalidProfile(format!(
                    "volume for '{}' has an empty host path",
                    volume.container_path
                )));
            }
            if !volume.container_path.starts_with('/') {
                return Err(SandboxError::InvalidProfile(format!(
                    "container path '{}' must be absolute",
                    volume.container_path
                )));
            }
        }

        if let Some(path) = &self.seccomp_profile {
            if path.as_os_str().is_empty() {
                return Err(SandboxError::InvalidProfile(
                    "seccomp profile path is empty".to_string(),
                ));
            }
        }

        Ok(SecurityProfile {
            cap_drop,
            cap_add,
            read_only_rootfs: self.read_only_rootfs,
            network_mode: self.network_mode,
            seccomp_profile: self.seccomp_profile,
            volumes: self.volumes,
            cpu_limit,
            memory_limit,
            pids_limit,
            user: self.user.filter(|u| !u.trim().is_empty()),
            group: self.group.filter(|g| !g.trim().is_empty()),
        })
    }
}

/// Upper-case, strip the `CAP_` prefix and drop duplicates, keeping order
fn canonical_caps(caps: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(caps.len());
    for cap in caps {
        let upper = cap.trim().to_uppercase();
        let name = upper.strip_prefix("CAP_").unwrap_or(&upper);
        if name.is_empty() {
            continue;
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SandboxError::InvalidProfile(format!(
                "invalid capability name '{}'",
                cap
            )));
        }
        if !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

fn validate_cpu_limit(cpus: &str) -> Result<()> {
    match cpus.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(()),
        _ => Err(SandboxError::InvalidProfile(format!(
            "cpu limit '{}' must be a positive number",
            cpus
        ))),
    }
}

fn validate_memory_limit(memory: &str) -> Result<()> {
    let memory = memory.trim();
    let digits_end = memory
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(memory.len());
    let (digits, unit) = memory.split_at(digits_end);

    let valid_unit = matches!(unit.to_lowercase().as_str(), "" | "b" | "k" | "m" | "g");
    let non_zero = digits.parse::<u64>().map(|n| n > 0).unwrap_or(false);

    if valid_unit && non_zero {
        Ok(())
    } else {
        Err(SandboxError::InvalidProfile(format!(
            "memory limit '{}' must look like 256m or 1g",
            memory
        )))
    }
}

/// Normalized description of one detached launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub pids_limit: u32,
    pub user: Option<String>,
    pub group: Option<String>,
    pub network_mode: NetworkMode,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub read_only_rootfs: bool,
    pub tmpfs: Vec<TmpfsMount>,
    pub volumes: Vec<VolumeMount>,
    pub seccomp_profile: Option<PathBuf>,
    pub labels: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(profile: &SecurityProfile, image: &str, host_port: u16, container_port: u16) -> Self {
        let tmpfs = SCRATCH_MOUNTS
            .iter()
            .map(|path| TmpfsMount {
                path: path.to_string(),
                options: SCRATCH_MOUNT_OPTIONS.to_string(),
            })
            .collect();

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        Self {
            image: image.to_string(),
            host_port,
            container_port,
            cpu_limit: profile.cpu_limit.clone(),
            memory_limit: profile.memory_limit.clone(),
            pids_limit: profile.pids_limit,
            user: profile.user.clone(),
            group: profile.group.clone(),
            network_mode: profile.network_mode,
            cap_drop: profile.cap_drop.clone(),
            cap_add: profile.cap_add.clone(),
            read_only_rootfs: profile.read_only_rootfs,
            tmpfs,
            volumes: profile.volumes.clone(),
            seccomp_profile: profile.seccomp_profile.clone(),
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_profile_drops_all() {
        let profile = SecurityProfile::builder().build().unwrap();
        assert_eq!(profile.cap_drop(), ["ALL".to_string()]);
        assert!(profile.cap_add().is_empty());
        assert_eq!(profile.network_mode(), NetworkMode::Bridge);
        assert_eq!(profile.pids_limit(), 100);
    }

    #[rstest]
    #[case(vec!["NET_ADMIN", "SYS_PTRACE"], vec!["net_admin"], vec!["SYS_PTRACE"])]
    #[case(vec!["CAP_CHOWN", "KILL"], vec!["chown", "KILL"], vec![])]
    #[case(vec!["ALL"], vec!["NET_BIND_SERVICE"], vec!["ALL"])]
    #[case(vec!["SETUID", "setuid"], vec![], vec!["SETUID"])]
    fn test_added_capabilities_never_dropped(
        #[case] drop: Vec<&str>,
        #[case] add: Vec<&str>,
        #[case] expected_drop: Vec<&str>,
    ) {
        let profile = SecurityProfile::builder()
            .cap_drop(drop)
            .cap_add(add)
            .build()
            .unwrap();

        assert_eq!(profile.cap_drop(), expected_drop.as_slice());
        for added in profile.cap_add() {
            assert!(!profile.cap_drop().contains(added));
        }
    }

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("two")]
    #[case("NaN")]
    fn test_invalid_cpu_limit_rejected(#[case] cpus: &str) {
        let result = SecurityProfile::builder().cpu_limit(cpus).build();
        assert!(matches!(result, Err(SandboxError::InvalidProfile(_))));
    }

    #[rstest]
    #[case("256m", true)]
    #[case("1g", true)]
    #[case("1048576", true)]
    #[case("512M", true)]
    #[case("0m", false)]
    #[case("m", false)]
    #[case("12x", false)]
    fn test_memory_limit_validation(#[case] memory: &str, #[case] ok: bool) {
        let result = SecurityProfile::builder().memory_limit(memory).build();
        assert_eq!(result.is_ok(), ok, "memory limit {}", memory);
    }

    #[test]
    fn test_relative_container_path_rejected() {
        let result = SecurityProfile::builder()
            .volume("/data", "data")
            .build();
        assert!(matches!(result, Err(SandboxError::InvalidProfile(_))));
    }

    #[test]
    fn test_zero_pids_rejected() {
        let result = SecurityProfile::builder().pids_limit(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_capability_name_rejected() {
        let result = SecurityProfile::builder().cap_add(["NET ADMIN"]).build();
        assert!(matches!(result, Err(SandboxError::InvalidProfile(_))));
    }

    #[test]
    fn test_launch_spec_keeps_scratch_mounts_under_read_only_root() {
        let profile = SecurityProfile::builder()
            .read_only_rootfs(true)
            .build()
            .unwrap();

        let spec = LaunchSpec::new(&profile, "sandbox-image", 8000, 8000);

        assert!(spec.read_only_rootfs);
        let paths: Vec<&str> = spec.tmpfs.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["/tmp", "/var/tmp", "/run"]);
        assert_eq!(spec.tmpfs[0].to_arg(), "/tmp:exec,mode=777");
        assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
    }

    #[test]
    fn test_network_mode_parsing() {
        assert_eq!("HOST".parse::<NetworkMode>().unwrap(), NetworkMode::Host);
        assert_eq!(" none ".parse::<NetworkMode>().unwrap(), NetworkMode::None);
        assert!("overlay".parse::<NetworkMode>().is_err());
    }

    #[test]
    fn test_blank_user_is_ignored() {
        let profile = SecurityProfile::builder().user("  ").group("1000").build().unwrap();
        assert_eq!(profile.user(), None);
        assert_eq!(profile.group(), Some("1000"));
    }

    #[test]
    fn test_deserialized_profile_goes_through_builder() {
        let profile: SecurityProfile = serde_json::from_str(
            r#"{"cap_drop":["ALL","NET_RAW"],"cap_add":["cap_net_raw"],"read_only_rootfs":true}"#,
        )
        .unwrap();

        assert_eq!(profile.cap_add(), ["NET_RAW".to_string()]);
        assert_eq!(profile.cap_drop(), ["ALL".to_string()]);
        assert!(profile.read_only_rootfs());
        assert_eq!(profile.pids_limit(), 100);
    }

    #[test]
    fn test_deserialized_zero_pids_rejected() {
        let result = serde_json::from_str::<SecurityProfile>(r#"{"pids_limit":0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialized_profile_reads_back() {
        let profile = SecurityProfile::builder()
            .cap_add(["CHOWN"])
            .network_mode(NetworkMode::None)
            .build()
            .unwrap();
        let json = serde_json::to_string(&profile).unwrap();
        let back: SecurityProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
