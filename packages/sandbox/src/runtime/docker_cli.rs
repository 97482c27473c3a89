// ABOUTME: Docker CLI implementation of the container runtime
// ABOUTME: Shells out to the docker binary and surfaces non-zero exits with captured stderr

use super::{ContainerRuntime, InstanceFilter};
use crate::profile::LaunchSpec;
use crate::types::{BuildReport, InstanceDetails};
use crate::{Result, SandboxError};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runtime backed by the `docker` command line tool
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary(sandcastle_config::constants::DEFAULT_DOCKER_BIN)
    }

    /// Use a specific docker-compatible binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments for `docker build`
    pub fn build_args(image: &str, dockerfile: &Path, context: &Path) -> Vec<String> {
        vec![
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ]
    }

    /// Arguments for `docker ps` restricted to running containers
    pub fn ps_args(filter: &InstanceFilter) -> Vec<String> {
        let selector = match filter {
            InstanceFilter::Id(id) => format!("id={}", id),
            InstanceFilter::Ancestor(image) => format!("ancestor={}", image),
        };
        vec![
            "ps".to_string(),
            "-q".to_string(),
            "-f".to_string(),
            selector,
            "-f".to_string(),
            "status=running".to_string(),
        ]
    }

    /// Arguments for a detached `docker run`.
    ///
    /// Capability drops come before adds so an explicit add always wins, and
    /// the scratch tmpfs mounts are present whether or not the root is read-only.
    pub fn run_args(spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-p".to_string(),
            format!("{}:{}", spec.host_port, spec.container_port),
            "--cpus".to_string(),
            spec.cpu_limit.clone(),
            "--memory".to_string(),
            spec.memory_limit.clone(),
            format!("--pids-limit={}", spec.pids_limit),
        ];

        if let Some(user) = &spec.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        if let Some(group) = &spec.group {
            args.push("--group-add".to_string());
            args.push(group.clone());
        }

        args.push("--network".to_string());
        args.push(spec.network_mode.to_string());

        for cap in &spec.cap_drop {
            args.push("--cap-drop".to_string());
            args.push(cap.clone());
        }
        for cap in &spec.cap_add {
            args.push("--cap-add".to_string());
            args.push(cap.clone());
        }

        if spec.read_only_rootfs {
            args.push("--read-only".to_string());
        }

        for mount in &spec.tmpfs {
            args.push("--tmpfs".to_string());
            args.push(mount.to_arg());
        }

        for volume in &spec.volumes {
            args.push("-v".to_string());
            args.push(volume.to_bind());
        }

        if let Some(seccomp) = &spec.seccomp_profile {
            args.push("--security-opt".to_string());
            args.push(format!("seccomp={}", seccomp.display()));
        }

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args
    }

    /// Run the binary with `args`, capturing output; spawn failures map to
    /// `RuntimeUnavailable`
    async fn exec(&self, args: &[String]) -> Result<Output> {
        debug!("Running command: {} {}", self.binary, args.join(" "));

        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SandboxError::RuntimeUnavailable(format!("failed to execute {}: {}", self.binary, e))
            })
    }

    /// Like `exec`, but a non-zero exit becomes `CommandFailed`
    async fn exec_checked(&self, args: &[String]) -> Result<Output> {
        let output = self.exec(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(SandboxError::CommandFailed {
                command: format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or("")),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_available(&self) -> bool {
        match self.exec(&["info".to_string()]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("Docker not available: {}", e);
                false
            }
        }
    }

    async fn build_image(
        &self,
        image: &str,
        dockerfile: &Path,
        context: &Path,
    ) -> Result<BuildReport> {
        let args = Self::build_args(image, dockerfile, context);
        info!("Running command: {} {}", self.binary, args.join(" "));

        let output = self.exec_checked(&args).await?;

        let mut log = String::from_utf8_lossy(&output.stdout).to_string();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!("Build output: {}", log);

        Ok(BuildReport {
            image: image.to_string(),
            log,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let args = vec!["images".to_string(), "-q".to_string(), image.to_string()];
        let output = self.exec_checked(&args).await?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn find_running(&self, filter: &InstanceFilter) -> Result<Vec<String>> {
        let output = self.exec_checked(&Self::ps_args(filter)).await?;
        Ok(parse_id_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn run_detached(&self, spec: &LaunchSpec) -> Result<String> {
        let args = Self::run_args(spec);
        info!("Starting instance: {} {}", self.binary, args.join(" "));

        let output = self.exec_checked(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        // `docker run -d` prints the full ID last, after any pull progress.
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| SandboxError::UnexpectedOutput("docker run printed no container ID".to_string()))
    }

    async fn stop(&self, instance_id: &str) -> Result<()> {
        let args = vec!["stop".to_string(), instance_id.to_string()];
        self.exec_checked(&args).await?;
        Ok(())
    }

    async fn inspect(&self, instance_id: &str) -> Result<Option<InstanceDetails>> {
        let args = vec!["inspect".to_string(), instance_id.to_string()];
        match self.exec_checked(&args).await {
            Ok(output) => parse_inspect(&String::from_utf8_lossy(&output.stdout)),
            Err(SandboxError::CommandFailed { ref stderr, .. }) if is_missing_object(stderr) => {
                debug!("Instance {} no longer exists", instance_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_id_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_missing_object(stderr: &str) -> bool {
    stderr.contains("No such object") || stderr.contains("No such container")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    state: InspectState,
    #[serde(default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    started_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    readonly_rootfs: bool,
    #[serde(default)]
    network_mode: String,
    cap_drop: Option<Vec<String>>,
}

/// Parse `docker inspect` JSON output (an array with one record)
fn parse_inspect(stdout: &str) -> Result<Option<InstanceDetails>> {
    let records: Vec<InspectRecord> = serde_json::from_str(stdout)?;
    let Some(record) = records.into_iter().next() else {
        return Ok(None);
    };

    // Never-started containers report the zero time (year 1).
    let started_at = record
        .state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|dt| dt.year() > 1);

    Ok(Some(InstanceDetails {
        short_id: record.id.chars().take(12).collect(),
        id: record.id,
        status: record.state.status,
        running: record.state.running,
        started_at,
        read_only_rootfs: record.host_config.readonly_rootfs,
        network_mode: record.host_config.network_mode,
        caps_dropped: record.host_config.cap_drop.unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{NetworkMode, SecurityProfile};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_run_args_full_profile() {
        let profile = SecurityProfile::builder()
            .cpu_limit("0.5")
            .memory_limit("256m")
            .pids_limit(64)
            .user("1000")
            .group("1000")
            .network_mode(NetworkMode::None)
            .cap_drop(["ALL"])
            .cap_add(["NET_BIND_SERVICE"])
            .read_only_rootfs(true)
            .volume("/srv/data", "/data")
            .seccomp_profile("/etc/sandcastle/seccomp.json")
            .build()
            .unwrap();

        let spec = LaunchSpec::new(&profile, "sandbox-image", 8001, 8000);

        assert_eq!(
            DockerCli::run_args(&spec),
            strings(&[
                "run",
                "-d",
                "-p",
                "8001:8000",
                "--cpus",
                "0.5",
                "--memory",
                "256m",
                "--pids-limit=64",
                "--user",
                "1000",
                "--group-add",
                "1000",
                "--network",
                "none",
                "--cap-drop",
                "ALL",
                "--cap-add",
                "NET_BIND_SERVICE",
                "--read-only",
                "--tmpfs",
                "/tmp:exec,mode=777",
                "--tmpfs",
                "/var/tmp:exec,mode=777",
                "--tmpfs",
                "/run:exec,mode=777",
                "-v",
                "/srv/data:/data",
                "--security-opt",
                "seccomp=/etc/sandcastle/seccomp.json",
                "--label",
                "sandcastle.managed=true",
                "sandbox-image",
            ])
        );
    }

    #[test]
    fn test_run_args_default_profile_has_tmpfs_without_read_only() {
        let profile = SecurityProfile::default();
        let args = DockerCli::run_args(&LaunchSpec::new(&profile, "img", 8000, 8000));

        assert!(!args.contains(&"--read-only".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "--tmpfs").count(), 3);
        assert!(!args.contains(&"--user".to_string()));
        assert!(!args.contains(&"--security-opt".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("img"));
    }

    #[test]
    fn test_ps_args_filters() {
        assert_eq!(
            DockerCli::ps_args(&InstanceFilter::Id("abc".to_string())),
            strings(&["ps", "-q", "-f", "id=abc", "-f", "status=running"])
        );
        assert_eq!(
            DockerCli::ps_args(&InstanceFilter::Ancestor("sandbox-image".to_string())),
            strings(&["ps", "-q", "-f", "ancestor=sandbox-image", "-f", "status=running"])
        );
    }

    #[test]
    fn test_build_args() {
        let args = DockerCli::build_args(
            "sandbox-image",
            &PathBuf::from("/work/Dockerfile"),
            &PathBuf::from("/work"),
        );
        assert_eq!(
            args,
            strings(&["build", "-t", "sandbox-image", "-f", "/work/Dockerfile", "/work"])
        );
    }

    #[test]
    fn test_parse_id_lines_skips_blanks() {
        assert_eq!(parse_id_lines("abc\n\n def \n"), strings(&["abc", "def"]));
        assert!(parse_id_lines("\n").is_empty());
    }

    #[test]
    fn test_parse_inspect_running_instance() {
        let json = r#"[{
            "Id": "0123456789abcdef0123",
            "State": {"Status": "running", "Running": true, "StartedAt": "2024-05-01T12:00:00.123456789Z"},
            "HostConfig": {"ReadonlyRootfs": true, "NetworkMode": "bridge", "CapDrop": ["ALL"]}
        }]"#;

        let details = parse_inspect(json).unwrap().unwrap();

        assert_eq!(details.short_id, "0123456789ab");
        assert!(details.running);
        assert_eq!(details.status, "running");
        assert!(details.read_only_rootfs);
        assert_eq!(details.caps_dropped, strings(&["ALL"]));
        assert_eq!(
            details.started_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T12:00:00.123456789+00:00".to_string())
        );
    }

    #[test]
    fn test_parse_inspect_never_started() {
        let json = r#"[{
            "Id": "abc",
            "State": {"Status": "created", "Running": false, "StartedAt": "0001-01-01T00:00:00Z"},
            "HostConfig": {"CapDrop": null}
        }]"#;

        let details = parse_inspect(json).unwrap().unwrap();
        assert!(details.started_at.is_none());
        assert!(details.caps_dropped.is_empty());
        assert_eq!(parse_inspect("[]").unwrap(), None);
    }

    #[test]
    fn test_missing_object_detection() {
        assert!(is_missing_object("Error: No such object: deadbeef\n"));
        assert!(!is_missing_object("permission denied"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let cli = DockerCli::with_binary("sandcastle-definitely-not-a-binary");

        assert!(!cli.is_available().await);
        let err = cli.image_exists("sandbox-image").await.unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
    }
}
