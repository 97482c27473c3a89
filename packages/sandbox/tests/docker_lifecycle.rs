// ABOUTME: Lifecycle tests against a real Docker daemon
// ABOUTME: Ignored by default; run with `--ignored` on a host with Docker and a small public image

use sandcastle_sandbox::{
    ContainerRuntime, DockerCli, InstanceStatus, LifecycleConfig, LifecycleManager,
    SecurityProfile, SandboxError,
};
use std::sync::Arc;
use std::time::Duration;

const TEST_IMAGE: &str = "alpine:3.19";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start, inspect and stop a hardened container
///
/// This test verifies that:
/// 1. The launch arguments are accepted by a real daemon
/// 2. Inspect reports the read-only root and dropped capabilities
/// 3. Stop clears the tracked ID
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_hardened_instance_lifecycle() {
    let runtime = Arc::new(DockerCli::new());
    if !runtime.is_available().await {
        println!("Docker not available, skipping");
        return;
    }

    let profile = SecurityProfile::builder()
        .read_only_rootfs(true)
        .memory_limit("64m")
        .cpu_limit("0.5")
        .build()
        .unwrap();
    let config = LifecycleConfig {
        image: TEST_IMAGE.to_string(),
        host_port: free_port(),
        settle: Duration::from_millis(200),
        ..LifecycleConfig::default()
    };

    let mut lifecycle = LifecycleManager::new(runtime.clone(), config, profile);
    assert!(lifecycle.launch_spec().read_only_rootfs);

    let started = match lifecycle.start().await {
        Ok(instance) => instance,
        Err(e) => panic!("start failed: {} / stderr: {:?}", e, e.stderr()),
    };
    assert_eq!(started.status, InstanceStatus::Running);

    if let Some(details) = lifecycle.inspect().await.unwrap() {
        assert!(details.read_only_rootfs);
        assert!(details.caps_dropped.iter().any(|c| c.contains("ALL")));
    }

    lifecycle.stop().await.unwrap();
    assert!(lifecycle.instance().instance_id.is_none());
}

/// A missing image surfaces the daemon's stderr as a provisioning error
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_start_with_missing_image_reports_stderr() {
    let runtime = Arc::new(DockerCli::new());
    if !runtime.is_available().await {
        println!("Docker not available, skipping");
        return;
    }

    let config = LifecycleConfig {
        image: "sandcastle-test/does-not-exist:never".to_string(),
        host_port: free_port(),
        settle: Duration::ZERO,
        ..LifecycleConfig::default()
    };
    let mut lifecycle = LifecycleManager::new(runtime, config, SecurityProfile::default());

    let err = lifecycle.start().await.unwrap_err();
    assert!(matches!(err, SandboxError::Provisioning { .. }));
    assert!(!err.stderr().unwrap_or_default().is_empty());
    assert_eq!(lifecycle.instance().status, InstanceStatus::Error);
}

/// Build a throwaway image from a generated Dockerfile
#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_build_image_from_context() {
    let runtime = Arc::new(DockerCli::new());
    if !runtime.is_available().await {
        println!("Docker not available, skipping");
        return;
    }

    let context = tempfile::tempdir().unwrap();
    let dockerfile = context.path().join("Dockerfile");
    std::fs::write(&dockerfile, format!("FROM {}\nCMD [\"true\"]\n", TEST_IMAGE)).unwrap();

    let config = LifecycleConfig {
        image: "sandcastle-test/build:latest".to_string(),
        dockerfile,
        ..LifecycleConfig::default()
    };
    let mut lifecycle = LifecycleManager::new(runtime, config, SecurityProfile::default());

    assert!(lifecycle.ensure_image(true).await.unwrap());
    assert!(lifecycle.image_exists().await.unwrap());
    assert!(!lifecycle.ensure_image(false).await.unwrap());
}
