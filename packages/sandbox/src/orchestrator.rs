// ABOUTME: Orchestrates provisioning and execution sessions behind a single execute call
// ABOUTME: Serializes lifecycle access and turns every failure into a structured result

use crate::lifecycle::LifecycleManager;
use crate::protocol::{ClientConfig, Connector, SessionClient, WebSocketConnector};
use crate::runtime::DockerCli;
use crate::settings::SandboxSettings;
use crate::types::{
    ErrorKind, ExecutionResult, InstanceStatus, InstanceStatusReport, SandboxInstance,
};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

pub struct SandboxOrchestrator {
    /// Held across discover+start so concurrent callers provision at most once
    lifecycle: Mutex<LifecycleManager>,
    client_config: ClientConfig,
    connector: Arc<dyn Connector>,
}

impl SandboxOrchestrator {
    pub fn new(lifecycle: LifecycleManager, client_config: ClientConfig) -> Self {
        Self::with_connector(lifecycle, client_config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(
        lifecycle: LifecycleManager,
        client_config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            lifecycle: Mutex::new(lifecycle),
            client_config,
            connector,
        }
    }

    /// Docker-backed orchestrator configured from `settings`
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self> {
        let profile = settings.security_profile()?;
        let runtime = Arc::new(DockerCli::with_binary(settings.docker_bin.clone()));
        let lifecycle = LifecycleManager::new(runtime, settings.lifecycle_config(), profile);
        Ok(Self::new(lifecycle, settings.client_config()))
    }

    /// Reuse a running instance or start one. One start attempt per call.
    async fn ensure_running(&self) -> Result<SandboxInstance> {
        let mut lifecycle = self.lifecycle.lock().await;

        match lifecycle.discover().await {
            Ok(Some(instance)) => return Ok(instance),
            Ok(None) => info!("No running instance found, starting one"),
            Err(e) => warn!("Instance discovery failed, starting a new one: {}", e),
        }

        lifecycle.start().await
    }

    pub async fn execute(&self, text: &str) -> ExecutionResult {
        self.execute_with(text, None, None).await
    }

    /// Execute with live fragment forwarding and cancellation
    pub async fn execute_with(
        &self,
        text: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ExecutionResult {
        let instance = match self.ensure_running().await {
            Ok(instance) => instance,
            Err(e) => {
                error!("Provisioning failed: {}", e);
                let mut result = ExecutionResult::failure(ErrorKind::Provisioning, e.to_string());
                result.stderr = e.stderr().map(str::to_string);
                return result;
            }
        };

        let client = SessionClient::with_connector(
            self.client_config.with_endpoint(instance.endpoint()),
            self.connector.clone(),
        );
        client.execute_streaming(text, fragments, cancel).await
    }

    /// Build the image; `false` on failure (the error is logged)
    pub async fn build_image(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.build_image().await {
            Ok(_) => true,
            Err(e) => {
                error!("Image build failed: {}", e);
                if let Some(stderr) = e.stderr().filter(|s| !s.is_empty()) {
                    error!("Build output: {}", stderr);
                }
                false
            }
        }
    }

    /// Whether the container tool answers at all
    pub async fn is_runtime_available(&self) -> bool {
        self.lifecycle.lock().await.is_runtime_available().await
    }

    pub async fn ensure_image(&self, force: bool) -> Result<bool> {
        self.lifecycle.lock().await.ensure_image(force).await
    }

    /// Status summary for monitoring layers
    pub async fn instance_status(&self) -> InstanceStatusReport {
        let lifecycle = self.lifecycle.lock().await;
        match lifecycle.inspect().await {
            Ok(Some(details)) => InstanceStatusReport {
                status: details.status,
                id: details.short_id,
                started_at: details.started_at,
            },
            Ok(None) => InstanceStatusReport::stopped(),
            Err(e) => {
                warn!("Failed to inspect instance: {}", e);
                InstanceStatusReport {
                    status: InstanceStatus::Error.to_string(),
                    id: lifecycle
                        .instance()
                        .instance_id
                        .clone()
                        .unwrap_or_else(|| "-".to_string()),
                    started_at: None,
                }
            }
        }
    }

    /// Pick up an instance started by an earlier process
    pub async fn discover(&self) -> Result<Option<SandboxInstance>> {
        self.lifecycle.lock().await.discover().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.lifecycle.lock().await.stop().await
    }

    /// Probe the execution service on the configured port
    pub async fn check_available(&self) -> bool {
        SessionClient::with_connector(self.client_config.clone(), self.connector.clone())
            .check_available()
            .await
    }

    pub async fn instance(&self) -> SandboxInstance {
        self.lifecycle.lock().await.instance().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::profile::SecurityProfile;
    use crate::protocol::{Channel, ChannelEvent, TransportError};
    use crate::runtime::mock::MockRuntime;
    use crate::types::{InstanceDetails, SessionState};
    use crate::SandboxError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted events, then stays silent
    struct ScriptedChannel {
        events: VecDeque<ChannelEvent>,
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        async fn send_text(&mut self, _text: String) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn next_event(&mut self) -> std::result::Result<ChannelEvent, TransportError> {
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    struct ScriptedConnector {
        payloads: Vec<&'static str>,
        connects: AtomicUsize,
        endpoints: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn new(payloads: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                payloads,
                connects: AtomicUsize::new(0),
                endpoints: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            endpoint: &str,
        ) -> std::result::Result<Box<dyn Channel>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.endpoints.lock().unwrap().push(endpoint.to_string());
            Ok(Box::new(ScriptedChannel {
                events: self
                    .payloads
                    .iter()
                    .map(|p| ChannelEvent::Payload(p.to_string()))
                    .collect(),
            }))
        }
    }

    fn orchestrator(runtime: MockRuntime, connector: Arc<ScriptedConnector>) -> SandboxOrchestrator {
        orchestrator_on_port(runtime, connector, 8000)
    }

    fn orchestrator_on_port(
        runtime: MockRuntime,
        connector: Arc<ScriptedConnector>,
        host_port: u16,
    ) -> SandboxOrchestrator {
        let config = LifecycleConfig {
            settle: Duration::ZERO,
            host_port,
            ..LifecycleConfig::default()
        };
        let lifecycle = LifecycleManager::new(Arc::new(runtime), config, SecurityProfile::default());
        SandboxOrchestrator::with_connector(lifecycle, ClientConfig::default(), connector)
    }

    /// A discovered instance is reused without starting a new one
    #[tokio::test]
    async fn test_execute_reuses_discovered_instance() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_find_running()
            .times(1)
            .returning(|_| Ok(vec!["running123".to_string()]));
        runtime.expect_run_detached().never();

        let connector = ScriptedConnector::new(vec![
            r#"{"start":true}"#,
            r#"{"content":"a"}"#,
            r#"{"content":"b"}"#,
            r#"{"status":"complete"}"#,
        ]);
        let orchestrator = orchestrator(runtime, connector.clone());

        let result = orchestrator.execute("hello").await;

        assert!(result.success);
        assert_eq!(result.stdout, "ab");
        assert_eq!(result.state, Some(SessionState::Complete));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator.instance().await.instance_id.as_deref(),
            Some("running123")
        );
    }

    #[tokio::test]
    async fn test_execute_starts_when_nothing_running() {
        let mut runtime = MockRuntime::new();
        runtime.expect_find_running().returning(|_| Ok(Vec::new()));
        runtime
            .expect_run_detached()
            .times(1)
            .returning(|_| Ok("fresh".to_string()));

        let connector = ScriptedConnector::new(vec![r#"{"content":"ok","end":true}"#]);
        let orchestrator = orchestrator(runtime, connector);

        let result = orchestrator.execute("hello").await;
        assert!(result.success);
        assert_eq!(result.stdout, "ok");
    }

    /// Sessions go to the endpoint of the started instance
    #[tokio::test]
    async fn test_execute_connects_to_instance_endpoint() {
        let mut runtime = MockRuntime::new();
        runtime.expect_find_running().returning(|_| Ok(Vec::new()));
        runtime
            .expect_run_detached()
            .times(1)
            .returning(|_| Ok("fresh".to_string()));

        let connector = ScriptedConnector::new(vec![r#"{"end":true}"#]);
        let orchestrator = orchestrator_on_port(runtime, connector.clone(), 8123);

        assert!(orchestrator.execute("hello").await.success);
        assert_eq!(
            *connector.endpoints.lock().unwrap(),
            vec!["ws://localhost:8123/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_runtime_availability() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_available().times(1).returning(|| false);

        let orchestrator = orchestrator(runtime, ScriptedConnector::new(Vec::new()));
        assert!(!orchestrator.is_runtime_available().await);
    }

    /// Provisioning failure is reported without opening a session
    #[tokio::test]
    async fn test_provisioning_failure_short_circuits() {
        let mut runtime = MockRuntime::new();
        runtime.expect_find_running().returning(|_| Ok(Vec::new()));
        runtime.expect_run_detached().times(1).returning(|_| {
            Err(SandboxError::CommandFailed {
                command: "docker run".to_string(),
                code: Some(125),
                stderr: "Unable to find image 'sandbox-image:latest' locally".to_string(),
            })
        });

        let connector = ScriptedConnector::new(Vec::new());
        let orchestrator = orchestrator(runtime, connector.clone());

        let result = orchestrator.execute("hello").await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Provisioning));
        assert_eq!(
            result.stderr.as_deref(),
            Some("Unable to find image 'sandbox-image:latest' locally")
        );
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.instance().await.status, InstanceStatus::Error);
    }

    /// Concurrent callers share one provisioning attempt
    #[tokio::test]
    async fn test_concurrent_execute_starts_once() {
        let started = Arc::new(std::sync::Mutex::new(None::<String>));
        let mut runtime = MockRuntime::new();
        let seen = started.clone();
        runtime.expect_find_running().returning(move |_| {
            Ok(seen.lock().unwrap().clone().into_iter().collect())
        });
        let record = started.clone();
        runtime.expect_run_detached().times(1).returning(move |_| {
            *record.lock().unwrap() = Some("only".to_string());
            Ok("only".to_string())
        });

        let connector = ScriptedConnector::new(vec![r#"{"end":true}"#]);
        let orchestrator = Arc::new(orchestrator(runtime, connector));

        let (a, b) = tokio::join!(orchestrator.execute("one"), orchestrator.execute("two"));
        assert!(a.success && b.success);
    }

    #[tokio::test]
    async fn test_build_image_reports_bool() {
        let mut runtime = MockRuntime::new();
        runtime.expect_build_image().times(1).returning(|_, _, _| {
            Err(SandboxError::CommandFailed {
                command: "docker build".to_string(),
                code: Some(1),
                stderr: "no such file: Dockerfile".to_string(),
            })
        });

        let orchestrator = orchestrator(runtime, ScriptedConnector::new(Vec::new()));
        assert!(!orchestrator.build_image().await);
    }

    #[tokio::test]
    async fn test_instance_status_without_instance() {
        let mut runtime = MockRuntime::new();
        runtime.expect_inspect().never();

        let orchestrator = orchestrator(runtime, ScriptedConnector::new(Vec::new()));
        let report = orchestrator.instance_status().await;

        assert_eq!(report.status, "stopped");
        assert_eq!(report.id, "-");
        assert!(report.started_at.is_none());
    }

    #[tokio::test]
    async fn test_instance_status_running() {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut runtime = MockRuntime::new();
        runtime
            .expect_find_running()
            .returning(|_| Ok(vec!["0123456789abcdef".to_string()]));
        runtime.expect_inspect().returning(move |id| {
            Ok(Some(InstanceDetails {
                id: id.to_string(),
                short_id: id.chars().take(12).collect(),
                status: "running".to_string(),
                running: true,
                started_at: Some(started),
                read_only_rootfs: false,
                network_mode: "bridge".to_string(),
                caps_dropped: vec!["ALL".to_string()],
            }))
        });

        let orchestrator = orchestrator(runtime, ScriptedConnector::new(Vec::new()));
        orchestrator.lifecycle.lock().await.discover().await.unwrap();

        let report = orchestrator.instance_status().await;
        assert_eq!(report.status, "running");
        assert_eq!(report.id, "0123456789ab");
        assert_eq!(report.started_at, Some(started));
    }
}
