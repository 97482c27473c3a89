// ABOUTME: Session client for the sandboxed execution service
// ABOUTME: Connects with bounded retries, sends a request and drives the receive loop to a terminal state

use super::frame::request_frames;
use super::session::Session;
use super::transport::{Channel, ChannelEvent, Connector, TransportError, WebSocketConnector};
use crate::types::{ErrorKind, ExecutionResult};
use sandcastle_config::constants;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Connection and timing parameters for sessions
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Total connect attempts, at least 1
    pub max_retries: u32,
    /// Base backoff; attempt k waits `retry_delay * k` before attempt k+1
    pub retry_delay: Duration,
    /// Receive deadline, counted from when the request has been sent
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
    pub receive_wait: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    /// Log every frame in both directions
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_port(constants::DEFAULT_HOST_PORT)
    }
}

impl ClientConfig {
    pub fn for_port(port: u16) -> Self {
        Self {
            endpoint: endpoint_for_port(port),
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(constants::DEFAULT_RETRY_DELAY_SECS),
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(constants::HEARTBEAT_INTERVAL_SECS),
            receive_wait: Duration::from_secs(constants::RECEIVE_WAIT_SECS),
            connect_timeout: Duration::from_secs(constants::CONNECT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(constants::PROBE_TIMEOUT_SECS),
            debug: false,
        }
    }

    /// Same settings pointed at another host port
    pub fn with_port(&self, port: u16) -> Self {
        self.with_endpoint(endpoint_for_port(port))
    }

    /// Same settings pointed at another endpoint
    pub fn with_endpoint(&self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self.clone()
        }
    }
}

pub fn endpoint_for_port(port: u16) -> String {
    format!("ws://localhost:{}/", port)
}

/// Linear backoff after failed attempt `attempt`, saturating instead of overflowing
fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay.saturating_mul(attempt)
}

/// Cancellation signal shared with the caller; `true` means cancel
struct CancelSignal(Option<watch::Receiver<bool>>);

impl CancelSignal {
    fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; never resolves without a signal
    async fn cancelled(&mut self) {
        if let Some(rx) = self.0.as_mut() {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        std::future::pending::<()>().await
    }
}

/// Runs sessions against one endpoint. Each session owns its own channel.
#[derive(Clone)]
pub struct SessionClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a channel, retrying with linear backoff.
    ///
    /// Returns `None` once all attempts are used; the session is then `Failed`.
    pub async fn connect(&self, session: &mut Session) -> Option<Box<dyn Channel>> {
        self.connect_with(session, &mut CancelSignal(None)).await
    }

    async fn connect_with(
        &self,
        session: &mut Session,
        cancel: &mut CancelSignal,
    ) -> Option<Box<dyn Channel>> {
        let max = self.config.max_retries.max(1);

        loop {
            let attempt = session.record_connect_attempt();
            info!(
                "Connecting to {} (attempt {}/{})",
                self.config.endpoint, attempt, max
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    session.cancel();
                    return None;
                }
                outcome = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.connector.connect(&self.config.endpoint),
                ) => outcome,
            };

            let reason = match outcome {
                Ok(Ok(channel)) => {
                    info!("Connected to {}", self.config.endpoint);
                    session.mark_connected();
                    return Some(channel);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no handshake within {:?}", self.config.connect_timeout),
            };
            error!("Connection attempt {} failed: {}", attempt, reason);

            if attempt >= max {
                error!("Giving up on {} after {} attempts", self.config.endpoint, max);
                session.fail(
                    ErrorKind::Connection,
                    format!(
                        "could not connect to {} after {} attempts: {}",
                        self.config.endpoint, max, reason
                    ),
                );
                return None;
            }

            let backoff = backoff_delay(self.config.retry_delay, attempt);
            info!("Retrying in {:?}", backoff);
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.cancel();
                    return None;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Run one request to completion and collect the response
    pub async fn execute(&self, text: &str) -> ExecutionResult {
        self.execute_streaming(text, None, None).await
    }

    /// Like `execute`, forwarding each fragment to `fragments` as it arrives and
    /// stopping early when `cancel` turns `true`
    pub async fn execute_streaming(
        &self,
        text: &str,
        fragments: Option<mpsc::UnboundedSender<String>>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ExecutionResult {
        let mut session = Session::new(self.config.timeout);
        let mut cancel = CancelSignal(cancel);

        if cancel.is_cancelled() {
            session.cancel();
            return session.into_result();
        }

        let Some(mut channel) = self.connect_with(&mut session, &mut cancel).await else {
            return session.into_result();
        };

        if self.send(channel.as_mut(), &mut session, text).await {
            self.receive(channel.as_mut(), &mut session, fragments.as_ref(), &mut cancel)
                .await;
        }

        self.close(channel.as_mut(), &session).await;
        session.into_result()
    }

    /// Transmit the four request frames; `false` if the channel failed
    async fn send(&self, channel: &mut dyn Channel, session: &mut Session, text: &str) -> bool {
        for frame in request_frames(text) {
            let payload = match frame.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    session.fail(ErrorKind::MalformedChannel, format!("failed to encode frame: {}", e));
                    return false;
                }
            };

            if self.config.debug {
                debug!("Sending frame: {}", payload);
            }

            if let Err(e) = channel.send_text(payload).await {
                error!("Channel closed while sending request: {}", e);
                session.fail(
                    ErrorKind::ConnectionClosed,
                    format!("channel closed while sending request: {}", e),
                );
                return false;
            }
        }

        session.mark_sent();
        true
    }

    async fn receive(
        &self,
        channel: &mut dyn Channel,
        session: &mut Session,
        fragments: Option<&mpsc::UnboundedSender<String>>,
        cancel: &mut CancelSignal,
    ) {
        let heartbeat = self.config.heartbeat_interval;

        while session.state().is_receiving() {
            let now = Instant::now();

            if session.is_expired(now) {
                session.time_out();
                break;
            }

            if session.heartbeat_due(now, heartbeat) {
                debug!("Sending heartbeat");
                if let Err(e) = channel.ping().await {
                    error!("Heartbeat failed: {}", e);
                    session.fail(ErrorKind::ConnectionClosed, format!("heartbeat failed: {}", e));
                    break;
                }
                session.record_heartbeat(now);
            }

            let wait = session.next_wait(now, self.config.receive_wait, heartbeat);

            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session cancelled");
                    session.cancel();
                    break;
                }
                event = tokio::time::timeout(wait, channel.next_event()) => event,
            };

            match event {
                // Wait expired without traffic; re-check the clocks.
                Err(_) => continue,
                Ok(Ok(ChannelEvent::Payload(payload))) => {
                    if self.config.debug {
                        debug!("Received frame: {}", payload);
                    }
                    if let Some(fragment) = session.on_payload(&payload) {
                        if let Some(sink) = fragments {
                            let _ = sink.send(fragment);
                        }
                    }
                }
                Ok(Ok(ChannelEvent::Control)) => session.touch(Instant::now()),
                Ok(Ok(ChannelEvent::Closed)) | Ok(Err(TransportError::Closed)) => {
                    error!("Channel closed by peer");
                    session.fail(ErrorKind::ConnectionClosed, "channel closed by peer");
                }
                Ok(Err(e)) => {
                    error!("Error while receiving: {}", e);
                    session.fail(ErrorKind::MalformedChannel, e.to_string());
                }
            }
        }
    }

    /// Close a channel whose session has ended
    async fn close(&self, channel: &mut dyn Channel, session: &Session) {
        if !session.state().is_terminal() {
            return;
        }

        match tokio::time::timeout(self.config.connect_timeout, channel.close()).await {
            Ok(Ok(())) => debug!("Channel closed"),
            Ok(Err(e)) => warn!("Error closing channel: {}", e),
            Err(_) => warn!("Timed out closing channel"),
        }
    }

    /// Probe the endpoint once with a short timeout
    pub async fn check_available(&self) -> bool {
        match tokio::time::timeout(
            self.config.probe_timeout,
            self.connector.connect(&self.config.endpoint),
        )
        .await
        {
            Ok(Ok(mut channel)) => {
                if let Err(e) = channel.close().await {
                    debug!("Error closing probe channel: {}", e);
                }
                debug!("{} is available", self.config.endpoint);
                true
            }
            Ok(Err(e)) => {
                debug!("{} is not available: {}", self.config.endpoint, e);
                false
            }
            Err(_) => {
                debug!("{} did not answer within {:?}", self.config.endpoint, self.config.probe_timeout);
                false
            }
        }
    }
}
