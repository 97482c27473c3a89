// ABOUTME: State machine for one request/response exchange with the execution service
// ABOUTME: Tracks connect attempts, activity and deadline clocks, and the aggregated response

use super::frame::InboundFrame;
use crate::types::{ErrorKind, ExecutionError, ExecutionResult, SessionState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One exchange. The deadline starts once the request has been sent.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    retry_count: u32,
    timeout: Duration,
    started_at: Instant,
    deadline: Option<Instant>,
    last_activity: Instant,
    fragments: Vec<String>,
    raw_frames: Vec<String>,
    complete: bool,
    heartbeats_sent: u32,
    failure: Option<ExecutionError>,
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Disconnected,
            retry_count: 0,
            timeout,
            started_at: now,
            deadline: None,
            last_activity: now,
            fragments: Vec::new(),
            raw_frames: Vec::new(),
            complete: false,
            heartbeats_sent: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connect attempts made so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn heartbeats_sent(&self) -> u32 {
        self.heartbeats_sent
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn raw_frames(&self) -> &[String] {
        &self.raw_frames
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn record_connect_attempt(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
        self.last_activity = Instant::now();
    }

    /// All request frames are out; start the receive clocks.
    /// A timeout too large to represent leaves the session without a deadline.
    pub fn mark_sent(&mut self) {
        let now = Instant::now();
        self.state = SessionState::Awaiting;
        self.started_at = now;
        self.deadline = now.checked_add(self.timeout);
        self.last_activity = now;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn heartbeat_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= interval
    }

    pub fn record_heartbeat(&mut self, now: Instant) {
        self.heartbeats_sent += 1;
        self.last_activity = now;
    }

    /// Control traffic from the peer counts as activity
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Longest wait that still lets the deadline and heartbeat checks run on time
    pub fn next_wait(&self, now: Instant, receive_wait: Duration, heartbeat_interval: Duration) -> Duration {
        let mut wait = receive_wait;

        let heartbeat_at = self.last_activity + heartbeat_interval;
        wait = wait.min(heartbeat_at.saturating_duration_since(now));

        if let Some(deadline) = self.deadline {
            wait = wait.min(deadline.saturating_duration_since(now));
        }

        wait
    }

    /// Apply one inbound payload; returns the fragment appended, if any
    pub fn on_payload(&mut self, raw: &str) -> Option<String> {
        if !self.state.is_receiving() {
            debug!("Ignoring payload in state {:?}", self.state);
            return None;
        }

        self.raw_frames.push(raw.to_string());
        self.last_activity = Instant::now();

        let frame = InboundFrame::decode(raw);
        if let InboundFrame::Opaque(_) = &frame {
            warn!("Undecodable frame kept as text: {}", raw);
        }

        let appended = frame.fragment().map(str::to_string);
        if let Some(fragment) = &appended {
            self.fragments.push(fragment.clone());
            self.state = SessionState::Streaming;
        }

        if frame.is_terminal() {
            self.complete = true;
            self.state = SessionState::Complete;
        }

        appended
    }

    pub fn time_out(&mut self) {
        warn!("Session timed out after {:?}", self.timeout);
        self.finish(
            SessionState::TimedOut,
            ErrorKind::Timeout,
            format!("no complete response within {}s", self.timeout.as_secs()),
        );
    }

    pub fn cancel(&mut self) {
        self.finish(
            SessionState::Cancelled,
            ErrorKind::Cancelled,
            "session cancelled".to_string(),
        );
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.finish(SessionState::Failed, kind, message.into());
    }

    fn finish(&mut self, state: SessionState, kind: ErrorKind, message: String) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.failure = Some(ExecutionError { kind, message });
    }

    pub fn into_result(self) -> ExecutionResult {
        let text = self.fragments.concat();

        if self.state == SessionState::Complete {
            return ExecutionResult::completed(text, self.raw_frames);
        }

        let error = self.failure.unwrap_or_else(|| ExecutionError {
            kind: ErrorKind::ConnectionClosed,
            message: format!("session ended in state {:?}", self.state),
        });

        let mut result = ExecutionResult::failure(error.kind, error.message);
        result.frames = self.raw_frames;
        result.partial = text;
        result.state = Some(self.state);
        result
    }
}
