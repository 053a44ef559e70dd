//! In-memory doubles for the relay's seams, shared by the unit tests.

use crate::call::analysis::{CallAnalysis, CallAnalyzer};
use crate::error::{AppError, AppResult};
use crate::relay::client::{ChannelClientSource, ClientSink};
use crate::relay::protocol::{ClientInbound, ClientOutbound, UpstreamCommand, UpstreamEvent};
use crate::relay::session_config::SessionConfig;
use crate::relay::upstream::{UpstreamConnection, UpstreamConnector, UpstreamSink, UpstreamSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn client_pair() -> (mpsc::UnboundedSender<ClientInbound>, ChannelClientSource) {
    ChannelClientSource::new()
}

/// Client sink that keeps everything it was sent.
#[derive(Debug)]
pub struct RecordingClient {
    sent: Mutex<Vec<ClientOutbound>>,
    writable: AtomicBool,
    closed: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            writable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<ClientOutbound> {
        self.sent.lock().unwrap().clone()
    }

    /// Simulate the browser going away without a close handshake.
    pub fn disconnect(&self) {
        self.writable.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientSink for RecordingClient {
    async fn send(&self, message: ClientOutbound) -> AppResult<()> {
        if !self.is_writable() {
            return Err(AppError::Internal("client connection is gone".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct FakeUpstreamState {
    sent: Mutex<Vec<UpstreamCommand>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// Test-side controls of a fake upstream connection.
#[derive(Debug)]
pub struct FakeUpstreamHandle {
    events: Mutex<Option<mpsc::UnboundedSender<AppResult<UpstreamEvent>>>>,
    state: Arc<FakeUpstreamState>,
}

impl FakeUpstreamHandle {
    pub fn push(&self, event: UpstreamEvent) {
        self.emit(Ok(event));
    }

    pub fn push_failure(&self, error: AppError) {
        self.emit(Err(error));
    }

    /// Close the event stream, as a clean upstream hang-up would.
    pub fn finish(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<UpstreamCommand> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.state.fail_sends.store(true, Ordering::SeqCst);
    }

    fn emit(&self, event: AppResult<UpstreamEvent>) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

struct FakeUpstreamSink {
    state: Arc<FakeUpstreamState>,
}

#[async_trait]
impl UpstreamSink for FakeUpstreamSink {
    async fn send(&mut self, command: UpstreamCommand) -> AppResult<()> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable("connection reset".to_string()));
        }
        self.state.sent.lock().unwrap().push(command);
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeUpstreamSource {
    events: mpsc::UnboundedReceiver<AppResult<UpstreamEvent>>,
}

#[async_trait]
impl UpstreamSource for FakeUpstreamSource {
    async fn next_event(&mut self) -> Option<AppResult<UpstreamEvent>> {
        self.events.recv().await
    }
}

pub fn upstream_pair() -> (UpstreamConnection, FakeUpstreamHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(FakeUpstreamState::default());
    let connection = UpstreamConnection {
        sink: Box::new(FakeUpstreamSink { state: state.clone() }),
        source: Box::new(FakeUpstreamSource { events: rx }),
    };
    let handle = FakeUpstreamHandle {
        events: Mutex::new(Some(tx)),
        state,
    };
    (connection, handle)
}

/// Connector that hands out one prepared connection, or refuses.
pub struct FakeConnector {
    connection: Mutex<Option<UpstreamConnection>>,
    sessions: Mutex<Vec<SessionConfig>>,
}

impl FakeConnector {
    pub fn ready(connection: UpstreamConnection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self {
            connection: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Session configurations seen by `connect`, in order.
    pub fn sessions(&self) -> Vec<SessionConfig> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, session: &SessionConfig) -> AppResult<UpstreamConnection> {
        self.sessions.lock().unwrap().push(session.clone());
        self.connection
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::UpstreamUnavailable("connection refused".to_string()))
    }
}

/// Analyzer returning a fixed verdict and remembering its inputs.
pub struct StaticAnalyzer {
    result: AppResult<CallAnalysis>,
    requests: Mutex<Vec<(String, String, String)>>,
}

impl StaticAnalyzer {
    pub fn returning(analysis: CallAnalysis) -> Self {
        Self {
            result: Ok(analysis),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(AppError::AnalysisFailed(message.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(transcript, script, persona_name)` per call.
    pub fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallAnalyzer for StaticAnalyzer {
    async fn analyze(&self, transcript: &str, script: &str, persona_name: &str) -> AppResult<CallAnalysis> {
        self.requests
            .lock()
            .unwrap()
            .push((transcript.to_string(), script.to_string(), persona_name.to_string()));
        self.result.clone()
    }
}
