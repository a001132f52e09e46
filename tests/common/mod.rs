//! Shared test utilities
//!
//! In-memory stand-ins for the transport and the playback device so the
//! controller can be exercised without a network or audio hardware.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use snuggles::config::Config;
use snuggles::context::StaticContext;
use snuggles::session::{
    ClientMessage, ControllerChannels, EventSink, LiveSession, SessionController, SessionEvent,
    SetupRequest, Transport, TransportEvent,
};
use snuggles::voice::{AudioFrame, PlaybackSink, ScheduledSegment, SourceId};
use snuggles::{Error, Result};

/// How the next `connect` call should behave
pub enum ConnectScript {
    /// Accept and immediately report the session open
    Open,
    /// Accept the handshake but stay silent
    Accept,
    /// Fail the handshake
    Fail(Error),
}

#[derive(Default)]
pub struct TransportState {
    pub script: VecDeque<ConnectScript>,
    pub requests: Vec<SetupRequest>,
    pub sinks: Vec<EventSink>,
    pub sent: Vec<ClientMessage>,
    pub closed: usize,
    pub fail_sends: bool,
    pub hang_sends: bool,
}

/// Transport whose behaviour is scripted per connect call
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    pub state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: ConnectScript) {
        self.state.lock().unwrap().script.push_back(script);
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<SetupRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn set_hang_sends(&self, hang: bool) {
        self.state.lock().unwrap().hang_sends = hang;
    }

    /// Sink of the most recent connection
    pub fn last_sink(&self) -> EventSink {
        self.state.lock().unwrap().sinks.last().cloned().unwrap()
    }

    /// Act as the server on the most recent connection
    pub fn emit(&self, event: TransportEvent) {
        assert!(self.last_sink().emit(event), "controller inbox closed");
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        request: SetupRequest,
        events: EventSink,
    ) -> Result<Box<dyn LiveSession>> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request);
            state.sinks.push(events.clone());
            state.script.pop_front().unwrap_or(ConnectScript::Open)
        };

        match script {
            ConnectScript::Open => {
                events.emit(TransportEvent::Open);
            }
            ConnectScript::Accept => {}
            ConnectScript::Fail(e) => return Err(e),
        }

        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl LiveSession for FakeSession {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let (fail, hang) = {
            let state = self.state.lock().unwrap();
            (state.fail_sends, state.hang_sends)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(Error::Transport("broken pipe".to_string()));
        }
        self.state.lock().unwrap().sent.push(message);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }
}

#[derive(Default)]
pub struct SinkLog {
    pub enqueued: Vec<usize>,
    pub encoded: Vec<usize>,
    pub cancels: usize,
}

/// Length every encoded clip reports
pub const ENCODED_CLIP: Duration = Duration::from_millis(500);

/// Playback sink that records what it was asked to do
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    next: Arc<Mutex<u64>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<usize> {
        self.log.lock().unwrap().enqueued.clone()
    }

    pub fn cancels(&self) -> usize {
        self.log.lock().unwrap().cancels
    }

    fn segment(&self, duration: Duration) -> ScheduledSegment {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        ScheduledSegment {
            id: SourceId(*next),
            start: Duration::ZERO,
            duration,
        }
    }
}

impl PlaybackSink for RecordingSink {
    fn enqueue(&mut self, samples: &[f32]) -> Option<ScheduledSegment> {
        self.log.lock().unwrap().enqueued.push(samples.len());
        Some(self.segment(Duration::ZERO))
    }

    fn enqueue_encoded(&mut self, bytes: &[u8]) -> Option<ScheduledSegment> {
        self.log.lock().unwrap().encoded.push(bytes.len());
        (!bytes.is_empty()).then(|| self.segment(ENCODED_CLIP))
    }

    fn cancel_all(&mut self) {
        self.log.lock().unwrap().cancels += 1;
    }

    fn clock(&self) -> Duration {
        Duration::ZERO
    }
}

/// Deterministic configuration: no jitter, three candidate models
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.session.models = vec![
        "model-a".to_string(),
        "model-b".to_string(),
        "model-c".to_string(),
    ];
    config.session.send_timeout = Duration::from_secs(1);
    config.reconnect.jitter = Duration::ZERO;
    config.reconnect.max_attempts = 3;
    config.vad.rms_threshold = 0.01;
    config.vad.min_speech_frames = 2;
    config.vad.min_silence_frames = 3;
    config.vad.barge_in_multiplier = 3.0;
    config
}

pub struct Harness {
    pub controller: SessionController,
    pub channels: ControllerChannels,
    pub transport: ScriptedTransport,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        Self::with_context(config, "**Dr. Snuggles** persona")
    }

    pub fn with_context(config: &Config, context: &str) -> Self {
        let transport = ScriptedTransport::new();
        let sink = RecordingSink::new();
        let (controller, channels) = SessionController::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(StaticContext(context.to_string())),
            Box::new(sink.clone()),
        );
        Self {
            controller,
            channels,
            transport,
            sink,
        }
    }

    /// Handle every inbox message that is already queued
    pub async fn pump(&mut self) {
        while let Ok(inbound) = self.channels.inbox.try_recv() {
            self.controller.handle_inbound(inbound).await;
        }
    }

    /// Wait for and handle exactly one inbox message
    pub async fn step(&mut self) {
        let inbound = self.channels.inbox.recv().await.unwrap();
        self.controller.handle_inbound(inbound).await;
    }

    /// Connect and process the open event
    pub async fn connected(config: &Config) -> Self {
        let mut harness = Self::new(config);
        harness.controller.connect().await.unwrap();
        harness.pump().await;
        assert!(harness.controller.is_connected());
        harness.drain_events();
        harness
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.channels.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Act as the server on the current connection
    pub fn server(&self, event: TransportEvent) {
        self.transport.emit(event);
    }
}

/// One 10 ms frame at 48 kHz
pub fn frame(amplitude: f32, sequence: u64) -> AudioFrame {
    AudioFrame {
        samples: (0..480)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect(),
        sample_rate: 48_000,
        sequence,
    }
}

pub fn loud_frame(sequence: u64) -> AudioFrame {
    frame(0.2, sequence)
}

pub fn silent_frame(sequence: u64) -> AudioFrame {
    frame(0.0, sequence)
}
