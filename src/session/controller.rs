//! Turn and session controller
//!
//! Owns the live connection and everything that reacts to it: the VAD that
//! gates microphone frames, the format bridge, and the playback sink. All
//! mutation happens on the caller's event loop; transport reader tasks and
//! reconnect timers only post [`Inbound`] messages back to it.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──Open──▶ Connected
//!       ▲                        │                    │
//!       │                  close/error           abnormal close
//!       │                        ▼                    │
//!       └──disconnect──── Reconnecting ◀──────────────┘
//!                               │
//!                      attempts exhausted / auth
//!                               ▼
//!                            Failed
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, ResponseMode, SessionConfig};
use crate::context::{ContextProvider, MINIMAL_INSTRUCTION, strip_markdown};
use crate::session::backoff::ReconnectPolicy;
use crate::session::dedup::TranscriptDedup;
use crate::session::diagnostics::{
    FailureKind, actionable_message, classify_close, classify_error, describe_close_code,
};
use crate::session::protocol::{
    ClientMessage, FunctionCall, Part, ServerContent, ServerMessage, SetupRequest,
};
use crate::session::transport::{EventSink, Inbound, LiveSession, Transport, TransportEvent};
use crate::voice::{
    AudioFrame, FormatBridge, PlaybackSink, Sensitivity, VadConfigUpdate, VadEdge, VadState,
    VoiceActivityDetector, pcm_rate_from_mime,
};
use crate::{Error, Result};

/// Upper bound on the transport handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on a graceful close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal; carries an actionable message
    Failed(String),
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A completed turn of conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Discrete events for the UI and memory collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { model: String },
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Retrying stopped; fires at most once per `connect`
    Fatal(String),
    /// Non-fatal network or protocol error
    Error(String),
    /// Local VAD detected the user starting to speak
    UserSpeechStarted,
    /// Incremental transcript or model text
    Transcript { role: Role, delta: String },
    /// A finished turn
    Turn(ConversationTurn),
    /// Remote audio was queued for playback
    AudioReceived {
        samples: usize,
        round_trip: Option<Duration>,
    },
    /// Remote output was interrupted by the user
    Interrupted,
    TurnComplete,
    /// The model asked for a function call
    ToolCall(FunctionCall),
}

/// Result of offering one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame was transmitted; `latency` is the transmit duration
    Sent { latency: Duration },
    /// Not connected, muted, or classified as silence
    Skipped,
    /// Transmit failed; the reconnection policy has taken over
    Failed,
}

/// Latency measurements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Transmit duration of the most recent frame
    pub last_send: Option<Duration>,
    /// Time from the last sent frame to the most recent remote audio
    pub last_round_trip: Option<Duration>,
    total_round_trip: Duration,
    round_trips: u32,
}

impl LatencyStats {
    /// Mean round-trip latency
    #[must_use]
    pub fn mean_round_trip(&self) -> Option<Duration> {
        (self.round_trips > 0).then(|| self.total_round_trip / self.round_trips)
    }

    fn record_round_trip(&mut self, latency: Duration) {
        self.last_round_trip = Some(latency);
        self.total_round_trip += latency;
        self.round_trips = self.round_trips.saturating_add(1);
    }
}

enum FailureAction {
    RetryNow,
    Settled,
}

/// Where a failure was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOrigin {
    /// The handshake itself failed
    Connect,
    /// An established session was closed by the remote
    Close,
}

/// Receiving ends handed out by [`SessionController::new`]
pub struct ControllerChannels {
    /// Must be drained into [`SessionController::handle_inbound`]
    pub inbox: mpsc::UnboundedReceiver<Inbound>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub state: watch::Receiver<ConnectionState>,
}

/// Drives one logical conversation across transport reconnects
pub struct SessionController {
    session_config: SessionConfig,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    context: Arc<dyn ContextProvider>,
    playback: Box<dyn PlaybackSink>,
    vad: VoiceActivityDetector,
    bridge: FormatBridge,
    wire_output_rate: u32,

    live: Option<Box<dyn LiveSession>>,
    generation: u64,
    is_connected: bool,
    reconnect_attempts: u32,
    should_reconnect: bool,
    resumption_handle: Option<String>,
    model_index: usize,
    minimal_instruction: bool,
    fatal_emitted: bool,
    muted: bool,

    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_epoch: u64,

    drain_timer: Option<JoinHandle<()>>,
    drain_epoch: u64,

    input_dedup: TranscriptDedup,
    output_dedup: TranscriptDedup,
    text_dedup: TranscriptDedup,
    text_modality_working: bool,

    last_sent_at: Option<Instant>,
    latency: LatencyStats,

    inbox_tx: mpsc::UnboundedSender<Inbound>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
}

impl SessionController {
    /// Create a disconnected controller
    #[must_use]
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        context: Arc<dyn ContextProvider>,
        playback: Box<dyn PlaybackSink>,
    ) -> (Self, ControllerChannels) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let controller = Self {
            session_config: config.session.clone(),
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            transport,
            context,
            playback,
            vad: VoiceActivityDetector::new(config.vad.clone()),
            bridge: FormatBridge::new(config.audio.wire_input_rate, config.audio.playback_rate),
            wire_output_rate: config.audio.wire_output_rate,
            live: None,
            generation: 0,
            is_connected: false,
            reconnect_attempts: 0,
            should_reconnect: false,
            resumption_handle: None,
            model_index: 0,
            minimal_instruction: false,
            fatal_emitted: false,
            muted: false,
            reconnect_timer: None,
            reconnect_epoch: 0,
            drain_timer: None,
            drain_epoch: 0,
            input_dedup: TranscriptDedup::new(),
            output_dedup: TranscriptDedup::new(),
            text_dedup: TranscriptDedup::new(),
            text_modality_working: false,
            last_sent_at: None,
            latency: LatencyStats::default(),
            inbox_tx,
            events: events_tx,
            state: state_tx,
        };

        (
            controller,
            ControllerChannels {
                inbox,
                events,
                state,
            },
        )
    }

    /// Open the live session
    ///
    /// No-op while connected or connecting. Transient failures hand over to
    /// the reconnection policy; the returned error is informational unless
    /// the state is [`ConnectionState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns the error of the last failed attempt
    pub async fn connect(&mut self) -> Result<()> {
        if matches!(
            *self.state.borrow(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::debug!("connect ignored, session already active");
            return Ok(());
        }

        self.cancel_reconnect_timer();
        self.should_reconnect = true;
        self.fatal_emitted = false;
        self.reconnect_attempts = 0;
        self.model_index = 0;
        self.minimal_instruction = false;

        self.attempt_connect().await
    }

    /// Close the session and stop reconnecting; safe to call at any time
    pub async fn disconnect(&mut self) {
        self.should_reconnect = false;
        self.cancel_reconnect_timer();
        self.cancel_drain_timer();
        self.generation += 1;

        if let Some(mut live) = self.live.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, live.close()).await.is_err() {
                tracing::warn!("live session close timed out");
            }
        }

        self.is_connected = false;
        self.vad.reset();
        self.clear_turn_state();
        self.playback.cancel_all();
        self.set_state(ConnectionState::Disconnected);
        self.emit(SessionEvent::Disconnected {
            reason: "disconnected by user".to_string(),
        });
        tracing::info!("session disconnected");
    }

    /// Offer one captured frame
    ///
    /// Frames are dropped rather than queued while not connected.
    pub async fn send_audio_frame(&mut self, frame: &AudioFrame) -> SendOutcome {
        if !self.is_connected || self.muted || self.live.is_none() {
            return SendOutcome::Skipped;
        }

        let remote_was_speaking = self.vad.state().is_remote_speaking;
        let decision = self.vad.process(&frame.samples);

        if decision.edge == Some(VadEdge::SpeechStarted) {
            if remote_was_speaking {
                tracing::debug!("barge-in, canceling local playback");
                self.playback.cancel_all();
                // Locally played clips get no server interrupt
                if let Some(timer) = self.drain_timer.take() {
                    timer.abort();
                    self.vad.set_remote_speaking(false);
                }
            }
            self.emit(SessionEvent::UserSpeechStarted);
        }

        let mut outcome = SendOutcome::Skipped;
        if decision.propagate {
            let data = self.bridge.encode_upstream(&frame.samples, frame.sample_rate);
            if !data.is_empty() {
                let message = ClientMessage::RealtimeAudio {
                    mime_type: self.bridge.upstream_mime(),
                    data,
                };
                outcome = match self.send(message).await {
                    Ok(latency) => {
                        self.latency.last_send = Some(latency);
                        SendOutcome::Sent { latency }
                    }
                    Err(_) => SendOutcome::Failed,
                };
            }
        }

        if decision.edge == Some(VadEdge::SpeechEnded) && self.is_connected {
            tracing::debug!("local silence, sending end of turn");
            if self.send(ClientMessage::AudioStreamEnd).await.is_err() {
                outcome = SendOutcome::Failed;
            }
        }

        outcome
    }

    /// Send a complete user text turn
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` without an open session, or the send error
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.is_connected {
            return Err(Error::NotConnected);
        }
        self.send(ClientMessage::ClientContent(text.to_string()))
            .await?;
        self.emit(SessionEvent::Turn(ConversationTurn {
            role: Role::User,
            text: text.to_string(),
            timestamp: Utc::now(),
        }));
        Ok(())
    }

    /// Queue encoded audio (the TTS fallback path) for playback
    ///
    /// The remote counts as speaking until the last queued clip has played
    /// out.
    pub fn play_encoded(&mut self, bytes: &[u8]) {
        let Some(segment) = self.playback.enqueue_encoded(bytes) else {
            return;
        };
        self.vad.set_remote_speaking(true);

        let remaining = segment.end().saturating_sub(self.playback.clock());
        self.cancel_drain_timer();
        self.drain_epoch += 1;
        let epoch = self.drain_epoch;
        let tx = self.inbox_tx.clone();
        self.drain_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = tx.send(Inbound::PlaybackDrained { epoch });
        }));
    }

    /// Process one message from the inbox
    pub async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Transport { generation, event } => {
                if generation != self.generation {
                    tracing::trace!(generation, current = self.generation, "stale transport event");
                    return;
                }
                self.handle_transport_event(event).await;
            }
            Inbound::ReconnectDue { epoch } => {
                if epoch != self.reconnect_epoch || !self.should_reconnect {
                    return;
                }
                self.reconnect_timer = None;
                if let Err(e) = self.attempt_connect().await {
                    tracing::warn!(error = %e, "reconnect attempt failed");
                }
            }
            Inbound::PlaybackDrained { epoch } => {
                if epoch != self.drain_epoch {
                    return;
                }
                self.drain_timer = None;
                tracing::debug!("local playback drained");
                self.vad.set_remote_speaking(false);
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                self.is_connected = true;
                self.reconnect_attempts = 0;
                let model = self.current_model().to_string();
                tracing::info!(model = %model, "live session open");
                self.set_state(ConnectionState::Connected);
                self.emit(SessionEvent::Connected { model });
            }
            TransportEvent::Message(message) => self.handle_server_message(message),
            TransportEvent::Error(error) => {
                tracing::warn!(error = %error, "transport error");
                self.emit(SessionEvent::Error(error));
            }
            TransportEvent::Closed { code, reason } => {
                self.live = None;
                self.generation += 1;
                self.handle_close(code, &reason).await;
            }
        }
    }

    async fn handle_close(&mut self, code: u16, reason: &str) {
        tracing::info!(
            code,
            reason,
            meaning = describe_close_code(code),
            "live session closed"
        );

        self.is_connected = false;
        self.vad.reset();
        self.cancel_drain_timer();
        self.set_state(ConnectionState::Disconnected);

        let kind = classify_close(code, reason);
        if kind == FailureKind::Normal || !self.should_reconnect {
            self.emit(SessionEvent::Disconnected {
                reason: format!("{code}: {}", describe_close_code(code)),
            });
            return;
        }

        let detail = if reason.is_empty() {
            format!("close code {code}")
        } else {
            format!("close code {code}: {reason}")
        };
        if matches!(
            self.on_failure(kind, FailureOrigin::Close, &detail),
            FailureAction::RetryNow
        ) {
            if let Err(e) = self.attempt_connect().await {
                tracing::warn!(error = %e, "immediate retry failed");
            }
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::SetupComplete => tracing::debug!("setup complete"),
            ServerMessage::SessionResumptionUpdate {
                resumable,
                new_handle,
            } => {
                if let (true, Some(handle)) = (resumable, new_handle) {
                    tracing::debug!("session resumption handle updated");
                    self.resumption_handle = Some(handle);
                }
            }
            ServerMessage::ServerContent(content) => self.handle_server_content(content),
            ServerMessage::ToolCall(calls) => {
                for call in calls {
                    self.emit(SessionEvent::ToolCall(call));
                }
            }
            ServerMessage::GoAway { time_left } => {
                tracing::warn!(time_left = ?time_left, "server will close the session soon");
            }
            ServerMessage::RawAudio(bytes) => {
                let samples = self
                    .bridge
                    .decode_downstream_bytes(&bytes, self.wire_output_rate);
                self.handle_remote_audio(&samples);
            }
            ServerMessage::Unknown => tracing::trace!("ignoring unknown server message"),
        }
    }

    fn handle_server_content(&mut self, content: ServerContent) {
        for part in content.parts {
            match part {
                Part::Text(text) => {
                    self.text_modality_working = true;
                    if let Some(delta) = self.text_dedup.push(&text) {
                        self.emit(SessionEvent::Transcript {
                            role: Role::Assistant,
                            delta,
                        });
                    }
                }
                Part::InlineData { mime_type, data } => {
                    if !mime_type.starts_with("audio/") {
                        tracing::debug!(mime_type = %mime_type, "ignoring non-audio inline data");
                        continue;
                    }
                    let rate = pcm_rate_from_mime(&mime_type).unwrap_or(self.wire_output_rate);
                    let samples = self.bridge.decode_downstream(&data, rate);
                    self.handle_remote_audio(&samples);
                }
                Part::FunctionCall(call) => self.emit(SessionEvent::ToolCall(call)),
            }
        }

        if let Some(text) = content.output_transcription {
            if let Some(delta) = self.output_dedup.push(&text) {
                self.emit(SessionEvent::Transcript {
                    role: Role::Assistant,
                    delta,
                });
            }
        }

        if let Some(text) = content.input_transcription {
            if let Some(delta) = self.input_dedup.push(&text) {
                self.emit(SessionEvent::Transcript {
                    role: Role::User,
                    delta,
                });
            }
        }

        if content.interrupted {
            tracing::debug!("remote output interrupted");
            self.vad.set_remote_speaking(false);
            self.playback.cancel_all();
            self.cancel_drain_timer();
            self.emit(SessionEvent::Interrupted);
        }

        if content.turn_complete {
            self.vad.set_remote_speaking(false);
            self.finish_turn();
            self.emit(SessionEvent::TurnComplete);
        }
    }

    fn handle_remote_audio(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.playback.enqueue(samples);
        self.vad.set_remote_speaking(true);
        // Live audio owns the flag until turnComplete
        self.cancel_drain_timer();

        let round_trip = self.last_sent_at.map(|at| at.elapsed());
        if let Some(latency) = round_trip {
            self.latency.record_round_trip(latency);
        }
        self.emit(SessionEvent::AudioReceived {
            samples: samples.len(),
            round_trip,
        });
    }

    /// Emit completed turns and clear de-duplication state
    fn finish_turn(&mut self) {
        let now = Utc::now();
        let user = self.input_dedup.emitted().trim().to_string();
        let assistant = if self.output_dedup.emitted().trim().is_empty() {
            self.text_dedup.emitted().trim().to_string()
        } else {
            self.output_dedup.emitted().trim().to_string()
        };

        if !user.is_empty() {
            self.emit(SessionEvent::Turn(ConversationTurn {
                role: Role::User,
                text: user,
                timestamp: now,
            }));
        }
        if !assistant.is_empty() {
            self.emit(SessionEvent::Turn(ConversationTurn {
                role: Role::Assistant,
                text: assistant,
                timestamp: now,
            }));
        }
        self.clear_turn_state();
    }

    fn clear_turn_state(&mut self) {
        self.input_dedup.clear();
        self.output_dedup.clear();
        self.text_dedup.clear();
    }

    /// One connection attempt, retried in place for model fallback and the
    /// minimal-instruction retry
    async fn attempt_connect(&mut self) -> Result<()> {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.generation += 1;
            let request = self.build_request().await;
            let sink = EventSink::new(self.generation, self.inbox_tx.clone());

            tracing::info!(
                model = %request.model,
                minimal = self.minimal_instruction,
                resuming = request.resumption_handle.is_some(),
                "connecting"
            );

            let result =
                match tokio::time::timeout(CONNECT_TIMEOUT, self.transport.connect(request, sink))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Transport("handshake timed out".to_string())),
                };

            match result {
                Ok(live) => {
                    self.live = Some(live);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connect attempt failed");
                    self.set_state(ConnectionState::Disconnected);
                    let kind = classify_error(&e);
                    if kind != FailureKind::Auth {
                        self.emit(SessionEvent::Error(e.to_string()));
                    }
                    match self.on_failure(kind, FailureOrigin::Connect, &e.to_string()) {
                        FailureAction::RetryNow => {}
                        FailureAction::Settled => return Err(e),
                    }
                }
            }
        }
    }

    /// Decide what a failure means for the session
    fn on_failure(
        &mut self,
        kind: FailureKind,
        origin: FailureOrigin,
        detail: &str,
    ) -> FailureAction {
        match kind {
            FailureKind::ModelUnavailable => {
                if self.model_index + 1 < self.session_config.models.len() {
                    self.model_index += 1;
                    self.resumption_handle = None;
                    tracing::warn!(
                        model = %self.current_model(),
                        "model unavailable, trying next candidate"
                    );
                    FailureAction::RetryNow
                } else {
                    self.fail(kind, detail);
                    FailureAction::Settled
                }
            }
            FailureKind::InvalidConfig if !self.minimal_instruction => {
                tracing::warn!(detail, "setup rejected, retrying with minimal instruction");
                self.minimal_instruction = true;
                self.resumption_handle = None;
                FailureAction::RetryNow
            }
            // The remote closed on the minimal setup too; retrying cannot help
            FailureKind::InvalidConfig if origin == FailureOrigin::Close => {
                self.fail(kind, detail);
                FailureAction::Settled
            }
            FailureKind::InvalidConfig => {
                self.emit(SessionEvent::Error(actionable_message(kind, detail)));
                self.schedule_reconnect(detail);
                FailureAction::Settled
            }
            FailureKind::Auth => {
                self.fail(kind, detail);
                FailureAction::Settled
            }
            FailureKind::Normal | FailureKind::Transient => {
                self.schedule_reconnect(detail);
                FailureAction::Settled
            }
        }
    }

    fn schedule_reconnect(&mut self, detail: &str) {
        if !self.should_reconnect {
            return;
        }
        if self.reconnect_attempts >= self.policy.max_attempts() {
            let message = format!(
                "gave up after {} reconnect attempts; last error: {detail}",
                self.reconnect_attempts
            );
            self.fail(FailureKind::Transient, &message);
            return;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay = self.policy.delay_for_attempt(attempt);

        tracing::info!(
            attempt,
            max_attempts = self.policy.max_attempts(),
            delay_ms = delay.as_millis(),
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting { attempt, delay });
        self.emit(SessionEvent::Reconnecting { attempt, delay });

        self.cancel_reconnect_timer();
        self.reconnect_epoch += 1;
        let epoch = self.reconnect_epoch;
        let tx = self.inbox_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::ReconnectDue { epoch });
        }));
    }

    fn fail(&mut self, kind: FailureKind, detail: &str) {
        self.should_reconnect = false;
        self.cancel_reconnect_timer();
        self.live = None;
        self.is_connected = false;

        let message = actionable_message(kind, detail);
        tracing::error!(kind = ?kind, detail, "session failed");
        self.set_state(ConnectionState::Failed(message.clone()));
        if !self.fatal_emitted {
            self.fatal_emitted = true;
            self.emit(SessionEvent::Fatal(message));
        }
    }

    async fn build_request(&self) -> SetupRequest {
        let system_instruction = if self.minimal_instruction {
            MINIMAL_INSTRUCTION.to_string()
        } else {
            match self.context.system_context("").await {
                Ok(text) => strip_markdown(&text),
                Err(e) => {
                    tracing::warn!(error = %e, "context unavailable, using minimal instruction");
                    MINIMAL_INSTRUCTION.to_string()
                }
            }
        };

        SetupRequest {
            model: self.current_model().to_string(),
            system_instruction,
            voice: self.session_config.voice.clone(),
            response_mode: self.session_config.response_mode,
            input_transcription: self.session_config.input_transcription,
            output_transcription: self.session_config.output_transcription,
            resumption_handle: self.resumption_handle.clone(),
        }
    }

    /// Send with a timeout; failure counts as a lost connection
    async fn send(&mut self, message: ClientMessage) -> Result<Duration> {
        let Some(live) = self.live.as_mut() else {
            return Err(Error::NotConnected);
        };

        let started = Instant::now();
        let error = match tokio::time::timeout(self.session_config.send_timeout, live.send(message))
            .await
        {
            Ok(Ok(())) => {
                self.last_sent_at = Some(Instant::now());
                return Ok(started.elapsed());
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Transport("send timed out".to_string()),
        };

        tracing::warn!(error = %error, "send failed, treating connection as lost");
        self.live = None;
        self.generation += 1;
        self.handle_close(1006, &error.to_string()).await;
        Err(error)
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn cancel_drain_timer(&mut self) {
        if let Some(timer) = self.drain_timer.take() {
            timer.abort();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("session event receiver dropped");
        }
    }

    /// Mute or unmute the microphone path
    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            tracing::info!(muted, "microphone mute changed");
        }
        self.muted = muted;
    }

    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    /// Retune the VAD while running
    pub fn update_vad_config(&mut self, update: &VadConfigUpdate) {
        self.vad.update_config(update);
    }

    /// Apply a sensitivity preset
    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) {
        self.vad.update_config(&VadConfigUpdate::from(sensitivity));
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.is_connected
    }

    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[must_use]
    pub fn resumption_handle(&self) -> Option<&str> {
        self.resumption_handle.as_deref()
    }

    /// Model used for the current or next attempt
    #[must_use]
    pub fn current_model(&self) -> &str {
        self.session_config
            .models
            .get(self.model_index)
            .map_or("", String::as_str)
    }

    #[must_use]
    pub const fn response_mode(&self) -> ResponseMode {
        self.session_config.response_mode
    }

    #[must_use]
    pub const fn vad_state(&self) -> VadState {
        self.vad.state()
    }

    #[must_use]
    pub const fn latency(&self) -> LatencyStats {
        self.latency
    }

    /// Whether the remote has produced any model text this session
    #[must_use]
    pub const fn is_text_modality_working(&self) -> bool {
        self.text_modality_working
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        self.cancel_drain_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_latency() {
        let mut stats = LatencyStats::default();
        assert_eq!(stats.mean_round_trip(), None);
        stats.record_round_trip(Duration::from_millis(100));
        stats.record_round_trip(Duration::from_millis(300));
        assert_eq!(stats.mean_round_trip(), Some(Duration::from_millis(200)));
        assert_eq!(stats.last_round_trip, Some(Duration::from_millis(300)));
    }
}
