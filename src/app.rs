//! The composed assistant
//!
//! Owns every component for one run: the capture pipeline, the playback
//! scheduler (inside the session controller), the controller itself and the
//! optional TTS worker. Everything is driven from a single `select!` loop on
//! the calling task; cpal streams are not `Send`, so this loop is never
//! spawned.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, ResponseMode};
use crate::context::{ContextProvider, PersonaContext};
use crate::session::{
    ConnectionState, ControllerChannels, GeminiTransport, Role, SessionController, SessionEvent,
};
use crate::tts::{ElevenLabsTts, TextToSpeech};
use crate::voice::{CapturePipeline, CpalOutput, PlaybackScheduler, SchedulerConfig};
use crate::{Error, Result};

/// Why the run loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Ctrl-C or an explicit stop
    Shutdown,
    /// The session failed permanently
    Fatal(String),
}

/// Sequential TTS worker; one request in flight, results in order
struct TtsWorker {
    requests: mpsc::UnboundedSender<String>,
    results: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl TtsWorker {
    fn spawn(tts: Arc<dyn TextToSpeech>) -> Self {
        let (requests, mut request_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, results) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(text) = request_rx.recv().await {
                match tts.synthesize(&text).await {
                    Ok(audio) => {
                        if result_tx.send(audio).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "speech synthesis failed"),
                }
            }
        });

        Self {
            requests,
            results,
            task,
        }
    }
}

/// The voice assistant application
pub struct Assistant {
    controller: SessionController,
    channels: ControllerChannels,
    capture: CapturePipeline,
    tts: Option<TtsWorker>,
    response_mode: ResponseMode,
}

impl Assistant {
    /// Build every component and open the output device
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` without a Gemini API key, or `Error::Device`
    /// if the speaker cannot be opened
    pub fn init(config: &Config) -> Result<Self> {
        let api_key: SecretString = config.api_keys.gemini.clone().ok_or_else(|| {
            Error::Config("GEMINI_API_KEY is not set (env or [api_keys] gemini)".to_string())
        })?;

        let transport = Arc::new(GeminiTransport::new(config.session.endpoint.clone(), api_key));
        let context: Arc<dyn ContextProvider> =
            Arc::new(PersonaContext::new(config.persona.clone()));

        let mut scheduler = PlaybackScheduler::new(
            CpalOutput::new(),
            SchedulerConfig {
                sample_rate: config.audio.playback_rate,
                safety_margin: config.audio.safety_margin,
                drift_threshold: config.audio.drift_threshold,
            },
        );
        scheduler.start()?;

        let (controller, channels) =
            SessionController::new(config, transport, context, Box::new(scheduler));

        let tts = if config.session.response_mode == ResponseMode::Text {
            match ElevenLabsTts::new(config.api_keys.elevenlabs.clone(), &config.tts) {
                Ok(client) => Some(TtsWorker::spawn(Arc::new(client))),
                Err(e) => {
                    tracing::warn!(error = %e, "text responses will not be voiced");
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(
            model = %controller.current_model(),
            mode = config.session.response_mode.modality(),
            tts = tts.is_some(),
            "assistant initialized"
        );

        Ok(Self {
            controller,
            channels,
            capture: CapturePipeline::new(config.audio.capture_block_size),
            tts,
            response_mode: config.session.response_mode,
        })
    }

    /// Observe connection state
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.channels.state.clone()
    }

    /// Mutable access to the controller for runtime tuning
    pub const fn controller_mut(&mut self) -> &mut SessionController {
        &mut self.controller
    }

    /// Connect and run until Ctrl-C or a fatal session error
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the microphone cannot be opened or stops
    /// delivering audio
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) -> Result<Exit> {
        let mut frames = self.capture.start()?;

        let Self {
            controller,
            channels,
            tts,
            response_mode,
            ..
        } = self;

        if let Err(e) = controller.connect().await {
            if let ConnectionState::Failed(message) = controller.state() {
                return Ok(Exit::Fatal(message));
            }
            tracing::warn!(error = %e, "initial connect failed, retrying in background");
        }

        loop {
            tokio::select! {
                Some(inbound) = channels.inbox.recv() => {
                    controller.handle_inbound(inbound).await;
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return Err(Error::Device("microphone stopped delivering audio".to_string()));
                    };
                    controller.send_audio_frame(&frame).await;
                }
                Some(event) = channels.events.recv() => {
                    if let Some(exit) = on_event(event, *response_mode, tts.as_ref()) {
                        return Ok(exit);
                    }
                }
                Some(audio) = recv_tts(tts.as_mut()) => {
                    controller.play_encoded(&audio);
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    return Ok(Exit::Shutdown);
                }
            }
        }
    }

    /// Close the session and release devices
    #[allow(clippy::future_not_send)]
    pub async fn shutdown(&mut self) {
        self.controller.disconnect().await;
        self.capture.stop();
        if let Some(worker) = self.tts.take() {
            worker.task.abort();
        }

        let latency = self.controller.latency();
        tracing::info!(
            mean_round_trip_ms = latency.mean_round_trip().map(|d| d.as_millis()),
            last_send_ms = latency.last_send.map(|d| d.as_millis()),
            "assistant stopped"
        );
    }
}

async fn recv_tts(worker: Option<&mut TtsWorker>) -> Option<Vec<u8>> {
    match worker {
        Some(worker) => worker.results.recv().await,
        None => std::future::pending().await,
    }
}

fn on_event(event: SessionEvent, mode: ResponseMode, tts: Option<&TtsWorker>) -> Option<Exit> {
    match event {
        SessionEvent::Connected { model } => {
            tracing::info!(model = %model, "Dr. Snuggles is listening");
        }
        SessionEvent::Disconnected { reason } => tracing::info!(reason = %reason, "disconnected"),
        SessionEvent::Reconnecting { attempt, delay } => {
            tracing::warn!(attempt, delay_ms = delay.as_millis(), "connection lost, reconnecting");
        }
        SessionEvent::Fatal(message) => {
            tracing::error!("{message}");
            return Some(Exit::Fatal(message));
        }
        SessionEvent::Error(error) => tracing::warn!(error = %error, "session error"),
        SessionEvent::UserSpeechStarted => tracing::debug!("user speaking"),
        SessionEvent::Transcript { role, delta } => {
            tracing::trace!(role = ?role, delta = %delta, "transcript");
        }
        SessionEvent::Turn(turn) => {
            tracing::info!(role = ?turn.role, text = %turn.text, "turn");
            if turn.role == Role::Assistant && mode == ResponseMode::Text {
                if let Some(worker) = tts {
                    if worker.requests.send(turn.text).is_err() {
                        tracing::warn!("tts worker stopped");
                    }
                }
            }
        }
        SessionEvent::AudioReceived {
            samples,
            round_trip,
        } => {
            tracing::trace!(
                samples,
                round_trip_ms = round_trip.map(|d| d.as_millis()),
                "audio received"
            );
        }
        SessionEvent::Interrupted => tracing::debug!("assistant interrupted"),
        SessionEvent::TurnComplete => tracing::debug!("turn complete"),
        SessionEvent::ToolCall(call) => {
            tracing::info!(name = %call.name, args = %call.args, "tool call requested, no handler");
        }
    }
    None
}
