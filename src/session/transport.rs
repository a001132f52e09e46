//! Realtime transport seam
//!
//! A [`Transport`] opens [`LiveSession`]s. Everything the connection
//! observes afterwards (open, messages, errors, close) is posted back into
//! the controller's inbox through an [`EventSink`] stamped with the
//! connection's generation, so events from a replaced connection can be
//! recognised and ignored.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::session::protocol::{ClientMessage, ServerMessage, SetupRequest};

/// Something observed on a live connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged; the session is usable
    Open,
    /// A decoded server frame
    Message(ServerMessage),
    /// Transport-level error; a `Closed` follows
    Error(String),
    /// Connection closed
    Closed { code: u16, reason: String },
}

/// Messages delivered to the controller's event loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Event from the connection with the given generation
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    /// A reconnect timer fired
    ReconnectDue { epoch: u64 },
    /// Locally scheduled playback has finished
    PlaybackDrained { epoch: u64 },
}

/// Posts transport events for one connection generation
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink is stamped with
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event; returns false once the controller is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens live sessions with the remote model
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and send the setup frame
    ///
    /// Resolves once the handshake completes; readiness is signalled later
    /// with [`TransportEvent::Open`].
    ///
    /// # Errors
    ///
    /// Returns error if the handshake fails
    async fn connect(&self, request: SetupRequest, events: EventSink)
    -> Result<Box<dyn LiveSession>>;
}

/// An open live session
#[async_trait]
pub trait LiveSession: Send {
    /// Send one client message
    ///
    /// # Errors
    ///
    /// Returns error if the message could not be written
    async fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Close the connection; no events are expected afterwards
    async fn close(&mut self);
}
