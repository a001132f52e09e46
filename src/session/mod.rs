//! Live session management
//!
//! The controller owns one logical conversation with the remote model and
//! keeps it alive across transport reconnects. The wire protocol, transport
//! seam, backoff policy and failure classification live in their own
//! modules so each can be tested without a network.

mod backoff;
mod controller;
mod dedup;
mod diagnostics;
mod gemini;
mod protocol;
mod transport;

pub use backoff::ReconnectPolicy;
pub use controller::{
    ConnectionState, ControllerChannels, ConversationTurn, LatencyStats, Role, SendOutcome,
    SessionController, SessionEvent,
};
pub use dedup::TranscriptDedup;
pub use diagnostics::{
    FailureKind, actionable_message, classify_close, classify_error, describe_close_code,
};
pub use gemini::GeminiTransport;
pub use protocol::{ClientMessage, FunctionCall, Part, ServerContent, ServerMessage, SetupRequest};
pub use transport::{EventSink, Inbound, LiveSession, Transport, TransportEvent};
