//! Gemini Live WebSocket transport

use std::borrow::Cow;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::session::protocol::{ClientMessage, ServerMessage, SetupRequest};
use crate::session::transport::{EventSink, LiveSession, Transport, TransportEvent};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens bidi-streaming sessions against the Gemini Live endpoint
pub struct GeminiTransport {
    endpoint: String,
    api_key: SecretString,
}

impl GeminiTransport {
    #[must_use]
    pub const fn new(endpoint: String, api_key: SecretString) -> Self {
        Self { endpoint, api_key }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key.expose_secret())
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn connect(
        &self,
        request: SetupRequest,
        events: EventSink,
    ) -> Result<Box<dyn LiveSession>> {
        tracing::debug!(
            model = %request.model,
            mode = request.response_mode.modality(),
            resuming = request.resumption_handle.is_some(),
            "opening live session"
        );

        let (ws, _response) = connect_async(self.url()).await.map_err(handshake_error)?;
        let (mut write, read) = ws.split();

        write
            .send(Message::Text(request.to_json()))
            .await
            .map_err(|e| Error::Transport(format!("failed to send setup: {e}")))?;

        let reader = tokio::spawn(read_loop(read, events));

        Ok(Box::new(GeminiSession {
            write,
            reader: Some(reader),
        }))
    }
}

struct GeminiSession {
    write: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        self.write
            .send(Message::Text(message.to_json()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed("client disconnect"),
        };
        if let Err(e) = self.write.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
        if let Err(e) = self.write.close().await {
            tracing::debug!(error = %e, "websocket close failed");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, events: EventSink) {
    while let Some(frame) = read.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed server frame");
                    continue;
                }
            },
            Ok(Message::Binary(bytes)) => ServerMessage::from_binary(bytes),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame.map_or((1005, String::new()), |f| {
                    (u16::from(f.code), f.reason.into_owned())
                });
                events.emit(TransportEvent::Closed { code, reason });
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let reason = e.to_string();
                events.emit(TransportEvent::Error(reason.clone()));
                events.emit(TransportEvent::Closed { code: 1006, reason });
                return;
            }
        };

        let event = if message == ServerMessage::SetupComplete {
            TransportEvent::Open
        } else {
            TransportEvent::Message(message)
        };
        if !events.emit(event) {
            return;
        }
    }

    events.emit(TransportEvent::Closed {
        code: 1006,
        reason: "stream ended".to_string(),
    });
}

fn handshake_error(error: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match error {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            match status.as_u16() {
                401 | 403 => Error::Auth(format!("handshake rejected ({status}): {body}")),
                404 => Error::ModelUnavailable(format!("endpoint not found ({status}): {body}")),
                _ => Error::Transport(format!("handshake failed ({status}): {body}")),
            }
        }
        other => Error::Transport(other.to_string()),
    }
}
