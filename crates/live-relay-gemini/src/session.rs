//! Live session over a `BidiGenerateContent` websocket.

use std::time::Duration;

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use live_relay_core::{LiveSession, RealtimeInput, ServerMessage, SessionError, ToolResponse};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, Message, protocol::CloseFrame, protocol::frame::coding::CloseCode},
};

use crate::wire::ClientMessage;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One decoded server frame.
enum Frame {
    Message(ServerMessage),
    Closed(Option<CloseFrame>),
}

/// An open Gemini Live session.
///
/// The socket is split so that a pending [`LiveSession::receive`] never
/// blocks the send methods. [`LiveSession::close`] interrupts pending sends
/// and receives before closing the socket.
pub struct GeminiSession {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    closing: CancellationToken,
}

impl GeminiSession {
    pub(crate) fn new(stream: WsStream) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closing: CancellationToken::new(),
        }
    }

    pub(crate) async fn send_json(&self, message: &ClientMessage<'_>) -> Result<(), SessionError> {
        if self.closing.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let json = serde_json::to_string(message).map_err(SessionError::Encode)?;
        let send = async {
            self.writer
                .lock()
                .await
                .send(Message::Text(json.into()))
                .await
                .map_err(transport_error)
        };
        tokio::select! {
            biased;
            () = self.closing.cancelled() => Err(SessionError::Closed),
            result = send => result,
        }
    }

    /// Wait for `setupComplete`, the server's acknowledgement of the setup
    /// message.
    pub(crate) async fn await_setup_complete(&self) -> Result<(), SessionError> {
        loop {
            match self.read_frame().await? {
                Frame::Message(message) if message.setup_complete.is_some() => return Ok(()),
                Frame::Message(message) => {
                    tracing::debug!(kind = message.kind(), "Message before setup completed");
                }
                Frame::Closed(frame) => {
                    let reason = frame.map_or_else(
                        || "closed before setup completed".to_string(),
                        |f| format!("{} ({})", f.reason.as_str(), u16::from(f.code)),
                    );
                    return Err(SessionError::Rejected(reason));
                }
            }
        }
    }

    async fn read_frame(&self) -> Result<Frame, SessionError> {
        let mut reader = tokio::select! {
            biased;
            () = self.closing.cancelled() => return Ok(Frame::Closed(None)),
            reader = self.reader.lock() => reader,
        };
        loop {
            let next = tokio::select! {
                biased;
                () = self.closing.cancelled() => return Ok(Frame::Closed(None)),
                next = reader.next() => next,
            };
            let message = match next {
                None | Some(Err(tungstenite::Error::ConnectionClosed)) => {
                    return Ok(Frame::Closed(None));
                }
                Some(Err(e)) => return Err(transport_error(e)),
                Some(Ok(message)) => message,
            };

            let parsed = match message {
                Message::Text(text) => serde_json::from_str(text.as_str()),
                Message::Binary(data) => serde_json::from_slice(&data),
                Message::Close(frame) => return Ok(Frame::Closed(frame)),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return parsed.map(Frame::Message).map_err(SessionError::Decode);
        }
    }
}

fn transport_error(e: tungstenite::Error) -> SessionError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SessionError::Closed
        }
        e => SessionError::Transport(e.to_string()),
    }
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn receive(&self) -> Result<Option<ServerMessage>, SessionError> {
        match self.read_frame().await? {
            Frame::Message(message) => Ok(Some(message)),
            Frame::Closed(frame) => {
                if let Some(frame) = frame.filter(|f| f.code != CloseCode::Normal) {
                    tracing::warn!(
                        code = u16::from(frame.code),
                        reason = frame.reason.as_str(),
                        "Live session closed by server"
                    );
                }
                Ok(None)
            }
        }
    }

    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), SessionError> {
        self.send_json(&ClientMessage::RealtimeInput(input.into()))
            .await
    }

    async fn send_tool_response(&self, response: ToolResponse) -> Result<(), SessionError> {
        self.send_json(&ClientMessage::ToolResponse(&response)).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closing.is_cancelled() {
            return Ok(());
        }
        // Wakes pending sends so the writer lock is free.
        self.closing.cancel();

        let close = async { self.writer.lock().await.close().await };
        match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => match transport_error(e) {
                SessionError::Closed => Ok(()),
                e => Err(e),
            },
            Err(_) => Err(SessionError::Timeout("live session close")),
        }
    }
}
