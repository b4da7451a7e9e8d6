//! HTTP transport for the co-pilot backend.
//!
//! `open` drives one chunked response through the decoder and classifier and
//! hands the resulting frames to the controller over a channel. Every failure
//! on this path, whether before the body or mid-transfer, is delivered as a
//! single `Frame::Error` so the controller handles them uniformly.

use crate::error::{CopilotError, Result};
use crate::protocol::{classify, Frame, FrameDecoder};
use crate::state::{ChatMessage, ChatRole};
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STREAM_PATH: &str = "/api/chat/stream";
const CHAT_PATH: &str = "/api/chat";

/// Frames buffered between the read loop and the controller. The read loop
/// waits when this fills up; frames are never dropped.
const FRAME_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct WireMessage<'a> {
    role: ChatRole,
    content: &'a str,
}

/// Body of a chat request. Field names follow the backend's request model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    #[serde(rename = "project_id")]
    pub context_id: Option<String>,
    #[serde(rename = "messages", serialize_with = "serialize_history")]
    pub history: Vec<ChatMessage>,
}

fn serialize_history<S: serde::Serializer>(
    history: &[ChatMessage],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(history.iter().map(|m| WireMessage {
        role: m.role,
        content: &m.content,
    }))
}

impl ChatRequest {
    pub fn new(context_id: Option<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            context_id,
            history,
        }
    }
}

/// What the read loop reports to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The backend answered with a success status; frames follow.
    Connected,
    Frame(Frame),
}

/// Source of classified frames for one request.
///
/// The receiver closes when the stream ends, fails, or `cancel` fires.
pub trait FrameSource: Send + Sync {
    fn open(&self, request: ChatRequest, cancel: CancellationToken)
        -> mpsc::Receiver<TransportEvent>;
}

/// reqwest-backed transport talking to the co-pilot backend
#[derive(Clone)]
pub struct StreamTransport {
    client: Client,
    base_url: String,
    idle_timeout: Option<Duration>,
}

impl StreamTransport {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            idle_timeout: None,
        }
    }

    /// Fail the stream when no bytes arrive for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Non-streaming request: the whole reply arrives as one message.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage> {
        let url = format!("{}{}", self.base_url, CHAT_PATH);

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = error_message(response).await;
            return Err(CopilotError::Status { status, message });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn run(&self, request: ChatRequest, tx: &mpsc::Sender<TransportEvent>) {
        let url = format!("{}{}", self.base_url, STREAM_PATH);
        tracing::debug!(url = %url, history = request.history.len(), "Opening chat stream");

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream request failed");
                send_error(tx, format!("Could not reach the co-pilot backend: {e}")).await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let message = error_message(response).await;
            tracing::warn!(status = %status, message = %message, "Chat stream rejected");
            send_error(tx, message).await;
            return;
        }

        if tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(secs = limit.as_secs(), "Chat stream idle timeout");
                        send_error(
                            tx,
                            format!("No data received for {} seconds", limit.as_secs()),
                        )
                        .await;
                        return;
                    }
                },
                None => body.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    for payload in decoder.push(&chunk) {
                        let Some(frame) = classify(&payload) else {
                            continue;
                        };
                        if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                            // Controller went away; dropping the body closes the connection.
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Chat stream interrupted");
                    send_error(tx, format!("Connection lost: {e}")).await;
                    return;
                }
                None => break,
            }
        }

        decoder.finish();
    }
}

impl FrameSource for StreamTransport {
    fn open(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let transport = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Chat stream cancelled");
                }
                _ = transport.run(request, &tx) => {}
            }
        });

        rx
    }
}

async fn send_error(tx: &mpsc::Sender<TransportEvent>, message: String) {
    let _ = tx.send(TransportEvent::Frame(Frame::Error(message))).await;
}

/// Best description of a failed response: the structured error body if it
/// has one, otherwise the status text.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| structured_error(&v))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or(status.as_str())
                .to_string()
        })
}

fn structured_error(body: &Value) -> Option<String> {
    let detail = body
        .get("detail")
        .or_else(|| body.get("error").and_then(|e| e.get("message")))?;

    match detail {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
