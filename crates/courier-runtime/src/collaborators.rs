//! Seams to the systems this crate drives but does not implement.
//!
//! The response generator ([`Agent`]), the connection registry
//! ([`LiveTransport`]), the delivery side of that registry
//! ([`DeliveryHandler`]) and the timer scheduler ([`TimerStore`]) all live
//! elsewhere. Implementations must be cheap to share behind an `Arc`.

use async_trait::async_trait;
use courier_core::SessionKey;
use courier_events::EffectRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// Message handed to the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    /// Plain text typed by the user.
    Text {
        /// Message body.
        text: String,
    },
    /// Agent-originated prompt carrying metadata about its source.
    Structured {
        /// Prompt body.
        text: String,
        /// Source description, e.g. `{"source": "timer", "timerId": ...}`.
        metadata: Value,
    },
}

impl ChatMessage {
    /// Prompt text regardless of variant.
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text } | Self::Structured { text, .. } => text,
        }
    }
}

/// Everything the agent needs for one invocation.
#[derive(Clone, Debug)]
pub struct ChatContext {
    /// Conversation thread.
    pub thread_id: String,
    /// Owning user.
    pub user_id: String,
    /// Input message.
    pub message: ChatMessage,
    /// ID of the event being processed.
    pub correlation_id: String,
    /// Fired on deadline or preemption; the agent should stop promptly.
    pub cancel: CancellationToken,
    /// `false` for timer-originated prompts.
    pub is_user_message: bool,
    /// Capacity to use for the output channel.
    pub buffer_size: usize,
}

impl ChatContext {
    /// Bounded channel sized for this invocation.
    pub fn channel(&self) -> (mpsc::Sender<AgentChunk>, mpsc::Receiver<AgentChunk>) {
        mpsc::channel(self.buffer_size.max(1))
    }
}

/// Follow-up effect proposed by the agent alongside its final answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedEffect {
    /// Effect type string, validated before persisting.
    #[serde(rename = "type")]
    pub effect_type: String,
    /// Effect payload.
    pub payload: Value,
}

/// Completed agent response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResponse {
    /// Full response text. Empty means "use the streamed tokens".
    pub message: String,
    /// Generation latency.
    pub latency_ms: Option<u64>,
    /// Provider token accounting, opaque here.
    pub token_usage: Option<Value>,
    /// Additional effects to persist.
    #[serde(default)]
    pub effects: Vec<ProposedEffect>,
}

/// One item of the agent's output stream.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentChunk {
    /// Incremental text.
    Token(String),
    /// Terminal success.
    Final(FinalResponse),
    /// Terminal failure.
    Error {
        /// Error description.
        message: String,
        /// Whether a retry may succeed.
        retryable: bool,
    },
}

/// Streaming response generator.
pub trait Agent: Send + Sync {
    /// Start generating. The stream ends with [`AgentChunk::Final`] or
    /// [`AgentChunk::Error`]; closing the channel without either is an error.
    fn stream_chat(&self, ctx: ChatContext) -> mpsc::Receiver<AgentChunk>;
}

/// Low-latency path to a connected client.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Whether a duplex connection is open for the thread right now.
    fn is_connected(&self, thread_id: &str) -> bool;

    /// Forward one token. `false` if the connection rejected or dropped it.
    async fn send_token(&self, thread_id: &str, token: &str) -> bool;
}

/// Error returned by a [`DeliveryHandler`]; the effect is failed permanently.
#[derive(Debug, thiserror::Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Hands a persisted effect to whatever transport is currently available.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// `Ok(true)` when delivered, `Ok(false)` when no transport is open and
    /// the effect should be retried later.
    async fn deliver(&self, effect: &EffectRow) -> std::result::Result<bool, DeliveryError>;
}

/// Timer scheduler, only the part this crate needs.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Cancel every scheduled timer for the session. Returns how many.
    async fn cancel_by_session(&self, session_key: &SessionKey) -> Result<usize>;
}

/// Transport that never has a live connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLiveTransport;

#[async_trait]
impl LiveTransport for NoLiveTransport {
    fn is_connected(&self, _thread_id: &str) -> bool {
        false
    }

    async fn send_token(&self, _thread_id: &str, _token: &str) -> bool {
        false
    }
}

/// Timer store with nothing scheduled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTimers;

#[async_trait]
impl TimerStore for NoTimers {
    async fn cancel_by_session(&self, _session_key: &SessionKey) -> Result<usize> {
        Ok(0)
    }
}
