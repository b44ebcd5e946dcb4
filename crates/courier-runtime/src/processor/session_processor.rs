//! Session processor: turns one event into zero or more outbox effects.
//!
//! Flow per event:
//!
//! 1. Decompose the session key and build the agent input (user text, or a
//!    synthesized prompt for timers). User messages first cancel the session's
//!    timers and drop its undelivered effects.
//! 2. Stream the agent's answer under a deadline, forwarding tokens to a live
//!    connection when one exists.
//! 3. Persist the final answer as one `send_message` effect (already
//!    `completed` when the live connection took every token) plus any valid
//!    follow-up effects the agent proposed.
//!
//! Dedupe keys are derived from the checkpoint `"<threadId>:<seq>"`, so
//! replaying an event can never create a second copy of its effects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{checkpoint_id, derive_dedupe_key, DedupeMarker, SessionKey, SessionParts};
use courier_events::{
    EffectStatus, EffectType, EventRow, EventStoreError, EventType, NewEffect, OutboxStore,
};
use courier_settings::ProcessorSettings;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::payload::{validate_effect_payload, TimerPayload, UserMessagePayload};
use super::timer_prompt::timer_message;
use crate::collaborators::{
    Agent, AgentChunk, ChatContext, ChatMessage, FinalResponse, LiveTransport, TimerStore,
};
use crate::errors::{Result, RuntimeError};
use crate::queue::EventProcessor;

/// Processor tuning.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Deadline for one agent invocation.
    pub agent_timeout: Duration,
    /// Capacity of the agent output channel.
    pub stream_buffer_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&ProcessorSettings::default())
    }
}

impl From<&ProcessorSettings> for ProcessorConfig {
    fn from(settings: &ProcessorSettings) -> Self {
        Self {
            agent_timeout: Duration::from_millis(settings.agent_timeout_ms),
            stream_buffer_size: settings.stream_buffer_size,
        }
    }
}

/// Why an event finished without producing effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// A timer-originated invocation hit the deadline.
    Timeout,
    /// A timer-originated invocation was preempted by user input.
    Interrupted,
}

/// Result of processing one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The agent answered and its effects are persisted.
    Completed {
        /// Effects inserted by this run. Replayed duplicates are not counted.
        effects_created: usize,
        /// Whether the answer reached a live connection in full.
        delivered_live: bool,
    },
    /// Best-effort work dropped silently.
    Abandoned {
        /// What stopped it.
        reason: AbandonReason,
    },
}

/// Agent input derived from an event.
struct Invocation {
    message: ChatMessage,
    request_id: String,
    is_user_message: bool,
}

/// How the agent stream ended.
enum StreamEnd {
    Finished {
        response: FinalResponse,
        streamed: String,
        delivered_live: bool,
    },
    Cancelled,
}

/// Live forwarding state for one invocation.
struct LiveState {
    connected: Option<bool>,
    all_accepted: bool,
    forwarded: usize,
}

impl LiveState {
    fn new() -> Self {
        Self {
            connected: None,
            all_accepted: true,
            forwarded: 0,
        }
    }

    fn delivered(&self) -> bool {
        self.connected == Some(true) && self.all_accepted && self.forwarded > 0
    }
}

/// Translates events into effects by driving the agent.
pub struct SessionProcessor {
    outbox: OutboxStore,
    agent: Arc<dyn Agent>,
    transport: Arc<dyn LiveTransport>,
    timers: Arc<dyn TimerStore>,
    config: ProcessorConfig,
    /// Cancellation handles of in-flight timer-originated runs.
    autonomous: DashMap<SessionKey, CancellationToken>,
}

impl SessionProcessor {
    /// Create a processor.
    pub fn new(
        outbox: OutboxStore,
        agent: Arc<dyn Agent>,
        transport: Arc<dyn LiveTransport>,
        timers: Arc<dyn TimerStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            outbox,
            agent,
            transport,
            timers,
            config,
            autonomous: DashMap::new(),
        }
    }

    /// Cancel the in-flight timer-originated run for a session, if any.
    ///
    /// The cancelled event is abandoned silently. Returns whether a run was
    /// interrupted.
    pub fn interrupt_autonomous(&self, session_key: &SessionKey) -> bool {
        match self.autonomous.remove(session_key) {
            Some((_, token)) => {
                token.cancel();
                info!(session_key = %session_key, "interrupted autonomous run");
                true
            }
            None => false,
        }
    }

    /// Whether a timer-originated run is in flight for the session.
    pub fn has_autonomous_run(&self, session_key: &SessionKey) -> bool {
        self.autonomous.contains_key(session_key)
    }

    /// Process one event end to end.
    #[instrument(skip_all, fields(session_key = %event.session_key, seq = event.seq))]
    pub async fn process_event(&self, event: &EventRow) -> Result<ProcessOutcome> {
        let kind = event
            .event_kind()
            .ok_or_else(|| RuntimeError::UnsupportedEventType(event.event_type.clone()))?;
        let parts = event.session_key.parts();

        let invocation = match kind {
            EventType::UserMessage => self.prepare_user_message(event).await?,
            EventType::Timer => prepare_timer(event)?,
        };

        let cancel = CancellationToken::new();
        if !invocation.is_user_message {
            let _ = self
                .autonomous
                .insert(event.session_key.clone(), cancel.clone());
        }
        let ended = self.invoke_agent(event, &parts, &invocation, &cancel).await;
        if !invocation.is_user_message {
            let _ = self.autonomous.remove(&event.session_key);
        }

        let ended = match ended {
            Ok(ended) => ended,
            Err(RuntimeError::Timeout { ms }) if !invocation.is_user_message => {
                debug!(timeout_ms = ms, "timer run timed out, abandoning");
                return Ok(ProcessOutcome::Abandoned {
                    reason: AbandonReason::Timeout,
                });
            }
            Err(e) => return Err(e),
        };

        match ended {
            StreamEnd::Cancelled => {
                debug!("timer run interrupted, abandoning");
                Ok(ProcessOutcome::Abandoned {
                    reason: AbandonReason::Interrupted,
                })
            }
            StreamEnd::Finished {
                response,
                streamed,
                delivered_live,
            } => {
                let effects_created = self.persist_effects(
                    event,
                    &parts,
                    &invocation.request_id,
                    response,
                    &streamed,
                    delivered_live,
                )?;
                Ok(ProcessOutcome::Completed {
                    effects_created,
                    delivered_live,
                })
            }
        }
    }

    async fn prepare_user_message(&self, event: &EventRow) -> Result<Invocation> {
        let payload = UserMessagePayload::from_value(&event.payload)?;

        match self.timers.cancel_by_session(&event.session_key).await {
            Ok(0) => {}
            Ok(cancelled) => debug!(cancelled, "cancelled pending timers"),
            Err(e) => warn!(error = %e, "failed to cancel timers, continuing"),
        }
        let cleared = self
            .outbox
            .clear_pending_by_session(event.session_key.as_str())?;
        if cleared > 0 {
            debug!(cleared, "dropped undelivered effects superseded by user input");
        }

        Ok(Invocation {
            message: ChatMessage::Text { text: payload.text },
            request_id: payload.request_id.unwrap_or_else(|| event.id.clone()),
            is_user_message: true,
        })
    }

    async fn invoke_agent(
        &self,
        event: &EventRow,
        parts: &SessionParts,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd> {
        let ctx = ChatContext {
            thread_id: parts.thread_id.clone(),
            user_id: parts.user_id.clone(),
            message: invocation.message.clone(),
            correlation_id: event.id.clone(),
            cancel: cancel.clone(),
            is_user_message: invocation.is_user_message,
            buffer_size: self.config.stream_buffer_size,
        };
        let rx = self.agent.stream_chat(ctx);

        let timeout = self.config.agent_timeout;
        match tokio::time::timeout(timeout, self.consume_stream(rx, &parts.thread_id, cancel)).await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms = ms, user = invocation.is_user_message, "agent deadline elapsed");
                Err(RuntimeError::Timeout { ms })
            }
        }
    }

    async fn consume_stream(
        &self,
        mut rx: mpsc::Receiver<AgentChunk>,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd> {
        let mut streamed = String::new();
        let mut live = LiveState::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                chunk = rx.recv() => chunk,
            };

            match chunk {
                Some(AgentChunk::Token(token)) => {
                    streamed.push_str(&token);
                    self.forward(thread_id, &token, &mut live).await;
                }
                Some(AgentChunk::Final(response)) => {
                    if live.forwarded == 0 {
                        let content = final_content(&response, &streamed).to_owned();
                        if !content.is_empty() {
                            self.forward(thread_id, &content, &mut live).await;
                        }
                    }
                    return Ok(StreamEnd::Finished {
                        response,
                        streamed,
                        delivered_live: live.delivered(),
                    });
                }
                Some(AgentChunk::Error { message, retryable }) => {
                    return Err(RuntimeError::Agent { message, retryable });
                }
                None => {
                    return Err(RuntimeError::Agent {
                        message: "agent stream closed before a final response".into(),
                        retryable: true,
                    });
                }
            }
        }
    }

    async fn forward(&self, thread_id: &str, token: &str, live: &mut LiveState) {
        let connected = *live
            .connected
            .get_or_insert_with(|| self.transport.is_connected(thread_id));
        if !connected || !live.all_accepted {
            return;
        }
        if self.transport.send_token(thread_id, token).await {
            live.forwarded += 1;
        } else {
            live.all_accepted = false;
            debug!(thread_id, "live connection rejected a token, falling back to outbox");
        }
    }

    fn persist_effects(
        &self,
        event: &EventRow,
        parts: &SessionParts,
        request_id: &str,
        response: FinalResponse,
        streamed: &str,
        delivered_live: bool,
    ) -> Result<usize> {
        let checkpoint = checkpoint_id(&parts.thread_id, event.seq);
        let content = final_content(&response, streamed).to_owned();
        let mut created = 0;

        let keyed = json!({ "content": content, "requestId": request_id });
        let dedupe_key = derive_dedupe_key(
            &checkpoint,
            EffectType::SendMessage.as_str(),
            &keyed,
            DedupeMarker::Final,
        );
        let mut payload = keyed;
        if let Some(obj) = payload.as_object_mut() {
            if let Some(latency) = response.latency_ms {
                let _ = obj.insert("latencyMs".into(), Value::from(latency));
            }
            if let Some(usage) = response.token_usage {
                let _ = obj.insert("tokenUsage".into(), usage);
            }
        }
        let status = if delivered_live {
            EffectStatus::Completed
        } else {
            EffectStatus::Pending
        };
        if content.trim().is_empty() {
            warn!(checkpoint = %checkpoint, "agent produced no content, skipping send_message");
        } else {
            created += self.create_effect(NewEffect {
                session_key: event.session_key.as_str(),
                checkpoint_id: &checkpoint,
                effect_type: EffectType::SendMessage,
                payload,
                dedupe_key: &dedupe_key,
                status: Some(status),
            })?;
        }

        for (index, proposed) in response.effects.into_iter().enumerate() {
            let kind = match validate_effect_payload(&proposed.effect_type, &proposed.payload) {
                Ok(kind) => kind,
                Err(reason) => {
                    warn!(index, effect_type = %proposed.effect_type, %reason, "dropping invalid effect");
                    continue;
                }
            };
            let dedupe_key = derive_dedupe_key(
                &checkpoint,
                kind.as_str(),
                &proposed.payload,
                DedupeMarker::Sequence(index as u64),
            );
            created += self.create_effect(NewEffect {
                session_key: event.session_key.as_str(),
                checkpoint_id: &checkpoint,
                effect_type: kind,
                payload: proposed.payload,
                dedupe_key: &dedupe_key,
                status: None,
            })?;
        }

        debug!(checkpoint = %checkpoint, created, delivered_live, "effects persisted");
        Ok(created)
    }

    /// Insert one effect; a dedupe collision is a replay and counts as zero.
    fn create_effect(&self, effect: NewEffect<'_>) -> Result<usize> {
        match self.outbox.create(effect) {
            Ok(_) => Ok(1),
            Err(EventStoreError::DuplicateDedupeKey(key)) => {
                debug!(dedupe_key = %key, "effect already persisted, skipping replay");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventProcessor for SessionProcessor {
    async fn process(&self, event: EventRow) -> Result<ProcessOutcome> {
        self.process_event(&event).await
    }
}

fn prepare_timer(event: &EventRow) -> Result<Invocation> {
    let timer = TimerPayload::from_value(&event.payload)?;
    Ok(Invocation {
        message: timer_message(&timer),
        request_id: timer.timer_id,
        is_user_message: false,
    })
}

fn final_content<'a>(response: &'a FinalResponse, streamed: &'a str) -> &'a str {
    if response.message.is_empty() {
        streamed
    } else {
        &response.message
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
