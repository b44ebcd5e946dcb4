//! Ingress: append an event to the log, then hand it to its session lane.
//!
//! A user message preempts the session's in-flight timer run before it is
//! appended.

use std::sync::Arc;

use courier_core::SessionKey;
use courier_events::{EventRow, EventStore, EventStoreError, EventType, NewEvent};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Result, RuntimeError};
use crate::processor::{SessionProcessor, TimerPayload, UserMessagePayload};
use crate::queue::{EventProcessor, EventQueue, ProcessingHandle};

/// Appends racing another writer retry this many times before giving up.
const MAX_APPEND_ATTEMPTS: usize = 5;

/// Event log, session queue and processor wired together.
#[derive(Clone)]
pub struct Pipeline {
    events: EventStore,
    queue: EventQueue,
    processor: Arc<SessionProcessor>,
}

impl Pipeline {
    /// Compose a pipeline. Call [`Pipeline::start`] before expecting progress.
    pub fn new(events: EventStore, processor: Arc<SessionProcessor>) -> Self {
        Self {
            events,
            queue: EventQueue::new(),
            processor,
        }
    }

    /// Start draining session lanes.
    pub fn start(&self) -> Result<()> {
        let processor: Arc<dyn EventProcessor> = self.processor.clone();
        self.queue.start(processor)
    }

    /// Stop draining. Events already enqueued stay buffered.
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// The underlying queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// The underlying event log.
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Append a user message and enqueue it.
    ///
    /// Interrupts any running timer prompt for the session first.
    #[instrument(skip_all, fields(session_key = %session_key))]
    pub fn submit_user_message(
        &self,
        session_key: &SessionKey,
        text: &str,
        request_id: Option<&str>,
    ) -> Result<(EventRow, ProcessingHandle)> {
        let payload = UserMessagePayload {
            text: text.to_owned(),
            request_id: request_id.map(str::to_owned),
        };
        let payload = serde_json::to_value(&payload)
            .map_err(|e| RuntimeError::Internal(format!("encode user_message: {e}")))?;
        let _ = UserMessagePayload::from_value(&payload)?;

        if self.processor.interrupt_autonomous(session_key) {
            debug!("user message preempted timer run");
        }
        self.append_and_enqueue(session_key, EventType::UserMessage, payload)
    }

    /// Append a fired timer and enqueue it.
    #[instrument(skip_all, fields(session_key = %session_key, timer_id = %timer.timer_id))]
    pub fn submit_timer(
        &self,
        session_key: &SessionKey,
        timer: &TimerPayload,
    ) -> Result<(EventRow, ProcessingHandle)> {
        let payload = serde_json::to_value(timer)
            .map_err(|e| RuntimeError::Internal(format!("encode timer: {e}")))?;
        self.append_and_enqueue(session_key, EventType::Timer, payload)
    }

    fn append_and_enqueue(
        &self,
        session_key: &SessionKey,
        event_type: EventType,
        payload: Value,
    ) -> Result<(EventRow, ProcessingHandle)> {
        let event = self.append(session_key, event_type, payload)?;
        info!(seq = event.seq, event_type = %event_type, event_id = %event.id, "event submitted");
        let handle = self.queue.enqueue(event.clone());
        Ok((event, handle))
    }

    fn append(
        &self,
        session_key: &SessionKey,
        event_type: EventType,
        payload: Value,
    ) -> Result<EventRow> {
        let mut attempt = 1;
        loop {
            let seq = self.events.get_next_seq(session_key.as_str())?;
            let created = self.events.create(NewEvent {
                session_key: session_key.as_str(),
                seq,
                event_type,
                payload: payload.clone(),
            });
            match created {
                Ok(event) => return Ok(event),
                Err(EventStoreError::SequenceConflict { seq, .. }) if attempt < MAX_APPEND_ATTEMPTS => {
                    warn!(seq, attempt, "sequence taken by another writer, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Agent, AgentChunk, ChatContext, FinalResponse, NoLiveTransport, NoTimers};
    use crate::processor::{ProcessOutcome, ProcessorConfig};
    use assert_matches::assert_matches;
    use courier_events::{new_in_memory, ConnectionConfig, OutboxStore};
    use tokio::sync::mpsc;

    struct Echo;

    impl Agent for Echo {
        fn stream_chat(&self, ctx: ChatContext) -> mpsc::Receiver<AgentChunk> {
            let (tx, rx) = ctx.channel();
            let reply = format!("echo: {}", ctx.message.text());
            let _ = tokio::spawn(async move {
                let _ = tx
                    .send(AgentChunk::Final(FinalResponse {
                        message: reply,
                        ..FinalResponse::default()
                    }))
                    .await;
            });
            rx
        }
    }

    fn pipeline() -> (Pipeline, OutboxStore) {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let events = EventStore::new(pool.clone());
        let _ = events.migrate().unwrap();
        let outbox = OutboxStore::new(pool);
        let processor = Arc::new(SessionProcessor::new(
            outbox.clone(),
            Arc::new(Echo),
            Arc::new(NoLiveTransport),
            Arc::new(NoTimers),
            ProcessorConfig::default(),
        ));
        (Pipeline::new(events, processor), outbox)
    }

    fn key(thread: &str) -> SessionKey {
        SessionKey::new("u1", "a1", thread).unwrap()
    }

    #[tokio::test]
    async fn submissions_get_consecutive_seqs() {
        let (pipeline, _) = pipeline();
        let (first, _) = pipeline.submit_user_message(&key("t1"), "hi", None).unwrap();
        let (second, _) = pipeline
            .submit_timer(&key("t1"), &TimerPayload::new("tm-1"))
            .unwrap();
        let (other, _) = pipeline.submit_user_message(&key("t2"), "yo", None).unwrap();
        assert_eq!((first.seq, second.seq, other.seq), (1, 2, 1));
        assert_eq!(second.event_type, "timer");
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_append() {
        let (pipeline, _) = pipeline();
        let err = pipeline.submit_user_message(&key("t1"), "  ", None).unwrap_err();
        assert_matches!(err, RuntimeError::InvalidPayload(_));
        assert_eq!(pipeline.events().count_by_session("u1:a1:t1").unwrap(), 0);
    }

    #[tokio::test]
    async fn handle_resolves_after_start() {
        let (pipeline, outbox) = pipeline();
        let (_, handle) = pipeline
            .submit_user_message(&key("t1"), "hello", Some("req-1"))
            .unwrap();
        pipeline.start().unwrap();
        let outcome = handle.await.unwrap();
        assert_matches!(outcome, ProcessOutcome::Completed { effects_created: 1, delivered_live: false });

        let pending = outbox.get_pending(10, Some("u1:a1:t1")).unwrap();
        assert_eq!(pending[0].payload["content"], "echo: hello");
        pipeline.stop();
    }

    #[tokio::test]
    async fn append_skips_seq_taken_by_another_writer() {
        let (pipeline, _) = pipeline();
        let _ = pipeline
            .events()
            .create(NewEvent {
                session_key: "u1:a1:t1",
                seq: 1,
                event_type: EventType::UserMessage,
                payload: serde_json::json!({"text": "from elsewhere"}),
            })
            .unwrap();
        let (event, _) = pipeline.submit_user_message(&key("t1"), "mine", None).unwrap();
        assert_eq!(event.seq, 2);
    }
}
