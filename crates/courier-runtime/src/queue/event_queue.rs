//! Event queue: one FIFO lane per session, lanes run concurrently.
//!
//! All queue state (run flag, processor, lanes) sits behind one
//! `parking_lot::Mutex` that is never held across an `.await`. A lane owns at
//! most one worker task; the worker pops the next job under the lock, runs it
//! unlocked, and exits when the lane drains (removing the lane) or when the
//! queue is stopped (leaving the remaining jobs buffered for the next start).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use courier_core::SessionKey;
use courier_events::EventRow;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::errors::{panic_message, Result, RuntimeError};
use crate::processor::ProcessOutcome;

/// Callback that processes one event at a time per session.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Process one event. Never called concurrently for the same session.
    async fn process(&self, event: EventRow) -> Result<ProcessOutcome>;
}

/// Settles when the enqueued event has been processed.
#[must_use = "the handle carries the processing result"]
#[derive(Debug)]
pub struct ProcessingHandle {
    rx: oneshot::Receiver<Result<ProcessOutcome>>,
}

impl Future for ProcessingHandle {
    type Output = Result<ProcessOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RuntimeError::QueueClosed)))
    }
}

struct Job {
    event: EventRow,
    reply: oneshot::Sender<Result<ProcessOutcome>>,
}

#[derive(Default)]
struct Lane {
    jobs: VecDeque<Job>,
    has_worker: bool,
    in_flight: bool,
}

impl Lane {
    fn depth(&self) -> usize {
        self.jobs.len() + usize::from(self.in_flight)
    }
}

#[derive(Default)]
struct QueueState {
    running: bool,
    processor: Option<Arc<dyn EventProcessor>>,
    lanes: HashMap<SessionKey, Lane>,
}

/// Per-session serializing dispatcher.
///
/// Cheap to clone; clones share the same lanes.
#[derive(Clone, Default)]
pub struct EventQueue {
    state: Arc<Mutex<QueueState>>,
}

impl EventQueue {
    /// Create a stopped queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm dispatch with `processor` and drain anything buffered.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyStarted`] if the queue is already running.
    pub fn start(&self, processor: Arc<dyn EventProcessor>) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(RuntimeError::AlreadyStarted("event queue"));
        }
        state.running = true;
        state.processor = Some(processor);

        let mut resumed = 0;
        for (key, lane) in &mut state.lanes {
            if !lane.has_worker && !lane.jobs.is_empty() {
                lane.has_worker = true;
                resumed += 1;
                let _ = tokio::spawn(run_lane(Arc::clone(&self.state), key.clone()));
            }
        }
        info!(resumed_lanes = resumed, "event queue started");
        Ok(())
    }

    /// Halt dispatch. The event currently running in each lane finishes;
    /// everything behind it waits for the next [`start`](Self::start).
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.processor = None;
        info!("event queue stopped");
    }

    /// Whether dispatch is armed.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Append `event` to its session's lane.
    pub fn enqueue(&self, event: EventRow) -> ProcessingHandle {
        let (reply, rx) = oneshot::channel();
        let key = event.session_key.clone();
        let seq = event.seq;

        let mut state = self.state.lock();
        let running = state.running;
        let lane = state.lanes.entry(key.clone()).or_default();
        lane.jobs.push_back(Job { event, reply });
        debug!(session_key = %key, seq, depth = lane.depth(), "event enqueued");

        if running && !lane.has_worker {
            lane.has_worker = true;
            let _ = tokio::spawn(run_lane(Arc::clone(&self.state), key));
        }
        ProcessingHandle { rx }
    }

    /// Outstanding events for one session, including the one running.
    pub fn queue_depth(&self, session_key: &SessionKey) -> usize {
        self.state.lock().lanes.get(session_key).map_or(0, Lane::depth)
    }

    /// Outstanding events across all sessions.
    pub fn total_queue_depth(&self) -> usize {
        self.state.lock().lanes.values().map(Lane::depth).sum()
    }
}

async fn run_lane(state: Arc<Mutex<QueueState>>, key: SessionKey) {
    loop {
        let (job, processor) = {
            let mut guard = state.lock();
            let state = &mut *guard;
            let Some(lane) = state.lanes.get_mut(&key) else {
                return;
            };
            lane.in_flight = false;

            let processor = match (&state.processor, state.running) {
                (Some(p), true) => Arc::clone(p),
                _ => {
                    lane.has_worker = false;
                    return;
                }
            };
            match lane.jobs.pop_front() {
                Some(job) => {
                    lane.in_flight = true;
                    (job, processor)
                }
                None => {
                    let _ = state.lanes.remove(&key);
                    return;
                }
            }
        };

        let seq = job.event.seq;
        let result = AssertUnwindSafe(processor.process(job.event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let msg = panic_message(&panic);
                error!(session_key = %key, seq, panic = %msg, "event processor panicked");
                Err(RuntimeError::Internal(format!("event processor panicked: {msg}")))
            });

        if let Err(e) = &result {
            warn!(
                session_key = %key,
                seq,
                category = e.category(),
                error = %e,
                "event processing failed"
            );
        }
        let _ = job.reply.send(result);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
