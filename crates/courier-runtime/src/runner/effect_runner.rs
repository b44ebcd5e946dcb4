//! Effect runner: drains the outbox through a delivery handler.
//!
//! Two entry points share one executor:
//!
//! - the interval sweep fetches a global batch and delivers it concurrently,
//!   each tick's batch in its own task so a slow handler never delays the
//!   next tick;
//! - [`EffectRunner::poll_for_session`] delivers one session's backlog
//!   strictly in creation order, for clients that just reconnected. The drain
//!   halts at the first effect left pending so later ones never overtake it.
//!
//! Every execution starts with [`OutboxStore::try_claim`], so overlapping
//! sweeps (or other processes) never deliver the same effect twice.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use courier_events::{EffectRow, EffectStatus, OutboxStore};
use courier_settings::RunnerSettings;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{DeliveryError, DeliveryHandler};
use crate::errors::panic_message;

/// Runner tuning.
#[derive(Clone, Debug)]
pub struct EffectRunnerConfig {
    /// Interval between global sweeps.
    pub poll_interval: Duration,
    /// Maximum effects fetched per sweep.
    pub batch_size: u32,
    /// Attempts before an undeliverable effect is failed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for EffectRunnerConfig {
    fn default() -> Self {
        Self::from(&RunnerSettings::default())
    }
}

impl From<&RunnerSettings> for EffectRunnerConfig {
    fn from(settings: &RunnerSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            batch_size: settings.batch_size,
            max_attempts: settings.max_attempts,
        }
    }
}

/// What happened to one effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectOutcome {
    /// Delivered, now `completed`.
    Completed,
    /// No transport, back to `pending`.
    Reverted,
    /// Handler error, unknown type or retries exhausted, now `failed`.
    Failed,
    /// Claimed elsewhere, or a store error left it untouched.
    Skipped,
}

/// Tally of one poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Effects delivered.
    pub completed: usize,
    /// Effects reverted to pending.
    pub reverted: usize,
    /// Effects failed.
    pub failed: usize,
    /// Effects not executed by this poll.
    pub skipped: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: EffectOutcome) {
        match outcome {
            EffectOutcome::Completed => self.completed += 1,
            EffectOutcome::Reverted => self.reverted += 1,
            EffectOutcome::Failed => self.failed += 1,
            EffectOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Effects looked at.
    pub fn total(&self) -> usize {
        self.completed + self.reverted + self.failed + self.skipped
    }
}

/// Clone-able core shared by the runner and its spawned sweep tasks.
#[derive(Clone)]
struct Executor {
    outbox: OutboxStore,
    batch_size: u32,
    max_attempts: Option<u32>,
}

impl Executor {
    async fn sweep(&self, handler: &dyn DeliveryHandler) -> PollSummary {
        let effects = match self.outbox.get_pending(self.batch_size, None) {
            Ok(effects) => effects,
            Err(e) => {
                error!(error = %e, "failed to fetch pending effects");
                return PollSummary::default();
            }
        };
        if effects.is_empty() {
            return PollSummary::default();
        }

        let outcomes =
            futures::future::join_all(effects.iter().map(|effect| self.execute(effect, handler)))
                .await;
        let mut summary = PollSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        debug!(?summary, "outbox sweep finished");
        summary
    }

    async fn drain_session(&self, session_key: &str, handler: &dyn DeliveryHandler) -> PollSummary {
        let mut summary = PollSummary::default();
        let effects = match self.outbox.get_pending(u32::MAX, Some(session_key)) {
            Ok(effects) => effects,
            Err(e) => {
                error!(session_key, error = %e, "failed to fetch session effects");
                return summary;
            }
        };
        for effect in &effects {
            let outcome = self.execute(effect, handler).await;
            summary.record(outcome);
            if matches!(outcome, EffectOutcome::Reverted | EffectOutcome::Skipped) {
                debug!(effect_id = %effect.id, ?outcome, "session drain halted to keep order");
                break;
            }
        }
        summary
    }

    #[instrument(skip_all, fields(effect_id = %effect.id, session_key = %effect.session_key))]
    async fn execute(&self, effect: &EffectRow, handler: &dyn DeliveryHandler) -> EffectOutcome {
        if effect.effect_kind().is_none() {
            warn!(effect_type = %effect.effect_type, "unrecognised effect type, failing");
            return self.finish(effect, EffectStatus::Pending, EffectStatus::Failed, EffectOutcome::Failed);
        }

        match self.outbox.try_claim(&effect.id) {
            Ok(true) => {}
            Ok(false) => {
                debug!("effect claimed elsewhere");
                return EffectOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "failed to claim effect");
                return EffectOutcome::Skipped;
            }
        }
        let attempt = effect.attempt_count + 1;

        let delivered = AssertUnwindSafe(handler.deliver(effect))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(DeliveryError(format!(
                    "delivery handler panicked: {}",
                    panic_message(&panic)
                )))
            });

        match delivered {
            Ok(true) => {
                debug!(attempt, "effect delivered");
                self.finish(effect, EffectStatus::Executing, EffectStatus::Completed, EffectOutcome::Completed)
            }
            Ok(false) if self.exhausted(attempt) => {
                warn!(attempt, "no transport and retries exhausted, failing effect");
                self.finish(effect, EffectStatus::Executing, EffectStatus::Failed, EffectOutcome::Failed)
            }
            Ok(false) => {
                debug!(attempt, "no live transport, reverting to pending");
                self.finish(effect, EffectStatus::Executing, EffectStatus::Pending, EffectOutcome::Reverted)
            }
            Err(e) => {
                warn!(attempt, error = %e, "delivery failed, failing effect");
                self.finish(effect, EffectStatus::Executing, EffectStatus::Failed, EffectOutcome::Failed)
            }
        }
    }

    fn exhausted(&self, attempt: i64) -> bool {
        self.max_attempts
            .is_some_and(|max| attempt >= i64::from(max))
    }

    fn finish(
        &self,
        effect: &EffectRow,
        expected: EffectStatus,
        to: EffectStatus,
        outcome: EffectOutcome,
    ) -> EffectOutcome {
        match self.outbox.update_status(&effect.id, to) {
            Ok(_) => outcome,
            Err(e) => {
                error!(from = %expected, to = %to, error = %e, "failed to record effect status");
                EffectOutcome::Skipped
            }
        }
    }
}

#[derive(Default)]
struct RunnerState {
    handler: Option<Arc<dyn DeliveryHandler>>,
    cancel: Option<CancellationToken>,
}

/// Background and on-demand outbox delivery.
pub struct EffectRunner {
    executor: Executor,
    poll_interval: Duration,
    state: Mutex<RunnerState>,
}

impl EffectRunner {
    /// Create a stopped runner.
    pub fn new(outbox: OutboxStore, config: EffectRunnerConfig) -> Self {
        Self {
            executor: Executor {
                outbox,
                batch_size: config.batch_size,
                max_attempts: config.max_attempts,
            },
            poll_interval: config.poll_interval,
            state: Mutex::new(RunnerState::default()),
        }
    }

    /// Arm the interval sweep with `handler` and sweep once immediately.
    ///
    /// A second call while running is ignored with a warning.
    pub fn start(&self, handler: Arc<dyn DeliveryHandler>) {
        let mut state = self.state.lock();
        if state.cancel.is_some() {
            warn!("effect runner already started, ignoring");
            return;
        }
        let cancel = CancellationToken::new();
        state.handler = Some(Arc::clone(&handler));
        state.cancel = Some(cancel.clone());
        drop(state);

        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            batch_size = self.executor.batch_size,
            "effect runner started"
        );
        let _ = tokio::spawn(poll_loop(
            self.executor.clone(),
            handler,
            self.poll_interval,
            cancel,
        ));
    }

    /// Disarm the sweep and forget the handler. Safe to call at any time.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.handler = None;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
            info!("effect runner stopped");
        }
    }

    /// Whether the interval sweep is armed.
    pub fn is_running(&self) -> bool {
        self.state.lock().cancel.is_some()
    }

    fn handler(&self) -> Option<Arc<dyn DeliveryHandler>> {
        self.state.lock().handler.clone()
    }

    /// Run one global sweep now, concurrently across the fetched batch.
    pub async fn process_effects(&self) -> PollSummary {
        match self.handler() {
            Some(handler) => self.executor.sweep(handler.as_ref()).await,
            None => {
                warn!("process_effects called before start, nothing delivered");
                PollSummary::default()
            }
        }
    }

    /// Deliver one session's pending effects in creation order, one at a time.
    #[instrument(skip(self))]
    pub async fn poll_for_session(&self, session_key: &str) -> PollSummary {
        match self.handler() {
            Some(handler) => self.executor.drain_session(session_key, handler.as_ref()).await,
            None => {
                warn!("poll_for_session called before start, nothing delivered");
                PollSummary::default()
            }
        }
    }

    /// Execute a single effect with the current handler.
    pub async fn execute_effect(&self, effect: &EffectRow) -> EffectOutcome {
        match self.handler() {
            Some(handler) => self.executor.execute(effect, handler.as_ref()).await,
            None => {
                warn!(effect_id = %effect.id, "execute_effect called before start");
                EffectOutcome::Skipped
            }
        }
    }
}

impl Drop for EffectRunner {
    fn drop(&mut self) {
        if let Some(cancel) = self.state.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

async fn poll_loop(
    executor: Executor,
    handler: Arc<dyn DeliveryHandler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let executor = executor.clone();
                let handler = Arc::clone(&handler);
                let _ = tokio::spawn(async move {
                    let _ = executor.sweep(handler.as_ref()).await;
                });
            }
        }
    }
    debug!("effect runner poll loop exited");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_events::{new_in_memory, run_migrations, ConnectionConfig, EffectType, NewEffect};
    use serde_json::json;

    fn outbox() -> OutboxStore {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let _ = run_migrations(&pool.get().unwrap()).unwrap();
        OutboxStore::new(pool)
    }

    fn add(outbox: &OutboxStore, session: &str, content: &str) -> EffectRow {
        outbox
            .create(NewEffect {
                session_key: session,
                checkpoint_id: "t:1",
                effect_type: EffectType::SendMessage,
                payload: json!({"content": content}),
                dedupe_key: &format!("dk_{session}_{content}"),
                status: None,
            })
            .unwrap()
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Deliver,
        NoTransport,
        Fail,
        Panic,
    }

    struct Handler {
        mode: Mode,
        seen: Mutex<Vec<String>>,
    }

    impl Handler {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl DeliveryHandler for Handler {
        async fn deliver(&self, effect: &EffectRow) -> Result<bool, DeliveryError> {
            self.seen
                .lock()
                .push(effect.payload["content"].as_str().unwrap_or_default().to_string());
            match self.mode {
                Mode::Deliver => Ok(true),
                Mode::NoTransport => Ok(false),
                Mode::Fail => Err(DeliveryError("socket closed".into())),
                Mode::Panic => panic!("handler bug"),
            }
        }
    }

    fn runner(outbox: &OutboxStore, max_attempts: Option<u32>) -> EffectRunner {
        EffectRunner::new(
            outbox.clone(),
            EffectRunnerConfig {
                poll_interval: Duration::from_secs(3600),
                batch_size: 50,
                max_attempts,
            },
        )
    }

    fn status(outbox: &OutboxStore, effect: &EffectRow) -> EffectStatus {
        outbox.get(&effect.id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn poll_for_session_delivers_in_order_and_only_that_session() {
        let outbox = outbox();
        let s1 = add(&outbox, "u1:a1:S", "first");
        let other = add(&outbox, "u1:a1:T", "other");
        let s2 = add(&outbox, "u1:a1:S", "second");
        let runner = runner(&outbox, None);
        let handler = Handler::new(Mode::Deliver);
        runner.state.lock().handler = Some(handler.clone());

        let summary = runner.poll_for_session("u1:a1:S").await;
        assert_eq!(summary.completed, 2);
        assert_eq!(handler.seen(), vec!["first", "second"]);
        assert_eq!(status(&outbox, &s1), EffectStatus::Completed);
        assert_eq!(status(&outbox, &s2), EffectStatus::Completed);
        assert_eq!(status(&outbox, &other), EffectStatus::Pending);
    }

    #[tokio::test]
    async fn no_transport_reverts_to_pending() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(Handler::new(Mode::NoTransport));

        let summary = runner.process_effects().await;
        assert_eq!(summary.reverted, 1);
        let row = outbox.get(&effect.id).unwrap().unwrap();
        assert_eq!(row.status, EffectStatus::Pending);
        assert_eq!(row.attempt_count, 1);
    }

    #[tokio::test]
    async fn handler_error_fails_effect() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(Handler::new(Mode::Fail));

        assert_eq!(runner.execute_effect(&effect).await, EffectOutcome::Failed);
        assert_eq!(status(&outbox, &effect), EffectStatus::Failed);
    }

    #[tokio::test]
    async fn handler_panic_fails_only_that_effect() {
        let outbox = outbox();
        let a = add(&outbox, "u1:a1:S", "a");
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(Handler::new(Mode::Panic));
        assert_eq!(runner.execute_effect(&a).await, EffectOutcome::Failed);
        assert_eq!(status(&outbox, &a), EffectStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_type_fails_without_calling_handler() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let mut unknown = effect.clone();
        unknown.effect_type = "send_fax".into();
        let handler = Handler::new(Mode::Deliver);
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(handler.clone());

        assert_eq!(runner.execute_effect(&unknown).await, EffectOutcome::Failed);
        assert!(handler.seen().is_empty());
        assert_eq!(status(&outbox, &effect), EffectStatus::Failed);
    }

    #[tokio::test]
    async fn max_attempts_bounds_retries() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let runner = runner(&outbox, Some(2));
        runner.state.lock().handler = Some(Handler::new(Mode::NoTransport));

        assert_eq!(runner.process_effects().await.reverted, 1);
        assert_eq!(runner.process_effects().await.failed, 1);
        let row = outbox.get(&effect.id).unwrap().unwrap();
        assert_eq!(row.status, EffectStatus::Failed);
        assert_eq!(row.attempt_count, 2);
    }

    #[tokio::test]
    async fn claimed_effect_is_skipped() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        assert!(outbox.try_claim(&effect.id).unwrap());
        let handler = Handler::new(Mode::Deliver);
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(handler.clone());

        assert_eq!(runner.execute_effect(&effect).await, EffectOutcome::Skipped);
        assert!(handler.seen().is_empty());
    }

    #[tokio::test]
    async fn polls_without_handler_do_nothing() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let runner = runner(&outbox, None);
        assert_eq!(runner.poll_for_session("u1:a1:S").await, PollSummary::default());
        assert_eq!(runner.process_effects().await, PollSummary::default());
        assert_eq!(status(&outbox, &effect), EffectStatus::Pending);
    }

    #[tokio::test]
    async fn start_sweeps_immediately() {
        let outbox = outbox();
        let effect = add(&outbox, "u1:a1:S", "hi");
        let runner = runner(&outbox, None);
        runner.start(Handler::new(Mode::Deliver));
        assert!(runner.is_running());

        for _ in 0..100 {
            if status(&outbox, &effect) == EffectStatus::Completed {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status(&outbox, &effect), EffectStatus::Completed);
        runner.stop();
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let outbox = outbox();
        let runner = runner(&outbox, None);
        runner.stop();
        runner.start(Handler::new(Mode::Deliver));
        runner.start(Handler::new(Mode::Fail));
        assert!(runner.is_running());
        runner.stop();
        runner.stop();
        assert!(!runner.is_running());
        assert!(runner.handler().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_picks_up_effects_added_later() {
        let outbox = outbox();
        let runner = EffectRunner::new(
            outbox.clone(),
            EffectRunnerConfig {
                poll_interval: Duration::from_millis(100),
                batch_size: 10,
                max_attempts: None,
            },
        );
        runner.start(Handler::new(Mode::Deliver));
        time::sleep(Duration::from_millis(150)).await;

        let late = add(&outbox, "u1:a1:S", "late");
        time::sleep(Duration::from_millis(200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(status(&outbox, &late), EffectStatus::Completed);
        runner.stop();
    }

    /// Scripted per-call results; once exhausted every call delivers.
    struct Scripted {
        results: Mutex<Vec<Result<bool, &'static str>>>,
        delivered: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<bool, &'static str>>) -> Arc<Self> {
            results.reverse();
            Arc::new(Self {
                results: Mutex::new(results),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DeliveryHandler for Scripted {
        async fn deliver(&self, effect: &EffectRow) -> Result<bool, DeliveryError> {
            let content = effect.payload["content"].as_str().unwrap_or_default().to_string();
            let next = self.results.lock().pop().unwrap_or(Ok(true));
            match next {
                Ok(true) => {
                    self.delivered.lock().push(content);
                    Ok(true)
                }
                Ok(false) => Ok(false),
                Err("panic") => panic!("handler bug on {content}"),
                Err(message) => Err(DeliveryError(message.into())),
            }
        }
    }

    #[tokio::test]
    async fn session_drain_stops_at_reverted_effect() {
        let outbox = outbox();
        let first = add(&outbox, "u1:a1:S", "first");
        let second = add(&outbox, "u1:a1:S", "second");
        let handler = Scripted::new(vec![Ok(false)]);
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(handler.clone());

        let summary = runner.poll_for_session("u1:a1:S").await;
        assert_eq!(summary, PollSummary { reverted: 1, ..PollSummary::default() });
        assert!(handler.delivered.lock().is_empty());
        assert_eq!(status(&outbox, &second), EffectStatus::Pending);

        let summary = runner.poll_for_session("u1:a1:S").await;
        assert_eq!(summary.completed, 2);
        assert_eq!(*handler.delivered.lock(), vec!["first", "second"]);
        assert_eq!(status(&outbox, &first), EffectStatus::Completed);
    }

    #[tokio::test]
    async fn session_drain_continues_past_failed_effect() {
        let outbox = outbox();
        let first = add(&outbox, "u1:a1:S", "first");
        let _ = add(&outbox, "u1:a1:S", "second");
        let handler = Scripted::new(vec![Err("socket closed")]);
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(handler.clone());

        let summary = runner.poll_for_session("u1:a1:S").await;
        assert_eq!((summary.failed, summary.completed), (1, 1));
        assert_eq!(status(&outbox, &first), EffectStatus::Failed);
        assert_eq!(*handler.delivered.lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn sweep_isolates_failures_across_batch() {
        let outbox = outbox();
        let effects: Vec<EffectRow> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, content)| add(&outbox, &format!("u1:a1:S{i}"), content))
            .collect();
        let handler = Scripted::new(vec![Ok(true), Err("panic"), Err("socket closed"), Ok(false)]);
        let runner = runner(&outbox, None);
        runner.state.lock().handler = Some(handler.clone());

        let summary = runner.process_effects().await;
        assert_eq!(summary.total(), 4);
        assert_eq!(
            summary,
            PollSummary {
                completed: 1,
                reverted: 1,
                failed: 2,
                skipped: 0,
            }
        );
        let statuses: Vec<EffectStatus> = effects.iter().map(|e| status(&outbox, e)).collect();
        let count = |s: EffectStatus| statuses.iter().filter(|x| **x == s).count();
        assert_eq!(count(EffectStatus::Completed), 1);
        assert_eq!(count(EffectStatus::Failed), 2);
        assert_eq!(count(EffectStatus::Pending), 1);
        assert_eq!(count(EffectStatus::Executing), 0);
    }
}
