//! Outbox delivery.

mod effect_runner;

pub use effect_runner::{EffectOutcome, EffectRunner, EffectRunnerConfig, PollSummary};
