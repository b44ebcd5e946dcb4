//! # courier-runtime
//!
//! Turns session events into delivered messages.
//!
//! - [`Pipeline`] appends events and routes them to per-session lanes
//! - [`EventQueue`] processes each session strictly in order, sessions in parallel
//! - [`SessionProcessor`] drives the agent, streams tokens live and persists effects
//! - [`EffectRunner`] drains the outbox, on an interval and on client reconnect
//!
//! External systems plug in through the traits in [`collaborators`].

#![deny(unsafe_code)]

pub mod collaborators;
pub mod errors;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod runner;

pub use collaborators::{
    Agent, AgentChunk, ChatContext, ChatMessage, DeliveryError, DeliveryHandler, FinalResponse,
    LiveTransport, NoLiveTransport, NoTimers, ProposedEffect, TimerStore,
};
pub use errors::{Result, RuntimeError};
pub use pipeline::Pipeline;
pub use processor::{
    AbandonReason, ProcessOutcome, ProcessorConfig, SessionProcessor, TimerPayload,
    UserMessagePayload,
};
pub use queue::{EventProcessor, EventQueue, ProcessingHandle};
pub use runner::{EffectOutcome, EffectRunner, EffectRunnerConfig, PollSummary};
