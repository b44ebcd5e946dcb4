//! Event to effect translation.

mod payload;
mod session_processor;
mod timer_prompt;

pub use payload::{validate_effect_payload, TimerPayload, UserMessagePayload};
pub use session_processor::{AbandonReason, ProcessOutcome, ProcessorConfig, SessionProcessor};
pub use timer_prompt::{timer_message, timer_prompt};
