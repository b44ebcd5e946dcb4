//! Per-session sequencing dispatcher.

mod event_queue;

pub use event_queue::{EventProcessor, EventQueue, ProcessingHandle};
