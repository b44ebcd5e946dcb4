//! Typed views of event and effect payloads.

use courier_events::EffectType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, RuntimeError};

/// Trigger type used when a timer payload does not name one.
pub const DEFAULT_TRIGGER_TYPE: &str = "check_in";

/// Payload of a `user_message` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePayload {
    /// Message body, never empty.
    pub text: String,
    /// Client correlation ID. Defaults to the event ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl UserMessagePayload {
    /// Parse and validate an event payload.
    pub fn from_value(payload: &Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| RuntimeError::InvalidPayload(format!("user_message: {e}")))?;
        if parsed.text.trim().is_empty() {
            return Err(RuntimeError::InvalidPayload("user_message: text is empty".into()));
        }
        Ok(parsed)
    }
}

fn default_trigger_type() -> String {
    DEFAULT_TRIGGER_TYPE.to_string()
}

/// Payload of a `timer` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPayload {
    /// Scheduler-side timer ID, reused as the request ID.
    pub timer_id: String,
    /// Why the timer exists, e.g. `check_in`, `reminder`, `follow_up`.
    #[serde(default = "default_trigger_type")]
    pub trigger_type: String,
    /// Free-form context recorded when the timer was scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Exact prompt chosen by an upstream evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_message: Option<String>,
    /// When the timer was due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
}

impl TimerPayload {
    /// A `check_in` timer with no extra context.
    pub fn new(timer_id: impl Into<String>) -> Self {
        Self {
            timer_id: timer_id.into(),
            trigger_type: default_trigger_type(),
            reason: None,
            suggested_message: None,
            scheduled_at: None,
        }
    }

    /// Parse and validate an event payload.
    pub fn from_value(payload: &Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| RuntimeError::InvalidPayload(format!("timer: {e}")))?;
        if parsed.timer_id.is_empty() {
            return Err(RuntimeError::InvalidPayload("timer: timerId is empty".into()));
        }
        Ok(parsed)
    }
}

/// Check the required fields of an agent-proposed effect.
///
/// Returns the recognised type, or a description of what is wrong.
pub fn validate_effect_payload(
    effect_type: &str,
    payload: &Value,
) -> std::result::Result<EffectType, String> {
    let kind = EffectType::parse(effect_type)
        .ok_or_else(|| format!("unrecognised effect type {effect_type:?}"))?;
    let obj = payload
        .as_object()
        .ok_or_else(|| format!("{kind} payload must be an object"))?;

    match kind {
        EffectType::SendMessage => {
            if !obj.get("content").is_some_and(Value::is_string) {
                return Err("send_message requires string content".into());
            }
        }
        EffectType::ScheduleTimer => {
            let delay_ok = obj.get("delayMs").is_some_and(|v| v.as_u64().is_some());
            let fire_at_ok = obj.get("fireAt").is_some_and(Value::is_string);
            if !delay_ok && !fire_at_ok {
                return Err(
                    "schedule_timer requires non-negative integer delayMs or string fireAt".into(),
                );
            }
        }
    }
    Ok(kind)
}
