//! Prompt text for timer-originated invocations.

use serde_json::json;

use super::payload::TimerPayload;
use crate::collaborators::ChatMessage;

/// Prompt text for a fired timer.
///
/// An evaluator-suggested message wins, then the recorded reason, then a
/// generic template for the trigger type.
pub fn timer_prompt(timer: &TimerPayload) -> String {
    if let Some(suggested) = non_empty(timer.suggested_message.as_deref()) {
        return suggested.to_string();
    }
    if let Some(reason) = non_empty(timer.reason.as_deref()) {
        return format!(
            "[Scheduled follow-up] You planned to reach out to the user for this reason: {reason}. \
             Write a short, natural message that picks up from there."
        );
    }
    template_for(&timer.trigger_type).to_string()
}

/// Structured, agent-originated message for a fired timer.
pub fn timer_message(timer: &TimerPayload) -> ChatMessage {
    ChatMessage::Structured {
        text: timer_prompt(timer),
        metadata: json!({
            "source": "timer",
            "origin": "agent",
            "timerId": timer.timer_id,
            "triggerType": timer.trigger_type,
            "scheduledAt": timer.scheduled_at,
        }),
    }
}

fn template_for(trigger_type: &str) -> &'static str {
    match trigger_type {
        "reminder" => {
            "[Scheduled reminder] A reminder you set for the user is due. \
             Remind them briefly and offer help if it fits."
        }
        "follow_up" => {
            "[Scheduled follow-up] Follow up on the last topic you discussed with the user. \
             Keep it short and do not repeat earlier answers."
        }
        "morning" => {
            "[Scheduled greeting] Greet the user for the new day in one or two sentences."
        }
        _ => {
            "[Scheduled check-in] Some time has passed since the user last wrote. \
             Check in briefly and naturally without assuming anything happened."
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
