//! Embedded notification extraction.
//!
//! Any decoded payload may carry `notification` / `notifications` fields at
//! any depth, whichever provider produced it. Each one becomes a
//! `notification` event ahead of the payload's own events.

use arbor_types::StreamEvent;
use serde_json::Value;

/// Collect every embedded notification in `payload`. Arrays keep their
/// order; object keys are visited in sorted order.
pub fn extract_notifications(payload: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    collect(payload, &mut events);
    events
}

fn collect(value: &Value, events: &mut Vec<StreamEvent>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match key.as_str() {
                    "notification" => push(child, events),
                    "notifications" => match child {
                        Value::Array(items) => items.iter().for_each(|item| push(item, events)),
                        other => push(other, events),
                    },
                    _ => collect(child, events),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect(item, events)),
        _ => {}
    }
}

fn push(value: &Value, events: &mut Vec<StreamEvent>) {
    match value {
        Value::Null => {}
        Value::Object(map) if map.contains_key("payload") => {
            let payload = map.get("payload").cloned().unwrap_or(Value::Null);
            let metadata = map.get("metadata").and_then(Value::as_object).cloned();
            events.push(StreamEvent::notification(payload, metadata));
        }
        other => events.push(StreamEvent::notification(other.clone(), None)),
    }
}
