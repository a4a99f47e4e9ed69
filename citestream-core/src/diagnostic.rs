use serde_json::Value;

use crate::error::CitestreamError;

const MAX_UNWRAP_DEPTH: usize = 5;
const UNKNOWN_ERROR: &str = "unknown upstream error";

/// Human-readable message for an error raised while streaming.
pub fn describe_error(err: &CitestreamError) -> String {
    let message = unwrap_error_message(&err.raw_message());
    if message.trim().is_empty() {
        return UNKNOWN_ERROR.to_string();
    }
    message
}

/// Extracts the most specific message from a possibly JSON-encoded error
/// envelope.
///
/// Lookup order per level: `error.message`, then `message`, then a string
/// `error`. An `error.message` that is itself an envelope is unwrapped
/// again, up to `MAX_UNWRAP_DEPTH` levels; past that the best message seen
/// so far is returned.
pub fn unwrap_error_message(raw: &str) -> String {
    let mut best = raw.to_string();
    let mut current = parse_envelope(raw);

    for _ in 0..MAX_UNWRAP_DEPTH {
        let Some(envelope) = current.take() else {
            break;
        };

        match envelope.pointer("/error/message") {
            Some(Value::String(inner)) => {
                best.clone_from(inner);
                match parse_envelope(inner) {
                    Some(nested) if has_error_message(&nested) => current = Some(nested),
                    _ => return best,
                }
            }
            Some(nested @ Value::Object(_)) if has_error_message(nested) => {
                current = Some(nested.clone());
            }
            _ => {
                if let Some(message) = envelope.get("message").and_then(Value::as_str) {
                    return message.to_string();
                }
                if let Some(message) = envelope.get("error").and_then(Value::as_str) {
                    return message.to_string();
                }
                return best;
            }
        }
    }

    best
}

fn parse_envelope(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .filter(Value::is_object)
}

fn has_error_message(value: &Value) -> bool {
    value.pointer("/error/message").is_some()
}
