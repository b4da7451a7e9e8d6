use crate::state::MessageMeta;
use serde_json::{Map, Value};

const DONE_SENTINEL: &str = "[DONE]";
const META_TAG: &str = "[META]";
const ERROR_TAG: &str = "[ERROR]";

/// One classified unit of the response stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Token(String),
    Meta(MessageMeta),
    Error(String),
    Done,
}

/// Map a decoded payload to a frame.
///
/// A `[META]` payload that is not a JSON object is dropped (`None`); the
/// stream carries on.
pub fn classify(payload: &str) -> Option<Frame> {
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    if let Some(json) = payload.strip_prefix(META_TAG) {
        return match serde_json::from_str::<Map<String, Value>>(json) {
            Ok(object) => Some(Frame::Meta(meta_from_object(object))),
            Err(e) => {
                tracing::warn!(error = %e, payload = json, "Dropping malformed metadata frame");
                None
            }
        };
    }

    if let Some(message) = payload.strip_prefix(ERROR_TAG) {
        let message = message.strip_prefix(' ').unwrap_or(message);
        return Some(Frame::Error(message.to_string()));
    }

    Some(Frame::Token(payload.to_string()))
}

/// Typed fields that are not strings are discarded on their own; the rest of
/// the object is kept.
fn meta_from_object(mut object: Map<String, Value>) -> MessageMeta {
    let mut take_string = |key: &str| match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        None | Some(Value::Null) => None,
        Some(other) => {
            tracing::warn!(key, value = %other, "Ignoring non-string metadata field");
            None
        }
    };

    let intent = take_string("intent");
    let task_type = take_string("task_type");
    MessageMeta {
        intent,
        task_type,
        extra: object,
    }
}
