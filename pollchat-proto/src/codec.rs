//! Encoding and decoding of backend reply bodies.
//!
//! Every reply is a JSON object with a `success` flag. Successful replies
//! carry their payload fields next to the flag; rejections may carry a
//! human-readable `message` (or `error`) string.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Error type for reply encode/decode operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Body is not valid JSON or a payload field has the wrong shape.
    #[error("malformed JSON: {0}")]
    Json(String),
    /// Body is valid JSON but not an object.
    #[error("reply is not a JSON object")]
    NotAnObject,
    /// The `success` flag is missing or not boolean-like.
    #[error("reply has no usable `success` flag")]
    MissingSuccess,
}

/// A decoded backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// `success: true` with its payload.
    Accepted(T),
    /// Well-formed `success: false`.
    Rejected {
        /// Reason given by the server, if any.
        message: Option<String>,
    },
}

/// Decode a reply body into a typed [`Reply`].
///
/// # Errors
///
/// Returns [`CodecError`] if the body is not a JSON object, has no
/// recognisable `success` flag, or an accepted payload does not match `T`.
pub fn decode_reply<T: DeserializeOwned>(bytes: &[u8]) -> Result<Reply<T>, CodecError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(CodecError::NotAnObject);
    };

    if !success_flag(map.get("success"))? {
        let message = ["message", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_owned);
        return Ok(Reply::Rejected { message });
    }

    serde_json::from_value(Value::Object(map))
        .map(Reply::Accepted)
        .map_err(|e| CodecError::Json(e.to_string()))
}

/// Encode a [`Reply`] the way the backend does.
///
/// # Errors
///
/// Returns [`CodecError::NotAnObject`] if an accepted payload does not
/// serialize to a JSON object, or [`CodecError::Json`] if serialization fails.
pub fn encode_reply<T: Serialize>(reply: &Reply<T>) -> Result<Vec<u8>, CodecError> {
    let mut map = match reply {
        Reply::Accepted(payload) => {
            match serde_json::to_value(payload).map_err(|e| CodecError::Json(e.to_string()))? {
                Value::Object(map) => map,
                _ => return Err(CodecError::NotAnObject),
            }
        }
        Reply::Rejected { message } => {
            let mut map = Map::new();
            if let Some(message) = message {
                map.insert("message".into(), Value::String(message.clone()));
            }
            map
        }
    };
    map.insert(
        "success".into(),
        Value::Bool(matches!(reply, Reply::Accepted(_))),
    );
    serde_json::to_vec(&Value::Object(map)).map_err(|e| CodecError::Json(e.to_string()))
}

fn success_flag(value: Option<&Value>) -> Result<bool, CodecError> {
    match value {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Some(Value::String(s)) => match s.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(CodecError::MissingSuccess),
        },
        _ => Err(CodecError::MissingSuccess),
    }
}
