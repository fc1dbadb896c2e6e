use serde_json::Value;

use super::error::FetchError;
use super::types::ErrorRecord;

pub const REMOTE_ERROR_DETAIL: &str = "the remote service reported an error";
pub const CONNECTION_ERROR_DETAIL: &str = "could not establish a connection to the remote service";
pub const PARSE_ERROR_DETAIL: &str = "the response body is not valid JSON";
pub const DECODE_ERROR_DETAIL: &str = "the response does not describe a position";

const GENERIC_ERROR: &str = "error";
const NO_MESSAGE: &str = "no message provided";

const CODE_FIELDS: [&str; 2] = ["errno", "status"];
const INDICATOR_FIELDS: [&str; 3] = ["errno", "status", "error"];
const MESSAGE_FIELDS: [&str; 4] = ["code", "description", "message", "error"];

/// Loose truthiness: null, false, zero, NaN and the empty string are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn truthy_field<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    payload.get(field).filter(|v| is_truthy(v))
}

pub fn has_error_indicator(payload: &Value) -> bool {
    INDICATOR_FIELDS
        .iter()
        .any(|field| truthy_field(payload, field).is_some())
}

/// Passes payloads without error indicators through unchanged and turns the
/// rest into an [`ErrorRecord`].
pub fn screen_payload(payload: Value) -> Result<Value, ErrorRecord> {
    if !has_error_indicator(&payload) {
        return Ok(payload);
    }

    let error = CODE_FIELDS
        .iter()
        .find_map(|field| truthy_field(&payload, field))
        .cloned()
        .unwrap_or_else(|| Value::String(GENERIC_ERROR.to_string()));

    let message = MESSAGE_FIELDS
        .iter()
        .find_map(|field| {
            payload
                .get(*field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(NO_MESSAGE)
        .to_string();

    Err(ErrorRecord {
        error,
        message,
        detail: Some(REMOTE_ERROR_DETAIL.to_string()),
    })
}

pub fn from_transport(err: &FetchError) -> ErrorRecord {
    ErrorRecord {
        error: Value::String(err.code().to_string()),
        message: err.to_string(),
        detail: Some(CONNECTION_ERROR_DETAIL.to_string()),
    }
}

pub fn from_parse(err: &serde_json::Error) -> ErrorRecord {
    ErrorRecord {
        error: Value::String("parse".to_string()),
        message: err.to_string(),
        detail: Some(PARSE_ERROR_DETAIL.to_string()),
    }
}

pub fn from_decode(err: &serde_json::Error) -> ErrorRecord {
    ErrorRecord {
        error: Value::String("decode".to_string()),
        message: err.to_string(),
        detail: Some(DECODE_ERROR_DETAIL.to_string()),
    }
}
