//! Inbound ERPNext assignment payloads: decoding, fingerprinting, field
//! extraction.

use serde_json::{Map, Value};

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("No data or unsupported data format")]
    Unsupported,
    #[error("Invalid JSON payload")]
    InvalidJson,
    #[error("No usable data received")]
    Empty,
}

/// Decode a webhook body.
///
/// ERPNext posts either plain JSON or a form body whose only key is the JSON
/// document itself. For form bodies the first key that decodes to a JSON
/// object is used.
pub fn parse_payload(content_type: Option<&str>, body: &[u8]) -> Result<Payload, PayloadError> {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let payload = if is_json_mime(&mime) {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(_) => return Err(PayloadError::InvalidJson),
        }
    } else if mime == "application/x-www-form-urlencoded" {
        let fields: Vec<(String, String)> =
            serde_urlencoded::from_bytes(body).map_err(|_| PayloadError::Unsupported)?;
        if fields.is_empty() {
            return Err(PayloadError::Unsupported);
        }
        fields
            .iter()
            .find_map(|(key, _)| match serde_json::from_str::<Value>(key) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
    } else {
        return Err(PayloadError::Unsupported);
    };

    match payload {
        Some(map) if !map.is_empty() => Ok(map),
        _ => Err(PayloadError::Empty),
    }
}

fn is_json_mime(mime: &str) -> bool {
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Deterministic dedup key: compact JSON with object keys sorted at every
/// level. Array order is significant.
pub fn fingerprint(payload: &Payload) -> String {
    let mut out = String::new();
    write_object(payload, &mut out);
    out
}

fn write_object(map: &Payload, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Fields of a ToDo assignment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentEvent {
    pub recipient_email: Option<String>,
    pub reference_type: Option<String>,
    pub reference_name: Option<String>,
    pub assigner_name: Option<String>,
    pub due_date: Option<String>,
}

impl AssignmentEvent {
    pub fn from_payload(payload: &Payload) -> Self {
        Self {
            recipient_email: text_field(payload, "allocated_to"),
            reference_type: text_field(payload, "reference_type"),
            reference_name: text_field(payload, "reference_name"),
            assigner_name: text_field(payload, "assigned_by_full_name"),
            due_date: text_field(payload, "due_date"),
        }
    }
}

fn text_field(payload: &Payload, key: &str) -> Option<String> {
    let value = match payload.get(key)? {
        Value::String(value) => value.trim().to_string(),
        Value::Number(value) => value.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
