//! Response and error envelopes.
//!
//! Every request, whether it completes or traps, produces a deterministic
//! JSON body:
//! the canonical JSON of the guest value, or the canonical error envelope
//! `{"error": <Kind>, "message": …, "details": …?}` (no stack traces). The
//! response digest is SHA-256 over exactly those body bytes.

#![forbid(unsafe_code)]

use msq_core::errors::Trap;
use msq_core::json::JsonValue;
use msq_core::value::Value;
use msq_io::canonical_json;
use msq_io::hasher;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// The wire envelope handed to host adapters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    /// Canonical JSON text of the body value or error envelope.
    pub body: String,
}

impl ResponseEnvelope {
    /// Envelope as a JSON value (`{statusCode, contentType, headers, body}`)
    /// for hosts that serialise the whole thing.
    pub fn to_json(&self) -> JsonValue {
        let headers = JsonValue::Array(
            self.headers
                .iter()
                .map(|(n, v)| {
                    JsonValue::object_unchecked(vec![
                        ("name".to_string(), JsonValue::Str(n.clone())),
                        ("value".to_string(), JsonValue::Str(v.clone())),
                    ])
                })
                .collect(),
        );
        JsonValue::object_unchecked(vec![
            ("statusCode".to_string(), JsonValue::Int(i64::from(self.status_code))),
            ("contentType".to_string(), JsonValue::Str(self.content_type.clone())),
            ("headers".to_string(), headers),
            ("body".to_string(), JsonValue::Str(self.body.clone())),
        ])
    }
}

/// Body bytes + envelope for a completed guest value.
///
/// Plain values respond 200 with their canonical JSON as the body. A value
/// that is already an envelope record (the compiled form of the guest
/// `respond_json` / `respond_status` builders) passes through with its own
/// status; its body field is canonicalised the same way, so the digest
/// stays a pure function of the value.
pub fn respond_value(value: &Value) -> (ResponseEnvelope, Vec<u8>) {
    if let Some(out) = envelope_from_value(value) {
        return out;
    }
    let body_bytes = canonical_json::to_canonical_bytes(&value.to_json());
    let body = String::from_utf8(body_bytes.clone()).expect("canonical JSON is UTF-8");
    (
        ResponseEnvelope {
            status_code: 200,
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers: Vec::new(),
            body,
        },
        body_bytes,
    )
}

/// Recognise the envelope record shape: `statusCode` int plus `body`,
/// optional `contentType` string and `headers` list of name/value records.
fn envelope_from_value(value: &Value) -> Option<(ResponseEnvelope, Vec<u8>)> {
    let fields = match value {
        Value::Record(fields) => fields,
        _ => return None,
    };
    let field = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v);

    let status_code = match field("statusCode")? {
        Value::Int(n) if (100..=599).contains(n) => *n as u16,
        _ => return None,
    };
    let body_value = field("body")?;
    let content_type = match field("contentType") {
        Some(Value::Str(s)) => s.clone(),
        _ => CONTENT_TYPE_JSON.to_string(),
    };
    let mut headers = Vec::new();
    if let Some(Value::List(items)) = field("headers") {
        for item in items {
            if let Value::Record(hf) = item {
                let name = hf.iter().find(|(k, _)| k == "name");
                let val = hf.iter().find(|(k, _)| k == "value");
                if let (Some((_, Value::Str(n))), Some((_, Value::Str(v)))) = (name, val) {
                    headers.push((n.clone(), v.clone()));
                }
            }
        }
    }

    let body_bytes = canonical_json::to_canonical_bytes(&body_value.to_json());
    let body = String::from_utf8(body_bytes.clone()).expect("canonical JSON is UTF-8");
    Some((
        ResponseEnvelope {
            status_code,
            content_type,
            headers,
            body,
        },
        body_bytes,
    ))
}

/// Body bytes + envelope for a trap. Status follows the kind's mapping;
/// details ride along as a string map when present.
pub fn respond_trap(trap: &Trap) -> (ResponseEnvelope, Vec<u8>) {
    let mut fields = vec![
        ("error".to_string(), JsonValue::Str(trap.kind.as_str().to_string())),
        ("message".to_string(), JsonValue::Str(trap.message.clone())),
    ];
    if !trap.details.is_empty() {
        let details = trap
            .details
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::Str(v.clone())))
            .collect();
        fields.push(("details".to_string(), JsonValue::object_unchecked(details)));
    }
    let body_bytes = canonical_json::to_canonical_bytes(&JsonValue::object_unchecked(fields));
    let body = String::from_utf8(body_bytes.clone()).expect("canonical JSON is UTF-8");
    (
        ResponseEnvelope {
            status_code: trap.kind.http_status(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers: Vec::new(),
            body,
        },
        body_bytes,
    )
}

/// SHA-256 digest (lowercase hex) of response body bytes.
pub fn response_digest(body_bytes: &[u8]) -> String {
    hasher::sha256_hex(body_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_core::errors::ErrorKind;

    #[test]
    fn value_body_is_canonical() {
        let (env, bytes) = respond_value(&Value::Int(42));
        assert_eq!(env.status_code, 200);
        assert_eq!(env.body, "42");
        assert_eq!(
            response_digest(&bytes),
            "73475cb40a568e8da8a045ced110137e159f890ac4da883b6b17dc651b3a8049"
        );
    }

    #[test]
    fn trap_body_shape() {
        let trap = Trap::new(ErrorKind::JsonDuplicateKey, "duplicate object key: a");
        let (env, _) = respond_trap(&trap);
        assert_eq!(env.status_code, 400);
        assert_eq!(
            env.body,
            r#"{"error":"JsonDuplicateKey","message":"duplicate object key: a"}"#
        );
    }

    #[test]
    fn gas_trap_carries_details() {
        let (env, _) = respond_trap(&Trap::gas_exhausted(500, 500));
        assert_eq!(env.status_code, 500);
        assert_eq!(
            env.body,
            r#"{"details":{"gasLimit":"500","gasUsed":"500"},"error":"GasExhausted","message":"computation gas limit exceeded"}"#
        );
    }

    #[test]
    fn guest_envelope_record_passes_through() {
        let value = Value::Record(vec![
            ("statusCode".to_string(), Value::Int(400)),
            (
                "body".to_string(),
                Value::Record(vec![("reason".to_string(), Value::str("missing field"))]),
            ),
        ]);
        let (env, bytes) = respond_value(&value);
        assert_eq!(env.status_code, 400);
        assert_eq!(env.body, r#"{"reason":"missing field"}"#);
        assert_eq!(bytes, env.body.as_bytes());
    }

    #[test]
    fn non_envelope_records_respond_200() {
        let value = Value::Record(vec![("statusCode".to_string(), Value::str("nope"))]);
        let (env, _) = respond_value(&value);
        assert_eq!(env.status_code, 200);
    }

    #[test]
    fn envelope_json_field_names() {
        let (env, _) = respond_value(&Value::Bool(true));
        let text = canonical_json::to_canonical_string(&env.to_json());
        assert!(text.contains("\"statusCode\":200"));
        assert!(text.contains("\"contentType\":\"application/json\""));
        assert!(text.contains("\"body\":\"true\""));
    }
}
