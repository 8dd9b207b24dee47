//! `HttpOut`: outbound HTTP with fixed size limits and typed transport
//! errors. The transport sits behind `HttpBackend` so hosts (and tests)
//! inject their own; `ReqwestBackend` is the production implementation.
//!
//! Limits are protocol constants: request body ≤ 10 MiB, response body
//! ≤ 50 MiB. TLS verification is on unless the call (or the context
//! default) disables it; disabling is dev-only.

use std::collections::VecDeque;
use std::time::Duration;

use msq_core::config::{HTTP_MAX_REQUEST_BYTES, HTTP_MAX_RESPONSE_BYTES};
use msq_core::json::JsonValue;
use msq_core::value::Value;

use crate::{EffectContext, EffectError};

/// Applied when the call passes no timeout or a non-positive one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout_ms: u64,
    pub verify_tls: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Transport seam. Implementations perform the request and enforce the
/// response size cap; everything above is deterministic plumbing.
pub trait HttpBackend {
    fn execute(&mut self, req: &HttpRequestSpec) -> Result<HttpResponseData, EffectError>;
}

/// Production transport: reqwest blocking client, rustls, system CAs.
pub struct ReqwestBackend;

impl ReqwestBackend {
    pub fn new() -> ReqwestBackend {
        ReqwestBackend
    }
}

impl Default for ReqwestBackend {
    fn default() -> Self {
        ReqwestBackend::new()
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&mut self, req: &HttpRequestSpec) -> Result<HttpResponseData, EffectError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(req.timeout_ms))
            .danger_accept_invalid_certs(!req.verify_tls)
            .build()
            .map_err(|e| EffectError::HttpTransport(e.to_string()))?;

        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| EffectError::HttpTransport(format!("bad method {}", req.method)))?;
        let mut builder = client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|e| EffectError::HttpTransport(e.to_string()))?;
        let status = response.status().as_u16();
        let mut headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(n, v)| {
                (
                    n.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();
        headers.sort();

        if let Some(len) = response.content_length() {
            if len > HTTP_MAX_RESPONSE_BYTES {
                return Err(EffectError::HttpTooLarge(HTTP_MAX_RESPONSE_BYTES));
            }
        }
        let bytes = response
            .bytes()
            .map_err(|e| EffectError::HttpTransport(e.to_string()))?;
        if bytes.len() as u64 > HTTP_MAX_RESPONSE_BYTES {
            return Err(EffectError::HttpTooLarge(HTTP_MAX_RESPONSE_BYTES));
        }
        Ok(HttpResponseData {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).to_string(),
        })
    }
}

/// Scripted transport for tests and dry runs: pops canned responses in
/// order and records every request it sees. The state handle stays with the
/// caller so assertions can inspect traffic after the context took ownership
/// of the backend (contexts are single-threaded, so `Rc` is fine).
#[derive(Default)]
pub struct StubState {
    pub responses: VecDeque<HttpResponseData>,
    pub calls: Vec<HttpRequestSpec>,
}

pub struct StubHttpBackend {
    state: std::rc::Rc<std::cell::RefCell<StubState>>,
}

impl StubHttpBackend {
    pub fn new() -> (StubHttpBackend, std::rc::Rc<std::cell::RefCell<StubState>>) {
        let state = std::rc::Rc::new(std::cell::RefCell::new(StubState::default()));
        (
            StubHttpBackend {
                state: state.clone(),
            },
            state,
        )
    }
}

impl HttpBackend for StubHttpBackend {
    fn execute(&mut self, req: &HttpRequestSpec) -> Result<HttpResponseData, EffectError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(req.clone());
        state
            .responses
            .pop_front()
            .ok_or_else(|| EffectError::HttpTransport("no scripted response".to_string()))
    }
}

/* ------------------------------ Handler ------------------------------ */

fn arg_str(args: &[Value], idx: usize, what: &str) -> Result<String, EffectError> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(EffectError::Invalid(format!("HttpOut requires {what}"))),
    }
}

fn parse_headers(v: Option<&Value>) -> Result<Vec<(String, String)>, EffectError> {
    match v {
        None | Some(Value::None) => Ok(Vec::new()),
        Some(Value::Map(map)) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                match v {
                    Value::Str(s) => out.push((k.canonical_string(), s.clone())),
                    other => {
                        return Err(EffectError::Invalid(format!(
                            "header value must be a string, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(out)
        }
        Some(other) => Err(EffectError::Invalid(format!(
            "headers must be a map, got {}",
            other.type_name()
        ))),
    }
}

/// `HttpOut(method, url, headers?, body?, timeout_ms?, verify_tls?)`.
pub fn http_out(ctx: &mut EffectContext, args: &[Value]) -> Result<JsonValue, EffectError> {
    let method = arg_str(args, 0, "a method string")?;
    let url = arg_str(args, 1, "a url string")?;
    let mut headers = parse_headers(args.get(2))?;
    let body = match args.get(3) {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(s.clone()),
        Some(Value::Some(inner)) => match inner.as_ref() {
            Value::Str(s) => Some(s.clone()),
            other => {
                return Err(EffectError::Invalid(format!(
                    "body must be a string, got {}",
                    other.type_name()
                )))
            }
        },
        Some(other) => {
            return Err(EffectError::Invalid(format!(
                "body must be a string, got {}",
                other.type_name()
            )))
        }
    };
    let timeout_ms = match args.get(4) {
        Some(Value::Int(n)) if *n > 0 => *n as u64,
        _ => DEFAULT_TIMEOUT_MS,
    };
    let verify_tls = match args.get(5) {
        Some(Value::Bool(b)) => *b,
        _ => ctx.verify_tls,
    };

    if let Some(body) = &body {
        if body.len() as u64 > HTTP_MAX_REQUEST_BYTES {
            return Err(EffectError::HttpTransport(format!(
                "request body exceeds {HTTP_MAX_REQUEST_BYTES} bytes"
            )));
        }
        if !headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
    }

    let spec = HttpRequestSpec {
        method,
        url,
        headers,
        body,
        timeout_ms,
        verify_tls,
    };
    let resp = ctx.http.execute(&spec)?;

    let headers_json = JsonValue::Array(
        resp.headers
            .iter()
            .map(|(n, v)| {
                JsonValue::object_unchecked(vec![
                    ("name".to_string(), JsonValue::Str(n.clone())),
                    ("value".to_string(), JsonValue::Str(v.clone())),
                ])
            })
            .collect(),
    );
    Ok(JsonValue::object_unchecked(vec![
        ("status_code".to_string(), JsonValue::Int(i64::from(resp.status))),
        ("headers".to_string(), headers_json),
        ("body".to_string(), JsonValue::Str(resp.body)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx_with_stub(
        responses: Vec<HttpResponseData>,
    ) -> (EffectContext, Rc<RefCell<StubState>>) {
        let mut ctx = EffectContext::new([0u8; 32], ":memory:", true);
        let (stub, state) = StubHttpBackend::new();
        state.borrow_mut().responses.extend(responses);
        ctx.http = Box::new(stub);
        (ctx, state)
    }

    fn ok_response() -> HttpResponseData {
        HttpResponseData {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: r#"{"hello":"world"}"#.to_string(),
        }
    }

    #[test]
    fn result_envelope_shape() {
        let (mut ctx, _state) = ctx_with_stub(vec![ok_response()]);
        let v = http_out(
            &mut ctx,
            &[Value::str("GET"), Value::str("https://api.example/v1")],
        )
        .unwrap();
        let text = msq_io::canonical_json::to_canonical_string(&v);
        assert_eq!(
            text,
            r#"{"body":"{\"hello\":\"world\"}","headers":[{"name":"content-type","value":"application/json"}],"status_code":200}"#
        );
    }

    #[test]
    fn defaults_applied() {
        let (mut ctx, state) = ctx_with_stub(vec![ok_response()]);
        http_out(
            &mut ctx,
            &[
                Value::str("POST"),
                Value::str("https://api.example/v1"),
                Value::None,
                Value::str("{}"),
            ],
        )
        .unwrap();
        let state = state.borrow();
        let call = &state.calls[0];
        assert_eq!(call.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(call.verify_tls);
        assert!(call
            .headers
            .iter()
            .any(|(n, v)| n == "content-type" && v == "application/json"));
    }

    #[test]
    fn oversize_request_body_rejected_before_transport() {
        let (mut ctx, state) = ctx_with_stub(vec![]);
        let big = "x".repeat((HTTP_MAX_REQUEST_BYTES + 1) as usize);
        let err = http_out(
            &mut ctx,
            &[
                Value::str("POST"),
                Value::str("https://api.example/v1"),
                Value::None,
                Value::Str(big),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), msq_core::ErrorKind::HttpTransportError);
        // The stub saw no call at all.
        assert!(state.borrow().calls.is_empty());
    }

    #[test]
    fn missing_method_is_invalid() {
        let (mut ctx, _state) = ctx_with_stub(vec![]);
        let err = http_out(&mut ctx, &[Value::Int(1)]).unwrap_err();
        assert!(err.is_fatal());
    }
}
