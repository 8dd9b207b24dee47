//! Host-facing request type. Immutable once constructed; the identity
//! headers feeding the seed preamble are promoted through accessors so the
//! sandbox controller never rummages through raw header lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::{MapKey, Value};

/// Identity headers promoted into the seed preamble.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const CALLER_VERSION_HEADER: &str = "x-caller-version";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// One inbound request. Header names are matched case-insensitively on
/// lookup but stored as received (order preserved).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Ordered name/value pairs as received.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
            content_type: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First header whose name matches case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request identity for the seed preamble. Absent headers contribute the
    /// empty string, matching the unconditional concatenation upstream.
    pub fn request_id(&self) -> &str {
        self.header(REQUEST_ID_HEADER).unwrap_or("")
    }

    pub fn account_id(&self) -> &str {
        self.header(ACCOUNT_ID_HEADER).unwrap_or("")
    }

    pub fn caller_version(&self) -> &str {
        self.header(CALLER_VERSION_HEADER).unwrap_or("")
    }

    /// Project the request into guest space as the entry point's input.
    /// Bodies are exposed as UTF-8 text when valid, absent otherwise (binary
    /// bodies reach guest code only through explicit effects).
    pub fn to_value(&self) -> Value {
        let headers = Value::List(
            self.headers
                .iter()
                .map(|(n, v)| {
                    Value::Record(vec![
                        ("name".to_string(), Value::str(n.clone())),
                        ("value".to_string(), Value::str(v.clone())),
                    ])
                })
                .collect(),
        );
        let body = match std::str::from_utf8(&self.body) {
            Ok(text) if !text.is_empty() => Value::Some(Box::new(Value::str(text))),
            _ => Value::None,
        };
        let content_type = match &self.content_type {
            Some(ct) => Value::Some(Box::new(Value::str(ct.clone()))),
            None => Value::None,
        };
        Value::Record(vec![
            ("method".to_string(), Value::str(self.method.as_str())),
            ("path".to_string(), Value::str(self.path.clone())),
            ("headers".to_string(), headers),
            ("body".to_string(), body),
            ("contentType".to_string(), content_type),
        ])
    }

    /// Case-insensitive header view as a sorted map (diagnostics only).
    pub fn header_map(&self) -> BTreeMap<MapKey, Value> {
        self.headers
            .iter()
            .map(|(n, v)| (MapKey::Str(n.to_ascii_lowercase()), Value::str(v.clone())))
            .collect()
    }
}
