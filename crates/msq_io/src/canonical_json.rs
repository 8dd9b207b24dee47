//! Canonical JSON (RFC 8785 discipline) over the engine's JSON ADT.
//! - Objects: keys sorted by UTF-16 code units
//! - Strings: minimal escapes (`\"`, `\\`, short forms + `\u00xx` below 0x20)
//! - Integers: shortest decimal; decimals: shortest canonical form
//! - Output: compact (no whitespace, no trailing newline, no BOM)
//! - Parse: strict; rejects duplicate keys, exponents, leading zeros,
//!   raw control characters, and anything beyond one top-level value

#![forbid(unsafe_code)]

use msq_core::decimal::Decimal;
use msq_core::errors::ErrorKind;
use msq_core::json::{cmp_keys_utf16, JsonValue};
use msq_core::value::MAX_SAFE_INT;

/// Parse/emit errors with the wire-level kind each maps to.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum JsonError {
    #[error("json syntax error at byte {pos}: {msg}")]
    Syntax { pos: usize, msg: String },
    #[error("duplicate object key: {0}")]
    DuplicateKey(String),
    #[error("integer out of safe range")]
    IntOutOfRange,
    #[error("invalid decimal literal")]
    BadDecimal,
    #[error("float rejected: {0}")]
    FloatRejected(String),
}

impl JsonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JsonError::DuplicateKey(_) => ErrorKind::JsonDuplicateKey,
            JsonError::IntOutOfRange => ErrorKind::IntegerOverflow,
            JsonError::BadDecimal | JsonError::FloatRejected(_) => ErrorKind::InvalidDecimal,
            JsonError::Syntax { .. } => ErrorKind::ForbiddenSyntax,
        }
    }
}

/* ---------------------------- Emission ---------------------------- */

/// Canonical bytes of a JSON value (compact, sorted keys, no newline).
pub fn to_canonical_bytes(v: &JsonValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_value(v, &mut out);
    out
}

/// Canonical text; the byte form is authoritative for hashing.
pub fn to_canonical_string(v: &JsonValue) -> String {
    String::from_utf8(to_canonical_bytes(v)).expect("canonical JSON is UTF-8 by construction")
}

fn write_value(v: &JsonValue, out: &mut Vec<u8>) {
    match v {
        JsonValue::Null => out.extend_from_slice(b"null"),
        JsonValue::Bool(true) => out.extend_from_slice(b"true"),
        JsonValue::Bool(false) => out.extend_from_slice(b"false"),
        JsonValue::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        JsonValue::Decimal(s) => out.extend_from_slice(s.as_bytes()),
        JsonValue::Str(s) => write_string(s, out),
        JsonValue::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        JsonValue::Object(fields) => {
            let mut order: Vec<&(String, JsonValue)> = fields.iter().collect();
            order.sort_by(|a, b| cmp_keys_utf16(&a.0, &b.0));
            out.push(b'{');
            for (i, (key, value)) in order.iter().map(|f| (&f.0, &f.1)).enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(value, out);
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\u{0C}' => out.extend_from_slice(b"\\f"),
            '\r' => out.extend_from_slice(b"\\r"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/* ----------------------------- Parsing ----------------------------- */

/// Strict parser producing the JSON ADT. The only place `JsonValue::Null`
/// is ever constructed.
pub fn parse(input: &str) -> Result<JsonValue, JsonError> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    let v = p.value()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(p.err("trailing data after top-level value"));
    }
    Ok(v)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, msg: &str) -> JsonError {
        JsonError::Syntax {
            pos: self.pos,
            msg: msg.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), JsonError> {
        if self.bump() == Some(b) {
            Ok(())
        } else {
            self.pos = self.pos.saturating_sub(1);
            Err(self.err(&format!("expected {:?}", b as char)))
        }
    }

    fn literal(&mut self, text: &str, v: JsonValue) -> Result<JsonValue, JsonError> {
        if self.bytes[self.pos..].starts_with(text.as_bytes()) {
            self.pos += text.len();
            Ok(v)
        } else {
            Err(self.err(&format!("expected {text}")))
        }
    }

    fn value(&mut self) -> Result<JsonValue, JsonError> {
        match self.peek() {
            Some(b'n') => self.literal("null", JsonValue::Null),
            Some(b't') => self.literal("true", JsonValue::Bool(true)),
            Some(b'f') => self.literal("false", JsonValue::Bool(false)),
            Some(b'"') => Ok(JsonValue::Str(self.string()?)),
            Some(b'[') => self.array(),
            Some(b'{') => self.object(),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.err("unexpected character")),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn array(&mut self) -> Result<JsonValue, JsonError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(JsonValue::Array(items));
        }
        loop {
            self.skip_ws();
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => return Ok(JsonValue::Array(items)),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.err("expected ',' or ']'"));
                }
            }
        }
    }

    fn object(&mut self) -> Result<JsonValue, JsonError> {
        self.expect(b'{')?;
        let mut fields: Vec<(String, JsonValue)> = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(JsonValue::Object(fields));
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(JsonError::DuplicateKey(key));
            }
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let value = self.value()?;
            fields.push((key, value));
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(JsonValue::Object(fields)),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.err("expected ',' or '}'"));
                }
            }
        }
    }

    fn string(&mut self) -> Result<String, JsonError> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            let start = self.pos;
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'b') => out.push('\u{08}'),
                    Some(b'f') => out.push('\u{0C}'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    Some(b'u') => {
                        let hi = self.hex4()?;
                        let c = if (0xD800..=0xDBFF).contains(&hi) {
                            // High surrogate: a low surrogate escape must follow.
                            if self.bump() != Some(b'\\') || self.bump() != Some(b'u') {
                                return Err(self.err("unpaired surrogate"));
                            }
                            let lo = self.hex4()?;
                            if !(0xDC00..=0xDFFF).contains(&lo) {
                                return Err(self.err("invalid low surrogate"));
                            }
                            let cp = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                            char::from_u32(cp).ok_or_else(|| self.err("invalid code point"))?
                        } else if (0xDC00..=0xDFFF).contains(&hi) {
                            return Err(self.err("unpaired low surrogate"));
                        } else {
                            char::from_u32(hi).ok_or_else(|| self.err("invalid code point"))?
                        };
                        out.push(c);
                    }
                    _ => return Err(self.err("invalid escape")),
                },
                Some(b) if b < 0x20 => return Err(self.err("raw control character in string")),
                Some(b) if b < 0x80 => out.push(b as char),
                Some(_) => {
                    // Multi-byte UTF-8: re-decode from the first byte.
                    let rest = &self.bytes[start..];
                    let s = std::str::from_utf8(rest)
                        .ok()
                        .and_then(|s| s.chars().next())
                        .ok_or_else(|| self.err("invalid UTF-8"))?;
                    out.push(s);
                    self.pos = start + s.len_utf8();
                }
            }
        }
    }

    fn hex4(&mut self) -> Result<u32, JsonError> {
        let mut n = 0u32;
        for _ in 0..4 {
            let b = self.bump().ok_or_else(|| self.err("truncated \\u escape"))?;
            let d = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.err("invalid hex digit"))?;
            n = (n << 4) | d;
        }
        Ok(n)
    }

    fn number(&mut self) -> Result<JsonValue, JsonError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let int_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let int_digits = self.pos - int_start;
        if int_digits == 0 {
            return Err(self.err("expected digit"));
        }
        if int_digits > 1 && self.bytes[int_start] == b'0' {
            return Err(self.err("leading zero"));
        }
        let mut fractional = false;
        if self.peek() == Some(b'.') {
            fractional = true;
            self.pos += 1;
            let frac_start = self.pos;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            if self.pos == frac_start {
                return Err(self.err("expected fraction digit"));
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            // Canonical JSON carries no exponents; exact values only.
            return Err(JsonError::FloatRejected(
                "exponent notation is not canonical".to_string(),
            ));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("number bytes are ASCII");
        if fractional {
            let d = Decimal::parse(text).map_err(|_| JsonError::BadDecimal)?;
            Ok(JsonValue::Decimal(d.canonical_string()))
        } else {
            let n: i64 = text.parse().map_err(|_| JsonError::IntOutOfRange)?;
            if !(-MAX_SAFE_INT..=MAX_SAFE_INT).contains(&n) {
                return Err(JsonError::IntOutOfRange);
            }
            Ok(JsonValue::Int(n))
        }
    }
}

/* ----------------------- serde_json bridging ----------------------- */

/// Lift a host-built `serde_json::Value` (metadata, build info, CLI input)
/// into the ADT. Floats are rejected outright; exact values only.
pub fn from_serde(v: &serde_json::Value) -> Result<JsonValue, JsonError> {
    match v {
        serde_json::Value::Null => Ok(JsonValue::Null),
        serde_json::Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if !(-MAX_SAFE_INT..=MAX_SAFE_INT).contains(&i) {
                    return Err(JsonError::IntOutOfRange);
                }
                Ok(JsonValue::Int(i))
            } else {
                Err(JsonError::FloatRejected(n.to_string()))
            }
        }
        serde_json::Value::String(s) => Ok(JsonValue::Str(s.clone())),
        serde_json::Value::Array(items) => Ok(JsonValue::Array(
            items.iter().map(from_serde).collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (k, v) in map {
                fields.push((k.clone(), from_serde(v)?));
            }
            Ok(JsonValue::Object(fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(s: &str) -> String {
        to_canonical_string(&parse(s).unwrap())
    }

    #[test]
    fn keys_sorted_compact_output() {
        assert_eq!(canon(r#"{ "b": 1, "a": [2, 3] }"#), r#"{"a":[2,3],"b":1}"#);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = parse(r#"{"a":1,"a":2}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JsonDuplicateKey);
        // Nested objects are checked too.
        assert!(parse(r#"{"x":{"k":1,"k":2}}"#).is_err());
    }

    #[test]
    fn canonical_is_fixed_point() {
        for s in [
            "null",
            "true",
            "-42",
            r#""he\"llo""#,
            "[1,2,3]",
            r#"{"a":1,"b":[true,null]}"#,
            "15.75",
            "-0.05",
        ] {
            assert_eq!(canon(s), s, "not a fixed point: {s}");
        }
    }

    #[test]
    fn non_canonical_input_normalises() {
        assert_eq!(canon("15.750"), "15.75");
        assert_eq!(canon(" [ 1 ,\n 2 ] "), "[1,2]");
    }

    #[test]
    fn exponents_and_leading_zeros_rejected() {
        assert!(parse("1e5").is_err());
        assert!(parse("01").is_err());
        assert!(parse("-01.5").is_err());
    }

    #[test]
    fn int_safe_range_is_hard() {
        assert!(parse("9007199254740991").is_ok());
        assert_eq!(
            parse("9007199254740992").unwrap_err().kind(),
            ErrorKind::IntegerOverflow
        );
    }

    #[test]
    fn control_chars_escaped_minimally() {
        let v = JsonValue::Str("a\tb\u{01}c".to_string());
        assert_eq!(to_canonical_string(&v), "\"a\\tb\\u0001c\"");
    }

    #[test]
    fn surrogate_pairs_decode() {
        let v = parse(r#""😀""#).unwrap();
        assert_eq!(v, JsonValue::Str("😀".to_string()));
        assert!(parse(r#""\ud83d""#).is_err());
    }

    #[test]
    fn trailing_data_rejected() {
        assert!(parse("1 2").is_err());
        assert!(parse("{} x").is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_json(depth: u32) -> impl Strategy<Value = JsonValue> {
            let leaf = prop_oneof![
                Just(JsonValue::Null),
                any::<bool>().prop_map(JsonValue::Bool),
                (-9_007_199_254_740_991i64..=9_007_199_254_740_991).prop_map(JsonValue::Int),
                "[a-zA-Z0-9 _\\-]{0,12}".prop_map(JsonValue::Str),
            ];
            leaf.prop_recursive(depth, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
                    proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                        JsonValue::Object(m.into_iter().collect())
                    }),
                ]
            })
        }

        proptest! {
            #[test]
            fn round_trip(v in arb_json(3)) {
                let s = to_canonical_string(&v);
                let back = parse(&s).unwrap();
                prop_assert_eq!(&back, &v);
                // Canonical emission is a fixed point.
                prop_assert_eq!(to_canonical_string(&back), s);
            }
        }
    }
}
