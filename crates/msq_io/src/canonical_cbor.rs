//! Deterministic CBOR encoding (RFC 7049 §3.9 discipline):
//! - integers and string/array/map lengths use the shortest head form
//! - map keys sort by the bytewise lex order of their encoded form
//! - no indefinite-length items, no floating-point majors
//!
//! Used for effect cache keys and build-info hashing; never on the wire.

#![forbid(unsafe_code)]

use msq_core::json::JsonValue;
use msq_core::value::{MapKey, Value};

const MAJOR_UINT: u8 = 0 << 5;
const MAJOR_NINT: u8 = 1 << 5;
const MAJOR_TEXT: u8 = 3 << 5;
const MAJOR_ARRAY: u8 = 4 << 5;
const MAJOR_MAP: u8 = 5 << 5;

const SIMPLE_FALSE: u8 = 0xF4;
const SIMPLE_TRUE: u8 = 0xF5;
const SIMPLE_NULL: u8 = 0xF6;

/// Shortest-form head: major type + unsigned argument.
fn write_head(major: u8, arg: u64, out: &mut Vec<u8>) {
    if arg < 24 {
        out.push(major | arg as u8);
    } else if arg <= u8::MAX as u64 {
        out.push(major | 24);
        out.push(arg as u8);
    } else if arg <= u16::MAX as u64 {
        out.push(major | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u32::MAX as u64 {
        out.push(major | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

fn write_int(n: i64, out: &mut Vec<u8>) {
    if n >= 0 {
        write_head(MAJOR_UINT, n as u64, out);
    } else {
        // Negative n encodes as -(n+1) under major type 1.
        write_head(MAJOR_NINT, !(n as u64), out);
    }
}

fn write_text(s: &str, out: &mut Vec<u8>) {
    write_head(MAJOR_TEXT, s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

/// Encode map entries with keys sorted bytewise by their encoded form.
fn write_map(entries: Vec<(Vec<u8>, Vec<u8>)>, out: &mut Vec<u8>) {
    let mut entries = entries;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    write_head(MAJOR_MAP, entries.len() as u64, out);
    for (k, v) in entries {
        out.extend_from_slice(&k);
        out.extend_from_slice(&v);
    }
}

fn encode_map_key(key: &MapKey) -> Vec<u8> {
    let mut out = Vec::new();
    match key {
        MapKey::Int(n) => write_int(*n, &mut out),
        MapKey::Str(s) => write_text(s, &mut out),
        MapKey::Bool(b) => out.push(if *b { SIMPLE_TRUE } else { SIMPLE_FALSE }),
        // Decimals encode as their canonical text form.
        MapKey::Dec(d) => write_text(&d.canonical_string(), &mut out),
    }
    out
}

/// Deterministic encoding of a guest value. Options flatten to presence /
/// null; results, records and variants encode as maps so the byte form is
/// independent of field declaration order.
pub fn encode_value(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Int(n) => write_int(*n, out),
        Value::Str(s) => write_text(s, out),
        Value::Bool(b) => out.push(if *b { SIMPLE_TRUE } else { SIMPLE_FALSE }),
        Value::Dec(d) => write_text(&d.canonical_string(), out),
        Value::Some(inner) => encode_value(inner, out),
        Value::None => out.push(SIMPLE_NULL),
        Value::Ok(inner) => {
            let mut val = Vec::new();
            encode_value(inner, &mut val);
            let mut key = Vec::new();
            write_text("ok", &mut key);
            write_map(vec![(key, val)], out);
        }
        Value::Err(inner) => {
            let mut val = Vec::new();
            encode_value(inner, &mut val);
            let mut key = Vec::new();
            write_text("err", &mut key);
            write_map(vec![(key, val)], out);
        }
        Value::List(items) => {
            write_head(MAJOR_ARRAY, items.len() as u64, out);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Map(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| {
                    let mut val = Vec::new();
                    encode_value(v, &mut val);
                    (encode_map_key(k), val)
                })
                .collect();
            write_map(entries, out);
        }
        Value::Record(fields) => {
            let entries = fields
                .iter()
                .map(|(k, v)| {
                    let mut key = Vec::new();
                    write_text(k, &mut key);
                    let mut val = Vec::new();
                    encode_value(v, &mut val);
                    (key, val)
                })
                .collect();
            write_map(entries, out);
        }
        Value::Variant { tag, payload } => {
            let mut key = Vec::new();
            write_text(tag, &mut key);
            let mut val = Vec::new();
            encode_value(payload, &mut val);
            write_map(vec![(key, val)], out);
        }
    }
}

/// Deterministic encoding of a JSON ADT value (build-info hashing).
pub fn encode_json(v: &JsonValue, out: &mut Vec<u8>) {
    match v {
        JsonValue::Null => out.push(SIMPLE_NULL),
        JsonValue::Bool(b) => out.push(if *b { SIMPLE_TRUE } else { SIMPLE_FALSE }),
        JsonValue::Int(n) => write_int(*n, out),
        JsonValue::Decimal(s) => write_text(s, out),
        JsonValue::Str(s) => write_text(s, out),
        JsonValue::Array(items) => {
            write_head(MAJOR_ARRAY, items.len() as u64, out);
            for item in items {
                encode_json(item, out);
            }
        }
        JsonValue::Object(fields) => {
            let entries = fields
                .iter()
                .map(|(k, v)| {
                    let mut key = Vec::new();
                    write_text(k, &mut key);
                    let mut val = Vec::new();
                    encode_json(v, &mut val);
                    (key, val)
                })
                .collect();
            write_map(entries, out);
        }
    }
}

/// Encoding of one effect invocation: a two-element array of the effect name
/// and the argument list. This is the byte layout hashed into cache keys.
pub fn encode_effect_call(name: &str, args: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_head(MAJOR_ARRAY, 2, &mut out);
    write_text(name, &mut out);
    write_head(MAJOR_ARRAY, args.len() as u64, &mut out);
    for arg in args {
        encode_value(arg, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn enc(v: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        encode_value(v, &mut out);
        out
    }

    #[test]
    fn integers_use_shortest_head() {
        assert_eq!(enc(&Value::Int(0)), vec![0x00]);
        assert_eq!(enc(&Value::Int(23)), vec![0x17]);
        assert_eq!(enc(&Value::Int(24)), vec![0x18, 24]);
        assert_eq!(enc(&Value::Int(256)), vec![0x19, 0x01, 0x00]);
        assert_eq!(enc(&Value::Int(-1)), vec![0x20]);
        assert_eq!(enc(&Value::Int(-25)), vec![0x38, 24]);
    }

    #[test]
    fn text_heads_are_shortest() {
        assert_eq!(enc(&Value::str("a")), vec![0x61, b'a']);
        let long = "x".repeat(24);
        let bytes = enc(&Value::str(long.clone()));
        assert_eq!(&bytes[..2], &[0x78, 24]);
        assert_eq!(bytes.len(), 2 + 24);
    }

    #[test]
    fn map_keys_sorted_by_encoded_bytes() {
        let mut m = BTreeMap::new();
        m.insert(MapKey::Str("zz".into()), Value::Int(1));
        m.insert(MapKey::Int(100), Value::Int(2));
        let bytes = enc(&Value::Map(m));
        // Int key 100 encodes as [0x18, 0x64]; text "zz" as [0x62, 'z', 'z'].
        // 0x18 < 0x62 so the int key sorts first.
        assert_eq!(bytes[0], 0xA2); // map of 2
        assert_eq!(bytes[1], 0x18);
        assert_eq!(bytes[2], 100);
    }

    #[test]
    fn record_order_does_not_change_bytes() {
        let a = Value::Record(vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ]);
        let b = Value::Record(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        assert_eq!(enc(&a), enc(&b));
    }

    #[test]
    fn effect_call_layout_is_stable() {
        let bytes = encode_effect_call("Log", &[Value::str("m")]);
        assert_eq!(bytes[0], 0x82); // array(2)
        assert_eq!(&bytes[1..5], &[0x63, b'L', b'o', b'g']);
        assert_eq!(bytes[5], 0x81); // array(1)
    }

    #[test]
    fn decimal_encodes_canonical_text() {
        let d = msq_core::Decimal::parse("10.500").unwrap();
        let bytes = enc(&Value::Dec(d));
        assert_eq!(bytes, vec![0x64, b'1', b'0', b'.', b'5']);
    }
}
