//! JSON ADT: `null | bool | int | decimal | string | array | object`.
//!
//! `Null` is introduced **only** by the JSON parser (absence on the value
//! side is `Value::None`); nothing in the stdlib or the interpreter can
//! construct it. Numbers split into exact integers (safe range) and exact
//! decimals carried in canonical string form; floats never exist.
//!
//! Objects preserve field order internally; canonical ordering is applied by
//! the encoder, which sorts keys by UTF-16 code units. Duplicate keys are a
//! construction-time error so no tree can ever hold one.

use std::cmp::Ordering;

use crate::errors::ErrorKind;

#[derive(Clone, Debug)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Exact non-integer number, canonical decimal form (shortest, no
    /// exponent). Kept as text so emission is byte-stable.
    Decimal(String),
    Str(String),
    Array(Vec<JsonValue>),
    Object(Vec<(String, JsonValue)>),
}

/// Structural equality. Objects compare as key→value mappings (field order
/// is presentation, not identity), so `parse(emit(v)) == v` holds even when
/// `v` was built unsorted.
impl PartialEq for JsonValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsonValue::Null, JsonValue::Null) => true,
            (JsonValue::Bool(a), JsonValue::Bool(b)) => a == b,
            (JsonValue::Int(a), JsonValue::Int(b)) => a == b,
            (JsonValue::Decimal(a), JsonValue::Decimal(b)) => a == b,
            (JsonValue::Str(a), JsonValue::Str(b)) => a == b,
            (JsonValue::Array(a), JsonValue::Array(b)) => a == b,
            (JsonValue::Object(a), JsonValue::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| other.get(k) == Some(v))
            }
            _ => false,
        }
    }
}

impl Eq for JsonValue {}

/// Compare two keys by UTF-16 code units (RFC 8785 member ordering).
pub fn cmp_keys_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

impl JsonValue {
    /// Build an object, rejecting duplicate keys (`JsonDuplicateKey`).
    pub fn object(fields: Vec<(String, JsonValue)>) -> Result<JsonValue, ErrorKind> {
        for (i, (key, _)) in fields.iter().enumerate() {
            if fields[..i].iter().any(|(k, _)| k == key) {
                return Err(ErrorKind::JsonDuplicateKey);
            }
        }
        Ok(JsonValue::Object(fields))
    }

    /// Build an object from fields already known to be distinct (e.g. a
    /// `BTreeMap` projection). Callers own that invariant.
    pub fn object_unchecked(fields: Vec<(String, JsonValue)>) -> JsonValue {
        JsonValue::Object(fields)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            JsonValue::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "bool",
            JsonValue::Int(_) => "int",
            JsonValue::Decimal(_) => "decimal",
            JsonValue::Str(_) => "string",
            JsonValue::Array(_) => "array",
            JsonValue::Object(_) => "object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_rejects_duplicate_keys() {
        let fields = vec![
            ("a".to_string(), JsonValue::Int(1)),
            ("a".to_string(), JsonValue::Int(2)),
        ];
        assert_eq!(JsonValue::object(fields), Err(ErrorKind::JsonDuplicateKey));
    }

    #[test]
    fn utf16_ordering_differs_from_byte_ordering() {
        // U+10000 (4 UTF-8 bytes, surrogate pair in UTF-16) sorts before
        // U+FFFD in UTF-16 code-unit order but after it in byte order.
        let lo = "\u{10000}";
        let hi = "\u{FFFD}";
        assert_eq!(cmp_keys_utf16(lo, hi), Ordering::Less);
        assert_eq!(lo.as_bytes().cmp(hi.as_bytes()), Ordering::Greater);
    }

    #[test]
    fn object_equality_ignores_field_order() {
        let a = JsonValue::object(vec![
            ("x".to_string(), JsonValue::Int(1)),
            ("y".to_string(), JsonValue::Int(2)),
        ])
        .unwrap();
        let b = JsonValue::object(vec![
            ("y".to_string(), JsonValue::Int(2)),
            ("x".to_string(), JsonValue::Int(1)),
        ])
        .unwrap();
        assert_eq!(a, b);
        let c = JsonValue::object(vec![("x".to_string(), JsonValue::Int(9))]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn get_finds_by_exact_key() {
        let obj = JsonValue::object(vec![
            ("x".to_string(), JsonValue::Int(1)),
            ("y".to_string(), JsonValue::Bool(true)),
        ])
        .unwrap();
        assert_eq!(obj.get("y"), Some(&JsonValue::Bool(true)));
        assert_eq!(obj.get("z"), None);
    }
}
