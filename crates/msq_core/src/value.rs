//! Guest value model: a finite tree of owned values with structural equality.
//! No reference identity, no `NaN`/`±Infinity`/`-0`, no process identity or
//! timestamps anywhere in the tree. Map iteration is observable only in
//! canonical key order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::decimal::Decimal;
use crate::errors::ErrorKind;
use crate::json::JsonValue;

/// Largest integer magnitude a guest value may hold: 2^53 − 1. Wider values
/// are a hard `IntegerOverflow`, never silently widened.
pub const MAX_SAFE_INT: i64 = 9_007_199_254_740_991;

/// Check an i64 against the safe range.
pub fn check_int(n: i64) -> Result<i64, ErrorKind> {
    if (-MAX_SAFE_INT..=MAX_SAFE_INT).contains(&n) {
        Ok(n)
    } else {
        Err(ErrorKind::IntegerOverflow)
    }
}

/// Map keys are restricted to primitives so every key has a canonical form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapKey {
    Int(i64),
    Str(String),
    Bool(bool),
    Dec(Decimal),
}

impl MapKey {
    /// The canonical string form used for key ordering and JSON object keys.
    pub fn canonical_string(&self) -> String {
        match self {
            MapKey::Int(n) => n.to_string(),
            MapKey::Str(s) => s.clone(),
            MapKey::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            MapKey::Dec(d) => d.canonical_string(),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            MapKey::Int(_) => 0,
            MapKey::Str(_) => 1,
            MapKey::Bool(_) => 2,
            MapKey::Dec(_) => 3,
        }
    }
}

/// Keys sort by canonical form; the type rank only breaks exact collisions
/// (e.g. int `2` vs decimal `2`) so the order stays total.
impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_string()
            .cmp(&other.canonical_string())
            .then_with(|| self.type_rank().cmp(&other.type_rank()))
    }
}

impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tagged sum of every value guest code can hold.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Dec(Decimal),
    /// Option: explicit presence. `None` is the only way to express absence;
    /// the JSON `null` literal has no constructor on this side.
    Some(Box<Value>),
    None,
    /// Result: ok/err alternatives used by fallible stdlib operations and by
    /// effect outcomes surfaced to guest code.
    Ok(Box<Value>),
    Err(Box<Value>),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
    /// Ordered-field struct; field order is source position, comparison is
    /// structural (names, order, values).
    Record(Vec<(String, Value)>),
    /// Tagged union alternative.
    Variant { tag: String, payload: Box<Value> },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Dec(_) => "decimal",
            Value::Some(_) | Value::None => "option",
            Value::Ok(_) | Value::Err(_) => "result",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Variant { .. } => "union",
        }
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// Wire projection into the JSON ADT. Options become presence/`null`,
    /// results and variants become single-key objects, maps key by canonical
    /// form. This is the only place a `None` turns into JSON `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Int(n) => JsonValue::Int(*n),
            Value::Str(s) => JsonValue::Str(s.clone()),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Dec(d) => JsonValue::Decimal(d.canonical_string()),
            Value::Some(inner) => inner.to_json(),
            Value::None => JsonValue::Null,
            Value::Ok(inner) => JsonValue::object_unchecked(vec![("ok".to_string(), inner.to_json())]),
            Value::Err(inner) => JsonValue::object_unchecked(vec![("err".to_string(), inner.to_json())]),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => JsonValue::object_unchecked(
                map.iter()
                    .map(|(k, v)| (k.canonical_string(), v.to_json()))
                    .collect(),
            ),
            Value::Record(fields) => JsonValue::object_unchecked(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Variant { tag, payload } => {
                JsonValue::object_unchecked(vec![(tag.clone(), payload.to_json())])
            }
        }
    }

    /// Lift parsed JSON into guest space. `null` arrives as `None`: absence
    /// stays explicit and no null value ever lives in the tree.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Int(n) => Value::Int(*n),
            JsonValue::Decimal(s) => match Decimal::parse(s) {
                Ok(d) => Value::Dec(d),
                // Parser-produced decimals are always reparseable; keep the
                // raw text if an upstream bug violates that.
                Err(_) => Value::Str(s.clone()),
            },
            JsonValue::Str(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(fields) => Value::Map(
                fields
                    .iter()
                    .map(|(k, v)| (MapKey::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Rough heap footprint used for memory accounting. Deterministic: a
    /// function of the value's shape only, never of addresses.
    pub fn approx_size(&self) -> u64 {
        match self {
            Value::Int(_) | Value::Bool(_) => 16,
            Value::Str(s) => 24 + s.len() as u64,
            Value::Dec(d) => 32 + (d.significand().bits() / 8),
            Value::Some(v) | Value::Ok(v) | Value::Err(v) => 16 + v.approx_size(),
            Value::None => 16,
            Value::List(items) => 24 + items.iter().map(Value::approx_size).sum::<u64>(),
            Value::Map(map) => {
                24 + map
                    .iter()
                    .map(|(k, v)| k.canonical_string().len() as u64 + 16 + v.approx_size())
                    .sum::<u64>()
            }
            Value::Record(fields) => {
                24 + fields
                    .iter()
                    .map(|(k, v)| k.len() as u64 + 16 + v.approx_size())
                    .sum::<u64>()
            }
            Value::Variant { tag, payload } => 24 + tag.len() as u64 + payload.approx_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = Value::List(vec![Value::Int(1), Value::str("x")]);
        let b = Value::List(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
        let c = Value::List(vec![Value::str("x"), Value::Int(1)]);
        assert_ne!(a, c);
    }

    #[test]
    fn decimal_values_compare_numerically() {
        let a = Value::Dec(Decimal::parse("10.50").unwrap());
        let b = Value::Dec(Decimal::parse("10.5").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn map_keys_iterate_in_canonical_order() {
        let mut m = BTreeMap::new();
        m.insert(MapKey::Str("b".into()), Value::Int(2));
        m.insert(MapKey::Str("a".into()), Value::Int(1));
        m.insert(MapKey::Int(10), Value::Int(3));
        let keys: Vec<String> = m.keys().map(MapKey::canonical_string).collect();
        assert_eq!(keys, vec!["10", "a", "b"]);
    }

    #[test]
    fn int_range_is_hard() {
        assert!(check_int(MAX_SAFE_INT).is_ok());
        assert_eq!(check_int(MAX_SAFE_INT + 1), Err(ErrorKind::IntegerOverflow));
        assert_eq!(check_int(-MAX_SAFE_INT - 1), Err(ErrorKind::IntegerOverflow));
    }

    #[test]
    fn record_field_order_matters() {
        let a = Value::Record(vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))]);
        let b = Value::Record(vec![("y".into(), Value::Int(2)), ("x".into(), Value::Int(1))]);
        assert_ne!(a, b);
    }

    #[test]
    fn json_round_trip_for_parser_shapes() {
        let v = Value::Map(BTreeMap::from([
            (MapKey::Str("n".into()), Value::Int(42)),
            (MapKey::Str("s".into()), Value::str("hi")),
            (MapKey::Str("absent".into()), Value::None),
        ]));
        let j = v.to_json();
        let back = Value::from_json(&j);
        assert_eq!(v, back);
    }
}
