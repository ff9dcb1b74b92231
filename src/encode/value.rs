//! The in-memory form of a TypedBytes value.
//!

use bytes::Bytes;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A single typed value.
///
/// The first eleven variants have a dedicated wire tag. [`Value::BigInt`] and
/// [`Value::Object`] have none and travel through the generic fallback
/// (see [`crate::encode::fallback`]), which wraps them as `BYTES`.
#[derive(Clone, Debug)]
pub enum Value {
    Bytes(Bytes),
    Byte(i8),
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Fixed-arity ordered tuple.
    Vector(Vec<Value>),
    /// Appendable ordered sequence.
    List(Vec<Value>),
    /// Key/value entries in wire order. Duplicate keys are kept.
    Map(Vec<(Value, Value)>),
    /// An integer outside the `i64` range.
    BigInt(BigInt),
    /// An arbitrary application object.
    Object(serde_json::Value),
}

impl Value {
    /// Position of this variant in the cross-type key order.
    ///
    /// Wire-tagged variants rank by their tag; fallback variants follow.
    pub fn rank(&self) -> u8 {
        match self {
            Value::Bytes(_) => 0,
            Value::Byte(_) => 1,
            Value::Bool(_) => 2,
            Value::Int(_) => 3,
            Value::Long(_) => 4,
            Value::Float(_) => 5,
            Value::Double(_) => 6,
            Value::String(_) => 7,
            Value::Vector(_) => 8,
            Value::List(_) => 9,
            Value::Map(_) => 10,
            Value::BigInt(_) => 11,
            Value::Object(_) => 12,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Byte(_) => "byte",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::BigInt(_) => "bigint",
            Value::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Any integer variant that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            Value::BigInt(v) => v.to_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Byte(a), Byte(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Vector(a), Vector(b)) | (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            (BigInt(a), BigInt(b)) => a.cmp(b),
            (Object(a), Object(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Vector(items) => write!(f, "({})", items.iter().format(", ")),
            Value::List(items) => write!(f, "[{}]", items.iter().format(", ")),
            Value::Map(entries) => write!(
                f,
                "{{{}}}",
                entries
                    .iter()
                    .format_with(", ", |(k, v), g| g(&format_args!("{k}: {v}")))
            ),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Object(v) => write!(f, "{v}"),
        }
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Byte(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Long(v),
            Err(_) => Value::BigInt(BigInt::from(v)),
        }
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Long(v),
            Err(_) => Value::BigInt(BigInt::from(v)),
        }
    }
}

impl From<u128> for Value {
    fn from(v: u128) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Long(v),
            Err(_) => Value::BigInt(BigInt::from(v)),
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<BigInt> for Value {
    /// Big integers that fit in an `i64` collapse to [`Value::Long`].
    fn from(v: BigInt) -> Self {
        match v.to_i64() {
            Some(v) => Value::Long(v),
            None => Value::BigInt(v),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Object(v)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Arbitrary precision integers
/////////////////////////////////////////////////////////////////////////////

/// An arbitrary precision integer, kept as a sign and normalized decimal
/// digits (no leading zeros, zero is never negative).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BigInt {
    negative: bool,
    digits: String,
}

impl BigInt {
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Returns the value if it fits in an `i64`.
    pub fn to_i64(&self) -> Option<i64> {
        self.to_string().parse().ok()
    }

    fn from_parts(negative: bool, digits: &str) -> Self {
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return BigInt {
                negative: false,
                digits: "0".to_string(),
            };
        }
        BigInt {
            negative,
            digits: digits.to_string(),
        }
    }
}

impl FromStr for BigInt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("not an integer: {s:?}"));
        }
        Ok(BigInt::from_parts(negative, digits))
    }
}

impl TryFrom<String> for BigInt {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BigInt> for String {
    fn from(v: BigInt) -> Self {
        v.to_string()
    }
}

impl From<i64> for BigInt {
    fn from(v: i64) -> Self {
        BigInt::from(i128::from(v))
    }
}

impl From<u64> for BigInt {
    fn from(v: u64) -> Self {
        BigInt::from_parts(false, &v.to_string())
    }
}

impl From<i128> for BigInt {
    fn from(v: i128) -> Self {
        BigInt::from_parts(v < 0, &v.unsigned_abs().to_string())
    }
}

impl From<u128> for BigInt {
    fn from(v: u128) -> Self {
        BigInt::from_parts(false, &v.to_string())
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.digits)
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &Self) -> Ordering {
        // digits are normalized, so a longer magnitude is a larger magnitude
        let magnitude = self
            .digits
            .len()
            .cmp(&other.digits.len())
            .then_with(|| self.digits.cmp(&other.digits));
        match (self.negative, other.negative) {
            (false, false) => magnitude,
            (true, true) => magnitude.reverse(),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_by_tag_then_value() {
        let mut keys = vec![
            Value::from("b"),
            Value::Long(7),
            Value::from(b"zz".to_vec()),
            Value::Int(100),
            Value::from("a"),
            Value::Long(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Value::from(b"zz".to_vec()),
                Value::Int(100),
                Value::Long(-1),
                Value::Long(7),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn floats_use_total_order() {
        assert!(Value::Double(-0.0) < Value::Double(0.0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert!(Value::Float(1.5) > Value::Float(-2.0));
    }

    #[test]
    fn composites_compare_elementwise() {
        let a = Value::Vector(vec![Value::Int(1), Value::from("x")]);
        let b = Value::Vector(vec![Value::Int(1), Value::from("y")]);
        let c = Value::Vector(vec![Value::Int(1)]);
        assert!(a < b);
        assert!(c < a);
        assert!(Value::Vector(vec![]) < Value::List(vec![]));
    }

    #[test]
    fn bigint_orders_numerically() {
        let big: BigInt = "123456789012345678901234567890".parse().unwrap();
        let neg: BigInt = "-123456789012345678901234567890".parse().unwrap();
        let small = BigInt::from(42i64);
        assert!(neg < small);
        assert!(small < big);
        assert!(BigInt::from(-5i64) < BigInt::from(-4i64));
        assert_eq!("-0".parse::<BigInt>().unwrap(), BigInt::from(0i64));
        assert_eq!("007".parse::<BigInt>().unwrap().to_string(), "7");
        assert!("12a".parse::<BigInt>().is_err());
    }

    #[test]
    fn integers_pick_long_or_bigint() {
        assert_eq!(Value::from(5u64), Value::Long(5));
        assert!(matches!(Value::from(u64::MAX), Value::BigInt(_)));
        assert!(matches!(Value::from(i128::MIN), Value::BigInt(_)));
        assert_eq!(Value::from(BigInt::from(-3i64)), Value::Long(-3));
        assert_eq!(Value::from(u64::MAX).to_string(), u64::MAX.to_string());
    }

    #[test]
    fn display_is_readable() {
        let v = Value::Map(vec![(
            Value::from("k"),
            Value::List(vec![Value::Int(1), Value::Bool(true)]),
        )]);
        assert_eq!(v.to_string(), "{k: [1, true]}");
        assert_eq!(Value::Vector(vec![Value::Long(1), Value::from("a")]).to_string(), "(1, a)");
    }
}
