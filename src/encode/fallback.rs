//! Generic serialization escape for values without a wire tag.
//!
//! A wrapped value is a `BYTES` payload made of [`MAGIC`] followed by the
//! serde_json form of [`Wrapped`]. Any `BYTES` payload that does not start
//! with the magic, or does not parse behind it, stays plain bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::value::{BigInt, Value};
use crate::error::{Error, Result};

/// Marks a `BYTES` payload as a wrapped object.
pub const MAGIC: &[u8] = b"\x00TBPIPE-OBJ\x01";

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
enum Wrapped {
    BigInt(BigInt),
    Object(serde_json::Value),
}

/// Wraps a fallback value into the `BYTES` payload that carries it.
///
/// Variants that have their own wire tag are refused as malformed.
pub fn wrap(value: &Value) -> Result<Bytes> {
    let wrapped = match value {
        Value::BigInt(v) => Wrapped::BigInt(v.clone()),
        Value::Object(v) => Wrapped::Object(v.clone()),
        other => {
            return Err(Error::malformed(format!(
                "{} has a wire tag and cannot be wrapped",
                other.type_name()
            )))
        }
    };
    let body = serde_json::to_vec(&wrapped)?;
    let mut buf = BytesMut::with_capacity(MAGIC.len() + body.len());
    buf.put_slice(MAGIC);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Turns a decoded `BYTES` payload back into the value it wraps, if any.
pub fn unwrap(payload: Bytes) -> Value {
    let Some(body) = payload.strip_prefix(MAGIC) else {
        return Value::Bytes(payload);
    };
    match serde_json::from_slice::<Wrapped>(body) {
        Ok(Wrapped::BigInt(v)) => Value::BigInt(v),
        Ok(Wrapped::Object(v)) => Value::Object(v),
        Err(_) => Value::Bytes(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_values_are_refused() {
        assert!(matches!(wrap(&Value::Long(3)), Err(Error::Malformed(_))));
        assert!(matches!(wrap(&Value::from("x")), Err(Error::Malformed(_))));
    }

    #[test]
    fn bigint_survives_wrapping() {
        let big = Value::from(u128::MAX);
        let payload = wrap(&big).unwrap();
        assert!(payload.starts_with(MAGIC));
        assert_eq!(unwrap(payload), big);
    }

    #[test]
    fn object_survives_wrapping() {
        let obj = Value::Object(json!({"name": "face", "boxes": [[1, 2, 3, 4]]}));
        let payload = wrap(&obj).unwrap();
        assert_eq!(unwrap(payload), obj);
    }

    #[test]
    fn plain_bytes_stay_bytes() {
        let raw = Bytes::from_static(b"\x00TBPIPE-OBJ\x01not json");
        assert_eq!(unwrap(raw.clone()), Value::Bytes(raw));
        let raw = Bytes::from_static(b"\x89PNG\r\n");
        assert_eq!(unwrap(raw.clone()), Value::Bytes(raw));
    }
}
