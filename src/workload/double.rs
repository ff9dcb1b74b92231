//! Doubles numeric values, keeping keys.

use crate::*;
use anyhow::{bail, Result};

pub const DOC: &str = "Double: (k, v) -> (k, 2v) for numeric v. Map only.";

fn double(value: &Value) -> Result<Value> {
    let doubled = match value {
        Value::Byte(v) => Value::Int(i32::from(*v) * 2),
        Value::Int(v) => v
            .checked_mul(2)
            .map(Value::Int)
            .unwrap_or_else(|| Value::Long(i64::from(*v) * 2)),
        Value::Long(v) => Value::from(i128::from(*v) * 2),
        Value::Float(v) => Value::Float(v * 2.0),
        Value::Double(v) => Value::Double(v * 2.0),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(v) => Value::from(i128::from(v) * 2),
            Err(_) => bail!("cannot double `{s}`"),
        },
        other => bail!("cannot double a {}", other.type_name()),
    };
    Ok(doubled)
}

pub fn map(kv: KeyValue) -> MapOutput {
    let value = double(kv.value())?;
    Ok(Box::new(std::iter::once(Ok(KeyValue::new(kv.into_key(), value)))))
}
