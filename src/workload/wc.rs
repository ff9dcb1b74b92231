//! A MapReduce-compatible implementation of word count.
//!

use crate::*;
use anyhow::{anyhow, Result};

pub const DOC: &str = "Word count: emits (word, 1) per word and sums the counts per word.";

/// The text of a record value.
pub(crate) fn text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bytes(b) => Ok(String::from_utf8(b.to_vec())?),
        other => Ok(other.to_string()),
    }
}

pub fn map(kv: KeyValue) -> MapOutput {
    let s = text(kv.value())?;
    let words = s
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>();

    let iter = words
        .into_iter()
        .map(|word| Ok(KeyValue::new(Value::String(word), Value::Long(1))));
    Ok(Box::new(iter))
}

/// Counts arrive as longs over TypedBytes and as decimal strings over text.
fn count(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| anyhow!("not a count: {value}"))
}

pub fn reduce(key: Value, values: &mut dyn Iterator<Item = Value>) -> MapOutput {
    let mut total = 0;
    for value in values {
        total += count(&value)?;
    }
    Ok(Box::new(std::iter::once(Ok(KeyValue::new(
        key,
        Value::Long(total),
    )))))
}
