//! TypedBytes wire codec.
//!
//! Every value is a one-byte type tag followed by its payload. Scalars have a
//! fixed width; bytes and strings carry a 32-bit big-endian length, composites
//! a 32-bit big-endian element count. There is no outer framing: values and
//! key/value pairs are packed back to back and delimit themselves.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};

use super::fallback;
use super::value::Value;
use crate::error::{Error, Result};
use crate::KeyValue;

pub const BYTES: u8 = 0;
pub const BYTE: u8 = 1;
pub const BOOL: u8 = 2;
pub const INT: u8 = 3;
pub const LONG: u8 = 4;
pub const FLOAT: u8 = 5;
pub const DOUBLE: u8 = 6;
pub const STRING: u8 = 7;
pub const VECTOR: u8 = 8;
pub const LIST: u8 = 9;
pub const MAP: u8 = 10;

/// Deepest composite nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

// Upper bound on speculative allocation for a declared element count.
const PREALLOC_LIMIT: usize = 1024;

/////////////////////////////////////////////////////////////////////////////
// Encoding
/////////////////////////////////////////////////////////////////////////////

/// Encodes a single value.
pub fn encode(value: &Value) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(&mut buf, value)?;
    Ok(buf.freeze())
}

/// Encodes a key immediately followed by its value.
pub fn encode_pair(kv: &KeyValue) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_pair_into(&mut buf, kv)?;
    Ok(buf.freeze())
}

pub fn encode_pair_into(buf: &mut BytesMut, kv: &KeyValue) -> Result<()> {
    encode_into(buf, &kv.key)?;
    encode_into(buf, &kv.value)
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_into(buf: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Bytes(b) => put_blob(buf, BYTES, b)?,
        Value::Byte(v) => {
            buf.put_u8(BYTE);
            buf.put_i8(*v);
        }
        Value::Bool(v) => {
            buf.put_u8(BOOL);
            buf.put_u8(u8::from(*v));
        }
        Value::Int(v) => {
            buf.put_u8(INT);
            buf.put_i32(*v);
        }
        Value::Long(v) => {
            buf.put_u8(LONG);
            buf.put_i64(*v);
        }
        Value::Float(v) => {
            buf.put_u8(FLOAT);
            buf.put_f32(*v);
        }
        Value::Double(v) => {
            buf.put_u8(DOUBLE);
            buf.put_f64(*v);
        }
        Value::String(s) => put_blob(buf, STRING, s.as_bytes())?,
        Value::Vector(items) => put_seq(buf, VECTOR, items)?,
        Value::List(items) => put_seq(buf, LIST, items)?,
        Value::Map(entries) => {
            buf.put_u8(MAP);
            put_len(buf, entries.len())?;
            for (k, v) in entries {
                encode_into(buf, k)?;
                encode_into(buf, v)?;
            }
        }
        Value::BigInt(_) | Value::Object(_) => {
            let payload = fallback::wrap(value)?;
            put_blob(buf, BYTES, &payload)?;
        }
    }
    Ok(())
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| Error::malformed(format!("length {len} does not fit in 32 bits")))?;
    buf.put_i32(len);
    Ok(())
}

fn put_blob(buf: &mut BytesMut, tag: u8, data: &[u8]) -> Result<()> {
    buf.reserve(5 + data.len());
    buf.put_u8(tag);
    put_len(buf, data.len())?;
    buf.put_slice(data);
    Ok(())
}

fn put_seq(buf: &mut BytesMut, tag: u8, items: &[Value]) -> Result<()> {
    buf.put_u8(tag);
    put_len(buf, items.len())?;
    for item in items {
        encode_into(buf, item)?;
    }
    Ok(())
}

/////////////////////////////////////////////////////////////////////////////
// Decoding
/////////////////////////////////////////////////////////////////////////////

/// Decodes the next value from `r`.
///
/// Returns `Ok(None)` when `r` is exhausted exactly at a value boundary.
pub fn decode<R: Read>(r: &mut R) -> Result<Option<Value>> {
    match read_tag(r)? {
        Some(tag) => decode_tagged(r, tag, 0).map(Some),
        None => Ok(None),
    }
}

/// Decodes the next key/value pair from `r`.
///
/// Returns `Ok(None)` at a clean pair boundary. A stream that ends between a
/// key and its value is malformed.
pub fn decode_pair<R: Read>(r: &mut R) -> Result<Option<KeyValue>> {
    let Some(key) = decode(r)? else {
        return Ok(None);
    };
    match decode(r)? {
        Some(value) => Ok(Some(KeyValue::new(key, value))),
        None => Err(Error::malformed("stream ended between a key and its value")),
    }
}

fn read_tag<R: Read>(r: &mut R) -> Result<Option<u8>> {
    let mut tag = [0u8; 1];
    loop {
        match r.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(tag[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn truncated(what: &'static str) -> impl Fn(io::Error) -> Error {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::malformed(format!("stream truncated inside {what}"))
        } else {
            Error::Io(e)
        }
    }
}

fn read_len<R: Read>(r: &mut R, what: &'static str) -> Result<usize> {
    let len = r.read_i32::<BigEndian>().map_err(truncated(what))?;
    usize::try_from(len).map_err(|_| Error::malformed(format!("negative {what} length {len}")))
}

fn read_blob<R: Read>(r: &mut R, what: &'static str) -> Result<Vec<u8>> {
    let len = read_len(r, what)?;
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(Error::malformed(format!(
            "{what} declares {len} bytes but only {} remain",
            buf.len()
        )));
    }
    Ok(buf)
}

fn read_element<R: Read>(r: &mut R, depth: usize) -> Result<Value> {
    match read_tag(r)? {
        Some(tag) => decode_tagged(r, tag, depth),
        None => Err(Error::malformed("stream ended inside a composite value")),
    }
}

fn read_seq<R: Read>(r: &mut R, depth: usize, what: &'static str) -> Result<Vec<Value>> {
    let count = read_len(r, what)?;
    let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        items.push(read_element(r, depth + 1)?);
    }
    Ok(items)
}

fn decode_tagged<R: Read>(r: &mut R, tag: u8, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::malformed(format!("nesting deeper than {MAX_DEPTH}")));
    }
    let value = match tag {
        BYTES => fallback::unwrap(Bytes::from(read_blob(r, "bytes")?)),
        BYTE => Value::Byte(r.read_i8().map_err(truncated("byte"))?),
        BOOL => match r.read_u8().map_err(truncated("bool"))? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(Error::malformed(format!("bool byte {other} is not 0 or 1"))),
        },
        INT => Value::Int(r.read_i32::<BigEndian>().map_err(truncated("int"))?),
        LONG => Value::Long(r.read_i64::<BigEndian>().map_err(truncated("long"))?),
        FLOAT => Value::Float(r.read_f32::<BigEndian>().map_err(truncated("float"))?),
        DOUBLE => Value::Double(r.read_f64::<BigEndian>().map_err(truncated("double"))?),
        STRING => {
            let raw = read_blob(r, "string")?;
            Value::String(
                String::from_utf8(raw).map_err(|e| Error::malformed(format!("string is not UTF-8: {e}")))?,
            )
        }
        VECTOR => Value::Vector(read_seq(r, depth, "vector")?),
        LIST => Value::List(read_seq(r, depth, "list")?),
        MAP => {
            let count = read_len(r, "map")?;
            let mut entries = Vec::with_capacity(count.min(PREALLOC_LIMIT));
            for _ in 0..count {
                let k = read_element(r, depth + 1)?;
                let v = read_element(r, depth + 1)?;
                entries.push((k, v));
            }
            Value::Map(entries)
        }
        other => return Err(Error::malformed(format!("unknown type tag {other}"))),
    };
    Ok(value)
}
