//! Record streams over byte sources and sinks.
//!
//! A record file or pipe carries concatenated TypedBytes key/value pairs with
//! no header, trailer or record count. The text variants implement the plain
//! line format workers fall back to when typedbytes I/O is switched off.

use bytes::{Bytes, BytesMut};
use std::io::{self, BufRead, BufReader, Read, Write};

use super::typedbytes;
use super::value::Value;
use crate::error::Result;
use crate::KeyValue;

/// Something that accepts output records.
pub trait RecordSink {
    fn write(&mut self, kv: &KeyValue) -> Result<()>;

    /// Flushes buffered records to the underlying sink.
    fn flush(&mut self) -> Result<()>;
}

/// Lazily decodes key/value pairs from a byte source.
///
/// Iteration ends at a clean pair boundary. After an error the reader is
/// fused and yields nothing further.
pub struct TypedBytesReader<R: Read> {
    inner: BufReader<R>,
    done: bool,
}

impl<R: Read> TypedBytesReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            done: false,
        }
    }

    /// Reads the next pair, `Ok(None)` at end of stream.
    pub fn read(&mut self) -> Result<Option<KeyValue>> {
        if self.done {
            return Ok(None);
        }
        let next = typedbytes::decode_pair(&mut self.inner);
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
        }
        next
    }
}

impl<R: Read> Iterator for TypedBytesReader<R> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

/// Encodes key/value pairs onto a byte sink.
pub struct TypedBytesWriter<W: Write> {
    inner: W,
    buf: BytesMut,
    flush_writes: bool,
    pending: usize,
}

// Buffered bytes that trigger a write when `flush_writes` is off.
const WRITE_CHUNK: usize = 64 * 1024;

impl<W: Write> TypedBytesWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(WRITE_CHUNK),
            flush_writes: false,
            pending: 0,
        }
    }

    /// Push every record to the sink as soon as it is written.
    ///
    /// Needed on pipes whose reader waits on individual records.
    pub fn flush_writes(mut self, on: bool) -> Self {
        self.flush_writes = on;
        self
    }

    /// Number of records written but not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Writes every remaining record and returns the sink.
    pub fn into_inner(mut self) -> Result<W> {
        RecordSink::flush(&mut self)?;
        Ok(self.inner)
    }
}

impl<W: Write> RecordSink for TypedBytesWriter<W> {
    fn write(&mut self, kv: &KeyValue) -> Result<()> {
        typedbytes::encode_pair_into(&mut self.buf, kv)?;
        self.pending += 1;
        if self.flush_writes || self.buf.len() >= WRITE_CHUNK {
            RecordSink::flush(self)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()?;
        self.pending = 0;
        Ok(())
    }
}

/// A text field: a string when it is valid UTF-8, raw bytes otherwise.
fn text_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::from(s),
        Err(_) => Value::Bytes(Bytes::copy_from_slice(bytes)),
    }
}

/// Reads plain text map input: key is the byte offset of the line, value is
/// the line without its newline.
pub struct OffsetLineReader<R: Read> {
    inner: BufReader<R>,
    offset: i64,
    line: Vec<u8>,
}

impl<R: Read> OffsetLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            offset: 0,
            line: Vec::new(),
        }
    }
}

impl<R: Read> Iterator for OffsetLineReader<R> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        match self.inner.read_until(b'\n', &mut self.line) {
            Ok(0) => None,
            Ok(n) => {
                let key = Value::Long(self.offset);
                self.offset += n as i64;
                let text = self.line.strip_suffix(b"\n").unwrap_or(&self.line);
                Some(Ok(KeyValue::new(key, text_value(text))))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Reads plain text reduce input: `key\tvalue` lines.
///
/// A line without a tab is a key with an empty value.
pub struct TabLineReader<R: Read> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: Read> TabLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: Vec::new(),
        }
    }
}

impl<R: Read> Iterator for TabLineReader<R> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        match self.inner.read_until(b'\n', &mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                let mut line = self.line.as_slice();
                while let [rest @ .., b'\n' | b'\r'] = line {
                    line = rest;
                }
                let (key, value) = match line.iter().position(|&b| b == b'\t') {
                    Some(i) => (&line[..i], &line[i + 1..]),
                    None => (line, &b""[..]),
                };
                Some(Ok(KeyValue::new(text_value(key), text_value(value))))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Writes `key\tvalue\n` lines using each value's display form.
pub struct TextWriter<W: Write> {
    inner: W,
}

impl<W: Write> TextWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> RecordSink for TextWriter<W> {
    fn write(&mut self, kv: &KeyValue) -> Result<()> {
        write_field(&mut self.inner, &kv.key)?;
        self.inner.write_all(b"\t")?;
        write_field(&mut self.inner, &kv.value)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

// Raw bytes go out untouched so non UTF-8 lines survive a text round trip.
fn write_field<W: Write>(w: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Bytes(b) => w.write_all(b),
        other => write!(w, "{other}"),
    }
}

/// Decodes every pair in `data`.
pub fn read_all(data: &[u8]) -> Result<Vec<KeyValue>> {
    TypedBytesReader::new(data).collect()
}

/// Encodes every pair into a single buffer.
pub fn write_all<'a>(records: impl IntoIterator<Item = &'a KeyValue>) -> Result<Vec<u8>> {
    let mut writer = TypedBytesWriter::new(Vec::new());
    for kv in records {
        writer.write(kv)?;
    }
    writer.into_inner()
}
