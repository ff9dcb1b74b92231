//! Where job input comes from and job output goes.
//!
//! Objects are addressed by `/`-separated keys. A record object holds
//! concatenated TypedBytes pairs, so several objects read back to back form
//! one valid stream.

use bytes::Bytes;

use crate::encode::stream::read_all;
use crate::encode::{RecordSink, TypedBytesWriter};
use crate::error::{Error, Result};
use crate::KeyValue;

pub mod fs;
pub mod s3;

pub use self::fs::LocalFs;
pub use self::s3::S3Store;

pub trait Storage {
    fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()>;

    fn get(&self, key: &str) -> anyhow::Result<Bytes>;

    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Reads the record objects at `keys`, in order, as one stream.
pub fn read_records(storage: &dyn Storage, keys: &[String]) -> Result<Vec<KeyValue>> {
    let mut records = Vec::new();
    for key in keys {
        let data = storage.get(key).map_err(Error::Storage)?;
        records.extend(read_all(&data)?);
    }
    Ok(records)
}

/// Writes `records` as one object at `key` and returns how many were written.
pub fn write_records<I>(storage: &dyn Storage, key: &str, records: I) -> Result<u64>
where
    I: IntoIterator<Item = Result<KeyValue>>,
{
    let mut writer = TypedBytesWriter::new(Vec::new());
    let mut count = 0;
    for kv in records {
        writer.write(&kv?)?;
        count += 1;
    }
    let data = writer.into_inner()?;
    storage.put(key, Bytes::from(data)).map_err(Error::Storage)?;
    Ok(count)
}
