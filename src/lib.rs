//! A local map/reduce runner speaking TypedBytes.
//!
//! Worker executables implement map, combine and reduce stages over
//! TypedBytes key/value streams. The runner spawns one worker process per
//! stage, pipes records through it, and sorts between stages, emulating the
//! dataflow of a Hadoop streaming job on a single machine.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod cmd;
pub mod constants;
pub mod encode;
pub mod error;
pub mod local;
pub mod shuffle;
pub mod storage;
pub mod utils;
pub mod worker;
pub mod workload;

pub use encode::Value;
pub use error::{Error, Result};

use local::info::ScriptInfo;
use worker::handler::{MapHandler, ReduceHandler};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of a stage handler.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
///
/// This accomodates both batch (all pairs emitted at once) and lazy
/// (pairs only emitted when the iterator is consumed) handlers.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes one key-value pair and returns an iterator that
/// yields zero or more new key-value pairs.
pub type MapFn = fn(kv: KeyValue) -> MapOutput;

/// A reduce function takes a key and a single-pass iterator over the values
/// grouped under it.
pub type ReduceFn = fn(key: Value, values: &mut dyn Iterator<Item = Value>) -> MapOutput;

/// The stage a worker process is asked to run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Map,
    Combine,
    Reduce,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Map => "map",
            Role::Combine => "combine",
            Role::Reduce => "reduce",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "map" => Ok(Role::Map),
            "combine" => Ok(Role::Combine),
            "reduce" => Ok(Role::Reduce),
            other => Err(Error::Config(format!("unknown stage `{other}`"))),
        }
    }
}

/// A map reduce application served by a worker process.
pub struct Workload {
    /// Printed when the worker is asked for a stage it does not implement.
    pub doc: &'static str,
    pub map: Option<MapHandler>,
    pub combine: Option<ReduceHandler>,
    pub reduce: Option<ReduceHandler>,
    /// Environment variables the workload cannot run without.
    pub required_cmdenvs: &'static [&'static str],
}

impl Workload {
    /// Describes the implemented stages, as answered to an `info` query.
    pub fn info(&self) -> ScriptInfo {
        let mut tasks = Vec::new();
        if self.map.is_some() {
            tasks.push(Role::Map);
        }
        if self.reduce.is_some() {
            tasks.push(Role::Reduce);
        }
        if self.combine.is_some() {
            tasks.push(Role::Combine);
        }
        ScriptInfo {
            tasks,
            doc: Some(self.doc.to_string()),
            required_files: Vec::new(),
            required_cmdenvs: self.required_cmdenvs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Value,
    /// The value.
    pub value: Value,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: Value, value: Value) -> Self {
        Self { key, value }
    }

    /// Get the key of this key-value pair.
    #[inline]
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Get the value of this key-value pair.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> Value {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl<K: Into<Value>, V: Into<Value>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        Self::new(key.into(), value.into())
    }
}
