//! Stage handlers: what a workload plugs into the worker runtime.
//!
//! A handler is either a plain function or a stateful object with lifecycle
//! hooks. The variant is picked when the workload is built, so the runtime
//! never probes a handler for optional methods.

use std::iter;

use crate::{KeyValue, MapFn, MapOutput, ReduceFn, Value};

/// No output pairs.
pub fn nothing() -> MapOutput {
    Ok(Box::new(iter::empty()))
}

/// A stateful map stage.
pub trait Mapper {
    /// Called once before any input is read.
    fn configure(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn map(&mut self, kv: KeyValue) -> MapOutput;

    /// Called once after all input is read; may emit trailing pairs.
    fn close(&mut self) -> MapOutput {
        nothing()
    }
}

/// A stateful reduce or combine stage.
pub trait Reducer {
    /// Called once before any input is read.
    fn configure(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn reduce(&mut self, key: Value, values: &mut dyn Iterator<Item = Value>) -> MapOutput;

    /// Called once after all input is read; may emit trailing pairs.
    fn close(&mut self) -> MapOutput {
        nothing()
    }
}

pub enum MapHandler {
    Fn(MapFn),
    Stateful(Box<dyn Mapper>),
}

impl MapHandler {
    pub fn configure(&mut self) -> anyhow::Result<()> {
        match self {
            MapHandler::Fn(_) => Ok(()),
            MapHandler::Stateful(m) => m.configure(),
        }
    }

    pub fn map(&mut self, kv: KeyValue) -> MapOutput {
        match self {
            MapHandler::Fn(f) => f(kv),
            MapHandler::Stateful(m) => m.map(kv),
        }
    }

    pub fn close(&mut self) -> MapOutput {
        match self {
            MapHandler::Fn(_) => nothing(),
            MapHandler::Stateful(m) => m.close(),
        }
    }
}

pub enum ReduceHandler {
    Fn(ReduceFn),
    Stateful(Box<dyn Reducer>),
}

impl ReduceHandler {
    pub fn configure(&mut self) -> anyhow::Result<()> {
        match self {
            ReduceHandler::Fn(_) => Ok(()),
            ReduceHandler::Stateful(r) => r.configure(),
        }
    }

    pub fn reduce(&mut self, key: Value, values: &mut dyn Iterator<Item = Value>) -> MapOutput {
        match self {
            ReduceHandler::Fn(f) => f(key, values),
            ReduceHandler::Stateful(r) => r.reduce(key, values),
        }
    }

    pub fn close(&mut self) -> MapOutput {
        match self {
            ReduceHandler::Fn(_) => nothing(),
            ReduceHandler::Stateful(r) => r.close(),
        }
    }
}
