//! A map stage that dies on purpose, for exercising failure handling.
//!
//! Echoes records until `$TBPIPE_CRASH_AFTER` have been seen, then exits the
//! process with `$TBPIPE_CRASH_CODE` without flushing anything further.

use crate::constants::{DEFAULT_CRASH_AFTER, DEFAULT_CRASH_CODE, ENV_CRASH_AFTER, ENV_CRASH_CODE};
use crate::worker::handler::Mapper;
use crate::*;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

pub const DOC: &str =
    "Crash: exits with $TBPIPE_CRASH_CODE (default 3) after $TBPIPE_CRASH_AFTER (default 1) records.";

pub struct Crash {
    after: u64,
    code: i32,
    seen: u64,
}

impl Default for Crash {
    fn default() -> Self {
        Self {
            after: DEFAULT_CRASH_AFTER,
            code: DEFAULT_CRASH_CODE,
            seen: 0,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("bad {name}: `{v}`")),
        Err(_) => Ok(default),
    }
}

impl Mapper for Crash {
    fn configure(&mut self) -> Result<()> {
        self.after = env_or(ENV_CRASH_AFTER, DEFAULT_CRASH_AFTER)?;
        self.code = env_or(ENV_CRASH_CODE, DEFAULT_CRASH_CODE)?;
        Ok(())
    }

    fn map(&mut self, kv: KeyValue) -> MapOutput {
        self.seen += 1;
        if self.seen >= self.after {
            eprintln!("crashing after {} records", self.seen);
            std::process::exit(self.code);
        }
        Ok(Box::new(std::iter::once(Ok(kv))))
    }
}
