//! A MapReduce-compatible implementation of `grep`.
//!
//! Passes through the records whose value contains the search term. The term
//! is read from the environment once, when the stage starts.

use crate::constants::ENV_GREP_TERM;
use crate::worker::handler::Mapper;
use crate::*;
use anyhow::{Context, Result};
use std::env;

use super::wc::text;

pub const DOC: &str = "Grep: keeps records whose value contains $TBPIPE_GREP_TERM.";
pub const REQUIRED_CMDENVS: &[&str] = &[ENV_GREP_TERM];

#[derive(Default)]
pub struct Grep {
    term: String,
    matched: u64,
}

impl Mapper for Grep {
    fn configure(&mut self) -> Result<()> {
        self.term = env::var(ENV_GREP_TERM).with_context(|| format!("{ENV_GREP_TERM} is not set"))?;
        Ok(())
    }

    fn map(&mut self, kv: KeyValue) -> MapOutput {
        if !text(kv.value())?.contains(&self.term) {
            return worker::handler::nothing();
        }
        self.matched += 1;
        Ok(Box::new(std::iter::once(Ok(kv))))
    }

    fn close(&mut self) -> MapOutput {
        tracing::debug!(term = %self.term, matched = self.matched, "grep finished");
        worker::handler::nothing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_matching_records() {
        let mut grep = Grep {
            term: "needle".into(),
            matched: 0,
        };
        let hit = KeyValue::new(0i64.into(), "a needle here".into());
        let miss = KeyValue::new(1i64.into(), "hay".into());
        assert_eq!(grep.map(hit.clone()).unwrap().count(), 1);
        assert_eq!(grep.map(miss).unwrap().count(), 0);
        assert_eq!(grep.matched, 1);
        assert_eq!(grep.close().unwrap().count(), 0);
    }
}
