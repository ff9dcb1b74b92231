//! Converts worker application names to actual application code.
//!
//! # Example
//!
//! To get the word count application:
//! ```
//! # use anyhow::Result;
//! use tbpipe::workload;
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc")?;
//! assert!(wc.reduce.is_some());
//! # Ok(())
//! # }
//! ```

use crate::worker::handler::{MapHandler, ReduceHandler};
use crate::Workload;
use anyhow::{bail, Result};

pub mod crash;
pub mod double;
pub mod grep;
pub mod identity;
pub mod wc;

/// Names accepted by [`named`].
pub const NAMES: &[&str] = &["wc", "wc-combine", "grep", "double", "identity", "crash"];

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            doc: wc::DOC,
            map: Some(MapHandler::Fn(wc::map)),
            combine: None,
            reduce: Some(ReduceHandler::Fn(wc::reduce)),
            required_cmdenvs: &[],
        }),
        "wc-combine" => Some(Workload {
            doc: wc::DOC,
            map: Some(MapHandler::Fn(wc::map)),
            combine: Some(ReduceHandler::Fn(wc::reduce)),
            reduce: Some(ReduceHandler::Fn(wc::reduce)),
            required_cmdenvs: &[],
        }),
        "grep" => Some(Workload {
            doc: grep::DOC,
            map: Some(MapHandler::Stateful(Box::<grep::Grep>::default())),
            combine: None,
            reduce: None,
            required_cmdenvs: grep::REQUIRED_CMDENVS,
        }),
        "double" => Some(Workload {
            doc: double::DOC,
            map: Some(MapHandler::Fn(double::map)),
            combine: None,
            reduce: None,
            required_cmdenvs: &[],
        }),
        "identity" => Some(Workload {
            doc: identity::DOC,
            map: Some(MapHandler::Fn(identity::map)),
            combine: None,
            reduce: None,
            required_cmdenvs: &[],
        }),
        "crash" => Some(Workload {
            doc: crash::DOC,
            map: Some(MapHandler::Stateful(Box::<crash::Crash>::default())),
            combine: None,
            reduce: None,
            required_cmdenvs: &[],
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No app named `{}` found. Known apps: {}", name, NAMES.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn every_listed_name_resolves() {
        for name in NAMES {
            let app = named(name).unwrap();
            assert!(app.info().implements(Role::Map), "{name} has no map stage");
        }
        assert!(named("nope").is_err());
    }

    #[test]
    fn info_lists_implemented_stages() {
        let info = named("wc-combine").unwrap().info();
        assert_eq!(info.tasks, vec![Role::Map, Role::Reduce, Role::Combine]);
        let info = named("grep").unwrap().info();
        assert_eq!(info.tasks, vec![Role::Map]);
        assert_eq!(info.required_cmdenvs, vec!["TBPIPE_GREP_TERM".to_string()]);
    }
}
