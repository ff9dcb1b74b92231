//! Command line definitions for the `tbpipe-local` and `tbpipe-worker` binaries.

pub mod local;
pub mod worker;
