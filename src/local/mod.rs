//! Running map/reduce jobs on this machine, one worker process per stage.

use crate::error::Result;
use crate::KeyValue;

pub mod engine;
pub mod info;
pub mod task;

pub use engine::{launch_local, run_pipeline, JobInput, LocalJob, LocalOutput, PipelineShape};
pub use task::{StageOutput, StageTask};

/// A lazy, fallible stream of records.
pub type RecordIter = Box<dyn Iterator<Item = Result<KeyValue>>>;
