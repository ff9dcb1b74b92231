//! Chains stages into a job: map, then optionally combine and reduce, with a
//! sort between stages.

use std::path::PathBuf;
use tracing::{debug, info};

use super::info::{self as script_info, ScriptInfo};
use super::task::StageTask;
use super::RecordIter;
use crate::constants::{ENV_STREAM_MAP_INPUT, STREAM_TYPEDBYTES};
use crate::error::{Error, Result};
use crate::storage::{self, Storage};
use crate::{shuffle, utils, KeyValue, Role};

/// Everything needed to run a job locally.
#[derive(Debug, Clone)]
pub struct LocalJob {
    command: Vec<String>,
    max_input: Option<usize>,
    files: Vec<PathBuf>,
    cmdenvs: Vec<(String, String)>,
    isolate_stdio: bool,
    remove_tempdir: bool,
    queue_bound: Option<usize>,
}

impl LocalJob {
    /// A job whose stages all run `command`.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            max_input: None,
            files: Vec::new(),
            cmdenvs: Vec::new(),
            isolate_stdio: true,
            remove_tempdir: true,
            queue_bound: None,
        }
    }

    /// Limit the records fed to the map stage.
    pub fn max_input(mut self, n: Option<usize>) -> Self {
        self.max_input = n;
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.files.extend(files);
        self
    }

    pub fn cmdenvs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.cmdenvs.extend(vars);
        self
    }

    pub fn isolate_stdio(mut self, on: bool) -> Self {
        self.isolate_stdio = on;
        self
    }

    pub fn remove_tempdir(mut self, on: bool) -> Self {
        self.remove_tempdir = on;
        self
    }

    /// See [`StageTask::queue_bound`].
    pub fn queue_bound(mut self, n: Option<usize>) -> Self {
        self.queue_bound = n;
        self
    }

    /// Environment every stage worker runs with.
    fn stage_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(ENV_STREAM_MAP_INPUT.to_string(), STREAM_TYPEDBYTES.to_string())];
        env.extend(self.cmdenvs.iter().cloned());
        env
    }

    fn stage(&self, role: Role) -> StageTask {
        StageTask::new(role, self.command.clone())
            .max_input(self.max_input)
            .isolate_stdio(self.isolate_stdio)
            .env(self.stage_env())
            .files(self.files.iter().cloned())
            .remove_tempdir(self.remove_tempdir)
            .queue_bound(self.queue_bound)
    }
}

/// Parses a `NAME=value` command line environment setting.
pub fn parse_cmdenv(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(Error::Config(format!("expected NAME=value, got `{s}`"))),
    }
}

/// Which stages a job runs, decided from the worker's info answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineShape {
    MapOnly,
    MapReduce,
    MapCombineReduce,
}

impl PipelineShape {
    pub fn from_info(info: &ScriptInfo) -> Result<Self> {
        if !info.implements(Role::Map) {
            return Err(Error::Config("worker does not implement a map stage".into()));
        }
        let shape = match (info.implements(Role::Combine), info.implements(Role::Reduce)) {
            (true, true) => PipelineShape::MapCombineReduce,
            (false, true) => PipelineShape::MapReduce,
            (combine, false) => {
                if combine {
                    debug!("ignoring combine stage without a reduce stage");
                }
                PipelineShape::MapOnly
            }
        };
        Ok(shape)
    }

    /// The stages to run, in order.
    pub fn roles(&self) -> &'static [Role] {
        match self {
            PipelineShape::MapOnly => &[Role::Map],
            PipelineShape::MapReduce => &[Role::Map, Role::Reduce],
            PipelineShape::MapCombineReduce => &[Role::Map, Role::Combine, Role::Reduce],
        }
    }
}

/// The result of a job: its final stage's records, read lazily.
pub struct LocalOutput {
    pub shape: PipelineShape,
    pub info: ScriptInfo,
    output: RecordIter,
}

impl Iterator for LocalOutput {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.output.next()
    }
}

/// Every auxiliary file must exist before any worker is started.
fn check_files(files: &[PathBuf]) -> Result<()> {
    match files.iter().find(|file| !file.is_file()) {
        Some(missing) => Err(Error::Config(format!(
            "auxiliary file {} does not exist",
            missing.display()
        ))),
        None => Ok(()),
    }
}

/// Collects a stage's output and sorts it for the next stage.
pub fn materialize(output: impl Iterator<Item = Result<KeyValue>>) -> Result<Vec<KeyValue>> {
    let records = output.collect::<Result<Vec<_>>>()?;
    Ok(shuffle::sort(records))
}

/// Runs the job over `input`.
///
/// Every stage but the last is run to completion and sorted before the next
/// one starts. The last stage is returned unconsumed.
pub fn run_pipeline(job: &LocalJob, input: RecordIter) -> Result<LocalOutput> {
    check_files(&job.files)?;
    let env = job.stage_env();
    let info = script_info::query(&job.command, &env)?;
    script_info::check_requirements(&info, &job.files, &job.cmdenvs)?;
    let shape = PipelineShape::from_info(&info)?;
    info!(
        ?shape,
        command = %utils::command_line(&job.command),
        "running local pipeline"
    );

    let (&last, earlier) = shape
        .roles()
        .split_last()
        .ok_or_else(|| Error::Config("pipeline without stages".into()))?;
    let mut records = input;
    for &role in earlier {
        let sorted = materialize(job.stage(role).run(records)?)?;
        debug!(%role, records = sorted.len(), "stage output sorted");
        records = Box::new(sorted.into_iter().map(Ok));
    }
    let output = job.stage(last).run(records)?;

    Ok(LocalOutput {
        shape,
        info,
        output: Box::new(output),
    })
}

/// Where a job's records come from.
pub enum JobInput {
    Records(RecordIter),
    /// Record files in storage, read in order and concatenated.
    Paths(Vec<String>),
}

/// Runs a job reading from and optionally writing to `storage`.
///
/// With an output path the final records are written there first, and the
/// returned output reads them back.
pub fn launch_local(
    job: &LocalJob,
    input: JobInput,
    output_path: Option<&str>,
    storage: &dyn Storage,
) -> Result<LocalOutput> {
    let records: RecordIter = match input {
        JobInput::Records(records) => records,
        JobInput::Paths(paths) => {
            let records = storage::read_records(storage, &paths)?;
            info!(files = paths.len(), records = records.len(), "read job input");
            Box::new(records.into_iter().map(Ok))
        }
    };

    let mut out = run_pipeline(job, records)?;
    if let Some(path) = output_path {
        let written = storage::write_records(storage, path, &mut out.output)?;
        info!(path, records = written, "wrote job output");
        let records = storage::read_records(storage, &[path.to_string()])?;
        out.output = Box::new(records.into_iter().map(Ok));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(tasks: &[Role]) -> ScriptInfo {
        ScriptInfo {
            tasks: tasks.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn shape_follows_the_tasks() {
        let shape = |tasks: &[Role]| PipelineShape::from_info(&info(tasks)).unwrap();
        assert_eq!(shape(&[Role::Map]), PipelineShape::MapOnly);
        assert_eq!(shape(&[Role::Map, Role::Reduce]), PipelineShape::MapReduce);
        assert_eq!(
            shape(&[Role::Reduce, Role::Combine, Role::Map]),
            PipelineShape::MapCombineReduce
        );
        assert_eq!(shape(&[Role::Map, Role::Combine]), PipelineShape::MapOnly);
    }

    #[test]
    fn no_map_is_a_config_error() {
        let err = PipelineShape::from_info(&info(&[Role::Reduce])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn cmdenvs_parse_at_the_first_equals() {
        assert_eq!(
            parse_cmdenv("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_cmdenv("EMPTY=").unwrap().1, "");
        assert!(parse_cmdenv("novalue").is_err());
        assert!(parse_cmdenv("=x").is_err());
    }

    #[test]
    fn stages_run_with_typedbytes_enabled() {
        let job = LocalJob::new(vec!["w".into()]).cmdenvs([("K".to_string(), "v".to_string())]);
        assert_eq!(
            job.stage_env(),
            vec![
                ("stream_map_input".to_string(), "typedbytes".to_string()),
                ("K".to_string(), "v".to_string())
            ]
        );
    }

    #[test]
    fn materialize_sorts_stably() {
        let kv = |k: i32, v: &str| Ok(KeyValue::new(k.into(), v.into()));
        let sorted = materialize(vec![kv(1, "a"), kv(0, "b"), kv(1, "c")].into_iter()).unwrap();
        let values: Vec<_> = sorted.iter().map(|kv| kv.value.to_string()).collect();
        assert_eq!(values, ["b", "a", "c"]);
    }
}
