//! The worker side of the stage contract.
//!
//! A worker executable is started as `<worker> <role> [read_fd write_fd]`,
//! `<worker> info` or `<worker> pipe <role>`. It reads key/value records from
//! standard input (or `read_fd`), runs the workload's handler for the role,
//! and writes the records it emits to standard output (or `write_fd`).
//!
//! Records are TypedBytes when `stream_map_input=typedbytes` is set in the
//! environment and tab separated text lines otherwise.

use anyhow::Context;
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::cmd::worker::{Commands, StageFds};
use crate::constants::{ENV_CHDIR, ENV_STREAM_MAP_INPUT, STREAM_TYPEDBYTES};
use crate::encode::stream::{OffsetLineReader, TabLineReader, TextWriter};
use crate::encode::{RecordSink, TypedBytesReader, TypedBytesWriter};
use crate::{shuffle, utils, KeyValue, Role, Workload};

pub mod handler;

use handler::{MapHandler, ReduceHandler};

/// Whether records are exchanged as TypedBytes rather than text lines.
///
/// Decided once from the environment; a worker never switches mid-run.
pub fn is_io_typedbytes() -> bool {
    env::var(ENV_STREAM_MAP_INPUT).is_ok_and(|v| v == STREAM_TYPEDBYTES)
}

/// Runs one worker invocation and returns the process exit code.
pub fn run(workload: Workload, command: Commands) -> anyhow::Result<i32> {
    change_dir();
    match command {
        Commands::Info => {
            println!("{}", serde_json::to_string(&workload.info())?);
            Ok(0)
        }
        Commands::Map(fds) => run_task(workload, Role::Map, fds),
        Commands::Combine(fds) => run_task(workload, Role::Combine, fds),
        Commands::Reduce(fds) => run_task(workload, Role::Reduce, fds),
        Commands::Pipe { role } => run_pipe(role),
    }
}

fn change_dir() {
    let Ok(dir) = env::var(ENV_CHDIR) else {
        return;
    };
    debug!(%dir, "changing working directory");
    if let Err(e) = env::set_current_dir(&dir) {
        warn!(%dir, error = %e, "failed to change working directory");
    }
}

fn open_fd(fd: RawFd) -> File {
    // SAFETY: the descriptor number was handed to this process to own
    File::from(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn run_task(workload: Workload, role: Role, fds: StageFds) -> anyhow::Result<i32> {
    let input: Box<dyn Read> = match fds.read_fd {
        Some(fd) => Box::new(open_fd(fd)),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match fds.write_fd {
        Some(fd) => Box::new(open_fd(fd)),
        None => Box::new(io::stdout().lock()),
    };
    run_stage(workload, role, input, output, is_io_typedbytes())
}

/// Runs the handler for `role` from `input` to `output`.
///
/// Returns exit code 1 after printing the workload doc if the workload has
/// no handler for `role`.
pub fn run_stage(
    workload: Workload,
    role: Role,
    input: Box<dyn Read>,
    output: Box<dyn Write>,
    typedbytes: bool,
) -> anyhow::Result<i32> {
    let records: Box<dyn Iterator<Item = crate::Result<KeyValue>>> = if typedbytes {
        Box::new(TypedBytesReader::new(input))
    } else if role == Role::Map {
        Box::new(OffsetLineReader::new(input))
    } else {
        Box::new(TabLineReader::new(input))
    };
    let mut sink: Box<dyn RecordSink> = if typedbytes {
        Box::new(TypedBytesWriter::new(output))
    } else {
        Box::new(TextWriter::new(BufWriter::new(output)))
    };

    let Workload {
        doc,
        map,
        combine,
        reduce,
        ..
    } = workload;
    let emitted = match role {
        Role::Map => match map {
            Some(mut h) => process_map(&mut h, records, sink.as_mut())?,
            None => return Ok(missing_handler(doc, role)),
        },
        Role::Combine => match combine {
            Some(mut h) => process_reduce(&mut h, records, sink.as_mut())?,
            None => return Ok(missing_handler(doc, role)),
        },
        Role::Reduce => match reduce {
            Some(mut h) => process_reduce(&mut h, records, sink.as_mut())?,
            None => return Ok(missing_handler(doc, role)),
        },
    };
    debug!(%role, emitted, "stage finished");
    Ok(0)
}

fn missing_handler(doc: &str, role: Role) -> i32 {
    eprintln!("{doc}");
    eprintln!("this workload has no {role} stage");
    1
}

fn emit(
    sink: &mut dyn RecordSink,
    out: Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>,
) -> anyhow::Result<u64> {
    let mut n = 0;
    for kv in out {
        sink.write(&kv?)?;
        n += 1;
    }
    Ok(n)
}

/// Feeds every record to a map handler, returning the number of pairs emitted.
pub fn process_map<I>(
    handler: &mut MapHandler,
    records: I,
    sink: &mut dyn RecordSink,
) -> anyhow::Result<u64>
where
    I: IntoIterator<Item = crate::Result<KeyValue>>,
{
    handler.configure()?;
    let mut emitted = 0;
    for kv in records {
        emitted += emit(sink, handler.map(kv?)?)?;
    }
    emitted += emit(sink, handler.close()?)?;
    sink.flush()?;
    Ok(emitted)
}

/// Groups sorted records by key and feeds each group to a reduce handler.
pub fn process_reduce<I>(
    handler: &mut ReduceHandler,
    records: I,
    sink: &mut dyn RecordSink,
) -> anyhow::Result<u64>
where
    I: IntoIterator<Item = crate::Result<KeyValue>>,
{
    handler.configure()?;
    let mut emitted = 0;
    itertools::process_results(records, |kvs| -> anyhow::Result<()> {
        for (key, mut values) in shuffle::group(kvs) {
            emitted += emit(sink, handler.reduce(key, &mut values)?)?;
        }
        Ok(())
    })??;
    emitted += emit(sink, handler.close()?)?;
    sink.flush()?;
    Ok(emitted)
}

/// Re-executes this worker with its real stdin/stdout handed over as
/// descriptor numbers. The child's stdin is empty and its stdout goes to
/// stderr, so stray prints cannot corrupt the record stream.
fn run_pipe(role: Role) -> anyhow::Result<i32> {
    let exe = env::current_exe().context("locate worker executable")?;
    let argv: Vec<String> = env::args().collect();
    let pos = argv
        .iter()
        .rposition(|a| a == "pipe")
        .context("`pipe` missing from the command line")?;

    let read_fd = io::stdin().as_fd().try_clone_to_owned()?;
    let write_fd = io::stdout().as_fd().try_clone_to_owned()?;
    let log_fd = io::stderr().as_fd().try_clone_to_owned()?;
    let (r, w) = (read_fd.as_raw_fd(), write_fd.as_raw_fd());

    let mut cmd = Command::new(&exe);
    cmd.args(&argv[1..pos])
        .arg(role.as_str())
        .arg(r.to_string())
        .arg(w.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_fd));
    // SAFETY: the hook only calls fcntl
    unsafe {
        cmd.pre_exec(move || {
            utils::clear_cloexec(r)?;
            utils::clear_cloexec(w)
        });
    }
    let status = cmd
        .status()
        .with_context(|| format!("re-execute {}", exe.display()))?;
    drop((read_fd, write_fd));
    Ok(utils::exit_code(status))
}
