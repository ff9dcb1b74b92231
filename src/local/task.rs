//! Runs one stage of a pipeline in a worker process.
//!
//! The worker reads TypedBytes pairs on one pipe and writes TypedBytes pairs
//! on another. Output is drained on a dedicated thread into a channel
//! (unbounded unless configured), and input is written from the consumer's thread in between
//! polls of that channel, so a worker that emits while it reads never
//! blocks on a full pipe.

use crossbeam_channel::{Receiver, TryRecvError};
use std::env;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::RecordIter;
use crate::constants::{DEFAULT_STDERR_CAP, WORKDIR_PREFIX};
use crate::encode::{RecordSink, TypedBytesReader, TypedBytesWriter};
use crate::error::{Error, Result};
use crate::{utils, KeyValue, Role};

/// A configured, not yet started, stage.
#[derive(Debug, Clone)]
pub struct StageTask {
    role: Role,
    command: Vec<String>,
    max_input: Option<usize>,
    isolate_stdio: bool,
    env: Vec<(String, String)>,
    files: Vec<PathBuf>,
    remove_tempdir: bool,
    flush_writes: bool,
    stderr_cap: usize,
    queue_bound: Option<usize>,
}

impl StageTask {
    /// A stage running `command <role>`.
    pub fn new(role: Role, command: Vec<String>) -> Self {
        Self {
            role,
            command,
            max_input: None,
            isolate_stdio: false,
            env: Vec::new(),
            files: Vec::new(),
            remove_tempdir: true,
            flush_writes: false,
            stderr_cap: DEFAULT_STDERR_CAP,
            queue_bound: None,
        }
    }

    /// Stop feeding a map stage after `n` records. Ignored for other roles.
    pub fn max_input(mut self, n: Option<usize>) -> Self {
        self.max_input = n;
        self
    }

    /// Pass the record pipes as descriptor numbers instead of stdin/stdout.
    pub fn isolate_stdio(mut self, on: bool) -> Self {
        self.isolate_stdio = on;
        self
    }

    pub fn env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Files copied into the worker's working directory before it starts.
    pub fn files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.files.extend(files);
        self
    }

    pub fn remove_tempdir(mut self, on: bool) -> Self {
        self.remove_tempdir = on;
        self
    }

    /// Flush the input pipe after every record.
    pub fn flush_writes(mut self, on: bool) -> Self {
        self.flush_writes = on;
        self
    }

    /// Bytes of worker stderr kept for error reports.
    pub fn stderr_cap(mut self, bytes: usize) -> Self {
        self.stderr_cap = bytes;
        self
    }

    /// Bound the output records buffered ahead of the consumer.
    ///
    /// Unbounded by default. With a bound, a worker that emits more than
    /// `n` records plus a pipe's worth of output before reading on can stall
    /// against a consumer blocked writing its input.
    pub fn queue_bound(mut self, n: Option<usize>) -> Self {
        self.queue_bound = n;
        self
    }

    /// Starts the worker and returns its lazily produced output.
    ///
    /// `input` is pulled only as the returned iterator is consumed.
    pub fn run(self, input: RecordIter) -> Result<StageOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Config("empty worker command".into()))?;
        let workdir = WorkDir::create(&self.files, self.remove_tempdir)?;
        let program = resolve_program(program)?;

        let mut cmd = Command::new(&program);
        // Its own process group, so whatever the worker spawns dies with it.
        cmd.args(args)
            .arg(self.role.as_str())
            .current_dir(&workdir.path)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .process_group(0);

        let mut cmdline: Vec<String> = std::iter::once(program.clone())
            .chain(args.iter().cloned())
            .chain(std::iter::once(self.role.to_string()))
            .collect();

        type Pipes = (Child, Box<dyn Write>, Box<dyn Read + Send>, Box<dyn Read + Send>);
        let (child, writer, reader, stderr): Pipes =
            if self.isolate_stdio {
                let (in_r, in_w) = utils::cloexec_pipe()?;
                let (out_r, out_w) = utils::cloexec_pipe()?;
                let (err_r, err_w) = utils::cloexec_pipe()?;
                let (read_fd, write_fd) = (in_r.as_raw_fd(), out_w.as_raw_fd());
                cmdline.push(read_fd.to_string());
                cmdline.push(write_fd.to_string());
                cmd.arg(read_fd.to_string())
                    .arg(write_fd.to_string())
                    .stdin(Stdio::null())
                    .stdout(Stdio::from(err_w.try_clone()?))
                    .stderr(Stdio::from(err_w));
                // SAFETY: the hook only calls fcntl
                unsafe {
                    cmd.pre_exec(move || {
                        utils::clear_cloexec(read_fd)?;
                        utils::clear_cloexec(write_fd)
                    });
                }
                let child = spawn(&mut cmd, &cmdline)?;
                // Close our copies of the child's ends so EOF propagates.
                drop(cmd);
                drop(in_r);
                drop(out_w);
                (
                    child,
                    Box::new(File::from(in_w)),
                    Box::new(File::from(out_r)),
                    Box::new(File::from(err_r)),
                )
            } else {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let mut child = spawn(&mut cmd, &cmdline)?;
                drop(cmd);
                let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
                let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
                let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
                (child, Box::new(stdin), Box::new(stdout), Box::new(stderr))
            };

        let command = utils::command_line(&cmdline);
        info!(role = %self.role, pid = child.id(), %command, "started stage worker");

        let (tx, rx) = match self.queue_bound {
            Some(n) => crossbeam_channel::bounded(n),
            None => crossbeam_channel::unbounded(),
        };
        let drain = thread::spawn(move || {
            let mut records = TypedBytesReader::new(reader);
            loop {
                match records.read() {
                    Ok(Some(kv)) => {
                        if tx.send(Ok(kv)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });
        let cap = self.stderr_cap;
        let stderr = thread::spawn(move || utils::read_to_end_capped(stderr, cap));

        let input = match (self.role, self.max_input) {
            (Role::Map, Some(n)) => Box::new(input.take(n)) as RecordIter,
            _ => input,
        };

        Ok(StageOutput {
            command,
            role: self.role,
            child,
            status: None,
            input: Some(input),
            writer: Some(TypedBytesWriter::new(writer).flush_writes(self.flush_writes)),
            rx,
            drain: Some(drain),
            stderr: Some(stderr),
            workdir: Some(workdir),
            fed: 0,
            emitted: 0,
            done: false,
        })
    }
}

fn spawn(cmd: &mut Command, cmdline: &[String]) -> io::Result<Child> {
    cmd.spawn().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("spawn [{}]: {e}", utils::command_line(cmdline)),
        )
    })
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("worker {name} was not captured"))
}

/// The worker runs in its own directory, so a relative path containing a
/// separator is made absolute first.
fn resolve_program(program: &str) -> Result<String> {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        let abs = fs::canonicalize(path)
            .map_err(|e| io::Error::new(e.kind(), format!("resolve {program}: {e}")))?;
        Ok(abs.to_string_lossy().into_owned())
    } else {
        Ok(program.to_string())
    }
}

/// The output of a running stage.
///
/// Yields the worker's records in the order it wrote them. Ends after the
/// worker closes its output and exits successfully; yields one error and
/// ends if it does not. Dropping it early kills the worker.
pub struct StageOutput {
    command: String,
    role: Role,
    child: Child,
    status: Option<ExitStatus>,
    input: Option<RecordIter>,
    writer: Option<TypedBytesWriter<Box<dyn Write>>>,
    rx: Receiver<Result<KeyValue>>,
    drain: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<io::Result<(Vec<u8>, bool)>>>,
    workdir: Option<WorkDir>,
    fed: u64,
    emitted: u64,
    done: bool,
}

impl StageOutput {
    /// Process id of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The stage's scratch directory, until the stage ends.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(|dir| dir.path.as_path())
    }

    /// The worker's command line, role and descriptors included.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn step(&mut self) -> Result<Option<KeyValue>> {
        while self.writer.is_some() {
            match self.rx.try_recv() {
                Ok(msg) => return self.received(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
            self.feed_one()?;
        }
        match self.rx.recv() {
            Ok(msg) => self.received(msg),
            Err(_) => {
                self.finish()?;
                Ok(None)
            }
        }
    }

    fn received(&mut self, msg: Result<KeyValue>) -> Result<Option<KeyValue>> {
        match msg {
            Ok(kv) => {
                self.emitted += 1;
                Ok(Some(kv))
            }
            Err(e) => Err(self.drain_error(e)),
        }
    }

    fn feed_one(&mut self) -> Result<()> {
        let next = match self.input.as_mut() {
            Some(input) => input.next(),
            None => None,
        };
        match next {
            Some(Ok(kv)) => {
                let Some(writer) = self.writer.as_mut() else {
                    return Ok(());
                };
                if let Err(e) = writer.write(&kv) {
                    return Err(self.write_error(e));
                }
                self.fed += 1;
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => self.close_input(),
        }
    }

    fn close_input(&mut self) -> Result<()> {
        self.input = None;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.into_inner() {
                return Err(self.write_error(e));
            }
            debug!(role = %self.role, records = self.fed, "closed worker input");
        }
        Ok(())
    }

    /// A failed write means the worker stopped reading. If the pipe is
    /// broken the worker is dead whatever its exit code.
    fn write_error(&mut self, e: Error) -> Error {
        match e {
            Error::Io(ref io) if io.kind() == io::ErrorKind::BrokenPipe => {
                self.input = None;
                self.writer = None;
                let code = match self.wait() {
                    Ok(status) => utils::exit_code(status),
                    Err(e) => return e.into(),
                };
                self.worker_died(code)
            }
            other => other,
        }
    }

    /// A decode failure on the output is the worker's death if it exited
    /// nonzero, and a malformed stream otherwise.
    fn drain_error(&mut self, e: Error) -> Error {
        self.input = None;
        self.writer = None;
        match self.wait() {
            Ok(status) if !status.success() => self.worker_died(utils::exit_code(status)),
            Ok(_) => e,
            Err(io) => io.into(),
        }
    }

    fn finish(&mut self) -> Result<()> {
        let status = self.wait()?;
        self.join_drain();
        let code = utils::exit_code(status);
        if code != 0 {
            return Err(self.worker_died(code));
        }
        let stderr = self.collect_stderr();
        if !stderr.is_empty() {
            debug!(role = %self.role, %stderr, "worker stderr");
        }
        self.workdir = None;
        info!(
            role = %self.role,
            records_in = self.fed,
            records_out = self.emitted,
            "stage finished"
        );
        Ok(())
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    fn worker_died(&mut self, code: i32) -> Error {
        warn!(role = %self.role, code, command = %self.command, "worker died");
        Error::WorkerDied {
            command: self.command.clone(),
            code,
            stderr: self.collect_stderr(),
        }
    }

    fn collect_stderr(&mut self) -> String {
        match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(Ok((bytes, truncated)))) => {
                let mut text = String::from_utf8_lossy(&bytes).into_owned();
                if truncated {
                    text.push_str("\n[stderr truncated]");
                }
                text
            }
            _ => String::new(),
        }
    }

    fn join_drain(&mut self) {
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }

    /// Kills the worker if it is still running and releases everything.
    fn shutdown(&mut self) {
        self.input = None;
        self.writer = None;
        if self.status.is_none() {
            if let Err(e) = utils::kill_process_group(self.child.id()) {
                debug!(pid = self.child.id(), error = %e, "killpg failed, killing worker only");
                let _ = self.child.kill();
            }
            if let Ok(status) = self.child.wait() {
                self.status = Some(status);
            }
        }
        // Unblocks a drain thread still holding records.
        self.rx = crossbeam_channel::never();
        self.join_drain();
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
        self.workdir = None;
    }
}

impl Iterator for StageOutput {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(kv)) => Some(Ok(kv)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.shutdown();
                Some(Err(e))
            }
        }
    }
}

impl Drop for StageOutput {
    fn drop(&mut self) {
        if !self.done {
            debug!(role = %self.role, pid = self.child.id(), "abandoning stage");
        }
        self.shutdown();
    }
}

/// A per-stage scratch directory under the system temp dir.
struct WorkDir {
    path: PathBuf,
    remove: bool,
}

impl WorkDir {
    fn create(files: &[PathBuf], remove: bool) -> Result<Self> {
        let path = env::temp_dir().join(format!("{WORKDIR_PREFIX}-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        let dir = WorkDir { path, remove };
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| Error::Config(format!("not a file: {}", file.display())))?;
            fs::copy(file, dir.path.join(name)).map_err(|e| {
                io::Error::new(e.kind(), format!("copy {}: {e}", file.display()))
            })?;
        }
        Ok(dir)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.remove {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove stage directory");
            }
        } else {
            warn!(path = %self.path.display(), "leaving stage directory in place");
        }
    }
}
