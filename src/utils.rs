//! Process and descriptor helpers shared by the runner and the worker.
//!

use std::io::{self, Read};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::process::ExitStatus;

/// Joins a command line for display in logs and error messages.
pub fn command_line<S: AsRef<str>>(parts: &[S]) -> String {
    parts.iter().map(|s| s.as_ref()).collect::<Vec<&str>>().join(" ")
}

/// Exit code of a finished process; death by signal maps to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal: Option<i32> = None;

    match status.code() {
        Some(code) => code,
        None => signal.map(|s| 128 + s).unwrap_or(1),
    }
}

/// Reads `reader` to the end, keeping at most `cap` bytes.
///
/// The rest is discarded rather than left unread, so the writer never blocks
/// on a full pipe. The flag is set when anything was discarded.
pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    reader.by_ref().take(cap as u64).read_to_end(&mut kept)?;
    let discarded = io::copy(&mut reader, &mut io::sink())?;
    Ok((kept, discarded > 0))
}

/// Sends `SIGKILL` to every process in the group led by `pid`.
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    // SAFETY: killpg takes plain integers
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a pipe whose both ends are close-on-exec.
///
/// Returns `(read_end, write_end)`.
pub fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    // SAFETY: both descriptors were just created and are owned by nobody else
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(pair)
}

/// Lets `fd` survive `exec`.
///
/// Only calls `fcntl`, so it is safe inside a `pre_exec` hook.
pub fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
