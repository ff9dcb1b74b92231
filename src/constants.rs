//! Centralized environment variable names and default values.

// Environment variable names
/// Selects the worker I/O format; [`STREAM_TYPEDBYTES`] means binary pairs.
pub const ENV_STREAM_MAP_INPUT: &str = "stream_map_input";
pub const STREAM_TYPEDBYTES: &str = "typedbytes";
/// Directory a worker changes into before running its stage.
pub const ENV_CHDIR: &str = "TBPIPE_CHDIR";
pub const ENV_GREP_TERM: &str = "TBPIPE_GREP_TERM";
pub const ENV_CRASH_AFTER: &str = "TBPIPE_CRASH_AFTER";
pub const ENV_CRASH_CODE: &str = "TBPIPE_CRASH_CODE";

// Defaults
/// Worker stderr kept for error reports; the rest is read and dropped.
pub const DEFAULT_STDERR_CAP: usize = 256 * 1024;
pub const DEFAULT_CRASH_AFTER: u64 = 1;
pub const DEFAULT_CRASH_CODE: i32 = 3;
/// Prefix of per-stage working directories under the system temp dir.
pub const WORKDIR_PREFIX: &str = "tbpipe";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
