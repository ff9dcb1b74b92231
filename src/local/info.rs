//! Asking a worker which stages it implements.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{Error, Result};
use crate::{utils, Role};

/// A worker's answer to `<command> info`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptInfo {
    pub tasks: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Basenames of files that must be shipped with the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_files: Vec<String>,
    /// Environment variables that must be set for the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_cmdenvs: Vec<String>,
}

impl ScriptInfo {
    pub fn implements(&self, role: Role) -> bool {
        self.tasks.contains(&role)
    }
}

/// Runs `<command> info` with `env` added and parses its JSON answer.
pub fn query(command: &[String], env: &[(String, String)]) -> Result<ScriptInfo> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Config("empty worker command".into()))?;
    let cmdline = format!("{} info", utils::command_line(command));
    debug!(command = %cmdline, "querying worker info");

    let out = Command::new(program)
        .args(args)
        .arg("info")
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .output()
        .map_err(|e| std::io::Error::new(e.kind(), format!("spawn [{cmdline}]: {e}")))?;

    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    let failed = |stdout: String, stderr: String| Error::InfoQuery {
        command: cmdline.clone(),
        stdout,
        stderr,
    };
    if !out.status.success() {
        return Err(failed(stdout, stderr));
    }
    match serde_json::from_str::<ScriptInfo>(stdout.trim()) {
        Ok(info) => Ok(info),
        Err(_) => Err(failed(stdout, stderr)),
    }
}

/// Fails before any stage runs if the job lacks a file or variable the
/// worker declared it needs.
pub fn check_requirements(
    info: &ScriptInfo,
    files: &[PathBuf],
    cmdenvs: &[(String, String)],
) -> Result<()> {
    let shipped: HashSet<String> = files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    let missing_files: Vec<&str> = info
        .required_files
        .iter()
        .filter(|f| !shipped.contains(f.as_str()))
        .map(String::as_str)
        .collect();
    if !missing_files.is_empty() {
        return Err(Error::Config(format!(
            "worker requires files that were not provided: {}",
            missing_files.join(", ")
        )));
    }

    let missing_envs: Vec<&str> = info
        .required_cmdenvs
        .iter()
        .filter(|name| !cmdenvs.iter().any(|(k, _)| k == *name))
        .map(String::as_str)
        .collect();
    if !missing_envs.is_empty() {
        return Err(Error::Config(format!(
            "worker requires environment variables that were not provided: {}",
            missing_envs.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into(), "sh".into()]
    }

    #[test]
    fn parses_info_json() {
        let cmd = sh(r#"echo '{"tasks": ["map", "reduce"], "doc": "wc"}'"#);
        let info = query(&cmd, &[]).unwrap();
        assert_eq!(info.tasks, vec![Role::Map, Role::Reduce]);
        assert!(info.implements(Role::Reduce));
        assert!(!info.implements(Role::Combine));
        assert_eq!(info.doc.as_deref(), Some("wc"));
    }

    #[test]
    fn env_reaches_the_info_query() {
        let cmd = sh(r#"echo "{\"tasks\": [\"$STAGE\"]}""#);
        let info = query(&cmd, &[("STAGE".into(), "combine".into())]).unwrap();
        assert_eq!(info.tasks, vec![Role::Combine]);
    }

    #[test]
    fn non_json_is_an_info_error() {
        let err = query(&sh("echo not json; echo oops >&2"), &[]).unwrap_err();
        match err {
            Error::InfoQuery { stdout, stderr, .. } => {
                assert_eq!(stdout.trim(), "not json");
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_tasks_is_an_info_error() {
        let err = query(&sh(r#"echo '{"doc": "x"}'"#), &[]).unwrap_err();
        assert!(matches!(err, Error::InfoQuery { .. }));
    }

    #[test]
    fn requirements_are_checked_by_basename() {
        let info = ScriptInfo {
            tasks: vec![Role::Map],
            required_files: vec!["lookup.txt".into()],
            required_cmdenvs: vec!["TERM_TO_FIND".into()],
            ..Default::default()
        };
        let files = vec![PathBuf::from("/data/lookup.txt")];
        let envs = vec![("TERM_TO_FIND".to_string(), "x".to_string())];
        check_requirements(&info, &files, &envs).unwrap();
        assert!(matches!(
            check_requirements(&info, &[], &envs),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            check_requirements(&info, &files, &[]),
            Err(Error::Config(_))
        ));
    }
}
