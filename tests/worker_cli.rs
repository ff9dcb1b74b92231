use std::io::Write;
use std::process::{Command, Output, Stdio};

use tbpipe::encode::stream::{read_all, write_all};
use tbpipe::local::info::ScriptInfo;
use tbpipe::{KeyValue, Role, Value};

fn run_worker(args: &[&str], env: &[(&str, &str)], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tbpipe-worker"))
        .args(args)
        .env_remove("stream_map_input")
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut input = child.stdin.take().unwrap();
    let data = stdin.to_vec();
    let writer = std::thread::spawn(move || {
        let _ = input.write_all(&data);
    });
    let out = child.wait_with_output().unwrap();
    writer.join().unwrap();
    out
}

fn kv(k: impl Into<Value>, v: impl Into<Value>) -> KeyValue {
    KeyValue::new(k.into(), v.into())
}

const TYPEDBYTES: (&str, &str) = ("stream_map_input", "typedbytes");

#[test]
fn info_prints_the_implemented_stages() {
    let out = run_worker(&["-w", "wc-combine", "info"], &[], b"");
    assert!(out.status.success());
    let info: ScriptInfo = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(info.tasks, vec![Role::Map, Role::Reduce, Role::Combine]);
    assert!(info.doc.unwrap().contains("Word count"));
}

#[test]
fn text_mode_map_and_reduce() {
    let out = run_worker(&["-w", "wc", "map"], &[], b"The cat\nthe\n");
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "the\t1\ncat\t1\nthe\t1\n");

    let out = run_worker(&["-w", "wc", "reduce"], &[], b"a\t1\na\t2\nb\t5\n");
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "a\t3\nb\t5\n");
}

#[test]
fn typedbytes_mode_round_trips_records() {
    let input = write_all(&[kv(0, 1), kv(1, 2)]).unwrap();
    let out = run_worker(&["-w", "double", "map"], &[TYPEDBYTES], &input);
    assert!(out.status.success());
    assert_eq!(read_all(&out.stdout).unwrap(), vec![kv(0, 2), kv(1, 4)]);
}

#[test]
fn pipe_mode_keeps_records_on_stdout() {
    let records: Vec<_> = (0..1000i64).map(|i| kv(i, format!("line {i}"))).collect();
    let input = write_all(&records).unwrap();
    let out = run_worker(&["-w", "identity", "pipe", "map"], &[TYPEDBYTES], &input);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(read_all(&out.stdout).unwrap(), records);
}

#[test]
fn pipe_mode_passes_the_exit_code_through() {
    let input = write_all(&[kv(0, 0)]).unwrap();
    let out = run_worker(&["-w", "crash", "pipe", "map"], &[TYPEDBYTES], &input);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("crashing after 1 records"));
}

#[test]
fn missing_stage_prints_the_doc() {
    let out = run_worker(&["-w", "double", "reduce"], &[TYPEDBYTES], b"");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Double"));
}

#[test]
fn chdir_happens_before_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();
    let out = run_worker(&["-w", "identity", "info"], &[("TBPIPE_CHDIR", path)], b"");
    assert!(out.status.success());
    let out = run_worker(
        &["-w", "identity", "info"],
        &[("TBPIPE_CHDIR", "/nonexistent/dir")],
        b"",
    );
    // A bad directory is logged, not fatal.
    assert!(out.status.success());
}
