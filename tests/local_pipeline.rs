use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tbpipe::local::{run_pipeline, launch_local, JobInput, LocalJob, PipelineShape, StageTask};
use tbpipe::local::RecordIter;
use tbpipe::storage::{self, LocalFs};
use tbpipe::{Error, KeyValue, Result, Role, Value};

fn worker(name: &str) -> Vec<String> {
    vec![
        env!("CARGO_BIN_EXE_tbpipe-worker").to_string(),
        "-w".to_string(),
        name.to_string(),
    ]
}

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into(), "sh".into()]
}

fn typedbytes_env() -> Vec<(String, String)> {
    vec![("stream_map_input".to_string(), "typedbytes".to_string())]
}

fn kv(k: impl Into<Value>, v: impl Into<Value>) -> KeyValue {
    KeyValue::new(k.into(), v.into())
}

fn records(items: Vec<KeyValue>) -> RecordIter {
    Box::new(items.into_iter().map(Ok))
}

fn counts(out: Vec<KeyValue>) -> BTreeMap<String, i64> {
    out.into_iter()
        .map(|kv| (kv.key.to_string(), kv.value.as_i64().unwrap()))
        .collect()
}

#[cfg(target_os = "linux")]
fn process_gone(pid: u32) -> bool {
    !PathBuf::from(format!("/proc/{pid}")).exists()
}

#[test]
fn map_only_doubles_in_order() {
    let job = LocalJob::new(worker("double"));
    let input = records(vec![kv(0, 1), kv(1, 2), kv(2, 3)]);
    let out = run_pipeline(&job, input).unwrap();
    assert_eq!(out.shape, PipelineShape::MapOnly);
    let out: Vec<_> = out.collect::<Result<_>>().unwrap();
    assert_eq!(out, vec![kv(0, 2), kv(1, 4), kv(2, 6)]);
}

#[test]
fn wordcount_map_reduce() {
    let job = LocalJob::new(worker("wc"));
    let input = records(vec![kv(0i64, "the cat"), kv(1i64, "the dog")]);
    let out = run_pipeline(&job, input).unwrap();
    assert_eq!(out.shape, PipelineShape::MapReduce);
    let got = counts(out.collect::<Result<_>>().unwrap());
    let want: BTreeMap<String, i64> = [("the", 2), ("cat", 1), ("dog", 1)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    assert_eq!(got, want);
}

#[test]
fn wordcount_with_combiner() {
    let job = LocalJob::new(worker("wc-combine")).isolate_stdio(false);
    let input = records(vec![
        kv(0i64, "a b a"),
        kv(1i64, "b a"),
        kv(2i64, "c"),
    ]);
    let out = run_pipeline(&job, input).unwrap();
    assert_eq!(out.shape, PipelineShape::MapCombineReduce);
    let got = counts(out.collect::<Result<_>>().unwrap());
    assert_eq!(got["a"], 3);
    assert_eq!(got["b"], 2);
    assert_eq!(got["c"], 1);
}

fn echo_large(isolate: bool) {
    const N: usize = 10_000;
    let input: RecordIter = Box::new((0..N).map(|i| {
        Ok(KeyValue::new(
            Value::Long(i as i64),
            Value::Bytes(vec![(i % 251) as u8; 10 * 1024].into()),
        ))
    }));
    let out = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .isolate_stdio(isolate)
        .run(input)
        .unwrap();
    let mut seen = 0;
    for (i, kv) in out.enumerate() {
        let kv = kv.unwrap();
        assert_eq!(kv.key, Value::Long(i as i64));
        assert_eq!(kv.value.as_bytes().unwrap().len(), 10 * 1024);
        seen += 1;
    }
    assert_eq!(seen, N);
}

#[test]
fn large_echo_does_not_deadlock() {
    echo_large(false);
}

#[test]
fn large_echo_does_not_deadlock_with_isolated_stdio() {
    echo_large(true);
}

#[test]
fn worker_crash_reports_exit_code() {
    let mut env = typedbytes_env();
    env.push(("TBPIPE_CRASH_AFTER".to_string(), "5".to_string()));
    let input = records((0..10i64).map(|i| kv(i, i)).collect());
    let mut out = StageTask::new(Role::Map, worker("crash"))
        .env(env)
        .run(input)
        .unwrap();
    let pid = out.pid();

    let err = out.find_map(|r| r.err()).unwrap();
    match &err {
        Error::WorkerDied { code, stderr, command } => {
            assert_eq!(*code, 3);
            assert!(stderr.contains("crashing after 5 records"), "{stderr}");
            assert!(command.contains("crash"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(out.next().is_none());
    #[cfg(target_os = "linux")]
    assert!(process_gone(pid));
    let _ = pid;
}

#[test]
fn worker_crash_fails_the_pipeline() {
    let job = LocalJob::new(worker("crash")).cmdenvs([("TBPIPE_CRASH_CODE".to_string(), "7".to_string())]);
    let out = run_pipeline(&job, records(vec![kv(0, 0), kv(1, 1)])).unwrap();
    let err = out.collect::<Result<Vec<_>>>().unwrap_err();
    assert!(err.is_worker_died());
    assert_eq!(err.exit_code(), Some(7));
}

#[test]
fn max_input_cuts_off_the_map_stage() {
    let pulled = Rc::new(Cell::new(0));
    let counter = pulled.clone();
    let input: RecordIter = Box::new((0..10i64).map(move |i| {
        counter.set(counter.get() + 1);
        Ok(kv(i, "x"))
    }));
    let out: Vec<_> = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .max_input(Some(3))
        .run(input)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(out, vec![kv(0i64, "x"), kv(1i64, "x"), kv(2i64, "x")]);
    assert_eq!(pulled.get(), 3);
}

#[test]
fn abandoned_stage_kills_its_worker() {
    let input: RecordIter = Box::new((0..100_000i64).map(|i| Ok(kv(i, "payload"))));
    let mut out = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .flush_writes(true)
        .run(input)
        .unwrap();
    let pid = out.pid();
    assert_eq!(out.next().unwrap().unwrap(), kv(0i64, "payload"));
    drop(out);
    #[cfg(target_os = "linux")]
    assert!(process_gone(pid));
    let _ = pid;
}

#[test]
fn abandoned_stage_takes_background_children_with_it() {
    let input: RecordIter = Box::new((0..100_000i64).map(|i| Ok(kv(i, "payload"))));
    let mut out = StageTask::new(Role::Map, sh("sleep 20 & cat"))
        .flush_writes(true)
        .run(input)
        .unwrap();
    assert_eq!(out.next().unwrap().unwrap(), kv(0i64, "payload"));
    let started = Instant::now();
    drop(out);
    let took = started.elapsed();
    assert!(took < Duration::from_secs(10), "drop took {took:?}");
}

#[test]
fn stage_directory_is_removed_after_the_stage() {
    let mut out = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .run(records(vec![kv(0, 0), kv(1, 1)]))
        .unwrap();
    let dir = out.workdir().unwrap().to_path_buf();
    assert!(dir.is_dir());
    assert!(dir.file_name().unwrap().to_string_lossy().starts_with("tbpipe-"));
    let got: Vec<_> = out.by_ref().collect::<Result<_>>().unwrap();
    assert_eq!(got.len(), 2);
    assert!(out.workdir().is_none());
    assert!(!dir.exists());
}

#[test]
fn stage_directory_is_removed_when_abandoned() {
    let input: RecordIter = Box::new((0..100_000i64).map(|i| Ok(kv(i, "payload"))));
    let mut out = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .flush_writes(true)
        .run(input)
        .unwrap();
    let dir = out.workdir().unwrap().to_path_buf();
    assert!(out.next().unwrap().is_ok());
    assert!(dir.is_dir());
    drop(out);
    assert!(!dir.exists());
}

#[test]
fn stage_directory_can_be_kept() {
    let mut out = StageTask::new(Role::Map, worker("identity"))
        .env(typedbytes_env())
        .remove_tempdir(false)
        .run(records(vec![kv(0, 0)]))
        .unwrap();
    let dir = out.workdir().unwrap().to_path_buf();
    assert_eq!(out.by_ref().count(), 1);
    drop(out);
    assert!(dir.is_dir());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_aux_file_fails_before_the_info_query() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("queried");
    let script = format!(
        r#"touch {}; echo '{{"tasks": ["map"]}}'"#,
        marker.display()
    );
    let job = LocalJob::new(sh(&script)).files([dir.path().join("aux.txt")]);
    let err = run_pipeline(&job, records(vec![kv(0, 0)])).err().unwrap();
    match err {
        Error::Config(msg) => assert!(msg.contains("aux.txt"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!marker.exists());
}

#[test]
fn bad_info_fails_before_any_stage() {
    let job = LocalJob::new(sh("echo not json"));
    let err = run_pipeline(&job, records(vec![kv(0, 0)])).err().unwrap();
    match err {
        Error::InfoQuery { stdout, .. } => assert_eq!(stdout.trim(), "not json"),
        other => panic!("unexpected {other:?}"),
    }
}

// Answers `info` with a required file, otherwise echoes its input.
const NEEDS_LOOKUP: &str = r#"if [ "$1" = info ]; then echo '{"tasks": ["map"], "required_files": ["lookup.txt"]}'; else test -f lookup.txt && cat; fi"#;

#[test]
fn missing_required_file_is_a_config_error() {
    let job = LocalJob::new(sh(NEEDS_LOOKUP)).isolate_stdio(false);
    let err = run_pipeline(&job, records(vec![kv(0, 0)])).err().unwrap();
    assert!(matches!(err, Error::Config(_)), "{err:?}");

    let dir = tempfile::tempdir().unwrap();
    let lookup = dir.path().join("lookup.txt");
    std::fs::write(&lookup, "x").unwrap();
    let job = LocalJob::new(sh(NEEDS_LOOKUP)).isolate_stdio(false).files([lookup]);
    let out: Vec<_> = run_pipeline(&job, records(vec![kv(0, 0), kv(1, 1)]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(out, vec![kv(0, 0), kv(1, 1)]);
}

#[test]
fn grep_needs_its_cmdenv() {
    let job = LocalJob::new(worker("grep"));
    let err = run_pipeline(&job, records(vec![kv(0i64, "x")])).err().unwrap();
    assert!(matches!(err, Error::Config(_)), "{err:?}");

    let job = LocalJob::new(worker("grep"))
        .cmdenvs([("TBPIPE_GREP_TERM".to_string(), "cat".to_string())]);
    let input = records(vec![kv(0i64, "the cat"), kv(8i64, "the dog"), kv(16i64, "catalog")]);
    let out: Vec<_> = run_pipeline(&job, input)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(out, vec![kv(0i64, "the cat"), kv(16i64, "catalog")]);
}

#[test]
fn launch_reads_and_writes_storage() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalFs::new(dir.path());
    storage::write_records(&store, "in/part-0", vec![Ok(kv(0i64, "b a"))]).unwrap();
    storage::write_records(&store, "in/part-1", vec![Ok(kv(0i64, "a"))]).unwrap();

    let job = LocalJob::new(worker("wc"));
    let inputs = vec!["in/part-0".to_string(), "in/part-1".to_string()];
    let out = launch_local(&job, JobInput::Paths(inputs), Some("out/wc"), &store).unwrap();
    let returned: Vec<_> = out.collect::<Result<_>>().unwrap();
    assert_eq!(returned, vec![kv("a", 2i64), kv("b", 1i64)]);

    let stored = storage::read_records(&store, &["out/wc".to_string()]).unwrap();
    assert_eq!(stored, returned);
}
