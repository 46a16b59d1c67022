//! Snapshot engine driven by real guest modules.

mod common;

use burrow::wasi::abi::filetype;
use burrow::{EngineConfig, EngineError, OutputLimits, SnapshotEngine, WasiRunner};
use common::*;

fn engine() -> SnapshotEngine {
    SnapshotEngine::new().expect("engine")
}

#[tokio::test]
async fn test_create_truncate_write_yields_exact_bytes() {
    let result = engine()
        .exec(snapshot_input(WRITE_HELLO, &[("a.txt", "previous contents")]))
        .await
        .expect("exec");
    assert_eq!(result.exit_code, 0);
    let fs = result.fs.expect("snapshot result");
    assert_eq!(fs["a.txt"], b"hello");
}

#[tokio::test]
async fn test_result_is_the_whole_file_set() {
    let result = engine()
        .exec(snapshot_input(WRITE_HELLO, &[("keep/me.txt", "x")]))
        .await
        .expect("exec");
    let fs = result.fs.expect("snapshot result");
    assert_eq!(fs.len(), 2);
    assert_eq!(fs["keep/me.txt"], b"x");
}

#[tokio::test]
async fn test_guest_cwd_is_the_preopen() {
    let mut input = snapshot_input(WRITE_HELLO, &[("src/lib.rs", "")]);
    input.cwd = "src".to_string();
    let fs = engine().exec(input).await.expect("exec").fs.expect("fs");
    assert_eq!(fs["src/a.txt"], b"hello");
    assert!(!fs.contains_key("a.txt"));
}

#[tokio::test]
async fn test_escaping_path_is_einval() {
    let result = engine().exec(snapshot_input(ESCAPE, &[])).await.expect("exec");
    assert_eq!(result.exit_code, 28);
    assert!(result.fs.expect("fs").is_empty());
}

#[tokio::test]
async fn test_proc_exit_and_stdio() {
    let result = engine()
        .exec(snapshot_input(GREET_AND_EXIT, &[]))
        .await
        .expect("exec");
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.stdout, b"hello world\n");
    assert_eq!(result.stderr, b"oops\n");
    assert!(!result.stdout_truncated);
}

#[tokio::test]
async fn test_streams_truncate_independently() {
    let mut input = snapshot_input(GREET_AND_EXIT, &[]);
    input.limits = OutputLimits {
        max_stdout_bytes: 5,
        max_stderr_bytes: 64,
    };
    let result = engine().exec(input).await.expect("exec");
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.stdout, b"hello");
    assert!(result.stdout_truncated);
    assert_eq!(result.stderr, b"oops\n");
    assert!(!result.stderr_truncated);
}

#[tokio::test]
async fn test_args_and_environment_reach_the_guest() {
    let mut input = snapshot_input(COUNT_ARGS, &[]);
    input.argv = vec!["count".into(), "a".into(), "b".into()];
    input.env.insert("A".into(), "1".into());
    input.env.insert("B".into(), "2".into());
    let result = engine().exec(input).await.expect("exec");
    assert_eq!(result.exit_code, 32);
}

#[tokio::test]
async fn test_stdin_is_readable() {
    let mut input = snapshot_input(CAT_STDIN, &[]);
    input.stdin = b"piped\n".to_vec();
    let result = engine().exec(input).await.expect("exec");
    assert_eq!(result.stdout, b"piped\n");
}

#[tokio::test]
async fn test_readdir_lists_every_entry() {
    let result = engine()
        .exec(snapshot_input(READDIR, &[("b.txt", ""), ("a.txt", ""), ("sub/c.txt", "")]))
        .await
        .expect("exec");
    assert_eq!(
        parse_dirents(&result.stdout),
        [
            ("a.txt".to_string(), filetype::REGULAR_FILE),
            ("b.txt".to_string(), filetype::REGULAR_FILE),
            ("sub".to_string(), filetype::DIRECTORY),
        ]
    );
}

#[tokio::test]
async fn test_unlink_removes_from_result() {
    let result = engine()
        .exec(snapshot_input(UNLINK, &[("gone.txt", "x"), ("stay.txt", "y")]))
        .await
        .expect("exec");
    assert_eq!(result.exit_code, 0);
    let fs = result.fs.expect("fs");
    assert_eq!(fs.keys().collect::<Vec<_>>(), ["stay.txt"]);
}

#[tokio::test]
async fn test_far_seek_write_is_efbig() {
    let result = engine()
        .exec(snapshot_input(SEEK_FAR_AND_WRITE, &[]))
        .await
        .expect("exec");
    assert_eq!(result.exit_code, 22);
    let fs = result.fs.expect("fs");
    assert_eq!(fs["big.bin"], b"");
}

#[tokio::test]
async fn test_file_ceiling_follows_engine_config() {
    let engine = SnapshotEngine::with_config(EngineConfig {
        max_file_bytes: 4,
        ..EngineConfig::default()
    })
    .expect("engine");
    let result = engine
        .exec(snapshot_input(WRITE_HELLO, &[("a.txt", "old")]))
        .await
        .expect("exec");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.fs.expect("fs")["a.txt"], b"");
}

#[tokio::test]
async fn test_random_get_fills_fresh_bytes() {
    let first = engine().exec(snapshot_input(RANDOM, &[])).await.expect("exec");
    let second = engine().exec(snapshot_input(RANDOM, &[])).await.expect("exec");
    assert_eq!(first.exit_code, 0);
    assert_eq!(first.stdout.len(), 32);
    assert_ne!(first.stdout, [0; 32]);
    assert_ne!(first.stdout, second.stdout);
}

#[tokio::test]
async fn test_undefined_open_flags_are_engine_errors() {
    let err = engine()
        .exec(snapshot_input(BAD_OFLAGS, &[("a.txt", "x")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOpenFlags(0x40)));
}

#[tokio::test]
async fn test_missing_exports_are_engine_errors() {
    let no_start = r#"(module (memory (export "memory") 1))"#;
    let err = engine()
        .exec(snapshot_input(no_start, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingExport("_start")));

    let no_memory = r#"(module (func (export "_start")))"#;
    let err = engine()
        .exec(snapshot_input(no_memory, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingExport("memory")));

    let err = engine()
        .exec(snapshot_input("garbage", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidModule(_)));
}
