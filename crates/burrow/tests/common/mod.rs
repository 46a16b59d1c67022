//! WAT guests shared by the engine and bridge tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use burrow::{FsMode, OutputLimits, WasiExecInput};

/// Opens `a.txt` with CREAT|TRUNC, writes `hello`, closes it.
pub const WRITE_HELLO: &str = r#"(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_close" (func $fd_close (param i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "a.txt")
  (data (i32.const 32) "hello")
  (func (export "_start")
    (local $err i32)
    (local.set $err
      (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 5)
        (i32.const 9) (i64.const 1073741823) (i64.const 1073741823)
        (i32.const 0) (i32.const 80)))
    (if (local.get $err) (then (call $proc_exit (local.get $err))))
    (i32.store (i32.const 64) (i32.const 32))
    (i32.store (i32.const 68) (i32.const 5))
    (drop (call $fd_write (i32.load (i32.const 80)) (i32.const 64) (i32.const 1) (i32.const 84)))
    (drop (call $fd_close (i32.load (i32.const 80))))))"#;

/// Tries to create `../escape` and exits with the errno it got.
pub const ESCAPE: &str = r#"(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "../escape")
  (func (export "_start")
    (call $proc_exit
      (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 9)
        (i32.const 1) (i64.const 0) (i64.const 0) (i32.const 0) (i32.const 80)))))"#;

/// Writes `hello world\n` to stdout and `oops\n` to stderr, then exits 7.
pub const GREET_AND_EXIT: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 32) "hello world\n")
  (data (i32.const 48) "oops\n")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 32))
    (i32.store (i32.const 4) (i32.const 12))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
    (i32.store (i32.const 0) (i32.const 48))
    (i32.store (i32.const 4) (i32.const 5))
    (drop (call $fd_write (i32.const 2) (i32.const 0) (i32.const 1) (i32.const 8)))
    (call $proc_exit (i32.const 7))))"#;

/// Exits with `argc * 10 + envc`.
pub const COUNT_ARGS: &str = r#"(module
  (import "wasi_snapshot_preview1" "args_sizes_get"
    (func $args_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_sizes_get"
    (func $environ_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
    (drop (call $environ_sizes_get (i32.const 8) (i32.const 12)))
    (call $proc_exit
      (i32.add
        (i32.mul (i32.load (i32.const 0)) (i32.const 10))
        (i32.load (i32.const 8))))))"#;

/// Copies one read of stdin to stdout.
pub const CAT_STDIN: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_read"
    (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 1024))
    (i32.store (i32.const 4) (i32.const 1024))
    (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
    (i32.store (i32.const 4) (i32.load (i32.const 8)))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

/// Writes the raw `fd_readdir` buffer for the preopen to stdout.
pub const READDIR: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_readdir"
    (func $fd_readdir (param i32 i32 i32 i64 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (drop (call $fd_readdir (i32.const 3) (i32.const 1024) (i32.const 1024) (i64.const 0) (i32.const 8)))
    (i32.store (i32.const 0) (i32.const 1024))
    (i32.store (i32.const 4) (i32.load (i32.const 8)))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

/// Deletes `gone.txt`.
pub const UNLINK: &str = r#"(module
  (import "wasi_snapshot_preview1" "path_unlink_file"
    (func $unlink (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "gone.txt")
  (func (export "_start")
    (call $proc_exit (call $unlink (i32.const 3) (i32.const 16) (i32.const 8)))))"#;

/// Creates `big.bin`, seeks 1 TiB in and exits with `fd_write`'s errno.
pub const SEEK_FAR_AND_WRITE: &str = r#"(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_seek"
    (func $fd_seek (param i32 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "big.bin")
  (data (i32.const 32) "x")
  (func (export "_start")
    (local $fd i32)
    (drop (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 7)
      (i32.const 1) (i64.const 0) (i64.const 0) (i32.const 0) (i32.const 80)))
    (local.set $fd (i32.load (i32.const 80)))
    (drop (call $fd_seek (local.get $fd) (i64.const 1099511627776) (i32.const 0) (i32.const 88)))
    (i32.store (i32.const 64) (i32.const 32))
    (i32.store (i32.const 68) (i32.const 1))
    (call $proc_exit
      (call $fd_write (local.get $fd) (i32.const 64) (i32.const 1) (i32.const 84)))))"#;

/// Writes 32 bytes from `random_get` to stdout.
pub const RANDOM: &str = r#"(module
  (import "wasi_snapshot_preview1" "random_get"
    (func $random_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (local $err i32)
    (local.set $err (call $random_get (i32.const 1024) (i32.const 32)))
    (if (local.get $err) (then (call $proc_exit (local.get $err))))
    (i32.store (i32.const 0) (i32.const 1024))
    (i32.store (i32.const 4) (i32.const 32))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

/// Opens `a.txt` with an oflags bit preview1 does not define.
pub const BAD_OFLAGS: &str = r#"(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "a.txt")
  (func (export "_start")
    (drop (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 5)
      (i32.const 64) (i64.const 0) (i64.const 0) (i32.const 0) (i32.const 80)))))"#;

/// Snapshot-mode request for `wat`.
pub fn snapshot_input(wat: &str, files: &[(&str, &str)]) -> WasiExecInput {
    WasiExecInput {
        module: Arc::from(wat.as_bytes()),
        argv: vec!["guest".to_string()],
        env: BTreeMap::new(),
        cwd: String::new(),
        stdin: Vec::new(),
        fs: FsMode::Snapshot(
            files
                .iter()
                .map(|(p, d)| (p.to_string(), d.as_bytes().to_vec()))
                .collect(),
        ),
        limits: OutputLimits::default(),
    }
}

/// `(name, filetype)` pairs decoded from a `fd_readdir` buffer.
pub fn parse_dirents(mut buf: &[u8]) -> Vec<(String, u8)> {
    let mut entries = Vec::new();
    while buf.len() >= 24 {
        let len = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]) as usize;
        let kind = buf[20];
        let Some(name) = buf.get(24..24 + len) else {
            break;
        };
        entries.push((String::from_utf8_lossy(name).into_owned(), kind));
        buf = &buf[24 + len..];
    }
    entries
}
