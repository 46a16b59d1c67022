//! WASI preview1 execution.
//!
//! A [`WasiRunner`] runs one guest module to completion. Two runners ship
//! with the crate:
//!
//! - [`SnapshotEngine`] implements the preview1 imports itself against an
//!   in-memory file set and hands the whole post-execution set back
//! - [`HostDirRunner`] uses `wasmtime-wasi` with a real host directory
//!   preopened, for workspaces that have one
//!
//! Each request carries exactly one filesystem mode ([`FsMode`]). A runner
//! that cannot serve the mode returns [`EngineError::Unsupported`].

pub mod abi;
mod context;
mod engine;
pub mod fd;
mod host;

pub use engine::SnapshotEngine;
pub use host::HostDirRunner;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::OutputLimits;

/// Errors raised by the engine itself, as opposed to a guest's exit code.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Module bytes failed to compile or link
    #[error("invalid module: {0}")]
    InvalidModule(String),
    /// A required export is absent
    #[error("module does not export `{0}`")]
    MissingExport(&'static str),
    /// The runner cannot serve this filesystem mode
    #[error("unsupported execution: {0}")]
    Unsupported(String),
    /// A snapshot path or cwd failed normalization
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The preopened host directory is unusable
    #[error("host directory: {0}")]
    HostDir(String),
    /// The guest passed `oflags` bits preview1 does not define
    #[error("malformed open flags: {0:#x}")]
    InvalidOpenFlags(u32),
    /// Engine setup or instantiation failed
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Where the guest's filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsMode {
    /// In-memory `path -> bytes` set
    Snapshot(BTreeMap<String, Vec<u8>>),
    /// Real directory mounted as the sandbox root
    Preopen(PathBuf),
}

/// One guest execution request.
#[derive(Debug, Clone)]
pub struct WasiExecInput {
    /// Compiled or text module bytes
    pub module: Arc<[u8]>,
    /// Arguments, including the program name
    pub argv: Vec<String>,
    /// Environment, serialized as `KEY=VALUE`
    pub env: BTreeMap<String, String>,
    /// Sandbox-relative directory preopened as `.`
    pub cwd: String,
    /// Bytes readable from fd 0
    pub stdin: Vec<u8>,
    /// Filesystem mode
    pub fs: FsMode,
    /// Output ceilings
    pub limits: OutputLimits,
}

/// Outcome of a guest execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WasiExecResult {
    /// Exit code from `proc_exit`, 0 when `_start` returns
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
    /// Whether stdout hit its ceiling
    pub stdout_truncated: bool,
    /// Whether stderr hit its ceiling
    pub stderr_truncated: bool,
    /// Entire post-execution file set, snapshot mode only
    pub fs: Option<BTreeMap<String, Vec<u8>>>,
}

/// Runs guest modules.
#[async_trait]
pub trait WasiRunner: Send + Sync {
    /// Run `input.module` until `_start` returns or the guest exits.
    async fn exec(&self, input: WasiExecInput) -> Result<WasiExecResult, EngineError>;
}

/// Store-level configuration shared by both runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on guest linear memory
    #[serde(alias = "maxMemoryBytes")]
    pub max_memory_bytes: u64,
    /// Largest file a snapshot guest may grow; writes past it fail with `EFBIG`
    #[serde(alias = "maxFileBytes")]
    pub max_file_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024, // 64 MB
            max_file_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Exit code reported when a guest traps.
pub const TRAP_EXIT_CODE: i32 = 134;

/// Memory limiter installed in every store.
#[derive(Debug)]
pub(crate) struct StoreLimiter {
    max_memory: u64,
}

impl StoreLimiter {
    pub(crate) fn new(max_memory: u64) -> Self {
        Self { max_memory }
    }
}

impl wasmtime::ResourceLimiter for StoreLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired as u64 <= self.max_memory || current == desired)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}

/// Engine configured the way both runners need it.
pub(crate) fn create_engine() -> Result<wasmtime::Engine, EngineError> {
    let mut config = wasmtime::Config::new();
    config.async_support(true);
    wasmtime::Engine::new(&config).map_err(|e| EngineError::Runtime(e.to_string()))
}

/// Compile `bytes` and check for the exports every guest needs.
pub(crate) fn compile(
    engine: &wasmtime::Engine,
    bytes: &[u8],
) -> Result<wasmtime::Module, EngineError> {
    let module =
        wasmtime::Module::new(engine, bytes).map_err(|e| EngineError::InvalidModule(e.to_string()))?;
    for name in ["memory", "_start"] {
        if module.get_export(name).is_none() {
            return Err(EngineError::MissingExport(name));
        }
    }
    Ok(module)
}
