//! Host-mount runner on `wasmtime-wasi` preview1.
//!
//! The workspace's host directory (joined with the cwd) is preopened as
//! `.`, so file changes land directly on disk and no snapshot is returned.

use std::sync::Arc;

use async_trait::async_trait;
use wasmtime::{Engine, Linker, Store};
use wasmtime_wasi::p1::WasiP1Ctx;
use wasmtime_wasi::p2::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use super::{
    EngineConfig, EngineError, FsMode, StoreLimiter, TRAP_EXIT_CODE, WasiExecInput,
    WasiExecResult, WasiRunner, compile, create_engine,
};
use crate::workspace::normalize_path;

/// State held by the store during one execution.
struct HostState {
    wasi: WasiP1Ctx,
    limiter: StoreLimiter,
}

/// Runs guests with a real directory mounted.
#[derive(Clone)]
pub struct HostDirRunner {
    engine: Engine,
    linker: Arc<Linker<HostState>>,
    config: EngineConfig,
}

impl std::fmt::Debug for HostDirRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDirRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HostDirRunner {
    /// Runner with default limits.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    /// Runner with explicit limits.
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let engine = create_engine()?;
        let mut linker = Linker::new(&engine);
        wasmtime_wasi::p1::add_to_linker_async(&mut linker, |s: &mut HostState| &mut s.wasi)
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        Ok(Self {
            engine,
            linker: Arc::new(linker),
            config,
        })
    }
}

#[async_trait]
impl WasiRunner for HostDirRunner {
    async fn exec(&self, input: WasiExecInput) -> Result<WasiExecResult, EngineError> {
        let FsMode::Preopen(root) = &input.fs else {
            return Err(EngineError::Unsupported(
                "snapshot filesystems need the snapshot engine".to_string(),
            ));
        };
        let cwd =
            normalize_path(&input.cwd).map_err(|_| EngineError::InvalidPath(input.cwd.clone()))?;
        let dir = root.join(&cwd);
        if !dir.is_dir() {
            return Err(EngineError::HostDir(format!(
                "{}: not a directory",
                dir.display()
            )));
        }

        let stdout_pipe = MemoryOutputPipe::new(input.limits.max_stdout_bytes);
        let stderr_pipe = MemoryOutputPipe::new(input.limits.max_stderr_bytes);
        let wasi = {
            let env: Vec<(&String, &String)> = input.env.iter().collect();
            let mut builder = WasiCtxBuilder::new();
            builder
                .args(input.argv.as_slice())
                .envs(env.as_slice())
                .stdin(MemoryInputPipe::new(input.stdin.clone()))
                .stdout(stdout_pipe.clone())
                .stderr(stderr_pipe.clone());
            builder
                .preopened_dir(&dir, ".", DirPerms::all(), FilePerms::all())
                .map_err(|e| EngineError::HostDir(format!("{}: {e}", dir.display())))?;
            builder.build_p1()
        };

        let module = compile(&self.engine, &input.module)?;
        tracing::debug!(dir = %dir.display(), "Instantiating guest module with host mount");
        let state = HostState {
            wasi,
            limiter: StoreLimiter::new(self.config.max_memory_bytes),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limiter);

        let instance = self
            .linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| EngineError::InvalidModule(e.to_string()))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|_| EngineError::MissingExport("_start"))?;

        let mut trap = None;
        let exit_code = match start.call_async(&mut store, ()).await {
            Ok(()) => 0,
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(exit) => exit.0,
                None => {
                    trap = Some(format!("{e}\n"));
                    TRAP_EXIT_CODE
                }
            },
        };
        drop(store);

        let stdout = stdout_pipe.contents().to_vec();
        let mut stderr = stderr_pipe.contents().to_vec();
        // The pipes refuse writes past capacity, so a full pipe is the
        // only sign that output was cut.
        let stdout_truncated = is_full(stdout.len(), input.limits.max_stdout_bytes);
        let mut stderr_truncated = is_full(stderr.len(), input.limits.max_stderr_bytes);
        if let Some(message) = trap {
            tracing::debug!(message = message.trim_end(), "Guest trapped");
            let room = input.limits.max_stderr_bytes.saturating_sub(stderr.len());
            stderr_truncated |= message.len() > room;
            stderr.extend_from_slice(&message.as_bytes()[..message.len().min(room)]);
        }

        Ok(WasiExecResult {
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            fs: None,
        })
    }
}

fn is_full(len: usize, capacity: usize) -> bool {
    capacity > 0 && len >= capacity
}
