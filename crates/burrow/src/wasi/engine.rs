//! In-process snapshot engine.
//!
//! The preview1 imports are linked once at construction; every execution
//! gets a fresh `Store` holding its own [`GuestContext`]. Imports the
//! engine does not implement are linked as traps, so a module only fails
//! if it actually calls one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use wasmtime::{AsContextMut, Caller, Engine, Extern, Linker, Store, Trap};

use super::abi::{Errno, GuestMemory, MODULE, errno, oflags};
use super::context::GuestContext;
use super::{
    EngineConfig, EngineError, FsMode, StoreLimiter, TRAP_EXIT_CODE, WasiExecInput,
    WasiExecResult, WasiRunner, compile, create_engine,
};
use crate::workspace::normalize_path;

/// State held by the store during one execution.
#[derive(Debug)]
struct StoreState {
    ctx: GuestContext,
    limiter: StoreLimiter,
}

/// Raised by `proc_exit` to unwind out of the guest.
#[derive(Debug, Error)]
#[error("guest exited with code {0}")]
struct ProcExit(i32);

/// Raised by `path_open` when `oflags` carries bits preview1 does not define.
#[derive(Debug, Error)]
#[error("malformed open flags: {0:#x}")]
struct MalformedOpenFlags(u32);

/// Runs guests against an in-memory snapshot.
///
/// Cheap to clone; clones share the engine and linker.
#[derive(Clone)]
pub struct SnapshotEngine {
    engine: Engine,
    linker: Arc<Linker<StoreState>>,
    config: EngineConfig,
}

impl std::fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SnapshotEngine {
    /// Engine with default limits.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with explicit limits.
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let engine = create_engine()?;
        let mut linker = Linker::new(&engine);
        link_preview1(&mut linker).map_err(|e| EngineError::Runtime(e.to_string()))?;
        Ok(Self {
            engine,
            linker: Arc::new(linker),
            config,
        })
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[async_trait]
impl WasiRunner for SnapshotEngine {
    async fn exec(&self, input: WasiExecInput) -> Result<WasiExecResult, EngineError> {
        let WasiExecInput {
            module,
            argv,
            env,
            cwd,
            stdin,
            fs,
            limits,
        } = input;
        let FsMode::Snapshot(files) = fs else {
            return Err(EngineError::Unsupported(
                "host directory mounts need a host runner".to_string(),
            ));
        };
        let cwd = normalize_path(&cwd).map_err(|_| EngineError::InvalidPath(cwd.clone()))?;
        let files = files
            .into_iter()
            .map(|(path, data)| match normalize_path(&path) {
                Ok(normalized) if !normalized.is_empty() => Ok((normalized, data)),
                _ => Err(EngineError::InvalidPath(path)),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let module = compile(&self.engine, &module)?;
        let mut linker = (*self.linker).clone();
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| EngineError::InvalidModule(e.to_string()))?;

        tracing::debug!(
            program = argv.first().map(String::as_str).unwrap_or_default(),
            cwd = %cwd,
            files = files.len(),
            "Instantiating guest module"
        );
        let state = StoreState {
            ctx: GuestContext::new(
                argv,
                &env,
                &cwd,
                stdin,
                files,
                &limits,
                self.config.max_file_bytes,
            ),
            limiter: StoreLimiter::new(self.config.max_memory_bytes),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limiter);

        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| EngineError::InvalidModule(e.to_string()))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|_| EngineError::MissingExport("_start"))?;

        let exit_code = match start.call_async(&mut store, ()).await {
            Ok(()) => 0,
            Err(e) => match e.downcast_ref::<ProcExit>() {
                Some(ProcExit(code)) => *code,
                None => {
                    if let Some(MalformedOpenFlags(bits)) = e.downcast_ref::<MalformedOpenFlags>() {
                        return Err(EngineError::InvalidOpenFlags(*bits));
                    }
                    let message = match e.downcast_ref::<Trap>() {
                        Some(trap) => trap.to_string(),
                        None => e.to_string(),
                    };
                    tracing::debug!(%message, "Guest trapped");
                    store
                        .data_mut()
                        .ctx
                        .write_stderr(format!("{message}\n").as_bytes());
                    TRAP_EXIT_CODE
                }
            },
        };

        let output = store.into_data().ctx.finish();
        tracing::debug!(exit_code, files = output.files.len(), "Guest finished");
        Ok(WasiExecResult {
            exit_code,
            stdout_truncated: output.stdout.was_truncated(),
            stderr_truncated: output.stderr.was_truncated(),
            stdout: output.stdout.into_bytes(),
            stderr: output.stderr.into_bytes(),
            fs: Some(output.files),
        })
    }
}

/// Run `f` with the guest's memory and context. A guest without an
/// exported memory gets `EFAULT`.
fn with_memory<F>(caller: &mut Caller<'_, StoreState>, f: F) -> i32
where
    F: FnOnce(&mut GuestContext, &mut GuestMemory<'_>) -> Result<(), Errno>,
{
    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        return Errno::Fault.raw();
    };
    let (bytes, state) = memory.data_and_store_mut(caller.as_context_mut());
    let mut mem = GuestMemory::new(bytes);
    errno(f(&mut state.ctx, &mut mem))
}

type Ctx<'a> = Caller<'a, StoreState>;

fn link_preview1(linker: &mut Linker<StoreState>) -> wasmtime::Result<()> {
    linker.func_wrap(MODULE, "args_sizes_get", |mut c: Ctx<'_>, count: u32, size: u32| {
        with_memory(&mut c, |ctx, mem| ctx.args_sizes_get(mem, count, size))
    })?;
    linker.func_wrap(MODULE, "args_get", |mut c: Ctx<'_>, ptrs: u32, buf: u32| {
        with_memory(&mut c, |ctx, mem| ctx.args_get(mem, ptrs, buf))
    })?;
    linker.func_wrap(MODULE, "environ_sizes_get", |mut c: Ctx<'_>, count: u32, size: u32| {
        with_memory(&mut c, |ctx, mem| ctx.environ_sizes_get(mem, count, size))
    })?;
    linker.func_wrap(MODULE, "environ_get", |mut c: Ctx<'_>, ptrs: u32, buf: u32| {
        with_memory(&mut c, |ctx, mem| ctx.environ_get(mem, ptrs, buf))
    })?;
    linker.func_wrap(MODULE, "proc_exit", |code: i32| -> wasmtime::Result<()> {
        Err(wasmtime::Error::new(ProcExit(code)))
    })?;
    linker.func_wrap(MODULE, "sched_yield", || -> i32 { 0 })?;
    linker.func_wrap(
        MODULE,
        "clock_time_get",
        |mut c: Ctx<'_>, id: u32, _precision: u64, ptr: u32| {
            with_memory(&mut c, |ctx, mem| ctx.clock_time_get(mem, id, ptr))
        },
    )?;
    linker.func_wrap(MODULE, "random_get", |mut c: Ctx<'_>, buf: u32, len: u32| {
        with_memory(&mut c, |ctx, mem| ctx.random_get(mem, buf, len))
    })?;

    linker.func_wrap(
        MODULE,
        "fd_write",
        |mut c: Ctx<'_>, fd: u32, iovs: u32, len: u32, nwritten: u32| {
            with_memory(&mut c, |ctx, mem| ctx.fd_write(mem, fd, iovs, len, nwritten))
        },
    )?;
    linker.func_wrap(
        MODULE,
        "fd_read",
        |mut c: Ctx<'_>, fd: u32, iovs: u32, len: u32, nread: u32| {
            with_memory(&mut c, |ctx, mem| ctx.fd_read(mem, fd, iovs, len, nread))
        },
    )?;
    linker.func_wrap(
        MODULE,
        "fd_seek",
        |mut c: Ctx<'_>, fd: u32, delta: i64, whence: u32, ptr: u32| {
            with_memory(&mut c, |ctx, mem| ctx.fd_seek(mem, fd, delta, whence, ptr))
        },
    )?;
    linker.func_wrap(MODULE, "fd_tell", |mut c: Ctx<'_>, fd: u32, ptr: u32| {
        with_memory(&mut c, |ctx, mem| ctx.fd_tell(mem, fd, ptr))
    })?;
    linker.func_wrap(MODULE, "fd_close", |mut c: Ctx<'_>, fd: u32| {
        errno(c.data_mut().ctx.fd_close(fd))
    })?;
    linker.func_wrap(MODULE, "fd_prestat_get", |mut c: Ctx<'_>, fd: u32, ptr: u32| {
        with_memory(&mut c, |ctx, mem| ctx.fd_prestat_get(mem, fd, ptr))
    })?;
    linker.func_wrap(
        MODULE,
        "fd_prestat_dir_name",
        |mut c: Ctx<'_>, fd: u32, ptr: u32, len: u32| {
            with_memory(&mut c, |ctx, mem| ctx.fd_prestat_dir_name(mem, fd, ptr, len))
        },
    )?;
    linker.func_wrap(MODULE, "fd_fdstat_get", |mut c: Ctx<'_>, fd: u32, ptr: u32| {
        with_memory(&mut c, |ctx, mem| ctx.fd_fdstat_get(mem, fd, ptr))
    })?;
    linker.func_wrap(MODULE, "fd_filestat_get", |mut c: Ctx<'_>, fd: u32, ptr: u32| {
        with_memory(&mut c, |ctx, mem| ctx.fd_filestat_get(mem, fd, ptr))
    })?;
    linker.func_wrap(
        MODULE,
        "fd_readdir",
        |mut c: Ctx<'_>, fd: u32, buf: u32, len: u32, cookie: u64, used: u32| {
            with_memory(&mut c, |ctx, mem| ctx.fd_readdir(mem, fd, buf, len, cookie, used))
        },
    )?;

    linker.func_wrap(
        MODULE,
        "path_open",
        |mut c: Ctx<'_>,
         dirfd: u32,
         _dirflags: u32,
         path: u32,
         path_len: u32,
         open_flags: u32,
         _rights_base: u64,
         _rights_inheriting: u64,
         fdflags: u32,
         fd_ptr: u32|
         -> wasmtime::Result<i32> {
            if !u16::try_from(open_flags).is_ok_and(|bits| bits & !oflags::ALL == 0) {
                return Err(wasmtime::Error::new(MalformedOpenFlags(open_flags)));
            }
            Ok(with_memory(&mut c, |ctx, mem| {
                ctx.path_open(mem, dirfd, path, path_len, open_flags, fdflags, fd_ptr)
            }))
        },
    )?;
    linker.func_wrap(
        MODULE,
        "path_filestat_get",
        |mut c: Ctx<'_>, dirfd: u32, _flags: u32, path: u32, path_len: u32, buf: u32| {
            with_memory(&mut c, |ctx, mem| {
                ctx.path_filestat_get(mem, dirfd, path, path_len, buf)
            })
        },
    )?;
    linker.func_wrap(
        MODULE,
        "path_unlink_file",
        |mut c: Ctx<'_>, dirfd: u32, path: u32, path_len: u32| {
            with_memory(&mut c, |ctx, mem| ctx.path_unlink_file(mem, dirfd, path, path_len))
        },
    )?;
    linker.func_wrap(
        MODULE,
        "path_create_directory",
        |mut c: Ctx<'_>, dirfd: u32, path: u32, path_len: u32| {
            with_memory(&mut c, |ctx, mem| {
                ctx.path_create_directory(mem, dirfd, path, path_len)
            })
        },
    )?;
    Ok(())
}
