//! Burrow: a restricted shell over a shadow workspace
//!
//! Burrow lets an agent run shell-like commands against an isolated
//! workspace instead of the real filesystem. Scripts are parsed and
//! interpreted in-process; commands the shell does not implement itself
//! are handed to a [`CommandDelegate`], usually a [`WasiBridge`] that runs
//! WASI preview1 guests from installed bundles.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use burrow::{InMemoryWorkspace, Shell};
//!
//! # async fn run() -> Result<(), burrow::ShellError> {
//! let workspace = Arc::new(InMemoryWorkspace::with_files([("src/a.txt", "hello\n")]));
//! let shell = Shell::builder().workspace(workspace).build();
//!
//! let result = shell.execute("cd src && cat a.txt | grep hello").await?;
//! assert_eq!(result.stdout, b"hello\n");
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod delegate;
mod limits;
pub mod shell;
pub mod tool;
pub mod wasi;
pub mod workspace;

pub use bridge::{BundleRegistry, InMemoryModuleCache, InstalledBundle, ModuleCache, WasiBridge};
pub use delegate::{CommandDelegate, CommandOutput, CommandRequest, DelegateError};
pub use limits::{LimitedBuffer, OutputLimits};
pub use shell::{ExecutionResult, Shell, ShellBuilder, ShellConfig, ShellError, ShellState};
pub use tool::{ShellTool, ShellToolInput, ShellToolOutput, ToolError};
pub use wasi::{
    EngineConfig, EngineError, FsMode, HostDirRunner, SnapshotEngine, WasiExecInput,
    WasiExecResult, WasiRunner,
};
pub use workspace::{InMemoryWorkspace, LocalWorkspace, Workspace, WorkspaceError};
