//! Restricted shell interpreter.
//!
//! The [`Shell`] parses a script, expands words against a [`ShellState`]
//! and runs each command as a builtin, through an injected
//! [`CommandDelegate`], or as one of the fallback utilities that work
//! directly against the [`Workspace`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use burrow::{InMemoryWorkspace, Shell};
//!
//! let ws = Arc::new(InMemoryWorkspace::with_files([("src/a.txt", b"hi\n".to_vec())]));
//! let shell = Shell::builder().workspace(ws).build();
//! let result = shell.execute("cd src && ls").await?;
//! assert_eq!(result.stdout, b"a.txt\n");
//! ```

pub mod ast;
mod builtins;
mod executor;
pub mod expand;
pub mod lexer;
pub mod parser;
pub mod resolver;
mod utils;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delegate::{CommandDelegate, DelegateError};
use crate::limits::OutputLimits;
use crate::wasi::EngineError;
use crate::workspace::{InMemoryWorkspace, Workspace, WorkspaceError};

pub use expand::ExpansionError;
pub use parser::{ParseError, parse};

/// Interpreter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Byte ceilings applied to the script's captured output
    pub limits: OutputLimits,
    /// Maximum `$(...)` nesting
    #[serde(alias = "maxSubstitutionDepth")]
    pub max_substitution_depth: usize,
    /// Reported by `whoami` when `USER` is unset
    pub user: String,
    /// Reported by `uname -n`
    pub hostname: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            limits: OutputLimits::default(),
            max_substitution_depth: 32,
            user: "agent".to_string(),
            hostname: "sandbox".to_string(),
        }
    }
}

/// Mutable interpreter state for one invocation.
///
/// Command substitution runs against a clone, so nothing it does leaks
/// back into the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellState {
    /// Exported variables, passed to delegated commands
    pub env: BTreeMap<String, String>,
    /// Shell-local variables
    pub vars: BTreeMap<String, String>,
    /// Working directory relative to the workspace root, `""` is the root
    pub cwd: String,
    /// `$1..$N`
    pub positional: Vec<String>,
    /// `$?`
    pub last_exit_code: i32,
    pub(crate) depth: usize,
}

impl ShellState {
    /// State starting in `cwd` with the given environment.
    pub fn new(cwd: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            env,
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    /// Shell variables shadow exported ones.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .or_else(|| self.env.get(name))
            .cloned()
    }
}

/// Interpreter errors.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The script is malformed
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A word could not be expanded
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
    /// A path resolves above the workspace root
    #[error("{0}: path escapes the workspace")]
    PathEscape(String),
    /// A redirection could not be applied
    #[error("{0}")]
    Redirection(String),
    /// Workspace I/O failed
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The command delegate failed
    #[error(transparent)]
    Delegate(DelegateError),
    /// The WASI engine rejected a module
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// No builtin, delegate or utility provides the name
    #[error("{0}: command not found")]
    CommandNotFound(String),
}

impl ShellError {
    /// Whether the error aborts the whole script instead of failing only
    /// the current pipeline stage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Parse(_) | ShellError::Engine(_))
    }
}

impl From<DelegateError> for ShellError {
    fn from(err: DelegateError) -> Self {
        match err {
            DelegateError::Engine(e) => ShellError::Engine(e),
            other => ShellError::Delegate(other),
        }
    }
}

/// Captured result of one command, pipeline or script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit status
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
}

impl CommandOutcome {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Bare exit status.
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Failure with a diagnostic line on stderr.
    pub fn fail(exit_code: i32, message: impl AsRef<str>) -> Self {
        let mut stderr = message.as_ref().as_bytes().to_vec();
        if !stderr.ends_with(b"\n") {
            stderr.push(b'\n');
        }
        Self {
            exit_code,
            stdout: Vec::new(),
            stderr,
        }
    }
}

/// Result of [`Shell::execute`], with output capped per [`ShellConfig::limits`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit status of the last pipeline that ran
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
    /// Stdout hit its ceiling
    pub stdout_truncated: bool,
    /// Stderr hit its ceiling
    pub stderr_truncated: bool,
}

impl ExecutionResult {
    /// Stdout as UTF-8 (lossy).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as UTF-8 (lossy).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Resolve a user path against `cwd`.
///
/// A leading `/` means the workspace root. `.` and `..` are folded
/// lexically; climbing above the root is an error.
pub fn resolve_path(cwd: &str, path: &str) -> Result<String, ShellError> {
    if path.contains('\0') {
        return Err(ShellError::PathEscape(path.replace('\0', "\\0")));
    }
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(ShellError::PathEscape(path.to_string()));
                }
            }
            name => parts.push(name),
        }
    }
    Ok(parts.join("/"))
}

/// Builder for [`Shell`].
#[derive(Default)]
pub struct ShellBuilder {
    workspace: Option<Arc<dyn Workspace>>,
    delegate: Option<Arc<dyn CommandDelegate>>,
    config: ShellConfig,
}

impl std::fmt::Debug for ShellBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellBuilder")
            .field("has_workspace", &self.workspace.is_some())
            .field("has_delegate", &self.delegate.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl ShellBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace the shell reads and writes. Defaults to an empty
    /// [`InMemoryWorkspace`].
    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Runner for commands that are not shell builtins.
    pub fn delegate(mut self, delegate: Arc<dyn CommandDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Interpreter settings.
    pub fn config(mut self, config: ShellConfig) -> Self {
        self.config = config;
        self
    }

    /// Output ceilings.
    pub fn limits(mut self, limits: OutputLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Build the shell.
    pub fn build(self) -> Shell {
        Shell {
            workspace: self
                .workspace
                .unwrap_or_else(|| Arc::new(InMemoryWorkspace::new())),
            delegate: self.delegate,
            config: self.config,
        }
    }
}

/// Shell interpreter bound to one workspace.
///
/// Cheap to share: each call to [`Shell::execute`] gets its own state.
#[derive(Clone)]
pub struct Shell {
    workspace: Arc<dyn Workspace>,
    delegate: Option<Arc<dyn CommandDelegate>>,
    config: ShellConfig,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("has_delegate", &self.delegate.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Shell {
    /// Create a builder.
    pub fn builder() -> ShellBuilder {
        ShellBuilder::new()
    }

    /// Workspace commands run against.
    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    /// Interpreter settings.
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub(crate) fn delegate(&self) -> Option<&dyn CommandDelegate> {
        self.delegate.as_deref()
    }

    /// Run a script from the workspace root with an empty environment.
    pub async fn execute(&self, script: &str) -> Result<ExecutionResult, ShellError> {
        let mut state = ShellState::default();
        self.execute_with_state(script, &mut state).await
    }

    /// Run a script against caller-provided state.
    ///
    /// The state is updated in place, so `cd` or `export` are visible to
    /// the caller afterwards.
    pub async fn execute_with_state(
        &self,
        script: &str,
        state: &mut ShellState,
    ) -> Result<ExecutionResult, ShellError> {
        let script = parse(script)?;
        tracing::debug!(sequences = script.sequences.len(), cwd = %state.cwd, "Executing script");
        let outcome = self.run_script(&script, state, Vec::new()).await?;

        let (mut stdout, mut stderr) = self.config.limits.buffers();
        stdout.write(&outcome.stdout);
        stderr.write(&outcome.stderr);
        Ok(ExecutionResult {
            exit_code: outcome.exit_code,
            stdout_truncated: stdout.was_truncated(),
            stderr_truncated: stderr.was_truncated(),
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
        })
    }
}
