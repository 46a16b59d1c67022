//! Tool-call boundary for agent runtimes.
//!
//! A [`ShellTool`] takes `{command | script, cwd?, env?}` and answers with
//! `{exit_code, stdout, stderr, stdout_truncated, stderr_truncated, output}`.
//! Parse and engine faults fail the call; every other failure is folded
//! into the exit code and stderr.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shell::{Shell, ShellError, ShellState, resolve_path};
use crate::workspace::WorkspaceError;

/// Errors that fail a tool call outright.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the input schema
    #[error("invalid tool input: {0}")]
    InvalidInput(#[from] serde_json::Error),
    /// The script could not run
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Arguments of a shell tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellToolInput {
    /// Script to run
    #[serde(alias = "script")]
    pub command: String,
    /// Starting directory, `/` or relative to the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Exported environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

/// Result of a shell tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellToolOutput {
    /// Exit status of the last pipeline
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Stdout hit its ceiling
    pub stdout_truncated: bool,
    /// Stderr hit its ceiling
    pub stderr_truncated: bool,
    /// Stdout followed by stderr
    pub output: String,
}

/// The shell exposed as an agent tool.
#[derive(Debug, Clone)]
pub struct ShellTool {
    shell: Shell,
}

impl ShellTool {
    /// Tool name advertised to the model.
    pub const NAME: &'static str = "shell";

    /// Wrap a configured shell.
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// The wrapped shell.
    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Tool definition with its JSON Schema.
    pub fn definition() -> serde_json::Value {
        serde_json::json!({
            "name": Self::NAME,
            "description": "Run a shell script in the sandboxed workspace",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Script to execute"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory, relative to the workspace root"
                    },
                    "env": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Environment variables to export"
                    }
                },
                "required": ["command"]
            }
        })
    }

    /// Run one call. State starts fresh every time.
    pub async fn call(&self, input: ShellToolInput) -> Result<ShellToolOutput, ShellError> {
        let cwd = resolve_path("", input.cwd.as_deref().unwrap_or(""))?;
        match self.shell.workspace().stat(&cwd).await? {
            Some(stat) if stat.is_dir() => {}
            Some(_) => return Err(WorkspaceError::NotADirectory(cwd).into()),
            None => return Err(WorkspaceError::NotFound(cwd).into()),
        }
        tracing::debug!(cwd = %cwd, "Shell tool call");
        let mut state = ShellState::new(cwd, input.env.unwrap_or_default());
        let result = self
            .shell
            .execute_with_state(&input.command, &mut state)
            .await?;

        let stdout = result.stdout_str();
        let stderr = result.stderr_str();
        Ok(ShellToolOutput {
            exit_code: result.exit_code,
            output: format!("{stdout}{stderr}"),
            stdout,
            stderr,
            stdout_truncated: result.stdout_truncated,
            stderr_truncated: result.stderr_truncated,
        })
    }

    /// Run one call from JSON arguments.
    pub async fn call_json(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let input: ShellToolInput = serde_json::from_value(args)?;
        let output = self.call(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}
