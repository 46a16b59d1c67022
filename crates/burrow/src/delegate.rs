//! Command delegation.
//!
//! A [`CommandDelegate`] runs commands the shell does not implement itself,
//! typically WASI guests through the [`crate::bridge::WasiBridge`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::limits::OutputLimits;
use crate::wasi::EngineError;
use crate::workspace::WorkspaceError;

/// Errors from a delegated command
#[derive(Debug, Error)]
pub enum DelegateError {
    /// No installed bundle provides the command
    #[error("{0}: unknown command")]
    UnknownCommand(String),
    /// The bundle declares the command but its module is not cached
    #[error("{0}: module not found")]
    ModuleNotFound(String),
    /// The engine rejected the module
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Snapshot load or write-back failed
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// Any other runner failure
    #[error("{0}")]
    Failed(String),
}

/// One command invocation handed to a delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name followed by its arguments
    pub argv: Vec<String>,
    /// Working directory relative to the workspace root
    pub cwd: String,
    /// Exported environment plus one-shot assignments
    pub env: BTreeMap<String, String>,
    /// Bytes available on stdin
    #[serde(default)]
    pub stdin: Vec<u8>,
    /// Output ceilings the runner should enforce
    #[serde(default)]
    pub limits: OutputLimits,
}

/// Result of a delegated command.
///
/// Deserializes from either `exit_code` or `exitCode`; `stdout` and
/// `stderr` may be strings or byte arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status
    #[serde(alias = "exitCode", default)]
    pub exit_code: i32,
    /// Captured stdout
    #[serde(default, with = "text_or_bytes")]
    pub stdout: Vec<u8>,
    /// Captured stderr
    #[serde(default, with = "text_or_bytes")]
    pub stderr: Vec<u8>,
}

mod text_or_bytes {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.into_bytes(),
            Repr::Bytes(bytes) => bytes,
        })
    }
}

/// Runs commands on behalf of the shell.
#[async_trait]
pub trait CommandDelegate: Send + Sync {
    /// Whether this delegate provides `name`.
    async fn has_command(&self, name: &str) -> bool;

    /// Run one command to completion.
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, DelegateError>;
}
