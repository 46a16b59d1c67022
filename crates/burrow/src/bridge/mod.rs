//! Bundle commands as shell delegates.
//!
//! [`WasiBridge`] resolves a command name to a bundle module and runs it
//! through a [`WasiRunner`]. Workspaces with a host directory are mounted
//! directly when a mount runner is configured; everything else goes
//! through a full snapshot:
//!
//! 1. enumerate the workspace into a `path -> bytes` map
//! 2. run the guest against it
//! 3. delete files the guest removed and write back every file it left
//!
//! Write-back is not transactional. An engine error leaves the workspace
//! untouched; once a result exists, write-back runs to completion.

mod bundle;

pub use bundle::{BundleCommand, BundleRegistry, InMemoryModuleCache, InstalledBundle, ModuleCache};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::delegate::{CommandDelegate, CommandOutput, CommandRequest, DelegateError};
use crate::wasi::{FsMode, WasiExecInput, WasiExecResult, WasiRunner};
use crate::workspace::{Workspace, WorkspaceError, join_path};

/// Runs bundle commands against a workspace.
pub struct WasiBridge {
    workspace: Arc<dyn Workspace>,
    registry: BundleRegistry,
    cache: Arc<dyn ModuleCache>,
    engine: Arc<dyn WasiRunner>,
    mount_runner: Option<Arc<dyn WasiRunner>>,
}

impl std::fmt::Debug for WasiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiBridge")
            .field("registry", &self.registry)
            .field("mount", &self.mount_runner.is_some())
            .finish_non_exhaustive()
    }
}

impl WasiBridge {
    /// Bridge running snapshot executions on `engine`.
    pub fn new(
        workspace: Arc<dyn Workspace>,
        registry: BundleRegistry,
        cache: Arc<dyn ModuleCache>,
        engine: Arc<dyn WasiRunner>,
    ) -> Self {
        Self {
            workspace,
            registry,
            cache,
            engine,
            mount_runner: None,
        }
    }

    /// Use `runner` whenever the workspace has a host directory.
    pub fn with_mount_runner(mut self, runner: Arc<dyn WasiRunner>) -> Self {
        self.mount_runner = Some(runner);
        self
    }

    /// Installed bundles.
    pub fn registry(&self) -> &BundleRegistry {
        &self.registry
    }
}

#[async_trait]
impl CommandDelegate for WasiBridge {
    async fn has_command(&self, name: &str) -> bool {
        self.registry.resolve(name).is_some()
    }

    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, DelegateError> {
        let CommandRequest {
            argv,
            cwd,
            mut env,
            stdin,
            limits,
        } = request;
        let name = argv
            .first()
            .ok_or_else(|| DelegateError::Failed("empty command".to_string()))?;
        let (bundle, command) = self
            .registry
            .resolve(name)
            .ok_or_else(|| DelegateError::UnknownCommand(name.clone()))?;
        let key = bundle.module_key(command);
        tracing::debug!(
            command = %name,
            bundle = %bundle.name,
            version = %bundle.version,
            %key,
            "Resolved bundle command"
        );
        let module = self
            .cache
            .get(&key)
            .await
            .ok_or_else(|| DelegateError::ModuleNotFound(key.clone()))?;

        env.insert("PWD".to_string(), format!("/{cwd}"));
        let mut input = WasiExecInput {
            module,
            argv,
            env,
            cwd,
            stdin,
            fs: FsMode::Snapshot(BTreeMap::new()),
            limits,
        };

        if let (Some(dir), Some(runner)) = (self.workspace.host_dir(), &self.mount_runner) {
            tracing::debug!(dir = %dir.display(), "Running with host mount");
            input.fs = FsMode::Preopen(dir);
            return Ok(into_output(runner.exec(input).await?));
        }

        let before = snapshot(self.workspace.as_ref()).await?;
        let before_paths: BTreeSet<String> = before.keys().cloned().collect();
        tracing::debug!(files = before.len(), "Loaded workspace snapshot");
        input.fs = FsMode::Snapshot(before);

        let mut result = self.engine.exec(input).await?;
        if let Some(after) = result.fs.take() {
            let (written, deleted) =
                write_back(self.workspace.as_ref(), &before_paths, &after).await?;
            tracing::debug!(written, deleted, "Wrote back guest filesystem");
        }
        Ok(into_output(result))
    }
}

fn into_output(result: WasiExecResult) -> CommandOutput {
    CommandOutput {
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
    }
}

/// Every file in the workspace, keyed by path.
pub async fn snapshot(
    workspace: &dyn Workspace,
) -> Result<BTreeMap<String, Vec<u8>>, WorkspaceError> {
    let mut files = BTreeMap::new();
    let mut pending = vec![String::new()];
    while let Some(dir) = pending.pop() {
        for entry in workspace.list_dir(&dir).await? {
            let path = join_path(&dir, &entry.name);
            if entry.is_dir() {
                pending.push(path);
            } else {
                let data = workspace.read_file(&path).await?;
                files.insert(path, data);
            }
        }
    }
    Ok(files)
}

/// Apply a post-execution file set. Paths in `before` missing from `after`
/// are deleted; every path in `after` is written, changed or not.
///
/// Returns `(written, deleted)` counts.
pub async fn write_back(
    workspace: &dyn Workspace,
    before: &BTreeSet<String>,
    after: &BTreeMap<String, Vec<u8>>,
) -> Result<(usize, usize), WorkspaceError> {
    let mut deleted = 0;
    for path in before.iter().filter(|p| !after.contains_key(*p)) {
        workspace.delete_file(path).await?;
        deleted += 1;
    }
    for (path, data) in after {
        workspace.write_file(path, data).await?;
    }
    Ok((after.len(), deleted))
}
