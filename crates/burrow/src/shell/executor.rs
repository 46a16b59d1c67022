//! Script evaluation.
//!
//! Sequences run left to right with `&&`/`||` guards. Pipeline stages run
//! one after another, each stage's stdout fully buffered into the next
//! stage's stdin. A stage that fails with a non-fatal [`ShellError`] becomes
//! an exit-127 result and ends its pipeline; the next sequence still runs.

use std::collections::BTreeMap;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::ast::{Command, Pipeline, Redir, RedirKind, Script, Sequence};
use super::expand::{ExpansionError, Expander, split_assignment};
use super::parser::parse;
use super::resolver::{CommandResolver, Resolved};
use super::utils::UtilContext;
use super::{CommandOutcome, Shell, ShellError, ShellState, resolve_path};
use crate::delegate::CommandRequest;
use crate::workspace::WorkspaceError;

/// Where a stream ends up once redirections are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Sink {
    Stdout,
    Stderr,
    File { path: String, append: bool },
}

/// Resolved output redirections for one command.
#[derive(Debug)]
struct Redirections {
    stdout: Sink,
    stderr: Sink,
    /// Every file opened for output, in order, whether or not it ends up
    /// receiving a stream.
    opened: Vec<(String, bool)>,
}

impl Shell {
    /// Run every sequence of `script`. `stdin` feeds the first pipeline.
    pub(super) fn run_script<'a>(
        &'a self,
        script: &'a Script,
        state: &'a mut ShellState,
        stdin: Vec<u8>,
    ) -> BoxFuture<'a, Result<CommandOutcome, ShellError>> {
        async move {
            let mut out = CommandOutcome::code(state.last_exit_code);
            let mut stdin = Some(stdin);
            for sequence in &script.sequences {
                let result = self
                    .run_sequence(sequence, state, stdin.take().unwrap_or_default())
                    .await?;
                out.stdout.extend(result.stdout);
                out.stderr.extend(result.stderr);
                out.exit_code = result.exit_code;
            }
            Ok(out)
        }
        .boxed()
    }

    /// Run a `$(...)` body against its own copy of the state.
    pub(super) fn capture<'a>(
        &'a self,
        script: &'a str,
        mut state: ShellState,
    ) -> BoxFuture<'a, Result<CommandOutcome, ShellError>> {
        async move {
            let parsed = parse(script).map_err(|e| ExpansionError::Script(e.to_string()))?;
            self.run_script(&parsed, &mut state, Vec::new()).await
        }
        .boxed()
    }

    async fn run_sequence(
        &self,
        sequence: &Sequence,
        state: &mut ShellState,
        stdin: Vec<u8>,
    ) -> Result<CommandOutcome, ShellError> {
        let mut out = self.run_pipeline(&sequence.head, state, stdin).await?;
        state.last_exit_code = out.exit_code;

        for step in &sequence.tail {
            if !step.op.should_run(state.last_exit_code) {
                continue;
            }
            let result = self.run_pipeline(&step.pipeline, state, Vec::new()).await?;
            state.last_exit_code = result.exit_code;
            out.stdout.extend(result.stdout);
            out.stderr.extend(result.stderr);
        }
        out.exit_code = state.last_exit_code;
        Ok(out)
    }

    async fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        state: &mut ShellState,
        stdin: Vec<u8>,
    ) -> Result<CommandOutcome, ShellError> {
        let mut input = stdin;
        let mut stderr = Vec::new();
        let mut exit_code = 0;

        for (index, command) in pipeline.commands.iter().enumerate() {
            match self.run_command(command, state, input, index == 0).await {
                Ok(outcome) => {
                    exit_code = outcome.exit_code;
                    stderr.extend(outcome.stderr);
                    input = outcome.stdout;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(error = %e, stage = index, "Pipeline stage failed");
                    stderr.extend(format!("{e}\n").into_bytes());
                    exit_code = 127;
                    input = Vec::new();
                    break;
                }
            }
        }

        Ok(CommandOutcome {
            exit_code,
            stdout: input,
            stderr,
        })
    }

    async fn run_command(
        &self,
        command: &Command,
        state: &mut ShellState,
        stdin: Vec<u8>,
        first_stage: bool,
    ) -> Result<CommandOutcome, ShellError> {
        let mut diagnostics = Vec::new();
        let stdin = match command.redirs.iter().rfind(|r| r.kind == RedirKind::In) {
            Some(redir) if first_stage => {
                let path = self.redirect_target(redir, state, &mut diagnostics).await?;
                self.workspace().read_file(&path).await.map_err(|e| match e {
                    WorkspaceError::NotFound(_) | WorkspaceError::IsADirectory(_) => {
                        ShellError::Redirection(e.to_string())
                    }
                    other => ShellError::Workspace(other),
                })?
            }
            _ => stdin,
        };
        let redirections = self.output_redirections(command, state, &mut diagnostics).await?;

        let mut outcome = match &command.subshell {
            Some(body) => {
                let mut sub = state.clone();
                self.run_script(body, &mut sub, stdin).await?
            }
            None => self.run_simple(command, state, stdin).await?,
        };
        if !diagnostics.is_empty() {
            diagnostics.append(&mut outcome.stderr);
            outcome.stderr = diagnostics;
        }

        self.apply_redirections(redirections, outcome).await
    }

    async fn run_simple(
        &self,
        command: &Command,
        state: &mut ShellState,
        stdin: Vec<u8>,
    ) -> Result<CommandOutcome, ShellError> {
        let mut words = command.argv.as_slice();
        let mut assignments = Vec::new();
        while let Some((first, rest)) = words.split_first() {
            let Some(assignment) = split_assignment(first) else {
                break;
            };
            assignments.push(assignment);
            words = rest;
        }

        let mut expander = Expander::new(self, state);
        let mut values = Vec::with_capacity(assignments.len());
        for (name, value) in &assignments {
            values.push((name.clone(), expander.expand_to_string(value).await?));
        }
        let argv = expander.expand_words(words).await?;
        let diagnostics = expander.into_stderr();

        let Some((name, args)) = argv.split_first() else {
            for (name, value) in values {
                if state.env.contains_key(&name) {
                    state.env.insert(name, value);
                } else {
                    state.vars.insert(name, value);
                }
            }
            return Ok(CommandOutcome {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: diagnostics,
            });
        };

        let mut outcome = match CommandResolver::new(self.delegate()).resolve(name).await {
            Resolved::Builtin(builtin) => self.run_builtin(builtin, args, state).await?,
            Resolved::Delegated => {
                let Some(delegate) = self.delegate() else {
                    return Err(ShellError::CommandNotFound(name.clone()));
                };
                let request = CommandRequest {
                    argv: argv.clone(),
                    cwd: state.cwd.clone(),
                    env: one_shot_env(&state.env, values),
                    stdin,
                    limits: self.config().limits,
                };
                tracing::debug!(command = %name, cwd = %request.cwd, "Delegating command");
                let output = delegate.run(request).await?;
                CommandOutcome {
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
            }
            Resolved::Utility(utility) => {
                let env = one_shot_env(&state.env, values);
                let ctx = UtilContext {
                    workspace: self.workspace().as_ref(),
                    config: self.config(),
                    cwd: &state.cwd,
                    env: &env,
                    stdin: &stdin,
                };
                self.run_utility(utility, args, ctx).await?
            }
            Resolved::NotFound => return Err(ShellError::CommandNotFound(name.clone())),
        };

        if !diagnostics.is_empty() {
            let mut stderr = diagnostics;
            stderr.append(&mut outcome.stderr);
            outcome.stderr = stderr;
        }
        Ok(outcome)
    }

    /// Expand and resolve a redirection's path word.
    async fn redirect_target(
        &self,
        redir: &Redir,
        state: &ShellState,
        diagnostics: &mut Vec<u8>,
    ) -> Result<String, ShellError> {
        let Some(word) = &redir.path else {
            return Err(ShellError::Redirection("missing redirection target".to_string()));
        };
        let mut expander = Expander::new(self, state);
        let fields = expander.expand_word(word).await?;
        diagnostics.extend(expander.into_stderr());
        match fields.as_slice() {
            [target] if !target.is_empty() => resolve_path(&state.cwd, target),
            [_] => Err(ShellError::Redirection(
                ": No such file or directory".to_string(),
            )),
            _ => Err(ShellError::Redirection(format!(
                "{}: ambiguous redirect",
                word.literal()
            ))),
        }
    }

    async fn output_redirections(
        &self,
        command: &Command,
        state: &ShellState,
        diagnostics: &mut Vec<u8>,
    ) -> Result<Redirections, ShellError> {
        let mut redirections = Redirections {
            stdout: Sink::Stdout,
            stderr: Sink::Stderr,
            opened: Vec::new(),
        };
        for redir in &command.redirs {
            match redir.kind {
                RedirKind::In => {}
                RedirKind::ErrToOut => redirections.stderr = redirections.stdout.clone(),
                kind => {
                    let path = self.redirect_target(redir, state, diagnostics).await?;
                    let append = matches!(kind, RedirKind::Append | RedirKind::ErrAppend);
                    redirections.opened.push((path.clone(), append));
                    let sink = Sink::File { path, append };
                    if matches!(kind, RedirKind::Out | RedirKind::Append) {
                        redirections.stdout = sink;
                    } else {
                        redirections.stderr = sink;
                    }
                }
            }
        }
        Ok(redirections)
    }

    /// Route each stream to its sink. Stdout is written before stderr when
    /// both land in the same place.
    async fn apply_redirections(
        &self,
        redirections: Redirections,
        outcome: CommandOutcome,
    ) -> Result<CommandOutcome, ShellError> {
        if redirections.opened.is_empty() && redirections.stderr == Sink::Stderr {
            return Ok(outcome);
        }

        let mut result = CommandOutcome::code(outcome.exit_code);
        // path -> (append, bytes), in first-write order
        let mut files: Vec<(String, bool, Vec<u8>)> = Vec::new();
        for (sink, data) in [
            (redirections.stdout, outcome.stdout),
            (redirections.stderr, outcome.stderr),
        ] {
            match sink {
                Sink::Stdout => result.stdout.extend(data),
                Sink::Stderr => result.stderr.extend(data),
                Sink::File { path, append } => {
                    match files.iter_mut().find(|(p, _, _)| *p == path) {
                        Some((_, _, buf)) => buf.extend(data),
                        None => files.push((path, append, data)),
                    }
                }
            }
        }
        for (path, append) in redirections.opened {
            if !files.iter().any(|(p, _, _)| *p == path) {
                files.push((path, append, Vec::new()));
            }
        }

        for (path, append, data) in files {
            let contents = if append {
                let mut existing = match self.workspace().read_file(&path).await {
                    Ok(existing) => existing,
                    Err(WorkspaceError::NotFound(_)) => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                existing.extend(data);
                existing
            } else {
                data
            };
            tracing::trace!(%path, bytes = contents.len(), append, "Writing redirection");
            self.workspace().write_file(&path, &contents).await?;
        }
        Ok(result)
    }
}

fn one_shot_env(
    env: &BTreeMap<String, String>,
    assignments: Vec<(String, String)>,
) -> BTreeMap<String, String> {
    let mut env = env.clone();
    env.extend(assignments);
    env
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::workspace::{InMemoryWorkspace, Workspace};

    fn shell_with(files: &[(&str, &str)]) -> (Shell, Arc<InMemoryWorkspace>) {
        let ws = Arc::new(InMemoryWorkspace::with_files(
            files.iter().map(|(p, d)| (p.to_string(), d.as_bytes().to_vec())),
        ));
        (Shell::builder().workspace(ws.clone()).build(), ws)
    }

    #[tokio::test]
    async fn test_exit_code_propagates_to_dollar_question() {
        let (shell, _) = shell_with(&[]);
        let result = shell.execute("false; echo $?").await.unwrap();
        assert_eq!(result.stdout_str(), "1\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_guards() {
        let (shell, _) = shell_with(&[]);
        assert_eq!(shell.execute("false && echo X").await.unwrap().stdout_str(), "");
        assert_eq!(shell.execute("true || echo X").await.unwrap().stdout_str(), "");
        assert_eq!(shell.execute("nope && echo hi").await.unwrap().stdout_str(), "");
        let result = shell.execute("nope || echo hi").await.unwrap();
        assert_eq!(result.stdout_str(), "hi\n");
        assert_eq!(result.stderr_str(), "nope: command not found\n");
    }

    #[tokio::test]
    async fn test_failed_stage_stops_pipeline_only() {
        let (shell, _) = shell_with(&[]);
        let result = shell.execute("echo a | nope | echo b; echo c").await.unwrap();
        assert_eq!(result.stdout_str(), "c\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_redirection_order() {
        let (shell, ws) = shell_with(&[]);
        shell
            .execute("ls missing > out.txt 2>&1; ls missing 2>&1 > other.txt")
            .await
            .unwrap();
        let out = ws.read_file("out.txt").await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("cannot access"));
        assert!(ws.read_file("other.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_opened_file_is_created() {
        let (shell, ws) = shell_with(&[("a", "old")]);
        shell.execute("echo hi > a > b").await.unwrap();
        assert!(ws.read_file("a").await.unwrap().is_empty());
        assert_eq!(ws.read_file("b").await.unwrap(), b"hi\n");
    }

    #[tokio::test]
    async fn test_input_redirect_only_on_first_stage() {
        let (shell, _) = shell_with(&[("in.txt", "from file\n")]);
        let result = shell.execute("cat < in.txt").await.unwrap();
        assert_eq!(result.stdout_str(), "from file\n");
        let result = shell.execute("echo piped | cat < in.txt").await.unwrap();
        assert_eq!(result.stdout_str(), "piped\n");
    }

    #[tokio::test]
    async fn test_missing_input_file_is_a_stage_error() {
        let (shell, _) = shell_with(&[]);
        let result = shell.execute("cat < nope.txt; echo next").await.unwrap();
        assert_eq!(result.stdout_str(), "next\n");
        assert!(result.stderr_str().contains("nope.txt"));
    }

    #[tokio::test]
    async fn test_subshell_does_not_leak_state() {
        let (shell, _) = shell_with(&[("src/a.txt", "")]);
        let result = shell.execute("(cd src; X=1; pwd); pwd; echo \"[$X]\"").await.unwrap();
        assert_eq!(result.stdout_str(), "/src\n/\n[]\n");
    }

    #[tokio::test]
    async fn test_parse_error_is_fatal() {
        let (shell, ws) = shell_with(&[]);
        let err = shell.execute("echo hi > out.txt; echo 'open").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(ws.stat("out.txt").await.unwrap().is_none());
    }
}
