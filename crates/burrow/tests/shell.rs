//! End-to-end shell behaviour over an in-memory workspace.
//!
//! These tests cover:
//! - exit codes and `&&` / `||` guards
//! - word expansion and field elision
//! - redirections and pipelines
//! - delegation and the fallback utilities

use std::sync::Arc;

use async_trait::async_trait;
use burrow::{
    CommandDelegate, CommandOutput, CommandRequest, DelegateError, InMemoryWorkspace,
    OutputLimits, Shell, ShellError,
};

/// Reports its argument count, and the value of `$MARK` when set.
struct Argc;

#[async_trait]
impl CommandDelegate for Argc {
    async fn has_command(&self, name: &str) -> bool {
        name == "argc"
    }

    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, DelegateError> {
        let mut stdout = format!("{}\n", request.argv.len() - 1);
        if let Some(mark) = request.env.get("MARK") {
            stdout.push_str(&format!("MARK={mark}\n"));
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
        })
    }
}

fn shell(files: &[(&str, &str)]) -> (Shell, Arc<InMemoryWorkspace>) {
    let workspace = Arc::new(InMemoryWorkspace::with_files(files.iter().copied()));
    let shell = Shell::builder()
        .workspace(workspace.clone())
        .delegate(Arc::new(Argc))
        .build();
    (shell, workspace)
}

async fn run(script: &str) -> burrow::ExecutionResult {
    let (shell, _) = shell(&[]);
    shell.execute(script).await.expect("script runs")
}

// =============================================================================
// Exit codes and guards
// =============================================================================

mod guards {
    use super::*;

    #[tokio::test]
    async fn test_exit_code_is_visible_to_next_sequence() {
        assert_eq!(run("false; echo $?").await.stdout, b"1\n");
        assert_eq!(run("true; echo $?").await.stdout, b"0\n");
        assert_eq!(run("nope; echo $?").await.stdout, b"127\n");
        assert_eq!(run("grep '(' x; echo $?").await.stdout, b"2\n");
    }

    #[tokio::test]
    async fn test_guards_skip_commands() {
        assert_eq!(run("false && echo X").await.stdout, b"");
        assert_eq!(run("true || echo X").await.stdout, b"");
        assert_eq!(run("nope && echo hi").await.stdout, b"");
        assert_eq!(run("nope || echo hi").await.stdout, b"hi\n");
    }

    #[tokio::test]
    async fn test_unknown_command_reports_127() {
        let result = run("nope").await;
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.stderr, b"nope: command not found\n");
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_stop_next_sequence() {
        let result = run("nope | echo skipped; echo after").await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"after\n");
    }
}

// =============================================================================
// Expansion
// =============================================================================

mod expansion {
    use super::*;

    #[tokio::test]
    async fn test_unquoted_empty_is_elided() {
        assert_eq!(run("argc $NOPE").await.stdout, b"0\n");
        assert_eq!(run("argc \"$NOPE\"").await.stdout, b"1\n");
        assert_eq!(run("argc ''").await.stdout, b"1\n");
    }

    #[tokio::test]
    async fn test_field_splitting() {
        assert_eq!(run("X='a b  c'; argc $X").await.stdout, b"3\n");
        assert_eq!(run("X='a b  c'; argc \"$X\"").await.stdout, b"1\n");
        assert_eq!(run("set -- one two three; argc $@").await.stdout, b"3\n");
    }

    #[tokio::test]
    async fn test_parameters() {
        assert_eq!(
            run("set -- a b; echo $# $1 ${2} ${3:-none}").await.stdout,
            b"2 a b none\n"
        );
        assert_eq!(run("X=; echo ${X:-empty}").await.stdout, b"empty\n");
        assert_eq!(run("echo '$HOME' \"a\\\"b\"").await.stdout, b"$HOME a\"b\n");
    }

    #[tokio::test]
    async fn test_command_substitution_gets_a_copy() {
        let result = run("X=outer; echo $(X=inner; cd /; echo $X) $X").await;
        assert_eq!(result.stdout, b"inner outer\n");
        assert_eq!(run("echo \"[$(printf 'a\\n\\n')]\"").await.stdout, b"[a\n]\n");
    }

    #[tokio::test]
    async fn test_glob_matches_live_listing() {
        let (shell, _) = shell(&[("a.txt", ""), ("b.txt", ""), ("c.md", ""), (".h.txt", "")]);
        let result = shell.execute("echo *.txt; echo *.rs").await.expect("runs");
        assert_eq!(result.stdout, b"a.txt b.txt\n*.rs\n");
        let quoted = shell.execute("echo '*.txt'").await.expect("runs");
        assert_eq!(quoted.stdout, b"*.txt\n");
    }

    #[tokio::test]
    async fn test_prefix_assignment_is_one_shot() {
        let result = run("MARK=1 argc; argc").await;
        assert_eq!(result.stdout, b"0\nMARK=1\n0\n");
        // Shell variables stay local until exported.
        assert_eq!(run("MARK=2; argc").await.stdout, b"0\n");
        assert_eq!(run("MARK=3; export MARK; argc").await.stdout, b"0\nMARK=3\n");
    }

    #[tokio::test]
    async fn test_unterminated_substitution_is_a_stage_error() {
        let result = run("echo ${X").await;
        assert_eq!(result.exit_code, 127);
        assert!(result.stdout.is_empty());
        assert!(!result.stderr.is_empty());
    }
}

// =============================================================================
// Pipelines and redirections
// =============================================================================

mod redirection {
    use super::*;

    #[tokio::test]
    async fn test_pipeline_into_grep() {
        let result = run("echo hi | grep hi").await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hi\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_stdout_redirect_writes_workspace() {
        let (shell, workspace) = shell(&[]);
        let result = shell.execute("echo hi > out.txt").await.expect("runs");
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.is_empty());
        assert_eq!(workspace.files().await["out.txt"], b"hi\n");

        shell.execute("echo again >> out.txt").await.expect("runs");
        assert_eq!(workspace.files().await["out.txt"], b"hi\nagain\n");
    }

    #[tokio::test]
    async fn test_input_redirect_and_stderr_merge() {
        let (shell, workspace) = shell(&[("in.txt", "one\ntwo\n")]);
        let result = shell
            .execute("grep two < in.txt; cat missing 2> err.txt; cat missing 2>&1")
            .await
            .expect("runs");
        assert_eq!(
            result.stdout,
            b"two\ncat: missing: No such file or directory\n"
        );
        assert!(result.stderr.is_empty());
        assert_eq!(
            workspace.files().await["err.txt"],
            b"cat: missing: No such file or directory\n"
        );
    }

    #[tokio::test]
    async fn test_redirect_escaping_root_is_refused() {
        let (shell, workspace) = shell(&[]);
        let result = shell.execute("echo x > ../../etc/passwd").await.expect("runs");
        assert_eq!(result.exit_code, 127);
        assert!(workspace.files().await.is_empty());
    }

    #[tokio::test]
    async fn test_subshell_output_feeds_pipeline() {
        let result = run("(echo a; echo b) | grep b; (cd /; X=1); echo ${X:-unset}").await;
        assert_eq!(result.stdout, b"b\nunset\n");
    }

    #[tokio::test]
    async fn test_output_truncation_is_monotonic() {
        let shell = Shell::builder().limits(OutputLimits::uniform(4)).build();
        let result = shell.execute("echo 12; echo 345; echo 6789").await.expect("runs");
        assert!(result.stdout_truncated);
        assert_eq!(result.stdout, b"12\n3");
        assert!(!result.stderr_truncated);
    }
}

// =============================================================================
// Builtins and utilities
// =============================================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_cd_then_ls() {
        let (shell, _) = shell(&[("src/a.txt", "x")]);
        let result = shell.execute("cd src && ls").await.expect("runs");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"a.txt\n");
        let result = shell.execute("cd src; pwd; cd ..; pwd").await.expect("runs");
        assert_eq!(result.stdout, b"/src\n/\n");
    }

    #[tokio::test]
    async fn test_cd_failures() {
        let (shell, _) = shell(&[("file", "x")]);
        let result = shell.execute("cd nope").await.expect("runs");
        assert_eq!(result.exit_code, 1);
        let result = shell.execute("cd file; echo $?").await.expect("runs");
        assert_eq!(result.stdout, b"1\n");
    }

    #[tokio::test]
    async fn test_test_builtin() {
        let (shell, _) = shell(&[("f", "data")]);
        let result = shell
            .execute("[ -f f ] && echo file; test -d f || echo notdir; [ 2 -lt 10 ] && echo lt")
            .await
            .expect("runs");
        assert_eq!(result.stdout, b"file\nnotdir\nlt\n");
    }

    #[tokio::test]
    async fn test_command_v_reports_resolution() {
        let result = run("command -v argc; command -v cd; command -v nope; echo $?").await;
        assert_eq!(result.stdout, b"argc\ncd\n1\n");
    }

    #[tokio::test]
    async fn test_rg_prefixes_paths() {
        let (shell, _) = shell(&[("a.txt", "needle\nhay\n"), ("sub/b.txt", "needle two\n")]);
        let result = shell.execute("rg needle").await.expect("runs");
        assert_eq!(result.stdout, b"a.txt:needle\nsub/b.txt:needle two\n");
    }

    #[tokio::test]
    async fn test_parse_error_has_no_side_effects() {
        let (shell, workspace) = shell(&[]);
        let err = shell.execute("echo a > out.txt; echo 'oops").await.unwrap_err();
        assert!(matches!(err, ShellError::Parse(_)));
        assert!(workspace.files().await.is_empty());
    }
}
