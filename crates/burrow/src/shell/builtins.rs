//! Shell-control builtins.
//!
//! These run in-process because they read or mutate [`ShellState`]. Domain
//! failures (bad option, missing directory) come back as a non-zero
//! [`CommandOutcome`]; only workspace faults are raised as errors.

use std::fmt::Write as _;

use super::expand::is_name;
use super::resolver::{Builtin, CommandResolver};
use super::{CommandOutcome, Shell, ShellError, ShellState, resolve_path};

impl Shell {
    pub(super) async fn run_builtin(
        &self,
        builtin: Builtin,
        args: &[String],
        state: &mut ShellState,
    ) -> Result<CommandOutcome, ShellError> {
        tracing::trace!(?builtin, ?args, "Running builtin");
        match builtin {
            Builtin::Colon | Builtin::True => Ok(CommandOutcome::code(0)),
            Builtin::False => Ok(CommandOutcome::code(1)),
            Builtin::Cd => self.cd(args, state).await,
            Builtin::Pwd => Ok(CommandOutcome::ok(format!("/{}\n", state.cwd))),
            Builtin::Export => Ok(export(args, state)),
            Builtin::Unset => Ok(unset(args, state)),
            Builtin::Set => Ok(set(args, state)),
            Builtin::Shift => Ok(shift(args, state)),
            Builtin::Test => self.test(args, state).await,
            Builtin::Bracket => match args.split_last() {
                Some((last, rest)) if last == "]" => self.test(rest, state).await,
                _ => Ok(CommandOutcome::fail(2, "[: missing `]'")),
            },
            Builtin::Command => self.command(args).await,
        }
    }

    async fn cd(&self, args: &[String], state: &mut ShellState) -> Result<CommandOutcome, ShellError> {
        let Some(target) = args.first() else {
            state.cwd.clear();
            return Ok(CommandOutcome::code(0));
        };
        if args.len() > 1 {
            return Ok(CommandOutcome::fail(1, "cd: too many arguments"));
        }
        let path = match resolve_path(&state.cwd, target) {
            Ok(path) => path,
            Err(e) => return Ok(CommandOutcome::fail(1, format!("cd: {e}"))),
        };
        if !path.is_empty() {
            match self.workspace().stat(&path).await? {
                None => {
                    return Ok(CommandOutcome::fail(
                        1,
                        format!("cd: {target}: No such file or directory"),
                    ));
                }
                Some(stat) if !stat.is_dir() => {
                    return Ok(CommandOutcome::fail(1, format!("cd: {target}: Not a directory")));
                }
                Some(_) => {}
            }
        }
        state.cwd = path;
        if state.env.contains_key("PWD") {
            state.env.insert("PWD".to_string(), format!("/{}", state.cwd));
        }
        Ok(CommandOutcome::code(0))
    }

    async fn test(&self, args: &[String], state: &ShellState) -> Result<CommandOutcome, ShellError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.evaluate_test(&args, state).await? {
            Ok(true) => Ok(CommandOutcome::code(0)),
            Ok(false) => Ok(CommandOutcome::code(1)),
            Err(message) => Ok(CommandOutcome::fail(2, format!("test: {message}"))),
        }
    }

    async fn evaluate_test(
        &self,
        args: &[&str],
        state: &ShellState,
    ) -> Result<Result<bool, String>, ShellError> {
        let mut args = args;
        let mut negate = false;
        while let ["!", rest @ ..] = args {
            if rest.is_empty() {
                break;
            }
            negate = !negate;
            args = rest;
        }
        let result = match args {
            [] => Ok(false),
            [value] => Ok(!value.is_empty()),
            [op, operand] => self.unary_test(op, operand, state).await?,
            [left, op, right] => binary_test(left, op, right),
            _ => Err("too many arguments".to_string()),
        };
        Ok(result.map(|b| b != negate))
    }

    async fn unary_test(
        &self,
        op: &str,
        operand: &str,
        state: &ShellState,
    ) -> Result<Result<bool, String>, ShellError> {
        match op {
            "-z" => return Ok(Ok(operand.is_empty())),
            "-n" => return Ok(Ok(!operand.is_empty())),
            "-e" | "-f" | "-d" | "-s" => {}
            other => return Ok(Err(format!("{other}: unary operator expected"))),
        }
        let Ok(path) = resolve_path(&state.cwd, operand) else {
            return Ok(Ok(false));
        };
        let stat = self.workspace().stat(&path).await?;
        Ok(Ok(match (op, stat) {
            (_, None) => false,
            ("-e", Some(_)) => true,
            ("-f", Some(stat)) => !stat.is_dir(),
            ("-d", Some(stat)) => stat.is_dir(),
            (_, Some(stat)) => !stat.is_dir() && stat.size > 0,
        }))
    }

    async fn command(&self, args: &[String]) -> Result<CommandOutcome, ShellError> {
        let names = match args.split_first() {
            Some((flag, names)) if flag == "-v" => names,
            _ => return Ok(CommandOutcome::fail(2, "command: only `command -v NAME' is supported")),
        };
        let resolver = CommandResolver::new(self.delegate());
        let mut out = String::new();
        let mut exit_code = 0;
        for name in names {
            if resolver.resolve(name).await.is_found() {
                out.push_str(name);
                out.push('\n');
            } else {
                exit_code = 1;
            }
        }
        Ok(CommandOutcome {
            exit_code,
            stdout: out.into_bytes(),
            stderr: Vec::new(),
        })
    }
}

fn binary_test(left: &str, op: &str, right: &str) -> Result<bool, String> {
    match op {
        "=" | "==" => return Ok(left == right),
        "!=" => return Ok(left != right),
        "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {}
        other => return Err(format!("{other}: binary operator expected")),
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| format!("{s}: integer expression expected"))
    };
    let (l, r) = (parse(left)?, parse(right)?);
    Ok(match op {
        "-eq" => l == r,
        "-ne" => l != r,
        "-lt" => l < r,
        "-le" => l <= r,
        "-gt" => l > r,
        _ => l >= r,
    })
}

fn export(args: &[String], state: &mut ShellState) -> CommandOutcome {
    if args.is_empty() || args.iter().all(|a| a == "-p") {
        let mut out = String::new();
        for (name, value) in &state.env {
            let _ = writeln!(out, "export {name}=\"{value}\"");
        }
        return CommandOutcome::ok(out);
    }

    let mut stderr = String::new();
    for arg in args.iter().filter(|a| *a != "-p") {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (arg.as_str(), None),
        };
        if !is_name(name) {
            let _ = writeln!(stderr, "export: `{arg}': not a valid identifier");
            continue;
        }
        let local = state.vars.remove(name);
        if let Some(value) = value.or(local) {
            state.env.insert(name.to_string(), value);
        }
    }
    status_from(stderr)
}

fn unset(args: &[String], state: &mut ShellState) -> CommandOutcome {
    for name in args.iter().filter(|a| !a.starts_with('-')) {
        state.vars.remove(name);
        state.env.remove(name);
    }
    CommandOutcome::code(0)
}

fn set(args: &[String], state: &mut ShellState) -> CommandOutcome {
    match args.first().map(String::as_str) {
        None => {
            let mut merged = state.env.clone();
            merged.extend(state.vars.clone());
            let mut out = String::new();
            for (name, value) in merged {
                let _ = writeln!(out, "{name}='{value}'");
            }
            CommandOutcome::ok(out)
        }
        Some("--") => {
            state.positional = args[1..].to_vec();
            CommandOutcome::code(0)
        }
        Some(flag) if flag.starts_with('-') || flag.starts_with('+') => {
            CommandOutcome::fail(2, format!("set: {flag}: unsupported option"))
        }
        Some(_) => {
            state.positional = args.to_vec();
            CommandOutcome::code(0)
        }
    }
}

fn shift(args: &[String], state: &mut ShellState) -> CommandOutcome {
    let count = match args.first() {
        None => 1,
        Some(n) => match n.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return CommandOutcome::fail(1, format!("shift: {n}: numeric argument required")),
        },
    };
    if count > state.positional.len() {
        return CommandOutcome::fail(1, "shift: shift count out of range");
    }
    state.positional.drain(..count);
    CommandOutcome::code(0)
}

fn status_from(stderr: String) -> CommandOutcome {
    CommandOutcome {
        exit_code: i32::from(!stderr.is_empty()),
        stdout: Vec::new(),
        stderr: stderr.into_bytes(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binary_test() {
        assert_eq!(binary_test("a", "=", "a"), Ok(true));
        assert_eq!(binary_test("a", "!=", "a"), Ok(false));
        assert_eq!(binary_test("3", "-lt", "10"), Ok(true));
        assert_eq!(binary_test(" 7", "-ge", "7"), Ok(true));
        assert!(binary_test("x", "-eq", "1").is_err());
        assert!(binary_test("a", "-foo", "b").is_err());
    }

    #[test]
    fn test_export_moves_local_vars() {
        let mut state = ShellState::default();
        state.vars.insert("A".into(), "1".into());
        let out = export(&strings(&["A", "B=2", "1bad"]), &mut state);
        assert_eq!(out.exit_code, 1);
        assert!(state.vars.is_empty());
        assert_eq!(state.env["A"], "1");
        assert_eq!(state.env["B"], "2");

        let listing = export(&[], &mut state);
        assert_eq!(listing.stdout, b"export A=\"1\"\nexport B=\"2\"\n");
    }

    #[test]
    fn test_set_and_shift() {
        let mut state = ShellState::default();
        assert_eq!(set(&strings(&["--", "a", "b", "c"]), &mut state).exit_code, 0);
        assert_eq!(state.positional, ["a", "b", "c"]);
        assert_eq!(shift(&strings(&["2"]), &mut state).exit_code, 0);
        assert_eq!(state.positional, ["c"]);
        assert_eq!(shift(&strings(&["5"]), &mut state).exit_code, 1);
        assert_eq!(set(&strings(&["-e"]), &mut state).exit_code, 2);
    }

    #[test]
    fn test_unset_removes_both_scopes() {
        let mut state = ShellState::default();
        state.vars.insert("A".into(), "1".into());
        state.env.insert("B".into(), "2".into());
        unset(&strings(&["A", "B"]), &mut state);
        assert!(state.lookup("A").is_none());
        assert!(state.lookup("B").is_none());
    }
}
