//! Fallback utilities.
//!
//! Small reimplementations of common commands, used when no delegate
//! provides the name. They read the workspace directly and mirror the
//! usual output formats closely enough for agents that parse them.

mod grep;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;

use super::resolver::Utility;
use super::{CommandOutcome, Shell, ShellConfig, ShellError, resolve_path};
use crate::workspace::{Workspace, WorkspaceError};

/// Everything a utility may look at.
pub(super) struct UtilContext<'a> {
    pub workspace: &'a dyn Workspace,
    pub config: &'a ShellConfig,
    pub cwd: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub stdin: &'a [u8],
}

impl UtilContext<'_> {
    /// Read `name` relative to the cwd. Errors are rendered as diagnostics.
    async fn read(&self, name: &str) -> Result<Vec<u8>, String> {
        let path = resolve_path(self.cwd, name).map_err(|e| e.to_string())?;
        match self.workspace.read_file(&path).await {
            Ok(data) => Ok(data),
            Err(WorkspaceError::NotFound(_)) => Err(format!("{name}: No such file or directory")),
            Err(WorkspaceError::IsADirectory(_)) => Err(format!("{name}: Is a directory")),
            Err(e) => Err(format!("{name}: {e}")),
        }
    }
}

impl Shell {
    pub(super) async fn run_utility(
        &self,
        utility: Utility,
        args: &[String],
        ctx: UtilContext<'_>,
    ) -> Result<CommandOutcome, ShellError> {
        tracing::trace!(?utility, ?args, "Running fallback utility");
        Ok(match utility {
            Utility::Echo => echo(args),
            Utility::Printf => printf(args),
            Utility::Cat => cat(args, &ctx).await,
            Utility::Ls => ls(args, &ctx).await?,
            Utility::Grep => grep::grep(args, &ctx).await?,
            Utility::Rg => grep::rg(args, &ctx).await?,
            Utility::Date => date(args),
            Utility::Uname => uname(args, ctx.config),
            Utility::Whoami => {
                let user = ctx.env.get("USER").unwrap_or(&ctx.config.user);
                CommandOutcome::ok(format!("{user}\n"))
            }
        })
    }
}

fn echo(args: &[String]) -> CommandOutcome {
    let (newline, words) = match args.first() {
        Some(flag) if flag == "-n" => (false, &args[1..]),
        _ => (true, args),
    };
    let mut out = words.join(" ");
    if newline {
        out.push('\n');
    }
    CommandOutcome::ok(out)
}

fn printf(args: &[String]) -> CommandOutcome {
    let Some((format, mut rest)) = args.split_first() else {
        return CommandOutcome::fail(2, "printf: usage: printf FORMAT [ARGUMENTS...]");
    };
    let format: Vec<char> = format.chars().collect();
    let mut out = String::new();
    let mut stderr = String::new();

    loop {
        let mut consumed = false;
        let mut i = 0;
        while i < format.len() {
            match (format[i], format.get(i + 1)) {
                ('\\', Some(&c)) => {
                    match c {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        '\\' => out.push('\\'),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                    i += 2;
                }
                ('%', Some('%')) => {
                    out.push('%');
                    i += 2;
                }
                ('%', Some(&spec @ ('s' | 'd' | 'i'))) => {
                    let arg = rest.first().map(String::as_str);
                    if let Some((_, tail)) = rest.split_first() {
                        rest = tail;
                        consumed = true;
                    }
                    if spec == 's' {
                        out.push_str(arg.unwrap_or(""));
                    } else {
                        let arg = arg.unwrap_or("0");
                        match arg.trim().parse::<i64>() {
                            Ok(n) => {
                                let _ = write!(out, "{n}");
                            }
                            Err(_) => {
                                out.push('0');
                                let _ = writeln!(stderr, "printf: {arg}: invalid number");
                            }
                        }
                    }
                    i += 2;
                }
                (c, _) => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        if !consumed || rest.is_empty() {
            break;
        }
    }

    CommandOutcome {
        exit_code: i32::from(!stderr.is_empty()),
        stdout: out.into_bytes(),
        stderr: stderr.into_bytes(),
    }
}

async fn cat(args: &[String], ctx: &UtilContext<'_>) -> CommandOutcome {
    let mut number = false;
    let mut files = Vec::new();
    for arg in args {
        if arg.starts_with('-') && arg.len() > 1 {
            for c in arg[1..].chars() {
                match c {
                    'n' => number = true,
                    _ => return CommandOutcome::fail(1, format!("cat: unknown option: -{c}")),
                }
            }
        } else {
            files.push(arg.as_str());
        }
    }
    if files.is_empty() {
        files.push("-");
    }

    let mut out = Vec::new();
    let mut stderr = String::new();
    let mut line_number = 1;
    for file in files {
        let contents = if file == "-" {
            ctx.stdin.to_vec()
        } else {
            match ctx.read(file).await {
                Ok(data) => data,
                Err(e) => {
                    let _ = writeln!(stderr, "cat: {e}");
                    continue;
                }
            }
        };
        if number {
            for line in contents.split_inclusive(|&b| b == b'\n') {
                out.extend_from_slice(format!("{line_number:>6}\t").as_bytes());
                out.extend_from_slice(line);
                line_number += 1;
            }
        } else {
            out.extend_from_slice(&contents);
        }
    }

    CommandOutcome {
        exit_code: i32::from(!stderr.is_empty()),
        stdout: out,
        stderr: stderr.into_bytes(),
    }
}

async fn ls(args: &[String], ctx: &UtilContext<'_>) -> Result<CommandOutcome, ShellError> {
    let mut all = false;
    let mut long = false;
    let mut operands = Vec::new();
    for arg in args {
        if arg.starts_with('-') && arg.len() > 1 {
            for c in arg[1..].chars() {
                match c {
                    'a' | 'A' => all = true,
                    'l' => long = true,
                    '1' => {}
                    _ => return Ok(CommandOutcome::fail(2, format!("ls: invalid option -- '{c}'"))),
                }
            }
        } else {
            operands.push(arg.as_str());
        }
    }
    if operands.is_empty() {
        operands.push(".");
    }

    let mut stderr = String::new();
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for operand in &operands {
        let stat = match resolve_path(ctx.cwd, operand) {
            Ok(path) => ctx.workspace.stat(&path).await?.map(|s| (path, s)),
            Err(_) => None,
        };
        match stat {
            None => {
                let _ = writeln!(
                    stderr,
                    "ls: cannot access '{operand}': No such file or directory"
                );
            }
            Some((_, stat)) if !stat.is_dir() => files.push((operand.to_string(), stat.size, false)),
            Some((path, _)) => dirs.push((*operand, path)),
        }
    }

    let mut out = String::new();
    let render = |out: &mut String, name: &str, size: u64, is_dir: bool| {
        if long {
            let mode = if is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
            let _ = writeln!(out, "{mode} {size:>8} {name}");
        } else {
            let _ = writeln!(out, "{name}");
        }
    };
    for (name, size, is_dir) in &files {
        render(&mut out, name, *size, *is_dir);
    }

    let headers = operands.len() > 1;
    for (index, (operand, path)) in dirs.iter().enumerate() {
        if headers {
            if index > 0 || !files.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "{operand}:");
        }
        if all {
            render(&mut out, ".", 0, true);
            render(&mut out, "..", 0, true);
        }
        for entry in ctx.workspace.list_dir(path).await? {
            if !all && entry.name.starts_with('.') {
                continue;
            }
            let size = if long && !entry.is_dir() {
                let entry_path = crate::workspace::join_path(path, &entry.name);
                ctx.workspace
                    .stat(&entry_path)
                    .await?
                    .map_or(0, |s| s.size)
            } else {
                0
            };
            render(&mut out, &entry.name, size, entry.is_dir());
        }
    }

    Ok(CommandOutcome {
        exit_code: if stderr.is_empty() { 0 } else { 2 },
        stdout: out.into_bytes(),
        stderr: stderr.into_bytes(),
    })
}

fn date(args: &[String]) -> CommandOutcome {
    let mut format = "%a %b %e %H:%M:%S UTC %Y";
    for arg in args {
        match arg.strip_prefix('+') {
            Some(custom) => format = custom,
            None if arg == "-u" || arg == "--utc" => {}
            None => return CommandOutcome::fail(1, format!("date: invalid date '{arg}'")),
        }
    }
    let mut out = String::new();
    if write!(out, "{}", Utc::now().format(format)).is_err() {
        return CommandOutcome::fail(1, format!("date: invalid format '{format}'"));
    }
    out.push('\n');
    CommandOutcome::ok(out)
}

fn uname(args: &[String], config: &ShellConfig) -> CommandOutcome {
    const SYSNAME: &str = "WASI";
    const RELEASE: &str = "preview1";
    const MACHINE: &str = "wasm32";

    let mut fields = Vec::new();
    for arg in args {
        let Some(flags) = arg.strip_prefix('-') else {
            return CommandOutcome::fail(1, format!("uname: extra operand '{arg}'"));
        };
        for c in flags.chars() {
            match c {
                'a' => fields.extend(['s', 'n', 'r', 'm']),
                's' | 'n' | 'r' | 'm' => fields.push(c),
                _ => return CommandOutcome::fail(1, format!("uname: invalid option -- '{c}'")),
            }
        }
    }
    if fields.is_empty() {
        fields.push('s');
    }
    let mut seen = Vec::new();
    for field in ['s', 'n', 'r', 'm'] {
        if fields.contains(&field) {
            seen.push(match field {
                's' => SYSNAME,
                'n' => config.hostname.as_str(),
                'r' => RELEASE,
                _ => MACHINE,
            });
        }
    }
    CommandOutcome::ok(format!("{}\n", seen.join(" ")))
}
