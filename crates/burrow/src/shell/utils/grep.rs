//! grep and rg - search for patterns in files

use std::fmt::Write as _;

use regex_lite::Regex;

use super::UtilContext;
use crate::shell::{CommandOutcome, ShellError, resolve_path};
use crate::workspace::join_path;

pub(super) async fn grep(
    args: &[String],
    ctx: &UtilContext<'_>,
) -> Result<CommandOutcome, ShellError> {
    search("grep", args, ctx, false).await
}

/// Like `grep -r`, but prefixes every line with its path and skips hidden
/// entries.
pub(super) async fn rg(args: &[String], ctx: &UtilContext<'_>) -> Result<CommandOutcome, ShellError> {
    search("rg", args, ctx, true).await
}

async fn search(
    name: &str,
    args: &[String],
    ctx: &UtilContext<'_>,
    rg: bool,
) -> Result<CommandOutcome, ShellError> {
    let mut opts = match GrepOpts::parse(args) {
        Ok(o) => o,
        Err(e) => return Ok(CommandOutcome::fail(2, format!("{name}: {e}"))),
    };
    if rg {
        opts.recursive = true;
    }

    let regex = match Regex::new(&opts.regex()) {
        Ok(r) => r,
        Err(e) => return Ok(CommandOutcome::fail(2, format!("{name}: invalid regex: {e}"))),
    };

    let mut out = String::new();
    let mut stderr = String::new();
    let mut matched = false;
    let mut match_count = 0;

    let use_stdin = opts.files.is_empty() && !(rg && ctx.stdin.is_empty());
    if use_stdin {
        let input = String::from_utf8_lossy(ctx.stdin);
        matched |= grep_text(&input, &regex, None, &opts, &mut out, &mut match_count);
    } else {
        let roots = if opts.files.is_empty() {
            vec![".".to_string()]
        } else {
            opts.files.clone()
        };
        let mut targets = Vec::new();
        for root in &roots {
            if let Err(e) = collect(root, ctx, &opts, rg, &mut targets).await? {
                let _ = writeln!(stderr, "{name}: {e}");
            }
        }
        let show_filename = rg || targets.len() > 1 || opts.with_filename || opts.recursive;

        for (display, path) in &targets {
            let contents = match ctx.workspace.read_file(path).await {
                Ok(data) => data,
                Err(e) => {
                    if !opts.silent {
                        let _ = writeln!(stderr, "{name}: {display}: {e}");
                    }
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&contents);
            let filename = show_filename.then_some(display.as_str());

            if opts.count_only {
                let mut count = 0;
                let found = grep_text(&text, &regex, None, &opts, &mut String::new(), &mut count);
                matched |= found;
                match filename {
                    Some(f) => {
                        let _ = writeln!(out, "{f}:{count}");
                    }
                    None => match_count += count,
                }
                continue;
            }

            let found = grep_text(&text, &regex, filename, &opts, &mut out, &mut match_count);
            matched |= found;
            if opts.files_only && found {
                let _ = writeln!(out, "{display}");
            }
        }
        if opts.count_only && !show_filename {
            let _ = writeln!(out, "{match_count}");
        }
    }

    if use_stdin && opts.count_only {
        let _ = writeln!(out, "{match_count}");
    }
    if opts.silent {
        out.clear();
    }

    let exit_code = if !stderr.is_empty() && !matched {
        2
    } else if matched {
        0
    } else {
        1
    };
    Ok(CommandOutcome {
        exit_code,
        stdout: out.into_bytes(),
        stderr: stderr.into_bytes(),
    })
}

/// Expand one operand into the files to search, as `(display, path)`.
async fn collect(
    root: &str,
    ctx: &UtilContext<'_>,
    opts: &GrepOpts,
    skip_hidden: bool,
    targets: &mut Vec<(String, String)>,
) -> Result<Result<(), String>, ShellError> {
    let Ok(path) = resolve_path(ctx.cwd, root) else {
        return Ok(Err(format!("{root}: path escapes the workspace")));
    };
    let Some(stat) = ctx.workspace.stat(&path).await? else {
        return Ok(Err(format!("{root}: No such file or directory")));
    };
    if !stat.is_dir() {
        targets.push((root.to_string(), path));
        return Ok(Ok(()));
    }
    if !opts.recursive {
        return Ok(Err(format!("{root}: Is a directory")));
    }

    let prefix = if root == "." || root == "./" {
        String::new()
    } else {
        root.trim_end_matches('/').to_string()
    };
    // Depth-first in name order.
    let mut stack = vec![(prefix, path)];
    while let Some((display, dir)) = stack.pop() {
        let mut subdirs = Vec::new();
        for entry in ctx.workspace.list_dir(&dir).await? {
            if skip_hidden && entry.name.starts_with('.') {
                continue;
            }
            let entry_display = join_path(&display, &entry.name);
            let entry_path = join_path(&dir, &entry.name);
            if entry.is_dir() {
                subdirs.push((entry_display, entry_path));
            } else {
                targets.push((entry_display, entry_path));
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
    Ok(Ok(()))
}

fn grep_text(
    input: &str,
    regex: &Regex,
    filename: Option<&str>,
    opts: &GrepOpts,
    out: &mut String,
    match_count: &mut usize,
) -> bool {
    let mut matched = false;
    let mut file_matches = 0;

    for (index, line) in input.lines().enumerate() {
        let is_match = regex.is_match(line) != opts.invert;
        if !is_match {
            continue;
        }
        matched = true;
        *match_count += 1;
        file_matches += 1;

        if opts.files_only || opts.count_only || opts.silent {
            if opts.files_only {
                break;
            }
            continue;
        }

        if let Some(f) = filename {
            let _ = write!(out, "{f}:");
        }
        if opts.line_number {
            let _ = write!(out, "{}:", index + 1);
        }
        let _ = writeln!(out, "{line}");

        if opts.max_count.is_some_and(|max| file_matches >= max) {
            break;
        }
    }

    matched
}

#[derive(Debug, Default)]
struct GrepOpts {
    pattern: String,
    files: Vec<String>,
    invert: bool,
    ignore_case: bool,
    fixed: bool,
    line_number: bool,
    count_only: bool,
    files_only: bool,
    with_filename: bool,
    silent: bool,
    recursive: bool,
    max_count: Option<usize>,
}

impl GrepOpts {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut opts = GrepOpts::default();
        let mut pattern = None;
        let mut positional = Vec::new();
        let mut args_iter = args.iter();
        let mut options_done = false;

        while let Some(arg) = args_iter.next() {
            if options_done || !arg.starts_with('-') || arg.len() == 1 {
                positional.push(arg.clone());
            } else if arg == "--" {
                options_done = true;
            } else if let Some(long) = arg.strip_prefix("--") {
                match long {
                    "invert-match" => opts.invert = true,
                    "ignore-case" => opts.ignore_case = true,
                    "fixed-strings" => opts.fixed = true,
                    "line-number" => opts.line_number = true,
                    "count" => opts.count_only = true,
                    "files-with-matches" => opts.files_only = true,
                    "with-filename" => opts.with_filename = true,
                    "quiet" | "silent" => opts.silent = true,
                    "recursive" => opts.recursive = true,
                    _ => return Err(format!("unknown option: {arg}")),
                }
            } else {
                let chars: Vec<char> = arg[1..].chars().collect();
                let mut i = 0;
                while i < chars.len() {
                    match chars[i] {
                        'v' => opts.invert = true,
                        'i' => opts.ignore_case = true,
                        'F' => opts.fixed = true,
                        'n' => opts.line_number = true,
                        'c' => opts.count_only = true,
                        'l' => opts.files_only = true,
                        'H' => opts.with_filename = true,
                        'q' => opts.silent = true,
                        'r' | 'R' => opts.recursive = true,
                        'e' => {
                            if i + 1 < chars.len() {
                                pattern = Some(chars[i + 1..].iter().collect());
                                i = chars.len();
                            } else if let Some(p) = args_iter.next() {
                                pattern = Some(p.clone());
                            } else {
                                return Err("option requires an argument -- 'e'".to_string());
                            }
                        }
                        'm' => {
                            let value = args_iter
                                .next()
                                .ok_or_else(|| "option requires an argument -- 'm'".to_string())?;
                            opts.max_count = Some(
                                value
                                    .parse()
                                    .map_err(|_| format!("invalid max count: {value}"))?,
                            );
                        }
                        c => return Err(format!("unknown option: -{c}")),
                    }
                    i += 1;
                }
            }
        }

        opts.pattern = match pattern {
            Some(p) => p,
            None if positional.is_empty() => return Err("missing pattern".to_string()),
            None => positional.remove(0),
        };
        opts.files = positional;
        Ok(opts)
    }

    fn regex(&self) -> String {
        let pattern = if self.fixed {
            regex_lite::escape(&self.pattern)
        } else {
            self.pattern.clone()
        };
        if self.ignore_case {
            format!("(?i){pattern}")
        } else {
            pattern
        }
    }
}
