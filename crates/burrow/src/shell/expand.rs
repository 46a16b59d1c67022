//! Word expansion.
//!
//! Turns one [`Word`] into zero or more argv strings:
//!
//! 1. single-quoted parts are copied verbatim
//! 2. `$NAME`, `${NAME}`, `${NAME:-default}`, `$?`, `$#`, `$@`, `$*`, `$0`..`$9`
//!    and `${N}` are substituted in unquoted and double-quoted parts
//! 3. `$(...)` runs the inner script on a copy of the state and splices its
//!    stdout (minus one trailing newline)
//! 4. results from unquoted parts are split on blanks and `*` patterns are
//!    matched against the workspace; a pattern with no match stays literal
//!
//! A word with any quoted part always yields at least one field. A bare
//! word that expands to nothing yields none.

use futures::future::BoxFuture;
use glob::{MatchOptions, Pattern};
use thiserror::Error;

use super::ast::{Quote, Word, WordPart};
use super::lexer::find_closing_paren;
use super::{Shell, ShellError, ShellState};
use crate::workspace::join_path;

/// Errors raised while expanding a word
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpansionError {
    /// `$(` without a matching `)`
    #[error("unterminated command substitution")]
    UnterminatedSubstitution,
    /// Malformed `${...}`
    #[error("${{{0}}}: bad substitution")]
    BadSubstitution(String),
    /// `$(...)` nesting beyond the configured depth
    #[error("command substitution nested deeper than {0} levels")]
    DepthExceeded(usize),
    /// The substituted script could not be parsed
    #[error("command substitution: {0}")]
    Script(String),
}

const IFS: [char; 3] = [' ', '\t', '\n'];

/// Whether `name` is a valid shell variable name.
pub fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `NAME=value` off the front of a word, if it is an assignment.
///
/// The name must be unquoted; the value keeps the remaining parts.
pub fn split_assignment(word: &Word) -> Option<(String, Word)> {
    let first = word.parts.first()?;
    if first.quote != Quote::None {
        return None;
    }
    let (name, rest) = first.text.split_once('=')?;
    if !is_name(name) {
        return None;
    }
    let mut parts = Vec::with_capacity(word.parts.len());
    if !rest.is_empty() {
        parts.push(WordPart {
            text: rest.to_string(),
            quote: Quote::None,
        });
    }
    parts.extend(word.parts[1..].iter().cloned());
    Some((name.to_string(), Word { parts }))
}

#[derive(Debug, Default)]
struct Field {
    text: String,
    pattern: String,
    has_glob: bool,
    quoted: bool,
}

impl Field {
    fn is_started(&self) -> bool {
        self.quoted || !self.text.is_empty()
    }
}

#[derive(Debug, Default)]
struct Fields {
    done: Vec<Field>,
    current: Field,
}

impl Fields {
    fn push_literal(&mut self, s: &str, glob_ok: bool) {
        for c in s.chars() {
            self.current.text.push(c);
            if glob_ok && c == '*' {
                self.current.pattern.push('*');
                self.current.has_glob = true;
            } else {
                self.current.pattern.push_str(&Pattern::escape(&c.to_string()));
            }
        }
    }

    fn push_quoted(&mut self, s: &str) {
        self.current.quoted = true;
        self.push_literal(s, false);
    }

    /// Result of an unquoted expansion: split on blanks.
    fn push_split(&mut self, s: &str) {
        for c in s.chars() {
            if IFS.contains(&c) {
                self.delimit();
            } else {
                let mut buf = [0u8; 4];
                self.push_literal(c.encode_utf8(&mut buf), true);
            }
        }
    }

    fn delimit(&mut self) {
        if self.current.is_started() {
            self.done.push(std::mem::take(&mut self.current));
        }
    }

    fn finish(mut self) -> Vec<Field> {
        self.delimit();
        self.done
    }
}

/// Expands words against one interpreter state.
pub(crate) struct Expander<'a> {
    shell: &'a Shell,
    state: &'a ShellState,
    stderr: Vec<u8>,
}

impl std::fmt::Debug for Expander<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expander")
            .field("cwd", &self.state.cwd)
            .finish_non_exhaustive()
    }
}

impl<'a> Expander<'a> {
    pub(crate) fn new(shell: &'a Shell, state: &'a ShellState) -> Self {
        Self {
            shell,
            state,
            stderr: Vec::new(),
        }
    }

    /// Stderr produced by command substitutions.
    pub(crate) fn into_stderr(self) -> Vec<u8> {
        self.stderr
    }

    /// Expand a list of words into argv.
    pub(crate) async fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>, ShellError> {
        let mut argv = Vec::new();
        for word in words {
            argv.extend(self.expand_word(word).await?);
        }
        Ok(argv)
    }

    /// Expand one word into 0..N fields.
    pub(crate) async fn expand_word(&mut self, word: &Word) -> Result<Vec<String>, ShellError> {
        let mut fields = Fields::default();
        for part in &word.parts {
            match part.quote {
                Quote::Single => fields.push_quoted(&part.text),
                Quote::Double => {
                    let value = self.expand_text(&part.text).await?;
                    fields.push_quoted(&value);
                }
                Quote::None => self.expand_unquoted(&part.text, &mut fields).await?,
            }
        }

        let mut out = Vec::new();
        for field in fields.finish() {
            if field.has_glob {
                let matches = self.glob(&field.pattern, &field.text).await;
                if !matches.is_empty() {
                    out.extend(matches);
                    continue;
                }
            }
            out.push(field.text);
        }
        Ok(out)
    }

    /// Expand a word into exactly one string: no splitting, no globbing.
    /// Used for assignment values.
    pub(crate) async fn expand_to_string(&mut self, word: &Word) -> Result<String, ShellError> {
        let mut out = String::new();
        for part in &word.parts {
            match part.quote {
                Quote::Single => out.push_str(&part.text),
                Quote::Double | Quote::None => out.push_str(&self.expand_text(&part.text).await?),
            }
        }
        Ok(out)
    }

    async fn expand_unquoted(&mut self, text: &str, fields: &mut Fields) -> Result<(), ShellError> {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        let mut literal = String::new();
        while i < chars.len() {
            if chars[i] == '$' {
                if let Some((value, next)) = self.dollar(&chars, i).await? {
                    fields.push_literal(&literal, true);
                    literal.clear();
                    fields.push_split(&value);
                    i = next;
                    continue;
                }
            }
            literal.push(chars[i]);
            i += 1;
        }
        fields.push_literal(&literal, true);
        Ok(())
    }

    /// Substitute every `$` form in `text`, leaving other characters alone.
    async fn expand_text(&mut self, text: &str) -> Result<String, ShellError> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '$' {
                if let Some((value, next)) = self.dollar(&chars, i).await? {
                    out.push_str(&value);
                    i = next;
                    continue;
                }
            }
            out.push(chars[i]);
            i += 1;
        }
        Ok(out)
    }

    fn expand_text_boxed<'s>(&'s mut self, text: &'s str) -> BoxFuture<'s, Result<String, ShellError>> {
        Box::pin(self.expand_text(text))
    }

    /// Evaluate the `$` form starting at `chars[i]`.
    ///
    /// Returns the value and the index just past the form, or `None` when
    /// the `$` is literal.
    async fn dollar(&mut self, chars: &[char], i: usize) -> Result<Option<(String, usize)>, ShellError> {
        let Some(&next) = chars.get(i + 1) else {
            return Ok(None);
        };
        match next {
            '(' => {
                let close = find_closing_paren(chars, i + 1)
                    .ok_or(ExpansionError::UnterminatedSubstitution)?;
                let inner: String = chars[i + 2..close].iter().collect();
                let value = self.substitute(&inner).await?;
                Ok(Some((value, close + 1)))
            }
            '{' => {
                let Some(offset) = chars[i + 2..].iter().position(|&c| c == '}') else {
                    let rest: String = chars[i + 2..].iter().collect();
                    return Err(ExpansionError::BadSubstitution(rest).into());
                };
                let close = i + 2 + offset;
                let body: String = chars[i + 2..close].iter().collect();
                let value = self.braced(&body).await?;
                Ok(Some((value, close + 1)))
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
                    .map_or(chars.len(), |p| i + 1 + p);
                let name: String = chars[i + 1..end].iter().collect();
                Ok(Some((self.state.lookup(&name).unwrap_or_default(), end)))
            }
            c if c.is_ascii_digit() || matches!(c, '?' | '#' | '@' | '*') => {
                Ok(Some((self.special(&c.to_string()).unwrap_or_default(), i + 2)))
            }
            _ => Ok(None),
        }
    }

    /// Special and positional parameters by name.
    fn special(&self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.state.last_exit_code.to_string()),
            "#" => Some(self.state.positional.len().to_string()),
            "@" | "*" => Some(self.state.positional.join(" ")),
            "0" => Some("sh".to_string()),
            n => {
                let index: usize = n.parse().ok()?;
                self.state.positional.get(index.checked_sub(1)?).cloned()
            }
        }
    }

    async fn braced(&mut self, body: &str) -> Result<String, ShellError> {
        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };
        let value = if is_name(name) {
            self.state.lookup(name)
        } else if !name.is_empty()
            && (name.chars().all(|c| c.is_ascii_digit()) || matches!(name, "?" | "#" | "@" | "*"))
        {
            self.special(name)
        } else {
            return Err(ExpansionError::BadSubstitution(body.to_string()).into());
        };
        match (value, default) {
            (Some(v), _) if !v.is_empty() => Ok(v),
            (_, Some(default)) => self.expand_text_boxed(default).await,
            (v, None) => Ok(v.unwrap_or_default()),
        }
    }

    async fn substitute(&mut self, script: &str) -> Result<String, ShellError> {
        let limit = self.shell.config().max_substitution_depth;
        if self.state.depth >= limit {
            return Err(ExpansionError::DepthExceeded(limit).into());
        }
        let mut inner = self.state.clone();
        inner.depth += 1;
        let outcome = self.shell.capture(script, inner).await?;
        self.stderr.extend(outcome.stderr);
        let mut text = String::from_utf8_lossy(&outcome.stdout).into_owned();
        if text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    /// Match a `*` pattern against the workspace, segment by segment.
    /// Returns sorted matches, or nothing when the pattern matches no entry.
    async fn glob(&self, pattern: &str, literal: &str) -> Vec<String> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let absolute = literal.starts_with('/');
        let base = if absolute {
            String::new()
        } else {
            self.state.cwd.clone()
        };
        let display_root = if absolute { "/" } else { "" };

        // (display path, workspace path)
        let mut candidates = vec![(display_root.to_string(), base)];
        let segments: Vec<(&str, &str)> = pattern
            .split('/')
            .zip(literal.split('/'))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        let Some(last) = segments.len().checked_sub(1) else {
            return Vec::new();
        };

        for (index, (seg_pattern, seg_literal)) in segments.iter().enumerate() {
            let is_last = index == last;
            let mut next = Vec::new();

            if !has_bare_star(seg_pattern) {
                for (display, path) in candidates {
                    let Some(path) = step(&path, seg_literal) else {
                        continue;
                    };
                    next.push((join_display(&display, seg_literal), path));
                }
            } else {
                let Ok(matcher) = Pattern::new(seg_pattern) else {
                    return Vec::new();
                };
                for (display, path) in candidates {
                    let Ok(entries) = self.shell.workspace().list_dir(&path).await else {
                        continue;
                    };
                    for entry in entries {
                        if !matcher.matches_with(&entry.name, options) {
                            continue;
                        }
                        if !is_last && !entry.is_dir() {
                            continue;
                        }
                        next.push((
                            join_display(&display, &entry.name),
                            join_path(&path, &entry.name),
                        ));
                    }
                }
            }
            candidates = next;
            if candidates.is_empty() {
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        for (display, path) in candidates {
            if matches!(self.shell.workspace().stat(&path).await, Ok(Some(_))) {
                out.push(display);
            }
        }
        out.sort();
        out
    }
}

/// Whether an escaped glob segment still contains an unescaped `*`.
fn has_bare_star(segment: &str) -> bool {
    segment.replace("[*]", "").contains('*')
}

fn step(path: &str, segment: &str) -> Option<String> {
    match segment {
        "." => Some(path.to_string()),
        ".." => {
            if path.is_empty() {
                None
            } else {
                Some(path.rsplit_once('/').map_or(String::new(), |(p, _)| p.to_string()))
            }
        }
        name => Some(join_path(path, name)),
    }
}

fn join_display(display: &str, name: &str) -> String {
    if display.is_empty() || display.ends_with('/') {
        format!("{display}{name}")
    } else {
        format!("{display}/{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;

    #[test]
    fn test_is_name() {
        assert!(is_name("PATH"));
        assert!(is_name("_x1"));
        assert!(!is_name("1x"));
        assert!(!is_name(""));
        assert!(!is_name("a-b"));
    }

    fn first_word(script: &str) -> Word {
        parse(script).unwrap().sequences[0].head.commands[0].argv[0].clone()
    }

    #[test]
    fn test_split_assignment() {
        let (name, value) = split_assignment(&first_word("FOO=bar")).unwrap();
        assert_eq!(name, "FOO");
        assert_eq!(value.literal(), "bar");

        let (name, value) = split_assignment(&first_word("X=\"a b\"")).unwrap();
        assert_eq!(name, "X");
        assert_eq!(value.quote(), Quote::Double);

        let (_, value) = split_assignment(&first_word("EMPTY=")).unwrap();
        assert!(value.parts.is_empty());

        assert!(split_assignment(&first_word("'A'=b")).is_none());
        assert!(split_assignment(&first_word("1A=b")).is_none());
        assert!(split_assignment(&first_word("echo")).is_none());
    }

    #[test]
    fn test_field_splitting() {
        let mut fields = Fields::default();
        fields.push_literal("a", true);
        fields.push_split(" b  c ");
        fields.push_literal("d", true);
        let texts: Vec<_> = fields.finish().into_iter().map(|f| f.text).collect();
        assert_eq!(texts, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_quoted_empty_field_survives() {
        let mut fields = Fields::default();
        fields.push_quoted("");
        assert_eq!(fields.finish().len(), 1);

        let mut fields = Fields::default();
        fields.push_split("");
        assert!(fields.finish().is_empty());
    }

    #[test]
    fn test_quoted_star_is_escaped_in_pattern() {
        let mut fields = Fields::default();
        fields.push_quoted("*");
        fields.push_literal("*.txt", true);
        let field = fields.finish().remove(0);
        assert!(field.has_glob);
        assert_eq!(field.text, "**.txt");
        assert_eq!(field.pattern, "[*]*.txt");
    }

    #[test]
    fn test_step_and_display() {
        assert_eq!(step("a/b", "..").unwrap(), "a");
        assert_eq!(step("a", "..").unwrap(), "");
        assert!(step("", "..").is_none());
        assert_eq!(step("a", ".").unwrap(), "a");
        assert_eq!(join_display("", "x"), "x");
        assert_eq!(join_display("/", "x"), "/x");
        assert_eq!(join_display("src", "x"), "src/x");
    }
}
