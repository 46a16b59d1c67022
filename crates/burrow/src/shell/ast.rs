//! Syntax tree for the restricted shell language.

/// How a piece of a word was quoted in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    /// Bare text: expanded, split and globbed
    None,
    /// `'...'` or a backslash escape: taken verbatim
    Single,
    /// `"..."`: expanded but never split or globbed
    Double,
}

/// A run of source text sharing one quoting style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPart {
    /// Text with quote characters and escapes already removed
    pub text: String,
    /// Quoting applied to the text
    pub quote: Quote,
}

/// One shell word, e.g. `a"$B"'c'` is three parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    /// Parts in source order
    pub parts: Vec<WordPart>,
}

impl Word {
    /// Single unquoted part.
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart {
                text: text.into(),
                quote: Quote::None,
            }],
        }
    }

    /// Quoting of the whole word: `None` only if no part was quoted,
    /// `Single` if every part was single-quoted, otherwise `Double`.
    pub fn quote(&self) -> Quote {
        if self.parts.iter().all(|p| p.quote == Quote::None) {
            Quote::None
        } else if self.parts.iter().all(|p| p.quote == Quote::Single) {
            Quote::Single
        } else {
            Quote::Double
        }
    }

    /// Whether any part carries quotes.
    pub fn is_quoted(&self) -> bool {
        self.quote() != Quote::None
    }

    /// Source-like rendering, used in diagnostics.
    pub fn literal(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}

/// A whole script: sequences separated by `;` or newlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    /// Sequences in execution order
    pub sequences: Vec<Sequence>,
}

/// Pipelines chained with `&&` / `||`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// First pipeline, always run
    pub head: Pipeline,
    /// Guarded follow-ups
    pub tail: Vec<SequenceStep>,
}

/// One guarded step of a [`Sequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    /// Guard operator
    pub op: Connector,
    /// Pipeline run when the guard passes
    pub pipeline: Pipeline,
}

/// `&&` or `||`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// Run if the previous exit code is 0
    And,
    /// Run if the previous exit code is non-zero
    Or,
}

impl Connector {
    /// Whether the next pipeline runs given the previous exit code.
    pub fn should_run(self, last_exit_code: i32) -> bool {
        match self {
            Connector::And => last_exit_code == 0,
            Connector::Or => last_exit_code != 0,
        }
    }
}

/// Commands joined by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Stages, left to right
    pub commands: Vec<Command>,
}

/// A simple command or a parenthesized subshell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Words, including leading `NAME=value` assignments
    pub argv: Vec<Word>,
    /// Redirections in source order
    pub redirs: Vec<Redir>,
    /// Body when this is `( ... )`
    pub subshell: Option<Script>,
}

/// Redirection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    /// `< path`
    In,
    /// `> path`
    Out,
    /// `>> path`
    Append,
    /// `2> path`
    Err,
    /// `2>> path`
    ErrAppend,
    /// `2>&1`
    ErrToOut,
}

/// A redirection attached to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redir {
    /// What is redirected
    pub kind: RedirKind,
    /// Target path, absent only for `2>&1`
    pub path: Option<Word>,
}
