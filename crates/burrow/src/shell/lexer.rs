//! Tokenizer for the restricted shell language.
//!
//! Quoting is resolved here so the expander only sees [`WordPart`]s:
//! - `'...'` is literal, no escapes
//! - `"..."` honours `\"`, `\\` and `\$`, everything else is kept verbatim
//! - a bare backslash escapes the next character (`a\ b` is one word)
//!
//! `$(...)` and `${...}` are copied raw into the enclosing part so that
//! operators and blanks inside them do not split the word.

use super::ast::{Quote, Word, WordPart};
use super::parser::ParseError;

/// Control and redirection operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `|`
    Pipe,
    /// `;`
    Semi,
    /// Line break
    Newline,
    /// `<`
    Less,
    /// `>`
    Great,
    /// `>>`
    DGreat,
    /// `2>`
    ErrGreat,
    /// `2>>`
    ErrDGreat,
    /// `2>&1`
    ErrToOut,
    /// `(`
    LParen,
    /// `)`
    RParen,
}

impl Operator {
    /// Source spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Pipe => "|",
            Operator::Semi => ";",
            Operator::Newline => "newline",
            Operator::Less => "<",
            Operator::Great => ">",
            Operator::DGreat => ">>",
            Operator::ErrGreat => "2>",
            Operator::ErrDGreat => "2>>",
            Operator::ErrToOut => "2>&1",
            Operator::LParen => "(",
            Operator::RParen => ")",
        }
    }

    /// Whether this operator introduces a redirection.
    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            Operator::Less
                | Operator::Great
                | Operator::DGreat
                | Operator::ErrGreat
                | Operator::ErrDGreat
                | Operator::ErrToOut
        )
    }
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with its quoting
    Word(Word),
    /// An operator or separator
    Operator(Operator),
}

impl Token {
    /// Overall quoting of a word token, `None` for operators.
    pub fn quote(&self) -> Quote {
        match self {
            Token::Word(word) => word.quote(),
            Token::Operator(_) => Quote::None,
        }
    }
}

/// Split a script into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        tokens: Vec::new(),
        word: None,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

/// Index of the `)` closing a `$(` whose `(` sits at `open`, skipping
/// nested parentheses and quoted text.
pub(crate) fn find_closing_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            '\\' => i += 1,
            '\'' => {
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    i += 1;
                }
            }
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
    word: Option<Vec<WordPart>>,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push_char(&mut self, c: char, quote: Quote) {
        let parts = self.word.get_or_insert_with(Vec::new);
        match parts.last_mut() {
            Some(last) if last.quote == quote => last.text.push(c),
            _ => parts.push(WordPart {
                text: c.to_string(),
                quote,
            }),
        }
    }

    fn push_str(&mut self, s: &str, quote: Quote) {
        for c in s.chars() {
            self.push_char(c, quote);
        }
    }

    /// Start a (possibly empty) part so that `''` and `""` still form a word.
    fn open_part(&mut self, quote: Quote) {
        self.word.get_or_insert_with(Vec::new).push(WordPart {
            text: String::new(),
            quote,
        });
    }

    fn finish_word(&mut self) {
        if let Some(mut parts) = self.word.take() {
            parts.retain(|p| !p.text.is_empty() || p.quote != Quote::None);
            self.tokens.push(Token::Word(Word { parts }));
        }
    }

    fn operator(&mut self, op: Operator, len: usize) {
        self.finish_word();
        self.tokens.push(Token::Operator(op));
        self.pos += len;
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.finish_word();
                    self.pos += 1;
                }
                '\n' => self.operator(Operator::Newline, 1),
                '#' if self.word.is_none() => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\'' => self.single_quoted()?,
                '"' => self.double_quoted()?,
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        None => self.push_char('\\', Quote::None),
                        Some('\n') => self.pos += 1,
                        Some(escaped) => {
                            self.push_char(escaped, Quote::Single);
                            self.pos += 1;
                        }
                    }
                }
                '$' => self.dollar(Quote::None),
                '2' if self.word.is_none() && self.peek_at(1) == Some('>') => {
                    match (self.peek_at(2), self.peek_at(3)) {
                        (Some('>'), _) => self.operator(Operator::ErrDGreat, 3),
                        (Some('&'), Some('1')) => self.operator(Operator::ErrToOut, 4),
                        (Some('&'), _) => return Err(ParseError::Unsupported("2>&".into())),
                        _ => self.operator(Operator::ErrGreat, 2),
                    }
                }
                '&' if self.peek_at(1) == Some('&') => self.operator(Operator::And, 2),
                '&' => return Err(ParseError::Unsupported("&".into())),
                '|' if self.peek_at(1) == Some('|') => self.operator(Operator::Or, 2),
                '|' => self.operator(Operator::Pipe, 1),
                '>' if self.peek_at(1) == Some('>') => self.operator(Operator::DGreat, 2),
                '>' if self.peek_at(1) == Some('&') => {
                    return Err(ParseError::Unsupported(">&".into()));
                }
                '>' => self.operator(Operator::Great, 1),
                '<' => self.operator(Operator::Less, 1),
                ';' => self.operator(Operator::Semi, 1),
                '(' => self.operator(Operator::LParen, 1),
                ')' => self.operator(Operator::RParen, 1),
                _ => {
                    self.push_char(c, Quote::None);
                    self.pos += 1;
                }
            }
        }
        self.finish_word();
        Ok(())
    }

    fn single_quoted(&mut self) -> Result<(), ParseError> {
        self.pos += 1;
        self.open_part(Quote::Single);
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedQuote('\'')),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(c) => {
                    self.push_char(c, Quote::Single);
                    self.pos += 1;
                }
            }
        }
    }

    fn double_quoted(&mut self) -> Result<(), ParseError> {
        self.pos += 1;
        self.open_part(Quote::Double);
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedQuote('"')),
                Some('"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => {
                    match self.peek_at(1) {
                        Some(c @ ('"' | '\\')) => {
                            self.push_char(c, Quote::Double);
                            self.pos += 2;
                        }
                        // `\$` keeps the dollar sign out of expansion
                        Some('$') => {
                            self.push_char('$', Quote::Single);
                            self.pos += 2;
                            self.open_part(Quote::Double);
                        }
                        _ => {
                            self.push_char('\\', Quote::Double);
                            self.pos += 1;
                        }
                    }
                }
                Some('$') => self.dollar(Quote::Double),
                Some(c) => {
                    self.push_char(c, Quote::Double);
                    self.pos += 1;
                }
            }
        }
    }

    /// Copy `$(...)` / `${...}` verbatim, or a lone `$`.
    fn dollar(&mut self, quote: Quote) {
        let end = match self.peek_at(1) {
            Some('(') => find_closing_paren(&self.chars, self.pos + 1),
            Some('{') => self.chars[self.pos..]
                .iter()
                .position(|&c| c == '}')
                .map(|i| self.pos + i),
            _ => Some(self.pos),
        };
        // Unterminated forms swallow the rest of the input; the expander
        // reports them when the word is evaluated.
        let end = end.unwrap_or(self.chars.len() - 1);
        let raw: String = self.chars[self.pos..=end].iter().collect();
        self.push_str(&raw, quote);
        self.pos = end + 1;
    }
}
