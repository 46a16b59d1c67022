//! Recursive-descent parser.
//!
//! ```text
//! Script   → Sequence (Sep Sequence)*
//! Sequence → Pipeline (("&&" | "||") Pipeline)*
//! Pipeline → Command ("|" Command)*
//! Command  → Word+ Redir* | "(" Script ")" Redir*
//! ```
//!
//! A parse either succeeds for the whole input or fails before anything
//! runs.

use thiserror::Error;

use super::ast::{
    Command, Connector, Pipeline, Redir, RedirKind, Script, Sequence, SequenceStep, Word,
};
use super::lexer::{Operator, Token, tokenize};

/// Malformed script
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A quote was opened but never closed
    #[error("syntax error: unterminated {0} quote")]
    UnterminatedQuote(char),
    /// An operator appeared where it is not allowed
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(String),
    /// Input ended in the middle of a construct
    #[error("syntax error: unexpected end of input after `{0}'")]
    UnexpectedEnd(String),
    /// A redirection operator without its path word
    #[error("syntax error: `{0}' requires a target path")]
    MissingRedirectTarget(String),
    /// Redirections with no command word, or `()`
    #[error("syntax error: empty command")]
    EmptyCommand,
    /// Syntax outside the supported subset
    #[error("syntax error: unsupported operator `{0}'")]
    Unsupported(String),
}

/// Parse a script.
pub fn parse(input: &str) -> Result<Script, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let script = parser.script(false)?;
    match parser.peek() {
        None => Ok(script),
        Some(token) => Err(unexpected(token)),
    }
}

fn unexpected(token: &Token) -> ParseError {
    match token {
        Token::Operator(op) => ParseError::UnexpectedToken(op.as_str().to_string()),
        Token::Word(word) => ParseError::UnexpectedToken(word.literal()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<Operator> {
        match self.peek() {
            Some(Token::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_op() == Some(Operator::Newline) {
            self.pos += 1;
        }
    }

    fn at_script_end(&self, nested: bool) -> bool {
        match self.peek_op() {
            Some(Operator::RParen) => nested,
            _ => self.peek().is_none(),
        }
    }

    fn script(&mut self, nested: bool) -> Result<Script, ParseError> {
        let mut sequences = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_script_end(nested) {
                break;
            }
            sequences.push(self.sequence()?);

            match self.peek_op() {
                Some(Operator::Semi) | Some(Operator::Newline) => self.pos += 1,
                _ if self.at_script_end(nested) => break,
                _ => return Err(self.peek().map_or(ParseError::EmptyCommand, unexpected)),
            }
        }
        Ok(Script { sequences })
    }

    fn sequence(&mut self) -> Result<Sequence, ParseError> {
        let head = self.pipeline()?;
        let mut tail = Vec::new();
        while let Some(op @ (Operator::And | Operator::Or)) = self.peek_op() {
            self.pos += 1;
            self.skip_newlines();
            if self.peek().is_none() {
                return Err(ParseError::UnexpectedEnd(op.as_str().to_string()));
            }
            let connector = if op == Operator::And {
                Connector::And
            } else {
                Connector::Or
            };
            tail.push(SequenceStep {
                op: connector,
                pipeline: self.pipeline()?,
            });
        }
        Ok(Sequence { head, tail })
    }

    fn pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let mut commands = vec![self.command()?];
        while self.peek_op() == Some(Operator::Pipe) {
            self.pos += 1;
            self.skip_newlines();
            if self.peek().is_none() {
                return Err(ParseError::UnexpectedEnd("|".to_string()));
            }
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, ParseError> {
        let mut command = Command::default();

        if self.peek_op() == Some(Operator::LParen) {
            self.pos += 1;
            let body = self.script(true)?;
            if self.peek_op() != Some(Operator::RParen) {
                return Err(ParseError::UnexpectedEnd("(".to_string()));
            }
            self.pos += 1;
            if body.sequences.is_empty() {
                return Err(ParseError::EmptyCommand);
            }
            command.subshell = Some(body);
            while let Some(op) = self.peek_op().filter(|op| op.is_redirect()) {
                self.pos += 1;
                command.redirs.push(self.redirect(op)?);
            }
            if let Some(Token::Word(word)) = self.peek() {
                return Err(ParseError::UnexpectedToken(word.literal()));
            }
            return Ok(command);
        }

        loop {
            match self.peek() {
                Some(Token::Word(word)) => {
                    command.argv.push(word.clone());
                    self.pos += 1;
                }
                Some(Token::Operator(op)) if op.is_redirect() => {
                    let op = *op;
                    self.pos += 1;
                    command.redirs.push(self.redirect(op)?);
                }
                _ => break,
            }
        }

        if command.argv.is_empty() {
            return Err(if !command.redirs.is_empty() {
                ParseError::EmptyCommand
            } else {
                match self.peek() {
                    Some(token) => unexpected(token),
                    None => ParseError::EmptyCommand,
                }
            });
        }
        Ok(command)
    }

    fn redirect(&mut self, op: Operator) -> Result<Redir, ParseError> {
        let kind = match op {
            Operator::Less => RedirKind::In,
            Operator::Great => RedirKind::Out,
            Operator::DGreat => RedirKind::Append,
            Operator::ErrGreat => RedirKind::Err,
            Operator::ErrDGreat => RedirKind::ErrAppend,
            _ => {
                return Ok(Redir {
                    kind: RedirKind::ErrToOut,
                    path: None,
                });
            }
        };
        match self.peek() {
            Some(Token::Word(word)) => {
                let path: Word = word.clone();
                self.pos += 1;
                Ok(Redir {
                    kind,
                    path: Some(path),
                })
            }
            _ => Err(ParseError::MissingRedirectTarget(op.as_str().to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn argv(command: &Command) -> Vec<String> {
        command.argv.iter().map(Word::literal).collect()
    }

    #[test]
    fn test_parse_pipeline_and_sequence() {
        let script = parse("echo hi | grep hi && echo ok || echo no; pwd").unwrap();
        assert_eq!(script.sequences.len(), 2);

        let first = &script.sequences[0];
        assert_eq!(first.head.commands.len(), 2);
        assert_eq!(argv(&first.head.commands[1]), ["grep", "hi"]);
        assert_eq!(first.tail.len(), 2);
        assert_eq!(first.tail[0].op, Connector::And);
        assert_eq!(first.tail[1].op, Connector::Or);

        assert_eq!(argv(&script.sequences[1].head.commands[0]), ["pwd"]);
    }

    #[test]
    fn test_parse_newlines_as_separators() {
        let script = parse("\n\necho a\n\necho b\n").unwrap();
        assert_eq!(script.sequences.len(), 2);
    }

    #[test]
    fn test_parse_empty_script() {
        assert!(parse("").unwrap().sequences.is_empty());
        assert!(parse("  # only a comment").unwrap().sequences.is_empty());
    }

    #[test]
    fn test_parse_trailing_semicolon_is_allowed() {
        assert_eq!(parse("echo a;").unwrap().sequences.len(), 1);
    }

    #[test]
    fn test_parse_redirections_in_order() {
        let script = parse("cmd > out.txt 2>&1 < in.txt 2>> err.log").unwrap();
        let command = &script.sequences[0].head.commands[0];
        let kinds: Vec<_> = command.redirs.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [
                RedirKind::Out,
                RedirKind::ErrToOut,
                RedirKind::In,
                RedirKind::ErrAppend
            ]
        );
        assert_eq!(command.redirs[0].path.as_ref().unwrap().literal(), "out.txt");
        assert!(command.redirs[1].path.is_none());
    }

    #[test]
    fn test_parse_subshell() {
        let script = parse("(cd src; ls) > listing.txt | cat").unwrap();
        let pipeline = &script.sequences[0].head;
        assert_eq!(pipeline.commands.len(), 2);
        let sub = pipeline.commands[0].subshell.as_ref().unwrap();
        assert_eq!(sub.sequences.len(), 2);
        assert_eq!(pipeline.commands[0].redirs.len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("| echo"), Err(ParseError::UnexpectedToken("|".into())));
        assert_eq!(parse("echo a |"), Err(ParseError::UnexpectedEnd("|".into())));
        assert_eq!(parse("echo a &&"), Err(ParseError::UnexpectedEnd("&&".into())));
        assert_eq!(parse("echo a ;; echo b"), Err(ParseError::UnexpectedToken(";".into())));
        assert_eq!(parse("echo a | | b"), Err(ParseError::UnexpectedToken("|".into())));
        assert_eq!(parse("> out.txt"), Err(ParseError::EmptyCommand));
        assert_eq!(
            parse("echo >"),
            Err(ParseError::MissingRedirectTarget(">".into()))
        );
        assert_eq!(
            parse("echo > | cat"),
            Err(ParseError::MissingRedirectTarget(">".into()))
        );
        assert_eq!(parse("(echo a"), Err(ParseError::UnexpectedEnd("(".into())));
        assert_eq!(parse("()"), Err(ParseError::EmptyCommand));
        assert_eq!(parse("echo a )"), Err(ParseError::UnexpectedToken(")".into())));
        assert_eq!(parse("; echo"), Err(ParseError::UnexpectedToken(";".into())));
    }

    #[test]
    fn test_parse_continuation_after_operator() {
        let script = parse("echo a |\n  cat &&\n echo b").unwrap();
        assert_eq!(script.sequences.len(), 1);
        assert_eq!(script.sequences[0].head.commands.len(), 2);
        assert_eq!(script.sequences[0].tail.len(), 1);
    }
}
