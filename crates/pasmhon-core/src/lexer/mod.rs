//! Lexer for the pasmhon language
//!
//! Raw tokens come from a logos-derived scanner; this module layers the
//! off-side rule on top of them:
//! - bracket nesting suppresses newlines and indentation
//! - leading whitespace of each logical line becomes `Indent`/`Dedent`
//! - blank and comment-only lines vanish
//! - string escapes are decoded and numeric literals range-checked

mod span;
mod token;

pub use span::{LineIndex, Location, Span};
pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// A token with its kind, span, position and text.
///
/// For string tokens `lexeme` holds the decoded contents rather than the
/// quoted source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub location: Location,
    pub lexeme: String,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, location: Location, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            location,
            lexeme: lexeme.into(),
        }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq, Default)]
pub enum LexError {
    #[default]
    #[error("unexpected character")]
    UnexpectedChar,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("malformed number literal")]
    MalformedNumber,
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
    #[error("inconsistent use of tabs and spaces in indentation")]
    MixedIndentation,
    #[error("unindent does not match any outer indentation level")]
    InconsistentDedent,
    #[error("unbalanced bracket")]
    UnbalancedBracket,
}

/// A lexer error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedError {
    pub error: LexError,
    pub span: Span,
    pub location: Location,
}

impl std::fmt::Display for SpannedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.error)
    }
}

impl std::error::Error for SpannedError {}

/// The pasmhon lexer
pub struct Lexer<'source> {
    source: &'source str,
    index: LineIndex,
    tokens: Vec<Token>,
    errors: Vec<SpannedError>,
    /// Leading whitespace of each open block, outermost first
    indents: Vec<&'source str>,
    /// Open brackets, innermost last
    brackets: Vec<(TokenKind, Span)>,
    at_line_start: bool,
}

impl<'source> Lexer<'source> {
    #[must_use]
    pub fn new(source: &'source str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
            tokens: Vec::new(),
            errors: Vec::new(),
            indents: vec![""],
            brackets: Vec::new(),
            at_line_start: true,
        }
    }

    /// Tokenize the entire source, returning all tokens and any errors.
    ///
    /// The token vector always ends with `Eof`, even when errors were found.
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<SpannedError>) {
        let mut lexer = Lexer::new(source);
        lexer.run();
        (lexer.tokens, lexer.errors)
    }

    fn run(&mut self) {
        let mut raw = TokenKind::lexer(self.source);
        while let Some(result) = raw.next() {
            let span = Span::from_range(raw.span());
            match result {
                Ok(TokenKind::Newline) => self.newline(span),
                Ok(kind) => self.token(kind, span, raw.slice()),
                Err(error) => self.error(error, span),
            }
        }
        self.finish();
    }

    fn location(&self, offset: u32) -> Location {
        self.index.location(self.source, offset)
    }

    fn error(&mut self, error: LexError, span: Span) {
        let location = self.location(span.start);
        self.errors.push(SpannedError { error, span, location });
    }

    fn push(&mut self, kind: TokenKind, span: Span, lexeme: impl Into<String>) {
        let location = self.location(span.start);
        self.tokens.push(Token::new(kind, span, location, lexeme));
    }

    fn newline(&mut self, span: Span) {
        if !self.brackets.is_empty() {
            return;
        }
        let continues_line = self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent));
        if continues_line {
            self.push(TokenKind::Newline, span, "\n");
        }
        self.at_line_start = true;
    }

    fn token(&mut self, kind: TokenKind, span: Span, slice: &'source str) {
        if self.at_line_start && self.brackets.is_empty() {
            self.at_line_start = false;
            self.indentation(span);
        }

        if kind.is_open_bracket() {
            self.brackets.push((kind, span));
        } else if kind.is_close_bracket() {
            let matches = self.brackets.last().is_some_and(|(open, _)| {
                matches!(
                    (open, kind),
                    (TokenKind::LParen, TokenKind::RParen)
                        | (TokenKind::LBracket, TokenKind::RBracket)
                        | (TokenKind::LBrace, TokenKind::RBrace)
                )
            });
            if matches {
                self.brackets.pop();
            } else {
                self.error(LexError::UnbalancedBracket, span);
            }
        }

        match kind {
            TokenKind::String => match unescape(&slice[1..slice.len() - 1]) {
                Ok(text) => self.push(kind, span, text),
                Err(error) => self.error(error, span),
            },
            TokenKind::TripleString => match unescape(&slice[3..slice.len() - 3]) {
                Ok(text) => self.push(kind, span, text),
                Err(error) => self.error(error, span),
            },
            _ if kind.is_number() => {
                if self.follows_number(kind, span) {
                    self.extend_malformed(span);
                } else if parse_number(kind, slice).is_none() {
                    self.error(LexError::MalformedNumber, span);
                } else {
                    self.push(kind, span, slice);
                }
            }
            TokenKind::Ident | TokenKind::Dot if self.follows_number(kind, span) => {
                self.extend_malformed(span);
            }
            _ => self.push(kind, span, slice),
        }
    }

    /// True when `kind` at `span` glues onto a preceding number literal,
    /// as in `12abc`, `0x` or `1.2.3`.
    fn follows_number(&self, kind: TokenKind, span: Span) -> bool {
        let glued_to_error = self
            .errors
            .last()
            .is_some_and(|e| e.error == LexError::MalformedNumber && e.span.end == span.start);
        if glued_to_error {
            return true;
        }
        let Some(prev) = self.tokens.last() else {
            return false;
        };
        if prev.span.end != span.start {
            return false;
        }
        match kind {
            TokenKind::Ident => prev.kind.is_number(),
            TokenKind::Dot => prev.kind == TokenKind::Float,
            _ => prev.kind.is_number() || prev.kind == TokenKind::Dot && self.dot_after_float(),
        }
    }

    fn dot_after_float(&self) -> bool {
        let n = self.tokens.len();
        n >= 2 && {
            let dot = &self.tokens[n - 1];
            let before = &self.tokens[n - 2];
            before.kind == TokenKind::Float && before.span.end == dot.span.start
        }
    }

    /// Replace the number token (and a trailing dot) with a single error.
    fn extend_malformed(&mut self, span: Span) {
        let mut start = span.start;
        while let Some(prev) = self.tokens.last() {
            if prev.span.end != start || !(prev.kind.is_number() || prev.kind == TokenKind::Dot) {
                break;
            }
            start = prev.span.start;
            self.tokens.pop();
        }
        // Collapse into any malformed-number error that ends right here.
        if let Some(last) = self.errors.last_mut() {
            if last.error == LexError::MalformedNumber && last.span.end == start {
                last.span.end = span.end;
                return;
            }
        }
        self.error(LexError::MalformedNumber, Span::new(start, span.end));
    }

    fn indentation(&mut self, span: Span) {
        let line_start = self.source[..span.start as usize].rfind('\n').map_or(0, |i| i + 1);
        let ws = &self.source[line_start..span.start as usize];
        let marker = Span::new(line_start as u32, span.start);

        if ws.contains(' ') && ws.contains('\t') {
            self.error(LexError::MixedIndentation, marker);
            return;
        }

        let top = self.indents.last().copied().unwrap_or("");
        if ws == top {
            return;
        }
        if ws.starts_with(top) {
            self.indents.push(ws);
            self.push(TokenKind::Indent, marker, "");
            return;
        }
        if !top.starts_with(ws) {
            self.error(LexError::MixedIndentation, marker);
            return;
        }
        while self.indents.last().is_some_and(|level| level.len() > ws.len()) {
            self.indents.pop();
            self.push(TokenKind::Dedent, span.start_point(), "");
        }
        if self.indents.last().copied().unwrap_or("") != ws {
            self.error(LexError::InconsistentDedent, marker);
        }
    }

    fn finish(&mut self) {
        let end = Span::new(self.source.len() as u32, self.source.len() as u32);
        while let Some((_, span)) = self.brackets.pop() {
            self.error(LexError::UnbalancedBracket, span);
        }
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Dedent))
        {
            self.push(TokenKind::Newline, end, "");
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end, "");
        }
        self.push(TokenKind::Eof, end, "");
    }
}

/// Decode the escape sequences in a string literal body
pub fn unescape(body: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(other) => return Err(LexError::InvalidEscape(other)),
            None => return Err(LexError::UnterminatedString),
        }
    }
    Ok(out)
}

/// A decoded numeric literal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// Parse the source text of a numeric token. `None` means malformed or out
/// of range.
#[must_use]
pub fn parse_number(kind: TokenKind, text: &str) -> Option<Number> {
    let digits: String = text.chars().filter(|&c| c != '_').collect();
    let radix = match kind {
        TokenKind::Int => 10,
        TokenKind::HexInt => 16,
        TokenKind::BinaryInt => 2,
        TokenKind::OctalInt => 8,
        TokenKind::Float => return digits.parse().ok().map(Number::Float),
        _ => return None,
    };
    let body = if radix == 10 { &digits[..] } else { digits.get(2..)? };
    i64::from_str_radix(body, radix).ok().map(Number::Int)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::tokenize(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn first_error(source: &str) -> LexError {
        let (_, errors) = Lexer::tokenize(source);
        errors.into_iter().next().expect("expected a lex error").error
    }

    use TokenKind as K;

    #[test]
    fn simple_statement() {
        assert_eq!(
            kinds("x = 1"),
            vec![K::Ident, K::Eq, K::Int, K::Newline, K::Eof]
        );
    }

    #[test]
    fn indent_and_dedent() {
        let src = "if x:\n    y = 1\n    if z:\n        w\nv\n";
        assert_eq!(
            kinds(src),
            vec![
                K::If, K::Ident, K::Colon, K::Newline,
                K::Indent, K::Ident, K::Eq, K::Int, K::Newline,
                K::If, K::Ident, K::Colon, K::Newline,
                K::Indent, K::Ident, K::Newline,
                K::Dedent, K::Dedent, K::Ident, K::Newline,
                K::Eof,
            ]
        );
    }

    #[test]
    fn pending_dedents_at_eof() {
        let src = "def f():\n  return 1";
        let kinds = kinds(src);
        assert_eq!(&kinds[kinds.len() - 3..], &[K::Newline, K::Dedent, K::Eof]);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let src = "a\n\n   # note\n\t\nb\n";
        assert_eq!(kinds(src), vec![K::Ident, K::Newline, K::Ident, K::Newline, K::Eof]);
    }

    #[test]
    fn brackets_suppress_layout() {
        let src = "x = (1,\n        2)\ny";
        assert_eq!(
            kinds(src),
            vec![
                K::Ident, K::Eq, K::LParen, K::Int, K::Comma, K::Int, K::RParen, K::Newline,
                K::Ident, K::Newline, K::Eof,
            ]
        );
    }

    #[test]
    fn inconsistent_dedent() {
        assert_eq!(
            first_error("if x:\n    a\n  b\n"),
            LexError::InconsistentDedent
        );
    }

    #[test]
    fn mixed_indentation() {
        assert_eq!(first_error("if x:\n \ta\n"), LexError::MixedIndentation);
        assert_eq!(
            first_error("if x:\n    a\n\tb\n"),
            LexError::MixedIndentation
        );
    }

    #[test]
    fn unbalanced_brackets() {
        assert_eq!(first_error("f(1]"), LexError::UnbalancedBracket);
        assert_eq!(first_error("[1, 2"), LexError::UnbalancedBracket);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let (tokens, errors) = Lexer::tokenize(r#"'a\tb\n' "q\"\\""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].lexeme, "a\tb\n");
        assert_eq!(tokens[1].lexeme, "q\"\\");
    }

    #[test]
    fn invalid_escape() {
        assert_eq!(first_error(r"'\q'"), LexError::InvalidEscape('q'));
    }

    #[test]
    fn malformed_numbers() {
        assert_eq!(first_error("12abc"), LexError::MalformedNumber);
        assert_eq!(first_error("1.2.3"), LexError::MalformedNumber);
        assert_eq!(first_error("0x"), LexError::MalformedNumber);
        assert_eq!(first_error("99999999999999999999"), LexError::MalformedNumber);
    }

    #[test]
    fn malformed_number_reports_one_error() {
        let (_, errors) = Lexer::tokenize("x = 1.2.3\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span::new(4, 9));
    }

    #[test]
    fn number_values() {
        assert_eq!(parse_number(K::Int, "1_000"), Some(Number::Int(1000)));
        assert_eq!(parse_number(K::HexInt, "0xFF"), Some(Number::Int(255)));
        assert_eq!(parse_number(K::BinaryInt, "0b101"), Some(Number::Int(5)));
        assert_eq!(parse_number(K::OctalInt, "0o17"), Some(Number::Int(15)));
        assert_eq!(parse_number(K::Float, "2.5e1"), Some(Number::Float(25.0)));
    }

    #[test]
    fn tokens_carry_line_and_column() {
        let (tokens, _) = Lexer::tokenize("a\n  \nfoo = 2");
        let foo = tokens.iter().find(|t| t.lexeme == "foo").unwrap();
        assert_eq!(foo.location, Location::new(3, 1));
        let two = tokens.iter().find(|t| t.lexeme == "2").unwrap();
        assert_eq!(two.location, Location::new(3, 7));
    }

    #[test]
    fn line_continuation() {
        assert_eq!(
            kinds("x = 1 + \\\n    2\n"),
            vec![K::Ident, K::Eq, K::Int, K::Plus, K::Int, K::Newline, K::Eof]
        );
    }

    #[test]
    fn triple_quoted_block() {
        let (tokens, errors) = Lexer::tokenize("\"\"\"doc\nmore\"\"\"\nx\n");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, K::TripleString);
        assert_eq!(tokens[0].lexeme, "doc\nmore");
        assert_eq!(tokens[1].kind, K::Newline);
    }
}
