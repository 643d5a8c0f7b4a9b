//! Parser error types

use crate::lexer::{Span, TokenKind};
use thiserror::Error;

/// A syntax error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// Optional hint for fixing the error
    pub hint: Option<String>,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// The kind of syntax error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        found: TokenKind,
        expected: ExpectedToken,
    },

    #[error("expected expression, found {0}")]
    ExpectedExpression(TokenKind),

    #[error("expected identifier, found {0}")]
    ExpectedIdentifier(TokenKind),

    #[error("expected an indented block")]
    ExpectedIndentedBlock,

    #[error("unexpected indent")]
    UnexpectedIndent,

    #[error("duplicate parameter name: {0}")]
    DuplicateParameter(String),

    #[error("parameter without a default follows parameter with a default")]
    NonDefaultAfterDefault,

    #[error("positional argument follows keyword argument")]
    PositionalAfterKeyword,

    #[error("'try' needs at least one 'except' or 'finally' clause")]
    BareTry,

    #[error("default 'except:' must be last")]
    DefaultExceptNotLast,

    #[error("'break' outside loop")]
    BreakOutsideLoop,

    #[error("'continue' not properly in loop")]
    ContinueOutsideLoop,

    #[error("'return' outside function")]
    ReturnOutsideFunction,

    #[error("'yield' outside function")]
    YieldOutsideFunction,

    #[error("nonlocal declaration not allowed at module level")]
    NonlocalAtModuleLevel,
}

/// What token was expected
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedToken {
    Token(TokenKind),
    OneOf(Vec<TokenKind>),
    Description(&'static str),
}

impl std::fmt::Display for ExpectedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedToken::Token(kind) => write!(f, "{kind}"),
            ExpectedToken::OneOf(kinds) => {
                let names: Vec<&str> = kinds.iter().map(TokenKind::describe).collect();
                write!(f, "one of {}", names.join(", "))
            }
            ExpectedToken::Description(desc) => f.write_str(desc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_expected_and_found() {
        let err = ParseError::new(
            ParseErrorKind::UnexpectedToken {
                found: TokenKind::Newline,
                expected: ExpectedToken::Token(TokenKind::Colon),
            },
            Span::new(3, 4),
        )
        .with_hint("block headers end with ':'");
        assert_eq!(
            err.to_string(),
            "expected ':', found newline (hint: block headers end with ':')"
        );
    }

    #[test]
    fn one_of_lists_every_candidate() {
        let expected = ExpectedToken::OneOf(vec![TokenKind::RParen, TokenKind::Comma]);
        assert_eq!(expected.to_string(), "one of ')', ','");
    }
}
