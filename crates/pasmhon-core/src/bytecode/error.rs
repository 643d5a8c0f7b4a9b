//! Compile-time errors

use thiserror::Error;

use crate::lexer::Span;

/// Kind of compilation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("cannot assign to {0}")]
    InvalidAssignmentTarget(&'static str),

    #[error("cannot delete {0}")]
    InvalidDeleteTarget(&'static str),

    #[error("too many local variables (max 65535)")]
    TooManyLocals,

    #[error("too many constants in one code object (max 65535)")]
    TooManyConstants,

    #[error("too many names in one code object (max 65535)")]
    TooManyNames,

    #[error("jump distance too large")]
    JumpTooFar,

    #[error("{0}")]
    InvalidStarred(&'static str),

    #[error("too many arguments in call (max 255)")]
    TooManyArguments,

    #[error("too many items in display (max 65535)")]
    TooManyItems,
}

/// A compilation error with location
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
    pub hint: Option<String>,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
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

pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = CompileError::new(CompileErrorKind::InvalidAssignmentTarget("literal"), Span::new(0, 1));
        assert_eq!(err.to_string(), "cannot assign to literal");
        let err = err.with_hint("assign to a name instead");
        assert_eq!(err.hint.as_deref(), Some("assign to a name instead"));
    }
}
