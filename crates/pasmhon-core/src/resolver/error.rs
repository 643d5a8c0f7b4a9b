//! Name resolution errors

use thiserror::Error;

use crate::lexer::Span;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveErrorKind {
    #[error("no binding for nonlocal '{0}' found")]
    NonlocalNotFound(String),

    #[error("nonlocal declaration not allowed at module level")]
    NonlocalAtModuleLevel,

    #[error("name '{0}' is nonlocal and global")]
    GlobalAndNonlocal(String),

    #[error("name '{0}' is used prior to global declaration")]
    GlobalAfterUse(String),

    #[error("name '{0}' is used prior to nonlocal declaration")]
    NonlocalAfterUse(String),

    #[error("name '{0}' is parameter and global")]
    ParameterGlobal(String),

    #[error("name '{0}' is parameter and nonlocal")]
    ParameterNonlocal(String),
}

/// A compile-time name resolution error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct ResolveError {
    pub kind: ResolveErrorKind,
    pub span: Span,
}

impl ResolveError {
    #[must_use]
    pub fn new(kind: ResolveErrorKind, span: Span) -> Self {
        Self { kind, span }
    }
}
