//! Abstract Syntax Tree (AST) for the pasmhon language
//!
//! Every node carries a [`Span`]. Nodes that open a new name scope
//! (functions, lambdas, classes and comprehensions) also carry the
//! [`ScopeId`] the parser assigned to them, which the resolver and the
//! compiler use to agree on which scope they are looking at.

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;

pub use crate::lexer::Span;

/// A trait for AST nodes that have associated source location information
pub trait Spanned {
    fn span(&self) -> Span;
}

/// Identifies one scope of a module. The module itself is always scope 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const MODULE: ScopeId = ScopeId(0);

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An identifier with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

impl Spanned for Ident {
    fn span(&self) -> Span {
        self.span
    }
}

/// A parsed source file
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
    /// Number of scopes in the module, including the module scope
    pub scope_count: u32,
    pub span: Span,
}
