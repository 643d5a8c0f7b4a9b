//! Statement AST nodes

use crate::lexer::Span;

use super::{BinOp, Expr, FunctionDef, Ident, ScopeId, Spanned};

/// A statement with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),

    /// `a = b = value`; each target receives the same value, left to right
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },

    /// `x += 1`
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },

    Pass,

    /// `elif` chains nest as a single `If` in `orelse`
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    While {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    FunctionDef(Box<FunctionDef>),

    ClassDef(Box<ClassDef>),

    Try(Box<TryStmt>),

    With {
        context: Expr,
        name: Option<Ident>,
        body: Vec<Stmt>,
    },

    /// `import a, b as c`
    Import(Vec<Alias>),

    /// `from m import a, b as c`
    ImportFrom {
        module: Ident,
        names: Vec<Alias>,
    },

    Return(Option<Expr>),

    Break,

    Continue,

    /// `raise` with no operand re-raises the exception being handled
    Raise(Option<Expr>),

    Global(Vec<Ident>),

    Nonlocal(Vec<Ident>),

    Del(Vec<Expr>),

    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: Ident,
    pub base: Option<Expr>,
    pub body: Vec<Stmt>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<Stmt>,
    pub finalbody: Vec<Stmt>,
}

/// `except [kind [as name]]:`
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<Ident>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `name [as asname]` in an import
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: Ident,
    pub asname: Option<Ident>,
}

impl Alias {
    /// The name bound in the importing scope
    #[must_use]
    pub fn bound_name(&self) -> &Ident {
        self.asname.as_ref().unwrap_or(&self.name)
    }
}
