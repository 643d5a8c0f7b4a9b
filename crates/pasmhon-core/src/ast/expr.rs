//! Expression AST nodes

use crate::lexer::Span;

use super::{Ident, ScopeId, Spanned, Stmt};

/// Binary arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    /// Binding power, higher binds tighter
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            BinOp::BitOr => 1,
            BinOp::BitXor => 2,
            BinOp::BitAnd => 3,
            BinOp::LShift | BinOp::RShift => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => 6,
            BinOp::Pow => 8,
        }
    }

    #[must_use]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, BinOp::Pow)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }
}

/// Comparison operators; these chain (`a < b < c`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

impl UnaryOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "~",
        }
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

/// An expression with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    #[must_use]
    pub fn literal(lit: Literal, span: Span) -> Self {
        Self::new(ExprKind::Literal(lit), span)
    }

    #[must_use]
    pub fn name(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Name(name.into()), span)
    }

    /// Whether this expression may appear as an assignment target
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        match &self.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => true,
            ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().all(|item| match &item.kind {
                ExprKind::Starred(inner) => inner.is_assignable(),
                _ => item.is_assignable(),
            }),
            _ => false,
        }
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of expression (without source location)
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),

    Name(String),

    List(Vec<Expr>),

    Tuple(Vec<Expr>),

    Dict(Vec<(Expr, Expr)>),

    /// `*expr` inside a display, call or assignment target
    Starred(Box<Expr>),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Short-circuiting `and` / `or`
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `a < b <= c` keeps every operator and operand in order
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },

    /// `then if cond else otherwise`
    IfExp {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },

    Attribute {
        object: Box<Expr>,
        name: Ident,
    },

    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    /// `lower:upper:step`, only valid inside a subscript
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },

    Lambda(Box<Lambda>),

    ListComp(Box<Comprehension>),

    DictComp(Box<Comprehension>),

    GeneratorExp(Box<Comprehension>),

    Yield(Option<Box<Expr>>),
}

/// A call argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Keyword(Ident, Expr),
    /// `*seq`
    Star(Expr),
    /// `**map`
    DoubleStar(Expr),
}

impl Arg {
    #[must_use]
    pub fn value(&self) -> &Expr {
        match self {
            Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => e,
        }
    }
}

/// A parameter with an optional default
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub default: Option<Expr>,
}

/// The parameter list of a function or lambda
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    pub positional: Vec<Param>,
    pub vararg: Option<Ident>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<Ident>,
}

impl Parameters {
    /// All parameter names in slot order: positional, keyword-only,
    /// `*args`, `**kwargs`.
    pub fn names(&self) -> impl Iterator<Item = &Ident> {
        self.positional
            .iter()
            .map(|p| &p.name)
            .chain(self.kwonly.iter().map(|p| &p.name))
            .chain(self.vararg.iter())
            .chain(self.kwarg.iter())
    }

    /// Default expressions, positional defaults first
    pub fn defaults(&self) -> impl Iterator<Item = &Expr> {
        self.positional
            .iter()
            .chain(self.kwonly.iter())
            .filter_map(|p| p.default.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Parameters,
    pub body: Expr,
    pub scope: ScopeId,
}

/// One `for target in iter if cond...` clause
#[derive(Debug, Clone, PartialEq)]
pub struct ComprehensionFor {
    pub target: Expr,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

/// A list/dict comprehension or generator expression.
///
/// For dict comprehensions `element` is the key and `value` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub element: Expr,
    pub value: Option<Expr>,
    pub generators: Vec<ComprehensionFor>,
    pub scope: ScopeId,
}

/// Function definition shared by `def` statements
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Ident,
    pub params: Parameters,
    pub body: Vec<Stmt>,
    pub scope: ScopeId,
}
