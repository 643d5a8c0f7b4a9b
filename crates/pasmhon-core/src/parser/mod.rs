//! Parser for the pasmhon language
//!
//! Statements are parsed by recursive descent over the layout tokens the
//! lexer produces (`Newline`, `Indent`, `Dedent`). Binary operators from
//! `|` down to `* / // %` go through a precedence-climbing loop; the
//! levels above (`lambda`, conditional, boolean ops, comparisons) and below
//! (unary, `**`, postfix) have their own functions.
//!
//! Errors do not stop the parse: each one is recorded, the parser skips to
//! the next statement boundary and carries on, so a single run reports
//! every syntax error in the file.
//!
//! # Example
//!
//! ```
//! use pasmhon_core::parser::Parser;
//!
//! let module = Parser::parse_source("def add(a, b=1):\n    return a + b\n").unwrap();
//! assert_eq!(module.body.len(), 1);
//! ```

mod error;

pub use error::{ExpectedToken, ParseError, ParseErrorKind};

use crate::ast::{
    Alias, Arg, BinOp, BoolOp, ClassDef, CmpOp, Comprehension, ComprehensionFor, ExceptHandler,
    Expr, ExprKind, FunctionDef, Ident, Lambda, Literal, Module, Param, Parameters, ScopeId, Stmt,
    StmtKind, TryStmt, UnaryOp,
};
use crate::lexer::{parse_number, Lexer, Number, Span, Token, TokenKind};

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// What the enclosing code allows; saved and restored around nested bodies
#[derive(Debug, Clone, Copy, Default)]
struct Context {
    in_function: bool,
    loop_depth: u32,
    at_module: bool,
}

/// The pasmhon parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    errors: Vec<ParseError>,
    context: Context,
    next_scope: u32,
}

impl Parser {
    /// Create a parser over a token stream ending in `Eof`
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            errors: Vec::new(),
            context: Context {
                at_module: true,
                ..Context::default()
            },
            next_scope: ScopeId::MODULE.0 + 1,
        }
    }

    /// Parse a whole token stream into a module
    pub fn parse_module(tokens: Vec<Token>) -> Result<Module, Vec<ParseError>> {
        let mut parser = Parser::new(tokens);
        let module = parser.module();
        if parser.errors.is_empty() {
            Ok(module)
        } else {
            Err(parser.errors)
        }
    }

    /// Lex and parse `source`. Lex errors are reported as syntax errors
    /// at the offending span; the compiler front end reports them
    /// separately instead.
    pub fn parse_source(source: &str) -> Result<Module, Vec<ParseError>> {
        let (tokens, lex_errors) = Lexer::tokenize(source);
        if !lex_errors.is_empty() {
            return Err(lex_errors
                .into_iter()
                .map(|e| {
                    ParseError::new(
                        ParseErrorKind::UnexpectedToken {
                            found: TokenKind::Eof,
                            expected: ExpectedToken::Description("valid token"),
                        },
                        e.span,
                    )
                    .with_hint(e.error.to_string())
                })
                .collect());
        }
        Self::parse_module(tokens)
    }

    // ==================== Token Management ====================

    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.position + 1)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn is_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    /// End offset of the most recently consumed token
    fn previous_end(&self) -> u32 {
        self.position
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(0, |t| t.span.end)
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.previous_end().max(start))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.current_kind())
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(ExpectedToken::Token(kind)))
        }
    }

    fn unexpected(&self, expected: ExpectedToken) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                found: self.current_kind(),
                expected,
            },
            self.current().span,
        )
    }

    fn expect_ident(&mut self) -> ParseResult<Ident> {
        let token = self.current();
        if token.kind == TokenKind::Ident {
            let ident = Ident::new(token.lexeme.clone(), token.span);
            self.advance();
            Ok(ident)
        } else {
            Err(ParseError::new(
                ParseErrorKind::ExpectedIdentifier(token.kind),
                token.span,
            ))
        }
    }

    fn error(&mut self, error: ParseError) {
        self.errors.push(error);
    }

    fn new_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        id
    }

    /// Run `f` with a fresh context, restoring the current one afterwards
    fn nested<T>(&mut self, context: Context, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.context, context);
        let result = f(self);
        self.context = saved;
        result
    }

    // ==================== Statements ====================

    fn module(&mut self) -> Module {
        let mut body = Vec::new();
        while !self.is_eof() {
            if self.check(TokenKind::Indent) || self.check(TokenKind::Dedent) {
                let token = self.advance();
                self.error(ParseError::new(ParseErrorKind::UnexpectedIndent, token.span));
                self.synchronize();
                continue;
            }
            self.statement_into(&mut body);
        }
        Module {
            body,
            scope_count: self.next_scope,
            span: Span::new(0, self.previous_end()),
        }
    }

    /// Parse one statement line (possibly several `;`-separated simple
    /// statements) and append it to `body`, recovering on error.
    fn statement_into(&mut self, body: &mut Vec<Stmt>) {
        match self.statement() {
            Ok(stmts) => body.extend(stmts),
            Err(e) => {
                self.error(e);
                self.synchronize();
            }
        }
    }

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let stmt = match self.current_kind() {
            TokenKind::If => self.if_stmt()?,
            TokenKind::While => self.while_stmt()?,
            TokenKind::For => self.for_stmt()?,
            TokenKind::Def => self.def_stmt()?,
            TokenKind::Class => self.class_stmt()?,
            TokenKind::Try => self.try_stmt()?,
            TokenKind::With => self.with_stmt()?,
            _ => return self.simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat(TokenKind::Semicolon).is_some() {
            if self.check(TokenKind::Newline) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        self.end_of_line()?;
        Ok(stmts)
    }

    fn end_of_line(&mut self) -> ParseResult<()> {
        if self.eat(TokenKind::Newline).is_some() || self.is_eof() {
            Ok(())
        } else {
            Err(self.unexpected(ExpectedToken::Token(TokenKind::Newline)))
        }
    }

    fn simple_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current().span.start;
        let kind = match self.current_kind() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                let token = self.advance();
                if self.context.loop_depth == 0 {
                    self.error(ParseError::new(ParseErrorKind::BreakOutsideLoop, token.span));
                }
                StmtKind::Break
            }
            TokenKind::Continue => {
                let token = self.advance();
                if self.context.loop_depth == 0 {
                    self.error(ParseError::new(ParseErrorKind::ContinueOutsideLoop, token.span));
                }
                StmtKind::Continue
            }
            TokenKind::Return => {
                let token = self.advance();
                if !self.context.in_function {
                    self.error(ParseError::new(ParseErrorKind::ReturnOutsideFunction, token.span));
                }
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression_list()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::Raise => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression()?)
                };
                StmtKind::Raise(value)
            }
            TokenKind::Global => {
                self.advance();
                StmtKind::Global(self.name_list()?)
            }
            TokenKind::Nonlocal => {
                let token = self.advance();
                if self.context.at_module {
                    self.error(ParseError::new(ParseErrorKind::NonlocalAtModuleLevel, token.span));
                }
                StmtKind::Nonlocal(self.name_list()?)
            }
            TokenKind::Del => {
                self.advance();
                let mut targets = vec![self.bitor_expr()?];
                while self.eat(TokenKind::Comma).is_some() {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.bitor_expr()?);
                }
                StmtKind::Del(targets)
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.expression()?;
                let msg = if self.eat(TokenKind::Comma).is_some() {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Import => {
                self.advance();
                let mut names = vec![self.alias()?];
                while self.eat(TokenKind::Comma).is_some() {
                    names.push(self.alias()?);
                }
                StmtKind::Import(names)
            }
            TokenKind::From => {
                self.advance();
                let module = self.expect_ident()?;
                self.expect(TokenKind::Import)?;
                let parenthesized = self.eat(TokenKind::LParen).is_some();
                let mut names = vec![self.alias()?];
                while self.eat(TokenKind::Comma).is_some() {
                    if parenthesized && self.check(TokenKind::RParen) {
                        break;
                    }
                    names.push(self.alias()?);
                }
                if parenthesized {
                    self.expect(TokenKind::RParen)?;
                }
                StmtKind::ImportFrom { module, names }
            }
            _ => return self.expression_statement(),
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    fn at_statement_end(&self) -> bool {
        self.check_any(&[TokenKind::Newline, TokenKind::Semicolon, TokenKind::Eof])
    }

    fn name_list(&mut self) -> ParseResult<Vec<Ident>> {
        let mut names = vec![self.expect_ident()?];
        while self.eat(TokenKind::Comma).is_some() {
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    fn alias(&mut self) -> ParseResult<Alias> {
        let name = self.expect_ident()?;
        let asname = if self.eat(TokenKind::As).is_some() {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    /// Expression statement, assignment chain or augmented assignment
    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current().span.start;
        let first = self.star_expression_list()?;

        if let Some(op) = augmented_op(self.current_kind()) {
            self.advance();
            let value = self.assignment_value()?;
            return Ok(Stmt::new(
                StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                self.span_from(start),
            ));
        }

        if !self.check(TokenKind::Eq) {
            return Ok(Stmt::new(StmtKind::Expr(first), self.span_from(start)));
        }

        let mut targets = vec![first];
        while self.eat(TokenKind::Eq).is_some() {
            targets.push(self.assignment_value()?);
        }
        let value = targets.pop().unwrap_or_else(|| Expr::literal(Literal::None, Span::default()));
        Ok(Stmt::new(
            StmtKind::Assign { targets, value },
            self.span_from(start),
        ))
    }

    fn assignment_value(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Yield) {
            self.yield_expr()
        } else {
            self.star_expression_list()
        }
    }

    /// `:` followed by either an indented block or simple statements on
    /// the same line
    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::Colon)?;
        if self.eat(TokenKind::Newline).is_none() {
            return self.simple_statements();
        }
        if self.eat(TokenKind::Indent).is_none() {
            return Err(ParseError::new(
                ParseErrorKind::ExpectedIndentedBlock,
                self.current().span,
            ));
        }
        let mut body = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.is_eof() {
            if self.check(TokenKind::Indent) {
                let token = self.advance();
                self.error(ParseError::new(ParseErrorKind::UnexpectedIndent, token.span));
                self.synchronize();
                continue;
            }
            self.statement_into(&mut body);
        }
        self.eat(TokenKind::Dedent);
        Ok(body)
    }

    fn loop_body(&mut self) -> ParseResult<Vec<Stmt>> {
        self.context.loop_depth += 1;
        let body = self.block();
        self.context.loop_depth -= 1;
        body
    }

    fn else_block(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.eat(TokenKind::Else).is_some() {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn if_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let cond = self.expression()?;
        let body = self.block()?;
        let orelse = if self.check(TokenKind::Elif) {
            vec![self.if_stmt()?]
        } else {
            self.else_block()?
        };
        Ok(Stmt::new(
            StmtKind::If { cond, body, orelse },
            self.span_from(start),
        ))
    }

    fn while_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let cond = self.expression()?;
        let body = self.loop_body()?;
        let orelse = self.else_block()?;
        Ok(Stmt::new(
            StmtKind::While { cond, body, orelse },
            self.span_from(start),
        ))
    }

    fn for_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let target = self.target_list()?;
        self.expect(TokenKind::In)?;
        let iter = self.expression_list()?;
        let body = self.loop_body()?;
        let orelse = self.else_block()?;
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            self.span_from(start),
        ))
    }

    fn def_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parameters(TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;
        if self.eat(TokenKind::Arrow).is_some() {
            // Return annotations are accepted and ignored.
            self.expression()?;
        }
        let scope = self.new_scope();
        let body = self.nested(
            Context {
                in_function: true,
                loop_depth: 0,
                at_module: false,
            },
            Self::block,
        )?;
        Ok(Stmt::new(
            StmtKind::FunctionDef(Box::new(FunctionDef {
                name,
                params,
                body,
                scope,
            })),
            self.span_from(start),
        ))
    }

    fn class_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let name = self.expect_ident()?;
        let mut base = None;
        if self.eat(TokenKind::LParen).is_some() {
            if !self.check(TokenKind::RParen) {
                base = Some(self.expression()?);
                if self.eat(TokenKind::Comma).is_some() && !self.check(TokenKind::RParen) {
                    return Err(self
                        .unexpected(ExpectedToken::Token(TokenKind::RParen))
                        .with_hint("classes have at most one base class"));
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        let scope = self.new_scope();
        let body = self.nested(
            Context {
                in_function: false,
                loop_depth: 0,
                at_module: false,
            },
            Self::block,
        )?;
        Ok(Stmt::new(
            StmtKind::ClassDef(Box::new(ClassDef {
                name,
                base,
                body,
                scope,
            })),
            self.span_from(start),
        ))
    }

    fn try_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let body = self.block()?;

        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.check(TokenKind::Except) {
            let handler_start = self.advance().span.start;
            if let Some(previous) = handlers.last() {
                if previous.kind.is_none() {
                    self.error(ParseError::new(
                        ParseErrorKind::DefaultExceptNotLast,
                        previous.span,
                    ));
                }
            }
            let (kind, name) = if self.check(TokenKind::Colon) {
                (None, None)
            } else {
                let kind = self.expression()?;
                let name = if self.eat(TokenKind::As).is_some() {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                span: self.span_from(handler_start),
            });
        }

        let orelse = if !handlers.is_empty() {
            self.else_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(TokenKind::Finally).is_some() {
            self.block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(ParseError::new(ParseErrorKind::BareTry, self.span_from(start)));
        }

        Ok(Stmt::new(
            StmtKind::Try(Box::new(TryStmt {
                body,
                handlers,
                orelse,
                finalbody,
            })),
            self.span_from(start),
        ))
    }

    fn with_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let context = self.expression()?;
        let name = if self.eat(TokenKind::As).is_some() {
            Some(self.expect_ident()?)
        } else {
            None
        };
        if self.check(TokenKind::Comma) {
            return Err(self
                .unexpected(ExpectedToken::Token(TokenKind::Colon))
                .with_hint("'with' takes a single context manager"));
        }
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::With {
                context,
                name,
                body,
            },
            self.span_from(start),
        ))
    }

    /// Parameter list up to (not including) `end`
    fn parameters(&mut self, end: TokenKind) -> ParseResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen: Vec<String> = Vec::new();
        let mut after_star = false;

        let mut check_duplicate = |parser: &mut Self, name: &Ident| {
            if seen.contains(&name.name) {
                parser.error(ParseError::new(
                    ParseErrorKind::DuplicateParameter(name.name.clone()),
                    name.span,
                ));
            } else {
                seen.push(name.name.clone());
            }
        };

        while !self.check(end) {
            if self.eat(TokenKind::DoubleStar).is_some() {
                let name = self.expect_ident()?;
                check_duplicate(self, &name);
                params.kwarg = Some(name);
                self.eat(TokenKind::Comma);
                break;
            }
            if self.eat(TokenKind::Star).is_some() {
                if after_star {
                    return Err(self.unexpected(ExpectedToken::Description("parameter")));
                }
                after_star = true;
                if self.check(TokenKind::Ident) {
                    let name = self.expect_ident()?;
                    check_duplicate(self, &name);
                    params.vararg = Some(name);
                }
            } else {
                let name = self.expect_ident()?;
                check_duplicate(self, &name);
                let default = if self.eat(TokenKind::Eq).is_some() {
                    Some(self.expression()?)
                } else {
                    None
                };
                if after_star {
                    params.kwonly.push(Param { name, default });
                } else {
                    let needs_default = params.positional.last().is_some_and(|p| p.default.is_some());
                    if needs_default && default.is_none() {
                        self.error(ParseError::new(ParseErrorKind::NonDefaultAfterDefault, name.span));
                    }
                    params.positional.push(Param { name, default });
                }
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(params)
    }

    // ==================== Expressions ====================

    /// A full expression: lambda, conditional, or anything tighter
    pub fn expression(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Lambda) {
            return self.lambda();
        }
        let start = self.current().span.start;
        let then = self.or_expr()?;
        if self.check(TokenKind::If) {
            self.advance();
            let cond = self.or_expr()?;
            self.expect(TokenKind::Else)?;
            let otherwise = self.expression()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                self.span_from(start),
            ));
        }
        Ok(then)
    }

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// makes a tuple
    fn expression_list(&mut self) -> ParseResult<Expr> {
        self.tuple_of(Self::expression)
    }

    /// Like `expression_list`, but items may be `*starred`
    fn star_expression_list(&mut self) -> ParseResult<Expr> {
        self.tuple_of(Self::star_expression)
    }

    /// Assignment targets for `for` and comprehensions; stops before `in`
    fn target_list(&mut self) -> ParseResult<Expr> {
        self.tuple_of(|p| {
            if p.check(TokenKind::Star) {
                let start = p.advance().span.start;
                let inner = p.bitor_expr()?;
                Ok(Expr::new(ExprKind::Starred(Box::new(inner)), p.span_from(start)))
            } else {
                p.bitor_expr()
            }
        })
    }

    fn tuple_of(&mut self, mut item: impl FnMut(&mut Self) -> ParseResult<Expr>) -> ParseResult<Expr> {
        let start = self.current().span.start;
        let first = item(self)?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma).is_some() {
            if !self.starts_expression() {
                break;
            }
            items.push(item(self)?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn star_expression(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Star) {
            let start = self.advance().span.start;
            let inner = self.bitor_expr()?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(inner)),
                self.span_from(start),
            ));
        }
        self.expression()
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Ident
                | TokenKind::Int
                | TokenKind::HexInt
                | TokenKind::BinaryInt
                | TokenKind::OctalInt
                | TokenKind::Float
                | TokenKind::String
                | TokenKind::TripleString
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Star
                | TokenKind::Yield
        )
    }

    fn lambda(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span.start;
        let params = self.parameters(TokenKind::Colon)?;
        self.expect(TokenKind::Colon)?;
        let scope = self.new_scope();
        let body = self.nested(
            Context {
                in_function: true,
                loop_depth: 0,
                at_module: false,
            },
            Self::expression,
        )?;
        Ok(Expr::new(
            ExprKind::Lambda(Box::new(Lambda {
                params,
                body,
                scope,
            })),
            self.span_from(start),
        ))
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        self.bool_chain(TokenKind::Or, BoolOp::Or, Self::and_expr)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        self.bool_chain(TokenKind::And, BoolOp::And, Self::not_expr)
    }

    fn bool_chain(
        &mut self,
        token: TokenKind,
        op: BoolOp,
        operand: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = operand(self)?;
        while self.eat(token).is_some() {
            let right = operand(self)?;
            let span = left.span.merge(right.span);
            left = Expr::new(
                ExprKind::BoolOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Not) {
            let start = self.advance().span.start;
            let operand = self.not_expr()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                self.span_from(start),
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let left = self.bitor_expr()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.bitor_expr()?));
        }
        if rest.is_empty() {
            return Ok(left);
        }
        let span = left.span.merge(self.span_from(left.span.start));
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                rest,
            },
            span,
        ))
    }

    /// Consume a comparison operator, including the two-token forms
    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.current_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::In => CmpOp::In,
            TokenKind::Not if self.peek_kind() == TokenKind::In => {
                self.advance();
                CmpOp::NotIn
            }
            TokenKind::Is if self.peek_kind() == TokenKind::Not => {
                self.advance();
                CmpOp::IsNot
            }
            TokenKind::Is => CmpOp::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn bitor_expr(&mut self) -> ParseResult<Expr> {
        self.parse_precedence(1)
    }

    /// Precedence climbing over the binary operators `|` through `%`
    fn parse_precedence(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.unary()?;

        while let Some(op) = self.infix_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_precedence(prec + 1)?;
            let span = left.span.merge(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn infix_op(&self) -> Option<BinOp> {
        Some(match self.current_kind() {
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::LShift => BinOp::LShift,
            TokenKind::RShift => BinOp::RShift,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::DoubleSlash => BinOp::FloorDiv,
            TokenKind::Percent => BinOp::Mod,
            _ => return None,
        })
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.current_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        let start = self.advance().span.start;
        let operand = self.unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            self.span_from(start),
        ))
    }

    /// `**` binds tighter than a unary operator on its left and looser
    /// than one on its right: `-2 ** -1` is `-(2 ** (-1))`.
    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        if self.eat(TokenKind::DoubleStar).is_none() {
            return Ok(base);
        }
        let exponent = self.unary()?;
        let span = base.span.merge(exponent.span);
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let start = expr.span.start;
            match self.current_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.call_args()?;
                    self.expect(TokenKind::RParen)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            object: Box::new(expr),
                            name,
                        },
                        self.span_from(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check(TokenKind::RParen) {
            let arg = if self.eat(TokenKind::DoubleStar).is_some() {
                seen_keyword = true;
                Arg::DoubleStar(self.expression()?)
            } else if self.eat(TokenKind::Star).is_some() {
                Arg::Star(self.expression()?)
            } else if self.check(TokenKind::Ident) && self.peek_kind() == TokenKind::Eq {
                let name = self.expect_ident()?;
                self.advance();
                seen_keyword = true;
                Arg::Keyword(name, self.expression()?)
            } else {
                let start = self.current().span.start;
                let value = self.expression()?;
                if self.check(TokenKind::For) {
                    let comp = self.comprehension_tail(value, None)?;
                    let genexp = Expr::new(ExprKind::GeneratorExp(Box::new(comp)), self.span_from(start));
                    args.push(Arg::Positional(genexp));
                    break;
                }
                if seen_keyword {
                    self.error(ParseError::new(ParseErrorKind::PositionalAfterKeyword, value.span));
                }
                Arg::Positional(value)
            };
            args.push(arg);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> ParseResult<Expr> {
        let start = self.current().span.start;
        let lower = if self.check(TokenKind::Colon) {
            None
        } else {
            Some(self.expression()?)
        };
        if self.eat(TokenKind::Colon).is_none() {
            return lower.ok_or_else(|| self.unexpected(ExpectedToken::Description("subscript")));
        }
        let bound = |p: &mut Self| -> ParseResult<Option<Box<Expr>>> {
            if p.check_any(&[TokenKind::Colon, TokenKind::RBracket]) {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.expression()?)))
            }
        };
        let upper = bound(self)?;
        let step = if self.eat(TokenKind::Colon).is_some() {
            bound(self)?
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper,
                step,
            },
            self.span_from(start),
        ))
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let span = token.span;
        match token.kind {
            TokenKind::Ident => {
                self.advance();
                Ok(Expr::name(token.lexeme, span))
            }
            kind if kind.is_number() => {
                self.advance();
                let literal = match parse_number(kind, &token.lexeme) {
                    Some(Number::Int(n)) => Literal::Int(n),
                    Some(Number::Float(f)) => Literal::Float(f),
                    None => return Err(ParseError::new(ParseErrorKind::ExpectedExpression(kind), span)),
                };
                Ok(Expr::literal(literal, span))
            }
            TokenKind::String | TokenKind::TripleString => {
                let mut text = String::new();
                while self.check_any(&[TokenKind::String, TokenKind::TripleString]) {
                    text.push_str(&self.advance().lexeme);
                }
                Ok(Expr::literal(Literal::Str(text), self.span_from(span.start)))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::literal(Literal::Bool(token.kind == TokenKind::True), span))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::literal(Literal::None, span))
            }
            TokenKind::LParen => self.paren_expr(),
            TokenKind::LBracket => self.list_display(),
            TokenKind::LBrace => self.dict_display(),
            TokenKind::Yield => self.yield_expr(),
            kind => Err(ParseError::new(ParseErrorKind::ExpectedExpression(kind), span)),
        }
    }

    fn yield_expr(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        if !self.context.in_function {
            self.error(ParseError::new(ParseErrorKind::YieldOutsideFunction, token.span));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.expression_list()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Yield(value), self.span_from(token.span.start)))
    }

    /// `()`, `(x)`, `(x,)`, `(a, b)` or `(x for ...)`
    fn paren_expr(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span.start;
        if self.eat(TokenKind::RParen).is_some() {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), self.span_from(start)));
        }
        if self.check(TokenKind::Yield) {
            let inner = self.yield_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        let first = self.star_expression()?;
        if self.check(TokenKind::For) {
            let comp = self.comprehension_tail(first, None)?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp(Box::new(comp)),
                self.span_from(start),
            ));
        }
        if self.eat(TokenKind::RParen).is_some() {
            // Parentheses only group; keep the inner span.
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma).is_some() {
            if self.check(TokenKind::RParen) {
                break;
            }
            items.push(self.star_expression()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), self.span_from(start)))
    }

    fn list_display(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span.start;
        let mut items = Vec::new();
        if !self.check(TokenKind::RBracket) {
            let first = self.star_expression()?;
            if self.check(TokenKind::For) {
                let comp = self.comprehension_tail(first, None)?;
                self.expect(TokenKind::RBracket)?;
                return Ok(Expr::new(
                    ExprKind::ListComp(Box::new(comp)),
                    self.span_from(start),
                ));
            }
            items.push(first);
            while self.eat(TokenKind::Comma).is_some() {
                if self.check(TokenKind::RBracket) {
                    break;
                }
                items.push(self.star_expression()?);
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), self.span_from(start)))
    }

    fn dict_display(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span.start;
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            let key = self.expression()?;
            self.expect(TokenKind::Colon)
                .map_err(|e| e.with_hint("set displays are not supported; use a list or dict"))?;
            let value = self.expression()?;
            if self.check(TokenKind::For) {
                let comp = self.comprehension_tail(key, Some(value))?;
                self.expect(TokenKind::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::DictComp(Box::new(comp)),
                    self.span_from(start),
                ));
            }
            entries.push((key, value));
            while self.eat(TokenKind::Comma).is_some() {
                if self.check(TokenKind::RBrace) {
                    break;
                }
                let key = self.expression()?;
                self.expect(TokenKind::Colon)?;
                let value = self.expression()?;
                entries.push((key, value));
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(entries), self.span_from(start)))
    }

    /// The `for ... in ... if ...` clauses after a comprehension element
    fn comprehension_tail(&mut self, element: Expr, value: Option<Expr>) -> ParseResult<Comprehension> {
        let scope = self.new_scope();
        let mut generators = Vec::new();
        while self.eat(TokenKind::For).is_some() {
            let target = self.target_list()?;
            self.expect(TokenKind::In)?;
            let iter = self.or_expr()?;
            let mut conditions = Vec::new();
            while self.eat(TokenKind::If).is_some() {
                conditions.push(self.or_expr()?);
            }
            generators.push(ComprehensionFor {
                target,
                iter,
                conditions,
            });
        }
        Ok(Comprehension {
            element,
            value,
            generators,
            scope,
        })
    }

    // ==================== Error Recovery ====================

    /// Skip to the start of the next statement: past the `Newline` that
    /// ends the current line (and any block indented under it), or up to
    /// the `Dedent` that closes the enclosing block.
    fn synchronize(&mut self) {
        let mut depth = 0u32;
        loop {
            match self.current_kind() {
                TokenKind::Eof => return,
                TokenKind::Newline => {
                    self.advance();
                    if depth == 0 && !self.check(TokenKind::Indent) {
                        return;
                    }
                }
                TokenKind::Indent => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::Dedent => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }
}

fn augmented_op(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::PlusEq => BinOp::Add,
        TokenKind::MinusEq => BinOp::Sub,
        TokenKind::StarEq => BinOp::Mul,
        TokenKind::SlashEq => BinOp::Div,
        TokenKind::DoubleSlashEq => BinOp::FloorDiv,
        TokenKind::PercentEq => BinOp::Mod,
        TokenKind::DoubleStarEq => BinOp::Pow,
        TokenKind::AmpEq => BinOp::BitAnd,
        TokenKind::PipeEq => BinOp::BitOr,
        TokenKind::CaretEq => BinOp::BitXor,
        TokenKind::LShiftEq => BinOp::LShift,
        TokenKind::RShiftEq => BinOp::RShift,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        match Parser::parse_source(source) {
            Ok(module) => module,
            Err(errors) => panic!("parse failed: {errors:?}"),
        }
    }

    fn parse_errors(source: &str) -> Vec<ParseErrorKind> {
        Parser::parse_source(source)
            .expect_err("expected syntax errors")
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    fn expr(source: &str) -> Expr {
        match parse(source).body.remove(0).kind {
            StmtKind::Expr(e) => e,
            other => panic!("not an expression statement: {other:?}"),
        }
    }

    fn binary(e: &Expr) -> (BinOp, &Expr, &Expr) {
        match &e.kind {
            ExprKind::Binary { op, left, right } => (*op, left, right),
            other => panic!("not binary: {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = expr("1 + 2 * 3");
        let (op, _, right) = binary(&e);
        assert_eq!(op, BinOp::Add);
        assert_eq!(binary(right).0, BinOp::Mul);
    }

    #[test]
    fn power_is_right_associative_and_beats_unary_minus() {
        let e = expr("-2 ** 3 ** 2");
        let ExprKind::Unary { op: UnaryOp::Neg, operand } = &e.kind else {
            panic!("expected negation, got {e:?}");
        };
        let (op, _, right) = binary(operand);
        assert_eq!(op, BinOp::Pow);
        assert_eq!(binary(right).0, BinOp::Pow);
    }

    #[test]
    fn chained_comparison_keeps_all_operators() {
        let e = expr("a < b <= c not in d is not e");
        let ExprKind::Compare { rest, .. } = &e.kind else {
            panic!("expected comparison");
        };
        let ops: Vec<CmpOp> = rest.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::Le, CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn conditional_and_lambda() {
        let e = expr("lambda x, y=2: x if y else -x");
        let ExprKind::Lambda(lambda) = &e.kind else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.params.positional.len(), 2);
        assert!(matches!(lambda.body.kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn tuple_assignment_and_chains() {
        let module = parse("a, b = b, a\nx = y = 0\n");
        let StmtKind::Assign { targets, value } = &module.body[0].kind else {
            panic!()
        };
        assert!(matches!(targets[0].kind, ExprKind::Tuple(ref t) if t.len() == 2));
        assert!(matches!(value.kind, ExprKind::Tuple(_)));
        let StmtKind::Assign { targets, .. } = &module.body[1].kind else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn augmented_assignment() {
        let module = parse("total += i * 2\n");
        assert!(matches!(
            module.body[0].kind,
            StmtKind::AugAssign { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn function_parameters() {
        let module = parse("def f(a, b=1, *rest, key=None, **extra):\n    pass\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!()
        };
        assert_eq!(def.params.positional.len(), 2);
        assert_eq!(def.params.vararg.as_ref().unwrap().name, "rest");
        assert_eq!(def.params.kwonly[0].name.name, "key");
        assert_eq!(def.params.kwarg.as_ref().unwrap().name, "extra");
        assert_eq!(def.scope, ScopeId(1));
    }

    #[test]
    fn scopes_are_numbered_in_source_order() {
        let module = parse("class A:\n    def m(self):\n        return [x for x in self]\n");
        assert_eq!(module.scope_count, 4);
    }

    #[test]
    fn call_arguments() {
        let e = expr("f(1, *xs, k=2, **kw)");
        let ExprKind::Call { args, .. } = &e.kind else {
            panic!()
        };
        assert!(matches!(args[0], Arg::Positional(_)));
        assert!(matches!(args[1], Arg::Star(_)));
        assert!(matches!(args[2], Arg::Keyword(ref k, _) if k.name == "k"));
        assert!(matches!(args[3], Arg::DoubleStar(_)));
    }

    #[test]
    fn generator_argument() {
        let e = expr("sum(x * x for x in range(10) if x % 2)");
        let ExprKind::Call { args, .. } = &e.kind else {
            panic!()
        };
        let Arg::Positional(Expr { kind: ExprKind::GeneratorExp(comp), .. }) = &args[0] else {
            panic!()
        };
        assert_eq!(comp.generators[0].conditions.len(), 1);
    }

    #[test]
    fn slices() {
        let e = expr("xs[1:-1:2]");
        let ExprKind::Subscript { index, .. } = &e.kind else {
            panic!()
        };
        assert!(matches!(
            index.kind,
            ExprKind::Slice { lower: Some(_), upper: Some(_), step: Some(_) }
        ));
        let e = expr("xs[:]");
        let ExprKind::Subscript { index, .. } = &e.kind else {
            panic!()
        };
        assert!(matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: None }));
    }

    #[test]
    fn comprehensions() {
        assert!(matches!(expr("[x for x in y]").kind, ExprKind::ListComp(_)));
        assert!(matches!(expr("{k: v for k, v in items}").kind, ExprKind::DictComp(_)));
        assert!(matches!(expr("(x for x in y)").kind, ExprKind::GeneratorExp(_)));
    }

    #[test]
    fn try_statement() {
        let src = "try:\n    f()\nexcept ValueError as e:\n    pass\nexcept:\n    pass\nelse:\n    pass\nfinally:\n    done()\n";
        let module = parse(src);
        let StmtKind::Try(t) = &module.body[0].kind else {
            panic!()
        };
        assert_eq!(t.handlers.len(), 2);
        assert_eq!(t.handlers[0].name.as_ref().unwrap().name, "e");
        assert_eq!(t.orelse.len(), 1);
        assert_eq!(t.finalbody.len(), 1);
    }

    #[test]
    fn elif_nests_in_orelse() {
        let module = parse("if a:\n    x\nelif b:\n    y\nelse:\n    z\n");
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!()
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn for_else_and_while_else() {
        let module = parse("for i in r:\n    break\nelse:\n    pass\nwhile c:\n    continue\nelse:\n    pass\n");
        assert!(matches!(&module.body[0].kind, StmtKind::For { orelse, .. } if orelse.len() == 1));
        assert!(matches!(&module.body[1].kind, StmtKind::While { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn imports() {
        let module = parse("import math, util as u\nfrom shapes import Circle, Square as Sq\n");
        let StmtKind::Import(names) = &module.body[0].kind else {
            panic!()
        };
        assert_eq!(names[1].bound_name().name, "u");
        let StmtKind::ImportFrom { module: m, names } = &module.body[1].kind else {
            panic!()
        };
        assert_eq!(m.name, "shapes");
        assert_eq!(names[1].bound_name().name, "Sq");
    }

    #[test]
    fn semicolons_separate_simple_statements() {
        assert_eq!(parse("a = 1; b = 2; print(a + b)\n").body.len(), 3);
    }

    #[test]
    fn context_errors() {
        assert_eq!(parse_errors("break\n"), vec![ParseErrorKind::BreakOutsideLoop]);
        assert_eq!(parse_errors("continue\n"), vec![ParseErrorKind::ContinueOutsideLoop]);
        assert_eq!(parse_errors("return 1\n"), vec![ParseErrorKind::ReturnOutsideFunction]);
        assert_eq!(parse_errors("x = yield 1\n"), vec![ParseErrorKind::YieldOutsideFunction]);
        assert_eq!(parse_errors("nonlocal x\n"), vec![ParseErrorKind::NonlocalAtModuleLevel]);
        assert_eq!(
            parse_errors("for x in y:\n    def f():\n        break\n"),
            vec![ParseErrorKind::BreakOutsideLoop]
        );
        assert_eq!(
            parse_errors("def f():\n    class C:\n        return 1\n"),
            vec![ParseErrorKind::ReturnOutsideFunction]
        );
    }

    #[test]
    fn reports_expected_and_found() {
        let errors = Parser::parse_source("if x\n    y\n").unwrap_err();
        assert_eq!(
            errors[0].kind,
            ParseErrorKind::UnexpectedToken {
                found: TokenKind::Newline,
                expected: ExpectedToken::Token(TokenKind::Colon),
            }
        );
        assert_eq!(errors[0].span, Span::new(4, 5));
    }

    #[test]
    fn collects_errors_across_statements() {
        let errors = parse_errors("x = (1 +)\ny = 2\nz = *\n");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn recovers_inside_blocks() {
        let errors = parse_errors("def f():\n    x = = 1\n    return x\ny = = 2\n");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn duplicate_parameters() {
        assert_eq!(
            parse_errors("def f(a, a):\n    pass\n"),
            vec![ParseErrorKind::DuplicateParameter("a".into())]
        );
    }

    #[test]
    fn missing_indented_block() {
        assert_eq!(
            parse_errors("def f():\nreturn 1\n"),
            vec![ParseErrorKind::ExpectedIndentedBlock]
        );
    }
}
