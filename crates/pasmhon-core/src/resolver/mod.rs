//! Scope resolution
//!
//! Runs in two passes over a parsed [`Module`]:
//!
//! 1. **Collection**: walk the AST and record, per scope, which names are
//!    bound, read, or declared `global`/`nonlocal`.
//! 2. **Linking**: top-down from the module, resolve every name a scope
//!    reads but does not bind against its enclosing function scopes.
//!    A hit marks the name CELL where it is bound and FREE in every scope
//!    in between, so intermediate scopes forward it. Class scopes are
//!    skipped for lookup but still forward.
//!
//! The result is a [`ScopeTable`] the bytecode compiler queries with
//! [`ScopeTable::classify`].

mod error;
mod symbol;

pub use error::{ResolveError, ResolveErrorKind};
pub use symbol::{NameClass, Scope, ScopeKind, ScopeTable, Symbol, SymbolFlags};

use crate::ast::{
    Comprehension, ExceptHandler, Expr, ExprKind, Ident, Module, Parameters, ScopeId, Stmt,
    StmtKind,
};
use crate::lexer::Span;

/// Name of the hidden parameter holding a comprehension's outermost iterator
pub const COMPREHENSION_ARG: &str = ".0";

/// Resolve every scope of `module`
pub fn resolve(module: &Module) -> Result<ScopeTable, Vec<ResolveError>> {
    ScopeAnalyzer::new(module.scope_count).analyze(module)
}

/// Walks the AST and builds the scope table
pub struct ScopeAnalyzer {
    scopes: Vec<Scope>,
    children: Vec<Vec<ScopeId>>,
    current: ScopeId,
    /// Where each `nonlocal` was declared, for error reporting
    nonlocals: Vec<(ScopeId, String, Span)>,
    errors: Vec<ResolveError>,
}

impl ScopeAnalyzer {
    #[must_use]
    pub fn new(scope_count: u32) -> Self {
        let count = scope_count.max(1);
        let mut scopes: Vec<Scope> = (0..count)
            .map(|i| Scope::new(ScopeId(i), ScopeKind::Function, "", None))
            .collect();
        scopes[0] = Scope::new(ScopeId::MODULE, ScopeKind::Module, "<module>", None);
        Self {
            scopes,
            children: vec![Vec::new(); count as usize],
            current: ScopeId::MODULE,
            nonlocals: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn analyze(mut self, module: &Module) -> Result<ScopeTable, Vec<ResolveError>> {
        for stmt in &module.body {
            self.visit_stmt(stmt);
        }
        self.link(ScopeId::MODULE);
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        for scope in &mut self.scopes {
            scope.finish();
        }
        Ok(ScopeTable {
            scopes: self.scopes,
        })
    }

    fn scope(&mut self) -> &mut Scope {
        &mut self.scopes[self.current.index()]
    }

    fn error(&mut self, kind: ResolveErrorKind, span: Span) {
        self.errors.push(ResolveError::new(kind, span));
    }

    /// Enter scope `id`, returning the scope to restore with `leave`
    fn enter(&mut self, id: ScopeId, kind: ScopeKind, name: &str) -> ScopeId {
        let parent = self.current;
        self.scopes[id.index()] = Scope::new(id, kind, name, Some(parent));
        self.children[parent.index()].push(id);
        std::mem::replace(&mut self.current, id)
    }

    fn leave(&mut self, previous: ScopeId) {
        self.current = previous;
    }

    fn bind(&mut self, name: &str) {
        self.scope().flag(name, SymbolFlags::DEF);
    }

    fn use_name(&mut self, name: &str) {
        self.scope().flag(name, SymbolFlags::USE);
    }

    fn params(&mut self, params: &Parameters) {
        for name in params.names() {
            let scope = self.scope();
            scope.flag(&name.name, SymbolFlags::DEF | SymbolFlags::PARAM);
            scope.params.push(name.name.clone());
        }
    }

    fn declare_global(&mut self, ident: &Ident) {
        let flags = self.scope().lookup(&ident.name).map(|s| s.flags);
        if let Some(flags) = flags {
            let kind = if flags.contains(SymbolFlags::NONLOCAL) {
                Some(ResolveErrorKind::GlobalAndNonlocal(ident.name.clone()))
            } else if flags.contains(SymbolFlags::PARAM) {
                Some(ResolveErrorKind::ParameterGlobal(ident.name.clone()))
            } else if flags.contains(SymbolFlags::DEF) || flags.contains(SymbolFlags::USE) {
                Some(ResolveErrorKind::GlobalAfterUse(ident.name.clone()))
            } else {
                None
            };
            if let Some(kind) = kind {
                self.error(kind, ident.span);
            }
        }
        self.scope().flag(&ident.name, SymbolFlags::GLOBAL);
    }

    fn declare_nonlocal(&mut self, ident: &Ident) {
        if self.scope().kind == ScopeKind::Module {
            self.error(ResolveErrorKind::NonlocalAtModuleLevel, ident.span);
            return;
        }
        let flags = self.scope().lookup(&ident.name).map(|s| s.flags);
        if let Some(flags) = flags {
            let kind = if flags.contains(SymbolFlags::GLOBAL) {
                Some(ResolveErrorKind::GlobalAndNonlocal(ident.name.clone()))
            } else if flags.contains(SymbolFlags::PARAM) {
                Some(ResolveErrorKind::ParameterNonlocal(ident.name.clone()))
            } else if flags.contains(SymbolFlags::DEF) || flags.contains(SymbolFlags::USE) {
                Some(ResolveErrorKind::NonlocalAfterUse(ident.name.clone()))
            } else {
                None
            };
            if let Some(kind) = kind {
                self.error(kind, ident.span);
            }
        }
        self.scope().flag(&ident.name, SymbolFlags::NONLOCAL);
        self.nonlocals
            .push((self.current, ident.name.clone(), ident.span));
    }

    // ==================== Collection ====================

    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.visit_expr(e),
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value);
                for target in targets {
                    self.bind_target(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_expr(value);
                if let ExprKind::Name(name) = &target.kind {
                    self.use_name(name);
                }
                self.bind_target(target);
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::If { cond, body, orelse } | StmtKind::While { cond, body, orelse } => {
                self.visit_expr(cond);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.visit_expr(iter);
                self.bind_target(target);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            StmtKind::FunctionDef(def) => {
                for default in def.params.defaults() {
                    self.visit_expr(default);
                }
                self.bind(&def.name.name);
                let previous = self.enter(def.scope, ScopeKind::Function, &def.name.name);
                self.params(&def.params);
                self.visit_body(&def.body);
                self.leave(previous);
            }
            StmtKind::ClassDef(class) => {
                if let Some(base) = &class.base {
                    self.visit_expr(base);
                }
                self.bind(&class.name.name);
                let previous = self.enter(class.scope, ScopeKind::Class, &class.name.name);
                self.visit_body(&class.body);
                self.leave(previous);
            }
            StmtKind::Try(t) => {
                self.visit_body(&t.body);
                for ExceptHandler { kind, name, body, .. } in &t.handlers {
                    if let Some(kind) = kind {
                        self.visit_expr(kind);
                    }
                    if let Some(name) = name {
                        self.bind(&name.name);
                    }
                    self.visit_body(body);
                }
                self.visit_body(&t.orelse);
                self.visit_body(&t.finalbody);
            }
            StmtKind::With {
                context,
                name,
                body,
            } => {
                self.visit_expr(context);
                if let Some(name) = name {
                    self.bind(&name.name);
                }
                self.visit_body(body);
            }
            StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    self.bind(&alias.bound_name().name);
                }
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Raise(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.declare_global(name);
                }
            }
            StmtKind::Nonlocal(names) => {
                for name in names {
                    self.declare_nonlocal(name);
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.bind_target(target);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test);
                if let Some(msg) = msg {
                    self.visit_expr(msg);
                }
            }
        }
    }

    fn bind_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.bind(name),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.bind_target(item);
                }
            }
            ExprKind::Starred(inner) => self.bind_target(inner),
            _ => self.visit_expr(target),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Name(name) => self.use_name(name),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.visit_expr(item);
                }
            }
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
            }
            ExprKind::Starred(inner) | ExprKind::Unary { operand: inner, .. } => {
                self.visit_expr(inner);
            }
            ExprKind::Binary { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            ExprKind::Compare { left, rest } => {
                self.visit_expr(left);
                for (_, operand) in rest {
                    self.visit_expr(operand);
                }
            }
            ExprKind::IfExp {
                cond,
                then,
                otherwise,
            } => {
                self.visit_expr(cond);
                self.visit_expr(then);
                self.visit_expr(otherwise);
            }
            ExprKind::Call { func, args } => {
                self.visit_expr(func);
                for arg in args {
                    self.visit_expr(arg.value());
                }
            }
            ExprKind::Attribute { object, .. } => self.visit_expr(object),
            ExprKind::Subscript { object, index } => {
                self.visit_expr(object);
                self.visit_expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part);
                }
            }
            ExprKind::Lambda(lambda) => {
                for default in lambda.params.defaults() {
                    self.visit_expr(default);
                }
                let previous = self.enter(lambda.scope, ScopeKind::Lambda, "<lambda>");
                self.params(&lambda.params);
                self.visit_expr(&lambda.body);
                self.leave(previous);
            }
            ExprKind::ListComp(comp) => self.visit_comprehension(comp, "<listcomp>", false),
            ExprKind::DictComp(comp) => self.visit_comprehension(comp, "<dictcomp>", false),
            ExprKind::GeneratorExp(comp) => self.visit_comprehension(comp, "<genexpr>", true),
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
                let scope = self.scope();
                if matches!(scope.kind, ScopeKind::Function | ScopeKind::Lambda) {
                    scope.is_generator = true;
                }
            }
        }
    }

    /// The outermost iterable is evaluated in the enclosing scope; the rest
    /// of the comprehension runs in its own scope.
    fn visit_comprehension(&mut self, comp: &Comprehension, name: &str, is_generator: bool) {
        let Some(first) = comp.generators.first() else {
            return;
        };
        self.visit_expr(&first.iter);
        let previous = self.enter(comp.scope, ScopeKind::Comprehension, name);
        let scope = self.scope();
        scope.flag(COMPREHENSION_ARG, SymbolFlags::DEF | SymbolFlags::PARAM);
        scope.params.push(COMPREHENSION_ARG.to_string());
        scope.is_generator = is_generator;
        for (i, generator) in comp.generators.iter().enumerate() {
            if i > 0 {
                self.visit_expr(&generator.iter);
            }
            self.bind_target(&generator.target);
            for condition in &generator.conditions {
                self.visit_expr(condition);
            }
        }
        self.visit_expr(&comp.element);
        if let Some(value) = &comp.value {
            self.visit_expr(value);
        }
        self.leave(previous);
    }

    // ==================== Linking ====================

    fn link(&mut self, id: ScopeId) {
        if self.scopes[id.index()].kind != ScopeKind::Module {
            let parent = self.scopes[id.index()].parent;
            let unresolved: Vec<(String, bool)> = self.scopes[id.index()]
                .symbols
                .values()
                .filter(|s| {
                    let f = s.flags;
                    f.contains(SymbolFlags::NONLOCAL)
                        || (!f.contains(SymbolFlags::DEF) && !f.contains(SymbolFlags::GLOBAL))
                })
                .map(|s| (s.name.clone(), s.flags.contains(SymbolFlags::NONLOCAL)))
                .collect();

            for (name, is_nonlocal) in unresolved {
                let found = parent.is_some_and(|p| self.provide(p, &name));
                if found {
                    self.scopes[id.index()].flag(&name, SymbolFlags::FREE);
                } else if is_nonlocal {
                    let span = self
                        .nonlocals
                        .iter()
                        .find(|(scope, n, _)| *scope == id && *n == name)
                        .map_or(Span::default(), |(_, _, span)| *span);
                    self.error(ResolveErrorKind::NonlocalNotFound(name), span);
                }
            }
        }

        let children = self.children[id.index()].clone();
        for child in children {
            self.link(child);
        }
    }

    /// Whether scope `id` (or one of its ancestors) can supply `name` to an
    /// inner scope. Marks the binding CELL and forwarding scopes FREE.
    fn provide(&mut self, id: ScopeId, name: &str) -> bool {
        let scope = &self.scopes[id.index()];
        let parent = scope.parent;
        match scope.kind {
            ScopeKind::Module => false,
            ScopeKind::Class => {
                let found = parent.is_some_and(|p| self.provide(p, name));
                if found {
                    self.scopes[id.index()].flag(name, SymbolFlags::FREE);
                }
                found
            }
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension => {
                let flags = scope.lookup(name).map(|s| s.flags);
                match flags {
                    Some(f) if f.contains(SymbolFlags::GLOBAL) => false,
                    Some(f) if f.contains(SymbolFlags::FREE) => true,
                    Some(f) if f.contains(SymbolFlags::NONLOCAL) => false,
                    Some(f) if f.contains(SymbolFlags::DEF) => {
                        self.scopes[id.index()].flag(name, SymbolFlags::CELL);
                        true
                    }
                    _ => {
                        let found = parent.is_some_and(|p| self.provide(p, name));
                        if found {
                            self.scopes[id.index()].flag(name, SymbolFlags::FREE);
                        }
                        found
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn table(source: &str) -> ScopeTable {
        let module = Parser::parse_source(source).expect("parse error");
        resolve(&module).expect("resolve error")
    }

    fn errors(source: &str) -> Vec<ResolveErrorKind> {
        let module = Parser::parse_source(source).expect("parse error");
        resolve(&module)
            .expect_err("expected resolve errors")
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn module_bindings_are_global_and_unbound_are_builtin() {
        let t = table("x = 1\nprint(x)\n");
        assert_eq!(t.classify(ScopeId::MODULE, "x"), NameClass::Global);
        assert_eq!(t.classify(ScopeId::MODULE, "print"), NameClass::Builtin);
    }

    #[test]
    fn function_locals_and_params_get_slots() {
        let t = table("def f(a, b=2, *c, d, **e):\n    x = a\n    return x + g\ng = 1\n");
        let f = t.get(ScopeId(1));
        assert_eq!(f.varnames, vec!["a", "b", "d", "c", "e", "x"]);
        assert_eq!(t.classify(ScopeId(1), "x"), NameClass::Fast);
        assert_eq!(t.classify(ScopeId(1), "g"), NameClass::Global);
        assert_eq!(t.classify(ScopeId(1), "len"), NameClass::Builtin);
    }

    #[test]
    fn captured_variable_becomes_cell_and_free() {
        let src = "def outer():\n    n = 0\n    def inner():\n        return n\n    return inner\n";
        let t = table(src);
        let outer = t.get(ScopeId(1));
        let inner = t.get(ScopeId(2));
        assert_eq!(outer.cellvars, vec!["n"]);
        assert_eq!(outer.varnames, vec!["inner"]);
        assert_eq!(inner.freevars, vec!["n"]);
        assert_eq!(t.classify(ScopeId(1), "n"), NameClass::Deref);
        assert_eq!(t.classify(ScopeId(2), "n"), NameClass::Deref);
    }

    #[test]
    fn intermediate_scopes_forward_free_names() {
        let src = "def a():\n    v = 1\n    def b():\n        def c():\n            return v\n        return c\n    return b\n";
        let t = table(src);
        assert_eq!(t.get(ScopeId(1)).cellvars, vec!["v"]);
        assert_eq!(t.get(ScopeId(2)).freevars, vec!["v"]);
        assert_eq!(t.get(ScopeId(3)).freevars, vec!["v"]);
    }

    #[test]
    fn nonlocal_rebinds_the_enclosing_cell() {
        let src = "def counter():\n    n = 0\n    def inc():\n        nonlocal n\n        n += 1\n        return n\n    return inc\n";
        let t = table(src);
        assert_eq!(t.get(ScopeId(1)).cellvars, vec!["n"]);
        assert_eq!(t.classify(ScopeId(2), "n"), NameClass::Deref);
        assert!(t.get(ScopeId(2)).varnames.is_empty());
    }

    #[test]
    fn captured_parameters_are_reported() {
        let t = table("def f(a, b):\n    return lambda: b\n");
        let f = t.get(ScopeId(1));
        assert_eq!(f.varnames, vec!["a", "b"]);
        assert_eq!(f.captured_params(), vec![(1, 0)]);
    }

    #[test]
    fn methods_do_not_see_class_names() {
        let src = "def make():\n    y = 1\n    class C:\n        x = 1\n        def m(self):\n            return x + y\n    return C\n";
        let t = table(src);
        assert_eq!(t.classify(ScopeId(2), "x"), NameClass::ClassName);
        assert_eq!(t.classify(ScopeId(3), "x"), NameClass::Builtin);
        assert_eq!(t.classify(ScopeId(3), "y"), NameClass::Deref);
        assert_eq!(t.get(ScopeId(2)).freevars, vec!["y"]);
        assert_eq!(t.get(ScopeId(1)).cellvars, vec!["y"]);
    }

    #[test]
    fn global_declaration_in_function() {
        let t = table("count = 0\ndef bump():\n    global count\n    count += 1\n");
        assert_eq!(t.classify(ScopeId(1), "count"), NameClass::Global);
        assert!(t.get(ScopeId(1)).varnames.is_empty());
    }

    #[test]
    fn comprehension_scope() {
        let t = table("def f(xs, k):\n    return [x * k for x in xs]\n");
        let comp = t.get(ScopeId(2));
        assert_eq!(comp.kind, ScopeKind::Comprehension);
        assert_eq!(comp.varnames, vec![COMPREHENSION_ARG, "x"]);
        assert_eq!(comp.freevars, vec!["k"]);
        // The outermost iterable is read in the enclosing scope.
        assert_eq!(t.classify(ScopeId(1), "xs"), NameClass::Fast);
    }

    #[test]
    fn generator_detection() {
        let t = table("def g():\n    yield 1\ndef h():\n    return (x for x in range(3))\n");
        assert!(t.get(ScopeId(1)).is_generator);
        assert!(!t.get(ScopeId(2)).is_generator);
        assert!(t.get(ScopeId(3)).is_generator);
    }

    #[test]
    fn resolution_errors() {
        assert_eq!(
            errors("def f():\n    nonlocal x\n"),
            vec![ResolveErrorKind::NonlocalNotFound("x".into())]
        );
        assert_eq!(
            errors("def f():\n    x = 1\n    global x\n"),
            vec![ResolveErrorKind::GlobalAfterUse("x".into())]
        );
        assert_eq!(
            errors("def f(a):\n    global a\n"),
            vec![ResolveErrorKind::ParameterGlobal("a".into())]
        );
        assert_eq!(
            errors("def f():\n    x = 1\n    def g():\n        global x\n        nonlocal x\n"),
            vec![ResolveErrorKind::GlobalAndNonlocal("x".into())]
        );
        assert_eq!(
            errors("def f(a):\n    def g(a):\n        nonlocal a\n"),
            vec![ResolveErrorKind::ParameterNonlocal("a".into())]
        );
    }

    #[test]
    fn nonlocal_does_not_reach_module_scope() {
        assert_eq!(
            errors("x = 1\ndef f():\n    nonlocal x\n"),
            vec![ResolveErrorKind::NonlocalNotFound("x".into())]
        );
    }
}
