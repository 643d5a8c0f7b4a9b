//! Bytecode compiler - transforms a resolved AST into code objects

use std::rc::Rc;

use indexmap::IndexSet;

use crate::ast::{
    Arg, BinOp, BoolOp, CmpOp, Comprehension, ExceptHandler, Expr, ExprKind, FunctionDef, Ident,
    Literal, Module, Parameters, ScopeId, Stmt, StmtKind, TryStmt, UnaryOp,
};
use crate::lexer::{LineIndex, Span};
use crate::resolver::{NameClass, Scope, ScopeKind, ScopeTable};
use crate::vm::ops;

use super::chunk::Chunk;
use super::code::{CodeId, CodeKind, CodeObject, ExceptionEntry, HandlerKind, ParamSpec};
use super::error::{CompileError, CompileErrorKind};
use super::opcode::{OpCode, CALL_HAS_KWARGS, MAKE_DEFAULTS, MAKE_KWDEFAULTS};
use super::value::Value;

/// A protected range under construction.
///
/// Protections are paused while inline cleanup code for `return`,
/// `break` and `continue` is emitted, so a range may end up split into
/// several segments sharing one handler.
struct Protection {
    kind: HandlerKind,
    depth: u16,
    segments: Vec<(u32, u32)>,
    open_at: Option<u32>,
}

/// A block that `return`/`break`/`continue` may have to leave early
enum FBlock<'a> {
    Loop {
        start: usize,
        breaks: Vec<usize>,
        is_for: bool,
    },
    TryExcept {
        protection: usize,
    },
    Finally {
        protection: usize,
        body: &'a [Stmt],
    },
    With {
        protection: usize,
        manager: u16,
    },
}

/// Compiler state for one code object
struct Unit<'a> {
    scope: ScopeId,
    kind: CodeKind,
    name: String,
    first_line: u32,
    chunk: Chunk,
    names: IndexSet<Rc<str>>,
    varnames: Vec<String>,
    params: ParamSpec,
    exception_table: Vec<ExceptionEntry>,
    protections: Vec<Protection>,
    fblocks: Vec<FBlock<'a>>,
    /// Values a statement boundary leaves on the operand stack
    /// (iterators of enclosing `for` loops)
    depth: u16,
    /// Nesting of active exception handlers; selects the `.excN` slot
    handler_depth: u16,
    with_depth: u16,
    line: u32,
}

impl Unit<'_> {
    fn new(scope: &Scope, kind: CodeKind, name: String, line: u32) -> Self {
        Self {
            scope: scope.id,
            kind,
            name,
            first_line: line,
            chunk: Chunk::new(),
            names: IndexSet::new(),
            varnames: scope.varnames.clone(),
            params: ParamSpec::default(),
            exception_table: Vec::new(),
            protections: Vec::new(),
            fblocks: Vec::new(),
            depth: 0,
            handler_depth: 0,
            with_depth: 0,
            line,
        }
    }
}

/// Bytecode compiler
///
/// Walks a module whose names were classified by the resolver and emits
/// one immutable [`CodeObject`] per scope.
pub struct Compiler<'a> {
    scopes: &'a ScopeTable,
    lines: &'a LineIndex,
    filename: Rc<str>,
    units: Vec<Unit<'a>>,
    errors: Vec<CompileError>,
}

impl<'a> Compiler<'a> {
    #[must_use]
    pub fn new(scopes: &'a ScopeTable, lines: &'a LineIndex, filename: &str) -> Self {
        Self {
            scopes,
            lines,
            filename: Rc::from(filename),
            units: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Compile a module to its top-level code object
    pub fn compile_module(mut self, module: &'a Module) -> Result<Rc<CodeObject>, Vec<CompileError>> {
        let scope = self.scopes.module();
        self.units
            .push(Unit::new(scope, CodeKind::Module, "<module>".to_string(), 1));
        self.block(&module.body);
        self.emit_const(Value::None, module.span);
        self.emit(OpCode::Return);
        let code = self.finish_unit();

        if self.errors.is_empty() {
            Ok(code)
        } else {
            Err(self.errors)
        }
    }

    // ==================== Emission helpers ====================

    fn unit(&self) -> &Unit<'a> {
        self.units.last().expect("compiler always has an active unit")
    }

    fn unit_mut(&mut self) -> &mut Unit<'a> {
        self.units
            .last_mut()
            .expect("compiler always has an active unit")
    }

    fn scope(&self) -> &'a Scope {
        self.scopes.get(self.unit().scope)
    }

    fn error(&mut self, kind: CompileErrorKind, span: Span) {
        self.errors.push(CompileError::new(kind, span));
    }

    fn set_line(&mut self, span: Span) {
        let line = self.lines.line(span.start);
        self.unit_mut().line = line;
    }

    fn offset(&self) -> usize {
        self.unit().chunk.current_offset()
    }

    fn emit(&mut self, op: OpCode) {
        let unit = self.unit_mut();
        let line = unit.line;
        unit.chunk.write_op(op, line);
    }

    fn emit_u8(&mut self, op: OpCode, operand: u8) {
        let unit = self.unit_mut();
        let line = unit.line;
        unit.chunk.write_op_u8(op, operand, line);
    }

    fn emit_u16(&mut self, op: OpCode, operand: u16) {
        let unit = self.unit_mut();
        let line = unit.line;
        unit.chunk.write_op_u16(op, operand, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let unit = self.unit_mut();
        let line = unit.line;
        unit.chunk.emit_jump(op, line)
    }

    fn patch_jump(&mut self, at: usize, span: Span) {
        if self.unit_mut().chunk.patch_jump(at).is_none() {
            self.error(CompileErrorKind::JumpTooFar, span);
        }
    }

    fn emit_loop(&mut self, start: usize, span: Span) {
        let unit = self.unit_mut();
        let line = unit.line;
        if unit.chunk.emit_loop(start, line).is_none() {
            self.error(CompileErrorKind::JumpTooFar, span);
        }
    }

    fn emit_const(&mut self, value: Value, span: Span) {
        match self.unit_mut().chunk.add_constant(value) {
            Some(index) => self.emit_u16(OpCode::LoadConst, index),
            None => self.error(CompileErrorKind::TooManyConstants, span),
        }
    }

    fn name_index(&mut self, name: &str, span: Span) -> u16 {
        let names = &mut self.unit_mut().names;
        let index = match names.get_index_of(name) {
            Some(i) => i,
            None => names.insert_full(Rc::from(name)).0,
        };
        u16::try_from(index).unwrap_or_else(|_| {
            self.error(CompileErrorKind::TooManyNames, span);
            0
        })
    }

    fn emit_name(&mut self, op: OpCode, name: &str, span: Span) {
        let index = self.name_index(name, span);
        self.emit_u16(op, index);
    }

    /// Slot of a local, adding hidden compiler temporaries on first use
    fn slot(&mut self, name: &str, span: Span) -> u16 {
        let varnames = &mut self.unit_mut().varnames;
        let index = match varnames.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                varnames.push(name.to_string());
                varnames.len() - 1
            }
        };
        u16::try_from(index).unwrap_or_else(|_| {
            self.error(CompileErrorKind::TooManyLocals, span);
            0
        })
    }

    fn deref_index(&mut self, name: &str, span: Span) -> u16 {
        let index = self.scope().deref_index(name).unwrap_or(0);
        u16::try_from(index).unwrap_or_else(|_| {
            self.error(CompileErrorKind::TooManyLocals, span);
            0
        })
    }

    fn exc_slot(&mut self, span: Span) -> u16 {
        let name = format!(".exc{}", self.unit().handler_depth);
        self.slot(&name, span)
    }

    // ==================== Names ====================

    fn classify(&self, name: &str) -> NameClass {
        self.scopes.classify(self.unit().scope, name)
    }

    fn load_name(&mut self, name: &str, span: Span) {
        match self.classify(name) {
            NameClass::Fast => {
                let slot = self.slot(name, span);
                self.emit_u16(OpCode::LoadFast, slot);
            }
            NameClass::Deref => {
                let index = self.deref_index(name, span);
                self.emit_u16(OpCode::LoadDeref, index);
            }
            NameClass::Global => self.emit_name(OpCode::LoadGlobal, name, span),
            NameClass::Builtin => self.emit_name(OpCode::LoadBuiltin, name, span),
            NameClass::ClassName => self.emit_name(OpCode::LoadName, name, span),
        }
    }

    fn store_name(&mut self, name: &str, span: Span) {
        match self.classify(name) {
            NameClass::Fast => {
                let slot = self.slot(name, span);
                self.emit_u16(OpCode::StoreFast, slot);
            }
            NameClass::Deref => {
                let index = self.deref_index(name, span);
                self.emit_u16(OpCode::StoreDeref, index);
            }
            NameClass::Global | NameClass::Builtin => {
                self.emit_name(OpCode::StoreGlobal, name, span);
            }
            NameClass::ClassName => self.emit_name(OpCode::StoreName, name, span),
        }
    }

    fn delete_name(&mut self, name: &str, span: Span) {
        match self.classify(name) {
            NameClass::Fast => {
                let slot = self.slot(name, span);
                self.emit_u16(OpCode::DeleteFast, slot);
            }
            NameClass::Deref => {
                let index = self.deref_index(name, span);
                self.emit_u16(OpCode::DeleteDeref, index);
            }
            NameClass::Global | NameClass::Builtin => {
                self.emit_name(OpCode::DeleteGlobal, name, span);
            }
            NameClass::ClassName => self.emit_name(OpCode::DeleteName, name, span),
        }
    }

    // ==================== Protections ====================

    fn protect(&mut self, kind: HandlerKind) -> usize {
        let offset = self.offset() as u32;
        let unit = self.unit_mut();
        unit.protections.push(Protection {
            kind,
            depth: unit.depth,
            segments: Vec::new(),
            open_at: Some(offset),
        });
        unit.protections.len() - 1
    }

    /// Close the current segment; returns whether it was open
    fn pause(&mut self, index: usize) -> bool {
        let offset = self.offset() as u32;
        let protection = &mut self.unit_mut().protections[index];
        match protection.open_at.take() {
            Some(start) => {
                if start < offset {
                    protection.segments.push((start, offset));
                }
                true
            }
            None => false,
        }
    }

    fn resume(&mut self, index: usize) {
        let offset = self.offset() as u32;
        self.unit_mut().protections[index].open_at = Some(offset);
    }

    fn unprotect(&mut self) -> Option<Protection> {
        let index = self.unit().protections.len().checked_sub(1)?;
        self.pause(index);
        self.unit_mut().protections.pop()
    }

    /// Publish a finished protection with its handler at the current offset
    fn install(&mut self, protection: Option<Protection>) {
        let Some(protection) = protection else {
            return;
        };
        let handler = self.offset() as u32;
        let unit = self.unit_mut();
        for (start, end) in protection.segments {
            unit.exception_table.push(ExceptionEntry {
                start,
                end,
                handler,
                depth: protection.depth,
                kind: protection.kind,
            });
        }
    }

    // ==================== Units ====================

    fn enter_unit(&mut self, scope: ScopeId, kind: CodeKind, name: String, span: Span) {
        let line = self.lines.line(span.start);
        let scope = self.scopes.get(scope);
        self.units.push(Unit::new(scope, kind, name, line));
    }

    fn finish_unit(&mut self) -> Rc<CodeObject> {
        let unit = self
            .units
            .pop()
            .expect("finish_unit called with an active unit");
        let scope = self.scopes.get(unit.scope);
        let free_sources = match self.units.last() {
            Some(parent) => {
                let parent = self.scopes.get(parent.scope);
                scope
                    .freevars
                    .iter()
                    .map(|name| parent.deref_index(name).unwrap_or(0) as u16)
                    .collect()
            }
            None => Vec::new(),
        };
        Rc::new(CodeObject {
            id: CodeId::fresh(),
            name: unit.name,
            kind: unit.kind,
            filename: Rc::clone(&self.filename),
            first_line: unit.first_line,
            chunk: unit.chunk,
            varnames: unit.varnames,
            cellvars: scope.cellvars.clone(),
            freevars: scope.freevars.clone(),
            names: unit.names.into_iter().collect(),
            params: unit.params,
            exception_table: unit.exception_table,
            is_generator: scope.is_generator,
            free_sources,
        })
    }

    /// Copy captured parameters into their cells
    fn prologue(&mut self) {
        for (slot, cell) in self.scope().captured_params() {
            self.emit_u16(OpCode::LoadFast, slot as u16);
            self.emit_u16(OpCode::StoreDeref, cell as u16);
        }
    }

    fn param_spec(params: &Parameters) -> ParamSpec {
        let positional = params.positional.len() as u16;
        let kwonly = params.kwonly.len() as u16;
        let vararg = params.vararg.as_ref().map(|_| positional + kwonly);
        let kwarg = params
            .kwarg
            .as_ref()
            .map(|_| positional + kwonly + u16::from(vararg.is_some()));
        ParamSpec {
            positional,
            kwonly,
            defaults: params.positional.iter().filter(|p| p.default.is_some()).count() as u16,
            vararg,
            kwarg,
        }
    }

    /// Evaluate defaults and build a function object from `code`
    fn make_function(&mut self, params: Option<&'a Parameters>, code: Rc<CodeObject>, span: Span) {
        let mut flags = 0;
        if let Some(params) = params {
            let defaults: Vec<&Expr> = params
                .positional
                .iter()
                .filter_map(|p| p.default.as_ref())
                .collect();
            if !defaults.is_empty() {
                for default in &defaults {
                    self.expr(default);
                }
                self.emit_u16(OpCode::BuildTuple, defaults.len() as u16);
                flags |= MAKE_DEFAULTS;
            }
            let kwdefaults: Vec<(&Ident, &Expr)> = params
                .kwonly
                .iter()
                .filter_map(|p| p.default.as_ref().map(|d| (&p.name, d)))
                .collect();
            if !kwdefaults.is_empty() {
                for (name, default) in &kwdefaults {
                    self.emit_const(Value::str(&name.name), name.span);
                    self.expr(default);
                }
                self.emit_u16(OpCode::BuildDict, kwdefaults.len() as u16);
                flags |= MAKE_KWDEFAULTS;
            }
        }
        self.emit_const(Value::Code(code), span);
        self.emit_u8(OpCode::MakeFunction, flags);
    }

    fn function_def(&mut self, def: &'a FunctionDef, span: Span) {
        self.enter_unit(def.scope, CodeKind::Function, def.name.name.clone(), span);
        self.unit_mut().params = Self::param_spec(&def.params);
        self.prologue();
        self.block(&def.body);
        self.emit_const(Value::None, span);
        self.emit(OpCode::Return);
        let code = self.finish_unit();

        self.set_line(span);
        self.make_function(Some(&def.params), code, span);
        self.store_name(&def.name.name, def.name.span);
    }

    fn class_def(&mut self, class: &'a crate::ast::ClassDef, span: Span) {
        self.enter_unit(class.scope, CodeKind::Class, class.name.name.clone(), span);
        self.block(&class.body);
        self.emit_const(Value::None, span);
        self.emit(OpCode::Return);
        let code = self.finish_unit();

        self.set_line(span);
        self.make_function(None, code, span);
        match &class.base {
            Some(base) => self.expr(base),
            None => self.emit_const(Value::None, span),
        }
        self.emit_const(Value::str(&class.name.name), span);
        self.emit(OpCode::BuildClass);
        self.store_name(&class.name.name, class.name.span);
    }

    // ==================== Statements ====================

    fn block(&mut self, stmts: &'a [Stmt]) {
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &'a Stmt) {
        self.set_line(stmt.span);
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                // Docstrings and other bare constants have no effect
                if self.constant(expr).is_some() {
                    return;
                }
                self.expr(expr);
                self.emit(OpCode::Pop);
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value);
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(OpCode::Dup);
                    }
                    self.assign(target);
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::If { cond, body, orelse } => {
                self.expr(cond);
                let else_jump = self.emit_jump(OpCode::PopJumpIfFalse);
                self.block(body);
                if orelse.is_empty() {
                    self.patch_jump(else_jump, span);
                } else {
                    let end = self.emit_jump(OpCode::Jump);
                    self.patch_jump(else_jump, span);
                    self.block(orelse);
                    self.patch_jump(end, span);
                }
            }
            StmtKind::While { cond, body, orelse } => self.while_stmt(cond, body, orelse, span),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_stmt(target, iter, body, orelse, span),
            StmtKind::FunctionDef(def) => self.function_def(def, span),
            StmtKind::ClassDef(class) => self.class_def(class, span),
            StmtKind::Try(t) => self.try_stmt(t, span),
            StmtKind::With {
                context,
                name,
                body,
            } => self.with_stmt(context, name.as_ref(), body, span),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.emit_name(OpCode::ImportName, &alias.name.name, alias.name.span);
                    let bound = alias.bound_name();
                    self.store_name(&bound.name, bound.span);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                self.emit_name(OpCode::ImportName, &module.name, module.span);
                for alias in names {
                    self.emit_name(OpCode::ImportFrom, &alias.name.name, alias.name.span);
                    let bound = alias.bound_name();
                    self.store_name(&bound.name, bound.span);
                }
                self.emit(OpCode::Pop);
            }
            StmtKind::Return(value) => self.return_stmt(value.as_ref(), span),
            StmtKind::Break => self.loop_exit(true, span),
            StmtKind::Continue => self.loop_exit(false, span),
            StmtKind::Raise(value) => match value {
                Some(value) => {
                    self.expr(value);
                    self.emit_u8(OpCode::Raise, 1);
                }
                None if self.unit().handler_depth > 0 => {
                    let name = format!(".exc{}", self.unit().handler_depth - 1);
                    let slot = self.slot(&name, span);
                    self.emit_u16(OpCode::LoadFast, slot);
                    self.emit(OpCode::Reraise);
                }
                None => self.emit_u8(OpCode::Raise, 0),
            },
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                let ok = self.emit_jump(OpCode::PopJumpIfTrue);
                self.emit_name(OpCode::LoadBuiltin, "AssertionError", span);
                if let Some(msg) = msg {
                    self.expr(msg);
                    self.emit_u8(OpCode::Call, 1);
                } else {
                    self.emit_u8(OpCode::Call, 0);
                }
                self.emit_u8(OpCode::Raise, 1);
                self.patch_jump(ok, span);
            }
        }
    }

    fn while_stmt(&mut self, cond: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt], span: Span) {
        let start = self.offset();
        let always = self.constant(cond).is_some_and(|c| c.is_truthy());
        let exit = if always {
            None
        } else {
            self.expr(cond);
            Some(self.emit_jump(OpCode::PopJumpIfFalse))
        };

        self.unit_mut().fblocks.push(FBlock::Loop {
            start,
            breaks: Vec::new(),
            is_for: false,
        });
        self.block(body);
        self.set_line(span);
        self.emit_loop(start, span);
        let breaks = self.pop_loop();

        if let Some(exit) = exit {
            self.patch_jump(exit, span);
        }
        self.block(orelse);
        for at in breaks {
            self.patch_jump(at, span);
        }
    }

    fn for_stmt(
        &mut self,
        target: &'a Expr,
        iter: &'a Expr,
        body: &'a [Stmt],
        orelse: &'a [Stmt],
        span: Span,
    ) {
        self.expr(iter);
        self.emit(OpCode::GetIter);
        self.unit_mut().depth += 1;

        let start = self.offset();
        let exit = self.emit_jump(OpCode::ForIter);
        self.unit_mut().fblocks.push(FBlock::Loop {
            start,
            breaks: Vec::new(),
            is_for: true,
        });
        self.assign(target);
        self.block(body);
        self.set_line(span);
        self.emit_loop(start, span);
        self.patch_jump(exit, span);
        let breaks = self.pop_loop();
        self.unit_mut().depth -= 1;

        self.block(orelse);
        for at in breaks {
            self.patch_jump(at, span);
        }
    }

    fn pop_loop(&mut self) -> Vec<usize> {
        match self.unit_mut().fblocks.pop() {
            Some(FBlock::Loop { breaks, .. }) => breaks,
            _ => Vec::new(),
        }
    }

    /// Emit cleanup for every block from the innermost down to `until`,
    /// returning the protections that were paused
    fn exit_blocks(&mut self, until: usize, span: Span) -> Vec<usize> {
        let mut paused = Vec::new();
        let mut i = self.unit().fblocks.len();
        while i > until {
            i -= 1;
            match &self.unit().fblocks[i] {
                FBlock::Loop { .. } => {}
                FBlock::TryExcept { protection } => {
                    let p = *protection;
                    if self.pause(p) {
                        paused.push(p);
                    }
                }
                FBlock::Finally { protection, body } => {
                    let (p, body) = (*protection, *body);
                    if self.pause(p) {
                        paused.push(p);
                    }
                    let saved = self.unit_mut().fblocks.split_off(i);
                    self.block(body);
                    self.unit_mut().fblocks.extend(saved);
                    self.set_line(span);
                }
                FBlock::With {
                    protection,
                    manager,
                } => {
                    let (p, manager) = (*protection, *manager);
                    if self.pause(p) {
                        paused.push(p);
                    }
                    self.call_exit_none(manager, span);
                }
            }
        }
        paused
    }

    fn return_stmt(&mut self, value: Option<&'a Expr>, span: Span) {
        match value {
            Some(value) => self.expr(value),
            None => self.emit_const(Value::None, span),
        }
        let needs_cleanup = self
            .unit()
            .fblocks
            .iter()
            .any(|b| matches!(b, FBlock::Finally { .. } | FBlock::With { .. }));
        if !needs_cleanup {
            self.emit(OpCode::Return);
            return;
        }
        let slot = self.slot(".return", span);
        self.emit_u16(OpCode::StoreFast, slot);
        let paused = self.exit_blocks(0, span);
        self.emit_u16(OpCode::LoadFast, slot);
        self.emit(OpCode::Return);
        for p in paused {
            self.resume(p);
        }
    }

    fn loop_exit(&mut self, is_break: bool, span: Span) {
        let Some(index) = self
            .unit()
            .fblocks
            .iter()
            .rposition(|b| matches!(b, FBlock::Loop { .. }))
        else {
            return;
        };
        let paused = self.exit_blocks(index + 1, span);
        let (start, is_for) = match &self.unit().fblocks[index] {
            FBlock::Loop { start, is_for, .. } => (*start, *is_for),
            _ => return,
        };
        if is_break {
            if is_for {
                self.emit(OpCode::Pop);
            }
            let at = self.emit_jump(OpCode::Jump);
            if let Some(FBlock::Loop { breaks, .. }) = self.unit_mut().fblocks.get_mut(index) {
                breaks.push(at);
            }
        } else {
            self.emit_loop(start, span);
        }
        for p in paused {
            self.resume(p);
        }
    }

    fn try_stmt(&mut self, t: &'a TryStmt, span: Span) {
        let finally = if t.finalbody.is_empty() {
            None
        } else {
            let protection = self.protect(HandlerKind::Finally);
            self.unit_mut().fblocks.push(FBlock::Finally {
                protection,
                body: &t.finalbody,
            });
            Some(())
        };

        if t.handlers.is_empty() {
            self.block(&t.body);
            self.block(&t.orelse);
        } else {
            self.try_except(t, span);
        }

        if finally.is_some() {
            self.unit_mut().fblocks.pop();
            let protection = self.unprotect();
            self.block(&t.finalbody);
            let end = self.emit_jump(OpCode::Jump);

            self.install(protection);
            let slot = self.exc_slot(span);
            self.emit_u16(OpCode::StoreFast, slot);
            self.unit_mut().handler_depth += 1;
            self.block(&t.finalbody);
            self.unit_mut().handler_depth -= 1;
            self.emit_u16(OpCode::LoadFast, slot);
            self.emit(OpCode::Reraise);
            self.patch_jump(end, span);
        }
    }

    fn try_except(&mut self, t: &'a TryStmt, span: Span) {
        let protection = self.protect(HandlerKind::Except);
        self.unit_mut()
            .fblocks
            .push(FBlock::TryExcept { protection });
        self.block(&t.body);
        self.unit_mut().fblocks.pop();
        let protection = self.unprotect();
        let to_else = self.emit_jump(OpCode::Jump);

        self.install(protection);
        let mut ends = Vec::new();
        let mut catch_all = false;
        for handler in &t.handlers {
            self.set_line(handler.span);
            match &handler.kind {
                Some(kind) => {
                    self.emit(OpCode::Dup);
                    self.expr(kind);
                    self.emit(OpCode::MatchException);
                    let next = self.emit_jump(OpCode::PopJumpIfFalse);
                    self.handler_body(handler, &mut ends);
                    self.patch_jump(next, handler.span);
                }
                None => {
                    self.handler_body(handler, &mut ends);
                    catch_all = true;
                    break;
                }
            }
        }
        if !catch_all {
            self.emit(OpCode::Reraise);
        }

        self.patch_jump(to_else, span);
        self.block(&t.orelse);
        for at in ends {
            self.patch_jump(at, span);
        }
    }

    fn handler_body(&mut self, handler: &'a ExceptHandler, ends: &mut Vec<usize>) {
        let slot = self.exc_slot(handler.span);
        self.emit_u16(OpCode::StoreFast, slot);
        if let Some(name) = &handler.name {
            self.emit_u16(OpCode::LoadFast, slot);
            self.store_name(&name.name, name.span);
        }
        self.unit_mut().handler_depth += 1;
        self.block(&handler.body);
        self.unit_mut().handler_depth -= 1;
        ends.push(self.emit_jump(OpCode::Jump));
    }

    fn with_stmt(&mut self, context: &'a Expr, name: Option<&'a Ident>, body: &'a [Stmt], span: Span) {
        self.expr(context);
        let manager = format!(".with{}", self.unit().with_depth);
        let manager = self.slot(&manager, span);
        self.emit_u16(OpCode::StoreFast, manager);
        self.emit_u16(OpCode::LoadFast, manager);
        self.emit_name(OpCode::LoadAttr, "__enter__", span);
        self.emit_u8(OpCode::Call, 0);
        match name {
            Some(name) => self.store_name(&name.name, name.span),
            None => self.emit(OpCode::Pop),
        }

        let protection = self.protect(HandlerKind::WithCleanup);
        self.unit_mut().fblocks.push(FBlock::With {
            protection,
            manager,
        });
        self.unit_mut().with_depth += 1;
        self.block(body);
        self.unit_mut().with_depth -= 1;
        self.unit_mut().fblocks.pop();
        let protection = self.unprotect();

        self.set_line(span);
        self.call_exit_none(manager, span);
        let end = self.emit_jump(OpCode::Jump);

        self.install(protection);
        let exc = self.exc_slot(span);
        self.emit_u16(OpCode::StoreFast, exc);
        self.emit_u16(OpCode::LoadFast, manager);
        self.emit_name(OpCode::LoadAttr, "__exit__", span);
        self.emit_name(OpCode::LoadBuiltin, "type", span);
        self.emit_u16(OpCode::LoadFast, exc);
        self.emit_u8(OpCode::Call, 1);
        self.emit_u16(OpCode::LoadFast, exc);
        self.emit_const(Value::None, span);
        self.emit_u8(OpCode::Call, 3);
        let swallowed = self.emit_jump(OpCode::PopJumpIfTrue);
        self.emit_u16(OpCode::LoadFast, exc);
        self.emit(OpCode::Reraise);
        self.patch_jump(swallowed, span);
        self.patch_jump(end, span);
    }

    /// `manager.__exit__(None, None, None)`, result discarded
    fn call_exit_none(&mut self, manager: u16, span: Span) {
        self.emit_u16(OpCode::LoadFast, manager);
        self.emit_name(OpCode::LoadAttr, "__exit__", span);
        for _ in 0..3 {
            self.emit_const(Value::None, span);
        }
        self.emit_u8(OpCode::Call, 3);
        self.emit(OpCode::Pop);
    }

    // ==================== Targets ====================

    fn assign(&mut self, target: &'a Expr) {
        let span = target.span;
        match &target.kind {
            ExprKind::Name(name) => self.store_name(name, span),
            ExprKind::Attribute { object, name } => {
                self.expr(object);
                self.emit_name(OpCode::StoreAttr, &name.name, name.span);
            }
            ExprKind::Subscript { object, index } => {
                self.expr(object);
                self.subscript_index(index);
                self.emit(OpCode::StoreSubscr);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => self.unpack(items, span),
            ExprKind::Starred(_) => self.error(
                CompileErrorKind::InvalidStarred("starred assignment target must be in a list or tuple"),
                span,
            ),
            other => self.error(
                CompileErrorKind::InvalidAssignmentTarget(describe(other)),
                span,
            ),
        }
    }

    fn unpack(&mut self, items: &'a [Expr], span: Span) {
        let stars: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.kind, ExprKind::Starred(_)))
            .map(|(i, _)| i)
            .collect();
        match stars.as_slice() {
            [] => match u16::try_from(items.len()) {
                Ok(n) => self.emit_u16(OpCode::UnpackSequence, n),
                Err(_) => self.error(CompileErrorKind::TooManyItems, span),
            },
            [star] => {
                let before = *star;
                let after = items.len() - star - 1;
                match (u8::try_from(before), u8::try_from(after)) {
                    (Ok(b), Ok(a)) => {
                        self.emit_u16(OpCode::UnpackEx, u16::from(b) | (u16::from(a) << 8));
                    }
                    _ => self.error(CompileErrorKind::TooManyItems, span),
                }
            }
            _ => {
                self.error(
                    CompileErrorKind::InvalidStarred("multiple starred expressions in assignment"),
                    span,
                );
                return;
            }
        }
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => self.assign(inner),
                _ => self.assign(item),
            }
        }
    }

    fn aug_assign(&mut self, target: &'a Expr, op: BinOp, value: &'a Expr) {
        let span = target.span;
        match &target.kind {
            ExprKind::Name(name) => {
                self.load_name(name, span);
                self.expr(value);
                self.emit(op.into());
                self.store_name(name, span);
            }
            ExprKind::Attribute { object, name } => {
                self.expr(object);
                self.emit(OpCode::Dup);
                self.emit_name(OpCode::LoadAttr, &name.name, name.span);
                self.expr(value);
                self.emit(op.into());
                self.emit(OpCode::RotTwo);
                self.emit_name(OpCode::StoreAttr, &name.name, name.span);
            }
            ExprKind::Subscript { object, index } => {
                self.expr(object);
                self.subscript_index(index);
                self.emit(OpCode::DupTwo);
                self.emit(OpCode::LoadSubscr);
                self.expr(value);
                self.emit(op.into());
                self.emit(OpCode::RotThree);
                self.emit(OpCode::StoreSubscr);
            }
            other => self.error(
                CompileErrorKind::InvalidAssignmentTarget(describe(other)),
                span,
            ),
        }
    }

    fn delete(&mut self, target: &'a Expr) {
        let span = target.span;
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name, span),
            ExprKind::Attribute { object, name } => {
                self.expr(object);
                self.emit_name(OpCode::DeleteAttr, &name.name, name.span);
            }
            ExprKind::Subscript { object, index } => {
                self.expr(object);
                self.subscript_index(index);
                self.emit(OpCode::DeleteSubscr);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete(item);
                }
            }
            other => self.error(CompileErrorKind::InvalidDeleteTarget(describe(other)), span),
        }
    }

    // ==================== Expressions ====================

    /// Compile-time value of a constant expression.
    ///
    /// Arithmetic that would fail at run time (division by zero, overflow)
    /// is not folded so the error surfaces normally.
    fn constant(&self, expr: &Expr) -> Option<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Some(match lit {
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::str(s),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::None => Value::None,
            }),
            ExprKind::Unary { op, operand } => {
                let value = self.constant(operand)?;
                if !is_number(&value) {
                    return None;
                }
                ops::unary_numeric(*op, &value)?.ok()
            }
            ExprKind::Binary { op, left, right } => {
                let (a, b) = (self.constant(left)?, self.constant(right)?);
                if !is_number(&a) || !is_number(&b) {
                    return None;
                }
                ops::binary_numeric(*op, &a, &b)?.ok()
            }
            ExprKind::Compare { left, rest } => {
                let mut a = self.constant(left)?;
                if !is_number(&a) {
                    return None;
                }
                let mut result = true;
                for (op, right) in rest {
                    let b = self.constant(right)?;
                    if !is_number(&b) {
                        return None;
                    }
                    let holds = match op {
                        CmpOp::Eq => a.py_eq(&b),
                        CmpOp::Ne => !a.py_eq(&b),
                        CmpOp::Lt => a.py_cmp(&b)?.is_lt(),
                        CmpOp::Le => a.py_cmp(&b)?.is_le(),
                        CmpOp::Gt => a.py_cmp(&b)?.is_gt(),
                        CmpOp::Ge => a.py_cmp(&b)?.is_ge(),
                        _ => return None,
                    };
                    result &= holds;
                    a = b;
                }
                Some(Value::Bool(result))
            }
            ExprKind::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|item| match item.kind {
                        ExprKind::Starred(_) => None,
                        _ => self.constant(item),
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(Value::tuple(values))
            }
            _ => None,
        }
    }

    fn expr(&mut self, expr: &'a Expr) {
        let span = expr.span;
        if let Some(value) = self.constant(expr) {
            self.emit_const(value, span);
            return;
        }
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Name(name) => self.load_name(name, span),
            ExprKind::List(items) => self.sequence(items, false, span),
            ExprKind::Tuple(items) => self.sequence(items, true, span),
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.expr(key);
                    self.expr(value);
                }
                match u16::try_from(entries.len()) {
                    Ok(n) => self.emit_u16(OpCode::BuildDict, n),
                    Err(_) => self.error(CompileErrorKind::TooManyItems, span),
                }
            }
            ExprKind::Starred(_) => self.error(
                CompileErrorKind::InvalidStarred("can't use starred expression here"),
                span,
            ),
            ExprKind::Unary { op, operand } => {
                self.expr(operand);
                self.emit(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Pos => OpCode::Pos,
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Invert => OpCode::Invert,
                });
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(left);
                self.expr(right);
                self.emit((*op).into());
            }
            ExprKind::BoolOp { op, left, right } => {
                self.expr(left);
                let end = self.emit_jump(match op {
                    BoolOp::And => OpCode::JumpIfFalseOrPop,
                    BoolOp::Or => OpCode::JumpIfTrueOrPop,
                });
                self.expr(right);
                self.patch_jump(end, span);
            }
            ExprKind::Compare { left, rest } => self.compare(left, rest, span),
            ExprKind::IfExp {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                let else_jump = self.emit_jump(OpCode::PopJumpIfFalse);
                self.expr(then);
                let end = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump, span);
                self.expr(otherwise);
                self.patch_jump(end, span);
            }
            ExprKind::Call { func, args } => self.call(func, args, span),
            ExprKind::Attribute { object, name } => {
                self.expr(object);
                self.set_line(span);
                self.emit_name(OpCode::LoadAttr, &name.name, name.span);
            }
            ExprKind::Subscript { object, index } => {
                self.expr(object);
                self.subscript_index(index);
                self.set_line(span);
                self.emit(OpCode::LoadSubscr);
            }
            ExprKind::Slice { .. } => self.subscript_index(expr),
            ExprKind::Lambda(lambda) => {
                self.enter_unit(lambda.scope, CodeKind::Lambda, "<lambda>".to_string(), span);
                self.unit_mut().params = Self::param_spec(&lambda.params);
                self.prologue();
                self.expr(&lambda.body);
                self.emit(OpCode::Return);
                let code = self.finish_unit();
                self.make_function(Some(&lambda.params), code, span);
            }
            ExprKind::ListComp(comp) => self.comprehension(comp, ComprehensionKind::List, span),
            ExprKind::DictComp(comp) => self.comprehension(comp, ComprehensionKind::Dict, span),
            ExprKind::GeneratorExp(comp) => {
                self.comprehension(comp, ComprehensionKind::Generator, span);
            }
            ExprKind::Yield(value) => {
                match value {
                    Some(value) => self.expr(value),
                    None => self.emit_const(Value::None, span),
                }
                self.emit(OpCode::Yield);
            }
        }
    }

    fn subscript_index(&mut self, index: &'a Expr) {
        if let ExprKind::Slice { lower, upper, step } = &index.kind {
            for bound in [lower, upper, step] {
                match bound {
                    Some(bound) => self.expr(bound),
                    None => self.emit_const(Value::None, index.span),
                }
            }
            self.emit(OpCode::BuildSlice);
        } else {
            self.expr(index);
        }
    }

    /// List or tuple display; starred items go through a list builder
    fn sequence(&mut self, items: &'a [Expr], is_tuple: bool, span: Span) {
        let has_star = items.iter().any(|e| matches!(e.kind, ExprKind::Starred(_)));
        if has_star {
            self.emit_u16(OpCode::BuildList, 0);
            for item in items {
                match &item.kind {
                    ExprKind::Starred(inner) => {
                        self.expr(inner);
                        self.emit_u16(OpCode::ListExtend, 1);
                    }
                    _ => {
                        self.expr(item);
                        self.emit_u16(OpCode::ListAppend, 1);
                    }
                }
            }
            if is_tuple {
                self.emit(OpCode::ListToTuple);
            }
            return;
        }
        for item in items {
            self.expr(item);
        }
        let op = if is_tuple {
            OpCode::BuildTuple
        } else {
            OpCode::BuildList
        };
        match u16::try_from(items.len()) {
            Ok(n) => self.emit_u16(op, n),
            Err(_) => self.error(CompileErrorKind::TooManyItems, span),
        }
    }

    fn compare(&mut self, left: &'a Expr, rest: &'a [(CmpOp, Expr)], span: Span) {
        self.expr(left);
        let Some(((last_op, last), init)) = rest.split_last() else {
            return;
        };
        let mut cleanups = Vec::new();
        for (op, right) in init {
            self.expr(right);
            self.emit(OpCode::Dup);
            self.emit(OpCode::RotThree);
            self.emit((*op).into());
            cleanups.push(self.emit_jump(OpCode::JumpIfFalseOrPop));
        }
        self.expr(last);
        self.emit((*last_op).into());
        if cleanups.is_empty() {
            return;
        }
        let end = self.emit_jump(OpCode::Jump);
        for at in cleanups {
            self.patch_jump(at, span);
        }
        self.emit(OpCode::RotTwo);
        self.emit(OpCode::Pop);
        self.patch_jump(end, span);
    }

    fn call(&mut self, func: &'a Expr, args: &'a [Arg], span: Span) {
        self.expr(func);
        let has_unpack = args
            .iter()
            .any(|a| matches!(a, Arg::Star(_) | Arg::DoubleStar(_)));
        if has_unpack {
            self.call_unpacked(args);
            self.set_line(span);
            return;
        }

        let mut keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(value) => self.expr(value),
                Arg::Keyword(name, _) => keywords.push(name),
                Arg::Star(_) | Arg::DoubleStar(_) => {}
            }
        }
        for arg in args {
            if let Arg::Keyword(_, value) = arg {
                self.expr(value);
            }
        }
        let Ok(count) = u8::try_from(args.len()) else {
            self.error(CompileErrorKind::TooManyArguments, span);
            return;
        };
        self.set_line(span);
        if keywords.is_empty() {
            self.emit_u8(OpCode::Call, count);
        } else {
            let names = keywords.iter().map(|k| Value::str(&k.name)).collect();
            self.emit_const(Value::tuple(names), span);
            self.emit_u8(OpCode::CallKw, count);
        }
    }

    fn call_unpacked(&mut self, args: &'a [Arg]) {
        self.emit_u16(OpCode::BuildList, 0);
        for arg in args {
            match arg {
                Arg::Positional(value) => {
                    self.expr(value);
                    self.emit_u16(OpCode::ListAppend, 1);
                }
                Arg::Star(value) => {
                    self.expr(value);
                    self.emit_u16(OpCode::ListExtend, 1);
                }
                Arg::Keyword(..) | Arg::DoubleStar(_) => {}
            }
        }
        self.emit(OpCode::ListToTuple);

        let mut flags = 0;
        if args
            .iter()
            .any(|a| matches!(a, Arg::Keyword(..) | Arg::DoubleStar(_)))
        {
            self.emit_u16(OpCode::BuildDict, 0);
            for arg in args {
                match arg {
                    Arg::Keyword(name, value) => {
                        self.emit_const(Value::str(&name.name), name.span);
                        self.expr(value);
                        self.emit_u16(OpCode::DictInsert, 1);
                    }
                    Arg::DoubleStar(value) => {
                        self.expr(value);
                        self.emit_u16(OpCode::DictMerge, 1);
                    }
                    Arg::Positional(_) | Arg::Star(_) => {}
                }
            }
            flags |= CALL_HAS_KWARGS;
        }
        self.emit_u8(OpCode::CallEx, flags);
    }

    /// Comprehensions compile to a nested function called immediately with
    /// the outermost iterator
    fn comprehension(&mut self, comp: &'a Comprehension, kind: ComprehensionKind, span: Span) {
        let Some(first) = comp.generators.first() else {
            return;
        };
        let name = match kind {
            ComprehensionKind::List => "<listcomp>",
            ComprehensionKind::Dict => "<dictcomp>",
            ComprehensionKind::Generator => "<genexpr>",
        };
        self.enter_unit(comp.scope, CodeKind::Comprehension, name.to_string(), span);
        self.unit_mut().params = ParamSpec {
            positional: 1,
            ..ParamSpec::default()
        };
        self.prologue();
        match kind {
            ComprehensionKind::List => self.emit_u16(OpCode::BuildList, 0),
            ComprehensionKind::Dict => self.emit_u16(OpCode::BuildDict, 0),
            ComprehensionKind::Generator => {}
        }
        self.comprehension_level(comp, kind, 0, span);
        if kind == ComprehensionKind::Generator {
            self.emit_const(Value::None, span);
        }
        self.emit(OpCode::Return);
        let code = self.finish_unit();

        self.make_function(None, code, span);
        self.expr(&first.iter);
        self.emit(OpCode::GetIter);
        self.emit_u8(OpCode::Call, 1);
    }

    fn comprehension_level(
        &mut self,
        comp: &'a Comprehension,
        kind: ComprehensionKind,
        level: usize,
        span: Span,
    ) {
        let Some(generator) = comp.generators.get(level) else {
            let depth = comp.generators.len() as u16 + 1;
            match kind {
                ComprehensionKind::List => {
                    self.expr(&comp.element);
                    self.emit_u16(OpCode::ListAppend, depth);
                }
                ComprehensionKind::Dict => {
                    self.expr(&comp.element);
                    if let Some(value) = &comp.value {
                        self.expr(value);
                    }
                    self.emit_u16(OpCode::DictInsert, depth);
                }
                ComprehensionKind::Generator => {
                    self.expr(&comp.element);
                    self.emit(OpCode::Yield);
                    self.emit(OpCode::Pop);
                }
            }
            return;
        };

        if level == 0 {
            self.emit_u16(OpCode::LoadFast, 0);
        } else {
            self.expr(&generator.iter);
            self.emit(OpCode::GetIter);
        }
        let start = self.offset();
        let exit = self.emit_jump(OpCode::ForIter);
        self.assign(&generator.target);
        let mut skips = Vec::new();
        for condition in &generator.conditions {
            self.expr(condition);
            skips.push(self.emit_jump(OpCode::PopJumpIfFalse));
        }
        self.comprehension_level(comp, kind, level + 1, span);
        for at in skips {
            self.patch_jump(at, span);
        }
        self.emit_loop(start, span);
        self.patch_jump(exit, span);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionKind {
    List,
    Dict,
    Generator,
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn describe(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Literal(_) => "literal",
        ExprKind::Call { .. } => "function call",
        ExprKind::Lambda(_) => "lambda",
        ExprKind::Dict(_) => "dict display",
        ExprKind::ListComp(_) | ExprKind::DictComp(_) | ExprKind::GeneratorExp(_) => {
            "comprehension"
        }
        ExprKind::Yield(_) => "yield expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::IfExp { .. } => "conditional expression",
        _ => "expression",
    }
}

impl From<ScopeKind> for CodeKind {
    fn from(kind: ScopeKind) -> Self {
        match kind {
            ScopeKind::Module => CodeKind::Module,
            ScopeKind::Function => CodeKind::Function,
            ScopeKind::Lambda => CodeKind::Lambda,
            ScopeKind::Comprehension => CodeKind::Comprehension,
            ScopeKind::Class => CodeKind::Class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::resolve;

    fn compile(source: &str) -> Result<Rc<CodeObject>, Vec<CompileError>> {
        let module = Parser::parse_source(source).expect("parse");
        let scopes = resolve(&module).expect("resolve");
        let lines = LineIndex::new(source);
        Compiler::new(&scopes, &lines, "<test>").compile_module(&module)
    }

    fn ops(code: &CodeObject) -> Vec<OpCode> {
        let bytes = code.chunk.code();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let op = OpCode::try_from(bytes[i]).expect("valid opcode");
            out.push(op);
            i += op.size();
        }
        out
    }

    fn child<'c>(code: &'c CodeObject, name: &str) -> &'c CodeObject {
        code.children()
            .find(|c| c.name == name)
            .map(Rc::as_ref)
            .expect("child code object")
    }

    #[test]
    fn module_names_are_globals() {
        let code = compile("a = 1\nprint(a)\n").unwrap();
        assert_eq!(
            ops(&code),
            vec![
                OpCode::LoadConst,
                OpCode::StoreGlobal,
                OpCode::LoadBuiltin,
                OpCode::LoadGlobal,
                OpCode::Call,
                OpCode::Pop,
                OpCode::LoadConst,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn constant_arithmetic_folds() {
        let code = compile("x = 2 * 3 + 1\n").unwrap();
        assert_eq!(ops(&code)[..2], [OpCode::LoadConst, OpCode::StoreGlobal]);
        assert!(code.chunk.constants().iter().any(|c| matches!(c, Value::Int(7))));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let code = compile("x = 1 // 0\n").unwrap();
        assert!(ops(&code).contains(&OpCode::FloorDiv));
    }

    #[test]
    fn docstrings_emit_nothing() {
        let code = compile("\"\"\"doc\"\"\"\npass\n").unwrap();
        assert_eq!(ops(&code), vec![OpCode::LoadConst, OpCode::Return]);
    }

    #[test]
    fn function_locals_and_cells() {
        let source = "def outer(n):\n    def inner():\n        return n\n    return inner\n";
        let code = compile(source).unwrap();
        let outer = child(&code, "outer");
        assert_eq!(outer.cellvars, ["n"]);
        assert_eq!(
            ops(outer)[..2],
            [OpCode::LoadFast, OpCode::StoreDeref],
            "captured parameter moves into its cell"
        );
        let inner = child(outer, "inner");
        assert_eq!(inner.freevars, ["n"]);
        assert_eq!(inner.free_sources, [0]);
        assert_eq!(ops(inner)[0], OpCode::LoadDeref);
    }

    #[test]
    fn parameter_layout() {
        let code = compile("def f(a, b=1, *rest, k=2, **kw):\n    pass\n").unwrap();
        let f = child(&code, "f");
        assert_eq!(f.params.positional, 2);
        assert_eq!(f.params.defaults, 1);
        assert_eq!(f.params.kwonly, 1);
        assert_eq!(f.params.vararg, Some(3));
        assert_eq!(f.params.kwarg, Some(4));
        assert_eq!(f.varnames[..5], ["a", "b", "k", "rest", "kw"]);
    }

    #[test]
    fn try_except_builds_an_exception_table() {
        let source = "try:\n    x = 1\nexcept ValueError as e:\n    x = 2\n";
        let code = compile(source).unwrap();
        assert_eq!(code.exception_table.len(), 1);
        let entry = code.exception_table[0];
        assert_eq!(entry.kind, HandlerKind::Except);
        assert_eq!(entry.start, 0);
        let handler = entry.handler as usize;
        assert_eq!(code.chunk.read_byte(handler), Some(OpCode::Dup as u8));
        assert!(ops(&code).contains(&OpCode::MatchException));
        assert!(ops(&code).contains(&OpCode::Reraise));
    }

    #[test]
    fn return_through_finally_splits_the_range() {
        let source = "def f():\n    try:\n        return 1\n    finally:\n        print(2)\n";
        let code = compile(source).unwrap();
        let f = child(&code, "f");
        assert!(f.varnames.iter().any(|v| v == ".return"));
        // Inline cleanup is not covered by its own handler
        let entry = f.exception_table[0];
        assert_eq!(entry.kind, HandlerKind::Finally);
        let calls: Vec<usize> = (0..f.chunk.len())
            .filter(|&i| f.handler_for(i).is_none())
            .collect();
        assert!(!calls.is_empty());
    }

    #[test]
    fn with_registers_cleanup() {
        let code = compile("with m as x:\n    y = x\n").unwrap();
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].kind, HandlerKind::WithCleanup);

        // An empty body protects nothing
        let code = compile("with m:\n    pass\n").unwrap();
        assert!(code.exception_table.is_empty());
    }

    #[test]
    fn comprehensions_are_nested_functions() {
        let code = compile("ys = [x * 2 for x in xs if x]\n").unwrap();
        let comp = child(&code, "<listcomp>");
        assert_eq!(comp.kind, CodeKind::Comprehension);
        assert_eq!(comp.params.positional, 1);
        assert!(ops(comp).contains(&OpCode::ListAppend));
        let outer = ops(&code);
        assert!(outer.windows(2).any(|w| w == [OpCode::GetIter, OpCode::Call]));
    }

    #[test]
    fn class_bodies_use_the_class_namespace() {
        let code = compile("class A:\n    x = 1\n    def m(self):\n        return x\n").unwrap();
        let body = child(&code, "A");
        assert_eq!(body.kind, CodeKind::Class);
        assert!(ops(body).contains(&OpCode::StoreName));
        assert!(ops(&code).contains(&OpCode::BuildClass));
        let method = child(body, "m");
        assert!(ops(method).contains(&OpCode::LoadBuiltin));
    }

    #[test]
    fn generator_flag() {
        let code = compile("def g():\n    yield 1\n").unwrap();
        assert!(child(&code, "g").is_generator);
    }

    #[test]
    fn invalid_targets_are_reported() {
        let errors = compile("1 = x\nf() = 2\na, *b, *c = y\n").unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(
            errors[0].kind,
            CompileErrorKind::InvalidAssignmentTarget("literal")
        ));
        assert!(matches!(errors[2].kind, CompileErrorKind::InvalidStarred(_)));
    }

    #[test]
    fn keyword_calls_carry_a_names_tuple() {
        let code = compile("f(1, b=2)\n").unwrap();
        assert!(ops(&code).contains(&OpCode::CallKw));
        let code = compile("f(*xs, **kw)\n").unwrap();
        assert!(ops(&code).contains(&OpCode::CallEx));
    }
}
