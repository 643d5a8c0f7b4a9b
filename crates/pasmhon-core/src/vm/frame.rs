//! Call frames

use std::rc::Rc;

use crate::bytecode::{new_cell, Cell, ClassObject, CodeObject, Module, Namespace, Value};

use super::error::{RuntimeErrorKind, RuntimeResult};

/// What happens to a frame's return value when it finishes
#[derive(Debug, Clone)]
pub enum ReturnAction {
    /// Hand the value to the caller
    Push,
    /// A class body finished; build the class from its namespace
    BuildClass {
        name: String,
        base: Rc<ClassObject>,
    },
    /// A module body finished; hand the module object to the importer
    FinishImport { module: Rc<Module> },
    /// `__init__` finished; hand the new instance to the caller
    Construct { instance: Value },
}

/// One activation of a code object
///
/// Each frame owns its operand stack and locals, so a generator can carry
/// its frame away when it suspends.
pub struct Frame {
    pub code: Rc<CodeObject>,

    /// Offset of the next instruction
    pub ip: usize,

    /// Offset of the instruction being executed, for tracebacks and
    /// exception table lookups
    pub last_ip: usize,

    pub stack: Vec<Value>,

    /// Fast locals; `None` is unbound
    pub locals: Vec<Option<Value>>,

    /// Cell variables followed by free variables
    pub cells: Vec<Cell>,

    pub globals: Rc<Namespace>,

    /// Namespace of the class body this frame is executing, if any
    pub class_ns: Option<Rc<Namespace>>,

    pub action: ReturnAction,

    /// Collect type feedback for the JIT while this frame runs
    pub warm: bool,
}

impl Frame {
    /// Create a frame with fresh cells for `code.cellvars` followed by the
    /// captured `free` cells
    #[must_use]
    pub fn new(code: Rc<CodeObject>, globals: Rc<Namespace>, free: &[Cell], action: ReturnAction) -> Self {
        let mut cells = Vec::with_capacity(code.cell_count());
        cells.extend((0..code.cellvars.len()).map(|_| new_cell(None)));
        cells.extend(free.iter().cloned());
        Self {
            locals: vec![None; code.varnames.len()],
            stack: Vec::with_capacity(8),
            code,
            ip: 0,
            last_ip: 0,
            cells,
            globals,
            class_ns: None,
            action,
            warm: false,
        }
    }

    // ===== Bytecode reading =====

    #[inline]
    pub fn read_u8(&mut self) -> u8 {
        let byte = self.code.chunk.read_byte(self.ip).unwrap_or(0);
        self.ip += 1;
        byte
    }

    #[inline]
    pub fn read_u16(&mut self) -> u16 {
        let value = self.code.chunk.read_u16(self.ip).unwrap_or(0);
        self.ip += 2;
        value
    }

    #[inline]
    pub fn read_i16(&mut self) -> i16 {
        let value = self.code.chunk.read_i16(self.ip).unwrap_or(0);
        self.ip += 2;
        value
    }

    #[inline]
    pub fn jump(&mut self, offset: i16) {
        self.ip = self.ip.wrapping_add_signed(offset as isize);
    }

    // ===== Stack operations =====

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> RuntimeResult<Value> {
        self.stack.pop().ok_or_else(|| RuntimeErrorKind::StackUnderflow.into())
    }

    #[inline]
    pub fn peek(&self, distance: usize) -> RuntimeResult<&Value> {
        self.stack
            .len()
            .checked_sub(1 + distance)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| RuntimeErrorKind::StackUnderflow.into())
    }

    /// Pop the top `n` values, oldest first
    pub fn pop_n(&mut self, n: usize) -> RuntimeResult<Vec<Value>> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or(RuntimeErrorKind::StackUnderflow)?;
        Ok(self.stack.split_off(at))
    }

    // ===== Names =====

    pub fn constant(&self, index: u16) -> RuntimeResult<Value> {
        self.code
            .chunk
            .get_constant(index)
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::Internal(format!("bad constant index {index}")).into())
    }

    pub fn name(&self, index: u16) -> RuntimeResult<Rc<str>> {
        self.code
            .name_at(index)
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::Internal(format!("bad name index {index}")).into())
    }

    /// Name of the variable behind cell `index`
    #[must_use]
    pub fn cell_name(&self, index: usize) -> &str {
        let cellvars = &self.code.cellvars;
        cellvars
            .get(index)
            .or_else(|| self.code.freevars.get(index.wrapping_sub(cellvars.len())))
            .map_or("?", String::as_str)
    }

    /// Source line of the current instruction
    #[must_use]
    pub fn line(&self) -> u32 {
        self.code.line_at(self.last_ip)
    }

    /// True when running a plain function body, the only frames the JIT
    /// may replace
    #[must_use]
    pub fn is_plain_function(&self) -> bool {
        matches!(self.action, ReturnAction::Push)
            && self.class_ns.is_none()
            && !self.code.is_generator
            && self.code.kind == crate::bytecode::CodeKind::Function
    }
}
