//! Virtual Machine for the pasmhon language
//!
//! A stack-based interpreter over [`CodeObject`]s. Every frame owns its
//! operand stack and locals; exceptions unwind through each code object's
//! exception table. Hot functions and loops are handed to the [`Jit`].
//!
//! [`Jit`]: crate::jit::Jit

mod attr;
mod call;
mod error;
mod exceptions;
mod frame;
mod generator;
mod import;
mod iter;
mod math;
mod methods;
mod natives;
pub mod ops;
mod output;

pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
pub use frame::{Frame, ReturnAction};
pub use output::{with_output_capture, OutputCapture};

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use crate::bytecode::{
    CallArgs, ClassObject, CodeObject, Dict, Function, Module, Namespace, OpCode, SliceValue, Value,
    CALL_HAS_KWARGS, MAKE_DEFAULTS, MAKE_KWDEFAULTS,
};
use crate::config::RuntimeConfig;
use crate::jit::{Jit, JitStats};

use call::Invoked;
use error::type_error;
use exceptions::BuiltinClasses;
use ops::dict_key;

/// How a run of frames ended
pub(crate) enum FrameExit {
    Return(Value),
    /// A generator frame suspended; the frame travels with the value
    Yield(Value, Box<Frame>),
}

/// Outcome of one instruction
enum Flow {
    Continue,
    Return(Value),
    Yield(Value),
    /// Start unwinding. `record` is false for re-raises, whose traceback
    /// already names this frame.
    Raise { exception: Value, record: bool },
}

/// The virtual machine
pub struct Vm {
    /// Call stack; the last frame is running
    frames: Vec<Frame>,

    builtins: Rc<Namespace>,

    pub(crate) classes: BuiltinClasses,

    /// Imported modules by name
    modules: HashMap<String, Rc<Module>>,

    max_frames: usize,

    search_paths: Vec<PathBuf>,

    /// `None` when disabled or unsupported on this host
    jit: Option<Jit>,
}

impl Vm {
    /// Create a VM with the built-in namespace populated
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let classes = BuiltinClasses::new();
        let builtins = Namespace::new("builtins");
        natives::register(&builtins, &classes);

        let jit = if config.jit.enabled {
            match Jit::new(&config.jit) {
                Ok(jit) => Some(jit),
                Err(err) => {
                    warn!(error = %err, "JIT unavailable, interpreting only");
                    None
                }
            }
        } else {
            None
        };

        Self {
            frames: Vec::new(),
            builtins,
            classes,
            modules: HashMap::new(),
            max_frames: config.vm.max_frames,
            search_paths: config.import.search_paths.clone(),
            jit,
        }
    }

    /// Whether compiled code may run
    #[must_use]
    pub fn jit_enabled(&self) -> bool {
        self.jit.is_some()
    }

    /// Compilation counters, when the JIT is on
    #[must_use]
    pub fn jit_stats(&self) -> Option<JitStats> {
        self.jit.as_ref().map(Jit::stats)
    }

    /// Execute a module's top-level code as `__main__`
    pub fn run_module(&mut self, code: Rc<CodeObject>) -> RuntimeResult<Value> {
        let globals = Namespace::new("__main__");
        globals.set("__name__", Value::str("__main__"));
        self.run_in(code, globals)
    }

    /// Execute top-level code against an existing globals namespace
    pub fn run_in(&mut self, code: Rc<CodeObject>, globals: Rc<Namespace>) -> RuntimeResult<Value> {
        let base = self.frames.len();
        self.push_frame(Frame::new(code, globals, &[], ReturnAction::Push))?;
        match self.run_frames(base) {
            Ok(FrameExit::Return(value)) => Ok(value),
            Ok(FrameExit::Yield(..)) => {
                Err(RuntimeErrorKind::Internal("yield outside a generator".to_string()).into())
            }
            Err(RuntimeError {
                kind: RuntimeErrorKind::Raised(exception),
                ..
            }) => Err(Self::uncaught(exception)),
            Err(err) => Err(err),
        }
    }

    // ===== Frame operations =====

    #[inline]
    fn frame(&mut self) -> &mut Frame {
        let len = self.frames.len();
        &mut self.frames[len - 1]
    }

    /// Run until the frame at index `base` returns or yields.
    ///
    /// An exception that escapes `base` comes back as
    /// [`RuntimeErrorKind::Raised`] with its traceback filled in.
    pub(crate) fn run_frames(&mut self, base: usize) -> RuntimeResult<FrameExit> {
        loop {
            let failure = match self.step() {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Return(value)) => match self.return_from_frame(base, value) {
                    Ok(Some(value)) => return Ok(FrameExit::Return(value)),
                    Ok(None) => continue,
                    Err(err) => err,
                },
                Ok(Flow::Yield(value)) => {
                    let len = self.frames.len();
                    let frame = self.frames.remove(len - 1);
                    return Ok(FrameExit::Yield(value, Box::new(frame)));
                }
                Ok(Flow::Raise { exception, record }) => {
                    self.unwind(exception, base, record)?;
                    continue;
                }
                Err(err) => err,
            };

            if !failure.kind.is_catchable() || self.frames.len() <= base {
                self.frames.truncate(base);
                return Err(failure);
            }
            let exception = self.exception_value(failure.kind);
            self.unwind(exception, base, true)?;
        }
    }

    /// Pop the returning frame and deliver its value. Returns the value
    /// when the run at `base` is finished.
    fn return_from_frame(&mut self, base: usize, value: Value) -> RuntimeResult<Option<Value>> {
        let len = self.frames.len();
        let frame = self.frames.remove(len - 1);
        if frame.warm && frame.is_plain_function() {
            if let Some(jit) = self.jit.as_mut() {
                jit.record_return(frame.code.id, &value);
            }
        }
        let value = Self::complete_frame(frame, value)?;
        if self.frames.len() <= base {
            return Ok(Some(value));
        }
        self.frame().push(value);
        Ok(None)
    }

    /// The value a finished frame hands to its caller
    fn complete_frame(frame: Frame, value: Value) -> RuntimeResult<Value> {
        match frame.action {
            ReturnAction::Push => Ok(value),
            ReturnAction::BuildClass { name, base } => {
                let namespace = frame.class_ns.unwrap_or_else(|| Namespace::new(name.as_str()));
                Ok(Value::Class(ClassObject::new(name, Some(base), namespace)))
            }
            ReturnAction::FinishImport { module } => Ok(Value::Module(module)),
            ReturnAction::Construct { instance } => {
                if value.is_none() {
                    Ok(instance)
                } else {
                    type_error(format!("__init__() should return None, not '{}'", value.type_name()))
                }
            }
        }
    }

    /// Search for a handler from the running frame outwards, popping
    /// frames without one. Fails with the exception once `base` is popped.
    fn unwind(&mut self, exception: Value, base: usize, mut record: bool) -> RuntimeResult<()> {
        while self.frames.len() > base {
            let frame = self.frame();
            if record {
                if let Value::Exception(exc) = &exception {
                    exc.traceback.borrow_mut().push(StackFrame::with_source(
                        frame.code.name.clone(),
                        frame.line(),
                        frame.code.filename.to_string(),
                    ));
                }
            }
            record = true;

            if let Some(entry) = frame.code.handler_for(frame.last_ip) {
                let (depth, handler) = (entry.depth as usize, entry.handler as usize);
                frame.stack.truncate(depth);
                frame.stack.push(exception);
                frame.ip = handler;
                return Ok(());
            }

            if let Some(popped) = self.frames.pop() {
                if let ReturnAction::FinishImport { module } = &popped.action {
                    self.forget_module(module);
                }
            }
        }
        Err(RuntimeErrorKind::Raised(exception).into())
    }

    // ===== Dispatch =====

    /// Execute one instruction of the running frame
    #[allow(clippy::too_many_lines)]
    fn step(&mut self) -> RuntimeResult<Flow> {
        let top = self.frames.len() - 1;
        let frame = &mut self.frames[top];

        if frame.ip >= frame.code.chunk.len() {
            return Err(RuntimeErrorKind::Internal(format!(
                "fell off the end of '{}'",
                frame.code.name
            ))
            .into());
        }
        frame.last_ip = frame.ip;
        let byte = frame.read_u8();
        let op = OpCode::try_from(byte).map_err(RuntimeErrorKind::InvalidOpcode)?;

        match op {
            // ===== Stack =====
            OpCode::LoadConst => {
                let index = frame.read_u16();
                let value = frame.constant(index)?;
                frame.push(value);
            }
            OpCode::Pop => {
                frame.pop()?;
            }
            OpCode::Dup => {
                let value = frame.peek(0)?.clone();
                frame.push(value);
            }
            OpCode::DupTwo => {
                let b = frame.peek(0)?.clone();
                let a = frame.peek(1)?.clone();
                frame.push(a);
                frame.push(b);
            }
            OpCode::RotTwo => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(b);
                frame.push(a);
            }
            OpCode::RotThree => {
                let c = frame.pop()?;
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(c);
                frame.push(a);
                frame.push(b);
            }

            // ===== Names =====
            OpCode::LoadFast => {
                let slot = frame.read_u16() as usize;
                match frame.locals.get(slot) {
                    Some(Some(value)) => {
                        let value = value.clone();
                        frame.push(value);
                    }
                    _ => return Err(RuntimeErrorKind::UnboundLocal(Self::varname(frame, slot)).into()),
                }
            }
            OpCode::StoreFast => {
                let slot = frame.read_u16() as usize;
                let value = frame.pop()?;
                match frame.locals.get_mut(slot) {
                    Some(local) => *local = Some(value),
                    None => return Err(RuntimeErrorKind::Internal(format!("bad local slot {slot}")).into()),
                }
            }
            OpCode::DeleteFast => {
                let slot = frame.read_u16() as usize;
                if frame.locals.get_mut(slot).and_then(Option::take).is_none() {
                    return Err(RuntimeErrorKind::UnboundLocal(Self::varname(frame, slot)).into());
                }
            }
            OpCode::LoadDeref => {
                let index = frame.read_u16() as usize;
                let value = frame.cells.get(index).and_then(|cell| cell.borrow().clone());
                match value {
                    Some(value) => frame.push(value),
                    None => return Err(Self::unbound_cell(frame, index).into()),
                }
            }
            OpCode::StoreDeref => {
                let index = frame.read_u16() as usize;
                let value = frame.pop()?;
                match frame.cells.get(index) {
                    Some(cell) => *cell.borrow_mut() = Some(value),
                    None => return Err(RuntimeErrorKind::Internal(format!("bad cell index {index}")).into()),
                }
            }
            OpCode::DeleteDeref => {
                let index = frame.read_u16() as usize;
                let old = frame.cells.get(index).and_then(|cell| cell.borrow_mut().take());
                if old.is_none() {
                    return Err(Self::unbound_cell(frame, index).into());
                }
            }
            OpCode::LoadGlobal | OpCode::LoadBuiltin => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let value = frame
                    .globals
                    .get(&name)
                    .or_else(|| self.builtins.get(&name))
                    .ok_or_else(|| RuntimeErrorKind::NameError(name.to_string()))?;
                self.frames[top].push(value);
            }
            OpCode::StoreGlobal => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let value = frame.pop()?;
                frame.globals.set(&*name, value);
            }
            OpCode::DeleteGlobal => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                if frame.globals.remove(&name).is_none() {
                    return Err(RuntimeErrorKind::NameError(name.to_string()).into());
                }
            }
            OpCode::LoadName => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let value = frame
                    .class_ns
                    .as_ref()
                    .and_then(|ns| ns.get(&name))
                    .or_else(|| frame.globals.get(&name))
                    .or_else(|| self.builtins.get(&name))
                    .ok_or_else(|| RuntimeErrorKind::NameError(name.to_string()))?;
                self.frames[top].push(value);
            }
            OpCode::StoreName => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let value = frame.pop()?;
                match &frame.class_ns {
                    Some(ns) => ns.set(&*name, value),
                    None => frame.globals.set(&*name, value),
                }
            }
            OpCode::DeleteName => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let removed = match &frame.class_ns {
                    Some(ns) => ns.remove(&name),
                    None => frame.globals.remove(&name),
                };
                if removed.is_none() {
                    return Err(RuntimeErrorKind::NameError(name.to_string()).into());
                }
            }

            // ===== Arithmetic =====
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::FloorDiv
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::LShift
            | OpCode::RShift
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let binop = op.as_binop().ok_or(RuntimeErrorKind::InvalidOpcode(byte))?;
                if frame.warm {
                    let (code, offset) = (frame.code.id, frame.last_ip);
                    if let Some(jit) = self.jit.as_mut() {
                        jit.record_operands(code, offset, &a, &b);
                    }
                }
                let result = self.binary_op(binop, a, b)?;
                self.frames[top].push(result);
            }

            // ===== Comparison =====
            OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::In
            | OpCode::NotIn
            | OpCode::Is
            | OpCode::IsNot => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let cmp = op.as_cmpop().ok_or(RuntimeErrorKind::InvalidOpcode(byte))?;
                if frame.warm {
                    let (code, offset) = (frame.code.id, frame.last_ip);
                    if let Some(jit) = self.jit.as_mut() {
                        jit.record_operands(code, offset, &a, &b);
                    }
                }
                let result = self.compare(cmp, a, b)?;
                self.frames[top].push(result);
            }

            // ===== Unary =====
            OpCode::Neg | OpCode::Pos | OpCode::Not | OpCode::Invert => {
                let value = frame.pop()?;
                let unary = match op {
                    OpCode::Neg => crate::ast::UnaryOp::Neg,
                    OpCode::Pos => crate::ast::UnaryOp::Pos,
                    OpCode::Not => crate::ast::UnaryOp::Not,
                    _ => crate::ast::UnaryOp::Invert,
                };
                let result = self.unary_op(unary, value)?;
                self.frames[top].push(result);
            }

            // ===== Control Flow =====
            OpCode::Jump => {
                let offset = frame.read_i16();
                frame.jump(offset);
            }
            OpCode::PopJumpIfFalse | OpCode::PopJumpIfTrue => {
                let offset = frame.read_i16();
                let condition = frame.pop()?;
                let truth = self.truthy(&condition)?;
                if truth == (op == OpCode::PopJumpIfTrue) {
                    self.frames[top].jump(offset);
                }
            }
            OpCode::JumpIfFalseOrPop | OpCode::JumpIfTrueOrPop => {
                let offset = frame.read_i16();
                let condition = frame.peek(0)?.clone();
                let truth = self.truthy(&condition)?;
                let frame = &mut self.frames[top];
                if truth == (op == OpCode::JumpIfTrueOrPop) {
                    frame.jump(offset);
                } else {
                    frame.pop()?;
                }
            }
            OpCode::JumpBackward => {
                let distance = frame.read_u16() as usize;
                let header = frame.ip.checked_sub(distance).ok_or_else(|| {
                    RuntimeErrorKind::Internal(format!("backward jump out of range at {}", frame.last_ip))
                })?;
                frame.ip = header;
                if let Some(value) = self.on_back_edge(header) {
                    return Ok(Flow::Return(value));
                }
            }

            // ===== Iteration =====
            OpCode::GetIter => {
                let value = frame.pop()?;
                let iterator = self.get_iter(value)?;
                self.frames[top].push(iterator);
            }
            OpCode::ForIter => {
                let offset = frame.read_i16();
                let iterator = frame.peek(0)?.clone();
                let next = self.iter_next(&iterator)?;
                let frame = &mut self.frames[top];
                match next {
                    Some(item) => frame.push(item),
                    None => {
                        frame.pop()?;
                        frame.jump(offset);
                    }
                }
            }

            // ===== Builders =====
            OpCode::BuildList => {
                let count = frame.read_u16() as usize;
                let items = frame.pop_n(count)?;
                frame.push(Value::list(items));
            }
            OpCode::BuildTuple => {
                let count = frame.read_u16() as usize;
                let items = frame.pop_n(count)?;
                frame.push(Value::tuple(items));
            }
            OpCode::BuildDict => {
                let count = frame.read_u16() as usize;
                let items = frame.pop_n(count * 2)?;
                let mut dict = Dict::with_capacity(count);
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    dict.insert(dict_key(key)?, value);
                }
                self.frames[top].push(Value::dict(dict));
            }
            OpCode::BuildSlice => {
                let step = frame.pop()?;
                let upper = frame.pop()?;
                let lower = frame.pop()?;
                let slice = SliceValue {
                    lower: Self::slice_bound(&lower)?,
                    upper: Self::slice_bound(&upper)?,
                    step: Self::slice_bound(&step)?,
                };
                frame.push(Value::Slice(slice));
            }
            OpCode::ListAppend => {
                let depth = frame.read_u16() as usize;
                let value = frame.pop()?;
                match frame.peek(depth.saturating_sub(1))? {
                    Value::List(list) => list.borrow_mut().push(value),
                    other => return Err(Self::bad_target("list", other).into()),
                }
            }
            OpCode::ListExtend => {
                let depth = frame.read_u16() as usize;
                let iterable = frame.pop()?;
                let items = self.collect_iter(iterable)?;
                match self.frames[top].peek(depth.saturating_sub(1))? {
                    Value::List(list) => list.borrow_mut().extend(items),
                    other => return Err(Self::bad_target("list", other).into()),
                }
            }
            OpCode::DictInsert => {
                let depth = frame.read_u16() as usize;
                let value = frame.pop()?;
                let key = dict_key(frame.pop()?)?;
                match frame.peek(depth.saturating_sub(1))? {
                    Value::Dict(dict) => {
                        dict.borrow_mut().insert(key, value);
                    }
                    other => return Err(Self::bad_target("dict", other).into()),
                }
            }
            OpCode::DictMerge => {
                let depth = frame.read_u16() as usize;
                let mapping = frame.pop()?;
                let entries: Vec<_> = match &mapping {
                    Value::Dict(source) => source
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    other => return type_error(format!("'{}' object is not a mapping", other.type_name())),
                };
                match frame.peek(depth.saturating_sub(1))? {
                    Value::Dict(dict) => dict.borrow_mut().extend(entries),
                    other => return Err(Self::bad_target("dict", other).into()),
                }
            }
            OpCode::ListToTuple => match frame.pop()? {
                Value::List(list) => {
                    let items = list.borrow().clone();
                    frame.push(Value::tuple(items));
                }
                other => return Err(Self::bad_target("list", &other).into()),
            },
            OpCode::UnpackSequence => {
                let count = frame.read_u16() as usize;
                let value = frame.pop()?;
                let items = self.unpack_items(value)?;
                if items.len() < count {
                    return Err(RuntimeErrorKind::ValueError(format!(
                        "not enough values to unpack (expected {count}, got {})",
                        items.len()
                    ))
                    .into());
                }
                if items.len() > count {
                    return Err(RuntimeErrorKind::ValueError(format!(
                        "too many values to unpack (expected {count})"
                    ))
                    .into());
                }
                self.frames[top].stack.extend(items.into_iter().rev());
            }
            OpCode::UnpackEx => {
                let operand = frame.read_u16();
                let (before, after) = ((operand & 0xff) as usize, (operand >> 8) as usize);
                let value = frame.pop()?;
                let mut items = self.unpack_items(value)?;
                if items.len() < before + after {
                    return Err(RuntimeErrorKind::ValueError(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        before + after,
                        items.len()
                    ))
                    .into());
                }
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(before);
                let frame = &mut self.frames[top];
                frame.stack.extend(tail.into_iter().rev());
                frame.push(Value::list(middle));
                frame.stack.extend(items.into_iter().rev());
            }

            // ===== Attributes and Items =====
            OpCode::LoadAttr => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let object = frame.pop()?;
                let value = self.get_attr(&object, &name)?;
                self.frames[top].push(value);
            }
            OpCode::StoreAttr => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let object = frame.pop()?;
                let value = frame.pop()?;
                self.set_attr(&object, &name, value)?;
            }
            OpCode::DeleteAttr => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let object = frame.pop()?;
                self.del_attr(&object, &name)?;
            }
            OpCode::LoadSubscr => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                let value = self.get_item(container, index)?;
                self.frames[top].push(value);
            }
            OpCode::StoreSubscr => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                let value = frame.pop()?;
                self.set_item(container, index, value)?;
            }
            OpCode::DeleteSubscr => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                self.del_item(container, index)?;
            }

            // ===== Functions =====
            OpCode::Call => {
                let argc = frame.read_u8() as usize;
                let args = frame.pop_n(argc)?;
                let callee = frame.pop()?;
                self.call_value(callee, CallArgs::positional(args))?;
            }
            OpCode::CallKw => {
                let argc = frame.read_u8() as usize;
                let names = frame.pop()?;
                let mut values = frame.pop_n(argc)?;
                let callee = frame.pop()?;
                let Value::Tuple(names) = names else {
                    return Err(RuntimeErrorKind::Internal("keyword names must be a tuple".to_string()).into());
                };
                let keyword_values = values.split_off(argc.saturating_sub(names.len()));
                let mut keywords = Vec::with_capacity(names.len());
                for (name, value) in names.iter().zip(keyword_values) {
                    let Value::Str(name) = name else {
                        return type_error("keywords must be strings");
                    };
                    keywords.push((Rc::clone(name), value));
                }
                self.call_value(
                    callee,
                    CallArgs {
                        positional: values,
                        keywords,
                    },
                )?;
            }
            OpCode::CallEx => {
                let flags = frame.read_u8();
                let kwargs = if flags & CALL_HAS_KWARGS != 0 {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let positional = frame.pop()?;
                let callee = frame.pop()?;
                let positional = match positional {
                    Value::Tuple(items) => items.to_vec(),
                    other => self.collect_iter(other)?,
                };
                let mut keywords = Vec::new();
                if let Some(kwargs) = kwargs {
                    let Value::Dict(dict) = kwargs else {
                        return type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            kwargs.type_name()
                        ));
                    };
                    for (key, value) in dict.borrow().iter() {
                        let Value::Str(name) = key.value() else {
                            return type_error("keywords must be strings");
                        };
                        keywords.push((Rc::clone(name), value.clone()));
                    }
                }
                self.call_value(callee, CallArgs { positional, keywords })?;
            }
            OpCode::MakeFunction => {
                let flags = frame.read_u8();
                let function = Self::make_function(frame, flags)?;
                frame.push(Value::Function(Rc::new(function)));
            }
            OpCode::Return => {
                let value = frame.pop()?;
                return Ok(Flow::Return(value));
            }
            OpCode::Yield => {
                let value = frame.pop()?;
                return Ok(Flow::Yield(value));
            }

            // ===== Classes and Modules =====
            OpCode::BuildClass => {
                let name = frame.pop()?;
                let base = frame.pop()?;
                let body = frame.pop()?;
                let (Value::Str(name), Value::Function(body)) = (name, body) else {
                    return Err(RuntimeErrorKind::Internal("malformed class definition".to_string()).into());
                };
                let base = self.class_base(base)?;
                let mut class_frame = Frame::new(
                    Rc::clone(&body.code),
                    Rc::clone(&body.globals),
                    &body.cells,
                    ReturnAction::BuildClass {
                        name: name.to_string(),
                        base,
                    },
                );
                let namespace = Namespace::new(&*name);
                namespace.set("__name__", Value::Str(Rc::clone(&name)));
                class_frame.class_ns = Some(namespace);
                self.push_frame(class_frame)?;
            }
            OpCode::ImportName => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                if let Some(module) = self.import_module(&name)? {
                    self.frames[top].push(module);
                }
            }
            OpCode::ImportFrom => {
                let index = frame.read_u16();
                let name = frame.name(index)?;
                let module = frame.peek(0)?.clone();
                let value = match self.get_attr(&module, &name) {
                    Ok(value) => value,
                    Err(RuntimeError {
                        kind: RuntimeErrorKind::AttributeError(_),
                        ..
                    }) => {
                        let module_name = match &module {
                            Value::Module(m) => m.name.clone(),
                            other => other.type_name().to_string(),
                        };
                        return Err(RuntimeErrorKind::ImportError(format!(
                            "cannot import name '{name}' from '{module_name}'"
                        ))
                        .into());
                    }
                    Err(err) => return Err(err),
                };
                self.frames[top].push(value);
            }

            // ===== Exceptions =====
            OpCode::Raise => {
                let mode = frame.read_u8();
                if mode == 0 {
                    return Err(RuntimeErrorKind::Runtime("No active exception to reraise".to_string()).into());
                }
                let value = frame.pop()?;
                let exception = self.make_raisable(value)?;
                return Ok(Flow::Raise {
                    exception,
                    record: true,
                });
            }
            OpCode::Reraise => {
                let exception = frame.pop()?;
                return Ok(Flow::Raise {
                    exception,
                    record: false,
                });
            }
            OpCode::MatchException => {
                let spec = frame.pop()?;
                let exception = frame.pop()?;
                let matched = self.exception_matches(&exception, &spec)?;
                self.frames[top].push(Value::Bool(matched));
            }
        }

        Ok(Flow::Continue)
    }

    // ===== Instruction helpers =====

    /// Invoke `callee`; a plain result is pushed, a pushed frame runs next
    fn call_value(&mut self, callee: Value, args: CallArgs) -> RuntimeResult<()> {
        if let Invoked::Value(value) = self.invoke(callee, args)? {
            self.frame().push(value);
        }
        Ok(())
    }

    /// Build a function from the code object (and optional defaults) on
    /// top of the stack
    fn make_function(frame: &mut Frame, flags: u8) -> RuntimeResult<Function> {
        let Value::Code(code) = frame.pop()? else {
            return Err(RuntimeErrorKind::Internal("MAKE_FUNCTION without a code object".to_string()).into());
        };
        let mut kwdefaults = IndexMap::new();
        if flags & MAKE_KWDEFAULTS != 0 {
            if let Value::Dict(dict) = frame.pop()? {
                for (key, value) in dict.borrow().iter() {
                    if let Value::Str(name) = key.value() {
                        kwdefaults.insert(name.to_string(), value.clone());
                    }
                }
            }
        }
        let defaults = if flags & MAKE_DEFAULTS != 0 {
            match frame.pop()? {
                Value::Tuple(items) => items.to_vec(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let cells = code
            .free_sources
            .iter()
            .map(|&source| {
                frame.cells.get(source as usize).cloned().ok_or_else(|| {
                    RuntimeErrorKind::Internal(format!("closure source cell {source} missing")).into()
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(Function {
            name: code.name.clone(),
            globals: Rc::clone(&frame.globals),
            code,
            defaults,
            kwdefaults,
            cells,
        })
    }

    /// Resolve the base of a class statement
    fn class_base(&self, base: Value) -> RuntimeResult<Rc<ClassObject>> {
        match base {
            Value::None => Ok(Rc::clone(&self.classes.object)),
            Value::Class(class) => {
                if class.constructor.is_some() && !Rc::ptr_eq(&class, &self.classes.object) {
                    return type_error(format!("cannot subclass built-in type '{}'", class.name));
                }
                Ok(class)
            }
            other => type_error(format!("bases must be classes, not '{}'", other.type_name())),
        }
    }

    /// Items of an unpacking source
    fn unpack_items(&mut self, value: Value) -> RuntimeResult<Vec<Value>> {
        match value {
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::List(list) => Ok(list.borrow().clone()),
            other => {
                if matches!(other, Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::None) {
                    return type_error(format!("cannot unpack non-iterable {} object", other.type_name()));
                }
                self.collect_iter(other)
            }
        }
    }

    fn slice_bound(value: &Value) -> RuntimeResult<Option<i64>> {
        match value {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            other => type_error(format!(
                "slice indices must be integers or None, not {}",
                other.type_name()
            )),
        }
    }

    fn bad_target(expected: &str, found: &Value) -> RuntimeErrorKind {
        RuntimeErrorKind::Internal(format!("expected a {expected} builder, found {}", found.type_name()))
    }

    fn varname(frame: &Frame, slot: usize) -> String {
        frame.code.varnames.get(slot).cloned().unwrap_or_else(|| "?".to_string())
    }

    /// Unset cellvars are unbound locals; unset freevars were never bound
    /// in the enclosing scope
    fn unbound_cell(frame: &Frame, index: usize) -> RuntimeErrorKind {
        let name = frame.cell_name(index).to_string();
        if index < frame.code.cellvars.len() {
            RuntimeErrorKind::UnboundLocal(name)
        } else {
            RuntimeErrorKind::NameError(name)
        }
    }

    // ===== JIT hooks =====

    /// Run `function` natively when a compiled entry accepts `args`
    pub(crate) fn try_jit_call(&mut self, function: &Rc<Function>, args: &[Value]) -> Option<Value> {
        let depth = self.max_frames.saturating_sub(self.frames.len());
        self.jit.as_mut()?.on_call(function, args, depth)
    }

    /// Whether a new frame should collect type feedback
    pub(crate) fn is_warm(&self, frame: &Frame) -> bool {
        self.jit.as_ref().is_some_and(|jit| jit.is_warm(frame.code.id))
    }

    /// Count a loop back edge of the running frame, entering compiled
    /// code on stack when the loop is hot. Returns the frame's result if
    /// compiled code finished it.
    fn on_back_edge(&mut self, header: usize) -> Option<Value> {
        let jit = self.jit.as_mut()?;
        let depth = self.max_frames.saturating_sub(self.frames.len());
        let frame = self.frames.last()?;
        jit.on_back_edge(frame, header, depth)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (RuntimeResult<Value>, Vec<String>) {
        let code = crate::compile_source(source, "<test>").expect("compiles");
        let mut vm = Vm::default();
        let (result, output) = with_output_capture(|| vm.run_module(code));
        (result, output.lines().iter().map(ToString::to_string).collect())
    }

    fn output_of(source: &str) -> Vec<String> {
        let (result, lines) = run(source);
        if let Err(err) = result {
            panic!("program failed: {err}");
        }
        lines
    }

    #[test]
    fn arithmetic_and_printing() {
        assert_eq!(output_of("a = 1\nb = 2\nprint(a + b)\n"), ["3"]);
        assert_eq!(output_of("print(3.5, True, None, 'hi')\n"), ["3.5 True None hi"]);
        assert_eq!(output_of("print(7 // 2, 7 % 3, 7 / 2)\n"), ["3 1 3.5"]);
    }

    #[test]
    fn unpacking() {
        let source = "a, *b, c = [1, 2, 3, 4]\nprint(a, b, c)\nx, y = 1, 2\nprint(y, x)\n";
        assert_eq!(output_of(source), ["1 [2, 3] 4", "2 1"]);
    }

    #[test]
    fn unpack_count_mismatch_is_a_value_error() {
        let source = "try:\n    a, b = [1, 2, 3]\nexcept ValueError as e:\n    print(e)\n";
        assert_eq!(output_of(source), ["too many values to unpack (expected 2)"]);
    }

    #[test]
    fn unbound_local_is_reported_by_name() {
        let source = "def f():\n    print(x)\n    x = 1\nf()\n";
        let (result, _) = run(source);
        let err = result.unwrap_err();
        assert_eq!(err.class_name(), "UnboundLocalError");
        assert!(err.message().contains("'x'"));
    }

    #[test]
    fn uncaught_exception_carries_the_frame_chain() {
        let source = "def inner():\n    raise ValueError('bad')\n\ndef outer():\n    inner()\n\nouter()\n";
        let (result, _) = run(source);
        let err = result.unwrap_err();
        assert_eq!(err.class_name(), "ValueError");
        assert_eq!(err.message(), "bad");
        let names: Vec<&str> = err.stack_trace.iter().map(|f| f.function_name.as_str()).collect();
        assert_eq!(names, ["inner", "outer", "<module>"]);
    }

    #[test]
    fn subclassing_builtin_types_is_rejected() {
        let (result, _) = run("class MyInt(int):\n    pass\n");
        assert_eq!(result.unwrap_err().class_name(), "TypeError");
    }

    #[test]
    fn recursion_limit() {
        let source = "def f(n):\n    return f(n + 1)\ntry:\n    f(0)\nexcept RecursionError:\n    print('deep')\n";
        assert_eq!(output_of(source), ["deep"]);
    }

    #[test]
    fn repeating_sequences_of_objects() {
        let source = "\
rows = [[0]] * 2
rows[0].append(1)
print(rows, ['ab'] * 3, ('x', None) * 2, 'ab' * 2)
print([1] * 0, [1] * -3)
";
        assert_eq!(
            output_of(source),
            ["[[0, 1], [0, 1]] ['ab', 'ab', 'ab'] ('x', None, 'x', None) abab", "[] []"]
        );
    }

    #[test]
    fn setdefault_returns_the_stored_value() {
        let source = "\
d = {}
d.setdefault('k', []).append(1)
d.setdefault('k', []).append(2)
print(d, d.setdefault('k'))
";
        assert_eq!(output_of(source), ["{'k': [1, 2]} [1, 2]"]);
    }

    #[test]
    fn huge_range_lengths_overflow() {
        let source = "\
r = range(-9223372036854775807 - 1, 9223372036854775807)
print(r[-1], r[0], 9223372036854775806 in r)
for x in reversed(r):
    print(x)
    break
try:
    len(r)
except OverflowError:
    print('too long')
";
        assert_eq!(
            output_of(source),
            ["9223372036854775806 -9223372036854775808 True", "9223372036854775806", "too long"]
        );
    }

    #[test]
    fn imports_use_configured_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("searched_helper.pa"), "def twice(x):\n    return x * 2\n").unwrap();
        let mut config = RuntimeConfig::default();
        config.import.search_paths.push(dir.path().to_path_buf());

        let code = crate::compile_source("from searched_helper import twice\nprint(twice(21))\n", "<test>")
            .expect("compiles");
        let mut vm = Vm::new(&config);
        let (result, output) = with_output_capture(|| vm.run_module(code));
        assert!(result.is_ok(), "{:?}", result.err());
        assert_eq!(output.lines(), ["42"]);
    }
}
