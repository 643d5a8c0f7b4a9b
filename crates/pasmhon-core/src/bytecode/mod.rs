//! Bytecode and the runtime object model
//!
//! This module provides:
//! - `OpCode`: the instruction set
//! - `Chunk`: instruction bytes, constants and the line table
//! - `CodeObject`: one compiled module, function, lambda, comprehension or class body
//! - `Compiler`: resolved AST to code objects
//! - `Value` and the heap objects it references
//! - A disassembler for `--dump-bytecode`

mod chunk;
mod code;
mod compiler;
mod debug;
mod error;
mod object;
mod opcode;
mod value;

pub use chunk::Chunk;
pub use code::{CodeId, CodeKind, CodeObject, ExceptionEntry, HandlerKind, ParamSpec};
pub use compiler::Compiler;
pub use debug::{disassemble, Disassembly};
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use object::{
    new_cell, BoundMethod, CallArgs, Cell, ClassObject, ExceptionObject, Function, Generator,
    GeneratorState, Instance, IterState, Module, Namespace, NativeFn, NativeFunction,
};
pub use opcode::{OpCode, CALL_HAS_KWARGS, MAKE_DEFAULTS, MAKE_KWDEFAULTS};
pub use value::{format_float, quote_str, Dict, DictKey, RangeValue, SliceValue, Value};
