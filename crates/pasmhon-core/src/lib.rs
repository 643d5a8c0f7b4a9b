//! pasmhon core - language engine for the pasmhon programming language
//!
//! This crate provides the whole pipeline:
//! - Lexer: tokenization with indentation tracking
//! - AST and parser: the syntax tree of a module
//! - Resolver: scope analysis for locals, cells and globals
//! - Bytecode: instruction set and compiler
//! - VM: bytecode execution
//! - JIT: Cranelift compilation of hot functions and loops
//! - AOT: static ELF images of a program's output

use std::rc::Rc;

use thiserror::Error;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of pasmhon source code
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of pasmhon source code
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Scope analysis run between parsing and compilation
pub mod resolver;

/// Bytecode module - instruction set and compiler
pub mod bytecode;

/// Virtual Machine module - bytecode execution
pub mod vm;

/// Runtime configuration loaded from TOML and the environment
pub mod config;

/// Front-end failures and their rendering
pub mod diagnostic;

/// JIT compilation module (Cranelift-based)
/// JIT requires unsafe code to enter compiled functions
#[allow(unsafe_code, clippy::missing_safety_doc)]
pub mod jit;

/// Static ELF images that replay a program's output
pub mod aot;

pub use bytecode::{CodeObject, Compiler, Value};
pub use config::RuntimeConfig;
pub use diagnostic::{CompileFailure, Diagnostic};
pub use lexer::Lexer;
pub use parser::Parser;
pub use vm::{with_output_capture, OutputCapture, RuntimeError, Vm};

/// Why a program did not finish normally
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Compile(#[from] CompileFailure),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Run source text through lexer, parser, resolver and bytecode compiler
pub fn compile_source(source: &str, filename: &str) -> Result<Rc<CodeObject>, CompileFailure> {
    let (tokens, lex_errors) = Lexer::tokenize(source);
    if !lex_errors.is_empty() {
        return Err(CompileFailure::Lex(lex_errors));
    }
    let module = Parser::parse_module(tokens).map_err(CompileFailure::Parse)?;
    let scopes = resolver::resolve(&module).map_err(CompileFailure::Resolve)?;
    let lines = lexer::LineIndex::new(source);
    Compiler::new(&scopes, &lines, filename)
        .compile_module(&module)
        .map_err(CompileFailure::Compile)
}

/// Compile and run a program as `__main__` on a fresh VM
pub fn run_source(source: &str, filename: &str, config: &RuntimeConfig) -> Result<Value, RunError> {
    let code = compile_source(source, filename)?;
    let mut vm = Vm::new(config);
    Ok(vm.run_module(code)?)
}

/// Like [`run_source`], with everything the program prints captured
pub fn run_captured(source: &str, filename: &str, config: &RuntimeConfig) -> (Result<Value, RunError>, OutputCapture) {
    with_output_capture(|| run_source(source, filename, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_program() {
        let (result, output) = run_captured("print('hi', 1 + 2)\n", "<test>", &RuntimeConfig::default());
        assert!(result.is_ok());
        assert_eq!(output.stdout, "hi 3\n");
    }

    #[test]
    fn compile_failures_stop_before_running() {
        let (result, output) = run_captured("print('x')\ndef\n", "<test>", &RuntimeConfig::default());
        assert!(matches!(result, Err(RunError::Compile(CompileFailure::Parse(_)))));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn uncaught_exceptions_carry_a_traceback() {
        let source = "def f(x):\n    return 1 // x\nf(0)\n";
        let (result, _) = run_captured(source, "t.pa", &RuntimeConfig::default());
        let Err(RunError::Runtime(err)) = result else {
            panic!("expected a runtime error");
        };
        let text = err.to_string();
        assert!(text.starts_with("Traceback (innermost first):\n"), "{text}");
        assert!(text.contains("  at f (t.pa:2)"), "{text}");
        assert!(text.ends_with("ZeroDivisionError: integer division or modulo by zero"), "{text}");
    }
}
