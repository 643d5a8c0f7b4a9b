//! Tiered compilation with Cranelift
//!
//! The VM counts calls and loop back edges per code object. Once a
//! function reaches the call threshold it is compiled for the primitive
//! types of its arguments; once a loop reaches the loop threshold the
//! running frame is compiled from the loop header and entered on stack.
//!
//! ```text
//! bytecode ─► Analysis (types per slot) ─► FunctionCompiler ─► native entry
//!                                                                  │
//!             interpreter ◄── TAG_DEOPT ◄──────────────────────────┘
//! ```
//!
//! Compiled code never has effects outside its own locals, so a deopt can
//! always be answered by running the same code in the interpreter from
//! the point where native execution began.

mod analysis;
mod cache;
mod compiler;
mod profiler;
mod runtime;
pub mod types;

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::bytecode::{CodeId, CodeKind, CodeObject, Function, Namespace, Value};
use crate::config::JitConfig;
use crate::vm::Frame;

use analysis::{Analysis, CallResolver, ResolvedCall};
use cache::{CacheEntry, CodeCache};
use compiler::JitCompiler;
use profiler::Profiler;
use runtime::{CallSite, JitContext, NativeEntry};
use types::{PackedValue, Ty, TypeSignature};

/// Errors that can occur during JIT compilation
#[derive(Debug, Error)]
pub enum JitError {
    /// Cranelift compilation error
    #[error("Cranelift compilation error: {0}")]
    Cranelift(String),

    /// The host cannot run compiled code
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),

    /// Bytecode the compiler does not handle
    #[error("unsupported: {0}")]
    UnsupportedInstruction(String),

    /// Paths disagree on the type of a stack slot
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Internal compiler error
    #[error("internal JIT error: {0}")]
    Internal(String),
}

/// Result type for JIT operations
pub type JitResult<T> = Result<T, JitError>;

/// Counters reported by `-v` and the benchmarks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitStats {
    /// Entries compiled
    pub compiled: usize,
    /// Compile attempts that failed
    pub failed: usize,
    /// Native runs that gave up and fell back to the interpreter
    pub deopts: usize,
    /// Native runs that completed
    pub native_runs: usize,
}

/// Whether this host can run Cranelift output through the native entry ABI
const fn host_supported() -> bool {
    cfg!(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))
}

/// Profiler, compiler and compiled-code cache for one VM
pub struct Jit {
    config: JitConfig,
    compiler: JitCompiler,
    cache: CodeCache,
    profiler: Profiler,
    /// Call sites referenced by compiled code; boxed so their addresses
    /// stay fixed
    sites: Vec<Box<CallSite>>,
    stats: JitStats,
}

impl Jit {
    pub fn new(config: &JitConfig) -> JitResult<Self> {
        if !host_supported() {
            return Err(JitError::UnsupportedHost(format!(
                "{} on {}",
                std::env::consts::ARCH,
                std::env::consts::OS
            )));
        }
        Ok(Self {
            config: config.clone(),
            compiler: JitCompiler::new()?,
            cache: CodeCache::new(),
            profiler: Profiler::new(),
            sites: Vec::new(),
            stats: JitStats::default(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> JitStats {
        self.stats
    }

    /// Whether frames of `code` should record type feedback
    #[must_use]
    pub fn is_warm(&self, code: CodeId) -> bool {
        self.profiler
            .is_warm(code, self.config.call_threshold, self.config.loop_threshold)
    }

    pub fn record_operands(&mut self, code: CodeId, offset: usize, a: &Value, b: &Value) {
        self.profiler.record_operands(code, offset, a, b);
    }

    pub fn record_return(&mut self, code: CodeId, value: &Value) {
        self.profiler.record_return(code, value);
    }

    /// Count a call of `function` and run it natively once it is hot.
    ///
    /// `None` means the interpreter should run the call; the arguments are
    /// untouched.
    pub fn on_call(&mut self, function: &Rc<Function>, args: &[Value], depth: usize) -> Option<Value> {
        let code = &function.code;
        let calls = self.profiler.record_call(code.id);
        if !callable_natively(code, args.len()) {
            return None;
        }
        if self.is_warm(code.id) {
            self.profiler.record_params(code.id, args);
        }
        if calls < self.config.call_threshold {
            return None;
        }
        // recursive calls are typed by earlier results, so wait for one
        if !self.profiler.profile(code.id).is_some_and(|profile| profile.returns.is_some()) {
            return None;
        }

        let tys: Vec<Ty> = args.iter().map(Ty::of).collect::<Option<_>>()?;
        let signature = TypeSignature::call(&tys);
        let entry = self.entry_for(code, &signature, &function.globals)?;
        let packed: Vec<PackedValue> = args.iter().filter_map(PackedValue::from_value).collect();
        self.run(code, &signature, entry, &packed, depth)
    }

    /// Count a back edge to `header` in `frame` and, once the loop is hot,
    /// finish the frame natively.
    ///
    /// Returns the frame's return value, or `None` to keep interpreting
    /// with the frame unchanged.
    pub fn on_back_edge(&mut self, frame: &Frame, header: usize, depth: usize) -> Option<Value> {
        let code = &frame.code;
        let count = self.profiler.record_back_edge(code.id, header);
        if count < self.config.loop_threshold
            || !frame.is_plain_function()
            || !frame.stack.is_empty()
            || code.cell_count() > 0
        {
            return None;
        }

        let tags: Vec<Option<Ty>> = frame
            .locals
            .iter()
            .map(|local| match local {
                None => Some(None),
                Some(value) => Ty::of(value).map(Some),
            })
            .collect::<Option<_>>()?;
        let signature = TypeSignature::osr(header, tags);
        let entry = self.entry_for(code, &signature, &frame.globals)?;
        let packed: Vec<PackedValue> = frame
            .locals
            .iter()
            .map(|local| local.as_ref().and_then(PackedValue::from_value).unwrap_or(PackedValue::unbound()))
            .collect();
        debug!(function = %code.name, header, "entering compiled loop");
        self.run(code, &signature, entry, &packed, depth)
    }

    /// The compiled entry for `signature`, compiling it on first request
    fn entry_for(&mut self, code: &Rc<CodeObject>, signature: &TypeSignature, globals: &Rc<Namespace>) -> Option<NativeEntry> {
        match self.cache.get(code.id, signature) {
            Some(CacheEntry::Compiled(entry)) => return Some(entry),
            Some(CacheEntry::Failed) => return None,
            None => {}
        }

        debug!(function = %code.name, signature = %signature, "compiling");
        match self.compile(code, signature, globals) {
            Ok(entry) => {
                debug!(function = %code.name, signature = %signature, "compiled");
                self.stats.compiled += 1;
                self.cache.insert(code.id, signature.clone(), CacheEntry::Compiled(entry));
                Some(entry)
            }
            Err(err) => {
                debug!(function = %code.name, signature = %signature, error = %err, "compilation failed");
                self.stats.failed += 1;
                self.cache.insert(code.id, signature.clone(), CacheEntry::Failed);
                None
            }
        }
    }

    fn compile(&mut self, code: &Rc<CodeObject>, signature: &TypeSignature, globals: &Rc<Namespace>) -> JitResult<NativeEntry> {
        let resolver = Resolver {
            code,
            signature,
            globals,
            cache: &self.cache,
            profiler: &self.profiler,
        };
        let analysis = Analysis::run(code, signature, self.profiler.profile(code.id), &resolver)?;

        let mut sites = HashMap::new();
        for (&offset, call) in &analysis.calls {
            let site = Box::new(CallSite {
                name: Rc::clone(&call.name),
                globals: Rc::clone(globals),
                callee: call.callee,
            });
            sites.insert(offset, &*site as *const CallSite);
            self.sites.push(site);
        }
        self.compiler.compile(code, signature, &analysis, &sites)
    }

    fn run(
        &mut self,
        code: &CodeObject,
        signature: &TypeSignature,
        entry: NativeEntry,
        args: &[PackedValue],
        depth: usize,
    ) -> Option<Value> {
        let mut ctx = JitContext::new(&self.cache, depth);
        let result = runtime::invoke(entry, &mut ctx, args);
        match result.to_value() {
            Some(value) => {
                self.stats.native_runs += 1;
                Some(value)
            }
            None => {
                debug!(function = %code.name, signature = %signature, "deoptimized");
                self.stats.deopts += 1;
                self.cache.blacklist(code.id, signature);
                None
            }
        }
    }
}

/// Function shapes the native entry convention covers: exactly the
/// positional parameters, no closures, no generators
fn callable_natively(code: &CodeObject, argc: usize) -> bool {
    matches!(code.kind, CodeKind::Function | CodeKind::Lambda)
        && !code.is_generator
        && code.cell_count() == 0
        && code.params.vararg.is_none()
        && code.params.kwarg.is_none()
        && code.params.kwonly == 0
        && usize::from(code.params.positional) == argc
}

/// Resolves calls against the globals of the code being compiled
struct Resolver<'a> {
    code: &'a CodeObject,
    signature: &'a TypeSignature,
    globals: &'a Namespace,
    cache: &'a CodeCache,
    profiler: &'a Profiler,
}

impl CallResolver for Resolver<'_> {
    fn resolve(&self, name: &Rc<str>, args: &[Ty]) -> Option<ResolvedCall> {
        let Some(Value::Function(callee)) = self.globals.get(name) else {
            trace!(%name, "call target is not a function");
            return None;
        };
        let callee_code = &callee.code;
        if !callable_natively(callee_code, args.len()) {
            return None;
        }

        let wanted = TypeSignature::call(args);
        let recursive = callee_code.id == self.code.id && *self.signature == wanted;
        let compiled = matches!(self.cache.get(callee_code.id, &wanted), Some(CacheEntry::Compiled(_)));
        if !recursive && !compiled {
            trace!(%name, signature = %wanted, "callee not compiled");
            return None;
        }
        let result = self.profiler.profile(callee_code.id)?.return_type()?;
        Some(ResolvedCall {
            name: Rc::clone(name),
            callee: callee_code.id,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jit(threshold: u32) -> Jit {
        Jit::new(&JitConfig {
            enabled: true,
            call_threshold: threshold,
            loop_threshold: threshold,
        })
        .expect("host supported")
    }

    #[test]
    fn cold_functions_are_interpreted() {
        let mut jit = jit(1000);
        let module = crate::compile_source("def f(x):\n    return x + 1\n", "<test>").expect("compiles");
        let code = module.children().next().cloned().expect("function");
        let function = Rc::new(Function {
            name: "f".to_string(),
            code,
            globals: Namespace::new("__main__"),
            defaults: Vec::new(),
            kwdefaults: indexmap::IndexMap::new(),
            cells: Vec::new(),
        });
        assert!(jit.on_call(&function, &[Value::Int(1)], 100).is_none());
        assert_eq!(jit.stats(), JitStats::default());
    }

    #[test]
    fn hot_functions_run_natively() {
        let mut jit = jit(2);
        let module = crate::compile_source("def f(x):\n    return x * 2\n", "<test>").expect("compiles");
        let code = module.children().next().cloned().expect("function");
        let function = Rc::new(Function {
            name: "f".to_string(),
            code,
            globals: Namespace::new("__main__"),
            defaults: Vec::new(),
            kwdefaults: indexmap::IndexMap::new(),
            cells: Vec::new(),
        });
        assert!(jit.on_call(&function, &[Value::Int(1)], 100).is_none());
        // nothing compiles before the function has returned once
        assert!(jit.on_call(&function, &[Value::Int(1)], 100).is_none());
        assert_eq!(jit.stats().compiled, 0);
        jit.record_return(function.code.id, &Value::Int(2));
        assert_eq!(jit.on_call(&function, &[Value::Int(21)], 100), Some(Value::Int(42)));
        assert_eq!(jit.stats().compiled, 1);

        // overflow deoptimizes and the entry is never used again
        assert!(jit.on_call(&function, &[Value::Int(i64::MAX)], 100).is_none());
        assert!(jit.on_call(&function, &[Value::Int(3)], 100).is_none());
        let stats = jit.stats();
        assert_eq!(stats.deopts, 1);
        assert_eq!(stats.compiled, 1);
        assert_eq!(stats.native_runs, 1);
    }

    #[test]
    fn unsupported_shapes_are_skipped() {
        let mut jit = jit(1);
        let module =
            crate::compile_source("def f(*args):\n    return 1\n", "<test>").expect("compiles");
        let code = module.children().next().cloned().expect("function");
        let function = Rc::new(Function {
            name: "f".to_string(),
            code,
            globals: Namespace::new("__main__"),
            defaults: Vec::new(),
            kwdefaults: indexmap::IndexMap::new(),
            cells: Vec::new(),
        });
        assert!(jit.on_call(&function, &[Value::Int(1)], 100).is_none());
        assert_eq!(jit.stats().failed, 0);
    }
}
