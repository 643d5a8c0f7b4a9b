//! Runtime support for compiled code
//!
//! Compiled entries share one calling convention:
//!
//! ```text
//! extern "C" fn(ctx: *mut JitContext, args: *const PackedValue) -> ReturnPair
//! ```
//!
//! Calls between compiled functions go through [`pasmhon_jit_call`], which
//! re-checks that the global still names the function that was compiled
//! against and finds the entry specialized for the argument tags.

use std::rc::Rc;

use tracing::trace;

use crate::bytecode::{CodeId, Namespace, Value};

use super::cache::CodeCache;
use super::types::{EntryKind, PackedValue, ReturnPair};

/// Symbol name of the call helper inside compiled code
pub const CALL_HELPER: &str = "pasmhon_jit_call";

/// Address of a finalized compiled entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeEntry(*const u8);

type EntryFn = unsafe extern "C" fn(*mut JitContext, *const PackedValue) -> ReturnPair;

impl NativeEntry {
    /// Wrap a pointer returned by `get_finalized_function` for a function
    /// built with the entry signature
    pub(crate) fn new(ptr: *const u8) -> Self {
        Self(ptr)
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self(std::ptr::NonNull::<u8>::dangling().as_ptr())
    }

    /// Run the entry.
    ///
    /// # Safety
    /// The pointer must come from the JIT module that is still alive, and
    /// `args` must hold as many values as the entry reads.
    unsafe fn call(self, ctx: *mut JitContext, args: *const PackedValue) -> ReturnPair {
        let f: EntryFn = std::mem::transmute(self.0);
        f(ctx, args)
    }
}

/// State shared by every compiled frame of one native run
#[repr(C)]
#[derive(Debug)]
pub struct JitContext {
    cache: *const CodeCache,
    /// Native frames currently live
    pub depth: usize,
    /// Native frames allowed before giving up
    pub max_depth: usize,
}

impl JitContext {
    pub fn new(cache: &CodeCache, max_depth: usize) -> Self {
        Self {
            cache,
            depth: 0,
            max_depth,
        }
    }
}

/// A call instruction compiled against a known callee
#[derive(Debug)]
pub struct CallSite {
    pub name: Rc<str>,
    pub globals: Rc<Namespace>,
    pub callee: CodeId,
}

impl CallSite {
    /// Whether the global still names the compiled-against function
    fn is_current(&self) -> bool {
        match self.globals.get(&self.name) {
            Some(Value::Function(function)) => function.code.id == self.callee,
            _ => false,
        }
    }
}

/// Enter a compiled entry from the VM.
///
/// `args` must match the signature the entry was compiled for; the cache
/// lookup that produced `entry` guarantees this.
pub fn invoke(entry: NativeEntry, ctx: &mut JitContext, args: &[PackedValue]) -> ReturnPair {
    if ctx.depth >= ctx.max_depth {
        return ReturnPair::DEOPT;
    }
    ctx.depth += 1;
    // SAFETY: entries live as long as the JIT module, which outlives every
    // context, and the argument count matches the entry's signature
    let result = unsafe { entry.call(ctx, args.as_ptr()) };
    ctx.depth -= 1;
    result
}

/// Call helper used by compiled code for `name(args...)`
///
/// # Safety
/// `ctx` and `site` must be the pointers compiled code was handed and
/// `args` must point at `argc` packed values.
pub unsafe extern "C" fn pasmhon_jit_call(
    ctx: *mut JitContext,
    site: *const CallSite,
    args: *const PackedValue,
    argc: u32,
) -> ReturnPair {
    let ctx = &mut *ctx;
    let site = &*site;
    let args = std::slice::from_raw_parts(args, argc as usize);

    if !site.is_current() {
        trace!(name = %site.name, "call site guard failed");
        return ReturnPair::DEOPT;
    }
    let Some(entry) = (*ctx.cache).lookup(site.callee, EntryKind::Call, args) else {
        trace!(name = %site.name, "no compiled entry for argument types");
        return ReturnPair::DEOPT;
    };
    invoke(entry, ctx, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeId;

    #[test]
    fn call_helper_rejects_stale_sites() {
        let cache = CodeCache::new();
        let mut ctx = JitContext::new(&cache, 10);
        let site = CallSite {
            name: Rc::from("f"),
            globals: Namespace::new("m"),
            callee: CodeId::fresh(),
        };
        let args = [PackedValue::from_value(&Value::Int(1)).unwrap()];
        let result = unsafe { pasmhon_jit_call(&mut ctx, &site, args.as_ptr(), 1) };
        assert!(result.is_deopt());
        assert_eq!(ctx.depth, 0);
    }

    #[test]
    fn invoke_respects_the_depth_limit() {
        let cache = CodeCache::new();
        let mut ctx = JitContext::new(&cache, 0);
        assert!(invoke(NativeEntry::dangling(), &mut ctx, &[]).is_deopt());
    }
}
