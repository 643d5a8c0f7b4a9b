//! Compiled code objects

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::Chunk;

static NEXT_CODE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a [`CodeObject`], used by the profiler and
/// the compiled-code cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(u32);

impl CodeId {
    #[must_use]
    pub fn fresh() -> Self {
        CodeId(NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Module,
    Function,
    Lambda,
    Comprehension,
    Class,
}

impl CodeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CodeKind::Module => "module",
            CodeKind::Function => "function",
            CodeKind::Lambda => "lambda",
            CodeKind::Comprehension => "comprehension",
            CodeKind::Class => "class",
        }
    }
}

/// What a protected range's handler does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Except,
    Finally,
    WithCleanup,
}

/// One protected range of the exception table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First covered instruction offset
    pub start: u32,
    /// One past the last covered offset
    pub end: u32,
    /// Offset the VM jumps to with the exception pushed
    pub handler: u32,
    /// Operand stack depth to truncate to before pushing the exception
    pub depth: u16,
    pub kind: HandlerKind,
}

impl ExceptionEntry {
    #[must_use]
    pub const fn covers(&self, offset: usize) -> bool {
        self.start as usize <= offset && offset < self.end as usize
    }
}

/// Parameter layout of a function-like code object.
///
/// Slots are laid out positional parameters first, then keyword-only
/// parameters, then `*args`, then `**kwargs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamSpec {
    pub positional: u16,
    pub kwonly: u16,
    /// Number of positional parameters with defaults
    pub defaults: u16,
    pub vararg: Option<u16>,
    pub kwarg: Option<u16>,
}

/// An immutable unit of compiled code: a module, function, lambda,
/// comprehension or class body
pub struct CodeObject {
    pub id: CodeId,
    pub name: String,
    pub kind: CodeKind,
    pub filename: Rc<str>,
    pub first_line: u32,
    pub chunk: Chunk,
    /// Local slot names; parameters come first
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    /// Global, builtin, attribute and module names referenced by operands
    pub names: Vec<Rc<str>>,
    pub params: ParamSpec,
    /// Innermost ranges first
    pub exception_table: Vec<ExceptionEntry>,
    pub is_generator: bool,
    /// For each free variable, the index of the enclosing frame's cell it
    /// is captured from when the function object is built
    pub free_sources: Vec<u16>,
}

impl CodeObject {
    /// Innermost protected range covering `offset`
    #[must_use]
    pub fn handler_for(&self, offset: usize) -> Option<&ExceptionEntry> {
        self.exception_table.iter().find(|e| e.covers(offset))
    }

    #[must_use]
    pub fn line_at(&self, offset: usize) -> u32 {
        self.chunk.get_line(offset)
    }

    #[must_use]
    pub fn name_at(&self, index: u16) -> Option<&Rc<str>> {
        self.names.get(index as usize)
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Names of the positional and keyword-only parameters, in slot order
    #[must_use]
    pub fn named_params(&self) -> &[String] {
        let count = (self.params.positional + self.params.kwonly) as usize;
        &self.varnames[..count.min(self.varnames.len())]
    }

    #[must_use]
    pub fn kwonly_names(&self) -> &[String] {
        let start = self.params.positional as usize;
        &self.named_params()[start..]
    }

    /// Nested code objects in the constant pool
    pub fn children(&self) -> impl Iterator<Item = &Rc<CodeObject>> {
        self.chunk.constants().iter().filter_map(|c| match c {
            super::Value::Code(code) => Some(code),
            _ => None,
        })
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("varnames", &self.varnames)
            .field("cellvars", &self.cellvars)
            .field("freevars", &self.freevars)
            .field("is_generator", &self.is_generator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start: u32, end: u32, handler: u32) -> ExceptionEntry {
        ExceptionEntry {
            start,
            end,
            handler,
            depth: 0,
            kind: HandlerKind::Except,
        }
    }

    fn code_with_table(table: Vec<ExceptionEntry>) -> CodeObject {
        CodeObject {
            id: CodeId::fresh(),
            name: "f".into(),
            kind: CodeKind::Function,
            filename: Rc::from("<test>"),
            first_line: 1,
            chunk: Chunk::new(),
            varnames: vec!["a".into(), "b".into(), "k".into(), "rest".into()],
            cellvars: Vec::new(),
            freevars: Vec::new(),
            names: Vec::new(),
            params: ParamSpec {
                positional: 2,
                kwonly: 1,
                defaults: 0,
                vararg: Some(3),
                kwarg: None,
            },
            exception_table: table,
            is_generator: false,
            free_sources: Vec::new(),
        }
    }

    #[test]
    fn code_ids_are_unique() {
        assert_ne!(CodeId::fresh(), CodeId::fresh());
    }

    #[test]
    fn innermost_entry_wins() {
        let code = code_with_table(vec![entry(4, 8, 20), entry(0, 12, 30)]);
        assert_eq!(code.handler_for(5).map(|e| e.handler), Some(20));
        assert_eq!(code.handler_for(10).map(|e| e.handler), Some(30));
        assert!(code.handler_for(12).is_none());
    }

    #[test]
    fn parameter_slices() {
        let code = code_with_table(Vec::new());
        assert_eq!(code.named_params(), ["a", "b", "k"]);
        assert_eq!(code.kwonly_names(), ["k"]);
    }
}
