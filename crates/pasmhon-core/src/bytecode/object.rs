//! Heap objects referenced by [`Value`]

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{CodeObject, Value};
use crate::vm::{Frame, RuntimeResult, StackFrame, Vm};

/// A closure cell; `None` means the variable is unbound
pub type Cell = Rc<RefCell<Option<Value>>>;

#[must_use]
pub fn new_cell(value: Option<Value>) -> Cell {
    Rc::new(RefCell::new(value))
}

/// A string-keyed variable namespace: module globals, class bodies and the
/// builtins table
pub struct Namespace {
    pub name: String,
    vars: RefCell<IndexMap<String, Value>>,
}

impl Namespace {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            vars: RefCell::new(IndexMap::new()),
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().shift_remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Snapshot of the bindings in insertion order
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.vars
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("len", &self.vars.borrow().len())
            .finish()
    }
}

/// An imported module; owns its globals
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: Option<String>,
    pub namespace: Rc<Namespace>,
}

/// A class with an optional single parent
pub struct ClassObject {
    pub name: String,
    pub base: Option<Rc<ClassObject>>,
    /// Method table, filled from the class body
    pub namespace: Rc<Namespace>,
    /// Derives from `BaseException`
    pub is_exception: bool,
    /// Conversion function for built-in types such as `int` and `list`
    pub constructor: Option<NativeFn>,
}

impl ClassObject {
    /// A user class; exception-ness is inherited from the parent
    #[must_use]
    pub fn new(name: impl Into<String>, base: Option<Rc<ClassObject>>, namespace: Rc<Namespace>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            is_exception: base.as_ref().is_some_and(|b| b.is_exception),
            base,
            namespace,
            constructor: None,
        })
    }

    /// A built-in class
    #[must_use]
    pub fn builtin(name: &str, base: Option<Rc<ClassObject>>, constructor: Option<NativeFn>) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            is_exception: name == "BaseException" || base.as_ref().is_some_and(|b| b.is_exception),
            base,
            namespace: Namespace::new(name),
            constructor,
        })
    }

    /// Find an attribute on this class or its parents
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.namespace.get(name) {
            return Some(v);
        }
        let mut current = self.base.as_ref();
        while let Some(class) = current {
            if let Some(v) = class.namespace.get(name) {
                return Some(v);
            }
            current = class.base.as_ref();
        }
        None
    }

    /// This class followed by its parents
    pub fn ancestors(self: &Rc<Self>) -> impl Iterator<Item = Rc<ClassObject>> {
        std::iter::successors(Some(Rc::clone(self)), |c| c.base.clone())
    }

    #[must_use]
    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<ClassObject>) -> bool {
        self.ancestors().any(|c| Rc::ptr_eq(&c, other))
    }
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

/// An instance of a user class
pub struct Instance {
    pub class: Rc<ClassObject>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<ClassObject>) -> Rc<Self> {
        Rc::new(Self {
            class,
            attrs: RefCell::new(IndexMap::new()),
        })
    }
}

/// A raised or raisable exception
pub struct ExceptionObject {
    pub class: Rc<ClassObject>,
    pub args: RefCell<Vec<Value>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
    /// Frames the exception passed through, innermost first
    pub traceback: RefCell<Vec<StackFrame>>,
}

impl ExceptionObject {
    #[must_use]
    pub fn new(class: Rc<ClassObject>, args: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            class,
            args: RefCell::new(args),
            attrs: RefCell::new(IndexMap::new()),
            traceback: RefCell::new(Vec::new()),
        })
    }

    /// `str(exc)`: empty for no arguments, the argument for one, the
    /// argument tuple otherwise. `KeyError` shows its key quoted.
    #[must_use]
    pub fn message(&self) -> String {
        let args = self.args.borrow();
        match args.as_slice() {
            [] => String::new(),
            [single] if self.class.name == "KeyError" => single.repr(),
            [single] => single.to_string(),
            many => Value::tuple(many.to_vec()).to_string(),
        }
    }

    /// First argument, used as the payload of `StopIteration`
    #[must_use]
    pub fn value(&self) -> Value {
        self.args.borrow().first().cloned().unwrap_or(Value::None)
    }
}

/// A user-defined function with its captured environment
pub struct Function {
    pub name: String,
    pub code: Rc<CodeObject>,
    pub globals: Rc<Namespace>,
    /// Defaults for the trailing positional parameters
    pub defaults: Vec<Value>,
    pub kwdefaults: IndexMap<String, Value>,
    /// Cells for the code's free variables, in `freevars` order
    pub cells: Vec<Cell>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Arguments handed to a call
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(Rc<str>, Value)>,
}

impl CallArgs {
    #[must_use]
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    /// Take a keyword argument by name
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| &**k == name)?;
        Some(self.keywords.remove(index).1)
    }
}

/// Signature of a built-in function
pub type NativeFn = fn(&mut Vm, CallArgs) -> RuntimeResult<Value>;

/// A built-in function
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    /// Exact positional arity, or -1 when variadic or keyword-aware
    pub arity: i8,
    pub function: NativeFn,
}

impl NativeFunction {
    #[must_use]
    pub const fn new(name: &'static str, arity: i8, function: NativeFn) -> Self {
        Self {
            name,
            arity,
            function,
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// A method bound to its receiver
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Created,
    Suspended,
    Running,
    Finished,
}

/// A generator: owns its frame while suspended
pub struct Generator {
    pub name: String,
    pub frame: Option<Box<Frame>>,
    pub state: GeneratorState,
}

impl Generator {
    #[must_use]
    pub fn new(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            frame: Some(Box::new(frame)),
            state: GeneratorState::Created,
        }
    }
}

/// State of a built-in iterator
pub enum IterState {
    /// Snapshot of a tuple, string or dict view
    Seq { items: Rc<[Value]>, index: usize },
    /// Live list iteration
    List {
        list: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    Range { next: i64, stop: i64, step: i64 },
    Enumerate { inner: Value, count: i64 },
    Zip { inners: Vec<Value> },
    /// `map(f, it)`
    Map { function: Value, inner: Value },
    /// `filter(f, it)`
    Filter { function: Value, inner: Value },
}
