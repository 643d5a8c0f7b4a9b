//! Built-in classes and the exception hierarchy

use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::{CallArgs, ClassObject, ExceptionObject, NativeFn, Value};

use super::error::{type_error, RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::natives;
use super::Vm;

/// Built-in exception classes as `(name, parent)`, parents first
const EXCEPTION_HIERARCHY: &[(&str, &str)] = &[
    ("BaseException", "object"),
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("NameError", "Exception"),
    ("UnboundLocalError", "NameError"),
    ("RuntimeError", "Exception"),
    ("RecursionError", "RuntimeError"),
    ("NotImplementedError", "RuntimeError"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
    ("AttributeError", "Exception"),
    ("StopIteration", "Exception"),
    ("AssertionError", "Exception"),
    ("ImportError", "Exception"),
];

/// Classes of built-in values as `(name, parent, constructor)`. Those with
/// a constructor are also bound as builtins.
const TYPE_CLASSES: &[(&str, &str, Option<NativeFn>)] = &[
    ("type", "object", Some(natives::type_of)),
    ("int", "object", Some(natives::int)),
    ("bool", "int", Some(natives::bool_new)),
    ("float", "object", Some(natives::float)),
    ("str", "object", Some(natives::str_new)),
    ("list", "object", Some(natives::list)),
    ("tuple", "object", Some(natives::tuple)),
    ("dict", "object", Some(natives::dict)),
    ("range", "object", Some(natives::range)),
    ("NoneType", "object", None),
    ("slice", "object", None),
    ("function", "object", None),
    ("builtin_function_or_method", "object", None),
    ("method", "object", None),
    ("generator", "object", None),
    ("iterator", "object", None),
    ("module", "object", None),
    ("code", "object", None),
];

/// The class objects every VM starts with
pub(crate) struct BuiltinClasses {
    pub object: Rc<ClassObject>,
    /// Classes of built-in values, keyed by type name
    pub types: HashMap<&'static str, Rc<ClassObject>>,
    pub exceptions: HashMap<&'static str, Rc<ClassObject>>,
}

impl BuiltinClasses {
    pub fn new() -> Self {
        let object = ClassObject::builtin("object", None, Some(natives::object_new));
        let mut types = HashMap::new();
        for &(name, parent, constructor) in TYPE_CLASSES {
            let base = types.get(parent).cloned().unwrap_or_else(|| Rc::clone(&object));
            types.insert(name, ClassObject::builtin(name, Some(base), constructor));
        }
        let mut exceptions: HashMap<&'static str, Rc<ClassObject>> = HashMap::new();
        for &(name, parent) in EXCEPTION_HIERARCHY {
            let base = exceptions.get(parent).cloned().unwrap_or_else(|| Rc::clone(&object));
            exceptions.insert(name, ClassObject::builtin(name, Some(base), None));
        }
        Self {
            object,
            types,
            exceptions,
        }
    }

    /// Every class that is bound as a builtin name
    pub fn named(&self) -> impl Iterator<Item = (&'static str, &Rc<ClassObject>)> {
        let types = TYPE_CLASSES
            .iter()
            .filter(|(_, _, constructor)| constructor.is_some())
            .filter_map(|(name, _, _)| self.types.get(name).map(|c| (*name, c)));
        let exceptions = EXCEPTION_HIERARCHY
            .iter()
            .filter_map(|(name, _)| self.exceptions.get(name).map(|c| (*name, c)));
        std::iter::once(("object", &self.object))
            .chain(types)
            .chain(exceptions)
    }

    fn exception(&self, name: &str) -> Rc<ClassObject> {
        self.exceptions
            .get(name)
            .or_else(|| self.exceptions.get("RuntimeError"))
            .cloned()
            .unwrap_or_else(|| Rc::clone(&self.object))
    }
}

impl Vm {
    /// The exception object a catchable error becomes
    pub(crate) fn exception_value(&self, kind: RuntimeErrorKind) -> Value {
        match kind {
            RuntimeErrorKind::Raised(value) | RuntimeErrorKind::UncaughtException(value) => value,
            kind => {
                let class = self.classes.exception(kind.exception_class().unwrap_or("RuntimeError"));
                Value::Exception(ExceptionObject::new(class, kind.exception_args()))
            }
        }
    }

    /// The error reported when an exception escapes the outermost frame
    pub(crate) fn uncaught(exception: Value) -> RuntimeError {
        let trace = match &exception {
            Value::Exception(exc) => exc.traceback.borrow().clone(),
            _ => Vec::new(),
        };
        RuntimeError::new(RuntimeErrorKind::UncaughtException(exception)).with_trace(trace)
    }

    /// Turn the operand of `raise` into an exception object; raising a
    /// class instantiates it with no arguments
    pub(crate) fn make_raisable(&mut self, value: Value) -> RuntimeResult<Value> {
        match value {
            Value::Exception(_) => Ok(value),
            Value::Class(ref class) if class.is_exception => {
                let instance = self.call_sync(value.clone(), CallArgs::default())?;
                match instance {
                    Value::Exception(_) => Ok(instance),
                    _ => type_error("exceptions must derive from BaseException"),
                }
            }
            _ => type_error("exceptions must derive from BaseException"),
        }
    }

    /// Whether `exception` is an instance of `spec`, a class or a tuple of
    /// classes
    pub(crate) fn exception_matches(&self, exception: &Value, spec: &Value) -> RuntimeResult<bool> {
        match spec {
            Value::Class(class) if class.is_exception => {
                Ok(self.class_of(exception).is_subclass_of(class))
            }
            Value::Tuple(classes) => {
                for class in classes.iter() {
                    if self.exception_matches(exception, class)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => type_error("catching classes that do not inherit from BaseException is not allowed"),
        }
    }

    /// Whether an error is a `StopIteration`, and its payload
    pub(crate) fn stop_iteration_value(&self, error: &RuntimeError) -> Option<Value> {
        match &error.kind {
            RuntimeErrorKind::StopIteration(value) => Some(value.clone()),
            RuntimeErrorKind::Raised(Value::Exception(exc)) => {
                let stop = self.classes.exceptions.get("StopIteration")?;
                exc.class.is_subclass_of(stop).then(|| exc.value())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_links_parents() {
        let classes = BuiltinClasses::new();
        let zero = &classes.exceptions["ZeroDivisionError"];
        let arithmetic = &classes.exceptions["ArithmeticError"];
        let base = &classes.exceptions["BaseException"];
        assert!(zero.is_subclass_of(arithmetic));
        assert!(zero.is_subclass_of(base));
        assert!(zero.is_exception);
        assert!(!classes.exceptions["KeyError"].is_subclass_of(arithmetic));
        assert!(!classes.object.is_exception);
    }

    #[test]
    fn bool_derives_from_int() {
        let classes = BuiltinClasses::new();
        assert!(classes.types["bool"].is_subclass_of(&classes.types["int"]));
        assert!(classes.types["int"].is_subclass_of(&classes.object));
    }

    #[test]
    fn named_classes_include_types_and_exceptions() {
        let classes = BuiltinClasses::new();
        let names: Vec<&str> = classes.named().map(|(n, _)| n).collect();
        assert!(names.contains(&"object"));
        assert!(names.contains(&"int"));
        assert!(names.contains(&"ValueError"));
        assert!(!names.contains(&"NoneType"));
    }
}
