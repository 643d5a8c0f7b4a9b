//! Runtime errors for the pasmhon virtual machine

use std::fmt;

use crate::bytecode::Value;

/// A runtime error that stopped VM execution
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,

    /// Frames the error passed through, innermost first
    pub stack_trace: Vec<StackFrame>,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            stack_trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }

    /// Exception class name for the final traceback line
    #[must_use]
    pub fn class_name(&self) -> String {
        match &self.kind {
            RuntimeErrorKind::UncaughtException(Value::Exception(exc))
            | RuntimeErrorKind::Raised(Value::Exception(exc)) => exc.class.name.clone(),
            kind => kind.exception_class().unwrap_or("RuntimeError").to_string(),
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match &self.kind {
            RuntimeErrorKind::UncaughtException(Value::Exception(exc))
            | RuntimeErrorKind::Raised(Value::Exception(exc)) => exc.message(),
            kind => kind.to_string(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.stack_trace.is_empty() {
            writeln!(f, "Traceback (innermost first):")?;
            for frame in &self.stack_trace {
                writeln!(f, "{frame}")?;
            }
        }
        let message = self.message();
        if message.is_empty() {
            write!(f, "{}", self.class_name())
        } else {
            write!(f, "{}: {message}", self.class_name())
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A stack frame in a traceback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: String,

    pub line: u32,

    /// The source file, if known
    pub source: Option<String>,
}

impl StackFrame {
    #[must_use]
    pub fn new(function_name: String, line: u32) -> Self {
        Self {
            function_name,
            line,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(function_name: String, line: u32, source: String) -> Self {
        Self {
            function_name,
            line,
            source: Some(source),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "  at {} ({source}:{})", self.function_name, self.line),
            None => write!(f, "  at {} (line {})", self.function_name, self.line),
        }
    }
}

/// The kind of runtime error
///
/// Everything except the internal kinds at the end turns into a catchable
/// language exception of the class named by [`exception_class`].
///
/// [`exception_class`]: RuntimeErrorKind::exception_class
#[derive(Debug, Clone)]
pub enum RuntimeErrorKind {
    TypeError(String),

    /// Division or modulo by zero
    ZeroDivision(String),

    AttributeError(String),

    IndexError(String),

    /// Undefined global or builtin name
    NameError(String),

    /// Local read before assignment
    UnboundLocal(String),

    /// Missing dictionary key
    KeyError(Value),

    ValueError(String),

    /// Frame limit exceeded
    RecursionError,

    OverflowError(String),

    /// Iterator exhausted, carrying a generator's return value
    StopIteration(Value),

    AssertionError,

    ImportError(String),

    NotImplemented(String),

    Runtime(String),

    /// A language-level exception object in flight
    Raised(Value),

    /// An exception that reached the outermost frame unhandled
    UncaughtException(Value),

    /// Invalid opcode (internal error)
    InvalidOpcode(u8),

    /// Stack underflow (internal error)
    StackUnderflow,

    /// Internal VM error
    Internal(String),
}

impl RuntimeErrorKind {
    /// Whether `try`/`except` may observe this error
    #[must_use]
    pub const fn is_catchable(&self) -> bool {
        !matches!(
            self,
            RuntimeErrorKind::InvalidOpcode(_)
                | RuntimeErrorKind::StackUnderflow
                | RuntimeErrorKind::Internal(_)
                | RuntimeErrorKind::UncaughtException(_)
        )
    }

    /// Name of the built-in exception class this error becomes
    #[must_use]
    pub const fn exception_class(&self) -> Option<&'static str> {
        Some(match self {
            RuntimeErrorKind::TypeError(_) => "TypeError",
            RuntimeErrorKind::ZeroDivision(_) => "ZeroDivisionError",
            RuntimeErrorKind::AttributeError(_) => "AttributeError",
            RuntimeErrorKind::IndexError(_) => "IndexError",
            RuntimeErrorKind::NameError(_) => "NameError",
            RuntimeErrorKind::UnboundLocal(_) => "UnboundLocalError",
            RuntimeErrorKind::KeyError(_) => "KeyError",
            RuntimeErrorKind::ValueError(_) => "ValueError",
            RuntimeErrorKind::RecursionError => "RecursionError",
            RuntimeErrorKind::OverflowError(_) => "OverflowError",
            RuntimeErrorKind::StopIteration(_) => "StopIteration",
            RuntimeErrorKind::AssertionError => "AssertionError",
            RuntimeErrorKind::ImportError(_) => "ImportError",
            RuntimeErrorKind::NotImplemented(_) => "NotImplementedError",
            RuntimeErrorKind::Runtime(_) => "RuntimeError",
            _ => return None,
        })
    }

    /// Constructor arguments for the exception object
    #[must_use]
    pub fn exception_args(&self) -> Vec<Value> {
        match self {
            RuntimeErrorKind::KeyError(key) => vec![key.clone()],
            RuntimeErrorKind::StopIteration(Value::None) | RuntimeErrorKind::AssertionError => {
                Vec::new()
            }
            RuntimeErrorKind::StopIteration(value) => vec![value.clone()],
            other => vec![Value::str(other.to_string())],
        }
    }
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::TypeError(msg)
            | RuntimeErrorKind::ZeroDivision(msg)
            | RuntimeErrorKind::AttributeError(msg)
            | RuntimeErrorKind::IndexError(msg)
            | RuntimeErrorKind::ValueError(msg)
            | RuntimeErrorKind::OverflowError(msg)
            | RuntimeErrorKind::ImportError(msg)
            | RuntimeErrorKind::NotImplemented(msg)
            | RuntimeErrorKind::Runtime(msg) => write!(f, "{msg}"),
            RuntimeErrorKind::NameError(name) => write!(f, "name '{name}' is not defined"),
            RuntimeErrorKind::UnboundLocal(name) => {
                write!(f, "local variable '{name}' referenced before assignment")
            }
            RuntimeErrorKind::KeyError(key) => write!(f, "{}", key.repr()),
            RuntimeErrorKind::RecursionError => write!(f, "maximum recursion depth exceeded"),
            RuntimeErrorKind::StopIteration(value) => match value {
                Value::None => Ok(()),
                other => write!(f, "{other}"),
            },
            RuntimeErrorKind::AssertionError => Ok(()),
            RuntimeErrorKind::Raised(value) | RuntimeErrorKind::UncaughtException(value) => {
                write!(f, "{value}")
            }
            RuntimeErrorKind::InvalidOpcode(op) => write!(f, "invalid opcode: {op}"),
            RuntimeErrorKind::StackUnderflow => write!(f, "stack underflow"),
            RuntimeErrorKind::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}

/// Result type for VM operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Shorthand for a `TypeError` result
pub(crate) fn type_error<T>(message: impl Into<String>) -> RuntimeResult<T> {
    Err(RuntimeErrorKind::TypeError(message.into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catchable_kinds_map_to_classes() {
        assert_eq!(
            RuntimeErrorKind::ZeroDivision("division by zero".into()).exception_class(),
            Some("ZeroDivisionError")
        );
        assert_eq!(
            RuntimeErrorKind::UnboundLocal("x".into()).exception_class(),
            Some("UnboundLocalError")
        );
        assert!(!RuntimeErrorKind::StackUnderflow.is_catchable());
        assert!(RuntimeErrorKind::RecursionError.is_catchable());
    }

    #[test]
    fn traceback_rendering() {
        let err = RuntimeError::new(RuntimeErrorKind::NameError("x".into())).with_trace(vec![
            StackFrame::with_source("f".into(), 3, "main.pa".into()),
            StackFrame::with_source("<module>".into(), 5, "main.pa".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "Traceback (innermost first):\n  at f (main.pa:3)\n  at <module> (main.pa:5)\nNameError: name 'x' is not defined"
        );
    }

    #[test]
    fn empty_message_prints_only_the_class() {
        let err = RuntimeError::new(RuntimeErrorKind::AssertionError);
        assert_eq!(err.to_string(), "AssertionError");
    }
}
