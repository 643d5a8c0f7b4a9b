//! Runtime values for the pasmhon virtual machine

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use super::object::{
    BoundMethod, ClassObject, ExceptionObject, Function, Generator, Instance, IterState, Module,
    NativeFunction,
};
use super::CodeObject;

/// Insertion-ordered dictionary storage
pub type Dict = IndexMap<DictKey, Value>;

/// A runtime value
///
/// Numbers, booleans and `None` are held by value. Lists, dicts,
/// instances and generators are shared mutable references.
#[derive(Clone)]
pub enum Value {
    None,

    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    Float(f64),

    Str(Rc<str>),

    List(Rc<RefCell<Vec<Value>>>),

    Tuple(Rc<[Value]>),

    Dict(Rc<RefCell<Dict>>),

    Range(RangeValue),

    Slice(SliceValue),

    /// User-defined function or closure
    Function(Rc<Function>),

    NativeFunction(NativeFunction),

    BoundMethod(Rc<BoundMethod>),

    Class(Rc<ClassObject>),

    Instance(Rc<Instance>),

    Exception(Rc<ExceptionObject>),

    Generator(Rc<RefCell<Generator>>),

    Iterator(Rc<RefCell<IterState>>),

    Module(Rc<Module>),

    /// Compiled code, only ever seen in constant pools
    Code(Rc<CodeObject>),
}

/// `range(start, stop, step)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    #[must_use]
    pub const fn new(start: i64, stop: i64, step: i64) -> Self {
        Self { start, stop, step }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (i128::from(self.start), i128::from(self.stop), i128::from(self.step))
        } else {
            (i128::from(self.stop), i128::from(self.start), -i128::from(self.step))
        };
        if hi <= lo {
            0
        } else {
            ((hi - lo + step - 1) / step) as usize
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item at a non-negative index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i128::try_from(index).ok()? * i128::from(self.step);
        i64::try_from(i128::from(self.start) + offset).ok()
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// `slice(lower, upper, step)` with missing bounds as `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SliceValue {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceValue {
    /// Resolve against a sequence of `len` items, returning
    /// `(start, stop, step)` with the usual clamping rules.
    /// Returns `None` for a zero step.
    #[must_use]
    pub fn indices(&self, len: usize) -> Option<(i64, i64, i64)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return None;
        }
        let len = len as i64;
        let clamp = |bound: Option<i64>, default: i64| -> i64 {
            match bound {
                None => default,
                Some(i) if i < 0 => {
                    let i = i + len;
                    if i < 0 {
                        if step < 0 {
                            -1
                        } else {
                            0
                        }
                    } else {
                        i
                    }
                }
                Some(i) if i >= len => {
                    if step < 0 {
                        len - 1
                    } else {
                        len
                    }
                }
                Some(i) => i,
            }
        };
        if step > 0 {
            Some((clamp(self.lower, 0), clamp(self.upper, len), step))
        } else {
            Some((clamp(self.lower, len - 1), clamp(self.upper, -1), step))
        }
    }

    /// Indices selected from a sequence of `len` items
    #[must_use]
    pub fn select(&self, len: usize) -> Option<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Some(out)
    }
}

/// A hashable dictionary key.
///
/// Equal numbers hash equally across `bool`, `int` and `float`, so
/// `d[1]`, `d[1.0]` and `d[True]` name the same entry. Objects hash by
/// identity.
#[derive(Clone)]
pub struct DictKey(Value);

impl DictKey {
    /// Wrap a value, or return it back if it is unhashable
    pub fn new(value: Value) -> Result<Self, Value> {
        if is_hashable(&value) {
            Ok(Self(value))
        } else {
            Err(value)
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        Self(Value::str(s))
    }
}

fn is_hashable(value: &Value) -> bool {
    match value {
        Value::List(_) | Value::Dict(_) | Value::Slice(_) => false,
        Value::Tuple(items) => items.iter().all(is_hashable),
        _ => true,
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.py_eq(&other.0)
    }
}

impl Eq for DictKey {}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::None => 0u8.hash(state),
        Value::Bool(b) => i64::from(*b).hash(state),
        Value::Int(i) => i.hash(state),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9.0e18 {
                (*f as i64).hash(state);
            } else {
                f.to_bits().hash(state);
            }
        }
        Value::Str(s) => s.hash(state),
        Value::Tuple(items) => {
            items.len().hash(state);
            for item in items.iter() {
                hash_value(item, state);
            }
        }
        Value::Range(r) => r.hash(state),
        other => other.identity().hash(state),
    }
}

impl fmt::Debug for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.repr())
    }
}

impl Value {
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    #[must_use]
    pub fn dict(entries: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    #[must_use]
    pub fn iterator(state: IterState) -> Self {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truthiness of built-in values. Instances are always truthy here;
    /// the VM consults `__bool__`/`__len__` first.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Returns the type name of this value (for error messages)
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Slice(_) => "slice",
            Value::Function(_) => "function",
            Value::NativeFunction(_) => "builtin_function_or_method",
            Value::BoundMethod(_) => "method",
            Value::Class(_) => "type",
            Value::Instance(inst) => &inst.class.name,
            Value::Exception(exc) => &exc.class.name,
            Value::Generator(_) => "generator",
            Value::Iterator(_) => "iterator",
            Value::Module(_) => "module",
            Value::Code(_) => "code",
        }
    }

    /// Integer view of `int` and `bool`
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any number
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Address used for identity comparison and identity hashing
    #[must_use]
    pub fn identity(&self) -> usize {
        match self {
            Value::Str(s) => Rc::as_ptr(s).cast::<u8>() as usize,
            Value::List(l) => Rc::as_ptr(l) as usize,
            Value::Tuple(t) => Rc::as_ptr(t).cast::<Value>() as usize,
            Value::Dict(d) => Rc::as_ptr(d) as usize,
            Value::Function(f) => Rc::as_ptr(f) as usize,
            Value::NativeFunction(n) => n.function as usize,
            Value::BoundMethod(m) => Rc::as_ptr(m) as usize,
            Value::Class(c) => Rc::as_ptr(c) as usize,
            Value::Instance(i) => Rc::as_ptr(i) as usize,
            Value::Exception(e) => Rc::as_ptr(e) as usize,
            Value::Generator(g) => Rc::as_ptr(g) as usize,
            Value::Iterator(i) => Rc::as_ptr(i) as usize,
            Value::Module(m) => Rc::as_ptr(m) as usize,
            Value::Code(c) => Rc::as_ptr(c) as usize,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => 0,
            Value::Range(_) | Value::Slice(_) => 0,
        }
    }

    /// `is`: value identity for immediates and strings, pointer identity
    /// for everything else
    #[must_use]
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::NativeFunction(a), Value::NativeFunction(b)) => a.name == b.name,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.identity() != 0
                    && self.identity() == other.identity()
            }
        }
    }

    /// Structural equality of built-in values (`==` without dunders)
    #[must_use]
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (a, b) if is_number(a) && is_number(b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.py_eq(w)))
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a == b,
            _ => self.is(other),
        }
    }

    /// Ordering of built-in values (`<` without dunders)
    #[must_use]
    pub fn py_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (a, b) if is_number(a) && is_number(b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_float()?.partial_cmp(&b.as_float()?),
            },
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
            _ => None,
        }
    }

    /// `repr()` of built-in values
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote_str(s),
            _ => self.to_string(),
        }
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Quote a string the way `repr()` does
#[must_use]
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\x00"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Format a float the way the language prints it: integral values keep a
/// trailing `.0`, very large and very small magnitudes use an exponent.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{f:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value], open: char, close: char) -> fmt::Result {
    f.write_char(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&item.repr())?;
    }
    if open == '(' && items.len() == 1 {
        f.write_char(',')?;
    }
    f.write_char(close)
}

/// `str()` of built-in values
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => write_seq(f, &items.borrow(), '[', ']'),
            Value::Tuple(items) => write_seq(f, items, '(', ')'),
            Value::Dict(entries) => {
                f.write_char('{')?;
                for (i, (k, v)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k.value().repr(), v.repr())?;
                }
                f.write_char('}')
            }
            Value::Range(r) => {
                if r.step == 1 {
                    write!(f, "range({}, {})", r.start, r.stop)
                } else {
                    write!(f, "range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Value::Slice(s) => {
                let part = |b: Option<i64>| b.map_or_else(|| "None".to_string(), |i| i.to_string());
                write!(f, "slice({}, {}, {})", part(s.lower), part(s.upper), part(s.step))
            }
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::NativeFunction(n) => write!(f, "<built-in function {}>", n.name),
            Value::BoundMethod(m) => write!(f, "<bound method of {}>", m.receiver.type_name()),
            Value::Class(c) => write!(f, "<class '{}'>", c.name),
            Value::Instance(inst) => write!(f, "<{} object>", inst.class.name),
            Value::Exception(exc) => f.write_str(&exc.message()),
            Value::Generator(g) => write!(f, "<generator object {}>", g.borrow().name),
            Value::Iterator(_) => f.write_str("<iterator>"),
            Value::Module(m) => write!(f, "<module '{}'>", m.name),
            Value::Code(c) => write!(f, "<code {}>", c.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Exception(exc) => write!(f, "{}({:?})", exc.class.name, exc.message()),
            other => f.write_str(&other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printing_matches_the_language() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::str("hi").to_string(), "hi");
        assert_eq!(Value::str("hi").repr(), "'hi'");
        assert_eq!(Value::None.to_string(), "None");
    }

    #[test]
    fn containers_repr_their_items() {
        let list = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(list.to_string(), "[1, 'a']");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        let mut d = Dict::new();
        d.insert(DictKey::from("k"), Value::Float(0.5));
        assert_eq!(Value::dict(d).to_string(), "{'k': 0.5}");
    }

    #[test]
    fn float_exponents() {
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(-0.25), "-0.25");
    }

    #[test]
    fn quoting_picks_the_other_quote() {
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn numbers_compare_across_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert_eq!(Value::Int(2).py_cmp(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::str("a").py_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn dict_keys_unify_equal_numbers() {
        let mut d = Dict::new();
        d.insert(DictKey::new(Value::Int(1)).unwrap(), Value::str("int"));
        d.insert(DictKey::new(Value::Float(1.0)).unwrap(), Value::str("float"));
        assert_eq!(d.len(), 1);
        assert!(DictKey::new(Value::list(vec![])).is_err());
    }

    #[test]
    fn ranges_and_slices() {
        let r = RangeValue::new(10, 0, -3);
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(1));
        assert!(r.contains(4));
        assert!(!r.contains(5));

        let s = SliceValue {
            lower: None,
            upper: None,
            step: Some(-1),
        };
        assert_eq!(s.select(3), Some(vec![2, 1, 0]));
        let s = SliceValue {
            lower: Some(-2),
            upper: None,
            step: None,
        };
        assert_eq!(s.select(5), Some(vec![3, 4]));
    }
}
