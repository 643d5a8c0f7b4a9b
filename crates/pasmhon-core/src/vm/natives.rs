//! Built-in functions and the constructors of built-in types
//!
//! Every native takes the VM, so it can call back into user code for keys,
//! predicates and dunder methods.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::IntErrorKind;
use std::rc::Rc;

use crate::bytecode::{
    quote_str, CallArgs, ClassObject, Dict, DictKey, Instance, IterState, Namespace, NativeFunction, RangeValue,
    Value,
};

use super::error::{type_error, RuntimeErrorKind, RuntimeResult};
use super::exceptions::BuiltinClasses;
use super::generator::GenStep;
use super::methods::format_value;
use super::ops::{dict_key, float_divmod, floor_div, floor_mod};
use super::output::write_output;
use super::Vm;

/// Built-in functions bound in every program's builtins namespace
const FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::new("print", -1, print),
    NativeFunction::new("len", 1, len),
    NativeFunction::new("repr", 1, repr),
    NativeFunction::new("isinstance", 2, isinstance),
    NativeFunction::new("issubclass", 2, issubclass),
    NativeFunction::new("abs", 1, abs),
    NativeFunction::new("min", -1, min),
    NativeFunction::new("max", -1, max),
    NativeFunction::new("sum", -1, sum),
    NativeFunction::new("sorted", -1, sorted),
    NativeFunction::new("reversed", 1, reversed),
    NativeFunction::new("enumerate", -1, enumerate),
    NativeFunction::new("zip", -1, zip),
    NativeFunction::new("iter", 1, iter),
    NativeFunction::new("next", -1, next),
    NativeFunction::new("hasattr", 2, hasattr),
    NativeFunction::new("getattr", -1, getattr),
    NativeFunction::new("setattr", 3, setattr),
    NativeFunction::new("chr", 1, chr),
    NativeFunction::new("ord", 1, ord),
    NativeFunction::new("round", -1, round),
    NativeFunction::new("any", 1, any),
    NativeFunction::new("all", 1, all),
    NativeFunction::new("map", 2, map),
    NativeFunction::new("filter", 2, filter),
    NativeFunction::new("divmod", 2, divmod),
    NativeFunction::new("pow", -1, pow),
    NativeFunction::new("hex", 1, hex),
    NativeFunction::new("bin", 1, bin),
    NativeFunction::new("oct", 1, oct),
    NativeFunction::new("callable", 1, callable),
    NativeFunction::new("id", 1, id),
    NativeFunction::new("hash", 1, hash),
    NativeFunction::new("format", -1, format),
];

/// Bind the built-in functions and classes into `builtins`
pub(crate) fn register(builtins: &Namespace, classes: &BuiltinClasses) {
    for native in FUNCTIONS {
        builtins.set(native.name, Value::NativeFunction(*native));
    }
    for (name, class) in classes.named() {
        builtins.set(name, Value::Class(Rc::clone(class)));
    }
}

// ===== Argument helpers =====

fn check_args(name: &str, args: &CallArgs, min: usize, max: usize) -> RuntimeResult<()> {
    let given = args.positional.len();
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min} argument{}", if min == 1 { "" } else { "s" })
    } else if max == usize::MAX {
        format!("at least {min} argument{}", if min == 1 { "" } else { "s" })
    } else {
        format!("from {min} to {max} arguments")
    };
    type_error(format!("{name}() takes {expected} ({given} given)"))
}

fn reject_keywords(name: &str, args: &CallArgs) -> RuntimeResult<()> {
    match args.keywords.first() {
        Some((keyword, _)) => type_error(format!("{name}() got an unexpected keyword argument '{keyword}'")),
        None => Ok(()),
    }
}

/// An `int` (or `bool`) argument
pub(crate) fn index_arg(value: &Value) -> RuntimeResult<i64> {
    value.as_int().map_or_else(
        || {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        },
        Ok,
    )
}

/// A numeric argument as a float
pub(crate) fn float_arg(name: &str, value: &Value) -> RuntimeResult<f64> {
    value.as_float().map_or_else(
        || type_error(format!("{name}() argument must be a number, not '{}'", value.type_name())),
        Ok,
    )
}

fn str_arg<'v>(name: &str, value: &'v Value) -> RuntimeResult<&'v str> {
    value.as_str().map_or_else(
        || type_error(format!("{name}() argument must be str, not {}", value.type_name())),
        Ok,
    )
}

/// `None` or a missing keyword falls back to `default`
fn optional_str(keyword: &str, value: Option<Value>, default: &str) -> RuntimeResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => type_error(format!(
            "{keyword} must be None or a string, not {}",
            other.type_name()
        )),
    }
}

/// Remove and return the leading positional argument
fn take_first(args: &mut CallArgs) -> Value {
    if args.positional.is_empty() {
        Value::None
    } else {
        args.positional.remove(0)
    }
}

// ===== Output and conversion =====

pub(crate) fn print(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let sep = optional_str("sep", args.take_keyword("sep"), " ")?;
    let end = optional_str("end", args.take_keyword("end"), "\n")?;
    reject_keywords("print", &args)?;
    let mut out = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&vm.str_of(value)?);
    }
    out.push_str(&end);
    write_output(&out);
    Ok(Value::None)
}

fn repr(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    vm.repr_of(&args.positional[0]).map(Value::str)
}

fn format(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    check_args("format", &args, 1, 2)?;
    let spec = match args.positional.get(1) {
        Some(spec) => str_arg("format", spec)?.to_string(),
        None => String::new(),
    };
    format_value(vm, &args.positional[0], &spec).map(Value::str)
}

fn len(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    vm.len_of(&args.positional[0]).map(Value::Int)
}

// ===== Type constructors =====

pub(crate) fn object_new(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    if !args.positional.is_empty() || !args.keywords.is_empty() {
        return type_error("object() takes no arguments");
    }
    Ok(Value::Instance(Instance::new(Rc::clone(&vm.classes.object))))
}

pub(crate) fn type_of(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("type", &args)?;
    if args.positional.len() != 1 {
        return type_error("type() takes 1 argument");
    }
    Ok(Value::Class(vm.class_of(&args.positional[0])))
}

pub(crate) fn int(_vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let base = args.take_keyword("base");
    reject_keywords("int", &args)?;
    check_args("int", &args, 0, 2)?;
    let base = match base.or_else(|| args.positional.get(1).cloned()) {
        Some(base) => Some(index_arg(&base)?),
        None => None,
    };
    let Some(value) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    match (value, base) {
        (Value::Str(text), base) => {
            let base = base.unwrap_or(10);
            if !(2..=36).contains(&base) {
                return Err(RuntimeErrorKind::ValueError("int() base must be >= 2 and <= 36".to_string()).into());
            }
            parse_int(text, base as u32).map(Value::Int).map_err(Into::into)
        }
        (_, Some(_)) => type_error("int() can't convert non-string with explicit base"),
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Float(f), None) => float_to_int(*f).map(Value::Int),
        (other, None) => type_error(format!(
            "int() argument must be a string or a real number, not '{}'",
            other.type_name()
        )),
    }
}

/// Parse an integer literal the way `int(text, base)` does
fn parse_int(text: &str, base: u32) -> Result<i64, RuntimeErrorKind> {
    let invalid = || {
        RuntimeErrorKind::ValueError(format!(
            "invalid literal for int() with base {base}: {}",
            quote_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let prefix = match base {
        16 => Some("0x"),
        8 => Some("0o"),
        2 => Some("0b"),
        _ => None,
    };
    let digits = prefix
        .and_then(|p| {
            unsigned
                .get(..2)
                .filter(|head| head.eq_ignore_ascii_case(p))
                .map(|_| &unsigned[2..])
        })
        .unwrap_or(unsigned);
    if digits.is_empty()
        || digits.starts_with(['_', '+', '-'])
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = std::iter::once(if negative { "-" } else { "" })
        .chain(digits.split('_'))
        .collect();
    i64::from_str_radix(&cleaned, base).map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            RuntimeErrorKind::OverflowError("int too large to convert".to_string())
        }
        _ => invalid(),
    })
}

pub(crate) fn float_to_int(f: f64) -> RuntimeResult<i64> {
    if f.is_nan() {
        return Err(RuntimeErrorKind::ValueError("cannot convert float NaN to integer".to_string()).into());
    }
    if f.is_infinite() {
        return Err(RuntimeErrorKind::OverflowError("cannot convert float infinity to integer".to_string()).into());
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_775_808e18 || truncated >= 9.223_372_036_854_775_808e18 {
        return Err(RuntimeErrorKind::OverflowError("int too large to convert".to_string()).into());
    }
    Ok(truncated as i64)
}

pub(crate) fn float(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("float", &args)?;
    check_args("float", &args, 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Float(_) | Value::Int(_) | Value::Bool(_) => Ok(Value::Float(value.as_float().unwrap_or(0.0))),
        Value::Str(text) => text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            RuntimeErrorKind::ValueError(format!(
                "could not convert string to float: {}",
                quote_str(text)
            ))
            .into()
        }),
        other => type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        )),
    }
}

pub(crate) fn str_new(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("str", &args)?;
    check_args("str", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => vm.str_of(value).map(Value::str),
        None => Ok(Value::str("")),
    }
}

pub(crate) fn bool_new(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("bool", &args)?;
    check_args("bool", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => vm.truthy(value).map(Value::Bool),
        None => Ok(Value::Bool(false)),
    }
}

pub(crate) fn list(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("list", &args)?;
    check_args("list", &args, 0, 1)?;
    if args.positional.is_empty() {
        return Ok(Value::list(Vec::new()));
    }
    vm.collect_iter(take_first(&mut args)).map(Value::list)
}

pub(crate) fn tuple(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("tuple", &args)?;
    check_args("tuple", &args, 0, 1)?;
    if args.positional.is_empty() {
        return Ok(Value::tuple(Vec::new()));
    }
    match take_first(&mut args) {
        tuple @ Value::Tuple(_) => Ok(tuple),
        other => vm.collect_iter(other).map(Value::tuple),
    }
}

pub(crate) fn dict(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let keywords = std::mem::take(&mut args.keywords);
    check_args("dict", &args, 0, 1)?;
    let mut entries = Dict::new();
    if let Some(source) = args.positional.pop() {
        vm.dict_update(&mut entries, source)?;
    }
    for (name, value) in keywords {
        entries.insert(DictKey::from(&*name), value);
    }
    Ok(Value::dict(entries))
}

pub(crate) fn range(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("range", &args)?;
    check_args("range", &args, 1, 3)?;
    let bounds = args
        .positional
        .iter()
        .map(index_arg)
        .collect::<RuntimeResult<Vec<i64>>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => return type_error("range expected at least 1 argument, got 0"),
    };
    if step == 0 {
        return Err(RuntimeErrorKind::ValueError("range() arg 3 must not be zero".to_string()).into());
    }
    Ok(Value::Range(RangeValue::new(start, stop, step)))
}

// ===== Introspection =====

/// The classes named by the second argument of `isinstance`/`issubclass`
fn class_spec(name: &str, spec: &Value) -> RuntimeResult<Vec<Rc<ClassObject>>> {
    match spec {
        Value::Class(class) => Ok(vec![Rc::clone(class)]),
        Value::Tuple(items) => {
            let mut classes = Vec::with_capacity(items.len());
            for item in items.iter() {
                classes.extend(class_spec(name, item)?);
            }
            Ok(classes)
        }
        _ => type_error(format!("{name}() arg 2 must be a type or tuple of types")),
    }
}

fn isinstance(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let classes = class_spec("isinstance", &args.positional[1])?;
    let class = vm.class_of(&args.positional[0]);
    Ok(Value::Bool(classes.iter().any(|c| class.is_subclass_of(c))))
}

fn issubclass(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let Value::Class(class) = &args.positional[0] else {
        return type_error("issubclass() arg 1 must be a class");
    };
    let classes = class_spec("issubclass", &args.positional[1])?;
    Ok(Value::Bool(classes.iter().any(|c| class.is_subclass_of(c))))
}

fn hasattr(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let name = str_arg("hasattr", &args.positional[1])?;
    vm.has_attr(&args.positional[0], name).map(Value::Bool)
}

fn getattr(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("getattr", &args)?;
    check_args("getattr", &args, 2, 3)?;
    let name = str_arg("getattr", &args.positional[1])?;
    match (vm.get_attr(&args.positional[0], name), args.positional.get(2)) {
        (Err(err), Some(default)) if matches!(err.kind, RuntimeErrorKind::AttributeError(_)) => {
            Ok(default.clone())
        }
        (result, _) => result,
    }
}

fn setattr(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let value = args.positional.pop().unwrap_or(Value::None);
    let name = str_arg("setattr", &args.positional[1])?.to_string();
    vm.set_attr(&args.positional[0], &name, value)?;
    Ok(Value::None)
}

fn callable(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let value = &args.positional[0];
    Ok(Value::Bool(match value {
        Value::Function(_) | Value::NativeFunction(_) | Value::BoundMethod(_) | Value::Class(_) => true,
        Value::Instance(_) => vm.lookup_special(value, "__call__").is_some(),
        _ => false,
    }))
}

fn id(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let value = &args.positional[0];
    let identity = match value.identity() {
        0 => {
            let mut hasher = DefaultHasher::new();
            if let Ok(key) = DictKey::new(value.clone()) {
                key.hash(&mut hasher);
            }
            hasher.finish()
        }
        address => address as u64,
    };
    Ok(Value::Int((identity >> 1) as i64))
}

fn hash(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let key = dict_key(args.positional[0].clone())?;
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Ok(Value::Int(hasher.finish() as i64))
}

// ===== Numbers =====

fn abs(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    match &args.positional[0] {
        value @ (Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::OverflowError("integer overflow".to_string()).into()),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => type_error(format!("bad operand type for abs(): '{}'", other.type_name())),
    }
}

fn round(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("round", &args)?;
    check_args("round", &args, 1, 2)?;
    let digits = match args.positional.get(1) {
        None | Some(Value::None) => None,
        Some(n) => Some(index_arg(n)?),
    };
    match (&args.positional[0], digits) {
        (value @ (Value::Int(_) | Value::Bool(_)), None) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (value @ (Value::Int(_) | Value::Bool(_)), Some(n)) => {
            let x = value.as_int().unwrap_or(0);
            if n >= 0 {
                return Ok(Value::Int(x));
            }
            let Some(unit) = u32::try_from(-n).ok().and_then(|e| 10i64.checked_pow(e)) else {
                return Ok(Value::Int(0));
            };
            let rem = x.rem_euclid(unit);
            let down = x - rem;
            let round_up = rem * 2 > unit || (rem * 2 == unit && (down / unit) % 2 != 0);
            Ok(Value::Int(if round_up { down + unit } else { down }))
        }
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        (other, _) => type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        )),
    }
}

fn divmod(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let overflow = || RuntimeErrorKind::OverflowError("integer overflow".to_string());
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => {
            let q = floor_div(x, y)?.ok_or_else(overflow)?;
            let r = floor_mod(x, y)?.ok_or_else(overflow)?;
            Ok(Value::tuple(vec![Value::Int(q), Value::Int(r)]))
        }
        _ => match (a.as_float(), b.as_float()) {
            (Some(_), Some(y)) if y == 0.0 => {
                Err(RuntimeErrorKind::ZeroDivision("float divmod()".to_string()).into())
            }
            (Some(x), Some(y)) => {
                let (q, r) = float_divmod(x, y);
                Ok(Value::tuple(vec![Value::Float(q), Value::Float(r)]))
            }
            _ => type_error(format!(
                "unsupported operand type(s) for divmod(): '{}' and '{}'",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn pow(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("pow", &args)?;
    check_args("pow", &args, 2, 3)?;
    let (base, exp) = (args.positional[0].clone(), args.positional[1].clone());
    let Some(modulus) = args.positional.get(2) else {
        return vm.binary_op(crate::ast::BinOp::Pow, base, exp);
    };
    let (Some(base), Some(exp), Some(modulus)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return type_error("pow() 3rd argument not allowed unless all arguments are integers");
    };
    if modulus == 0 {
        return Err(RuntimeErrorKind::ValueError("pow() 3rd argument cannot be 0".to_string()).into());
    }
    if exp < 0 {
        return Err(RuntimeErrorKind::ValueError("pow() negative exponent with modulus is not supported".to_string()).into());
    }
    let m = i128::from(modulus).abs();
    let mut result: i128 = 1 % m;
    let mut b = i128::from(base).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    if modulus < 0 && result != 0 {
        result -= m;
    }
    Ok(Value::Int(result as i64))
}

fn radix(value: &Value, prefix: &str, digits: fn(u64) -> String) -> RuntimeResult<Value> {
    let Some(n) = value.as_int() else {
        return type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ));
    };
    let sign = if n < 0 { "-" } else { "" };
    Ok(Value::str(format!("{sign}{prefix}{}", digits(n.unsigned_abs()))))
}

fn hex(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    radix(&args.positional[0], "0x", |n| format!("{n:x}"))
}

fn bin(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    radix(&args.positional[0], "0b", |n| format!("{n:b}"))
}

fn oct(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    radix(&args.positional[0], "0o", |n| format!("{n:o}"))
}

fn chr(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let code = index_arg(&args.positional[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| RuntimeErrorKind::ValueError("chr() arg not in range(0x110000)".to_string()).into())
}

fn ord(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let text = str_arg("ord", &args.positional[0])?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
        _ => type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        )),
    }
}

// ===== Iteration =====

fn extremum(vm: &mut Vm, mut args: CallArgs, name: &str, want_max: bool) -> RuntimeResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let default = args.take_keyword("default");
    reject_keywords(name, &args)?;
    let items = match args.positional.len() {
        0 => return type_error(format!("{name} expected at least 1 argument, got 0")),
        1 => vm.collect_iter(take_first(&mut args))?,
        _ => args.positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(f) => vm.call_sync(f.clone(), CallArgs::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        best = match best {
            None => Some((rank, item)),
            Some((best_rank, best_item)) => {
                let better = if want_max {
                    vm.less_than(&best_rank, &rank)?
                } else {
                    vm.less_than(&rank, &best_rank)?
                };
                if better {
                    Some((rank, item))
                } else {
                    Some((best_rank, best_item))
                }
            }
        };
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(RuntimeErrorKind::ValueError(format!("{name}() arg is an empty sequence")).into()),
    }
}

fn min(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    extremum(vm, args, "min", false)
}

fn max(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    extremum(vm, args, "max", true)
}

fn sum(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let start = args.take_keyword("start");
    reject_keywords("sum", &args)?;
    check_args("sum", &args, 1, 2)?;
    let mut total = start
        .or_else(|| args.positional.get(1).cloned())
        .unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return type_error("sum() can't sum strings [use ''.join(seq) instead]");
    }
    let iterator = vm.get_iter(take_first(&mut args))?;
    while let Some(item) = vm.iter_next(&iterator)? {
        total = vm.binary_op(crate::ast::BinOp::Add, total, item)?;
    }
    Ok(total)
}

fn sorted(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let reverse = match args.take_keyword("reverse") {
        Some(flag) => vm.truthy(&flag)?,
        None => false,
    };
    reject_keywords("sorted", &args)?;
    check_args("sorted", &args, 1, 1)?;
    let items = vm.collect_iter(take_first(&mut args))?;
    vm.sort_values(items, key, reverse).map(Value::list)
}

fn reversed(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let source = take_first(&mut args);
    if let Value::Range(range) = source {
        let Some(last) = range.len().checked_sub(1).and_then(|index| range.get(index)) else {
            return Ok(Value::iterator(IterState::Range { next: 0, stop: 0, step: 1 }));
        };
        return Ok(Value::iterator(IterState::Range {
            next: last,
            stop: range.start.saturating_sub(range.step),
            step: -range.step,
        }));
    }
    let mut items = vm.collect_iter(source)?;
    items.reverse();
    Ok(Value::iterator(IterState::Seq {
        items: items.into(),
        index: 0,
    }))
}

fn enumerate(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let start = args.take_keyword("start");
    reject_keywords("enumerate", &args)?;
    check_args("enumerate", &args, 1, 2)?;
    let count = match start.or_else(|| args.positional.get(1).cloned()) {
        Some(n) => index_arg(&n)?,
        None => 0,
    };
    let inner = vm.get_iter(take_first(&mut args))?;
    Ok(Value::iterator(IterState::Enumerate { inner, count }))
}

fn zip(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("zip", &args)?;
    let inners = args
        .positional
        .into_iter()
        .map(|it| vm.get_iter(it))
        .collect::<RuntimeResult<Vec<_>>>()?;
    Ok(Value::iterator(IterState::Zip { inners }))
}

fn iter(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    vm.get_iter(take_first(&mut args))
}

fn next(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    reject_keywords("next", &args)?;
    check_args("next", &args, 1, 2)?;
    let default = args.positional.get(1).cloned();
    let finished = |payload: Value| -> RuntimeResult<Value> {
        match &default {
            Some(value) => Ok(value.clone()),
            None => Err(RuntimeErrorKind::StopIteration(payload).into()),
        }
    };
    match &args.positional[0] {
        Value::Generator(generator) => match vm.resume_generator(generator, Value::None)? {
            GenStep::Yielded(value) => Ok(value),
            GenStep::Complete(value) => finished(value),
        },
        iterator => match vm.iter_next(iterator)? {
            Some(value) => Ok(value),
            None => finished(Value::None),
        },
    }
}

fn any(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let iterator = vm.get_iter(take_first(&mut args))?;
    while let Some(item) = vm.iter_next(&iterator)? {
        if vm.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let iterator = vm.get_iter(take_first(&mut args))?;
    while let Some(item) = vm.iter_next(&iterator)? {
        if !vm.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn map(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let function = take_first(&mut args);
    let inner = vm.get_iter(take_first(&mut args))?;
    Ok(Value::iterator(IterState::Map { function, inner }))
}

fn filter(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let function = take_first(&mut args);
    let inner = vm.get_iter(take_first(&mut args))?;
    Ok(Value::iterator(IterState::Filter { function, inner }))
}

impl Vm {
    /// `str(value)`, honouring `__str__` and falling back to `__repr__`
    pub(crate) fn str_of(&mut self, value: &Value) -> RuntimeResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(_) => match self.call_special(value, "__str__", Vec::new())? {
                Some(result) => expect_str(result, "__str__"),
                None => self.repr_of(value),
            },
            Value::Exception(exc) => match self.call_special(value, "__str__", Vec::new())? {
                Some(result) => expect_str(result, "__str__"),
                None => Ok(exc.message()),
            },
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => self.repr_of(value),
            other => Ok(other.to_string()),
        }
    }

    /// `repr(value)`, honouring `__repr__` inside containers too
    pub(crate) fn repr_of(&mut self, value: &Value) -> RuntimeResult<String> {
        let mut active = Vec::new();
        self.repr_nested(value, &mut active)
    }

    fn repr_nested(&mut self, value: &Value, active: &mut Vec<usize>) -> RuntimeResult<String> {
        match value {
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => {
                let id = value.identity();
                if active.contains(&id) {
                    return Ok(match value {
                        Value::Dict(_) => "{...}",
                        Value::Tuple(_) => "(...)",
                        _ => "[...]",
                    }
                    .to_string());
                }
                active.push(id);
                let text = match value {
                    Value::Dict(entries) => {
                        let entries: Vec<(Value, Value)> = entries
                            .borrow()
                            .iter()
                            .map(|(k, v)| (k.value().clone(), v.clone()))
                            .collect();
                        let mut parts = Vec::with_capacity(entries.len());
                        for (k, v) in &entries {
                            parts.push(format!(
                                "{}: {}",
                                self.repr_nested(k, active)?,
                                self.repr_nested(v, active)?
                            ));
                        }
                        format!("{{{}}}", parts.join(", "))
                    }
                    Value::Tuple(items) => {
                        let parts = self.repr_items(items, active)?;
                        if parts.len() == 1 {
                            format!("({},)", parts[0])
                        } else {
                            format!("({})", parts.join(", "))
                        }
                    }
                    Value::List(items) => {
                        let items = items.borrow().clone();
                        format!("[{}]", self.repr_items(&items, active)?.join(", "))
                    }
                    _ => String::new(),
                };
                active.pop();
                Ok(text)
            }
            Value::Instance(instance) => match self.call_special(value, "__repr__", Vec::new())? {
                Some(result) => expect_str(result, "__repr__"),
                None => Ok(format!("<{} object>", instance.class.name)),
            },
            Value::Exception(exc) => match self.call_special(value, "__repr__", Vec::new())? {
                Some(result) => expect_str(result, "__repr__"),
                None => {
                    let args = exc.args.borrow().clone();
                    let parts = self.repr_items(&args, active)?;
                    Ok(format!("{}({})", exc.class.name, parts.join(", ")))
                }
            },
            other => Ok(other.repr()),
        }
    }

    fn repr_items(&mut self, items: &[Value], active: &mut Vec<usize>) -> RuntimeResult<Vec<String>> {
        items.iter().map(|item| self.repr_nested(item, active)).collect()
    }

    /// `len(value)`
    pub(crate) fn len_of(&mut self, value: &Value) -> RuntimeResult<i64> {
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(entries) => entries.borrow().len(),
            Value::Range(range) => range.len(),
            Value::Instance(_) => {
                return match self.call_special(value, "__len__", Vec::new())? {
                    Some(Value::Int(n)) if n >= 0 => Ok(n),
                    Some(Value::Int(_)) => {
                        Err(RuntimeErrorKind::ValueError("__len__() should return >= 0".to_string()).into())
                    }
                    Some(other) => type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name()
                    )),
                    None => type_error(format!("object of type '{}' has no len()", value.type_name())),
                };
            }
            other => return type_error(format!("object of type '{}' has no len()", other.type_name())),
        };
        i64::try_from(len).map_err(|_| {
            RuntimeErrorKind::OverflowError("length does not fit in an integer".to_string()).into()
        })
    }

    /// Merge a dict, or an iterable of key/value pairs, into `entries`
    pub(crate) fn dict_update(&mut self, entries: &mut Dict, source: Value) -> RuntimeResult<()> {
        if let Value::Dict(other) = &source {
            for (k, v) in other.borrow().iter() {
                entries.insert(k.clone(), v.clone());
            }
            return Ok(());
        }
        for (i, pair) in self.collect_iter(source)?.into_iter().enumerate() {
            let items = self.collect_iter(pair)?;
            let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
                RuntimeErrorKind::ValueError(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    items.len()
                ))
            })?;
            entries.insert(dict_key(key)?, value);
        }
        Ok(())
    }

    /// Stable sort with a fallible comparison, optionally by key
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> RuntimeResult<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let rank = match &key {
                Some(f) => self.call_sync(f.clone(), CallArgs::positional(vec![item.clone()]))?,
                None => item.clone(),
            };
            keyed.push((rank, item));
        }
        let sorted = self.merge_sort(keyed, reverse)?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn merge_sort(&mut self, mut items: Vec<(Value, Value)>, reverse: bool) -> RuntimeResult<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, reverse)?;
        let right = self.merge_sort(right, reverse)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            // equal keys keep their original order in both directions
            let right_first = if reverse {
                self.less_than(&l.0, &r.0)?
            } else {
                self.less_than(&r.0, &l.0)?
            };
            let next = if right_first { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }
}

fn expect_str(value: Value, method: &str) -> RuntimeResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => type_error(format!(
            "{method} returned non-string (type {})",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals_parse_like_the_language() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0xFF", 16).unwrap(), 255);
        assert_eq!(parse_int("101", 2).unwrap(), 5);
        assert!(matches!(parse_int("abc", 10), Err(RuntimeErrorKind::ValueError(_))));
        assert!(matches!(parse_int("1__0", 10), Err(RuntimeErrorKind::ValueError(_))));
        assert!(matches!(parse_int("", 10), Err(RuntimeErrorKind::ValueError(_))));
        assert!(matches!(
            parse_int("99999999999999999999", 10),
            Err(RuntimeErrorKind::OverflowError(_))
        ));
    }

    #[test]
    fn float_truncation_checks_range() {
        assert_eq!(float_to_int(3.9).unwrap(), 3);
        assert_eq!(float_to_int(-3.9).unwrap(), -3);
        assert!(float_to_int(f64::NAN).is_err());
        assert!(float_to_int(1e300).is_err());
    }

    #[test]
    fn every_function_has_a_unique_name() {
        let mut names: Vec<&str> = FUNCTIONS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
