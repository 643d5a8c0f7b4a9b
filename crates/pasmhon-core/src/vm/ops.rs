//! Operators: arithmetic, comparison, membership and subscripting
//!
//! The numeric kernels are free functions so the compiler can fold
//! constants with exactly the semantics the VM uses at run time.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::bytecode::{CallArgs, DictKey, RangeValue, SliceValue, Value};

use super::error::{type_error, RuntimeErrorKind, RuntimeResult};
use super::Vm;

/// Longest sequence `*` may build
const MAX_REPEAT_LEN: usize = 1 << 28;

// ===== Numeric kernels =====

/// Apply a binary operator to two numbers.
///
/// Returns `None` when either operand is not a number or the operator does
/// not apply to this combination (bitwise operators on floats).
#[must_use]
pub fn binary_numeric(op: BinOp, a: &Value, b: &Value) -> Option<Result<Value, RuntimeErrorKind>> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) => {
            Some(Ok(Value::Bool(match op {
                BinOp::BitAnd => x & y,
                BinOp::BitOr => x | y,
                _ => x ^ y,
            })))
        }
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Some(int_binary(op, a.as_int()?, b.as_int()?))
        }
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            float_binary(op, a.as_float()?, b.as_float()?)
        }
        _ => None,
    }
}

fn overflow() -> RuntimeErrorKind {
    RuntimeErrorKind::OverflowError("integer overflow".to_string())
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeErrorKind> {
    let int = |r: Option<i64>| r.map(Value::Int).ok_or_else(overflow);
    match op {
        BinOp::Add => int(a.checked_add(b)),
        BinOp::Sub => int(a.checked_sub(b)),
        BinOp::Mul => int(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(RuntimeErrorKind::ZeroDivision("division by zero".to_string()));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => int(floor_div(a, b)?),
        BinOp::Mod => int(floor_mod(a, b)?),
        BinOp::Pow => int_pow(a, b),
        BinOp::LShift => {
            if b < 0 {
                return Err(RuntimeErrorKind::ValueError("negative shift count".to_string()));
            }
            if a == 0 {
                return Ok(Value::Int(0));
            }
            let shifted = u32::try_from(b).ok().and_then(|s| a.checked_shl(s)).filter(|r| {
                // every shifted-out bit must equal the sign bit
                r >> b == a
            });
            int(shifted)
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(RuntimeErrorKind::ValueError("negative shift count".to_string()));
            }
            Ok(Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }))
        }
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
    }
}

/// Integer division rounding towards negative infinity.
///
/// `Ok(None)` means the result overflowed.
pub fn floor_div(a: i64, b: i64) -> Result<Option<i64>, RuntimeErrorKind> {
    if b == 0 {
        return Err(RuntimeErrorKind::ZeroDivision(
            "integer division or modulo by zero".to_string(),
        ));
    }
    Ok(a.checked_div(b).map(|q| {
        if a % b != 0 && ((a < 0) != (b < 0)) {
            q - 1
        } else {
            q
        }
    }))
}

/// Remainder with the sign of the divisor
pub fn floor_mod(a: i64, b: i64) -> Result<Option<i64>, RuntimeErrorKind> {
    if b == 0 {
        return Err(RuntimeErrorKind::ZeroDivision(
            "integer division or modulo by zero".to_string(),
        ));
    }
    // Every integer is a multiple of -1, including i64::MIN
    if b == -1 {
        return Ok(Some(0));
    }
    Ok(a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
}

fn int_pow(base: i64, exp: i64) -> Result<Value, RuntimeErrorKind> {
    if exp < 0 {
        if base == 0 {
            return Err(RuntimeErrorKind::ZeroDivision(
                "0.0 cannot be raised to a negative power".to_string(),
            ));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    u32::try_from(exp)
        .ok()
        .and_then(|e| base.checked_pow(e))
        .map(Value::Int)
        .ok_or_else(overflow)
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Option<Result<Value, RuntimeErrorKind>> {
    let zero = |msg: &str| Some(Err(RuntimeErrorKind::ZeroDivision(msg.to_string())));
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return zero("float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return zero("float floor division by zero");
            }
            float_divmod(a, b).0
        }
        BinOp::Mod => {
            if b == 0.0 {
                return zero("float modulo by zero");
            }
            float_divmod(a, b).1
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return zero("0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Some(Err(RuntimeErrorKind::ValueError("math domain error".to_string())));
            }
            a.powf(b)
        }
        BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => return None,
    };
    Some(Ok(Value::Float(result)))
}

/// Floor quotient and remainder of two floats; `b` must be non-zero
#[must_use]
pub fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem == 0.0 {
        rem = 0.0_f64.copysign(b);
    } else if (b < 0.0) != (rem < 0.0) {
        rem += b;
        div -= 1.0;
    }
    let floor = if div == 0.0 {
        0.0_f64.copysign(a / b)
    } else {
        let f = div.floor();
        if div - f > 0.5 {
            f + 1.0
        } else {
            f
        }
    };
    (floor, rem)
}

/// Apply a unary operator to a number. `not` applies to every value.
#[must_use]
pub fn unary_numeric(op: UnaryOp, value: &Value) -> Option<Result<Value, RuntimeErrorKind>> {
    Some(Ok(match (op, value) {
        (UnaryOp::Not, v) if !matches!(v, Value::Instance(_)) => Value::Bool(!v.is_truthy()),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => {
            return Some(value.as_int()?.checked_neg().map(Value::Int).ok_or_else(overflow));
        }
        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Value::Int(value.as_int()?),
        (UnaryOp::Pos, Value::Float(f)) => Value::Float(*f),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Value::Int(!value.as_int()?),
        _ => return None,
    }))
}

fn repeat<T: Clone>(items: &[T], count: i64) -> RuntimeResult<Vec<T>> {
    let count = usize::try_from(count).unwrap_or(0);
    match items.len().checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(items.iter().cloned().cycle().take(total).collect()),
        _ => Err(RuntimeErrorKind::OverflowError("repeated sequence is too long".to_string()).into()),
    }
}

fn unhashable(value: &Value) -> RuntimeErrorKind {
    RuntimeErrorKind::TypeError(format!("unhashable type: '{}'", value.type_name()))
}

/// Hash a value for dict storage, or fail with `TypeError`
pub(crate) fn dict_key(value: Value) -> RuntimeResult<DictKey> {
    DictKey::new(value).map_err(|v| unhashable(&v).into())
}

/// Resolve a possibly negative index against a sequence of `len` items
fn normalize_index(index: i64, len: usize, what: &str) -> RuntimeResult<usize> {
    let resolved = if index < 0 {
        i128::try_from(len).ok().map(|len| len + i128::from(index))
    } else {
        Some(i128::from(index))
    };
    resolved
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < len)
        .ok_or_else(|| RuntimeErrorKind::IndexError(format!("{what} index out of range")).into())
}

fn bad_index<T>(container: &Value, index: &Value) -> RuntimeResult<T> {
    type_error(format!(
        "{} indices must be integers or slices, not {}",
        container.type_name(),
        index.type_name()
    ))
}

fn zero_step<T>() -> RuntimeResult<T> {
    Err(RuntimeErrorKind::ValueError("slice step cannot be zero".to_string()).into())
}

fn slice_items<T: Clone>(items: &[T], slice: &SliceValue) -> RuntimeResult<Vec<T>> {
    let Some(indices) = slice.select(items.len()) else {
        return zero_step();
    };
    Ok(indices.into_iter().map(|i| items[i].clone()).collect())
}

impl Vm {
    // ===== Arithmetic =====

    pub(crate) fn binary_op(&mut self, op: BinOp, a: Value, b: Value) -> RuntimeResult<Value> {
        if let Some(result) = binary_numeric(op, &a, &b) {
            return result.map_err(Into::into);
        }
        match (op, &a, &b) {
            (BinOp::Add, Value::Str(x), Value::Str(y)) => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                return Ok(Value::str(s));
            }
            (BinOp::Add, Value::Str(_), other) => {
                return type_error(format!(
                    "can only concatenate str (not \"{}\") to str",
                    other.type_name()
                ));
            }
            (BinOp::Add, Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                return Ok(Value::list(items));
            }
            (BinOp::Add, Value::List(_), other) => {
                return type_error(format!(
                    "can only concatenate list (not \"{}\") to list",
                    other.type_name()
                ));
            }
            (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
                return Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()));
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
                let chars: Vec<char> = s.chars().collect();
                let repeated: String = repeat(&chars, n.as_int().unwrap_or(0))?.into_iter().collect();
                return Ok(Value::str(repeated));
            }
            (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
                let items = repeat(&l.borrow(), n.as_int().unwrap_or(0))?;
                return Ok(Value::list(items));
            }
            (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if n.as_int().is_some() => {
                return Ok(Value::tuple(repeat(t, n.as_int().unwrap_or(0))?));
            }
            _ => {}
        }
        let dunder = match op {
            BinOp::Add => Some("__add__"),
            BinOp::Sub => Some("__sub__"),
            BinOp::Mul => Some("__mul__"),
            _ => None,
        };
        if let Some(name) = dunder {
            if let Some(result) = self.call_special(&a, name, vec![b.clone()])? {
                return Ok(result);
            }
        }
        type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.as_str(),
            a.type_name(),
            b.type_name()
        ))
    }

    pub(crate) fn unary_op(&mut self, op: UnaryOp, value: Value) -> RuntimeResult<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(&value)?));
        }
        if let Some(result) = unary_numeric(op, &value) {
            return result.map_err(Into::into);
        }
        type_error(format!(
            "bad operand type for unary {}: '{}'",
            op.as_str(),
            value.type_name()
        ))
    }

    /// Truthiness, honouring `__bool__` and `__len__`
    pub(crate) fn truthy(&mut self, value: &Value) -> RuntimeResult<bool> {
        if !matches!(value, Value::Instance(_)) {
            return Ok(value.is_truthy());
        }
        if let Some(result) = self.call_special(value, "__bool__", Vec::new())? {
            return match result {
                Value::Bool(b) => Ok(b),
                other => type_error(format!(
                    "__bool__ should return bool, returned {}",
                    other.type_name()
                )),
            };
        }
        if let Some(result) = self.call_special(value, "__len__", Vec::new())? {
            return Ok(result.as_int().unwrap_or(0) != 0);
        }
        Ok(true)
    }

    // ===== Comparison =====

    pub(crate) fn compare(&mut self, op: CmpOp, a: Value, b: Value) -> RuntimeResult<Value> {
        let result = match op {
            CmpOp::Eq => self.values_equal(&a, &b)?,
            CmpOp::Ne => !self.values_equal(&a, &b)?,
            CmpOp::Lt => self.less_than(&a, &b)?,
            CmpOp::Gt => self.less_than(&b, &a)?,
            CmpOp::Le => self.ordered(op, &a, &b)?,
            CmpOp::Ge => self.ordered(op, &a, &b)?,
            CmpOp::In => self.contains(&b, &a)?,
            CmpOp::NotIn => !self.contains(&b, &a)?,
            CmpOp::Is => a.is(&b),
            CmpOp::IsNot => !a.is(&b),
        };
        Ok(Value::Bool(result))
    }

    /// `==`, dispatching to `__eq__` on either side
    pub(crate) fn values_equal(&mut self, a: &Value, b: &Value) -> RuntimeResult<bool> {
        for (left, right) in [(a, b), (b, a)] {
            if matches!(left, Value::Instance(_)) {
                if let Some(result) = self.call_special(left, "__eq__", vec![right.clone()])? {
                    return self.truthy(&result);
                }
            }
        }
        Ok(a.py_eq(b))
    }

    /// `<`, dispatching to `__lt__`
    pub(crate) fn less_than(&mut self, a: &Value, b: &Value) -> RuntimeResult<bool> {
        if let Some(ordering) = a.py_cmp(b) {
            return Ok(ordering == Ordering::Less);
        }
        if is_nan_pair(a, b) {
            return Ok(false);
        }
        if matches!(a, Value::Instance(_)) {
            if let Some(result) = self.call_special(a, "__lt__", vec![b.clone()])? {
                return self.truthy(&result);
            }
        }
        not_orderable("<", a, b)
    }

    fn ordered(&mut self, op: CmpOp, a: &Value, b: &Value) -> RuntimeResult<bool> {
        if let Some(ordering) = a.py_cmp(b) {
            return Ok(match op {
                CmpOp::Le => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            });
        }
        if is_nan_pair(a, b) {
            return Ok(false);
        }
        if matches!(a, Value::Instance(_)) || matches!(b, Value::Instance(_)) {
            // Only `__lt__` is consulted; `a <= b` is `not b < a`
            return Ok(match op {
                CmpOp::Le => !self.less_than(b, a)?,
                _ => !self.less_than(a, b)?,
            });
        }
        not_orderable(op.as_str(), a, b)
    }

    /// `item in container`
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> RuntimeResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                other => type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::List(items) => {
                let items = items.borrow().clone();
                self.any_equal(&items, item)
            }
            Value::Tuple(items) => self.any_equal(&Rc::clone(items), item),
            Value::Dict(entries) => {
                let key = dict_key(item.clone())?;
                Ok(entries.borrow().contains_key(&key))
            }
            Value::Range(range) => Ok(match item {
                Value::Int(_) | Value::Bool(_) => range.contains(item.as_int().unwrap_or(0)),
                Value::Float(f) if f.fract() == 0.0 => range.contains(*f as i64),
                _ => false,
            }),
            Value::Instance(_) => {
                if let Some(result) = self.call_special(container, "__contains__", vec![item.clone()])? {
                    return self.truthy(&result);
                }
                self.iter_contains(container, item)
            }
            Value::Generator(_) | Value::Iterator(_) => self.iter_contains(container, item),
            other => type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> RuntimeResult<bool> {
        for candidate in items {
            if candidate.is(item) || self.values_equal(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn iter_contains(&mut self, iterable: &Value, item: &Value) -> RuntimeResult<bool> {
        let iterator = self.get_iter(iterable.clone())?;
        while let Some(candidate) = self.iter_next(&iterator)? {
            if self.values_equal(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ===== Subscripting =====

    pub(crate) fn get_item(&mut self, container: Value, index: Value) -> RuntimeResult<Value> {
        match (&container, &index) {
            (Value::List(items), Value::Int(_) | Value::Bool(_)) => {
                let items = items.borrow();
                let i = normalize_index(index.as_int().unwrap_or(0), items.len(), "list")?;
                Ok(items[i].clone())
            }
            (Value::List(items), Value::Slice(slice)) => {
                Ok(Value::list(slice_items(&items.borrow(), slice)?))
            }
            (Value::Tuple(items), Value::Int(_) | Value::Bool(_)) => {
                let i = normalize_index(index.as_int().unwrap_or(0), items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            (Value::Tuple(items), Value::Slice(slice)) => Ok(Value::tuple(slice_items(items, slice)?)),
            (Value::Str(s), Value::Int(_) | Value::Bool(_)) => {
                let index = index.as_int().unwrap_or(0);
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len(), "string")?;
                Ok(Value::str(chars[i].to_string()))
            }
            (Value::Str(s), Value::Slice(slice)) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::str(slice_items(&chars, slice)?.into_iter().collect::<String>()))
            }
            (Value::Range(range), Value::Int(_) | Value::Bool(_)) => {
                let i = normalize_index(index.as_int().unwrap_or(0), range.len(), "range object")?;
                Ok(Value::Int(range.get(i).unwrap_or(0)))
            }
            (Value::Range(range), Value::Slice(slice)) => {
                let Some((start, stop, step)) = slice.indices(range.len()) else {
                    return zero_step();
                };
                Ok(Value::Range(RangeValue::new(
                    range.start + start * range.step,
                    range.start + stop * range.step,
                    step * range.step,
                )))
            }
            (Value::Dict(entries), _) => {
                let key = dict_key(index.clone())?;
                entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::KeyError(index.clone()).into())
            }
            (Value::Instance(_), _) => match self.call_special(&container, "__getitem__", vec![index.clone()])? {
                Some(value) => Ok(value),
                None => not_subscriptable(&container),
            },
            (Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_), _) => {
                bad_index(&container, &index)
            }
            _ => not_subscriptable(&container),
        }
    }

    pub(crate) fn set_item(&mut self, container: Value, index: Value, value: Value) -> RuntimeResult<()> {
        match (&container, &index) {
            (Value::List(items), Value::Int(_) | Value::Bool(_)) => {
                let mut items = items.borrow_mut();
                let i = normalize_index(index.as_int().unwrap_or(0), items.len(), "list assignment")?;
                items[i] = value;
                Ok(())
            }
            (Value::List(_), _) => bad_index(&container, &index),
            (Value::Dict(entries), _) => {
                let key = dict_key(index)?;
                entries.borrow_mut().insert(key, value);
                Ok(())
            }
            (Value::Instance(_), _) => {
                match self.call_special(&container, "__setitem__", vec![index.clone(), value])? {
                    Some(_) => Ok(()),
                    None => no_item_assignment(&container),
                }
            }
            _ => no_item_assignment(&container),
        }
    }

    pub(crate) fn del_item(&mut self, container: Value, index: Value) -> RuntimeResult<()> {
        match (&container, &index) {
            (Value::List(items), Value::Int(_) | Value::Bool(_)) => {
                let mut items = items.borrow_mut();
                let i = normalize_index(index.as_int().unwrap_or(0), items.len(), "list assignment")?;
                items.remove(i);
                Ok(())
            }
            (Value::List(items), Value::Slice(slice)) => {
                let mut items = items.borrow_mut();
                let Some(mut doomed) = slice.select(items.len()) else {
                    return zero_step();
                };
                doomed.sort_unstable();
                for i in doomed.into_iter().rev() {
                    items.remove(i);
                }
                Ok(())
            }
            (Value::Dict(entries), _) => {
                let key = dict_key(index.clone())?;
                match entries.borrow_mut().shift_remove(&key) {
                    Some(_) => Ok(()),
                    None => Err(RuntimeErrorKind::KeyError(index.clone()).into()),
                }
            }
            _ => type_error(format!(
                "'{}' object does not support item deletion",
                container.type_name()
            )),
        }
    }

    /// Call a dunder method on an instance, if its class defines one
    pub(crate) fn call_special(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Option<Value>> {
        let Some(method) = self.lookup_special(receiver, name) else {
            return Ok(None);
        };
        self.call_sync(method, CallArgs::positional(args)).map(Some)
    }
}

fn is_nan_pair(a: &Value, b: &Value) -> bool {
    matches!((a.as_float(), b.as_float()), (Some(x), Some(y)) if x.is_nan() || y.is_nan())
}

fn not_orderable<T>(op: &str, a: &Value, b: &Value) -> RuntimeResult<T> {
    type_error(format!(
        "'{op}' not supported between instances of '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn not_subscriptable<T>(value: &Value) -> RuntimeResult<T> {
    type_error(format!("'{}' object is not subscriptable", value.type_name()))
}

fn no_item_assignment<T>(value: &Value) -> RuntimeResult<T> {
    type_error(format!(
        "'{}' object does not support item assignment",
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinOp, a: Value, b: Value) -> Result<Value, RuntimeErrorKind> {
        binary_numeric(op, &a, &b).expect("numeric operands")
    }

    #[test]
    fn floor_division_rounds_down() {
        assert_eq!(bin(BinOp::FloorDiv, 7.into(), 2.into()).unwrap(), Value::Int(3));
        assert_eq!(bin(BinOp::FloorDiv, (-7).into(), 2.into()).unwrap(), Value::Int(-4));
        assert_eq!(bin(BinOp::Mod, (-7).into(), 2.into()).unwrap(), Value::Int(1));
        assert_eq!(bin(BinOp::Mod, 7.into(), (-2).into()).unwrap(), Value::Int(-1));
        assert_eq!(bin(BinOp::FloorDiv, (-7.5).into(), 2.into()).unwrap(), Value::Float(-4.0));
        assert_eq!(bin(BinOp::Mod, (-7.5).into(), 2.into()).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn modulo_by_minus_one_at_the_edge() {
        assert_eq!(bin(BinOp::Mod, i64::MIN.into(), (-1).into()).unwrap(), Value::Int(0));
        assert_eq!(bin(BinOp::Mod, 5.into(), (-1).into()).unwrap(), Value::Int(0));
        // The quotient itself does not fit
        assert!(matches!(
            bin(BinOp::FloorDiv, i64::MIN.into(), (-1).into()),
            Err(RuntimeErrorKind::OverflowError(_))
        ));
    }

    #[test]
    fn true_division_is_float() {
        assert_eq!(bin(BinOp::Div, 7.into(), 2.into()).unwrap(), Value::Float(3.5));
        assert!(matches!(
            bin(BinOp::Div, 1.into(), 0.into()),
            Err(RuntimeErrorKind::ZeroDivision(_))
        ));
        assert!(matches!(
            bin(BinOp::Mod, 1.into(), 0.into()),
            Err(RuntimeErrorKind::ZeroDivision(_))
        ));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert!(matches!(
            bin(BinOp::Add, i64::MAX.into(), 1.into()),
            Err(RuntimeErrorKind::OverflowError(_))
        ));
        assert!(matches!(
            bin(BinOp::Pow, 2.into(), 64.into()),
            Err(RuntimeErrorKind::OverflowError(_))
        ));
        assert!(matches!(
            bin(BinOp::LShift, 1.into(), 63.into()),
            Err(RuntimeErrorKind::OverflowError(_))
        ));
        assert_eq!(bin(BinOp::LShift, (-1).into(), 63.into()).unwrap(), Value::Int(i64::MIN));
    }

    #[test]
    fn pow_and_shifts() {
        assert_eq!(bin(BinOp::Pow, 2.into(), 10.into()).unwrap(), Value::Int(1024));
        assert_eq!(bin(BinOp::Pow, 2.into(), (-1).into()).unwrap(), Value::Float(0.5));
        assert_eq!(bin(BinOp::RShift, (-8).into(), 100.into()).unwrap(), Value::Int(-1));
        assert!(matches!(
            bin(BinOp::RShift, 1.into(), (-1).into()),
            Err(RuntimeErrorKind::ValueError(_))
        ));
    }

    #[test]
    fn bools_are_numbers() {
        assert_eq!(bin(BinOp::Add, true.into(), true.into()).unwrap(), Value::Int(2));
        assert_eq!(bin(BinOp::BitAnd, true.into(), false.into()).unwrap(), Value::Bool(false));
        assert!(binary_numeric(BinOp::BitAnd, &Value::Float(1.0), &Value::Int(1)).is_none());
        assert!(binary_numeric(BinOp::Add, &Value::str("a"), &Value::Int(1)).is_none());
    }

    #[test]
    fn unary_operators() {
        assert_eq!(unary_numeric(UnaryOp::Neg, &Value::Int(5)).unwrap().unwrap(), Value::Int(-5));
        assert_eq!(unary_numeric(UnaryOp::Invert, &Value::Int(0)).unwrap().unwrap(), Value::Int(-1));
        assert_eq!(unary_numeric(UnaryOp::Not, &Value::str("")).unwrap().unwrap(), Value::Bool(true));
        assert!(matches!(
            unary_numeric(UnaryOp::Neg, &Value::Int(i64::MIN)),
            Some(Err(RuntimeErrorKind::OverflowError(_)))
        ));
        assert!(unary_numeric(UnaryOp::Neg, &Value::str("x")).is_none());
    }

    #[test]
    fn float_divmod_matches_floor_semantics() {
        assert_eq!(float_divmod(7.0, 2.0), (3.0, 1.0));
        assert_eq!(float_divmod(-7.0, 2.0), (-4.0, 1.0));
        assert_eq!(float_divmod(7.0, -2.0), (-4.0, -1.0));
    }
}
