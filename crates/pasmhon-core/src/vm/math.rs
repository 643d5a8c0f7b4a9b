//! The built-in `math` module

use std::f64::consts;
use std::rc::Rc;

use crate::bytecode::{CallArgs, Module, Namespace, NativeFunction, Value};

use super::error::{type_error, RuntimeErrorKind, RuntimeResult};
use super::natives::{float_arg, float_to_int, index_arg};
use super::Vm;

const FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::new("sqrt", 1, sqrt),
    NativeFunction::new("floor", 1, floor),
    NativeFunction::new("ceil", 1, ceil),
    NativeFunction::new("trunc", 1, trunc),
    NativeFunction::new("fabs", 1, fabs),
    NativeFunction::new("pow", 2, pow),
    NativeFunction::new("exp", 1, exp),
    NativeFunction::new("log", -1, log),
    NativeFunction::new("log2", 1, log2),
    NativeFunction::new("log10", 1, log10),
    NativeFunction::new("sin", 1, sin),
    NativeFunction::new("cos", 1, cos),
    NativeFunction::new("tan", 1, tan),
    NativeFunction::new("atan", 1, atan),
    NativeFunction::new("atan2", 2, atan2),
    NativeFunction::new("hypot", -1, hypot),
    NativeFunction::new("isnan", 1, isnan),
    NativeFunction::new("isinf", 1, isinf),
    NativeFunction::new("isclose", -1, isclose),
    NativeFunction::new("gcd", -1, gcd),
    NativeFunction::new("factorial", 1, factorial),
];

/// Build a fresh `math` module
pub(crate) fn module() -> Rc<Module> {
    let namespace = Namespace::new("math");
    namespace.set("__name__", Value::str("math"));
    for function in FUNCTIONS {
        namespace.set(function.name, Value::NativeFunction(*function));
    }
    namespace.set("pi", Value::Float(consts::PI));
    namespace.set("e", Value::Float(consts::E));
    namespace.set("tau", Value::Float(consts::TAU));
    namespace.set("inf", Value::Float(f64::INFINITY));
    namespace.set("nan", Value::Float(f64::NAN));
    Rc::new(Module {
        name: "math".to_string(),
        path: None,
        namespace,
    })
}

fn domain_error<T>() -> RuntimeResult<T> {
    Err(RuntimeErrorKind::ValueError("math domain error".to_string()).into())
}

/// Result of a real function; NaN from a finite argument is a domain error
fn checked(input: f64, result: f64) -> RuntimeResult<Value> {
    if result.is_nan() && !input.is_nan() {
        return domain_error();
    }
    Ok(Value::Float(result))
}

fn arg(name: &str, args: &CallArgs, index: usize) -> RuntimeResult<f64> {
    match args.positional.get(index) {
        Some(value) => float_arg(name, value),
        None => type_error(format!("{name}() missing required argument")),
    }
}

/// `floor`/`ceil`/`trunc` keep ints as they are
fn rounding(name: &str, args: &CallArgs, round: fn(f64) -> f64) -> RuntimeResult<Value> {
    match &args.positional[0] {
        value @ (Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        value => float_to_int(round(float_arg(name, value)?)).map(Value::Int),
    }
}

fn sqrt(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("sqrt", &args, 0)?;
    if x < 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.sqrt()))
}

fn floor(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    rounding("floor", &args, f64::floor)
}

fn ceil(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    rounding("ceil", &args, f64::ceil)
}

fn trunc(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    rounding("trunc", &args, f64::trunc)
}

fn fabs(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::Float(arg("fabs", &args, 0)?.abs()))
}

fn pow(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (x, y) = (arg("pow", &args, 0)?, arg("pow", &args, 1)?);
    if x == 0.0 && y < 0.0 {
        return domain_error();
    }
    let result = x.powf(y);
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(RuntimeErrorKind::OverflowError("math range error".to_string()).into());
    }
    checked(x, result)
}

fn exp(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("exp", &args, 0)?;
    let result = x.exp();
    if result.is_infinite() && x.is_finite() {
        return Err(RuntimeErrorKind::OverflowError("math range error".to_string()).into());
    }
    Ok(Value::Float(result))
}

fn log(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    if args.positional.is_empty() || args.positional.len() > 2 {
        return type_error(format!(
            "log expected 1 or 2 arguments, got {}",
            args.positional.len()
        ));
    }
    let x = arg("log", &args, 0)?;
    if x <= 0.0 {
        return domain_error();
    }
    match args.positional.get(1) {
        Some(base) => {
            let base = float_arg("log", base)?;
            if base <= 0.0 || base == 1.0 {
                return domain_error();
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

fn log2(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("log2", &args, 0)?;
    if x <= 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.log2()))
}

fn log10(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("log10", &args, 0)?;
    if x <= 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.log10()))
}

fn sin(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("sin", &args, 0)?;
    checked(x, x.sin())
}

fn cos(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("cos", &args, 0)?;
    checked(x, x.cos())
}

fn tan(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let x = arg("tan", &args, 0)?;
    checked(x, x.tan())
}

fn atan(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::Float(arg("atan", &args, 0)?.atan()))
}

fn atan2(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (y, x) = (arg("atan2", &args, 0)?, arg("atan2", &args, 1)?);
    Ok(Value::Float(y.atan2(x)))
}

fn hypot(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let mut total = 0.0f64;
    for value in &args.positional {
        let x = float_arg("hypot", value)?;
        total = total.hypot(x);
    }
    Ok(Value::Float(total))
}

fn isnan(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::Bool(arg("isnan", &args, 0)?.is_nan()))
}

fn isinf(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::Bool(arg("isinf", &args, 0)?.is_infinite()))
}

fn isclose(_vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let rel_tol = match args.take_keyword("rel_tol") {
        Some(tol) => float_arg("isclose", &tol)?,
        None => 1e-9,
    };
    let abs_tol = match args.take_keyword("abs_tol") {
        Some(tol) => float_arg("isclose", &tol)?,
        None => 0.0,
    };
    if args.positional.len() != 2 {
        return type_error("isclose() takes exactly 2 positional arguments");
    }
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return Err(RuntimeErrorKind::ValueError("tolerances must be non-negative".to_string()).into());
    }
    let (a, b) = (arg("isclose", &args, 0)?, arg("isclose", &args, 1)?);
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    let close = diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol;
    Ok(Value::Bool(close))
}

fn gcd(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let mut result: u64 = 0;
    for value in &args.positional {
        let mut b = index_arg(value)?.unsigned_abs();
        let mut a = result;
        while b != 0 {
            (a, b) = (b, a % b);
        }
        result = a;
    }
    i64::try_from(result)
        .map(Value::Int)
        .map_err(|_| RuntimeErrorKind::OverflowError("integer overflow".to_string()).into())
}

fn factorial(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let value = &args.positional[0];
    let n = match value {
        Value::Float(f) if f.fract() == 0.0 => float_to_int(*f)?,
        Value::Float(_) => {
            return Err(RuntimeErrorKind::ValueError(
                "factorial() only accepts integral values".to_string(),
            )
            .into());
        }
        other => index_arg(other)?,
    };
    if n < 0 {
        return Err(RuntimeErrorKind::ValueError(
            "factorial() not defined for negative values".to_string(),
        )
        .into());
    }
    let mut result: i64 = 1;
    for i in 2..=n {
        result = result
            .checked_mul(i)
            .ok_or_else(|| RuntimeErrorKind::OverflowError("integer overflow".to_string()))?;
    }
    Ok(Value::Int(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_exposes_functions_and_constants() {
        let math = module();
        assert!(matches!(math.namespace.get("sqrt"), Some(Value::NativeFunction(_))));
        assert!(matches!(math.namespace.get("pi"), Some(Value::Float(pi)) if (pi - consts::PI).abs() < 1e-12));
        assert!(math.namespace.get("nope").is_none());
    }

    #[test]
    fn nan_from_finite_input_is_a_domain_error() {
        assert!(checked(1.0, f64::NAN).is_err());
        assert!(checked(f64::NAN, f64::NAN).is_ok());
        assert!(matches!(checked(0.5, 0.25), Ok(Value::Float(x)) if x == 0.25));
    }
}
