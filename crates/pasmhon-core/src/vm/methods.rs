//! Methods of built-in types
//!
//! Every method receives its receiver as the first positional argument, so
//! `s.upper()` and `str.upper(s)` run the same code.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{format_float, CallArgs, Dict, DictKey, Generator, NativeFunction, Value};

use super::error::{type_error, RuntimeErrorKind, RuntimeResult};
use super::generator::GenStep;
use super::natives::index_arg;
use super::ops::dict_key;
use super::Vm;

const STR_METHODS: &[NativeFunction] = &[
    NativeFunction::new("upper", 1, str_upper),
    NativeFunction::new("lower", 1, str_lower),
    NativeFunction::new("strip", -1, str_strip),
    NativeFunction::new("lstrip", -1, str_lstrip),
    NativeFunction::new("rstrip", -1, str_rstrip),
    NativeFunction::new("split", -1, str_split),
    NativeFunction::new("splitlines", 1, str_splitlines),
    NativeFunction::new("join", 2, str_join),
    NativeFunction::new("replace", -1, str_replace),
    NativeFunction::new("startswith", 2, str_startswith),
    NativeFunction::new("endswith", 2, str_endswith),
    NativeFunction::new("find", 2, str_find),
    NativeFunction::new("rfind", 2, str_rfind),
    NativeFunction::new("index", 2, str_index),
    NativeFunction::new("count", 2, str_count),
    NativeFunction::new("format", -1, str_format),
    NativeFunction::new("isdigit", 1, str_isdigit),
    NativeFunction::new("isalpha", 1, str_isalpha),
    NativeFunction::new("isalnum", 1, str_isalnum),
    NativeFunction::new("isspace", 1, str_isspace),
    NativeFunction::new("isupper", 1, str_isupper),
    NativeFunction::new("islower", 1, str_islower),
    NativeFunction::new("capitalize", 1, str_capitalize),
    NativeFunction::new("title", 1, str_title),
    NativeFunction::new("ljust", -1, str_ljust),
    NativeFunction::new("rjust", -1, str_rjust),
    NativeFunction::new("center", -1, str_center),
    NativeFunction::new("zfill", 2, str_zfill),
];

const LIST_METHODS: &[NativeFunction] = &[
    NativeFunction::new("append", 2, list_append),
    NativeFunction::new("extend", 2, list_extend),
    NativeFunction::new("pop", -1, list_pop),
    NativeFunction::new("insert", 3, list_insert),
    NativeFunction::new("remove", 2, list_remove),
    NativeFunction::new("index", 2, list_index),
    NativeFunction::new("count", 2, list_count),
    NativeFunction::new("reverse", 1, list_reverse),
    NativeFunction::new("sort", -1, list_sort),
    NativeFunction::new("clear", 1, list_clear),
    NativeFunction::new("copy", 1, list_copy),
];

const DICT_METHODS: &[NativeFunction] = &[
    NativeFunction::new("get", -1, dict_get),
    NativeFunction::new("keys", 1, dict_keys),
    NativeFunction::new("values", 1, dict_values),
    NativeFunction::new("items", 1, dict_items),
    NativeFunction::new("pop", -1, dict_pop),
    NativeFunction::new("setdefault", -1, dict_setdefault),
    NativeFunction::new("update", -1, dict_update),
    NativeFunction::new("clear", 1, dict_clear),
    NativeFunction::new("copy", 1, dict_copy),
    NativeFunction::new("popitem", 1, dict_popitem),
];

const TUPLE_METHODS: &[NativeFunction] = &[
    NativeFunction::new("index", 2, tuple_index),
    NativeFunction::new("count", 2, tuple_count),
];

const GENERATOR_METHODS: &[NativeFunction] = &[
    NativeFunction::new("send", 2, generator_send),
    NativeFunction::new("close", 1, generator_close),
];

const FLOAT_METHODS: &[NativeFunction] = &[NativeFunction::new("is_integer", 1, float_is_integer)];

/// Find a method of a built-in type by the type's name
pub(crate) fn lookup(type_name: &str, name: &str) -> Option<NativeFunction> {
    let table = match type_name {
        "str" => STR_METHODS,
        "list" => LIST_METHODS,
        "dict" => DICT_METHODS,
        "tuple" => TUPLE_METHODS,
        "generator" => GENERATOR_METHODS,
        "float" => FLOAT_METHODS,
        _ => return None,
    };
    table.iter().find(|m| m.name == name).copied()
}

// ===== Receivers and arguments =====

fn receiver_str(args: &CallArgs, method: &str) -> RuntimeResult<Rc<str>> {
    match args.positional.first() {
        Some(Value::Str(s)) => Ok(Rc::clone(s)),
        Some(other) => type_error(format!(
            "descriptor '{method}' requires a 'str' object but received a '{}'",
            other.type_name()
        )),
        None => type_error(format!("descriptor '{method}' of 'str' object needs an argument")),
    }
}

fn receiver_list(args: &CallArgs, method: &str) -> RuntimeResult<Rc<RefCell<Vec<Value>>>> {
    match args.positional.first() {
        Some(Value::List(list)) => Ok(Rc::clone(list)),
        _ => type_error(format!("descriptor '{method}' requires a 'list' object")),
    }
}

fn receiver_dict(args: &CallArgs, method: &str) -> RuntimeResult<Rc<RefCell<Dict>>> {
    match args.positional.first() {
        Some(Value::Dict(dict)) => Ok(Rc::clone(dict)),
        _ => type_error(format!("descriptor '{method}' requires a 'dict' object")),
    }
}

fn receiver_tuple(args: &CallArgs, method: &str) -> RuntimeResult<Rc<[Value]>> {
    match args.positional.first() {
        Some(Value::Tuple(items)) => Ok(Rc::clone(items)),
        _ => type_error(format!("descriptor '{method}' requires a 'tuple' object")),
    }
}

fn receiver_generator(args: &CallArgs, method: &str) -> RuntimeResult<Rc<RefCell<Generator>>> {
    match args.positional.first() {
        Some(Value::Generator(generator)) => Ok(Rc::clone(generator)),
        _ => type_error(format!("descriptor '{method}' requires a 'generator' object")),
    }
}

/// Check the count of arguments after the receiver
fn arity(method: &str, args: &CallArgs, min: usize, max: usize) -> RuntimeResult<()> {
    if let Some((keyword, _)) = args.keywords.first() {
        return type_error(format!("{method}() got an unexpected keyword argument '{keyword}'"));
    }
    let given = args.positional.len().saturating_sub(1);
    if (min..=max).contains(&given) {
        Ok(())
    } else if min == max {
        type_error(format!("{method}() takes exactly {min} argument{} ({given} given)", if min == 1 { "" } else { "s" }))
    } else {
        type_error(format!("{method}() takes from {min} to {max} arguments ({given} given)"))
    }
}

fn str_param<'a>(method: &str, value: &'a Value) -> RuntimeResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => type_error(format!("{method}() argument must be str, not {}", other.type_name())),
    }
}

/// `None` or a string of characters to strip
fn strip_chars(method: &str, args: &CallArgs) -> RuntimeResult<Option<Vec<char>>> {
    arity(method, args, 0, 1)?;
    match args.positional.get(1) {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(str_param(method, chars)?.chars().collect())),
    }
}

// ===== str =====

fn str_upper(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::str(receiver_str(&args, "upper")?.to_uppercase()))
}

fn str_lower(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    Ok(Value::str(receiver_str(&args, "lower")?.to_lowercase()))
}

fn str_strip(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "strip")?;
    Ok(Value::str(match strip_chars("strip", &args)? {
        Some(chars) => s.trim_matches(chars.as_slice()),
        None => s.trim(),
    }))
}

fn str_lstrip(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "lstrip")?;
    Ok(Value::str(match strip_chars("lstrip", &args)? {
        Some(chars) => s.trim_start_matches(chars.as_slice()),
        None => s.trim_start(),
    }))
}

fn str_rstrip(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "rstrip")?;
    Ok(Value::str(match strip_chars("rstrip", &args)? {
        Some(chars) => s.trim_end_matches(chars.as_slice()),
        None => s.trim_end(),
    }))
}

fn str_split(_vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let sep = args.take_keyword("sep");
    let maxsplit = args.take_keyword("maxsplit");
    let s = receiver_str(&args, "split")?;
    arity("split", &args, 0, 2)?;
    let sep = sep.or_else(|| args.positional.get(1).cloned());
    let maxsplit = match maxsplit.or_else(|| args.positional.get(2).cloned()) {
        Some(n) => usize::try_from(index_arg(&n)?).ok(),
        None => None,
    };
    let parts: Vec<Value> = match sep {
        None | Some(Value::None) => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if maxsplit.is_some_and(|max| parts.len() >= max) {
                    parts.push(Value::str(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
        Some(sep) => {
            let sep = str_param("split", &sep)?;
            if sep.is_empty() {
                return Err(RuntimeErrorKind::ValueError("empty separator".to_string()).into());
            }
            match maxsplit {
                Some(max) => s.splitn(max + 1, sep).map(Value::str).collect(),
                None => s.split(sep).map(Value::str).collect(),
            }
        }
    };
    Ok(Value::list(parts))
}

fn str_splitlines(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "splitlines")?;
    Ok(Value::list(s.lines().map(Value::str).collect()))
}

fn str_join(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let sep = receiver_str(&args, "join")?;
    let items = vm.collect_iter(args.positional[1].clone())?;
    let mut parts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s.to_string()),
            other => {
                return type_error(format!(
                    "sequence item {i}: expected str instance, {} found",
                    other.type_name()
                ));
            }
        }
    }
    Ok(Value::str(parts.join(&*sep)))
}

fn str_replace(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "replace")?;
    arity("replace", &args, 2, 3)?;
    let old = str_param("replace", &args.positional[1])?;
    let new = str_param("replace", &args.positional[2])?;
    let replaced = match args.positional.get(3).map(index_arg).transpose()? {
        Some(count) if count >= 0 => s.replacen(old, new, count as usize),
        _ => s.replace(old, new),
    };
    Ok(Value::str(replaced))
}

/// `startswith`/`endswith` accept a string or a tuple of strings
fn affix_matches(method: &str, affix: &Value, test: impl Fn(&str) -> bool) -> RuntimeResult<bool> {
    match affix {
        Value::Str(s) => Ok(test(s)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if test(str_param(method, option)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => type_error(format!(
            "{method} first arg must be str or a tuple of str, not {}",
            other.type_name()
        )),
    }
}

fn str_startswith(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "startswith")?;
    affix_matches("startswith", &args.positional[1], |p| s.starts_with(p)).map(Value::Bool)
}

fn str_endswith(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "endswith")?;
    affix_matches("endswith", &args.positional[1], |p| s.ends_with(p)).map(Value::Bool)
}

/// Character index of a byte offset
fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn str_find(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "find")?;
    let needle = str_param("find", &args.positional[1])?;
    Ok(Value::Int(s.find(needle).map_or(-1, |b| char_index(&s, b))))
}

fn str_rfind(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "rfind")?;
    let needle = str_param("rfind", &args.positional[1])?;
    Ok(Value::Int(s.rfind(needle).map_or(-1, |b| char_index(&s, b))))
}

fn str_index(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "index")?;
    let needle = str_param("index", &args.positional[1])?;
    s.find(needle)
        .map(|b| Value::Int(char_index(&s, b)))
        .ok_or_else(|| RuntimeErrorKind::ValueError("substring not found".to_string()).into())
}

fn str_count(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "count")?;
    let needle = str_param("count", &args.positional[1])?;
    let count = if needle.is_empty() {
        s.chars().count() + 1
    } else {
        s.matches(needle).count()
    };
    Ok(Value::Int(count as i64))
}

fn str_predicate(args: &CallArgs, method: &str, test: fn(char) -> bool) -> RuntimeResult<Value> {
    let s = receiver_str(args, method)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
}

fn str_isdigit(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    str_predicate(&args, "isdigit", |c| c.is_ascii_digit())
}

fn str_isalpha(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    str_predicate(&args, "isalpha", char::is_alphabetic)
}

fn str_isalnum(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    str_predicate(&args, "isalnum", char::is_alphanumeric)
}

fn str_isspace(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    str_predicate(&args, "isspace", char::is_whitespace)
}

/// Cased strings only: at least one cased character and no character of
/// the other case
fn cased(args: &CallArgs, method: &str, upper: bool) -> RuntimeResult<Value> {
    let s = receiver_str(args, method)?;
    let mut any_cased = false;
    for c in s.chars() {
        if c.is_uppercase() || c.is_lowercase() {
            any_cased = true;
            if c.is_uppercase() != upper {
                return Ok(Value::Bool(false));
            }
        }
    }
    Ok(Value::Bool(any_cased))
}

fn str_isupper(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    cased(&args, "isupper", true)
}

fn str_islower(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    cased(&args, "islower", false)
}

fn str_capitalize(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "capitalize")?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    Ok(Value::str(out))
}

fn str_title(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "title")?;
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    Ok(Value::str(out))
}

/// Width and fill character for `ljust`/`rjust`/`center`
fn justify_args(method: &str, args: &CallArgs) -> RuntimeResult<(Rc<str>, usize, char)> {
    let s = receiver_str(args, method)?;
    arity(method, args, 1, 2)?;
    let width = usize::try_from(index_arg(&args.positional[1])?).unwrap_or(0);
    let fill = match args.positional.get(2) {
        Some(fill) => {
            let fill = str_param(method, fill)?;
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return type_error("The fill character must be exactly one character long"),
            }
        }
        None => ' ',
    };
    Ok((s, width, fill))
}

fn str_ljust(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (s, width, fill) = justify_args("ljust", &args)?;
    Ok(Value::str(pad(&s, width, fill, Align::Left)))
}

fn str_rjust(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (s, width, fill) = justify_args("rjust", &args)?;
    Ok(Value::str(pad(&s, width, fill, Align::Right)))
}

fn str_center(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let (s, width, fill) = justify_args("center", &args)?;
    Ok(Value::str(pad(&s, width, fill, Align::Center)))
}

fn str_zfill(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let s = receiver_str(&args, "zfill")?;
    let width = usize::try_from(index_arg(&args.positional[1])?).unwrap_or(0);
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::Str(s));
    }
    let (sign, digits) = match s.chars().next() {
        Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
        _ => (String::new(), &s[..]),
    };
    Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - len))))
}

fn str_format(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let template = receiver_str(&args, "format")?;
    let keywords = std::mem::take(&mut args.keywords);
    let positional = args.positional.split_off(1);
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(RuntimeErrorKind::ValueError(
                    "Single '}' encountered in format string".to_string(),
                )
                .into());
            }
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        Some('{') => {
                            depth += 1;
                            field.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            field.push('}');
                        }
                        Some(c) => field.push(c),
                        None => {
                            return Err(RuntimeErrorKind::ValueError(
                                "expected '}' before end of string".to_string(),
                            )
                            .into());
                        }
                    }
                }
                let text = format_field(vm, &field, &positional, &keywords, &mut auto_index)?;
                out.push_str(&text);
            }
            c => out.push(c),
        }
    }
    Ok(Value::str(out))
}

/// Render one `{name!conv:spec}` replacement field
fn format_field(
    vm: &mut Vm,
    field: &str,
    positional: &[Value],
    keywords: &[(Rc<str>, Value)],
    auto_index: &mut usize,
) -> RuntimeResult<String> {
    let (head, spec) = field.split_once(':').unwrap_or((field, ""));
    let (name, conversion) = match head.split_once('!') {
        Some((name, conv)) => (name, Some(conv)),
        None => (head, None),
    };
    let end = name.find(['.', '[']).unwrap_or(name.len());
    let (first, mut accessors) = name.split_at(end);

    let mut value = if first.is_empty() {
        let index = *auto_index;
        *auto_index += 1;
        positional.get(index).cloned().ok_or_else(|| {
            RuntimeErrorKind::IndexError(format!("Replacement index {index} out of range for positional args tuple"))
        })?
    } else if let Ok(index) = first.parse::<usize>() {
        positional.get(index).cloned().ok_or_else(|| {
            RuntimeErrorKind::IndexError(format!("Replacement index {index} out of range for positional args tuple"))
        })?
    } else {
        keywords
            .iter()
            .find(|(k, _)| &**k == first)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RuntimeErrorKind::KeyError(Value::str(first)))?
    };

    while !accessors.is_empty() {
        if let Some(rest) = accessors.strip_prefix('.') {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            value = vm.get_attr(&value, &rest[..end])?;
            accessors = &rest[end..];
        } else if let Some(rest) = accessors.strip_prefix('[') {
            let Some(close) = rest.find(']') else {
                return Err(RuntimeErrorKind::ValueError("Missing ']' in format string".to_string()).into());
            };
            let key = &rest[..close];
            let index = key.parse::<i64>().map_or_else(|_| Value::str(key), Value::Int);
            value = vm.get_item(value, index)?;
            accessors = &rest[close + 1..];
        } else {
            return Err(RuntimeErrorKind::ValueError(
                "Only '.' or '[' may follow ']' in format field specifier".to_string(),
            )
            .into());
        }
    }

    let value = match conversion {
        None => value,
        Some("r") => Value::str(vm.repr_of(&value)?),
        Some("s") => Value::str(vm.str_of(&value)?),
        Some(other) => {
            return Err(RuntimeErrorKind::ValueError(format!(
                "Unknown conversion specifier {other}"
            ))
            .into());
        }
    };
    format_value(vm, &value, spec)
}

// ===== Format specifications =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    /// Padding between the sign and the digits
    AfterSign,
}

/// A parsed `[[fill]align][sign][#][0][width][,][.precision][type]`
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

fn parse_spec(spec: &str) -> Result<FormatSpec, RuntimeErrorKind> {
    let invalid = || RuntimeErrorKind::ValueError(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = FormatSpec::default();
    let mut i = 0;

    if let Some(align) = chars.get(1).copied().and_then(align_of) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(align);
        i = 2;
    } else if let Some(align) = chars.first().copied().and_then(align_of) {
        parsed.align = Some(align);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        parsed.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        parsed.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.fill.get_or_insert('0');
        parsed.align.get_or_insert(Align::AfterSign);
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        parsed.width = digits.parse().map_err(|_| invalid())?;
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        parsed.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(RuntimeErrorKind::ValueError("Format specifier missing precision".to_string()));
        }
        let digits: String = chars[start..i].iter().collect();
        parsed.precision = Some(digits.parse().map_err(|_| invalid())?);
    }
    if let Some(&kind) = chars.get(i) {
        parsed.kind = Some(kind);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(parsed)
}

fn pad(text: &str, width: usize, fill: char, align: Align) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let total = width - len;
    let (left, right) = match align {
        Align::Left => (0, total),
        Align::Right | Align::AfterSign => (total, 0),
        Align::Center => (total / 2, total - total / 2),
    };
    let fill = fill.to_string();
    format!("{}{text}{}", fill.repeat(left), fill.repeat(right))
}

/// Insert a separator every three digits of the integer part
fn group_digits(digits: &str, separator: char) -> String {
    let (int_part, rest) = digits
        .find(|c: char| !c.is_ascii_digit())
        .map_or((digits, ""), |i| digits.split_at(i));
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

/// Python-style exponent: at least two digits
fn exponent_form(x: f64, precision: usize, upper: bool) -> String {
    let text = format!("{x:.precision$e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exp.unsigned_abs())
}

fn general_form(x: f64, precision: usize, upper: bool) -> String {
    let precision = precision.max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    let exp = x.abs().log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let formatted = exponent_form(x, precision - 1, upper);
        let (mantissa, exponent) = formatted.split_at(formatted.find(['e', 'E']).unwrap_or(formatted.len()));
        format!("{}{exponent}", trim_fraction(mantissa))
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{x:.decimals$}")).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn non_finite(x: f64, upper: bool) -> Option<String> {
    let text = if x.is_nan() {
        "nan"
    } else if x.is_infinite() {
        "inf"
    } else {
        return None;
    };
    Some(if upper { text.to_uppercase() } else { text.to_string() })
}

/// Render an int or float body (without sign) for a presentation type
fn number_body(value: &Value, spec: &FormatSpec) -> RuntimeResult<(bool, String)> {
    let kind = spec.kind;
    if let (Some(n), true) = (value.as_int(), matches!(value, Value::Int(_) | Value::Bool(_))) {
        let magnitude = n.unsigned_abs();
        let prefix = |p: &str| if spec.alternate { p.to_string() } else { String::new() };
        let body = match kind {
            None | Some('d' | 'n') => magnitude.to_string(),
            Some('x') => format!("{}{magnitude:x}", prefix("0x")),
            Some('X') => format!("{}{magnitude:X}", prefix("0X")),
            Some('o') => format!("{}{magnitude:o}", prefix("0o")),
            Some('b') => format!("{}{magnitude:b}", prefix("0b")),
            Some('c') => {
                let c = u32::try_from(n).ok().and_then(char::from_u32).ok_or_else(|| {
                    RuntimeErrorKind::OverflowError("%c arg not in range(0x110000)".to_string())
                })?;
                return Ok((false, c.to_string()));
            }
            Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
                return number_body(&Value::Float(n as f64), spec);
            }
            Some(other) => {
                return Err(RuntimeErrorKind::ValueError(format!(
                    "Unknown format code '{other}' for object of type 'int'"
                ))
                .into());
            }
        };
        return Ok((n < 0, body));
    }

    let Some(x) = value.as_float() else {
        return type_error(format!(
            "unsupported format string passed to {}.__format__",
            value.type_name()
        ));
    };
    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let upper = matches!(kind, Some('E' | 'F' | 'G'));
    if let Some(text) = non_finite(magnitude, upper) {
        return Ok((negative, if kind == Some('%') { format!("{text}%") } else { text }));
    }
    let body = match kind {
        Some('f' | 'F') => {
            let precision = spec.precision.unwrap_or(6);
            format!("{magnitude:.precision$}")
        }
        Some('e' | 'E') => exponent_form(magnitude, spec.precision.unwrap_or(6), upper),
        Some('g' | 'G') => general_form(magnitude, spec.precision.unwrap_or(6), upper),
        Some('%') => {
            let precision = spec.precision.unwrap_or(6);
            format!("{:.precision$}%", magnitude * 100.0)
        }
        None => match spec.precision {
            Some(precision) => general_form(magnitude, precision, false),
            None => format_float(magnitude),
        },
        Some(other) => {
            return Err(RuntimeErrorKind::ValueError(format!(
                "Unknown format code '{other}' for object of type 'float'"
            ))
            .into());
        }
    };
    Ok((negative, body))
}

/// `format(value, spec)`
pub(crate) fn format_value(vm: &mut Vm, value: &Value, spec: &str) -> RuntimeResult<String> {
    if matches!(value, Value::Instance(_)) {
        if let Some(text) = vm.call_special(value, "__format__", vec![Value::str(spec)])? {
            return match text {
                Value::Str(s) => Ok(s.to_string()),
                other => type_error(format!(
                    "__format__ must return a str, not {}",
                    other.type_name()
                )),
            };
        }
    }
    if spec.is_empty() {
        return vm.str_of(value);
    }
    let spec = parse_spec(spec)?;
    let fill = spec.fill.unwrap_or(' ');

    let is_number = matches!(value, Value::Int(_) | Value::Float(_))
        || (matches!(value, Value::Bool(_)) && spec.kind.is_some());
    if !is_number {
        if spec.sign.is_some() {
            return Err(RuntimeErrorKind::ValueError("Sign not allowed in string format specifier".to_string()).into());
        }
        if !matches!(spec.kind, None | Some('s')) {
            return Err(RuntimeErrorKind::ValueError(format!(
                "Unknown format code '{}' for object of type '{}'",
                spec.kind.unwrap_or('s'),
                value.type_name()
            ))
            .into());
        }
        let mut text = vm.str_of(value)?;
        if let Some(precision) = spec.precision {
            text = text.chars().take(precision).collect();
        }
        return Ok(pad(&text, spec.width, fill, spec.align.unwrap_or(Align::Left)));
    }

    let (negative, mut body) = number_body(value, &spec)?;
    if let Some(separator) = spec.grouping {
        body = group_digits(&body, separator);
    }
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    let align = spec.align.unwrap_or(Align::Right);
    if align == Align::AfterSign {
        let width = spec.width.saturating_sub(sign.len());
        return Ok(format!("{sign}{}", pad(&body, width, fill, Align::Right)));
    }
    Ok(pad(&format!("{sign}{body}"), spec.width, fill, align))
}

// ===== list =====

fn list_append(_vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "append")?;
    let item = args.positional.pop().unwrap_or(Value::None);
    list.borrow_mut().push(item);
    Ok(Value::None)
}

fn list_extend(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "extend")?;
    let source = args.positional.pop().unwrap_or(Value::None);
    let items = vm.collect_iter(source)?;
    list.borrow_mut().extend(items);
    Ok(Value::None)
}

fn list_pop(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "pop")?;
    arity("pop", &args, 0, 1)?;
    let mut items = list.borrow_mut();
    if items.is_empty() {
        return Err(RuntimeErrorKind::IndexError("pop from empty list".to_string()).into());
    }
    let len = items.len() as i64;
    let index = match args.positional.get(1) {
        Some(index) => index_arg(index)?,
        None => len - 1,
    };
    let index = if index < 0 { index + len } else { index };
    if !(0..len).contains(&index) {
        return Err(RuntimeErrorKind::IndexError("pop index out of range".to_string()).into());
    }
    Ok(items.remove(index as usize))
}

fn list_insert(_vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "insert")?;
    let item = args.positional.pop().unwrap_or(Value::None);
    let index = index_arg(&args.positional[1])?;
    let mut items = list.borrow_mut();
    let len = items.len() as i64;
    let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(index as usize, item);
    Ok(Value::None)
}

/// Position of the first element equal to `item`
fn position_of(vm: &mut Vm, items: &[Value], item: &Value) -> RuntimeResult<Option<usize>> {
    for (i, candidate) in items.iter().enumerate() {
        if vm.values_equal(candidate, item)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn count_of(vm: &mut Vm, items: &[Value], item: &Value) -> RuntimeResult<Value> {
    let mut count = 0;
    for candidate in items {
        if vm.values_equal(candidate, item)? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_remove(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "remove")?;
    let snapshot = list.borrow().clone();
    match position_of(vm, &snapshot, &args.positional[1])? {
        Some(index) => {
            let mut items = list.borrow_mut();
            if index < items.len() {
                items.remove(index);
            }
            Ok(Value::None)
        }
        None => Err(RuntimeErrorKind::ValueError("list.remove(x): x not in list".to_string()).into()),
    }
}

fn list_index(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "index")?;
    let snapshot = list.borrow().clone();
    match position_of(vm, &snapshot, &args.positional[1])? {
        Some(index) => Ok(Value::Int(index as i64)),
        None => {
            let item = vm.repr_of(&args.positional[1])?;
            Err(RuntimeErrorKind::ValueError(format!("{item} is not in list")).into())
        }
    }
}

fn list_count(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let list = receiver_list(&args, "count")?;
    let snapshot = list.borrow().clone();
    count_of(vm, &snapshot, &args.positional[1])
}

fn list_reverse(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    receiver_list(&args, "reverse")?.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_sort(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let reverse = match args.take_keyword("reverse") {
        Some(flag) => vm.truthy(&flag)?,
        None => false,
    };
    let list = receiver_list(&args, "sort")?;
    arity("sort", &args, 0, 0)?;
    let snapshot = list.borrow().clone();
    let sorted = vm.sort_values(snapshot, key, reverse)?;
    *list.borrow_mut() = sorted;
    Ok(Value::None)
}

fn list_clear(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    receiver_list(&args, "clear")?.borrow_mut().clear();
    Ok(Value::None)
}

fn list_copy(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let items = receiver_list(&args, "copy")?.borrow().clone();
    Ok(Value::list(items))
}

// ===== dict =====

fn dict_get(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "get")?;
    arity("get", &args, 1, 2)?;
    let key = dict_key(args.positional[1].clone())?;
    let found = dict.borrow().get(&key).cloned();
    Ok(found.unwrap_or_else(|| args.positional.get(2).cloned().unwrap_or(Value::None)))
}

fn dict_keys(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "keys")?;
    let keys = dict.borrow().keys().map(|k| k.value().clone()).collect();
    Ok(Value::list(keys))
}

fn dict_values(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "values")?;
    let values = dict.borrow().values().cloned().collect();
    Ok(Value::list(values))
}

fn dict_items(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "items")?;
    let items = dict
        .borrow()
        .iter()
        .map(|(k, v)| Value::tuple(vec![k.value().clone(), v.clone()]))
        .collect();
    Ok(Value::list(items))
}

fn dict_pop(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "pop")?;
    arity("pop", &args, 1, 2)?;
    let key = dict_key(args.positional[1].clone())?;
    let removed = dict.borrow_mut().shift_remove(&key);
    match (removed, args.positional.get(2)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(RuntimeErrorKind::KeyError(key.into_value()).into()),
    }
}

fn dict_setdefault(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "setdefault")?;
    arity("setdefault", &args, 1, 2)?;
    let key = dict_key(args.positional[1].clone())?;
    let default = args.positional.get(2).cloned().unwrap_or(Value::None);
    let value = dict.borrow_mut().entry(key).or_insert(default).clone();
    Ok(value)
}

fn dict_update(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "update")?;
    let keywords = std::mem::take(&mut args.keywords);
    arity("update", &args, 0, 1)?;
    let mut merged = Dict::new();
    if let Some(source) = args.positional.get(1).cloned() {
        vm.dict_update(&mut merged, source)?;
    }
    let mut entries = dict.borrow_mut();
    entries.extend(merged);
    for (name, value) in keywords {
        entries.insert(DictKey::from(&*name), value);
    }
    Ok(Value::None)
}

fn dict_clear(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    receiver_dict(&args, "clear")?.borrow_mut().clear();
    Ok(Value::None)
}

fn dict_copy(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let entries = receiver_dict(&args, "copy")?.borrow().clone();
    Ok(Value::dict(entries))
}

fn dict_popitem(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let dict = receiver_dict(&args, "popitem")?;
    let popped = dict.borrow_mut().pop();
    match popped {
        Some((key, value)) => Ok(Value::tuple(vec![key.into_value(), value])),
        None => Err(RuntimeErrorKind::KeyError(Value::str("popitem(): dictionary is empty")).into()),
    }
}

// ===== tuple =====

fn tuple_index(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let items = receiver_tuple(&args, "index")?;
    match position_of(vm, &items, &args.positional[1])? {
        Some(index) => Ok(Value::Int(index as i64)),
        None => Err(RuntimeErrorKind::ValueError("tuple.index(x): x not in tuple".to_string()).into()),
    }
}

fn tuple_count(vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let items = receiver_tuple(&args, "count")?;
    count_of(vm, &items, &args.positional[1])
}

// ===== generator and float =====

fn generator_send(vm: &mut Vm, mut args: CallArgs) -> RuntimeResult<Value> {
    let generator = receiver_generator(&args, "send")?;
    let sent = args.positional.pop().unwrap_or(Value::None);
    match vm.resume_generator(&generator, sent)? {
        GenStep::Yielded(value) => Ok(value),
        GenStep::Complete(value) => Err(RuntimeErrorKind::StopIteration(value).into()),
    }
}

fn generator_close(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    let generator = receiver_generator(&args, "close")?;
    Vm::close_generator(&generator);
    Ok(Value::None)
}

fn float_is_integer(_vm: &mut Vm, args: CallArgs) -> RuntimeResult<Value> {
    match args.positional.first() {
        Some(Value::Float(f)) => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
        _ => type_error("descriptor 'is_integer' requires a 'float' object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_methods_by_type() {
        assert!(lookup("str", "upper").is_some());
        assert!(lookup("list", "append").is_some());
        assert!(lookup("dict", "items").is_some());
        assert!(lookup("int", "upper").is_none());
        assert!(lookup("str", "append").is_none());
    }

    #[test]
    fn format_spec_parsing() {
        let spec = parse_spec("*^10.3f").unwrap();
        assert_eq!(spec.fill, Some('*'));
        assert_eq!(spec.align, Some(Align::Center));
        assert_eq!(spec.width, 10);
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.kind, Some('f'));

        let spec = parse_spec("08,d").unwrap();
        assert_eq!(spec.fill, Some('0'));
        assert_eq!(spec.align, Some(Align::AfterSign));
        assert_eq!(spec.width, 8);
        assert_eq!(spec.grouping, Some(','));

        assert!(parse_spec("10.").is_err());
        assert!(parse_spec("abc").is_err());
    }

    #[test]
    fn padding_and_grouping() {
        assert_eq!(pad("ab", 5, '.', Align::Left), "ab...");
        assert_eq!(pad("ab", 5, '.', Align::Right), "...ab");
        assert_eq!(pad("ab", 5, '.', Align::Center), ".ab..");
        assert_eq!(pad("abcdef", 3, ' ', Align::Left), "abcdef");
        assert_eq!(group_digits("1234567", ','), "1,234,567");
        assert_eq!(group_digits("1234.5", '_'), "1_234.5");
        assert_eq!(group_digits("123", ','), "123");
    }

    #[test]
    fn float_presentations() {
        assert_eq!(exponent_form(12345.678, 2, false), "1.23e+04");
        assert_eq!(exponent_form(0.000_12, 1, true), "1.2E-04");
        assert_eq!(general_form(0.5, 6, false), "0.5");
        assert_eq!(general_form(1_234_567.0, 3, false), "1.23e+06");
        assert_eq!(general_form(100.0, 6, false), "100");
    }
}
