//! Helper-function registry.
//!
//! The registry is a declared constant table injected into each fresh
//! template set; there is no process-wide mutable state. Beyond the
//! published helpers, a fixed list of common helper names is registered as
//! no-ops so user templates written against larger helper libraries still
//! parse.

use std::collections::HashMap;

use serde_json::Value as Json;

use super::compare;
use super::exec::{Value, format_number};

/// Signature of every registered helper.
pub type Helper = fn(&[Value]) -> Result<Value, String>;

/// The published helper table.
const HELPERS: &[(&str, Helper)] = &[
    // arithmetic
    ("add", add),
    ("sub", sub),
    ("mul", mul),
    ("div", div),
    ("mod", modulo),
    // strings
    ("upper", upper),
    ("lower", lower),
    ("title", title),
    ("trim", trim),
    ("contains", contains),
    ("hasPrefix", has_prefix),
    ("hasSuffix", has_suffix),
    ("replace", replace),
    ("split", split),
    ("join", join),
    // collections
    ("isLast", is_last),
    ("isFirst", is_first),
    ("len", length),
    ("seq", seq),
    ("slice", slice_fn),
    ("index", index),
    // safe markup
    ("safeHTML", safe_markup),
    ("safeJS", safe_markup),
    ("safeCSS", safe_markup),
    ("safeURL", safe_markup),
    ("safeAttr", safe_markup),
    // construction and defaults
    ("dict", dict),
    ("default", default_fn),
    ("ternary", ternary),
    // flexible comparisons
    ("eq", eq),
    ("ne", ne),
    ("lt", lt),
    ("le", le),
    ("gt", gt),
    ("ge", ge),
    // navigation
    ("isActive", is_active),
    ("isActivePrefix", is_active_prefix),
    // dialect builtins
    ("and", and),
    ("or", or),
    ("not", not),
    ("print", print),
    ("println", println),
    ("printf", printf),
    ("html", html_escape),
    ("urlquery", urlquery),
];

/// Common helper names accepted as no-ops so parsing never fails on
/// templates written against larger helper libraries. A no-op returns its
/// last argument unchanged (or an empty string).
pub const NOOP_NAMES: &[&str] = &[
    "toJson", "fromJson", "toString", "toInt", "toFloat", "date", "dateFormat", "now", "first",
    "last", "rest", "initial", "uniq", "sortAlpha", "reverse", "compact", "concat", "keys",
    "values", "pick", "omit", "merge", "pluck", "until", "untilStep", "min", "max", "floor",
    "ceil", "round", "abs", "trimPrefix", "trimSuffix", "repeat", "substr", "nospace", "initials",
    "camelcase", "snakecase", "kebabcase", "swapcase", "indent", "nindent", "quote", "squote",
    "env", "base", "dir", "ext", "clean", "urlize", "humanize", "pluralize", "truncate",
    "wordwrap", "js", "call",
];

/// Build a fresh registry for one template set.
pub fn registry() -> HashMap<&'static str, Helper> {
    let mut map: HashMap<&'static str, Helper> =
        HELPERS.iter().copied().collect();
    for name in NOOP_NAMES {
        map.insert(*name, noop);
    }
    map
}

/// Whether `name` is resolvable in a template set (published or no-op).
pub fn is_known(name: &str) -> bool {
    HELPERS.iter().any(|(n, _)| *n == name) || NOOP_NAMES.contains(&name)
}

/// The comparison-function names recognised by the analyzer.
pub const COMPARISON_FUNCS: &[&str] = &["eq", "ne", "lt", "le", "gt", "ge"];

// ============================================================================
// Argument helpers
// ============================================================================

fn arity(args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "expected {expected} argument(s), got {}",
            args.len()
        ));
    }
    Ok(())
}

fn number(v: &Value) -> Result<f64, String> {
    match v.as_json() {
        Json::Number(n) => n.as_f64().ok_or_else(|| "invalid number".into()),
        other => Err(format!("expected number, got {other}")),
    }
}

fn integer(v: &Value) -> Result<i64, String> {
    Ok(number(v)? as i64)
}

fn text(v: &Value) -> String {
    v.display()
}

fn from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        Value::Data(Json::from(f as i64))
    } else {
        Value::Data(
            serde_json::Number::from_f64(f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
        )
    }
}

fn bool_value(b: bool) -> Value {
    Value::Data(Json::Bool(b))
}

fn string_value(s: String) -> Value {
    Value::Data(Json::String(s))
}

// ============================================================================
// Arithmetic
// ============================================================================

fn add(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(from_f64(number(&args[0])? + number(&args[1])?))
}

fn sub(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(from_f64(number(&args[0])? - number(&args[1])?))
}

fn mul(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(from_f64(number(&args[0])? * number(&args[1])?))
}

fn div(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let b = number(&args[1])?;
    if b == 0.0 {
        return Ok(from_f64(0.0));
    }
    Ok(from_f64(number(&args[0])? / b))
}

fn modulo(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let b = integer(&args[1])?;
    if b == 0 {
        return Ok(from_f64(0.0));
    }
    Ok(Value::Data(Json::from(integer(&args[0])? % b)))
}

// ============================================================================
// Strings
// ============================================================================

fn upper(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(string_value(text(&args[0]).to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(string_value(text(&args[0]).to_lowercase()))
}

fn title(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(string_value(crate::utils::text::title_case(&text(&args[0]))))
}

fn trim(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(string_value(text(&args[0]).trim().to_string()))
}

fn contains(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(text(&args[0]).contains(&text(&args[1]))))
}

fn has_prefix(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(text(&args[0]).starts_with(&text(&args[1]))))
}

fn has_suffix(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(text(&args[0]).ends_with(&text(&args[1]))))
}

fn replace(args: &[Value]) -> Result<Value, String> {
    arity(args, 3)?;
    Ok(string_value(
        text(&args[0]).replace(&text(&args[1]), &text(&args[2])),
    ))
}

fn split(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let parts: Vec<Json> = text(&args[0])
        .split(&text(&args[1]))
        .map(|s| Json::String(s.to_string()))
        .collect();
    Ok(Value::Data(Json::Array(parts)))
}

fn join(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let sep = text(&args[1]);
    match args[0].as_json() {
        Json::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Json::String(s) => s.clone(),
                    Json::Number(n) => format_number(n),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(string_value(joined))
        }
        other => Err(format!("expected array, got {other}")),
    }
}

// ============================================================================
// Collections
// ============================================================================

fn is_last(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let i = integer(&args[0])?;
    match args[1].as_json() {
        Json::Array(items) => Ok(bool_value(i as usize + 1 == items.len())),
        _ => Ok(bool_value(false)),
    }
}

fn is_first(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(bool_value(integer(&args[0])? == 0))
}

fn length(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let len = match args[0].as_json() {
        Json::Array(a) => a.len(),
        Json::Object(o) => o.len(),
        Json::String(s) => s.chars().count(),
        _ => 0,
    };
    Ok(Value::Data(Json::from(len)))
}

fn seq(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let start = integer(&args[0])?;
    let end = integer(&args[1])?;
    let items: Vec<Json> = (start..=end).map(Json::from).collect();
    Ok(Value::Data(Json::Array(items)))
}

/// Subslice with graceful handling of out-of-range indices.
/// `slice x n` takes `[0, n)`; `slice x a b` takes `[a, b)`.
fn slice_fn(args: &[Value]) -> Result<Value, String> {
    if args.is_empty() || args.len() > 3 {
        return Err("expected 2 or 3 arguments".into());
    }
    let (start, end) = match args.len() {
        2 => (0, integer(&args[1])?.max(0) as usize),
        3 => (
            integer(&args[1])?.max(0) as usize,
            integer(&args[2])?.max(0) as usize,
        ),
        _ => return Ok(args[0].clone()),
    };
    match args[0].as_json() {
        Json::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let end = end.min(chars.len());
            if start >= end {
                return Ok(string_value(String::new()));
            }
            Ok(string_value(chars[start..end].iter().collect()))
        }
        Json::Array(items) => {
            let end = end.min(items.len());
            if start >= end {
                return Ok(Value::Data(Json::Array(Vec::new())));
            }
            Ok(Value::Data(Json::Array(items[start..end].to_vec())))
        }
        other => Ok(Value::Data(other)),
    }
}

fn index(args: &[Value]) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("expected at least 2 arguments".into());
    }
    let mut current = args[0].as_json();
    for key in &args[1..] {
        current = match (&current, key.as_json()) {
            (Json::Array(items), Json::Number(n)) => {
                let i = n.as_i64().unwrap_or(-1);
                if i >= 0 && (i as usize) < items.len() {
                    items[i as usize].clone()
                } else {
                    Json::Null
                }
            }
            (Json::Object(map), Json::String(k)) => map.get(&k).cloned().unwrap_or(Json::Null),
            _ => Json::Null,
        };
    }
    Ok(Value::Data(current))
}

// ============================================================================
// Safe markup, construction, defaults
// ============================================================================

fn safe_markup(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(Value::Markup(text(&args[0])))
}

fn dict(args: &[Value]) -> Result<Value, String> {
    if args.len() % 2 != 0 {
        return Ok(Value::null());
    }
    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        map.insert(text(&pair[0]), pair[1].as_json());
    }
    Ok(Value::Data(Json::Object(map)))
}

/// `default fallback value`: the fallback wins when the value is missing,
/// an empty string, zero, or false.
fn default_fn(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let val = args[1].as_json();
    let empty = matches!(&val, Json::Null)
        || matches!(&val, Json::String(s) if s.is_empty())
        || matches!(&val, Json::Bool(false))
        || matches!(&val, Json::Number(n) if n.as_f64() == Some(0.0));
    Ok(if empty { args[0].clone() } else { args[1].clone() })
}

fn ternary(args: &[Value]) -> Result<Value, String> {
    arity(args, 3)?;
    Ok(if args[0].truthy() {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

// ============================================================================
// Flexible comparisons
// ============================================================================

fn eq(args: &[Value]) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("expected at least 2 arguments".into());
    }
    let first = args[0].as_json();
    let hit = args[1..]
        .iter()
        .any(|other| compare::eq(&first, &other.as_json()));
    Ok(bool_value(hit))
}

fn ne(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(compare::ne(&args[0].as_json(), &args[1].as_json())))
}

fn lt(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(compare::lt(&args[0].as_json(), &args[1].as_json())))
}

fn le(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(compare::le(&args[0].as_json(), &args[1].as_json())))
}

fn gt(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(compare::gt(&args[0].as_json(), &args[1].as_json())))
}

fn ge(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(compare::ge(&args[0].as_json(), &args[1].as_json())))
}

// ============================================================================
// Navigation
// ============================================================================

fn normalize_url(mut s: String) -> String {
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    if s.is_empty() { "/".to_string() } else { s }
}

fn is_active(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(
        normalize_url(text(&args[0])) == normalize_url(text(&args[1])),
    ))
}

fn is_active_prefix(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(bool_value(text(&args[0]).starts_with(&text(&args[1]))))
}

// ============================================================================
// Dialect builtins
// ============================================================================

/// `and`: first falsy argument, else the last.
fn and(args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        return Err("expected at least 1 argument".into());
    }
    for arg in args {
        if !arg.truthy() {
            return Ok(arg.clone());
        }
    }
    Ok(args[args.len() - 1].clone())
}

/// `or`: first truthy argument, else the last.
fn or(args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        return Err("expected at least 1 argument".into());
    }
    for arg in args {
        if arg.truthy() {
            return Ok(arg.clone());
        }
    }
    Ok(args[args.len() - 1].clone())
}

fn not(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(bool_value(!args[0].truthy()))
}

fn print(args: &[Value]) -> Result<Value, String> {
    Ok(string_value(args.iter().map(text).collect::<String>()))
}

fn println(args: &[Value]) -> Result<Value, String> {
    let mut s: String = args.iter().map(text).collect();
    s.push('\n');
    Ok(string_value(s))
}

/// Minimal printf: supports `%v`, `%s`, `%d`, `%f`, `%q`, and `%%`.
fn printf(args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        return Err("expected a format string".into());
    }
    let format = text(&args[0]);
    let mut values = args[1..].iter();
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('v') | Some('s') => out.push_str(&values.next().map(text).unwrap_or_default()),
            Some('d') => {
                let v = values.next().map(|v| integer(v)).transpose()?.unwrap_or(0);
                out.push_str(&v.to_string());
            }
            Some('f') => {
                let v = values.next().map(|v| number(v)).transpose()?.unwrap_or(0.0);
                out.push_str(&v.to_string());
            }
            Some('q') => {
                let v = values.next().map(text).unwrap_or_default();
                out.push_str(&format!("{v:?}"));
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(string_value(out))
}

fn html_escape(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let s = text(&args[0]);
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Ok(string_value(out))
}

fn urlquery(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(string_value(
        urlencoding::encode(&text(&args[0])).into_owned(),
    ))
}

/// No-op stand-in for unimplemented common helpers.
fn noop(args: &[Value]) -> Result<Value, String> {
    Ok(args.last().cloned().unwrap_or_else(Value::null))
}
