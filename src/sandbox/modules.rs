//! The `datetime`, `re` and `json` modules, plus dispatch for `pd.*`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex, RegexBuilder};

use super::capabilities::{Builtin, RE_DOTALL, RE_IGNORECASE, RE_MULTILINE};
use super::error::{ScriptError, ScriptResult};
use super::interp::Interpreter;
use super::value::*;
use crate::table::parse_datetime;

/// Compiled pattern size ceiling; keeps pathological patterns from eating
/// memory at compile time.
const REGEX_SIZE_LIMIT: usize = 1 << 20;
const REGEX_CACHE_CAP: usize = 64;

impl Interpreter {
    pub(super) fn call_module_fn(&mut self, builtin: Builtin, mut args: CallArgs) -> ScriptResult<Value> {
        let name = builtin.name();
        let result = match builtin {
            Builtin::PdDataFrame => return self.pd_dataframe(args),
            Builtin::PdSeries => return self.pd_series(args),
            Builtin::PdConcat => return self.pd_concat(args),
            Builtin::PdToNumeric => return self.pd_to_numeric(args),
            Builtin::PdToDatetime => return self.pd_to_datetime(args),
            Builtin::PdIsna => return self.pd_isna(args, false),
            Builtin::PdNotna => return self.pd_isna(args, true),

            Builtin::DtNow => Value::DateTime(Local::now().naive_local()),
            Builtin::DtStrptime => {
                let text = args.required(0, "date_string", name)?;
                let fmt = args.required(1, "format", name)?;
                let (text, fmt) = (text.as_str("date_string")?, fmt.as_str("format")?);
                let dt = strptime(text, fmt).ok_or_else(|| {
                    ScriptError::value_error(format!(
                        "time data {} does not match format {}",
                        repr_str(text),
                        repr_str(fmt)
                    ))
                })?;
                Value::DateTime(dt)
            }
            Builtin::DtFromIso => {
                let text = args.required(0, "date_string", name)?;
                let text = text.as_str("date_string")?;
                let dt = parse_datetime(text).ok_or_else(|| {
                    ScriptError::value_error(format!("Invalid isoformat string: {}", repr_str(text)))
                })?;
                Value::DateTime(dt)
            }

            Builtin::ReSub => {
                let pattern = args.required(0, "pattern", name)?;
                let repl = args.required(1, "repl", name)?;
                let text = args.required(2, "string", name)?;
                let count = optional_int(args.arg(3, "count"), 0)?;
                let flags = optional_int(args.arg(4, "flags"), 0)?;
                args.finish(name)?;
                let re = self.compile_regex(pattern.as_str("pattern")?, flags)?;
                let text = text.as_str("string")?;
                let limit = count.max(0) as usize;
                return match &repl {
                    Value::Str(template) => {
                        let template = python_replacement(template);
                        Ok(Value::Str(re.replacen(text, limit, template.as_str()).into_owned()))
                    }
                    callable => self.regex_sub_with(&re, text, callable, limit).map(Value::Str),
                };
            }
            Builtin::ReSearch | Builtin::ReMatch | Builtin::ReFullmatch => {
                let pattern = args.required(0, "pattern", name)?;
                let text = args.required(1, "string", name)?;
                let flags = optional_int(args.arg(2, "flags"), 0)?;
                let source = pattern.as_str("pattern")?;
                let anchored = match builtin {
                    Builtin::ReMatch => format!(r"\A(?:{})", source),
                    Builtin::ReFullmatch => format!(r"\A(?:{})\z", source),
                    _ => source.to_string(),
                };
                let re = self.compile_regex(&anchored, flags)?;
                let text = text.as_str("string")?;
                match re.captures(text) {
                    Some(caps) => Value::Match(Rc::new(match_data(&re, &caps, text))),
                    None => Value::None,
                }
            }
            Builtin::ReFindall => {
                let pattern = args.required(0, "pattern", name)?;
                let text = args.required(1, "string", name)?;
                let flags = optional_int(args.arg(2, "flags"), 0)?;
                let re = self.compile_regex(pattern.as_str("pattern")?, flags)?;
                let text = text.as_str("string")?;
                let group_text = |caps: &Captures, i: usize| {
                    Value::Str(caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                };
                let found = re
                    .captures_iter(text)
                    .map(|caps| match re.captures_len() {
                        1 => group_text(&caps, 0),
                        2 => group_text(&caps, 1),
                        n => Value::tuple((1..n).map(|i| group_text(&caps, i)).collect()),
                    })
                    .collect::<Vec<_>>();
                self.charge(found.len())?;
                Value::list(found)
            }
            Builtin::ReSplit => {
                let pattern = args.required(0, "pattern", name)?;
                let text = args.required(1, "string", name)?;
                let maxsplit = optional_int(args.arg(2, "maxsplit"), 0)?;
                let flags = optional_int(args.arg(3, "flags"), 0)?;
                let re = self.compile_regex(pattern.as_str("pattern")?, flags)?;
                let text = text.as_str("string")?;
                let mut parts = Vec::new();
                let mut last = 0;
                for (n, caps) in re.captures_iter(text).enumerate() {
                    if maxsplit > 0 && n as i64 >= maxsplit {
                        break;
                    }
                    let Some(whole) = caps.get(0) else { continue };
                    parts.push(Value::str(&text[last..whole.start()]));
                    for i in 1..caps.len() {
                        parts.push(
                            caps.get(i)
                                .map(|m| Value::str(m.as_str()))
                                .unwrap_or(Value::None),
                        );
                    }
                    last = whole.end();
                }
                parts.push(Value::str(&text[last..]));
                self.charge(parts.len())?;
                Value::list(parts)
            }
            Builtin::ReEscape => {
                let text = args.required(0, "pattern", name)?;
                Value::Str(regex::escape(text.as_str("pattern")?))
            }

            Builtin::JsonDumps => {
                let obj = args.required(0, "obj", name)?;
                let indent = match args.kwarg("indent") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_int("indent")?.max(0) as usize),
                };
                let sort_keys = match args.kwarg("sort_keys") {
                    Some(v) => v.truthy()?,
                    None => false,
                };
                let ensure_ascii = match args.kwarg("ensure_ascii") {
                    Some(v) => v.truthy()?,
                    None => true,
                };
                let mut out = String::new();
                let opts = DumpOptions {
                    indent,
                    sort_keys,
                    ensure_ascii,
                };
                dump_json(&obj, &opts, 0, &mut out)?;
                Value::Str(out)
            }
            Builtin::JsonLoads => {
                let text = args.required(0, "s", name)?;
                let parsed: serde_json::Value = serde_json::from_str(text.as_str("s")?)
                    .map_err(|e| ScriptError::value_error(format!("JSONDecodeError: {}", e)))?;
                json_to_value(&parsed)?
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' is not callable here",
                    other.name()
                )))
            }
        };
        args.finish(name)?;
        Ok(result)
    }

    /// Compiles `pattern` with Python-style flag bits, memoised per execution.
    pub(super) fn compile_regex(&mut self, pattern: &str, flags: i64) -> ScriptResult<Regex> {
        let key = (pattern.to_string(), flags);
        if let Some(re) = self.regex_cache.get(&key) {
            return Ok(re.clone());
        }
        let re = RegexBuilder::new(pattern)
            .case_insensitive(flags & RE_IGNORECASE != 0)
            .multi_line(flags & RE_MULTILINE != 0)
            .dot_matches_new_line(flags & RE_DOTALL != 0)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| ScriptError::value_error(format!("re.error: {}", e)))?;
        if self.regex_cache.len() >= REGEX_CACHE_CAP {
            self.regex_cache.clear();
        }
        self.regex_cache.insert(key, re.clone());
        Ok(re)
    }

    fn regex_sub_with(&mut self, re: &Regex, text: &str, func: &Value, limit: usize) -> ScriptResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (n, caps) in re.captures_iter(text).enumerate() {
            if limit > 0 && n >= limit {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            let m = Value::Match(Rc::new(match_data(re, &caps, text)));
            let replacement = self.call1(func, m)?;
            out.push_str(&text[last..whole.start()]);
            out.push_str(replacement.as_str("re.sub() replacement")?);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

fn optional_int(v: Option<Value>, default: i64) -> ScriptResult<i64> {
    match v {
        Some(Value::None) | None => Ok(default),
        Some(v) => v.as_int("argument"),
    }
}

/// Match data with offsets converted from bytes to characters.
pub(super) fn match_data(re: &Regex, caps: &Captures, text: &str) -> MatchData {
    let char_offset = |byte: usize| text[..byte].chars().count();
    let whole = caps.get(0);
    let names: HashMap<String, usize> = re
        .capture_names()
        .enumerate()
        .filter_map(|(i, name)| name.map(|n| (n.to_string(), i)))
        .collect();
    MatchData {
        groups: (0..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
            .collect(),
        names,
        start: whole.map(|m| char_offset(m.start())).unwrap_or(0),
        end: whole.map(|m| char_offset(m.end())).unwrap_or(0),
    }
}

/// Rewrites a Python replacement template (`\1`, `\g<name>`) into the
/// `${1}` syntax of the regex crate.
pub(super) fn python_replacement(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                        if group.len() == 2 {
                            break;
                        }
                    }
                    let _ = write!(out, "${{{}}}", group);
                }
                Some('g') => {
                    chars.next();
                    let mut group = String::new();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        for g in chars.by_ref() {
                            if g == '>' {
                                break;
                            }
                            group.push(g);
                        }
                    }
                    let _ = write!(out, "${{{}}}", group);
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// Maps Python's `%f` (microseconds) onto chrono's fixed-width form.
fn chrono_format(fmt: &str) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => out.push_str("%6f"),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// `strftime` that reports bad directives instead of panicking inside
/// chrono's `Display`.
pub(super) fn strftime(dt: &NaiveDateTime, fmt: &str) -> ScriptResult<String> {
    let fmt = chrono_format(fmt);
    let items: Vec<Item> = StrftimeItems::new(&fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ScriptError::value_error(format!("Invalid format string: {}", repr_str(&fmt))));
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.into_iter()))
        .map_err(|_| ScriptError::value_error("Invalid format string"))?;
    Ok(out)
}

/// Parses with a Python format string; date-only formats land on midnight.
pub(super) fn strptime(text: &str, fmt: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, fmt)
        .ok()
        .or_else(|| NaiveDate::parse_from_str(text, fmt).ok()?.and_hms_opt(0, 0, 0))
}

struct DumpOptions {
    indent: Option<usize>,
    sort_keys: bool,
    ensure_ascii: bool,
}

/// Python `json.dumps` layout: `", "` and `": "` separators unless indented.
fn dump_json(v: &Value, opts: &DumpOptions, level: usize, out: &mut String) -> ScriptResult<()> {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = opts.indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if opts.indent.is_some() { "," } else { ", " };
    match v {
        Value::None => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => out.push_str(&crate::table::format_float(*f)),
        Value::Str(s) => push_json_str(s, opts.ensure_ascii, out),
        Value::List(_) | Value::Tuple(_) => {
            let items: Vec<Value> = match v {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.as_ref().clone(),
                _ => Vec::new(),
            };
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                dump_json(item, opts, level + 1, out)?;
            }
            newline(out, level);
            out.push(']');
        }
        Value::Dict(d) => {
            let mut entries: Vec<(String, Value)> = d
                .borrow()
                .entries()
                .iter()
                .map(|(k, v)| Ok((json_key(k)?, v.clone())))
                .collect::<ScriptResult<_>>()?;
            if opts.sort_keys {
                entries.sort_by(|a, b| a.0.cmp(&b.0));
            }
            if entries.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            out.push('{');
            for (i, (k, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                push_json_str(k, opts.ensure_ascii, out);
                out.push_str(": ");
                dump_json(item, opts, level + 1, out)?;
            }
            newline(out, level);
            out.push('}');
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn json_key(k: &Value) -> ScriptResult<String> {
    match k {
        Value::Str(s) => Ok(s.clone()),
        Value::None => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Int(_) | Value::Float(_) => Ok(k.py_repr()),
        other => Err(ScriptError::type_error(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

fn push_json_str(s: &str, ensure_ascii: bool, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (ensure_ascii && !c.is_ascii()) => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

pub(super) fn json_to_value(v: &serde_json::Value) -> ScriptResult<Value> {
    Ok(match v {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::list(items.iter().map(json_to_value).collect::<ScriptResult<_>>()?)
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (k, item) in map {
                dict.insert(Value::Str(k.clone()), json_to_value(item)?)?;
            }
            Value::dict(dict)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_replacement_template() {
        assert_eq!(python_replacement(r"\1-\2"), "${1}-${2}");
        assert_eq!(python_replacement(r"\g<year>/$"), "${year}/$$");
    }

    #[test]
    fn test_strftime_rejects_bad_directive() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(strftime(&dt, "%Y/%m/%d %H:%M").unwrap(), "2024/03/05 07:08");
        assert!(strftime(&dt, "%Q").is_err());
    }

    #[test]
    fn test_strptime_date_only_format() {
        let dt = strptime("2024-01-31", "%Y-%m-%d").unwrap();
        assert_eq!(crate::table::format_datetime(&dt), "2024-01-31 00:00:00");
        assert!(strptime("31/01/2024", "%Y-%m-%d").is_none());
    }

    #[test]
    fn test_dumps_matches_python_layout() {
        let mut d = Dict::new();
        d.insert(Value::str("a"), Value::Int(1)).unwrap();
        d.insert(Value::str("b"), Value::list(vec![Value::Bool(true), Value::None])).unwrap();
        let opts = DumpOptions {
            indent: None,
            sort_keys: false,
            ensure_ascii: true,
        };
        let mut out = String::new();
        dump_json(&Value::dict(d), &opts, 0, &mut out).unwrap();
        assert_eq!(out, r#"{"a": 1, "b": [true, null]}"#);
    }

    #[test]
    fn test_dumps_escapes_non_ascii() {
        let mut out = String::new();
        push_json_str("café", true, &mut out);
        assert_eq!(out, r#""caf\u00e9""#);
    }

    #[test]
    fn test_loads_nested() {
        let parsed: serde_json::Value = serde_json::from_str(r#"{"x": [1, 2.5, "s"]}"#).unwrap();
        let v = json_to_value(&parsed).unwrap();
        assert_eq!(v.py_repr(), "{'x': [1, 2.5, 's']}");
    }
}
