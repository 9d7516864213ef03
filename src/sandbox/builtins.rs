//! General builtins and the methods of plain Python values.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use chrono::{Datelike, NaiveDateTime, Timelike};

use super::ast::BinOp;
use super::capabilities::{Builtin, Module};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::interp::{normalize_index, Interpreter, SIZE_CHARGE_UNIT};
use super::ops::{check_size, format_value, MAX_SEQUENCE};
use super::value::*;

impl Interpreter {
    pub(super) fn call_builtin(&mut self, builtin: Builtin, mut args: CallArgs) -> ScriptResult<Value> {
        let name = builtin.name();
        let result = match builtin {
            Builtin::Print => {
                let sep = match args.kwarg("sep") {
                    Some(Value::None) | None => " ".to_string(),
                    Some(v) => v.as_str("sep")?.to_string(),
                };
                let end = match args.kwarg("end") {
                    Some(Value::None) | None => "\n".to_string(),
                    Some(v) => v.as_str("end")?.to_string(),
                };
                let parts: Vec<String> = args.rest(0).iter().map(Value::py_str).collect();
                args.finish(name)?;
                let mut line = parts.join(&sep);
                line.push_str(&end);
                self.print(&line);
                return Ok(Value::None);
            }
            Builtin::Len => {
                let v = args.required(0, "obj", name)?;
                let n = self.len_of(&v)?;
                Value::Int(i64::try_from(n).map_err(|_| {
                    ScriptError::value_error("len() of this object does not fit in an integer")
                })?)
            }
            Builtin::Str => match args.arg(0, "object") {
                Some(v) => Value::Str(v.py_str()),
                None => Value::str(""),
            },
            Builtin::Int => match args.arg(0, "x") {
                None => Value::Int(0),
                Some(v) => Value::Int(to_int(&v)?),
            },
            Builtin::Float => match args.arg(0, "x") {
                None => Value::Float(0.0),
                Some(v) => Value::Float(to_float(&v)?),
            },
            Builtin::Bool => match args.arg(0, "x") {
                None => Value::Bool(false),
                Some(v) => Value::Bool(v.truthy()?),
            },
            Builtin::List => match args.arg(0, "iterable") {
                None => Value::list(Vec::new()),
                Some(v) => Value::list(self.iter_values(&v)?),
            },
            Builtin::Tuple => match args.arg(0, "iterable") {
                None => Value::tuple(Vec::new()),
                Some(v) => Value::tuple(self.iter_values(&v)?),
            },
            Builtin::Set => match args.arg(0, "iterable") {
                None => Value::list(Vec::new()),
                Some(v) => {
                    let items = self.iter_values(&v)?;
                    Value::list(self.dedupe(items)?)
                }
            },
            Builtin::Dict => {
                let mut dict = Dict::new();
                if let Some(source) = args.arg(0, "mapping") {
                    self.extend_dict(&mut dict, &source)?;
                }
                for (k, v) in std::mem::take(&mut args).into_kwargs() {
                    dict.insert(Value::Str(k), v)?;
                }
                return Ok(Value::dict(dict));
            }
            Builtin::Range => {
                let first = args.required(0, "stop", name)?.as_int("range() argument")?;
                let second = args.arg(1, "stop");
                let step = match args.arg(2, "step") {
                    Some(v) => v.as_int("range() argument")?,
                    None => 1,
                };
                if step == 0 {
                    return Err(ScriptError::value_error("range() arg 3 must not be zero"));
                }
                let (start, stop) = match second {
                    Some(v) => (first, v.as_int("range() argument")?),
                    None => (0, first),
                };
                Value::Range { start, stop, step }
            }
            Builtin::Enumerate => {
                let items = args.required(0, "iterable", name)?;
                let start = match args.arg(1, "start") {
                    Some(v) => v.as_int("start")?,
                    None => 0,
                };
                let items = self.iter_values(&items)?;
                Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                        .collect(),
                )
            }
            Builtin::Zip => {
                let sources = args.rest(0);
                let mut columns = Vec::with_capacity(sources.len());
                for s in &sources {
                    columns.push(self.iter_values(s)?);
                }
                let n = columns.iter().map(Vec::len).min().unwrap_or(0);
                Value::list(
                    (0..n)
                        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                        .collect(),
                )
            }
            Builtin::Map => {
                let func = args.required(0, "function", name)?;
                let sources = args.rest(1);
                let mut columns = Vec::with_capacity(sources.len());
                for s in &sources {
                    columns.push(self.iter_values(s)?);
                }
                let n = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(n);
                for i in 0..n {
                    let call_args = columns.iter().map(|c| c[i].clone()).collect();
                    out.push(self.call_value(&func, CallArgs::new(call_args, Vec::new()))?);
                }
                Value::list(out)
            }
            Builtin::Filter => {
                let func = args.required(0, "function", name)?;
                let items = args.required(1, "iterable", name)?;
                let mut out = Vec::new();
                for item in self.iter_values(&items)? {
                    let keep = match &func {
                        Value::None => item.truthy()?,
                        f => self.call1(f, item.clone())?.truthy()?,
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Value::list(out)
            }
            Builtin::Sorted => {
                let items = args.required(0, "iterable", name)?;
                let key = args.kwarg("key");
                let reverse = match args.kwarg("reverse") {
                    Some(v) => v.truthy()?,
                    None => false,
                };
                args.finish(name)?;
                let items = self.iter_values(&items)?;
                return Ok(Value::list(self.sort_values_by(items, key.as_ref(), reverse)?));
            }
            Builtin::Reversed => {
                let items = args.required(0, "sequence", name)?;
                let mut items = self.iter_values(&items)?;
                items.reverse();
                Value::list(items)
            }
            Builtin::Sum => {
                let items = args.required(0, "iterable", name)?;
                let mut total = args.arg(1, "start").unwrap_or(Value::Int(0));
                for item in self.iter_values(&items)? {
                    total = self.binary(BinOp::Add, &total, &item)?;
                }
                total
            }
            Builtin::Min | Builtin::Max => {
                let key = args.kwarg("key");
                let default = args.kwarg("default");
                let positional = args.rest(0);
                args.finish(name)?;
                let items = match positional.len() {
                    0 => {
                        return Err(ScriptError::type_error(format!(
                            "{} expected at least 1 argument, got 0",
                            name
                        )))
                    }
                    1 => self.iter_values(&positional[0])?,
                    _ => positional,
                };
                if items.is_empty() {
                    return default.ok_or_else(|| {
                        ScriptError::value_error(format!("{}() arg is an empty sequence", name))
                    });
                }
                let want = if builtin == Builtin::Min { Ordering::Less } else { Ordering::Greater };
                let mut best: Option<(Value, Value)> = None;
                for item in items {
                    let k = match &key {
                        Some(Value::None) | None => item.clone(),
                        Some(f) => self.call1(f, item.clone())?,
                    };
                    let replace = match &best {
                        None => true,
                        Some((best_key, _)) => py_cmp(&k, best_key)? == want,
                    };
                    if replace {
                        best = Some((k, item));
                    }
                }
                return Ok(best.map(|(_, v)| v).unwrap_or(Value::None));
            }
            Builtin::Abs => match args.required(0, "x", name)? {
                Value::Int(i) => Value::Int(i.checked_abs().unwrap_or(i64::MAX)),
                Value::Bool(b) => Value::Int(b as i64),
                Value::Float(f) => Value::Float(f.abs()),
                Value::Series(col) => {
                    args.finish(name)?;
                    return self.series_method(&col, "abs", CallArgs::default());
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    )))
                }
            },
            Builtin::Round => {
                let x = args.required(0, "number", name)?;
                let digits = match args.arg(1, "ndigits") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_int("ndigits")?),
                };
                if let Value::Series(col) = &x {
                    args.finish(name)?;
                    let call = CallArgs::new(digits.map(Value::Int).into_iter().collect(), Vec::new());
                    return self.series_method(col, "round", call);
                }
                round_value(&x, digits)?
            }
            Builtin::Any | Builtin::All => {
                let items = args.required(0, "iterable", name)?;
                let want_all = builtin == Builtin::All;
                let mut result = want_all;
                for item in self.iter_values(&items)? {
                    if item.truthy()? != want_all {
                        result = !want_all;
                        break;
                    }
                }
                Value::Bool(result)
            }
            Builtin::Isinstance => {
                let obj = args.required(0, "obj", name)?;
                let class = args.required(1, "class_or_tuple", name)?;
                Value::Bool(is_instance(&obj, &class)?)
            }
            _ => return self.call_module_fn(builtin, args),
        };
        args.finish(name)?;
        Ok(result)
    }

    pub(super) fn len_of(&self, v: &Value) -> ScriptResult<usize> {
        Ok(match v {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(d) => d.borrow().len(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step),
            Value::Table(t) => t.borrow().num_rows(),
            Value::Series(col) => col.len(),
            Value::GroupBy(gb) => super::groupby::group_rows(&gb.table, &gb.keys)?.len(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                )))
            }
        })
    }

    fn extend_dict(&mut self, dict: &mut Dict, source: &Value) -> ScriptResult<()> {
        if let Value::Dict(other) = source {
            let entries = other.borrow().entries().to_vec();
            for (k, v) in entries {
                dict.insert(k, v)?;
            }
            return Ok(());
        }
        for pair in self.iter_values(source)? {
            let kv = self.iter_values(&pair)?;
            if kv.len() != 2 {
                return Err(ScriptError::value_error(format!(
                    "dictionary update sequence element has length {}; 2 is required",
                    kv.len()
                )));
            }
            let mut kv = kv.into_iter();
            if let (Some(k), Some(v)) = (kv.next(), kv.next()) {
                dict.insert(k, v)?;
            }
        }
        Ok(())
    }

    /// Stable sort with an optional key callable; comparison faults surface
    /// as errors instead of a silently partial order.
    pub(super) fn sort_values_by(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> ScriptResult<Vec<Value>> {
        let keys = match key {
            Some(Value::None) | None => items.clone(),
            Some(f) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call1(f, item.clone())?);
                }
                keys
            }
        };
        self.charge(items.len())?;
        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure: Option<ScriptError> = None;
        order.sort_by(|&a, &b| match py_cmp(&keys[a], &keys[b]) {
            Ok(ord) if reverse => ord.reverse(),
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    // ===== str =====

    pub(super) fn str_method(&mut self, s: &str, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let result = match name {
            "strip" | "lstrip" | "rstrip" => {
                let chars = match args.arg(0, "chars") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_str("chars")?.to_string()),
                };
                Value::Str(strip_with(s, name, chars.as_deref()))
            }
            "lower" => Value::Str(s.to_lowercase()),
            "upper" => Value::Str(s.to_uppercase()),
            "title" => Value::Str(title_case(s)),
            "capitalize" => {
                let mut chars = s.chars();
                Value::Str(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                })
            }
            "replace" => {
                let old = args.required(0, "old", name)?;
                let new = args.required(1, "new", name)?;
                let count = match args.arg(2, "count") {
                    Some(v) => v.as_int("count")?,
                    None => -1,
                };
                let (old, new) = (old.as_str("old")?, new.as_str("new")?);
                let replaced = if count < 0 {
                    s.replace(old, new)
                } else {
                    s.replacen(old, new, count as usize)
                };
                if replaced.len() > MAX_SEQUENCE {
                    return Err(ScriptError::value_error("resulting string is too large"));
                }
                Value::Str(replaced)
            }
            "split" => {
                let sep = match args.arg(0, "sep") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_str("sep")?.to_string()),
                };
                let maxsplit = match args.arg(1, "maxsplit") {
                    Some(v) => v.as_int("maxsplit")?,
                    None => -1,
                };
                Value::list(
                    split_str(s, sep.as_deref(), maxsplit)?
                        .into_iter()
                        .map(Value::Str)
                        .collect(),
                )
            }
            "join" => {
                let items = args.required(0, "iterable", name)?;
                let parts = self
                    .iter_values(&items)?
                    .into_iter()
                    .map(|v| match v {
                        Value::Str(p) => Ok(p),
                        other => Err(ScriptError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        ))),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;
                let total = parts.iter().map(String::len).sum::<usize>()
                    + s.len() * parts.len().saturating_sub(1);
                check_size(total, "joined string")?;
                let out = Value::Str(parts.join(s));
                self.charge_size(&out)?;
                out
            }
            "startswith" | "endswith" => {
                let affix = args.required(0, "prefix", name)?;
                let candidates = match &affix {
                    Value::Tuple(items) => items.iter().map(Value::py_str).collect(),
                    other => vec![other.as_str("prefix")?.to_string()],
                };
                let hit = candidates.iter().any(|c| {
                    if name == "startswith" {
                        s.starts_with(c.as_str())
                    } else {
                        s.ends_with(c.as_str())
                    }
                });
                Value::Bool(hit)
            }
            "find" => {
                let needle = args.required(0, "sub", name)?;
                let needle = needle.as_str("sub")?;
                Value::Int(match s.find(needle) {
                    Some(byte) => s[..byte].chars().count() as i64,
                    None => -1,
                })
            }
            "count" => {
                let needle = args.required(0, "sub", name)?;
                Value::Int(s.matches(needle.as_str("sub")?).count() as i64)
            }
            "isdigit" | "isnumeric" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_numeric())),
            "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
            "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
            "zfill" => {
                let width = args.required(0, "width", name)?.as_int("width")?.max(0) as usize;
                let len = s.chars().count();
                if len >= width {
                    Value::str(s)
                } else {
                    let (sign, digits) = match s.strip_prefix(['-', '+']) {
                        Some(rest) => (&s[..1], rest),
                        None => ("", s),
                    };
                    Value::Str(format!("{}{}{}", sign, "0".repeat(width - len), digits))
                }
            }
            "format" => {
                let positional = args.rest(0);
                let named = std::mem::take(&mut args).into_kwargs();
                return Ok(Value::Str(str_format(s, &positional, &named)?));
            }
            _ => return Err(ScriptError::attribute_error("str", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    // ===== list / tuple / dict =====

    pub(super) fn list_method(
        &mut self,
        items: &Rc<RefCell<Vec<Value>>>,
        name: &str,
        mut args: CallArgs,
    ) -> ScriptResult<Value> {
        let result = match name {
            "append" => {
                let v = args.required(0, "object", name)?;
                self.charge_size(&v)?;
                items.borrow_mut().push(v);
                Value::None
            }
            "extend" => {
                let source = args.required(0, "iterable", name)?;
                let extra = self.iter_values(&source)?;
                let added = seq_weight(&extra);
                check_size(seq_weight(&items.borrow()) + added, "list")?;
                self.charge(added / SIZE_CHARGE_UNIT)?;
                items.borrow_mut().extend(extra);
                Value::None
            }
            "pop" => {
                let mut list = items.borrow_mut();
                let n = list.len();
                let index = match args.arg(0, "index") {
                    Some(v) => v.as_int("index")?,
                    None => -1,
                };
                let i = normalize_index(index, n)
                    .ok_or_else(|| ScriptError::index_error("pop index out of range"))?;
                list.remove(i)
            }
            "insert" => {
                let index = args.required(0, "index", name)?.as_int("index")?;
                let v = args.required(1, "object", name)?;
                self.charge_size(&v)?;
                let mut list = items.borrow_mut();
                let n = list.len() as i64;
                let pos = if index < 0 { (index + n).max(0) } else { index.min(n) };
                list.insert(pos as usize, v);
                Value::None
            }
            "remove" => {
                let v = args.required(0, "value", name)?;
                let mut list = items.borrow_mut();
                let pos = list
                    .iter()
                    .position(|x| py_eq(x, &v))
                    .ok_or_else(|| ScriptError::value_error("list.remove(x): x not in list"))?;
                list.remove(pos);
                Value::None
            }
            "index" | "count" => {
                let snapshot = items.borrow().clone();
                return self.tuple_method(&Rc::new(snapshot), name, args);
            }
            "sort" => {
                let key = args.kwarg("key");
                let reverse = match args.kwarg("reverse") {
                    Some(v) => v.truthy()?,
                    None => false,
                };
                let snapshot = items.borrow().clone();
                let sorted = self.sort_values_by(snapshot, key.as_ref(), reverse)?;
                *items.borrow_mut() = sorted;
                Value::None
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Value::None
            }
            "copy" | "tolist" => Value::list(items.borrow().clone()),
            "clear" => {
                items.borrow_mut().clear();
                Value::None
            }
            _ => return Err(ScriptError::attribute_error("list", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    pub(super) fn tuple_method(&mut self, items: &Rc<Vec<Value>>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let v = args.required(0, "value", name)?;
        args.finish(name)?;
        match name {
            "index" => items
                .iter()
                .position(|x| py_eq(x, &v))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ScriptError::value_error(format!("{} is not in list", v.py_repr()))),
            "count" => Ok(Value::Int(items.iter().filter(|x| py_eq(x, &v)).count() as i64)),
            _ => Err(ScriptError::attribute_error("tuple", name)),
        }
    }

    pub(super) fn dict_method(&mut self, dict: &Rc<RefCell<Dict>>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let result = match name {
            "get" => {
                let key = args.required(0, "key", name)?;
                let default = args.arg(1, "default").unwrap_or(Value::None);
                let found = dict.borrow().get(&key)?;
                found.unwrap_or(default)
            }
            "keys" => Value::list(dict.borrow().keys()),
            "values" => Value::list(dict.borrow().values()),
            "items" => Value::list(
                dict.borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            "pop" => {
                let key = args.required(0, "key", name)?;
                let default = args.arg(1, "default");
                let removed = dict.borrow_mut().remove(&key)?;
                match (removed, default) {
                    (Some(v), _) => v,
                    (None, Some(d)) => d,
                    (None, None) => return Err(ScriptError::key_error(&key.py_str())),
                }
            }
            "update" => {
                let mut updated = dict.borrow().clone();
                if let Some(source) = args.arg(0, "other") {
                    self.extend_dict(&mut updated, &source)?;
                }
                for (k, v) in std::mem::take(&mut args).into_kwargs() {
                    updated.insert(Value::Str(k), v)?;
                }
                *dict.borrow_mut() = updated;
                return Ok(Value::None);
            }
            "copy" => Value::dict(dict.borrow().clone()),
            "setdefault" => {
                let key = args.required(0, "key", name)?;
                let default = args.arg(1, "default").unwrap_or(Value::None);
                let existing = dict.borrow().get(&key)?;
                match existing {
                    Some(v) => v,
                    None => {
                        dict.borrow_mut().insert(key, default.clone())?;
                        default
                    }
                }
            }
            _ => return Err(ScriptError::attribute_error("dict", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    // ===== datetime values =====

    pub(super) fn datetime_method(&mut self, dt: NaiveDateTime, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let result = match name {
            "strftime" => {
                let fmt = args.required(0, "format", name)?;
                Value::Str(super::modules::strftime(&dt, fmt.as_str("format")?)?)
            }
            "isoformat" => Value::Str(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            "date" => Value::DateTime(dt.date().and_hms_opt(0, 0, 0).unwrap_or(dt)),
            "weekday" => Value::Int(dt.weekday().num_days_from_monday() as i64),
            "replace" => {
                let mut field = |key: &str, current: i64| -> ScriptResult<i64> {
                    match args.kwarg(key) {
                        Some(v) => v.as_int(key),
                        None => Ok(current),
                    }
                };
                let year = field("year", dt.year() as i64)?;
                let month = field("month", dt.month() as i64)?;
                let day = field("day", dt.day() as i64)?;
                let hour = field("hour", dt.hour() as i64)?;
                let minute = field("minute", dt.minute() as i64)?;
                let second = field("second", dt.second() as i64)?;
                Value::DateTime(build_datetime(year, month, day, hour, minute, second)?)
            }
            _ => return Err(ScriptError::attribute_error("datetime", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    /// `datetime(year, month, day, hour=0, minute=0, second=0)`
    pub(super) fn datetime_new(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let mut part = |i: usize, key: &str, required: bool| -> ScriptResult<i64> {
            match args.arg(i, key) {
                Some(v) => v.as_int(key),
                None if required => Err(ScriptError::type_error(format!(
                    "datetime() missing required argument: '{}'",
                    key
                ))),
                None => Ok(0),
            }
        };
        let year = part(0, "year", true)?;
        let month = part(1, "month", true)?;
        let day = part(2, "day", true)?;
        let hour = part(3, "hour", false)?;
        let minute = part(4, "minute", false)?;
        let second = part(5, "second", false)?;
        args.finish("datetime")?;
        Ok(Value::DateTime(build_datetime(year, month, day, hour, minute, second)?))
    }

    // ===== regex matches =====

    pub(super) fn match_method(&mut self, m: &MatchData, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let result = match name {
            "group" => {
                let wanted = args.rest(0);
                match wanted.len() {
                    0 => match_group(m, &Value::Int(0))?,
                    1 => match_group(m, &wanted[0])?,
                    _ => Value::tuple(
                        wanted
                            .iter()
                            .map(|w| match_group(m, w))
                            .collect::<ScriptResult<Vec<_>>>()?,
                    ),
                }
            }
            "groups" => Value::tuple(
                m.groups
                    .iter()
                    .skip(1)
                    .map(|g| g.clone().map(Value::Str).unwrap_or(Value::None))
                    .collect(),
            ),
            "groupdict" => {
                let mut names: Vec<(&String, &usize)> = m.names.iter().collect();
                names.sort_by_key(|(_, i)| **i);
                let mut dict = Dict::new();
                for (name, &i) in names {
                    let v = m.groups.get(i).cloned().flatten().map(Value::Str).unwrap_or(Value::None);
                    dict.insert(Value::Str(name.clone()), v)?;
                }
                Value::dict(dict)
            }
            "start" => Value::Int(m.start as i64),
            "end" => Value::Int(m.end as i64),
            "span" => Value::tuple(vec![Value::Int(m.start as i64), Value::Int(m.end as i64)]),
            _ => return Err(ScriptError::attribute_error("re.Match", name)),
        };
        args.finish(name)?;
        Ok(result)
    }
}

pub(super) fn match_group(m: &MatchData, index: &Value) -> ScriptResult<Value> {
    let i = match index {
        Value::Str(name) => *m
            .names
            .get(name)
            .ok_or_else(|| ScriptError::index_error("no such group"))?,
        other => other.as_int("group index")? as usize,
    };
    match m.groups.get(i) {
        Some(Some(text)) => Ok(Value::Str(text.clone())),
        Some(None) => Ok(Value::None),
        None => Err(ScriptError::index_error("no such group")),
    }
}

pub(super) fn build_datetime(
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
) -> ScriptResult<NaiveDateTime> {
    let to_u32 = |v: i64| u32::try_from(v).ok();
    let date = i32::try_from(year).ok().and_then(|y| {
        chrono::NaiveDate::from_ymd_opt(y, to_u32(month)?, to_u32(day)?)
    });
    date.and_then(|d| d.and_hms_opt(to_u32(hour)?, to_u32(minute)?, to_u32(second)?))
        .ok_or_else(|| ScriptError::value_error("date value out of range"))
}

fn to_int(v: &Value) -> ScriptResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) if f.is_nan() => Err(ScriptError::value_error("cannot convert float NaN to integer")),
        Value::Float(f) if f.is_infinite() => {
            Err(ScriptError::new(ErrorKind::Value, "cannot convert float infinity to integer"))
        }
        Value::Float(f) => Ok(f.trunc() as i64),
        Value::Str(s) => s.trim().replace('_', "").parse::<i64>().map_err(|_| {
            ScriptError::value_error(format!("invalid literal for int() with base 10: {}", repr_str(s)))
        }),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(v: &Value) -> ScriptResult<f64> {
    match v {
        Value::Str(s) => {
            let t = s.trim().to_ascii_lowercase();
            match t.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" | "infinity" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                _ => t.parse::<f64>().map_err(|_| {
                    ScriptError::value_error(format!("could not convert string to float: {}", repr_str(s)))
                }),
            }
        }
        Value::None => Err(ScriptError::type_error(
            "float() argument must be a string or a number, not 'NoneType'",
        )),
        other => other.as_f64("float() argument"),
    }
}

/// Python `round`: ties go to the even neighbour.
pub(super) fn round_value(x: &Value, digits: Option<i64>) -> ScriptResult<Value> {
    match (x, digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (Value::Bool(b), _) => Ok(Value::Int(*b as i64)),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(ScriptError::value_error("cannot convert float to integer"));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_float(*f, n))),
        (Value::None, _) => Err(ScriptError::type_error("type NoneType doesn't define __round__ method")),
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

pub(super) fn round_float(f: f64, digits: i64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    let factor = 10f64.powi(digits.clamp(-300, 300) as i32);
    let scaled = f * factor;
    if !scaled.is_finite() {
        return f;
    }
    scaled.round_ties_even() / factor
}

fn is_instance(obj: &Value, class: &Value) -> ScriptResult<bool> {
    if let Value::Tuple(classes) = class {
        for c in classes.iter() {
            if is_instance(obj, c)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(match class {
        Value::Builtin(Builtin::Str) => matches!(obj, Value::Str(_)),
        Value::Builtin(Builtin::Int) => matches!(obj, Value::Int(_) | Value::Bool(_)),
        Value::Builtin(Builtin::Float) => matches!(obj, Value::Float(_)),
        Value::Builtin(Builtin::Bool) => matches!(obj, Value::Bool(_)),
        Value::Builtin(Builtin::List) => matches!(obj, Value::List(_)),
        Value::Builtin(Builtin::Tuple) => matches!(obj, Value::Tuple(_)),
        Value::Builtin(Builtin::Dict) => matches!(obj, Value::Dict(_)),
        Value::Builtin(Builtin::PdDataFrame) => matches!(obj, Value::Table(_)),
        Value::Builtin(Builtin::PdSeries) => matches!(obj, Value::Series(_)),
        Value::Module(Module::Datetime) => matches!(obj, Value::DateTime(_)),
        other => {
            return Err(ScriptError::type_error(format!(
                "isinstance() arg 2 must be a type or tuple of types, not {}",
                other.type_name()
            )))
        }
    })
}

fn strip_with(s: &str, mode: &str, chars: Option<&str>) -> String {
    let pred = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    match mode {
        "lstrip" => s.trim_start_matches(pred).to_string(),
        "rstrip" => s.trim_end_matches(pred).to_string(),
        _ => s.trim_matches(pred).to_string(),
    }
}

pub(super) fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

pub(super) fn split_str(s: &str, sep: Option<&str>, maxsplit: i64) -> ScriptResult<Vec<String>> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
    match sep {
        Some("") => Err(ScriptError::value_error("empty separator")),
        Some(sep) => Ok(s.splitn(limit, sep).map(str::to_string).collect()),
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if parts.len() + 1 == limit {
                    parts.push(rest.trim_end().to_string());
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            Ok(parts)
        }
    }
}

/// `str.format` with `{}`, `{0}`, `{name}` and `{:spec}` fields.
fn str_format(template: &str, positional: &[Value], named: &[(String, Value)]) -> ScriptResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto = 0usize;
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
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for f in chars.by_ref() {
                    if f == '}' {
                        closed = true;
                        break;
                    }
                    field.push(f);
                }
                if !closed {
                    return Err(ScriptError::value_error("Single '{' encountered in format string"));
                }
                let (key, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if key.is_empty() {
                    auto += 1;
                    positional.get(auto - 1)
                } else if let Ok(i) = key.parse::<usize>() {
                    positional.get(i)
                } else {
                    named.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::index_error(format!("Replacement index {} out of range", key))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_variants() {
        assert_eq!(split_str("  a  b c ", None, -1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split_str("a,b,,c", Some(","), -1).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split_str("a b c", None, 1).unwrap(), vec!["a", "b c"]);
        assert!(split_str("a", Some(""), -1).is_err());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hello wORLD-x"), "Hello World-X");
    }

    #[test]
    fn test_round_half_even() {
        assert!(matches!(round_value(&Value::Float(2.5), None), Ok(Value::Int(2))));
        assert!(matches!(round_value(&Value::Float(3.5), None), Ok(Value::Int(4))));
        assert_eq!(round_float(1.2345, 2), 1.23);
    }

    #[test]
    fn test_str_format() {
        let out = str_format(
            "{} has {n} rows ({:.1f}%)",
            &[Value::str("sales"), Value::Float(12.345)],
            &[("n".to_string(), Value::Int(3))],
        )
        .unwrap();
        assert_eq!(out, "sales has 3 rows (12.3%)");
    }

    #[test]
    fn test_int_conversion_errors() {
        let err = to_int(&Value::str("abc")).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: invalid literal for int() with base 10: 'abc'");
        assert_eq!(to_int(&Value::str(" 42 ")).unwrap(), 42);
        assert_eq!(to_int(&Value::Float(-2.7)).unwrap(), -2);
    }
}
