//! Runtime values of the transformation language.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::NaiveDateTime;

use super::ast::{Expr, Stmt};
use super::capabilities::{Builtin, Module};
use super::error::{ScriptError, ScriptResult};
use crate::table::{format_datetime, format_float, Cell, CellKey, Column, Table};

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
    Table(Rc<RefCell<Table>>),
    Series(Rc<Column>),
    Indexer(Rc<Indexer>),
    GroupBy(Rc<GroupBy>),
    StrAccessor(Rc<Column>),
    DtAccessor(Rc<Column>),
    Match(Rc<MatchData>),
    Module(Module),
    Builtin(Builtin),
    Function(Rc<Function>),
    Method(Rc<BoundMethod>),
}

/// `df.loc` / `df.iloc` handle; shares the table with the frame it came from.
/// A series indexer wraps its column in a one-column table.
#[derive(Debug)]
pub struct Indexer {
    pub table: Rc<RefCell<Table>>,
    pub positional: bool,
    pub series: bool,
}

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub table: Table,
    pub keys: Vec<String>,
    pub selection: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct MatchData {
    pub groups: Vec<Option<String>>,
    pub names: HashMap<String, usize>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub enum FunctionBody {
    Block(Rc<Vec<Stmt>>),
    Lambda(Rc<Expr>),
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub closure: Option<Rc<Scope>>,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// A function-local variable frame. Nested functions and lambdas keep the
/// frame they were created in as their parent.
#[derive(Debug, Default)]
pub struct Scope {
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn child(parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Scalar(CellKey),
    Tuple(Vec<HashKey>),
}

/// Insertion-ordered dictionary keyed by hashable values.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> ScriptResult<Self> {
        let mut dict = Dict::new();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        Ok(dict)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> ScriptResult<Option<Value>> {
        let hk = key.hash_key()?;
        Ok(self.index.get(&hk).map(|&i| self.entries[i].1.clone()))
    }

    pub fn get_str(&self, key: &str) -> Option<Value> {
        let hk = HashKey::Scalar(CellKey::Text(key.to_string()));
        self.index.get(&hk).map(|&i| self.entries[i].1.clone())
    }

    pub fn contains(&self, key: &Value) -> ScriptResult<bool> {
        Ok(self.index.contains_key(&key.hash_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> ScriptResult<()> {
        let hk = key.hash_key()?;
        match self.index.get(&hk) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> ScriptResult<Option<Value>> {
        let hk = key.hash_key()?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn table(table: Table) -> Value {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn series(column: Column) -> Value {
        Value::Series(Rc::new(column))
    }

    /// Rough size used for allocation limits: string bytes, plus one level of
    /// container items.
    pub fn weight(&self) -> usize {
        match self {
            Value::List(items) => seq_weight(&items.borrow()),
            Value::Tuple(items) => seq_weight(items),
            Value::Str(s) => s.len().max(1),
            _ => 1,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Slice { .. } => "slice",
            Value::Table(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::Indexer(ix) if ix.positional => "_iLocIndexer",
            Value::Indexer(_) => "_LocIndexer",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::StrAccessor(_) => "StringMethods",
            Value::DtAccessor(_) => "DatetimeProperties",
            Value::Match(_) => "re.Match",
            Value::Module(_) => "module",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Function(_) => "function",
            Value::Method(_) => "method",
        }
    }

    pub fn truthy(&self) -> ScriptResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Value::Table(_) => {
                return Err(ScriptError::value_error(
                    "The truth value of a DataFrame is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                ))
            }
            Value::Series(_) => {
                return Err(ScriptError::value_error(
                    "The truth value of a Series is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                ))
            }
            _ => true,
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Missing in the table sense: `None` or a NaN float.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::None => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn numeric(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn from_cell(cell: &Cell) -> Value {
        match cell {
            Cell::Null => Value::None,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::Int(*i),
            Cell::Float(f) => Value::Float(*f),
            Cell::Text(s) => Value::Str(s.clone()),
            Cell::DateTime(dt) => Value::DateTime(*dt),
        }
    }

    /// Scalar values map onto cells directly; containers are stored as their
    /// printed form.
    pub fn to_cell(&self) -> Cell {
        match self {
            Value::None => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Int(i) => Cell::Int(*i),
            Value::Float(f) => Cell::Float(*f),
            Value::Str(s) => Cell::Text(s.clone()),
            Value::DateTime(dt) => Cell::DateTime(*dt),
            other => Cell::Text(other.py_str()),
        }
    }

    pub fn hash_key(&self) -> ScriptResult<HashKey> {
        match self {
            Value::Bool(b) => Ok(HashKey::Scalar(CellKey::Int(*b as i64))),
            Value::None | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::DateTime(_) => {
                Ok(HashKey::Scalar(self.to_cell().key()))
            }
            Value::Tuple(items) => Ok(HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<ScriptResult<Vec<_>>>()?,
            )),
            other => Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_int(&self, what: &str) -> ScriptResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            other => Err(ScriptError::type_error(format!(
                "{} must be an integer, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    pub fn as_f64(&self, what: &str) -> ScriptResult<f64> {
        self.numeric().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} must be a number, not '{}'",
                what,
                self.type_name()
            ))
        })
    }

    pub fn as_str(&self, what: &str) -> ScriptResult<&str> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(ScriptError::type_error(format!(
                "{} must be str, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// A single name or a list/tuple of names.
    pub fn string_list(&self, what: &str) -> ScriptResult<Vec<String>> {
        match self {
            Value::Str(s) => Ok(vec![s.clone()]),
            Value::List(items) => items
                .borrow()
                .iter()
                .map(|v| v.as_str(what).map(str::to_string))
                .collect(),
            Value::Tuple(items) => items
                .iter()
                .map(|v| v.as_str(what).map(str::to_string))
                .collect(),
            Value::Series(col) => Ok(col
                .values
                .iter()
                .filter_map(Cell::as_text)
                .collect()),
            other => Err(ScriptError::type_error(format!(
                "{} must be a column name or list of names, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// `str(value)`
    pub fn py_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::DateTime(dt) => format_datetime(dt),
            Value::Table(t) => t.borrow().to_string(),
            Value::Series(c) => c.to_string(),
            _ => self.py_repr(),
        }
    }

    /// `repr(value)`
    pub fn py_repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => repr_str(s),
            Value::DateTime(dt) => format!("Timestamp('{}')", format_datetime(dt)),
            Value::List(items) => format!("[{}]", join_repr(items.borrow().iter())),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].py_repr()),
            Value::Tuple(items) => format!("({})", join_repr(items.iter())),
            Value::Dict(d) => {
                let body: Vec<String> = d
                    .borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.py_repr(), v.py_repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            Value::Range { start, stop, step } if *step == 1 => format!("range({}, {})", start, stop),
            Value::Range { start, stop, step } => format!("range({}, {}, {})", start, stop, step),
            Value::Slice { lower, upper, step } => {
                let show = |v: &Option<i64>| v.map(|i| i.to_string()).unwrap_or_else(|| "None".into());
                format!("slice({}, {}, {})", show(lower), show(upper), show(step))
            }
            Value::Table(t) => t.borrow().to_string(),
            Value::Series(c) => c.to_string(),
            Value::Match(m) => format!(
                "<re.Match object; span=({}, {}), match={}>",
                m.start,
                m.end,
                repr_str(m.groups.first().cloned().flatten().as_deref().unwrap_or(""))
            ),
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Method(m) => format!("<bound method {} of {}>", m.name, m.receiver.type_name()),
            other => format!("<{} object>", other.type_name()),
        }
    }
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::py_repr).collect::<Vec<_>>().join(", ")
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
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

/// Combined string bytes of `items`, counting every non-string item as one.
pub fn seq_weight(items: &[Value]) -> usize {
    items
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.len().max(1),
            _ => 1,
        })
        .sum()
}

/// Number of items in `range(start, stop, step)`, saturating at `usize::MAX`.
pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let n = if step > 0 && stop > start {
        (stop - start - 1) / step + 1
    } else if step < 0 && stop < start {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// The `i`-th item of a range; `i` must be below `range_len`.
pub fn range_item(start: i64, step: i64, i: usize) -> i64 {
    (i128::from(start) + i128::from(step) * i as i128) as i64
}

/// `==` between two values.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.numeric(), b.numeric()) {
        return x == y;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::List(x), Value::List(y)) => seq_eq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.entries().iter().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if py_eq(v, &other))
                })
        }
        (Value::Table(x), Value::Table(y)) => Rc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn py_cmp(a: &Value, b: &Value) -> ScriptResult<Ordering> {
    if let (Some(x), Some(y)) = (a.numeric(), b.numeric()) {
        return Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => Err(ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> ScriptResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        let ord = py_cmp(x, y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Positional and keyword arguments of one call. Parameters are claimed by
/// position or name; whatever is left over is reported by [`CallArgs::finish`].
#[derive(Debug, Default)]
pub struct CallArgs {
    positional: Vec<Option<Value>>,
    kwargs: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            positional: positional.into_iter().map(Some).collect(),
            kwargs,
        }
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    pub fn arg(&mut self, index: usize, name: &str) -> Option<Value> {
        if let Some(slot) = self.positional.get_mut(index) {
            if let Some(v) = slot.take() {
                return Some(v);
            }
        }
        self.kwarg(name)
    }

    pub fn kwarg(&mut self, name: &str) -> Option<Value> {
        let pos = self.kwargs.iter().position(|(k, _)| k == name)?;
        Some(self.kwargs.remove(pos).1)
    }

    pub fn required(&mut self, index: usize, name: &str, func: &str) -> ScriptResult<Value> {
        self.arg(index, name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() missing required argument: '{}'",
                func, name
            ))
        })
    }

    /// Remaining positional values from `start` on.
    pub fn rest(&mut self, start: usize) -> Vec<Value> {
        self.positional
            .iter_mut()
            .skip(start)
            .filter_map(Option::take)
            .collect()
    }

    /// Keyword arguments not yet claimed, in call order.
    pub fn into_kwargs(self) -> Vec<(String, Value)> {
        self.kwargs
    }

    pub fn finish(self, func: &str) -> ScriptResult<()> {
        let extra = self.positional.iter().filter(|v| v.is_some()).count();
        if extra > 0 {
            return Err(ScriptError::type_error(format!(
                "{}() got {} unexpected positional argument{}",
                func,
                extra,
                if extra == 1 { "" } else { "s" }
            )));
        }
        if let Some((name, _)) = self.kwargs.first() {
            return Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len_at_integer_bounds() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -3), 4);
        assert_eq!(range_len(5, 5, 1), 0);
        assert_eq!(range_len(i64::MIN, i64::MAX, 1), u64::MAX as usize);
        assert_eq!(range_len(i64::MAX, i64::MIN, -1), u64::MAX as usize);
        assert_eq!(range_len(i64::MAX - 1, i64::MAX, 5), 1);
        assert_eq!(range_item(i64::MIN, 1, u64::MAX as usize - 1), i64::MAX - 1);
    }

    #[test]
    fn test_weight_counts_string_bytes() {
        assert_eq!(Value::str("abc").weight(), 3);
        assert_eq!(Value::Int(7).weight(), 1);
        let list = Value::list(vec![Value::str("ab"), Value::Int(1), Value::list(vec![])]);
        assert_eq!(list.weight(), 4);
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::str("1"), &Value::Int(1)));
    }

    #[test]
    fn test_repr_of_containers() {
        let v = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(v.py_repr(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).py_repr(), "(1,)");
        assert_eq!(Value::Float(2.0).py_str(), "2.0");
    }

    #[test]
    fn test_dict_preserves_insertion_order_and_removal() {
        let mut d = Dict::new();
        d.insert(Value::str("b"), Value::Int(1)).unwrap();
        d.insert(Value::str("a"), Value::Int(2)).unwrap();
        d.insert(Value::str("c"), Value::Int(3)).unwrap();
        d.remove(&Value::str("a")).unwrap();
        assert_eq!(d.get_str("c").map(|v| v.py_repr()), Some("3".to_string()));
        let keys: Vec<String> = d.keys().iter().map(Value::py_str).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_unhashable_key() {
        let mut d = Dict::new();
        let err = d.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert!(err.message.contains("unhashable"));
    }

    #[test]
    fn test_series_truthiness_is_ambiguous() {
        let s = Value::series(Column::new("a", vec![Cell::Int(1)]));
        assert!(s.truthy().is_err());
    }

    #[test]
    fn test_call_args_reports_leftovers() {
        let mut args = CallArgs::new(vec![Value::Int(1)], vec![("bogus".into(), Value::None)]);
        assert!(args.arg(0, "n").is_some());
        let err = args.finish("head").unwrap_err();
        assert!(err.message.contains("bogus"));
    }
}
