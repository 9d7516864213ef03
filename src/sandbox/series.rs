//! Series operations, element-wise arithmetic and the `.str` / `.dt`
//! accessors.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use chrono::{Datelike, Timelike};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::builtins::{round_float, title_case};
use super::capabilities::{Builtin, RE_IGNORECASE};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::interp::{normalize_index, slice_positions, Interpreter};
use super::modules::{python_replacement, strftime};
use super::ops::{binary_scalar, compare_scalar, unary_scalar};
use super::value::*;
use crate::table::{parse_datetime, Cell, CellKey, Column, Table};

pub(super) const SERIES_METHODS: &[&str] = &[
    "isna", "isnull", "notna", "notnull", "fillna", "ffill", "bfill", "astype", "apply", "map",
    "sum", "mean", "median", "std", "min", "max", "count", "unique", "nunique", "round", "abs",
    "tolist", "to_list", "isin", "between", "replace", "copy", "head", "tail", "value_counts",
    "sort_values", "dropna", "any", "all", "duplicated", "drop_duplicates",
];

pub(super) const STR_ACCESSOR_METHODS: &[&str] = &[
    "strip", "lstrip", "rstrip", "lower", "upper", "title", "capitalize", "replace", "contains",
    "startswith", "endswith", "len", "slice", "zfill", "extract", "split", "isdigit",
    "isnumeric", "isalpha", "isspace",
];

/// Target type of `astype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dtype {
    Text,
    Int,
    Float,
    Bool,
    DateTime,
}

impl Dtype {
    pub(super) fn parse(v: &Value) -> ScriptResult<Dtype> {
        match v {
            Value::Builtin(Builtin::Str) => Ok(Dtype::Text),
            Value::Builtin(Builtin::Int) => Ok(Dtype::Int),
            Value::Builtin(Builtin::Float) => Ok(Dtype::Float),
            Value::Builtin(Builtin::Bool) => Ok(Dtype::Bool),
            Value::Str(s) => match s.as_str() {
                "str" | "string" | "object" | "category" => Ok(Dtype::Text),
                "int" | "int64" | "int32" | "Int64" | "Int32" => Ok(Dtype::Int),
                "float" | "float64" | "float32" | "Float64" => Ok(Dtype::Float),
                "bool" | "boolean" => Ok(Dtype::Bool),
                "datetime" => Ok(Dtype::DateTime),
                s if s.starts_with("datetime64") => Ok(Dtype::DateTime),
                other => Err(ScriptError::type_error(format!(
                    "data type {} not understood",
                    repr_str(other)
                ))),
            },
            other => Err(ScriptError::type_error(format!(
                "data type {} not understood",
                other.py_repr()
            ))),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Dtype::Text => "str",
            Dtype::Int => "int64",
            Dtype::Float => "float64",
            Dtype::Bool => "bool",
            Dtype::DateTime => "datetime64[ns]",
        }
    }

    /// Converts one cell. Missing values stay missing except for integers,
    /// which cannot hold them.
    pub(super) fn convert(self, cell: &Cell) -> ScriptResult<Cell> {
        if cell.is_null() {
            if self == Dtype::Int {
                return Err(ScriptError::value_error(
                    "Cannot convert non-finite values (NA or inf) to integer",
                ));
            }
            return Ok(Cell::Null);
        }
        Ok(match (self, cell) {
            (Dtype::Text, c) => c.to_text_cell(),
            (Dtype::Int, Cell::Int(i)) => Cell::Int(*i),
            (Dtype::Int, Cell::Bool(b)) => Cell::Int(*b as i64),
            (Dtype::Int, Cell::Float(f)) if f.is_finite() => Cell::Int(f.trunc() as i64),
            (Dtype::Int, Cell::Float(_)) => {
                return Err(ScriptError::value_error(
                    "Cannot convert non-finite values (NA or inf) to integer",
                ))
            }
            (Dtype::Int, Cell::Text(s)) => s.trim().parse::<i64>().map(Cell::Int).map_err(|_| {
                ScriptError::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    repr_str(s)
                ))
            })?,
            (Dtype::Float, Cell::Int(i)) => Cell::Float(*i as f64),
            (Dtype::Float, Cell::Float(f)) => Cell::Float(*f),
            (Dtype::Float, Cell::Bool(b)) => Cell::Float(if *b { 1.0 } else { 0.0 }),
            (Dtype::Float, Cell::Text(s)) => s.trim().parse::<f64>().map(Cell::Float).map_err(|_| {
                ScriptError::value_error(format!("could not convert string to float: {}", repr_str(s)))
            })?,
            (Dtype::Bool, Cell::Bool(b)) => Cell::Bool(*b),
            (Dtype::Bool, Cell::Int(i)) => Cell::Bool(*i != 0),
            (Dtype::Bool, Cell::Float(f)) => Cell::Bool(*f != 0.0),
            (Dtype::Bool, Cell::Text(s)) => Cell::Bool(!s.is_empty()),
            (Dtype::DateTime, Cell::DateTime(dt)) => Cell::DateTime(*dt),
            (Dtype::DateTime, Cell::Text(s)) => parse_datetime(s).map(Cell::DateTime).ok_or_else(|| {
                ScriptError::value_error(format!("Unable to parse datetime string {}", repr_str(s)))
            })?,
            (dtype, other) => {
                return Err(ScriptError::type_error(format!(
                    "cannot convert {} value to {}",
                    other.kind(),
                    dtype.label()
                )))
            }
        })
    }
}

pub(super) fn convert_column(column: &Column, dtype: Dtype) -> ScriptResult<Column> {
    let values = column
        .values
        .iter()
        .map(|c| dtype.convert(c))
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Column::new(column.name.clone(), values))
}

/// Cells of an operand broadcast against a series of length `n`.
pub(super) fn operand_cells(v: &Value, n: usize) -> ScriptResult<Vec<Cell>> {
    let cells: Vec<Cell> = match v {
        Value::Series(col) => col.values.clone(),
        Value::List(items) => items.borrow().iter().map(Value::to_cell).collect(),
        Value::Tuple(items) => items.iter().map(Value::to_cell).collect(),
        Value::Table(_) | Value::Dict(_) | Value::GroupBy(_) => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type for Series: '{}'",
                v.type_name()
            )))
        }
        scalar => return Ok(vec![scalar.to_cell(); n]),
    };
    if cells.len() != n {
        return Err(ScriptError::value_error(format!(
            "Lengths must match: {} != {}",
            cells.len(),
            n
        )));
    }
    Ok(cells)
}

fn cell_flag(c: &Cell) -> bool {
    match c {
        c if c.is_null() => false,
        Cell::Bool(b) => *b,
        Cell::Int(i) => *i != 0,
        Cell::Float(f) => *f != 0.0,
        Cell::Text(s) => !s.is_empty(),
        _ => true,
    }
}

/// One element of a vectorised binary operation. Missing operands give a
/// missing result; division by zero follows float semantics.
pub(super) fn cell_binary(op: BinOp, a: &Cell, b: &Cell) -> ScriptResult<Cell> {
    if matches!(op, BinOp::BitAnd | BinOp::BitOr) && !(matches!(a, Cell::Int(_)) && matches!(b, Cell::Int(_))) {
        let (x, y) = (cell_flag(a), cell_flag(b));
        return Ok(Cell::Bool(if op == BinOp::BitAnd { x && y } else { x || y }));
    }
    if a.is_null() || b.is_null() {
        return Ok(Cell::Null);
    }
    if matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) && b.as_f64() == Some(0.0) {
        if let Some(x) = a.as_f64() {
            let q = if op == BinOp::Mod || x == 0.0 { f64::NAN } else { x * f64::INFINITY };
            return Ok(Cell::Float(q));
        }
    }
    Ok(binary_scalar(op, &Value::from_cell(a), &Value::from_cell(b))?.to_cell())
}

pub(super) fn cell_compare(op: CmpOp, a: &Cell, b: &Cell) -> ScriptResult<Cell> {
    if a.is_null() || b.is_null() {
        return Ok(Cell::Bool(op == CmpOp::NotEq));
    }
    Ok(Cell::Bool(compare_scalar(op, &Value::from_cell(a), &Value::from_cell(b))?))
}

/// A boolean selector of length `n`, if `v` is one. Missing entries select
/// nothing.
pub(super) fn mask_of(v: &Value, n: usize) -> ScriptResult<Option<Vec<bool>>> {
    let cells: Vec<Cell> = match v {
        Value::Series(col) => col.values.clone(),
        Value::List(items) => items.borrow().iter().map(Value::to_cell).collect(),
        _ => return Ok(None),
    };
    let boolean = cells.iter().all(|c| c.is_null() || matches!(c, Cell::Bool(_)));
    if !boolean || (cells.is_empty() && n > 0) {
        return Ok(None);
    }
    if cells.len() != n {
        return Err(ScriptError::index_error(format!(
            "Boolean index has wrong length: {} instead of {}",
            cells.len(),
            n
        )));
    }
    Ok(Some(cells.iter().map(|c| matches!(c, Cell::Bool(true))).collect()))
}

/// Positions kept by `head(n)` / `tail(n)`; negative `n` counts from the
/// other end.
pub(super) fn edge_positions(n: i64, len: usize, from_end: bool) -> Vec<usize> {
    let len_i = len as i64;
    let take = if n >= 0 { n.min(len_i) } else { (len_i + n).max(0) } as usize;
    if from_end {
        (len - take..len).collect()
    } else {
        (0..take).collect()
    }
}

pub(super) fn count_arg(v: Option<Value>, default: i64) -> ScriptResult<i64> {
    match v {
        Some(Value::None) | None => Ok(default),
        Some(v) => v.as_int("n"),
    }
}

pub(super) fn flag_arg(v: Option<Value>, default: bool) -> ScriptResult<bool> {
    match v {
        None => Ok(default),
        Some(v) => v.truthy(),
    }
}

/// Which duplicates `duplicated` marks: `'first'`, `'last'` or `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum KeepMode {
    First,
    Last,
    Neither,
}

impl KeepMode {
    pub(super) fn parse(v: Option<Value>) -> ScriptResult<KeepMode> {
        match v {
            None => Ok(KeepMode::First),
            Some(Value::Bool(false)) => Ok(KeepMode::Neither),
            Some(Value::Str(s)) if s == "first" => Ok(KeepMode::First),
            Some(Value::Str(s)) if s == "last" => Ok(KeepMode::Last),
            Some(other) => Err(ScriptError::value_error(format!(
                "keep must be either \"first\", \"last\" or False, got {}",
                other.py_repr()
            ))),
        }
    }
}

/// Duplicate marks over row keys.
pub(super) fn duplicate_marks<K: std::hash::Hash + Eq>(keys: &[K], keep: KeepMode) -> Vec<bool> {
    let mut counts: HashMap<&K, usize> = HashMap::new();
    for k in keys {
        *counts.entry(k).or_default() += 1;
    }
    let mut seen: HashSet<&K> = HashSet::new();
    let mut marks = vec![false; keys.len()];
    match keep {
        KeepMode::First => {
            for (i, k) in keys.iter().enumerate() {
                marks[i] = !seen.insert(k);
            }
        }
        KeepMode::Last => {
            for (i, k) in keys.iter().enumerate().rev() {
                marks[i] = !seen.insert(k);
            }
        }
        KeepMode::Neither => {
            for (i, k) in keys.iter().enumerate() {
                marks[i] = counts.get(k).copied().unwrap_or(0) > 1;
            }
        }
    }
    marks
}

/// `(old, new)` pairs for `replace(to_replace, value)` and the dict form.
pub(super) fn replace_pairs(to_replace: &Value, value: Option<&Value>) -> ScriptResult<Vec<(CellKey, Cell)>> {
    match (to_replace, value) {
        (Value::Dict(d), _) => Ok(d
            .borrow()
            .entries()
            .iter()
            .map(|(k, v)| (k.to_cell().key(), v.to_cell()))
            .collect()),
        (Value::List(_) | Value::Tuple(_), Some(new)) => {
            let olds: Vec<Value> = match to_replace {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.as_ref().clone(),
                _ => Vec::new(),
            };
            let news: Vec<Cell> = match new {
                Value::List(items) => items.borrow().iter().map(Value::to_cell).collect(),
                Value::Tuple(items) => items.iter().map(Value::to_cell).collect(),
                scalar => vec![scalar.to_cell(); olds.len()],
            };
            if news.len() != olds.len() {
                return Err(ScriptError::value_error(format!(
                    "Replacement lists must match in length. Expecting {} got {}",
                    olds.len(),
                    news.len()
                )));
            }
            Ok(olds.iter().map(|o| o.to_cell().key()).zip(news).collect())
        }
        (old, Some(new)) => Ok(vec![(old.to_cell().key(), new.to_cell())]),
        (_, None) => Err(ScriptError::type_error(
            "replace() requires a value when to_replace is not a dict",
        )),
    }
}

pub(super) fn replace_cells(cells: &[Cell], pairs: &[(CellKey, Cell)]) -> Vec<Cell> {
    let lookup: HashMap<&CellKey, &Cell> = pairs.iter().map(|(k, v)| (k, v)).collect();
    cells
        .iter()
        .map(|c| lookup.get(&c.key()).map(|v| (*v).clone()).unwrap_or_else(|| c.clone()))
        .collect()
}

fn numeric_values<'a>(cells: impl Iterator<Item = &'a Cell>, func: &str) -> ScriptResult<Vec<f64>> {
    cells
        .map(|c| {
            c.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "Could not convert {} to numeric for '{}'",
                    c.as_text().unwrap_or_default(),
                    func
                ))
            })
        })
        .collect()
}

fn sum_cells<'a>(cells: impl Iterator<Item = &'a Cell>) -> ScriptResult<Cell> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut saw_float = false;
    let mut text: Option<String> = None;
    let mut saw_number = false;
    for cell in cells {
        match cell {
            Cell::Int(_) | Cell::Bool(_) | Cell::Float(_) => {
                saw_number = true;
                let x = cell.as_f64().unwrap_or(0.0);
                float_total += x;
                match cell {
                    Cell::Float(_) => saw_float = true,
                    Cell::Int(i) => int_total = int_total.and_then(|t| t.checked_add(*i)),
                    Cell::Bool(b) => int_total = int_total.and_then(|t| t.checked_add(*b as i64)),
                    _ => {}
                }
            }
            Cell::Text(s) => text.get_or_insert_with(String::new).push_str(s),
            other => {
                return Err(ScriptError::type_error(format!(
                    "cannot sum {} values",
                    other.kind()
                )))
            }
        }
        if saw_number && text.is_some() {
            return Err(ScriptError::type_error(
                "unsupported operand type(s) for +: 'int' and 'str'",
            ));
        }
    }
    if let Some(text) = text {
        return Ok(Cell::Text(text));
    }
    Ok(match (saw_float, int_total) {
        (false, Some(total)) => Cell::Int(total),
        _ => Cell::Float(float_total),
    })
}

/// Column reductions shared by series, tables and groups. Missing values
/// are skipped.
pub(super) fn reduce_cells(func: &str, cells: &[Cell]) -> ScriptResult<Cell> {
    let mut present = cells.iter().filter(|c| !c.is_null());
    Ok(match func {
        "count" => Cell::Int(present.count() as i64),
        "size" => Cell::Int(cells.len() as i64),
        "nunique" => Cell::Int(present.map(Cell::key).collect::<HashSet<_>>().len() as i64),
        "first" => present.next().cloned().unwrap_or(Cell::Null),
        "last" => present.last().cloned().unwrap_or(Cell::Null),
        "min" => present.min_by(|a, b| a.sort_cmp(b)).cloned().unwrap_or(Cell::Null),
        "max" => present
            .fold(None::<&Cell>, |best, c| match best {
                Some(b) if b.sort_cmp(c) != Ordering::Less => Some(b),
                _ => Some(c),
            })
            .cloned()
            .unwrap_or(Cell::Null),
        "sum" => sum_cells(present)?,
        "mean" => {
            let nums = numeric_values(present, func)?;
            if nums.is_empty() {
                Cell::Float(f64::NAN)
            } else {
                Cell::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "median" => {
            let mut nums = numeric_values(present, func)?;
            nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let n = nums.len();
            Cell::Float(match n {
                0 => f64::NAN,
                _ if n % 2 == 1 => nums[n / 2],
                _ => (nums[n / 2 - 1] + nums[n / 2]) / 2.0,
            })
        }
        "std" => {
            let nums = numeric_values(present, func)?;
            let n = nums.len();
            if n < 2 {
                Cell::Float(f64::NAN)
            } else {
                let mean = nums.iter().sum::<f64>() / n as f64;
                let var = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                Cell::Float(var.sqrt())
            }
        }
        other => {
            return Err(ScriptError::value_error(format!(
                "'{}' is not a valid function for aggregation",
                other
            )))
        }
    })
}

fn derived(col: &Column, values: Vec<Cell>) -> Value {
    Value::series(Column::new(col.name.clone(), values))
}

fn cells_to_list(cells: &[Cell]) -> Value {
    Value::list(cells.iter().map(Value::from_cell).collect())
}

impl Interpreter {
    pub(super) fn series_unary(&mut self, op: UnaryOp, col: &Rc<Column>) -> ScriptResult<Value> {
        self.charge(col.len())?;
        let values = col
            .values
            .iter()
            .map(|c| match (op, c) {
                (_, c) if c.is_null() => Ok(Cell::Null),
                (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
                _ => Ok(unary_scalar(op, &Value::from_cell(c))?.to_cell()),
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(derived(col, values))
    }

    pub(super) fn series_binary(&mut self, op: BinOp, l: &Value, r: &Value) -> ScriptResult<Value> {
        let (name, n) = series_shape(l, r);
        let left = operand_cells(l, n)?;
        let right = operand_cells(r, n)?;
        self.charge(n)?;
        let values = left
            .iter()
            .zip(&right)
            .map(|(a, b)| cell_binary(op, a, b))
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::series(Column::new(name, values)))
    }

    pub(super) fn series_compare(&mut self, op: CmpOp, l: &Value, r: &Value) -> ScriptResult<Value> {
        let (name, n) = series_shape(l, r);
        let left = operand_cells(l, n)?;
        let right = operand_cells(r, n)?;
        self.charge(n)?;
        let values = left
            .iter()
            .zip(&right)
            .map(|(a, b)| cell_compare(op, a, b))
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::series(Column::new(name, values)))
    }

    pub(super) fn series_attr(&mut self, col: &Rc<Column>, name: &str) -> ScriptResult<Option<Value>> {
        let n = col.len();
        Ok(Some(match name {
            "str" => {
                let present: Vec<&Cell> = col.values.iter().filter(|c| !c.is_null()).collect();
                if !present.is_empty() && !present.iter().any(|c| matches!(c, Cell::Text(_))) {
                    return Err(ScriptError::new(
                        ErrorKind::Attribute,
                        "Can only use .str accessor with string values!",
                    ));
                }
                Value::StrAccessor(col.clone())
            }
            "dt" => {
                if col.values.iter().any(|c| !c.is_null() && !matches!(c, Cell::DateTime(_))) {
                    return Err(ScriptError::new(
                        ErrorKind::Attribute,
                        "Can only use .dt accessor with datetimelike values",
                    ));
                }
                Value::DtAccessor(col.clone())
            }
            "name" => Value::Str(col.name.clone()),
            "shape" => Value::tuple(vec![Value::Int(n as i64)]),
            "size" => Value::Int(n as i64),
            "empty" => Value::Bool(n == 0),
            "dtype" => Value::str(col.dtype()),
            "values" => cells_to_list(&col.values),
            "index" => Value::Range {
                start: 0,
                stop: n as i64,
                step: 1,
            },
            "hasnans" => Value::Bool(col.null_count() > 0),
            "loc" | "iloc" => Value::Indexer(Rc::new(Indexer {
                table: Rc::new(RefCell::new(Table::new(vec![col.as_ref().clone()])?)),
                positional: name == "iloc",
                series: true,
            })),
            _ => return Ok(None),
        }))
    }

    pub(super) fn series_getitem(&mut self, col: &Rc<Column>, index: &Value) -> ScriptResult<Value> {
        let n = col.len();
        if let Value::Slice { lower, upper, step } = index {
            let picked = slice_positions(*lower, *upper, *step, n);
            return Ok(derived(col, picked.iter().map(|&i| col.values[i].clone()).collect()));
        }
        if let Some(mask) = mask_of(index, n)? {
            let values = col
                .values
                .iter()
                .zip(&mask)
                .filter(|(_, keep)| **keep)
                .map(|(c, _)| c.clone())
                .collect();
            return Ok(derived(col, values));
        }
        if let Value::List(items) = index {
            let positions = items
                .borrow()
                .iter()
                .map(|v| {
                    normalize_index(v.as_int("index")?, n)
                        .ok_or_else(|| ScriptError::key_error(&v.py_str()))
                })
                .collect::<ScriptResult<Vec<_>>>()?;
            return Ok(derived(col, positions.iter().map(|&i| col.values[i].clone()).collect()));
        }
        let i = index.as_int("Series index")?;
        normalize_index(i, n)
            .map(|i| Value::from_cell(&col.values[i]))
            .ok_or_else(|| ScriptError::key_error(&i.to_string()))
    }

    pub(super) fn series_method(&mut self, col: &Rc<Column>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let n = col.len();
        self.charge(n)?;
        let result = match name {
            "isna" | "isnull" | "notna" | "notnull" => {
                let want_null = name.starts_with("is");
                derived(col, col.values.iter().map(|c| Cell::Bool(c.is_null() == want_null)).collect())
            }
            "fillna" => {
                let method = args.kwarg("method");
                match (args.arg(0, "value"), method) {
                    (Some(value), _) => {
                        let fill = value.to_cell();
                        derived(
                            col,
                            col.values
                                .iter()
                                .map(|c| if c.is_null() { fill.clone() } else { c.clone() })
                                .collect(),
                        )
                    }
                    (None, Some(Value::Str(m))) if m == "ffill" || m == "pad" => derived(col, fill_forward(&col.values, false)),
                    (None, Some(Value::Str(m))) if m == "bfill" || m == "backfill" => derived(col, fill_forward(&col.values, true)),
                    _ => return Err(ScriptError::value_error("Must specify a fill 'value' or 'method'.")),
                }
            }
            "ffill" => derived(col, fill_forward(&col.values, false)),
            "bfill" => derived(col, fill_forward(&col.values, true)),
            "astype" => {
                let dtype = Dtype::parse(&args.required(0, "dtype", name)?)?;
                Value::series(convert_column(col, dtype)?)
            }
            "apply" | "map" => {
                let func = args.required(0, if name == "map" { "arg" } else { "func" }, name)?;
                let mut values = Vec::with_capacity(n);
                match &func {
                    Value::Dict(d) => {
                        let d = d.borrow();
                        for c in &col.values {
                            values.push(d.get(&Value::from_cell(c))?.map(|v| v.to_cell()).unwrap_or(Cell::Null));
                        }
                    }
                    Value::Series(lookup) if name == "map" => {
                        // a series maps by position, the only index it has
                        for c in &col.values {
                            let hit = c
                                .as_f64()
                                .filter(|f| f.fract() == 0.0)
                                .and_then(|f| normalize_index(f as i64, lookup.len()));
                            values.push(hit.map(|i| lookup.values[i].clone()).unwrap_or(Cell::Null));
                        }
                    }
                    f => {
                        for c in &col.values {
                            values.push(self.call1(f, Value::from_cell(c))?.to_cell());
                        }
                    }
                }
                derived(col, values)
            }
            "sum" | "mean" | "median" | "std" | "min" | "max" | "count" | "nunique" => {
                Value::from_cell(&reduce_cells(name, &col.values)?)
            }
            "unique" => {
                let mut seen = HashSet::new();
                cells_to_list(
                    &col.values
                        .iter()
                        .filter(|c| seen.insert(c.key()))
                        .cloned()
                        .collect::<Vec<_>>(),
                )
            }
            "round" => {
                let digits = count_arg(args.arg(0, "decimals"), 0)?;
                derived(
                    col,
                    col.values
                        .iter()
                        .map(|c| match c {
                            Cell::Float(f) => Cell::Float(round_float(*f, digits)),
                            other => other.clone(),
                        })
                        .collect(),
                )
            }
            "abs" => derived(
                col,
                col.values
                    .iter()
                    .map(|c| match c {
                        Cell::Int(i) => Ok(Cell::Int(i.checked_abs().unwrap_or(i64::MAX))),
                        Cell::Float(f) => Ok(Cell::Float(f.abs())),
                        Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
                        c if c.is_null() => Ok(Cell::Null),
                        other => Err(ScriptError::type_error(format!(
                            "bad operand type for abs(): '{}'",
                            other.kind()
                        ))),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?,
            ),
            "tolist" | "to_list" => cells_to_list(&col.values),
            "isin" => {
                let values = args.required(0, "values", name)?;
                let wanted: HashSet<CellKey> = self
                    .iter_values(&values)?
                    .iter()
                    .map(|v| v.to_cell().key())
                    .collect();
                derived(col, col.values.iter().map(|c| Cell::Bool(wanted.contains(&c.key()))).collect())
            }
            "between" => {
                let left = args.required(0, "left", name)?;
                let right = args.required(1, "right", name)?;
                let inclusive = match args.arg(2, "inclusive") {
                    Some(v) => v.as_str("inclusive")?.to_string(),
                    None => "both".to_string(),
                };
                let (lo_op, hi_op) = match inclusive.as_str() {
                    "both" => (CmpOp::GtE, CmpOp::LtE),
                    "neither" => (CmpOp::Gt, CmpOp::Lt),
                    "left" => (CmpOp::GtE, CmpOp::Lt),
                    "right" => (CmpOp::Gt, CmpOp::LtE),
                    other => {
                        return Err(ScriptError::value_error(format!(
                            "Inclusive has to be either string of 'both','left', 'right', or 'neither', got {}",
                            other
                        )))
                    }
                };
                let (lo, hi) = (left.to_cell(), right.to_cell());
                let values = col
                    .values
                    .iter()
                    .map(|c| {
                        let a = matches!(cell_compare(lo_op, c, &lo)?, Cell::Bool(true));
                        let b = matches!(cell_compare(hi_op, c, &hi)?, Cell::Bool(true));
                        Ok(Cell::Bool(a && b))
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;
                derived(col, values)
            }
            "replace" => {
                let to_replace = args.required(0, "to_replace", name)?;
                let value = args.arg(1, "value");
                let pairs = replace_pairs(&to_replace, value.as_ref())?;
                derived(col, replace_cells(&col.values, &pairs))
            }
            "copy" => {
                args.kwarg("deep");
                Value::Series(Rc::new(col.as_ref().clone()))
            }
            "head" | "tail" => {
                let count = count_arg(args.arg(0, "n"), 5)?;
                let picked = edge_positions(count, n, name == "tail");
                derived(col, picked.iter().map(|&i| col.values[i].clone()).collect())
            }
            "value_counts" => {
                let normalize = flag_arg(args.kwarg("normalize"), false)?;
                let dropna = flag_arg(args.kwarg("dropna"), true)?;
                let mut order: Vec<(Cell, usize)> = Vec::new();
                let mut slots: HashMap<CellKey, usize> = HashMap::new();
                for c in &col.values {
                    if dropna && c.is_null() {
                        continue;
                    }
                    match slots.get(&c.key()) {
                        Some(&slot) => order[slot].1 += 1,
                        None => {
                            slots.insert(c.key(), order.len());
                            order.push((c.clone(), 1));
                        }
                    }
                }
                order.sort_by(|a, b| b.1.cmp(&a.1));
                let total: usize = order.iter().map(|(_, count)| count).sum();
                let mut dict = Dict::new();
                for (cell, count) in order {
                    let v = if normalize {
                        Value::Float(count as f64 / total.max(1) as f64)
                    } else {
                        Value::Int(count as i64)
                    };
                    dict.insert(Value::from_cell(&cell), v)?;
                }
                Value::dict(dict)
            }
            "sort_values" => {
                let ascending = flag_arg(args.arg(0, "ascending"), true)?;
                let mut positions: Vec<usize> = (0..n).collect();
                positions.sort_by(|&a, &b| {
                    let (x, y) = (&col.values[a], &col.values[b]);
                    let ord = x.sort_cmp(y);
                    if ascending || x.is_null() || y.is_null() { ord } else { ord.reverse() }
                });
                derived(col, positions.iter().map(|&i| col.values[i].clone()).collect())
            }
            "dropna" => derived(col, col.values.iter().filter(|c| !c.is_null()).cloned().collect()),
            "any" => Value::Bool(col.values.iter().any(cell_flag)),
            "all" => Value::Bool(col.values.iter().filter(|c| !c.is_null()).all(cell_flag)),
            "duplicated" | "drop_duplicates" => {
                let keep = KeepMode::parse(args.arg(0, "keep"))?;
                let keys: Vec<CellKey> = col.values.iter().map(Cell::key).collect();
                let marks = duplicate_marks(&keys, keep);
                if name == "duplicated" {
                    derived(col, marks.into_iter().map(Cell::Bool).collect())
                } else {
                    derived(
                        col,
                        col.values
                            .iter()
                            .zip(&marks)
                            .filter(|(_, dup)| !**dup)
                            .map(|(c, _)| c.clone())
                            .collect(),
                    )
                }
            }
            _ => return Err(ScriptError::attribute_error("Series", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    // ===== .str =====

    pub(super) fn str_accessor_method(&mut self, col: &Rc<Column>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        self.charge(col.len())?;
        let result = match name {
            "strip" | "lstrip" | "rstrip" => {
                let chars = match args.arg(0, "to_strip") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_str("to_strip")?.to_string()),
                };
                let pred = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                map_text(col, |s| {
                    Ok(Cell::Text(match name {
                        "lstrip" => s.trim_start_matches(pred).to_string(),
                        "rstrip" => s.trim_end_matches(pred).to_string(),
                        _ => s.trim_matches(pred).to_string(),
                    }))
                })?
            }
            "lower" => map_text(col, |s| Ok(Cell::Text(s.to_lowercase())))?,
            "upper" => map_text(col, |s| Ok(Cell::Text(s.to_uppercase())))?,
            "title" => map_text(col, |s| Ok(Cell::Text(title_case(s))))?,
            "capitalize" => map_text(col, |s| {
                let mut chars = s.chars();
                Ok(Cell::Text(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }))
            })?,
            "replace" => {
                let pat = args.required(0, "pat", name)?;
                let repl = args.required(1, "repl", name)?;
                let count = count_arg(args.arg(2, "n"), -1)?;
                let case = flag_arg(args.kwarg("case"), true)?;
                let regex = flag_arg(args.kwarg("regex"), false)?;
                let (pat, repl) = (pat.as_str("pat")?.to_string(), repl.as_str("repl")?.to_string());
                if regex || !case {
                    let source = if regex { pat } else { regex::escape(&pat) };
                    let re = self.compile_regex(&source, if case { 0 } else { RE_IGNORECASE })?;
                    let template = if regex { python_replacement(&repl) } else { repl.replace('$', "$$") };
                    let limit = count.max(0) as usize;
                    map_text(col, |s| Ok(Cell::Text(re.replacen(s, limit, template.as_str()).into_owned())))?
                } else if count < 0 {
                    map_text(col, |s| Ok(Cell::Text(s.replace(&pat, &repl))))?
                } else {
                    map_text(col, |s| Ok(Cell::Text(s.replacen(&pat, &repl, count as usize))))?
                }
            }
            "contains" => {
                let pat = args.required(0, "pat", name)?;
                let case = flag_arg(args.arg(1, "case"), true)?;
                let flags = count_arg(args.arg(2, "flags"), 0)?;
                let na = args.arg(3, "na").map(|v| v.to_cell()).unwrap_or(Cell::Null);
                let regex = flag_arg(args.arg(4, "regex"), true)?;
                let pat = pat.as_str("pat")?.to_string();
                let source = if regex { pat } else { regex::escape(&pat) };
                let re = self.compile_regex(&source, flags | if case { 0 } else { RE_IGNORECASE })?;
                let values = col
                    .values
                    .iter()
                    .map(|c| match c {
                        Cell::Text(s) => Cell::Bool(re.is_match(s)),
                        _ => na.clone(),
                    })
                    .collect();
                derived(col, values)
            }
            "startswith" | "endswith" => {
                let pat = args.required(0, "pat", name)?;
                let prefixes = match &pat {
                    Value::Tuple(items) => items.iter().map(Value::py_str).collect(),
                    other => vec![other.as_str("pat")?.to_string()],
                };
                map_text(col, |s| {
                    Ok(Cell::Bool(prefixes.iter().any(|p| {
                        if name == "startswith" {
                            s.starts_with(p.as_str())
                        } else {
                            s.ends_with(p.as_str())
                        }
                    })))
                })?
            }
            "len" => map_text(col, |s| Ok(Cell::Int(s.chars().count() as i64)))?,
            "slice" => {
                let bound = |v: Option<Value>| -> ScriptResult<Option<i64>> {
                    match v {
                        Some(Value::None) | None => Ok(None),
                        Some(v) => v.as_int("slice bound").map(Some),
                    }
                };
                let start = bound(args.arg(0, "start"))?;
                let stop = bound(args.arg(1, "stop"))?;
                let step = bound(args.arg(2, "step"))?;
                if step == Some(0) {
                    return Err(ScriptError::value_error("slice step cannot be zero"));
                }
                map_text(col, |s| {
                    let chars: Vec<char> = s.chars().collect();
                    Ok(Cell::Text(
                        slice_positions(start, stop, step, chars.len())
                            .into_iter()
                            .map(|i| chars[i])
                            .collect(),
                    ))
                })?
            }
            "zfill" => {
                let width = args.required(0, "width", name)?.as_int("width")?.max(0) as usize;
                map_text(col, |s| {
                    let len = s.chars().count();
                    Ok(Cell::Text(if len >= width {
                        s.to_string()
                    } else {
                        match s.strip_prefix(['-', '+']) {
                            Some(rest) => format!("{}{}{}", &s[..1], "0".repeat(width - len), rest),
                            None => format!("{}{}", "0".repeat(width - len), s),
                        }
                    }))
                })?
            }
            "extract" => {
                let pat = args.required(0, "pat", name)?;
                let flags = count_arg(args.arg(1, "flags"), 0)?;
                let re = self.compile_regex(pat.as_str("pat")?, flags)?;
                let groups = re.captures_len() - 1;
                if groups == 0 {
                    return Err(ScriptError::value_error("pattern contains no capture groups"));
                }
                let names: Vec<String> = re
                    .capture_names()
                    .skip(1)
                    .enumerate()
                    .map(|(i, n)| n.map(str::to_string).unwrap_or_else(|| i.to_string()))
                    .collect();
                let mut columns: Vec<Vec<Cell>> = vec![Vec::with_capacity(col.len()); groups];
                for c in &col.values {
                    let caps = match c {
                        Cell::Text(s) => re.captures(s),
                        _ => None,
                    };
                    for (g, column) in columns.iter_mut().enumerate() {
                        column.push(
                            caps.as_ref()
                                .and_then(|caps| caps.get(g + 1))
                                .map(|m| Cell::Text(m.as_str().to_string()))
                                .unwrap_or(Cell::Null),
                        );
                    }
                }
                let expand = flag_arg(args.kwarg("expand"), true)?;
                if groups == 1 && !expand {
                    derived(col, columns.remove(0))
                } else if groups == 1 && re.capture_names().nth(1).flatten().is_none() {
                    derived(col, columns.remove(0))
                } else {
                    Value::table(Table::new(
                        names.into_iter().zip(columns).map(|(n, v)| Column::new(n, v)).collect(),
                    )?)
                }
            }
            "split" => {
                let pat = match args.arg(0, "pat") {
                    Some(Value::None) | None => None,
                    Some(v) => Some(v.as_str("pat")?.to_string()),
                };
                let limit = count_arg(args.arg(1, "n"), -1)?;
                if !flag_arg(args.arg(2, "expand"), false)? {
                    return Err(ScriptError::value_error(
                        "str.split() needs expand=True; use .str.extract() to pull out a single part",
                    ));
                }
                let mut rows: Vec<Option<Vec<String>>> = Vec::with_capacity(col.len());
                for c in &col.values {
                    rows.push(match c {
                        Cell::Text(s) => Some(super::builtins::split_str(s, pat.as_deref(), limit)?),
                        _ => None,
                    });
                }
                let width = rows.iter().flatten().map(Vec::len).max().unwrap_or(0);
                let columns = (0..width)
                    .map(|i| {
                        let values = rows
                            .iter()
                            .map(|r| {
                                r.as_ref()
                                    .and_then(|parts| parts.get(i))
                                    .map(|p| Cell::Text(p.clone()))
                                    .unwrap_or(Cell::Null)
                            })
                            .collect();
                        Column::new(i.to_string(), values)
                    })
                    .collect();
                Value::table(Table::new(columns)?)
            }
            "isdigit" | "isnumeric" => map_text(col, |s| Ok(Cell::Bool(!s.is_empty() && s.chars().all(char::is_numeric))))?,
            "isalpha" => map_text(col, |s| Ok(Cell::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))))?,
            "isspace" => map_text(col, |s| Ok(Cell::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))))?,
            _ => return Err(ScriptError::attribute_error("StringMethods", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    // ===== .dt =====

    pub(super) fn dt_attr(&mut self, col: &Rc<Column>, name: &str) -> ScriptResult<Option<Value>> {
        let field: fn(&chrono::NaiveDateTime) -> Cell = match name {
            "year" => |d| Cell::Int(d.year() as i64),
            "month" => |d| Cell::Int(d.month() as i64),
            "day" => |d| Cell::Int(d.day() as i64),
            "hour" => |d| Cell::Int(d.hour() as i64),
            "minute" => |d| Cell::Int(d.minute() as i64),
            "second" => |d| Cell::Int(d.second() as i64),
            "weekday" | "dayofweek" => |d| Cell::Int(d.weekday().num_days_from_monday() as i64),
            "dayofyear" => |d| Cell::Int(d.ordinal() as i64),
            "quarter" => |d| Cell::Int(((d.month() - 1) / 3 + 1) as i64),
            "date" => |d| d.date().and_hms_opt(0, 0, 0).map(Cell::DateTime).unwrap_or(Cell::Null),
            _ => return Ok(None),
        };
        self.charge(col.len())?;
        let values = col
            .values
            .iter()
            .map(|c| match c {
                Cell::DateTime(d) => field(d),
                _ => Cell::Null,
            })
            .collect();
        Ok(Some(derived(col, values)))
    }

    pub(super) fn dt_accessor_method(&mut self, col: &Rc<Column>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        if name != "strftime" {
            return Err(ScriptError::attribute_error("DatetimeProperties", name));
        }
        let fmt = args.required(0, "date_format", name)?;
        args.finish(name)?;
        let fmt = fmt.as_str("date_format")?;
        self.charge(col.len())?;
        let values = col
            .values
            .iter()
            .map(|c| match c {
                Cell::DateTime(d) => strftime(d, fmt).map(Cell::Text),
                _ => Ok(Cell::Null),
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(derived(col, values))
    }
}

fn series_shape(l: &Value, r: &Value) -> (String, usize) {
    for v in [l, r] {
        if let Value::Series(c) = v {
            return (c.name.clone(), c.len());
        }
    }
    (String::new(), 0)
}

/// Applies `f` to text cells; anything else becomes missing.
fn map_text(col: &Column, mut f: impl FnMut(&str) -> ScriptResult<Cell>) -> ScriptResult<Value> {
    let values = col
        .values
        .iter()
        .map(|c| match c {
            Cell::Text(s) => f(s),
            _ => Ok(Cell::Null),
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(derived(col, values))
}

pub(super) fn fill_forward(cells: &[Cell], backward: bool) -> Vec<Cell> {
    let mut out = cells.to_vec();
    let mut last: Option<Cell> = None;
    let positions: Box<dyn Iterator<Item = usize>> = if backward {
        Box::new((0..out.len()).rev())
    } else {
        Box::new(0..out.len())
    };
    for i in positions {
        if out[i].is_null() {
            if let Some(fill) = &last {
                out[i] = fill.clone();
            }
        } else {
            last = Some(out[i].clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reductions_skip_missing() {
        let cells = vec![Cell::Int(1), Cell::Null, Cell::Int(4), Cell::Float(f64::NAN)];
        assert_eq!(reduce_cells("sum", &cells).unwrap(), Cell::Int(5));
        assert_eq!(reduce_cells("mean", &cells).unwrap(), Cell::Float(2.5));
        assert_eq!(reduce_cells("count", &cells).unwrap(), Cell::Int(2));
        assert_eq!(reduce_cells("max", &cells).unwrap(), Cell::Int(4));
        assert_eq!(reduce_cells("size", &cells).unwrap(), Cell::Int(4));
        assert!(reduce_cells("mode", &cells).is_err());
    }

    #[test]
    fn test_sum_of_text_concatenates() {
        let cells = vec![Cell::Text("a".into()), Cell::Text("b".into())];
        assert_eq!(reduce_cells("sum", &cells).unwrap(), Cell::Text("ab".into()));
        let mixed = vec![Cell::Int(1), Cell::Text("b".into())];
        assert!(reduce_cells("sum", &mixed).is_err());
    }

    #[test]
    fn test_division_by_zero_is_float() {
        let inf = cell_binary(BinOp::Div, &Cell::Int(3), &Cell::Int(0)).unwrap();
        assert_eq!(inf, Cell::Float(f64::INFINITY));
        assert!(cell_binary(BinOp::Div, &Cell::Int(0), &Cell::Int(0)).unwrap().is_null());
        assert_eq!(cell_binary(BinOp::Add, &Cell::Int(1), &Cell::Null).unwrap(), Cell::Null);
    }

    #[test]
    fn test_duplicate_marks() {
        let keys = vec![1, 2, 1, 3, 2];
        assert_eq!(duplicate_marks(&keys, KeepMode::First), vec![false, false, true, false, true]);
        assert_eq!(duplicate_marks(&keys, KeepMode::Last), vec![true, true, false, false, false]);
        assert_eq!(duplicate_marks(&keys, KeepMode::Neither), vec![true, true, true, false, true]);
    }

    #[test]
    fn test_astype_keeps_nulls_as_text() {
        let col = Column::new("a", vec![Cell::Int(1), Cell::Null]);
        let converted = convert_column(&col, Dtype::Text).unwrap();
        assert_eq!(converted.values, vec![Cell::Text("1".into()), Cell::Null]);
        assert!(convert_column(&col, Dtype::Int).is_err());
    }

    #[test]
    fn test_edge_positions() {
        assert_eq!(edge_positions(2, 5, false), vec![0, 1]);
        assert_eq!(edge_positions(2, 5, true), vec![3, 4]);
        assert_eq!(edge_positions(-1, 3, false), vec![0, 1]);
        assert_eq!(edge_positions(10, 3, true), vec![0, 1, 2]);
    }

    #[test]
    fn test_fill_forward_and_back() {
        let cells = vec![Cell::Null, Cell::Int(1), Cell::Null, Cell::Int(2)];
        assert_eq!(fill_forward(&cells, false), vec![Cell::Null, Cell::Int(1), Cell::Int(1), Cell::Int(2)]);
        assert_eq!(fill_forward(&cells, true), vec![Cell::Int(1), Cell::Int(1), Cell::Int(2), Cell::Int(2)]);
    }
}
