//! DataFrame surface of the transformation language: attributes, methods,
//! subscripts, `loc`/`iloc`, and the `pd.*` constructors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{BinOp, UnaryOp};
use super::builtins::round_float;
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::interp::{normalize_index, slice_positions, Interpreter};
use super::modules::strptime;
use super::ops::{unary_scalar, MAX_SEQUENCE};
use super::series::{
    cell_binary, convert_column, count_arg, duplicate_marks, edge_positions, fill_forward, flag_arg,
    mask_of, operand_cells, reduce_cells, replace_cells, replace_pairs, Dtype, KeepMode,
};
use super::value::*;
use crate::table::{is_na_token, Cell, CellKey, Column, NullHow, Table};

pub(super) const TABLE_METHODS: &[&str] = &[
    "copy", "head", "tail", "dropna", "drop_duplicates", "duplicated", "fillna", "ffill", "bfill",
    "rename", "drop", "sort_values", "reset_index", "astype", "groupby", "to_dict", "apply",
    "iterrows", "isna", "isnull", "notna", "notnull", "sum", "mean", "median", "std", "min",
    "max", "count", "nunique", "replace", "assign", "round",
];

enum Selection {
    One(usize),
    Many(Vec<usize>),
}

fn table_of(v: &Value) -> ScriptResult<&Rc<RefCell<Table>>> {
    match v {
        Value::Table(t) => Ok(t),
        other => Err(ScriptError::type_error(format!(
            "expected a DataFrame, got '{}'",
            other.type_name()
        ))),
    }
}

/// Stores `result` back into the receiver for `inplace=True`, otherwise
/// returns it as a new frame.
fn emit(t: &Rc<RefCell<Table>>, result: Table, inplace: bool) -> Value {
    if inplace {
        *t.borrow_mut() = result;
        Value::None
    } else {
        Value::table(result)
    }
}

fn subset_arg(v: Option<Value>) -> ScriptResult<Option<Vec<String>>> {
    match v {
        Some(Value::None) | None => Ok(None),
        Some(v) => v.string_list("subset").map(Some),
    }
}

fn is_scalar(v: &Value) -> bool {
    matches!(
        v,
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::DateTime(_)
    )
}

fn row_dict(table: &Table, row: usize) -> ScriptResult<Value> {
    let mut dict = Dict::new();
    for col in table.columns() {
        dict.insert(Value::Str(col.name.clone()), Value::from_cell(&col.values[row]))?;
    }
    Ok(Value::dict(dict))
}

fn map_columns(table: &Table, mut f: impl FnMut(&Column) -> ScriptResult<Vec<Cell>>) -> ScriptResult<Table> {
    let columns = table
        .columns()
        .iter()
        .map(|c| Ok(Column::new(c.name.clone(), f(c)?)))
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Table::new(columns)?)
}

fn split_index(index: &Value) -> (&Value, Option<&Value>) {
    if let Value::Tuple(parts) = index {
        if parts.len() == 2 {
            return (&parts[0], Some(&parts[1]));
        }
    }
    (index, None)
}

fn row_selection(sel: &Value, rows: usize, positional: bool) -> ScriptResult<Selection> {
    if let Some(mask) = mask_of(sel, rows)? {
        return Ok(Selection::Many(
            mask.iter().enumerate().filter_map(|(i, keep)| keep.then_some(i)).collect(),
        ));
    }
    let resolve = |i: i64| -> ScriptResult<usize> {
        if positional {
            normalize_index(i, rows)
                .ok_or_else(|| ScriptError::index_error("single positional indexer is out-of-bounds"))
        } else if (0..rows as i64).contains(&i) {
            Ok(i as usize)
        } else {
            Err(ScriptError::key_error(&i.to_string()))
        }
    };
    match sel {
        Value::Slice { lower, upper, step } => {
            // label slices include their upper bound
            let upper = if positional { *upper } else { upper.map(|u| u + 1) };
            Ok(Selection::Many(slice_positions(*lower, upper, *step, rows)))
        }
        Value::List(items) => Ok(Selection::Many(
            items
                .borrow()
                .iter()
                .map(|v| resolve(v.as_int("row label")?))
                .collect::<ScriptResult<Vec<_>>>()?,
        )),
        other => Ok(Selection::One(resolve(other.as_int("row label")?)?)),
    }
}

fn column_selection(table: &Table, sel: &Value, positional: bool) -> ScriptResult<Selection> {
    let ncols = table.num_columns();
    match sel {
        Value::Slice { lower, upper, step } if positional => {
            Ok(Selection::Many(slice_positions(*lower, *upper, *step, ncols)))
        }
        Value::Slice { lower: None, upper: None, step: None } => Ok(Selection::Many((0..ncols).collect())),
        Value::Slice { .. } => Err(ScriptError::type_error(
            "column label slices are not supported; pass a list of column names",
        )),
        Value::List(_) | Value::Tuple(_) if positional => {
            let items = match sel {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.as_ref().clone(),
                _ => Vec::new(),
            };
            Ok(Selection::Many(
                items
                    .iter()
                    .map(|v| {
                        normalize_index(v.as_int("column position")?, ncols)
                            .ok_or_else(|| ScriptError::index_error("positional indexers are out-of-bounds"))
                    })
                    .collect::<ScriptResult<Vec<_>>>()?,
            ))
        }
        Value::List(_) | Value::Tuple(_) => Ok(Selection::Many(
            sel.string_list("column")?
                .iter()
                .map(|n| table.column_index(n).ok_or_else(|| ScriptError::key_error(n)))
                .collect::<ScriptResult<Vec<_>>>()?,
        )),
        other if positional => normalize_index(other.as_int("column position")?, ncols)
            .map(Selection::One)
            .ok_or_else(|| ScriptError::index_error("single positional indexer is out-of-bounds")),
        other => {
            let name = other.as_str("column label")?;
            table
                .column_index(name)
                .map(Selection::One)
                .ok_or_else(|| ScriptError::key_error(name))
        }
    }
}

fn numeric_cell(cell: &Cell) -> Option<Cell> {
    match cell {
        c if c.is_null() => Some(Cell::Null),
        Cell::Int(i) => Some(Cell::Int(*i)),
        Cell::Float(f) => Some(Cell::Float(*f)),
        Cell::Bool(b) => Some(Cell::Int(*b as i64)),
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() || is_na_token(t) {
                Some(Cell::Null)
            } else if let Ok(i) = t.parse::<i64>() {
                Some(Cell::Int(i))
            } else {
                t.parse::<f64>().ok().map(Cell::Float)
            }
        }
        _ => None,
    }
}

fn datetime_cell(cell: &Cell, format: Option<&str>) -> Option<Cell> {
    match cell {
        c if c.is_null() => Some(Cell::Null),
        Cell::DateTime(dt) => Some(Cell::DateTime(*dt)),
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() || is_na_token(t) {
                return Some(Cell::Null);
            }
            match format {
                Some(fmt) => strptime(t, fmt),
                None => crate::table::parse_datetime(t),
            }
            .map(Cell::DateTime)
        }
        _ => None,
    }
}

/// `errors=` handling shared by `to_numeric` and `to_datetime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnError {
    Raise,
    Coerce,
    Ignore,
}

impl OnError {
    fn parse(v: Option<Value>) -> ScriptResult<OnError> {
        match v {
            None => Ok(OnError::Raise),
            Some(Value::Str(s)) if s == "raise" => Ok(OnError::Raise),
            Some(Value::Str(s)) if s == "coerce" => Ok(OnError::Coerce),
            Some(Value::Str(s)) if s == "ignore" => Ok(OnError::Ignore),
            Some(other) => Err(ScriptError::value_error(format!(
                "invalid error value specified: {}",
                other.py_str()
            ))),
        }
    }
}

/// Converts every cell of `input` with `convert`; a failed cell raises,
/// becomes missing, or leaves the input untouched depending on `on_error`.
fn convert_series_or_scalar(
    input: &Value,
    on_error: OnError,
    what: &str,
    convert: impl Fn(&Cell) -> Option<Cell>,
) -> ScriptResult<Value> {
    let (cells, name) = match input {
        Value::Series(col) => (col.values.clone(), Some(col.name.clone())),
        Value::List(items) => (items.borrow().iter().map(Value::to_cell).collect(), None),
        Value::Tuple(items) => (items.iter().map(Value::to_cell).collect(), None),
        scalar if is_scalar(scalar) => {
            let cell = scalar.to_cell();
            return match (convert(&cell), on_error) {
                (Some(c), _) => Ok(Value::from_cell(&c)),
                (None, OnError::Coerce) => Ok(Value::None),
                (None, OnError::Ignore) => Ok(scalar.clone()),
                (None, OnError::Raise) => Err(ScriptError::value_error(format!(
                    "Unable to parse {} {}",
                    what,
                    scalar.py_repr()
                ))),
            };
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "arg must be a list, tuple, Series or scalar, not '{}'",
                other.type_name()
            )))
        }
    };
    let mut out = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        match (convert(cell), on_error) {
            (Some(c), _) => out.push(c),
            (None, OnError::Coerce) => out.push(Cell::Null),
            (None, OnError::Ignore) => return Ok(input.clone()),
            (None, OnError::Raise) => {
                return Err(ScriptError::value_error(format!(
                    "Unable to parse {} \"{}\" at position {}",
                    what,
                    cell.as_text().unwrap_or_default(),
                    i
                )))
            }
        }
    }
    Ok(match name {
        Some(name) => Value::series(Column::new(name, out)),
        None => Value::series(Column::new("", out)),
    })
}

fn sequence_len(v: &Value) -> Option<usize> {
    match v {
        Value::List(items) => Some(items.borrow().len()),
        Value::Tuple(items) => Some(items.len()),
        Value::Series(col) => Some(col.len()),
        Value::Range { start, stop, step } => Some(range_len(*start, *stop, *step)),
        _ => None,
    }
}

impl Interpreter {
    pub(super) fn table_attr(&mut self, obj: &Value, name: &str) -> ScriptResult<Option<Value>> {
        let t = table_of(obj)?;
        let table = t.borrow();
        let rows = table.num_rows();
        let cols = table.num_columns();
        Ok(Some(match name {
            "columns" => Value::list(table.column_names().into_iter().map(Value::Str).collect()),
            "shape" => Value::tuple(vec![Value::Int(rows as i64), Value::Int(cols as i64)]),
            "empty" => Value::Bool(rows == 0 || cols == 0),
            "size" => Value::Int((rows * cols) as i64),
            "dtypes" => {
                let mut dict = Dict::new();
                for col in table.columns() {
                    dict.insert(Value::Str(col.name.clone()), Value::str(col.dtype()))?;
                }
                Value::dict(dict)
            }
            "index" => Value::Range {
                start: 0,
                stop: rows as i64,
                step: 1,
            },
            "loc" | "iloc" => Value::Indexer(Rc::new(Indexer {
                table: t.clone(),
                positional: name == "iloc",
                series: false,
            })),
            _ if !TABLE_METHODS.contains(&name) => match table.column(name) {
                Some(col) => Value::series(col.clone()),
                None => return Ok(None),
            },
            _ => return Ok(None),
        }))
    }

    pub(super) fn table_getitem(&mut self, obj: &Value, index: &Value) -> ScriptResult<Value> {
        let t = table_of(obj)?;
        let table = t.borrow();
        let rows = table.num_rows();
        match index {
            Value::Str(name) => table
                .column(name)
                .map(|c| Value::series(c.clone()))
                .ok_or_else(|| ScriptError::key_error(name)),
            Value::Slice { lower, upper, step } => {
                Ok(Value::table(table.take_rows(&slice_positions(*lower, *upper, *step, rows))))
            }
            _ => {
                if let Some(mask) = mask_of(index, rows)? {
                    self.charge(rows)?;
                    return Ok(Value::table(table.filter_mask(&mask)?));
                }
                match index {
                    Value::List(_) | Value::Tuple(_) => {
                        let names = index.string_list("column")?;
                        Ok(Value::table(table.select(&names)?))
                    }
                    other => Err(ScriptError::key_error(&other.py_str())),
                }
            }
        }
    }

    pub(super) fn table_setitem(&mut self, t: &Rc<RefCell<Table>>, index: &Value, value: Value) -> ScriptResult<()> {
        let (rows, has_columns) = {
            let table = t.borrow();
            (table.num_rows(), table.num_columns() > 0)
        };
        self.charge(rows)?;
        match index {
            Value::Str(name) => {
                let cells = match &value {
                    Value::Table(other) => {
                        let other = other.borrow();
                        match other.columns() {
                            [single] => single.values.clone(),
                            _ => {
                                return Err(ScriptError::value_error(format!(
                                    "Cannot set a DataFrame with multiple columns to the single column {}",
                                    name
                                )))
                            }
                        }
                    }
                    Value::Range { .. } => self.iter_values(&value)?.iter().map(Value::to_cell).collect(),
                    v if !has_columns => match sequence_len(v) {
                        Some(n) => operand_cells(v, n)?,
                        None => operand_cells(v, rows)?,
                    },
                    v => operand_cells(v, rows)?,
                };
                t.borrow_mut().set_column(Column::new(name.clone(), cells))?;
                Ok(())
            }
            Value::List(_) | Value::Tuple(_) => {
                let names = index.string_list("column")?;
                let sources: Vec<Vec<Cell>> = match &value {
                    Value::Table(other) => {
                        let other = other.borrow();
                        if other.num_columns() != names.len() {
                            return Err(ScriptError::value_error("Columns must be same length as key"));
                        }
                        other.columns().iter().map(|c| c.values.clone()).collect()
                    }
                    v => {
                        let cells = operand_cells(v, rows)?;
                        vec![cells; names.len()]
                    }
                };
                let mut table = t.borrow_mut();
                for (name, cells) in names.into_iter().zip(sources) {
                    table.set_column(Column::new(name, cells))?;
                }
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "cannot assign to a DataFrame with a '{}' key; use .loc[mask, column]",
                other.type_name()
            ))),
        }
    }

    pub(super) fn rename_all(&mut self, t: &Rc<RefCell<Table>>, names: Vec<String>) -> ScriptResult<()> {
        let mut table = t.borrow_mut();
        if names.len() != table.num_columns() {
            return Err(ScriptError::value_error(format!(
                "Length mismatch: Expected axis has {} elements, new values have {} elements",
                table.num_columns(),
                names.len()
            )));
        }
        let columns = table
            .columns()
            .iter()
            .zip(names)
            .map(|(c, name)| Column::new(name, c.values.clone()))
            .collect();
        *table = Table::new(columns)?;
        Ok(())
    }

    pub(super) fn table_invert(&mut self, v: &Value) -> ScriptResult<Value> {
        let t = table_of(v)?;
        let table = t.borrow();
        self.charge(table.num_rows() * table.num_columns())?;
        let result = map_columns(&table, |col| {
            col.values
                .iter()
                .map(|c| match c {
                    c if c.is_null() => Ok(Cell::Null),
                    Cell::Bool(b) => Ok(Cell::Bool(!b)),
                    other => Ok(unary_scalar(UnaryOp::Invert, &Value::from_cell(other))?.to_cell()),
                })
                .collect()
        })?;
        Ok(Value::table(result))
    }

    pub(super) fn table_binary(&mut self, op: BinOp, l: &Value, r: &Value) -> ScriptResult<Value> {
        let result = match (l, r) {
            (Value::Table(a), Value::Table(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                if a.column_names() != b.column_names() || a.num_rows() != b.num_rows() {
                    return Err(ScriptError::value_error(
                        "Can only operate on identically-labeled DataFrame objects",
                    ));
                }
                self.charge(a.num_rows() * a.num_columns())?;
                let mut columns = Vec::with_capacity(a.num_columns());
                for (x, y) in a.columns().iter().zip(b.columns()) {
                    let values = x
                        .values
                        .iter()
                        .zip(&y.values)
                        .map(|(p, q)| cell_binary(op, p, q))
                        .collect::<ScriptResult<Vec<_>>>()?;
                    columns.push(Column::new(x.name.clone(), values));
                }
                Table::new(columns)?
            }
            (Value::Table(t), scalar) | (scalar, Value::Table(t)) => {
                if !is_scalar(scalar) {
                    return Err(ScriptError::type_error(format!(
                        "unsupported operand type(s) for {}: 'DataFrame' and '{}'",
                        super::ops::op_symbol(op),
                        scalar.type_name()
                    )));
                }
                let table_left = matches!(l, Value::Table(_));
                let s = scalar.to_cell();
                let table = t.borrow();
                self.charge(table.num_rows() * table.num_columns())?;
                map_columns(&table, |col| {
                    col.values
                        .iter()
                        .map(|c| if table_left { cell_binary(op, c, &s) } else { cell_binary(op, &s, c) })
                        .collect()
                })?
            }
            _ => return Err(ScriptError::type_error("expected a DataFrame operand")),
        };
        Ok(Value::table(result))
    }

    // ===== loc / iloc =====

    pub(super) fn indexer_get(&mut self, ix: &Rc<Indexer>, index: &Value) -> ScriptResult<Value> {
        let table = ix.table.borrow();
        let (row_sel, col_sel) = split_index(index);
        let rows = row_selection(row_sel, table.num_rows(), ix.positional)?;
        if ix.series {
            let col = table
                .columns()
                .first()
                .ok_or_else(|| ScriptError::index_error("empty series"))?;
            return Ok(match rows {
                Selection::One(r) => Value::from_cell(&col.values[r]),
                Selection::Many(rs) => Value::series(Column::new(
                    col.name.clone(),
                    rs.iter().map(|&r| col.values[r].clone()).collect(),
                )),
            });
        }
        let cols = match col_sel {
            Some(sel) => column_selection(&table, sel, ix.positional)?,
            None => Selection::Many((0..table.num_columns()).collect()),
        };
        let columns = table.columns();
        Ok(match (rows, cols) {
            (Selection::One(r), Selection::One(c)) => Value::from_cell(&columns[c].values[r]),
            (Selection::One(r), Selection::Many(cs)) => {
                let mut dict = Dict::new();
                for c in cs {
                    dict.insert(Value::Str(columns[c].name.clone()), Value::from_cell(&columns[c].values[r]))?;
                }
                Value::dict(dict)
            }
            (Selection::Many(rs), Selection::One(c)) => Value::series(Column::new(
                columns[c].name.clone(),
                rs.iter().map(|&r| columns[c].values[r].clone()).collect(),
            )),
            (Selection::Many(rs), Selection::Many(cs)) => {
                self.charge(rs.len())?;
                let picked = Table::new(
                    cs.iter()
                        .map(|&c| {
                            Column::new(
                                columns[c].name.clone(),
                                rs.iter().map(|&r| columns[c].values[r].clone()).collect(),
                            )
                        })
                        .collect(),
                )?;
                Value::table(picked)
            }
        })
    }

    pub(super) fn indexer_set(&mut self, ix: &Rc<Indexer>, index: &Value, value: Value) -> ScriptResult<()> {
        if ix.series {
            return Err(ScriptError::type_error(
                "'Series' object does not support item assignment",
            ));
        }
        let (row_sel, col_sel) = split_index(index);
        let mut table = ix.table.borrow_mut();
        let n = table.num_rows();
        self.charge(n)?;
        let positions = match row_selection(row_sel, n, ix.positional)? {
            Selection::One(r) => vec![r],
            Selection::Many(rs) => rs,
        };
        let names: Vec<String> = match col_sel {
            None => table.column_names(),
            Some(sel) => match column_selection(&table, sel, ix.positional) {
                Ok(Selection::One(c)) => vec![table.columns()[c].name.clone()],
                Ok(Selection::Many(cs)) => cs.iter().map(|&c| table.columns()[c].name.clone()).collect(),
                Err(e) => match (sel, ix.positional) {
                    (Value::Str(new), false) => vec![new.clone()],
                    _ => return Err(e),
                },
            },
        };
        let fills: Vec<Cell> = match &value {
            // full-length series align by row position
            Value::Series(col) if col.len() == n => positions.iter().map(|&p| col.values[p].clone()).collect(),
            v => operand_cells(v, positions.len())?,
        };
        for name in names {
            let mut values = table
                .column(&name)
                .map(|c| c.values.clone())
                .unwrap_or_else(|| vec![Cell::Null; n]);
            for (&p, cell) in positions.iter().zip(&fills) {
                values[p] = cell.clone();
            }
            table.set_column(Column::new(name, values))?;
        }
        Ok(())
    }

    // ===== methods =====

    pub(super) fn table_method(&mut self, receiver: &Value, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        let t = table_of(receiver)?.clone();
        let rows = t.borrow().num_rows();
        self.charge(rows)?;
        let result = match name {
            "copy" => {
                args.kwarg("deep");
                Value::table(t.borrow().clone())
            }
            "head" | "tail" => {
                let n = count_arg(args.arg(0, "n"), 5)?;
                let positions = edge_positions(n, rows, name == "tail");
                Value::table(t.borrow().take_rows(&positions))
            }
            "dropna" => {
                let axis = axis_arg(args.kwarg("axis"))?;
                let how = match args.kwarg("how") {
                    None => NullHow::Any,
                    Some(Value::Str(s)) if s == "any" => NullHow::Any,
                    Some(Value::Str(s)) if s == "all" => NullHow::All,
                    Some(other) => {
                        return Err(ScriptError::value_error(format!(
                            "invalid how option: {}",
                            other.py_str()
                        )))
                    }
                };
                let subset = subset_arg(args.kwarg("subset"))?;
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let result = if axis == 1 {
                    let table = t.borrow();
                    let kept = table
                        .columns()
                        .iter()
                        .filter(|c| {
                            let nulls = c.null_count();
                            match how {
                                NullHow::Any => nulls == 0,
                                NullHow::All => c.is_empty() || nulls < c.len(),
                            }
                        })
                        .cloned()
                        .collect();
                    Table::new(kept)?
                } else {
                    t.borrow().drop_nulls(subset.as_deref(), how)?
                };
                emit(&t, result, inplace)
            }
            "drop_duplicates" | "duplicated" => {
                let subset = subset_arg(args.arg(0, "subset"))?;
                let keep = KeepMode::parse(args.arg(1, "keep"))?;
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                args.kwarg("ignore_index");
                let marks = {
                    let table = t.borrow();
                    let subset = table.resolve_subset(subset.as_deref())?;
                    let keys: Vec<Vec<CellKey>> = (0..rows)
                        .map(|r| subset.iter().map(|&c| table.columns()[c].values[r].key()).collect())
                        .collect();
                    duplicate_marks(&keys, keep)
                };
                if name == "duplicated" {
                    Value::series(Column::new("", marks.into_iter().map(Cell::Bool).collect()))
                } else {
                    let mask: Vec<bool> = marks.iter().map(|dup| !dup).collect();
                    let result = t.borrow().filter_mask(&mask)?;
                    emit(&t, result, inplace)
                }
            }
            "fillna" | "ffill" | "bfill" => {
                let value = if name == "fillna" { args.arg(0, "value") } else { None };
                let method = match name {
                    "ffill" => Some("ffill".to_string()),
                    "bfill" => Some("bfill".to_string()),
                    _ => match args.kwarg("method") {
                        Some(v) => Some(v.as_str("method")?.to_string()),
                        None => None,
                    },
                };
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let fills: HashMap<String, Cell> = match &value {
                    Some(Value::Dict(d)) => d
                        .borrow()
                        .entries()
                        .iter()
                        .map(|(k, v)| (k.py_str(), v.to_cell()))
                        .collect(),
                    _ => HashMap::new(),
                };
                let scalar = match &value {
                    Some(Value::Dict(_)) | None => None,
                    Some(v) => Some(v.to_cell()),
                };
                if value.is_none() && method.is_none() {
                    return Err(ScriptError::value_error("Must specify a fill 'value' or 'method'."));
                }
                let result = {
                    let table = t.borrow();
                    map_columns(&table, |col| {
                        if let Some(m) = &method {
                            return Ok(fill_forward(&col.values, m == "bfill" || m == "backfill"));
                        }
                        let fill = fills.get(&col.name).or(scalar.as_ref());
                        Ok(match fill {
                            Some(fill) => col
                                .values
                                .iter()
                                .map(|c| if c.is_null() { fill.clone() } else { c.clone() })
                                .collect(),
                            None => col.values.clone(),
                        })
                    })?
                };
                emit(&t, result, inplace)
            }
            "rename" => {
                let mapping = args.kwarg("columns");
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let old_names = t.borrow().column_names();
                let new_names = match mapping {
                    Some(Value::Dict(d)) => {
                        let lookup: HashMap<String, String> = d
                            .borrow()
                            .entries()
                            .iter()
                            .map(|(k, v)| (k.py_str(), v.py_str()))
                            .collect();
                        old_names
                            .iter()
                            .map(|n| lookup.get(n).cloned().unwrap_or_else(|| n.clone()))
                            .collect::<Vec<_>>()
                    }
                    Some(func @ (Value::Function(_) | Value::Builtin(_) | Value::Method(_))) => {
                        let mut renamed = Vec::with_capacity(old_names.len());
                        for n in &old_names {
                            renamed.push(self.call1(&func, Value::Str(n.clone()))?.py_str());
                        }
                        renamed
                    }
                    Some(other) => {
                        return Err(ScriptError::type_error(format!(
                            "rename(columns=) expects a dict or a function, not '{}'",
                            other.type_name()
                        )))
                    }
                    None => old_names.clone(),
                };
                let result = {
                    let table = t.borrow();
                    Table::new(
                        table
                            .columns()
                            .iter()
                            .zip(new_names)
                            .map(|(c, n)| Column::new(n, c.values.clone()))
                            .collect(),
                    )?
                };
                emit(&t, result, inplace)
            }
            "drop" => {
                let labels = args.arg(0, "labels");
                let axis = axis_arg(args.arg(1, "axis"))?;
                let columns = args.kwarg("columns");
                let index = args.kwarg("index");
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let ignore_missing = match args.kwarg("errors") {
                    Some(v) => v.as_str("errors")? == "ignore",
                    None => false,
                };
                let result = match (columns, index, labels) {
                    (Some(cols), _, _) => drop_columns(&t.borrow(), &cols, ignore_missing)?,
                    (None, Some(rows_v), _) => drop_rows(&t.borrow(), &rows_v, ignore_missing)?,
                    (None, None, Some(labels)) if axis == 1 => drop_columns(&t.borrow(), &labels, ignore_missing)?,
                    (None, None, Some(labels)) => drop_rows(&t.borrow(), &labels, ignore_missing)?,
                    (None, None, None) => {
                        return Err(ScriptError::value_error(
                            "Need to specify at least one of 'labels', 'index' or 'columns'",
                        ))
                    }
                };
                emit(&t, result, inplace)
            }
            "sort_values" => {
                let by = args.required(0, "by", name)?.string_list("by")?;
                let ascending = match args.arg(1, "ascending") {
                    None => vec![true; by.len()],
                    Some(Value::List(items)) => items
                        .borrow()
                        .iter()
                        .map(Value::truthy)
                        .collect::<ScriptResult<Vec<_>>>()?,
                    Some(v) => vec![v.truthy()?; by.len()],
                };
                if ascending.len() != by.len() {
                    return Err(ScriptError::value_error(format!(
                        "Length of ascending ({}) != length of by ({})",
                        ascending.len(),
                        by.len()
                    )));
                }
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                args.kwarg("na_position");
                args.kwarg("ignore_index");
                let result = t.borrow().sort_by(&by, &ascending)?;
                emit(&t, result, inplace)
            }
            "reset_index" => {
                args.kwarg("drop");
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let result = t.borrow().clone();
                emit(&t, result, inplace)
            }
            "astype" => {
                let spec = args.required(0, "dtype", name)?;
                let result = {
                    let table = t.borrow();
                    match &spec {
                        Value::Dict(d) => {
                            let mut out = table.clone();
                            for (k, v) in d.borrow().entries() {
                                let column_name = k.py_str();
                                let col = table.column(&column_name).ok_or_else(|| {
                                    ScriptError::key_error(&column_name)
                                })?;
                                out.set_column(convert_column(col, Dtype::parse(v)?)?)?;
                            }
                            out
                        }
                        other => {
                            let dtype = Dtype::parse(other)?;
                            Table::new(
                                table
                                    .columns()
                                    .iter()
                                    .map(|c| convert_column(c, dtype))
                                    .collect::<ScriptResult<Vec<_>>>()?,
                            )?
                        }
                    }
                };
                Value::table(result)
            }
            "groupby" => {
                let keys = args.required(0, "by", name)?.string_list("by")?;
                for kw in ["as_index", "sort", "dropna"] {
                    args.kwarg(kw);
                }
                let table = t.borrow().clone();
                if let Some(missing) = keys.iter().find(|k| table.column(k).is_none()) {
                    return Err(ScriptError::key_error(missing));
                }
                Value::GroupBy(Rc::new(GroupBy {
                    table,
                    keys,
                    selection: None,
                }))
            }
            "to_dict" => {
                let orient = match args.arg(0, "orient") {
                    Some(v) => v.as_str("orient")?.to_string(),
                    None => "dict".to_string(),
                };
                let table = t.borrow();
                self.charge(rows * table.num_columns())?;
                to_dict(&table, &orient)?
            }
            "apply" => {
                let func = args.required(0, "func", name)?;
                let axis = axis_arg(args.arg(1, "axis"))?;
                let snapshot = t.borrow().clone();
                if axis == 1 {
                    let mut values = Vec::with_capacity(rows);
                    for r in 0..rows {
                        let row = row_dict(&snapshot, r)?;
                        values.push(self.call1(&func, row)?.to_cell());
                    }
                    Value::series(Column::new("", values))
                } else {
                    let mut results = Vec::with_capacity(snapshot.num_columns());
                    for col in snapshot.columns() {
                        results.push((col.name.clone(), self.call1(&func, Value::series(col.clone()))?));
                    }
                    let all_series = results
                        .iter()
                        .all(|(_, v)| matches!(v, Value::Series(s) if s.len() == rows));
                    if all_series {
                        let columns = results
                            .into_iter()
                            .filter_map(|(n, v)| match v {
                                Value::Series(s) => Some(Column::new(n, s.values.clone())),
                                _ => None,
                            })
                            .collect();
                        Value::table(Table::new(columns)?)
                    } else {
                        let mut dict = Dict::new();
                        for (n, v) in results {
                            dict.insert(Value::Str(n), v)?;
                        }
                        Value::dict(dict)
                    }
                }
            }
            "iterrows" => {
                let table = t.borrow();
                self.charge(rows * table.num_columns())?;
                Value::list(
                    (0..rows)
                        .map(|r| Ok(Value::tuple(vec![Value::Int(r as i64), row_dict(&table, r)?])))
                        .collect::<ScriptResult<Vec<_>>>()?,
                )
            }
            "isna" | "isnull" | "notna" | "notnull" => {
                let want_null = name.starts_with("is");
                let table = t.borrow();
                Value::table(map_columns(&table, |col| {
                    Ok(col.values.iter().map(|c| Cell::Bool(c.is_null() == want_null)).collect())
                })?)
            }
            "sum" | "mean" | "median" | "std" | "min" | "max" | "count" | "nunique" => {
                let numeric_only = flag_arg(args.kwarg("numeric_only"), false)?;
                let table = t.borrow();
                table_reduce(&table, name, numeric_only)?
            }
            "replace" => {
                let to_replace = args.required(0, "to_replace", name)?;
                let value = args.arg(1, "value");
                let inplace = flag_arg(args.kwarg("inplace"), false)?;
                let pairs = replace_pairs(&to_replace, value.as_ref())?;
                let result = {
                    let table = t.borrow();
                    map_columns(&table, |col| Ok(replace_cells(&col.values, &pairs)))?
                };
                emit(&t, result, inplace)
            }
            "assign" => {
                let mut out = t.borrow().clone();
                for (column, v) in std::mem::take(&mut args).into_kwargs() {
                    let v = match v {
                        f @ (Value::Function(_) | Value::Method(_)) => self.call1(&f, Value::table(out.clone()))?,
                        other => other,
                    };
                    let cells = operand_cells(&v, out.num_rows())?;
                    out.set_column(Column::new(column, cells))?;
                }
                return Ok(Value::table(out));
            }
            "round" => {
                let digits = count_arg(args.arg(0, "decimals"), 0)?;
                let table = t.borrow();
                Value::table(map_columns(&table, |col| {
                    Ok(col
                        .values
                        .iter()
                        .map(|c| match c {
                            Cell::Float(f) => Cell::Float(round_float(*f, digits)),
                            other => other.clone(),
                        })
                        .collect())
                })?)
            }
            _ => return Err(ScriptError::attribute_error("DataFrame", name)),
        };
        args.finish(name)?;
        Ok(result)
    }

    // ===== pd.* =====

    pub(super) fn pd_dataframe(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let data = args.arg(0, "data");
        let columns = match args.arg(1, "columns") {
            Some(Value::None) | None => None,
            Some(v) => Some(v.string_list("columns")?),
        };
        args.finish("DataFrame")?;
        let empty = |names: Option<Vec<String>>| -> ScriptResult<Table> {
            Ok(Table::new(
                names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| Column::new(n, Vec::new()))
                    .collect(),
            )?)
        };
        let table = match data {
            None | Some(Value::None) => empty(columns)?,
            Some(Value::Table(t)) => {
                let t = t.borrow().clone();
                match &columns {
                    Some(names) => t.select(names)?,
                    None => t,
                }
            }
            Some(Value::Series(col)) => Table::new(vec![col.as_ref().clone()])?,
            Some(Value::Dict(d)) => {
                let entries: Vec<(String, Value)> = d
                    .borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| (k.py_str(), v.clone()))
                    .collect();
                let entries = match &columns {
                    Some(names) => names
                        .iter()
                        .map(|n| {
                            let v = entries.iter().find(|(k, _)| k == n).map(|(_, v)| v.clone());
                            (n.clone(), v.unwrap_or(Value::None))
                        })
                        .collect(),
                    None => entries,
                };
                let Some(n) = entries.iter().filter_map(|(_, v)| sequence_len(v)).max() else {
                    if entries.is_empty() {
                        return Ok(Value::table(Table::default()));
                    }
                    return Err(ScriptError::value_error(
                        "If using all scalar values, you must pass an index",
                    ));
                };
                let mut built = Vec::with_capacity(entries.len());
                for (name, v) in entries {
                    let cells = if sequence_len(&v).is_some() {
                        let cells: Vec<Cell> = self.iter_values(&v)?.iter().map(Value::to_cell).collect();
                        if cells.len() != n {
                            return Err(ScriptError::value_error("All arrays must be of the same length"));
                        }
                        cells
                    } else {
                        vec![v.to_cell(); n]
                    };
                    built.push(Column::new(name, cells));
                }
                Table::new(built)?
            }
            Some(list @ (Value::List(_) | Value::Tuple(_))) => {
                let items = self.iter_values(&list)?;
                if items.is_empty() {
                    empty(columns)?
                } else if items.iter().all(|v| matches!(v, Value::Dict(_))) {
                    records_table(&items, columns.as_deref())?
                } else {
                    let mut rows = Vec::with_capacity(items.len());
                    for item in &items {
                        rows.push(self.iter_values(item)?.iter().map(Value::to_cell).collect::<Vec<_>>());
                    }
                    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                    let names = columns.unwrap_or_else(|| (0..width).map(|i| i.to_string()).collect());
                    Table::from_rows(names, rows)?
                }
            }
            Some(other) => {
                return Err(ScriptError::value_error(format!(
                    "DataFrame constructor not properly called with '{}'",
                    other.type_name()
                )))
            }
        };
        self.charge(table.num_rows() * table.num_columns())?;
        Ok(Value::table(table))
    }

    pub(super) fn pd_series(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let data = args.arg(0, "data");
        let name = args.kwarg("name");
        let dtype = args.kwarg("dtype");
        args.finish("Series")?;
        let (default_name, cells): (String, Vec<Cell>) = match data {
            None | Some(Value::None) => (String::new(), Vec::new()),
            Some(Value::Series(col)) => (col.name.clone(), col.values.clone()),
            Some(Value::Dict(d)) => (String::new(), d.borrow().values().iter().map(Value::to_cell).collect()),
            Some(v @ (Value::List(_) | Value::Tuple(_) | Value::Range { .. })) => {
                (String::new(), self.iter_values(&v)?.iter().map(Value::to_cell).collect())
            }
            Some(scalar) => (String::new(), vec![scalar.to_cell()]),
        };
        let name = match name {
            Some(Value::None) | None => default_name,
            Some(v) => v.py_str(),
        };
        let mut column = Column::new(name, cells);
        if let Some(dtype) = dtype {
            column = convert_column(&column, Dtype::parse(&dtype)?)?;
        }
        Ok(Value::series(column))
    }

    pub(super) fn pd_concat(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let objs = args.required(0, "objs", "concat")?;
        let axis = axis_arg(args.kwarg("axis"))?;
        args.kwarg("ignore_index");
        args.finish("concat")?;
        let items = self.iter_values(&objs)?;
        if items.is_empty() {
            return Err(ScriptError::value_error("No objects to concatenate"));
        }
        if items.iter().all(|v| matches!(v, Value::Table(_))) {
            let tables: Vec<Table> = items
                .iter()
                .filter_map(|v| match v {
                    Value::Table(t) => Some(t.borrow().clone()),
                    _ => None,
                })
                .collect();
            let result = if axis == 1 {
                Table::new(tables.into_iter().flat_map(|t| t.columns().to_vec()).collect())?
            } else {
                Table::concat(&tables)
            };
            self.charge(result.num_rows())?;
            return Ok(Value::table(result));
        }
        if items.iter().all(|v| matches!(v, Value::Series(_))) {
            let columns: Vec<Column> = items
                .iter()
                .filter_map(|v| match v {
                    Value::Series(c) => Some(c.as_ref().clone()),
                    _ => None,
                })
                .collect();
            if axis == 1 {
                return Ok(Value::table(Table::new(columns)?));
            }
            let name = columns.first().map(|c| c.name.clone()).unwrap_or_default();
            let values: Vec<Cell> = columns.into_iter().flat_map(|c| c.values).collect();
            self.charge(values.len())?;
            return Ok(Value::series(Column::new(name, values)));
        }
        Err(ScriptError::type_error(
            "cannot concatenate object of type other than DataFrame or Series, or a mix of both",
        ))
    }

    pub(super) fn pd_to_numeric(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let arg = args.required(0, "arg", "to_numeric")?;
        let on_error = OnError::parse(args.kwarg("errors"))?;
        args.kwarg("downcast");
        args.finish("to_numeric")?;
        if let Some(n) = sequence_len(&arg) {
            self.charge(n)?;
        }
        convert_series_or_scalar(&arg, on_error, "string", numeric_cell)
    }

    pub(super) fn pd_to_datetime(&mut self, mut args: CallArgs) -> ScriptResult<Value> {
        let arg = args.required(0, "arg", "to_datetime")?;
        let on_error = OnError::parse(args.kwarg("errors"))?;
        let format = match args.kwarg("format") {
            Some(Value::None) | None => None,
            Some(v) => Some(v.as_str("format")?.to_string()),
        };
        args.kwarg("dayfirst");
        args.finish("to_datetime")?;
        if let Some(n) = sequence_len(&arg) {
            self.charge(n)?;
        }
        convert_series_or_scalar(&arg, on_error, "datetime string", |c| datetime_cell(c, format.as_deref()))
    }

    pub(super) fn pd_isna(&mut self, mut args: CallArgs, negate: bool) -> ScriptResult<Value> {
        let obj = args.required(0, "obj", if negate { "notna" } else { "isna" })?;
        args.finish(if negate { "notna" } else { "isna" })?;
        let method = if negate { "notna" } else { "isna" };
        match &obj {
            Value::Series(col) => self.series_method(col, method, CallArgs::default()),
            Value::Table(_) => self.table_method(&obj, method, CallArgs::default()),
            other => Ok(Value::Bool(other.is_missing() != negate)),
        }
    }
}

fn axis_arg(v: Option<Value>) -> ScriptResult<i64> {
    match v {
        None | Some(Value::None) => Ok(0),
        Some(Value::Str(s)) if s == "index" || s == "rows" => Ok(0),
        Some(Value::Str(s)) if s == "columns" => Ok(1),
        Some(v) => match v.as_int("axis")? {
            a @ (0 | 1) => Ok(a),
            other => Err(ScriptError::value_error(format!("No axis named {}", other))),
        },
    }
}

fn drop_columns(table: &Table, labels: &Value, ignore_missing: bool) -> ScriptResult<Table> {
    let names = labels.string_list("columns")?;
    let missing: Vec<&String> = names.iter().filter(|n| table.column(n).is_none()).collect();
    if !missing.is_empty() && !ignore_missing {
        let listed: Vec<String> = missing.iter().map(|n| repr_str(n)).collect();
        return Err(ScriptError::new(
            ErrorKind::Key,
            format!("\"[{}] not found in axis\"", listed.join(", ")),
        ));
    }
    let kept = table
        .columns()
        .iter()
        .filter(|c| !names.contains(&c.name))
        .cloned()
        .collect();
    Ok(Table::new(kept)?)
}

fn drop_rows(table: &Table, labels: &Value, ignore_missing: bool) -> ScriptResult<Table> {
    let rows = table.num_rows();
    let wanted: Vec<i64> = match labels {
        Value::List(items) => items
            .borrow()
            .iter()
            .map(|v| v.as_int("row label"))
            .collect::<ScriptResult<_>>()?,
        Value::Range { .. } | Value::Tuple(_) | Value::Series(_) => {
            return drop_rows(table, &Value::list(value_items(labels)), ignore_missing)
        }
        v => vec![v.as_int("row label")?],
    };
    let mut drop = vec![false; rows];
    for label in wanted {
        match usize::try_from(label).ok().filter(|&i| i < rows) {
            Some(i) => drop[i] = true,
            None if ignore_missing => {}
            None => {
                return Err(ScriptError::new(
                    ErrorKind::Key,
                    format!("\"[{}] not found in axis\"", label),
                ))
            }
        }
    }
    let keep: Vec<bool> = drop.iter().map(|d| !d).collect();
    Ok(table.filter_mask(&keep)?)
}

fn value_items(v: &Value) -> Vec<Value> {
    match v {
        Value::Range { start, stop, step } => {
            let n = range_len(*start, *stop, *step);
            (0..n.min(MAX_SEQUENCE)).map(|i| Value::Int(range_item(*start, *step, i))).collect()
        }
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Series(col) => col.values.iter().map(Value::from_cell).collect(),
        Value::List(items) => items.borrow().clone(),
        other => vec![other.clone()],
    }
}

fn records_table(items: &[Value], columns: Option<&[String]>) -> ScriptResult<Table> {
    let mut names: Vec<String> = Vec::new();
    let mut records: Vec<HashMap<String, Cell>> = Vec::with_capacity(items.len());
    for item in items {
        let Value::Dict(d) = item else { continue };
        let mut record = HashMap::new();
        for (k, v) in d.borrow().entries() {
            let key = k.py_str();
            if !names.contains(&key) {
                names.push(key.clone());
            }
            record.insert(key, v.to_cell());
        }
        records.push(record);
    }
    let names = columns.map(<[String]>::to_vec).unwrap_or(names);
    let built = names
        .into_iter()
        .map(|n| {
            let values = records.iter().map(|r| r.get(&n).cloned().unwrap_or(Cell::Null)).collect();
            Column::new(n, values)
        })
        .collect();
    Ok(Table::new(built)?)
}

fn to_dict(table: &Table, orient: &str) -> ScriptResult<Value> {
    let rows = table.num_rows();
    Ok(match orient {
        "records" => Value::list((0..rows).map(|r| row_dict(table, r)).collect::<ScriptResult<_>>()?),
        "index" => {
            let mut dict = Dict::new();
            for r in 0..rows {
                dict.insert(Value::Int(r as i64), row_dict(table, r)?)?;
            }
            Value::dict(dict)
        }
        "list" | "dict" | "series" => {
            let mut dict = Dict::new();
            for col in table.columns() {
                let v = match orient {
                    "list" => Value::list(col.values.iter().map(Value::from_cell).collect()),
                    "series" => Value::series(col.clone()),
                    _ => {
                        let mut inner = Dict::new();
                        for (r, c) in col.values.iter().enumerate() {
                            inner.insert(Value::Int(r as i64), Value::from_cell(c))?;
                        }
                        Value::dict(inner)
                    }
                };
                dict.insert(Value::Str(col.name.clone()), v)?;
            }
            Value::dict(dict)
        }
        other => {
            return Err(ScriptError::value_error(format!(
                "orient '{}' not understood",
                other
            )))
        }
    })
}

/// Per-column reduction of a whole frame, keyed by column name. Averages
/// skip non-numeric columns; sums skip datetime columns.
fn table_reduce(table: &Table, func: &str, numeric_only: bool) -> ScriptResult<Value> {
    let needs_numbers = numeric_only || matches!(func, "mean" | "median" | "std");
    let mut dict = Dict::new();
    for col in table.columns() {
        let numeric = col.values.iter().all(|c| c.is_null() || c.as_f64().is_some());
        if needs_numbers && !numeric {
            continue;
        }
        if func == "sum" && col.values.iter().any(|c| matches!(c, Cell::DateTime(_))) {
            continue;
        }
        dict.insert(
            Value::Str(col.name.clone()),
            Value::from_cell(&reduce_cells(func, &col.values)?),
        )?;
    }
    Ok(Value::dict(dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures::{int, table, text};

    #[test]
    fn test_row_selection_label_slice_is_inclusive() {
        let sel = Value::Slice {
            lower: Some(1),
            upper: Some(2),
            step: None,
        };
        match row_selection(&sel, 5, false).unwrap() {
            Selection::Many(rows) => assert_eq!(rows, vec![1, 2]),
            Selection::One(_) => panic!("expected many"),
        }
        match row_selection(&sel, 5, true).unwrap() {
            Selection::Many(rows) => assert_eq!(rows, vec![1]),
            Selection::One(_) => panic!("expected many"),
        }
    }

    #[test]
    fn test_row_selection_label_out_of_range() {
        let err = row_selection(&Value::Int(-1), 3, false).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Key);
        assert!(matches!(row_selection(&Value::Int(-1), 3, true), Ok(Selection::One(2))));
    }

    #[test]
    fn test_drop_columns_reports_missing() {
        let t = table(&["a", "b"], vec![vec![int(1), text("x")]]);
        let err = drop_columns(&t, &Value::str("zz"), false).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: \"['zz'] not found in axis\"");
        let kept = drop_columns(&t, &Value::str("zz"), true).unwrap();
        assert_eq!(kept.num_columns(), 2);
    }

    #[test]
    fn test_numeric_cell_parsing() {
        assert_eq!(numeric_cell(&text(" 42 ")), Some(int(42)));
        assert_eq!(numeric_cell(&text("2.5")), Some(Cell::Float(2.5)));
        assert_eq!(numeric_cell(&text("n/a")), Some(Cell::Null));
        assert_eq!(numeric_cell(&text("abc")), None);
    }

    #[test]
    fn test_to_dict_records() {
        let t = table(&["a", "b"], vec![vec![int(1), text("x")], vec![int(2), Cell::Null]]);
        let v = to_dict(&t, "records").unwrap();
        assert_eq!(v.py_repr(), "[{'a': 1, 'b': 'x'}, {'a': 2, 'b': None}]");
        let v = to_dict(&t, "list").unwrap();
        assert_eq!(v.py_repr(), "{'a': [1, 2], 'b': ['x', None]}");
    }

    #[test]
    fn test_table_reduce_skips_text_for_mean() {
        let t = table(&["n", "s"], vec![vec![int(2), text("x")], vec![int(4), text("y")]]);
        assert_eq!(table_reduce(&t, "mean", false).unwrap().py_repr(), "{'n': 3.0}");
        assert_eq!(table_reduce(&t, "count", false).unwrap().py_repr(), "{'n': 2, 's': 2}");
    }
}
