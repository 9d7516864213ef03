//! `df.groupby(...)` aggregation. Results are flat tables: one column per
//! grouping key followed by one column per aggregate, groups in key order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use super::error::{ScriptError, ScriptResult};
use super::interp::Interpreter;
use super::series::reduce_cells;
use super::value::*;
use crate::table::{Cell, CellKey, Column, Table};

pub(super) const GROUPBY_METHODS: &[&str] = &[
    "sum", "mean", "median", "std", "count", "min", "max", "size", "agg", "aggregate", "first",
    "last", "nunique",
];

const NUMERIC_ONLY: &[&str] = &["mean", "median", "std"];

#[derive(Debug, Clone)]
pub(super) struct Group {
    pub key: Vec<Cell>,
    pub rows: Vec<usize>,
}

enum AggFunc {
    Named(String),
    Call(Value),
}

struct AggPlan {
    output: String,
    source: String,
    func: AggFunc,
}

/// Partitions the rows of `table` by the values of `keys`. Rows with a
/// missing key are left out.
pub(super) fn group_rows(table: &Table, keys: &[String]) -> ScriptResult<Vec<Group>> {
    let key_columns = keys
        .iter()
        .map(|k| table.column(k).ok_or_else(|| ScriptError::key_error(k)))
        .collect::<ScriptResult<Vec<&Column>>>()?;
    let mut slots: HashMap<Vec<CellKey>, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for row in 0..table.num_rows() {
        let cells: Vec<Cell> = key_columns.iter().map(|c| c.values[row].clone()).collect();
        if cells.iter().any(Cell::is_null) {
            continue;
        }
        let key: Vec<CellKey> = cells.iter().map(Cell::key).collect();
        match slots.get(&key) {
            Some(&slot) => groups[slot].rows.push(row),
            None => {
                slots.insert(key, groups.len());
                groups.push(Group {
                    key: cells,
                    rows: vec![row],
                });
            }
        }
    }
    groups.sort_by(|a, b| {
        a.key
            .iter()
            .zip(&b.key)
            .map(|(x, y)| x.sort_cmp(y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(groups)
}

fn key_columns(gb: &GroupBy, groups: &[Group]) -> Vec<Column> {
    gb.keys
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name.clone(), groups.iter().map(|g| g.key[i].clone()).collect()))
        .collect()
}

/// Columns an aggregate applies to: the explicit selection, or every
/// non-key column. Averages without a selection skip non-numeric columns.
fn value_columns(gb: &GroupBy, func: &str) -> Vec<String> {
    if let Some(selection) = &gb.selection {
        return selection.clone();
    }
    gb.table
        .columns()
        .iter()
        .filter(|c| !gb.keys.contains(&c.name))
        .filter(|c| {
            !NUMERIC_ONLY.contains(&func) || c.values.iter().all(|v| v.is_null() || v.as_f64().is_some())
        })
        .map(|c| c.name.clone())
        .collect()
}

fn func_name(v: &Value) -> ScriptResult<String> {
    let name = v.as_str("aggregation")?;
    match name {
        "sum" | "mean" | "median" | "std" | "count" | "min" | "max" | "size" | "first" | "last"
        | "nunique" => Ok(name.to_string()),
        other => Err(ScriptError::attribute_error("SeriesGroupBy", other)),
    }
}

fn is_callable(v: &Value) -> bool {
    matches!(v, Value::Function(_) | Value::Builtin(_) | Value::Method(_))
}

impl Interpreter {
    pub(super) fn groupby_method(&mut self, gb: &Rc<GroupBy>, name: &str, mut args: CallArgs) -> ScriptResult<Value> {
        self.charge(gb.table.num_rows())?;
        let groups = group_rows(&gb.table, &gb.keys)?;
        let plan = match name {
            "size" => {
                args.finish(name)?;
                let mut columns = key_columns(gb, &groups);
                columns.push(Column::new(
                    "size",
                    groups.iter().map(|g| Cell::Int(g.rows.len() as i64)).collect(),
                ));
                return Ok(Value::table(Table::new(columns)?));
            }
            "agg" | "aggregate" => self.agg_plan(gb, args)?,
            _ if GROUPBY_METHODS.contains(&name) => {
                args.kwarg("numeric_only");
                args.finish(name)?;
                value_columns(gb, name)
                    .into_iter()
                    .map(|c| AggPlan {
                        output: c.clone(),
                        source: c,
                        func: AggFunc::Named(name.to_string()),
                    })
                    .collect()
            }
            _ => return Err(ScriptError::attribute_error("DataFrameGroupBy", name)),
        };
        let table = self.aggregate(gb, &groups, plan)?;
        Ok(Value::table(table))
    }

    fn agg_plan(&mut self, gb: &GroupBy, mut args: CallArgs) -> ScriptResult<Vec<AggPlan>> {
        let spec = args.arg(0, "func");
        let named = args.into_kwargs();
        let per_column = |columns: Vec<String>, funcs: &[String]| -> Vec<AggPlan> {
            columns
                .iter()
                .flat_map(|c| {
                    funcs.iter().map(move |f| AggPlan {
                        output: if funcs.len() == 1 { c.clone() } else { format!("{}_{}", c, f) },
                        source: c.clone(),
                        func: AggFunc::Named(f.clone()),
                    })
                })
                .collect()
        };
        match spec {
            Some(Value::Str(_)) | Some(Value::List(_)) | Some(Value::Tuple(_)) => {
                let funcs = match &spec {
                    Some(v @ Value::Str(_)) => vec![func_name(v)?],
                    Some(v) => self.iter_values(v)?.iter().map(func_name).collect::<ScriptResult<_>>()?,
                    None => Vec::new(),
                };
                let columns = value_columns(gb, funcs.first().map(String::as_str).unwrap_or(""));
                Ok(per_column(columns, &funcs))
            }
            Some(Value::Dict(d)) => {
                let entries = d.borrow().entries().to_vec();
                let mut plan = Vec::new();
                for (k, v) in entries {
                    let column = k.py_str();
                    let funcs = match &v {
                        Value::Str(_) => vec![func_name(&v)?],
                        other => self.iter_values(other)?.iter().map(func_name).collect::<ScriptResult<_>>()?,
                    };
                    plan.extend(per_column(vec![column], &funcs));
                }
                Ok(plan)
            }
            Some(callable) if is_callable(&callable) => Ok(value_columns(gb, "")
                .into_iter()
                .map(|c| AggPlan {
                    output: c.clone(),
                    source: c,
                    func: AggFunc::Call(callable.clone()),
                })
                .collect()),
            Some(other) => Err(ScriptError::type_error(format!(
                "agg() cannot use a '{}' as the aggregation",
                other.type_name()
            ))),
            None if named.is_empty() => Err(ScriptError::type_error("agg() missing required argument: 'func'")),
            None => named
                .into_iter()
                .map(|(output, v)| {
                    let Value::Tuple(pair) = &v else {
                        return Err(ScriptError::type_error(format!(
                            "named aggregation '{}' must be a (column, function) tuple",
                            output
                        )));
                    };
                    let [source, func] = pair.as_slice() else {
                        return Err(ScriptError::type_error(format!(
                            "named aggregation '{}' must be a (column, function) tuple",
                            output
                        )));
                    };
                    let func = if is_callable(func) {
                        AggFunc::Call(func.clone())
                    } else {
                        AggFunc::Named(func_name(func)?)
                    };
                    Ok(AggPlan {
                        output,
                        source: source.as_str("column")?.to_string(),
                        func,
                    })
                })
                .collect(),
        }
    }

    fn aggregate(&mut self, gb: &GroupBy, groups: &[Group], plan: Vec<AggPlan>) -> ScriptResult<Table> {
        let mut columns = key_columns(gb, groups);
        for step in plan {
            let source = gb
                .table
                .column(&step.source)
                .ok_or_else(|| ScriptError::key_error(&step.source))?;
            let mut values = Vec::with_capacity(groups.len());
            for group in groups {
                let cells: Vec<Cell> = group.rows.iter().map(|&r| source.values[r].clone()).collect();
                let cell = match &step.func {
                    AggFunc::Named(f) => reduce_cells(f, &cells)?,
                    AggFunc::Call(func) => self
                        .call1(func, Value::series(Column::new(step.source.clone(), cells)))?
                        .to_cell(),
                };
                values.push(cell);
            }
            columns.push(Column::new(step.output, values));
        }
        Ok(Table::new(columns)?)
    }

    /// `for key, group in df.groupby(...)`: one `(key, frame)` pair per group.
    pub(super) fn groupby_items(&mut self, gb: &Rc<GroupBy>) -> ScriptResult<Vec<Value>> {
        self.charge(gb.table.num_rows())?;
        let groups = group_rows(&gb.table, &gb.keys)?;
        let mut items = Vec::with_capacity(groups.len());
        for group in groups {
            let key = match group.key.as_slice() {
                [single] => Value::from_cell(single),
                many => Value::tuple(many.iter().map(Value::from_cell).collect()),
            };
            let rows = gb.table.take_rows(&group.rows);
            let part = match &gb.selection {
                Some(sel) if sel.len() == 1 => rows
                    .column(&sel[0])
                    .map(|c| Value::series(c.clone()))
                    .ok_or_else(|| ScriptError::key_error(&sel[0]))?,
                Some(sel) => Value::table(rows.select(sel)?),
                None => Value::table(rows),
            };
            items.push(Value::tuple(vec![key, part]));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures::{int, table, text};

    #[test]
    fn test_group_rows_sorted_and_skips_null_keys() {
        let t = table(
            &["k", "v"],
            vec![
                vec![text("b"), int(1)],
                vec![text("a"), int(2)],
                vec![Cell::Null, int(3)],
                vec![text("b"), int(4)],
            ],
        );
        let groups = group_rows(&t, &["k".to_string()]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, vec![text("a")]);
        assert_eq!(groups[0].rows, vec![1]);
        assert_eq!(groups[1].rows, vec![0, 3]);
    }

    #[test]
    fn test_group_rows_missing_key() {
        let t = table(&["k"], vec![vec![int(1)]]);
        let err = group_rows(&t, &["nope".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'nope'");
    }

    #[test]
    fn test_value_columns_skip_text_for_mean() {
        let gb = GroupBy {
            table: table(&["k", "n", "s"], vec![vec![text("a"), int(1), text("x")]]),
            keys: vec!["k".to_string()],
            selection: None,
        };
        assert_eq!(value_columns(&gb, "mean"), vec!["n".to_string()]);
        assert_eq!(value_columns(&gb, "count"), vec!["n".to_string(), "s".to_string()]);
    }
}
