//! Tabular data model
//!
//! A [`Table`] is an ordered list of equally long, uniquely named columns of
//! [`Cell`]s. Every other part of the crate (registry, cleaning operators,
//! the sandbox, the importers) speaks this type.

mod infer;
mod render;

pub use infer::{infer_column, is_na_token, parse_datetime};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// A single value in a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

/// Hashable projection of a cell used for duplicate detection and grouping.
/// Integral floats collapse onto ints so `1` and `1.0` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// NaN floats count as missing, matching how imported numeric gaps behave.
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Text(_) => "text",
            Cell::DateTime(_) => "datetime",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Text rendering of a non-null cell; `None` for missing values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Float(f) if f.is_nan() => None,
            Cell::Bool(b) => Some(if *b { "True".to_string() } else { "False".to_string() }),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => Some(format_float(*f)),
            Cell::Text(s) => Some(s.clone()),
            Cell::DateTime(dt) => Some(format_datetime(dt)),
        }
    }

    /// Converts the cell to text, leaving missing values missing.
    pub fn to_text_cell(&self) -> Cell {
        match self.as_text() {
            Some(text) => Cell::Text(text),
            None => Cell::Null,
        }
    }

    pub fn key(&self) -> CellKey {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Int(i) => CellKey::Int(*i),
            Cell::Float(f) if f.is_nan() => CellKey::Null,
            Cell::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellKey::Int(*f as i64),
            Cell::Float(f) => CellKey::Float(f.to_bits()),
            Cell::Text(s) => CellKey::Text(s.clone()),
            Cell::DateTime(dt) => CellKey::DateTime(*dt),
        }
    }

    /// Total order used for sorting and group ordering: missing values sort
    /// last, numbers compare numerically, mixed kinds fall back to a fixed
    /// kind rank.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }
        if let (Some(a), Some(b)) = (self.numeric(), other.numeric()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        match (self, other) {
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::DateTime(a), Cell::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Bool(_) | Cell::Int(_) | Cell::Float(_) => 0,
            Cell::DateTime(_) => 1,
            Cell::Text(_) => 2,
            Cell::Null => 3,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
            Cell::DateTime(dt) => serde_json::Value::String(format_datetime(dt)),
        }
    }
}

/// Python-style float rendering: integral values keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Which occurrence of a duplicated row survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Whether a row is dropped when any or all of the inspected cells are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullHow {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("column not found: '{0}'")]
    MissingColumn(String),

    #[error("duplicate column name: '{0}'")]
    DuplicateColumn(String),

    #[error("length mismatch: column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// pandas-flavoured dtype label derived from the non-null cells.
    pub fn dtype(&self) -> &'static str {
        let mut saw_int = false;
        let mut saw_float = false;
        let mut saw_bool = false;
        let mut saw_datetime = false;
        let mut saw_text = false;
        for cell in &self.values {
            match cell {
                Cell::Null => {}
                Cell::Int(_) => saw_int = true,
                Cell::Float(_) => saw_float = true,
                Cell::Bool(_) => saw_bool = true,
                Cell::DateTime(_) => saw_datetime = true,
                Cell::Text(_) => saw_text = true,
            }
        }
        match (saw_int, saw_float, saw_bool, saw_datetime, saw_text) {
            (_, _, false, false, false) if saw_float => "float64",
            (true, false, false, false, false) => {
                if self.values.iter().any(Cell::is_null) { "float64" } else { "int64" }
            }
            (false, false, true, false, false) => "bool",
            (false, false, false, true, false) => "datetime64[ns]",
            _ => "object",
        }
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|c| c.is_null()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        let expected = columns.first().map(Column::len).unwrap_or(0);
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != expected {
                return Err(TableError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns })
    }

    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, TableError> {
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for row in rows {
            if row.len() != columns.len() {
                let name = columns.first().map(|c| c.name.clone()).unwrap_or_default();
                return Err(TableError::LengthMismatch {
                    column: name,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.values.push(cell);
            }
        }
        Self::new(columns)
    }

    /// Builds a table from JSON objects. Columns follow first-seen key order;
    /// keys missing from a record become nulls.
    pub fn from_json_records(records: &[serde_json::Map<String, serde_json::Value>]) -> Self {
        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|r| r.get(&name).map(Cell::from_json).unwrap_or(Cell::Null))
                    .collect();
                Column::new(name, values)
            })
            .collect();
        Self { columns }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the table has no rows (it may still have columns).
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolves column names to indexes; `None` or an empty subset means all
    /// columns.
    pub fn resolve_subset(&self, subset: Option<&[String]>) -> Result<Vec<usize>, TableError> {
        match subset {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|n| {
                    self.column_index(n)
                        .ok_or_else(|| TableError::MissingColumn(n.clone()))
                })
                .collect(),
            _ => Ok((0..self.columns.len()).collect()),
        }
    }

    /// Replaces a same-named column or appends a new one.
    pub fn set_column(&mut self, column: Column) -> Result<(), TableError> {
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                expected: self.num_rows(),
                actual: column.len(),
                column: column.name,
            });
        }
        match self.column_index(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.column_index(name)?;
        Some(self.columns.remove(idx))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), TableError> {
        if from == to {
            return Ok(());
        }
        if self.column_index(to).is_some() {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        if let Some(idx) = self.column_index(from) {
            self.columns[idx].name = to.to_string();
        }
        Ok(())
    }

    pub fn select(&self, names: &[String]) -> Result<Table, TableError> {
        let columns = names
            .iter()
            .map(|n| {
                self.column(n)
                    .cloned()
                    .ok_or_else(|| TableError::MissingColumn(n.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Table::new(columns)
    }

    pub fn take_rows(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), indices.iter().map(|&i| c.values[i].clone()).collect()))
            .collect();
        Table { columns }
    }

    pub fn filter_mask(&self, mask: &[bool]) -> Result<Table, TableError> {
        if mask.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                column: "<mask>".to_string(),
                expected: self.num_rows(),
                actual: mask.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&indices))
    }

    pub fn head(&self, n: usize) -> Table {
        let end = n.min(self.num_rows());
        self.take_rows(&(0..end).collect::<Vec<_>>())
    }

    pub fn tail(&self, n: usize) -> Table {
        let rows = self.num_rows();
        let start = rows.saturating_sub(n);
        self.take_rows(&(start..rows).collect::<Vec<_>>())
    }

    fn row_key(&self, row: usize, subset: &[usize]) -> Vec<CellKey> {
        subset.iter().map(|&c| self.columns[c].values[row].key()).collect()
    }

    /// Marks rows whose subset values repeat another row. With
    /// [`Keep::First`] the first occurrence is unmarked, with [`Keep::Last`]
    /// the last one is.
    pub fn duplicated(&self, subset: Option<&[String]>, keep: Keep) -> Result<Vec<bool>, TableError> {
        let subset = self.resolve_subset(subset)?;
        let rows = self.num_rows();
        let mut marks = vec![false; rows];
        let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(rows);
        let order: Box<dyn Iterator<Item = usize>> = match keep {
            Keep::First => Box::new(0..rows),
            Keep::Last => Box::new((0..rows).rev()),
        };
        for row in order {
            if !seen.insert(self.row_key(row, &subset)) {
                marks[row] = true;
            }
        }
        Ok(marks)
    }

    pub fn drop_duplicates(&self, subset: Option<&[String]>, keep: Keep) -> Result<Table, TableError> {
        let marks = self.duplicated(subset, keep)?;
        let mask: Vec<bool> = marks.iter().map(|dup| !dup).collect();
        self.filter_mask(&mask)
    }

    pub fn drop_nulls(&self, subset: Option<&[String]>, how: NullHow) -> Result<Table, TableError> {
        let subset = self.resolve_subset(subset)?;
        let mask: Vec<bool> = (0..self.num_rows())
            .map(|row| {
                let mut cells = subset.iter().map(|&c| &self.columns[c].values[row]);
                let drop = match how {
                    NullHow::Any => cells.any(Cell::is_null),
                    NullHow::All => !subset.is_empty() && cells.all(Cell::is_null),
                };
                !drop
            })
            .collect();
        self.filter_mask(&mask)
    }

    /// Stable multi-key sort; `ascending` pairs with `by` positionally.
    pub fn sort_by(&self, by: &[String], ascending: &[bool]) -> Result<Table, TableError> {
        let keys = self.resolve_subset(Some(by))?;
        let mut indices: Vec<usize> = (0..self.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            for (pos, &col) in keys.iter().enumerate() {
                let left = &self.columns[col].values[a];
                let right = &self.columns[col].values[b];
                let mut ord = left.sort_cmp(right);
                let asc = ascending.get(pos).copied().unwrap_or(true);
                // missing values stay last whatever the direction
                if !asc && !left.is_null() && !right.is_null() {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(self.take_rows(&indices))
    }

    /// Stacks tables vertically; the result carries the union of columns in
    /// first-seen order, missing cells filled with nulls.
    pub fn concat(tables: &[Table]) -> Table {
        let mut names: Vec<String> = Vec::new();
        for table in tables {
            for column in &table.columns {
                if !names.contains(&column.name) {
                    names.push(column.name.clone());
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let mut values = Vec::new();
                for table in tables {
                    match table.column(&name) {
                        Some(col) => values.extend(col.values.iter().cloned()),
                        None => values.extend(std::iter::repeat(Cell::Null).take(table.num_rows())),
                    }
                }
                Column::new(name, values)
            })
            .collect();
        Table { columns }
    }

    pub fn to_json_records(&self, limit: Option<usize>) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let rows = limit.map(|l| l.min(self.num_rows())).unwrap_or(self.num_rows());
        (0..rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in 0..self.num_rows() {
            wtr.write_record(
                self.columns
                    .iter()
                    .map(|c| c.values[row].as_text().unwrap_or_default()),
            )?;
        }
        wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn int(v: i64) -> Cell {
        Cell::Int(v)
    }

    pub fn text(v: &str) -> Cell {
        Cell::Text(v.to_string())
    }

    pub fn table(names: &[&str], rows: Vec<Vec<Cell>>) -> Table {
        Table::from_rows(names.iter().map(|n| n.to_string()).collect(), rows).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_new_rejects_ragged_columns() {
        let result = Table::new(vec![
            Column::new("a", vec![int(1), int(2)]),
            Column::new("b", vec![int(1)]),
        ]);
        assert!(matches!(result, Err(TableError::LengthMismatch { .. })));
    }

    #[test]
    fn test_set_column_replaces_appends_and_checks_length() {
        let mut t = table(&["a"], vec![vec![int(1)], vec![int(2)]]);
        t.set_column(Column::new("a", vec![int(3), int(4)])).unwrap();
        t.set_column(Column::new("b", vec![text("x"), text("y")])).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert_eq!(t.column("a").unwrap().values, vec![int(3), int(4)]);
        let err = t.set_column(Column::new("c", vec![int(1)])).unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch {
                column: "c".to_string(),
                actual: 1,
                expected: 2,
            }
        );
    }

    #[test]
    fn test_duplicated_keep_first_and_last() {
        let t = table(&["a", "b"], vec![
            vec![int(1), int(2)],
            vec![int(1), int(2)],
            vec![int(1), int(3)],
        ]);
        let subset = vec!["a".to_string()];
        assert_eq!(t.duplicated(Some(&subset), Keep::First).unwrap(), vec![false, true, true]);
        assert_eq!(t.duplicated(Some(&subset), Keep::Last).unwrap(), vec![true, true, false]);
        assert_eq!(t.duplicated(None, Keep::First).unwrap(), vec![false, true, false]);
    }

    #[test]
    fn test_integral_float_matches_int_key() {
        assert_eq!(Cell::Float(1.0).key(), Cell::Int(1).key());
        assert_ne!(Cell::Float(1.5).key(), Cell::Int(1).key());
    }

    #[test]
    fn test_sort_keeps_nulls_last_when_descending() {
        let t = table(&["a"], vec![vec![int(2)], vec![Cell::Null], vec![int(5)]]);
        let sorted = t.sort_by(&["a".to_string()], &[false]).unwrap();
        assert_eq!(sorted.columns()[0].values, vec![int(5), int(2), Cell::Null]);
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = table(&["x"], vec![vec![int(1)]]);
        let b = table(&["y"], vec![vec![text("q")]]);
        let c = Table::concat(&[a, b]);
        assert_eq!(c.column_names(), vec!["x", "y"]);
        assert_eq!(c.column("x").unwrap().values, vec![int(1), Cell::Null]);
    }

    #[test]
    fn test_dtype_labels() {
        assert_eq!(Column::new("a", vec![int(1), int(2)]).dtype(), "int64");
        assert_eq!(Column::new("a", vec![int(1), Cell::Float(2.5)]).dtype(), "float64");
        assert_eq!(Column::new("a", vec![int(1), text("x")]).dtype(), "object");
    }

    #[test]
    fn test_csv_export() {
        let t = table(&["a", "b"], vec![vec![int(1), Cell::Null], vec![Cell::Float(2.0), text("x,y")]]);
        let csv = String::from_utf8(t.to_csv().unwrap()).unwrap();
        assert_eq!(csv, "a,b\n1,\n2.0,\"x,y\"\n");
    }
}
