//! Declarative cleaning operators. Each takes a snapshot and returns a full
//! replacement table; nothing is modified in place.

use serde::{Deserialize, Serialize};

use crate::table::{Cell, Column, Keep, NullHow, Table, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    #[default]
    Both,
    /// Removes every space character, not only the edges.
    All,
    Leading,
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Operator {
    Trim {
        column: String,
        #[serde(default)]
        mode: TrimMode,
    },
    Deduplicate {
        #[serde(default)]
        subset: Vec<String>,
        #[serde(default)]
        keep: Keep,
    },
    DropNull {
        #[serde(default)]
        subset: Vec<String>,
        #[serde(default)]
        how: NullHow,
    },
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Trim { .. } => "trim",
            Operator::Deduplicate { .. } => "deduplicate",
            Operator::DropNull { .. } => "drop_null",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorOutput {
    pub table: Table,
    /// Rows removed, or cells rewritten for trim.
    pub rows_affected: usize,
}

fn trim_text(s: &str, mode: TrimMode) -> String {
    match mode {
        TrimMode::Both => s.trim().to_string(),
        TrimMode::All => s.replace(' ', ""),
        TrimMode::Leading => s.trim_start().to_string(),
        TrimMode::Trailing => s.trim_end().to_string(),
    }
}

/// Renders every non-null cell of `column` as text and trims it.
pub fn trim(table: &Table, column: &str, mode: TrimMode) -> Result<OperatorOutput, TableError> {
    let source = table
        .column(column)
        .ok_or_else(|| TableError::MissingColumn(column.to_string()))?;
    let mut changed = 0;
    let values = source
        .values
        .iter()
        .map(|cell| match cell.as_text() {
            Some(text) => {
                let trimmed = trim_text(&text, mode);
                if trimmed != text || !matches!(cell, Cell::Text(_)) {
                    changed += 1;
                }
                Cell::Text(trimmed)
            }
            None => Cell::Null,
        })
        .collect();
    let mut out = table.clone();
    out.set_column(Column::new(column, values))?;
    Ok(OperatorOutput {
        table: out,
        rows_affected: changed,
    })
}

pub fn deduplicate(table: &Table, subset: &[String], keep: Keep) -> Result<OperatorOutput, TableError> {
    let out = table.drop_duplicates(Some(subset), keep)?;
    Ok(OperatorOutput {
        rows_affected: table.num_rows() - out.num_rows(),
        table: out,
    })
}

pub fn drop_null(table: &Table, subset: &[String], how: NullHow) -> Result<OperatorOutput, TableError> {
    let out = table.drop_nulls(Some(subset), how)?;
    Ok(OperatorOutput {
        rows_affected: table.num_rows() - out.num_rows(),
        table: out,
    })
}

pub fn apply(table: &Table, op: &Operator) -> Result<OperatorOutput, TableError> {
    match op {
        Operator::Trim { column, mode } => trim(table, column, *mode),
        Operator::Deduplicate { subset, keep } => deduplicate(table, subset, *keep),
        Operator::DropNull { subset, how } => drop_null(table, subset, *how),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures::{int, table, text};

    fn padded() -> Table {
        table(&["s"], vec![vec![text("  x y  ")], vec![Cell::Null], vec![int(7)]])
    }

    #[test]
    fn test_trim_modes() {
        let cases = [
            (TrimMode::Both, "x y"),
            (TrimMode::All, "xy"),
            (TrimMode::Leading, "x y  "),
            (TrimMode::Trailing, "  x y"),
        ];
        for (mode, expected) in cases {
            let out = trim(&padded(), "s", mode).unwrap();
            let values = &out.table.column("s").unwrap().values;
            assert_eq!(values[0], text(expected), "{:?}", mode);
            assert_eq!(values[1], Cell::Null);
            assert_eq!(values[2], text("7"));
        }
    }

    #[test]
    fn test_trim_missing_column() {
        let err = trim(&padded(), "nope", TrimMode::Both).unwrap_err();
        assert_eq!(err, TableError::MissingColumn("nope".to_string()));
    }

    #[test]
    fn test_deduplicate_keep_first_and_last() {
        let t = table(
            &["k", "v"],
            vec![
                vec![text("a"), int(1)],
                vec![text("b"), int(2)],
                vec![text("a"), int(3)],
            ],
        );
        let first = deduplicate(&t, &["k".to_string()], Keep::First).unwrap();
        assert_eq!(first.rows_affected, 1);
        assert_eq!(first.table.column("v").unwrap().values, vec![int(1), int(2)]);

        let last = deduplicate(&t, &["k".to_string()], Keep::Last).unwrap();
        assert_eq!(last.table.column("v").unwrap().values, vec![int(2), int(3)]);

        let all = deduplicate(&t, &[], Keep::First).unwrap();
        assert_eq!(all.rows_affected, 0);
    }

    #[test]
    fn test_drop_null_any_and_all() {
        let t = table(
            &["a", "b"],
            vec![
                vec![int(1), Cell::Null],
                vec![Cell::Null, Cell::Null],
                vec![int(3), int(4)],
            ],
        );
        let any = drop_null(&t, &[], NullHow::Any).unwrap();
        assert_eq!(any.rows_affected, 2);
        assert_eq!(any.table.num_rows(), 1);

        let all = drop_null(&t, &[], NullHow::All).unwrap();
        assert_eq!(all.rows_affected, 1);

        let subset = drop_null(&t, &["a".to_string()], NullHow::Any).unwrap();
        assert_eq!(subset.table.column("a").unwrap().values, vec![int(1), int(3)]);
    }

    #[test]
    fn test_operator_deserializes_with_defaults() {
        let op: Operator = serde_json::from_str(r#"{"operator": "drop_null"}"#).unwrap();
        assert_eq!(
            op,
            Operator::DropNull {
                subset: vec![],
                how: NullHow::Any
            }
        );
        let op: Operator =
            serde_json::from_str(r#"{"operator": "trim", "column": "c", "mode": "leading"}"#).unwrap();
        assert_eq!(op.name(), "trim");
    }
}
