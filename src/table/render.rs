use std::fmt;

use super::{Cell, Column, Table};

const MAX_ROWS: usize = 60;
const EDGE_ROWS: usize = 5;

fn display_cell(cell: &Cell) -> String {
    match cell {
        Cell::Null => "None".to_string(),
        Cell::Float(f) if f.is_nan() => "NaN".to_string(),
        other => other.as_text().unwrap_or_default(),
    }
}

/// Row positions to print, with `None` marking the elision point.
fn visible_rows(rows: usize) -> Vec<Option<usize>> {
    if rows <= MAX_ROWS {
        return (0..rows).map(Some).collect();
    }
    let mut out: Vec<Option<usize>> = (0..EDGE_ROWS).map(Some).collect();
    out.push(None);
    out.extend((rows - EDGE_ROWS..rows).map(Some));
    out
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.num_rows();
        if rows == 0 {
            write!(f, "Empty DataFrame\nColumns: [{}]\nIndex: []", self.column_names().join(", "))?;
            return Ok(());
        }
        let visible = visible_rows(rows);
        let index: Vec<String> = visible
            .iter()
            .map(|r| r.map(|i| i.to_string()).unwrap_or_else(|| "..".to_string()))
            .collect();
        let index_width = index.iter().map(|s| s.chars().count()).max().unwrap_or(0);

        let mut rendered: Vec<(String, Vec<String>, usize)> = Vec::new();
        for column in self.columns() {
            let cells: Vec<String> = visible
                .iter()
                .map(|r| match r {
                    Some(i) => display_cell(&column.values[*i]),
                    None => "...".to_string(),
                })
                .collect();
            let width = cells
                .iter()
                .map(|s| s.chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or(0);
            rendered.push((column.name.clone(), cells, width));
        }

        write!(f, "{:width$}", "", width = index_width)?;
        for (name, _, width) in &rendered {
            write!(f, "  {:>width$}", name, width = *width)?;
        }
        for (line, idx) in index.iter().enumerate() {
            write!(f, "\n{:<width$}", idx, width = index_width)?;
            for (_, cells, width) in &rendered {
                write!(f, "  {:>width$}", cells[line], width = *width)?;
            }
        }
        if rows > MAX_ROWS {
            write!(f, "\n\n[{} rows x {} columns]", rows, self.num_columns())?;
        }
        Ok(())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible = visible_rows(self.len());
        let index: Vec<String> = visible
            .iter()
            .map(|r| r.map(|i| i.to_string()).unwrap_or_else(|| "..".to_string()))
            .collect();
        let index_width = index.iter().map(|s| s.chars().count()).max().unwrap_or(0);
        let cells: Vec<String> = visible
            .iter()
            .map(|r| match r {
                Some(i) => display_cell(&self.values[*i]),
                None => "...".to_string(),
            })
            .collect();
        let width = cells.iter().map(|s| s.chars().count()).max().unwrap_or(0);
        for (idx, cell) in index.iter().zip(&cells) {
            writeln!(f, "{:<iw$}    {:>w$}", idx, cell, iw = index_width, w = width)?;
        }
        if self.len() > MAX_ROWS {
            writeln!(f, "Length: {}", self.len())?;
        }
        write!(f, "Name: {}, dtype: {}", self.name, self.dtype())
    }
}

#[cfg(test)]
mod tests {
    use crate::table::fixtures::*;
    use crate::table::Cell;

    #[test]
    fn test_render_small_table() {
        let t = table(&["a", "name"], vec![vec![int(1), text("x")], vec![int(20), Cell::Null]]);
        let out = t.to_string();
        assert_eq!(out, "    a  name\n0   1     x\n1  20  None");
    }

    #[test]
    fn test_render_empty_table() {
        let t = table(&["a"], vec![]);
        assert_eq!(t.to_string(), "Empty DataFrame\nColumns: [a]\nIndex: []");
    }
}
