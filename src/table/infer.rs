use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::Cell;

/// Tokens read as missing values when importing text.
const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];

pub fn is_na_token(raw: &str) -> bool {
    NA_TOKENS.contains(&raw)
}

/// Parses the timestamp shapes found in exported spreadsheets and API
/// payloads. Offsets are normalised to UTC and dropped.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Turns raw text fields into one typed column: all-int, else all-float,
/// else all-bool, else text. Missing tokens become [`Cell::Null`] in every
/// case.
pub fn infer_column(raw: Vec<String>) -> Vec<Cell> {
    let present = || raw.iter().filter(|s| !is_na_token(s));

    if present().all(|s| s.trim().parse::<i64>().is_ok()) {
        return raw
            .iter()
            .map(|s| match s.trim().parse::<i64>() {
                Ok(v) if !is_na_token(s) => Cell::Int(v),
                _ => Cell::Null,
            })
            .collect();
    }
    if present().all(|s| s.trim().parse::<f64>().is_ok()) {
        return raw
            .iter()
            .map(|s| match s.trim().parse::<f64>() {
                Ok(v) if !is_na_token(s) => Cell::Float(v),
                _ => Cell::Null,
            })
            .collect();
    }
    if present().all(|s| parse_bool(s).is_some()) {
        return raw
            .iter()
            .map(|s| parse_bool(s).map(Cell::Bool).unwrap_or(Cell::Null))
            .collect();
    }
    raw.into_iter()
        .map(|s| if is_na_token(&s) { Cell::Null } else { Cell::Text(s) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_infer_int_with_gaps() {
        let cells = infer_column(strings(&["1", "", "3"]));
        assert_eq!(cells, vec![Cell::Int(1), Cell::Null, Cell::Int(3)]);
    }

    #[test]
    fn test_infer_float_promotes_ints() {
        let cells = infer_column(strings(&["1", "2.5"]));
        assert_eq!(cells, vec![Cell::Float(1.0), Cell::Float(2.5)]);
    }

    #[test]
    fn test_infer_mixed_is_text() {
        let cells = infer_column(strings(&["1", "x", "NA"]));
        assert_eq!(cells, vec![Cell::Text("1".into()), Cell::Text("x".into()), Cell::Null]);
    }

    #[test]
    fn test_parse_datetime_variants() {
        assert!(parse_datetime("2024-03-01").is_some());
        assert!(parse_datetime("2024-03-01T10:00:00Z").is_some());
        assert!(parse_datetime("2024/03/01 10:00").is_some());
        assert!(parse_datetime("not a date").is_none());
    }
}
