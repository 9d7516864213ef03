//! CSV import with encoding fallback.

use csv::ReaderBuilder;
use encoding_rs::GBK;
use tracing::debug;

use super::{unique_headers, FetchError, ImportedTable};
use crate::data_registry::{SourceInfo, SourceKind};
use crate::table::{infer_column, Column, Table};

/// Tried in order; a decode or parse failure moves on to the next one.
pub const ENCODINGS: &[&str] = &["utf-8", "gbk", "gb2312", "utf-8-sig", "cp936", "latin-1"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Input with a UTF-8 BOM skips plain UTF-8 and the GBK family, which would
/// fold the mark into the first header.
fn decode(bytes: &[u8], encoding: &str) -> Option<String> {
    if bytes.starts_with(UTF8_BOM) && matches!(encoding, "utf-8" | "gbk" | "gb2312" | "cp936") {
        return None;
    }
    match encoding {
        "utf-8" => std::str::from_utf8(bytes).ok().map(str::to_string),
        "utf-8-sig" => std::str::from_utf8(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes))
            .ok()
            .map(str::to_string),
        "gbk" | "gb2312" | "cp936" => GBK
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned()),
        "latin-1" => Some(bytes.iter().map(|&b| b as char).collect()),
        _ => None,
    }
}

/// Accepts a single ASCII character or the escapes `\t` and `tab`.
pub fn parse_separator(sep: &str) -> Result<u8, FetchError> {
    match sep {
        "" => Ok(b','),
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        other => Err(FetchError::InvalidInput(format!(
            "separator must be a single ASCII character, got {:?}",
            other
        ))),
    }
}

fn parse(text: &str, separator: u8) -> Result<Table, FetchError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| FetchError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(FetchError::Csv("no columns to parse from file".to_string()));
    }
    let headers = unique_headers(headers);

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in rdr.records() {
        let record = record.map_err(|e| FetchError::Csv(e.to_string()))?;
        for (i, column) in raw.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or("").to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, values)| Column::new(name, infer_column(values)))
        .collect();
    Table::new(columns).map_err(|e| FetchError::Csv(e.to_string()))
}

/// Decodes and parses `bytes`, returning the table and the encoding that
/// worked.
pub fn read_csv(bytes: &[u8], separator: u8) -> Result<(Table, &'static str), FetchError> {
    for &encoding in ENCODINGS {
        let Some(text) = decode(bytes, encoding) else {
            debug!(encoding, "csv decode failed");
            continue;
        };
        match parse(&text, separator) {
            Ok(table) => return Ok((table, encoding)),
            Err(e) => debug!(encoding, error = %e, "csv parse failed"),
        }
    }
    Err(FetchError::Undecodable)
}

pub fn import(bytes: &[u8], filename: &str, separator: &str) -> Result<ImportedTable, FetchError> {
    let sep = parse_separator(separator)?;
    let (table, encoding) = read_csv(bytes, sep)?;
    let mut source = SourceInfo::new(SourceKind::Csv, Some(filename.to_string()));
    source.encoding = Some(encoding.to_string());
    source.separator = Some(sep as char);
    Ok(ImportedTable { table, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    #[test]
    fn test_utf8_with_type_inference() {
        let (table, encoding) = read_csv(b"id,price,name,flag\n1,2.5,a,true\n2,,b,false\n", b',').unwrap();
        assert_eq!(encoding, "utf-8");
        assert_eq!(table.column("id").unwrap().values, vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(table.column("price").unwrap().values, vec![Cell::Float(2.5), Cell::Null]);
        assert_eq!(table.column("flag").unwrap().values, vec![Cell::Bool(true), Cell::Bool(false)]);
    }

    #[test]
    fn test_bom_is_reported_as_utf8_sig() {
        let (table, encoding) = read_csv(b"\xEF\xBB\xBFa,b\n1,2\n", b',').unwrap();
        assert_eq!(encoding, "utf-8-sig");
        assert_eq!(table.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_bom_never_reaches_the_gbk_decoders() {
        let bytes = b"\xEF\xBB\xBFname,amount\nalice,1\n";
        for encoding in ["utf-8", "gbk", "gb2312", "cp936"] {
            assert_eq!(decode(bytes, encoding), None, "{}", encoding);
        }
        let (table, encoding) = read_csv(bytes, b',').unwrap();
        assert_eq!(encoding, "utf-8-sig");
        assert_eq!(table.column_names(), vec!["name", "amount"]);
        assert_eq!(table.column("amount").unwrap().values, vec![Cell::Int(1)]);
    }

    #[test]
    fn test_gbk_fallback() {
        let (bytes, _, _) = GBK.encode("城市,数量\n北京,3\n");
        let (table, encoding) = read_csv(&bytes, b',').unwrap();
        assert_eq!(encoding, "gbk");
        assert_eq!(table.column_names(), vec!["城市", "数量"]);
        assert_eq!(table.column("城市").unwrap().values, vec![Cell::Text("北京".to_string())]);
    }

    #[test]
    fn test_latin1_last_resort() {
        // 0xE9 alone is invalid UTF-8 and an incomplete GBK sequence
        let (table, encoding) = read_csv(b"name\ncaf\xE9\n", b',').unwrap();
        assert_eq!(encoding, "latin-1");
        assert_eq!(table.column("name").unwrap().values, vec![Cell::Text("caf\u{e9}".to_string())]);
    }

    #[test]
    fn test_custom_separator() {
        let imported = import(b"a;b\n1;2\n", "data.csv", ";").unwrap();
        assert_eq!(imported.table.num_columns(), 2);
        assert_eq!(imported.source.separator, Some(';'));
        assert_eq!(imported.source.location.as_deref(), Some("data.csv"));
    }

    #[test]
    fn test_bad_separator_and_ragged_rows() {
        assert!(matches!(parse_separator("||"), Err(FetchError::InvalidInput(_))));
        assert!(matches!(read_csv(b"a,b\n1,2,3\n", b','), Err(FetchError::Undecodable)));
        assert!(matches!(read_csv(b"", b','), Err(FetchError::Undecodable)));
    }
}
