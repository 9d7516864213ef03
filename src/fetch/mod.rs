//! Importers. Every importer yields an [`ImportedTable`]: the parsed table
//! plus its provenance, ready for `Registry::add_dataset`.

pub mod csv_file;
pub mod excel;
pub mod notion;
pub mod rest;

use std::time::Duration;

use crate::data_registry::SourceInfo;
use crate::table::Table;

#[derive(Debug, Clone)]
pub struct ImportedTable {
    pub table: Table,
    pub source: SourceInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("CSV file cannot be read with any supported encoding; check the file format or encoding")]
    Undecodable,

    #[error("Failed to parse CSV: {0}")]
    Csv(String),

    #[error("Failed to load Excel workbook: {0}")]
    Excel(String),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Notion token is invalid")]
    InvalidToken,

    #[error("Notion database not found; check the database id and sharing settings")]
    DatabaseNotFound,

    #[error("Remote API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No data: {0}")]
    Empty(String),
}

/// Shared client for the remote importers.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("washboard/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Makes header names unique the way spreadsheet exports usually need:
/// blanks become `Unnamed: i`, repeats get a `.n` suffix.
pub(crate) fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (i, name) in raw.into_iter().enumerate() {
        let base = match name.trim() {
            "" => format!("Unnamed: {}", i),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            candidate = format!("{}.{}", base, n);
            n += 1;
        }
        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_headers() {
        let headers = unique_headers(vec!["a".into(), "".into(), "a".into(), " b ".into(), "a".into()]);
        assert_eq!(headers, vec!["a", "Unnamed: 1", "a.1", "b", "a.2"]);
    }
}
