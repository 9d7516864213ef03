//! Per-session dataset registry: name → {raw, clean, source}, plus the
//! single active dataset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Excel,
    Notion,
    Api,
    Inline,
}

/// Provenance of a dataset, fixed when it is imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub kind: SourceKind,
    /// Filename, Notion database id or request URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    pub imported_at: DateTime<Utc>,
}

impl SourceInfo {
    pub fn new(kind: SourceKind, location: Option<String>) -> Self {
        Self {
            kind,
            location,
            encoding: None,
            separator: None,
            sheet: None,
            pages: None,
            imported_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub raw: Table,
    pub clean: Table,
    pub source: SourceInfo,
}

impl Dataset {
    /// The table cleaning works from: `clean` when it has rows, else `raw`.
    pub fn working_snapshot(&self) -> &Table {
        if self.clean.num_rows() > 0 {
            &self.clean
        } else {
            &self.raw
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("cannot remove the last dataset")]
    LastDataset,
}

#[derive(Debug, Default)]
pub struct Registry {
    order: Vec<String>,
    datasets: HashMap<String, Dataset>,
    active: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`; `clean` starts as a copy of `raw` and the
    /// dataset becomes active. A replaced name keeps its list position.
    pub fn add_dataset(&mut self, name: &str, raw: Table, source: SourceInfo) {
        let dataset = Dataset {
            clean: raw.clone(),
            raw,
            source,
        };
        if self.datasets.insert(name.to_string(), dataset).is_none() {
            self.order.push(name.to_string());
        }
        self.active = Some(name.to_string());
    }

    pub fn set_active(&mut self, name: &str) -> bool {
        if self.datasets.contains_key(name) {
            self.active = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn update_clean(&mut self, name: &str, table: Table) -> bool {
        match self.datasets.get_mut(name) {
            Some(dataset) => {
                dataset.clean = table;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Dataset> {
        let removed = self.datasets.remove(name)?;
        self.order.retain(|n| n != name);
        if self.active.as_deref() == Some(name) {
            self.active = self.order.first().cloned();
        }
        Some(removed)
    }

    /// Like [`Registry::remove`] but refuses to empty the registry.
    pub fn remove_keeping_one(&mut self, name: &str) -> Result<Dataset, RegistryError> {
        if !self.datasets.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        if self.datasets.len() == 1 {
            return Err(RegistryError::LastDataset);
        }
        self.remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn list_names(&self) -> &[String] {
        &self.order
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Dataset> {
        self.active.as_ref().and_then(|n| self.datasets.get(n))
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn working_snapshot(&self, name: &str) -> Option<&Table> {
        self.get(name).map(Dataset::working_snapshot)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures::{int, table};

    fn one_col(v: i64) -> Table {
        table(&["a"], vec![vec![int(v)]])
    }

    fn source() -> SourceInfo {
        SourceInfo::new(SourceKind::Inline, None)
    }

    #[test]
    fn test_add_sets_clean_and_active() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        reg.add_dataset("b", one_col(2), source());
        assert_eq!(reg.active_name(), Some("b"));
        assert_eq!(reg.get("a").unwrap().clean, one_col(1));
        assert_eq!(reg.list_names(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        reg.add_dataset("b", one_col(2), source());
        reg.add_dataset("a", one_col(3), source());
        assert_eq!(reg.list_names(), ["a".to_string(), "b".to_string()]);
        assert_eq!(reg.active_name(), Some("a"));
        assert_eq!(reg.get("a").unwrap().raw, one_col(3));
    }

    #[test]
    fn test_set_active_missing_is_noop() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        assert!(!reg.set_active("zz"));
        assert_eq!(reg.active_name(), Some("a"));
    }

    #[test]
    fn test_update_clean_leaves_raw() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        assert!(reg.update_clean("a", one_col(9)));
        assert!(!reg.update_clean("zz", one_col(9)));
        let ds = reg.active().unwrap();
        assert_eq!(ds.raw, one_col(1));
        assert_eq!(ds.clean, one_col(9));
    }

    #[test]
    fn test_remove_moves_active_to_first_remaining() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        reg.add_dataset("b", one_col(2), source());
        reg.add_dataset("c", one_col(3), source());
        assert!(reg.remove("c").is_some());
        assert_eq!(reg.active_name(), Some("a"));
        assert!(reg.remove("zz").is_none());
        reg.remove("a");
        reg.remove("b");
        assert_eq!(reg.active_name(), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_keeping_one_refuses_last() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        assert_eq!(reg.remove_keeping_one("a").unwrap_err(), RegistryError::LastDataset);
        assert_eq!(
            reg.remove_keeping_one("zz").unwrap_err(),
            RegistryError::NotFound("zz".to_string())
        );
        reg.add_dataset("b", one_col(2), source());
        assert!(reg.remove_keeping_one("a").is_ok());
    }

    #[test]
    fn test_working_snapshot_falls_back_to_raw() {
        let mut reg = Registry::new();
        reg.add_dataset("a", one_col(1), source());
        reg.update_clean("a", Table::default());
        assert_eq!(reg.working_snapshot("a"), Some(&one_col(1)));
    }
}
