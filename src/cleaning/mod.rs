//! Cleaning engine boundary. These are the only entry points that write a
//! dataset's `clean` table; every failure comes back as a [`CleaningError`]
//! and leaves the registry as it was.

pub mod operators;

use serde::Serialize;
use tracing::{info, warn};

use crate::data_registry::{Dataset, Registry};
use crate::sandbox::{self, ExecutionError, SandboxLimits};
use crate::table::Table;

pub use operators::{Operator, OperatorOutput, TrimMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CleaningError {
    #[error("{message}")]
    ValidationRejected { message: String, rule: String },

    #[error("{message}")]
    ExecutionFault { message: String, log: String },

    #[error("{message}")]
    TypeMismatch { message: String, log: String },

    #[error("{0}")]
    OperatorFault(String),

    #[error("{0}")]
    EmptyInput(String),
}

impl CleaningError {
    pub fn kind(&self) -> &'static str {
        match self {
            CleaningError::ValidationRejected { .. } => "validation_rejected",
            CleaningError::ExecutionFault { .. } => "execution_fault",
            CleaningError::TypeMismatch { .. } => "type_mismatch",
            CleaningError::OperatorFault(_) => "operator_fault",
            CleaningError::EmptyInput(_) => "empty_input",
        }
    }

    /// Output captured before the failure, if any.
    pub fn log(&self) -> &str {
        match self {
            CleaningError::ExecutionFault { log, .. } | CleaningError::TypeMismatch { log, .. } => log,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleaningReport {
    pub dataset: String,
    pub rows: usize,
    pub columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
    pub log: String,
}

/// Resolves the target dataset (explicit name or the active one) and clones
/// the table `input` picks from it.
fn target(
    registry: &Registry,
    name: Option<&str>,
    input: fn(&Dataset) -> &Table,
) -> Result<(String, Table), CleaningError> {
    let name = match name {
        Some(n) => n.to_string(),
        None => registry
            .active_name()
            .map(str::to_string)
            .ok_or_else(|| CleaningError::EmptyInput("no active dataset".to_string()))?,
    };
    let dataset = registry
        .get(&name)
        .ok_or_else(|| CleaningError::EmptyInput(format!("dataset not found: {}", name)))?;
    if dataset.raw.num_columns() == 0 {
        return Err(CleaningError::EmptyInput(format!("dataset '{}' has no data", name)));
    }
    Ok((name, input(dataset).clone()))
}

fn commit(registry: &mut Registry, name: &str, table: Table, rows_affected: Option<usize>, log: String) -> CleaningReport {
    let report = CleaningReport {
        dataset: name.to_string(),
        rows: table.num_rows(),
        columns: table.num_columns(),
        rows_affected,
        log,
    };
    registry.update_clean(name, table);
    report
}

pub fn apply_operator(registry: &mut Registry, name: Option<&str>, op: &Operator) -> Result<CleaningReport, CleaningError> {
    let (name, snapshot) = target(registry, name, Dataset::working_snapshot)?;
    match operators::apply(&snapshot, op) {
        Ok(out) => {
            info!(dataset = %name, operator = op.name(), rows_affected = out.rows_affected, "operator applied");
            Ok(commit(registry, &name, out.table, Some(out.rows_affected), String::new()))
        }
        Err(e) => {
            warn!(dataset = %name, operator = op.name(), error = %e, "operator failed");
            Err(CleaningError::OperatorFault(e.to_string()))
        }
    }
}

fn outcome_to_result(outcome: sandbox::ExecutionOutcome) -> Result<(Table, String), CleaningError> {
    match outcome.error {
        None => Ok((outcome.table, outcome.log)),
        Some(ExecutionError::Rejected { rule }) => Err(CleaningError::ValidationRejected {
            message: format!("code contains a dangerous operation: {}", rule),
            rule,
        }),
        Some(e @ ExecutionError::Fault { .. }) => Err(CleaningError::ExecutionFault {
            message: e.to_string(),
            log: outcome.log,
        }),
        Some(e @ ExecutionError::NotATable { .. }) => Err(CleaningError::TypeMismatch {
            message: e.to_string(),
            log: outcome.log,
        }),
    }
}

/// Runs transformation code on the blocking pool and commits the result.
/// The caller holds the session lock across the whole call.
pub async fn run_code(
    registry: &mut Registry,
    name: Option<&str>,
    code: String,
    limits: SandboxLimits,
) -> Result<CleaningReport, CleaningError> {
    let (name, snapshot) = target(registry, name, |dataset| &dataset.raw)?;
    let outcome = tokio::task::spawn_blocking(move || sandbox::execute(&snapshot, &code, &limits))
        .await
        .map_err(|e| CleaningError::ExecutionFault {
            message: format!("execution aborted: {}", e),
            log: String::new(),
        })?;
    match outcome_to_result(outcome) {
        Ok((table, log)) => {
            info!(dataset = %name, rows = table.num_rows(), "transformation committed");
            Ok(commit(registry, &name, table, None, log))
        }
        Err(e) => {
            warn!(dataset = %name, kind = e.kind(), error = %e, "transformation failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_registry::{SourceInfo, SourceKind};
    use crate::table::fixtures::{int, table, text};
    use crate::table::Cell;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.add_dataset(
            "sales",
            table(
                &["region", "amount"],
                vec![
                    vec![text(" north "), int(5)],
                    vec![text("south"), Cell::Null],
                    vec![text(" north "), int(5)],
                ],
            ),
            SourceInfo::new(SourceKind::Inline, None),
        );
        reg
    }

    #[tokio::test]
    async fn test_run_code_commits_clean_only() {
        let mut reg = registry();
        let report = run_code(
            &mut reg,
            None,
            "print('ok')\nresult = df.dropna()".to_string(),
            SandboxLimits::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.log, "ok\n");
        let ds = reg.get("sales").unwrap();
        assert_eq!(ds.raw.num_rows(), 3);
        assert_eq!(ds.clean.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_code_always_starts_from_raw() {
        let mut reg = registry();
        let code = "df['amount'] = df['amount'] * 10";
        for _ in 0..2 {
            run_code(&mut reg, None, code.to_string(), SandboxLimits::default())
                .await
                .unwrap();
        }
        let ds = reg.get("sales").unwrap();
        assert_eq!(ds.clean.column("amount").unwrap().values, vec![int(50), Cell::Null, int(50)]);
        assert_eq!(ds.raw.column("amount").unwrap().values, vec![int(5), Cell::Null, int(5)]);
    }

    #[tokio::test]
    async fn test_code_ignores_earlier_operators() {
        let mut reg = registry();
        let dedup = Operator::Deduplicate {
            subset: vec![],
            keep: Default::default(),
        };
        apply_operator(&mut reg, None, &dedup).unwrap();
        assert_eq!(reg.get("sales").unwrap().clean.num_rows(), 2);
        let report = run_code(&mut reg, None, "print(len(df))".to_string(), SandboxLimits::default())
            .await
            .unwrap();
        assert_eq!(report.log, "3\n");
        assert_eq!(report.rows, 3);
    }

    #[tokio::test]
    async fn test_rejected_code_leaves_registry_untouched() {
        let mut reg = registry();
        let before = reg.get("sales").unwrap().clean.clone();
        let err = run_code(&mut reg, None, "eval('1')".to_string(), SandboxLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_rejected");
        assert_eq!(reg.get("sales").unwrap().clean, before);
    }

    #[tokio::test]
    async fn test_fault_keeps_log_and_snapshot() {
        let mut reg = registry();
        let err = run_code(
            &mut reg,
            Some("sales"),
            "print('step 1')\ndf = df['nonexistent_col']".to_string(),
            SandboxLimits::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "execution_fault");
        assert_eq!(err.log(), "step 1\n");
        assert_eq!(reg.get("sales").unwrap().clean.num_rows(), 3);
    }

    #[tokio::test]
    async fn test_non_table_result_is_type_mismatch() {
        let mut reg = registry();
        let err = run_code(&mut reg, None, "result = 'x'".to_string(), SandboxLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn test_empty_registry_is_empty_input() {
        let mut reg = Registry::new();
        let op = Operator::DropNull {
            subset: vec![],
            how: Default::default(),
        };
        let err = apply_operator(&mut reg, None, &op).unwrap_err();
        assert_eq!(err.kind(), "empty_input");
    }

    #[test]
    fn test_operator_fault_is_atomic() {
        let mut reg = registry();
        let op = Operator::Trim {
            column: "missing".to_string(),
            mode: TrimMode::Both,
        };
        let before = reg.get("sales").unwrap().clean.clone();
        let err = apply_operator(&mut reg, None, &op).unwrap_err();
        assert_eq!(err.kind(), "operator_fault");
        assert_eq!(reg.get("sales").unwrap().clean, before);
    }

    #[test]
    fn test_operators_chain_on_clean() {
        let mut reg = registry();
        let trim = Operator::Trim {
            column: "region".to_string(),
            mode: TrimMode::Both,
        };
        apply_operator(&mut reg, None, &trim).unwrap();
        let dedup = Operator::Deduplicate {
            subset: vec![],
            keep: Default::default(),
        };
        let report = apply_operator(&mut reg, None, &dedup).unwrap();
        assert_eq!(report.rows_affected, Some(1));
        assert_eq!(reg.get("sales").unwrap().clean.num_rows(), 2);
    }
}
