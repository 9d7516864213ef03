//! Sandboxed execution of user transformation code.
//!
//! Code is screened by [`denylist`], parsed into a small Python-flavoured
//! AST and evaluated by a tree walker whose only reachable names are the
//! per-call [`Capabilities`] plus `df`, a private copy of the input table.
//! Printed output goes to a buffer owned by the execution.

pub mod ast;
mod builtins;
pub mod capabilities;
pub mod denylist;
pub mod error;
mod frame;
mod groupby;
pub mod interp;
pub mod lexer;
mod modules;
mod ops;
pub mod output;
pub mod parser;
mod series;
pub mod value;

use std::time::Duration;

use thiserror::Error;

pub use capabilities::Capabilities;
pub use error::{ErrorKind, ScriptError, ScriptResult};

use crate::table::Table;
use interp::Interpreter;
use output::{Budget, OutputBuffer};
use value::Value;

/// Names checked, in order, for the script's result table.
const RESULT_NAMES: &[&str] = &["result", "clean_df", "df"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_steps: u64,
    pub max_log_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_steps: 5_000_000,
            max_log_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("code rejected: dangerous operation '{rule}'")]
    Rejected { rule: String },
    #[error("{message}")]
    Fault { message: String },
    #[error("result is not a DataFrame (got {found})")]
    NotATable { found: String },
}

/// What one execution produced. On any error `table` is the untouched
/// input and `log` holds whatever was printed before the failure.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub table: Table,
    pub log: String,
    pub error: Option<ExecutionError>,
}

impl ExecutionOutcome {
    fn failed(input: &Table, log: String, error: ExecutionError) -> Self {
        Self {
            table: input.clone(),
            log,
            error: Some(error),
        }
    }
}

/// Runs `code` against a copy of `input`.
///
/// The result is the value bound to `result`, else `clean_df`, else `df`.
pub fn execute(input: &Table, code: &str, limits: &SandboxLimits) -> ExecutionOutcome {
    if code.trim().is_empty() {
        return ExecutionOutcome {
            table: input.clone(),
            log: String::new(),
            error: None,
        };
    }

    if let Some(rule) = denylist::first_violation(code) {
        return ExecutionOutcome::failed(
            input,
            String::new(),
            ExecutionError::Rejected {
                rule: rule.label.to_string(),
            },
        );
    }

    let program = match parser::parse_program(code) {
        Ok(program) => program,
        Err(e) => {
            return ExecutionOutcome::failed(
                input,
                String::new(),
                ExecutionError::Fault { message: e.to_string() },
            )
        }
    };

    let mut interp = Interpreter::new(
        Capabilities::standard(),
        OutputBuffer::new(limits.max_log_bytes),
        Budget::new(limits.timeout, limits.max_steps),
    );
    interp.set_global("df", Value::table(input.clone()));

    let run = interp.run(&program);
    let picked = RESULT_NAMES
        .iter()
        .find_map(|name| interp.global(name).cloned());
    let log = interp.into_output().into_string();

    if let Err(e) = run {
        return ExecutionOutcome::failed(input, log, ExecutionError::Fault { message: e.to_string() });
    }
    match picked {
        Some(Value::Table(t)) => {
            let table = t.borrow().clone();
            ExecutionOutcome {
                table,
                log,
                error: None,
            }
        }
        Some(other) => ExecutionOutcome::failed(
            input,
            log,
            ExecutionError::NotATable {
                found: other.type_name().to_string(),
            },
        ),
        None => ExecutionOutcome::failed(
            input,
            log,
            ExecutionError::NotATable {
                found: "nothing".to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixtures::{int, table, text};
    use crate::table::Cell;

    fn sample() -> Table {
        table(
            &["name", "amount", "city"],
            vec![
                vec![text("  alice "), int(10), text("Paris")],
                vec![text("bob"), Cell::Null, text("Lyon")],
                vec![text("carol"), int(30), text("Paris")],
            ],
        )
    }

    fn run(code: &str) -> ExecutionOutcome {
        execute(&sample(), code, &SandboxLimits::default())
    }

    fn ok(code: &str) -> ExecutionOutcome {
        let out = run(code);
        assert!(out.error.is_none(), "unexpected error: {:?}\nlog: {}", out.error, out.log);
        out
    }

    fn fault(code: &str) -> String {
        match run(code).error {
            Some(ExecutionError::Fault { message }) => message,
            other => panic!("expected a fault, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_code_is_identity() {
        for code in ["", "   \n\t  "] {
            let out = run(code);
            assert_eq!(out.table, sample());
            assert!(out.log.is_empty());
            assert!(out.error.is_none());
        }
    }

    #[test]
    fn test_denylisted_code_is_rejected_untouched() {
        for (code, rule) in [
            ("__import__('os')", "__import__"),
            ("eval('1')", "eval"),
            ("open('f')", "open"),
            ("x = os.getcwd()", "os."),
            ("df.__class__", "dunder"),
            ("EVAL('1')", "eval"),
        ] {
            let out = run(code);
            assert_eq!(out.table, sample());
            assert!(out.log.is_empty());
            assert_eq!(
                out.error,
                Some(ExecutionError::Rejected { rule: rule.to_string() }),
                "{}",
                code
            );
        }
    }

    #[test]
    fn test_fault_keeps_original_and_partial_log() {
        let out = run("print('before')\ndf = df['nonexistent_col']");
        assert_eq!(out.table, sample());
        assert_eq!(out.log, "before\n");
        match out.error {
            Some(ExecutionError::Fault { message }) => {
                assert_eq!(message, "KeyError: 'nonexistent_col' (line 2)")
            }
            other => panic!("expected a fault, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_names_are_name_errors() {
        assert!(fault("x = requests.get('http://x')").starts_with("NameError: name 'requests'"));
        assert!(fault("import os").starts_with("SyntaxError"));
    }

    #[test]
    fn test_result_wins_over_clean_df() {
        let out = ok("clean_df = df.head(1)\nresult = df.head(2)");
        assert_eq!(out.table.num_rows(), 2);
        let out = ok("clean_df = df.head(1)");
        assert_eq!(out.table.num_rows(), 1);
        let out = ok("df = df.tail(1)");
        assert_eq!(out.table.num_rows(), 1);
    }

    #[test]
    fn test_non_table_result_is_type_mismatch() {
        let out = run("print('hi')\nresult = 42");
        assert_eq!(out.table, sample());
        assert_eq!(out.log, "hi\n");
        assert_eq!(out.error, Some(ExecutionError::NotATable { found: "int".to_string() }));
    }

    #[test]
    fn test_input_table_is_never_mutated() {
        let input = sample();
        let out = execute(&input, "df['amount'] = 0\ndf.loc[0, 'city'] = 'Nice'", &SandboxLimits::default());
        assert!(out.error.is_none());
        assert_eq!(input, sample());
        assert_eq!(out.table.column("city").unwrap().values[0], text("Nice"));
    }

    #[test]
    fn test_executions_do_not_share_state() {
        ok("secret = 1\nresult = df");
        assert!(fault("result = df.head(secret)").starts_with("NameError: name 'secret'"));
    }

    #[test]
    fn test_print_goes_to_the_log() {
        let out = ok("print('rows:', len(df))\nprint(df.shape)\nprint(f\"{1/3:.2f}\")");
        assert_eq!(out.log, "rows: 3\n(3, 3)\n0.33\n");
    }

    #[test]
    fn test_column_cleaning_pipeline() {
        let code = r#"
df['name'] = df['name'].str.strip().str.title()
df = df.dropna(subset=['amount'])
df['amount'] = df['amount'] * 2
result = df.sort_values('amount', ascending=False)
"#;
        let out = ok(code);
        let names: Vec<Cell> = out.table.column("name").unwrap().values.clone();
        assert_eq!(names, vec![text("Carol"), text("Alice")]);
        assert_eq!(out.table.column("amount").unwrap().values, vec![int(60), int(20)]);
    }

    #[test]
    fn test_groupby_agg_and_iteration() {
        let code = r#"
totals = df.groupby('city')['amount'].sum()
for city, part in df.groupby('city'):
    print(city, len(part))
result = totals
"#;
        let out = ok(code);
        assert_eq!(out.log, "Lyon 1\nParis 2\n");
        assert_eq!(out.table.column_names(), vec!["city", "amount"]);
        assert_eq!(out.table.column("amount").unwrap().values, vec![int(0), int(40)]);
    }

    #[test]
    fn test_named_aggregation() {
        let out = ok("result = df.groupby('city').agg(n=('name', 'count'), total=('amount', 'sum'))");
        assert_eq!(out.table.column_names(), vec!["city", "n", "total"]);
        assert_eq!(out.table.column("n").unwrap().values, vec![int(1), int(2)]);
    }

    #[test]
    fn test_functions_lambdas_and_comprehensions() {
        let code = r#"
def label(v):
    if v is None:
        return 'missing'
    elif v > 15:
        return 'big'
    return 'small'

df['size'] = df['amount'].apply(label)
evens = [i * i for i in range(6) if i % 2 == 0]
print(evens, sorted(df['city'].unique(), key=lambda s: -len(s)))
"#;
        let out = ok(code);
        assert_eq!(
            out.table.column("size").unwrap().values,
            vec![text("small"), text("missing"), text("big")]
        );
        assert_eq!(out.log, "[0, 4, 16] ['Paris', 'Lyon']\n");
    }

    #[test]
    fn test_boolean_masks() {
        let out = ok("result = df[(df['city'] == 'Paris') & ~df['amount'].isna()]");
        assert_eq!(out.table.num_rows(), 2);
        let out = ok("result = df[df['amount'].between(5, 15) | (df['name'] == 'bob')]");
        assert_eq!(out.table.num_rows(), 2);
    }

    #[test]
    fn test_regex_datetime_and_json() {
        let code = r#"
d = datetime.strptime('2024-03-05', '%Y-%m-%d')
print(d.year, d.strftime('%d/%m'))
print(re.sub(r'\d+', '#', 'a1b22'))
print(json.dumps({'a': [1, None]}))
"#;
        let out = ok(code);
        assert_eq!(out.log, "2024 05/03\na#b#\n{\"a\": [1, null]}\n");
    }

    #[test]
    fn test_step_budget_stops_runaway_loops() {
        let limits = SandboxLimits {
            max_steps: 10_000,
            ..SandboxLimits::default()
        };
        let out = execute(&sample(), "while True:\n    pass", &limits);
        match out.error {
            Some(ExecutionError::Fault { message }) => assert!(message.contains("execution budget exceeded")),
            other => panic!("expected budget fault, got {:?}", other),
        }
        assert_eq!(out.table, sample());
    }

    #[test]
    fn test_integer_extremes_fault_instead_of_panicking() {
        let out = ok("x = -9223372036854775807 - 1\nprint(x // -1, x % -1)");
        assert_eq!(out.log, "9223372036854775808 0\n");

        let out = ok("n = 0\nfor i in range(9223372036854775806, 9223372036854775807, 5):\n    n += 1\nprint(n, i)");
        assert_eq!(out.log, "1 9223372036854775806\n");

        let message = fault("print(len(range(-9223372036854775807 - 1, 9223372036854775807)))");
        assert!(message.starts_with("ValueError"), "{}", message);
    }

    #[test]
    fn test_large_strings_are_bounded() {
        ok("s = 'x' * 10000000\nprint(len(s))");
        for code in [
            "s = 'x' * 10000000\ns = s + s",
            "s = 'x' * 6000000\nt = f'{s}{s}'",
            "parts = ['x' * 1000] * 10000\ns = ','.join(parts)",
        ] {
            let message = fault(code);
            assert!(message.starts_with("ValueError"), "{}: {}", code, message);
            assert!(message.contains("too large"), "{}", message);
        }
    }

    #[test]
    fn test_building_strings_costs_budget() {
        let limits = SandboxLimits {
            max_steps: 10_000,
            ..SandboxLimits::default()
        };
        let out = execute(&sample(), "s = 'x' * 1000000", &limits);
        match out.error {
            Some(ExecutionError::Fault { message }) => assert!(message.contains("execution budget exceeded")),
            other => panic!("expected budget fault, got {:?}", other),
        }
    }

    #[test]
    fn test_recursion_limit() {
        let message = fault("def f(n):\n    return f(n + 1)\nf(0)");
        assert!(message.starts_with("RecursionError"), "{}", message);
    }

    #[test]
    fn test_log_is_capped() {
        let limits = SandboxLimits {
            max_log_bytes: 64,
            ..SandboxLimits::default()
        };
        let out = execute(&sample(), "for i in range(100):\n    print('line', i)", &limits);
        assert!(out.error.is_none());
        assert!(out.log.len() < 200);
    }
}
