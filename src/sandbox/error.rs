use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Value,
    Key,
    Index,
    Attribute,
    ZeroDivision,
    Recursion,
    Budget,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::Budget => "BudgetExceeded",
        };
        f.write_str(label)
    }
}

/// A fault raised while parsing or running a script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// Attaches a line number unless a more precise one is already set.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::Name, format!("name '{}' is not defined", name))
    }

    pub fn key_error(key: &str) -> Self {
        Self::new(ErrorKind::Key, format!("'{}'", key))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorKind::Attribute,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

impl From<crate::table::TableError> for ScriptError {
    fn from(err: crate::table::TableError) -> Self {
        match err {
            crate::table::TableError::MissingColumn(name) => ScriptError::key_error(&name),
            other => ScriptError::value_error(other.to_string()),
        }
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
