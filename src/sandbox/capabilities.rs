//! The allow-list of names a transformation script can reach.
//!
//! Scripts have no import statement and no reflection, so this table is the
//! whole of their world beyond the literals they write.

use std::collections::HashMap;

use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Pandas,
    Datetime,
    Re,
    Json,
}

impl Module {
    pub fn name(&self) -> &'static str {
        match self {
            Module::Pandas => "pandas",
            Module::Datetime => "datetime",
            Module::Re => "re",
            Module::Json => "json",
        }
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        let builtin = match (self, name) {
            (Module::Pandas, "DataFrame") => Builtin::PdDataFrame,
            (Module::Pandas, "Series") => Builtin::PdSeries,
            (Module::Pandas, "concat") => Builtin::PdConcat,
            (Module::Pandas, "to_numeric") => Builtin::PdToNumeric,
            (Module::Pandas, "to_datetime") => Builtin::PdToDatetime,
            (Module::Pandas, "isna") | (Module::Pandas, "isnull") => Builtin::PdIsna,
            (Module::Pandas, "notna") | (Module::Pandas, "notnull") => Builtin::PdNotna,
            (Module::Pandas, "NA") | (Module::Pandas, "NaT") => return Some(Value::None),
            (Module::Datetime, "now") => Builtin::DtNow,
            (Module::Datetime, "today") => Builtin::DtNow,
            (Module::Datetime, "strptime") => Builtin::DtStrptime,
            (Module::Datetime, "fromisoformat") => Builtin::DtFromIso,
            (Module::Re, "sub") => Builtin::ReSub,
            (Module::Re, "search") => Builtin::ReSearch,
            (Module::Re, "match") => Builtin::ReMatch,
            (Module::Re, "fullmatch") => Builtin::ReFullmatch,
            (Module::Re, "findall") => Builtin::ReFindall,
            (Module::Re, "split") => Builtin::ReSplit,
            (Module::Re, "escape") => Builtin::ReEscape,
            (Module::Re, "IGNORECASE") | (Module::Re, "I") => return Some(Value::Int(RE_IGNORECASE)),
            (Module::Re, "MULTILINE") | (Module::Re, "M") => return Some(Value::Int(RE_MULTILINE)),
            (Module::Re, "DOTALL") | (Module::Re, "S") => return Some(Value::Int(RE_DOTALL)),
            (Module::Json, "dumps") => Builtin::JsonDumps,
            (Module::Json, "loads") => Builtin::JsonLoads,
            _ => return None,
        };
        Some(Value::Builtin(builtin))
    }
}

pub const RE_IGNORECASE: i64 = 2;
pub const RE_MULTILINE: i64 = 8;
pub const RE_DOTALL: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Set,
    Tuple,
    Range,
    Enumerate,
    Zip,
    Map,
    Filter,
    Sorted,
    Reversed,
    Sum,
    Min,
    Max,
    Abs,
    Round,
    Any,
    All,
    Isinstance,
    PdDataFrame,
    PdSeries,
    PdConcat,
    PdToNumeric,
    PdToDatetime,
    PdIsna,
    PdNotna,
    DtNow,
    DtStrptime,
    DtFromIso,
    ReSub,
    ReSearch,
    ReMatch,
    ReFullmatch,
    ReFindall,
    ReSplit,
    ReEscape,
    JsonDumps,
    JsonLoads,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Tuple => "tuple",
            Builtin::Range => "range",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Isinstance => "isinstance",
            Builtin::PdDataFrame => "DataFrame",
            Builtin::PdSeries => "Series",
            Builtin::PdConcat => "concat",
            Builtin::PdToNumeric => "to_numeric",
            Builtin::PdToDatetime => "to_datetime",
            Builtin::PdIsna => "isna",
            Builtin::PdNotna => "notna",
            Builtin::DtNow => "now",
            Builtin::DtStrptime => "strptime",
            Builtin::DtFromIso => "fromisoformat",
            Builtin::ReSub => "sub",
            Builtin::ReSearch => "search",
            Builtin::ReMatch => "match",
            Builtin::ReFullmatch => "fullmatch",
            Builtin::ReFindall => "findall",
            Builtin::ReSplit => "split",
            Builtin::ReEscape => "escape",
            Builtin::JsonDumps => "dumps",
            Builtin::JsonLoads => "loads",
        }
    }
}

const GENERAL_BUILTINS: &[Builtin] = &[
    Builtin::Print,
    Builtin::Len,
    Builtin::Str,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::List,
    Builtin::Dict,
    Builtin::Set,
    Builtin::Tuple,
    Builtin::Range,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Map,
    Builtin::Filter,
    Builtin::Sorted,
    Builtin::Reversed,
    Builtin::Sum,
    Builtin::Min,
    Builtin::Max,
    Builtin::Abs,
    Builtin::Round,
    Builtin::Any,
    Builtin::All,
    Builtin::Isinstance,
];

/// Name table handed to one execution. Built fresh per call so nothing a
/// script does can leak into the next one.
#[derive(Debug)]
pub struct Capabilities {
    names: HashMap<&'static str, Value>,
}

impl Capabilities {
    /// The standard allow-list: `pd`, `datetime`, `re`, `json` and the
    /// general builtins.
    pub fn standard() -> Self {
        let mut names: HashMap<&'static str, Value> = GENERAL_BUILTINS
            .iter()
            .map(|b| (b.name(), Value::Builtin(*b)))
            .collect();
        names.insert("pd", Value::Module(Module::Pandas));
        names.insert("datetime", Value::Module(Module::Datetime));
        names.insert("re", Value::Module(Module::Re));
        names.insert("json", Value::Module(Module::Json));
        Self { names }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.names.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_allow_list() {
        let caps = Capabilities::standard();
        for name in ["pd", "datetime", "re", "json", "print", "len", "sorted", "round"] {
            assert!(caps.contains(name), "missing {}", name);
        }
        for name in ["open", "eval", "exec", "__import__", "globals", "getattr", "input"] {
            assert!(!caps.contains(name), "unexpected {}", name);
        }
    }

    #[test]
    fn test_module_attributes() {
        assert!(matches!(
            Module::Pandas.attr("DataFrame"),
            Some(Value::Builtin(Builtin::PdDataFrame))
        ));
        assert!(Module::Re.attr("compile").is_none());
        assert!(Module::Json.attr("load").is_none());
    }
}
