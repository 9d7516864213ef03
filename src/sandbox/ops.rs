//! Scalar operators and `format()`-style specs.

use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::value::{py_cmp, py_eq, range_len, Value};
use crate::table::format_float;

/// Longest string or list a single operator may build.
pub const MAX_SEQUENCE: usize = 10_000_000;

pub fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
    }
}

fn int_like(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op_symbol(op),
        a.type_name(),
        b.type_name()
    ))
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::new(ErrorKind::ZeroDivision, message)
}

pub(super) fn check_size(size: usize, what: &str) -> ScriptResult<()> {
    if size > MAX_SEQUENCE {
        return Err(ScriptError::value_error(format!("{} is too large", what)));
    }
    Ok(())
}

fn repeat_count(n: i64, unit: usize) -> ScriptResult<usize> {
    let n = n.max(0) as usize;
    if unit.saturating_mul(n) > MAX_SEQUENCE {
        return Err(ScriptError::value_error("repeated sequence is too large"));
    }
    Ok(n)
}

/// Floor division; `None` when the quotient does not fit (`MIN // -1`).
pub fn floor_div_int(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

pub fn mod_int(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

pub fn mod_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

pub fn binary_scalar(op: BinOp, a: &Value, b: &Value) -> ScriptResult<Value> {
    if let (Some(x), Some(y)) = (int_like(a), int_like(b)) {
        if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
            if let (Value::Bool(p), Value::Bool(q)) = (a, b) {
                return Ok(Value::Bool(if op == BinOp::BitAnd { *p && *q } else { *p || *q }));
            }
            return Ok(Value::Int(if op == BinOp::BitAnd { x & y } else { x | y }));
        }
        return int_binary(op, x, y);
    }
    if let (Some(x), Some(y)) = (a.numeric(), b.numeric()) {
        return float_binary(op, x, y).ok_or_else(|| unsupported(op, a, b))?;
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_size(x.len() + y.len(), "concatenated string")?;
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::Str(s))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            check_size(a.weight() + b.weight(), "concatenated list")?;
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            check_size(a.weight() + b.weight(), "concatenated tuple")?;
            let mut items: Vec<Value> = x.as_ref().clone();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if int_like(n).is_some() => {
            let count = repeat_count(int_like(n).unwrap_or(0), s.len())?;
            Ok(Value::Str(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if int_like(n).is_some() =>
        {
            let count = repeat_count(int_like(n).unwrap_or(0), a.weight().max(b.weight()))?;
            let items = items.borrow();
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn int_binary(op: BinOp, x: i64, y: i64) -> ScriptResult<Value> {
    let fallback = || float_binary(op, x as f64, y as f64).unwrap_or(Ok(Value::Float(f64::NAN)));
    match op {
        BinOp::Add => x.checked_add(y).map(Value::Int).map(Ok).unwrap_or_else(fallback),
        BinOp::Sub => x.checked_sub(y).map(Value::Int).map(Ok).unwrap_or_else(fallback),
        BinOp::Mul => x.checked_mul(y).map(Value::Int).map(Ok).unwrap_or_else(fallback),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Ok(floor_div_int(x, y)
                .map(Value::Int)
                .unwrap_or_else(|| Value::Float((x as f64 / y as f64).floor())))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            Ok(Value::Int(mod_int(x, y)))
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            match u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                Some(v) => Ok(Value::Int(v)),
                None => Ok(Value::Float((x as f64).powf(y as f64))),
            }
        }
        BinOp::BitAnd => Ok(Value::Int(x & y)),
        BinOp::BitOr => Ok(Value::Int(x | y)),
    }
}

fn float_binary(op: BinOp, x: f64, y: f64) -> Option<ScriptResult<Value>> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Some(Err(zero_division("float division by zero")));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Some(Err(zero_division("float floor division by zero")));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Some(Err(zero_division("float modulo")));
            }
            mod_float(x, y)
        }
        BinOp::Pow => x.powf(y),
        BinOp::BitAnd | BinOp::BitOr => return None,
    };
    Some(Ok(Value::Float(v)))
}

pub fn unary_scalar(op: UnaryOp, v: &Value) -> ScriptResult<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Int(i)) => Ok(i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(*i as f64)))),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        _ => {
            let symbol = match op {
                UnaryOp::Neg => "unary -",
                UnaryOp::Pos => "unary +",
                UnaryOp::Invert => "unary ~",
                UnaryOp::Not => "not",
            };
            Err(ScriptError::type_error(format!(
                "bad operand type for {}: '{}'",
                symbol,
                v.type_name()
            )))
        }
    }
}

fn is_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Table(x), Value::Table(y)) => Rc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Int(_), Value::Int(_)) | (Value::Str(_), Value::Str(_)) => py_eq(a, b),
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

/// Membership test behind `in`. Tables answer for their column names and
/// series for their values.
pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(d) => d.borrow().contains(item),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range { start, stop, step } => Ok(match int_like(item) {
            Some(i) => {
                let n = range_len(*start, *stop, *step) as i128;
                let offset = i128::from(i) - i128::from(*start);
                let step = i128::from(*step);
                offset % step == 0 && offset / step >= 0 && offset / step < n
            }
            None => false,
        }),
        Value::Table(t) => match item {
            Value::Str(name) => Ok(t.borrow().column(name).is_some()),
            _ => Ok(false),
        },
        Value::Series(col) => {
            let cell = item.to_cell();
            let key = cell.key();
            Ok(col.values.iter().any(|c| c.key() == key))
        }
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare_scalar(op: CmpOp, a: &Value, b: &Value) -> ScriptResult<bool> {
    use std::cmp::Ordering::*;
    Ok(match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => !py_eq(a, b),
        CmpOp::Lt => py_cmp(a, b)? == Less,
        CmpOp::LtE => py_cmp(a, b)? != Greater,
        CmpOp::Gt => py_cmp(a, b)? == Greater,
        CmpOp::GtE => py_cmp(a, b)? != Less,
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => is_identical(a, b),
        CmpOp::IsNot => !is_identical(a, b),
    })
}

/// Parsed `[[fill]align][sign][,][0][width][.precision][type]`.
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    thousands: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if matches!(chars.get(i), Some(',') | Some('_')) {
        out.thousands = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        out.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(ScriptError::value_error(format!(
            "Invalid format specifier '{}'",
            spec
        )));
    }
    Ok(out)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, frac) = match digits.find('.') {
        Some(pos) => (&digits[..pos], &digits[pos..]),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (n, c) in int_part.chars().enumerate() {
        if n > 0 && (int_part.len() - n) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(frac);
    grouped
}

/// Renders `value` with a Python format spec, e.g. `.2f`, `>8`, `,d`, `.1%`.
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.py_str());
    }
    let spec = parse_spec(spec)?;
    let numeric = value.numeric().filter(|_| !matches!(value, Value::Str(_)));
    let body = match (spec.kind, numeric) {
        (Some('f') | Some('F'), Some(x)) => format!("{:.*}", spec.precision.unwrap_or(6), x.abs()),
        (Some('e') | Some('E'), Some(x)) => {
            let s = format!("{:.*e}", spec.precision.unwrap_or(6), x.abs());
            python_exponent(&s)
        }
        (Some('%'), Some(x)) => format!("{:.*}%", spec.precision.unwrap_or(6), x.abs() * 100.0),
        (Some('d'), Some(_)) => {
            let i = value.as_int("format value")?;
            i.unsigned_abs().to_string()
        }
        (Some('g') | None, Some(x)) if spec.precision.is_some() => {
            let p = spec.precision.unwrap_or(6).max(1);
            let s = format!("{:.*e}", p - 1, x.abs());
            let exp: i32 = s.split('e').nth(1).and_then(|e| e.parse().ok()).unwrap_or(0);
            if exp < -4 || exp >= p as i32 {
                python_exponent(&s)
            } else {
                let decimals = (p as i32 - 1 - exp).max(0) as usize;
                let fixed = format!("{:.*}", decimals, x.abs());
                if fixed.contains('.') {
                    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
                } else {
                    fixed
                }
            }
        }
        (None | Some('g'), Some(x)) => match value {
            Value::Int(i) => i.unsigned_abs().to_string(),
            _ => format_float(x.abs()),
        },
        (Some('s') | None, None) => {
            let s = value.py_str();
            match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        (Some(kind), _) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                kind,
                value.type_name()
            )))
        }
    };
    let body = if spec.thousands && numeric.is_some() {
        group_thousands(&body)
    } else {
        body
    };
    let negative = numeric.is_some_and(|x| x < 0.0);
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) if numeric.is_some() => "+",
        (false, Some(' ')) if numeric.is_some() => " ",
        _ => "",
    };
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return Ok(format!("{}{}", sign, body));
    }
    let pad = spec.width - len;
    let fill = spec.fill.unwrap_or(if spec.zero { '0' } else { ' ' });
    let align = spec.align.unwrap_or(if spec.zero {
        '='
    } else if numeric.is_some() {
        '>'
    } else {
        '<'
    });
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{}{}{}", sign, body, fill_str(pad)),
        '^' => format!(
            "{}{}{}{}",
            fill_str(pad / 2),
            sign,
            body,
            fill_str(pad - pad / 2)
        ),
        '=' => format!("{}{}{}", sign, fill_str(pad), body),
        _ => format!("{}{}{}", fill_str(pad), sign, body),
    })
}

/// Rust renders `1.5e3`; Python renders `1.5e+03`.
fn python_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_division_semantics() {
        assert!(matches!(binary_scalar(BinOp::Div, &Value::Int(7), &Value::Int(2)), Ok(Value::Float(f)) if f == 3.5));
        assert!(matches!(binary_scalar(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-4))));
        assert!(matches!(binary_scalar(BinOp::Mod, &Value::Int(-7), &Value::Int(3)), Ok(Value::Int(2))));
        let err = binary_scalar(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn test_string_and_list_operators() {
        let s = binary_scalar(BinOp::Add, &Value::str("a"), &Value::str("b")).unwrap();
        assert_eq!(s.py_str(), "ab");
        let r = binary_scalar(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
        assert_eq!(r.py_str(), "ababab");
        let err = binary_scalar(BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unsupported operand type(s) for +: 'str' and 'int'");
    }

    #[test]
    fn test_oversized_repeat_is_refused() {
        assert!(binary_scalar(BinOp::Mul, &Value::str("x"), &Value::Int(1 << 40)).is_err());
    }

    #[test]
    fn test_oversized_concatenation_is_refused() {
        let half = Value::Str("x".repeat(MAX_SEQUENCE / 2 + 1));
        let err = binary_scalar(BinOp::Add, &half, &half).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        let items = Value::list(vec![Value::str("abcd"); MAX_SEQUENCE / 8 + 1]);
        assert!(binary_scalar(BinOp::Add, &items, &items).is_err());
        let ok = binary_scalar(BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap();
        assert_eq!(ok.py_str(), "abcd");
    }

    #[test]
    fn test_integer_edges_do_not_overflow() {
        assert_eq!(floor_div_int(i64::MIN, -1), None);
        assert_eq!(floor_div_int(-7, 2), Some(-4));
        assert_eq!(mod_int(i64::MIN, -1), 0);
        let q = binary_scalar(BinOp::FloorDiv, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap();
        assert!(matches!(q, Value::Float(f) if f == 9.223372036854775808e18));
        let r = binary_scalar(BinOp::Mod, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap();
        assert!(matches!(r, Value::Int(0)));
    }

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::str("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_value(&Value::Int(5), "03d").unwrap(), "005");
        assert_eq!(format_value(&Value::Float(-2.5), ".1f").unwrap(), "-2.5");
        assert_eq!(format_value(&Value::Float(12345.678), ".2e").unwrap(), "1.23e+04");
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert!(compare_scalar(CmpOp::In, &Value::str("a"), &list).unwrap());
        assert!(compare_scalar(CmpOp::NotIn, &Value::Int(2), &list).unwrap());
        assert!(compare_scalar(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare_scalar(CmpOp::Is, &Value::None, &Value::None).unwrap());
    }
}
