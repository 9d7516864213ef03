//! Tree-walking evaluator.
//!
//! Everything a script can touch is reachable from three places: the
//! per-call [`Capabilities`] table, the globals the caller binds (`df`), and
//! values the script builds itself.

use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;

use super::ast::*;
use super::builtins::match_group;
use super::capabilities::{Capabilities, Module};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::ops::{self, compare_scalar, format_value, unary_scalar};
use super::output::{Budget, OutputBuffer};
use super::value::*;

/// Deepest user-function nesting before a `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 64;
/// Bytes of built sequence per budget step.
pub(super) const SIZE_CHARGE_UNIT: usize = 16;

pub(super) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    scope: Option<Rc<Scope>>,
    caps: Capabilities,
    pub(super) out: OutputBuffer,
    pub(super) budget: Budget,
    depth: usize,
    line: usize,
    pub(super) regex_cache: HashMap<(String, i64), Regex>,
}

impl Interpreter {
    pub fn new(caps: Capabilities, out: OutputBuffer, budget: Budget) -> Self {
        Self {
            globals: HashMap::new(),
            scope: None,
            caps,
            out,
            budget,
            depth: 0,
            line: 0,
            regex_cache: HashMap::new(),
        }
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn into_output(self) -> OutputBuffer {
        self.out
    }

    pub fn run(&mut self, program: &[Stmt]) -> ScriptResult<()> {
        match self.exec_block(program)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(ScriptError::syntax("'return' outside function").at_line(self.line)),
            Flow::Break | Flow::Continue => {
                Err(ScriptError::syntax("'break' or 'continue' outside loop").at_line(self.line))
            }
        }
    }

    pub(super) fn tick(&mut self) -> ScriptResult<()> {
        self.budget.tick()
    }

    /// Charges bulk work, one step per element.
    pub(super) fn charge(&mut self, n: usize) -> ScriptResult<()> {
        self.budget.charge(n as u64)
    }

    /// Building large strings and lists costs budget in proportion to size.
    pub(super) fn charge_size(&mut self, v: &Value) -> ScriptResult<()> {
        match v {
            Value::Str(_) | Value::List(_) | Value::Tuple(_) => self.charge(v.weight() / SIZE_CHARGE_UNIT),
            _ => Ok(()),
        }
    }

    // ===== statements =====

    pub(super) fn exec_block(&mut self, stmts: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in stmts {
            self.line = stmt.line;
            self.tick()?;
            let flow = self.exec_stmt(stmt).map_err(|e| e.at_line(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ScriptResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => return self.exec_for(target, iter, body),
            StmtKind::While { cond, body } => loop {
                self.tick()?;
                if !self.eval(cond)?.truthy()? {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::Def { name, params, body } => {
                let function = self.make_function(name, params, FunctionBody::Block(body.clone()))?;
                self.store(name, function);
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, target: &Target, iter: &Expr, body: &[Stmt]) -> ScriptResult<Flow> {
        let iterable = self.eval(iter)?;
        // ranges are walked lazily so `for i in range(10**9)` hits the budget
        // instead of allocating
        if let Value::Range { start, stop, step } = iterable {
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                self.assign(target, Value::Int(i))?;
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                // stepping past i64 bounds means the range is exhausted
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
            return Ok(Flow::Normal);
        }
        for item in self.iter_values(&iterable)? {
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn make_function(&mut self, name: &str, params: &[Param], body: FunctionBody) -> ScriptResult<Value> {
        let mut defaults = Vec::with_capacity(params.len());
        for param in params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            name: name.to_string(),
            params: params.iter().map(|p| p.name.clone()).collect(),
            defaults,
            body,
            closure: self.scope.clone(),
        })))
    }

    // ===== names and targets =====

    pub(super) fn lookup(&self, name: &str) -> ScriptResult<Value> {
        if let Some(scope) = &self.scope {
            if let Some(v) = scope.lookup(name) {
                return Ok(v);
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        self.caps
            .lookup(name)
            .ok_or_else(|| ScriptError::name_error(name))
    }

    fn store(&mut self, name: &str, value: Value) {
        match &self.scope {
            Some(scope) => {
                scope.vars.borrow_mut().insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    pub(super) fn assign(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Index { value: obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.set_item(&obj, &index, value)
            }
            Target::Attr { value: obj, attr } => {
                let obj = self.eval(obj)?;
                self.set_attr(&obj, attr, value)
            }
            Target::Tuple(targets) => {
                let items = self.iter_values(&value)?;
                if items.len() != targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "cannot unpack {} values into {} targets",
                        items.len(),
                        targets.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                if let (BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra = self.iter_values(&rhs)?;
                    items.borrow_mut().extend(extra);
                    return Ok(());
                }
                let result = self.binary(op, &current, &rhs)?;
                self.store(name, result);
                Ok(())
            }
            Target::Index { value: obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let result = self.binary(op, &current, &rhs)?;
                self.set_item(&obj, &index, result)
            }
            Target::Attr { value: obj, attr } => {
                let obj = self.eval(obj)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(value)?;
                let result = self.binary(op, &current, &rhs)?;
                self.set_attr(&obj, attr, result)
            }
            Target::Tuple(_) => Err(ScriptError::syntax(
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, target: &Target) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let removed = match &self.scope {
                    Some(scope) => scope.vars.borrow_mut().remove(name).is_some(),
                    None => self.globals.remove(name).is_some(),
                };
                if removed {
                    Ok(())
                } else {
                    Err(ScriptError::name_error(name))
                }
            }
            Target::Index { value, index } => {
                let obj = self.eval(value)?;
                let index = self.eval(index)?;
                self.del_item(&obj, &index)
            }
            Target::Attr { attr, .. } => Err(ScriptError::new(
                ErrorKind::Attribute,
                format!("cannot delete attribute '{}'", attr),
            )),
            Target::Tuple(targets) => {
                for t in targets {
                    self.delete(t)?;
                }
                Ok(())
            }
        }
    }

    // ===== expressions =====

    pub(super) fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::Const(c) => Ok(match c {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(s) => out.push_str(s),
                        FPart::Expr { expr, repr, spec } => {
                            let v = self.eval(expr)?;
                            if *repr {
                                out.push_str(&v.py_repr());
                            } else {
                                out.push_str(&format_value(&v, spec.as_deref().unwrap_or(""))?);
                            }
                        }
                    }
                    ops::check_size(out.len(), "formatted string")?;
                }
                let out = Value::Str(out);
                self.charge_size(&out)?;
                Ok(out)
            }
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Set(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::list(self.dedupe(items)?))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp { elt, clauses } => {
                let mut out = Vec::new();
                self.in_child_scope(|interp| {
                    interp.comprehension(clauses, 0, &mut |interp| {
                        let v = interp.eval(elt)?;
                        out.push(v);
                        Ok(())
                    })
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp { key, value, clauses } => {
                let mut dict = Dict::new();
                self.in_child_scope(|interp| {
                    interp.comprehension(clauses, 0, &mut |interp| {
                        let k = interp.eval(key)?;
                        let v = interp.eval(value)?;
                        dict.insert(k, v)
                    })
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Attr { value, attr } => {
                let obj = self.eval(value)?;
                self.get_attr(&obj, attr)
            }
            Expr::Index { value, index } => {
                let obj = self.eval(value)?;
                let index = self.eval(index)?;
                self.get_item(&obj, &index)
            }
            Expr::Slice { lower, upper, step } => {
                let mut bound = |e: &Option<Box<Expr>>| -> ScriptResult<Option<i64>> {
                    match e {
                        None => Ok(None),
                        Some(e) => match self.eval(e)? {
                            Value::None => Ok(None),
                            v => v.as_int("slice index").map(Some),
                        },
                    }
                };
                let lower = bound(lower)?;
                let upper = bound(upper)?;
                let step = bound(step)?;
                if step == Some(0) {
                    return Err(ScriptError::value_error("slice step cannot be zero"));
                }
                Ok(Value::Slice { lower, upper, step })
            }
            Expr::Call { func, args, kwargs } => {
                let positional = self.eval_all(args)?;
                let mut named = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    named.push((name.clone(), self.eval(e)?));
                }
                let call_args = CallArgs::new(positional, named);
                if let Expr::Attr { value, attr } = func.as_ref() {
                    let receiver = self.eval(value)?;
                    return self.call_method(&receiver, attr, call_args);
                }
                let callee = self.eval(func)?;
                self.call_value(&callee, call_args)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.unary(*op, &v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, &l, &r)
            }
            Expr::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                let short = match op {
                    BoolOpKind::And => !l.truthy()?,
                    BoolOpKind::Or => l.truthy()?,
                };
                if short {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::Compare { left, rest } => {
                let mut l = self.eval(left)?;
                if rest.len() == 1 {
                    let (op, e) = &rest[0];
                    let r = self.eval(e)?;
                    return self.compare(*op, &l, &r);
                }
                for (op, e) in rest {
                    let r = self.eval(e)?;
                    if !self.compare(*op, &l, &r)?.truthy()? {
                        return Ok(Value::Bool(false));
                    }
                    l = r;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { cond, body, orelse } => {
                if self.eval(cond)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda { params, body } => {
                self.make_function("<lambda>", params, FunctionBody::Lambda(body.clone()))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> ScriptResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn in_child_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
        let saved = self.scope.clone();
        self.scope = Some(Scope::child(saved.clone()));
        let result = f(self);
        self.scope = saved;
        result
    }

    fn comprehension(
        &mut self,
        clauses: &[Comprehension],
        level: usize,
        emit: &mut dyn FnMut(&mut Self) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let Some(clause) = clauses.get(level) else {
            return emit(self);
        };
        let iterable = self.eval(&clause.iter)?;
        'items: for item in self.iter_values(&iterable)? {
            self.tick()?;
            self.assign(&clause.target, item)?;
            for cond in &clause.conds {
                if !self.eval(cond)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehension(clauses, level + 1, emit)?;
        }
        Ok(())
    }

    /// Order-preserving de-duplication behind `set()` and `{a, b}`.
    pub(super) fn dedupe(&mut self, items: Vec<Value>) -> ScriptResult<Vec<Value>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.hash_key()?) {
                out.push(item);
            }
        }
        Ok(out)
    }

    pub(super) fn unary(&mut self, op: UnaryOp, v: &Value) -> ScriptResult<Value> {
        match v {
            Value::Series(col) if op != UnaryOp::Not => self.series_unary(op, col),
            Value::Table(_) if op == UnaryOp::Invert => self.table_invert(v),
            _ => unary_scalar(op, v),
        }
    }

    pub(super) fn binary(&mut self, op: BinOp, l: &Value, r: &Value) -> ScriptResult<Value> {
        match (l, r) {
            (Value::Series(_), _) | (_, Value::Series(_)) => self.series_binary(op, l, r),
            (Value::Table(_), _) | (_, Value::Table(_)) => self.table_binary(op, l, r),
            _ => {
                let out = ops::binary_scalar(op, l, r)?;
                self.charge_size(&out)?;
                Ok(out)
            }
        }
    }

    pub(super) fn compare(&mut self, op: CmpOp, l: &Value, r: &Value) -> ScriptResult<Value> {
        let elementwise = !matches!(op, CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot);
        if elementwise && (matches!(l, Value::Series(_)) || matches!(r, Value::Series(_))) {
            return self.series_compare(op, l, r);
        }
        Ok(Value::Bool(compare_scalar(op, l, r)?))
    }

    // ===== calls =====

    pub(super) fn call_value(&mut self, callee: &Value, args: CallArgs) -> ScriptResult<Value> {
        match callee {
            Value::Builtin(b) => self.call_builtin(*b, args),
            Value::Function(f) => self.call_function(f, args),
            Value::Method(m) => {
                let receiver = m.receiver.clone();
                self.call_method(&receiver, &m.name, args)
            }
            Value::Module(Module::Datetime) => self.datetime_new(args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub(super) fn call1(&mut self, callee: &Value, arg: Value) -> ScriptResult<Value> {
        self.call_value(callee, CallArgs::new(vec![arg], Vec::new()))
    }

    fn call_function(&mut self, function: &Rc<Function>, mut args: CallArgs) -> ScriptResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::new(
                ErrorKind::Recursion,
                "maximum recursion depth exceeded",
            ));
        }
        let scope = Scope::child(function.closure.clone());
        {
            let mut vars = scope.vars.borrow_mut();
            for (i, name) in function.params.iter().enumerate() {
                let value = match args.arg(i, name) {
                    Some(v) => v,
                    None => function.defaults[i].clone().ok_or_else(|| {
                        ScriptError::type_error(format!(
                            "{}() missing required argument: '{}'",
                            function.name, name
                        ))
                    })?,
                };
                vars.insert(name.clone(), value);
            }
        }
        args.finish(&function.name)?;

        let saved_scope = std::mem::replace(&mut self.scope, Some(scope));
        let saved_line = self.line;
        self.depth += 1;
        let result = match &function.body {
            FunctionBody::Lambda(expr) => self.eval(expr),
            FunctionBody::Block(body) => match self.exec_block(body) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(Flow::Normal) => Ok(Value::None),
                Ok(Flow::Break | Flow::Continue) => {
                    Err(ScriptError::syntax("'break' or 'continue' outside loop"))
                }
                Err(e) => Err(e),
            },
        };
        self.depth -= 1;
        self.scope = saved_scope;
        if result.is_ok() {
            self.line = saved_line;
        }
        result
    }

    pub(super) fn call_method(&mut self, receiver: &Value, name: &str, args: CallArgs) -> ScriptResult<Value> {
        match receiver {
            Value::Module(module) => {
                let f = module.attr(name).ok_or_else(|| module_attr_error(*module, name))?;
                self.call_value(&f, args)
            }
            Value::Str(s) => self.str_method(s, name, args),
            Value::List(items) => self.list_method(items, name, args),
            Value::Dict(dict) => self.dict_method(dict, name, args),
            Value::DateTime(dt) => self.datetime_method(*dt, name, args),
            Value::Table(_) => self.table_method(receiver, name, args),
            Value::Series(col) => self.series_method(col, name, args),
            Value::StrAccessor(col) => self.str_accessor_method(col, name, args),
            Value::DtAccessor(col) => self.dt_accessor_method(col, name, args),
            Value::GroupBy(gb) => self.groupby_method(gb, name, args),
            Value::Match(m) => self.match_method(m, name, args),
            Value::Tuple(items) => self.tuple_method(items, name, args),
            other => {
                let attr = self.get_attr(other, name)?;
                self.call_value(&attr, args)
            }
        }
    }

    // ===== attributes and items =====

    pub(super) fn get_attr(&mut self, obj: &Value, name: &str) -> ScriptResult<Value> {
        let found = match obj {
            Value::Module(module) => {
                return module.attr(name).ok_or_else(|| module_attr_error(*module, name));
            }
            Value::Table(_) => self.table_attr(obj, name)?,
            Value::Series(col) => self.series_attr(col, name)?,
            Value::DtAccessor(col) => self.dt_attr(col, name)?,
            Value::DateTime(dt) => datetime_attr(dt, name),
            _ => None,
        };
        if let Some(v) = found {
            return Ok(v);
        }
        if has_method(obj, name) {
            return Ok(Value::Method(Rc::new(BoundMethod {
                receiver: obj.clone(),
                name: name.to_string(),
            })));
        }
        Err(ScriptError::attribute_error(obj.type_name(), name))
    }

    fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> ScriptResult<()> {
        match (obj, name) {
            (Value::Table(t), "columns") => {
                let names = value.string_list("columns")?;
                self.rename_all(t, names)
            }
            _ => Err(ScriptError::new(
                ErrorKind::Attribute,
                format!("cannot set attribute '{}' on '{}' object", name, obj.type_name()),
            )),
        }
    }

    pub(super) fn get_item(&mut self, obj: &Value, index: &Value) -> ScriptResult<Value> {
        match obj {
            Value::List(items) => sequence_item(&items.borrow(), index, Value::list),
            Value::Tuple(items) => sequence_item(items, index, Value::tuple),
            Value::Str(s) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::Str(c.to_string())).collect();
                match sequence_item(&chars, index, Value::list)? {
                    Value::List(parts) => Ok(Value::Str(
                        parts.borrow().iter().map(Value::py_str).collect(),
                    )),
                    single => Ok(single),
                }
            }
            Value::Range { start, stop, step } => {
                let n = range_len(*start, *stop, *step);
                let i = normalize_index(index.as_int("range index")?, n)
                    .ok_or_else(|| ScriptError::index_error("range object index out of range"))?;
                Ok(Value::Int(range_item(*start, *step, i)))
            }
            Value::Dict(dict) => dict
                .borrow()
                .get(index)?
                .ok_or_else(|| ScriptError::key_error(&index.py_str())),
            Value::Table(_) => self.table_getitem(obj, index),
            Value::Series(col) => self.series_getitem(col, index),
            Value::Indexer(ix) => self.indexer_get(ix, index),
            Value::GroupBy(gb) => {
                let selection = index.string_list("groupby selection")?;
                Ok(Value::GroupBy(Rc::new(GroupBy {
                    table: gb.table.clone(),
                    keys: gb.keys.clone(),
                    selection: Some(selection),
                })))
            }
            Value::Match(m) => match_group(m, index),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(super) fn set_item(&mut self, obj: &Value, index: &Value, value: Value) -> ScriptResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let n = items.len();
                let i = normalize_index(index.as_int("list index")?, n)
                    .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => dict.borrow_mut().insert(index.clone(), value),
            Value::Table(t) => self.table_setitem(t, index, value),
            Value::Indexer(ix) => self.indexer_set(ix, index, value),
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn del_item(&mut self, obj: &Value, index: &Value) -> ScriptResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let n = items.len();
                let i = normalize_index(index.as_int("list index")?, n)
                    .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
                Some(_) => Ok(()),
                None => Err(ScriptError::key_error(&index.py_str())),
            },
            Value::Table(t) => {
                let name = index.as_str("column name")?;
                match t.borrow_mut().remove_column(name) {
                    Some(_) => Ok(()),
                    None => Err(ScriptError::key_error(name)),
                }
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    /// Materialises anything a `for` loop accepts, charging one step per item.
    pub(super) fn iter_values(&mut self, v: &Value) -> ScriptResult<Vec<Value>> {
        let items = match v {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Dict(d) => d.borrow().keys(),
            Value::Range { start, stop, step } => {
                let n = range_len(*start, *stop, *step);
                if n > ops::MAX_SEQUENCE {
                    return Err(ScriptError::value_error("range is too large to materialise"));
                }
                self.charge(n)?;
                return Ok((0..n).map(|i| Value::Int(range_item(*start, *step, i))).collect());
            }
            Value::Series(col) => col.values.iter().map(Value::from_cell).collect(),
            Value::Table(t) => t.borrow().column_names().into_iter().map(Value::Str).collect(),
            Value::GroupBy(gb) => self.groupby_items(gb)?,
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        self.charge(items.len())?;
        Ok(items)
    }

    pub(super) fn print(&mut self, text: &str) {
        self.out.write(text);
    }
}

fn module_attr_error(module: Module, name: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::Attribute,
        format!("module '{}' has no attribute '{}'", module.name(), name),
    )
}

/// Resolves a possibly negative index against a sequence length.
pub(super) fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i128;
    let idx = if i < 0 { i128::from(i) + len } else { i128::from(i) };
    (0..len).contains(&idx).then_some(idx as usize)
}

/// Python slice semantics: the positions selected by `lower:upper:step`.
pub(super) fn slice_positions(
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
    len: usize,
) -> Vec<usize> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(lower.map(resolve).unwrap_or(0), 0, len);
        let stop = clamp(upper.map(resolve).unwrap_or(len), 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = clamp(lower.map(resolve).unwrap_or(len - 1), -1, len - 1);
        let stop = clamp(upper.map(resolve).unwrap_or(-1), -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

fn sequence_item(items: &[Value], index: &Value, rebuild: fn(Vec<Value>) -> Value) -> ScriptResult<Value> {
    if let Value::Slice { lower, upper, step } = index {
        let picked = slice_positions(*lower, *upper, *step, items.len())
            .into_iter()
            .map(|i| items[i].clone())
            .collect();
        return Ok(rebuild(picked));
    }
    let i = normalize_index(index.as_int("index")?, items.len())
        .ok_or_else(|| ScriptError::index_error("index out of range"))?;
    Ok(items[i].clone())
}

fn datetime_attr(dt: &chrono::NaiveDateTime, name: &str) -> Option<Value> {
    use chrono::{Datelike, Timelike};
    let v = match name {
        "year" => dt.year() as i64,
        "month" => dt.month() as i64,
        "day" => dt.day() as i64,
        "hour" => dt.hour() as i64,
        "minute" => dt.minute() as i64,
        "second" => dt.second() as i64,
        _ => return None,
    };
    Some(Value::Int(v))
}

const STR_METHODS: &[&str] = &[
    "strip", "lstrip", "rstrip", "lower", "upper", "title", "capitalize", "replace", "split",
    "join", "startswith", "endswith", "find", "count", "isdigit", "isalpha", "isnumeric",
    "isspace", "zfill", "format",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "copy",
    "clear", "tolist",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update", "copy", "setdefault"];
const DATETIME_METHODS: &[&str] = &["strftime", "isoformat", "date", "weekday", "replace"];

fn has_method(obj: &Value, name: &str) -> bool {
    let names: &[&str] = match obj {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => &["index", "count"],
        Value::Dict(_) => DICT_METHODS,
        Value::DateTime(_) => DATETIME_METHODS,
        Value::Table(_) => super::frame::TABLE_METHODS,
        Value::Series(_) => super::series::SERIES_METHODS,
        Value::StrAccessor(_) => super::series::STR_ACCESSOR_METHODS,
        Value::DtAccessor(_) => &["strftime"],
        Value::GroupBy(_) => super::groupby::GROUPBY_METHODS,
        Value::Match(_) => &["group", "groups", "groupdict", "start", "end", "span"],
        _ => &[],
    };
    names.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_positions() {
        assert_eq!(slice_positions(Some(1), Some(3), None, 5), vec![1, 2]);
        assert_eq!(slice_positions(None, None, Some(-1), 3), vec![2, 1, 0]);
        assert_eq!(slice_positions(Some(-2), None, None, 5), vec![3, 4]);
        assert_eq!(slice_positions(Some(10), None, None, 5), Vec::<usize>::new());
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
    }
}
