//! Recursive-descent parser producing [`Stmt`] trees from lexer tokens.
//!
//! Operator precedence follows Python: lambda / ternary, `or`, `and`, `not`,
//! comparisons, `|`, `&`, additive, multiplicative, unary, `**`, postfix.

use std::rc::Rc;

use super::ast::*;
use super::error::{ScriptError, ScriptResult};
use super::lexer::{tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "if", "elif", "else", "for", "in", "is", "lambda", "def", "return",
    "pass", "break", "continue", "while", "del", "None", "True", "False",
];

/// Keywords of constructs the language deliberately leaves out.
const UNSUPPORTED: &[&str] = &[
    "import", "from", "class", "try", "except", "finally", "raise", "with", "yield", "global",
    "nonlocal", "assert", "async", "await",
];

pub fn parse_program(src: &str) -> ScriptResult<Vec<Stmt>> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(body)
}

/// Parses a standalone expression; used for f-string interpolations.
fn parse_expression(src: &str, line: usize) -> ScriptResult<Expr> {
    let mut tokens = tokenize(src).map_err(|e| relocate(e, line))?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.test()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

fn relocate(mut err: ScriptError, line: usize) -> ScriptError {
    err.line = Some(line);
    err
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message).at_line(self.line())
    }

    fn unexpected(&self) -> ScriptError {
        let what = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(o) => format!("'{}'", o),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {}", what))
    }

    // ===== statements =====

    fn statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(name) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = keyword {
            if UNSUPPORTED.contains(&name.as_str()) {
                return Err(self.error(format!("'{}' statements are not supported", name)));
            }
            match name.as_str() {
                "if" => return Ok(vec![self.if_statement(line)?]),
                "for" => return Ok(vec![self.for_statement(line)?]),
                "while" => return Ok(vec![self.while_statement(line)?]),
                "def" => return Ok(vec![self.def_statement(line)?]),
                _ => {}
            }
        }
        if self.at(&Tok::Indent) {
            return Err(self.error("unexpected indent"));
        }
        self.simple_line()
    }

    /// One or more `;`-separated simple statements ending the line.
    fn simple_line(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) && !self.at(&Tok::Dedent) {
            return Err(self.unexpected());
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        let kind = if self.eat_keyword("pass") {
            StmtKind::Pass
        } else if self.eat_keyword("break") {
            StmtKind::Break
        } else if self.eat_keyword("continue") {
            StmtKind::Continue
        } else if self.eat_keyword("return") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op(";") {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(self.testlist()?))
            }
        } else if self.eat_keyword("del") {
            let expr = self.testlist()?;
            let targets = match expr {
                Expr::Tuple(items) => items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<ScriptResult<Vec<_>>>()?,
                other => vec![self.to_target(other)?],
            };
            StmtKind::Del(targets)
        } else {
            self.expression_statement()?
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&mut self) -> ScriptResult<StmtKind> {
        let first = self.testlist()?;
        if let Some(op) = self.augmented_op() {
            self.pos += 1;
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }
        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }
        let mut chain = vec![first];
        while self.eat_op("=") {
            chain.push(self.testlist()?);
        }
        let value = chain.pop().ok_or_else(|| self.unexpected())?;
        let targets = chain
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn augmented_op(&self) -> Option<BinOp> {
        match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        }
    }

    fn to_target(&self, expr: Expr) -> ScriptResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { value, index } => Ok(Target::Index {
                value: *value,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<ScriptResult<Vec<_>>>()?,
            )),
            Expr::Attr { value, attr } => Ok(Target::Attr {
                value: *value,
                attr,
            }),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_line();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn if_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let cond = self.test()?;
        branches.push((cond, self.block()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let cond = self.test()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn while_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        self.expect_keyword("while")?;
        let cond = self.test()?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            line,
        })
    }

    fn def_statement(&mut self, line: usize) -> ScriptResult<Stmt> {
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::Def {
                name,
                params,
                body: Rc::new(body),
            },
            line,
        })
    }

    fn params(&mut self, close: &str) -> ScriptResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(close) {
            let name = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    /// Loop targets: comma-separated names or subscripts, parsed below the
    /// comparison level so `in` stays a separator.
    fn target_list(&mut self) -> ScriptResult<Target> {
        let mut items = vec![self.bit_or()?];
        let mut trailing = false;
        while self.eat_op(",") {
            if self.at_keyword("in") {
                trailing = true;
                break;
            }
            items.push(self.bit_or()?);
        }
        if items.len() == 1 && !trailing {
            let item = items.pop().ok_or_else(|| self.unexpected())?;
            return self.to_target(item);
        }
        self.to_target(Expr::Tuple(items))
    }

    // ===== expressions =====

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// builds a tuple.
    fn testlist(&mut self) -> ScriptResult<Expr> {
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.ends_testlist() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn ends_testlist(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof)
            || self.at_op("=")
            || self.at_op(")")
            || self.at_op(";")
            || self.at_op(":")
            || self.augmented_op().is_some()
    }

    pub(crate) fn test(&mut self) -> ScriptResult<Expr> {
        if self.eat_keyword("lambda") {
            let params = self.params(":")?;
            self.expect_op(":")?;
            let body = self.test()?;
            return Ok(Expr::Lambda {
                params,
                body: Rc::new(body),
            });
        }
        let expr = self.or_test()?;
        if self.eat_keyword("if") {
            let cond = self.or_test()?;
            self.expect_keyword("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                cond: Box::new(cond),
                body: Box::new(expr),
                orelse: Box::new(orelse),
            });
        }
        Ok(expr)
    }

    fn or_test(&mut self) -> ScriptResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                op: BoolOpKind::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> ScriptResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                op: BoolOpKind::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> ScriptResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let left = self.bit_or()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.bit_or()?));
        }
        if rest.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            rest,
        })
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Name(n) if n == "in" => CmpOp::In,
            Tok::Name(n) if n == "not" => {
                if matches!(self.peek_next(), Tok::Name(m) if m == "in") {
                    self.pos += 2;
                    return Some(CmpOp::NotIn);
                }
                return None;
            }
            Tok::Name(n) if n == "is" => {
                self.pos += 1;
                if self.eat_keyword("not") {
                    return Some(CmpOp::IsNot);
                }
                return Some(CmpOp::Is);
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn bit_or(&mut self) -> ScriptResult<Expr> {
        let mut left = self.bit_and()?;
        while self.eat_op("|") {
            let right = self.bit_and()?;
            left = binary(BinOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> ScriptResult<Expr> {
        let mut left = self.arith()?;
        while self.eat_op("&") {
            let right = self.arith()?;
            left = binary(BinOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn arith(&mut self) -> ScriptResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> ScriptResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> ScriptResult<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exp = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Index {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(name) => name,
                    _ => return Err(self.error("expected attribute name")),
                };
                expr = Expr::Attr {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, func: Expr) -> ScriptResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            let is_kwarg = matches!(self.peek(), Tok::Name(n) if !KEYWORDS.contains(&n.as_str()))
                && matches!(self.peek_next(), Tok::Op("="));
            if is_kwarg {
                let name = self.expect_name()?;
                self.pos += 1;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.test()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(arg),
                        clauses,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> ScriptResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let first = self.testlist()?;
            if !self.at_op(":") {
                return Ok(first);
            }
            Some(Box::new(first))
        };
        self.expect_op(":")?;
        let upper = if self.at_op("]") || self.at_op(":") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> ScriptResult<Vec<Comprehension>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_keyword("if") {
                conds.push(self.or_test()?);
            }
            clauses.push(Comprehension {
                target,
                iter: Box::new(iter),
                conds,
            });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Const::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Const::Float(f))),
            Tok::Str(s) => self.string_run(vec![FPart::Lit(s)], line),
            Tok::FStr(s) => {
                let parts = parse_fstring(&s, line)?;
                self.string_run(parts, line)
            }
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Const(Const::None)),
                "True" => Ok(Expr::Const(Const::Bool(true))),
                "False" => Ok(Expr::Const(Const::Bool(false))),
                kw if KEYWORDS.contains(&kw) || UNSUPPORTED.contains(&kw) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => self.paren(),
            Tok::Op("[") => self.list_display(),
            Tok::Op("{") => self.brace_display(),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected())
            }
        }
    }

    /// Adjacent string literals concatenate; any f-string part makes the
    /// whole run an f-string.
    fn string_run(&mut self, mut parts: Vec<FPart>, line: usize) -> ScriptResult<Expr> {
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Lit(s));
                }
                Tok::FStr(s) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&s, line)?);
                }
                _ => break,
            }
        }
        if parts.iter().all(|p| matches!(p, FPart::Lit(_))) {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Lit(s) => s,
                    FPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Const(Const::Str(text)));
        }
        Ok(Expr::FString(parts))
    }

    fn paren(&mut self) -> ScriptResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                clauses,
            });
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                clauses,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn brace_display(&mut self) -> ScriptResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.test()?;
        if !self.eat_op(":") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.at_op("}") {
                    break;
                }
                items.push(self.test()?);
            }
            self.expect_op("}")?;
            return Ok(Expr::Set(items));
        }
        let value = self.test()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp {
                key: Box::new(first),
                value: Box::new(value),
                clauses,
            });
        }
        let mut entries = vec![(first, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let key = self.test()?;
            self.expect_op(":")?;
            entries.push((key, self.test()?));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Splits an f-string body into literal runs and `{expr!r:spec}` fields.
fn parse_fstring(body: &str, line: usize) -> ScriptResult<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            lit.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            lit.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ScriptError::syntax("f-string: single '}' is not allowed").at_line(line));
        }
        if c != '{' {
            lit.push(c);
            i += 1;
            continue;
        }
        if !lit.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut lit)));
        }
        i += 1;
        let start = i;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut split: Option<usize> = None;
        let mut conv: Option<usize> = None;
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
            } else {
                match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    '!' if depth == 0 && split.is_none() && chars.get(i + 1) != Some(&'=') => {
                        conv = Some(i)
                    }
                    ':' if depth == 0 && split.is_none() => split = Some(i),
                    _ => {}
                }
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(ScriptError::syntax("f-string: expecting '}'").at_line(line));
        }
        let expr_end = conv.or(split).unwrap_or(i);
        let source: String = chars[start..expr_end].iter().collect();
        if source.trim().is_empty() {
            return Err(ScriptError::syntax("f-string: empty expression not allowed").at_line(line));
        }
        let repr = match conv {
            Some(pos) => {
                let flag: String = chars[pos + 1..split.unwrap_or(i)].iter().collect();
                match flag.as_str() {
                    "r" => true,
                    "s" => false,
                    _ => {
                        return Err(ScriptError::syntax("f-string: invalid conversion character")
                            .at_line(line))
                    }
                }
            }
            None => false,
        };
        let spec = split.map(|pos| chars[pos + 1..i].iter().collect::<String>());
        let expr = parse_expression(source.trim(), line)?;
        parts.push(FPart::Expr {
            expr: Box::new(expr),
            repr,
            spec,
        });
        i += 1;
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(lit));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> StmtKind {
        let mut stmts = parse_program(src).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.remove(0).kind
    }

    #[test]
    fn test_precedence_of_arithmetic() {
        let StmtKind::Expr(expr) = single("1 + 2 * 3 ** 2") else {
            panic!("expected expression");
        };
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_subscript_assignment() {
        let kind = single("df['total'] = df['a'] + df['b']");
        assert!(matches!(kind, StmtKind::Assign { ref targets, .. } if matches!(targets[0], Target::Index { .. })));
    }

    #[test]
    fn test_mask_with_bitwise_operators() {
        let kind = single("df = df[(df['a'] > 1) & ~df['b'].isna()]");
        let StmtKind::Assign { value, .. } = kind else {
            panic!("expected assignment");
        };
        let Expr::Index { index, .. } = value else {
            panic!("expected index");
        };
        assert!(matches!(*index, Expr::Binary { op: BinOp::BitAnd, .. }));
    }

    #[test]
    fn test_if_elif_else_block() {
        let kind = single("if x > 1:\n    y = 1\nelif x < 0:\n    y = 2\nelse:\n    y = 3\n");
        let StmtKind::If { branches, orelse } = kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_def_with_defaults_and_lambda() {
        let stmts = parse_program("def f(a, b=2):\n    return a + b\ng = lambda x: x * 2\n").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].kind, StmtKind::Def { params, .. } if params.len() == 2));
    }

    #[test]
    fn test_comprehension_and_generator_argument() {
        let kind = single("total = sum(x * 2 for x in values if x > 0)");
        let StmtKind::Assign { value, .. } = kind else {
            panic!("expected assignment");
        };
        let Expr::Call { args, .. } = value else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::ListComp { .. }));
    }

    #[test]
    fn test_fstring_with_format_spec() {
        let kind = single("s = f'{name}: {value:.2f}'");
        let StmtKind::Assign { value, .. } = kind else {
            panic!("expected assignment");
        };
        let Expr::FString(parts) = value else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[2], FPart::Expr { spec: Some(s), .. } if s == ".2f"));
    }

    #[test]
    fn test_semicolon_separated_statements() {
        let stmts = parse_program("a = 1; b = 2\n").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_import_is_rejected() {
        let err = parse_program("import math").unwrap_err();
        assert!(err.message.contains("not supported"));
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn test_error_line_number() {
        let err = parse_program("a = 1\nb = (2\n").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
    }

    #[test]
    fn test_chained_comparison_and_not_in() {
        let kind = single("ok = 0 < x <= 10 and y not in items");
        let StmtKind::Assign { value, .. } = kind else {
            panic!("expected assignment");
        };
        let Expr::BoolOp { left, right, .. } = value else {
            panic!("expected bool op");
        };
        assert!(matches!(*left, Expr::Compare { ref rest, .. } if rest.len() == 2));
        assert!(matches!(*right, Expr::Compare { ref rest, .. } if rest[0].0 == CmpOp::NotIn));
    }
}
