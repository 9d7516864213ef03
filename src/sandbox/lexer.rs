//! Tokenizer for transformation scripts.
//!
//! Produces Python-style logical lines: `Newline` ends a statement,
//! `Indent`/`Dedent` bracket blocks, and newlines inside brackets are ignored.

use super::error::{ScriptError, ScriptResult};

const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-", "*",
    "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "&", "|", "~",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> ScriptResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message).at_line(self.line)
    }

    fn run(&mut self) -> ScriptResult<()> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.end_line();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let text = self.read_string(false)?;
                    self.push(Tok::Str(text));
                }
                c if c.is_ascii_digit() => self.read_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number()?,
                c if c.is_alphabetic() || c == '_' => self.read_name_or_prefixed_string()?,
                _ => self.read_operator()?,
            }
        }
        self.end_line();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    fn end_line(&mut self) {
        let needs_newline = self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.tok, Tok::Newline | Tok::Indent | Tok::Dedent));
        if needs_newline {
            self.push(Tok::Newline);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Measures leading whitespace and emits indent tokens. Returns true when
    /// the line is blank or comment-only and was consumed whole.
    fn handle_indentation(&mut self) -> ScriptResult<bool> {
        let mut width = 0;
        let mut ahead = self.pos;
        while let Some(&c) = self.chars.get(ahead) {
            match c {
                ' ' => width += 1,
                '\t' => width += 4 - (width % 4),
                '\r' => {}
                _ => break,
            }
            ahead += 1;
        }
        match self.chars.get(ahead) {
            None => {
                self.pos = ahead;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = ahead + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.pos = ahead;
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }
        self.pos = ahead;
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn read_name_or_prefixed_string(&mut self) -> ScriptResult<()> {
        let c = self.peek().unwrap_or(' ');
        let next = self.peek_at(1);
        let is_quote = |q: Option<char>| matches!(q, Some('"') | Some('\''));
        if matches!(c, 'f' | 'F') && is_quote(next) {
            self.pos += 1;
            let text = self.read_string(false)?;
            self.push(Tok::FStr(text));
            return Ok(());
        }
        if matches!(c, 'r' | 'R') && is_quote(next) {
            self.pos += 1;
            let text = self.read_string(true)?;
            self.push(Tok::Str(text));
            return Ok(());
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(name));
        Ok(())
    }

    fn read_string(&mut self, raw: bool) -> ScriptResult<String> {
        let quote = self.peek().ok_or_else(|| self.error("unterminated string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(self.error("unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' {
                let next = self
                    .peek_at(1)
                    .ok_or_else(|| self.error("unterminated string literal"))?;
                self.pos += 2;
                if raw {
                    out.push('\\');
                    out.push(next);
                    continue;
                }
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn read_number(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float && self.peek_at(1) != Some('.') {
                is_float = true;
                self.pos += 1;
            } else if matches!(c, 'e' | 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid number literal '{}'", text)))?;
            self.push(Tok::Float(value));
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.error(format!("integer literal too large '{}'", text)))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn read_operator(&mut self) -> ScriptResult<()> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek_at(i) == Some(ch));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1.5"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Float(1.5),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n  2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_prefixes_and_escapes() {
        assert_eq!(kinds("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds("r'\\d+'")[0], Tok::Str("\\d+".into()));
        assert_eq!(kinds("f'{x}'")[0], Tok::FStr("{x}".into()));
    }

    #[test]
    fn test_comment_lines_skipped() {
        let toks = kinds("# note\nx = 1  # trailing\n");
        assert_eq!(toks[0], Tok::Name("x".into()));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
    }
}
