//! Compile-time script evaluation for `@python { ... }` blocks.
//!
//! Generation scripts run in a sandbox: no I/O, no imports, a restricted
//! builtin set (`range`, `len`, `str`, `int`, `float`, `abs`, `min`, `max`,
//! `sum`, `round`, `pow`, `enumerate`) plus the `math` module. The
//! supported language subset is what code generators actually write:
//! assignments, `for`/`if`/`while`, arithmetic, f-strings, lists and
//! `append`/`join`. A step budget guards against runaway loops — the
//! compiler must terminate no matter what a script does.
//!
//! A script communicates results through the `generated_code` variable: a
//! string or list of strings of HAS statements that the code generator
//! re-parses and splices at the block's position.

use std::fmt;

use ahash::AHashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

fn err<T>(message: impl Into<String>) -> Result<T, ScriptError> {
    Err(ScriptError(message.into()))
}

/// Total statement executions allowed per block.
const STEP_LIMIT: usize = 2_000_000;

// ---------------------------------------------------------------------
// values
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    None,
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::List(items) => !items.is_empty(),
            Self::None => false,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::None => "NoneType",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(b) => Some(f64::from(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Self::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("]")
            }
            Self::None => f.write_str("None"),
        }
    }
}

// ---------------------------------------------------------------------
// tokens
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
}

fn tokenize(line: &str) -> Result<Vec<Tok>, ScriptError> {
    let chars: Vec<char> = line.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '#' => break,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            '"' | '\'' => {
                let (text, next) = scan_string(&chars, i, c)?;
                toks.push(Tok::Str(text));
                i = next;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    match text.parse::<f64>() {
                        Ok(v) => toks.push(Tok::Float(v)),
                        Err(_) => return err(format!("bad number literal '{text}'")),
                    }
                } else {
                    match text.parse::<i64>() {
                        Ok(v) => toks.push(Tok::Int(v)),
                        Err(_) => return err(format!("bad number literal '{text}'")),
                    }
                }
            }
            'f' if i + 1 < chars.len() && (chars[i + 1] == '"' || chars[i + 1] == '\'') => {
                let (text, next) = scan_string(&chars, i + 1, chars[i + 1])?;
                toks.push(Tok::FStr(text));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                toks.push(Tok::Name(chars[start..i].iter().collect()));
            }
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "**" | "//" | "==" | "!=" | "<=" | ">=" | "+=" | "-=" | "*=" | "/=" | "%=" => {
                        i += 2;
                        match two.as_str() {
                            "**" => "**",
                            "//" => "//",
                            "==" => "==",
                            "!=" => "!=",
                            "<=" => "<=",
                            ">=" => ">=",
                            "+=" => "+=",
                            "-=" => "-=",
                            "*=" => "*=",
                            "/=" => "/=",
                            _ => "%=",
                        }
                    }
                    _ => {
                        let op = match c {
                            '+' => "+",
                            '-' => "-",
                            '*' => "*",
                            '/' => "/",
                            '%' => "%",
                            '<' => "<",
                            '>' => ">",
                            '=' => "=",
                            _ => return err(format!("unsupported character '{c}' in script")),
                        };
                        i += 1;
                        op
                    }
                };
                toks.push(Tok::Op(op));
            }
        }
    }
    Ok(toks)
}

fn scan_string(chars: &[char], open: usize, quote: char) -> Result<(String, usize), ScriptError> {
    let mut text = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            text.push(match escaped {
                'n' => '\n',
                't' => '\t',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                other => other,
            });
            i += 2;
            continue;
        }
        text.push(c);
        i += 1;
    }
    err("unterminated string literal in script")
}

// ---------------------------------------------------------------------
// syntax
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum PyExpr {
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FsPart>),
    Name(String),
    List(Vec<PyExpr>),
    Unary {
        negate: bool,
        not: bool,
        operand: Box<PyExpr>,
    },
    Binary {
        op: &'static str,
        left: Box<PyExpr>,
        right: Box<PyExpr>,
    },
    Call {
        func: Box<PyExpr>,
        args: Vec<PyExpr>,
    },
    Attr {
        obj: Box<PyExpr>,
        name: String,
    },
    Index {
        obj: Box<PyExpr>,
        index: Box<PyExpr>,
    },
}

#[derive(Debug, Clone)]
enum FsPart {
    Lit(String),
    Expr(Box<PyExpr>),
}

#[derive(Debug, Clone)]
enum PyStmt {
    Assign { target: String, value: PyExpr },
    AugAssign { target: String, op: &'static str, value: PyExpr },
    For { targets: Vec<String>, iter: PyExpr, body: Vec<PyStmt> },
    While { cond: PyExpr, body: Vec<PyStmt> },
    If { arms: Vec<(PyExpr, Vec<PyStmt>)>, orelse: Vec<PyStmt> },
    Expr(PyExpr),
    Pass,
}

struct LogicalLine {
    indent: usize,
    toks: Vec<Tok>,
}

fn split_lines(code: &str) -> Result<Vec<LogicalLine>, ScriptError> {
    let mut out = Vec::new();
    for raw in code.lines() {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = raw.len() - trimmed.len();
        let toks = tokenize(trimmed)?;
        if !toks.is_empty() {
            out.push(LogicalLine { indent, toks });
        }
    }
    Ok(out)
}

struct BlockParser {
    lines: Vec<LogicalLine>,
    at: usize,
}

impl BlockParser {
    fn parse_block(&mut self, indent: usize) -> Result<Vec<PyStmt>, ScriptError> {
        let mut body = Vec::new();
        while self.at < self.lines.len() && self.lines[self.at].indent == indent {
            body.push(self.parse_stmt(indent)?);
        }
        if self.at < self.lines.len() && self.lines[self.at].indent > indent {
            return err("unexpected indentation in script");
        }
        Ok(body)
    }

    fn nested_block(&mut self, parent_indent: usize) -> Result<Vec<PyStmt>, ScriptError> {
        if self.at >= self.lines.len() || self.lines[self.at].indent <= parent_indent {
            return err("expected an indented block in script");
        }
        let inner = self.lines[self.at].indent;
        self.parse_block(inner)
    }

    fn parse_stmt(&mut self, indent: usize) -> Result<PyStmt, ScriptError> {
        let toks = self.lines[self.at].toks.clone();
        let head = toks.first().cloned();

        if let Some(Tok::Name(keyword)) = &head {
            match keyword.as_str() {
                "pass" => {
                    self.at += 1;
                    return Ok(PyStmt::Pass);
                }
                "for" => return self.parse_for(&toks, indent),
                "while" => {
                    let cond = parse_header_expr(&toks[1..])?;
                    self.at += 1;
                    let body = self.nested_block(indent)?;
                    return Ok(PyStmt::While { cond, body });
                }
                "if" => return self.parse_if(&toks, indent),
                "elif" | "else" => return err(format!("'{keyword}' without a matching 'if'")),
                "import" | "from" | "def" | "class" | "with" | "try" => {
                    return err(format!("'{keyword}' is not available in the @python sandbox"));
                }
                _ => {}
            }
        }

        // assignment / augmented assignment / bare expression
        if let Some(Tok::Name(target)) = &head {
            if toks.get(1) == Some(&Tok::Op("=")) {
                let value = parse_expr_toks(&toks[2..])?;
                self.at += 1;
                return Ok(PyStmt::Assign {
                    target: target.clone(),
                    value,
                });
            }
            if let Some(Tok::Op(op @ ("+=" | "-=" | "*=" | "/=" | "%="))) = toks.get(1) {
                let value = parse_expr_toks(&toks[2..])?;
                self.at += 1;
                return Ok(PyStmt::AugAssign {
                    target: target.clone(),
                    op: &op[..1],
                    value,
                });
            }
        }

        let expr = parse_expr_toks(&toks)?;
        self.at += 1;
        Ok(PyStmt::Expr(expr))
    }

    fn parse_for(&mut self, toks: &[Tok], indent: usize) -> Result<PyStmt, ScriptError> {
        let mut targets = Vec::new();
        let mut i = 1;
        loop {
            match toks.get(i) {
                Some(Tok::Name(name)) if name != "in" => {
                    targets.push(name.clone());
                    i += 1;
                }
                _ => return err("expected loop variable after 'for'"),
            }
            match toks.get(i) {
                Some(Tok::Comma) => i += 1,
                Some(Tok::Name(name)) if name == "in" => {
                    i += 1;
                    break;
                }
                _ => return err("expected 'in' in for statement"),
            }
        }
        let iter = parse_header_expr(&toks[i..])?;
        self.at += 1;
        let body = self.nested_block(indent)?;
        Ok(PyStmt::For { targets, iter, body })
    }

    fn parse_if(&mut self, toks: &[Tok], indent: usize) -> Result<PyStmt, ScriptError> {
        let cond = parse_header_expr(&toks[1..])?;
        self.at += 1;
        let body = self.nested_block(indent)?;
        let mut arms = vec![(cond, body)];
        let mut orelse = Vec::new();
        while self.at < self.lines.len() && self.lines[self.at].indent == indent {
            let next = self.lines[self.at].toks.clone();
            match next.first() {
                Some(Tok::Name(kw)) if kw == "elif" => {
                    let cond = parse_header_expr(&next[1..])?;
                    self.at += 1;
                    let body = self.nested_block(indent)?;
                    arms.push((cond, body));
                }
                Some(Tok::Name(kw)) if kw == "else" => {
                    self.at += 1;
                    orelse = self.nested_block(indent)?;
                    break;
                }
                _ => break,
            }
        }
        Ok(PyStmt::If { arms, orelse })
    }
}

/// Parses a compound-statement header expression, requiring and dropping
/// the trailing colon.
fn parse_header_expr(toks: &[Tok]) -> Result<PyExpr, ScriptError> {
    match toks.last() {
        Some(Tok::Colon) => parse_expr_toks(&toks[..toks.len() - 1]),
        _ => err("expected ':' at end of statement header"),
    }
}

// ---------------------------------------------------------------------
// expression parsing
// ---------------------------------------------------------------------

struct ExprParser<'t> {
    toks: &'t [Tok],
    at: usize,
}

fn parse_expr_toks(toks: &[Tok]) -> Result<PyExpr, ScriptError> {
    let mut parser = ExprParser { toks, at: 0 };
    let expr = parser.or_expr()?;
    if parser.at != toks.len() {
        return err("trailing tokens after expression in script");
    }
    Ok(expr)
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.at)
    }

    fn eat_name(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Name(n)) if n == word) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &'static str) -> bool {
        if self.peek() == Some(&Tok::Op(op)) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), ScriptError> {
        if self.peek() == Some(tok) {
            self.at += 1;
            Ok(())
        } else {
            err(format!("expected {what} in script expression"))
        }
    }

    fn or_expr(&mut self) -> Result<PyExpr, ScriptError> {
        let mut left = self.and_expr()?;
        while self.eat_name("or") {
            let right = self.and_expr()?;
            left = PyExpr::Binary {
                op: "or",
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<PyExpr, ScriptError> {
        let mut left = self.not_expr()?;
        while self.eat_name("and") {
            let right = self.not_expr()?;
            left = PyExpr::Binary {
                op: "and",
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<PyExpr, ScriptError> {
        if self.eat_name("not") {
            let operand = self.not_expr()?;
            return Ok(PyExpr::Unary {
                negate: false,
                not: true,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<PyExpr, ScriptError> {
        let mut left = self.arith()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) => *op,
                _ => return Ok(left),
            };
            self.at += 1;
            let right = self.arith()?;
            left = PyExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn arith(&mut self) -> Result<PyExpr, ScriptError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op @ ("+" | "-"))) => *op,
                _ => return Ok(left),
            };
            self.at += 1;
            let right = self.term()?;
            left = PyExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<PyExpr, ScriptError> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op @ ("*" | "/" | "//" | "%"))) => *op,
                _ => return Ok(left),
            };
            self.at += 1;
            let right = self.power()?;
            left = PyExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn power(&mut self) -> Result<PyExpr, ScriptError> {
        let base = self.unary()?;
        if self.eat_op("**") {
            let exponent = self.power()?;
            return Ok(PyExpr::Binary {
                op: "**",
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<PyExpr, ScriptError> {
        if self.eat_op("-") {
            let operand = self.unary()?;
            return Ok(PyExpr::Unary {
                negate: true,
                not: false,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<PyExpr, ScriptError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Some(Tok::LParen) => {
                    self.at += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        args.push(self.or_expr()?);
                        while self.peek() == Some(&Tok::Comma) {
                            self.at += 1;
                            args.push(self.or_expr()?);
                        }
                    }
                    self.expect(&Tok::RParen, "')'")?;
                    expr = PyExpr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                Some(Tok::Dot) => {
                    self.at += 1;
                    let Some(Tok::Name(name)) = self.peek().cloned() else {
                        return err("expected attribute name after '.'");
                    };
                    self.at += 1;
                    expr = PyExpr::Attr {
                        obj: Box::new(expr),
                        name,
                    };
                }
                Some(Tok::LBracket) => {
                    self.at += 1;
                    let index = self.or_expr()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = PyExpr::Index {
                        obj: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn atom(&mut self) -> Result<PyExpr, ScriptError> {
        let tok = self.peek().cloned();
        match tok {
            Some(Tok::Int(v)) => {
                self.at += 1;
                Ok(PyExpr::Int(v))
            }
            Some(Tok::Float(v)) => {
                self.at += 1;
                Ok(PyExpr::Float(v))
            }
            Some(Tok::Str(text)) => {
                self.at += 1;
                Ok(PyExpr::Str(text))
            }
            Some(Tok::FStr(text)) => {
                self.at += 1;
                parse_fstring(&text)
            }
            Some(Tok::Name(name)) => {
                self.at += 1;
                Ok(PyExpr::Name(name))
            }
            Some(Tok::LParen) => {
                self.at += 1;
                let expr = self.or_expr()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(expr)
            }
            Some(Tok::LBracket) => {
                self.at += 1;
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    items.push(self.or_expr()?);
                    while self.peek() == Some(&Tok::Comma) {
                        self.at += 1;
                        if self.peek() == Some(&Tok::RBracket) {
                            break;
                        }
                        items.push(self.or_expr()?);
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(PyExpr::List(items))
            }
            _ => err("expected an expression in script"),
        }
    }
}

/// Splits an f-string body into literal and `{expr}` parts. A `:` inside
/// braces starts a format spec, which is accepted and ignored. `{{`/`}}`
/// escape to literal braces.
fn parse_fstring(body: &str) -> Result<PyExpr, ScriptError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                lit.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                lit.push('}');
                i += 2;
            }
            '{' => {
                if !lit.is_empty() {
                    parts.push(FsPart::Lit(std::mem::take(&mut lit)));
                }
                let mut depth = 1;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && depth > 0 {
                    match chars[end] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        end += 1;
                    }
                }
                if depth != 0 {
                    return err("unbalanced '{' in f-string");
                }
                let inner: String = chars[start..end].iter().collect();
                let expr_text = inner.split(':').next().unwrap_or(&inner);
                let toks = tokenize(expr_text)?;
                parts.push(FsPart::Expr(Box::new(parse_expr_toks(&toks)?)));
                i = end + 1;
            }
            c => {
                lit.push(c);
                i += 1;
            }
        }
    }
    if !lit.is_empty() {
        parts.push(FsPart::Lit(lit));
    }
    Ok(PyExpr::FString(parts))
}

// ---------------------------------------------------------------------
// evaluation
// ---------------------------------------------------------------------

struct Interp {
    env: AHashMap<String, Value>,
    steps: usize,
}

impl Interp {
    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return err("script execution step limit exceeded");
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[PyStmt]) -> Result<(), ScriptError> {
        for stmt in stmts {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &PyStmt) -> Result<(), ScriptError> {
        self.tick()?;
        match stmt {
            PyStmt::Pass => Ok(()),
            PyStmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.env.insert(target.clone(), value);
                Ok(())
            }
            PyStmt::AugAssign { target, op, value } => {
                let current = self
                    .env
                    .get(target)
                    .cloned()
                    .ok_or_else(|| ScriptError(format!("name '{target}' is not defined")))?;
                let rhs = self.eval(value)?;
                let combined = binary(op, current, rhs)?;
                self.env.insert(target.clone(), combined);
                Ok(())
            }
            PyStmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            PyStmt::If { arms, orelse } => {
                for (cond, body) in arms {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            PyStmt::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    self.tick()?;
                    self.exec_block(body)?;
                }
                Ok(())
            }
            PyStmt::For { targets, iter, body } => {
                let iterable = self.eval(iter)?;
                let Value::List(items) = iterable else {
                    return err(format!("'{}' object is not iterable", iterable.type_name()));
                };
                for item in items {
                    self.tick()?;
                    self.bind_targets(targets, item)?;
                    self.exec_block(body)?;
                }
                Ok(())
            }
        }
    }

    fn bind_targets(&mut self, targets: &[String], item: Value) -> Result<(), ScriptError> {
        if targets.len() == 1 {
            self.env.insert(targets[0].clone(), item);
            return Ok(());
        }
        let Value::List(parts) = item else {
            return err("cannot unpack non-sequence in for loop");
        };
        if parts.len() != targets.len() {
            return err(format!(
                "cannot unpack {} values into {} names",
                parts.len(),
                targets.len()
            ));
        }
        for (target, part) in targets.iter().zip(parts) {
            self.env.insert(target.clone(), part);
        }
        Ok(())
    }

    fn eval(&mut self, expr: &PyExpr) -> Result<Value, ScriptError> {
        match expr {
            PyExpr::Int(v) => Ok(Value::Int(*v)),
            PyExpr::Float(v) => Ok(Value::Float(*v)),
            PyExpr::Str(s) => Ok(Value::Str(s.clone())),
            PyExpr::Name(name) => match name.as_str() {
                "True" => Ok(Value::Bool(true)),
                "False" => Ok(Value::Bool(false)),
                "None" => Ok(Value::None),
                _ => self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ScriptError(format!("name '{name}' is not defined"))),
            },
            PyExpr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            PyExpr::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FsPart::Lit(lit) => text.push_str(lit),
                        FsPart::Expr(expr) => {
                            let value = self.eval(expr)?;
                            text.push_str(&value.to_string());
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            PyExpr::Unary { negate, not, operand } => {
                let value = self.eval(operand)?;
                if *not {
                    return Ok(Value::Bool(!value.truthy()));
                }
                if *negate {
                    return match value {
                        Value::Int(v) => Ok(Value::Int(-v)),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        other => err(format!("bad operand type for unary -: '{}'", other.type_name())),
                    };
                }
                Ok(value)
            }
            PyExpr::Binary { op, left, right } => match *op {
                "and" => {
                    let l = self.eval(left)?;
                    if l.truthy() { self.eval(right) } else { Ok(l) }
                }
                "or" => {
                    let l = self.eval(left)?;
                    if l.truthy() { Ok(l) } else { self.eval(right) }
                }
                _ => {
                    let l = self.eval(left)?;
                    let r = self.eval(right)?;
                    binary(op, l, r)
                }
            },
            PyExpr::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let Value::Int(i) = index else {
                    return err("list indices must be integers");
                };
                match obj {
                    Value::List(items) => {
                        let len = items.len() as i64;
                        let at = if i < 0 { i + len } else { i };
                        if at < 0 || at >= len {
                            return err("list index out of range");
                        }
                        Ok(items[at as usize].clone())
                    }
                    Value::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let len = chars.len() as i64;
                        let at = if i < 0 { i + len } else { i };
                        if at < 0 || at >= len {
                            return err("string index out of range");
                        }
                        Ok(Value::Str(chars[at as usize].to_string()))
                    }
                    other => err(format!("'{}' object is not subscriptable", other.type_name())),
                }
            }
            PyExpr::Attr { obj, name } => {
                if let PyExpr::Name(module) = obj.as_ref() {
                    if module == "math" && !self.env.contains_key(module) {
                        return math_constant(name);
                    }
                }
                err(format!("attribute '{name}' is only meaningful when called"))
            }
            PyExpr::Call { func, args } => self.eval_call(func, args),
        }
    }

    fn eval_call(&mut self, func: &PyExpr, args: &[PyExpr]) -> Result<Value, ScriptError> {
        match func {
            PyExpr::Name(name) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                builtin_call(name, values)
            }
            PyExpr::Attr { obj, name } => {
                // list mutation goes through the environment so `xs.append(v)`
                // updates the stored list, not a copy
                if name == "append" {
                    if let PyExpr::Name(var) = obj.as_ref() {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.eval(arg)?);
                        }
                        let Some(Value::List(items)) = self.env.get_mut(var) else {
                            return err(format!("'{var}' is not a list"));
                        };
                        if values.len() != 1 {
                            return err("append() takes exactly one argument");
                        }
                        items.push(values.remove(0));
                        return Ok(Value::None);
                    }
                    return err("append() is only supported on named lists");
                }
                if let PyExpr::Name(module) = obj.as_ref() {
                    if module == "math" && !self.env.contains_key(module) {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.eval(arg)?);
                        }
                        return math_call(name, &values);
                    }
                }
                let receiver = self.eval(obj)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                method_call(&receiver, name, &values)
            }
            _ => err("only simple calls are supported in the sandbox"),
        }
    }
}

fn binary(op: &str, l: Value, r: Value) -> Result<Value, ScriptError> {
    // string and list forms first
    match (op, &l, &r) {
        ("+", Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        ("+", Value::List(a), Value::List(b)) => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            return Ok(Value::List(joined));
        }
        ("*", Value::Str(a), Value::Int(n)) => {
            return Ok(Value::Str(a.repeat((*n).max(0) as usize)));
        }
        ("==", _, _) => return Ok(Value::Bool(l == r)),
        ("!=", _, _) => return Ok(Value::Bool(l != r)),
        ("<" | "<=" | ">" | ">=", Value::Str(a), Value::Str(b)) => {
            let ordering = a.cmp(b);
            return Ok(Value::Bool(compare_matches(op, ordering)));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
        return err(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        ));
    };
    let both_int = matches!(l, Value::Int(_) | Value::Bool(_)) && matches!(r, Value::Int(_) | Value::Bool(_));

    match op {
        "<" | "<=" | ">" | ">=" => {
            let ordering = a.partial_cmp(&b).ok_or_else(|| ScriptError("unordered comparison".into()))?;
            Ok(Value::Bool(compare_matches(op, ordering)))
        }
        "/" => {
            if b == 0.0 {
                return err("division by zero");
            }
            Ok(Value::Float(a / b))
        }
        "//" => {
            if b == 0.0 {
                return err("division by zero");
            }
            let quotient = (a / b).floor();
            if both_int {
                Ok(Value::Int(quotient as i64))
            } else {
                Ok(Value::Float(quotient))
            }
        }
        "%" => {
            if b == 0.0 {
                return err("modulo by zero");
            }
            let remainder = a - b * (a / b).floor();
            if both_int {
                Ok(Value::Int(remainder as i64))
            } else {
                Ok(Value::Float(remainder))
            }
        }
        "**" => {
            let result = a.powf(b);
            if both_int && b >= 0.0 && result.abs() < 9.0e15 {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        "+" | "-" | "*" => {
            let result = match op {
                "+" => a + b,
                "-" => a - b,
                _ => a * b,
            };
            if both_int {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        other => err(format!("unsupported operator '{other}'")),
    }
}

fn compare_matches(op: &str, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        "<" => ordering == Less,
        "<=" => ordering != Greater,
        ">" => ordering == Greater,
        _ => ordering != Less,
    }
}

fn builtin_call(name: &str, mut args: Vec<Value>) -> Result<Value, ScriptError> {
    match name {
        "range" => {
            let nums: Vec<i64> = args
                .iter()
                .map(|v| match v {
                    Value::Int(n) => Ok(*n),
                    _ => err("range() arguments must be integers"),
                })
                .collect::<Result<_, _>>()?;
            let (start, stop, step) = match nums.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return err("range() takes 1 to 3 arguments"),
            };
            if step == 0 {
                return err("range() step must not be zero");
            }
            let mut items = Vec::new();
            let mut at = start;
            while (step > 0 && at < stop) || (step < 0 && at > stop) {
                items.push(Value::Int(at));
                at += step;
                if items.len() > STEP_LIMIT {
                    return err("range() result too large");
                }
            }
            Ok(Value::List(items))
        }
        "len" => match args.as_slice() {
            [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
            [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
            _ => err("len() needs a list or string"),
        },
        "str" => match args.len() {
            1 => Ok(Value::Str(args[0].to_string())),
            _ => err("str() takes one argument"),
        },
        "int" => match args.as_slice() {
            [Value::Int(v)] => Ok(Value::Int(*v)),
            [Value::Float(v)] => Ok(Value::Int(v.trunc() as i64)),
            [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
            [Value::Str(s)] => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ScriptError(format!("invalid literal for int(): '{s}'"))),
            _ => err("int() needs a number or string"),
        },
        "float" => match args.as_slice() {
            [value] => value
                .as_number()
                .map(Value::Float)
                .ok_or_else(|| ScriptError("float() needs a number".into())),
            _ => err("float() takes one argument"),
        },
        "abs" => match args.as_slice() {
            [Value::Int(v)] => Ok(Value::Int(v.abs())),
            [Value::Float(v)] => Ok(Value::Float(v.abs())),
            _ => err("abs() needs a number"),
        },
        "min" | "max" => {
            let pool = match args.len() {
                0 => return err(format!("{name}() needs arguments")),
                1 => match args.remove(0) {
                    Value::List(items) if !items.is_empty() => items,
                    Value::List(_) => return err(format!("{name}() arg is an empty sequence")),
                    other => vec![other],
                },
                _ => args,
            };
            let mut best = pool[0].clone();
            for candidate in &pool[1..] {
                let (Some(a), Some(b)) = (candidate.as_number(), best.as_number()) else {
                    return err(format!("{name}() needs numbers"));
                };
                let better = if name == "min" { a < b } else { a > b };
                if better {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        "sum" => match args.as_slice() {
            [Value::List(items)] => {
                let mut total = 0.0;
                let mut all_int = true;
                for item in items {
                    let Some(v) = item.as_number() else {
                        return err("sum() needs numbers");
                    };
                    all_int &= matches!(item, Value::Int(_) | Value::Bool(_));
                    total += v;
                }
                if all_int {
                    Ok(Value::Int(total as i64))
                } else {
                    Ok(Value::Float(total))
                }
            }
            _ => err("sum() needs a list"),
        },
        "round" => match args.as_slice() {
            [value] => {
                let v = value.as_number().ok_or_else(|| ScriptError("round() needs a number".into()))?;
                Ok(Value::Int(v.round() as i64))
            }
            [value, Value::Int(digits)] => {
                let v = value.as_number().ok_or_else(|| ScriptError("round() needs a number".into()))?;
                let scale = 10f64.powi(*digits as i32);
                Ok(Value::Float((v * scale).round() / scale))
            }
            _ => err("round() takes one or two arguments"),
        },
        "pow" => match args.as_slice() {
            [a, b] => binary("**", a.clone(), b.clone()),
            _ => err("pow() takes two arguments"),
        },
        "enumerate" => match args.as_slice() {
            [Value::List(items)] => Ok(Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Value::List(vec![Value::Int(i as i64), v.clone()]))
                    .collect(),
            )),
            _ => err("enumerate() needs a list"),
        },
        "list" => match args.len() {
            0 => Ok(Value::List(Vec::new())),
            1 => match args.remove(0) {
                Value::List(items) => Ok(Value::List(items)),
                other => err(format!("'{}' object is not iterable", other.type_name())),
            },
            _ => err("list() takes at most one argument"),
        },
        other => err(format!("name '{other}' is not defined in the sandbox")),
    }
}

fn method_call(receiver: &Value, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match (receiver, name) {
        (Value::Str(sep), "join") => match args {
            [Value::List(items)] => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                Ok(Value::Str(parts.join(sep)))
            }
            _ => err("join() needs a list"),
        },
        (Value::Str(s), "upper") => Ok(Value::Str(s.to_uppercase())),
        (Value::Str(s), "lower") => Ok(Value::Str(s.to_lowercase())),
        (Value::Str(s), "strip") => Ok(Value::Str(s.trim().to_owned())),
        _ => err(format!("'{}' object has no method '{name}'", receiver.type_name())),
    }
}

fn math_constant(name: &str) -> Result<Value, ScriptError> {
    match name {
        "pi" => Ok(Value::Float(std::f64::consts::PI)),
        "e" => Ok(Value::Float(std::f64::consts::E)),
        "tau" => Ok(Value::Float(std::f64::consts::TAU)),
        other => err(format!("module 'math' has no attribute '{other}'")),
    }
}

fn math_call(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let one = || -> Result<f64, ScriptError> {
        match args {
            [value] => value
                .as_number()
                .ok_or_else(|| ScriptError(format!("math.{name}() needs a number"))),
            _ => err(format!("math.{name}() takes one argument")),
        }
    };
    match name {
        "sin" => Ok(Value::Float(one()?.sin())),
        "cos" => Ok(Value::Float(one()?.cos())),
        "tan" => Ok(Value::Float(one()?.tan())),
        "sqrt" => Ok(Value::Float(one()?.sqrt())),
        "floor" => Ok(Value::Int(one()?.floor() as i64)),
        "ceil" => Ok(Value::Int(one()?.ceil() as i64)),
        "radians" => Ok(Value::Float(one()?.to_radians())),
        "degrees" => Ok(Value::Float(one()?.to_degrees())),
        "fabs" => Ok(Value::Float(one()?.abs())),
        "atan2" => match args {
            [y, x] => {
                let (Some(y), Some(x)) = (y.as_number(), x.as_number()) else {
                    return err("math.atan2() needs numbers");
                };
                Ok(Value::Float(y.atan2(x)))
            }
            _ => err("math.atan2() takes two arguments"),
        },
        "pow" => match args {
            [a, b] => {
                let (Some(a), Some(b)) = (a.as_number(), b.as_number()) else {
                    return err("math.pow() needs numbers");
                };
                Ok(Value::Float(a.powf(b)))
            }
            _ => err("math.pow() takes two arguments"),
        },
        other => err(format!("module 'math' has no attribute '{other}'")),
    }
}

// ---------------------------------------------------------------------
// entry point
// ---------------------------------------------------------------------

/// Runs a `@python` block and returns the `generated_code` lines, if the
/// script set any.
pub fn run(code: &str) -> Result<Option<Vec<String>>, ScriptError> {
    let lines = split_lines(code)?;
    let base_indent = lines.first().map_or(0, |l| l.indent);
    let mut parser = BlockParser { lines, at: 0 };
    let program = parser.parse_block(base_indent)?;
    if parser.at != parser.lines.len() {
        return err("inconsistent indentation in script");
    }

    let mut interp = Interp {
        env: AHashMap::new(),
        steps: 0,
    };
    interp.exec_block(&program)?;

    match interp.env.get("generated_code") {
        None => Ok(None),
        Some(Value::Str(text)) => Ok(Some(vec![text.clone()])),
        Some(Value::List(items)) => Ok(Some(items.iter().map(ToString::to_string).collect())),
        Some(other) => err(format!("generated_code must be a string or list, not {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn simple_assignment_produces_generated_code() {
        let out = run("generated_code = \"x = 1;\"").expect("run");
        assert_eq!(out, Some(vec!["x = 1;".to_owned()]));
    }

    #[test]
    fn scripts_without_generated_code_yield_nothing() {
        assert_eq!(run("x = 40 + 2").expect("run"), None);
    }

    #[test]
    fn for_loop_with_fstrings_builds_statement_list() {
        let code = "\
lines = []
for i in range(3):
    lines.append(f\"x = x + {i};\")
generated_code = lines
";
        let out = run(code).expect("run").expect("generated");
        assert_eq!(
            out,
            vec!["x = x + 0;".to_owned(), "x = x + 1;".to_owned(), "x = x + 2;".to_owned()]
        );
    }

    #[test]
    fn math_module_is_available() {
        let code = "generated_code = f\"v = {int(math.floor(math.sqrt(16)))};\"";
        let out = run(code).expect("run").expect("generated");
        assert_eq!(out, vec!["v = 4;".to_owned()]);
    }

    #[test]
    fn sine_table_style_generation_works() {
        let code = "\
values = []
for i in range(4):
    angle = (i / 4) * math.pi * 2
    values.append(str(int(127 * math.sin(angle)) + 128))
generated_code = f\"row = {', '.join(values)};\"
";
        let out = run(code).expect("run").expect("generated");
        assert_eq!(out, vec!["row = 128, 255, 128, 1;".to_owned()]);
    }

    #[test]
    fn conditionals_and_aug_assign_work() {
        let code = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        total += i
generated_code = f\"sum = {total};\"
";
        let out = run(code).expect("run").expect("generated");
        assert_eq!(out, vec!["sum = 20;".to_owned()]);
    }

    #[test]
    fn imports_are_rejected() {
        let error = run("import os").expect_err("sandbox must refuse imports");
        assert!(error.to_string().contains("not available in the @python sandbox"));
    }

    #[test]
    fn undefined_names_error_out() {
        let error = run("generated_code = nonsense").expect_err("undefined name");
        assert!(error.to_string().contains("'nonsense' is not defined"));
    }

    #[test]
    fn runaway_loops_hit_the_step_limit() {
        let error = run("x = 0\nwhile x < 1:\n    pass").expect_err("infinite loop must be stopped");
        assert!(error.to_string().contains("step limit"));
    }

    #[test]
    fn enumerate_unpacks_into_two_targets() {
        let code = "\
parts = []
for i, name in enumerate([\"a\", \"b\"]):
    parts.append(f\"{name}{i}\")
generated_code = \"; \".join(parts)
";
        let out = run(code).expect("run").expect("generated");
        assert_eq!(out, vec!["a0; b1".to_owned()]);
    }

    #[test]
    fn integer_division_and_power_stay_integers() {
        let out = run("generated_code = f\"v = {7 // 2 + 2 ** 3};\"").expect("run").expect("generated");
        assert_eq!(out, vec!["v = 11;".to_owned()]);
    }
}
