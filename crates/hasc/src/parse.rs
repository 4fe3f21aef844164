//! Recursive-descent parser producing the HAS AST.
//!
//! The grammar layers are: module items, section bodies, statements, then a
//! precedence-climbing expression ladder (`||` lowest, unary/postfix
//! highest). Statement starts that are ambiguous between an lvalue and an
//! expression (`x = ...;` vs `x++;`) are resolved by parsing the lvalue
//! shape speculatively and rewinding when no assignment operator follows.
//!
//! Placeholders left by the pre-processor (`asm {BLOCK_n}`,
//! `@python "PYTHON_n"`, `@template "f" "TEMPLATE_n"`) are resolved back to
//! their extracted bodies here, so downstream passes only ever see real
//! content.

use std::path::Path;

use smallvec::SmallVec;

use crate::{
    ast::{
        AssignTarget, BinOp, BssSection, CodeItem, CodeSection, ConstDecl, DataItem, DataSection, DataValue, Dim,
        Expr, ExternDecl, FuncDecl, GlobalVar, Item, MacroDef, Module, Param, Proc, PublicDecl, Pragma, Stmt,
        StructField, StructVar, Suffix, UnaryOp,
    },
    error::{CompileError, SyntaxError},
    lexer::{Spanned, Token, lex, line_col},
    preprocess::{SideTables, preprocess},
};

/// Parses a HAS source text into a [`Module`].
///
/// `base_dir` anchors relative `#include` paths; pass `None` when the source
/// did not come from a file (generated input).
pub fn parse(source: &str, base_dir: Option<&Path>) -> Result<Module, CompileError> {
    let pre = preprocess(source, base_dir)?;
    let tokens = lex(&pre.source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source: &pre.source,
        tables: pre.tables,
    };
    let module = parser.module()?;
    Ok(module)
}

struct Parser<'s> {
    tokens: Vec<Spanned>,
    pos: usize,
    source: &'s str,
    tables: SideTables,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let offset = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(self.source.len(), |(_, span)| span.start);
        let (line, column) = line_col(self.source, offset);
        SyntaxError::new(line, column, message)
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), SyntaxError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Str(text)) => {
                let text = text.clone();
                self.pos += 1;
                Ok(text)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_number(&mut self, what: &str) -> Result<i64, SyntaxError> {
        match self.peek() {
            Some(Token::Number(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    // ------------------------------------------------------------------
    // module items
    // ------------------------------------------------------------------

    fn module(&mut self) -> Result<Module, CompileError> {
        let mut items = Vec::new();
        while let Some(token) = self.peek() {
            let item = match token {
                Token::Data => self.section_data(false)?,
                Token::DataChip => self.section_data(true)?,
                Token::Bss => self.section_bss(false)?,
                Token::BssChip => self.section_bss(true)?,
                Token::Code => self.section_code(false)?,
                Token::CodeChip => self.section_code(true)?,
                Token::Const => Item::Const(self.const_decl(true)?),
                Token::Macro => Item::Macro(self.macro_def()?),
                Token::Extern => Item::Extern(self.extern_decl()?),
                Token::Public => Item::Public(self.public_decl()?),
                Token::HashWarning => {
                    self.pos += 1;
                    let message = self.expect_string("warning message string")?;
                    self.expect(&Token::Semi, "';' after #warning")?;
                    Item::Warning(message)
                }
                Token::HashError => {
                    self.pos += 1;
                    let message = self.expect_string("error message string")?;
                    self.expect(&Token::Semi, "';' after #error")?;
                    Item::Error(message)
                }
                Token::HashPragma => Item::Pragma(self.pragma()?),
                Token::Var => return Err(self.var_outside_proc_error().into()),
                _ => return Err(self.error("expected a section, declaration or directive").into()),
            };
            items.push(item);
        }
        Ok(Module { items })
    }

    fn var_outside_proc_error(&self) -> SyntaxError {
        self.error(
            "cannot declare variables here: variables must be declared in 'data' or 'bss' sections, \
             or as local variables inside procedures",
        )
    }

    fn pragma(&mut self) -> Result<Pragma, SyntaxError> {
        self.pos += 1; // #pragma
        let name = self.expect_ident("pragma name")?;
        self.expect(&Token::LParen, "'(' after pragma name")?;
        let mut args = vec![self.expect_ident("pragma argument")?];
        while self.eat(&Token::Comma) {
            args.push(self.expect_ident("pragma argument")?);
        }
        self.expect(&Token::RParen, "')' closing pragma arguments")?;
        self.expect(&Token::Semi, "';' after pragma")?;
        Ok(Pragma { name, args })
    }

    /// `const NAME = NUMBER` with a mandatory or optional trailing `;`.
    ///
    /// Top-level constants require the semicolon; section-body constants
    /// historically omit it, so there it is accepted but not required.
    fn const_decl(&mut self, semi_required: bool) -> Result<ConstDecl, SyntaxError> {
        self.pos += 1; // const
        let name = self.expect_ident("constant name")?;
        self.expect(&Token::Assign, "'=' in constant declaration")?;
        let negative = self.eat(&Token::Minus);
        let mut value = self.expect_number("constant value")?;
        if negative {
            value = -value;
        }
        if semi_required {
            self.expect(&Token::Semi, "';' after constant declaration")?;
        } else {
            self.eat(&Token::Semi);
        }
        Ok(ConstDecl { name, value })
    }

    fn public_decl(&mut self) -> Result<PublicDecl, SyntaxError> {
        self.pos += 1; // public
        let name = self.expect_ident("public symbol name")?;
        self.expect(&Token::Semi, "';' after public declaration")?;
        Ok(PublicDecl { name })
    }

    fn extern_decl(&mut self) -> Result<ExternDecl, SyntaxError> {
        self.pos += 1; // extern
        match self.peek() {
            Some(Token::Func) => {
                self.pos += 1;
                let name = self.expect_ident("function name")?;
                self.expect(&Token::LParen, "'(' in extern function declaration")?;
                let params = self.params()?;
                self.expect(&Token::RParen, "')' closing parameter list")?;
                self.expect(&Token::Arrow, "'->' before return type")?;
                let rettype = self.type_name()?;
                self.expect(&Token::Semi, "';' after extern function declaration")?;
                Ok(ExternDecl::Func { name, params, rettype })
            }
            Some(Token::Var) => {
                self.pos += 1;
                let name = self.expect_ident("variable name")?;
                self.expect(&Token::Colon, "':' before type")?;
                let vtype = self.type_name()?;
                self.expect(&Token::Semi, "';' after extern variable declaration")?;
                Ok(ExternDecl::Var { name, vtype })
            }
            _ => Err(self.error("expected 'func' or 'var' after 'extern'")),
        }
    }

    fn macro_def(&mut self) -> Result<MacroDef, SyntaxError> {
        self.pos += 1; // macro
        let name = self.expect_ident("macro name")?;
        self.expect(&Token::LParen, "'(' after macro name")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            params.push(self.expect_ident("macro parameter")?);
            while self.eat(&Token::Comma) {
                params.push(self.expect_ident("macro parameter")?);
            }
            self.expect(&Token::RParen, "')' closing macro parameters")?;
        }
        self.expect(&Token::LBrace, "'{' opening macro body")?;
        let mut body = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("unterminated macro body"));
            }
            body.push(self.stmt()?);
        }
        Ok(MacroDef { name, params, body })
    }

    fn type_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_ident("type name")?;
        if self.eat(&Token::Star) {
            name.push('*');
        }
        Ok(name)
    }

    fn params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        let mut params = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.param()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn param(&mut self) -> Result<Param, SyntaxError> {
        let register = if self.eat(&Token::RegMarker) {
            self.expect(&Token::LParen, "'(' after __reg")?;
            let reg = self.expect_ident("register name")?;
            if !is_register_name(&reg) {
                return Err(self.error(format!("invalid register '{reg}' in __reg, expected d0-d7 or a0-a7")));
            }
            self.expect(&Token::RParen, "')' after register name")?;
            Some(reg)
        } else {
            None
        };
        let name = self.expect_ident("parameter name")?;
        self.expect(&Token::Colon, "':' before parameter type")?;
        let ptype = self.type_name()?;
        Ok(Param { name, ptype, register })
    }

    // ------------------------------------------------------------------
    // data and bss sections
    // ------------------------------------------------------------------

    fn section_data(&mut self, chip: bool) -> Result<Item, SyntaxError> {
        self.pos += 1;
        let name = self.expect_ident("section name")?;
        self.expect(&Token::Colon, "':' after section name")?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Const) => items.push(DataItem::Const(self.const_decl(false)?)),
                Some(Token::Struct) => items.push(DataItem::Struct(self.struct_var(false)?)),
                Some(Token::Ident(_)) => items.push(DataItem::Var(self.data_var()?)),
                _ => break,
            }
        }
        Ok(Item::Data(DataSection { name, chip, items }))
    }

    fn section_bss(&mut self, chip: bool) -> Result<Item, SyntaxError> {
        self.pos += 1;
        let name = self.expect_ident("section name")?;
        self.expect(&Token::Colon, "':' after section name")?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Const) => items.push(DataItem::Const(self.const_decl(false)?)),
                Some(Token::Struct) => items.push(DataItem::Struct(self.struct_var(true)?)),
                Some(Token::Ident(_)) => items.push(DataItem::Var(self.bss_var()?)),
                _ => break,
            }
        }
        Ok(Item::Bss(BssSection { name, chip, items }))
    }

    /// Optional `.b`/`.w`/`.l` after a declared name.
    fn size_suffix(&mut self) -> Option<Suffix> {
        if self.peek() == Some(&Token::Dot) {
            if let Some(Token::Ident(letter)) = self.peek_at(1) {
                if let Some(suffix) = Suffix::from_letter(letter) {
                    self.pos += 2;
                    return Some(suffix);
                }
            }
        }
        None
    }

    fn array_dims(&mut self) -> Result<Option<SmallVec<[Dim; 2]>>, SyntaxError> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(None);
        }
        let mut dims = SmallVec::new();
        while self.eat(&Token::LBracket) {
            let dim = match self.advance() {
                Some(Token::Number(n)) => Dim::Lit(n),
                Some(Token::Ident(name)) => Dim::Name(name),
                _ => return Err(self.error("expected array dimension (number or constant name)")),
            };
            self.expect(&Token::RBracket, "']' closing array dimension")?;
            dims.push(dim);
        }
        Ok(Some(dims))
    }

    fn data_var(&mut self) -> Result<GlobalVar, SyntaxError> {
        let name = self.expect_ident("variable name")?;
        let suffix = self.size_suffix();
        let dims = self.array_dims()?;
        let mut values = Vec::new();
        if self.eat(&Token::Assign) {
            loop {
                match self.peek() {
                    Some(Token::Number(n)) => {
                        values.push(DataValue::Num(*n));
                        self.pos += 1;
                    }
                    Some(Token::Str(text)) => {
                        values.push(DataValue::Str(text.clone()));
                        self.pos += 1;
                    }
                    Some(Token::LBrace) => {
                        self.pos += 1;
                        values.push(DataValue::Num(self.expect_number("initializer value")?));
                        while self.eat(&Token::Comma) {
                            values.push(DataValue::Num(self.expect_number("initializer value")?));
                        }
                        self.expect(&Token::RBrace, "'}' closing initializer list")?;
                    }
                    _ => return Err(self.error("expected initializer value")),
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        } else if dims.is_none() {
            // uninitialized scalar data defaults to zero
            values.push(DataValue::Num(0));
        }
        Ok(GlobalVar {
            name,
            suffix,
            dims,
            values,
            bss_count: None,
        })
    }

    fn bss_var(&mut self) -> Result<GlobalVar, SyntaxError> {
        let name = self.expect_ident("variable name")?;
        let suffix = self.size_suffix();
        if let Some(dims) = self.array_dims()? {
            return Ok(GlobalVar {
                name,
                suffix,
                dims: Some(dims),
                values: Vec::new(),
                bss_count: None,
            });
        }
        self.expect(&Token::Colon, "':' or '[dims]' in bss declaration")?;
        let count = match self.advance() {
            Some(Token::Number(n)) => Dim::Lit(n),
            Some(Token::Ident(constant)) => Dim::Name(constant),
            _ => return Err(self.error("expected bss size (number or constant name)")),
        };
        Ok(GlobalVar {
            name,
            suffix,
            dims: None,
            values: Vec::new(),
            bss_count: Some(count),
        })
    }

    fn struct_var(&mut self, in_bss: bool) -> Result<StructVar, SyntaxError> {
        self.pos += 1; // struct
        let name = self.expect_ident("struct name")?;
        let dims = self.array_dims()?;
        self.expect(&Token::LBrace, "'{' opening struct fields")?;
        let mut fields = Vec::new();
        loop {
            let field_name = self.expect_ident("struct field name")?;
            self.expect(&Token::Dot, "'.' before field size suffix")?;
            let letter = self.expect_ident("field size suffix (b, w or l)")?;
            let Some(suffix) = Suffix::from_letter(&letter) else {
                return Err(self.error(format!("invalid field size suffix '.{letter}'")));
            };
            fields.push(StructField {
                name: field_name,
                suffix,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
            // tolerate a trailing comma before the closing brace
            if self.peek() == Some(&Token::RBrace) {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}' closing struct fields")?;
        let mut init_values = Vec::new();
        if !in_bss && self.eat(&Token::Assign) {
            self.expect(&Token::LBrace, "'{' opening struct initializer")?;
            init_values.push(self.expect_number("struct initializer value")?);
            while self.eat(&Token::Comma) {
                init_values.push(self.expect_number("struct initializer value")?);
            }
            self.expect(&Token::RBrace, "'}' closing struct initializer")?;
        }
        Ok(StructVar {
            name,
            fields,
            dims,
            init_values,
            in_bss,
        })
    }

    // ------------------------------------------------------------------
    // code sections and procedures
    // ------------------------------------------------------------------

    fn section_code(&mut self, chip: bool) -> Result<Item, SyntaxError> {
        self.pos += 1;
        let name = self.expect_ident("section name")?;
        self.expect(&Token::Colon, "':' after section name")?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Proc) => items.push(CodeItem::Proc(self.proc_decl()?)),
                Some(Token::Func) => items.push(CodeItem::Func(self.func_decl()?)),
                Some(Token::Asm) => {
                    let content = self.asm_content()?;
                    items.push(CodeItem::Asm(content));
                }
                Some(Token::Extern) => items.push(CodeItem::Extern(self.extern_decl()?)),
                Some(Token::Public) => items.push(CodeItem::Public(self.public_decl()?)),
                Some(Token::Var) => return Err(self.var_outside_proc_error()),
                _ => break,
            }
        }
        Ok(Item::Code(CodeSection { name, chip, items }))
    }

    fn proc_decl(&mut self) -> Result<Proc, SyntaxError> {
        self.pos += 1; // proc
        let name = self.expect_ident("procedure name")?;
        self.expect(&Token::LParen, "'(' after procedure name")?;
        let params = self.params()?;
        self.expect(&Token::RParen, "')' closing parameter list")?;
        self.expect(&Token::Arrow, "'->' before return type")?;
        let rettype = self.type_name()?;
        self.expect(&Token::LBrace, "'{' opening procedure body")?;
        let mut body = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("unterminated procedure body"));
            }
            body.push(self.stmt()?);
        }
        Ok(Proc {
            name,
            params,
            rettype,
            body,
        })
    }

    fn func_decl(&mut self) -> Result<FuncDecl, SyntaxError> {
        self.pos += 1; // func
        let name = self.expect_ident("function name")?;
        self.expect(&Token::LParen, "'(' after function name")?;
        let params = self.params()?;
        self.expect(&Token::RParen, "')' closing parameter list")?;
        self.expect(&Token::Arrow, "'->' before return type")?;
        let rettype = self.type_name()?;
        self.expect(&Token::Semi, "';' after function declaration")?;
        Ok(FuncDecl { name, params, rettype })
    }

    /// `asm "text"` or `asm {BLOCK_n}` with the body pulled from the side
    /// table.
    fn asm_content(&mut self) -> Result<String, SyntaxError> {
        self.pos += 1; // asm
        let content = match self.advance() {
            Some(Token::Str(text)) => text,
            Some(Token::LBrace) => {
                let marker = self.expect_ident("assembly block marker")?;
                self.expect(&Token::RBrace, "'}' closing assembly block")?;
                self.lookup_block(&marker)?
            }
            _ => return Err(self.error("expected assembly block or string after 'asm'")),
        };
        self.eat(&Token::Semi);
        Ok(content)
    }

    fn lookup_block(&self, marker: &str) -> Result<String, SyntaxError> {
        let index = marker
            .strip_prefix("BLOCK_")
            .and_then(|digits| digits.parse::<usize>().ok());
        match index.and_then(|i| self.tables.asm_blocks.get(i)) {
            Some(body) => Ok(body.clone()),
            None => Err(self.error(format!("unknown assembly block '{marker}'"))),
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek() {
            Some(Token::Var) => self.var_decl(),
            Some(Token::Push) => self.push_stmt(),
            Some(Token::Pop) => self.pop_stmt(),
            Some(Token::Return) => {
                self.pos += 1;
                let expr = if self.peek() == Some(&Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::Semi, "';' after return")?;
                Ok(Stmt::Return(expr))
            }
            Some(Token::Break) => {
                self.pos += 1;
                self.expect(&Token::Semi, "';' after break")?;
                Ok(Stmt::Break)
            }
            Some(Token::Continue) => {
                self.pos += 1;
                self.expect(&Token::Semi, "';' after continue")?;
                Ok(Stmt::Continue)
            }
            Some(Token::If) => self.if_stmt(),
            Some(Token::While) => self.while_stmt(),
            Some(Token::Do) => self.do_while_stmt(),
            Some(Token::For) => self.for_stmt(),
            Some(Token::Repeat) => self.repeat_stmt(),
            Some(Token::Call) => self.call_stmt(),
            Some(Token::Asm) => Ok(Stmt::Asm(self.asm_content()?)),
            Some(Token::AtTemplate) => self.template_stmt(),
            Some(Token::AtPython) => self.python_stmt(),
            Some(Token::Star) => self.deref_assign(),
            Some(Token::Ident(_)) => self.ident_stmt(),
            Some(
                Token::SetReg | Token::GetReg | Token::PlusPlus | Token::MinusMinus | Token::Minus | Token::Bang
                | Token::Tilde | Token::Amp | Token::Number(_) | Token::LParen,
            ) => {
                let expr = self.expr()?;
                self.expect(&Token::Semi, "';' after expression")?;
                Ok(Stmt::Expr(expr))
            }
            _ => Err(self.error("expected a statement")),
        }
    }

    fn var_decl(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // var
        let name = self.expect_ident("variable name")?;
        self.expect(&Token::Colon, "':' before variable type")?;
        let vtype = self.type_name()?;
        let init = if self.eat(&Token::Assign) { Some(self.expr()?) } else { None };
        self.expect(&Token::Semi, "';' after variable declaration")?;
        Ok(Stmt::VarDecl { name, vtype, init })
    }

    fn push_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // PUSH
        self.expect(&Token::LParen, "'(' after PUSH")?;
        let mut regs = SmallVec::new();
        let first = self.expect_ident("register name")?;
        if !is_register_name(&first) {
            return Err(self.error(format!("invalid register '{first}' in PUSH")));
        }
        regs.push(first);
        while self.eat(&Token::Comma) {
            let reg = self.expect_ident("register name")?;
            if !is_register_name(&reg) {
                return Err(self.error(format!("invalid register '{reg}' in PUSH")));
            }
            regs.push(reg);
        }
        self.expect(&Token::RParen, "')' closing PUSH register list")?;
        self.expect(&Token::Semi, "';' after PUSH")?;
        Ok(Stmt::Push(regs))
    }

    fn pop_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // POP
        self.expect(&Token::LParen, "'(' after POP")?;
        self.expect(&Token::RParen, "')' after POP(")?;
        self.expect(&Token::Semi, "';' after POP()")?;
        Ok(Stmt::Pop)
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // if
        self.expect(&Token::LParen, "'(' after if")?;
        let cond = self.expr()?;
        self.expect(&Token::RParen, "')' closing if condition")?;
        let then_body = self.block_or_stmt()?;
        let else_body = if self.eat(&Token::Else) {
            Some(self.block_or_stmt()?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // while
        self.expect(&Token::LParen, "'(' after while")?;
        let cond = self.expr()?;
        self.expect(&Token::RParen, "')' closing while condition")?;
        let body = self.block_or_stmt()?;
        Ok(Stmt::While { cond, body })
    }

    fn do_while_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // do
        let body = self.block_or_stmt()?;
        self.expect(&Token::While, "'while' after do body")?;
        self.expect(&Token::LParen, "'(' after while")?;
        let cond = self.expr()?;
        self.expect(&Token::RParen, "')' closing do-while condition")?;
        self.expect(&Token::Semi, "';' after do-while")?;
        Ok(Stmt::DoWhile { body, cond })
    }

    fn for_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // for
        let var = self.expect_ident("loop variable")?;
        self.expect(&Token::Assign, "'=' after loop variable")?;
        let start = self.expr()?;
        self.expect(&Token::To, "'to' in for loop")?;
        let end = self.expr()?;
        let step = if self.eat(&Token::By) { self.expr()? } else { Expr::Number(1) };
        let body = self.block_or_stmt()?;
        Ok(Stmt::For {
            var,
            start,
            end,
            step,
            body,
        })
    }

    fn repeat_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // repeat
        let count = self.expr()?;
        let body = self.block_or_stmt()?;
        Ok(Stmt::Repeat { count, body })
    }

    fn call_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // call
        let name = self.expect_ident("function name")?;
        let args = self.arg_list()?;
        self.expect(&Token::Semi, "';' after call")?;
        Ok(Stmt::Call { name, args })
    }

    fn template_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // @template
        let file = self.expect_string("template file name")?;
        let marker = self.expect_string("template context")?;
        self.eat(&Token::Semi);
        let context = marker
            .strip_prefix("TEMPLATE_")
            .and_then(|digits| digits.parse::<usize>().ok())
            .and_then(|i| self.tables.template_blocks.get(i))
            .map_or(marker.clone(), |(_, raw)| raw.clone());
        Ok(Stmt::Template { file, context })
    }

    fn python_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // @python
        let marker = self.expect_string("python code")?;
        self.eat(&Token::Semi);
        let code = marker
            .strip_prefix("PYTHON_")
            .and_then(|digits| digits.parse::<usize>().ok())
            .and_then(|i| self.tables.python_blocks.get(i))
            .map_or(marker.clone(), Clone::clone);
        Ok(Stmt::Python { code })
    }

    fn deref_assign(&mut self) -> Result<Stmt, SyntaxError> {
        self.pos += 1; // *
        let name = self.expect_ident("pointer variable name")?;
        self.expect(&Token::Assign, "'=' in pointer assignment")?;
        let expr = self.expr()?;
        self.expect(&Token::Semi, "';' after assignment")?;
        Ok(Stmt::Assign {
            target: AssignTarget::Deref(name),
            expr,
        })
    }

    /// Statements that begin with an identifier: macro/function calls,
    /// assignments, compound assignments, or plain expressions (`i++;`).
    fn ident_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if self.peek_at(1) == Some(&Token::LParen) {
            let name = self.expect_ident("name")?;
            self.pos += 1; // (
            let args = self.arg_list_inner()?;
            self.expect(&Token::Semi, "';' after call")?;
            return Ok(Stmt::MacroCall { name, args });
        }

        let rewind = self.pos;
        if let Some(stmt) = self.try_assignment()? {
            return Ok(stmt);
        }
        self.pos = rewind;
        let expr = self.expr()?;
        self.expect(&Token::Semi, "';' after expression")?;
        Ok(Stmt::Expr(expr))
    }

    /// Attempts to parse `lvalue = expr;` or `name op= expr;`; returns
    /// `None` (without consuming input decisions) when the statement turns
    /// out to be a plain expression.
    fn try_assignment(&mut self) -> Result<Option<Stmt>, SyntaxError> {
        let name = self.expect_ident("name")?;

        if let Some(op) = self.compound_op() {
            self.pos += 1;
            let expr = self.expr()?;
            self.expect(&Token::Semi, "';' after assignment")?;
            return Ok(Some(Stmt::CompoundAssign { target: name, op, expr }));
        }

        let mut indices = Vec::new();
        while self.eat(&Token::LBracket) {
            indices.push(self.expr()?);
            self.expect(&Token::RBracket, "']' closing index")?;
        }

        let field = if self.peek() == Some(&Token::Dot) {
            match self.peek_at(1) {
                Some(Token::Ident(_)) => {
                    self.pos += 1;
                    Some(self.expect_ident("field name")?)
                }
                _ => None,
            }
        } else {
            None
        };

        if !self.eat(&Token::Assign) {
            return Ok(None);
        }

        let expr = self.expr()?;
        self.expect(&Token::Semi, "';' after assignment")?;

        let target = match (indices.is_empty(), field) {
            (true, None) => AssignTarget::Var(name),
            (false, None) => AssignTarget::Array { name, indices },
            (true, Some(field)) => AssignTarget::Member {
                base: Box::new(Expr::Var(name)),
                field,
            },
            (false, Some(field)) => AssignTarget::Member {
                base: Box::new(Expr::Array { name, indices }),
                field,
            },
        };
        Ok(Some(Stmt::Assign { target, expr }))
    }

    fn compound_op(&mut self) -> Option<BinOp> {
        match self.peek() {
            Some(Token::PlusAssign) => Some(BinOp::Add),
            Some(Token::MinusAssign) => Some(BinOp::Sub),
            Some(Token::MulAssign) => Some(BinOp::Mul),
            Some(Token::DivAssign) => Some(BinOp::Div),
            Some(Token::ModAssign) => Some(BinOp::Mod),
            Some(Token::AndAssign) => Some(BinOp::BitAnd),
            Some(Token::OrAssign) => Some(BinOp::BitOr),
            Some(Token::XorAssign) => Some(BinOp::BitXor),
            _ => None,
        }
    }

    fn block_or_stmt(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.eat(&Token::LBrace) {
            let mut body = Vec::new();
            while !self.eat(&Token::RBrace) {
                if self.peek().is_none() {
                    return Err(self.error("unterminated block"));
                }
                body.push(self.stmt()?);
            }
            Ok(body)
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn arg_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(&Token::LParen, "'('")?;
        self.arg_list_inner()
    }

    /// Arguments after the opening parenthesis, consuming the `)`.
    fn arg_list_inner(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        args.push(self.expr()?);
        while self.eat(&Token::Comma) {
            args.push(self.expr()?);
        }
        self.expect(&Token::RParen, "')' closing argument list")?;
        Ok(args)
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn binary_ladder(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
        ops: &[(Token, BinOp)],
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == Some(token) {
                    self.pos += 1;
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::and_expr, &[(Token::OrOr, BinOp::LogicalOr)])
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::comparison, &[(Token::AndAnd, BinOp::LogicalAnd)])
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(
            Self::shift,
            &[
                (Token::EqEq, BinOp::Eq),
                (Token::NotEq, BinOp::Ne),
                (Token::LessEq, BinOp::Le),
                (Token::GreaterEq, BinOp::Ge),
                (Token::Less, BinOp::Lt),
                (Token::Greater, BinOp::Gt),
            ],
        )
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(
            Self::bitor,
            &[(Token::ShiftLeft, BinOp::Shl), (Token::ShiftRight, BinOp::Shr)],
        )
    }

    fn bitor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::bitxor, &[(Token::Pipe, BinOp::BitOr)])
    }

    fn bitxor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::bitand, &[(Token::Caret, BinOp::BitXor)])
    }

    fn bitand(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::arith, &[(Token::Amp, BinOp::BitAnd)])
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(Self::term, &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)])
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_ladder(
            Self::factor,
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Mod),
            ],
        )
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let unary = match self.peek() {
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            Some(Token::Amp) => Some(UnaryOp::AddrOf),
            Some(Token::Star) => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = unary {
            self.pos += 1;
            let operand = self.factor()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::PlusPlus) {
            let operand = self.postfix()?;
            return Ok(Expr::PreInc(Box::new(operand)));
        }
        if self.eat(&Token::MinusMinus) {
            let operand = self.postfix()?;
            return Ok(Expr::PreDec(Box::new(operand)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Token::PlusPlus) {
                expr = Expr::PostInc(Box::new(expr));
            } else if self.eat(&Token::MinusMinus) {
                expr = Expr::PostDec(Box::new(expr));
            } else if self.peek() == Some(&Token::Dot) && matches!(self.peek_at(1), Some(Token::Ident(_))) {
                self.pos += 1;
                let field = self.expect_ident("field name")?;
                expr = Expr::Member {
                    base: Box::new(expr),
                    field,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::GetReg) => {
                self.pos += 1;
                self.expect(&Token::LParen, "'(' after GetReg")?;
                let register = self.expect_string("register name string")?;
                self.expect(&Token::RParen, "')' after GetReg register")?;
                Ok(Expr::GetReg(register))
            }
            Some(Token::SetReg) => {
                self.pos += 1;
                self.expect(&Token::LParen, "'(' after SetReg")?;
                let register = self.expect_string("register name string")?;
                self.expect(&Token::Comma, "',' after SetReg register")?;
                let value = self.expr()?;
                self.expect(&Token::RParen, "')' closing SetReg")?;
                Ok(Expr::SetReg {
                    register,
                    value: Box::new(value),
                })
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident("name")?;
                if self.eat(&Token::LParen) {
                    let args = self.arg_list_inner()?;
                    return Ok(Expr::Call { name, args });
                }
                if self.peek() == Some(&Token::LBracket) {
                    let mut indices = Vec::new();
                    while self.eat(&Token::LBracket) {
                        indices.push(self.expr()?);
                        self.expect(&Token::RBracket, "']' closing index")?;
                    }
                    return Ok(Expr::Array { name, indices });
                }
                Ok(Expr::Var(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.expr()?;
                self.expect(&Token::RParen, "')' closing parenthesized expression")?;
                Ok(expr)
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

fn is_register_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 2 && matches!(bytes[0], b'd' | b'a') && bytes[1].is_ascii_digit() && bytes[1] <= b'7'
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{BinOp, Expr, Item, Stmt};

    fn parse_ok(source: &str) -> Module {
        parse(source, None).expect("parse")
    }

    fn only_proc(module: &Module) -> &Proc {
        for item in &module.items {
            if let Item::Code(section) = item {
                for code_item in &section.items {
                    if let CodeItem::Proc(proc) = code_item {
                        return proc;
                    }
                }
            }
        }
        panic!("no procedure in module");
    }

    #[test]
    fn parses_minimal_procedure() {
        let module = parse_ok("code main:\n    proc f() -> int {\n        return 1;\n    }\n");
        let proc = only_proc(&module);
        assert_eq!(proc.name, "f");
        assert_eq!(proc.rettype, "int");
        assert_eq!(proc.body.len(), 1);
    }

    #[test]
    fn precedence_puts_multiplication_under_addition() {
        let module = parse_ok("code c:\n    proc f() -> int {\n        return 1 + 2 * 3;\n    }\n");
        let proc = only_proc(&module);
        let Stmt::Return(Some(Expr::Binary { op, right, .. })) = &proc.body[0] else {
            panic!("expected return of binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn register_params_capture_the_register() {
        let module = parse_ok("code c:\n    proc f(__reg(d0) a: int, b: word) -> void {\n    }\n");
        let proc = only_proc(&module);
        assert_eq!(proc.params[0].register.as_deref(), Some("d0"));
        assert_eq!(proc.params[1].register, None);
        assert_eq!(proc.params[1].ptype, "word");
    }

    #[test]
    fn pointer_types_keep_their_star() {
        let module = parse_ok("code c:\n    proc f(p: int*) -> void {\n    }\n");
        assert_eq!(only_proc(&module).params[0].ptype, "int*");
    }

    #[test]
    fn data_array_with_constant_dimension() {
        let module = parse_ok("const N = 4;\ndata d:\n    arr.w[N] = { 1, 2, 3, 4 }\n");
        let Item::Data(section) = &module.items[1] else {
            panic!("expected data section");
        };
        let DataItem::Var(var) = &section.items[0] else {
            panic!("expected variable");
        };
        assert_eq!(var.suffix, Some(Suffix::W));
        assert!(matches!(var.dims.as_ref().expect("dims")[0], Dim::Name(ref n) if n == "N"));
        assert_eq!(var.values.len(), 4);
    }

    #[test]
    fn member_access_is_not_mistaken_for_size_suffix() {
        let module = parse_ok("code c:\n    proc f() -> int {\n        return pos.b;\n    }\n");
        let proc = only_proc(&module);
        let Stmt::Return(Some(Expr::Member { field, .. })) = &proc.body[0] else {
            panic!("expected member access");
        };
        assert_eq!(field, "b");
    }

    #[test]
    fn bss_count_form_and_array_form() {
        let module = parse_ok("bss b:\n    buffer.b[320]\n    misc.w: 16\n");
        let Item::Bss(section) = &module.items[0] else {
            panic!("expected bss section");
        };
        let DataItem::Var(array) = &section.items[0] else { panic!() };
        assert!(array.is_array());
        let DataItem::Var(counted) = &section.items[1] else { panic!() };
        assert!(matches!(counted.bss_count, Some(Dim::Lit(16))));
    }

    #[test]
    fn post_increment_statement_parses_as_expression() {
        let module = parse_ok("code c:\n    proc f() -> void {\n        var i: int = 0;\n        i++;\n    }\n");
        let proc = only_proc(&module);
        assert!(matches!(proc.body[1], Stmt::Expr(Expr::PostInc(_))));
    }

    #[test]
    fn compound_assignment_keeps_operator() {
        let module = parse_ok("code c:\n    proc f() -> void {\n        var x: int = 0;\n        x += 5;\n    }\n");
        let proc = only_proc(&module);
        let Stmt::CompoundAssign { op, .. } = &proc.body[1] else {
            panic!("expected compound assignment");
        };
        assert_eq!(*op, BinOp::Add);
    }

    #[test]
    fn var_outside_procedure_gets_the_specialized_error() {
        let err = parse("code c:\n    var x: int;\n", None).expect_err("var outside proc");
        assert!(
            err.to_string().contains("data' or 'bss"),
            "error should explain valid placement, got: {err}"
        );
    }

    #[test]
    fn asm_block_content_is_reattached() {
        let module = parse_ok("code c:\n    proc f() -> void {\n        asm {\n            moveq #0,d0\n        }\n    }\n");
        let proc = only_proc(&module);
        let Stmt::Asm(content) = &proc.body[0] else {
            panic!("expected asm statement");
        };
        assert!(content.contains("moveq #0,d0"));
    }

    #[test]
    fn for_loop_defaults_step_to_one() {
        let module = parse_ok("code c:\n    proc f() -> void {\n        for i = 0 to 9 {\n        }\n    }\n");
        let proc = only_proc(&module);
        let Stmt::For { step, .. } = &proc.body[0] else {
            panic!("expected for loop");
        };
        assert!(matches!(step, Expr::Number(1)));
    }

    #[test]
    fn struct_declaration_with_initializer() {
        let module = parse_ok("data d:\n    struct player { x.l, y.l, hp.w } = { 0, 0, 100 }\n");
        let Item::Data(section) = &module.items[0] else { panic!() };
        let DataItem::Struct(var) = &section.items[0] else { panic!() };
        assert_eq!(var.fields.len(), 3);
        assert_eq!(var.init_values, vec![0, 0, 100]);
    }

    #[test]
    fn extern_declarations_parse_both_kinds() {
        let module = parse_ok("extern func OpenLibrary(name: ptr, version: long) -> ptr;\nextern var DOSBase: ptr;\n");
        assert!(matches!(module.items[0], Item::Extern(ExternDecl::Func { .. })));
        assert!(matches!(module.items[1], Item::Extern(ExternDecl::Var { .. })));
    }
}
