//! Semantic validation.
//!
//! Two passes over the module. The first processes directives, collects
//! constants, checks array dimensions and initializer lengths, computes
//! struct layouts, and gathers every module-level symbol (globals, externs,
//! procedures, macros). The second walks each procedure body resolving name
//! references against the layered symbol table, checking call arity,
//! PUSH/POP balance, break/continue placement and the register intrinsics.
//!
//! Errors accumulate and are reported together; warnings are returned to
//! the caller on success. The parsed module is never mutated — named array
//! dimensions are *checked* here and re-resolved by the code generator
//! through its own constant table.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{
        AssignTarget, BssSection, CodeItem, DataItem, DataSection, Dim, Expr, ExternDecl, Item, Module, Param,
        Pragma, Stmt, StructVar, UnaryOp, struct_layout,
    },
    error::CompileError,
    fold::resolve_dim,
};

const VALID_REGISTERS: [&str; 16] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7",
];

/// d7 drives `dbra` loops, a6 is the frame pointer, a7 the stack pointer.
const RESERVED_REGISTERS: [&str; 3] = ["d7", "a6", "a7"];

/// Registers `GetReg`/`SetReg` may touch.
const INTRINSIC_REGISTERS: [&str; 12] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "a0", "a1", "a2", "a3",
];

/// Validates a module, returning the accumulated warnings on success.
pub struct Validator<'m> {
    module: &'m Module,
    errors: Vec<String>,
    warnings: Vec<String>,
    constants: AHashMap<String, i64>,
    globals: IndexSet<String>,
    extern_vars: IndexSet<String>,
    extern_funcs: IndexMap<String, Vec<Param>>,
    procs: IndexMap<String, Vec<Param>>,
    macros: IndexMap<String, Vec<String>>,
}

impl<'m> Validator<'m> {
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            errors: Vec::new(),
            warnings: Vec::new(),
            constants: AHashMap::new(),
            globals: IndexSet::new(),
            extern_vars: IndexSet::new(),
            extern_funcs: IndexMap::new(),
            procs: IndexMap::new(),
            macros: IndexMap::new(),
        }
    }

    /// Runs both passes. `Err` carries every accumulated error.
    pub fn validate(mut self) -> Result<Vec<String>, CompileError> {
        self.collect_module()?;

        for item in &self.module.items {
            if let Item::Code(section) = item {
                for code_item in &section.items {
                    if let CodeItem::Proc(proc) = code_item {
                        self.check_proc(proc);
                    }
                }
            }
        }

        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(CompileError::Validation { errors: self.errors })
        }
    }

    // ------------------------------------------------------------------
    // first pass
    // ------------------------------------------------------------------

    fn collect_module(&mut self) -> Result<(), CompileError> {
        for item in &self.module.items {
            match item {
                Item::Warning(message) => eprintln!("Warning: {message}"),
                Item::Error(message) => return Err(CompileError::Directive(message.clone())),
                Item::Pragma(pragma) => self.check_pragma(pragma),
                Item::Macro(def) => {
                    if self.macros.contains_key(&def.name) {
                        self.errors.push(format!("Macro '{}' already defined", def.name));
                    } else {
                        self.macros.insert(def.name.clone(), def.params.clone());
                    }
                }
                Item::Const(decl) => self.add_constant(&decl.name, decl.value),
                Item::Data(section) => self.collect_data(section),
                Item::Bss(section) => self.collect_bss(section),
                Item::Code(section) => self.collect_code(section),
                Item::Extern(decl) => self.collect_extern(decl),
                Item::Public(_) => {}
            }
        }
        Ok(())
    }

    fn add_constant(&mut self, name: &str, value: i64) {
        if self.constants.contains_key(name) {
            self.errors.push(format!("Constant '{name}' already declared"));
        } else {
            self.constants.insert(name.to_owned(), value);
        }
    }

    fn check_pragma(&mut self, pragma: &Pragma) {
        if pragma.name == "lockreg" {
            for reg in &pragma.args {
                if !VALID_REGISTERS.contains(&reg.as_str()) {
                    self.errors.push(format!(
                        "Pragma lockreg: Invalid register '{reg}'. Valid registers: d0-d7, a0-a7"
                    ));
                } else if RESERVED_REGISTERS.contains(&reg.as_str()) {
                    self.errors
                        .push(format!("Pragma lockreg: Cannot lock reserved register '{reg}'"));
                }
            }
        } else {
            self.warnings.push(format!("Unknown pragma: {}", pragma.name));
        }
    }

    fn check_dims(&mut self, name: &str, dims: Option<&[Dim]>) {
        let Some(dims) = dims else { return };
        for dim in dims {
            if resolve_dim(dim, &self.constants).is_none() {
                if let Dim::Name(constant) = dim {
                    self.errors
                        .push(format!("Array dimension constant '{constant}' not defined for '{name}'"));
                }
            }
        }
    }

    fn register_struct(&mut self, var: &StructVar) {
        let (size, layout) = struct_layout(&var.fields);
        self.add_constant(&format!("{}__size", var.name), i64::from(size));
        self.add_constant(&format!("{}__stride", var.name), i64::from(size));
        for field in &layout {
            self.add_constant(&format!("{}_{}", var.name, field.name), i64::from(field.offset));
        }
        self.globals.insert(var.name.clone());
    }

    fn collect_data(&mut self, section: &DataSection) {
        for item in &section.items {
            match item {
                DataItem::Const(decl) => self.add_constant(&decl.name, decl.value),
                DataItem::Struct(var) => {
                    self.check_dims(&var.name, var.dims.as_deref());
                    self.register_struct(var);
                }
                DataItem::Var(var) => {
                    self.check_dims(&var.name, var.dims.as_deref());
                    if let Some(dims) = var.dims.as_deref() {
                        if dims.len() == 1 && !var.values.is_empty() {
                            if let Some(declared) = resolve_dim(&dims[0], &self.constants) {
                                let actual = var.values.len() as i64;
                                if declared != actual {
                                    self.errors.push(format!(
                                        "Array '{}' declared with length {declared} but has {actual} initializer values",
                                        var.name
                                    ));
                                }
                            }
                        }
                    }
                    self.globals.insert(var.name.clone());
                }
            }
        }
    }

    fn collect_bss(&mut self, section: &BssSection) {
        for item in &section.items {
            match item {
                DataItem::Const(decl) => self.add_constant(&decl.name, decl.value),
                DataItem::Struct(var) => {
                    self.check_dims(&var.name, var.dims.as_deref());
                    self.register_struct(var);
                }
                DataItem::Var(var) => {
                    self.check_dims(&var.name, var.dims.as_deref());
                    if let Some(Dim::Name(constant)) = &var.bss_count {
                        if !self.constants.contains_key(constant) {
                            self.errors
                                .push(format!("Size constant '{constant}' not defined for '{}'", var.name));
                        }
                    }
                    self.globals.insert(var.name.clone());
                }
            }
        }
    }

    fn collect_code(&mut self, section: &crate::ast::CodeSection) {
        for item in &section.items {
            match item {
                CodeItem::Extern(decl) => self.collect_extern(decl),
                CodeItem::Func(decl) => {
                    self.procs.insert(decl.name.clone(), decl.params.clone());
                }
                CodeItem::Proc(proc) => {
                    if self.procs.contains_key(&proc.name) {
                        self.errors.push(format!("Procedure '{}' already defined", proc.name));
                    } else {
                        self.procs.insert(proc.name.clone(), proc.params.clone());
                    }
                }
                CodeItem::Asm(_) | CodeItem::Public(_) => {}
            }
        }
    }

    fn collect_extern(&mut self, decl: &ExternDecl) {
        match decl {
            ExternDecl::Var { name, .. } => {
                self.extern_vars.insert(name.clone());
            }
            ExternDecl::Func { name, params, .. } => {
                self.extern_funcs.insert(name.clone(), params.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // second pass
    // ------------------------------------------------------------------

    fn check_proc(&mut self, proc: &crate::ast::Proc) {
        let mut symbols: IndexMap<String, String> = IndexMap::new();
        for param in &proc.params {
            symbols.insert(param.name.clone(), param.ptype.clone());
        }
        self.collect_locals(proc, &proc.body, &mut symbols);

        for global in &self.globals {
            if !symbols.contains_key(global) {
                symbols.insert(global.clone(), "global".to_owned());
            }
        }
        for extern_var in &self.extern_vars {
            if !symbols.contains_key(extern_var) {
                symbols.insert(extern_var.clone(), "extern_var".to_owned());
            }
        }

        let mut push_stack: Vec<usize> = Vec::new();
        self.check_stmts(&proc.body, &symbols, proc, &mut push_stack, 0);
        if !push_stack.is_empty() {
            self.errors.push(format!(
                "In proc '{}': {} PUSH(es) without matching POP(s)",
                proc.name,
                push_stack.len()
            ));
        }
    }

    /// Gathers local declarations and `for` counters into the symbol table,
    /// flagging redeclarations.
    fn collect_locals(&mut self, proc: &crate::ast::Proc, stmts: &[Stmt], symbols: &mut IndexMap<String, String>) {
        for stmt in stmts {
            match stmt {
                Stmt::VarDecl { name, vtype, .. } => {
                    if symbols.contains_key(name) {
                        self.errors
                            .push(format!("In proc '{}': Variable '{name}' already declared", proc.name));
                    } else {
                        symbols.insert(name.clone(), vtype.clone());
                    }
                }
                Stmt::For { var, body, .. } => {
                    if !symbols.contains_key(var) {
                        symbols.insert(var.clone(), "int".to_owned());
                    }
                    self.collect_locals(proc, body, symbols);
                }
                Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::Repeat { body, .. } => {
                    self.collect_locals(proc, body, symbols);
                }
                Stmt::If {
                    then_body, else_body, ..
                } => {
                    self.collect_locals(proc, then_body, symbols);
                    if let Some(else_body) = else_body {
                        self.collect_locals(proc, else_body, symbols);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_stmts(
        &mut self,
        stmts: &[Stmt],
        symbols: &IndexMap<String, String>,
        proc: &crate::ast::Proc,
        push_stack: &mut Vec<usize>,
        loop_depth: usize,
    ) {
        for stmt in stmts {
            match stmt {
                Stmt::Push(regs) => push_stack.push(regs.len()),
                Stmt::Pop => {
                    if push_stack.pop().is_none() {
                        self.errors
                            .push(format!("In proc '{}': POP() without matching PUSH()", proc.name));
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.check_expr(cond, symbols, proc);
                    self.check_stmts(then_body, symbols, proc, &mut push_stack.clone(), loop_depth);
                    if let Some(else_body) = else_body {
                        self.check_stmts(else_body, symbols, proc, &mut push_stack.clone(), loop_depth);
                    }
                }
                Stmt::While { cond, body } => {
                    self.check_expr(cond, symbols, proc);
                    self.check_stmts(body, symbols, proc, &mut push_stack.clone(), loop_depth + 1);
                }
                Stmt::DoWhile { body, cond } => {
                    self.check_stmts(body, symbols, proc, &mut push_stack.clone(), loop_depth + 1);
                    self.check_expr(cond, symbols, proc);
                }
                Stmt::For {
                    start, end, step, body, ..
                } => {
                    self.check_expr(start, symbols, proc);
                    self.check_expr(end, symbols, proc);
                    self.check_expr(step, symbols, proc);
                    self.check_stmts(body, symbols, proc, &mut push_stack.clone(), loop_depth + 1);
                }
                Stmt::Repeat { count, body } => {
                    self.check_expr(count, symbols, proc);
                    self.check_stmts(body, symbols, proc, &mut push_stack.clone(), loop_depth + 1);
                }
                Stmt::Break => {
                    if loop_depth == 0 {
                        self.errors.push(format!("In proc '{}': break outside of loop", proc.name));
                    }
                }
                Stmt::Continue => {
                    if loop_depth == 0 {
                        self.errors
                            .push(format!("In proc '{}': continue outside of loop", proc.name));
                    }
                }
                other => self.check_stmt(other, symbols, proc),
            }
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, symbols: &IndexMap<String, String>, proc: &crate::ast::Proc) {
        match stmt {
            Stmt::VarDecl { init, .. } => {
                if let Some(init) = init {
                    self.check_expr(init, symbols, proc);
                }
            }
            Stmt::Assign { target, expr } => {
                self.check_assign_target(target, symbols, proc);
                self.check_expr(expr, symbols, proc);
            }
            Stmt::CompoundAssign { target, expr, .. } => {
                if !symbols.contains_key(target) {
                    self.undefined_variable(target, symbols, proc);
                }
                self.check_expr(expr, symbols, proc);
            }
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    self.check_expr(expr, symbols, proc);
                }
                if expr.is_none() && proc.rettype != "void" {
                    self.warnings
                        .push(format!("In proc '{}': Empty return in non-void function", proc.name));
                } else if expr.is_some() && proc.rettype == "void" {
                    self.warnings
                        .push(format!("In proc '{}': Return with value in void function", proc.name));
                }
            }
            Stmt::Expr(expr) => self.check_expr(expr, symbols, proc),
            Stmt::Call { name, args } => {
                for arg in args {
                    self.check_expr(arg, symbols, proc);
                }
                self.check_call(name, args, symbols, proc, false);
            }
            Stmt::MacroCall { name, args } => {
                for arg in args {
                    self.check_expr(arg, symbols, proc);
                }
                if let Some(params) = self.macros.get(name) {
                    if params.len() != args.len() {
                        self.errors.push(format!(
                            "In proc '{}': Macro '{name}' expects {} argument(s), got {}",
                            proc.name,
                            params.len(),
                            args.len()
                        ));
                    }
                } else if self.procs.contains_key(name) || self.extern_funcs.contains_key(name) {
                    self.check_call(name, args, symbols, proc, true);
                } else {
                    let candidates: Vec<&String> = self
                        .macros
                        .keys()
                        .chain(self.procs.keys())
                        .chain(self.extern_funcs.keys())
                        .collect();
                    let mut message = format!("In proc '{}': Undefined macro or function '{name}'", proc.name);
                    append_suggestions(&mut message, name, &candidates);
                    self.errors.push(message);
                }
            }
            Stmt::Asm(_) | Stmt::Template { .. } | Stmt::Python { .. } => {}
            _ => {}
        }
    }

    fn check_assign_target(&mut self, target: &AssignTarget, symbols: &IndexMap<String, String>, proc: &crate::ast::Proc) {
        match target {
            AssignTarget::Var(name) | AssignTarget::Deref(name) => {
                if !symbols.contains_key(name) {
                    self.undefined_variable(name, symbols, proc);
                }
            }
            AssignTarget::Array { name, indices } => {
                if !symbols.contains_key(name) && !self.globals.contains(name) {
                    self.errors
                        .push(format!("In proc '{}': Undefined array '{name}'", proc.name));
                }
                for index in indices {
                    self.check_expr(index, symbols, proc);
                }
            }
            AssignTarget::Member { base, .. } => self.check_member_base(base, symbols, proc),
        }
    }

    fn check_member_base(&mut self, base: &Expr, symbols: &IndexMap<String, String>, proc: &crate::ast::Proc) {
        match base {
            Expr::Var(name) => {
                if !symbols.contains_key(name) && !self.globals.contains(name) {
                    self.errors
                        .push(format!("In proc '{}': Undefined struct variable '{name}'", proc.name));
                }
            }
            Expr::Array { name, indices } => {
                if !symbols.contains_key(name) && !self.globals.contains(name) {
                    self.errors
                        .push(format!("In proc '{}': Undefined struct array '{name}'", proc.name));
                }
                for index in indices {
                    self.check_expr(index, symbols, proc);
                }
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
            } => self.check_expr(operand, symbols, proc),
            _ => {
                self.errors
                    .push(format!("In proc '{}': Unsupported member access base", proc.name));
            }
        }
    }

    fn undefined_variable(&mut self, name: &str, symbols: &IndexMap<String, String>, proc: &crate::ast::Proc) {
        let constant_names: Vec<&String> = symbols.keys().collect();
        let mut message = format!("In proc '{}': Undefined variable '{name}'", proc.name);
        append_suggestions(&mut message, name, &constant_names);
        self.errors.push(message);
    }

    fn check_expr(&mut self, expr: &Expr, symbols: &IndexMap<String, String>, proc: &crate::ast::Proc) {
        match expr {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                if !symbols.contains_key(name) && !self.constants.contains_key(name) {
                    self.undefined_variable(name, symbols, proc);
                }
            }
            Expr::Array { indices, .. } => {
                for index in indices {
                    self.check_expr(index, symbols, proc);
                }
            }
            Expr::Member { base, .. } => self.check_member_base(base, symbols, proc),
            Expr::Binary { left, right, .. } => {
                self.check_expr(left, symbols, proc);
                self.check_expr(right, symbols, proc);
            }
            Expr::Unary {
                op: UnaryOp::AddrOf,
                operand,
            } => match operand.as_ref() {
                Expr::Var(name) => {
                    if !symbols.contains_key(name) && !self.constants.contains_key(name) {
                        self.errors.push(format!(
                            "In proc '{}': Undefined variable '{name}' in address-of expression",
                            proc.name
                        ));
                    }
                }
                Expr::Array { name, indices } => {
                    if !symbols.contains_key(name) && !self.globals.contains(name) {
                        self.errors.push(format!(
                            "In proc '{}': Undefined array '{name}' in address-of expression",
                            proc.name
                        ));
                    }
                    for index in indices {
                        self.check_expr(index, symbols, proc);
                    }
                }
                _ => {
                    self.errors.push(format!(
                        "In proc '{}': Cannot take address of non-variable expression",
                        proc.name
                    ));
                }
            },
            Expr::Unary { operand, .. } => self.check_expr(operand, symbols, proc),
            Expr::PostInc(operand) | Expr::PostDec(operand) | Expr::PreInc(operand) | Expr::PreDec(operand) => {
                self.check_expr(operand, symbols, proc);
            }
            Expr::Call { name, args } => {
                for arg in args {
                    self.check_expr(arg, symbols, proc);
                }
                self.check_call(name, args, symbols, proc, false);
            }
            Expr::GetReg(register) => {
                if !INTRINSIC_REGISTERS.contains(&register.as_str()) {
                    self.errors.push(format!(
                        "In proc '{}': GetReg invalid register '{register}'. Valid registers: d0-d7, a0-a3",
                        proc.name
                    ));
                }
            }
            Expr::SetReg { register, value } => {
                if !INTRINSIC_REGISTERS.contains(&register.as_str()) {
                    self.errors.push(format!(
                        "In proc '{}': SetReg invalid register '{register}'. Valid registers: d0-d7, a0-a3",
                        proc.name
                    ));
                }
                self.check_expr(value, symbols, proc);
            }
        }
    }

    /// Checks that a call resolves, has matching arity, and does not pass a
    /// bare variable to a parameter whose name suggests a pointer.
    fn check_call(
        &mut self,
        name: &str,
        args: &[Expr],
        _symbols: &IndexMap<String, String>,
        proc: &crate::ast::Proc,
        known_to_exist: bool,
    ) {
        let params = self.procs.get(name).or_else(|| self.extern_funcs.get(name));
        let Some(params) = params else {
            if known_to_exist {
                return;
            }
            let candidates: Vec<&String> = self.procs.keys().chain(self.extern_funcs.keys()).collect();
            let mut message = format!("In proc '{}': Undefined function '{name}'", proc.name);
            if self.macros.contains_key(name) {
                message.push_str(&format!(
                    " (note: '{name}' is a macro, not a function - macros cannot be used in expressions)"
                ));
            } else {
                append_suggestions(&mut message, name, &candidates);
            }
            self.errors.push(message);
            return;
        };

        if params.len() != args.len() {
            self.errors.push(format!(
                "In proc '{}': Call to '{name}' expects {} argument(s), got {}",
                proc.name,
                params.len(),
                args.len()
            ));
        }

        for (arg, param) in args.iter().zip(params.iter()) {
            let looks_like_pointer = param.name.to_lowercase().contains("ptr");
            if looks_like_pointer {
                if let Expr::Var(arg_name) = arg {
                    self.warnings.push(format!(
                        "In proc '{}': Argument '{arg_name}' to '{name}' parameter '{}' looks like it expects \
                         a pointer. Did you mean '&{arg_name}'?",
                        proc.name, param.name
                    ));
                }
            }
        }
    }
}

/// Appends `. Did you mean: a, b, c?` built from case-insensitive prefix or
/// substring matches against the candidate pool.
fn append_suggestions(message: &mut String, name: &str, candidates: &[&String]) {
    let lower = name.to_lowercase();
    let prefix: String = lower.chars().take(3).collect();
    let mut similar: Vec<&str> = Vec::new();
    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();
        if candidate_lower.starts_with(&prefix) || candidate_lower.contains(&lower) {
            similar.push(candidate);
        }
    }
    if !similar.is_empty() {
        similar.truncate(3);
        message.push_str(&format!(". Did you mean: {}?", similar.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn validate_src(source: &str) -> Result<Vec<String>, CompileError> {
        let module = parse(source, None).expect("parse");
        Validator::new(&module).validate()
    }

    fn validation_errors(source: &str) -> Vec<String> {
        match validate_src(source) {
            Err(CompileError::Validation { errors }) => errors,
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn clean_module_validates_without_warnings() {
        let warnings = validate_src(
            "data d:\n    score.w = 0\ncode c:\n    proc f() -> int {\n        return score;\n    }\n",
        )
        .expect("valid module");
        assert!(warnings.is_empty());
    }

    #[test]
    fn undefined_variable_is_reported_with_suggestion() {
        let errors = validation_errors(
            "code c:\n    proc f() -> int {\n        var counter: int = 0;\n        return conter;\n    }\n",
        );
        assert!(errors[0].contains("Undefined variable 'conter'"));
        assert!(errors[0].contains("counter"), "should suggest the close name: {}", errors[0]);
    }

    #[test]
    fn duplicate_constants_are_rejected() {
        let errors = validation_errors("const A = 1;\nconst A = 2;\ndata d:\n    x.w = 0\n");
        assert!(errors[0].contains("Constant 'A' already declared"));
    }

    #[test]
    fn array_initializer_length_must_match() {
        let errors = validation_errors("data d:\n    arr.w[4] = { 1, 2, 3 }\n");
        assert!(errors[0].contains("declared with length 4 but has 3"));
    }

    #[test]
    fn unresolved_dimension_constant_is_an_error() {
        let errors = validation_errors("data d:\n    arr.w[COUNT] = { 1, 2 }\n");
        assert!(errors[0].contains("Array dimension constant 'COUNT' not defined"));
    }

    #[test]
    fn lockreg_rejects_reserved_registers() {
        let errors = validation_errors("#pragma lockreg(a6);\ndata d:\n    x.w = 0\n");
        assert!(errors[0].contains("Cannot lock reserved register 'a6'"));
    }

    #[test]
    fn lockreg_rejects_unknown_register_names() {
        let errors = validation_errors("#pragma lockreg(d9);\ndata d:\n    x.w = 0\n");
        assert!(errors[0].contains("Invalid register 'd9'"));
    }

    #[test]
    fn unknown_pragma_warns_but_passes() {
        let warnings = validate_src("#pragma optimize(x);\ndata d:\n    v.w = 0\n").expect("valid");
        assert!(warnings[0].contains("Unknown pragma: optimize"));
    }

    #[test]
    fn error_directive_aborts() {
        let err = validate_src("#error \"not ready\";\n").expect_err("should abort");
        assert!(matches!(err, CompileError::Directive(_)));
    }

    #[test]
    fn unbalanced_push_is_reported() {
        let errors = validation_errors("code c:\n    proc f() -> void {\n        PUSH(d2, d3);\n    }\n");
        assert!(errors[0].contains("PUSH(es) without matching POP"));
    }

    #[test]
    fn pop_without_push_is_reported() {
        let errors = validation_errors("code c:\n    proc f() -> void {\n        POP();\n    }\n");
        assert!(errors[0].contains("POP() without matching PUSH()"));
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let errors = validation_errors("code c:\n    proc f() -> void {\n        break;\n    }\n");
        assert!(errors[0].contains("break outside of loop"));
    }

    #[test]
    fn call_arity_is_checked() {
        let errors = validation_errors(
            "code c:\n    proc two(a: int, b: int) -> void {\n    }\n    proc f() -> void {\n        two(1);\n    }\n",
        );
        assert!(errors[0].contains("expects 2 argument(s), got 1"));
    }

    #[test]
    fn pointer_parameter_heuristic_warns_on_bare_identifier() {
        let warnings = validate_src(
            "code c:\n    proc draw(sprite_ptr: ptr) -> void {\n    }\n    proc f() -> void {\n        var bob: int = 0;\n        draw(bob);\n    }\n",
        )
        .expect("valid with warnings");
        assert!(warnings.iter().any(|w| w.contains("Did you mean '&bob'")));
    }

    #[test]
    fn return_value_in_void_procedure_warns() {
        let warnings = validate_src("code c:\n    proc f() -> void {\n        return 1;\n    }\n").expect("valid");
        assert!(warnings[0].contains("Return with value in void function"));
    }

    #[test]
    fn getreg_register_names_are_validated() {
        let errors = validation_errors(
            "code c:\n    proc f() -> int {\n        return GetReg(\"a5\");\n    }\n",
        );
        assert!(errors[0].contains("GetReg invalid register 'a5'"));
    }

    #[test]
    fn duplicate_procedures_are_rejected() {
        let errors = validation_errors(
            "code c:\n    proc f() -> void {\n    }\n    proc f() -> void {\n    }\n",
        );
        assert!(errors[0].contains("Procedure 'f' already defined"));
    }

    #[test]
    fn struct_constants_are_available_to_expressions() {
        let warnings = validate_src(
            "bss b:\n    struct enemy[8] { x.l, y.l, hp.w }\ncode c:\n    proc f() -> int {\n        return enemy__stride;\n    }\n",
        )
        .expect("struct constants resolve");
        assert!(warnings.is_empty());
    }
}
