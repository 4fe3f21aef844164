//! Statement lowering: assignments, control flow, PUSH/POP, inline
//! assembly, call statements, macro expansion and compile-time splicing.
//!
//! Control-flow notes: `if` and `while` go through the inverted branch
//! emitter so a simple comparison costs one `cmp` and one conditional
//! branch; `do/while` tests forward at the bottom; `for` compares at the
//! loop head and increments at the `continue` target; `repeat` runs on
//! `dbra` with d7, which counts a 16-bit counter down through -1 — so
//! `repeat 0` executes 65,536 times, a documented property of the
//! instruction that is deliberately not guarded.

use std::sync::LazyLock;

use ahash::AHashMap;
use regex::Regex;

use crate::{
    ast::{
        AssignTarget, BinOp, CodeItem, Expr, Item, MacroDef, Module, Stmt, UnaryOp, is_pointer, size_suffix,
        type_size,
    },
    parse::parse,
    script, template,
};

use super::{
    CodeGen, INDENT, ProcCtx, add_immediate,
    expr::{local_slot, param_of, stack_param_offset},
};

static ASM_VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@([A-Za-z_]\w*)").expect("asm var pattern"));

impl CodeGen<'_> {
    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt, ctx: &ProcCtx<'_>) {
        match stmt {
            Stmt::VarDecl { name, vtype, init } => {
                let Some(init) = init else { return };
                let Some(slot) = local_slot(ctx, name) else {
                    self.emit(format!("{INDENT}; warning: local variable {name} has no frame slot"));
                    return;
                };
                let offset = slot.offset;
                let suffix = size_suffix(type_size(vtype).max(1));
                let code = self.emit_expr(init, ctx, "d0", "d1", Some(vtype));
                self.emit_indented(code);
                self.emit(format!("{INDENT}move{suffix} d0,-{offset}({})", ctx.frame_reg));
            }
            Stmt::Assign { target, expr } => self.emit_assign(target, expr, ctx),
            Stmt::CompoundAssign { target, op, expr } => self.emit_compound_assign(target, *op, expr, ctx),
            Stmt::Return(expr) => {
                if !ctx.is_void {
                    let code = match expr {
                        Some(expr) => {
                            let rettype = ctx.rettype.clone();
                            self.emit_expr(expr, ctx, "d0", "d1", Some(&rettype))
                        }
                        None => vec![format!("{INDENT}move.l #0,d0")],
                    };
                    self.emit_indented(code);
                }
                self.emit_epilogue(ctx);
            }
            Stmt::Asm(content) => self.emit_asm(content, ctx),
            Stmt::Push(registers) => {
                let list = registers.join("/");
                self.emit(format!("{INDENT}movem.l {list},-(a7)"));
                self.push_stack.push(registers.clone());
            }
            Stmt::Pop => match self.push_stack.pop() {
                Some(registers) => {
                    let list: Vec<&str> = registers.iter().rev().map(String::as_str).collect();
                    self.emit(format!("{INDENT}movem.l (a7)+,{}", list.join("/")));
                }
                None => self.emit(format!("{INDENT}; ERROR: POP() without matching PUSH()")),
            },
            Stmt::Call { name, args } => self.emit_call_stmt(name, args, ctx),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.emit_if(cond, then_body, else_body.as_deref(), ctx),
            Stmt::While { cond, body } => self.emit_while(cond, body, ctx),
            Stmt::DoWhile { body, cond } => self.emit_do_while(body, cond, ctx),
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => self.emit_for(var, start, end, step, body, ctx),
            Stmt::Repeat { count, body } => self.emit_repeat(count, body, ctx),
            Stmt::Break => match self.loop_stack.last() {
                Some((_, end_label)) => {
                    let end_label = end_label.clone();
                    self.emit(format!("{INDENT}bra {end_label}"));
                }
                None => self.emit(format!("{INDENT}; ERROR: break outside loop")),
            },
            Stmt::Continue => match self.loop_stack.last() {
                Some((continue_label, _)) => {
                    let continue_label = continue_label.clone();
                    self.emit(format!("{INDENT}bra {continue_label}"));
                }
                None => self.emit(format!("{INDENT}; ERROR: continue outside loop")),
            },
            Stmt::Expr(expr) => {
                let code = self.emit_expr(expr, ctx, "d0", "d1", None);
                self.emit_indented(code);
            }
            Stmt::MacroCall { name, args } => self.emit_macro_call(name, args, ctx),
            Stmt::Template { file, context } => self.emit_template(file, context, ctx),
            Stmt::Python { code } => self.emit_python(code, ctx),
        }
    }

    // ------------------------------------------------------------------
    // assignments
    // ------------------------------------------------------------------

    fn emit_assign(&mut self, target: &AssignTarget, expr: &Expr, ctx: &ProcCtx<'_>) {
        match target {
            AssignTarget::Deref(name) => self.emit_deref_assign(name, expr, ctx),
            AssignTarget::Member { base, field } => self.emit_member_assign(base, field, expr, ctx),
            AssignTarget::Array { name, indices } => self.emit_array_assign(name, indices, expr, ctx),
            AssignTarget::Var(name) => self.emit_scalar_assign(name, expr, ctx),
        }
    }

    fn emit_scalar_assign(&mut self, name: &str, expr: &Expr, ctx: &ProcCtx<'_>) {
        self.emit(format!("{INDENT}; {name} = {expr}"));
        if let Some(slot) = local_slot(ctx, name) {
            let offset = slot.offset;
            let vtype = slot.vtype.clone();
            let suffix = size_suffix(type_size(&vtype).max(1));
            let code = self.emit_expr(expr, ctx, "d0", "d1", Some(&vtype));
            self.emit_indented(code);
            self.emit(format!("{INDENT}move{suffix} d0,-{offset}({})", ctx.frame_reg));
            return;
        }
        if let Some(gsuffix) = self.globals.get(name).copied() {
            let suffix = size_suffix(gsuffix.bytes());
            let code = self.emit_expr(expr, ctx, "d0", "d1", None);
            self.emit_indented(code);
            self.emit(format!("{INDENT}move{suffix} d0,{name}"));
            return;
        }
        if self.extern_vars.contains(name) {
            let code = self.emit_expr(expr, ctx, "d0", "d1", None);
            self.emit_indented(code);
            self.emit(format!("{INDENT}move.l d0,{name}"));
            return;
        }
        self.emit(format!("{INDENT}; assign to unknown target {name}"));
    }

    /// `*p = value` — the value travels in d0 and the pointer in a0.
    fn emit_deref_assign(&mut self, name: &str, expr: &Expr, ctx: &ProcCtx<'_>) {
        self.emit(format!("{INDENT}; *{name} = {expr}"));

        let pointer_type = local_slot(ctx, name)
            .map(|slot| slot.vtype.clone())
            .or_else(|| param_of(ctx, name).map(|p| p.ptype.clone()));
        let Some(pointer_type) = pointer_type else {
            self.emit(format!("{INDENT}; assign through unknown pointer {name}"));
            return;
        };
        let base_type = pointer_type.trim_end_matches('*').to_owned();
        let suffix = if is_pointer(&base_type) {
            ".l"
        } else {
            size_suffix(type_size(&base_type).max(1))
        };

        let code = self.emit_expr(expr, ctx, "d0", "d1", Some(&base_type));
        self.emit_indented(code);

        if let Some(slot) = local_slot(ctx, name) {
            self.emit(format!("{INDENT}move.l -{}({}),a0", slot.offset, ctx.frame_reg));
        } else if let Some(param) = param_of(ctx, name) {
            if let Some(register) = param.register.clone() {
                self.emit(format!("{INDENT}move.l {register},a0"));
            } else if let Some(offset) = stack_param_offset(ctx, name) {
                self.emit(format!("{INDENT}move.l {offset}({}),a0", ctx.frame_reg));
            }
        }
        self.emit(format!("{INDENT}move{suffix} d0,(a0)"));
    }

    fn emit_member_assign(&mut self, base: &Expr, field: &str, expr: &Expr, ctx: &ProcCtx<'_>) {
        match base {
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let rhs = self.emit_expr(expr, ctx, "d0", "d2", None);
                self.emit_indented(rhs);
                let pointer = self.emit_expr(operand, ctx, "a0", "d1", None);
                let needs_fixup = pointer.last().is_some_and(|line| !line.contains("a0"));
                self.emit_indented(pointer);
                if needs_fixup {
                    self.emit(format!("{INDENT}move.l d0,a0"));
                }
                let Some((offset, fsuffix)) = self.pointee_field(operand, ctx, field) else {
                    self.emit(format!("{INDENT}; unknown field {field} in dereferenced struct"));
                    return;
                };
                let dot = size_suffix(fsuffix.bytes());
                if offset == 0 {
                    self.emit(format!("{INDENT}move{dot} d0,(a0)"));
                } else {
                    self.emit(format!("{INDENT}move{dot} d0,{offset}(a0)"));
                }
            }
            Expr::Var(name) => {
                let finfo = self.struct_info.get(name).and_then(|s| s.fields.get(field)).copied();
                let Some(finfo) = finfo else {
                    self.emit(format!("{INDENT}; unknown struct member {name}.{field}"));
                    return;
                };
                let dot = size_suffix(finfo.suffix.bytes());
                let rhs = self.emit_expr(expr, ctx, "d0", "d2", None);
                self.emit_indented(rhs);
                self.emit(format!("{INDENT}move{dot} d0,{name}_{field}"));
            }
            Expr::Array { name, indices } => {
                let info = self
                    .struct_info
                    .get(name)
                    .and_then(|s| s.fields.get(field).copied().map(|f| (i64::from(s.size), f)));
                let Some((stride, finfo)) = info else {
                    self.emit(format!("{INDENT}; unknown struct array/member {name}.{field}"));
                    return;
                };
                self.emit(format!("{INDENT}lea {name},a0"));
                let index_code = self.emit_expr(&indices[0], ctx, "d1", "d2", Some("int"));
                self.emit_indented(index_code);
                let mut scaled = Vec::new();
                super::expr::push_scale(&mut scaled, "d1", stride);
                self.emit_indented(scaled);
                if finfo.offset > 0 {
                    self.emit(add_immediate(INDENT, "d1", i64::from(finfo.offset)));
                }
                let rhs = self.emit_expr(expr, ctx, "d0", "d2", None);
                self.emit_indented(rhs);
                let dot = size_suffix(finfo.suffix.bytes());
                self.emit(format!("{INDENT}move{dot} d0,(a0,d1.l)"));
            }
            other => self.emit(format!("{INDENT}; unsupported member assign base: {other}")),
        }
    }

    fn emit_array_assign(&mut self, name: &str, indices: &[Expr], expr: &Expr, ctx: &ProcCtx<'_>) {
        self.emit(format!("{INDENT}; {name}[...] = {expr}"));
        let info = self.array_dims.get(name).cloned();
        let elem = info.as_ref().map_or(crate::ast::Suffix::L, |i| i.elem);
        let shift = elem.bytes().trailing_zeros();
        let suffix = size_suffix(elem.bytes());

        match indices {
            [index] => {
                self.emit(format!("{INDENT}lea {name},a0"));
                let index_code = self.emit_expr(index, ctx, "d1", "d2", Some("int"));
                self.emit_indented(index_code);
                if shift > 0 {
                    self.emit(format!("{INDENT}lsl.l #{shift},d1"));
                }
                let rhs = self.emit_expr(expr, ctx, "d0", "d2", None);
                self.emit_indented(rhs);
                self.emit(format!("{INDENT}move{suffix} d0,(a0,d1.l)"));
            }
            [row, col] => {
                self.emit(format!("{INDENT}lea {name},a0"));
                let row_code = self.emit_expr(row, ctx, "d1", "d2", Some("int"));
                self.emit_indented(row_code);
                self.emit(format!("{INDENT}move.l d1,d2  ; save row"));
                let col_code = self.emit_expr(col, ctx, "d1", "d3", Some("int"));
                self.emit_indented(col_code);
                match info.as_ref().and_then(|i| i.dims.get(1).copied()) {
                    Some(cols) => self.emit(format!("{INDENT}mulu.w #{cols},d2")),
                    None => {
                        self.emit(format!("{INDENT}; WARNING: unknown column count for {name}"));
                        self.emit(format!("{INDENT}mulu.w #10,d2"));
                    }
                }
                self.emit(format!("{INDENT}add.l d1,d2"));
                if shift > 0 {
                    self.emit(format!("{INDENT}lsl.l #{shift},d2"));
                }
                let rhs = self.emit_expr(expr, ctx, "d0", "d3", None);
                self.emit_indented(rhs);
                self.emit(format!("{INDENT}move{suffix} d0,(a0,d2.l)"));
            }
            _ => self.emit(format!("{INDENT}; arrays with >2 dimensions not supported for stores")),
        }
    }

    fn emit_compound_assign(&mut self, target: &str, op: BinOp, expr: &Expr, ctx: &ProcCtx<'_>) {
        self.emit(format!("{INDENT}; {target} {op}= {expr}"));
        let Some(slot) = local_slot(ctx, target) else {
            self.emit(format!("{INDENT}; compound assign to unknown target {target}"));
            return;
        };
        let offset = slot.offset;
        let vtype = slot.vtype.clone();
        let suffix = size_suffix(type_size(&vtype).max(1));
        let frame = ctx.frame_reg;

        let rhs = self.emit_expr(expr, ctx, "d1", "d2", Some(&vtype));
        self.emit_indented(rhs);
        self.emit(format!("{INDENT}move{suffix} -{offset}({frame}),d0"));
        match op {
            BinOp::Add => self.emit(format!("{INDENT}add{suffix} d1,d0")),
            BinOp::Sub => self.emit(format!("{INDENT}sub{suffix} d1,d0")),
            BinOp::Mul => self.emit(format!("{INDENT}muls.w d1,d0")),
            BinOp::Div => self.emit(format!("{INDENT}divs.w d1,d0")),
            BinOp::Mod => {
                self.emit(format!("{INDENT}divs.w d1,d0"));
                self.emit(format!("{INDENT}swap d0  ; get remainder"));
                self.emit(format!("{INDENT}ext.l d0"));
            }
            BinOp::BitAnd => self.emit(format!("{INDENT}and{suffix} d1,d0")),
            BinOp::BitOr => self.emit(format!("{INDENT}or{suffix} d1,d0")),
            BinOp::BitXor => self.emit(format!("{INDENT}eor{suffix} d1,d0")),
            _ => self.emit(format!("{INDENT}; unsupported compound operator {op}=")),
        }
        self.emit(format!("{INDENT}move{suffix} d0,-{offset}({frame})"));
    }

    // ------------------------------------------------------------------
    // control flow
    // ------------------------------------------------------------------

    fn emit_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: Option<&[Stmt]>, ctx: &ProcCtx<'_>) {
        let end_label = self.next_label("endif");
        let else_label = if else_body.is_some() {
            self.next_label("else")
        } else {
            end_label.clone()
        };

        match self.emit_comparison_branch_inverted(cond, ctx, &else_label) {
            Some(code) => self.emit_indented(code),
            None => {
                let code = self.emit_expr(cond, ctx, "d0", "d1", None);
                self.emit_indented(code);
                self.emit(format!("{INDENT}tst.l d0"));
                self.emit(format!("{INDENT}beq {else_label}"));
            }
        }

        for stmt in then_body {
            self.emit_stmt(stmt, ctx);
        }

        if let Some(else_body) = else_body {
            self.emit(format!("{INDENT}bra {end_label}"));
            self.emit(format!("{else_label}:"));
            for stmt in else_body {
                self.emit_stmt(stmt, ctx);
            }
        }
        self.emit(format!("{end_label}:"));
    }

    fn emit_while(&mut self, cond: &Expr, body: &[Stmt], ctx: &ProcCtx<'_>) {
        let start_label = self.next_label("while");
        let end_label = self.next_label("endwhile");
        self.loop_stack.push((start_label.clone(), end_label.clone()));

        self.emit(format!("{start_label}:"));
        match self.emit_comparison_branch_inverted(cond, ctx, &end_label) {
            Some(code) => self.emit_indented(code),
            None => {
                let code = self.emit_expr(cond, ctx, "d0", "d1", None);
                self.emit_indented(code);
                self.emit(format!("{INDENT}tst.l d0"));
                self.emit(format!("{INDENT}beq {end_label}"));
            }
        }
        for stmt in body {
            self.emit_stmt(stmt, ctx);
        }
        self.emit(format!("{INDENT}bra {start_label}"));
        self.emit(format!("{end_label}:"));
        self.loop_stack.pop();
    }

    fn emit_do_while(&mut self, body: &[Stmt], cond: &Expr, ctx: &ProcCtx<'_>) {
        let start_label = self.next_label("dowhile");
        let continue_label = self.next_label("dowhilecont");
        let end_label = self.next_label("enddo");
        // continue re-tests the condition rather than re-entering the body
        self.loop_stack.push((continue_label.clone(), end_label.clone()));

        self.emit(format!("{start_label}:"));
        for stmt in body {
            self.emit_stmt(stmt, ctx);
        }
        self.emit(format!("{continue_label}:"));
        match self.emit_comparison_branch(cond, ctx, &start_label) {
            Some(code) => self.emit_indented(code),
            None => {
                let code = self.emit_expr(cond, ctx, "d0", "d1", None);
                self.emit_indented(code);
                self.emit(format!("{INDENT}tst.l d0"));
                self.emit(format!("{INDENT}bne {start_label}"));
            }
        }
        self.emit(format!("{end_label}:"));
        self.loop_stack.pop();
    }

    fn emit_for(&mut self, var: &str, start: &Expr, end: &Expr, step: &Expr, body: &[Stmt], ctx: &ProcCtx<'_>) {
        let start_label = self.next_label("for");
        let end_label = self.next_label("endfor");
        let continue_label = self.next_label("forcont");
        // continue jumps to the increment, not the comparison
        self.loop_stack.push((continue_label.clone(), end_label.clone()));

        let Some(slot) = local_slot(ctx, var) else {
            self.emit(format!("{INDENT}; ERROR: loop variable {var} not found"));
            self.loop_stack.pop();
            return;
        };
        let offset = slot.offset;
        let vtype = slot.vtype.clone();
        let suffix = size_suffix(type_size(&vtype).max(1));
        let frame = ctx.frame_reg;

        let init = self.emit_expr(start, ctx, "d0", "d1", Some(&vtype));
        self.emit_indented(init);
        self.emit(format!("{INDENT}move{suffix} d0,-{offset}({frame})"));

        self.emit(format!("{start_label}:"));
        self.emit(format!("{INDENT}move{suffix} -{offset}({frame}),d0"));
        let limit = self.emit_expr(end, ctx, "d1", "d2", Some(&vtype));
        self.emit_indented(limit);
        self.emit(format!("{INDENT}cmp{suffix} d1,d0"));
        self.emit(format!("{INDENT}bgt {end_label}"));

        for stmt in body {
            self.emit_stmt(stmt, ctx);
        }

        self.emit(format!("{continue_label}:"));
        let step_code = self.emit_expr(step, ctx, "d1", "d2", Some(&vtype));
        self.emit_indented(step_code);
        self.emit(format!("{INDENT}move{suffix} -{offset}({frame}),d0"));
        self.emit(format!("{INDENT}add{suffix} d1,d0"));
        self.emit(format!("{INDENT}move{suffix} d0,-{offset}({frame})"));
        self.emit(format!("{INDENT}bra {start_label}"));
        self.emit(format!("{end_label}:"));
        self.loop_stack.pop();
    }

    /// `repeat N` counts d7 down with `dbra`. The count is loaded minus
    /// one; `repeat 0` therefore wraps to -1 and runs the full 65,536
    /// iterations the 16-bit counter allows.
    fn emit_repeat(&mut self, count: &Expr, body: &[Stmt], ctx: &ProcCtx<'_>) {
        let start_label = self.next_label("repeat");
        let end_label = self.next_label("endrepeat");
        let continue_label = self.next_label("repeatcont");
        self.loop_stack.push((continue_label.clone(), end_label.clone()));

        let count_code = self.emit_expr(count, ctx, "d0", "d1", None);
        self.emit_indented(count_code);
        self.emit(format!("{INDENT}subq.l #1,d0"));
        self.emit(format!("{INDENT}move.l d0,d7"));

        self.emit(format!("{start_label}:"));
        for stmt in body {
            self.emit_stmt(stmt, ctx);
        }
        self.emit(format!("{continue_label}:"));
        self.emit(format!("{INDENT}dbra d7,{start_label}"));
        self.emit(format!("{end_label}:"));
        self.loop_stack.pop();
    }

    // ------------------------------------------------------------------
    // calls and macros
    // ------------------------------------------------------------------

    pub(crate) fn emit_call_stmt(&mut self, name: &str, args: &[Expr], ctx: &ProcCtx<'_>) {
        let callee = self.proc_sigs.get(name).cloned();
        let save_frame = ctx.frame_reg == "a6" && !ctx.locals.is_empty();
        if save_frame {
            self.emit(format!("{INDENT}move.l a6,-(a7)  ; save frame pointer"));
        }

        if let Some(params) = callee {
            let reg_params: Vec<(usize, String)> = params
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.register.clone().map(|r| (i, r)))
                .collect();
            let stack_params: Vec<usize> = params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.register.is_none())
                .map(|(i, _)| i)
                .collect();

            for (_, register) in &reg_params {
                self.emit(format!("{INDENT}move.l {register},-(a7)"));
            }
            for &index in stack_params.iter().rev() {
                if index < args.len() {
                    let code = self.emit_push_arg(&args[index], ctx);
                    self.emit_indented(code);
                }
            }
            for (index, register) in &reg_params {
                if *index < args.len() {
                    let ptype = params[*index].ptype.clone();
                    let code = self.emit_expr(&args[*index], ctx, register, "d1", Some(&ptype));
                    self.emit_indented(code);
                }
            }
            for param in &params {
                match &param.register {
                    Some(register) => {
                        self.emit(format!("{INDENT}; param {}: {} in {register}", param.name, param.ptype));
                    }
                    None => self.emit(format!("{INDENT}; param {}: {} on stack", param.name, param.ptype)),
                }
            }
            self.emit(format!("{INDENT}jsr {name}"));
            if !stack_params.is_empty() {
                self.emit(add_immediate(INDENT, "a7", 4 * stack_params.len() as i64));
            }
            for (_, register) in reg_params.iter().rev() {
                self.emit(format!("{INDENT}move.l (a7)+,{register}"));
            }
        } else {
            for arg in args.iter().rev() {
                let code = self.emit_push_arg(arg, ctx);
                self.emit_indented(code);
            }
            self.emit(format!("{INDENT}jsr {name}"));
            if !args.is_empty() {
                self.emit(add_immediate(INDENT, "a7", 4 * args.len() as i64));
            }
        }

        if save_frame {
            self.emit(format!("{INDENT}move.l (a7)+,a6  ; restore frame pointer"));
        }
    }

    /// A bare `name(args);` statement: macro first, then procedure or
    /// extern function, otherwise a diagnostic the validator already
    /// reported.
    fn emit_macro_call(&mut self, name: &str, args: &[Expr], ctx: &ProcCtx<'_>) {
        let expanded = self.macros.get(name).map(|def| expand_macro(def, args));
        if let Some(expanded) = expanded {
            for stmt in &expanded {
                self.emit_stmt(stmt, ctx);
            }
            return;
        }
        if self.proc_sigs.contains_key(name) || self.extern_funcs.contains(name) {
            self.emit_call_stmt(name, args, ctx);
            return;
        }
        self.emit(format!("{INDENT}; ERROR: undefined macro or function '{name}'"));
    }

    // ------------------------------------------------------------------
    // inline assembly
    // ------------------------------------------------------------------

    fn emit_asm(&mut self, content: &str, ctx: &ProcCtx<'_>) {
        let (substituted, notes) = self.substitute_asm_vars(content, ctx);
        for (name, replacement, kind) in &notes {
            self.emit(format!("{INDENT}; @{name} -> {replacement} ({kind})"));
        }
        for line in substituted.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                self.emit("");
            } else {
                self.emit(format!("{INDENT}{trimmed}"));
            }
        }
    }

    /// Replaces `@name` references with the operand for that symbol:
    /// a register parameter's register, a stack parameter's or local's
    /// frame offset, or a global/extern label. Unresolved names become
    /// visible `???name???` markers.
    fn substitute_asm_vars(
        &self,
        content: &str,
        ctx: &ProcCtx<'_>,
    ) -> (String, Vec<(String, String, &'static str)>) {
        let mut out = String::with_capacity(content.len());
        let mut notes = Vec::new();
        let mut last = 0;
        for caps in ASM_VAR_RE.captures_iter(content) {
            let whole = caps.get(0).expect("match range");
            let name = &caps[1];
            out.push_str(&content[last..whole.start()]);
            last = whole.end();

            let resolved: Option<(String, &'static str)> = if let Some(param) = param_of(ctx, name) {
                match &param.register {
                    Some(register) => Some((register.clone(), "register parameter")),
                    None => stack_param_offset(ctx, name)
                        .map(|offset| (format!("{offset}({})", ctx.frame_reg), "stack parameter")),
                }
            } else if let Some(slot) = local_slot(ctx, name) {
                Some((format!("-{}({})", slot.offset, ctx.frame_reg), "local variable"))
            } else if self.globals.contains_key(name) {
                Some((name.to_owned(), "global variable"))
            } else if self.extern_vars.contains(name) {
                Some((name.to_owned(), "external variable"))
            } else {
                None
            };

            match resolved {
                Some((replacement, kind)) => {
                    out.push_str(&replacement);
                    notes.push((name.to_owned(), replacement, kind));
                }
                None => {
                    out.push_str(&format!("???{name}???"));
                }
            }
        }
        out.push_str(&content[last..]);
        (out, notes)
    }

    // ------------------------------------------------------------------
    // compile-time splicing
    // ------------------------------------------------------------------

    /// Runs a `@python` block; generated statements are wrapped in a
    /// synthetic procedure shell, re-parsed and lowered in place. Failures
    /// surface as error comments, never as aborts.
    fn emit_python(&mut self, code: &str, ctx: &ProcCtx<'_>) {
        match script::run(code) {
            Ok(None) => {}
            Ok(Some(generated)) => {
                for chunk in generated {
                    let wrapper = format!("code gen:\n    proc temp() -> int {{\n        {chunk}\n    }}");
                    match parse(&wrapper, None) {
                        Ok(module) => self.splice_module(&module, ctx),
                        Err(error) => {
                            self.emit(format!("{INDENT}; ERROR parsing generated code: {error}"));
                        }
                    }
                }
            }
            Err(error) => self.emit(format!("{INDENT}; ERROR in @python execution: {error}")),
        }
    }

    /// Renders a `@template` statement and splices the procedure bodies of
    /// the rendered text.
    fn emit_template(&mut self, file: &str, context: &str, ctx: &ProcCtx<'_>) {
        match template::render(file, context) {
            Ok(rendered) => match parse(&rendered, None) {
                Ok(module) => self.splice_module(&module, ctx),
                Err(error) => self.emit(format!("{INDENT}; ERROR parsing rendered template: {error}")),
            },
            Err(error) => self.emit(format!("{INDENT}; ERROR in template rendering: {error}")),
        }
    }

    fn splice_module(&mut self, module: &Module, ctx: &ProcCtx<'_>) {
        for item in &module.items {
            if let Item::Code(section) = item {
                for code_item in &section.items {
                    if let CodeItem::Proc(proc) = code_item {
                        for stmt in &proc.body {
                            self.emit_stmt(stmt, ctx);
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// macro expansion
// ---------------------------------------------------------------------

/// Expands a macro body by deep copy, substituting each parameter name
/// with its argument expression. The definition itself is never mutated.
fn expand_macro(def: &MacroDef, args: &[Expr]) -> Vec<Stmt> {
    let mut substitutions: AHashMap<&str, &Expr> = AHashMap::new();
    for (param, arg) in def.params.iter().zip(args) {
        substitutions.insert(param.as_str(), arg);
    }
    def.body
        .iter()
        .map(|stmt| substitute_stmt(stmt.clone(), &substitutions))
        .collect()
}

fn substitute_stmt(stmt: Stmt, map: &AHashMap<&str, &Expr>) -> Stmt {
    match stmt {
        Stmt::Assign { target, expr } => Stmt::Assign {
            target: substitute_target(target, map),
            expr: substitute_expr(expr, map),
        },
        Stmt::CompoundAssign { target, op, expr } => {
            let target = match map.get(target.as_str()) {
                Some(Expr::Var(new_name)) => new_name.clone(),
                _ => target,
            };
            Stmt::CompoundAssign {
                target,
                op,
                expr: substitute_expr(expr, map),
            }
        }
        Stmt::VarDecl { name, vtype, init } => Stmt::VarDecl {
            name,
            vtype,
            init: init.map(|e| substitute_expr(e, map)),
        },
        Stmt::Return(expr) => Stmt::Return(expr.map(|e| substitute_expr(e, map))),
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => Stmt::If {
            cond: substitute_expr(cond, map),
            then_body: then_body.into_iter().map(|s| substitute_stmt(s, map)).collect(),
            else_body: else_body.map(|body| body.into_iter().map(|s| substitute_stmt(s, map)).collect()),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: substitute_expr(cond, map),
            body: body.into_iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::DoWhile { body, cond } => Stmt::DoWhile {
            body: body.into_iter().map(|s| substitute_stmt(s, map)).collect(),
            cond: substitute_expr(cond, map),
        },
        Stmt::For {
            var,
            start,
            end,
            step,
            body,
        } => Stmt::For {
            var,
            start: substitute_expr(start, map),
            end: substitute_expr(end, map),
            step: substitute_expr(step, map),
            body: body.into_iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::Repeat { count, body } => Stmt::Repeat {
            count: substitute_expr(count, map),
            body: body.into_iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::Expr(expr) => Stmt::Expr(substitute_expr(expr, map)),
        Stmt::Call { name, args } => Stmt::Call {
            name,
            args: args.into_iter().map(|a| substitute_expr(a, map)).collect(),
        },
        Stmt::MacroCall { name, args } => Stmt::MacroCall {
            name,
            args: args.into_iter().map(|a| substitute_expr(a, map)).collect(),
        },
        other => other,
    }
}

fn substitute_target(target: AssignTarget, map: &AHashMap<&str, &Expr>) -> AssignTarget {
    match target {
        AssignTarget::Var(name) => match map.get(name.as_str()) {
            Some(Expr::Var(new_name)) => AssignTarget::Var(new_name.clone()),
            _ => AssignTarget::Var(name),
        },
        AssignTarget::Deref(name) => match map.get(name.as_str()) {
            Some(Expr::Var(new_name)) => AssignTarget::Deref(new_name.clone()),
            _ => AssignTarget::Deref(name),
        },
        AssignTarget::Array { name, indices } => {
            let name = match map.get(name.as_str()) {
                Some(Expr::Var(new_name)) => new_name.clone(),
                _ => name,
            };
            AssignTarget::Array {
                name,
                indices: indices.into_iter().map(|i| substitute_expr(i, map)).collect(),
            }
        }
        AssignTarget::Member { base, field } => AssignTarget::Member {
            base: Box::new(substitute_expr(*base, map)),
            field,
        },
    }
}

fn substitute_expr(expr: Expr, map: &AHashMap<&str, &Expr>) -> Expr {
    match expr {
        Expr::Var(name) => match map.get(name.as_str()) {
            Some(replacement) => (*replacement).clone(),
            None => Expr::Var(name),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(substitute_expr(*left, map)),
            right: Box::new(substitute_expr(*right, map)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(substitute_expr(*operand, map)),
        },
        Expr::Call { name, args } => Expr::Call {
            name,
            args: args.into_iter().map(|a| substitute_expr(a, map)).collect(),
        },
        Expr::Array { name, indices } => {
            let name = match map.get(name.as_str()) {
                Some(Expr::Var(new_name)) => new_name.clone(),
                _ => name,
            };
            Expr::Array {
                name,
                indices: indices.into_iter().map(|i| substitute_expr(i, map)).collect(),
            }
        }
        Expr::Member { base, field } => Expr::Member {
            base: Box::new(substitute_expr(*base, map)),
            field,
        },
        Expr::SetReg { register, value } => Expr::SetReg {
            register,
            value: Box::new(substitute_expr(*value, map)),
        },
        Expr::PostInc(e) => Expr::PostInc(Box::new(substitute_expr(*e, map))),
        Expr::PostDec(e) => Expr::PostDec(Box::new(substitute_expr(*e, map))),
        Expr::PreInc(e) => Expr::PreInc(Box::new(substitute_expr(*e, map))),
        Expr::PreDec(e) => Expr::PreDec(Box::new(substitute_expr(*e, map))),
        other => other,
    }
}
