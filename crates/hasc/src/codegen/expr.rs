//! Expression lowering.
//!
//! Expressions evaluate into a preferred "left" data register (d0 by
//! default) with a "right" temporary (d1); when the right operand of a
//! binary operation is itself compound, the left value is parked on the
//! stack around its evaluation. Constant subtrees fold before any register
//! is spent, constant operands use the immediate instruction forms, and
//! comparisons that only feed a branch go through the dedicated branch
//! emitters at the bottom of this file instead of materializing a 0/1.

use crate::{
    ast::{BinOp, Expr, Param, UnaryOp, is_signed, size_suffix, type_size},
    fold::{fold_constant, power_of_two_shift},
};

use super::{CodeGen, LocalSlot, ProcCtx, add_immediate};

/// Finds a local slot (including mirrored register parameters).
pub(crate) fn local_slot<'c>(ctx: &'c ProcCtx<'_>, name: &str) -> Option<&'c LocalSlot> {
    ctx.locals.iter().find(|slot| slot.name == name)
}

pub(crate) fn param_of<'c>(ctx: &'c ProcCtx<'_>, name: &str) -> Option<&'c Param> {
    ctx.params.iter().find(|param| param.name == name)
}

/// Byte offset of a stack parameter from the frame pointer, after `link`.
pub(crate) fn stack_param_offset(ctx: &ProcCtx<'_>, name: &str) -> Option<i32> {
    let mut index = 0;
    for param in ctx.params {
        if param.register.is_none() {
            if param.name == name {
                return Some(8 + 4 * index);
            }
            index += 1;
        } else if param.name == name {
            return None;
        }
    }
    None
}

/// Unsigned comparison semantics apply when a declared local (or mirrored
/// register parameter) has an unsigned type. Globals carry no signedness
/// metadata, so they default to signed.
pub(crate) fn is_unsigned_operand(ctx: &ProcCtx<'_>, expr: &Expr) -> bool {
    if let Expr::Var(name) = expr {
        if let Some(slot) = local_slot(ctx, name) {
            return !is_signed(&slot.vtype);
        }
    }
    false
}

/// `s<cc>` mnemonic and its explanatory comment for a comparison.
fn set_mnemonic(op: BinOp, unsigned: bool) -> (&'static str, &'static str) {
    match (op, unsigned) {
        (BinOp::Eq, _) => ("seq", "set byte if equal"),
        (BinOp::Ne, _) => ("sne", "set byte if not equal"),
        (BinOp::Lt, false) => ("slt", "set byte if less"),
        (BinOp::Lt, true) => ("slo", "set byte if lower (unsigned)"),
        (BinOp::Le, false) => ("sle", "set byte if less or equal"),
        (BinOp::Le, true) => ("sls", "set byte if lower or same (unsigned)"),
        (BinOp::Gt, false) => ("sgt", "set byte if greater"),
        (BinOp::Gt, true) => ("shi", "set byte if higher (unsigned)"),
        (BinOp::Ge, false) => ("sge", "set byte if greater or equal"),
        (BinOp::Ge, true) => ("shs", "set byte if same or higher (unsigned)"),
        _ => unreachable!("set_mnemonic on non-comparison operator"),
    }
}

/// Branch taken when the comparison is true.
fn branch_true(op: BinOp, unsigned: bool) -> &'static str {
    match (op, unsigned) {
        (BinOp::Eq, _) => "beq",
        (BinOp::Ne, _) => "bne",
        (BinOp::Lt, false) => "blt",
        (BinOp::Lt, true) => "blo",
        (BinOp::Le, false) => "ble",
        (BinOp::Le, true) => "bls",
        (BinOp::Gt, false) => "bgt",
        (BinOp::Gt, true) => "bhi",
        (BinOp::Ge, false) => "bge",
        (BinOp::Ge, true) => "bhs",
        _ => unreachable!("branch_true on non-comparison operator"),
    }
}

/// Branch taken when the comparison is false (the inverse predicate).
fn branch_false(op: BinOp, unsigned: bool) -> &'static str {
    match (op, unsigned) {
        (BinOp::Eq, _) => "bne",
        (BinOp::Ne, _) => "beq",
        (BinOp::Lt, false) => "bge",
        (BinOp::Lt, true) => "bhs",
        (BinOp::Le, false) => "bgt",
        (BinOp::Le, true) => "bhi",
        (BinOp::Gt, false) => "ble",
        (BinOp::Gt, true) => "bls",
        (BinOp::Ge, false) => "blt",
        (BinOp::Ge, true) => "blo",
        _ => unreachable!("branch_false on non-comparison operator"),
    }
}

fn push_set_cc(code: &mut Vec<String>, op: BinOp, unsigned: bool, reg: &str) {
    let (mnemonic, note) = set_mnemonic(op, unsigned);
    code.push(format!("    {mnemonic} {reg}  ; {note}"));
    code.push(format!("    andi.l #$FF,{reg}"));
    code.push(format!("    neg.b {reg}  ; convert FF to 01"));
}

/// Immediate shifts are limited to 1-8 on the 68000, so larger counts
/// split into chunks. A zero amount emits nothing.
fn push_shift_chunks(code: &mut Vec<String>, mnemonic: &str, reg: &str, amount: u32, note: Option<&str>) {
    if amount == 0 {
        return;
    }
    if amount <= 8 {
        match note {
            Some(note) => code.push(format!("    {mnemonic} #{amount},{reg}  ; {note}")),
            None => code.push(format!("    {mnemonic} #{amount},{reg}")),
        }
        return;
    }
    let mut left = amount;
    while left >= 8 {
        code.push(format!("    {mnemonic} #8,{reg}"));
        left -= 8;
    }
    if left > 0 {
        code.push(format!("    {mnemonic} #{left},{reg}"));
    }
}

/// Scales an index register by a constant stride: a shift when the stride
/// is a power of two, `mulu.w` when it fits, and a shift-add decomposition
/// through d2/d3 otherwise.
pub(crate) fn push_scale(code: &mut Vec<String>, reg: &str, stride: i64) {
    if let Some(shift) = power_of_two_shift(stride) {
        push_shift_chunks(code, "lsl.l", reg, shift, None);
        return;
    }
    if stride <= 32767 {
        code.push(format!("    mulu.w #{stride},{reg}"));
        return;
    }
    code.push(format!("    move.l {reg},d2"));
    code.push(format!("    clr.l {reg}"));
    let mut bit = 0u32;
    let mut rest = stride;
    while rest != 0 {
        if rest & 1 == 1 {
            if bit == 0 {
                code.push(format!("    add.l d2,{reg}"));
            } else {
                code.push("    move.l d2,d3".to_owned());
                push_shift_chunks(code, "lsl.l", "d3", bit, None);
                code.push(format!("    add.l d3,{reg}"));
            }
        }
        bit += 1;
        rest >>= 1;
    }
}

impl CodeGen<'_> {
    /// Evaluates `expr` into `reg_left`, using `reg_right` as the scratch
    /// register for right-hand operands.
    pub(crate) fn emit_expr(
        &mut self,
        expr: &Expr,
        ctx: &ProcCtx<'_>,
        reg_left: &str,
        reg_right: &str,
        target_type: Option<&str>,
    ) -> Vec<String> {
        match expr {
            Expr::Number(value) => vec![format!("    move.l #{value},{reg_left}")],
            Expr::Var(name) => self.var_read(name, ctx, reg_left),
            Expr::Array { name, indices } => self.array_read(name, indices, ctx, reg_left),
            Expr::Member { base, field } => self.member_read(base, field, ctx, reg_left),
            Expr::Binary { op, left, right } => {
                if let Some(value) = fold_constant(expr, &self.constants) {
                    return vec![format!("    move.l #{value},{reg_left}")];
                }
                self.binary_expr(*op, left, right, ctx, reg_left, reg_right, target_type)
            }
            Expr::Unary { op, operand } => self.unary_expr(*op, operand, ctx, reg_left),
            Expr::PostInc(operand) => self.incdec(operand, ctx, reg_left, false, true),
            Expr::PostDec(operand) => self.incdec(operand, ctx, reg_left, false, false),
            Expr::PreInc(operand) => self.incdec(operand, ctx, reg_left, true, true),
            Expr::PreDec(operand) => self.incdec(operand, ctx, reg_left, true, false),
            Expr::Call { name, args } => self.call_expr(name, args, ctx, reg_left),
            Expr::GetReg(register) => {
                if register == reg_left {
                    Vec::new()
                } else {
                    vec![format!("    move.l {register},{reg_left}")]
                }
            }
            Expr::SetReg { register, value } => {
                let temp = if reg_left == "d1" { "d2" } else { "d1" };
                let mut code = self.emit_expr(value, ctx, temp, "d2", None);
                if temp != register {
                    code.push(format!("    move.l {temp},{register}"));
                }
                if reg_left != register {
                    code.push(format!("    move.l {register},{reg_left}"));
                }
                code
            }
        }
    }

    fn var_read(&mut self, name: &str, ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        if let Some(value) = self.constant_value(name) {
            return vec![format!("    move.l #{value},{reg_left}")];
        }

        if let Some(slot) = local_slot(ctx, name) {
            let size = type_size(&slot.vtype).max(1);
            let frame = ctx.frame_reg;
            let offset = slot.offset;
            // ext/andi are data-register operations; moves into an address
            // register sign-extend on their own
            let address_dest = reg_left.starts_with('a');
            let mut code = Vec::new();
            match size {
                1 => {
                    code.push(format!("    move.b -{offset}({frame}),{reg_left}"));
                    if !address_dest {
                        if is_signed(&slot.vtype) {
                            code.push(format!("    ext.w {reg_left}"));
                            code.push(format!("    ext.l {reg_left}"));
                        } else {
                            code.push(format!("    andi.l #$FF,{reg_left}"));
                        }
                    }
                }
                2 => {
                    code.push(format!("    move.w -{offset}({frame}),{reg_left}"));
                    if !address_dest {
                        if is_signed(&slot.vtype) {
                            code.push(format!("    ext.l {reg_left}"));
                        } else {
                            code.push(format!("    andi.l #$FFFF,{reg_left}"));
                        }
                    }
                }
                _ => code.push(format!("    move.l -{offset}({frame}),{reg_left}")),
            }
            return code;
        }

        if let Some(param) = param_of(ctx, name) {
            if let Some(register) = &param.register {
                // only address-register parameters stay live in their
                // register; data registers are mirrored into locals above
                return if register == reg_left {
                    Vec::new()
                } else {
                    vec![format!("    move.l {register},{reg_left}")]
                };
            }
            if let Some(offset) = stack_param_offset(ctx, name) {
                return vec![format!("    move.l {offset}({}),{reg_left}", ctx.frame_reg)];
            }
        }

        if let Some(suffix) = self.globals.get(name).copied() {
            return match suffix.bytes() {
                1 => vec![
                    format!("    move.b {name},{reg_left}"),
                    format!("    andi.l #$FF,{reg_left}"),
                ],
                2 => vec![
                    format!("    move.w {name},{reg_left}"),
                    format!("    andi.l #$FFFF,{reg_left}"),
                ],
                _ => vec![format!("    move.l {name},{reg_left}")],
            };
        }

        if self.extern_vars.contains(name) {
            return vec![format!("    move.l {name},{reg_left}")];
        }

        vec![
            format!("    ; unknown var {name}"),
            format!("    move.l #0,{reg_left}"),
        ]
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the emit_expr contract")]
    fn binary_expr(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        ctx: &ProcCtx<'_>,
        reg_left: &str,
        reg_right: &str,
        target_type: Option<&str>,
    ) -> Vec<String> {
        let mut code = Vec::new();

        // a constant left operand of a comparison becomes an immediate
        // compare against the right side, with the predicate swapped
        if let Expr::Number(constant) = left {
            if op.is_comparison() {
                code.extend(self.emit_expr(right, ctx, reg_left, reg_right, target_type));
                code.push(format!("    cmp.l #{constant},{reg_left}"));
                let unsigned = is_unsigned_operand(ctx, right);
                push_set_cc(&mut code, op.swapped(), unsigned, reg_left);
                return code;
            }
        }

        code.extend(self.emit_expr(left, ctx, reg_left, reg_right, target_type));

        if let Expr::Number(imm) = right {
            let imm = *imm;
            match op {
                BinOp::Add => {
                    // adding zero is a no-op; addq cannot encode it anyway
                    if (1..=7).contains(&imm) {
                        code.push(format!("    addq.l #{imm},{reg_left}"));
                    } else if imm != 0 {
                        code.push(format!("    add.l #{imm},{reg_left}"));
                    }
                    return code;
                }
                BinOp::Sub => {
                    if (1..=7).contains(&imm) {
                        code.push(format!("    subq.l #{imm},{reg_left}"));
                    } else if imm != 0 {
                        code.push(format!("    sub.l #{imm},{reg_left}"));
                    }
                    return code;
                }
                BinOp::BitAnd => {
                    code.push(format!("    andi.l #{imm},{reg_left}"));
                    return code;
                }
                BinOp::BitOr => {
                    code.push(format!("    ori.l #{imm},{reg_left}"));
                    return code;
                }
                BinOp::BitXor => {
                    code.push(format!("    eori.l #{imm},{reg_left}"));
                    return code;
                }
                BinOp::Shl => {
                    push_shift_chunks(&mut code, "lsl.l", reg_left, imm.clamp(0, 32) as u32, None);
                    return code;
                }
                BinOp::Shr => {
                    push_shift_chunks(&mut code, "asr.l", reg_left, imm.clamp(0, 32) as u32, None);
                    return code;
                }
                _ => {}
            }
        }

        // power-of-two divisors never touch divs.w
        if op == BinOp::Div {
            if let Some(divisor) = fold_constant(right, &self.constants) {
                if let Some(shift) = power_of_two_shift(divisor) {
                    let note = format!("divide by {divisor}");
                    push_shift_chunks(&mut code, "asr.l", reg_left, shift, Some(note.as_str()));
                    return code;
                }
            }
        }

        let right_is_complex = matches!(
            right,
            Expr::Binary { .. } | Expr::Unary { .. } | Expr::Call { .. } | Expr::Array { .. }
        );
        if right_is_complex {
            code.push(format!("    move.l {reg_left},-(a7)  ; preserve left operand"));
        }
        // the nested temporary must differ from reg_right or both operands
        // of a compound right side would land in the same register
        let temp_right = if reg_right == "d2" { "d1" } else { "d2" };
        code.extend(self.emit_expr(right, ctx, reg_right, temp_right, target_type));
        if right_is_complex {
            code.push(format!("    move.l (a7)+,{reg_left}  ; restore left operand"));
        }

        match op {
            BinOp::Add => code.push(format!("    add.l {reg_right},{reg_left}")),
            BinOp::Sub => code.push(format!("    sub.l {reg_right},{reg_left}")),
            BinOp::Mul => {
                // signed 16x16 -> 32 multiply; operands are assumed to fit
                // in 16 bits
                code.push(format!("    muls.w {reg_right},{reg_left}"));
            }
            BinOp::Div => code.push(format!("    divs.w {reg_right},{reg_left}")),
            BinOp::Mod => {
                code.push(format!("    divs.w {reg_right},{reg_left}"));
                code.push(format!("    swap {reg_left}  ; get remainder"));
                code.push(format!("    ext.l {reg_left}  ; sign-extend"));
            }
            BinOp::BitAnd => code.push(format!("    and.l {reg_right},{reg_left}")),
            BinOp::BitOr => code.push(format!("    or.l {reg_right},{reg_left}")),
            BinOp::BitXor => code.push(format!("    eor.l {reg_right},{reg_left}")),
            BinOp::Shl => code.push(format!("    lsl.l {reg_right},{reg_left}")),
            BinOp::Shr => code.push(format!("    asr.l {reg_right},{reg_left}")),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                code.push(format!("    cmp.l {reg_right},{reg_left}"));
                let unsigned = is_unsigned_operand(ctx, left) || is_unsigned_operand(ctx, right);
                push_set_cc(&mut code, op, unsigned, reg_left);
            }
            BinOp::LogicalAnd => {
                let n = self.bump_counter();
                code.push(format!("    tst.l {reg_left}"));
                code.push(format!("    beq.s .and_false_{n}"));
                code.push(format!("    tst.l {reg_right}"));
                code.push(format!("    beq.s .and_false_{n}"));
                code.push(format!("    move.l #1,{reg_left}"));
                code.push(format!("    bra.s .and_done_{n}"));
                code.push(format!(".and_false_{n}:"));
                code.push(format!("    move.l #0,{reg_left}"));
                code.push(format!(".and_done_{n}:"));
            }
            BinOp::LogicalOr => {
                let n = self.bump_counter();
                code.push(format!("    tst.l {reg_left}"));
                code.push(format!("    bne.s .or_true_{n}"));
                code.push(format!("    tst.l {reg_right}"));
                code.push(format!("    bne.s .or_true_{n}"));
                code.push(format!("    move.l #0,{reg_left}"));
                code.push(format!("    bra.s .or_done_{n}"));
                code.push(format!(".or_true_{n}:"));
                code.push(format!("    move.l #1,{reg_left}"));
                code.push(format!(".or_done_{n}:"));
            }
        }
        code
    }

    fn array_read(&mut self, name: &str, indices: &[Expr], ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        let mut code = Vec::new();
        if local_slot(ctx, name).is_some() {
            code.push(format!("    ; local arrays not yet supported: {name}"));
            code.push(format!("    move.l #0,{reg_left}"));
            return code;
        }

        let info = self.array_dims.get(name).cloned();
        let elem = info.as_ref().map_or(crate::ast::Suffix::L, |i| i.elem);
        let elem_bytes = i64::from(elem.bytes());
        let shift = elem_bytes.trailing_zeros();
        let suffix = size_suffix(elem.bytes());

        match indices {
            [Expr::Number(index)] => {
                let offset = index * elem_bytes;
                if offset == 0 {
                    code.push(format!("    move{suffix} {name},{reg_left}"));
                } else {
                    code.push(format!("    move{suffix} {name}+{offset},{reg_left}"));
                }
            }
            [index] => {
                code.push(format!("    lea {name},a0"));
                code.extend(self.emit_expr(index, ctx, "d1", "d2", Some("int")));
                if shift > 0 {
                    code.push(format!("    lsl.l #{shift},d1  ; multiply index by {elem_bytes}"));
                }
                code.push(format!("    move{suffix} (a0,d1.l),{reg_left}"));
            }
            [Expr::Number(row), Expr::Number(col)] => {
                let cols = info.as_ref().and_then(|i| i.dims.get(1).copied());
                let cols = cols.unwrap_or_else(|| {
                    code.push(format!("    ; WARNING: could not determine column count for {name}"));
                    10
                });
                let offset = (row * cols + col) * elem_bytes;
                if offset == 0 {
                    code.push(format!("    move{suffix} {name},{reg_left}"));
                } else {
                    code.push(format!("    move{suffix} {name}+{offset},{reg_left}"));
                }
            }
            [row, col] => {
                code.push(format!("    ; 2D array access: {name}"));
                code.extend(self.emit_expr(row, ctx, "d1", "d2", Some("int")));
                code.push("    move.l d1,d2  ; save row".to_owned());
                code.extend(self.emit_expr(col, ctx, "d1", "a0", Some("int")));
                match info.as_ref().and_then(|i| i.dims.get(1).copied()) {
                    Some(cols) => code.push(format!("    mulu.w #{cols},d2  ; row * col_count")),
                    None => {
                        code.push(format!("    ; WARNING: could not determine column count for {name}"));
                        code.push("    mulu.w #10,d2  ; placeholder col_count".to_owned());
                    }
                }
                code.push("    add.l d1,d2   ; + col".to_owned());
                if shift > 0 {
                    code.push(format!("    lsl.l #{shift},d2   ; * {elem_bytes} (element size)"));
                }
                code.push(format!("    lea {name},a0"));
                code.push(format!("    move{suffix} (a0,d2.l),{reg_left}"));
            }
            _ => {
                code.push("    ; arrays with >2 dimensions not supported".to_owned());
                code.push(format!("    move.l #0,{reg_left}"));
            }
        }
        code
    }

    /// Reads `base.field` where the base is a struct variable, a struct
    /// array element, or a dereferenced struct pointer.
    fn member_read(&mut self, base: &Expr, field: &str, ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        let mut code = Vec::new();
        match base {
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                code.extend(self.emit_expr(operand, ctx, "a0", "d0", None));
                if code.last().is_some_and(|line| !line.contains("a0")) {
                    code.push("    move.l d0,a0".to_owned());
                }
                let Some((offset, suffix)) = self.pointee_field(operand, ctx, field) else {
                    code.push(format!("    ; unknown field {field} in dereferenced struct"));
                    code.push(format!("    move.l #0,{reg_left}"));
                    return code;
                };
                let dot = size_suffix(suffix.bytes());
                if suffix.bytes() < 4 {
                    code.push(format!("    clr.l {reg_left}"));
                }
                if offset == 0 {
                    code.push(format!("    move{dot} (a0),{reg_left}"));
                } else {
                    code.push(format!("    move{dot} {offset}(a0),{reg_left}"));
                }
            }
            Expr::Var(name) => {
                let Some(finfo) = self.field_info(name, field) else {
                    code.push(format!("    ; unknown struct member {name}.{field}"));
                    code.push(format!("    move.l #0,{reg_left}"));
                    return code;
                };
                let dot = size_suffix(finfo.suffix.bytes());
                if finfo.suffix.bytes() < 4 {
                    code.push(format!("    clr.l {reg_left}"));
                }
                // the validator emitted `name_field equ name+offset`
                code.push(format!("    move{dot} {name}_{field},{reg_left}"));
            }
            Expr::Array { name, indices } => {
                let Some((stride, finfo)) = self.struct_array_field(name, field) else {
                    code.push(format!("    ; unknown struct array/member {name}.{field}"));
                    code.push(format!("    move.l #0,{reg_left}"));
                    return code;
                };
                code.push(format!("    lea {name},a0"));
                if indices.len() != 1 {
                    code.push(format!("    ; WARNING: only 1D array-of-struct supported for {name}"));
                }
                code.extend(self.emit_expr(&indices[0], ctx, "d1", "d2", Some("int")));
                push_scale(&mut code, "d1", stride);
                if finfo.offset > 0 {
                    code.push(add_immediate("    ", "d1", i64::from(finfo.offset)));
                }
                let dot = size_suffix(finfo.suffix.bytes());
                if finfo.suffix.bytes() < 4 {
                    if reg_left == "d1" {
                        // the index occupies d1; load first, then extend
                        code.push(format!("    move{dot} (a0,d1.l),d1"));
                        if finfo.suffix.bytes() == 1 {
                            code.push("    and.l #$FF,d1".to_owned());
                        } else {
                            code.push("    and.l #$FFFF,d1".to_owned());
                        }
                    } else {
                        code.push(format!("    clr.l {reg_left}"));
                        code.push(format!("    move{dot} (a0,d1.l),{reg_left}"));
                    }
                } else {
                    code.push(format!("    move{dot} (a0,d1.l),{reg_left}"));
                }
            }
            other => {
                code.push(format!("    ; unsupported member access base: {other}"));
                code.push(format!("    move.l #0,{reg_left}"));
            }
        }
        code
    }

    /// Field lookup for a direct struct variable.
    fn field_info(&self, name: &str, field: &str) -> Option<super::FieldInfo> {
        self.struct_info.get(name).and_then(|info| info.fields.get(field)).copied()
    }

    /// Stride and field lookup for a struct array.
    fn struct_array_field(&self, name: &str, field: &str) -> Option<(i64, super::FieldInfo)> {
        let info = self.struct_info.get(name)?;
        let finfo = info.fields.get(field).copied()?;
        Some((i64::from(info.size), finfo))
    }

    /// Infers the struct type behind a pointer expression: first from a
    /// declared `Type*` local, then by matching the variable name against
    /// known struct names.
    pub(crate) fn pointee_field(
        &self,
        operand: &Expr,
        ctx: &ProcCtx<'_>,
        field: &str,
    ) -> Option<(u32, crate::ast::Suffix)> {
        let struct_name = self.infer_struct_type(operand, ctx)?;
        let info = self.struct_info.get(&struct_name)?;
        let finfo = info.fields.get(field)?;
        Some((finfo.offset, finfo.suffix))
    }

    fn infer_struct_type(&self, operand: &Expr, ctx: &ProcCtx<'_>) -> Option<String> {
        let Expr::Var(var_name) = operand else { return None };
        if let Some(slot) = local_slot(ctx, var_name) {
            if let Some(base) = slot.vtype.strip_suffix('*') {
                if self.struct_info.contains_key(base) {
                    return Some(base.to_owned());
                }
            }
        }
        if let Some(param) = param_of(ctx, var_name) {
            if let Some(base) = param.ptype.strip_suffix('*') {
                if self.struct_info.contains_key(base) {
                    return Some(base.to_owned());
                }
            }
        }
        for name in self.struct_info.keys() {
            let lower = name.to_lowercase();
            if var_name.starts_with(&lower) || var_name.ends_with(&format!("_{lower}")) {
                return Some(name.clone());
            }
        }
        None
    }

    fn unary_expr(&mut self, op: UnaryOp, operand: &Expr, ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        match op {
            UnaryOp::AddrOf => self.address_of(operand, ctx, reg_left),
            UnaryOp::Deref => {
                let addr_reg = if reg_left == "a0" { "a1" } else { "a0" };
                let mut code = self.emit_expr(operand, ctx, addr_reg, "d1", None);
                code.push(format!("    move.l ({addr_reg}),{reg_left}"));
                code
            }
            UnaryOp::Not | UnaryOp::BitNot => {
                let mut code = self.emit_expr(operand, ctx, reg_left, "d1", None);
                code.push(format!("    not.l {reg_left}"));
                code
            }
            UnaryOp::Neg => {
                let mut code = self.emit_expr(operand, ctx, reg_left, "d1", None);
                code.push(format!("    neg.l {reg_left}"));
                code
            }
        }
    }

    fn address_of(&mut self, operand: &Expr, ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        let mut code = Vec::new();
        match operand {
            Expr::Array { name, indices } => {
                let stride = if let Some(info) = self.struct_info.get(name) {
                    i64::from(info.size)
                } else if let Some(info) = self.array_dims.get(name) {
                    i64::from(info.elem.bytes())
                } else {
                    4
                };
                match indices.as_slice() {
                    [index] => {
                        code.push(format!("    lea {name},a0"));
                        code.extend(self.emit_expr(index, ctx, "d1", "d2", Some("int")));
                        push_scale(&mut code, "d1", stride);
                        code.push("    add.l d1,a0".to_owned());
                        code.push(format!("    move.l a0,{reg_left}"));
                    }
                    [row, col] => {
                        code.push(format!("    lea {name},a0"));
                        code.extend(self.emit_expr(row, ctx, "d1", "d2", Some("int")));
                        code.push("    move.l d1,d2".to_owned());
                        code.extend(self.emit_expr(col, ctx, "d1", "a1", Some("int")));
                        let cols = self.array_dims.get(name).and_then(|i| i.dims.get(1).copied());
                        code.push(format!("    mulu.w #{},d2", cols.unwrap_or(10)));
                        code.push("    add.l d1,d2".to_owned());
                        if let Some(shift) = power_of_two_shift(stride) {
                            push_shift_chunks(&mut code, "lsl.l", "d2", shift, None);
                        } else {
                            code.push(format!("    mulu.w #{stride},d2"));
                        }
                        code.push("    add.l d2,a0".to_owned());
                        code.push(format!("    move.l a0,{reg_left}"));
                    }
                    _ => {
                        code.push("    ; arrays with >2 dimensions not supported".to_owned());
                        code.push(format!("    move.l #0,{reg_left}"));
                    }
                }
            }
            Expr::Var(name) => {
                if let Some(value) = self.constant_value(name) {
                    code.push(format!("    move.l #{value},{reg_left}"));
                    return code;
                }
                if let Some(slot) = local_slot(ctx, name) {
                    let offset = slot.offset;
                    let frame = ctx.frame_reg;
                    if reg_left.starts_with('d') {
                        code.push(format!("    lea -{offset}({frame}),a0"));
                        code.push(format!("    move.l a0,{reg_left}"));
                    } else {
                        code.push(format!("    lea -{offset}({frame}),{reg_left}"));
                    }
                    return code;
                }
                if let Some(param) = param_of(ctx, name) {
                    if let Some(register) = &param.register {
                        if register != reg_left {
                            code.push(format!("    move.l {register},{reg_left}"));
                        }
                        return code;
                    }
                    if let Some(offset) = stack_param_offset(ctx, name) {
                        let frame = ctx.frame_reg;
                        if reg_left.starts_with('d') {
                            code.push(format!("    lea {offset}({frame}),a0"));
                            code.push(format!("    move.l a0,{reg_left}"));
                        } else {
                            code.push(format!("    lea {offset}({frame}),{reg_left}"));
                        }
                        return code;
                    }
                }
                if self.globals.contains_key(name) || self.extern_vars.contains(name) {
                    if reg_left.starts_with('d') {
                        code.push(format!("    lea {name},a0"));
                        code.push(format!("    move.l a0,{reg_left}"));
                    } else {
                        code.push(format!("    lea {name},{reg_left}"));
                    }
                    return code;
                }
                code.push(format!("    ; WARNING: unresolved variable {name}"));
                code.push(format!("    move.l #0,{reg_left}"));
            }
            other => {
                code.push(format!("    ; cannot take address of expression: {other}"));
                code.push(format!("    move.l #0,{reg_left}"));
            }
        }
        code
    }

    /// Pre/post increment and decrement operate directly on the variable's
    /// home (frame slot or absolute address); only the result register
    /// differs between the four forms.
    fn incdec(&mut self, operand: &Expr, ctx: &ProcCtx<'_>, reg_left: &str, pre: bool, increment: bool) -> Vec<String> {
        let mut code = Vec::new();
        let Expr::Var(name) = operand else {
            return code;
        };
        let instr = if increment { "add" } else { "sub" };

        if let Some(slot) = local_slot(ctx, name) {
            let suffix = size_suffix(type_size(&slot.vtype).max(1));
            let place = format!("-{}({})", slot.offset, ctx.frame_reg);
            if pre {
                code.push(format!("    {instr}{suffix} #1,{place}"));
                code.push(format!("    move{suffix} {place},{reg_left}"));
            } else {
                code.push(format!("    move{suffix} {place},{reg_left}"));
                code.push(format!("    {instr}{suffix} #1,{place}"));
            }
            return code;
        }

        if let Some(gsuffix) = self.globals.get(name).copied() {
            let dot = size_suffix(gsuffix.bytes());
            let narrow = gsuffix.bytes() < 4;
            if pre {
                code.push(format!("    {instr}{dot} #1,{name}"));
                if narrow {
                    code.push(format!("    clr.l {reg_left}"));
                }
                code.push(format!("    move{dot} {name},{reg_left}"));
            } else {
                if narrow {
                    code.push(format!("    clr.l {reg_left}"));
                }
                code.push(format!("    move{dot} {name},{reg_left}"));
                code.push(format!("    {instr}{dot} #1,{name}"));
            }
            return code;
        }

        if self.extern_vars.contains(name) {
            if pre {
                code.push(format!("    {instr}.l #1,{name}"));
                code.push(format!("    move.l {name},{reg_left}"));
            } else {
                code.push(format!("    move.l {name},{reg_left}"));
                code.push(format!("    {instr}.l #1,{name}"));
            }
            return code;
        }

        let what = if increment { "incr" } else { "decr" };
        let when = if pre { "pre" } else { "post" };
        code.push(format!("    ; {when}-{what} unknown var {name}"));
        code.push(format!("    move.l #0,{reg_left}"));
        code
    }

    fn call_expr(&mut self, name: &str, args: &[Expr], ctx: &ProcCtx<'_>, reg_left: &str) -> Vec<String> {
        let callee = self.proc_sigs.get(name).cloned();
        let mut code = Vec::new();
        let needs_move = reg_left != "d0";

        // a6 frames lose the frame pointer to the callee's own link, so the
        // caller preserves it; a4/a3/a5 frames are callee-saved already
        let save_frame = ctx.frame_reg == "a6" && !ctx.locals.is_empty();
        if save_frame {
            code.push("    move.l a6,-(a7)  ; save frame pointer".to_owned());
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
                code.push(format!("    move.l {register},-(a7)"));
            }
            for &index in stack_params.iter().rev() {
                if index < args.len() {
                    code.extend(self.emit_push_arg(&args[index], ctx));
                }
            }
            for (index, register) in &reg_params {
                if *index < args.len() {
                    let ptype = params[*index].ptype.clone();
                    code.extend(self.emit_expr(&args[*index], ctx, register, "d1", Some(&ptype)));
                }
            }
            code.push(format!("    jsr {name}"));
            if !stack_params.is_empty() {
                code.push(add_immediate("    ", "a7", 4 * stack_params.len() as i64));
            }
            for (_, register) in reg_params.iter().rev() {
                code.push(format!("    move.l (a7)+,{register}"));
            }
        } else {
            // unknown signature: stack-only cdecl, arguments right to left
            for arg in args.iter().rev() {
                code.extend(self.emit_push_arg(arg, ctx));
            }
            code.push(format!("    jsr {name}"));
            if !args.is_empty() {
                code.push(add_immediate("    ", "a7", 4 * args.len() as i64));
            }
        }

        if save_frame {
            code.push("    move.l (a7)+,a6  ; restore frame pointer".to_owned());
        }
        if needs_move {
            code.push(format!("    move.l d0,{reg_left}"));
        }
        code
    }

    /// Pushes one call argument, avoiding a temporary register where the
    /// operand can reach the stack directly. Every slot is 4 bytes wide;
    /// narrow values are widened first so callee offsets stay aligned.
    pub(crate) fn emit_push_arg(&mut self, arg: &Expr, ctx: &ProcCtx<'_>) -> Vec<String> {
        let mut code = Vec::new();

        if let Expr::Number(value) = arg {
            code.push(format!("    move.l #{value},-(a7)"));
            return code;
        }

        if let Expr::Var(name) = arg {
            if let Some(slot) = local_slot(ctx, name) {
                let size = type_size(&slot.vtype).max(1);
                if size == 4 {
                    code.push(format!("    move.l -{}({}),-(a7)", slot.offset, ctx.frame_reg));
                } else {
                    code.extend(self.var_read(name, ctx, "d0"));
                    code.push("    move.l d0,-(a7)".to_owned());
                }
                return code;
            }
            if let Some(param) = param_of(ctx, name) {
                if let Some(register) = &param.register {
                    code.push(format!("    move.l {register},-(a7)"));
                    return code;
                }
                if let Some(offset) = stack_param_offset(ctx, name) {
                    code.push(format!("    move.l {offset}({}),-(a7)", ctx.frame_reg));
                    return code;
                }
            }
            if let Some(value) = self.constant_value(name) {
                code.push(format!("    move.l #{value},-(a7)"));
                return code;
            }
            if let Some(suffix) = self.globals.get(name).copied() {
                if suffix.bytes() < 4 {
                    code.push("    clr.l d0".to_owned());
                    code.push(format!("    move{} {name},d0", size_suffix(suffix.bytes())));
                    code.push("    move.l d0,-(a7)".to_owned());
                } else {
                    code.push(format!("    move.l {name},-(a7)"));
                }
                return code;
            }
            if self.extern_vars.contains(name) {
                code.push(format!("    move.l {name},-(a7)"));
                return code;
            }
            code.push(format!("    ; WARNING: unresolved variable {name}"));
            code.push("    move.l #0,-(a7)".to_owned());
            return code;
        }

        code.extend(self.emit_expr(arg, ctx, "d0", "d1", None));
        code.push("    move.l d0,-(a7)".to_owned());
        code
    }

    // ------------------------------------------------------------------
    // branch-form comparisons
    // ------------------------------------------------------------------

    /// Emits a condition that branches to `true_label` when it holds,
    /// without materializing a boolean. Returns `None` when the expression
    /// is not a branchable comparison and the caller must fall back to the
    /// generic evaluate-and-test sequence.
    pub(crate) fn emit_comparison_branch(
        &mut self,
        expr: &Expr,
        ctx: &ProcCtx<'_>,
        true_label: &str,
    ) -> Option<Vec<String>> {
        let Expr::Binary { op, left, right } = expr else {
            return None;
        };
        let op = *op;
        let mut code = Vec::new();

        if let Expr::Number(constant) = left.as_ref() {
            if op.is_comparison() {
                code.extend(self.emit_expr(right, ctx, "d0", "d1", None));
                code.push(format!("    cmp.l #{constant},d0"));
                let unsigned = is_unsigned_operand(ctx, right);
                code.push(format!("    {} {true_label}", branch_true(op.swapped(), unsigned)));
                return Some(code);
            }
        }

        code.extend(self.emit_expr(left, ctx, "d0", "d1", None));
        let right_imm = match right.as_ref() {
            Expr::Number(value) if op.is_comparison() => Some(*value),
            _ => None,
        };
        match right_imm {
            Some(value) => code.push(format!("    cmp.l #{value},d0")),
            None => code.extend(self.emit_expr(right, ctx, "d1", "d2", None)),
        }

        if op.is_comparison() {
            let unsigned = is_unsigned_operand(ctx, left) || is_unsigned_operand(ctx, right);
            if right_imm.is_none() {
                code.push("    cmp.l d1,d0".to_owned());
            }
            code.push(format!("    {} {true_label}", branch_true(op, unsigned)));
            return Some(code);
        }
        match op {
            BinOp::LogicalAnd => {
                let n = self.bump_counter();
                code.push("    tst.l d0".to_owned());
                code.push(format!("    beq .skip_and_{n}"));
                code.push("    tst.l d1".to_owned());
                code.push(format!("    beq .skip_and_{n}"));
                code.push(format!("    bra {true_label}"));
                code.push(format!(".skip_and_{n}:"));
                Some(code)
            }
            BinOp::LogicalOr => {
                code.push("    tst.l d0".to_owned());
                code.push(format!("    bne {true_label}"));
                code.push("    tst.l d1".to_owned());
                code.push(format!("    bne {true_label}"));
                Some(code)
            }
            _ => None,
        }
    }

    /// Emits a condition that branches to `false_label` when it does NOT
    /// hold — the shape `if`/`while` want. Signed or unsigned branch
    /// mnemonics are chosen from the operand types.
    pub(crate) fn emit_comparison_branch_inverted(
        &mut self,
        expr: &Expr,
        ctx: &ProcCtx<'_>,
        false_label: &str,
    ) -> Option<Vec<String>> {
        let Expr::Binary { op, left, right } = expr else {
            return None;
        };
        let op = *op;
        let mut code = Vec::new();

        if let Expr::Number(constant) = left.as_ref() {
            if op.is_comparison() {
                code.extend(self.emit_expr(right, ctx, "d0", "d1", None));
                code.push(format!("    cmp.l #{constant},d0"));
                let unsigned = is_unsigned_operand(ctx, right);
                code.push(format!("    {} {false_label}", branch_false(op.swapped(), unsigned)));
                return Some(code);
            }
        }

        code.extend(self.emit_expr(left, ctx, "d0", "d1", None));
        let right_imm = match right.as_ref() {
            Expr::Number(value) if op.is_comparison() => Some(*value),
            _ => None,
        };
        match right_imm {
            Some(value) => code.push(format!("    cmp.l #{value},d0")),
            None => code.extend(self.emit_expr(right, ctx, "d1", "d2", None)),
        }

        if op.is_comparison() {
            let unsigned = is_unsigned_operand(ctx, left) || is_unsigned_operand(ctx, right);
            if right_imm.is_none() {
                code.push("    cmp.l d1,d0".to_owned());
            }
            code.push(format!("    {} {false_label}", branch_false(op, unsigned)));
            return Some(code);
        }
        match op {
            BinOp::LogicalAnd => {
                code.push("    tst.l d0".to_owned());
                code.push(format!("    beq {false_label}"));
                code.push("    tst.l d1".to_owned());
                code.push(format!("    beq {false_label}"));
                Some(code)
            }
            BinOp::LogicalOr => {
                let n = self.bump_counter();
                code.push("    tst.l d0".to_owned());
                code.push(format!("    bne .or_skip_{n}"));
                code.push("    tst.l d1".to_owned());
                code.push(format!("    beq {false_label}"));
                code.push(format!(".or_skip_{n}:"));
                Some(code)
            }
            _ => None,
        }
    }
}
