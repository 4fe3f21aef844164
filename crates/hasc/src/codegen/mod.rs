//! Lowering of the validated AST to 68000 assembly text.
//!
//! `CodeGen` owns the mutable collector state of a compilation — the
//! append-only line buffer, the monotonic label counter, and the per
//! procedure PUSH/POP and loop-label stacks — plus the symbol tables built
//! once from the module (procedure signatures, constants, globals, struct
//! layouts, array shapes, externs, locked registers). Expression lowering
//! lives in [`expr`], statement lowering in [`stmt`].
//!
//! Frames: a procedure with locals prefers a frame register from
//! {a4, a3, a5} (skipping `#pragma lockreg` reservations) over a6. A non-a6
//! frame register costs 4 extra frame bytes to hold its saved value but
//! spares the caller-side a6 save around every call, because the platform
//! ABI keeps a2-a6 callee-saved. Locking all three candidates forces the
//! plain a6 frame.

mod expr;
mod stmt;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    ast::{
        CodeItem, CodeSection, DataItem, DataSection, Dim, ExternDecl, GlobalVar, Item, MacroDef, Module, Param,
        Proc, Stmt, StructVar, Suffix, size_suffix, struct_layout, type_size,
    },
    fold::resolve_dim,
    peephole,
    regalloc::RegisterAllocator,
};

pub(crate) const INDENT: &str = "    ";

/// Shape of a global array: resolved dimensions and element size.
#[derive(Debug, Clone)]
struct ArrayInfo {
    dims: Vec<i64>,
    elem: Suffix,
}

#[derive(Debug, Clone, Copy)]
struct FieldInfo {
    offset: u32,
    suffix: Suffix,
}

#[derive(Debug, Clone)]
struct StructInfo {
    size: u32,
    fields: IndexMap<String, FieldInfo>,
}

/// A local variable (or mirrored register parameter) and its frame slot.
///
/// Slots sit below the frame pointer; `offset` is the positive distance, so
/// the operand is `-offset(frame_reg)`.
#[derive(Debug, Clone)]
pub(crate) struct LocalSlot {
    pub name: String,
    pub vtype: String,
    pub offset: i32,
}

/// A data-register parameter mirrored to memory in the prologue.
#[derive(Debug, Clone)]
struct SavedParam {
    name: String,
    register: String,
    offset: i32,
    suffix: &'static str,
}

/// Per-procedure lowering context threaded through the emitters.
pub(crate) struct ProcCtx<'p> {
    pub params: &'p [Param],
    pub locals: Vec<LocalSlot>,
    pub frame_reg: &'static str,
    pub local_size: i32,
    pub is_void: bool,
    pub rettype: String,
}

/// The code generator for one module.
pub struct CodeGen<'m> {
    module: &'m Module,
    lines: Vec<String>,
    label_counter: u32,
    pub(crate) push_stack: Vec<SmallVec<[String; 4]>>,
    pub(crate) loop_stack: Vec<(String, String)>,
    proc_sigs: IndexMap<String, Vec<Param>>,
    array_dims: AHashMap<String, ArrayInfo>,
    macros: AHashMap<String, MacroDef>,
    constants: AHashMap<String, i64>,
    globals: AHashMap<String, Suffix>,
    /// Ordered so the pointer-type inference heuristic walks struct names
    /// deterministically.
    struct_info: IndexMap<String, StructInfo>,
    extern_vars: AHashSet<String>,
    extern_funcs: AHashSet<String>,
    locked_regs: AHashSet<String>,
    reg_alloc: RegisterAllocator,
}

impl<'m> CodeGen<'m> {
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        let locked_regs = build_locked_regs(module);
        let constants = build_constants(module);
        Self {
            lines: Vec::new(),
            label_counter: 0,
            push_stack: Vec::new(),
            loop_stack: Vec::new(),
            proc_sigs: build_proc_sigs(module),
            array_dims: build_array_dims(module, &constants),
            macros: build_macros(module),
            globals: build_globals(module),
            struct_info: build_struct_info(module),
            extern_vars: build_extern_vars(module),
            extern_funcs: build_extern_funcs(module),
            reg_alloc: RegisterAllocator::new(&locked_regs),
            locked_regs,
            constants,
            module,
        }
    }

    /// Lowers the whole module and runs the peephole optimizer.
    pub fn generate(mut self) -> String {
        self.emit("; generated by hasc");
        let module = self.module;

        let mut externs = Vec::new();
        let mut publics = Vec::new();
        for item in &module.items {
            match item {
                Item::Extern(decl) => externs.push(decl.name().to_owned()),
                Item::Public(decl) => publics.push(decl.name.clone()),
                Item::Code(section) => {
                    for code_item in &section.items {
                        match code_item {
                            CodeItem::Extern(decl) => externs.push(decl.name().to_owned()),
                            CodeItem::Public(decl) => publics.push(decl.name.clone()),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if !externs.is_empty() {
            self.emit("");
            for name in &externs {
                self.emit(format!("{INDENT}XREF {name}"));
            }
        }
        if !publics.is_empty() {
            self.emit("");
            for name in &publics {
                self.emit(format!("{INDENT}XDEF {name}"));
            }
        }

        for item in &module.items {
            match item {
                Item::Data(section) => self.emit_data_section(section),
                Item::Bss(section) => self.emit_bss_section(section),
                Item::Code(section) => self.emit_code_section(section),
                _ => {}
            }
        }

        let optimized = peephole::optimize(self.lines);
        let mut out = optimized.join("\n");
        out.push('\n');
        out
    }

    pub(crate) fn emit(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Emits expression code, indenting any line that is not already.
    pub(crate) fn emit_indented(&mut self, code: Vec<String>) {
        for line in code {
            if line.is_empty() || line.starts_with(INDENT) {
                self.emit(line);
            } else {
                self.emit(format!("{INDENT}{line}"));
            }
        }
    }

    /// Returns a fresh label; the counter is monotonic across the module so
    /// output is deterministic.
    pub(crate) fn next_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{prefix}{}", self.label_counter)
    }

    /// Claims the current counter value for expression-local labels
    /// (`.and_false_N` and friends).
    pub(crate) fn bump_counter(&mut self) -> u32 {
        let value = self.label_counter;
        self.label_counter += 1;
        value
    }

    pub(crate) fn constant_value(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    fn resolve_dim_value(&self, dim: &Dim) -> Option<i64> {
        resolve_dim(dim, &self.constants)
    }

    /// Picks the frame register: the first of a4, a3, a5 not locked by
    /// pragma, falling back to a6 when all three are reserved.
    fn choose_frame_register(&self) -> &'static str {
        for candidate in ["a4", "a3", "a5"] {
            if !self.locked_regs.contains(candidate) {
                return candidate;
            }
        }
        "a6"
    }

    // ------------------------------------------------------------------
    // data and bss emission
    // ------------------------------------------------------------------

    fn emit_data_section(&mut self, section: &DataSection) {
        self.emit("");
        let kind = if section.chip { "data_c" } else { "data" };
        self.emit(format!("{INDENT}SECTION {},{kind}", section.name));
        for item in &section.items {
            match item {
                DataItem::Const(_) => {}
                DataItem::Var(var) => self.emit_data_var(var),
                DataItem::Struct(var) => self.emit_struct_data(var),
            }
        }
    }

    fn emit_data_var(&mut self, var: &GlobalVar) {
        self.emit(format!("{INDENT}even"));
        self.emit(format!("{}:", var.name));
        let suffix = var.suffix.unwrap_or(Suffix::L);
        if let Some(dims) = &var.dims {
            if var.values.is_empty() {
                let count = self.dims_product(dims);
                self.emit(format!("{INDENT}ds.{} {count}  ; array", suffix.letter()));
            } else {
                let mut numbers = Vec::new();
                for value in &var.values {
                    match value {
                        crate::ast::DataValue::Num(n) => numbers.push(n.to_string()),
                        crate::ast::DataValue::Str(text) => {
                            if !numbers.is_empty() {
                                self.emit(format!("{INDENT}dc{} {}", suffix.dot(), numbers.join(",")));
                                numbers.clear();
                            }
                            self.emit(format!("{INDENT}dc.b \"{text}\""));
                        }
                    }
                }
                if !numbers.is_empty() {
                    self.emit(format!("{INDENT}dc{} {}", suffix.dot(), numbers.join(",")));
                }
            }
        } else {
            for value in &var.values {
                match value {
                    crate::ast::DataValue::Num(n) => {
                        self.emit(format!("{INDENT}dc{} {n}", suffix.dot()));
                    }
                    crate::ast::DataValue::Str(text) => {
                        if suffix != Suffix::B {
                            self.emit(format!("{INDENT}; WARNING: string literal with non-byte size, using dc.b"));
                        }
                        self.emit(format!("{INDENT}dc.b \"{text}\""));
                    }
                }
            }
        }
    }

    fn emit_struct_data(&mut self, var: &StructVar) {
        self.emit(format!("{INDENT}even"));
        self.emit(format!("{}:", var.name));
        let (size, layout) = struct_layout(&var.fields);
        let count = var.dims.as_ref().map_or(1, |dims| self.dims_product(dims)).max(1);
        if var.init_values.is_empty() {
            self.emit(format!("{INDENT}dcb.b {},0", i64::from(size) * count));
        } else {
            let mut values = var.init_values.iter();
            for _ in 0..count {
                let mut at = 0u32;
                for field in &layout {
                    if field.offset > at {
                        self.emit(format!("{INDENT}dcb.b {},0", field.offset - at));
                        at = field.offset;
                    }
                    let value = values.next().copied().unwrap_or(0);
                    self.emit(format!("{INDENT}dc.{} {value}", field.suffix.letter()));
                    at += field.suffix.bytes();
                }
                if at < size {
                    self.emit(format!("{INDENT}dcb.b {},0", size - at));
                }
            }
        }
        self.emit(format!("{INDENT}; struct {}: size={size}, count={count}", var.name));
        self.emit_struct_equates(var, size, &layout);
    }

    fn emit_struct_equates(&mut self, var: &StructVar, size: u32, layout: &[crate::ast::FieldLayout]) {
        self.emit(format!("{}__size equ {size}", var.name));
        if var.dims.is_some() {
            self.emit(format!("{}__stride equ {size}", var.name));
        }
        for field in layout {
            // field labels use an underscore: a dot would split the symbol
            // in vasm
            self.emit(format!("{}_{} equ {}+{}", var.name, field.name, var.name, field.offset));
        }
    }

    fn emit_bss_section(&mut self, section: &crate::ast::BssSection) {
        self.emit("");
        let kind = if section.chip { "bss_c" } else { "bss" };
        self.emit(format!("{INDENT}SECTION {},{kind}", section.name));
        for item in &section.items {
            match item {
                DataItem::Const(_) => {}
                DataItem::Struct(var) => {
                    let (size, layout) = struct_layout(&var.fields);
                    let count = var.dims.as_ref().map_or(1, |dims| self.dims_product(dims)).max(1);
                    self.emit(format!(
                        "{}: ds.b {}  ; struct size={size}, count={count}",
                        var.name,
                        i64::from(size) * count
                    ));
                    self.emit_struct_equates(var, size, &layout);
                }
                DataItem::Var(var) => self.emit_bss_var(var),
            }
        }
    }

    fn emit_bss_var(&mut self, var: &GlobalVar) {
        let suffix = var.suffix.unwrap_or(Suffix::L);
        if let Some(dims) = &var.dims {
            let count = self.dims_product(dims);
            let shape: Vec<String> = dims
                .iter()
                .map(|d| self.resolve_dim_value(d).map_or("?".to_owned(), |v| v.to_string()))
                .collect();
            self.emit(format!(
                "{}: ds.{} {count}  ; array [{}]",
                var.name,
                suffix.letter(),
                shape.join("][")
            ));
            return;
        }
        if let Some(count_dim) = &var.bss_count {
            let raw = self.resolve_dim_value(count_dim).unwrap_or(0);
            if var.suffix.is_some() {
                // explicit element suffix: the count is in elements
                self.emit(format!("{}: ds.{} {raw}  ; {raw} elements", var.name, suffix.letter()));
            } else {
                // bare byte count, allocated as longs
                let count = raw / i64::from(suffix.bytes());
                self.emit(format!("{}: ds.{} {count}  ; {raw} bytes", var.name, suffix.letter()));
            }
            return;
        }
        self.emit(format!("{}: ds.{} 1", var.name, suffix.letter()));
    }

    fn dims_product(&self, dims: &[Dim]) -> i64 {
        dims.iter()
            .map(|d| self.resolve_dim_value(d).unwrap_or(0))
            .product()
    }

    // ------------------------------------------------------------------
    // code emission
    // ------------------------------------------------------------------

    fn emit_code_section(&mut self, section: &CodeSection) {
        self.emit("");
        let kind = if section.chip { "code_c" } else { "code" };
        self.emit(format!("{INDENT}SECTION {},{kind}", section.name));
        for item in &section.items {
            match item {
                CodeItem::Extern(_) | CodeItem::Public(_) | CodeItem::Func(_) => {}
                CodeItem::Asm(content) => {
                    for line in content.lines() {
                        self.emit(line.to_owned());
                    }
                }
                CodeItem::Proc(proc) => self.emit_proc(proc),
            }
        }
    }

    fn emit_proc(&mut self, proc: &Proc) {
        tracing::debug!(name = %proc.name, "lowering procedure");
        self.push_stack.clear();
        self.reg_alloc.reset();
        self.emit("");
        self.emit(format!("{}:", proc.name));

        let (locals, mut local_size, saved_params) = self.analyze_proc(proc);
        let frame_reg = if locals.is_empty() { "a6" } else { self.choose_frame_register() };
        if !locals.is_empty() && frame_reg != "a6" {
            local_size += 4;
        }

        let mut stack_index = 0;
        for param in &proc.params {
            if let Some(register) = &param.register {
                self.emit(format!("{INDENT}; param {}: {} in {register}", param.name, param.ptype));
            } else {
                let offset = 8 + 4 * stack_index;
                stack_index += 1;
                self.emit(format!("{INDENT}; param {}: {} at {offset}(a6)", param.name, param.ptype));
            }
        }
        for slot in &locals {
            self.emit(format!(
                "{INDENT}; local {}: {} at -{}({frame_reg})",
                slot.name, slot.vtype, slot.offset
            ));
        }

        if local_size == 0 {
            self.emit(format!("{INDENT}link a6,#0"));
        } else {
            self.emit(format!("{INDENT}link a6,#-{local_size}"));
        }

        // data registers are caller-save on this platform; mirroring each
        // incoming parameter to its slot makes later uses safe across calls
        for saved in &saved_params {
            self.emit(format!(
                "{INDENT}move{} {},-{}(a6)  ; save {} from {}",
                saved.suffix, saved.register, saved.offset, saved.name, saved.register
            ));
        }

        if !locals.is_empty() && frame_reg != "a6" {
            self.emit(format!(
                "{INDENT}move.l {frame_reg},-{local_size}(a6)  ; save {frame_reg} in frame"
            ));
            self.emit(format!("{INDENT}move.l a6,{frame_reg}  ; keep frame pointer in {frame_reg}"));
        }

        let ctx = ProcCtx {
            params: &proc.params,
            locals,
            frame_reg,
            local_size,
            is_void: proc.rettype == "void",
            rettype: proc.rettype.clone(),
        };

        for stmt in &proc.body {
            self.emit_stmt(stmt, &ctx);
        }

        if !proc.body.iter().any(|s| matches!(s, Stmt::Return(_))) {
            self.emit_epilogue(&ctx);
        }
    }

    pub(crate) fn emit_epilogue(&mut self, ctx: &ProcCtx<'_>) {
        if !ctx.locals.is_empty() && ctx.frame_reg != "a6" {
            self.emit(format!(
                "{INDENT}move.l -{}(a6),{}  ; restore {} from frame",
                ctx.local_size, ctx.frame_reg, ctx.frame_reg
            ));
        }
        self.emit(format!("{INDENT}unlk a6"));
        self.emit(format!("{INDENT}rts"));
    }

    /// Walks a procedure collecting frame slots: one per data-register
    /// parameter (mirrored in the prologue) and one per local declaration,
    /// including `for` counters that were not pre-declared. Offsets align
    /// to even addresses; the total rounds up to 4.
    fn analyze_proc(&self, proc: &Proc) -> (Vec<LocalSlot>, i32, Vec<SavedParam>) {
        let mut locals = Vec::new();
        let mut offset = 0i32;
        let mut saved = Vec::new();

        for param in &proc.params {
            let Some(register) = &param.register else { continue };
            if !register.starts_with('d') {
                continue;
            }
            let size = type_size(&param.ptype).max(1) as i32;
            offset += size;
            if offset % 2 == 1 {
                offset += 1;
            }
            saved.push(SavedParam {
                name: param.name.clone(),
                register: register.clone(),
                offset,
                suffix: size_suffix(size as u32),
            });
            locals.push(LocalSlot {
                name: param.name.clone(),
                vtype: param.ptype.clone(),
                offset,
            });
        }

        collect_locals(&proc.body, &mut locals, &mut offset);
        let total = (offset + 3) & !3;
        (locals, total, saved)
    }
}

fn collect_locals(stmts: &[Stmt], locals: &mut Vec<LocalSlot>, offset: &mut i32) {
    for stmt in stmts {
        match stmt {
            Stmt::VarDecl { name, vtype, .. } => {
                let size = type_size(vtype).max(1) as i32;
                *offset += size;
                if *offset % 2 == 1 {
                    *offset += 1;
                }
                locals.push(LocalSlot {
                    name: name.clone(),
                    vtype: vtype.clone(),
                    offset: *offset,
                });
            }
            Stmt::For { var, body, .. } => {
                if !locals.iter().any(|slot| &slot.name == var) {
                    *offset += 4;
                    locals.push(LocalSlot {
                        name: var.clone(),
                        vtype: "int".to_owned(),
                        offset: *offset,
                    });
                }
                collect_locals(body, locals, offset);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::Repeat { body, .. } => {
                collect_locals(body, locals, offset);
            }
            Stmt::If {
                then_body, else_body, ..
            } => {
                collect_locals(then_body, locals, offset);
                if let Some(else_body) = else_body {
                    collect_locals(else_body, locals, offset);
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------
// table builders
// ---------------------------------------------------------------------

/// Only procedure definitions carry register-parameter conventions.
/// Forward declarations and externs are deliberately excluded so they get
/// the stack-only cdecl treatment at call sites.
fn build_proc_sigs(module: &Module) -> IndexMap<String, Vec<Param>> {
    let mut sigs = IndexMap::new();
    for item in &module.items {
        if let Item::Code(section) = item {
            for code_item in &section.items {
                if let CodeItem::Proc(proc) = code_item {
                    sigs.insert(proc.name.clone(), proc.params.clone());
                }
            }
        }
    }
    sigs
}

fn build_macros(module: &Module) -> AHashMap<String, MacroDef> {
    let mut macros = AHashMap::new();
    for item in &module.items {
        if let Item::Macro(def) = item {
            macros.insert(def.name.clone(), def.clone());
        }
    }
    macros
}

fn build_constants(module: &Module) -> AHashMap<String, i64> {
    let mut constants = AHashMap::new();
    let mut add_struct = |constants: &mut AHashMap<String, i64>, var: &StructVar| {
        let (size, layout) = struct_layout(&var.fields);
        constants.insert(format!("{}__size", var.name), i64::from(size));
        constants.insert(format!("{}__stride", var.name), i64::from(size));
        for field in &layout {
            constants.insert(format!("{}_{}", var.name, field.name), i64::from(field.offset));
        }
    };
    for item in &module.items {
        match item {
            Item::Const(decl) => {
                constants.insert(decl.name.clone(), decl.value);
            }
            Item::Data(section) => {
                for data_item in &section.items {
                    match data_item {
                        DataItem::Const(decl) => {
                            constants.insert(decl.name.clone(), decl.value);
                        }
                        DataItem::Struct(var) => add_struct(&mut constants, var),
                        DataItem::Var(_) => {}
                    }
                }
            }
            Item::Bss(section) => {
                for data_item in &section.items {
                    match data_item {
                        DataItem::Const(decl) => {
                            constants.insert(decl.name.clone(), decl.value);
                        }
                        DataItem::Struct(var) => add_struct(&mut constants, var),
                        DataItem::Var(_) => {}
                    }
                }
            }
            _ => {}
        }
    }
    constants
}

fn build_globals(module: &Module) -> AHashMap<String, Suffix> {
    let mut globals = AHashMap::new();
    let mut walk = |items: &[DataItem], globals: &mut AHashMap<String, Suffix>| {
        for item in items {
            match item {
                DataItem::Var(var) => {
                    globals.insert(var.name.clone(), var.suffix.unwrap_or(Suffix::L));
                }
                DataItem::Struct(var) => {
                    globals.insert(var.name.clone(), Suffix::L);
                }
                DataItem::Const(_) => {}
            }
        }
    };
    for item in &module.items {
        match item {
            Item::Data(section) => walk(&section.items, &mut globals),
            Item::Bss(section) => walk(&section.items, &mut globals),
            _ => {}
        }
    }
    globals
}

fn build_struct_info(module: &Module) -> IndexMap<String, StructInfo> {
    let mut info = IndexMap::new();
    let mut walk = |items: &[DataItem], info: &mut IndexMap<String, StructInfo>| {
        for item in items {
            if let DataItem::Struct(var) = item {
                let (size, layout) = struct_layout(&var.fields);
                let mut fields = IndexMap::new();
                for field in layout {
                    fields.insert(
                        field.name.clone(),
                        FieldInfo {
                            offset: field.offset,
                            suffix: field.suffix,
                        },
                    );
                }
                info.insert(var.name.clone(), StructInfo { size, fields });
            }
        }
    };
    for item in &module.items {
        match item {
            Item::Data(section) => walk(&section.items, &mut info),
            Item::Bss(section) => walk(&section.items, &mut info),
            _ => {}
        }
    }
    info
}

fn build_array_dims(module: &Module, constants: &AHashMap<String, i64>) -> AHashMap<String, ArrayInfo> {
    let mut arrays = AHashMap::new();
    let mut walk = |items: &[DataItem], arrays: &mut AHashMap<String, ArrayInfo>| {
        for item in items {
            if let DataItem::Var(var) = item {
                if let Some(dims) = &var.dims {
                    let resolved = dims.iter().map(|d| resolve_dim(d, constants).unwrap_or(0)).collect();
                    arrays.insert(
                        var.name.clone(),
                        ArrayInfo {
                            dims: resolved,
                            elem: var.suffix.unwrap_or(Suffix::L),
                        },
                    );
                }
            }
        }
    };
    for item in &module.items {
        match item {
            Item::Data(section) => walk(&section.items, &mut arrays),
            Item::Bss(section) => walk(&section.items, &mut arrays),
            _ => {}
        }
    }
    arrays
}

fn build_extern_vars(module: &Module) -> AHashSet<String> {
    let mut names = AHashSet::new();
    let mut add = |decl: &ExternDecl, names: &mut AHashSet<String>| {
        if let ExternDecl::Var { name, .. } = decl {
            names.insert(name.clone());
        }
    };
    for item in &module.items {
        match item {
            Item::Extern(decl) => add(decl, &mut names),
            Item::Code(section) => {
                for code_item in &section.items {
                    if let CodeItem::Extern(decl) = code_item {
                        add(decl, &mut names);
                    }
                }
            }
            _ => {}
        }
    }
    names
}

fn build_extern_funcs(module: &Module) -> AHashSet<String> {
    let mut names = AHashSet::new();
    for item in &module.items {
        match item {
            Item::Extern(ExternDecl::Func { name, .. }) => {
                names.insert(name.clone());
            }
            Item::Code(section) => {
                for code_item in &section.items {
                    match code_item {
                        CodeItem::Extern(ExternDecl::Func { name, .. }) => {
                            names.insert(name.clone());
                        }
                        CodeItem::Func(decl) => {
                            names.insert(decl.name.clone());
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    names
}

fn build_locked_regs(module: &Module) -> AHashSet<String> {
    let mut locked = AHashSet::new();
    for item in &module.items {
        if let Item::Pragma(pragma) = item {
            if pragma.name == "lockreg" {
                locked.extend(pragma.args.iter().cloned());
            }
        }
    }
    locked
}

/// `add` with the quick form when the immediate fits.
pub(crate) fn add_immediate(indent: &str, register: &str, value: i64) -> String {
    if (0..=7).contains(&value) {
        format!("{indent}addq.l #{value},{register}")
    } else {
        format!("{indent}add.l #{value},{register}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parse::parse;

    fn generate(source: &str) -> String {
        let module = parse(source, None).expect("parse");
        CodeGen::new(&module).generate()
    }

    #[test]
    fn sections_emit_in_source_order_with_kinds() {
        let asm = generate("data gfx_chip:\n    pal.w = 0\nbss b:\n    buf.b[8]\ncode main:\n    proc f() -> void {\n    }\n");
        let data_at = asm.find("SECTION gfx_chip,data").expect("data section");
        let bss_at = asm.find("SECTION b,bss").expect("bss section");
        let code_at = asm.find("SECTION main,code").expect("code section");
        assert!(data_at < bss_at && bss_at < code_at);
    }

    #[test]
    fn chip_sections_use_the_chip_type_names() {
        let asm = generate("data g:\n    x.w = 0\ndata_chip g2:\n    y.w = 0\ncode_chip c:\n    proc f() -> void {\n    }\n");
        assert!(asm.contains("SECTION g2,data_c"));
        assert!(asm.contains("SECTION c,code_c"));
    }

    #[test]
    fn scalar_data_values_emit_by_suffix() {
        let asm = generate("data d:\n    a.b = 1\n    b.w = 2\n    c = 3\n");
        assert!(asm.contains("dc.b 1"));
        assert!(asm.contains("dc.w 2"));
        assert!(asm.contains("dc.l 3"));
    }

    #[test]
    fn string_data_emits_dc_b() {
        let asm = generate("data d:\n    msg.b = \"HELLO\"\n");
        assert!(asm.contains("dc.b \"HELLO\""));
    }

    #[test]
    fn struct_equates_match_the_layout_rules() {
        let asm = generate("bss b:\n    struct enemy[4] { tag.b, x.w, addr.l }\n");
        assert!(asm.contains("enemy__size equ 8"), "b@0 w@2 l@4 rounds to 8: {asm}");
        assert!(asm.contains("enemy__stride equ 8"));
        assert!(asm.contains("enemy_tag equ enemy+0"));
        assert!(asm.contains("enemy_x equ enemy+2"));
        assert!(asm.contains("enemy_addr equ enemy+4"));
        assert!(asm.contains("enemy: ds.b 32"));
    }

    #[test]
    fn bss_counts_resolve_named_constants() {
        let asm = generate("const SIZE = 16;\nbss b:\n    buf.b: SIZE\n");
        assert!(asm.contains("buf: ds.b 16"));
    }

    #[test]
    fn xref_and_xdef_blocks_precede_sections() {
        let asm = generate(
            "code c:\n    extern func ExtDraw(x: int) -> void;\n    public f;\n    proc f() -> void {\n    }\n",
        );
        let xref_at = asm.find("XREF ExtDraw").expect("xref");
        let xdef_at = asm.find("XDEF f").expect("xdef");
        let section_at = asm.find("SECTION c,code").expect("section");
        assert!(xref_at < section_at && xdef_at < section_at);
    }

    #[test]
    fn empty_procedure_gets_the_minimal_frame() {
        let asm = generate("code c:\n    proc nothing() -> void {\n    }\n");
        assert!(asm.contains("nothing:"));
        assert!(asm.contains("link a6,#0"));
        assert!(asm.contains("unlk a6"));
        assert!(asm.contains("rts"));
    }

    #[test]
    fn locals_round_frame_size_to_four_and_add_save_slot() {
        // 4 bytes of locals + 4 for the saved a4 frame register
        let asm = generate("code c:\n    proc f() -> void {\n        var x: int = 1;\n    }\n");
        assert!(asm.contains("link a6,#-8"), "frame should be 8 bytes: {asm}");
        assert!(asm.contains("move.l a4,-8(a6)"));
        assert!(asm.contains("move.l a6,a4"));
        assert!(asm.contains("move.l -8(a6),a4"));
    }

    #[test]
    fn locking_the_candidates_falls_back_to_a6_frames() {
        let asm = generate(
            "#pragma lockreg(a4, a3, a5);\ncode c:\n    proc f() -> void {\n        var x: int = 1;\n    }\n",
        );
        assert!(asm.contains("link a6,#-4"), "no extra save slot on a6 frames: {asm}");
        assert!(!asm.contains("move.l a6,a4"));
    }

    #[test]
    fn add_immediate_picks_quick_form() {
        assert_eq!(add_immediate("    ", "d0", 4), "    addq.l #4,d0");
        assert_eq!(add_immediate("    ", "a7", 12), "    add.l #12,a7");
    }
}
