//! The HAS abstract syntax tree.
//!
//! A parsed translation unit is a [`Module`]: an ordered list of top-level
//! items (sections, constants, macros, declarations and directives). Every
//! statement and expression form the language knows is a variant here, so
//! the validator and the code generator can match exhaustively.
//!
//! Nodes are plain owned data and derive [`Clone`]; macro expansion
//! deep-copies subtrees instead of mutating the macro definition.

use std::fmt;

use smallvec::SmallVec;
use strum::Display;

/// Returns the byte size of a HAS type name.
///
/// Unknown names (user struct pointers and the like) default to 4 bytes,
/// which is the natural register width on the 68000.
pub fn type_size(name: &str) -> u32 {
    match name {
        "byte" | "i8" | "u8" | "char" | "bool" | "UBYTE" | "BYTE" => 1,
        "word" | "short" | "i16" | "u16" | "UWORD" | "WORD" => 2,
        "void" => 0,
        _ => 4,
    }
}

/// True for the signed type names; unsigned and pointer types get zero
/// extension on load and the unsigned branch/set mnemonics in comparisons.
pub fn is_signed(name: &str) -> bool {
    matches!(
        name,
        "byte" | "i8" | "i16" | "i32" | "word" | "long" | "int" | "short" | "char" | "BYTE" | "WORD" | "LONG"
    )
}

/// True for pointer types, including the `T*` spelling.
pub fn is_pointer(name: &str) -> bool {
    name == "ptr" || name == "APTR" || name.ends_with('*')
}

/// Assembler operand size suffix for a byte size.
pub fn size_suffix(bytes: u32) -> &'static str {
    match bytes {
        1 => ".b",
        2 => ".w",
        _ => ".l",
    }
}

/// Element size suffix from a declaration (`x.b`, `table.w[8]`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    B,
    W,
    L,
}

impl Suffix {
    /// Parses the letter following the dot in a declaration.
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "b" => Some(Self::B),
            "w" => Some(Self::W),
            "l" => Some(Self::L),
            _ => None,
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            Self::B => 1,
            Self::W => 2,
            Self::L => 4,
        }
    }

    /// The `.b`/`.w`/`.l` operand suffix.
    pub fn dot(self) -> &'static str {
        match self {
            Self::B => ".b",
            Self::W => ".w",
            Self::L => ".l",
        }
    }

    /// The bare letter, as used in `ds.w` style directives.
    pub fn letter(self) -> &'static str {
        match self {
            Self::B => "b",
            Self::W => "w",
            Self::L => "l",
        }
    }
}

/// A whole translation unit after include expansion.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub items: Vec<Item>,
}

/// Top-level items in source order.
#[derive(Debug, Clone)]
pub enum Item {
    Data(DataSection),
    Bss(BssSection),
    Code(CodeSection),
    Const(ConstDecl),
    Macro(MacroDef),
    Extern(ExternDecl),
    Public(PublicDecl),
    /// `#warning "msg";` — printed during validation, compilation continues.
    Warning(String),
    /// `#error "msg";` — aborts validation.
    Error(String),
    Pragma(Pragma),
}

/// `#pragma name(arg, ...)`.
#[derive(Debug, Clone)]
pub struct Pragma {
    pub name: String,
    pub args: Vec<String>,
}

/// `const NAME = value;` — a compile-time integer.
#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub value: i64,
}

/// `public name;` — exported via `XDEF`.
#[derive(Debug, Clone)]
pub struct PublicDecl {
    pub name: String,
}

/// `extern func`/`extern var` — symbols resolved at link time via `XREF`.
#[derive(Debug, Clone)]
pub enum ExternDecl {
    Func {
        name: String,
        params: Vec<Param>,
        rettype: String,
    },
    Var {
        name: String,
        vtype: String,
    },
}

impl ExternDecl {
    pub fn name(&self) -> &str {
        match self {
            Self::Func { name, .. } | Self::Var { name, .. } => name,
        }
    }
}

/// An array dimension: either a literal or the name of a constant that the
/// validator checks and the code generator resolves.
#[derive(Debug, Clone)]
pub enum Dim {
    Lit(i64),
    Name(String),
}

/// A data-section initializer value.
#[derive(Debug, Clone)]
pub enum DataValue {
    Num(i64),
    Str(String),
}

/// A scalar or array variable in a data or bss section.
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    /// Declared element size; defaults to long when absent.
    pub suffix: Option<Suffix>,
    /// `[n]` / `[n][m]` dimensions, possibly named constants.
    pub dims: Option<SmallVec<[Dim; 2]>>,
    /// Data initializers; empty for bss variables and zero-filled arrays.
    pub values: Vec<DataValue>,
    /// The bss `name[.s]: count` form.
    pub bss_count: Option<Dim>,
}

impl GlobalVar {
    pub fn is_array(&self) -> bool {
        self.dims.is_some()
    }
}

/// One field of an inline struct declaration.
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub suffix: Suffix,
}

/// `struct Name[dims] { field.s, ... } [= { ... }]` in a data/bss section.
#[derive(Debug, Clone)]
pub struct StructVar {
    pub name: String,
    pub fields: Vec<StructField>,
    pub dims: Option<SmallVec<[Dim; 2]>>,
    /// Flat field initializers (data sections only).
    pub init_values: Vec<i64>,
    pub in_bss: bool,
}

/// The layout of one struct field after alignment.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub suffix: Suffix,
    pub offset: u32,
}

/// Computes the aligned size and field offsets of a struct.
///
/// Bytes pack without padding, words align to 2, longs align to 4, and the
/// total stride rounds up to an even number so struct arrays stay
/// word-aligned on the 68000.
pub fn struct_layout(fields: &[StructField]) -> (u32, Vec<FieldLayout>) {
    let mut offset = 0u32;
    let mut layouts = Vec::with_capacity(fields.len());
    for field in fields {
        match field.suffix {
            Suffix::L => {
                if offset % 4 != 0 {
                    offset += 4 - offset % 4;
                }
            }
            Suffix::W => {
                if offset % 2 != 0 {
                    offset += 1;
                }
            }
            Suffix::B => {}
        }
        layouts.push(FieldLayout {
            name: field.name.clone(),
            suffix: field.suffix,
            offset,
        });
        offset += field.suffix.bytes();
    }
    if offset % 2 != 0 {
        offset += 1;
    }
    (offset, layouts)
}

/// An item inside a data or bss section body.
#[derive(Debug, Clone)]
pub enum DataItem {
    Var(GlobalVar),
    Struct(StructVar),
    Const(ConstDecl),
}

#[derive(Debug, Clone)]
pub struct DataSection {
    pub name: String,
    pub chip: bool,
    pub items: Vec<DataItem>,
}

#[derive(Debug, Clone)]
pub struct BssSection {
    pub name: String,
    pub chip: bool,
    pub items: Vec<DataItem>,
}

#[derive(Debug, Clone)]
pub struct CodeSection {
    pub name: String,
    pub chip: bool,
    pub items: Vec<CodeItem>,
}

/// An item inside a code section body.
#[derive(Debug, Clone)]
pub enum CodeItem {
    Proc(Proc),
    /// Forward declaration without a body; called with the cdecl convention.
    Func(FuncDecl),
    /// A raw assembly block emitted verbatim.
    Asm(String),
    Extern(ExternDecl),
    Public(PublicDecl),
}

/// A formal parameter, optionally pinned to a register with `__reg(rN)`.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ptype: String,
    pub register: Option<String>,
}

/// A procedure definition.
#[derive(Debug, Clone)]
pub struct Proc {
    pub name: String,
    pub params: Vec<Param>,
    pub rettype: String,
    pub body: Vec<Stmt>,
}

/// `func name(params) -> type;` — a forward declaration.
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub rettype: String,
}

/// `macro name(p, ...) { body }` — expanded syntactically at call sites.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// The left-hand side of an assignment.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    /// `x = ...`
    Var(String),
    /// `*p = ...`
    Deref(String),
    /// `arr[i] = ...` / `grid[r][c] = ...`
    Array { name: String, indices: Vec<Expr> },
    /// `s.field = ...`, `arr[i].field = ...`, `(*p).field = ...`
    Member { base: Box<Expr>, field: String },
}

/// Statement forms inside procedures and macro bodies.
#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl {
        name: String,
        vtype: String,
        init: Option<Expr>,
    },
    Assign {
        target: AssignTarget,
        expr: Expr,
    },
    /// `x += e` and friends; the operator is the underlying binary op.
    CompoundAssign {
        target: String,
        op: BinOp,
        expr: Expr,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Expr,
        body: Vec<Stmt>,
    },
    Repeat {
        count: Expr,
        body: Vec<Stmt>,
    },
    Expr(Expr),
    /// `call name(args);`
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `name(args);` — a macro expansion or a call, decided by lookup.
    MacroCall {
        name: String,
        args: Vec<Expr>,
    },
    /// Inline assembly with `@name` interpolation.
    Asm(String),
    /// `PUSH(d0, a1, ...)` — saved with a single `movem`.
    Push(SmallVec<[String; 4]>),
    /// `POP()` — restores the most recent `PUSH` in LIFO order.
    Pop,
    Template {
        file: String,
        context: String,
    },
    Python {
        code: String,
    },
}

/// Binary operators with their source spelling as the display form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&&")]
    LogicalAnd,
    #[strum(serialize = "||")]
    LogicalOr,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
}

impl BinOp {
    /// True for the six relational/equality operators.
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Swaps the operand order of a comparison (`a < b` becomes `b > a`).
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }
}

/// Unary operators with their source spelling as the display form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    BitNot,
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "&")]
    AddrOf,
    #[strum(serialize = "*")]
    Deref,
}

/// Expression forms.
#[derive(Debug, Clone)]
pub enum Expr {
    Number(i64),
    Var(String),
    Array {
        name: String,
        indices: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    PostInc(Box<Expr>),
    PostDec(Box<Expr>),
    PreInc(Box<Expr>),
    PreDec(Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `GetReg("d3")` — reads a machine register.
    GetReg(String),
    /// `SetReg("d3", e)` — writes a machine register.
    SetReg {
        register: String,
        value: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    /// Renders an approximation of the source text, used in emitted
    /// assembly comments.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Var(name) => f.write_str(name),
            Self::Array { name, indices } => {
                f.write_str(name)?;
                for index in indices {
                    write!(f, "[{index}]")?;
                }
                Ok(())
            }
            Self::Member { base, field } => write!(f, "{base}.{field}"),
            Self::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Self::Unary { op, operand } => write!(f, "{op}{operand}"),
            Self::PostInc(operand) => write!(f, "{operand}++"),
            Self::PostDec(operand) => write!(f, "{operand}--"),
            Self::PreInc(operand) => write!(f, "++{operand}"),
            Self::PreDec(operand) => write!(f, "--{operand}"),
            Self::Call { name, args } => {
                f.write_str(name)?;
                f.write_str("(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::GetReg(register) => write!(f, "GetReg(\"{register}\")"),
            Self::SetReg { register, value } => write!(f, "SetReg(\"{register}\", {value})"),
        }
    }
}

impl fmt::Display for AssignTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => f.write_str(name),
            Self::Deref(name) => write!(f, "*{name}"),
            Self::Array { name, indices } => {
                f.write_str(name)?;
                for index in indices {
                    write!(f, "[{index}]")?;
                }
                Ok(())
            }
            Self::Member { base, field } => write!(f, "{base}.{field}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn primitive_sizes_cover_all_aliases() {
        for name in ["byte", "i8", "u8", "char", "bool", "UBYTE", "BYTE"] {
            assert_eq!(type_size(name), 1, "{name} should be one byte");
        }
        for name in ["word", "short", "i16", "u16", "UWORD", "WORD"] {
            assert_eq!(type_size(name), 2, "{name} should be two bytes");
        }
        for name in ["long", "int", "i32", "u32", "ptr", "ULONG", "LONG", "APTR"] {
            assert_eq!(type_size(name), 4, "{name} should be four bytes");
        }
    }

    #[test]
    fn signedness_distinguishes_aliases() {
        assert!(is_signed("int"));
        assert!(is_signed("WORD"));
        assert!(!is_signed("u16"));
        assert!(!is_signed("UWORD"));
        assert!(!is_signed("ptr"));
    }

    #[test]
    fn pointer_detection_includes_star_suffix() {
        assert!(is_pointer("ptr"));
        assert!(is_pointer("APTR"));
        assert!(is_pointer("bullet*"));
        assert!(!is_pointer("int"));
    }

    #[test]
    fn struct_layout_aligns_words_and_longs() {
        let fields = [
            StructField {
                name: "flag".to_owned(),
                suffix: Suffix::B,
            },
            StructField {
                name: "x".to_owned(),
                suffix: Suffix::W,
            },
            StructField {
                name: "addr".to_owned(),
                suffix: Suffix::L,
            },
            StructField {
                name: "tag".to_owned(),
                suffix: Suffix::B,
            },
        ];
        let (size, layout) = struct_layout(&fields);
        let offsets: Vec<u32> = layout.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4, 8], "byte packs, word aligns to 2, long to 4");
        assert_eq!(size, 10, "total stride rounds up to even");
    }

    #[test]
    fn struct_layout_of_bytes_rounds_stride_even() {
        let fields = [
            StructField {
                name: "a".to_owned(),
                suffix: Suffix::B,
            },
            StructField {
                name: "b".to_owned(),
                suffix: Suffix::B,
            },
            StructField {
                name: "c".to_owned(),
                suffix: Suffix::B,
            },
        ];
        let (size, layout) = struct_layout(&fields);
        assert_eq!(layout.last().expect("layout").offset, 2);
        assert_eq!(size, 4);
    }

    #[test]
    fn expressions_render_like_source() {
        let expr = Expr::Binary {
            op: BinOp::Add,
            left: Box::new(Expr::Var("x".to_owned())),
            right: Box::new(Expr::Number(5)),
        };
        assert_eq!(expr.to_string(), "x + 5");
        let access = Expr::Array {
            name: "grid".to_owned(),
            indices: vec![Expr::Var("r".to_owned()), Expr::Number(3)],
        };
        assert_eq!(access.to_string(), "grid[r][3]");
    }
}
