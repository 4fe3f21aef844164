//! The HAS compiler: a small C-like systems language lowered to Motorola
//! 68000 assembly source for a vasm-style macro assembler.
//!
//! The pipeline is strictly forward: pre-processing (include expansion and
//! block extraction), lexing and parsing into a typed AST, validation,
//! code generation into a line buffer, a conservative multi-pass peephole
//! rewrite, and finally output. Validation errors abort before any code is
//! generated; warnings are returned alongside the assembly.
//!
//! ```
//! let source = "code main:\n    proc answer() -> int {\n        return 40 + 2;\n    }\n";
//! let output = hasc::compile(source, None, true).unwrap();
//! assert!(output.assembly.contains("moveq #42,d0"));
//! ```

pub mod ast;
pub mod codegen;
mod error;
mod fold;
mod lexer;
pub mod parse;
pub mod peephole;
mod preprocess;
pub mod regalloc;
mod script;
mod template;
pub mod validate;

use std::path::Path;

pub use crate::{
    codegen::CodeGen,
    error::{CompileError, SyntaxError},
    parse::parse,
    validate::Validator,
};

/// The result of a successful compilation.
#[derive(Debug)]
pub struct CompileOutput {
    pub assembly: String,
    /// Validator warnings, in the order they were found.
    pub warnings: Vec<String>,
}

/// Compiles HAS source text to assembly.
///
/// `base_dir` anchors relative `#include` paths. With `run_validator`
/// disabled the back end runs on the raw parse — useful for debugging the
/// code generator, at the price of diagnostics.
pub fn compile(source: &str, base_dir: Option<&Path>, run_validator: bool) -> Result<CompileOutput, CompileError> {
    let module = parse(source, base_dir)?;
    let warnings = if run_validator {
        Validator::new(&module).validate()?
    } else {
        Vec::new()
    };
    let assembly = CodeGen::new(&module).generate();
    Ok(CompileOutput { assembly, warnings })
}
