//! Error types for the compilation pipeline.
//!
//! Each variant corresponds to a pipeline stage so the CLI can report
//! failures accurately without string matching. I/O and syntax problems
//! abort immediately; the validator accumulates everything it finds and
//! reports the batch in a single [`CompileError::Validation`].

use std::path::PathBuf;

use thiserror::Error;

/// A syntax error with its source position.
#[derive(Debug, Clone, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Error type for a whole compilation, separated by pipeline stage.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("#include: file not found: {0}")]
    IncludeNotFound(PathBuf),

    #[error("#include: failed to read {path}: {source}")]
    IncludeRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("#include cycle detected for {0}")]
    IncludeCycle(PathBuf),

    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// A `#error "msg";` directive was reached.
    #[error("Error: {0}")]
    Directive(String),

    /// The validator found semantic or layout errors; all are listed.
    #[error("validation failed:\n{}", .errors.join("\n"))]
    Validation { errors: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_carry_position() {
        let err = SyntaxError::new(3, 14, "unexpected token");
        assert_eq!(err.to_string(), "line 3, column 14: unexpected token");
    }

    #[test]
    fn validation_errors_list_every_finding() {
        let err = CompileError::Validation {
            errors: vec!["first".to_owned(), "second".to_owned()],
        };
        let text = err.to_string();
        assert!(text.contains("first") && text.contains("second"));
    }
}
