//! Textual transforms that run before the lexer sees the source.
//!
//! Two jobs happen here. First, `#include "path"` directives splice in other
//! files recursively, with cycle detection. Second, the three block forms
//! whose bodies are not HAS syntax — `asm { ... }`, `@python { ... }` and
//! `@template "file" { ... }` — are lifted out verbatim into ordered side
//! tables and replaced by placeholder text the lexer can tokenize. The
//! parser re-attaches each body through its table index. Keeping arbitrary
//! text out of the grammar avoids nested-brace counting rules in it.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use ahash::AHashSet;
use regex::Regex;

use crate::error::CompileError;

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*#include\s+"([^"]+)"\s*;?\s*$"#).expect("include pattern"));
static ASM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\basm\s*\{(.*?)\}").expect("asm pattern"));
static PYTHON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)@python\s*\{(.*?)\}").expect("python pattern"));
static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)@template\s+"([^"]*)"\s*\{(.*?)\}"#).expect("template pattern"));

/// Bodies lifted out of the source, addressed by placeholder index.
#[derive(Debug, Default)]
pub struct SideTables {
    pub asm_blocks: Vec<String>,
    pub python_blocks: Vec<String>,
    /// `(template file, raw context block)` pairs.
    pub template_blocks: Vec<(String, String)>,
}

/// The pre-processed source paired with its extracted blocks.
#[derive(Debug)]
pub struct Preprocessed {
    pub source: String,
    pub tables: SideTables,
}

/// Runs include expansion and block extraction.
///
/// `base_dir` anchors relative include paths of the top-level file; nested
/// includes resolve against the directory of the file that contains them.
pub fn preprocess(source: &str, base_dir: Option<&Path>) -> Result<Preprocessed, CompileError> {
    let root = base_dir.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut seen = AHashSet::new();
    let expanded = expand_includes(source, &root, &mut seen)?;

    let mut tables = SideTables::default();

    let after_asm = ASM_RE.replace_all(&expanded, |caps: &regex::Captures<'_>| {
        tables.asm_blocks.push(caps[1].to_owned());
        format!("asm {{BLOCK_{}}}", tables.asm_blocks.len() - 1)
    });
    let after_python = PYTHON_RE.replace_all(&after_asm, |caps: &regex::Captures<'_>| {
        tables.python_blocks.push(caps[1].to_owned());
        format!("@python \"PYTHON_{}\"", tables.python_blocks.len() - 1)
    });
    let after_template = TEMPLATE_RE.replace_all(&after_python, |caps: &regex::Captures<'_>| {
        tables.template_blocks.push((caps[1].to_owned(), caps[2].to_owned()));
        format!("@template \"{}\" \"TEMPLATE_{}\"", &caps[1], tables.template_blocks.len() - 1)
    });

    Ok(Preprocessed {
        source: after_template.into_owned(),
        tables,
    })
}

/// Splices `#include` directives in place, recursively.
///
/// Each path is recorded once; seeing it again fails as a cycle. That also
/// rejects diamond re-inclusion — header-style sharing in HAS goes through
/// `extern` declarations instead.
fn expand_includes(text: &str, dir: &Path, seen: &mut AHashSet<PathBuf>) -> Result<String, CompileError> {
    let mut out = text.to_owned();
    while let Some(caps) = INCLUDE_RE.captures(&out) {
        let full = caps.get(0).expect("match").range();
        let raw_path = &caps[1];
        let resolved = resolve(raw_path, dir);
        let identity = fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        if !seen.insert(identity) {
            return Err(CompileError::IncludeCycle(resolved));
        }
        let included = read_include(&resolved)?;
        let nested_dir = resolved.parent().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
        let expanded = expand_includes(&included, &nested_dir, seen)?;
        out.replace_range(full, &expanded);
    }
    Ok(out)
}

fn resolve(path: &str, dir: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    }
}

fn read_include(path: &Path) -> Result<String, CompileError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CompileError::IncludeNotFound(path.to_path_buf()))
        }
        Err(err) => Err(CompileError::IncludeRead {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn asm_blocks_become_placeholders() {
        let src = "code c:\n    proc f() -> void {\n        asm {\n            move.l d0,d1\n        }\n    }\n";
        let pre = preprocess(src, None).expect("preprocess");
        assert!(pre.source.contains("asm {BLOCK_0}"));
        assert_eq!(pre.tables.asm_blocks.len(), 1);
        assert!(pre.tables.asm_blocks[0].contains("move.l d0,d1"));
    }

    #[test]
    fn multiple_blocks_are_numbered_in_order() {
        let src = "asm { first } asm { second }";
        let pre = preprocess(src, None).expect("preprocess");
        assert!(pre.source.contains("asm {BLOCK_0}") && pre.source.contains("asm {BLOCK_1}"));
        assert_eq!(pre.tables.asm_blocks, vec![" first ".to_owned(), " second ".to_owned()]);
    }

    #[test]
    fn python_and_template_blocks_use_their_own_tables() {
        let src = "@python { x = 1 } @template \"t.j2\" { count = 4 }";
        let pre = preprocess(src, None).expect("preprocess");
        assert!(pre.source.contains("@python \"PYTHON_0\""));
        assert!(pre.source.contains("@template \"t.j2\" \"TEMPLATE_0\""));
        assert_eq!(pre.tables.python_blocks[0].trim(), "x = 1");
        assert_eq!(pre.tables.template_blocks[0].0, "t.j2");
        assert_eq!(pre.tables.template_blocks[0].1.trim(), "count = 4");
    }

    #[test]
    fn identifiers_containing_asm_are_left_alone() {
        let src = "plasma { x }";
        let pre = preprocess(src, None).expect("preprocess");
        assert_eq!(pre.source, src);
        assert!(pre.tables.asm_blocks.is_empty());
    }

    #[test]
    fn missing_include_is_fatal() {
        let err = preprocess("#include \"no_such_file.has\"\n", None).expect_err("missing include");
        assert!(matches!(err, CompileError::IncludeNotFound(_)));
    }

    #[test]
    fn include_expansion_splices_file_contents() {
        let dir = std::env::temp_dir().join("hasc_pre_test_splice");
        fs::create_dir_all(&dir).expect("tmp dir");
        fs::write(dir.join("consts.has"), "const W = 320;\n").expect("write include");
        let pre = preprocess("#include \"consts.has\"\ndata d:\n", Some(&dir)).expect("preprocess");
        assert!(pre.source.contains("const W = 320;"));
        assert!(!pre.source.contains("#include"));
    }

    #[test]
    fn include_cycles_are_detected() {
        let dir = std::env::temp_dir().join("hasc_pre_test_cycle");
        fs::create_dir_all(&dir).expect("tmp dir");
        fs::write(dir.join("a.has"), "#include \"b.has\"\n").expect("write a");
        fs::write(dir.join("b.has"), "#include \"a.has\"\n").expect("write b");
        let err = preprocess("#include \"a.has\"\n", Some(&dir)).expect_err("cycle");
        assert!(matches!(err, CompileError::IncludeCycle(_)));
    }
}
