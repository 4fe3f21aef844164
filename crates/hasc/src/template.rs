//! `@template` rendering.
//!
//! A template statement names a file under `templates/` and carries the raw
//! context block that the pre-processor preserved. The context is parsed as
//! `key = value` (or `key: value`) pairs separated by commas or newlines;
//! values may be integers, quoted strings or bare words. When the block
//! does not look like pairs at all, the whole text is exposed to the
//! template as `context` so simple templates still have something to work
//! with.
//!
//! Rendering failures never abort a compilation — the code generator turns
//! them into `; ERROR` comments so partial diagnostics keep flowing.

use std::{fs, path::Path};

use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("failed to read template '{file}': {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template rendering failed: {0}")]
    Render(String),
}

/// Loads `templates/<file>`, renders it with the parsed context and returns
/// the text to splice.
pub fn render(file: &str, raw_context: &str) -> Result<String, TemplateError> {
    let path = Path::new("templates").join(file);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(TemplateError::NotFound(file.to_owned()));
        }
        Err(source) => {
            return Err(TemplateError::Read {
                file: file.to_owned(),
                source,
            });
        }
    };
    render_str(&text, raw_context)
}

/// Renders template text directly; split out so tests need no files.
pub fn render_str(template: &str, raw_context: &str) -> Result<String, TemplateError> {
    let data = parse_context(raw_context);
    let registry = Handlebars::new();
    registry
        .render_template(template, &data)
        .map_err(|e| TemplateError::Render(e.to_string()))
}

/// Best-effort context parsing; see the module docs for the accepted shape.
fn parse_context(raw: &str) -> Value {
    let mut map = Map::new();
    for piece in raw.split([',', '\n']) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let Some((key, value)) = piece.split_once('=').or_else(|| piece.split_once(':')) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            continue;
        }
        map.insert(key.to_owned(), parse_value(value.trim()));
    }
    if map.is_empty() && !raw.trim().is_empty() {
        map.insert("context".to_owned(), Value::String(raw.trim().to_owned()));
    }
    Value::Object(map)
}

fn parse_value(text: &str) -> Value {
    if let Ok(number) = text.parse::<i64>() {
        return Value::Number(number.into());
    }
    let unquoted = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text);
    Value::String(unquoted.to_owned())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_with_key_value_context() {
        let out = render_str("count is {{count}}", "count = 4").expect("render");
        assert_eq!(out, "count is 4");
    }

    #[test]
    fn colon_pairs_and_strings_work() {
        let out = render_str("{{name}}: {{size}}", "name: \"sprite\", size: 32").expect("render");
        assert_eq!(out, "sprite: 32");
    }

    #[test]
    fn unparseable_context_is_exposed_raw() {
        let out = render_str("got {{context}}", "just words").expect("render");
        assert_eq!(out, "got just words");
    }

    #[test]
    fn missing_file_reports_not_found() {
        let err = render("definitely_missing.j2", "").expect_err("no such template");
        assert!(matches!(err, TemplateError::NotFound(_)));
    }
}
