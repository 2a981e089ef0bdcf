//! Template engine error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while parsing or executing templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template source is syntactically invalid.
    #[error("parse error in {file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// A named definition was requested but never loaded.
    #[error("template {0:?} not found")]
    MissingTemplate(String),

    /// Execution failed (unresolved field, bad pipeline, arity mismatch).
    #[error("render error in {template:?}: {message}")]
    Exec { template: String, message: String },

    /// A template file could not be read.
    #[error("failed to read `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = TemplateError::Parse {
            file: "layout.html".into(),
            line: 7,
            message: "unexpected `end`".into(),
        };
        let display = format!("{err}");
        assert!(display.contains("layout.html:7"));
        assert!(display.contains("unexpected `end`"));
    }

    #[test]
    fn test_missing_template_display() {
        let err = TemplateError::MissingTemplate("content".into());
        assert!(format!("{err}").contains("\"content\""));
    }
}
