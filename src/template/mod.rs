//! The template dialect engine: lexer, parser, helper registry, flexible
//! comparisons, and the execution runtime.
//!
//! Everything here is single-call synchronous. A [`exec::TemplateSet`] is
//! built fresh for each analysis or render and dropped afterwards.

pub mod compare;
pub mod error;
pub mod exec;
pub mod funcs;
pub mod lexer;
pub mod parser;

pub use error::TemplateError;
pub use exec::TemplateSet;

/// File extensions recognised as template files.
pub const TEMPLATE_EXTENSIONS: &[&str] = &["html", "tmpl", "tpl", "gohtml"];

/// Directory names skipped when scanning a workspace for templates.
pub const SCAN_DENY_DIRS: &[&str] = &["node_modules", "dist"];

/// Whether a path carries one of the recognised template extensions.
pub fn is_template_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            TEMPLATE_EXTENSIONS.contains(&ext.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_is_template_file() {
        assert!(is_template_file(Path::new("a/layout.html")));
        assert!(is_template_file(Path::new("x.TMPL")));
        assert!(is_template_file(Path::new("x.gohtml")));
        assert!(!is_template_file(Path::new("x.css")));
        assert!(!is_template_file(Path::new("Makefile")));
    }
}
