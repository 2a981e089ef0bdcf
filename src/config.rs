//! Development-server configuration.
//!
//! The launcher (an editor process) passes configuration as JSON, either
//! inline on the command line or as a path to a JSON file. Keys are
//! camelCase; everything is optional. Unknown keys are ignored since the
//! launcher evolves independently of this binary.
//!
//! # Example
//!
//! ```json
//! {
//!   "pagesDir": "site/pages",
//!   "layoutsDir": "site/layouts",
//!   "port": 3000,
//!   "contextFiles": ["site/base.html", "site/pages/home.html"],
//!   "entryFile": "site/base.html"
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use educe::Educe;
use serde::{Deserialize, Serialize};

/// Prefix of environment variables projected into the render data's `Env`.
pub const ENV_PREFIX: &str = "TMPLDEV_";

// ============================================================================
// Defaults
// ============================================================================

/// Default values for serde deserialization.
pub mod defaults {
    use std::path::PathBuf;

    pub fn pages_dir() -> PathBuf {
        "pages".into()
    }

    pub fn layouts_dir() -> PathBuf {
        "layouts".into()
    }

    pub fn partials_dir() -> PathBuf {
        "partials".into()
    }

    pub fn static_dir() -> PathBuf {
        "static".into()
    }

    pub fn port() -> u16 {
        3000
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Full server configuration.
///
/// Two modes exist: *convention* mode serves a `pages/` tree with layouts
/// and partials; *context* mode serves an explicit render context (entry
/// file + included files) handed over by the launcher.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServeConfig {
    /// Root of the convention-mode page tree.
    #[serde(default = "defaults::pages_dir")]
    #[educe(Default = defaults::pages_dir())]
    pub pages_dir: PathBuf,

    /// Directory of layout templates (convention mode).
    #[serde(default = "defaults::layouts_dir")]
    #[educe(Default = defaults::layouts_dir())]
    pub layouts_dir: PathBuf,

    /// Directory of partial templates (convention mode).
    #[serde(default = "defaults::partials_dir")]
    #[educe(Default = defaults::partials_dir())]
    pub partials_dir: PathBuf,

    /// Static asset root served under `/static/` (convention mode).
    #[serde(default = "defaults::static_dir")]
    #[educe(Default = defaults::static_dir())]
    pub static_dir: PathBuf,

    /// Preferred layout file name inside `layouts_dir`; empty picks the
    /// first `.html` entry.
    pub layout_file: String,

    /// Root index file inside `pages_dir`; empty auto-detects.
    pub index_file: String,

    /// Preferred HTTP port. The next ten ports are probed when busy, then
    /// an OS-assigned port.
    #[serde(default = "defaults::port")]
    #[educe(Default = defaults::port())]
    pub port: u16,

    /// Render-context files (entry + includes). Non-empty switches the
    /// server into context mode.
    pub context_files: Vec<PathBuf>,

    /// The entry (layout) template of the render context.
    pub entry_file: Option<PathBuf>,

    /// Explicitly linked fixture file for the render context.
    pub data_file: Option<PathBuf>,

    /// Fixture directory for auto-discovery and per-page data.
    pub data_dir: Option<PathBuf>,

    /// Content root for `/static/` in context mode.
    pub content_root: Option<PathBuf>,
}

impl ServeConfig {
    /// Load from an inline JSON string or a path to a JSON file.
    pub fn load(arg: &str) -> Result<Self> {
        let text = if Path::new(arg).is_file() {
            std::fs::read_to_string(arg)
                .with_context(|| format!("failed to read config file `{arg}`"))?
        } else {
            arg.to_string()
        };
        let mut cfg: ServeConfig =
            serde_json::from_str(&text).context("invalid serve configuration JSON")?;
        if cfg.port == 0 {
            cfg.port = defaults::port();
        }
        cfg.resolve_index();
        Ok(cfg)
    }

    /// Whether the launcher supplied a render context.
    pub fn context_mode(&self) -> bool {
        !self.context_files.is_empty() && self.entry_file.is_some()
    }

    /// Auto-detect the root index file when unset: `index.html` if present
    /// in the pages dir, otherwise the first `.html` entry.
    fn resolve_index(&mut self) {
        if !self.index_file.is_empty() {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&self.pages_dir) else {
            return;
        };
        let mut candidates: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".html"))
            .collect();
        candidates.sort();

        if candidates.iter().any(|c| c == "index.html") {
            self.index_file = "index.html".to_string();
        } else if let Some(first) = candidates.first() {
            self.index_file = first.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = ServeConfig::load("{}").unwrap();
        assert_eq!(cfg.pages_dir, PathBuf::from("pages"));
        assert_eq!(cfg.layouts_dir, PathBuf::from("layouts"));
        assert_eq!(cfg.partials_dir, PathBuf::from("partials"));
        assert_eq!(cfg.static_dir, PathBuf::from("static"));
        assert_eq!(cfg.port, 3000);
        assert!(!cfg.context_mode());
    }

    #[test]
    fn test_camel_case_keys() {
        let cfg = ServeConfig::load(
            r#"{"pagesDir": "p", "layoutFile": "base.html", "port": 4000}"#,
        )
        .unwrap();
        assert_eq!(cfg.pages_dir, PathBuf::from("p"));
        assert_eq!(cfg.layout_file, "base.html");
        assert_eq!(cfg.port, 4000);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        assert!(ServeConfig::load(r#"{"futureKnob": true}"#).is_ok());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ServeConfig::load("{not json").is_err());
    }

    #[test]
    fn test_zero_port_falls_back_to_default() {
        let cfg = ServeConfig::load(r#"{"port": 0}"#).unwrap();
        assert_eq!(cfg.port, 3000);
    }

    #[test]
    fn test_context_mode_requires_entry_and_files() {
        let cfg = ServeConfig::load(
            r#"{"contextFiles": ["a.html"], "entryFile": "a.html"}"#,
        )
        .unwrap();
        assert!(cfg.context_mode());

        let cfg = ServeConfig::load(r#"{"contextFiles": ["a.html"]}"#).unwrap();
        assert!(!cfg.context_mode());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serve.json");
        fs::write(&path, r#"{"port": 5000}"#).unwrap();
        let cfg = ServeConfig::load(&path.to_string_lossy()).unwrap();
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn test_index_auto_detection_prefers_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("about.html"), "x").unwrap();
        fs::write(dir.path().join("index.html"), "x").unwrap();

        let cfg = ServeConfig::load(&format!(
            r#"{{"pagesDir": "{}"}}"#,
            dir.path().display()
        ))
        .unwrap();
        assert_eq!(cfg.index_file, "index.html");
    }

    #[test]
    fn test_index_auto_detection_falls_back_to_first() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.html"), "x").unwrap();
        fs::write(dir.path().join("a.html"), "x").unwrap();

        let cfg = ServeConfig::load(&format!(
            r#"{{"pagesDir": "{}"}}"#,
            dir.path().display()
        ))
        .unwrap();
        assert_eq!(cfg.index_file, "a.html");
    }
}
