//! Context-mode page model.
//!
//! When the launcher supplies a render context (entry file + includes),
//! the server classifies those files into *shared* templates (the entry
//! and anything without a `content` definition) and *pages* (files
//! defining `content`, swapped per request). It then discovers additional
//! pages under a `pages/` root and additional shared fragments in sibling
//! directories of the entry file.
//!
//! Like the navigation tree, the model is an immutable snapshot rebuilt on
//! file events and swapped atomically.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value as Json, json};
use walkdir::WalkDir;

use super::fixtures;
use crate::log;
use crate::utils::text::{normalize_url_path, title_from_name, url_path_from_rel};

/// Sibling directories never scanned for shared fragments.
const SHARED_DENY_DIRS: &[&str] = &[
    "assets",
    "static",
    "data",
    "css",
    "js",
    "images",
    "media",
    "fonts",
    "node_modules",
    ".git",
    "vendor",
    "tmp",
];

/// One navigable page discovered for the render context.
#[derive(Debug, Clone)]
pub struct ContextPage {
    pub url_path: String,
    pub file: PathBuf,
    pub title: String,
    pub data_file: Option<PathBuf>,
}

/// The context-mode snapshot: discovered pages plus shared template files.
#[derive(Debug, Default)]
pub struct ContextModel {
    pub pages: Vec<ContextPage>,
    pub shared: Vec<PathBuf>,
}

/// Whether template text defines a `content` block (flexible whitespace and
/// trim markers), classifying the file as a page.
pub fn is_content_page(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\{\{-?\s*define\s+"content"\s*-?\}\}"#).expect("valid content pattern")
    });
    re.is_match(text)
}

impl ContextModel {
    /// Build the snapshot from the configured render context.
    pub fn build(
        entry_file: &Path,
        context_files: &[PathBuf],
        data_dir: Option<&Path>,
    ) -> Self {
        let mut model = ContextModel::default();
        let entry_dir = entry_file.parent().unwrap_or(Path::new("."));

        model.classify(entry_file, context_files);

        let mut known: HashSet<PathBuf> = model.shared.iter().cloned().collect();
        known.insert(entry_file.to_path_buf());

        let pages_root = find_pages_root(entry_dir, context_files);
        if let Some(root) = &pages_root {
            model.discover_pages(root, entry_dir, data_dir, &mut known);
        } else {
            log!("serve"; "no pages/ directory found, serving context files only");
        }

        model.discover_shared(entry_dir, pages_root.as_deref(), &mut known);

        model.pages.sort_by(|a, b| a.url_path.cmp(&b.url_path));
        model
    }

    /// Split the context files into shared templates and pages. The entry
    /// file is always shared; unreadable files are kept as shared so a
    /// transient read error does not drop the layout.
    fn classify(&mut self, entry_file: &Path, context_files: &[PathBuf]) {
        for file in context_files {
            if file == entry_file {
                continue;
            }
            match std::fs::read_to_string(file) {
                Ok(text) if is_content_page(&text) => {}
                _ => self.shared.push(file.clone()),
            }
        }
        self.shared.insert(0, entry_file.to_path_buf());
    }

    /// Walk the pages root for additional page templates.
    fn discover_pages(
        &mut self,
        pages_root: &Path,
        entry_dir: &Path,
        data_dir: Option<&Path>,
        known: &mut HashSet<PathBuf>,
    ) {
        for entry in WalkDir::new(pages_root).sort_by_file_name().into_iter().flatten() {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".html") || name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if known.contains(path) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(path) else {
                continue;
            };
            if !is_content_page(&text) {
                continue;
            }

            let Ok(rel) = path.strip_prefix(pages_root) else {
                continue;
            };
            let stem = rel
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dir = rel.parent().unwrap_or(Path::new("."));

            let data_file =
                data_dir.and_then(|dd| fixtures::find_fixture_for_page(dd, path, entry_dir));

            self.pages.push(ContextPage {
                url_path: url_path_from_rel(dir, &stem),
                file: path.to_path_buf(),
                title: title_from_name(&stem),
                data_file,
            });
            known.insert(path.to_path_buf());
        }
    }

    /// Scan immediate subdirectories of the entry directory for shared
    /// fragments (partials, modals) the context did not list explicitly.
    fn discover_shared(
        &mut self,
        entry_dir: &Path,
        pages_root: Option<&Path>,
        known: &mut HashSet<PathBuf>,
    ) {
        let Ok(entries) = std::fs::read_dir(entry_dir) else {
            return;
        };
        let mut subdirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();

        for subdir in subdirs {
            if Some(subdir.as_path()) == pages_root {
                continue;
            }
            let name = subdir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if SHARED_DENY_DIRS.contains(&name.as_str()) {
                continue;
            }

            for entry in WalkDir::new(&subdir).sort_by_file_name().into_iter().flatten() {
                let path = entry.path();
                if !entry.file_type().is_file() {
                    continue;
                }
                let base = entry.file_name().to_string_lossy();
                if !base.ends_with(".html") || base.starts_with('.') || base.starts_with('_') {
                    continue;
                }
                if known.contains(path) {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(path) else {
                    continue;
                };
                if is_content_page(&text) {
                    continue;
                }
                self.shared.push(path.to_path_buf());
                known.insert(path.to_path_buf());
            }
        }
    }

    /// Find the page serving a url-path.
    pub fn find_page(&self, url_path: &str) -> Option<&ContextPage> {
        let url = normalize_url_path(url_path);
        self.pages.iter().find(|p| p.url_path == url)
    }

    /// The page served for `/` when none claims it: the first discovered
    /// page in sort order.
    pub fn root_fallback(&self) -> Option<&ContextPage> {
        self.pages
            .iter()
            .find(|p| p.url_path == "/")
            .or_else(|| self.pages.first())
    }

    /// Navigation records for the `_pages` render key.
    pub fn nav_data(&self, current_url: &str) -> Vec<Json> {
        let current = normalize_url_path(current_url);
        self.pages
            .iter()
            .map(|p| {
                json!({
                    "Path": p.url_path,
                    "Title": p.title,
                    "Active": p.url_path == current,
                })
            })
            .collect()
    }
}

/// Locate the `pages/` root: a context-file directory named `pages`, the
/// entry file's sibling `pages/`, or an ancestor of an included file below
/// the entry directory.
fn find_pages_root(entry_dir: &Path, context_files: &[PathBuf]) -> Option<PathBuf> {
    for file in context_files {
        if let Some(dir) = file.parent()
            && dir.file_name().and_then(|n| n.to_str()) == Some("pages")
        {
            return Some(dir.to_path_buf());
        }
    }

    let sibling = entry_dir.join("pages");
    if sibling.is_dir() {
        return Some(sibling);
    }

    for file in context_files {
        let mut dir = file.parent();
        while let Some(d) = dir {
            if d == entry_dir || d == Path::new(".") || d == Path::new("/") {
                break;
            }
            if d.file_name().and_then(|n| n.to_str()) == Some("pages") {
                return Some(d.to_path_buf());
            }
            dir = d.parent();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, name: &str, content: &str) -> PathBuf {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    const PAGE: &str = "{{define \"content\"}}body{{end}}";
    const PARTIAL: &str = "<nav>{{.Title}}</nav>";

    // ------------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------------

    #[test]
    fn test_is_content_page_flexible_whitespace() {
        assert!(is_content_page(r#"{{define "content"}}x{{end}}"#));
        assert!(is_content_page(r#"{{ define "content" }}x{{ end }}"#));
        assert!(is_content_page(r#"{{- define "content" -}}x{{- end -}}"#));
        assert!(!is_content_page(r#"{{define "sidebar"}}x{{end}}"#));
        assert!(!is_content_page("plain html"));
    }

    #[test]
    fn test_entry_is_always_shared_and_first() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "{{template \"content\" .}}");
        let page = write(dir.path(), "pages/home.html", PAGE);
        let partial = write(dir.path(), "nav.html", PARTIAL);

        let model = ContextModel::build(
            &entry,
            &[entry.clone(), page.clone(), partial.clone()],
            None,
        );
        assert_eq!(model.shared[0], entry);
        assert!(model.shared.contains(&partial));
        assert!(!model.shared.contains(&page));
    }

    #[test]
    fn test_context_pages_not_in_shared() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        let page = write(dir.path(), "pages/dash.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone(), page.clone()], None);
        let found = model.find_page("/dash").unwrap();
        assert_eq!(found.file, page);
    }

    // ------------------------------------------------------------------------
    // Page discovery
    // ------------------------------------------------------------------------

    #[test]
    fn test_discovers_pages_beyond_context() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/index.html", PAGE);
        write(dir.path(), "pages/reports/q1.html", PAGE);
        write(dir.path(), "pages/fragment.html", PARTIAL); // no content block

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        assert!(model.find_page("/").is_some());
        assert!(model.find_page("/reports/q1").is_some());
        assert!(model.find_page("/fragment").is_none());
    }

    #[test]
    fn test_pages_sorted_by_url() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/zebra.html", PAGE);
        write(dir.path(), "pages/alpha.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        let urls: Vec<&str> = model.pages.iter().map(|p| p.url_path.as_str()).collect();
        assert_eq!(urls, vec!["/alpha", "/zebra"]);
    }

    #[test]
    fn test_root_fallback_prefers_root_page() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/index.html", PAGE);
        write(dir.path(), "pages/about.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        assert_eq!(model.root_fallback().unwrap().url_path, "/");
    }

    #[test]
    fn test_root_fallback_first_in_sort_order() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/beta.html", PAGE);
        write(dir.path(), "pages/alpha.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        assert_eq!(model.root_fallback().unwrap().url_path, "/alpha");
    }

    #[test]
    fn test_underscore_and_hidden_files_skipped() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/_draft.html", PAGE);
        write(dir.path(), "pages/.hidden.html", PAGE);
        write(dir.path(), "pages/ok.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        assert_eq!(model.pages.len(), 1);
        assert_eq!(model.pages[0].url_path, "/ok");
    }

    #[test]
    fn test_page_linked_to_fixture() {
        let dir = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/dash.html", PAGE);
        let fixture = write(
            data.path(),
            "ctx.json",
            r#"{"_templateContext": {"entryFile": "dash.html"}}"#,
        );

        let model = ContextModel::build(&entry, &[entry.clone()], Some(data.path()));
        let page = model.find_page("/dash").unwrap();
        assert_eq!(page.data_file.as_ref(), Some(&fixture));
    }

    // ------------------------------------------------------------------------
    // Shared discovery
    // ------------------------------------------------------------------------

    #[test]
    fn test_shared_fragments_discovered_in_siblings() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/home.html", PAGE);
        let navbar = write(dir.path(), "partials/navbar.html", PARTIAL);
        write(dir.path(), "partials/special.html", PAGE); // page template: not shared
        write(dir.path(), "assets/ignore.html", PARTIAL); // deny-listed dir

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        assert!(model.shared.contains(&navbar));
        assert!(!model.shared.iter().any(|p| p.ends_with("special.html")));
        assert!(!model.shared.iter().any(|p| p.ends_with("ignore.html")));
    }

    #[test]
    fn test_pages_root_from_context_file_location() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "templates/base.html", "layout");
        let ctx_page = write(dir.path(), "templates/pages/a.html", PAGE);
        write(dir.path(), "templates/pages/b.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone(), ctx_page], None);
        assert!(model.find_page("/b").is_some());
    }

    // ------------------------------------------------------------------------
    // Navigation data
    // ------------------------------------------------------------------------

    #[test]
    fn test_nav_data_marks_active() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "base.html", "layout");
        write(dir.path(), "pages/a.html", PAGE);
        write(dir.path(), "pages/b.html", PAGE);

        let model = ContextModel::build(&entry, &[entry.clone()], None);
        let nav = model.nav_data("/b/");

        let active: Vec<bool> = nav
            .iter()
            .map(|n| n["Active"].as_bool().unwrap())
            .collect();
        assert_eq!(active, vec![false, true]);
        assert_eq!(nav[1]["Path"], serde_json::json!("/b"));
        assert_eq!(nav[1]["Title"], serde_json::json!("B"));
    }
}
