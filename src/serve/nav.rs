//! Convention-mode navigation model.
//!
//! Builds a page tree from the pages directory. The tree is an arena: one
//! `Vec` of pages with children addressed by index, so the same nodes back
//! both the lookup map and the serialized site tree without cyclic
//! ownership. A rebuilt tree replaces the previous snapshot atomically;
//! request handlers keep reading their `Arc` without locking.
//!
//! Naming rules: `index.html` maps to its directory's url-path, a leading
//! `_` on a file marks a dynamic segment, directories starting with `.` are
//! ignored and ones starting with `_` are not recursed into. A sibling
//! `.json` file supplies `{title, order, hidden, nav}` overrides plus an
//! opaque data map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json, json};
use walkdir::WalkDir;

use crate::utils::text::{normalize_url_path, title_from_name, url_path_from_rel};

/// One page node in the arena.
#[derive(Debug, Clone)]
pub struct NavPage {
    pub url_path: String,
    pub file: Option<PathBuf>,
    pub title: String,
    pub order: i64,
    pub hidden: bool,
    pub nav: Option<bool>,
    pub dynamic: bool,
    pub data: Map<String, Json>,
    pub children: Vec<usize>,
}

impl NavPage {
    fn new(url_path: String, title: String) -> Self {
        Self {
            url_path,
            file: None,
            title,
            order: 0,
            hidden: false,
            nav: None,
            dynamic: false,
            data: Map::new(),
            children: Vec::new(),
        }
    }

    /// Whether the page appears in navigation menus: an explicit `nav`
    /// override wins, otherwise hidden and dynamic pages are excluded.
    pub fn show_in_nav(&self) -> bool {
        self.nav.unwrap_or(!self.hidden && !self.dynamic)
    }
}

/// Sidecar metadata loaded from `<page>.json`.
struct PageMeta {
    title: Option<String>,
    order: i64,
    hidden: bool,
    nav: Option<bool>,
    data: Map<String, Json>,
}

/// The immutable page-tree snapshot. Index 0 is the root (`/`).
#[derive(Debug, Default)]
pub struct NavTree {
    pages: Vec<NavPage>,
}

impl NavTree {
    /// Build the tree by walking the pages directory.
    pub fn build(pages_dir: &Path, index_file: &str) -> Self {
        let mut tree = NavTree {
            pages: vec![NavPage::new("/".to_string(), "Home".to_string())],
        };

        if !index_file.is_empty() {
            let root_file = pages_dir.join(index_file);
            if root_file.is_file() {
                if let Some(meta) = load_page_meta(&root_file) {
                    tree.apply_meta(0, meta);
                }
                tree.pages[0].file = Some(root_file);
            }
        }

        // rel dir → arena index
        let mut dir_nodes: BTreeMap<PathBuf, usize> = BTreeMap::new();
        dir_nodes.insert(PathBuf::from("."), 0);

        let walker = WalkDir::new(pages_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                if name.starts_with('.') {
                    return false;
                }
                // Underscore directories are not recursed into; underscore
                // files stay (they are dynamic segments).
                !(e.file_type().is_dir() && name.starts_with('_'))
            });

        for entry in walker.flatten() {
            if entry.depth() == 0 {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(pages_dir) else {
                continue;
            };

            if entry.file_type().is_dir() {
                tree.ensure_dir_node(&mut dir_nodes, pages_dir, rel);
                continue;
            }

            if rel.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            if rel == Path::new(index_file) {
                continue;
            }

            let name = rel
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dir = rel.parent().unwrap_or(Path::new("."));
            let dynamic = name.starts_with('_');

            let mut page = NavPage::new(url_path_from_rel(dir, &name), title_from_name(&name));
            page.file = Some(entry.path().to_path_buf());
            page.dynamic = dynamic;

            let meta = load_page_meta(entry.path());

            // An index file folds into its directory's node.
            if name == "index" {
                if let Some(&dir_idx) = dir_nodes.get(dir) {
                    tree.pages[dir_idx].file = page.file;
                    tree.pages[dir_idx].title = page.title;
                    if let Some(meta) = meta {
                        tree.apply_meta(dir_idx, meta);
                    }
                    continue;
                }
            }

            let idx = tree.pages.len();
            tree.pages.push(page);
            if let Some(meta) = meta {
                tree.apply_meta(idx, meta);
            }

            let parent = tree.ensure_dir_node(&mut dir_nodes, pages_dir, dir);
            tree.pages[parent].children.push(idx);
        }

        tree.sort_children(0);
        tree
    }

    fn apply_meta(&mut self, idx: usize, meta: PageMeta) {
        let page = &mut self.pages[idx];
        if let Some(title) = meta.title {
            page.title = title;
        }
        if meta.order != 0 {
            page.order = meta.order;
        }
        page.hidden = meta.hidden;
        page.nav = meta.nav;
        page.data = meta.data;
    }

    /// Get or create the node for a directory, creating ancestors on the way.
    fn ensure_dir_node(
        &mut self,
        dir_nodes: &mut BTreeMap<PathBuf, usize>,
        pages_dir: &Path,
        rel_dir: &Path,
    ) -> usize {
        if rel_dir == Path::new(".") || rel_dir == Path::new("") {
            return 0;
        }
        if let Some(&idx) = dir_nodes.get(rel_dir) {
            return idx;
        }

        let name = rel_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut node = NavPage::new(
            url_path_from_rel(rel_dir, "index"),
            title_from_name(&name),
        );
        let index_file = pages_dir.join(rel_dir).join("index.html");
        if index_file.is_file() {
            node.file = Some(index_file);
        }

        let idx = self.pages.len();
        self.pages.push(node);
        dir_nodes.insert(rel_dir.to_path_buf(), idx);

        let parent_dir = rel_dir.parent().unwrap_or(Path::new("."));
        let parent = self.ensure_dir_node(dir_nodes, pages_dir, parent_dir);
        self.pages[parent].children.push(idx);
        idx
    }

    /// Sort children by (order ascending, title ascending), recursively.
    fn sort_children(&mut self, idx: usize) {
        let mut children = self.pages[idx].children.clone();
        children.sort_by(|&a, &b| {
            let (pa, pb) = (&self.pages[a], &self.pages[b]);
            pa.order.cmp(&pb.order).then_with(|| pa.title.cmp(&pb.title))
        });
        self.pages[idx].children = children.clone();
        for child in children {
            self.sort_children(child);
        }
    }

    pub fn page(&self, idx: usize) -> &NavPage {
        &self.pages[idx]
    }

    /// Resolve a url-path: exact match, prefix descent, then a
    /// dynamic-segment fallback capturing the last segment as the slug.
    pub fn find(&self, url_path: &str) -> Option<(usize, String)> {
        if self.pages.is_empty() {
            return None;
        }
        let url = normalize_url_path(url_path);
        if url == "/" {
            return Some((0, String::new()));
        }
        self.find_in(0, &url)
    }

    fn find_in(&self, node: usize, url: &str) -> Option<(usize, String)> {
        for &child in &self.pages[node].children {
            if self.pages[child].url_path == url {
                return Some((child, String::new()));
            }
        }
        for &child in &self.pages[node].children {
            let prefix = format!("{}/", self.pages[child].url_path);
            if url.starts_with(&prefix) {
                if let Some(found) = self.find_in(child, url) {
                    return Some(found);
                }
            }
        }
        for &child in &self.pages[node].children {
            if self.pages[child].dynamic {
                let parent_path = match self.pages[node].url_path.as_str() {
                    "/" => "",
                    p => p,
                };
                if let Some(remaining) = url.strip_prefix(&format!("{parent_path}/"))
                    && !remaining.is_empty()
                    && !remaining.contains('/')
                {
                    return Some((child, remaining.to_string()));
                }
            }
        }
        None
    }

    /// Serialize the site tree for render data (`Site.Pages`).
    pub fn site_json(&self) -> Json {
        json!({ "Pages": self.children_json(0) })
    }

    /// Serialize one page for render data (`Page`).
    pub fn page_json(&self, idx: usize) -> Json {
        let page = &self.pages[idx];
        json!({
            "Path": page.url_path,
            "Title": page.title,
            "Order": page.order,
            "Hidden": page.hidden,
            "Nav": page.nav,
            "Children": self.children_json(idx),
            "Data": page.data,
        })
    }

    fn children_json(&self, idx: usize) -> Json {
        Json::Array(
            self.pages[idx]
                .children
                .iter()
                .map(|&c| self.page_json(c))
                .collect(),
        )
    }
}

/// Load sidecar metadata from `<template>.json`, if present and valid.
fn load_page_meta(template_path: &Path) -> Option<PageMeta> {
    let json_path = template_path.with_extension("json");
    let raw = std::fs::read_to_string(json_path).ok()?;
    let data: Map<String, Json> = serde_json::from_str(&raw).ok()?;

    Some(PageMeta {
        title: data
            .get("title")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        order: data.get("order").and_then(Json::as_i64).unwrap_or(0),
        hidden: data.get("hidden").and_then(Json::as_bool).unwrap_or(false),
        nav: data.get("nav").and_then(Json::as_bool),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }

    // ------------------------------------------------------------------------
    // Tree construction
    // ------------------------------------------------------------------------

    #[test]
    fn test_root_and_children() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", "root");
        write(&dir, "about.html", "about");
        write(&dir, "blog/x.html", "post");

        let tree = NavTree::build(dir.path(), "index.html");
        let root = tree.page(0);
        assert_eq!(root.url_path, "/");
        assert!(root.file.is_some());

        let (about, slug) = tree.find("/about").unwrap();
        assert!(slug.is_empty());
        assert_eq!(tree.page(about).title, "About");

        let (post, _) = tree.find("/blog/x").unwrap();
        assert_eq!(tree.page(post).url_path, "/blog/x");
    }

    #[test]
    fn test_url_paths_have_no_trailing_slash() {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/index.html", "blog home");

        let tree = NavTree::build(dir.path(), "");
        let (idx, _) = tree.find("/blog").unwrap();
        let page = tree.page(idx);
        assert_eq!(page.url_path, "/blog");
        assert!(page.url_path.starts_with('/'));
        assert!(page.file.is_some());
    }

    #[test]
    fn test_hidden_and_underscore_dirs_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".git/x.html", "no");
        write(&dir, "_drafts/y.html", "no");
        write(&dir, "ok.html", "yes");

        let tree = NavTree::build(dir.path(), "");
        assert!(tree.find("/ok").is_some());
        assert!(tree.find("/_drafts/y").is_none());
        assert!(tree.find("/.git/x").is_none());
    }

    #[test]
    fn test_dynamic_segment_lookup() {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/_slug.html", "dynamic");

        let tree = NavTree::build(dir.path(), "");
        let (idx, slug) = tree.find("/blog/my-first-post").unwrap();
        assert!(tree.page(idx).dynamic);
        assert_eq!(slug, "my-first-post");

        // Dynamic matches exactly one segment.
        assert!(tree.find("/blog/a/b").is_none());
    }

    #[test]
    fn test_exact_match_beats_dynamic() {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/_slug.html", "dynamic");
        write(&dir, "blog/pinned.html", "static");

        let tree = NavTree::build(dir.path(), "");
        let (idx, slug) = tree.find("/blog/pinned").unwrap();
        assert!(!tree.page(idx).dynamic);
        assert!(slug.is_empty());
    }

    #[test]
    fn test_missing_page_is_none() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ok.html", "x");
        let tree = NavTree::build(dir.path(), "");
        assert!(tree.find("/missing").is_none());
    }

    // ------------------------------------------------------------------------
    // Metadata and ordering
    // ------------------------------------------------------------------------

    #[test]
    fn test_sidecar_metadata() {
        let dir = TempDir::new().unwrap();
        write(&dir, "about.html", "x");
        write(
            &dir,
            "about.json",
            r#"{"title": "Who We Are", "order": 5, "hidden": true, "k": "v"}"#,
        );

        let tree = NavTree::build(dir.path(), "");
        let (idx, _) = tree.find("/about").unwrap();
        let page = tree.page(idx);
        assert_eq!(page.title, "Who We Are");
        assert_eq!(page.order, 5);
        assert!(page.hidden);
        assert_eq!(page.data.get("k"), Some(&Json::String("v".into())));
        assert!(!page.show_in_nav());
    }

    #[test]
    fn test_children_sorted_by_order_then_title() {
        let dir = TempDir::new().unwrap();
        write(&dir, "zeta.html", "x");
        write(&dir, "alpha.html", "x");
        write(&dir, "last.html", "x");
        write(&dir, "last.json", r#"{"order": 9}"#);

        let tree = NavTree::build(dir.path(), "");
        let titles: Vec<&str> = tree.page(0)
            .children
            .iter()
            .map(|&c| tree.page(c).title.as_str())
            .collect();
        assert_eq!(titles, vec!["Alpha", "Zeta", "Last"]);
    }

    #[test]
    fn test_nav_override_shows_hidden_page() {
        let dir = TempDir::new().unwrap();
        write(&dir, "secret.html", "x");
        write(&dir, "secret.json", r#"{"hidden": true, "nav": true}"#);

        let tree = NavTree::build(dir.path(), "");
        let (idx, _) = tree.find("/secret").unwrap();
        assert!(tree.page(idx).show_in_nav());
    }

    #[test]
    fn test_title_derivation() {
        let dir = TempDir::new().unwrap();
        write(&dir, "getting-started.html", "x");
        let tree = NavTree::build(dir.path(), "");
        let (idx, _) = tree.find("/getting-started").unwrap();
        assert_eq!(tree.page(idx).title, "Getting Started");
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    #[test]
    fn test_site_json_shape() {
        let dir = TempDir::new().unwrap();
        write(&dir, "about.html", "x");

        let tree = NavTree::build(dir.path(), "");
        let site = tree.site_json();
        assert_eq!(site["Pages"][0]["Path"], Json::String("/about".into()));
        assert_eq!(site["Pages"][0]["Title"], Json::String("About".into()));
    }
}
