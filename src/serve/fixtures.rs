//! Fixture resolution and loading.
//!
//! Fixtures are JSON files in the data directory. The reserved top-level
//! key `_templateContext` is a metadata side-channel
//! (`{entryFile, includedFiles, selectedTemplate, lastSaved}`) used to
//! match fixtures to templates; it is never passed to template execution.
//!
//! Matching a page template to a fixture tries, in order: the
//! sanitized-path filename (workspace-relative path with separators
//! replaced by `--`, immune to base-name collisions across directories),
//! the `_templateContext.entryFile` base name, membership in
//! `_templateContext.includedFiles`, and finally the legacy base-name
//! filename convention, which a contradicting `entryFile` disqualifies.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

/// Reserved fixture key carrying template-context metadata.
pub const TEMPLATE_CONTEXT_KEY: &str = "_templateContext";

/// Read and parse a JSON object file. I/O or parse failures are treated as
/// absence.
pub fn load_json_map(path: &Path) -> Option<Map<String, Json>> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Remove the metadata side-channel before the map reaches execution.
pub fn strip_template_context(map: &mut Map<String, Json>) {
    map.remove(TEMPLATE_CONTEXT_KEY);
}

/// Replace path separators with `--` so fixtures for identically named
/// templates in different directories cannot collide.
pub fn sanitize_rel_path(rel: &Path) -> String {
    rel.to_string_lossy()
        .replace('\\', "/")
        .trim_matches('/')
        .replace('/', "--")
}

/// The auto-generated fixture filename for a workspace-relative template
/// path.
pub fn fixture_file_name(rel: &Path) -> String {
    format!("{}.json", sanitize_rel_path(rel))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The `_templateContext.entryFile` base name recorded in a fixture map.
fn context_entry_base(map: &Map<String, Json>) -> Option<String> {
    let ctx = map.get(TEMPLATE_CONTEXT_KEY)?.as_object()?;
    let entry = ctx.get("entryFile")?.as_str()?;
    Some(base_name(Path::new(entry)))
}

/// Whether the fixture's `includedFiles` metadata names the template.
fn context_includes(map: &Map<String, Json>, template_base: &str) -> bool {
    let Some(included) = map
        .get(TEMPLATE_CONTEXT_KEY)
        .and_then(Json::as_object)
        .and_then(|ctx| ctx.get("includedFiles"))
        .and_then(Json::as_array)
    else {
        return false;
    };
    included
        .iter()
        .filter_map(Json::as_str)
        .any(|inc| base_name(Path::new(inc)) == template_base)
}

/// Sorted `.json` entries of the data directory.
fn fixture_entries(data_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}

/// Find the fixture matching a page template.
///
/// `workspace` anchors the sanitized-path match; pass the directory the
/// page paths are relative to (the entry file's directory in context mode).
pub fn find_fixture_for_page(
    data_dir: &Path,
    page_file: &Path,
    workspace: &Path,
) -> Option<PathBuf> {
    let entries = fixture_entries(data_dir);
    if entries.is_empty() {
        return None;
    }

    let page_base = base_name(page_file);

    // Sanitized-path filename match wins outright.
    if let Ok(rel) = page_file.strip_prefix(workspace) {
        let wanted = fixture_file_name(rel);
        if let Some(hit) = entries.iter().find(|p| base_name(p) == wanted) {
            return Some(hit.clone());
        }
    }

    for path in &entries {
        let Some(map) = load_json_map(path) else {
            continue;
        };
        if context_entry_base(&map).as_deref() == Some(page_base.as_str()) {
            return Some(path.clone());
        }
        if context_includes(&map, &page_base) {
            return Some(path.clone());
        }
    }

    // Legacy base-name convention, disqualified by a contradicting
    // recorded entry file.
    for path in &entries {
        let stem = base_name(path);
        let stem = stem.strip_suffix(".json").unwrap_or(&stem);
        let name_matches = stem == page_base || stem.ends_with(&format!("--{page_base}"));
        if !name_matches {
            continue;
        }
        if let Some(map) = load_json_map(path)
            && let Some(entry_base) = context_entry_base(&map)
            && entry_base != page_base
        {
            continue;
        }
        return Some(path.clone());
    }

    None
}

/// Resolve the shared context data for the server: the explicitly linked
/// fixture when configured, otherwise an auto-discovered fixture matching
/// the entry file.
pub fn discover_context_data(
    data_file: Option<&Path>,
    data_dir: Option<&Path>,
    entry_file: Option<&Path>,
) -> Map<String, Json> {
    if let Some(path) = data_file
        && let Some(map) = load_json_map(path)
    {
        return map;
    }

    let (Some(data_dir), Some(entry)) = (data_dir, entry_file) else {
        return Map::new();
    };
    let entry_base = base_name(entry);

    for path in fixture_entries(data_dir) {
        let Some(map) = load_json_map(&path) else {
            continue;
        };
        if context_entry_base(&map).as_deref() == Some(entry_base.as_str()) {
            return map;
        }
        let stem = base_name(&path);
        let stem = stem.strip_suffix(".json").unwrap_or(&stem);
        if stem == entry_base || stem.ends_with(&format!("--{entry_base}")) {
            return map;
        }
    }
    Map::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    // ------------------------------------------------------------------------
    // Sanitisation
    // ------------------------------------------------------------------------

    #[test]
    fn test_sanitize_rel_path() {
        assert_eq!(
            sanitize_rel_path(Path::new("pages/about.html")),
            "pages--about.html"
        );
        assert_eq!(sanitize_rel_path(Path::new("top.html")), "top.html");
        assert_eq!(
            fixture_file_name(Path::new("pages/blog/x.html")),
            "pages--blog--x.html.json"
        );
    }

    #[test]
    fn test_strip_template_context() {
        let mut map = serde_json::from_value::<Map<String, Json>>(
            json!({"Name": "x", "_templateContext": {"entryFile": "a.html"}}),
        )
        .unwrap();
        strip_template_context(&mut map);
        assert!(!map.contains_key(TEMPLATE_CONTEXT_KEY));
        assert!(map.contains_key("Name"));
    }

    // ------------------------------------------------------------------------
    // Page fixture matching
    // ------------------------------------------------------------------------

    #[test]
    fn test_sanitized_path_match_beats_sibling_collision() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/about.html", "x");
        // A sibling directory has a template with the same base name.
        write(ws.path(), "admin/about.html", "x");
        write(data.path(), "admin--about.html.json", r#"{"who": "admin"}"#);
        let wanted = write(data.path(), "pages--about.html.json", r#"{"who": "pages"}"#);

        let hit = find_fixture_for_page(data.path(), &page, ws.path()).unwrap();
        assert_eq!(hit, wanted);
    }

    #[test]
    fn test_entry_file_metadata_match() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/dash.html", "x");
        let fixture = write(
            data.path(),
            "anything.json",
            r#"{"_templateContext": {"entryFile": "/abs/path/dash.html"}}"#,
        );

        let hit = find_fixture_for_page(data.path(), &page, ws.path()).unwrap();
        assert_eq!(hit, fixture);
    }

    #[test]
    fn test_included_files_metadata_match() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/widget.html", "x");
        let fixture = write(
            data.path(),
            "ctx.json",
            r#"{"_templateContext": {"entryFile": "base.html", "includedFiles": ["p/widget.html"]}}"#,
        );

        let hit = find_fixture_for_page(data.path(), &page, ws.path()).unwrap();
        assert_eq!(hit, fixture);
    }

    #[test]
    fn test_legacy_basename_match() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/pricing.html", "x");
        let fixture = write(data.path(), "pricing.html.json", r#"{"plan": "pro"}"#);

        let hit = find_fixture_for_page(data.path(), &page, ws.path()).unwrap();
        assert_eq!(hit, fixture);
    }

    #[test]
    fn test_legacy_match_disqualified_by_contradicting_entry() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/pricing.html", "x");
        write(
            data.path(),
            "pricing.html.json",
            r#"{"_templateContext": {"entryFile": "other.html"}}"#,
        );

        assert!(find_fixture_for_page(data.path(), &page, ws.path()).is_none());
    }

    #[test]
    fn test_no_match_returns_none() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/lonely.html", "x");
        write(data.path(), "unrelated.json", r#"{"a": 1}"#);

        assert!(find_fixture_for_page(data.path(), &page, ws.path()).is_none());
    }

    #[test]
    fn test_invalid_json_treated_as_absent() {
        let ws = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let page = write(ws.path(), "pages/x.html", "x");
        write(data.path(), "x.html.json", "{broken");

        assert!(find_fixture_for_page(data.path(), &page, ws.path()).is_none());
    }

    // ------------------------------------------------------------------------
    // Context data discovery
    // ------------------------------------------------------------------------

    #[test]
    fn test_explicit_data_file_wins() {
        let data = TempDir::new().unwrap();
        let linked = write(data.path(), "linked.json", r#"{"Site": "linked"}"#);
        write(
            data.path(),
            "base.html.json",
            r#"{"Site": "discovered"}"#,
        );

        let map = discover_context_data(
            Some(&linked),
            Some(data.path()),
            Some(Path::new("/x/base.html")),
        );
        assert_eq!(map.get("Site"), Some(&json!("linked")));
    }

    #[test]
    fn test_auto_discovery_by_entry_metadata() {
        let data = TempDir::new().unwrap();
        write(
            data.path(),
            "ctx.json",
            r#"{"Site": "meta", "_templateContext": {"entryFile": "base.html"}}"#,
        );

        let map =
            discover_context_data(None, Some(data.path()), Some(Path::new("/x/base.html")));
        assert_eq!(map.get("Site"), Some(&json!("meta")));
    }

    #[test]
    fn test_auto_discovery_by_sanitized_name() {
        let data = TempDir::new().unwrap();
        write(data.path(), "site--base.html.json", r#"{"Site": "named"}"#);

        let map =
            discover_context_data(None, Some(data.path()), Some(Path::new("/x/base.html")));
        assert_eq!(map.get("Site"), Some(&json!("named")));
    }

    #[test]
    fn test_discovery_without_candidates_is_empty() {
        let map = discover_context_data(None, None, None);
        assert!(map.is_empty());
    }
}
