//! Text and URL-path helpers shared by the navigation model and the server.

use std::collections::BTreeMap;
use std::path::Path;

/// Capitalize the first letter of each word. Words are delimited by
/// whitespace, `-`, `_`, and punctuation; other characters pass through.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() || c == '-' || c == '_' || c.is_ascii_punctuation() {
            out.push(c);
            at_word_start = true;
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Derive a page title from a file's base name: `-` and `_` become spaces,
/// then the result is title-cased.
pub fn title_from_name(name: &str) -> String {
    title_case(&name.replace(['-', '_'], " "))
}

/// Derive a url-path from a path relative to the pages root, extension
/// already stripped by the caller. `index` maps to its directory; the root
/// directory yields `/`. The result always starts with `/` and never ends
/// with `/` except for the root itself.
pub fn url_path_from_rel(dir: &Path, name: &str) -> String {
    let dir = dir.to_string_lossy().replace('\\', "/");
    let dir = dir.trim_matches('.').trim_matches('/');

    let mut url = if name == "index" {
        format!("/{dir}")
    } else if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("/{dir}/{name}")
    };

    while url.len() > 1 && url.ends_with('/') {
        url.pop();
    }
    if url.is_empty() {
        url.push('/');
    }
    url
}

/// Normalize a request path: strip the trailing slash, keep the root.
pub fn normalize_url_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Project process environment variables carrying `prefix` into a map,
/// with the prefix stripped. No other variables are consulted.
pub fn env_map(prefix: &str) -> BTreeMap<String, String> {
    std::env::vars()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|rest| (rest.to_string(), v)))
        .collect()
}
