//! Hypermedia (htmx) attribute extraction from raw template text.
//!
//! The scan is textual, line by line, so it works on files the template
//! parser rejects. Sibling attributes (`hx-target`, `hx-swap`,
//! `hx-trigger`) are looked up in a window around the matching line to
//! catch multi-line tags.

use regex::Regex;
use serde::Serialize;

/// Window around a matching line searched for sibling attributes.
const CONTEXT_BEFORE: usize = 3;
const CONTEXT_AFTER: usize = 4;

/// Maximum length of the captured context line.
const CONTEXT_CLIP: usize = 100;

/// The request-issuing attributes recognised by the scanner.
const REQUEST_ATTRS: &[&str] = &["hx-get", "hx-post", "hx-put", "hx-delete", "hx-patch"];

/// One embedded request descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct HtmxDependency {
    /// The attribute that issues the request (`hx-get`, `hx-post`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub target: String,
    pub swap: String,
    pub trigger: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub line: usize,
    pub context: String,
}

/// Aggregated hypermedia findings for an analysis.
#[derive(Debug, Default, Serialize)]
pub struct HtmxInfo {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub dependencies: Vec<HtmxDependency>,
}

impl HtmxInfo {
    /// Whether anything at all was found.
    pub fn is_empty(&self) -> bool {
        !self.detected && self.version.is_none() && self.dependencies.is_empty()
    }
}

/// Compiled attribute patterns, built once per analysis run.
pub struct HtmxScanner {
    request_patterns: Vec<(&'static str, Regex)>,
    target_re: Regex,
    swap_re: Regex,
    trigger_re: Regex,
    version_re: Regex,
}

fn attr_regex(attr: &str) -> Regex {
    Regex::new(&format!(r#"{attr}\s*=\s*["']([^"']+)["']"#)).expect("valid attribute pattern")
}

impl Default for HtmxScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmxScanner {
    pub fn new() -> Self {
        Self {
            request_patterns: REQUEST_ATTRS
                .iter()
                .map(|attr| (*attr, attr_regex(attr)))
                .collect(),
            target_re: attr_regex("hx-target"),
            swap_re: attr_regex("hx-swap"),
            trigger_re: attr_regex("hx-trigger"),
            version_re: Regex::new(r"htmx\.org@([0-9.]+)").expect("valid version pattern"),
        }
    }

    /// Scan one file's raw text, appending findings to `info`.
    pub fn scan(&self, file_path: &str, content: &str, info: &mut HtmxInfo) {
        // Script-tag include of the runtime, with an optional pinned version.
        if content.contains("htmx.org") || content.contains("unpkg.com/htmx") {
            info.detected = true;
            if info.version.is_none()
                && let Some(caps) = self.version_re.captures(content)
            {
                info.version = Some(caps[1].to_string());
            }
        }

        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            for (attr, pattern) in &self.request_patterns {
                for caps in pattern.captures_iter(line) {
                    let window_start = idx.saturating_sub(CONTEXT_BEFORE);
                    let window_end = (idx + CONTEXT_AFTER).min(lines.len());
                    let window = lines[window_start..window_end].join(" ");

                    info.dependencies.push(HtmxDependency {
                        kind: (*attr).to_string(),
                        url: caps[1].to_string(),
                        target: capture_in(&self.target_re, &window),
                        swap: capture_in(&self.swap_re, &window),
                        trigger: capture_in(&self.trigger_re, &window),
                        file_path: file_path.to_string(),
                        line: idx + 1,
                        context: clip(line.trim()),
                    });
                    info.detected = true;
                }
            }
        }
    }
}

fn capture_in(re: &Regex, window: &str) -> String {
    re.captures(window)
        .map(|c| c[1].to_string())
        .unwrap_or_default()
}

/// Clip a context line to [`CONTEXT_CLIP`] characters.
fn clip(line: &str) -> String {
    if line.chars().count() <= CONTEXT_CLIP {
        return line.to_string();
    }
    let mut out: String = line.chars().take(CONTEXT_CLIP - 3).collect();
    out.push_str("...");
    out
}
