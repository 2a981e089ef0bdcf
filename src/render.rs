//! Renderer entry points.
//!
//! Loads a set of template files into one fresh namespace and executes one
//! entry against a data map. All-or-nothing: any parse or execution failure
//! fails the call, citing the offending file. The renderer holds no state
//! between invocations.

use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use walkdir::WalkDir;

use crate::log;
use crate::template::error::TemplateError;
use crate::template::{SCAN_DENY_DIRS, TemplateSet, is_template_file};

/// Render `entry` against `data`.
///
/// With an explicit include list every file must parse; with an empty list
/// the workspace is walked and unparseable files are skipped with a
/// warning. A `target` names the definition to execute instead of the
/// entry file's own template.
pub fn render(
    entry: &Path,
    data: &Json,
    target: Option<&str>,
    files: &[PathBuf],
    workspace: &Path,
) -> Result<String, TemplateError> {
    let mut set = TemplateSet::new();

    if files.is_empty() {
        load_workspace_templates(&mut set, workspace, entry);
    } else {
        for file in files {
            set.parse_file(file)?;
        }
    }

    // The entry parses last so its definitions win name conflicts.
    set.parse_file(entry)?;

    let entry_name = base_name(entry);
    let name = match target {
        Some(t) => {
            if !set.contains(t) {
                return Err(TemplateError::MissingTemplate(t.to_string()));
            }
            t
        }
        None => &entry_name,
    };

    set.execute(name, data)
}

/// Best-effort load of every template under the workspace.
fn load_workspace_templates(set: &mut TemplateSet, workspace: &Path, entry: &Path) {
    let walker = WalkDir::new(workspace).into_iter().filter_entry(|e| {
        if !e.file_type().is_dir() || e.depth() == 0 {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        !name.starts_with('.') && !SCAN_DENY_DIRS.contains(&name.as_ref())
    });

    for entry_item in walker.into_iter().flatten() {
        let path = entry_item.path();
        if !entry_item.file_type().is_file() || !is_template_file(path) || path == entry {
            continue;
        }
        if let Err(err) = set.parse_file(path) {
            log!("render"; "warning: failed to parse {}: {err}", path.display());
        }
    }
}

pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
