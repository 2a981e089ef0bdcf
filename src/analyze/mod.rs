//! Graph analysis over a set of template files.
//!
//! Composes the parser, the variable extractor, and the hypermedia scanner
//! over an entry file plus an include list (or, with no include list, every
//! template discovered in the workspace). Produces the Analysis Result
//! serialized for the external client.
//!
//! The analyzer is maximally permissive: a parse failure in a non-entry
//! file logs a warning and skips the file; only an unreadable or invalid
//! entry file fails the call.

pub mod htmx;
pub mod variables;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value as Json;
use walkdir::WalkDir;

use crate::log;
use crate::template::error::TemplateError;
use crate::template::parser;
use crate::template::{SCAN_DENY_DIRS, funcs, is_template_file};
use htmx::{HtmxInfo, HtmxScanner};
use variables::{VarType, VariableDescriptor};

/// One named template definition in the result.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateDef {
    pub name: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "isBlock")]
    pub is_block: bool,
    pub calls: Vec<String>,
}

/// One template-name dependency.
#[derive(Debug, Clone, Serialize)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    /// The file providing the definition, when some included file does.
    #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// The aggregate analysis result.
#[derive(Debug, Serialize)]
pub struct AnalysisResult {
    #[serde(rename = "entryFile")]
    pub entry_file: String,
    pub templates: BTreeMap<String, TemplateDef>,
    pub variables: Vec<VariableDescriptor>,
    pub dependencies: Vec<Dependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htmx: Option<HtmxInfo>,
}

/// Accumulating analyzer. Build one per call; it owns all transient state.
pub struct Analyzer {
    workspace: PathBuf,
    templates: BTreeMap<String, TemplateDef>,
    variables: Vec<VariableDescriptor>,
    seen_vars: HashSet<(String, String)>,
    literals: BTreeMap<String, Vec<String>>,
    dependencies: Vec<Dependency>,
    seen_files: HashSet<PathBuf>,
    htmx: HtmxInfo,
    scanner: HtmxScanner,
}

impl Analyzer {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            templates: BTreeMap::new(),
            variables: Vec::new(),
            seen_vars: HashSet::new(),
            literals: BTreeMap::new(),
            dependencies: Vec::new(),
            seen_files: HashSet::new(),
            htmx: HtmxInfo::default(),
            scanner: HtmxScanner::new(),
        }
    }

    /// Analyze the entry file plus either the explicit include list or the
    /// whole workspace.
    pub fn analyze(
        mut self,
        entry: &Path,
        files: &[PathBuf],
    ) -> Result<AnalysisResult, TemplateError> {
        self.analyze_file(entry)?;

        if files.is_empty() {
            self.scan_workspace();
        } else {
            for file in files {
                if let Err(err) = self.analyze_file(file) {
                    log!("inspect"; "warning: failed to analyze {}: {err}", file.display());
                }
            }
        }

        Ok(self.finish(entry))
    }

    fn analyze_file(&mut self, path: &Path) -> Result<(), TemplateError> {
        if !self.seen_files.insert(path.to_path_buf()) {
            return Ok(());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| TemplateError::Io(path.to_path_buf(), e))?;
        let file_label = path.display().to_string();

        // Hypermedia attributes are scanned textually even if parsing fails.
        self.scanner.scan(&file_label, &content, &mut self.htmx);

        let base_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let defs = parser::parse(&base_name, &content, &funcs::is_known).map_err(|e| {
            TemplateError::Parse {
                file: file_label.clone(),
                line: e.line,
                message: e.message,
            }
        })?;

        for def in &defs {
            let extraction = variables::extract(def, &file_label);

            self.templates.insert(
                def.name.clone(),
                TemplateDef {
                    name: def.name.clone(),
                    file_path: file_label.clone(),
                    is_block: def.is_block,
                    calls: extraction.calls.clone(),
                },
            );

            for var in extraction.variables {
                if self
                    .seen_vars
                    .insert((var.path.clone(), var.context.clone()))
                {
                    self.variables.push(var);
                }
            }

            for (array, lits) in extraction.literals {
                let bucket = self.literals.entry(array).or_default();
                for lit in lits {
                    if !bucket.contains(&lit) {
                        bucket.push(lit);
                    }
                }
            }

            for call in extraction.calls {
                if !self.dependencies.iter().any(|d| d.name == call) {
                    self.dependencies.push(Dependency {
                        name: call,
                        kind: "template".to_string(),
                        required: true,
                        file_path: None,
                    });
                }
            }
        }

        Ok(())
    }

    /// Auto-discover templates under the workspace, skipping hidden
    /// directories and the usual vendored trees.
    fn scan_workspace(&mut self) {
        let walker = WalkDir::new(&self.workspace).into_iter().filter_entry(|e| {
            if !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            // The workspace root itself may be `.` or hidden-looking.
            if e.depth() == 0 {
                return true;
            }
            !name.starts_with('.') && !SCAN_DENY_DIRS.contains(&name.as_ref())
        });

        for entry in walker.into_iter().flatten() {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_template_file(path) {
                continue;
            }
            if self.seen_files.contains(path) {
                continue;
            }
            if let Err(err) = self.analyze_file(path) {
                log!("inspect"; "warning: failed to analyze {}: {err}", path.display());
            }
        }
    }

    fn finish(mut self, entry: &Path) -> AnalysisResult {
        // A dependency is satisfied when some included file defines it.
        for dep in &mut self.dependencies {
            if let Some(def) = self.templates.get(&dep.name) {
                dep.file_path = Some(def.file_path.clone());
            }
        }

        let mut vars = dedupe_by_priority(self.variables);
        recompute_array_suggestions(&mut vars, &self.literals);
        let vars = prune_redundant(vars, &self.literals);

        let htmx = if self.htmx.is_empty() {
            None
        } else {
            self.htmx.detected = true;
            Some(self.htmx)
        };

        AnalysisResult {
            entry_file: entry.display().to_string(),
            templates: self.templates,
            variables: vars,
            dependencies: self.dependencies,
            htmx,
        }
    }
}

// ============================================================================
// Descriptor post-processing (pure functions over the flat list)
// ============================================================================

/// Context priority for cross-context deduplication. A higher number wins.
fn context_priority(context: &str) -> u8 {
    match context {
        "eq-number" | "gt-number" => 10,
        "eq-string" => 9,
        "range-collection" => 8,
        "range" => 5,
        "if" | "with" => 3,
        "template" => 2,
        "chain" => 1,
        _ => 0,
    }
}

/// Keep one descriptor per path: the one with the highest-priority context,
/// first occurrence winning ties. Output preserves first-occurrence order.
fn dedupe_by_priority(vars: Vec<VariableDescriptor>) -> Vec<VariableDescriptor> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, VariableDescriptor> = HashMap::new();

    for var in vars {
        match best.get(&var.path) {
            None => {
                order.push(var.path.clone());
                best.insert(var.path.clone(), var);
            }
            Some(existing) => {
                if context_priority(&var.context) > context_priority(&existing.context) {
                    best.insert(var.path.clone(), var);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|path| best.remove(&path))
        .collect()
}

/// Recompute array suggestions now that all descriptors are known: an array
/// with `[0].<field>` descendants suggests `[{}]`; one whose body only
/// compared the item against string literals suggests those literals.
fn recompute_array_suggestions(
    vars: &mut [VariableDescriptor],
    literals: &BTreeMap<String, Vec<String>>,
) {
    let paths: HashSet<String> = vars.iter().map(|v| v.path.clone()).collect();

    for var in vars.iter_mut() {
        if var.var_type != VarType::Array {
            continue;
        }
        let item_prefix = format!("{}[0].", var.path);
        let has_item_fields = paths.iter().any(|p| p.starts_with(&item_prefix));

        var.suggested = Some(if has_item_fields {
            serde_json::json!([{}])
        } else if let Some(lits) = literals.get(&var.path).filter(|l| !l.is_empty()) {
            Json::Array(lits.iter().cloned().map(Json::String).collect())
        } else {
            serde_json::json!([{}])
        });
    }
}

/// Drop redundant top-level descriptors:
///
/// - a single-segment path that also appears as an array-item field
///   (`<array>[0].X`) is a spurious shadow of that field;
/// - a single-segment array in the same position is kept only when it has
///   its own item descriptors or collected literals.
fn prune_redundant(
    vars: Vec<VariableDescriptor>,
    literals: &BTreeMap<String, Vec<String>>,
) -> Vec<VariableDescriptor> {
    let remainders: HashSet<String> = vars
        .iter()
        .filter_map(|v| v.path.split_once("[0].").map(|(_, rest)| rest.to_string()))
        .collect();
    let paths: Vec<String> = vars.iter().map(|v| v.path.clone()).collect();

    vars.into_iter()
        .filter(|var| {
            if var.path.contains('.') {
                return true;
            }
            if !remainders.contains(var.path.as_str()) {
                return true;
            }
            if var.var_type == VarType::Array {
                let item_prefix = format!("{}[0].", var.path);
                let has_items = paths.iter().any(|p| p.starts_with(&item_prefix));
                let has_literals = literals.get(&var.path).is_some_and(|l| !l.is_empty());
                return has_items || has_literals;
            }
            false
        })
        .collect()
}
