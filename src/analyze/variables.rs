//! Variable and literal extraction from parsed definitions.
//!
//! Walks a definition body tracking a single scope:
//!
//! - empty at the top of the body;
//! - `range:<array-path>` inside a `range` whose pipeline names the array;
//! - `range` (unknown array) when it does not;
//! - `with` inside `with`;
//! - inherited unchanged across `if` and plain actions.
//!
//! Fields seen under `range:<X>` are recorded as `X[0].<field>`; fields
//! under an anonymous `range` are discarded. `$`-rooted chains are always
//! recorded at the root with context `chain`. Comparison commands emit
//! specialized descriptors (`eq-string`, `eq-number`, `gt-number`) carrying
//! the literal as the suggested value, and `eq`/`ne` string literals inside
//! a range body feed a per-array literal sweep used later for suggested
//! array values.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value as Json, json};

use crate::template::funcs::COMPARISON_FUNCS;
use crate::template::parser::{Arg, Command, Definition, Node, Pipeline};

/// Inferred variable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Bool,
    Object,
    Array,
}

/// One extracted variable descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct VariableDescriptor {
    pub path: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    pub context: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<Json>,
}

/// Everything extracted from one definition.
#[derive(Debug, Default)]
pub struct Extraction {
    pub variables: Vec<VariableDescriptor>,
    /// Distinct `eq`/`ne` string literals seen inside a range body, keyed by
    /// the array path being iterated.
    pub literals: BTreeMap<String, Vec<String>>,
    /// Template names called from this definition's body.
    pub calls: Vec<String>,
}

/// The walker's scope.
#[derive(Debug, Clone)]
enum Scope {
    Top,
    With,
    /// Inside a `range` whose array path could not be determined.
    RangeUnknown,
    /// Inside a `range` over the named array path.
    Range(String),
}

/// The extraction site of the pipeline being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    /// A plain action; the context comes from the scope.
    Inherit,
    If,
    With,
    Template,
    RangeCollection,
}

/// Extract variables, literals, and template calls from one definition.
pub fn extract(def: &Definition, file: &str) -> Extraction {
    let mut walker = Walker {
        file,
        out: Extraction::default(),
    };
    walker.walk_nodes(&def.body, &Scope::Top);
    walker.out
}

struct Walker<'a> {
    file: &'a str,
    out: Extraction,
}

impl<'a> Walker<'a> {
    fn walk_nodes(&mut self, nodes: &[Node], scope: &Scope) {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Action { pipe, .. } => {
                    self.walk_pipeline(pipe, Site::Inherit, scope);
                }
                Node::If {
                    pipe, then, els, ..
                } => {
                    self.walk_pipeline(pipe, Site::If, scope);
                    self.walk_nodes(then, scope);
                    self.walk_nodes(els, scope);
                }
                Node::With {
                    pipe, body, els, ..
                } => {
                    self.walk_pipeline(pipe, Site::With, scope);
                    self.walk_nodes(body, &Scope::With);
                    self.walk_nodes(els, &Scope::With);
                }
                Node::Range {
                    pipe, body, els, ..
                } => {
                    self.walk_pipeline(pipe, Site::RangeCollection, scope);
                    let inner = match range_array_path(pipe, scope) {
                        Some(path) => Scope::Range(path),
                        None => Scope::RangeUnknown,
                    };
                    self.walk_nodes(body, &inner);
                    self.walk_nodes(els, &inner);
                }
                Node::TemplateCall { name, pipe, .. } => {
                    if !self.out.calls.contains(name) {
                        self.out.calls.push(name.clone());
                    }
                    if let Some(pipe) = pipe {
                        self.walk_pipeline(pipe, Site::Template, scope);
                    }
                }
            }
        }
    }

    fn walk_pipeline(&mut self, pipe: &Pipeline, site: Site, scope: &Scope) {
        for cmd in &pipe.cmds {
            self.walk_command(cmd, site, scope);
        }
    }

    fn walk_command(&mut self, cmd: &Command, site: Site, scope: &Scope) {
        if let Some(Arg::Ident(func)) = cmd.args.first()
            && COMPARISON_FUNCS.contains(&func.as_str())
            && self.specialize_comparison(func, &cmd.args[1..], site, scope)
        {
            return;
        }

        for arg in &cmd.args {
            match arg {
                Arg::Field(fields) => self.record_field(fields, site, scope),
                Arg::Chain { var, fields } if var.is_empty() => {
                    self.record_chain(fields, "chain", VarType::String, None);
                }
                Arg::Pipe(nested) => self.walk_pipeline(nested, site, scope),
                _ => {}
            }
        }
    }

    /// Handle a comparison command. Returns true when a specialized
    /// descriptor was emitted for its arguments.
    fn specialize_comparison(
        &mut self,
        func: &str,
        args: &[Arg],
        site: Site,
        scope: &Scope,
    ) -> bool {
        let mut fields: Vec<&[String]> = Vec::new();
        let mut chains: Vec<&[String]> = Vec::new();
        let mut strings: Vec<&str> = Vec::new();
        let mut numbers: Vec<(f64, bool)> = Vec::new();
        let mut nested_pipes: Vec<&Pipeline> = Vec::new();

        for arg in args {
            match arg {
                Arg::Field(f) => fields.push(f),
                Arg::Chain { var, fields: f } if var.is_empty() => chains.push(f),
                Arg::Str(s) => strings.push(s),
                Arg::Number { value, is_int } => numbers.push((*value, *is_int)),
                Arg::Pipe(nested) => nested_pipes.push(nested),
                _ => {}
            }
        }

        // Literal sweep: distinct eq/ne string literals per known array.
        if matches!(func, "eq" | "ne")
            && let Scope::Range(array) = scope
        {
            for s in &strings {
                let bucket = self.out.literals.entry(array.clone()).or_default();
                if !bucket.iter().any(|l| l == s) {
                    bucket.push((*s).to_string());
                }
            }
        }

        let is_equality = matches!(func, "eq" | "ne");
        let (context, var_type, suggested) = match (strings.is_empty(), numbers.is_empty()) {
            // Exactly one literal kind must be present.
            (false, true) if is_equality => (
                "eq-string",
                VarType::String,
                Some(Json::String(strings[0].to_string())),
            ),
            (true, false) if is_equality => (
                "eq-number",
                VarType::Number,
                Some(Json::from(numbers[0].0 as i64)),
            ),
            (true, false) => (
                "gt-number",
                VarType::Number,
                Some(if numbers[0].1 {
                    Json::from(numbers[0].0 as i64)
                } else {
                    json!(numbers[0].0)
                }),
            ),
            _ => return false,
        };

        for field in fields {
            if let Some(path) = self.scoped_path(field, scope) {
                self.push(path, var_type, context, suggested.clone());
            }
        }
        for chain in chains {
            self.record_chain(chain, context, var_type, suggested.clone());
        }
        for nested in nested_pipes {
            self.walk_pipeline(nested, site, scope);
        }
        true
    }

    /// Apply the scope-prefix rule to a field chain. Returns None when the
    /// field must be discarded (bare dot, or anonymous range).
    fn scoped_path(&self, fields: &[String], scope: &Scope) -> Option<String> {
        if fields.is_empty() {
            return None;
        }
        let joined = fields.join(".");
        match scope {
            Scope::Range(array) => Some(format!("{array}[0].{joined}")),
            Scope::RangeUnknown => None,
            Scope::Top | Scope::With => Some(joined),
        }
    }

    fn record_field(&mut self, fields: &[String], site: Site, scope: &Scope) {
        let Some(path) = self.scoped_path(fields, scope) else {
            return;
        };
        let context = match (site, scope) {
            // The range pipe itself and template calls keep their own site.
            (Site::RangeCollection, _) => "range-collection",
            (Site::Template, _) => "template",
            (_, Scope::Range(_)) => "range",
            (Site::If, _) => "if",
            (Site::With, _) => "with",
            (Site::Inherit, Scope::With) => "with",
            (Site::Inherit, _) => "",
        };
        let var_type = infer_type(context, &path);
        self.push(path, var_type, context, default_suggestion(var_type));
    }

    fn record_chain(
        &mut self,
        fields: &[String],
        context: &str,
        var_type: VarType,
        suggested: Option<Json>,
    ) {
        if fields.is_empty() {
            return;
        }
        let suggested = suggested.or_else(|| default_suggestion(var_type));
        self.push(fields.join("."), var_type, context, suggested);
    }

    fn push(&mut self, path: String, var_type: VarType, context: &str, suggested: Option<Json>) {
        self.out.variables.push(VariableDescriptor {
            path,
            var_type,
            context: context.to_string(),
            file_path: self.file.to_string(),
            suggested,
        });
    }
}

/// The array path a `range` iterates: the first field argument of its
/// pipeline, scope-prefixed so nested ranges compose (`A[0].B`).
fn range_array_path(pipe: &Pipeline, scope: &Scope) -> Option<String> {
    for cmd in &pipe.cmds {
        for arg in &cmd.args {
            if let Arg::Field(fields) = arg
                && !fields.is_empty()
            {
                let joined = fields.join(".");
                return match scope {
                    Scope::Range(array) => Some(format!("{array}[0].{joined}")),
                    Scope::RangeUnknown => None,
                    _ => Some(joined),
                };
            }
        }
    }
    None
}

/// Context-driven type inference for non-specialized descriptors.
fn infer_type(context: &str, path: &str) -> VarType {
    match context {
        "range-collection" => VarType::Array,
        "range" => match path.split_once("[0].") {
            Some((_, rest)) if rest.contains('.') => VarType::Object,
            _ => VarType::String,
        },
        "if" | "with" => VarType::String,
        "template" => {
            if path.contains('.') {
                VarType::String
            } else {
                VarType::Object
            }
        }
        _ => VarType::String,
    }
}

/// Default suggested value per inferred type. Array suggestions are
/// recomputed by the analyzer once all descriptors are known.
pub fn default_suggestion(var_type: VarType) -> Option<Json> {
    Some(match var_type {
        VarType::String => Json::String(String::new()),
        VarType::Number => Json::from(0),
        VarType::Bool => Json::Bool(false),
        VarType::Object => json!({}),
        VarType::Array => json!([{}]),
    })
}
