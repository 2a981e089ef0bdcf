//! Template set and execution engine.
//!
//! A [`TemplateSet`] is a fresh namespace of named definitions with the
//! helper registry installed. Sets are built per call and discarded; no
//! parse tree survives between requests.
//!
//! Execution follows the dialect's semantics: the dot rebinds in `range`
//! and `with`, `$` refers to the executed definition's argument, missing
//! fields resolve to null and render as nothing, and interpolated values
//! are HTML-escaped unless a `safe*` helper marked them as markup.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value as Json;

use super::error::TemplateError;
use super::funcs::{self, Helper};
use super::parser::{self, Arg, Command, Definition, Node, Pipeline};

/// Nesting guard for mutually recursive template calls.
const MAX_DEPTH: usize = 500;

/// A value flowing through pipeline evaluation.
#[derive(Debug, Clone)]
pub enum Value {
    /// Ordinary data; escaped when written into HTML output.
    Data(Json),
    /// Pre-approved markup from a `safe*` helper; written verbatim.
    Markup(String),
}

impl Value {
    pub fn null() -> Self {
        Value::Data(Json::Null)
    }

    /// Collapse into plain JSON (markup degrades to a string).
    pub fn into_json(self) -> Json {
        match self {
            Value::Data(j) => j,
            Value::Markup(s) => Json::String(s),
        }
    }

    pub fn as_json(&self) -> Json {
        self.clone().into_json()
    }

    /// Dialect truthiness: null, false, zero, and empty containers are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Markup(s) => !s.is_empty(),
            Value::Data(j) => match j {
                Json::Null => false,
                Json::Bool(b) => *b,
                Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Json::String(s) => !s.is_empty(),
                Json::Array(a) => !a.is_empty(),
                Json::Object(o) => !o.is_empty(),
            },
        }
    }

    /// Plain (unescaped) string form, as helper functions see it.
    pub fn display(&self) -> String {
        match self {
            Value::Markup(s) => s.clone(),
            Value::Data(j) => match j {
                Json::Null => String::new(),
                Json::String(s) => s.clone(),
                Json::Bool(b) => b.to_string(),
                Json::Number(n) => format_number(n),
                other => other.to_string(),
            },
        }
    }
}

/// Render a JSON number the way template authors expect: integral floats
/// (the default decoding of JSON data) print without a trailing `.0`.
pub fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn escape_html(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

struct StoredDef {
    def: Definition,
    file: String,
}

/// A namespace of named definitions plus the helper registry.
pub struct TemplateSet {
    defs: HashMap<String, StoredDef>,
    funcs: HashMap<&'static str, Helper>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateSet {
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
            funcs: funcs::registry(),
        }
    }

    /// Parse `source` into the set. The top-level content lands under
    /// `name`; `define`/`block` bodies land under their own names. The last
    /// definition of a name wins.
    pub fn parse_source(
        &mut self,
        name: &str,
        source: &str,
        file: &str,
    ) -> Result<(), TemplateError> {
        let defs =
            parser::parse(name, source, &funcs::is_known).map_err(|e| TemplateError::Parse {
                file: file.to_string(),
                line: e.line,
                message: e.message,
            })?;
        for def in defs {
            self.defs.insert(
                def.name.clone(),
                StoredDef {
                    def,
                    file: file.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Read a file and parse it under its base name.
    pub fn parse_file(&mut self, path: &Path) -> Result<(), TemplateError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| TemplateError::Io(path.to_path_buf(), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parse_source(&name, &source, &path.display().to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Execute a named definition against a data value.
    pub fn execute(&self, name: &str, data: &Json) -> Result<String, TemplateError> {
        let stored = self
            .defs
            .get(name)
            .ok_or_else(|| TemplateError::MissingTemplate(name.to_string()))?;
        let mut exec = Exec {
            set: self,
            out: String::new(),
            depth: 0,
        };
        exec.exec_def(name, Value::Data(data.clone()))
            .map_err(|message| TemplateError::Exec {
                template: format!("{} ({})", name, stored.file),
                message,
            })?;
        Ok(exec.out)
    }
}

/// Per-definition invocation state: `$` and declared variables.
struct Frame {
    root: Value,
    vars: Vec<(String, Value)>,
}

struct Exec<'a> {
    set: &'a TemplateSet,
    out: String,
    depth: usize,
}

impl<'a> Exec<'a> {
    fn exec_def(&mut self, name: &str, arg: Value) -> Result<(), String> {
        let stored = self
            .set
            .defs
            .get(name)
            .ok_or_else(|| format!("template {name:?} not defined"))?;
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("template {name:?}: exceeded nesting depth"));
        }
        let mut frame = Frame {
            root: arg.clone(),
            vars: Vec::new(),
        };
        let result = self.walk(&stored.def.body, &arg, &mut frame);
        self.depth -= 1;
        result
    }

    fn walk(&mut self, nodes: &[Node], dot: &Value, frame: &mut Frame) -> Result<(), String> {
        for node in nodes {
            self.walk_node(node, dot, frame)
                .map_err(|e| at_line(node, e))?;
        }
        Ok(())
    }

    fn walk_node(&mut self, node: &Node, dot: &Value, frame: &mut Frame) -> Result<(), String> {
        match node {
            Node::Text(text) => {
                self.out.push_str(text);
            }
            Node::Action { pipe, .. } => {
                let value = self.eval_pipeline(pipe, dot, frame)?;
                if pipe.decl.is_empty() {
                    self.write_value(&value);
                } else {
                    self.bind_decl(pipe, value, frame)?;
                }
            }
            Node::If {
                pipe, then, els, ..
            } => {
                let cond = self.eval_pipeline(pipe, dot, frame)?;
                let mark = frame.vars.len();
                if cond.truthy() {
                    self.walk(then, dot, frame)?;
                } else {
                    self.walk(els, dot, frame)?;
                }
                frame.vars.truncate(mark);
            }
            Node::With {
                pipe, body, els, ..
            } => {
                let value = self.eval_pipeline(pipe, dot, frame)?;
                let mark = frame.vars.len();
                if value.truthy() {
                    if !pipe.decl.is_empty() {
                        self.bind_decl(pipe, value.clone(), frame)?;
                    }
                    self.walk(body, &value, frame)?;
                } else {
                    self.walk(els, dot, frame)?;
                }
                frame.vars.truncate(mark);
            }
            Node::Range {
                pipe, body, els, ..
            } => {
                self.exec_range(pipe, body, els, dot, frame)?;
            }
            Node::TemplateCall { name, pipe, .. } => {
                let arg = match pipe {
                    Some(p) => self.eval_pipeline(p, dot, frame)?,
                    None => Value::null(),
                };
                self.exec_def(name, arg)?;
            }
        }
        Ok(())
    }

    fn exec_range(
        &mut self,
        pipe: &Pipeline,
        body: &[Node],
        els: &[Node],
        dot: &Value,
        frame: &mut Frame,
    ) -> Result<(), String> {
        let value = self.eval_pipeline(pipe, dot, frame)?.into_json();
        let mark = frame.vars.len();

        let mut iterated = false;
        match value {
            Json::Array(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    iterated = true;
                    self.bind_range_vars(pipe, Json::from(i), item.clone(), frame);
                    self.walk(body, &Value::Data(item), frame)?;
                    frame.vars.truncate(mark);
                }
            }
            Json::Object(map) => {
                for (key, item) in map {
                    iterated = true;
                    self.bind_range_vars(pipe, Json::String(key), item.clone(), frame);
                    self.walk(body, &Value::Data(item), frame)?;
                    frame.vars.truncate(mark);
                }
            }
            Json::Number(n) => {
                // `range <n>` iterates 0..n.
                let count = n.as_i64().unwrap_or(0).max(0);
                for i in 0..count {
                    iterated = true;
                    self.bind_range_vars(pipe, Json::from(i), Json::from(i), frame);
                    self.walk(body, &Value::Data(Json::from(i)), frame)?;
                    frame.vars.truncate(mark);
                }
            }
            _ => {}
        }

        if !iterated {
            self.walk(els, dot, frame)?;
            frame.vars.truncate(mark);
        }
        Ok(())
    }

    /// Bind `$v :=` (element) or `$i, $v :=` (index/key, element).
    fn bind_range_vars(&self, pipe: &Pipeline, index: Json, element: Json, frame: &mut Frame) {
        match pipe.decl.len() {
            1 => frame
                .vars
                .push((pipe.decl[0].clone(), Value::Data(element))),
            2 => {
                frame.vars.push((pipe.decl[0].clone(), Value::Data(index)));
                frame
                    .vars
                    .push((pipe.decl[1].clone(), Value::Data(element)));
            }
            _ => {}
        }
    }

    /// Bind an action/with declaration: `:=` pushes, `=` reassigns.
    fn bind_decl(&self, pipe: &Pipeline, value: Value, frame: &mut Frame) -> Result<(), String> {
        let name = &pipe.decl[0];
        if pipe.is_assign {
            let slot = frame
                .vars
                .iter_mut()
                .rev()
                .find(|(n, _)| n == name)
                .ok_or_else(|| format!("undefined variable ${name}"))?;
            slot.1 = value;
        } else {
            frame.vars.push((name.clone(), value));
        }
        Ok(())
    }

    fn eval_pipeline(
        &mut self,
        pipe: &Pipeline,
        dot: &Value,
        frame: &mut Frame,
    ) -> Result<Value, String> {
        let mut prev: Option<Value> = None;
        for cmd in &pipe.cmds {
            prev = Some(self.eval_command(cmd, dot, frame, prev)?);
        }
        Ok(prev.unwrap_or_else(Value::null))
    }

    fn eval_command(
        &mut self,
        cmd: &Command,
        dot: &Value,
        frame: &mut Frame,
        prev: Option<Value>,
    ) -> Result<Value, String> {
        match &cmd.args[0] {
            Arg::Ident(name) => {
                let helper = self
                    .set
                    .funcs
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| format!("function {name:?} not defined"))?;
                let mut argv = Vec::with_capacity(cmd.args.len());
                for arg in &cmd.args[1..] {
                    argv.push(self.eval_arg(arg, dot, frame)?);
                }
                if let Some(p) = prev {
                    argv.push(p);
                }
                helper(&argv).map_err(|e| format!("{name}: {e}"))
            }
            first => {
                if cmd.args.len() > 1 {
                    return Err("can't give arguments to a non-function value".into());
                }
                if prev.is_some() {
                    return Err("can't pipe into a non-function value".into());
                }
                self.eval_arg(first, dot, frame)
            }
        }
    }

    fn eval_arg(&mut self, arg: &Arg, dot: &Value, frame: &mut Frame) -> Result<Value, String> {
        match arg {
            Arg::Field(fields) => resolve_fields(dot.clone(), fields),
            Arg::Variable(name) => self.lookup_var(name, frame),
            Arg::Chain { var, fields } => {
                let base = self.lookup_var(var, frame)?;
                resolve_fields(base, fields)
            }
            Arg::Str(s) => Ok(Value::Data(Json::String(s.clone()))),
            Arg::Number { value, is_int } => Ok(Value::Data(if *is_int {
                Json::from(*value as i64)
            } else {
                serde_json::Number::from_f64(*value)
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            })),
            Arg::Bool(b) => Ok(Value::Data(Json::Bool(*b))),
            Arg::Nil => Ok(Value::null()),
            Arg::Pipe(nested) => self.eval_pipeline(nested, dot, frame),
            Arg::Ident(name) => {
                let helper = self
                    .set
                    .funcs
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| format!("function {name:?} not defined"))?;
                helper(&[]).map_err(|e| format!("{name}: {e}"))
            }
        }
    }

    fn lookup_var(&self, name: &str, frame: &Frame) -> Result<Value, String> {
        if name.is_empty() {
            return Ok(frame.root.clone());
        }
        frame
            .vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| format!("undefined variable ${name}"))
    }

    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Markup(s) => self.out.push_str(s),
            Value::Data(j) => match j {
                Json::Null => {}
                Json::String(s) => escape_html(s, &mut self.out),
                Json::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
                Json::Number(n) => self.out.push_str(&format_number(n)),
                other => {
                    let rendered = other.to_string();
                    escape_html(&rendered, &mut self.out);
                }
            },
        }
    }
}

/// Resolve a dotted field chain, permissively: missing keys yield null,
/// but descending into a scalar is an error.
fn resolve_fields(base: Value, fields: &[String]) -> Result<Value, String> {
    let mut current = base.into_json();
    for field in fields {
        current = match current {
            Json::Object(mut map) => map.remove(field).unwrap_or(Json::Null),
            Json::Null => Json::Null,
            other => {
                return Err(format!(
                    "can't evaluate field {field} in value of type {}",
                    json_type_name(&other)
                ));
            }
        };
    }
    Ok(Value::Data(current))
}

fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn at_line(node: &Node, message: String) -> String {
    let line = match node {
        Node::Action { line, .. }
        | Node::If { line, .. }
        | Node::Range { line, .. }
        | Node::With { line, .. }
        | Node::TemplateCall { line, .. } => Some(*line),
        Node::Text(_) => None,
    };
    match line {
        Some(line) if !message.starts_with("line ") => format!("line {line}: {message}"),
        _ => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render_one(src: &str, data: Json) -> Result<String, TemplateError> {
        let mut set = TemplateSet::new();
        set.parse_source("t.html", src, "t.html")?;
        set.execute("t.html", &data)
    }

    fn render(src: &str, data: Json) -> String {
        render_one(src, data).unwrap()
    }

    // ------------------------------------------------------------------------
    // Basic interpolation
    // ------------------------------------------------------------------------

    #[test]
    fn test_plain_field() {
        assert_eq!(render("Hi {{.Name}}", json!({"Name": "Ada"})), "Hi Ada");
    }

    #[test]
    fn test_nested_field() {
        assert_eq!(
            render("{{.User.Name}}", json!({"User": {"Name": "Grace"}})),
            "Grace"
        );
    }

    #[test]
    fn test_missing_field_renders_empty() {
        assert_eq!(render("[{{.Nope}}]", json!({})), "[]");
    }

    #[test]
    fn test_html_escaping() {
        assert_eq!(
            render("{{.X}}", json!({"X": "<b>&</b>"})),
            "&lt;b&gt;&amp;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_safe_html_bypasses_escaping() {
        assert_eq!(
            render("{{.X | safeHTML}}", json!({"X": "<b>ok</b>"})),
            "<b>ok</b>"
        );
    }

    #[test]
    fn test_integral_float_prints_as_integer() {
        assert_eq!(render("{{.N}}", json!({"N": 12.0})), "12");
        assert_eq!(render("{{.N}}", json!({"N": 2.5})), "2.5");
    }

    // ------------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------------

    #[test]
    fn test_if_truthiness() {
        assert_eq!(render("{{if .A}}yes{{else}}no{{end}}", json!({"A": 1})), "yes");
        assert_eq!(render("{{if .A}}yes{{else}}no{{end}}", json!({"A": 0})), "no");
        assert_eq!(render("{{if .A}}yes{{else}}no{{end}}", json!({"A": []})), "no");
        assert_eq!(render("{{if .A}}yes{{else}}no{{end}}", json!({})), "no");
    }

    #[test]
    fn test_if_gt_flexible_numbers() {
        assert_eq!(
            render("{{if gt .Count 10}}many{{end}}", json!({"Count": 12.0})),
            "many"
        );
        assert_eq!(
            render("{{if gt .Count 10}}many{{end}}", json!({"Count": 9})),
            ""
        );
    }

    #[test]
    fn test_else_if() {
        let src = "{{if eq .N 1}}one{{else if eq .N 2}}two{{else}}other{{end}}";
        assert_eq!(render(src, json!({"N": 2})), "two");
        assert_eq!(render(src, json!({"N": 7})), "other");
    }

    #[test]
    fn test_range_array() {
        assert_eq!(
            render("{{range .Tags}}[{{.}}]{{end}}", json!({"Tags": ["a", "b"]})),
            "[a][b]"
        );
    }

    #[test]
    fn test_range_eq_literal() {
        assert_eq!(
            render(
                r#"{{range .Tags}}{{if eq . "featured"}}★{{end}}{{end}}"#,
                json!({"Tags": ["featured", "other"]})
            ),
            "★"
        );
    }

    #[test]
    fn test_range_else_on_empty() {
        assert_eq!(
            render("{{range .Items}}x{{else}}none{{end}}", json!({"Items": []})),
            "none"
        );
    }

    #[test]
    fn test_range_with_index_vars() {
        assert_eq!(
            render(
                "{{range $i, $v := .L}}{{$i}}={{$v}};{{end}}",
                json!({"L": ["a", "b"]})
            ),
            "0=a;1=b;"
        );
    }

    #[test]
    fn test_range_object_in_key_order() {
        assert_eq!(
            render(
                "{{range $k, $v := .M}}{{$k}}={{$v}};{{end}}",
                json!({"M": {"b": 2, "a": 1}})
            ),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_with_rebinds_dot() {
        assert_eq!(
            render(
                "{{with .User}}{{.Name}}{{else}}anon{{end}}",
                json!({"User": {"Name": "Lin"}})
            ),
            "Lin"
        );
        assert_eq!(
            render("{{with .User}}{{.Name}}{{else}}anon{{end}}", json!({})),
            "anon"
        );
    }

    #[test]
    fn test_chain_reaches_root_inside_range() {
        assert_eq!(
            render(
                "{{range .Items}}{{$.Title}}:{{.}};{{end}}",
                json!({"Title": "T", "Items": [1, 2]})
            ),
            "T:1;T:2;"
        );
    }

    // ------------------------------------------------------------------------
    // Definitions and template calls
    // ------------------------------------------------------------------------

    #[test]
    fn test_define_and_call() {
        let mut set = TemplateSet::new();
        set.parse_source(
            "page.html",
            r#"{{define "content"}}Hi {{.Name}}{{end}}"#,
            "page.html",
        )
        .unwrap();
        set.parse_source("layout.html", r#"<main>{{template "content" .}}</main>"#, "layout.html")
            .unwrap();
        let out = set.execute("layout.html", &json!({"Name": "Ada"})).unwrap();
        assert_eq!(out, "<main>Hi Ada</main>");
    }

    #[test]
    fn test_last_definition_wins() {
        let mut set = TemplateSet::new();
        set.parse_source("a.html", r#"{{define "x"}}first{{end}}"#, "a.html")
            .unwrap();
        set.parse_source("b.html", r#"{{define "x"}}second{{end}}"#, "b.html")
            .unwrap();
        set.parse_source("main.html", r#"{{template "x"}}"#, "main.html")
            .unwrap();
        assert_eq!(set.execute("main.html", &json!({})).unwrap(), "second");
    }

    #[test]
    fn test_missing_template_call_is_exec_error() {
        let err = render_one(r#"{{template "ghost" .}}"#, json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Exec { .. }));
        assert!(format!("{err}").contains("ghost"));
    }

    #[test]
    fn test_missing_entry_is_missing_template() {
        let set = TemplateSet::new();
        assert!(matches!(
            set.execute("nope", &json!({})),
            Err(TemplateError::MissingTemplate(_))
        ));
    }

    #[test]
    fn test_block_renders_inline() {
        assert_eq!(
            render(r#"{{block "side" .}}[{{.N}}]{{end}}"#, json!({"N": 3})),
            "[3]"
        );
    }

    // ------------------------------------------------------------------------
    // Variables and pipelines
    // ------------------------------------------------------------------------

    #[test]
    fn test_variable_declaration() {
        assert_eq!(render("{{$x := 5}}{{$x}}", json!({})), "5");
    }

    #[test]
    fn test_variable_reassignment() {
        assert_eq!(render("{{$x := 1}}{{$x = 2}}{{$x}}", json!({})), "2");
    }

    #[test]
    fn test_pipe_chain() {
        assert_eq!(
            render("{{.Name | upper | trim}}", json!({"Name": "  ada  "})),
            "ADA"
        );
    }

    #[test]
    fn test_nested_pipeline_argument() {
        assert_eq!(
            render("{{if (eq .A 1)}}hit{{end}}", json!({"A": 1.0})),
            "hit"
        );
    }

    #[test]
    fn test_field_on_scalar_is_error() {
        let err = render_one("{{.A.B}}", json!({"A": "str"})).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("field B"), "unexpected message: {msg}");
    }

    #[test]
    fn test_error_carries_line() {
        let err = render_one("line one\n{{.A.B}}", json!({"A": 5})).unwrap_err();
        assert!(format!("{err}").contains("line 2"));
    }
}
