//! Parser for the template dialect.
//!
//! Turns the lexer's item stream into named definitions. Every file yields a
//! root definition under the caller-supplied name plus one definition per
//! `define`/`block`. Nodes form a tagged tree with explicit child vectors so
//! extractors can walk them iteratively.

use super::lexer::{self, Item, Token};

/// A parsed named definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    /// True when the definition came from a `block` action (define + call).
    pub is_block: bool,
    pub body: Vec<Node>,
}

/// One node of a definition body.
#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Action {
        pipe: Pipeline,
        line: usize,
    },
    If {
        pipe: Pipeline,
        then: Vec<Node>,
        els: Vec<Node>,
        line: usize,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        els: Vec<Node>,
        line: usize,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        els: Vec<Node>,
        line: usize,
    },
    TemplateCall {
        name: String,
        pipe: Option<Pipeline>,
        line: usize,
    },
}

/// A pipeline: optional variable declarations and `|`-joined commands.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    /// Declared variable names (`$i, $v :=`), without the `$`.
    pub decl: Vec<String>,
    /// True when the pipeline reassigns (`=`) instead of declaring (`:=`).
    pub is_assign: bool,
    pub cmds: Vec<Command>,
}

/// One command of a pipeline: an ordered argument list.
#[derive(Debug, Clone)]
pub struct Command {
    pub args: Vec<Arg>,
}

/// One argument node.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Dotted field chain on the current value; empty = the dot itself.
    Field(Vec<String>),
    /// Root-scoped chain: `$.A.B` (var name empty) or `$x.A.B`.
    Chain { var: String, fields: Vec<String> },
    /// A plain variable reference `$x`; `$` alone has an empty name.
    Variable(String),
    /// A function identifier.
    Ident(String),
    Str(String),
    Number { value: f64, is_int: bool },
    Bool(bool),
    Nil,
    /// A parenthesized nested pipeline.
    Pipe(Box<Pipeline>),
}

/// A parse failure with the source line.
#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Parse a source file into definitions. The top-level content becomes a
/// definition named `root_name`; `define`/`block` bodies become their own
/// definitions. `is_func` validates identifiers in function position.
pub fn parse(
    root_name: &str,
    source: &str,
    is_func: &dyn Fn(&str) -> bool,
) -> Result<Vec<Definition>, ParseError> {
    let items = lexer::lex(source).map_err(|e| ParseError {
        line: e.line,
        message: e.message,
    })?;

    let mut parser = Parser {
        items,
        pos: 0,
        is_func,
        defs: Vec::new(),
    };
    let (body, term) = parser.parse_list()?;
    if let Some((keyword, line)) = term {
        return Err(ParseError {
            line,
            message: format!("unexpected {{{{{keyword}}}}}"),
        });
    }

    let mut defs = parser.defs;
    defs.push(Definition {
        name: root_name.to_string(),
        is_block: false,
        body,
    });
    Ok(defs)
}

struct Parser<'a> {
    items: Vec<Item>,
    pos: usize,
    is_func: &'a dyn Fn(&str) -> bool,
    defs: Vec<Definition>,
}

/// A terminator keyword that ended a list: `end`, `else`, or `else if`.
type Terminator = Option<(String, usize)>;

impl<'a> Parser<'a> {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Terminator), ParseError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            match &self.items[self.pos] {
                Item::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    self.pos += 1;
                }
                Item::Action { tokens, line } => {
                    let line = *line;
                    let tokens = tokens.clone();
                    self.pos += 1;
                    match tokens.first() {
                        Some(Token::Ident(kw)) if kw == "end" => {
                            return Ok((nodes, Some(("end".into(), line))));
                        }
                        Some(Token::Ident(kw)) if kw == "else" => {
                            // `{{else}}` or `{{else if <pipeline>}}`.
                            let keyword = if matches!(tokens.get(1), Some(Token::Ident(k)) if k == "if")
                            {
                                // Re-queue the `if` portion as a fresh action.
                                self.pos -= 1;
                                self.items[self.pos] = Item::Action {
                                    tokens: tokens[1..].to_vec(),
                                    line,
                                };
                                "else if"
                            } else {
                                "else"
                            };
                            return Ok((nodes, Some((keyword.into(), line))));
                        }
                        Some(Token::Ident(kw)) if kw == "if" => {
                            nodes.push(self.parse_branch(&tokens[1..], line, BranchKind::If)?);
                        }
                        Some(Token::Ident(kw)) if kw == "range" => {
                            nodes.push(self.parse_branch(&tokens[1..], line, BranchKind::Range)?);
                        }
                        Some(Token::Ident(kw)) if kw == "with" => {
                            nodes.push(self.parse_branch(&tokens[1..], line, BranchKind::With)?);
                        }
                        Some(Token::Ident(kw)) if kw == "template" => {
                            nodes.push(self.parse_template_call(&tokens[1..], line)?);
                        }
                        Some(Token::Ident(kw)) if kw == "block" => {
                            nodes.push(self.parse_block(&tokens[1..], line)?);
                        }
                        Some(Token::Ident(kw)) if kw == "define" => {
                            self.parse_define(&tokens[1..], line)?;
                        }
                        Some(_) => {
                            let pipe = self.parse_pipeline(&tokens, line, true)?;
                            nodes.push(Node::Action { pipe, line });
                        }
                        None => {}
                    }
                }
            }
        }
        Ok((nodes, None))
    }

    /// Parse the body (and optional else list) of `if`/`range`/`with`.
    fn parse_branch(
        &mut self,
        pipe_tokens: &[Token],
        line: usize,
        kind: BranchKind,
    ) -> Result<Node, ParseError> {
        let allow_decl = matches!(kind, BranchKind::Range | BranchKind::With);
        let pipe = self.parse_pipeline(pipe_tokens, line, allow_decl)?;

        let (then, term) = self.parse_list()?;
        let els = match term {
            Some((t, _)) if t == "end" => Vec::new(),
            Some((t, else_line)) if t == "else" => {
                let (els, term) = self.parse_list()?;
                if !matches!(term, Some((ref t, _)) if t == "end") {
                    return Err(ParseError {
                        line: else_line,
                        message: "expected {{end}} after {{else}}".into(),
                    });
                }
                els
            }
            Some((t, _)) if t == "else if" => {
                // The re-queued `if` action becomes the sole else node and
                // consumes the shared `end`.
                let Item::Action { tokens, line } = self.items[self.pos].clone() else {
                    unreachable!("else-if requeues an action");
                };
                self.pos += 1;
                vec![self.parse_branch(&tokens[1..], line, BranchKind::If)?]
            }
            _ => {
                return Err(ParseError {
                    line,
                    message: format!("unclosed {{{{{}}}}}", kind.keyword()),
                });
            }
        };

        Ok(match kind {
            BranchKind::If => Node::If {
                pipe,
                then,
                els,
                line,
            },
            BranchKind::Range => Node::Range {
                pipe,
                body: then,
                els,
                line,
            },
            BranchKind::With => Node::With {
                pipe,
                body: then,
                els,
                line,
            },
        })
    }

    fn parse_template_call(&mut self, tokens: &[Token], line: usize) -> Result<Node, ParseError> {
        let Some(Token::Str(name)) = tokens.first() else {
            return Err(ParseError {
                line,
                message: "template action requires a quoted name".into(),
            });
        };
        let pipe = if tokens.len() > 1 {
            Some(self.parse_pipeline(&tokens[1..], line, false)?)
        } else {
            None
        };
        Ok(Node::TemplateCall {
            name: name.clone(),
            pipe,
            line,
        })
    }

    fn parse_block(&mut self, tokens: &[Token], line: usize) -> Result<Node, ParseError> {
        let Some(Token::Str(name)) = tokens.first() else {
            return Err(ParseError {
                line,
                message: "block action requires a quoted name".into(),
            });
        };
        let pipe = self.parse_pipeline(&tokens[1..], line, false)?;
        let (body, term) = self.parse_list()?;
        if !matches!(term, Some((ref t, _)) if t == "end") {
            return Err(ParseError {
                line,
                message: format!("unclosed {{{{block {name:?}}}}}"),
            });
        }
        self.defs.push(Definition {
            name: name.clone(),
            is_block: true,
            body,
        });
        Ok(Node::TemplateCall {
            name: name.clone(),
            pipe: Some(pipe),
            line,
        })
    }

    fn parse_define(&mut self, tokens: &[Token], line: usize) -> Result<(), ParseError> {
        let (Some(Token::Str(name)), true) = (tokens.first(), tokens.len() == 1) else {
            return Err(ParseError {
                line,
                message: "define action requires exactly a quoted name".into(),
            });
        };
        let (body, term) = self.parse_list()?;
        if !matches!(term, Some((ref t, _)) if t == "end") {
            return Err(ParseError {
                line,
                message: format!("unclosed {{{{define {name:?}}}}}"),
            });
        }
        self.defs.push(Definition {
            name: name.clone(),
            is_block: false,
            body,
        });
        Ok(())
    }

    fn parse_pipeline(
        &mut self,
        tokens: &[Token],
        line: usize,
        allow_decl: bool,
    ) -> Result<Pipeline, ParseError> {
        let mut pipe = Pipeline::default();
        let mut rest = tokens;

        // `$a := ...` / `$a, $b := ...` / `$a = ...`
        if allow_decl {
            if let Some((decl, is_assign, tail)) = Self::split_declaration(tokens) {
                pipe.decl = decl;
                pipe.is_assign = is_assign;
                rest = tail;
            }
        }

        let mut pos = 0;
        let mut args: Vec<Arg> = Vec::new();
        while pos < rest.len() {
            match &rest[pos] {
                Token::Pipe => {
                    if args.is_empty() {
                        return Err(ParseError {
                            line,
                            message: "empty pipeline stage".into(),
                        });
                    }
                    pipe.cmds.push(Command {
                        args: std::mem::take(&mut args),
                    });
                    pos += 1;
                }
                Token::LParen => {
                    let (nested, consumed) = self.parse_parenthesized(&rest[pos + 1..], line)?;
                    args.push(Arg::Pipe(Box::new(nested)));
                    pos += consumed + 2; // parens included
                }
                Token::RParen => {
                    return Err(ParseError {
                        line,
                        message: "unbalanced `)`".into(),
                    });
                }
                token => {
                    args.push(self.arg_from_token(token, args.is_empty(), line)?);
                    pos += 1;
                }
            }
        }
        if !args.is_empty() {
            pipe.cmds.push(Command { args });
        }
        if pipe.cmds.is_empty() && pipe.decl.is_empty() {
            return Err(ParseError {
                line,
                message: "missing pipeline".into(),
            });
        }
        Ok(pipe)
    }

    /// Parse tokens up to the matching `)`. Returns the nested pipeline and
    /// the number of tokens consumed before the closing paren.
    fn parse_parenthesized(
        &mut self,
        tokens: &[Token],
        line: usize,
    ) -> Result<(Pipeline, usize), ParseError> {
        let mut depth = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => {
                    let nested = self.parse_pipeline(&tokens[..i], line, false)?;
                    return Ok((nested, i));
                }
                Token::RParen => depth -= 1,
                _ => {}
            }
        }
        Err(ParseError {
            line,
            message: "unbalanced `(`".into(),
        })
    }

    fn arg_from_token(&self, token: &Token, is_first: bool, line: usize) -> Result<Arg, ParseError> {
        Ok(match token {
            Token::Field(fields) => Arg::Field(fields.clone()),
            Token::Dollar { name, fields } => {
                if fields.is_empty() {
                    Arg::Variable(name.clone())
                } else {
                    Arg::Chain {
                        var: name.clone(),
                        fields: fields.clone(),
                    }
                }
            }
            Token::Str(s) => Arg::Str(s.clone()),
            Token::Number { value, is_int } => Arg::Number {
                value: *value,
                is_int: *is_int,
            },
            Token::Bool(b) => Arg::Bool(*b),
            Token::Nil => Arg::Nil,
            Token::Ident(name) => {
                if !(self.is_func)(name) {
                    return Err(ParseError {
                        line,
                        message: format!("function {name:?} not defined"),
                    });
                }
                if !is_first {
                    return Err(ParseError {
                        line,
                        message: format!("function {name:?} must start a pipeline stage"),
                    });
                }
                Arg::Ident(name.clone())
            }
            Token::Comma => {
                return Err(ParseError {
                    line,
                    message: "unexpected `,` in pipeline".into(),
                });
            }
            Token::Pipe | Token::LParen | Token::RParen | Token::Declare | Token::Assign => {
                return Err(ParseError {
                    line,
                    message: "malformed pipeline".into(),
                });
            }
        })
    }

    /// Split `$a, $b := <rest>` into declared names and the remainder.
    fn split_declaration(tokens: &[Token]) -> Option<(Vec<String>, bool, &[Token])> {
        let mut names = Vec::new();
        let mut pos = 0;
        loop {
            match tokens.get(pos) {
                Some(Token::Dollar { name, fields }) if fields.is_empty() => {
                    names.push(name.clone());
                    pos += 1;
                }
                _ => return None,
            }
            match tokens.get(pos) {
                Some(Token::Comma) => pos += 1,
                Some(Token::Declare) => return Some((names, false, &tokens[pos + 1..])),
                Some(Token::Assign) => return Some((names, true, &tokens[pos + 1..])),
                _ => return None,
            }
        }
    }
}

#[derive(Clone, Copy)]
enum BranchKind {
    If,
    Range,
    With,
}

impl BranchKind {
    fn keyword(self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::Range => "range",
            BranchKind::With => "with",
        }
    }
}
