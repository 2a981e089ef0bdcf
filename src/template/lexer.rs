//! Tokenizer for the `{{ ... }}` template dialect.
//!
//! Splits a source file into literal text runs and action token lists.
//! Handles the whitespace trim markers (`{{-` / `-}}`), comments
//! (`{{/* ... */}}`), quoted and raw string literals, number literals,
//! field chains (`.A.B`), and root chains (`$.A.B`).

/// One token inside an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A bare identifier: a function name or a control keyword.
    Ident(String),
    /// A field chain rooted at the current value. `.` alone is an empty chain.
    Field(Vec<String>),
    /// A `$`-rooted reference: `$`, `$x`, `$.A.B`, `$x.A.B`.
    Dollar { name: String, fields: Vec<String> },
    /// A quoted or raw string literal, unescaped.
    Str(String),
    /// A number literal. `is_int` distinguishes `10` from `10.0`.
    Number { value: f64, is_int: bool },
    Bool(bool),
    Nil,
    Pipe,
    LParen,
    RParen,
    /// `:=`
    Declare,
    /// `=`
    Assign,
    Comma,
}

/// One lexed item: either raw text or a complete action.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Text(String),
    Action { tokens: Vec<Token>, line: usize },
}

/// A lexing failure with the line it occurred on.
#[derive(Debug)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

/// Tokenize a whole source file.
pub fn lex(source: &str) -> Result<Vec<Item>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    items: Vec<Item>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            items: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Item>, LexError> {
        while self.pos < self.bytes.len() {
            match self.src[self.pos..].find("{{") {
                Some(offset) => {
                    let text = &self.src[self.pos..self.pos + offset];
                    self.push_text(text);
                    self.line += text.matches('\n').count();
                    self.pos += offset + 2;
                    self.lex_action()?;
                }
                None => {
                    let rest = &self.src[self.pos..];
                    self.push_text(rest);
                    self.pos = self.bytes.len();
                }
            }
        }
        Ok(self.items)
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        // Merge with a preceding text item so trim markers see one run.
        if let Some(Item::Text(prev)) = self.items.last_mut() {
            prev.push_str(text);
        } else {
            self.items.push(Item::Text(text.to_string()));
        }
    }

    /// Trim trailing whitespace of the preceding text run (`{{-`).
    fn trim_preceding(&mut self) {
        if let Some(Item::Text(prev)) = self.items.last_mut() {
            let trimmed = prev.trim_end().len();
            prev.truncate(trimmed);
            if prev.is_empty() {
                self.items.pop();
            }
        }
    }

    /// Skip leading whitespace of the upcoming text (` -}}`).
    fn trim_following(&mut self) {
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            if c == b'\n' {
                self.line += 1;
            }
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            message: message.into(),
        }
    }

    /// Lex one action body. `self.pos` sits just past the opening `{{`.
    fn lex_action(&mut self) -> Result<(), LexError> {
        let action_line = self.line;

        // `{{- ` trims the preceding text. The marker must be followed by
        // whitespace so negative number literals stay unambiguous.
        if self.bytes.get(self.pos) == Some(&b'-')
            && self
                .bytes
                .get(self.pos + 1)
                .is_some_and(u8::is_ascii_whitespace)
        {
            self.pos += 1;
            self.trim_preceding();
        }

        let mut tokens = Vec::new();
        loop {
            self.skip_action_whitespace();
            let rest = &self.src[self.pos..];

            if rest.starts_with("-}}") {
                self.pos += 3;
                self.trim_following();
                break;
            }
            if rest.starts_with("}}") {
                self.pos += 2;
                break;
            }
            if rest.is_empty() {
                return Err(self.err("unclosed action"));
            }
            if rest.starts_with("/*") {
                self.lex_comment()?;
                continue;
            }

            tokens.push(self.lex_token()?);
        }

        // A comment-only action produces nothing.
        if !tokens.is_empty() {
            self.items.push(Item::Action {
                tokens,
                line: action_line,
            });
        }
        Ok(())
    }

    fn skip_action_whitespace(&mut self) {
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            if c == b'\n' {
                self.line += 1;
                self.pos += 1;
            } else if c.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn lex_comment(&mut self) -> Result<(), LexError> {
        match self.src[self.pos..].find("*/") {
            Some(end) => {
                self.line += self.src[self.pos..self.pos + end].matches('\n').count();
                self.pos += end + 2;
                Ok(())
            }
            None => Err(self.err("unclosed comment")),
        }
    }

    fn lex_token(&mut self) -> Result<Token, LexError> {
        let c = self.bytes[self.pos];
        match c {
            b'|' => {
                self.pos += 1;
                Ok(Token::Pipe)
            }
            b'(' => {
                self.pos += 1;
                Ok(Token::LParen)
            }
            b')' => {
                self.pos += 1;
                Ok(Token::RParen)
            }
            b',' => {
                self.pos += 1;
                Ok(Token::Comma)
            }
            b':' => {
                if self.bytes.get(self.pos + 1) == Some(&b'=') {
                    self.pos += 2;
                    Ok(Token::Declare)
                } else {
                    Err(self.err("unexpected `:`"))
                }
            }
            b'=' => {
                self.pos += 1;
                Ok(Token::Assign)
            }
            b'"' => self.lex_quoted_string(),
            b'`' => self.lex_raw_string(),
            b'.' => {
                self.pos += 1;
                Ok(Token::Field(self.lex_field_chain()))
            }
            b'$' => {
                self.pos += 1;
                let name = self.lex_ident_text();
                let fields = if self.bytes.get(self.pos) == Some(&b'.') {
                    self.pos += 1;
                    self.lex_field_chain()
                } else {
                    Vec::new()
                };
                Ok(Token::Dollar { name, fields })
            }
            b'+' | b'-' => self.lex_number(),
            _ if c.is_ascii_digit() => self.lex_number(),
            _ if is_ident_start(c) => {
                let ident = self.lex_ident_text();
                Ok(match ident.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "nil" => Token::Nil,
                    _ => Token::Ident(ident),
                })
            }
            _ => Err(self.err(format!(
                "unexpected character {:?} in action",
                self.src[self.pos..].chars().next().unwrap_or('?')
            ))),
        }
    }

    fn lex_ident_text(&mut self) -> String {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|&c| is_ident_continue(c))
        {
            self.pos += 1;
        }
        self.src[start..self.pos].to_string()
    }

    /// Lex `A.B.C` after a consumed leading `.`. A bare `.` yields an empty chain.
    fn lex_field_chain(&mut self) -> Vec<String> {
        let mut fields = Vec::new();
        loop {
            if !self.bytes.get(self.pos).is_some_and(|&c| is_ident_start(c)) {
                break;
            }
            fields.push(self.lex_ident_text());
            if self.bytes.get(self.pos) == Some(&b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        fields
    }

    fn lex_quoted_string(&mut self) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.bytes.get(self.pos) {
                None | Some(b'\n') => return Err(self.err("unterminated string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Token::Str(out));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = match self.bytes.get(self.pos) {
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(b'r') => '\r',
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        _ => return Err(self.err("unsupported escape sequence")),
                    };
                    out.push(escaped);
                    self.pos += 1;
                }
                Some(_) => {
                    let ch = self.src[self.pos..].chars().next().unwrap();
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn lex_raw_string(&mut self) -> Result<Token, LexError> {
        self.pos += 1; // opening backquote
        match self.src[self.pos..].find('`') {
            Some(end) => {
                let out = self.src[self.pos..self.pos + end].to_string();
                self.line += out.matches('\n').count();
                self.pos += end + 1;
                Ok(Token::Str(out))
            }
            None => Err(self.err("unterminated raw string literal")),
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        if matches!(self.bytes.get(self.pos), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        let mut is_int = true;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        if self.bytes.get(self.pos) == Some(&b'.')
            && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            is_int = false;
            self.pos += 1;
            while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
                self.pos += 1;
            }
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            is_int = false;
            self.pos += 1;
            if matches!(self.bytes.get(self.pos), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
                self.pos += 1;
            }
        }

        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(|value| Token::Number { value, is_int })
            .map_err(|_| self.err(format!("invalid number literal {text:?}")))
    }

}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action_tokens(src: &str) -> Vec<Token> {
        let items = lex(src).unwrap();
        match items.into_iter().next().unwrap() {
            Item::Action { tokens, .. } => tokens,
            other => panic!("expected action, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------------
    // Text and action splitting
    // ------------------------------------------------------------------------

    #[test]
    fn test_plain_text() {
        let items = lex("hello world").unwrap();
        assert_eq!(items, vec![Item::Text("hello world".into())]);
    }

    #[test]
    fn test_text_and_action() {
        let items = lex("a {{.Name}} b").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Item::Text("a ".into()));
        assert_eq!(items[2], Item::Text(" b".into()));
    }

    #[test]
    fn test_action_line_numbers() {
        let items = lex("line1\nline2\n{{.X}}").unwrap();
        match &items[1] {
            Item::Action { line, .. } => assert_eq!(*line, 3),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_action_is_error() {
        assert!(lex("{{.Name").is_err());
    }

    // ------------------------------------------------------------------------
    // Trim markers and comments
    // ------------------------------------------------------------------------

    #[test]
    fn test_trim_markers() {
        let items = lex("a  {{- .X -}}  b").unwrap();
        assert_eq!(items[0], Item::Text("a".into()));
        assert_eq!(items[2], Item::Text("b".into()));
    }

    #[test]
    fn test_comment_produces_nothing() {
        let items = lex("a{{/* note */}}b").unwrap();
        assert_eq!(items, vec![Item::Text("ab".into())]);
    }

    #[test]
    fn test_comment_with_trim() {
        let items = lex("a  {{- /* note */ -}}  b").unwrap();
        assert_eq!(items, vec![Item::Text("ab".into())]);
    }

    // ------------------------------------------------------------------------
    // Token kinds
    // ------------------------------------------------------------------------

    #[test]
    fn test_field_chain() {
        assert_eq!(
            action_tokens("{{.User.Name}}"),
            vec![Token::Field(vec!["User".into(), "Name".into()])]
        );
    }

    #[test]
    fn test_bare_dot() {
        assert_eq!(action_tokens("{{.}}"), vec![Token::Field(vec![])]);
    }

    #[test]
    fn test_dollar_chain() {
        assert_eq!(
            action_tokens("{{$.Site.Title}}"),
            vec![Token::Dollar {
                name: String::new(),
                fields: vec!["Site".into(), "Title".into()],
            }]
        );
    }

    #[test]
    fn test_variable() {
        assert_eq!(
            action_tokens("{{$item}}"),
            vec![Token::Dollar {
                name: "item".into(),
                fields: vec![],
            }]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            action_tokens(r#"{{"a\"b\nc"}}"#),
            vec![Token::Str("a\"b\nc".into())]
        );
    }

    #[test]
    fn test_raw_string() {
        assert_eq!(action_tokens("{{`a\"b`}}"), vec![Token::Str("a\"b".into())]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            action_tokens("{{10}}"),
            vec![Token::Number {
                value: 10.0,
                is_int: true
            }]
        );
        assert_eq!(
            action_tokens("{{-2.5}}"),
            vec![Token::Number {
                value: -2.5,
                is_int: false
            }]
        );
    }

    #[test]
    fn test_keywords_and_literals() {
        assert_eq!(
            action_tokens("{{if true}}"),
            vec![Token::Ident("if".into()), Token::Bool(true)]
        );
        assert_eq!(action_tokens("{{nil}}"), vec![Token::Nil]);
    }

    #[test]
    fn test_pipeline_tokens() {
        assert_eq!(
            action_tokens("{{.Name | upper}}"),
            vec![
                Token::Field(vec!["Name".into()]),
                Token::Pipe,
                Token::Ident("upper".into())
            ]
        );
    }

    #[test]
    fn test_declare_and_assign() {
        assert_eq!(
            action_tokens("{{$x := 1}}"),
            vec![
                Token::Dollar {
                    name: "x".into(),
                    fields: vec![]
                },
                Token::Declare,
                Token::Number {
                    value: 1.0,
                    is_int: true
                }
            ]
        );
        assert!(action_tokens("{{$x = 2}}").contains(&Token::Assign));
    }

    #[test]
    fn test_parens() {
        let tokens = action_tokens("{{if (eq .A 1)}}");
        assert!(tokens.contains(&Token::LParen));
        assert!(tokens.contains(&Token::RParen));
    }

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(
            action_tokens(r#"{{if eq .Status "active"}}"#),
            vec![
                Token::Ident("if".into()),
                Token::Ident("eq".into()),
                Token::Field(vec!["Status".into()]),
                Token::Str("active".into())
            ]
        );
    }
}
