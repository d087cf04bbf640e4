//! Lexer: splits template source into text and tokenized actions.
//!
//! Handles `{{- ` / ` -}}` whitespace trimming and `{{/* */}}` comments here,
//! so the parser only sees text and action tokens.

use crate::{LabelError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Item {
    Text(String),
    Action(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Token {
    /// `.`
    Dot,
    /// `.a.b`
    Field(Vec<String>),
    /// `$` (empty name) or `$x`, with an optional field chain.
    Var(String, Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Pipe,
    Declare,
    Comma,
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub(super) fn lex(src: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut rest = src;
    let mut trim_next = false;

    loop {
        let Some(start) = rest.find(OPEN) else {
            push_text(&mut items, rest, trim_next, false);
            return Ok(items);
        };

        let after_open = &rest[start + OPEN.len()..];
        let trim_left = has_trim_marker(after_open);
        push_text(&mut items, &rest[..start], trim_next, trim_left);

        let body_start = if trim_left {
            &after_open[1..]
        } else {
            after_open
        };

        if let Some(comment) = body_start.trim_start().strip_prefix("/*") {
            let close = comment
                .find("*/")
                .ok_or_else(|| LabelError::template("unclosed comment"))?;
            let after = comment[close + 2..].trim_start();
            let (trim_right, after) = match after.strip_prefix('-') {
                Some(a) => (true, a),
                None => (false, after),
            };
            rest = after
                .strip_prefix(CLOSE)
                .ok_or_else(|| LabelError::template("comment ends before closing delimiter"))?;
            trim_next = trim_right;
            continue;
        }

        let end = find_close(body_start)?;
        let mut body = &body_start[..end];
        trim_next = false;
        if let Some(stripped) = body.strip_suffix('-') {
            if stripped.ends_with(char::is_whitespace) {
                body = stripped;
                trim_next = true;
            }
        }
        rest = &body_start[end + CLOSE.len()..];

        items.push(Item::Action(tokenize(body)?));
    }
}

/// `{{- ` needs whitespace after the dash; `{{-3}}` is the number -3.
fn has_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn push_text(items: &mut Vec<Item>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_owned()));
    }
}

/// Byte offset of the closing `}}`, skipping over quoted strings.
fn find_close(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            None => {}
        }
        i += 1;
    }
    Err(LabelError::template("unclosed action"))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// `.a.b` continuation after an operand.
    fn chain(&mut self) -> Vec<String> {
        let mut chain = Vec::new();
        while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 1;
            chain.push(self.ident());
        }
        chain
    }

    fn quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| LabelError::template("unterminated quoted string"))?;
            self.pos += 1;
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let esc = self
                        .peek()
                        .ok_or_else(|| LabelError::template("unterminated quoted string"))?;
                    self.pos += 1;
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            return Err(LabelError::template(format!(
                                "unknown escape sequence \\{other}"
                            )))
                        }
                    });
                }
                c => out.push(c),
            }
        }
    }

    fn raw(&mut self) -> Result<String> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '`') {
            self.pos += 1;
        }
        if self.peek().is_none() {
            return Err(LabelError::template("unterminated raw quoted string"));
        }
        let s = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(s)
    }

    fn number(&mut self) -> Result<i64> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| LabelError::template(format!("bad number syntax: \"{text}\"")))
    }
}

fn tokenize(body: &str) -> Result<Vec<Token>> {
    let mut cur = Cursor {
        chars: body.chars().collect(),
        pos: 0,
    };
    let mut tokens = Vec::new();

    while let Some(c) = cur.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                cur.pos += 1;
                continue;
            }
            '|' => {
                cur.pos += 1;
                Token::Pipe
            }
            '(' => {
                cur.pos += 1;
                Token::LParen
            }
            ')' => {
                cur.pos += 1;
                Token::RParen
            }
            ',' => {
                cur.pos += 1;
                Token::Comma
            }
            ':' if cur.peek_at(1) == Some('=') => {
                cur.pos += 2;
                Token::Declare
            }
            '"' => Token::Str(cur.quoted()?),
            '`' => Token::Str(cur.raw()?),
            '.' => {
                if cur.peek_at(1).is_some_and(is_ident_start) {
                    Token::Field(cur.chain())
                } else {
                    cur.pos += 1;
                    Token::Dot
                }
            }
            '$' => {
                cur.pos += 1;
                let name = cur.ident();
                Token::Var(name, cur.chain())
            }
            '-' | '0'..='9' => Token::Int(cur.number()?),
            c if is_ident_start(c) => Token::Ident(cur.ident()),
            other => {
                return Err(LabelError::template(format!(
                    "unexpected \"{other}\" in action"
                )))
            }
        };
        tokens.push(token);
    }

    if tokens.is_empty() {
        return Err(LabelError::template("missing value for command"));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_actions() {
        let items = lex("a{{.x}}b").unwrap();
        assert_eq!(
            items,
            vec![
                Item::Text("a".into()),
                Item::Action(vec![Token::Field(vec!["x".into()])]),
                Item::Text("b".into()),
            ]
        );
    }

    #[test]
    fn trim_markers() {
        let items = lex("a  {{- .x -}}\n  b").unwrap();
        assert_eq!(items[0], Item::Text("a".into()));
        assert_eq!(items[2], Item::Text("b".into()));
    }

    #[test]
    fn negative_number_is_not_trim() {
        let items = lex("{{-3}}").unwrap();
        assert_eq!(items, vec![Item::Action(vec![Token::Int(-3)])]);
    }

    #[test]
    fn comments_are_dropped() {
        let items = lex("a{{/* }} */}}b").unwrap();
        assert_eq!(items, vec![Item::Text("a".into()), Item::Text("b".into())]);
    }

    #[test]
    fn closing_delimiter_inside_string() {
        let items = lex(r#"{{index . "}}"}}"#).unwrap();
        assert_eq!(
            items,
            vec![Item::Action(vec![
                Token::Ident("index".into()),
                Token::Dot,
                Token::Str("}}".into()),
            ])]
        );
    }

    #[test]
    fn variables_and_declarations() {
        let items = lex("{{range $k, $v := .m.n}}").unwrap();
        assert_eq!(
            items,
            vec![Item::Action(vec![
                Token::Ident("range".into()),
                Token::Var("k".into(), vec![]),
                Token::Comma,
                Token::Var("v".into(), vec![]),
                Token::Declare,
                Token::Field(vec!["m".into(), "n".into()]),
            ])]
        );
    }

    #[test]
    fn unclosed_action_is_error() {
        assert!(lex("{{ .x ").is_err());
        assert!(lex("{{/* x").is_err());
    }
}
