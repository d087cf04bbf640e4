//! Parser: builds the node tree from lexed items.

use super::lex::{Item, Token};
use crate::{LabelError, Result, MAX_TEMPLATE_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Node {
    Text(String),
    Action(Pipeline),
    If(Branch),
    With(Branch),
    Range(Branch),
}

/// Shared shape of `if`, `with` and `range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Branch {
    pub pipe: Pipeline,
    pub then: Vec<Node>,
    pub otherwise: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Pipeline {
    /// Declared variables: `$x :=` or, for `range`, `$i, $e :=`.
    pub decl: Vec<String>,
    pub cmds: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Operand {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Func(Func),
    Str(String),
    Int(i64),
    Bool(bool),
    Nil,
    Pipe(Box<Pipeline>),
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Func {
    Index,
    Len,
    Eq,
    Ne,
    Not,
    And,
    Or,
    Print,
    Printf,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "index" => Self::Index,
            "len" => Self::Len,
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "not" => Self::Not,
            "and" => Self::And,
            "or" => Self::Or,
            "print" => Self::Print,
            "printf" => Self::Printf,
            _ => return None,
        })
    }

    pub(super) fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Len => "len",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Print => "print",
            Self::Printf => "printf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    If,
    With,
    Range,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::With => "with",
            Self::Range => "range",
        }
    }
}

enum Terminator {
    End,
    Else(Vec<Token>),
    Eof,
}

pub(super) fn parse(items: Vec<Item>) -> Result<Vec<Node>> {
    let mut parser = Parser {
        items: items.into_iter(),
        depth: 0,
    };
    let (nodes, terminator) = parser.list()?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End => Err(LabelError::template("unexpected {{end}}")),
        Terminator::Else(_) => Err(LabelError::template("unexpected {{else}}")),
    }
}

struct Parser {
    items: std::vec::IntoIter<Item>,
    depth: usize,
}

impl Parser {
    fn list(&mut self) -> Result<(Vec<Node>, Terminator)> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.next() {
            let tokens = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(tokens) => tokens,
            };

            let keyword = match tokens.first() {
                Some(Token::Ident(k)) => k.as_str(),
                _ => "",
            };
            match keyword {
                "end" => {
                    if tokens.len() > 1 {
                        return Err(LabelError::template("unexpected tokens after end"));
                    }
                    return Ok((nodes, Terminator::End));
                }
                "else" => return Ok((nodes, Terminator::Else(tokens[1..].to_vec()))),
                "if" => nodes.push(self.control(Kind::If, &tokens[1..])?),
                "with" => nodes.push(self.control(Kind::With, &tokens[1..])?),
                "range" => nodes.push(self.control(Kind::Range, &tokens[1..])?),
                "define" | "template" | "block" | "break" | "continue" => {
                    return Err(LabelError::template(format!(
                        "\"{keyword}\" is not supported in label templates"
                    )))
                }
                _ => nodes.push(Node::Action(pipeline(&tokens, 1)?)),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn control(&mut self, kind: Kind, tokens: &[Token]) -> Result<Node> {
        self.depth += 1;
        if self.depth > MAX_TEMPLATE_DEPTH {
            return Err(LabelError::template(format!(
                "nesting depth exceeds {MAX_TEMPLATE_DEPTH}"
            )));
        }

        let max_decl = if kind == Kind::Range { 2 } else { 1 };
        let pipe = pipeline(tokens, max_decl)?;
        let (then, terminator) = self.list()?;

        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Eof => {
                return Err(LabelError::template(format!(
                    "unexpected EOF in {}",
                    kind.name()
                )))
            }
            Terminator::Else(rest) if rest.is_empty() => {
                let (otherwise, terminator) = self.list()?;
                if !matches!(terminator, Terminator::End) {
                    return Err(LabelError::template(format!(
                        "expected {{{{end}}}} after {{{{else}}}} in {}",
                        kind.name()
                    )));
                }
                otherwise
            }
            // `else if` / `else with` chain: the nested node consumes the shared end.
            Terminator::Else(rest) => match rest.first() {
                Some(Token::Ident(k)) if k == kind.name() && kind != Kind::Range => {
                    vec![self.control(kind, &rest[1..])?]
                }
                _ => {
                    return Err(LabelError::template(format!(
                        "unexpected tokens after else in {}",
                        kind.name()
                    )))
                }
            },
        };

        self.depth -= 1;
        let branch = Branch {
            pipe,
            then,
            otherwise,
        };
        Ok(match kind {
            Kind::If => Node::If(branch),
            Kind::With => Node::With(branch),
            Kind::Range => Node::Range(branch),
        })
    }
}

fn pipeline(tokens: &[Token], max_decl: usize) -> Result<Pipeline> {
    let (decl, rest) = declarations(tokens);
    if decl.len() > max_decl {
        return Err(LabelError::template(format!(
            "too many declarations in command: {}",
            decl.len()
        )));
    }

    let mut cmds = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    for (i, token) in rest.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| LabelError::template("unexpected right paren"))?;
            }
            Token::Pipe if depth == 0 => {
                cmds.push(command(&rest[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(LabelError::template("unclosed left paren"));
    }
    cmds.push(command(&rest[start..])?);

    Ok(Pipeline { decl, cmds })
}

/// Leading `$a :=` or `$a, $b :=`.
fn declarations(tokens: &[Token]) -> (Vec<String>, &[Token]) {
    let plain_var = |t: &Token| match t {
        Token::Var(name, chain) if !name.is_empty() && chain.is_empty() => Some(name.clone()),
        _ => None,
    };
    match tokens {
        [a, Token::Declare, rest @ ..] => match plain_var(a) {
            Some(a) => (vec![a], rest),
            None => (Vec::new(), tokens),
        },
        [a, Token::Comma, b, Token::Declare, rest @ ..] => match (plain_var(a), plain_var(b)) {
            (Some(a), Some(b)) => (vec![a, b], rest),
            _ => (Vec::new(), tokens),
        },
        _ => (Vec::new(), tokens),
    }
}

fn command(tokens: &[Token]) -> Result<Command> {
    if tokens.is_empty() {
        return Err(LabelError::template("missing command in pipeline"));
    }
    let mut args = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let arg = match &tokens[i] {
            Token::Dot => Operand::Dot,
            Token::Field(chain) => Operand::Field(chain.clone()),
            Token::Var(name, chain) => Operand::Var(name.clone(), chain.clone()),
            Token::Str(s) => Operand::Str(s.clone()),
            Token::Int(n) => Operand::Int(*n),
            Token::Ident(name) => match name.as_str() {
                "true" => Operand::Bool(true),
                "false" => Operand::Bool(false),
                "nil" => Operand::Nil,
                other => Operand::Func(Func::lookup(other).ok_or_else(|| {
                    LabelError::template(format!("function \"{other}\" not defined"))
                })?),
            },
            Token::LParen => {
                let close = matching_paren(tokens, i)?;
                let inner = pipeline(&tokens[i + 1..close], 0)?;
                i = close;
                Operand::Pipe(Box::new(inner))
            }
            other => {
                return Err(LabelError::template(format!(
                    "unexpected {other:?} in operand"
                )))
            }
        };
        args.push(arg);
        i += 1;
    }
    Ok(Command { args })
}

fn matching_paren(tokens: &[Token], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(LabelError::template("unclosed left paren"))
}
