//! Executor: walks the node tree against a [`Value`].

use std::fmt::Write as _;

use super::parse::{Branch, Command, Func, Node, Operand, Pipeline};
use super::Value;
use crate::{LabelError, Result};

pub(super) fn execute(nodes: &[Node], data: &Value) -> Result<String> {
    let mut exec = Exec {
        vars: vec![(String::new(), data.clone())],
        out: String::new(),
    };
    exec.walk(nodes, data)?;
    Ok(exec.out)
}

struct Exec {
    /// Variable stack; slot 0 is `$`, the root data.
    vars: Vec<(String, Value)>,
    out: String,
}

impl Exec {
    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Action(pipe) => {
                    let value = self.pipeline(pipe, dot)?;
                    if pipe.decl.is_empty() {
                        let _ = write!(self.out, "{value}");
                    }
                }
                Node::If(branch) => {
                    let mark = self.vars.len();
                    let value = self.pipeline(&branch.pipe, dot)?;
                    if value.is_truthy() {
                        self.walk(&branch.then, dot)?;
                    } else {
                        self.walk(&branch.otherwise, dot)?;
                    }
                    self.vars.truncate(mark);
                }
                Node::With(branch) => {
                    let mark = self.vars.len();
                    let value = self.pipeline(&branch.pipe, dot)?;
                    if value.is_truthy() {
                        self.walk(&branch.then, &value)?;
                    } else {
                        self.walk(&branch.otherwise, dot)?;
                    }
                    self.vars.truncate(mark);
                }
                Node::Range(branch) => self.range(branch, dot)?,
            }
        }
        Ok(())
    }

    fn range(&mut self, branch: &Branch, dot: &Value) -> Result<()> {
        let value = self.commands(&branch.pipe.cmds, dot)?;
        let entries: Vec<(Value, Value)> = match value {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v))
                .collect(),
            Value::Map(map) => map
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect(),
            Value::Nil => Vec::new(),
            other => {
                return Err(LabelError::template(format!(
                    "range can't iterate over {other}"
                )))
            }
        };

        if entries.is_empty() {
            return self.walk(&branch.otherwise, dot);
        }

        let mark = self.vars.len();
        for (key, elem) in entries {
            match branch.pipe.decl.as_slice() {
                [] => {}
                [e] => self.vars.push((e.clone(), elem.clone())),
                [k, e, ..] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((e.clone(), elem.clone()));
                }
            }
            self.walk(&branch.then, &elem)?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    /// Evaluate a pipeline and bind its declaration, if any.
    fn pipeline(&mut self, pipe: &Pipeline, dot: &Value) -> Result<Value> {
        let value = self.commands(&pipe.cmds, dot)?;
        if let Some(name) = pipe.decl.first() {
            self.vars.push((name.clone(), value.clone()));
        }
        Ok(value)
    }

    /// Each command's result is passed as the final argument of the next.
    fn commands(&mut self, cmds: &[Command], dot: &Value) -> Result<Value> {
        let mut prev = None;
        for cmd in cmds {
            prev = Some(self.command(cmd, dot, prev)?);
        }
        Ok(prev.unwrap_or_default())
    }

    fn command(&mut self, cmd: &Command, dot: &Value, prev: Option<Value>) -> Result<Value> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Err(LabelError::template("empty command"));
        };

        if let Operand::Func(func) = first {
            let mut args = rest
                .iter()
                .map(|arg| self.operand(arg, dot))
                .collect::<Result<Vec<_>>>()?;
            args.extend(prev);
            return call(*func, args);
        }

        if !rest.is_empty() || prev.is_some() {
            return Err(LabelError::template(format!(
                "can't give argument to non-function {first:?}"
            )));
        }
        self.operand(first, dot)
    }

    fn operand(&mut self, operand: &Operand, dot: &Value) -> Result<Value> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(chain) => field_chain(dot, chain),
            Operand::Var(name, chain) => {
                let value = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        LabelError::template(format!("undefined variable: ${name}"))
                    })?;
                field_chain(value, chain)
            }
            Operand::Func(func) => call(*func, Vec::new()),
            Operand::Str(s) => Ok(Value::String(s.clone())),
            Operand::Int(n) => Ok(Value::Int(*n)),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Nil => Ok(Value::Nil),
            Operand::Pipe(pipe) => self.commands(&pipe.cmds, dot),
        }
    }
}

fn field_chain(value: &Value, chain: &[String]) -> Result<Value> {
    let mut current = value;
    for name in chain {
        current = match current {
            Value::Map(map) => map.get(name).ok_or_else(|| {
                LabelError::template(format!("map has no entry for key \"{name}\""))
            })?,
            Value::Nil => {
                return Err(LabelError::template(format!(
                    "nil data; no entry for key \"{name}\""
                )))
            }
            other => {
                return Err(LabelError::template(format!(
                    "can't evaluate field {name} in type {}",
                    other.type_name()
                )))
            }
        };
    }
    Ok(current.clone())
}

fn arity(func: Func, args: &[Value], min: usize, max: Option<usize>) -> Result<()> {
    let n = args.len();
    if n < min || max.is_some_and(|max| n > max) {
        let want = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{min}..{max}"),
            None => format!("at least {min}"),
        };
        return Err(LabelError::template(format!(
            "wrong number of args for {}: want {want} got {n}",
            func.name()
        )));
    }
    Ok(())
}

fn call(func: Func, args: Vec<Value>) -> Result<Value> {
    match func {
        Func::Index => {
            arity(func, &args, 1, None)?;
            let mut iter = args.into_iter();
            let mut item = iter.next().unwrap_or_default();
            for key in iter {
                item = index(item, key)?;
            }
            Ok(item)
        }
        Func::Len => {
            arity(func, &args, 1, Some(1))?;
            let n = match &args[0] {
                Value::String(s) => s.len(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(LabelError::template(format!(
                        "len of type {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Func::Eq => {
            arity(func, &args, 2, None)?;
            for other in &args[1..] {
                if equal(&args[0], other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Func::Ne => {
            arity(func, &args, 2, Some(2))?;
            Ok(Value::Bool(!equal(&args[0], &args[1])?))
        }
        Func::Not => {
            arity(func, &args, 1, Some(1))?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }
        Func::And => {
            arity(func, &args, 1, None)?;
            let last = args.len() - 1;
            Ok(args
                .into_iter()
                .enumerate()
                .find(|(i, v)| !v.is_truthy() || *i == last)
                .map(|(_, v)| v)
                .unwrap_or_default())
        }
        Func::Or => {
            arity(func, &args, 1, None)?;
            let last = args.len() - 1;
            Ok(args
                .into_iter()
                .enumerate()
                .find(|(i, v)| v.is_truthy() || *i == last)
                .map(|(_, v)| v)
                .unwrap_or_default())
        }
        Func::Print => Ok(Value::String(sprint(&args))),
        Func::Printf => {
            arity(func, &args, 1, None)?;
            let Value::String(format) = &args[0] else {
                return Err(LabelError::template("printf format must be a string"));
            };
            sprintf(format, &args[1..]).map(Value::String)
        }
    }
}

fn index(item: Value, key: Value) -> Result<Value> {
    match (item, key) {
        (Value::Map(mut map), Value::String(k)) => Ok(map
            .remove(&k)
            .unwrap_or_else(|| Value::String(String::new()))),
        (Value::List(mut list), Value::Int(i)) => {
            let len = list.len();
            usize::try_from(i)
                .ok()
                .filter(|&i| i < len)
                .map(|i| list.swap_remove(i))
                .ok_or_else(|| {
                    LabelError::template(format!("index out of range: {i} (len {len})"))
                })
        }
        (Value::Nil, _) => Err(LabelError::template("index of untyped nil")),
        (item, key) => Err(LabelError::template(format!(
            "can't index item of type {} with {}",
            item.type_name(),
            key.type_name()
        ))),
    }
}

fn equal(a: &Value, b: &Value) -> Result<bool> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::List(_) | Value::Map(_) | Value::Nil, _)
        | (_, Value::List(_) | Value::Map(_) | Value::Nil) => Err(LabelError::template(
            format!("invalid type for comparison: {}", a.type_name()),
        )),
        _ => Err(LabelError::template(format!(
            "incompatible types for comparison: {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Operands are separated by a space when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0
            && !matches!(arg, Value::String(_))
            && !matches!(args[i - 1], Value::String(_))
        {
            out.push(' ');
        }
        let _ = write!(out, "{arg}");
    }
    out
}

fn sprintf(format: &str, args: &[Value]) -> Result<String> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars
            .next()
            .ok_or_else(|| LabelError::template("printf: trailing %"))?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| LabelError::template(format!("printf: missing argument for %{verb}")))?;
        match (verb, arg) {
            ('s' | 'v', arg) => {
                let _ = write!(out, "{arg}");
            }
            ('d', Value::Int(n)) => {
                let _ = write!(out, "{n}");
            }
            ('q', Value::String(s)) => {
                let _ = write!(out, "{s:?}");
            }
            (verb, arg) => {
                return Err(LabelError::template(format!(
                    "printf: bad verb %{verb} for {}",
                    arg.type_name()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::{lex::lex, parse::parse};
    use super::*;

    fn run(src: &str, data: &Value) -> Result<String> {
        execute(&parse(lex(src)?)?, data)
    }

    fn map<const N: usize>(pairs: [(&str, Value); N]) -> Value {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn data() -> Value {
        map([
            ("name", "node-1".into()),
            (
                "devs",
                Value::List(vec![
                    map([("vendor", "8086".into()), ("class", "0200".into())]),
                    map([("vendor", "15b3".into()), ("class", "0207".into())]),
                ]),
            ),
            ("tags", map([("b", "2".into()), ("a", "1".into())])),
            ("empty", Value::List(Vec::new())),
        ])
    }

    #[test]
    fn fields_and_text() {
        assert_eq!(run("host={{.name}}", &data()).unwrap(), "host=node-1");
        assert_eq!(run("{{$.name}}", &data()).unwrap(), "node-1");
    }

    #[test]
    fn missing_field_is_error() {
        let err = run("{{.nope}}", &data()).unwrap_err();
        assert!(err.to_string().contains("no entry for key \"nope\""));
        assert!(run("{{.name.x}}", &data()).is_err());
    }

    #[test]
    fn range_over_list_and_map() {
        let out = run("{{range .devs}}v-{{.vendor}};{{end}}", &data()).unwrap();
        assert_eq!(out, "v-8086;v-15b3;");

        let out = run("{{range $i, $d := .devs}}{{$i}}={{$d.class}} {{end}}", &data()).unwrap();
        assert_eq!(out, "0=0200 1=0207 ");

        let out = run("{{range $k, $v := .tags}}{{$k}}{{$v}}{{end}}", &data()).unwrap();
        assert_eq!(out, "a1b2");

        let out = run("{{range .empty}}x{{else}}none{{end}}", &data()).unwrap();
        assert_eq!(out, "none");

        assert!(run("{{range .name}}{{end}}", &data()).is_err());
    }

    #[test]
    fn range_variables_are_scoped() {
        assert!(run("{{range $d := .devs}}{{end}}{{$d}}", &data()).is_err());
    }

    #[test]
    fn conditionals() {
        let src = r#"{{if eq .name "node-2"}}two{{else if eq .name "node-1"}}one{{else}}other{{end}}"#;
        assert_eq!(run(src, &data()).unwrap(), "one");
        assert_eq!(run("{{with .tags}}{{.a}}{{end}}", &data()).unwrap(), "1");
        assert_eq!(run("{{with .empty}}x{{else}}y{{end}}", &data()).unwrap(), "y");
        assert_eq!(run("{{if not .empty}}ok{{end}}", &data()).unwrap(), "ok");
    }

    #[test]
    fn functions() {
        assert_eq!(run(r#"{{index .tags "a"}}"#, &data()).unwrap(), "1");
        assert_eq!(run(r#"[{{index .tags "zz"}}]"#, &data()).unwrap(), "[]");
        assert_eq!(run(r#"{{index .devs 1 "vendor"}}"#, &data()).unwrap(), "15b3");
        assert!(run("{{index .devs 5}}", &data()).is_err());
        assert_eq!(run("{{len .devs}}", &data()).unwrap(), "2");
        assert_eq!(run("{{.devs | len}}", &data()).unwrap(), "2");
        assert_eq!(run(r#"{{eq .name "a" "node-1"}}"#, &data()).unwrap(), "true");
        assert_eq!(run(r#"{{ne .name "a"}}"#, &data()).unwrap(), "true");
        assert!(run(r#"{{eq .name 1}}"#, &data()).is_err());
        assert_eq!(run(r#"{{and .name .empty}}"#, &data()).unwrap(), "[]");
        assert_eq!(run(r#"{{or .empty "x"}}"#, &data()).unwrap(), "x");
        assert_eq!(run(r#"{{print "a" 1 2 "b"}}"#, &data()).unwrap(), "a1 2b");
        assert_eq!(
            run(r#"{{printf "%s-%d%%" .name (len .devs)}}"#, &data()).unwrap(),
            "node-1-2%"
        );
    }

    #[test]
    fn declarations_do_not_print() {
        assert_eq!(run("{{$n := .name}}x{{$n}}", &data()).unwrap(), "xnode-1");
    }
}
