//! 文本模板
//!
//! 最小的占位符替换语言：字面文本 + `{{ ... }}` 动作。
//! 每个动作是一次取值函数调用，名称前可带 `.`：
//!
//! | 动作                   | 取值                          |
//! |------------------------|-------------------------------|
//! | `{{.Topic 1}}`         | topic 第 1 段                 |
//! | `{{.JSON "a.b"}}`      | JSON 点路径（亦可用反引号）   |
//! | `{{.CSV 0}}`           | CSV 第 0 列                   |
//! | `{{.FullTopic}}`       | 完整 topic                    |
//! | `{{.Payload}}`         | 原始 payload                  |
//!
//! `{{- ` / ` -}}` 去除相邻字面文本的空白，`{{/* ... */}}` 为注释。

use crate::context::TemplateContext;
use crate::error::NormalizeError;

/// 模板中的取值函数调用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    FullTopic,
    Payload,
    Topic(i64),
    Json(String),
    Csv(i64),
}

impl Accessor {
    fn eval(&self, ctx: &TemplateContext<'_>) -> Result<String, NormalizeError> {
        match self {
            Self::FullTopic => Ok(ctx.full_topic().to_string()),
            Self::Payload => Ok(ctx.payload().to_string()),
            Self::Topic(index) => ctx.topic(*index),
            Self::Json(path) => ctx.json(path),
            Self::Csv(index) => ctx.csv(*index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Action(Accessor),
}

/// 已编译模板。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// 编译模板文本。
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, NormalizeError> {
        let name = name.into();
        let fail = |message: String| NormalizeError::Parse(format!("template {}: {}", name, message));

        let mut nodes = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            let mut literal = &rest[..start];
            let mut after = &rest[start + 2..];
            if let Some(stripped) = trim_marker_left(after) {
                literal = literal.trim_end();
                after = stripped;
            }
            if !literal.is_empty() {
                nodes.push(Node::Text(literal.to_string()));
            }

            let end = find_action_end(after).ok_or_else(|| fail("unclosed action".to_string()))?;
            let mut body = &after[..end];
            rest = &after[end + 2..];
            let trim_right = match trim_marker_right(body) {
                Some(stripped) => {
                    body = stripped;
                    true
                }
                None => false,
            };

            if let Some(accessor) = parse_action(body).map_err(fail)? {
                nodes.push(Node::Action(accessor));
            }
            if trim_right {
                rest = rest.trim_start();
            }
        }
        if !rest.is_empty() {
            nodes.push(Node::Text(rest.to_string()));
        }

        Ok(Self { name, nodes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 对上下文求值；取值函数的错误原样返回。
    pub fn execute(&self, ctx: &TemplateContext<'_>) -> Result<String, NormalizeError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(accessor) => out.push_str(&accessor.eval(ctx)?),
            }
        }
        Ok(out)
    }
}

fn trim_marker_left(after: &str) -> Option<&str> {
    let stripped = after.strip_prefix('-')?;
    stripped
        .starts_with(char::is_whitespace)
        .then_some(stripped)
}

fn trim_marker_right(body: &str) -> Option<&str> {
    let stripped = body.strip_suffix('-')?;
    stripped
        .ends_with(char::is_whitespace)
        .then_some(stripped)
}

/// 查找动作结尾 `}}`，跳过字符串字面量中的内容。
fn find_action_end(after: &str) -> Option<usize> {
    let bytes = after.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
}

impl Token {
    fn kind(&self) -> &'static str {
        match self {
            Self::Ident(_) => "identifier",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
        }
    }
}

/// 解析动作体；注释返回 `None`。
fn parse_action(body: &str) -> Result<Option<Accessor>, String> {
    let body = body.trim();
    if body.starts_with("/*") && body.ends_with("*/") && body.len() >= 4 {
        return Ok(None);
    }
    let tokens = tokenize(body)?;
    let (name, args) = match tokens.split_first() {
        Some((Token::Ident(name), args)) => (name.as_str(), args),
        Some((other, _)) => return Err(format!("unexpected {} at start of action", other.kind())),
        None => return Err("missing value for command".to_string()),
    };

    let accessor = match name {
        "FullTopic" => {
            expect_args(name, args, 0)?;
            Accessor::FullTopic
        }
        "Payload" => {
            expect_args(name, args, 0)?;
            Accessor::Payload
        }
        "Topic" => Accessor::Topic(int_arg(name, args)?),
        "CSV" => Accessor::Csv(int_arg(name, args)?),
        "JSON" => Accessor::Json(string_arg(name, args)?),
        other => return Err(format!("function {:?} not defined", other)),
    };
    Ok(Some(accessor))
}

fn expect_args(name: &str, args: &[Token], want: usize) -> Result<(), String> {
    if args.len() != want {
        return Err(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            want,
            args.len()
        ));
    }
    Ok(())
}

fn int_arg(name: &str, args: &[Token]) -> Result<i64, String> {
    expect_args(name, args, 1)?;
    match &args[0] {
        Token::Int(value) => Ok(*value),
        other => Err(format!("wrong type for {}: expected int, got {}", name, other.kind())),
    }
}

fn string_arg(name: &str, args: &[Token]) -> Result<String, String> {
    expect_args(name, args, 1)?;
    match &args[0] {
        Token::Str(value) => Ok(value.clone()),
        other => Err(format!(
            "wrong type for {}: expected string, got {}",
            name,
            other.kind()
        )),
    }
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '.' || ch.is_ascii_alphabetic() || ch == '_' {
            if ch == '.' {
                chars.next();
            }
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if ident.is_empty() {
                return Err("expected identifier after '.'".to_string());
            }
            tokens.push(Token::Ident(ident));
        } else if ch.is_ascii_digit() || ch == '-' || ch == '+' {
            let mut literal = String::new();
            literal.push(ch);
            chars.next();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    literal.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                return Err(format!("bad number syntax: {:?}", literal));
            }
            let value = literal
                .parse::<i64>()
                .map_err(|_| format!("bad number syntax: {:?}", literal))?;
            tokens.push(Token::Int(value));
        } else if ch == '"' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => return Err(format!("unknown escape sequence \\{}", other)),
                        None => return Err("unterminated quoted string".to_string()),
                    },
                    Some(c) => value.push(c),
                    None => return Err("unterminated quoted string".to_string()),
                }
            }
            tokens.push(Token::Str(value));
        } else if ch == '`' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('`') => break,
                    Some(c) => value.push(c),
                    None => return Err("unterminated raw quoted string".to_string()),
                }
            }
            tokens.push(Token::Str(value));
        } else {
            return Err(format!("unexpected {:?} in command", ch));
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_mixed_arguments() {
        let tokens = tokenize(r#".JSON "a.\"b\"" `raw` -3"#).expect("tokens");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("JSON".to_string()),
                Token::Str("a.\"b\"".to_string()),
                Token::Str("raw".to_string()),
                Token::Int(-3),
            ]
        );
    }

    #[test]
    fn action_end_skips_strings() {
        assert_eq!(find_action_end(r#".JSON "a}}b"}} tail"#), Some(12));
        assert_eq!(find_action_end(".Topic 1"), None);
    }

    #[test]
    fn parse_action_variants() {
        assert_eq!(parse_action(".Topic 2"), Ok(Some(Accessor::Topic(2))));
        assert_eq!(parse_action("CSV 0"), Ok(Some(Accessor::Csv(0))));
        assert_eq!(
            parse_action(r#".JSON "foo.bar""#),
            Ok(Some(Accessor::Json("foo.bar".to_string())))
        );
        assert_eq!(parse_action(".FullTopic"), Ok(Some(Accessor::FullTopic)));
        assert_eq!(parse_action("/* note */"), Ok(None));
        assert!(parse_action("").is_err());
        assert!(parse_action(".Nope 1").is_err());
        assert!(parse_action(".Topic \"x\"").is_err());
        assert!(parse_action(".Topic 1 2").is_err());
        assert!(parse_action(".Topic 1x").is_err());
    }
}
