//! 模板上下文
//!
//! 每条消息一个，为模板中的取值函数提供数据：
//! - `Topic n`：topic 第 n 段
//! - `JSON "a.b.c"`：把 payload 解析为 JSON 后按点路径取值
//! - `CSV n`：把 payload 解析为一行 CSV 后取第 n 列

use crate::error::NormalizeError;
use crate::subscription::Subscription;
use serde_json::Value;

const DEFAULT_CSV_SEPARATOR: char = ',';

/// 单条消息的模板上下文。
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    full_topic: &'a str,
    payload: &'a str,
    parts: Vec<&'a str>,
    subscription: &'a Subscription,
}

impl<'a> TemplateContext<'a> {
    pub fn new(subscription: &'a Subscription, topic: &'a str, payload: &'a str) -> Self {
        Self {
            full_topic: topic,
            payload,
            parts: topic.split('/').collect(),
            subscription,
        }
    }

    pub fn full_topic(&self) -> &str {
        self.full_topic
    }

    pub fn payload(&self) -> &str {
        self.payload
    }

    /// topic 第 `index` 段（从 0 开始，不支持负数回绕）。
    pub fn topic(&self, index: i64) -> Result<String, NormalizeError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.parts.get(i))
            .map(|part| part.to_string())
            .ok_or(NormalizeError::IndexOutOfRange {
                what: "topic",
                index,
                count: self.parts.len(),
            })
    }

    /// 把 payload 解析为 JSON，按点路径取标量值。
    ///
    /// 对象按键、数组按数字下标逐段下钻，例如 `foo.arr.1`。
    pub fn json(&self, path: &str) -> Result<String, NormalizeError> {
        let root: Value = serde_json::from_str(self.payload)
            .map_err(|err| NormalizeError::Parse(format!("json: {}", err)))?;
        let value = walk_json(&root, path)?;
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => Err(NormalizeError::KeyNotFound {
                key: path.rsplit('.').next().unwrap_or(path).to_string(),
                path: path.to_string(),
            }),
        }
    }

    /// 把 payload 解析为一行 CSV，返回第 `col_index` 列。
    pub fn csv(&self, col_index: i64) -> Result<String, NormalizeError> {
        let separator = csv_separator(&self.subscription.csv_separator)?;
        let mut record = parse_csv_record(self.payload, separator)?;
        let count = record.len();
        usize::try_from(col_index)
            .ok()
            .filter(|i| *i < count)
            .map(|i| record.swap_remove(i))
            .ok_or(NormalizeError::IndexOutOfRange {
                what: "column",
                index: col_index,
                count,
            })
    }
}

/// 逐段下钻；非末段必须是容器。
fn walk_json<'v>(root: &'v Value, path: &str) -> Result<&'v Value, NormalizeError> {
    let mut current = root;
    for key in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| NormalizeError::KeyNotFound {
            key: key.to_string(),
            path: path.to_string(),
        })?;
    }
    Ok(current)
}

fn csv_separator(configured: &str) -> Result<char, NormalizeError> {
    if configured.is_empty() {
        return Ok(DEFAULT_CSV_SEPARATOR);
    }
    let mut chars = configured.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if !matches!(ch, '"' | '\r' | '\n') => Ok(ch),
        _ => Err(NormalizeError::Validation(format!(
            "invalid CSV separator {:?}",
            configured
        ))),
    }
}

/// 解析 payload 中的第一条 CSV 记录。
///
/// 跳过开头空行；引号字段可包含分隔符、换行与 `""` 转义；
/// 非引号字段中出现引号、引号字段未闭合均视为解析错误。
fn parse_csv_record(payload: &str, separator: char) -> Result<Vec<String>, NormalizeError> {
    let input = payload.trim_start_matches(['\r', '\n']);
    if input.is_empty() {
        return Err(NormalizeError::Parse("csv: empty payload".to_string()));
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = input.chars().peekable();
    loop {
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(ch) => field.push(ch),
                    None => {
                        return Err(NormalizeError::Parse(
                            "csv: unterminated quoted field".to_string(),
                        ));
                    }
                }
            }
            match chars.next() {
                Some(ch) if ch == separator => fields.push(std::mem::take(&mut field)),
                None | Some('\n') => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some('\r') if matches!(chars.peek(), None | Some('\n')) => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(_) => {
                    return Err(NormalizeError::Parse(
                        "csv: extraneous character after quoted field".to_string(),
                    ));
                }
            }
        } else {
            loop {
                match chars.next() {
                    Some(ch) if ch == separator => {
                        fields.push(std::mem::take(&mut field));
                        break;
                    }
                    None | Some('\n') => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some('\r') if matches!(chars.peek(), None | Some('\n')) => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some('"') => {
                        return Err(NormalizeError::Parse(
                            "csv: bare quote in non-quoted field".to_string(),
                        ));
                    }
                    Some(ch) => field.push(ch),
                }
            }
        }
    }
}
