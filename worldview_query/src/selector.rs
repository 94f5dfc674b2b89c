//! Label selector parsing and injection into PromQL expressions.

use crate::error::{QueryError, Result};
use std::fmt;
use worldview_core::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
            MatchOp::NotRegex => "!~",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    /// Value as written between the quotes, escapes included.
    pub value: String,
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.name, self.op.as_str(), self.value)
    }
}

fn invalid(selector: &str, reason: &str) -> QueryError {
    QueryError::InvalidSelector(format!("{}: {}", reason, selector))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parses `{name op "value", ...}`. An empty string yields no matchers.
pub fn parse_selector(selector: &str) -> Result<Vec<LabelMatcher>> {
    let s = selector.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let inner = s
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| invalid(selector, "selector must be enclosed in braces"))?;
    let chars: Vec<char> = inner.chars().collect();
    let mut res = Vec::new();
    let mut i = 0;
    let skip_ws = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    };
    loop {
        skip_ws(&mut i);
        if i >= chars.len() {
            break;
        }
        if !is_ident_start(chars[i]) {
            return Err(invalid(selector, "expected a label name"));
        }
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        skip_ws(&mut i);
        let rest: String = chars[i..].iter().take(2).collect();
        let op = if rest.starts_with("=~") {
            MatchOp::Regex
        } else if rest.starts_with("!~") {
            MatchOp::NotRegex
        } else if rest.starts_with("!=") {
            MatchOp::NotEqual
        } else if rest.starts_with('=') {
            MatchOp::Equal
        } else {
            return Err(invalid(selector, "expected one of =, !=, =~, !~"));
        };
        i += op.as_str().len();
        skip_ws(&mut i);
        if chars.get(i) != Some(&'"') {
            return Err(invalid(selector, "label value must be quoted"));
        }
        i += 1;
        let start = i;
        while i < chars.len() && chars[i] != '"' {
            if chars[i] == '\\' {
                i += 1;
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(invalid(selector, "unterminated label value"));
        }
        let value: String = chars[start..i].iter().collect();
        i += 1;
        if matches!(op, MatchOp::Regex | MatchOp::NotRegex) {
            regex::Regex::new(&value).map_err(|e| invalid(selector, &e.to_string()))?;
        }
        res.push(LabelMatcher { name, op, value });
        skip_ws(&mut i);
        match chars.get(i) {
            None => break,
            Some(',') => i += 1,
            Some(_) => return Err(invalid(selector, "matchers must be separated by commas")),
        }
    }
    Ok(res)
}

const GROUPING_KEYWORDS: &[&str] = &["by", "without", "on", "ignoring", "group_left", "group_right"];
const OPERATOR_KEYWORDS: &[&str] = &["and", "or", "unless", "bool", "offset", "atan2", "inf", "nan"];

/// Copies a quoted string or a bracketed group starting at `i` verbatim.
fn copy_until(chars: &[char], i: &mut usize, close: char, out: &mut String) {
    let open = chars[*i];
    out.push(open);
    *i += 1;
    while *i < chars.len() {
        let c = chars[*i];
        if c == '\\' && open == '"' {
            out.push(c);
            *i += 1;
            if *i < chars.len() {
                out.push(chars[*i]);
                *i += 1;
            }
            continue;
        }
        if (c == '"' || c == '\'') && open != '"' && open != '\'' {
            copy_until(chars, i, c, out);
            continue;
        }
        if c == '(' && close == ')' {
            copy_until(chars, i, ')', out);
            continue;
        }
        out.push(c);
        *i += 1;
        if c == close {
            return;
        }
    }
}

/// Adds `matchers` to every vector selector of `query`.
pub fn add_extra_selector(query: &str, matchers: &[LabelMatcher]) -> String {
    if matchers.is_empty() {
        return query.to_string();
    }
    let extra = matchers.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(",");
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + extra.len() * 2);
    let mut i = 0;

    let open_selector = |i: &mut usize, out: &mut String| {
        out.push('{');
        out.push_str(&extra);
        *i += 1;
        let mut j = *i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if chars.get(j) != Some(&'}') {
            out.push(',');
        }
        let mut body = String::new();
        *i -= 1;
        copy_until(&chars, i, '}', &mut body);
        out.push_str(&body[1..]);
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' | '`' => copy_until(&chars, &mut i, c, &mut out),
            '[' => copy_until(&chars, &mut i, ']', &mut out),
            '{' => open_selector(&mut i, &mut out),
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            c if is_ident_start(c) || c == ':' => {
                let start = i;
                while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == ':') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                out.push_str(&ident);
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                let next = chars.get(j).copied();
                let keyword = ident.to_lowercase();
                if GROUPING_KEYWORDS.contains(&keyword.as_str()) {
                    if next == Some('(') {
                        out.extend(&chars[i..j]);
                        i = j;
                        copy_until(&chars, &mut i, ')', &mut out);
                    }
                } else if next == Some('(') || OPERATOR_KEYWORDS.contains(&keyword.as_str()) {
                } else if next == Some('{') {
                    out.extend(&chars[i..j]);
                    i = j;
                    open_selector(&mut i, &mut out);
                } else {
                    out.push('{');
                    out.push_str(&extra);
                    out.push('}');
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Replaces the `$RANGE` placeholder with the step, e.g. `30s`.
pub fn substitute_range(query: &str, step: Duration) -> String {
    query.replace("$RANGE", &format!("{}s", step.as_secs()))
}
