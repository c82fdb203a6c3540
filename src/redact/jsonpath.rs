// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small JSONPath subset used to address redaction targets.
//!
//! Supported syntax:
//!
//! | form               | meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `$`                | document root (optional prefix)           |
//! | `.name`            | object member                             |
//! | `['name']`         | object member, any characters allowed     |
//! | `[3]` / `[-1]`     | array element, negative counts from end   |
//! | `['a','b']` / `[0,2]` | union of members or elements           |
//! | `[start:end:step]` | array slice, any part may be omitted      |
//! | `.*` / `[*]`       | every member of an object or array        |
//! | `..name` / `..*`   | recursive descent                         |

use serde_json::Value;
use thiserror::Error;

/// Errors produced while parsing a path expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid JSON path '{path}': {reason}")]
pub struct JsonPathError {
    path: String,
    reason: String,
}

impl JsonPathError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Name(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(i64),
    Union(Vec<Selector>),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Wildcard,
    Descendant(String),
    DescendantWildcard,
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a path expression such as `$.addresses[*].street`.
    pub fn parse(expr: &str) -> Result<Self, JsonPathError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(JsonPathError::new(expr, "empty expression"));
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut pos = 0;
        let mut segments = Vec::new();

        if chars[0] == '$' {
            pos = 1;
        } else if chars[0] != '.' && chars[0] != '[' {
            // Bare leading member, e.g. `user.name`
            let name = read_name(&chars, &mut pos);
            segments.push(Segment::Child(name));
        }

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    if pos < chars.len() && chars[pos] == '.' {
                        pos += 1;
                        segments.push(parse_descendant(expr, &chars, &mut pos)?);
                    } else if pos < chars.len() && chars[pos] == '*' {
                        pos += 1;
                        segments.push(Segment::Wildcard);
                    } else {
                        let name = read_name(&chars, &mut pos);
                        if name.is_empty() {
                            return Err(JsonPathError::new(expr, "expected member name after '.'"));
                        }
                        segments.push(Segment::Child(name));
                    }
                }
                '[' => segments.push(parse_bracket(expr, &chars, &mut pos)?),
                other => {
                    return Err(JsonPathError::new(
                        expr,
                        format!("unexpected character '{other}' at {pos}"),
                    ));
                }
            }
        }

        Ok(Self { segments })
    }

    /// Replace every node addressed by this path with `replacement`.
    ///
    /// Returns the number of nodes replaced.  Paths that address nothing
    /// leave `root` untouched.
    pub fn replace_all(&self, root: &mut Value, replacement: &Value) -> usize {
        replace_at(root, &self.segments, replacement)
    }
}

fn read_name(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && chars[*pos] != '.' && chars[*pos] != '[' {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_descendant(expr: &str, chars: &[char], pos: &mut usize) -> Result<Segment, JsonPathError> {
    if *pos >= chars.len() {
        return Err(JsonPathError::new(expr, "dangling '..'"));
    }
    match chars[*pos] {
        '*' => {
            *pos += 1;
            Ok(Segment::DescendantWildcard)
        }
        '[' => match parse_bracket(expr, chars, pos)? {
            Segment::Child(name) => Ok(Segment::Descendant(name)),
            Segment::Wildcard => Ok(Segment::DescendantWildcard),
            _ => Err(JsonPathError::new(expr, "only member names may follow '..'")),
        },
        _ => {
            let name = read_name(chars, pos);
            if name.is_empty() {
                return Err(JsonPathError::new(expr, "expected member name after '..'"));
            }
            Ok(Segment::Descendant(name))
        }
    }
}

fn parse_bracket(expr: &str, chars: &[char], pos: &mut usize) -> Result<Segment, JsonPathError> {
    let unterminated = || JsonPathError::new(expr, "unterminated '['");

    // Skip the opening bracket
    *pos += 1;
    if chars.get(*pos) == Some(&'*') {
        *pos += 1;
        return match chars.get(*pos) {
            Some(']') => {
                *pos += 1;
                Ok(Segment::Wildcard)
            }
            _ => Err(unterminated()),
        };
    }

    let mut selectors = Vec::new();
    loop {
        skip_spaces(chars, pos);
        match chars.get(*pos) {
            Some(&quote) if quote == '\'' || quote == '"' => {
                *pos += 1;
                let start = *pos;
                while *pos < chars.len() && chars[*pos] != quote {
                    *pos += 1;
                }
                if *pos >= chars.len() {
                    return Err(JsonPathError::new(expr, "unterminated quoted name"));
                }
                selectors.push(Selector::Name(chars[start..*pos].iter().collect()));
                *pos += 1;
            }
            Some(_) => {
                let start = *pos;
                while *pos < chars.len() && chars[*pos] != ',' && chars[*pos] != ']' {
                    *pos += 1;
                }
                let raw: String = chars[start..*pos].iter().collect();
                if raw.contains(':') {
                    if !selectors.is_empty() || chars.get(*pos) == Some(&',') {
                        return Err(JsonPathError::new(expr, "a slice cannot be part of a union"));
                    }
                    if chars.get(*pos) != Some(&']') {
                        return Err(unterminated());
                    }
                    *pos += 1;
                    return parse_slice(expr, raw.trim());
                }
                selectors.push(Selector::Index(parse_index(expr, &raw)?));
            }
            None => return Err(unterminated()),
        }

        skip_spaces(chars, pos);
        match chars.get(*pos) {
            Some(',') => *pos += 1,
            Some(']') => {
                *pos += 1;
                break;
            }
            _ => return Err(unterminated()),
        }
    }

    if selectors.len() > 1 {
        return Ok(Segment::Union(selectors));
    }
    match selectors.pop() {
        Some(Selector::Name(name)) => Ok(Segment::Child(name)),
        Some(Selector::Index(index)) => Ok(Segment::Index(index)),
        None => Err(unterminated()),
    }
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos] == ' ' {
        *pos += 1;
    }
}

fn parse_index(expr: &str, raw: &str) -> Result<i64, JsonPathError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| JsonPathError::new(expr, format!("invalid index '{}'", raw.trim())))
}

fn parse_slice(expr: &str, raw: &str) -> Result<Segment, JsonPathError> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    if parts.len() > 3 {
        return Err(JsonPathError::new(expr, format!("invalid slice '{raw}'")));
    }
    let bound = |part: Option<&&str>| -> Result<Option<i64>, JsonPathError> {
        match part {
            None => Ok(None),
            Some(part) if part.is_empty() => Ok(None),
            Some(part) => parse_index(expr, part).map(Some),
        }
    };

    let start = bound(parts.first())?;
    let end = bound(parts.get(1))?;
    let step = bound(parts.get(2))?.unwrap_or(1);
    if step == 0 {
        return Err(JsonPathError::new(expr, "slice step cannot be zero"));
    }
    Ok(Segment::Slice { start, end, step })
}

/// Indices selected by `[start:end:step]` over an array of `len` items.
fn slice_indices(len: usize, start: Option<i64>, end: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let resolve = |index: i64| if index < 0 { index + len } else { index };

    let mut indices = Vec::new();
    if step > 0 {
        let mut index = start.map_or(0, resolve).clamp(0, len);
        let stop = end.map_or(len, resolve).clamp(0, len);
        while index < stop {
            indices.push(index as usize);
            index += step;
        }
    } else {
        let mut index = start.map_or(len - 1, resolve).clamp(-1, len - 1);
        let stop = end.map_or(-1, resolve).clamp(-1, len - 1);
        while index > stop {
            indices.push(index as usize);
            index += step;
        }
    }
    indices
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    usize::try_from(resolved).ok()
}

fn replace_at(node: &mut Value, segments: &[Segment], replacement: &Value) -> usize {
    let Some((head, rest)) = segments.split_first() else {
        *node = replacement.clone();
        return 1;
    };

    match head {
        Segment::Child(name) => match node {
            Value::Object(map) => map
                .get_mut(name)
                .map_or(0, |child| replace_at(child, rest, replacement)),
            _ => 0,
        },
        Segment::Index(index) => match node {
            Value::Array(items) => resolve_index(items.len(), *index)
                .and_then(|i| items.get_mut(i))
                .map_or(0, |child| replace_at(child, rest, replacement)),
            _ => 0,
        },
        Segment::Union(selectors) => {
            let mut count = 0;
            for selector in selectors {
                let child = match (selector, &mut *node) {
                    (Selector::Name(name), Value::Object(map)) => map.get_mut(name),
                    (Selector::Index(index), Value::Array(items)) => {
                        resolve_index(items.len(), *index).and_then(|i| items.get_mut(i))
                    }
                    _ => None,
                };
                if let Some(child) = child {
                    count += replace_at(child, rest, replacement);
                }
            }
            count
        }
        Segment::Slice { start, end, step } => match node {
            Value::Array(items) => slice_indices(items.len(), *start, *end, *step)
                .into_iter()
                .map(|i| replace_at(&mut items[i], rest, replacement))
                .sum(),
            _ => 0,
        },
        Segment::Wildcard => children_mut(node)
            .into_iter()
            .map(|child| replace_at(child, rest, replacement))
            .sum(),
        Segment::Descendant(name) => {
            let mut count = 0;
            match node {
                Value::Object(map) => {
                    for (key, child) in map.iter_mut() {
                        if key == name {
                            count += replace_at(child, rest, replacement);
                        }
                        count += replace_at(child, segments, replacement);
                    }
                }
                Value::Array(items) => {
                    for child in items.iter_mut() {
                        count += replace_at(child, segments, replacement);
                    }
                }
                _ => {}
            }
            count
        }
        Segment::DescendantWildcard => children_mut(node)
            .into_iter()
            .map(|child| {
                replace_at(child, rest, replacement) + replace_at(child, segments, replacement)
            })
            .sum(),
    }
}

fn children_mut(node: &mut Value) -> Vec<&mut Value> {
    match node {
        Value::Object(map) => map.values_mut().collect(),
        Value::Array(items) => items.iter_mut().collect(),
        _ => Vec::new(),
    }
}
