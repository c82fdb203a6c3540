// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route template resolution.
//!
//! Payloads carry the route *template* (`/users/{id}`) so that the collector
//! can group requests, plus the parameters extracted from the path.  A host
//! that routes requests itself can report both by inserting a
//! [`MatchedRoute`] into the response extensions; otherwise the middleware
//! falls back to a [`RouteTable`] built from configured templates.
//!
//! Template syntax:
//!
//! | segment | matches |
//! |---------|---------|
//! | `{id}` / `:id` | one path segment, captured as `id` |
//! | `{*rest}` | the remainder of the path, captured as `rest` |
//! | `*` | the remainder of the path, not captured |


use std::collections::BTreeMap;

use regex::Regex;

use crate::core::ToolkitError;

/// The route a request was matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchedRoute {
    /// Route template, e.g. `/users/{id}`
    pub template: String,
    /// Path parameters; empty values are omitted
    pub params: BTreeMap<String, String>,
}

impl MatchedRoute {
    /// A match without parameters.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter; empty values are skipped.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.params.insert(name.into(), value);
        }
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    template: String,
    regex: Regex,
    params: Vec<String>,
}

/// Ordered list of route templates; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile `templates`, in priority order.
    pub fn new<I, T>(templates: I) -> Result<Self, ToolkitError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut table = Self::default();
        for template in templates {
            table.add(template)?;
        }
        Ok(table)
    }

    /// Append a template with the lowest priority so far.
    pub fn add(&mut self, template: impl Into<String>) -> Result<(), ToolkitError> {
        let template = template.into();
        let (pattern, params) = template_to_regex(&template);
        let regex = Regex::new(&pattern).map_err(|e| {
            ToolkitError::ConfigError(format!("invalid route template '{template}': {e}"))
        })?;
        self.routes.push(CompiledRoute {
            template,
            regex,
            params,
        });
        Ok(())
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no templates are configured.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match `path` against the templates.
    pub fn resolve(&self, path: &str) -> Option<MatchedRoute> {
        self.routes.iter().find_map(|route| {
            let captures = route.regex.captures(path)?;
            let mut matched = MatchedRoute::new(route.template.clone());
            for name in &route.params {
                if let Some(value) = captures.name(name) {
                    let decoded = urlencoding::decode(value.as_str())
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.as_str().to_string());
                    matched = matched.with_param(name.clone(), decoded);
                }
            }
            Some(matched)
        })
    }
}

/// Translate a template into an anchored regex and its parameter names.
fn template_to_regex(template: &str) -> (String, Vec<String>) {
    let mut pattern = "^".to_string();
    let mut params = Vec::new();
    let mut literal = String::new();

    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                for next in chars.by_ref() {
                    if next == '}' {
                        break;
                    }
                    name.push(next);
                }
                // Constraint suffixes such as {id:int} are not enforced
                let name = name.split(':').next().unwrap_or_default();
                pattern.push_str(&regex::escape(&std::mem::take(&mut literal)));
                match name.strip_prefix('*') {
                    Some(rest) => {
                        pattern.push_str(&format!("(?P<{rest}>.*)"));
                        params.push(rest.to_string());
                    }
                    None => {
                        pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                        params.push(name.to_string());
                    }
                }
            }
            ':' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    literal.push(':');
                } else {
                    pattern.push_str(&regex::escape(&std::mem::take(&mut literal)));
                    pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                    params.push(name);
                }
            }
            '*' => {
                pattern.push_str(&regex::escape(&std::mem::take(&mut literal)));
                pattern.push_str(".*");
            }
            _ => literal.push(c),
        }
    }

    pattern.push_str(&regex::escape(&literal));
    pattern.push('$');
    (pattern, params)
}
