//! Path templates for backend resource routes.
//!
//! A template is relative to the API prefix and consists of `/`-separated
//! segments: literals, `{name}` captures of exactly one segment, and an
//! optional trailing `{*name}` capturing everything that remains.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

/// Errors raised while parsing a route template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteTemplateError {
    #[error("route template must start with '/': {0:?}")]
    MissingLeadingSlash(String),
    #[error("catch-all segment must be the last segment: {0:?}")]
    RestNotLast(String),
    #[error("empty parameter name in route template: {0:?}")]
    EmptyParam(String),
    #[error("duplicate parameter `{name}` in route template: {template:?}")]
    DuplicateParam { name: String, template: String },
}

/// A parsed path template such as `/servicetemplates/{namespace}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Parses a template string.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteTemplateError`] when the template does not start with
    /// `/`, has an empty or duplicate parameter name, or places a catch-all
    /// segment anywhere but last.
    pub fn parse(template: &str) -> Result<Self, RouteTemplateError> {
        let Some(body) = template.strip_prefix('/') else {
            return Err(RouteTemplateError::MissingLeadingSlash(template.to_string()));
        };

        let parts: Vec<&str> = split_segments(body);
        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<&str> = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            let segment = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let (is_rest, name) = match inner.strip_prefix('*') {
                    Some(name) => (true, name),
                    None => (false, inner),
                };
                if name.is_empty() {
                    return Err(RouteTemplateError::EmptyParam(template.to_string()));
                }
                if names.contains(&name) {
                    return Err(RouteTemplateError::DuplicateParam {
                        name: name.to_string(),
                        template: template.to_string(),
                    });
                }
                names.push(name);
                if is_rest {
                    if index + 1 != parts.len() {
                        return Err(RouteTemplateError::RestNotLast(template.to_string()));
                    }
                    Segment::Rest(name.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// Returns the template exactly as it was declared.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a request path (relative to the API prefix) against this template.
    ///
    /// A single trailing slash is ignored on both sides, so `/items/` matches
    /// `/items`. Captured values are returned still percent-encoded.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let body = path.strip_prefix('/').unwrap_or(path);
        let parts = split_segments(body);
        let mut params = PathParams::default();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    let rest = parts.get(index..).unwrap_or_default().join("/");
                    params.push(name, rest);
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    params.push(name, (*value).to_string());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a path body (leading slash already removed) into segments.
/// One trailing slash is dropped, so `a/b/` and `a/b` yield the same segments.
fn split_segments(body: &str) -> Vec<&str> {
    let trimmed = body.strip_suffix('/').unwrap_or(body);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Named values captured from a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: Vec<(String, String)>,
}

impl PathParams {
    fn push(&mut self, name: &str, value: String) {
        self.values.push((name.to_string(), value));
    }

    /// Returns the captured value for `name`, if the template declared it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over captures in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
