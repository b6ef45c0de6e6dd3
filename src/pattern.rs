//! Single-segment wildcard path patterns, e.g. `area/{areaId}/cities/{cityId}`.

use crate::error::{Result, StoreError};
use crate::types::{DocPath, PathParams};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

/// A path pattern. Each `{name}` segment matches exactly one path segment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidPattern(raw.to_string()));
        }

        let mut segments = Vec::new();
        let mut names: Vec<&str> = Vec::new();

        for part in trimmed.split('/') {
            if part.is_empty() {
                return Err(StoreError::InvalidPattern(raw.to_string()));
            }

            if let Some(inner) = part.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .filter(|n| !n.is_empty() && !n.contains(['{', '}']))
                    .ok_or_else(|| StoreError::InvalidPattern(raw.to_string()))?;
                if names.contains(&name) {
                    return Err(StoreError::InvalidPattern(format!(
                        "{}: duplicate wildcard {{{}}}",
                        raw, name
                    )));
                }
                names.push(name);
                segments.push(Segment::Wildcard(name.to_string()));
            } else if part.contains(['{', '}']) {
                return Err(StoreError::InvalidPattern(raw.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self { segments })
    }

    /// Bind wildcards against `path`, or `None` if it does not match.
    pub fn matches(&self, path: &DocPath) -> Option<PathParams> {
        if self.segments.len() != path.len() {
            return None;
        }

        let mut params = PathParams::new();
        for (pattern, actual) in self.segments.iter().zip(path.segments()) {
            match pattern {
                Segment::Literal(lit) if lit == actual => {}
                Segment::Literal(_) => return None,
                Segment::Wildcard(name) => {
                    params.insert(name.clone(), actual.clone());
                }
            }
        }
        Some(params)
    }

    pub fn is_match(&self, path: &DocPath) -> bool {
        self.matches(path).is_some()
    }

    /// Substitute `params` into the wildcards.
    pub fn render(&self, params: &PathParams) -> Result<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => parts.push(lit.as_str()),
                Segment::Wildcard(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        StoreError::InvalidPattern(format!("{}: unbound {{{}}}", self, name))
                    })?;
                    parts.push(value.as_str());
                }
            }
        }
        Ok(parts.join("/"))
    }

    pub fn wildcards(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Wildcard(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => lit.clone(),
                Segment::Wildcard(name) => format!("{{{}}}", name),
            })
            .collect();
        write!(f, "{}", parts.join("/"))
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPattern({})", self)
    }
}

impl TryFrom<String> for PathPattern {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        PathPattern::parse(&s)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.to_string()
    }
}
