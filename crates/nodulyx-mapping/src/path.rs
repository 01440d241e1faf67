//! Structured source-path AST.
//!
//! Profile authors write paths like `readingSession[]/unblindedReadNodule[]/roi`
//! where `[]` flags an array binding. The string form is parsed exactly once,
//! at profile compile time; per-document resolution only walks the segment
//! list.

use serde::{Deserialize, Serialize};

use nodulyx_common::{NodulyxError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    /// When set, resolution iterates every matching element at this level
    /// instead of taking the first.
    pub array_binding: bool,
}

/// A parsed source path: a non-empty list of segments relative to the
/// document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourcePath {
    pub segments: Vec<PathSegment>,
}

impl SourcePath {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(NodulyxError::Profile("empty source path".to_string()));
        }

        let mut segments = Vec::new();
        for part in raw.split('/') {
            let part = part.trim();
            if part.is_empty() {
                return Err(NodulyxError::Profile(format!(
                    "empty segment in source path '{raw}'"
                )));
            }
            let (name, array_binding) = match part.strip_suffix("[]") {
                Some(name) => (name, true),
                None => (part, false),
            };
            if name.is_empty() || name.contains('[') || name.contains(']') {
                return Err(NodulyxError::Profile(format!(
                    "malformed segment '{part}' in source path '{raw}'"
                )));
            }
            segments.push(PathSegment {
                name: name.to_string(),
                array_binding,
            });
        }

        Ok(Self { segments })
    }

    /// Whether any segment is array-bound.
    pub fn is_array(&self) -> bool {
        self.segments.iter().any(|s| s.array_binding)
    }
}

impl std::fmt::Display for SourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| {
                if s.array_binding {
                    format!("{}[]", s.name)
                } else {
                    s.name.clone()
                }
            })
            .collect();
        write!(f, "{}", parts.join("/"))
    }
}

impl TryFrom<String> for SourcePath {
    type Error = String;
    fn try_from(raw: String) -> std::result::Result<Self, String> {
        SourcePath::parse(&raw).map_err(|e| e.to_string())
    }
}

impl From<SourcePath> for String {
    fn from(path: SourcePath) -> String {
        path.to_string()
    }
}
