use crate::error::SweepError;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Text with `{name}` placeholders. `{{` and `}}` stand for literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    location: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(location: &str, text: &str) -> Result<Self, SweepError> {
        let malformed = |detail: String| SweepError::MalformedTemplate {
            location: location.to_string(),
            detail,
        };
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();
        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(malformed(format!("unclosed '{{' at byte {}", pos)));
                    }
                    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(malformed(format!("invalid placeholder '{{{}}}'", name)));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name));
                }
                '}' => {
                    return Err(malformed(format!("single '}}' at byte {}", pos)));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            location: location.to_string(),
            segments,
        })
    }

    /// Reads and parses a template file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow!("template_unreadable: {}: {}", path.display(), e))?;
        Ok(Self::parse(&path.display().to_string(), &text)?)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Fails on the first placeholder `allowed` rejects.
    pub fn check_placeholders<F>(&self, allowed: F) -> Result<(), SweepError>
    where
        F: Fn(&str) -> bool,
    {
        match self.placeholders().into_iter().find(|name| !allowed(name)) {
            Some(name) => Err(SweepError::UnknownPlaceholder {
                name: name.to_string(),
                location: self.location.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn render<F>(&self, lookup: F) -> Result<String, SweepError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(SweepError::UnknownPlaceholder {
                            name: name.clone(),
                            location: self.location.clone(),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}
