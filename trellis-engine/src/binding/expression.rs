//! Path expression parsing
//!
//! Grammar: `segment ('.' segment)*` where a segment is an identifier
//! optionally followed by one subscript. A subscript of ASCII digits is a
//! sequence index; anything else, quoted or bare, is a map key.
//!
//! ```text
//! user.address.street
//! user.tags[2]
//! user.preferences['theme.dark']
//! user.preferences[locale]
//! ```

use crate::error::BindingError;
use std::fmt;
use std::str::FromStr;

/// Bracketed part of a segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscript {
    Index(usize),
    Key(String),
}

impl fmt::Display for Subscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscript::Index(index) => write!(f, "[{}]", index),
            Subscript::Key(key) => write!(f, "['{}']", key),
        }
    }
}

/// One step of a path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    name: String,
    subscript: Option<Subscript>,
}

impl PathSegment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscript(&self) -> Option<&Subscript> {
        self.subscript.as_ref()
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(subscript) = &self.subscript {
            write!(f, "{}", subscript)?;
        }
        Ok(())
    }
}

/// Parsed path expression, never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    segments: Vec<PathSegment>,
}

impl Expression {
    pub fn parse(path: &str) -> Result<Self, BindingError> {
        if path.is_empty() {
            return Err(BindingError::resolution(path, "", "empty expression"));
        }

        let mut segments = Vec::new();
        let mut rest = path;
        loop {
            let (segment, remainder) = parse_segment(path, rest)?;
            segments.push(segment);
            if remainder.is_empty() {
                break;
            }
            match remainder.strip_prefix('.') {
                Some(next) => rest = next,
                None => {
                    return Err(BindingError::resolution(
                        path,
                        remainder,
                        "expected '.' after subscript",
                    ))
                }
            }
        }

        Ok(Self {
            source: path.to_string(),
            segments,
        })
    }

    /// Original text
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Member names with subscripts reduced to `[]`
    ///
    /// `user.tags[2]` and `user.tags[7]` share the shape `user.tags[]`.
    pub fn shape(&self) -> String {
        let mut shape = String::with_capacity(self.source.len());
        for (position, segment) in self.segments.iter().enumerate() {
            if position > 0 {
                shape.push('.');
            }
            shape.push_str(&segment.name);
            if segment.subscript.is_some() {
                shape.push_str("[]");
            }
        }
        shape
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for Expression {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segment<'p>(path: &str, input: &'p str) -> Result<(PathSegment, &'p str), BindingError> {
    let name_end = input.find(['.', '[']).unwrap_or(input.len());
    let name = &input[..name_end];
    if name.is_empty() {
        return Err(BindingError::resolution(path, name, "empty segment"));
    }
    if !is_identifier(name) {
        return Err(BindingError::resolution(path, name, "invalid identifier"));
    }

    let rest = &input[name_end..];
    let Some(body) = rest.strip_prefix('[') else {
        return Ok((
            PathSegment {
                name: name.to_string(),
                subscript: None,
            },
            rest,
        ));
    };

    let (subscript, after) = match body.chars().next() {
        Some(quote @ ('\'' | '"')) => {
            let inner = &body[1..];
            let close = inner
                .find(quote)
                .ok_or_else(|| BindingError::resolution(path, name, "unterminated quoted key"))?;
            let after = inner[close + 1..].strip_prefix(']').ok_or_else(|| {
                BindingError::resolution(path, name, "expected ']' after quoted key")
            })?;
            (Subscript::Key(inner[..close].to_string()), after)
        }
        _ => {
            let close = body
                .find(']')
                .ok_or_else(|| BindingError::resolution(path, name, "unclosed '['"))?;
            let raw = body[..close].trim();
            if raw.is_empty() {
                return Err(BindingError::resolution(path, name, "empty subscript"));
            }
            let subscript = if raw.bytes().all(|b| b.is_ascii_digit()) {
                Subscript::Index(raw.parse().map_err(|_| {
                    BindingError::resolution(path, name, "index does not fit in usize")
                })?)
            } else {
                Subscript::Key(raw.to_string())
            };
            (subscript, &body[close + 1..])
        }
    };

    if after.starts_with('[') {
        return Err(BindingError::resolution(
            path,
            name,
            "only one subscript per segment",
        ));
    }

    Ok((
        PathSegment {
            name: name.to_string(),
            subscript: Some(subscript),
        },
        after,
    ))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
